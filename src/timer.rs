// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! Retransmission deadline for the single outstanding frame

use std::time::{Duration, Instant};

/// Longest wait a timer is armed for; longer durations are clamped.
pub const MAX_ARM: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

// ============================================================================
// Clock Trait
// ============================================================================

/// Source of the current time for the retransmission timer
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

// ============================================================================
// Retransmission Timer
// ============================================================================

/// Single-shot deadline. Arming an armed timer keeps the original deadline.
pub struct RetransmissionTimer {
    clock: Box<dyn Clock>,
    deadline: Option<Instant>,
}

impl RetransmissionTimer {
    pub fn new(clock: Box<dyn Clock>) -> Self {
        RetransmissionTimer {
            clock,
            deadline: None,
        }
    }

    pub fn arm(&mut self, duration: Duration) {
        if self.deadline.is_none() {
            let now = self.clock.now();
            self.deadline = Some(now.checked_add(duration.min(MAX_ARM)).unwrap_or(now));
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|deadline| self.clock.now() >= deadline)
    }

    /// Time left before expiry, or `None` when disarmed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(self.clock.now()))
    }
}

// ============================================================================
// Mock Clock for Testing
// ============================================================================

/// Clock that only moves when told to. Clones share the same time.
#[cfg(test)]
#[derive(Clone)]
pub struct MockClock {
    start: Instant,
    offset: std::sync::Arc<std::sync::Mutex<Duration>>,
}

#[cfg(test)]
impl MockClock {
    pub fn new() -> Self {
        MockClock {
            start: Instant::now(),
            offset: Default::default(),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }

    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }
}

#[cfg(test)]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }
}

// ============================================================================
// Tests
// ============================================================================
