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

use std::marker::PhantomData;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};
use crate::link::{Connection, LinkError};
use crate::packet::{ControlKind, Packet};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ReceiverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("peer disconnected after {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },

    #[error("Transfer complete")]
    TransferComplete,
}

// ============================================================================
// States
// ============================================================================

pub struct WaitStart;
pub struct ReceiveData;
pub struct CloseLink;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    link: Connection,
    output_dir: PathBuf,
    current_file: Option<File>,
    file_size: u64,
    bytes_received: u64,
    sequence: u8,
    complete: bool,
    buffer: Vec<u8>,
    report_statistics: bool,
    started: Instant,
}

// ============================================================================
// Trait
// ============================================================================

pub trait ReceiverState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self) -> Box<ReceiverFsm<T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            link: self.link,
            output_dir: self.output_dir,
            current_file: self.current_file,
            file_size: self.file_size,
            bytes_received: self.bytes_received,
            sequence: self.sequence,
            complete: self.complete,
            buffer: self.buffer,
            report_statistics: self.report_statistics,
            started: self.started,
        })
    }

    fn io_error(&self, e: std::io::Error) -> ReceiverError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        ReceiverError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    /// Next packet from the link, or `None` once the peer has disconnected.
    fn next_packet(&mut self) -> Result<Option<Packet>, ReceiverError> {
        loop {
            match self.link.read(&mut self.buffer) {
                Ok(n) => match Packet::decode(&self.buffer[..n]) {
                    Ok(packet) => return Ok(Some(packet)),
                    Err(e) => warn!("discarding undecodable packet: {}", e),
                },
                Err(LinkError::Disconnected) => return Ok(None),
                Err(e) if e.is_retryable() => debug!("{}, reading again", e),
                Err(e) => return Err(e.into()),
            }
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverState for ReceiverFsm<WaitStart> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        match fsm.next_packet()? {
            Some(Packet::Control { kind: ControlKind::Start, file_size, file_name }) => {
                let path = fsm.output_dir.join(local_name(&file_name));
                let file = File::create(&path).map_err(|e| fsm.io_error(e))?;
                info!(path = %path.display(), size = file_size, "receiving file");

                fsm.current_file = Some(file);
                fsm.file_size = file_size;
                fsm.started = Instant::now();
                let next = fsm.transition::<ReceiveData>();
                Ok(next as Box<dyn ReceiverState>)
            }
            Some(packet) => {
                warn!("expected start packet, ignoring {}", kind_of(&packet));
                Ok(Box::new(fsm) as Box<dyn ReceiverState>)
            }
            None => {
                let next = fsm.transition::<CloseLink>();
                Ok(next as Box<dyn ReceiverState>)
            }
        }
    }
}

impl ReceiverState for ReceiverFsm<ReceiveData> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        match fsm.next_packet()? {
            Some(Packet::Data { sequence, data }) => {
                if sequence != fsm.sequence {
                    warn!(expected = fsm.sequence, got = sequence, "out of sequence data packet skipped");
                    return Ok(Box::new(fsm) as Box<dyn ReceiverState>);
                }

                if let Some(ref mut file) = fsm.current_file {
                    if let Err(e) = file.write_all(&data) {
                        return Err(fsm.io_error(e));
                    }
                }
                fsm.bytes_received += data.len() as u64;
                fsm.sequence = fsm.sequence.wrapping_add(1);
                debug!(sequence, "received {} of {} bytes", fsm.bytes_received, fsm.file_size);
                Ok(Box::new(fsm) as Box<dyn ReceiverState>)
            }
            Some(Packet::Control { kind: ControlKind::End, file_size, .. }) => {
                if file_size != fsm.bytes_received {
                    warn!(
                        "end packet reports {} bytes, received {}",
                        file_size, fsm.bytes_received
                    );
                }
                info!(
                    "received {} bytes in {:.3} s",
                    fsm.bytes_received,
                    fsm.started.elapsed().as_secs_f64()
                );
                fsm.complete = true;
                let next = fsm.transition::<CloseLink>();
                Ok(next as Box<dyn ReceiverState>)
            }
            Some(packet) => {
                warn!("ignoring {} during data phase", kind_of(&packet));
                Ok(Box::new(fsm) as Box<dyn ReceiverState>)
            }
            None => {
                let next = fsm.transition::<CloseLink>();
                Ok(next as Box<dyn ReceiverState>)
            }
        }
    }
}

impl ReceiverState for ReceiverFsm<CloseLink> {
    fn step(self: Box<Self>) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let mut fsm = *self;

        if let Some(mut file) = fsm.current_file.take() {
            if let Err(e) = file.flush() {
                return Err(fsm.io_error(e));
            }
        }

        fsm.link.close(fsm.report_statistics)?;

        if fsm.complete {
            Err(ReceiverError::TransferComplete)
        } else {
            Err(ReceiverError::Incomplete {
                received: fsm.bytes_received,
                expected: fsm.file_size,
            })
        }
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl ReceiverFsm<WaitStart> {
    pub fn new(link: Connection, output_dir: PathBuf, report_statistics: bool) -> Box<dyn ReceiverState> {
        let buffer = vec![0u8; link.max_payload()];
        Box::new(ReceiverFsm {
            state: PhantomData::<WaitStart>,
            link,
            output_dir,
            current_file: None,
            file_size: 0,
            bytes_received: 0,
            sequence: 0,
            complete: false,
            buffer,
            report_statistics,
            started: Instant::now(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// File name from the start packet with any directory components removed.
fn local_name(name: &str) -> String {
    Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "received.bin".to_string())
}

fn kind_of(packet: &Packet) -> &'static str {
    match packet {
        Packet::Control { kind: ControlKind::Start, .. } => "start packet",
        Packet::Control { kind: ControlKind::End, .. } => "end packet",
        Packet::Data { .. } => "data packet",
    }
}

// ============================================================================
// Tests
// ============================================================================
