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

//! Stop-and-wait connection over a serial line
//!
//! A [`Connection`] owns the transport, the frame recognizer and the
//! retransmission timer. Only one frame is ever outstanding: the
//! transmitter sends it, arms the timer and polls the line until the reply
//! arrives, a REJ forces an early resend, or the timer expires.

use std::time::Duration;
use serialport::{DataBits, Parity, StopBits};
use tracing::{debug, info, warn};
use crate::codec::{build_information_frame, build_supervision_frame};
use crate::protocol::*;
use crate::recognizer::{FrameRecognizer, Recognized};
use crate::serial::{RealSerialPort, SerialPort};
use crate::timer::{Clock, RetransmissionTimer, SystemClock};

pub const DEFAULT_BAUD_RATE: u32 = 38400;
pub const DEFAULT_MAX_RETRANSMISSIONS: u32 = 3;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_MAX_PAYLOAD: usize = 1024;

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Serial device, e.g. /dev/ttyS0
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub role: Role,
    /// Transmissions of a frame before the operation fails
    pub max_retransmissions: u32,
    pub timeout: Duration,
    /// Largest payload accepted by `write` and by the recognizer
    pub max_payload: usize,
}

impl LinkConfig {
    pub fn new(port: impl Into<String>, role: Role) -> Self {
        LinkConfig {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            role,
            max_retransmissions: DEFAULT_MAX_RETRANSMISSIONS,
            timeout: DEFAULT_TIMEOUT,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("transport I/O error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("serial port error: {0}")]
    Port(#[from] serialport::Error),

    #[error("BCC2 mismatch in frame {seq}, sent REJ")]
    ChecksumMismatch { seq: Seq },

    #[error("{operation} failed after {attempts} attempts")]
    RetryBudgetExceeded { operation: &'static str, attempts: u32 },

    #[error("peer disconnected")]
    Disconnected,

    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("received {size} bytes but the buffer holds {capacity}")]
    BufferTooSmall { size: usize, capacity: usize },

    #[error("{operation} is not available to the {role}")]
    RoleMismatch { operation: &'static str, role: Role },
}

impl LinkError {
    /// The peer will resend; calling `read` again is expected.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LinkError::ChecksumMismatch { .. })
    }
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Information frames acknowledged by the peer
    pub frames_sent: u64,
    pub retransmissions: u64,
    /// REJ received (transmitter) or sent (receiver)
    pub frames_rejected: u64,
    /// Information frames delivered to the caller
    pub frames_received: u64,
    pub duplicates: u64,
    pub malformed: u64,
}

impl Statistics {
    pub fn report(&self, role: Role) {
        info!("connection closed, statistics:");
        match role {
            Role::Transmitter => {
                info!("  information frames sent: {}", self.frames_sent);
                info!("  retransmissions: {}", self.retransmissions);
                info!("  frames rejected: {}", self.frames_rejected);
            }
            Role::Receiver => {
                info!("  information frames received: {}", self.frames_received);
                info!("  duplicate frames: {}", self.duplicates);
                info!("  frames rejected: {}", self.frames_rejected);
            }
        }
        info!("  malformed frames discarded: {}", self.malformed);
    }
}

#[derive(Debug, Default)]
pub struct ConnectionState {
    /// Next sequence bit to send (transmitter) or expected (receiver)
    pub seq: Seq,
    pub retries: u32,
    /// Set once `read` has answered the peer's DISC
    pub disconnected: bool,
    pub stats: Statistics,
}

enum Verdict {
    Accept,
    Reject,
    Ignore,
}

// ============================================================================
// Connection
// ============================================================================

pub struct Connection {
    config: LinkConfig,
    transport: Box<dyn SerialPort>,
    recognizer: FrameRecognizer,
    timer: RetransmissionTimer,
    state: ConnectionState,
}

impl Connection {
    /// Open the serial device named in `config` and establish the link.
    pub fn open(config: LinkConfig) -> Result<Self, LinkError> {
        let port = RealSerialPort::open(
            &config.port,
            config.baud_rate,
            config.data_bits,
            config.parity,
            config.stop_bits,
        )?;
        info!(port = %config.port, baud = config.baud_rate, "serial port opened");
        Self::open_with(config, Box::new(port), Box::new(SystemClock))
    }

    /// Establish the link over an already opened transport.
    pub fn open_with(
        config: LinkConfig,
        transport: Box<dyn SerialPort>,
        clock: Box<dyn Clock>,
    ) -> Result<Self, LinkError> {
        let mut link = Connection {
            recognizer: FrameRecognizer::new(config.role, config.max_payload),
            timer: RetransmissionTimer::new(clock),
            transport,
            state: ConnectionState::default(),
            config,
        };

        match link.config.role {
            Role::Transmitter => {
                let set = build_supervision_frame(Control::Set, ADDRESS_TX);
                link.transact("open", &set, |reply| match reply.control() {
                    Control::Ua => Verdict::Accept,
                    _ => Verdict::Ignore,
                })?;
            }
            Role::Receiver => {
                loop {
                    match link.next_frame()? {
                        Some(frame) if frame.control() == Control::Set => break,
                        Some(frame) => debug!(control = %frame.control(), "waiting for SET"),
                        None => {}
                    }
                }
                link.send_supervision(Control::Ua, ADDRESS_TX)?;
            }
        }

        info!(role = %link.config.role, "link established");
        Ok(link)
    }

    pub fn statistics(&self) -> Statistics {
        self.state.stats
    }

    pub fn max_payload(&self) -> usize {
        self.config.max_payload
    }

    /// Send `payload` as one information frame and wait for its acknowledgment.
    pub fn write(&mut self, payload: &[u8]) -> Result<usize, LinkError> {
        self.require(Role::Transmitter, "write")?;
        if payload.len() > self.config.max_payload {
            return Err(LinkError::PayloadTooLarge {
                size: payload.len(),
                max: self.config.max_payload,
            });
        }

        let seq = self.state.seq;
        let frame = build_information_frame(ADDRESS_TX, seq, payload);
        let ack = Control::Rr(seq.toggle());
        debug!(%seq, len = payload.len(), "sending information frame");

        self.transact("write", &frame, |reply| match reply.control() {
            control if control == ack => Verdict::Accept,
            Control::Rej(rejected) if rejected == seq => Verdict::Reject,
            _ => Verdict::Ignore,
        })?;

        self.state.seq = seq.toggle();
        self.state.stats.frames_sent += 1;
        Ok(payload.len())
    }

    /// Receive the next information frame into `buf`.
    ///
    /// Fails with [`LinkError::ChecksumMismatch`] after sending REJ (read again)
    /// and with [`LinkError::Disconnected`] once the peer has sent DISC.
    /// Retransmitted frames are acknowledged again but never delivered twice.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, LinkError> {
        self.require(Role::Receiver, "read")?;
        if self.state.disconnected {
            return Err(LinkError::Disconnected);
        }

        loop {
            let Some(frame) = self.next_frame()? else { continue };
            match frame {
                Recognized::Supervision { control: Control::Disc, .. } => {
                    info!("peer requested disconnect");
                    self.send_supervision(Control::Ua, ADDRESS_TX)?;
                    self.state.disconnected = true;
                    return Err(LinkError::Disconnected);
                }
                Recognized::Supervision { control: Control::Set, .. } => {
                    // our UA was lost
                    self.send_supervision(Control::Ua, ADDRESS_TX)?;
                }
                Recognized::Supervision { control, .. } => {
                    debug!(%control, "ignoring frame while reading");
                }
                Recognized::Information { seq, payload, bcc2_valid, .. } => {
                    if !bcc2_valid {
                        self.send_supervision(Control::Rej(seq), ADDRESS_TX)?;
                        self.state.stats.frames_rejected += 1;
                        warn!(%seq, "BCC2 mismatch, frame rejected");
                        return Err(LinkError::ChecksumMismatch { seq });
                    }

                    if seq != self.state.seq {
                        self.state.stats.duplicates += 1;
                        debug!(%seq, "duplicate frame, acknowledging again");
                        self.send_supervision(Control::Rr(seq.toggle()), ADDRESS_TX)?;
                        continue;
                    }

                    if payload.len() > buf.len() {
                        return Err(LinkError::BufferTooSmall {
                            size: payload.len(),
                            capacity: buf.len(),
                        });
                    }

                    self.send_supervision(Control::Rr(seq.toggle()), ADDRESS_TX)?;
                    buf[..payload.len()].copy_from_slice(&payload);
                    self.state.seq = seq.toggle();
                    self.state.stats.frames_received += 1;
                    return Ok(payload.len());
                }
            }
        }
    }

    /// Tear the link down and release the transport.
    pub fn close(mut self, report_statistics: bool) -> Result<Statistics, LinkError> {
        match self.config.role {
            Role::Transmitter => {
                let disc = build_supervision_frame(Control::Disc, ADDRESS_TX);
                self.transact("close", &disc, |reply| match reply.control() {
                    Control::Disc | Control::Ua => Verdict::Accept,
                    _ => Verdict::Ignore,
                })?;
                self.send_supervision(Control::Ua, ADDRESS_RX)?;
            }
            Role::Receiver => {
                let answer = if self.state.disconnected {
                    build_supervision_frame(Control::Ua, ADDRESS_TX)
                } else {
                    self.await_disconnect()?;
                    let disc = build_supervision_frame(Control::Disc, ADDRESS_RX);
                    self.transport.write_all(&disc)?;
                    debug!("sent DISC");
                    disc
                };
                self.await_final_ua(&answer)?;
            }
        }

        let stats = self.state.stats;
        if report_statistics {
            stats.report(self.config.role);
        }
        info!(role = %self.config.role, "link closed");
        Ok(stats)
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn require(&self, role: Role, operation: &'static str) -> Result<(), LinkError> {
        if self.config.role == role {
            Ok(())
        } else {
            Err(LinkError::RoleMismatch { operation, role: self.config.role })
        }
    }

    fn send_supervision(&mut self, control: Control, address: u8) -> Result<(), LinkError> {
        self.transport.write_all(&build_supervision_frame(control, address))?;
        debug!(%control, address, "sent");
        Ok(())
    }

    /// Poll the line until a frame is recognized, or until the armed timer
    /// expires (`None`). With the timer disarmed this waits indefinitely.
    fn next_frame(&mut self) -> Result<Option<Recognized>, LinkError> {
        self.recognizer.reset();
        loop {
            if self.timer.expired() {
                return Ok(None);
            }

            let wait = self.timer.remaining()
                .map_or(POLL_INTERVAL, |left| left.min(POLL_INTERVAL));
            let Some(byte) = self.transport.read_byte(wait)? else { continue };

            match self.recognizer.feed(byte) {
                Ok(Some(frame)) => {
                    debug!(control = %frame.control(), address = frame.address(), "received");
                    return Ok(Some(frame));
                }
                Ok(None) => {}
                Err(e) => {
                    self.state.stats.malformed += 1;
                    warn!("discarding malformed frame: {}", e);
                }
            }
        }
    }

    /// Send `frame` until `classify` accepts a reply or the retry budget runs out.
    ///
    /// Every timer expiry and every REJ consumes one attempt; a REJ resends
    /// at once instead of waiting for the timer.
    fn transact<F>(
        &mut self,
        operation: &'static str,
        frame: &[u8],
        mut classify: F,
    ) -> Result<Recognized, LinkError>
    where
        F: FnMut(&Recognized) -> Verdict,
    {
        self.timer.cancel();
        self.state.retries = 0;
        let mut sent = false;

        while self.state.retries < self.config.max_retransmissions {
            if !self.timer.is_armed() {
                if sent {
                    self.state.stats.retransmissions += 1;
                    warn!(operation, attempt = self.state.retries + 1, "retransmitting");
                }
                self.transport.write_all(frame)?;
                self.timer.arm(self.config.timeout);
                sent = true;
            }

            match self.next_frame()? {
                Some(reply) => match classify(&reply) {
                    Verdict::Accept => {
                        self.timer.cancel();
                        self.state.retries = 0;
                        return Ok(reply);
                    }
                    Verdict::Reject => {
                        self.timer.cancel();
                        self.state.retries += 1;
                        self.state.stats.frames_rejected += 1;
                        warn!(operation, "frame rejected by peer");
                    }
                    Verdict::Ignore => {
                        debug!(operation, control = %reply.control(), "unexpected reply ignored");
                    }
                },
                None => {
                    self.timer.cancel();
                    self.state.retries += 1;
                    warn!(
                        operation,
                        "no reply within {:?} ({}/{})",
                        self.config.timeout,
                        self.state.retries,
                        self.config.max_retransmissions
                    );
                }
            }
        }

        Err(LinkError::RetryBudgetExceeded {
            operation,
            attempts: self.state.retries,
        })
    }

    fn await_disconnect(&mut self) -> Result<(), LinkError> {
        loop {
            let Some(frame) = self.next_frame()? else { continue };
            match frame {
                Recognized::Supervision { control: Control::Disc, .. } => return Ok(()),
                // the last RR was lost and the peer is still resending
                Recognized::Information { seq, bcc2_valid: true, .. } if seq != self.state.seq => {
                    self.state.stats.duplicates += 1;
                    self.send_supervision(Control::Rr(seq.toggle()), ADDRESS_TX)?;
                }
                other => debug!(control = %other.control(), "waiting for DISC"),
            }
        }
    }

    /// Wait for the UA ending the connection, repeating `answer` whenever the
    /// peer resends its DISC. Gives up after the peer's whole retry window.
    fn await_final_ua(&mut self, answer: &[u8]) -> Result<(), LinkError> {
        self.timer.cancel();
        self.timer.arm(self.config.timeout.saturating_mul(self.config.max_retransmissions));

        loop {
            match self.next_frame()? {
                Some(frame) if frame.control() == Control::Ua => {
                    self.timer.cancel();
                    return Ok(());
                }
                Some(frame) if frame.control() == Control::Disc => {
                    self.transport.write_all(answer)?;
                }
                Some(frame) => debug!(control = %frame.control(), "waiting for UA"),
                None => {
                    self.timer.cancel();
                    warn!("no final UA from peer, closing anyway");
                    return Ok(());
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
