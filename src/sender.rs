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
use std::io::Read;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, warn};
use crate::link::{Connection, LinkError};
use crate::packet::{ControlKind, Packet, PacketError, DATA_CHUNK_SIZE};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum SenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("link error: {0}")]
    Link(#[from] LinkError),

    #[error("packet error: {0}")]
    Packet(#[from] PacketError),

    #[error("Transfer complete")]
    TransferComplete,
}

// ============================================================================
// States
// ============================================================================

pub struct SendStart;
pub struct SendData;
pub struct SendEnd;
pub struct CloseLink;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    link: Connection,
    file: File,
    file_name: String,
    file_size: u64,
    sequence: u8,
    bytes_sent: u64,
    report_statistics: bool,
    started: Instant,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState: Send {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            link: self.link,
            file: self.file,
            file_name: self.file_name,
            file_size: self.file_size,
            sequence: self.sequence,
            bytes_sent: self.bytes_sent,
            report_statistics: self.report_statistics,
            started: self.started,
        })
    }

    fn io_error(&self, e: std::io::Error) -> SenderError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        SenderError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    fn send(&mut self, packet: &Packet) -> Result<(), SenderError> {
        self.link.write(&packet.encode()?)?;
        Ok(())
    }

    /// Close the link after a failed write, keeping the original error.
    fn abort(self, e: SenderError) -> SenderError {
        if let Err(close_err) = self.link.close(false) {
            warn!("close after failed transfer: {}", close_err);
        }
        e
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<SendStart> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        let start = Packet::Control {
            kind: ControlKind::Start,
            file_size: fsm.file_size,
            file_name: fsm.file_name.clone(),
        };

        if let Err(e) = fsm.send(&start) {
            return Err(fsm.abort(e));
        }
        info!(name = %fsm.file_name, size = fsm.file_size, "start packet acknowledged");
        fsm.started = Instant::now();

        let next = fsm.transition::<SendData>();
        Ok(next as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<SendData> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;

        let mut chunk = Vec::with_capacity(DATA_CHUNK_SIZE);
        if let Err(e) = (&mut fsm.file).take(DATA_CHUNK_SIZE as u64).read_to_end(&mut chunk) {
            let e = fsm.io_error(e);
            return Err(fsm.abort(e));
        }

        if chunk.is_empty() {
            let next = fsm.transition::<SendEnd>();
            return Ok(next as Box<dyn SenderState>);
        }

        let len = chunk.len() as u64;
        let data = Packet::Data { sequence: fsm.sequence, data: chunk };
        if let Err(e) = fsm.send(&data) {
            return Err(fsm.abort(e));
        }

        fsm.bytes_sent += len;
        debug!(
            sequence = fsm.sequence,
            "sent {} of {} bytes", fsm.bytes_sent, fsm.file_size
        );
        fsm.sequence = fsm.sequence.wrapping_add(1);
        Ok(Box::new(fsm) as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<SendEnd> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        let end = Packet::Control {
            kind: ControlKind::End,
            file_size: fsm.bytes_sent,
            file_name: fsm.file_name.clone(),
        };

        if let Err(e) = fsm.send(&end) {
            return Err(fsm.abort(e));
        }
        info!(
            "sent {} bytes in {:.3} s",
            fsm.bytes_sent,
            fsm.started.elapsed().as_secs_f64()
        );

        let next = fsm.transition::<CloseLink>();
        Ok(next as Box<dyn SenderState>)
    }
}

impl SenderState for SenderFsm<CloseLink> {
    fn step(self: Box<Self>) -> Result<Box<dyn SenderState>, SenderError> {
        let fsm = *self;
        fsm.link.close(fsm.report_statistics)?;
        Err(SenderError::TransferComplete)
    }
}

// ============================================================================
// Constructor
// ============================================================================

impl SenderFsm<SendStart> {
    pub fn new(
        link: Connection,
        path: &Path,
        report_statistics: bool,
    ) -> Result<Box<dyn SenderState>, SenderError> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(Box::new(SenderFsm {
            state: PhantomData::<SendStart>,
            link,
            file,
            file_name,
            file_size,
            sequence: 0,
            bytes_sent: 0,
            report_statistics,
            started: Instant::now(),
        }))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{build_information_frame, build_supervision_frame};
    use crate::link::LinkConfig;
    use crate::protocol::*;
    use crate::serial::MockSerialPort;
    use crate::timer::MockClock;
    use std::path::PathBuf;

    fn run_sender(mut fsm: Box<dyn SenderState>) -> Result<(), SenderError> {
        loop {
            match fsm.step() {
                Ok(next) => fsm = next,
                Err(SenderError::TransferComplete) => return Ok(()),
                Err(e) => return Err(e),
            }
        }
    }

    /// Scripted session: every packet is answered with `replies[i]`
    /// before the closing DISC exchange.
    struct Session {
        responses: Vec<Option<u8>>,
        expected_writes: Vec<u8>,
        seq: Seq,
    }

    impl Session {
        fn new() -> Self {
            let mut session = Session {
                responses: Vec::new(),
                expected_writes: build_supervision_frame(Control::Set, ADDRESS_TX).to_vec(),
                seq: Seq::Zero,
            };
            session.reply(Control::Ua, ADDRESS_TX);
            session
        }

        fn reply(&mut self, control: Control, address: u8) {
            let frame = build_supervision_frame(control, address);
            self.responses.extend(frame.iter().map(|&b| Some(b)));
        }

        fn packet(&mut self, packet: Packet) {
            let bytes = packet.encode().unwrap();
            self.expected_writes
                .extend(build_information_frame(ADDRESS_TX, self.seq, &bytes));
            self.reply(Control::Rr(self.seq.toggle()), ADDRESS_TX);
            self.seq = self.seq.toggle();
        }

        fn close(mut self) -> (Vec<Option<u8>>, Vec<u8>) {
            self.expected_writes
                .extend(build_supervision_frame(Control::Disc, ADDRESS_TX));
            self.reply(Control::Disc, ADDRESS_RX);
            self.expected_writes
                .extend(build_supervision_frame(Control::Ua, ADDRESS_RX));
            (self.responses, self.expected_writes)
        }
    }

    fn start(name: &str, size: u64) -> Packet {
        Packet::Control { kind: ControlKind::Start, file_size: size, file_name: name.to_string() }
    }

    fn end(name: &str, size: u64) -> Packet {
        Packet::Control { kind: ControlKind::End, file_size: size, file_name: name.to_string() }
    }

    fn connect(responses: Vec<Option<u8>>, expected_writes: Vec<u8>) -> Connection {
        let clock = MockClock::new();
        let port = MockSerialPort::new(responses, expected_writes).with_clock(clock.clone());
        Connection::open_with(
            LinkConfig::new("mock", Role::Transmitter),
            Box::new(port),
            Box::new(clock),
        )
        .expect("open should succeed")
    }

    fn temp_file(name: &str, content: &[u8]) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_sender_full_transfer() {
        let name = "arqlink_sender_small.txt";
        let path = temp_file(name, b"Test data");

        let mut session = Session::new();
        session.packet(start(name, 9));
        session.packet(Packet::Data { sequence: 0, data: b"Test data".to_vec() });
        session.packet(end(name, 9));
        let (responses, expected_writes) = session.close();

        let fsm = SenderFsm::new(connect(responses, expected_writes), &path, true).unwrap();
        run_sender(fsm).expect("transfer should succeed");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_sender_multiple_chunks() {
        let name = "arqlink_sender_chunks.bin";
        let content: Vec<u8> = (0..600).map(|i| (i % 256) as u8).collect();
        let path = temp_file(name, &content);

        let mut session = Session::new();
        session.packet(start(name, 600));
        for (sequence, chunk) in content.chunks(DATA_CHUNK_SIZE).enumerate() {
            session.packet(Packet::Data { sequence: sequence as u8, data: chunk.to_vec() });
        }
        session.packet(end(name, 600));
        let (responses, expected_writes) = session.close();

        let fsm = SenderFsm::new(connect(responses, expected_writes), &path, false).unwrap();
        run_sender(fsm).expect("transfer should succeed");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_sender_empty_file() {
        let name = "arqlink_sender_empty.txt";
        let path = temp_file(name, b"");

        let mut session = Session::new();
        session.packet(start(name, 0));
        session.packet(end(name, 0));
        let (responses, expected_writes) = session.close();

        let fsm = SenderFsm::new(connect(responses, expected_writes), &path, false).unwrap();
        run_sender(fsm).expect("transfer should succeed");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_sender_rejected_packet_is_resent() {
        let name = "arqlink_sender_rej.txt";
        let path = temp_file(name, b"retry");

        let mut session = Session::new();
        session.packet(start(name, 5));

        // first data frame rejected, then acknowledged
        let data = Packet::Data { sequence: 0, data: b"retry".to_vec() };
        let frame = build_information_frame(ADDRESS_TX, session.seq, &data.encode().unwrap());
        session.expected_writes.extend(&frame);
        session.reply(Control::Rej(session.seq), ADDRESS_TX);
        session.packet(data);

        session.packet(end(name, 5));
        let (responses, expected_writes) = session.close();

        let fsm = SenderFsm::new(connect(responses, expected_writes), &path, true).unwrap();
        run_sender(fsm).expect("transfer should succeed");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_sender_closes_link_after_failed_write() {
        let name = "arqlink_sender_unanswered.txt";
        let path = temp_file(name, b"lost");

        let mut session = Session::new();
        session.packet(start(name, 4));

        // three transmissions of the data frame, each timing out after 3 s
        let data = Packet::Data { sequence: 0, data: b"lost".to_vec() };
        let frame = build_information_frame(ADDRESS_TX, session.seq, &data.encode().unwrap());
        for _ in 0..3 {
            session.expected_writes.extend(&frame);
        }
        session.responses.extend(std::iter::repeat(None).take(90));
        let (responses, expected_writes) = session.close();

        let fsm = SenderFsm::new(connect(responses, expected_writes), &path, false).unwrap();
        match run_sender(fsm) {
            Err(SenderError::Link(LinkError::RetryBudgetExceeded { operation: "write", attempts: 3 })) => {}
            other => panic!("unexpected result: {:?}", other),
        }

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_sender_missing_file() {
        let path = std::env::temp_dir().join("arqlink_does_not_exist.txt");
        let session = Session::new();
        let link = connect(session.responses, session.expected_writes);
        assert!(matches!(
            SenderFsm::new(link, &path, false),
            Err(SenderError::Io(_))
        ));
    }
}
