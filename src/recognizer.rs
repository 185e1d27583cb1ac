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

//! Byte-at-a-time frame recognition

use crate::codec::{self, FrameError};
use crate::protocol::*;

// ============================================================================
// States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    Start,
    FlagSeen,
    AddressSeen,
    ControlSeen,
    ChecksumOk,
    ReadingPayload,
    InEscape,
    Done,
}

/// A complete frame accepted by the recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognized {
    Supervision {
        address: u8,
        control: Control,
    },
    Information {
        address: u8,
        seq: Seq,
        /// Destuffed payload without the trailing BCC2 byte
        payload: Vec<u8>,
        bcc2_valid: bool,
    },
}

impl Recognized {
    pub fn address(&self) -> u8 {
        match self {
            Recognized::Supervision { address, .. } => *address,
            Recognized::Information { address, .. } => *address,
        }
    }

    pub fn control(&self) -> Control {
        match self {
            Recognized::Supervision { control, .. } => *control,
            Recognized::Information { seq, .. } => Control::Info(*seq),
        }
    }
}

// ============================================================================
// Recognizer
// ============================================================================

pub struct FrameRecognizer {
    policy: &'static RolePolicy,
    max_payload: usize,
    state: ParserState,
    address: u8,
    control: u8,
    data: Vec<u8>,
}

impl FrameRecognizer {
    pub fn new(role: Role, max_payload: usize) -> Self {
        FrameRecognizer {
            policy: role.policy(),
            max_payload,
            state: ParserState::Start,
            address: 0,
            control: 0,
            data: Vec::new(),
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Forget any partially recognized frame.
    pub fn reset(&mut self) {
        self.restart(ParserState::Start);
    }

    fn restart(&mut self, state: ParserState) {
        self.state = state;
        self.data.clear();
    }

    /// Consume one byte from the line.
    ///
    /// Returns `Ok(Some(frame))` when the byte completes a frame. An error means
    /// the frame under construction was discarded; the recognizer has already
    /// resynchronized and can keep being fed.
    pub fn feed(&mut self, byte: u8) -> Result<Option<Recognized>, FrameError> {
        match self.state {
            ParserState::Start | ParserState::Done => {
                if byte == FLAG {
                    self.restart(ParserState::FlagSeen);
                } else {
                    self.restart(ParserState::Start);
                }
            }
            ParserState::FlagSeen => {
                if self.policy.accepts_address(byte) {
                    self.address = byte;
                    self.state = ParserState::AddressSeen;
                } else if byte != FLAG {
                    self.state = ParserState::Start;
                }
            }
            ParserState::AddressSeen => {
                if self.policy.accepts(self.address, byte) {
                    self.control = byte;
                    self.state = ParserState::ControlSeen;
                } else {
                    self.resync(byte);
                }
            }
            ParserState::ControlSeen => {
                if byte == self.address ^ self.control {
                    self.state = ParserState::ChecksumOk;
                } else {
                    self.resync(byte);
                }
            }
            ParserState::ChecksumOk => return self.after_header(byte),
            ParserState::ReadingPayload => match byte {
                FLAG => return Ok(Some(self.finish_information())),
                ESC => self.state = ParserState::InEscape,
                _ => self.push(byte)?,
            },
            ParserState::InEscape => {
                if byte == FLAG {
                    self.restart(ParserState::FlagSeen);
                    return Err(FrameError::TrailingEscape);
                }
                match codec::unescape(byte) {
                    Ok(original) => {
                        self.push(original)?;
                        self.state = ParserState::ReadingPayload;
                    }
                    Err(e) => {
                        self.restart(ParserState::Start);
                        return Err(e);
                    }
                }
            }
        }
        Ok(None)
    }

    // A flag inside a header may be the start of the next frame
    fn resync(&mut self, byte: u8) {
        if byte == FLAG {
            self.restart(ParserState::FlagSeen);
        } else {
            self.restart(ParserState::Start);
        }
    }

    fn after_header(&mut self, byte: u8) -> Result<Option<Recognized>, FrameError> {
        let Some(control) = Control::from_byte(self.control) else {
            self.restart(ParserState::Start);
            return Ok(None);
        };

        if !control.is_information() {
            if byte == FLAG {
                self.state = ParserState::Done;
                return Ok(Some(Recognized::Supervision {
                    address: self.address,
                    control,
                }));
            }
            self.restart(ParserState::Start);
            return Ok(None);
        }

        match byte {
            FLAG => {
                self.restart(ParserState::FlagSeen);
                Err(FrameError::EmptyInformation)
            }
            ESC => {
                self.state = ParserState::InEscape;
                Ok(None)
            }
            _ => {
                self.push(byte)?;
                self.state = ParserState::ReadingPayload;
                Ok(None)
            }
        }
    }

    // Room for max_payload bytes plus BCC2
    fn push(&mut self, byte: u8) -> Result<(), FrameError> {
        if self.data.len() > self.max_payload {
            self.restart(ParserState::Start);
            return Err(FrameError::PayloadOverflow { max: self.max_payload });
        }
        self.data.push(byte);
        Ok(())
    }

    fn finish_information(&mut self) -> Recognized {
        let mut payload = std::mem::take(&mut self.data);
        let received = payload.pop().unwrap_or_default();
        let seq = match Control::from_byte(self.control) {
            Some(Control::Info(seq)) => seq,
            _ => Seq::Zero,
        };
        self.state = ParserState::Done;
        Recognized::Information {
            address: self.address,
            seq,
            bcc2_valid: codec::bcc2(&payload) == received,
            payload,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{build_information_frame, build_supervision_frame};

    fn feed_all(
        recognizer: &mut FrameRecognizer,
        bytes: &[u8],
    ) -> (Vec<Recognized>, Vec<FrameError>) {
        let mut frames = Vec::new();
        let mut errors = Vec::new();
        for &byte in bytes {
            match recognizer.feed(byte) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => {}
                Err(e) => errors.push(e),
            }
        }
        (frames, errors)
    }

    #[test]
    fn test_recognize_supervision_frame() {
        let mut rec = FrameRecognizer::new(Role::Transmitter, 64);
        let frame = build_supervision_frame(Control::Ua, ADDRESS_TX);
        let (frames, errors) = feed_all(&mut rec, &frame);

        assert!(errors.is_empty());
        assert_eq!(
            frames,
            vec![Recognized::Supervision { address: ADDRESS_TX, control: Control::Ua }]
        );
        assert_eq!(rec.state(), ParserState::Done);
    }

    #[test]
    fn test_noise_and_repeated_flags() {
        let mut rec = FrameRecognizer::new(Role::Receiver, 64);
        let mut bytes = vec![0x11, 0x22, FLAG, FLAG, FLAG];
        bytes.extend_from_slice(&build_supervision_frame(Control::Set, ADDRESS_TX)[1..]);
        let (frames, _) = feed_all(&mut rec, &bytes);

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].control(), Control::Set);
    }

    #[test]
    fn test_corrupted_header_never_recognized() {
        let good = build_supervision_frame(Control::Rr(Seq::One), ADDRESS_TX);
        for pos in 0..good.len() {
            for mask in [0x01u8, 0x10, 0x80, 0xFF] {
                let mut bad = good;
                bad[pos] ^= mask;
                let mut rec = FrameRecognizer::new(Role::Transmitter, 64);
                let (frames, _) = feed_all(&mut rec, &bad);
                assert!(frames.is_empty(), "pos {} mask {:02X} accepted", pos, mask);
                assert_ne!(rec.state(), ParserState::Done);
            }
        }
    }

    #[test]
    fn test_bad_bcc1_returns_to_start() {
        let mut rec = FrameRecognizer::new(Role::Transmitter, 64);
        for &byte in &[FLAG, ADDRESS_TX, UA, 0x00] {
            rec.feed(byte).unwrap();
        }
        assert_eq!(rec.state(), ParserState::Start);
    }

    #[test]
    fn test_stray_flag_resynchronizes() {
        let mut rec = FrameRecognizer::new(Role::Transmitter, 64);
        let mut bytes = vec![FLAG, ADDRESS_TX];
        bytes.extend_from_slice(&build_supervision_frame(Control::Ua, ADDRESS_TX));
        let (frames, _) = feed_all(&mut rec, &bytes);
        assert_eq!(frames.len(), 1);
    }

    #[test]
    fn test_role_filters_controls() {
        let mut rec = FrameRecognizer::new(Role::Receiver, 64);
        let rr = build_supervision_frame(Control::Rr(Seq::Zero), ADDRESS_TX);
        let (frames, _) = feed_all(&mut rec, &rr);
        assert!(frames.is_empty());
    }

    #[test]
    fn test_recognize_information_frame() {
        let mut rec = FrameRecognizer::new(Role::Receiver, 64);
        let payload = [0x7E, 0x01, 0x7D];
        let frame = build_information_frame(ADDRESS_TX, Seq::One, &payload);
        let (frames, errors) = feed_all(&mut rec, &frame);

        assert!(errors.is_empty());
        assert_eq!(
            frames,
            vec![Recognized::Information {
                address: ADDRESS_TX,
                seq: Seq::One,
                payload: payload.to_vec(),
                bcc2_valid: true,
            }]
        );
    }

    #[test]
    fn test_information_bcc2_mismatch() {
        let mut rec = FrameRecognizer::new(Role::Receiver, 64);
        let mut frame = build_information_frame(ADDRESS_TX, Seq::Zero, b"hello");
        frame[5] ^= 0x01;
        let (frames, _) = feed_all(&mut rec, &frame);

        match &frames[..] {
            [Recognized::Information { bcc2_valid, payload, .. }] => {
                assert!(!bcc2_valid);
                assert_eq!(payload.len(), 5);
            }
            other => panic!("unexpected frames: {:?}", other),
        }
    }

    #[test]
    fn test_empty_information_is_malformed() {
        let mut rec = FrameRecognizer::new(Role::Receiver, 64);
        let (frames, errors) = feed_all(&mut rec, &[FLAG, ADDRESS_TX, I0, ADDRESS_TX ^ I0, FLAG]);
        assert!(frames.is_empty());
        assert_eq!(errors, vec![FrameError::EmptyInformation]);
        assert_eq!(rec.state(), ParserState::FlagSeen);
    }

    #[test]
    fn test_escape_before_flag_is_malformed() {
        let mut rec = FrameRecognizer::new(Role::Receiver, 64);
        let mut bytes = vec![FLAG, ADDRESS_TX, I1, ADDRESS_TX ^ I1, 0x01, ESC, FLAG];
        // the closing flag doubles as the opening flag of the next frame
        bytes.extend_from_slice(&build_information_frame(ADDRESS_TX, Seq::Zero, b"ok")[1..]);
        let (frames, errors) = feed_all(&mut rec, &bytes);

        assert_eq!(errors, vec![FrameError::TrailingEscape]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].control(), Control::Info(Seq::Zero));
    }

    #[test]
    fn test_payload_overflow() {
        let mut rec = FrameRecognizer::new(Role::Receiver, 4);
        let frame = build_information_frame(ADDRESS_TX, Seq::Zero, &[1, 2, 3, 4, 5, 6]);
        let (frames, errors) = feed_all(&mut rec, &frame);
        assert!(frames.is_empty());
        assert_eq!(errors, vec![FrameError::PayloadOverflow { max: 4 }]);

        let frame = build_information_frame(ADDRESS_TX, Seq::Zero, &[1, 2, 3, 4]);
        let (frames, _) = feed_all(&mut rec, &frame);
        assert_eq!(frames.len(), 1);
    }
}
