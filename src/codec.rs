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

//! Byte stuffing and frame layouts

use crate::protocol::*;

// ============================================================================
// Error Types
// ============================================================================

/// Reasons a frame cannot be recognized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("escape byte at end of stream")]
    TrailingEscape,

    #[error("invalid escaped byte 0x{0:02X}")]
    InvalidEscape(u8),

    #[error("information frame without BCC2")]
    EmptyInformation,

    #[error("payload exceeds {max} bytes")]
    PayloadOverflow { max: usize },
}

// ============================================================================
// Stuffing
// ============================================================================

fn needs_escape(byte: u8) -> bool {
    byte == FLAG || byte == ESC
}

/// Append `byte` to `out`, escaping it if it is a flag or escape byte.
pub fn stuff_byte(byte: u8, out: &mut Vec<u8>) {
    if needs_escape(byte) {
        out.push(ESC);
        out.push(byte ^ STUFF_MASK);
    } else {
        out.push(byte);
    }
}

pub fn stuff(payload: &[u8]) -> Vec<u8> {
    let extra = payload.iter().filter(|&&b| needs_escape(b)).count();
    let mut out = Vec::with_capacity(payload.len() + extra);
    for &byte in payload {
        stuff_byte(byte, &mut out);
    }
    out
}

/// Recover the original value of the byte following an escape.
pub fn unescape(byte: u8) -> Result<u8, FrameError> {
    let original = byte ^ STUFF_MASK;
    if needs_escape(original) {
        Ok(original)
    } else {
        Err(FrameError::InvalidEscape(byte))
    }
}

pub fn destuff(stuffed: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut out = Vec::with_capacity(stuffed.len());
    let mut bytes = stuffed.iter();
    while let Some(&byte) = bytes.next() {
        if byte == ESC {
            let &next = bytes.next().ok_or(FrameError::TrailingEscape)?;
            out.push(unescape(next)?);
        } else {
            out.push(byte);
        }
    }
    Ok(out)
}

// ============================================================================
// Checksums & Frames
// ============================================================================

/// XOR of all payload bytes, computed before stuffing.
pub fn bcc2(payload: &[u8]) -> u8 {
    payload.iter().fold(0u8, |acc, &b| acc ^ b)
}

pub fn build_supervision_frame(control: Control, address: u8) -> [u8; 5] {
    let control = control.to_byte();
    [FLAG, address, control, address ^ control, FLAG]
}

pub fn build_information_frame(address: u8, seq: Seq, payload: &[u8]) -> Vec<u8> {
    let control = Control::Info(seq).to_byte();
    let mut frame = Vec::with_capacity(payload.len() * 2 + 8);
    frame.extend_from_slice(&[FLAG, address, control, address ^ control]);
    frame.extend(stuff(payload));
    stuff_byte(bcc2(payload), &mut frame);
    frame.push(FLAG);
    frame
}

// ============================================================================
// Tests
// ============================================================================
