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

//! Application packets carried inside information frames
//!
//! Control packets: `C | 0x00 L1 size... | 0x01 L2 name...`
//! Data packets:    `0x02 | seq | len_hi | len_lo | data...`

/// Control packet opening a file transfer
pub const START: u8 = 0x01;

/// Data packet
pub const DATA: u8 = 0x02;

/// Control packet closing a file transfer
pub const END: u8 = 0x03;

/// Parameter carrying the file size, big-endian
pub const PARAM_FILE_SIZE: u8 = 0x00;

/// Parameter carrying the file name
pub const PARAM_FILE_NAME: u8 = 0x01;

/// File bytes per data packet
pub const DATA_CHUNK_SIZE: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,

    #[error("unknown packet type 0x{0:02X}")]
    UnknownType(u8),

    #[error("packet truncated")]
    Truncated,

    #[error("unexpected parameter 0x{0:02X}")]
    UnexpectedParameter(u8),

    #[error("file size field of {0} bytes")]
    SizeTooWide(usize),

    #[error("file name of {0} bytes does not fit in a control packet")]
    NameTooLong(usize),

    #[error("data packet declares {declared} bytes but carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("data packet of {0} bytes is too long")]
    DataTooLong(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Start,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Control {
        kind: ControlKind,
        file_size: u64,
        file_name: String,
    },
    Data {
        sequence: u8,
        data: Vec<u8>,
    },
}

impl Packet {
    pub fn encode(&self) -> Result<Vec<u8>, PacketError> {
        match self {
            Packet::Control { kind, file_size, file_name } => {
                let name = file_name.as_bytes();
                if name.len() > u8::MAX as usize {
                    return Err(PacketError::NameTooLong(name.len()));
                }

                let size = file_size.to_be_bytes();
                let leading = size.iter().take_while(|&&b| b == 0).count().min(size.len() - 1);
                let size = &size[leading..];

                let mut out = Vec::with_capacity(5 + size.len() + name.len());
                out.push(match kind {
                    ControlKind::Start => START,
                    ControlKind::End => END,
                });
                out.extend_from_slice(&[PARAM_FILE_SIZE, size.len() as u8]);
                out.extend_from_slice(size);
                out.extend_from_slice(&[PARAM_FILE_NAME, name.len() as u8]);
                out.extend_from_slice(name);
                Ok(out)
            }
            Packet::Data { sequence, data } => {
                let len = u16::try_from(data.len())
                    .map_err(|_| PacketError::DataTooLong(data.len()))?;
                let mut out = Vec::with_capacity(4 + data.len());
                out.push(DATA);
                out.push(*sequence);
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(data);
                Ok(out)
            }
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Packet, PacketError> {
        let (&kind, rest) = bytes.split_first().ok_or(PacketError::Empty)?;
        match kind {
            DATA => {
                let [sequence, hi, lo, data @ ..] = rest else {
                    return Err(PacketError::Truncated);
                };
                let declared = u16::from_be_bytes([*hi, *lo]) as usize;
                if declared != data.len() {
                    return Err(PacketError::LengthMismatch { declared, actual: data.len() });
                }
                Ok(Packet::Data { sequence: *sequence, data: data.to_vec() })
            }
            START | END => {
                let (size, rest) = parameter(rest, PARAM_FILE_SIZE)?;
                if size.len() > 8 {
                    return Err(PacketError::SizeTooWide(size.len()));
                }
                let file_size = size.iter().fold(0u64, |acc, &b| (acc << 8) | b as u64);

                let (name, _) = parameter(rest, PARAM_FILE_NAME)?;
                Ok(Packet::Control {
                    kind: if kind == START { ControlKind::Start } else { ControlKind::End },
                    file_size,
                    file_name: String::from_utf8_lossy(name).into_owned(),
                })
            }
            other => Err(PacketError::UnknownType(other)),
        }
    }
}

// Split one type-length-value parameter off the front of `bytes`
fn parameter(bytes: &[u8], expected: u8) -> Result<(&[u8], &[u8]), PacketError> {
    let [param, len, rest @ ..] = bytes else {
        return Err(PacketError::Truncated);
    };
    if *param != expected {
        return Err(PacketError::UnexpectedParameter(*param));
    }
    let len = *len as usize;
    if rest.len() < len {
        return Err(PacketError::Truncated);
    }
    Ok(rest.split_at(len))
}
