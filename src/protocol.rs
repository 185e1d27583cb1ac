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

//! Link protocol constants

use std::fmt;

/// Frame boundary marker
pub const FLAG: u8 = 0x7E;

/// Escape - the next byte is the original value XOR `STUFF_MASK`
pub const ESC: u8 = 0x7D;

/// Applied to a flag or escape byte that follows `ESC`
pub const STUFF_MASK: u8 = 0x20;

/// Commands sent by the transmitter, replies sent by the receiver
pub const ADDRESS_TX: u8 = 0x03;

/// Commands sent by the receiver, replies sent by the transmitter
pub const ADDRESS_RX: u8 = 0x01;

/// Set up - transmitter requests a connection
pub const SET: u8 = 0x03;

/// Unnumbered acknowledgment
pub const UA: u8 = 0x07;

/// Disconnect
pub const DISC: u8 = 0x0B;

/// Receiver ready for frame 0
pub const RR0: u8 = 0xAA;

/// Receiver ready for frame 1
pub const RR1: u8 = 0xAB;

/// Frame 0 rejected
pub const REJ0: u8 = 0x54;

/// Frame 1 rejected
pub const REJ1: u8 = 0x55;

/// Information frame carrying sequence bit 0
pub const I0: u8 = 0x00;

/// Information frame carrying sequence bit 1
pub const I1: u8 = 0x80;

/// Interval for a single transport read. The retransmission deadline is
/// checked between reads, so expiry is observed with this granularity.
pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);

// ============================================================================
// Sequence Bit
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Seq {
    #[default]
    Zero,
    One,
}

impl Seq {
    pub fn toggle(self) -> Seq {
        match self {
            Seq::Zero => Seq::One,
            Seq::One => Seq::Zero,
        }
    }

    pub fn bit(self) -> u8 {
        match self {
            Seq::Zero => 0,
            Seq::One => 1,
        }
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bit())
    }
}

// ============================================================================
// Control Field
// ============================================================================

/// Frame type discriminant carried in the control byte.
///
/// Acknowledgments (`Rr`, `Rej`) and information frames (`Info`) use disjoint
/// byte values, so a control byte never has to be interpreted by context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Set,
    Ua,
    Disc,
    Rr(Seq),
    Rej(Seq),
    Info(Seq),
}

impl Control {
    pub fn to_byte(self) -> u8 {
        match self {
            Control::Set => SET,
            Control::Ua => UA,
            Control::Disc => DISC,
            Control::Rr(Seq::Zero) => RR0,
            Control::Rr(Seq::One) => RR1,
            Control::Rej(Seq::Zero) => REJ0,
            Control::Rej(Seq::One) => REJ1,
            Control::Info(Seq::Zero) => I0,
            Control::Info(Seq::One) => I1,
        }
    }

    pub fn from_byte(byte: u8) -> Option<Control> {
        match byte {
            SET => Some(Control::Set),
            UA => Some(Control::Ua),
            DISC => Some(Control::Disc),
            RR0 => Some(Control::Rr(Seq::Zero)),
            RR1 => Some(Control::Rr(Seq::One)),
            REJ0 => Some(Control::Rej(Seq::Zero)),
            REJ1 => Some(Control::Rej(Seq::One)),
            I0 => Some(Control::Info(Seq::Zero)),
            I1 => Some(Control::Info(Seq::One)),
            _ => None,
        }
    }

    pub fn is_information(self) -> bool {
        matches!(self, Control::Info(_))
    }
}

impl fmt::Display for Control {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Control::Set => write!(f, "SET"),
            Control::Ua => write!(f, "UA"),
            Control::Disc => write!(f, "DISC"),
            Control::Rr(seq) => write!(f, "RR{}", seq),
            Control::Rej(seq) => write!(f, "REJ{}", seq),
            Control::Info(seq) => write!(f, "I{}", seq),
        }
    }
}

// ============================================================================
// Roles
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Transmitter,
    Receiver,
}

impl Role {
    /// Frames this role is prepared to recognize.
    pub fn policy(self) -> &'static RolePolicy {
        match self {
            Role::Transmitter => &TRANSMITTER_POLICY,
            Role::Receiver => &RECEIVER_POLICY,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Transmitter => write!(f, "transmitter"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}

/// Accepted (address, control) combinations for one side of the link.
#[derive(Debug)]
pub struct RolePolicy {
    accepted: &'static [(u8, u8)],
}

impl RolePolicy {
    pub fn accepts_address(&self, address: u8) -> bool {
        self.accepted.iter().any(|&(a, _)| a == address)
    }

    pub fn accepts(&self, address: u8, control: u8) -> bool {
        self.accepted.iter().any(|&(a, c)| a == address && c == control)
    }
}

/// Replies from the receiver plus its DISC command.
pub static TRANSMITTER_POLICY: RolePolicy = RolePolicy {
    accepted: &[
        (ADDRESS_TX, UA),
        (ADDRESS_TX, RR0),
        (ADDRESS_TX, RR1),
        (ADDRESS_TX, REJ0),
        (ADDRESS_TX, REJ1),
        (ADDRESS_RX, DISC),
    ],
};

/// Commands from the transmitter plus its final UA.
pub static RECEIVER_POLICY: RolePolicy = RolePolicy {
    accepted: &[
        (ADDRESS_TX, SET),
        (ADDRESS_TX, I0),
        (ADDRESS_TX, I1),
        (ADDRESS_TX, DISC),
        (ADDRESS_RX, UA),
    ],
};
