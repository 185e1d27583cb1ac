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

//! Stop-and-wait data link over a serial line, with a small file transfer
//! application on top.
//!
//! [`link::Connection`] is the entry point: `open`, `write`, `read`, `close`.

pub mod protocol;
pub mod codec;
pub mod recognizer;
pub mod timer;
pub mod serial;
pub mod link;
pub mod packet;
pub mod sender;
pub mod receiver;
pub mod logging;
