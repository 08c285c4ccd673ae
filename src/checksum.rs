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

//! Per-chunk integrity digest

use md5::{Digest, Md5};
use crate::protocol::CHECKSUM_LEN;

pub type Checksum = [u8; CHECKSUM_LEN];

/// MD5 over exactly the given payload bytes
pub fn digest(payload: &[u8]) -> Checksum {
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&Md5::digest(payload));
    out
}

pub fn verify(payload: &[u8], claimed: &Checksum) -> bool {
    digest(payload) == *claimed
}
