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

/// Sync pattern that opens every frame
pub const SYNC: [u8; 2] = [0xA5, 0x5A];

/// Sync (2) + kind (1) + body length (2) + header check (1)
pub const HEADER_LEN: usize = 6;

/// Largest body a frame header can describe
pub const MAX_BODY_LEN: usize = u16::MAX as usize;

/// Start - announces filename and filesize
pub const KIND_START: u8 = 0x01;

/// Data - one chunk of file content with its digest
pub const KIND_DATA: u8 = 0x02;

/// Acknowledge - START, a chunk, or END accepted
pub const KIND_ACK: u8 = 0x03;

/// Negative acknowledge - chunk failed its checksum or did not parse
pub const KIND_NACK: u8 = 0x04;

/// End - no more chunks follow
pub const KIND_END: u8 = 0x05;

/// ACK tag for the START exchange
pub const ACK_TAG_START: u8 = 0x00;

/// ACK tag for a data chunk
pub const ACK_TAG_CHUNK: u8 = 0x01;

/// ACK tag for the END exchange
pub const ACK_TAG_END: u8 = 0x02;

/// Chunk id carried by a NACK when the rejected frame's id was unreadable
pub const GENERIC_NACK: u32 = u32::MAX;

/// Length of the MD5 digest trailing each DATA frame
pub const CHECKSUM_LEN: usize = 16;

/// DATA body bytes besides the payload: chunk id, data length, digest
pub const DATA_OVERHEAD: usize = 4 + 4 + CHECKSUM_LEN;

/// Longest filename START can carry, in bytes
pub const MAX_FILENAME_LEN: usize = 255;

/// Largest chunk size that still fits in one DATA frame
pub const MAX_CHUNK_SIZE: usize = MAX_BODY_LEN - DATA_OVERHEAD;
