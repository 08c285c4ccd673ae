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

//! Frame codec and stream reader
//!
//! Every frame starts with the two sync bytes, a kind tag, a little-endian
//! body length and a one-byte XOR over kind and length. The reader scans for
//! the sync pattern, so garbage on the line costs at most the frames it
//! overlaps.

use std::io;
use std::time::{Duration, Instant};
use thiserror::Error;
use crate::checksum::{self, Checksum};
use crate::protocol::*;
use crate::serial::SerialPort;

// ============================================================================
// Frame Types
// ============================================================================

/// What an ACK refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckRef {
    Start,
    Chunk(u32),
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Start { filename: String, filesize: u64 },
    Data { chunk_id: u32, payload: Vec<u8>, checksum: Checksum },
    Ack(AckRef),
    /// `None` when the rejected frame's chunk id could not be read
    Nack(Option<u32>),
    End,
}

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("missing sync pattern")]
    BadSync,

    #[error("header check mismatch")]
    BadHeader,

    #[error("unknown frame kind 0x{0:02X}")]
    UnknownKind(u8),

    #[error("body of {len} bytes exceeds limit of {max}")]
    Oversized { len: usize, max: usize },

    #[error("malformed {kind} frame: {reason}")]
    Malformed {
        kind: &'static str,
        chunk_id: Option<u32>,
        reason: &'static str,
    },
}

impl ParseError {
    /// Chunk id of the rejected frame, if enough of it survived to read one
    pub fn chunk_id(&self) -> Option<u32> {
        match self {
            ParseError::Malformed { chunk_id, .. } => *chunk_id,
            _ => None,
        }
    }
}

// ============================================================================
// Encoding
// ============================================================================

impl Frame {
    /// DATA frame for `payload`, digest included
    pub fn data(chunk_id: u32, payload: Vec<u8>) -> Frame {
        let checksum = checksum::digest(&payload);
        Frame::Data { chunk_id, payload, checksum }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::Start { .. } => "START",
            Frame::Data { .. } => "DATA",
            Frame::Ack(_) => "ACK",
            Frame::Nack(_) => "NACK",
            Frame::End => "END",
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let (kind, body) = match self {
            Frame::Start { filename, filesize } => {
                let name = filename.as_bytes();
                let mut body = Vec::with_capacity(2 + name.len() + 8);
                body.extend_from_slice(&(name.len() as u16).to_le_bytes());
                body.extend_from_slice(name);
                body.extend_from_slice(&filesize.to_le_bytes());
                (KIND_START, body)
            }
            Frame::Data { chunk_id, payload, checksum } => {
                let mut body = Vec::with_capacity(DATA_OVERHEAD + payload.len());
                body.extend_from_slice(&chunk_id.to_le_bytes());
                body.extend_from_slice(&(payload.len() as u32).to_le_bytes());
                body.extend_from_slice(payload);
                body.extend_from_slice(checksum);
                (KIND_DATA, body)
            }
            Frame::Ack(ack) => {
                let (tag, id) = match ack {
                    AckRef::Start => (ACK_TAG_START, 0),
                    AckRef::Chunk(id) => (ACK_TAG_CHUNK, *id),
                    AckRef::End => (ACK_TAG_END, 0),
                };
                let mut body = vec![tag];
                body.extend_from_slice(&id.to_le_bytes());
                (KIND_ACK, body)
            }
            Frame::Nack(id) => (KIND_NACK, id.unwrap_or(GENERIC_NACK).to_le_bytes().to_vec()),
            Frame::End => (KIND_END, Vec::new()),
        };

        debug_assert!(body.len() <= MAX_BODY_LEN);
        let len = (body.len() as u16).to_le_bytes();

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(&SYNC);
        out.push(kind);
        out.extend_from_slice(&len);
        out.push(kind ^ len[0] ^ len[1]);
        out.extend_from_slice(&body);
        out
    }

    /// Decode exactly one complete frame
    pub fn decode(bytes: &[u8]) -> Result<Frame, ParseError> {
        if bytes.len() < HEADER_LEN {
            return Err(ParseError::Truncated { needed: HEADER_LEN, available: bytes.len() });
        }
        let (kind, body_len) = parse_header(&bytes[..HEADER_LEN], MAX_BODY_LEN)?;
        let needed = HEADER_LEN + body_len;
        if bytes.len() < needed {
            return Err(ParseError::Truncated { needed, available: bytes.len() });
        }
        if bytes.len() > needed {
            return Err(ParseError::Malformed {
                kind: kind_name(kind),
                chunk_id: None,
                reason: "trailing bytes after body",
            });
        }
        decode_body(kind, &bytes[HEADER_LEN..])
    }
}

// ============================================================================
// Decoding Helpers
// ============================================================================

fn kind_name(kind: u8) -> &'static str {
    match kind {
        KIND_START => "START",
        KIND_DATA => "DATA",
        KIND_ACK => "ACK",
        KIND_NACK => "NACK",
        KIND_END => "END",
        _ => "UNKNOWN",
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn parse_header(header: &[u8], max_body: usize) -> Result<(u8, usize), ParseError> {
    if header[0..2] != SYNC[..] {
        return Err(ParseError::BadSync);
    }
    let kind = header[2];
    if kind ^ header[3] ^ header[4] != header[5] {
        return Err(ParseError::BadHeader);
    }
    if !(KIND_START..=KIND_END).contains(&kind) {
        return Err(ParseError::UnknownKind(kind));
    }
    let len = u16::from_le_bytes([header[3], header[4]]) as usize;
    if len > max_body {
        return Err(ParseError::Oversized { len, max: max_body });
    }
    Ok((kind, len))
}

fn decode_body(kind: u8, body: &[u8]) -> Result<Frame, ParseError> {
    let malformed = |chunk_id: Option<u32>, reason: &'static str| ParseError::Malformed {
        kind: kind_name(kind),
        chunk_id,
        reason,
    };

    match kind {
        KIND_START => {
            if body.len() < 2 {
                return Err(malformed(None, "missing filename length"));
            }
            let name_len = u16::from_le_bytes([body[0], body[1]]) as usize;
            if body.len() != 2 + name_len + 8 {
                return Err(malformed(None, "length does not match filename"));
            }
            let filename = std::str::from_utf8(&body[2..2 + name_len])
                .map_err(|_| malformed(None, "filename is not UTF-8"))?
                .to_string();
            let mut size = [0u8; 8];
            size.copy_from_slice(&body[2 + name_len..]);
            Ok(Frame::Start { filename, filesize: u64::from_le_bytes(size) })
        }
        KIND_DATA => {
            if body.len() < 4 {
                return Err(malformed(None, "missing chunk id"));
            }
            let chunk_id = read_u32(&body[0..4]);
            if body.len() < DATA_OVERHEAD {
                return Err(malformed(Some(chunk_id), "body shorter than fixed fields"));
            }
            let data_length = read_u32(&body[4..8]) as usize;
            if body.len() != DATA_OVERHEAD + data_length {
                return Err(malformed(Some(chunk_id), "data length does not match body"));
            }
            let payload = body[8..8 + data_length].to_vec();
            let mut checksum = [0u8; CHECKSUM_LEN];
            checksum.copy_from_slice(&body[8 + data_length..]);
            Ok(Frame::Data { chunk_id, payload, checksum })
        }
        KIND_ACK => {
            if body.len() != 5 {
                return Err(malformed(None, "wrong body length"));
            }
            let id = read_u32(&body[1..5]);
            match body[0] {
                ACK_TAG_START => Ok(Frame::Ack(AckRef::Start)),
                ACK_TAG_CHUNK => Ok(Frame::Ack(AckRef::Chunk(id))),
                ACK_TAG_END => Ok(Frame::Ack(AckRef::End)),
                _ => Err(malformed(None, "unknown ACK tag")),
            }
        }
        KIND_NACK => {
            if body.len() != 4 {
                return Err(malformed(None, "wrong body length"));
            }
            let id = read_u32(body);
            Ok(Frame::Nack(if id == GENERIC_NACK { None } else { Some(id) }))
        }
        KIND_END => {
            if !body.is_empty() {
                return Err(malformed(None, "unexpected body"));
            }
            Ok(Frame::End)
        }
        other => Err(ParseError::UnknownKind(other)),
    }
}

// ============================================================================
// Stream Reader
// ============================================================================

/// Outcome of one read window
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Frame(Frame),
    Malformed(ParseError),
    Timeout,
}

/// Pulls frames off a byte stream, resynchronizing on the sync pattern
pub struct FrameReader {
    buffer: Vec<u8>,
    max_body: usize,
    discarded: u64,
}

impl FrameReader {
    pub fn new(max_body: usize) -> Self {
        FrameReader {
            buffer: Vec::new(),
            max_body: max_body.min(MAX_BODY_LEN),
            discarded: 0,
        }
    }

    /// Bytes skipped while hunting for a frame boundary
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Wait up to `timeout` for the next frame. A frame still incomplete when
    /// the window closes is dropped.
    pub fn read_frame(&mut self, serial: &mut dyn SerialPort, timeout: Duration) -> io::Result<Received> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; 512];

        loop {
            if let Some(received) = self.extract() {
                return Ok(received);
            }

            let now = Instant::now();
            if now >= deadline {
                self.drop_partial();
                return Ok(Received::Timeout);
            }

            match serial.read_timeout(&mut chunk, deadline - now) {
                Ok(n) => self.buffer.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    self.drop_partial();
                    return Ok(Received::Timeout);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn drop_partial(&mut self) {
        self.discarded += self.buffer.len() as u64;
        self.buffer.clear();
    }

    fn skip(&mut self, n: usize) {
        self.discarded += n as u64;
        self.buffer.drain(..n);
    }

    fn extract(&mut self) -> Option<Received> {
        loop {
            let start = self.buffer.windows(2).position(|w| w == &SYNC[..]);
            match start {
                Some(0) => {}
                Some(pos) => self.skip(pos),
                None => {
                    // Keep a trailing first sync byte; its partner may be in flight
                    let keep = usize::from(self.buffer.last() == Some(&SYNC[0]));
                    let n = self.buffer.len() - keep;
                    self.skip(n);
                    return None;
                }
            }

            if self.buffer.len() < HEADER_LEN {
                return None;
            }

            match parse_header(&self.buffer[..HEADER_LEN], self.max_body) {
                // Noise that happened to contain the sync pattern
                Err(ParseError::BadHeader) => {
                    self.skip(1);
                    continue;
                }
                Err(e) => {
                    self.skip(1);
                    return Some(Received::Malformed(e));
                }
                Ok((kind, body_len)) => {
                    let total = HEADER_LEN + body_len;
                    if self.buffer.len() < total {
                        return None;
                    }
                    let bytes: Vec<u8> = self.buffer.drain(..total).collect();
                    return Some(match decode_body(kind, &bytes[HEADER_LEN..]) {
                        Ok(frame) => Received::Frame(frame),
                        Err(e) => Received::Malformed(e),
                    });
                }
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
