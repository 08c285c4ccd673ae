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

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use crate::tools::ToolError;

// ============================================================================
// Phases
// ============================================================================

/// Which exchange of the session a fatal error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Start,
    Chunk(u32),
    End,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Start => write!(f, "START"),
            Phase::Chunk(id) => write!(f, "chunk {}", id),
            Phase::End => write!(f, "END"),
        }
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Fatal session errors. Timeouts, NACKs and corrupt frames are handled inside
/// the state machines and never show up here.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("serial port unavailable: {0}")]
    PortUnavailable(#[from] serialport::Error),

    #[error("transport error in state {state}: {source}")]
    Transport {
        state: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("file error on {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{phase} undeliverable after {attempts} attempts")]
    RetriesExhausted { phase: Phase, attempts: u32 },

    #[error("peer silent for {idle:?} in state {state}")]
    PeerSilent { state: &'static str, idle: Duration },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("cancelled in state {state}")]
    Cancelled { state: &'static str },

    #[error(transparent)]
    Tool(#[from] ToolError),
}

impl TransferError {
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        TransferError::File { path: path.into(), source }
    }

    /// Process exit status for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            TransferError::InvalidConfig(_) => 1,
            TransferError::RetriesExhausted { .. } => 3,
            TransferError::PortUnavailable(_) | TransferError::Transport { .. } => 4,
            TransferError::File { .. } => 5,
            TransferError::ProtocolViolation(_) => 6,
            TransferError::PeerSilent { .. } => 7,
            TransferError::Tool(_) => 8,
            TransferError::Cancelled { .. } => 130,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            TransferError::RetriesExhausted { phase: Phase::Chunk(2), attempts: 4 },
            TransferError::Transport {
                state: "WaitChunkAck",
                source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone"),
            },
            TransferError::file("out.bin", std::io::Error::new(std::io::ErrorKind::NotFound, "missing")),
            TransferError::InvalidConfig("chunk size must be non-zero".into()),
            TransferError::ProtocolViolation("oversized chunk".into()),
            TransferError::PeerSilent { state: "WaitChunk", idle: Duration::from_secs(30) },
            TransferError::Tool(ToolError::Failed { tool: "ssdv".into(), status: Some(1) }),
            TransferError::Cancelled { state: "SendChunk" },
        ];

        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        assert!(codes.iter().all(|&c| c != 0));
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_phase_in_message() {
        let err = TransferError::RetriesExhausted { phase: Phase::Chunk(7), attempts: 4 };
        assert_eq!(err.to_string(), "chunk 7 undeliverable after 4 attempts");

        let err = TransferError::RetriesExhausted { phase: Phase::Start, attempts: 4 };
        assert_eq!(err.to_string(), "START undeliverable after 4 attempts");
    }
}
