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

//! Session and serial line settings

use std::time::Duration;
use serialport::{DataBits, Parity, StopBits};
use crate::error::TransferError;
use crate::protocol::{DATA_OVERHEAD, MAX_CHUNK_SIZE, MAX_FILENAME_LEN};

/// Default chunk size, matching the SSDV packet length
pub const DEFAULT_CHUNK_SIZE: usize = 256;

// ============================================================================
// Transfer Settings
// ============================================================================

/// Both ends must agree on `chunk_size` before the session starts; it is not
/// carried on the wire.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    pub chunk_size: usize,
    /// How long to wait for a reply to any single frame
    pub frame_timeout: Duration,
    /// Resends allowed per frame after the first attempt
    pub max_retries: u32,
    /// Receiver gives up after this long without hearing a frame mid-session
    pub idle_timeout: Duration,
    /// Receiver wait for START; `None` waits forever
    pub start_timeout: Option<Duration>,
    /// Receiver stays up this long after END to re-ack a lost END_ACK
    pub end_linger: Duration,
}

impl Default for TransferConfig {
    fn default() -> Self {
        TransferConfig {
            chunk_size: DEFAULT_CHUNK_SIZE,
            frame_timeout: Duration::from_secs(2),
            max_retries: 3,
            idle_timeout: Duration::from_secs(30),
            start_timeout: None,
            end_linger: default_linger(Duration::from_secs(2), 3),
        }
    }
}

/// Long enough for the sender to run through every END retry
pub fn default_linger(frame_timeout: Duration, max_retries: u32) -> Duration {
    frame_timeout.saturating_mul(max_retries.saturating_add(1))
}

impl TransferConfig {
    pub fn validate(&self) -> Result<(), TransferError> {
        let invalid = |msg: String| -> Result<(), TransferError> { Err(TransferError::InvalidConfig(msg)) };

        if self.chunk_size == 0 {
            return invalid("chunk size must be non-zero".into());
        }
        if self.chunk_size > MAX_CHUNK_SIZE {
            return invalid(format!("chunk size {} exceeds frame limit of {}", self.chunk_size, MAX_CHUNK_SIZE));
        }
        if self.frame_timeout.is_zero() {
            return invalid("frame timeout must be non-zero".into());
        }
        if self.idle_timeout.is_zero() {
            return invalid("idle timeout must be non-zero".into());
        }
        Ok(())
    }

    /// Largest frame body either engine should accept
    pub fn max_body(&self) -> usize {
        // START with the longest filename must fit even for tiny chunks
        (self.chunk_size + DATA_OVERHEAD).max(2 + MAX_FILENAME_LEN + 8)
    }
}

// ============================================================================
// Serial Line Settings
// ============================================================================

#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub path: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

pub fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

pub fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

pub fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(TransferConfig::default().validate().is_ok());
        assert_eq!(TransferConfig::default().max_body(), 256 + DATA_OVERHEAD);

        let tiny = TransferConfig { chunk_size: 16, ..Default::default() };
        assert_eq!(tiny.max_body(), 2 + MAX_FILENAME_LEN + 8);
    }

    #[test]
    fn test_validate_rejects_bad_chunk_sizes() {
        let config = TransferConfig { chunk_size: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(TransferError::InvalidConfig(_))));

        let config = TransferConfig { chunk_size: MAX_CHUNK_SIZE + 1, ..Default::default() };
        assert!(matches!(config.validate(), Err(TransferError::InvalidConfig(_))));

        let config = TransferConfig { chunk_size: MAX_CHUNK_SIZE, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeouts() {
        let config = TransferConfig { frame_timeout: Duration::ZERO, ..Default::default() };
        let err = config.validate().unwrap_err();
        assert!(matches!(err, TransferError::InvalidConfig(_)));
        assert_eq!(err.exit_code(), 1);

        let config = TransferConfig { idle_timeout: Duration::ZERO, ..Default::default() };
        assert!(matches!(config.validate(), Err(TransferError::InvalidConfig(_))));
    }

    #[test]
    fn test_default_linger_outlasts_end_retries() {
        let config = TransferConfig::default();
        assert_eq!(config.end_linger, Duration::from_secs(8));
        assert!(config.end_linger > config.frame_timeout);

        assert_eq!(default_linger(Duration::from_millis(500), 0), Duration::from_millis(500));
        assert_eq!(default_linger(Duration::from_millis(500), 5), Duration::from_secs(3));
    }

    #[test]
    fn test_parse_line_parameters() {
        assert_eq!(parse_data_bits(7), Ok(DataBits::Seven));
        assert!(parse_data_bits(9).is_err());

        assert_eq!(parse_parity("EVEN"), Ok(Parity::Even));
        assert!(parse_parity("mark").is_err());

        assert_eq!(parse_stop_bits(2), Ok(StopBits::Two));
        assert!(parse_stop_bits(3).is_err());
    }
}
