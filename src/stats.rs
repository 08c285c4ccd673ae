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

//! Session statistics

use std::fmt;
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Sender => write!(f, "send"),
            Role::Receiver => write!(f, "receive"),
        }
    }
}

// ============================================================================
// Running Counters
// ============================================================================

/// Counters one engine updates as it runs
#[derive(Debug, Clone)]
pub struct SessionStats {
    role: Role,
    started: Instant,
    filesize: u64,
    payload_bytes: u64,
    chunks: u64,
    frames_sent: u64,
    frames_received: u64,
    wire_bytes_sent: u64,
    retransmissions: u64,
    control_retries: u64,
    timeouts: u64,
    nacks: u64,
    duplicates: u64,
    corrupt_frames: u64,
    ignored_frames: u64,
    rtt_count: u64,
    rtt_total: Duration,
    rtt_min: Option<Duration>,
    rtt_max: Duration,
}

impl SessionStats {
    pub fn new(role: Role) -> Self {
        SessionStats {
            role,
            started: Instant::now(),
            filesize: 0,
            payload_bytes: 0,
            chunks: 0,
            frames_sent: 0,
            frames_received: 0,
            wire_bytes_sent: 0,
            retransmissions: 0,
            control_retries: 0,
            timeouts: 0,
            nacks: 0,
            duplicates: 0,
            corrupt_frames: 0,
            ignored_frames: 0,
            rtt_count: 0,
            rtt_total: Duration::ZERO,
            rtt_min: None,
            rtt_max: Duration::ZERO,
        }
    }

    pub fn set_filesize(&mut self, filesize: u64) {
        self.filesize = filesize;
    }

    pub fn record_frame_sent(&mut self, wire_len: usize) {
        self.frames_sent += 1;
        self.wire_bytes_sent += wire_len as u64;
    }

    pub fn record_frame_received(&mut self) {
        self.frames_received += 1;
    }

    /// A chunk acknowledged (sender) or committed (receiver)
    pub fn record_chunk(&mut self, len: usize) {
        self.chunks += 1;
        self.payload_bytes += len as u64;
    }

    /// DATA sent again for a chunk already sent once
    pub fn record_retransmission(&mut self) {
        self.retransmissions += 1;
    }

    /// START or END sent again
    pub fn record_control_retry(&mut self) {
        self.control_retries += 1;
    }

    pub fn record_timeout(&mut self) {
        self.timeouts += 1;
    }

    pub fn record_nack(&mut self) {
        self.nacks += 1;
    }

    pub fn record_duplicate(&mut self) {
        self.duplicates += 1;
    }

    pub fn record_corrupt(&mut self) {
        self.corrupt_frames += 1;
    }

    /// Frame that made no sense in the current state
    pub fn record_ignored(&mut self) {
        self.ignored_frames += 1;
    }

    pub fn record_rtt(&mut self, rtt: Duration) {
        self.rtt_count += 1;
        self.rtt_total += rtt;
        self.rtt_max = self.rtt_max.max(rtt);
        self.rtt_min = Some(self.rtt_min.map_or(rtt, |min| min.min(rtt)));
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Payload bytes per second since the session started
    pub fn throughput(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 { self.payload_bytes as f64 / secs } else { 0.0 }
    }

    pub fn progress(&self) -> f64 {
        if self.filesize == 0 {
            return 100.0;
        }
        self.payload_bytes as f64 * 100.0 / self.filesize as f64
    }

    pub fn report(&self, success: bool) -> SessionReport {
        SessionReport {
            role: self.role,
            success,
            filesize: self.filesize,
            payload_bytes: self.payload_bytes,
            chunks: self.chunks,
            frames_sent: self.frames_sent,
            frames_received: self.frames_received,
            wire_bytes_sent: self.wire_bytes_sent,
            retransmissions: self.retransmissions,
            control_retries: self.control_retries,
            timeouts: self.timeouts,
            nacks: self.nacks,
            duplicates: self.duplicates,
            corrupt_frames: self.corrupt_frames,
            ignored_frames: self.ignored_frames,
            elapsed: self.elapsed(),
            throughput: self.throughput(),
            rtt_min: self.rtt_min.unwrap_or(Duration::ZERO),
            rtt_avg: if self.rtt_count > 0 {
                self.rtt_total / self.rtt_count as u32
            } else {
                Duration::ZERO
            },
            rtt_max: self.rtt_max,
        }
    }
}

// ============================================================================
// Final Report
// ============================================================================

/// Snapshot taken when a session reaches a terminal state
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub role: Role,
    pub success: bool,
    pub filesize: u64,
    pub payload_bytes: u64,
    pub chunks: u64,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub wire_bytes_sent: u64,
    pub retransmissions: u64,
    pub control_retries: u64,
    pub timeouts: u64,
    pub nacks: u64,
    pub duplicates: u64,
    pub corrupt_frames: u64,
    pub ignored_frames: u64,
    pub elapsed: Duration,
    pub throughput: f64,
    pub rtt_min: Duration,
    pub rtt_avg: Duration,
    pub rtt_max: Duration,
}

impl SessionReport {
    pub fn log(&self) {
        if self.success {
            info!(role = %self.role, "{}", self);
        } else {
            error!(role = %self.role, "{}", self);
        }
    }
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}/{} bytes in {} chunks, {:.2}s, {:.0} B/s, {} retransmissions, {} control retries, \
             {} timeouts, {} NACKs, {} duplicates, {} corrupt, {} ignored",
            self.role,
            if self.success { "complete" } else { "aborted" },
            self.payload_bytes,
            self.filesize,
            self.chunks,
            self.elapsed.as_secs_f64(),
            self.throughput,
            self.retransmissions,
            self.control_retries,
            self.timeouts,
            self.nacks,
            self.duplicates,
            self.corrupt_frames,
            self.ignored_frames,
        )?;
        if self.role == Role::Sender && self.chunks > 0 {
            write!(
                f,
                ", rtt min/avg/max {:?}/{:?}/{:?}",
                self.rtt_min, self.rtt_avg, self.rtt_max
            )?;
        }
        Ok(())
    }
}
