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

use std::marker::PhantomData;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::io::Read;
use std::time::Instant;
use tracing::{debug, info, warn};
use crate::cancel::CancelToken;
use crate::config::TransferConfig;
use crate::error::{Phase, TransferError};
use crate::frame::{AckRef, Frame, FrameReader, Received};
use crate::protocol::MAX_FILENAME_LEN;
use crate::serial::SerialPort;
use crate::stats::{Role, SessionReport, SessionStats};

// ============================================================================
// States
// ============================================================================

pub struct SendStart;
pub struct WaitStartAck;
pub struct SendChunk;
pub struct WaitChunkAck;
pub struct SendEnd;
pub struct WaitEndAck;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct SenderFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    reader: FrameReader,
    config: TransferConfig,
    cancel: CancelToken,
    source: PathBuf,
    file: File,
    filename: String,
    filesize: u64,
    total_chunks: u64,
    chunk_id: u32,
    // Bytes acknowledged so far
    offset: u64,
    // Encoded DATA frame for `chunk_id`, resent unchanged on retry
    outgoing: Vec<u8>,
    chunk_len: usize,
    retransmit: bool,
    // Sends of the current frame, first one included
    attempts: u32,
    sent_at: Instant,
    deadline: Instant,
    stats: SessionStats,
}

// ============================================================================
// Trait
// ============================================================================

pub enum SenderStep {
    Next(Box<dyn SenderState>),
    Done(SessionReport),
}

pub trait SenderState: Send {
    fn step(self: Box<Self>) -> Result<SenderStep, TransferError>;
}

// ============================================================================
// Helpers shared by every state
// ============================================================================

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            serial: self.serial,
            reader: self.reader,
            config: self.config,
            cancel: self.cancel,
            source: self.source,
            file: self.file,
            filename: self.filename,
            filesize: self.filesize,
            total_chunks: self.total_chunks,
            chunk_id: self.chunk_id,
            offset: self.offset,
            outgoing: self.outgoing,
            chunk_len: self.chunk_len,
            retransmit: self.retransmit,
            attempts: self.attempts,
            sent_at: self.sent_at,
            deadline: self.deadline,
            stats: self.stats,
        })
    }

    fn state_name(&self) -> &'static str {
        let type_name = std::any::type_name::<S>();
        type_name.split("::").last().unwrap_or(type_name)
    }

    /// Log partial statistics and hand back the error that ends the session
    fn abort(&self, err: TransferError) -> TransferError {
        warn!(file = %self.source.display(), error = %err, "send aborted");
        self.stats.report(false).log();
        err
    }

    fn check_cancel(&self) -> Result<(), TransferError> {
        if self.cancel.is_cancelled() {
            return Err(self.abort(TransferError::Cancelled { state: self.state_name() }));
        }
        Ok(())
    }

    fn write_frame(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        if let Err(source) = self.serial.write_all(bytes) {
            let state = self.state_name();
            return Err(self.abort(TransferError::Transport { state, source }));
        }
        self.stats.record_frame_sent(bytes.len());
        let now = Instant::now();
        self.sent_at = now;
        self.deadline = now + self.config.frame_timeout;
        Ok(())
    }

    /// Next frame before the current reply deadline
    fn receive(&mut self) -> Result<Received, TransferError> {
        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(Received::Timeout);
        }
        match self.reader.read_frame(self.serial.as_mut(), remaining) {
            Ok(received) => {
                if let Received::Frame(_) = received {
                    self.stats.record_frame_received();
                }
                Ok(received)
            }
            Err(source) => {
                let state = self.state_name();
                Err(self.abort(TransferError::Transport { state, source }))
            }
        }
    }

    /// Record a frame the current state has no use for
    fn ignore(&mut self, received: &Received) {
        match received {
            Received::Malformed(e) => {
                self.stats.record_corrupt();
                debug!(state = self.state_name(), error = %e, "discarding malformed frame");
            }
            Received::Frame(frame) => {
                self.stats.record_ignored();
                debug!(state = self.state_name(), kind = frame.kind_name(), "ignoring unexpected frame");
            }
            Received::Timeout => {}
        }
    }

    fn retries_exhausted(&self, phase: Phase) -> Option<TransferError> {
        if self.attempts > self.config.max_retries {
            Some(self.abort(TransferError::RetriesExhausted { phase, attempts: self.attempts }))
        } else {
            None
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<SendStart> {
    fn step(self: Box<Self>) -> Result<SenderStep, TransferError> {
        let mut fsm = *self;
        fsm.check_cancel()?;

        fsm.attempts += 1;
        if fsm.attempts > 1 {
            fsm.stats.record_control_retry();
        }

        let start = Frame::Start { filename: fsm.filename.clone(), filesize: fsm.filesize }.encode();
        fsm.write_frame(&start)?;
        debug!(filename = %fsm.filename, filesize = fsm.filesize, attempt = fsm.attempts, "sent START");

        Ok(SenderStep::Next(fsm.transition::<WaitStartAck>()))
    }
}

impl SenderState for SenderFsm<WaitStartAck> {
    fn step(self: Box<Self>) -> Result<SenderStep, TransferError> {
        let mut fsm = *self;
        fsm.check_cancel()?;

        let received = fsm.receive()?;
        let timed_out = received == Received::Timeout;
        match received {
            Received::Frame(Frame::Ack(AckRef::Start)) => {
                fsm.stats.record_rtt(fsm.sent_at.elapsed());
                info!(
                    filename = %fsm.filename,
                    filesize = fsm.filesize,
                    chunks = fsm.total_chunks,
                    "receiver ready"
                );
                fsm.attempts = 0;
                if fsm.filesize == 0 {
                    Ok(SenderStep::Next(fsm.transition::<SendEnd>()))
                } else {
                    Ok(SenderStep::Next(fsm.transition::<SendChunk>()))
                }
            }
            Received::Frame(Frame::Nack(_)) | Received::Timeout => {
                if timed_out {
                    fsm.stats.record_timeout();
                    warn!(attempt = fsm.attempts, "no reply to START");
                } else {
                    fsm.stats.record_nack();
                    warn!(attempt = fsm.attempts, "START rejected");
                }
                if let Some(err) = fsm.retries_exhausted(Phase::Start) {
                    return Err(err);
                }
                Ok(SenderStep::Next(fsm.transition::<SendStart>()))
            }
            other => {
                fsm.ignore(&other);
                Ok(SenderStep::Next(Box::new(fsm)))
            }
        }
    }
}

impl SenderState for SenderFsm<SendChunk> {
    fn step(self: Box<Self>) -> Result<SenderStep, TransferError> {
        let mut fsm = *self;
        fsm.check_cancel()?;

        if fsm.retransmit {
            fsm.stats.record_retransmission();
            debug!(chunk_id = fsm.chunk_id, attempt = fsm.attempts + 1, "retransmitting chunk");
        } else {
            let remaining = fsm.filesize - fsm.offset;
            let len = remaining.min(fsm.config.chunk_size as u64) as usize;
            let mut payload = vec![0u8; len];
            if let Err(source) = fsm.file.read_exact(&mut payload) {
                let err = TransferError::file(fsm.source.clone(), source);
                return Err(fsm.abort(err));
            }
            fsm.outgoing = Frame::data(fsm.chunk_id, payload).encode();
            fsm.chunk_len = len;
        }

        fsm.retransmit = false;
        fsm.attempts += 1;

        let outgoing = std::mem::take(&mut fsm.outgoing);
        let written = fsm.write_frame(&outgoing);
        fsm.outgoing = outgoing;
        written?;

        Ok(SenderStep::Next(fsm.transition::<WaitChunkAck>()))
    }
}

impl SenderState for SenderFsm<WaitChunkAck> {
    fn step(self: Box<Self>) -> Result<SenderStep, TransferError> {
        let mut fsm = *self;
        fsm.check_cancel()?;

        let received = fsm.receive()?;
        match received {
            Received::Frame(Frame::Ack(AckRef::Chunk(id))) if id == fsm.chunk_id => {
                fsm.stats.record_rtt(fsm.sent_at.elapsed());
                fsm.stats.record_chunk(fsm.chunk_len);
                fsm.offset += fsm.chunk_len as u64;
                fsm.attempts = 0;

                if id % 10 == 0 {
                    info!(
                        chunk_id = id,
                        sent = fsm.offset,
                        filesize = fsm.filesize,
                        percent = fsm.stats.progress(),
                        bytes_per_sec = fsm.stats.throughput(),
                        "progress"
                    );
                } else {
                    debug!(chunk_id = id, "chunk acknowledged");
                }

                fsm.chunk_id += 1;
                if fsm.offset >= fsm.filesize {
                    Ok(SenderStep::Next(fsm.transition::<SendEnd>()))
                } else {
                    Ok(SenderStep::Next(fsm.transition::<SendChunk>()))
                }
            }
            Received::Frame(Frame::Nack(id)) if id.is_none() || id == Some(fsm.chunk_id) => {
                fsm.stats.record_nack();
                warn!(chunk_id = fsm.chunk_id, attempt = fsm.attempts, "chunk rejected");
                fsm.retry_chunk()
            }
            Received::Timeout => {
                fsm.stats.record_timeout();
                warn!(chunk_id = fsm.chunk_id, attempt = fsm.attempts, "no reply to chunk");
                fsm.retry_chunk()
            }
            other => {
                fsm.ignore(&other);
                Ok(SenderStep::Next(Box::new(fsm)))
            }
        }
    }
}

impl SenderFsm<WaitChunkAck> {
    fn retry_chunk(mut self) -> Result<SenderStep, TransferError> {
        if let Some(err) = self.retries_exhausted(Phase::Chunk(self.chunk_id)) {
            return Err(err);
        }
        self.retransmit = true;
        Ok(SenderStep::Next(self.transition::<SendChunk>()))
    }
}

impl SenderState for SenderFsm<SendEnd> {
    fn step(self: Box<Self>) -> Result<SenderStep, TransferError> {
        let mut fsm = *self;
        fsm.check_cancel()?;

        fsm.attempts += 1;
        if fsm.attempts > 1 {
            fsm.stats.record_control_retry();
        }

        fsm.write_frame(&Frame::End.encode())?;
        debug!(attempt = fsm.attempts, "sent END");

        Ok(SenderStep::Next(fsm.transition::<WaitEndAck>()))
    }
}

impl SenderState for SenderFsm<WaitEndAck> {
    fn step(self: Box<Self>) -> Result<SenderStep, TransferError> {
        let mut fsm = *self;
        fsm.check_cancel()?;

        let received = fsm.receive()?;
        let timed_out = received == Received::Timeout;
        match received {
            Received::Frame(Frame::Ack(AckRef::End)) => {
                fsm.stats.record_rtt(fsm.sent_at.elapsed());
                debug!(noise_bytes = fsm.reader.discarded(), "line noise skipped");
                let report = fsm.stats.report(true);
                report.log();
                Ok(SenderStep::Done(report))
            }
            Received::Frame(Frame::Nack(_)) | Received::Timeout => {
                if timed_out {
                    fsm.stats.record_timeout();
                    warn!(attempt = fsm.attempts, "no reply to END");
                } else {
                    fsm.stats.record_nack();
                    warn!(attempt = fsm.attempts, "END rejected");
                }
                if let Some(err) = fsm.retries_exhausted(Phase::End) {
                    return Err(err);
                }
                Ok(SenderStep::Next(fsm.transition::<SendEnd>()))
            }
            other => {
                fsm.ignore(&other);
                Ok(SenderStep::Next(Box::new(fsm)))
            }
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl SenderFsm<SendStart> {
    /// Opens the source file; nothing is written to the port yet
    pub fn new(
        serial: Box<dyn SerialPort>,
        source: &Path,
        config: TransferConfig,
        cancel: CancelToken,
    ) -> Result<Box<dyn SenderState>, TransferError> {
        config.validate()?;

        let file = File::open(source).map_err(|e| TransferError::file(source, e))?;
        let filesize = file.metadata().map_err(|e| TransferError::file(source, e))?.len();
        let total_chunks = filesize.div_ceil(config.chunk_size as u64);

        let mut stats = SessionStats::new(Role::Sender);
        stats.set_filesize(filesize);

        let now = Instant::now();
        Ok(Box::new(SenderFsm {
            state: PhantomData::<SendStart>,
            serial,
            reader: FrameReader::new(config.max_body()),
            filename: prepare_filename(source),
            config,
            cancel,
            source: source.to_path_buf(),
            file,
            filesize,
            total_chunks,
            chunk_id: 0,
            offset: 0,
            outgoing: Vec::new(),
            chunk_len: 0,
            retransmit: false,
            attempts: 0,
            sent_at: now,
            deadline: now,
            stats,
        }))
    }
}

pub fn run_sender(mut state: Box<dyn SenderState>) -> Result<SessionReport, TransferError> {
    loop {
        match state.step()? {
            SenderStep::Next(next) => state = next,
            SenderStep::Done(report) => return Ok(report),
        }
    }
}

/// Send one file over `serial` and wait for the receiver to confirm it
pub fn send_file(
    serial: Box<dyn SerialPort>,
    source: &Path,
    config: TransferConfig,
    cancel: CancelToken,
) -> Result<SessionReport, TransferError> {
    let fsm = SenderFsm::new(serial, source, config, cancel)?;
    run_sender(fsm)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Name announced in START: the final path component, cut to fit the frame
fn prepare_filename(path: &Path) -> String {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if name.len() <= MAX_FILENAME_LEN {
        return name;
    }

    let mut end = MAX_FILENAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::serial::MockSerialPort;

    fn test_config() -> TransferConfig {
        TransferConfig {
            chunk_size: 256,
            frame_timeout: Duration::from_secs(1),
            max_retries: 3,
            ..Default::default()
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn replies(frames: &[Option<Frame>]) -> Vec<Option<u8>> {
        let mut out = Vec::new();
        for frame in frames {
            match frame {
                Some(f) => out.extend(f.encode().into_iter().map(Some)),
                None => out.push(None),
            }
        }
        out
    }

    fn writes(frames: &[Frame]) -> Vec<u8> {
        frames.iter().flat_map(|f| f.encode()).collect()
    }

    fn data_frames(content: &[u8], chunk_size: usize) -> Vec<Frame> {
        content
            .chunks(chunk_size)
            .enumerate()
            .map(|(i, c)| Frame::data(i as u32, c.to_vec()))
            .collect()
    }

    fn start_frame(name: &str, size: usize) -> Frame {
        Frame::Start { filename: name.into(), filesize: size as u64 }
    }

    #[test]
    fn test_prepare_filename() {
        assert_eq!(prepare_filename(Path::new("image.ssdv")), "image.ssdv");
        assert_eq!(prepare_filename(Path::new("/tmp/out/image.ssdv")), "image.ssdv");
        assert_eq!(prepare_filename(Path::new("noext")), "noext");

        let long = "x".repeat(300);
        assert_eq!(prepare_filename(Path::new(&long)).len(), MAX_FILENAME_LEN);

        // Never split a multi-byte character
        let wide = "é".repeat(200);
        let cut = prepare_filename(Path::new(&wide));
        assert!(cut.len() <= MAX_FILENAME_LEN);
        assert_eq!(cut.chars().count(), MAX_FILENAME_LEN / 2);
    }

    #[test]
    fn test_sender_full_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.ssdv");
        let content = pattern(1000);
        std::fs::write(&path, &content).unwrap();

        let responses = replies(&[
            Some(Frame::Ack(AckRef::Start)),
            Some(Frame::Ack(AckRef::Chunk(0))),
            Some(Frame::Ack(AckRef::Chunk(1))),
            Some(Frame::Ack(AckRef::Chunk(2))),
            Some(Frame::Ack(AckRef::Chunk(3))),
            Some(Frame::Ack(AckRef::End)),
        ]);

        let mut expected = vec![start_frame("image.ssdv", 1000)];
        let chunks = data_frames(&content, 256);
        assert_eq!(chunks.len(), 4);
        expected.extend(chunks);
        expected.push(Frame::End);

        let mock = Box::new(MockSerialPort::new(responses, writes(&expected)));
        let report = send_file(mock, &path, test_config(), CancelToken::new()).expect("transfer failed");

        assert!(report.success);
        assert_eq!(report.payload_bytes, 1000);
        assert_eq!(report.filesize, 1000);
        assert_eq!(report.chunks, 4);
        assert_eq!(report.retransmissions, 0);
        assert_eq!(report.frames_sent, 6);
    }

    #[test]
    fn test_sender_nack_resends_identical_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nack.bin");
        let content = pattern(300);
        std::fs::write(&path, &content).unwrap();

        let responses = replies(&[
            Some(Frame::Ack(AckRef::Start)),
            Some(Frame::Ack(AckRef::Chunk(0))),
            Some(Frame::Nack(Some(1))),
            Some(Frame::Ack(AckRef::Chunk(1))),
            Some(Frame::Ack(AckRef::End)),
        ]);

        let chunks = data_frames(&content, 256);
        let expected = vec![
            start_frame("nack.bin", 300),
            chunks[0].clone(),
            chunks[1].clone(),
            chunks[1].clone(),
            Frame::End,
        ];

        let mock = Box::new(MockSerialPort::new(responses, writes(&expected)));
        let report = send_file(mock, &path, test_config(), CancelToken::new()).expect("transfer failed");

        assert_eq!(report.retransmissions, 1);
        assert_eq!(report.nacks, 1);
        assert_eq!(report.payload_bytes, 300);
    }

    #[test]
    fn test_sender_generic_nack_applies_to_current_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("generic.bin");
        std::fs::write(&path, b"abc").unwrap();

        let responses = replies(&[
            Some(Frame::Ack(AckRef::Start)),
            Some(Frame::Nack(None)),
            Some(Frame::Ack(AckRef::Chunk(0))),
            Some(Frame::Ack(AckRef::End)),
        ]);

        let data = Frame::data(0, b"abc".to_vec());
        let expected = vec![start_frame("generic.bin", 3), data.clone(), data, Frame::End];

        let mock = Box::new(MockSerialPort::new(responses, writes(&expected)));
        let report = send_file(mock, &path, test_config(), CancelToken::new()).expect("transfer failed");
        assert_eq!(report.retransmissions, 1);
    }

    #[test]
    fn test_sender_start_retries_then_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lonely.bin");
        std::fs::write(&path, b"nobody listening").unwrap();

        let config = TransferConfig { max_retries: 2, ..test_config() };
        let responses = vec![None, None, None];
        let start = start_frame("lonely.bin", 16);
        let expected = writes(&[start.clone(), start.clone(), start]);

        let mock = Box::new(MockSerialPort::new(responses, expected));
        match send_file(mock, &path, config, CancelToken::new()) {
            Err(TransferError::RetriesExhausted { phase: Phase::Start, attempts: 3 }) => {}
            other => panic!("expected START retry exhaustion, got {:?}", other.map(|r| r.success)),
        }
    }

    #[test]
    fn test_sender_chunk_retries_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bounded.bin");
        std::fs::write(&path, b"payload").unwrap();

        let config = TransferConfig { max_retries: 3, ..test_config() };
        let data = Frame::data(0, b"payload".to_vec());

        let mut frames = vec![Some(Frame::Ack(AckRef::Start))];
        frames.push(Some(Frame::Nack(Some(0))));
        frames.push(None);
        frames.push(Some(Frame::Nack(Some(0))));
        frames.push(Some(Frame::Nack(Some(0))));

        let mut expected = vec![start_frame("bounded.bin", 7)];
        expected.extend(std::iter::repeat(data).take(4));

        let mock = Box::new(MockSerialPort::new(replies(&frames), writes(&expected)));
        match send_file(mock, &path, config, CancelToken::new()) {
            Err(TransferError::RetriesExhausted { phase: Phase::Chunk(0), attempts: 4 }) => {}
            other => panic!("expected chunk retry exhaustion, got {:?}", other.map(|r| r.success)),
        }
    }

    #[test]
    fn test_sender_retries_lost_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("end.bin");
        std::fs::write(&path, b"last").unwrap();

        let responses = replies(&[
            Some(Frame::Ack(AckRef::Start)),
            Some(Frame::Ack(AckRef::Chunk(0))),
            None,
            Some(Frame::Ack(AckRef::End)),
        ]);

        let expected = vec![
            start_frame("end.bin", 4),
            Frame::data(0, b"last".to_vec()),
            Frame::End,
            Frame::End,
        ];

        let mock = Box::new(MockSerialPort::new(responses, writes(&expected)));
        let report = send_file(mock, &path, test_config(), CancelToken::new()).expect("transfer failed");

        assert!(report.success);
        assert_eq!(report.control_retries, 1);
        assert_eq!(report.timeouts, 1);
    }

    #[test]
    fn test_sender_end_unacknowledged_is_not_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("noend.bin");
        std::fs::write(&path, b"x").unwrap();

        let config = TransferConfig { max_retries: 1, ..test_config() };
        let responses = replies(&[
            Some(Frame::Ack(AckRef::Start)),
            Some(Frame::Ack(AckRef::Chunk(0))),
            None,
            None,
        ]);

        let expected = vec![
            start_frame("noend.bin", 1),
            Frame::data(0, b"x".to_vec()),
            Frame::End,
            Frame::End,
        ];

        let mock = Box::new(MockSerialPort::new(responses, writes(&expected)));
        match send_file(mock, &path, config, CancelToken::new()) {
            Err(TransferError::RetriesExhausted { phase: Phase::End, attempts: 2 }) => {}
            other => panic!("expected END retry exhaustion, got {:?}", other.map(|r| r.success)),
        }
    }

    #[test]
    fn test_sender_ignores_stale_ack() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stale.bin");
        let content = pattern(20);
        std::fs::write(&path, &content).unwrap();

        let config = TransferConfig { chunk_size: 10, ..test_config() };
        let responses = replies(&[
            Some(Frame::Ack(AckRef::Start)),
            Some(Frame::Ack(AckRef::Chunk(0))),
            Some(Frame::Ack(AckRef::Chunk(0))),
            Some(Frame::Ack(AckRef::Chunk(1))),
            Some(Frame::Ack(AckRef::End)),
        ]);

        let mut expected = vec![start_frame("stale.bin", 20)];
        expected.extend(data_frames(&content, 10));
        expected.push(Frame::End);

        let mock = Box::new(MockSerialPort::new(responses, writes(&expected)));
        let report = send_file(mock, &path, config, CancelToken::new()).expect("transfer failed");

        assert_eq!(report.ignored_frames, 1);
        assert_eq!(report.retransmissions, 0);
    }

    #[test]
    fn test_sender_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        std::fs::write(&path, b"").unwrap();

        let responses = replies(&[Some(Frame::Ack(AckRef::Start)), Some(Frame::Ack(AckRef::End))]);
        let expected = writes(&[start_frame("empty.bin", 0), Frame::End]);

        let mock = Box::new(MockSerialPort::new(responses, expected));
        let report = send_file(mock, &path, test_config(), CancelToken::new()).expect("transfer failed");

        assert_eq!(report.chunks, 0);
        assert_eq!(report.payload_bytes, 0);
    }

    #[test]
    fn test_sender_missing_source_fails_before_sending() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Box::new(MockSerialPort::new(vec![], vec![]));

        match send_file(mock, &dir.path().join("absent.bin"), test_config(), CancelToken::new()) {
            Err(TransferError::File { .. }) => {}
            other => panic!("expected file error, got {:?}", other.map(|r| r.success)),
        }
    }

    #[test]
    fn test_sender_cancelled_before_first_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cancel.bin");
        std::fs::write(&path, b"data").unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();

        let mock = Box::new(MockSerialPort::new(vec![], vec![]));
        match send_file(mock, &path, test_config(), cancel) {
            Err(TransferError::Cancelled { state: "SendStart" }) => {}
            other => panic!("expected cancellation, got {:?}", other.map(|r| r.success)),
        }
    }

    #[test]
    fn test_sender_step_by_step() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steps.bin");
        std::fs::write(&path, b"hi").unwrap();

        let responses = replies(&[None, Some(Frame::Ack(AckRef::Start))]);
        let start = start_frame("steps.bin", 2);
        let expected = writes(&[start.clone(), start, Frame::data(0, b"hi".to_vec())]);

        let mock = Box::new(MockSerialPort::new(responses, expected));
        let mut fsm = SenderFsm::new(mock, &path, test_config(), CancelToken::new()).unwrap();

        // SendStart, WaitStartAck (timeout), SendStart, WaitStartAck (ack), SendChunk
        for _ in 0..5 {
            fsm = match fsm.step().expect("step failed") {
                SenderStep::Next(next) => next,
                SenderStep::Done(_) => panic!("finished early"),
            };
        }
    }
}
