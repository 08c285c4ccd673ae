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
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use crate::cancel::CancelToken;
use crate::checksum;
use crate::config::TransferConfig;
use crate::error::TransferError;
use crate::frame::{AckRef, Frame, FrameReader, Received};
use crate::serial::SerialPort;
use crate::stats::{Role, SessionReport, SessionStats};

/// Name used when START carries nothing usable
const FALLBACK_FILENAME: &str = "received.ssdv";

/// Give up looking for a free `name.N` after this many candidates
const MAX_NAME_SUFFIX: u32 = 999;

// ============================================================================
// States
// ============================================================================

pub struct WaitStart;
pub struct WaitChunk;
pub struct Linger;

// ============================================================================
// Output File
// ============================================================================

/// File being reconstructed. Content lands in `<name>.part` and is renamed
/// into place only once the whole file has arrived.
struct OutputFile {
    file: File,
    part_path: PathBuf,
    final_path: PathBuf,
}

impl OutputFile {
    fn create(output_dir: &Path, filename: &str, filesize: u64) -> Result<Self, TransferError> {
        let final_path = unique_path(output_dir, &sanitize_filename(filename))?;
        let part_path = part_path(&final_path);

        // Never reuse a `.part` left behind by an aborted session
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&part_path)
            .map_err(|e| TransferError::file(&part_path, e))?;
        file.set_len(filesize).map_err(|e| TransferError::file(&part_path, e))?;

        Ok(OutputFile { file, part_path, final_path })
    }

    fn write_at(&mut self, offset: u64, payload: &[u8]) -> Result<(), TransferError> {
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(payload))
            .map_err(|e| TransferError::file(&self.part_path, e))
    }

    fn finish(self) -> Result<PathBuf, TransferError> {
        self.file.sync_all().map_err(|e| TransferError::file(&self.part_path, e))?;
        drop(self.file);
        std::fs::rename(&self.part_path, &self.final_path)
            .map_err(|e| TransferError::file(&self.final_path, e))?;
        Ok(self.final_path)
    }
}

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    serial: Box<dyn SerialPort>,
    reader: FrameReader,
    config: TransferConfig,
    cancel: CancelToken,
    output_dir: PathBuf,
    output: Option<OutputFile>,
    saved_path: Option<PathBuf>,
    filename: String,
    filesize: u64,
    next_chunk: u32,
    bytes_written: u64,
    last_activity: Instant,
    linger_until: Instant,
    stats: SessionStats,
}

// ============================================================================
// Trait
// ============================================================================

pub enum ReceiverStep {
    Next(Box<dyn ReceiverState>),
    Done { path: PathBuf, report: SessionReport },
}

pub trait ReceiverState: Send {
    fn step(self: Box<Self>) -> Result<ReceiverStep, TransferError>;
}

// ============================================================================
// Helpers shared by every state
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self) -> Box<ReceiverFsm<T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            serial: self.serial,
            reader: self.reader,
            config: self.config,
            cancel: self.cancel,
            output_dir: self.output_dir,
            output: self.output,
            saved_path: self.saved_path,
            filename: self.filename,
            filesize: self.filesize,
            next_chunk: self.next_chunk,
            bytes_written: self.bytes_written,
            last_activity: self.last_activity,
            linger_until: self.linger_until,
            stats: self.stats,
        })
    }

    fn state_name(&self) -> &'static str {
        let type_name = std::any::type_name::<S>();
        type_name.split("::").last().unwrap_or(type_name)
    }

    /// Close the output, leaving the `.part` file as the partial result
    fn fail(&mut self, err: TransferError) -> TransferError {
        warn!(filename = %self.filename, error = %err, "receive aborted");
        if let Some(output) = self.output.take() {
            warn!(
                path = %output.part_path.display(),
                bytes = self.bytes_written,
                "partial file kept"
            );
        }
        self.stats.report(false).log();
        err
    }

    fn check_cancel(&mut self) -> Result<(), TransferError> {
        if self.cancel.is_cancelled() {
            let state = self.state_name();
            return Err(self.fail(TransferError::Cancelled { state }));
        }
        Ok(())
    }

    fn send(&mut self, frame: Frame) -> Result<(), TransferError> {
        let bytes = frame.encode();
        if let Err(source) = self.serial.write_all(&bytes) {
            let state = self.state_name();
            return Err(self.fail(TransferError::Transport { state, source }));
        }
        self.stats.record_frame_sent(bytes.len());
        Ok(())
    }

    fn receive(&mut self, window: Duration) -> Result<Received, TransferError> {
        match self.reader.read_frame(self.serial.as_mut(), window) {
            Ok(received) => {
                if received != Received::Timeout {
                    self.last_activity = Instant::now();
                }
                if let Received::Frame(_) = received {
                    self.stats.record_frame_received();
                }
                Ok(received)
            }
            Err(source) => {
                let state = self.state_name();
                Err(self.fail(TransferError::Transport { state, source }))
            }
        }
    }

    /// NACK a frame that did not parse, naming its chunk when it could be read
    fn reject_malformed(&mut self, chunk_id: Option<u32>) -> Result<(), TransferError> {
        self.stats.record_corrupt();
        self.stats.record_nack();
        self.send(Frame::Nack(chunk_id))
    }

    fn ignore(&mut self, frame: &Frame) {
        self.stats.record_ignored();
        debug!(state = self.state_name(), kind = frame.kind_name(), "ignoring unexpected frame");
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverState for ReceiverFsm<WaitStart> {
    fn step(self: Box<Self>) -> Result<ReceiverStep, TransferError> {
        let mut fsm = *self;
        fsm.check_cancel()?;

        let mut window = fsm.config.frame_timeout;
        if let Some(limit) = fsm.config.start_timeout {
            let idle = fsm.last_activity.elapsed();
            if idle >= limit {
                let state = fsm.state_name();
                return Err(fsm.fail(TransferError::PeerSilent { state, idle }));
            }
            window = window.min(limit - idle);
        }

        match fsm.receive(window)? {
            Received::Frame(Frame::Start { filename, filesize }) => {
                let output = match OutputFile::create(&fsm.output_dir, &filename, filesize) {
                    Ok(output) => output,
                    Err(e) => return Err(fsm.fail(e)),
                };
                info!(
                    filename = %filename,
                    filesize,
                    path = %output.final_path.display(),
                    "incoming file"
                );

                fsm.output = Some(output);
                fsm.filename = filename;
                fsm.filesize = filesize;
                fsm.next_chunk = 0;
                fsm.bytes_written = 0;
                fsm.stats = SessionStats::new(Role::Receiver);
                fsm.stats.set_filesize(filesize);
                fsm.stats.record_frame_received();

                fsm.send(Frame::Ack(AckRef::Start))?;
                Ok(ReceiverStep::Next(fsm.transition::<WaitChunk>()))
            }
            Received::Malformed(e) => {
                debug!(error = %e, "malformed frame while waiting for START");
                fsm.reject_malformed(e.chunk_id())?;
                Ok(ReceiverStep::Next(Box::new(fsm)))
            }
            Received::Frame(other) => {
                fsm.ignore(&other);
                Ok(ReceiverStep::Next(Box::new(fsm)))
            }
            Received::Timeout => Ok(ReceiverStep::Next(Box::new(fsm))),
        }
    }
}

impl ReceiverState for ReceiverFsm<WaitChunk> {
    fn step(self: Box<Self>) -> Result<ReceiverStep, TransferError> {
        let mut fsm = *self;
        fsm.check_cancel()?;

        let idle = fsm.last_activity.elapsed();
        if idle >= fsm.config.idle_timeout {
            let state = fsm.state_name();
            return Err(fsm.fail(TransferError::PeerSilent { state, idle }));
        }
        let window = fsm.config.frame_timeout.min(fsm.config.idle_timeout - idle);

        match fsm.receive(window)? {
            Received::Frame(Frame::Data { chunk_id, payload, checksum }) => {
                fsm.accept_chunk(chunk_id, &payload, &checksum)?;
                Ok(ReceiverStep::Next(Box::new(fsm)))
            }
            Received::Frame(Frame::End) => {
                if fsm.bytes_written != fsm.filesize {
                    let err = TransferError::ProtocolViolation(format!(
                        "END after {} of {} bytes",
                        fsm.bytes_written, fsm.filesize
                    ));
                    return Err(fsm.fail(err));
                }

                let path = match fsm.output.take().map(OutputFile::finish) {
                    Some(Ok(path)) => path,
                    Some(Err(e)) => return Err(fsm.fail(e)),
                    None => {
                        let err = TransferError::ProtocolViolation("END without an open output file".into());
                        return Err(fsm.fail(err));
                    }
                };
                info!(path = %path.display(), bytes = fsm.bytes_written, "file complete");

                fsm.saved_path = Some(path);
                fsm.send(Frame::Ack(AckRef::End))?;
                fsm.linger_until = Instant::now() + fsm.config.end_linger;
                Ok(ReceiverStep::Next(fsm.transition::<Linger>()))
            }
            Received::Frame(Frame::Start { filename, filesize })
                if fsm.next_chunk == 0 && filename == fsm.filename && filesize == fsm.filesize =>
            {
                // Our START_ACK was lost
                fsm.stats.record_duplicate();
                debug!(filename = %filename, "re-acknowledging START");
                fsm.send(Frame::Ack(AckRef::Start))?;
                Ok(ReceiverStep::Next(Box::new(fsm)))
            }
            Received::Malformed(e) => {
                warn!(error = %e, chunk_id = ?e.chunk_id(), "malformed frame");
                fsm.reject_malformed(e.chunk_id())?;
                Ok(ReceiverStep::Next(Box::new(fsm)))
            }
            Received::Frame(other) => {
                fsm.ignore(&other);
                Ok(ReceiverStep::Next(Box::new(fsm)))
            }
            Received::Timeout => {
                fsm.stats.record_timeout();
                Ok(ReceiverStep::Next(Box::new(fsm)))
            }
        }
    }
}

impl ReceiverFsm<WaitChunk> {
    fn accept_chunk(&mut self, chunk_id: u32, payload: &[u8], claimed: &checksum::Checksum) -> Result<(), TransferError> {
        if !checksum::verify(payload, claimed) {
            self.stats.record_corrupt();
            self.stats.record_nack();
            warn!(chunk_id, "checksum mismatch");
            return self.send(Frame::Nack(Some(chunk_id)));
        }

        if chunk_id < self.next_chunk {
            // Sender missed our ACK; acknowledge again, write nothing
            self.stats.record_duplicate();
            debug!(chunk_id, "duplicate chunk");
            return self.send(Frame::Ack(AckRef::Chunk(chunk_id)));
        }

        if chunk_id > self.next_chunk {
            self.stats.record_ignored();
            warn!(chunk_id, expected = self.next_chunk, "chunk out of sequence");
            return Ok(());
        }

        if payload.len() > self.config.chunk_size {
            let err = TransferError::ProtocolViolation(format!(
                "chunk {} carries {} bytes, chunk size is {}",
                chunk_id,
                payload.len(),
                self.config.chunk_size
            ));
            return Err(self.fail(err));
        }
        if self.bytes_written + payload.len() as u64 > self.filesize {
            let err = TransferError::ProtocolViolation(format!(
                "chunk {} runs past declared filesize {}",
                chunk_id, self.filesize
            ));
            return Err(self.fail(err));
        }

        let offset = self.bytes_written;
        let written = match self.output.as_mut() {
            Some(output) => output.write_at(offset, payload),
            None => Err(TransferError::ProtocolViolation("DATA without an open output file".into())),
        };
        if let Err(e) = written {
            return Err(self.fail(e));
        }

        self.bytes_written += payload.len() as u64;
        self.next_chunk += 1;
        self.stats.record_chunk(payload.len());

        if chunk_id % 10 == 0 {
            info!(
                chunk_id,
                received = self.bytes_written,
                filesize = self.filesize,
                percent = self.stats.progress(),
                "progress"
            );
        } else {
            debug!(chunk_id, len = payload.len(), "chunk committed");
        }

        self.send(Frame::Ack(AckRef::Chunk(chunk_id)))
    }
}

impl ReceiverState for ReceiverFsm<Linger> {
    fn step(self: Box<Self>) -> Result<ReceiverStep, TransferError> {
        let mut fsm = *self;

        let remaining = fsm.linger_until.saturating_duration_since(Instant::now());
        if remaining.is_zero() || fsm.cancel.is_cancelled() {
            debug!(noise_bytes = fsm.reader.discarded(), "line noise skipped");
            let report = fsm.stats.report(true);
            report.log();
            let path = fsm.saved_path.take().unwrap_or_default();
            return Ok(ReceiverStep::Done { path, report });
        }

        match fsm.receive(remaining.min(fsm.config.frame_timeout))? {
            Received::Frame(Frame::End) => {
                // Our END_ACK was lost
                fsm.stats.record_duplicate();
                debug!("re-acknowledging END");
                fsm.send(Frame::Ack(AckRef::End))?;
            }
            Received::Frame(Frame::Data { chunk_id, payload, checksum })
                if chunk_id < fsm.next_chunk && checksum::verify(&payload, &checksum) =>
            {
                fsm.stats.record_duplicate();
                fsm.send(Frame::Ack(AckRef::Chunk(chunk_id)))?;
            }
            Received::Frame(other) => fsm.ignore(&other),
            Received::Malformed(_) | Received::Timeout => {}
        }
        Ok(ReceiverStep::Next(Box::new(fsm)))
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl ReceiverFsm<WaitStart> {
    pub fn new(
        serial: Box<dyn SerialPort>,
        output_dir: &Path,
        config: TransferConfig,
        cancel: CancelToken,
    ) -> Result<Box<dyn ReceiverState>, TransferError> {
        config.validate()?;

        if !output_dir.is_dir() {
            return Err(TransferError::file(
                output_dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "output directory not found"),
            ));
        }

        let now = Instant::now();
        Ok(Box::new(ReceiverFsm {
            state: PhantomData::<WaitStart>,
            serial,
            reader: FrameReader::new(config.max_body()),
            config,
            cancel,
            output_dir: output_dir.to_path_buf(),
            output: None,
            saved_path: None,
            filename: String::new(),
            filesize: 0,
            next_chunk: 0,
            bytes_written: 0,
            last_activity: now,
            linger_until: now,
            stats: SessionStats::new(Role::Receiver),
        }))
    }
}

pub fn run_receiver(mut state: Box<dyn ReceiverState>) -> Result<(PathBuf, SessionReport), TransferError> {
    loop {
        match state.step()? {
            ReceiverStep::Next(next) => state = next,
            ReceiverStep::Done { path, report } => return Ok((path, report)),
        }
    }
}

/// Receive one file into `output_dir`, returning where it was saved
pub fn receive_file(
    serial: Box<dyn SerialPort>,
    output_dir: &Path,
    config: TransferConfig,
    cancel: CancelToken,
) -> Result<(PathBuf, SessionReport), TransferError> {
    let fsm = ReceiverFsm::new(serial, output_dir, config, cancel)?;
    run_receiver(fsm)
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Reduce a peer-supplied name to a bare filename inside the output directory
fn sanitize_filename(filename: &str) -> String {
    let unified = filename.replace('\\', "/");
    let name = Path::new(&unified)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let cleaned: String = name.chars().filter(|c| !c.is_control()).collect();
    if cleaned.is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        cleaned
    }
}

fn part_path(final_path: &Path) -> PathBuf {
    let mut part = final_path.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}

/// `dir/name`, or `dir/name.1`, `dir/name.2`, ... if taken. A name is taken
/// when either it or its `.part` file exists.
fn unique_path(dir: &Path, name: &str) -> Result<PathBuf, TransferError> {
    let free = |candidate: &Path| !candidate.exists() && !part_path(candidate).exists();

    let candidate = dir.join(name);
    if free(&candidate) {
        return Ok(candidate);
    }
    for n in 1..=MAX_NAME_SUFFIX {
        let candidate = dir.join(format!("{}.{}", name, n));
        if free(&candidate) {
            return Ok(candidate);
        }
    }
    Err(TransferError::file(
        dir.join(name),
        std::io::Error::new(std::io::ErrorKind::AlreadyExists, "no free output name"),
    ))
}

// ============================================================================
// Tests
// ============================================================================
