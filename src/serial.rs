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

use std::time::Duration;
use serialport::SerialPort as SerialPortTrait;
use crate::config::SerialSettings;
use crate::error::TransferError;

// ============================================================================
// SerialPort Trait
// ============================================================================

/// Byte channel the transfer engines run over
pub trait SerialPort: Send {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()>;

    /// Read whatever is available, waiting at most `timeout`. Fails with
    /// `ErrorKind::TimedOut` when nothing arrives in time.
    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;
}

// ============================================================================
// Real Serial Port Implementation
// ============================================================================

/// Serial device opened through the serialport crate
pub struct RealSerialPort {
    port: Box<dyn SerialPortTrait>,
    // Last timeout handed to the driver
    timeout: Duration,
}

impl RealSerialPort {
    pub fn open(settings: &SerialSettings) -> Result<Self, TransferError> {
        let timeout = Duration::from_millis(100);
        let port = serialport::new(&settings.path, settings.baud_rate)
            .data_bits(settings.data_bits)
            .parity(settings.parity)
            .stop_bits(settings.stop_bits)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()?;

        // Drop anything left over from an earlier session
        port.clear(serialport::ClearBuffer::All)?;

        Ok(RealSerialPort { port, timeout })
    }
}

impl SerialPort for RealSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.port.write_all(buf)?;
        self.port.flush()
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        if timeout != self.timeout {
            self.port.set_timeout(timeout).map_err(std::io::Error::other)?;
            self.timeout = timeout;
        }
        self.port.read(buf)
    }
}

// ============================================================================
// Mock Serial Port for Testing
// ============================================================================

#[cfg(test)]
fn mock_timeout() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::TimedOut, "mock timeout")
}

/// Scripted port. Reads replay `script`, where `None` is one timed-out read;
/// a drained script keeps timing out. On drop the script must be used up and
/// the bytes written must equal `expected`.
#[cfg(test)]
pub struct MockSerialPort {
    script: std::collections::VecDeque<Option<u8>>,
    written: Vec<u8>,
    expected: Vec<u8>,
}

#[cfg(test)]
impl MockSerialPort {
    pub fn new(script: Vec<Option<u8>>, expected: Vec<u8>) -> Self {
        MockSerialPort { script: script.into(), written: Vec::new(), expected }
    }
}

#[cfg(test)]
impl SerialPort for MockSerialPort {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.written.extend_from_slice(buf);
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], _timeout: Duration) -> std::io::Result<usize> {
        match self.script.front() {
            None => return Err(mock_timeout()),
            Some(None) => {
                self.script.pop_front();
                return Err(mock_timeout());
            }
            Some(Some(_)) => {}
        }

        let mut n = 0;
        while n < buf.len() {
            match self.script.front() {
                Some(Some(byte)) => {
                    buf[n] = *byte;
                    n += 1;
                    self.script.pop_front();
                }
                _ => break,
            }
        }
        Ok(n)
    }
}

/// Frame names for a byte log, so a mismatch reads as a protocol trace
#[cfg(test)]
fn frame_trace(mut bytes: &[u8]) -> Vec<String> {
    use crate::frame::Frame;
    use crate::protocol::HEADER_LEN;

    let mut trace = Vec::new();
    while bytes.len() >= HEADER_LEN {
        let len = HEADER_LEN + u16::from_le_bytes([bytes[3], bytes[4]]) as usize;
        let frame = &bytes[..len.min(bytes.len())];
        trace.push(match Frame::decode(frame) {
            Ok(frame) => format!("{:?}", frame),
            Err(e) => format!("<{}>", e),
        });
        bytes = &bytes[frame.len()..];
    }
    if !bytes.is_empty() {
        trace.push(format!("<{} stray bytes>", bytes.len()));
    }
    trace
}

#[cfg(test)]
impl Drop for MockSerialPort {
    fn drop(&mut self) {
        if std::thread::panicking() {
            return;
        }

        assert!(
            self.script.is_empty(),
            "MockSerialPort dropped with {} scripted reads left",
            self.script.len()
        );
        assert!(
            self.written == self.expected,
            "MockSerialPort write mismatch\nexpected: {:#?}\ngot: {:#?}",
            frame_trace(&self.expected),
            frame_trace(&self.written)
        );
    }
}

// ============================================================================
// In-Memory Link for Testing
// ============================================================================

/// Rewrites one outgoing write: `None` drops it, `Some` sends the bytes given
#[cfg(test)]
pub type Tamper = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

/// One end of an in-memory duplex link. Each `write_all` travels as a unit,
/// so a tamper hook sees whole frames.
#[cfg(test)]
pub struct LinkEnd {
    tx: std::sync::mpsc::Sender<Vec<u8>>,
    rx: std::sync::mpsc::Receiver<Vec<u8>>,
    pending: std::collections::VecDeque<u8>,
    tamper: Option<Tamper>,
}

#[cfg(test)]
pub fn link_pair() -> (LinkEnd, LinkEnd) {
    let (a_tx, b_rx) = std::sync::mpsc::channel();
    let (b_tx, a_rx) = std::sync::mpsc::channel();
    let end = |tx, rx| LinkEnd {
        tx,
        rx,
        pending: std::collections::VecDeque::new(),
        tamper: None,
    };
    (end(a_tx, a_rx), end(b_tx, b_rx))
}

#[cfg(test)]
impl LinkEnd {
    /// Pass everything this end writes through `tamper`
    pub fn with_tamper(mut self, tamper: Tamper) -> Self {
        self.tamper = Some(tamper);
        self
    }
}

#[cfg(test)]
impl SerialPort for LinkEnd {
    fn write_all(&mut self, buf: &[u8]) -> std::io::Result<()> {
        let bytes = match self.tamper.as_mut() {
            Some(tamper) => tamper(buf),
            None => Some(buf.to_vec()),
        };
        if let Some(bytes) = bytes {
            // A hung-up peer looks like a silent line
            let _ = self.tx.send(bytes);
        }
        Ok(())
    }

    fn read_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        use std::sync::mpsc::RecvTimeoutError;

        if self.pending.is_empty() {
            match self.rx.recv_timeout(timeout) {
                Ok(bytes) => self.pending.extend(bytes),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "link timeout"));
                }
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(timeout);
                    return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "link closed"));
                }
            }
        }

        let n = buf.len().min(self.pending.len());
        for (slot, byte) in buf.iter_mut().zip(self.pending.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}
