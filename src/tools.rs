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

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, info};

/// SSDV packet length used by both ends of the link
pub const SSDV_PACKET_LEN: u16 = 256;

/// SSDV requires image dimensions to be multiples of this
pub const MCU_SIZE: u32 = 16;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{tool} exited with {}", describe_status(.status))]
    Failed { tool: String, status: Option<i32> },

    #[error("input {} not found", .0.display())]
    MissingInput(PathBuf),

    #[error("could not read image dimensions from {output:?}")]
    BadDimensions { output: String },
}

/// Turns one file into another by way of an external program
pub trait Conversion {
    fn convert(&self, input: &Path, output: &Path) -> Result<(), ToolError>;
}

// ============================================================================
// SSDV codec
// ============================================================================

pub struct SsdvEncoder {
    pub program: PathBuf,
    pub callsign: String,
    pub image_id: u8,
    pub quality: u8,
    pub packet_len: u16,
}

impl Default for SsdvEncoder {
    fn default() -> Self {
        SsdvEncoder {
            program: PathBuf::from("./ssdv"),
            callsign: "CUBESA".to_string(),
            image_id: 1,
            quality: 7,
            packet_len: SSDV_PACKET_LEN,
        }
    }
}

impl SsdvEncoder {
    fn args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-e".into(),
            "-c".into(),
            self.callsign.clone().into(),
            "-i".into(),
            self.image_id.to_string().into(),
            "-q".into(),
            self.quality.to_string().into(),
            "-l".into(),
            self.packet_len.to_string().into(),
            input.into(),
            output.into(),
        ]
    }
}

impl Conversion for SsdvEncoder {
    fn convert(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        require_input(input)?;
        run(&self.program, &self.args(input, output))?;
        info!(input = %input.display(), output = %output.display(), "encoded SSDV");
        Ok(())
    }
}

pub struct SsdvDecoder {
    pub program: PathBuf,
    pub packet_len: u16,
}

impl Default for SsdvDecoder {
    fn default() -> Self {
        SsdvDecoder { program: PathBuf::from("./ssdv"), packet_len: SSDV_PACKET_LEN }
    }
}

impl SsdvDecoder {
    fn args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        vec![
            "-d".into(),
            "-l".into(),
            self.packet_len.to_string().into(),
            input.into(),
            output.into(),
        ]
    }
}

impl Conversion for SsdvDecoder {
    fn convert(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        require_input(input)?;
        run(&self.program, &self.args(input, output))?;
        info!(input = %input.display(), output = %output.display(), "decoded SSDV");
        Ok(())
    }
}

// ============================================================================
// Baseline JPEG normalization (ImageMagick)
// ============================================================================

pub struct BaselineJpeg {
    pub identify: PathBuf,
    pub convert: PathBuf,
}

impl Default for BaselineJpeg {
    fn default() -> Self {
        BaselineJpeg { identify: PathBuf::from("identify"), convert: PathBuf::from("convert") }
    }
}

impl BaselineJpeg {
    fn dimensions(&self, input: &Path) -> Result<(u32, u32), ToolError> {
        let tool = self.identify.display().to_string();
        let args: [OsString; 3] = ["-format".into(), "%w %h".into(), input.into()];
        debug!(tool = %tool, "running");

        let out = Command::new(&self.identify)
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| ToolError::Spawn { tool: tool.clone(), source })?;
        if !out.status.success() {
            return Err(ToolError::Failed { tool, status: out.status.code() });
        }

        parse_dimensions(&String::from_utf8_lossy(&out.stdout))
    }

    fn args(input: &Path, output: &Path, resize: Option<(u32, u32)>) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![input.into()];
        if let Some((w, h)) = resize {
            args.push("-resize".into());
            args.push(format!("{}x{}!", w, h).into());
        }
        args.extend(["-quality".into(), "100".into(), "-interlace".into(), "none".into()]);
        args.push(output.into());
        args
    }
}

impl Conversion for BaselineJpeg {
    fn convert(&self, input: &Path, output: &Path) -> Result<(), ToolError> {
        require_input(input)?;
        let (width, height) = self.dimensions(input)?;
        let target = (round_up_16(width), round_up_16(height));

        let resize = if target != (width, height) {
            info!(width, height, new_width = target.0, new_height = target.1, "resizing image");
            Some(target)
        } else {
            None
        };

        run(&self.convert, &Self::args(input, output, resize))?;
        info!(input = %input.display(), output = %output.display(), "converted to baseline JPEG");
        Ok(())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn describe_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

pub fn round_up_16(n: u32) -> u32 {
    n.div_ceil(MCU_SIZE) * MCU_SIZE
}

fn parse_dimensions(text: &str) -> Result<(u32, u32), ToolError> {
    let bad = || ToolError::BadDimensions { output: text.to_string() };
    let mut fields = text.split_whitespace().map(str::parse::<u32>);
    match (fields.next(), fields.next(), fields.next()) {
        (Some(Ok(w)), Some(Ok(h)), None) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(bad()),
    }
}

fn require_input(input: &Path) -> Result<(), ToolError> {
    if input.is_file() {
        Ok(())
    } else {
        Err(ToolError::MissingInput(input.to_path_buf()))
    }
}

fn run(program: &Path, args: &[OsString]) -> Result<(), ToolError> {
    let tool = program.display().to_string();
    debug!(tool = %tool, ?args, "running");

    let status = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .status()
        .map_err(|source| ToolError::Spawn { tool: tool.clone(), source })?;

    if status.success() {
        Ok(())
    } else {
        Err(ToolError::Failed { tool, status: status.code() })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn test_round_up_16() {
        assert_eq!(round_up_16(0), 0);
        assert_eq!(round_up_16(1), 16);
        assert_eq!(round_up_16(16), 16);
        assert_eq!(round_up_16(17), 32);
        assert_eq!(round_up_16(1080), 1088);
        assert_eq!(round_up_16(1920), 1920);
    }

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(parse_dimensions("640 480").unwrap(), (640, 480));
        assert_eq!(parse_dimensions(" 1920 1080\n").unwrap(), (1920, 1080));
        assert!(parse_dimensions("").is_err());
        assert!(parse_dimensions("640").is_err());
        assert!(parse_dimensions("640 x").is_err());
        assert!(parse_dimensions("0 480").is_err());
        assert!(parse_dimensions("640 480 3").is_err());
    }

    #[test]
    fn test_encoder_args() {
        let args = SsdvEncoder::default().args(Path::new("in.jpg"), Path::new("out.ssdv"));
        assert_eq!(
            strings(&args),
            ["-e", "-c", "CUBESA", "-i", "1", "-q", "7", "-l", "256", "in.jpg", "out.ssdv"]
        );
    }

    #[test]
    fn test_decoder_args() {
        let decoder = SsdvDecoder { packet_len: 128, ..Default::default() };
        let args = decoder.args(Path::new("in.ssdv"), Path::new("out.jpg"));
        assert_eq!(strings(&args), ["-d", "-l", "128", "in.ssdv", "out.jpg"]);
    }

    #[test]
    fn test_baseline_args() {
        let plain = BaselineJpeg::args(Path::new("a.jpg"), Path::new("b.jpg"), None);
        assert_eq!(strings(&plain), ["a.jpg", "-quality", "100", "-interlace", "none", "b.jpg"]);

        let resized = BaselineJpeg::args(Path::new("a.jpg"), Path::new("b.jpg"), Some((656, 496)));
        assert_eq!(
            strings(&resized),
            ["a.jpg", "-resize", "656x496!", "-quality", "100", "-interlace", "none", "b.jpg"]
        );
    }

    #[test]
    fn test_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.jpg");

        match SsdvEncoder::default().convert(&missing, &dir.path().join("out.ssdv")) {
            Err(ToolError::MissingInput(path)) => assert_eq!(path, missing),
            other => panic!("expected missing input, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jpg");
        std::fs::write(&input, b"\xFF\xD8").unwrap();

        let decoder = SsdvDecoder { program: dir.path().join("no-such-ssdv"), ..Default::default() };
        match decoder.convert(&input, &dir.path().join("out.jpg")) {
            Err(ToolError::Spawn { .. }) => {}
            other => panic!("expected spawn failure, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_status() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.ssdv");
        std::fs::write(&input, b"x").unwrap();

        let decoder = SsdvDecoder { program: PathBuf::from("false"), ..Default::default() };
        match decoder.convert(&input, &dir.path().join("out.jpg")) {
            Err(ToolError::Failed { tool, status: Some(1) }) => assert_eq!(tool, "false"),
            other => panic!("expected exit status 1, got {:?}", other),
        }
    }
}
