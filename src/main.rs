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

// SSDV image transfer over a serial link
mod cancel;
mod checksum;
mod config;
mod error;
mod frame;
mod protocol;
mod receiver;
mod sender;
mod serial;
mod stats;
mod tools;


use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use cancel::CancelToken;
use config::{
    default_linger, parse_data_bits, parse_parity, parse_stop_bits, SerialSettings, TransferConfig, DEFAULT_CHUNK_SIZE,
};
use error::TransferError;
use serial::RealSerialPort;
use tools::{BaselineJpeg, Conversion, SsdvDecoder, SsdvEncoder};

#[derive(Parser)]
#[command(name = "ssdv-link")]
#[command(about = "Reliable SSDV image transfer over RS-232", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file to a listening receiver
    Send {
        /// File to send
        file: PathBuf,

        #[command(flatten)]
        link: LinkArgs,
    },
    /// Wait for one incoming file
    Receive {
        /// Directory to save the received file
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,

        #[command(flatten)]
        link: LinkArgs,
    },
    /// Encode a JPEG into SSDV packets
    Encode {
        /// Input JPEG image
        #[arg(long)]
        image: PathBuf,

        /// Output SSDV file
        #[arg(long)]
        ssdv: PathBuf,
    },
    /// Decode SSDV packets back into a JPEG
    Decode {
        /// Input SSDV file
        #[arg(long)]
        ssdv: PathBuf,

        /// Output JPEG image
        #[arg(long)]
        output: PathBuf,
    },
    /// Convert an image to baseline JPEG with SSDV-friendly dimensions
    Convert {
        /// Input image
        #[arg(long)]
        image: PathBuf,

        /// Output JPEG image
        #[arg(long)]
        output: PathBuf,
    },
}

#[derive(Args)]
struct LinkArgs {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name = "BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name = "BITS")]
    stop_bits: u8,

    /// Payload bytes per DATA frame
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE, value_name = "BYTES")]
    chunk_size: usize,

    /// How long to wait for a reply before retrying
    #[arg(long, default_value = "2000", value_name = "MS")]
    timeout_ms: u64,

    /// Retransmissions allowed per frame
    #[arg(long, default_value = "3")]
    max_retries: u32,

    /// Receiver gives up after this long without hearing from the sender
    #[arg(long, default_value = "30", value_name = "SECS")]
    idle_timeout_secs: u64,

    /// Receiver gives up if START has not arrived by then (default: wait forever)
    #[arg(long, value_name = "SECS")]
    start_timeout_secs: Option<u64>,

    /// Receiver stays up this long after END to answer a resent END
    /// (default: timeout-ms x (max-retries + 1))
    #[arg(long, value_name = "MS")]
    end_linger_ms: Option<u64>,
}

impl LinkArgs {
    fn serial_settings(&self) -> Result<SerialSettings, TransferError> {
        let line = || -> Result<_, String> {
            Ok((
                parse_data_bits(self.data_bits)?,
                parse_parity(&self.parity)?,
                parse_stop_bits(self.stop_bits)?,
            ))
        };
        let (data_bits, parity, stop_bits) = line().map_err(TransferError::InvalidConfig)?;

        Ok(SerialSettings { path: self.port.clone(), baud_rate: self.baud, data_bits, parity, stop_bits })
    }

    fn transfer_config(&self) -> TransferConfig {
        let frame_timeout = Duration::from_millis(self.timeout_ms);
        TransferConfig {
            chunk_size: self.chunk_size,
            frame_timeout,
            max_retries: self.max_retries,
            idle_timeout: Duration::from_secs(self.idle_timeout_secs),
            start_timeout: self.start_timeout_secs.map(Duration::from_secs),
            end_linger: self
                .end_linger_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| default_linger(frame_timeout, self.max_retries)),
        }
    }
}

fn init_logging(debug: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let result = match cli.command {
        Commands::Send { file, link } => run_link(&link, |port, config, cancel| {
            info!(file = %file.display(), "sending");
            sender::send_file(port, &file, config, cancel).map(|_| ())
        }),
        Commands::Receive { output_dir, link } => run_link(&link, |port, config, cancel| {
            info!(output_dir = %output_dir.display(), "waiting for sender");
            let (path, _) = receiver::receive_file(port, &output_dir, config, cancel)?;
            info!(path = %path.display(), "saved");
            Ok(())
        }),
        Commands::Encode { image, ssdv } => convert(&SsdvEncoder::default(), &image, &ssdv),
        Commands::Decode { ssdv, output } => convert(&SsdvDecoder::default(), &ssdv, &output),
        Commands::Convert { image, output } => convert(&BaselineJpeg::default(), &image, &output),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(e.exit_code());
    }
}

/// Open the port, arm Ctrl-C, then hand everything to `transfer`
fn run_link<F>(link: &LinkArgs, transfer: F) -> Result<(), TransferError>
where
    F: FnOnce(Box<dyn serial::SerialPort>, TransferConfig, CancelToken) -> Result<(), TransferError>,
{
    let settings = link.serial_settings()?;
    let config = link.transfer_config();
    config.validate()?;

    info!(
        port = %settings.path,
        baud = settings.baud_rate,
        data_bits = ?settings.data_bits,
        parity = ?settings.parity,
        stop_bits = ?settings.stop_bits,
        "opening serial port"
    );
    let port = RealSerialPort::open(&settings)?;

    let cancel = CancelToken::new();
    if let Err(e) = cancel.install_handler() {
        warn!(error = %e, "could not install Ctrl-C handler");
    }

    transfer(Box::new(port), config, cancel)
}

fn convert(tool: &dyn Conversion, input: &Path, output: &Path) -> Result<(), TransferError> {
    tool.convert(input, output)?;
    Ok(())
}
