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

use clap::{Parser, Subcommand};
use serialport::{DataBits, Parity, StopBits};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use arqlink::link::{self, Connection, LinkConfig};
use arqlink::logging::{init_logging, LogFormat, LogLevel};
use arqlink::protocol::Role;
use arqlink::{receiver, sender};

#[derive(Parser)]
#[command(name = "arqlink")]
#[command(about = "Reliable file transfer over a serial line", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyS0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate
    #[arg(short, long, default_value = "38400")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name="BITS")]
    stop_bits: u8,

    /// Transmissions of a frame before giving up
    #[arg(long, default_value = "3", value_name = "COUNT",
          value_parser = clap::value_parser!(u32).range(1..))]
    retransmissions: u32,

    /// Seconds to wait for a reply before retransmitting
    #[arg(long, default_value = "3", value_name = "SECS",
          value_parser = clap::value_parser!(u64).range(1..=3600))]
    timeout: u64,

    /// Largest information frame payload in bytes
    #[arg(long, default_value = "1024", value_name = "BYTES",
          value_parser = clap::value_parser!(u32).range(300..=65535))]
    max_payload: u32,

    /// Log link statistics when the connection closes
    #[arg(long)]
    stats: bool,

    /// Log output format (stderr)
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// Minimum log level (stderr)
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a file
    Send {
        /// File to send
        file: PathBuf,
    },
    /// Receive a file
    Receive {
        /// Directory to save the received file
        #[arg(short, long, default_value = ".")]
        output_dir: PathBuf,
    },
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn link_config(cli: &Cli) -> Result<LinkConfig, String> {
    let role = match cli.command {
        Commands::Send { .. } => Role::Transmitter,
        Commands::Receive { .. } => Role::Receiver,
    };

    Ok(LinkConfig {
        baud_rate: cli.baud,
        data_bits: parse_data_bits(cli.data_bits)?,
        parity: parse_parity(&cli.parity)?,
        stop_bits: parse_stop_bits(cli.stop_bits)?,
        max_retransmissions: cli.retransmissions,
        timeout: Duration::from_secs(cli.timeout),
        max_payload: cli.max_payload as usize,
        ..LinkConfig::new(cli.port.clone(), role)
    })
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let config = match link_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "settings: {} baud, {:?}, {:?}, {:?}",
        config.baud_rate, config.data_bits, config.parity, config.stop_bits
    );

    match cli.command {
        Commands::Send { file } => {
            if let Err(e) = send_file(config, file, cli.stats) {
                eprintln!("Send failed: {}", e);
                std::process::exit(1);
            }
            info!("file sent successfully");
        }
        Commands::Receive { output_dir } => {
            if let Err(e) = receive_file(config, output_dir, cli.stats) {
                eprintln!("Receive failed: {}", e);
                std::process::exit(1);
            }
            info!("file received successfully");
        }
    }
}

fn send_file(config: LinkConfig, file: PathBuf, stats: bool) -> Result<(), sender::SenderError> {
    use sender::{SenderFsm, SendStart};

    if !file.is_file() {
        return Err(sender::SenderError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {}", file.display()),
        )));
    }

    let link = Connection::open(config)?;
    let mut state = SenderFsm::<SendStart>::new(link, &file, stats)?;

    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(sender::SenderError::TransferComplete) => {
                return Ok(());
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}

fn receive_file(config: LinkConfig, output_dir: PathBuf, stats: bool) -> Result<(), receiver::ReceiverError> {
    use receiver::{ReceiverFsm, WaitStart};

    if !output_dir.is_dir() {
        return Err(receiver::ReceiverError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Output directory not found: {}", output_dir.display()),
        )));
    }

    let link = Connection::open(config)?;
    let mut state = ReceiverFsm::<WaitStart>::new(link, output_dir, stats);

    loop {
        match state.step() {
            Ok(next_state) => {
                state = next_state;
            }
            Err(receiver::ReceiverError::TransferComplete) => {
                return Ok(());
            }
            Err(e) => {
                return Err(e);
            }
        }
    }
}
