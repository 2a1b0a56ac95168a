//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Directory holding the known-devices cache
    #[arg(long)]
    pub cache_dir: Option<String>,

    /// Local adapter to use (name or address, Linux only)
    #[arg(short, long)]
    pub adapter: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scan for advertising devices
    Scan {
        /// Seconds to scan for (defaults to the configured duration)
        #[arg(short, long)]
        duration: Option<u64>,
        /// Only show devices advertising this service UUID
        #[arg(short, long)]
        service: Option<String>,
        /// Remember every device whose hardware address is visible
        #[arg(short, long)]
        remember: bool,
        /// Scan passively, without scan requests
        #[arg(long)]
        passive: bool,
    },
    /// List remembered devices
    Devices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remember a device under a hardware address
    Remember {
        /// Hardware address, e.g. E8:C9:8F:52:7B:07
        address: String,
        /// Platform identifier reported by `scan`
        identifier: String,
    },
    /// Forget a remembered device
    Forget {
        /// Hardware address
        address: String,
    },
    /// Check which of the given services a device exposes
    Services {
        /// Hardware address
        address: String,
        /// Service UUIDs, full or short form
        #[arg(required = true)]
        uuids: Vec<String>,
    },
    /// Read a characteristic
    Read {
        /// Hardware address
        address: String,
        /// Characteristic UUID
        characteristic: String,
    },
    /// Write a hex-encoded value to a characteristic
    Write {
        /// Hardware address
        address: String,
        /// Characteristic UUID
        characteristic: String,
        /// Value as hex, e.g. 0102ff
        value: String,
        /// Write without waiting for an acknowledgement
        #[arg(long)]
        no_response: bool,
    },
    /// Print notifications from a characteristic
    Watch {
        /// Hardware address
        address: String,
        /// Characteristic UUID
        characteristic: String,
        /// Stop after this many notifications
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
}

impl Commands {
    /// Whether the command talks to the radio rather than only the cache
    pub fn needs_adapter(&self) -> bool {
        !matches!(
            self,
            Commands::Devices { .. } | Commands::Remember { .. } | Commands::Forget { .. }
        )
    }
}
