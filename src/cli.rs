//! CLI argument parsing.
//!
//! One flat set of task flags rather than subcommands: a single
//! invocation may combine several tasks in one session (e.g. `--erase
//! --write image.hex --verify`), matching the original `cc-tool`'s
//! flag-driven interface and §4.6's bitmask-of-tasks design.

use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(name = "cc-tool")]
#[command(author, version, about = "CC debug-dongle flash programmer", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv); default is `info`, set `RUST_LOG` for
    /// finer control.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Open the dongle at a specific USB bus/address instead of the
    /// first match (`bus:address`, e.g. `1:4`).
    #[arg(long, value_name = "BUS:ADDRESS")]
    pub device: Option<String>,

    /// Request the dongle's fast debug-interface transfer speed.
    #[arg(long, conflicts_with = "slow")]
    pub fast: bool,

    /// Request the dongle's slow debug-interface transfer speed.
    #[arg(long, conflicts_with = "fast")]
    pub slow: bool,

    /// Connectivity smoke test only: connect, read status/config,
    /// disconnect. May not be combined with any other task.
    #[arg(long)]
    pub test: bool,

    /// Reset the target back into halted debug mode.
    #[arg(long)]
    pub reset: bool,

    /// Erase the target's flash before any write.
    #[arg(long)]
    pub erase: bool,

    /// Write this image to the target after erase
    /// (`path[:bin|binary|hex|ihex[:offset]]`).
    #[arg(long, value_name = "PATH_SPEC")]
    pub write: Option<String>,

    /// Read the whole flash image back to this file
    /// (`path[:bin|binary|hex|ihex]`).
    #[arg(long, value_name = "PATH_SPEC")]
    pub read: Option<String>,

    /// Verify the image just written. Defaults to the hardware CRC-16
    /// method; pass `read` for a byte-for-byte read-back comparison.
    #[arg(long, value_name = "crc|read", num_args = 0..=1, default_missing_value = "crc")]
    pub verify: Option<String>,

    /// Write lock data: either a semicolon-separated qualifier string
    /// (`debug;pages:0,2-3`) or a literal hex byte string.
    #[arg(long, value_name = "QUALIFIERS_OR_HEX")]
    pub lock: Option<String>,

    /// Read back the target's primary MAC address and print it.
    #[arg(long)]
    pub read_mac: bool,

    /// Write this MAC address (hex bytes) as part of the image write.
    #[arg(long, value_name = "HEX", conflicts_with = "preserve_mac")]
    pub write_mac: Option<String>,

    /// Preserve the target's existing secondary MAC address across the
    /// write (reads it back first, then writes it as the primary MAC).
    #[arg(long, conflicts_with = "write_mac")]
    pub preserve_mac: bool,

    /// Read the family's info page (if it has one) to this file.
    #[arg(long, value_name = "PATH")]
    pub read_info_page: Option<PathBuf>,

    /// Override the detected flash size (KB), for targets that report
    /// an unrecognized (zero) size.
    #[arg(long, value_name = "KB")]
    pub flash_size: Option<u32>,
}
