//! Core flash-programming logic for the CC family of 8051-based SoCs
//! (CC1110/1111, CC2430/2431, CC2510/2511, CC2530/2531/2533, CC2540/2541,
//! CC2543/2544/2545).
//!
//! This crate drives a USB debug dongle that speaks to the target's
//! on-chip debug interface. It has no knowledge of argument parsing,
//! progress-bar rendering, or log file formatting — those live one layer
//! up. It does know how to hold a sparse flash image, assemble 8051
//! debug-command payloads, select a per-family register map, and drive
//! the DMA-backed flash engine that writes, reads, and verifies flash.
//!
//! The crate is organized the way the target hardware is: a data model
//! for flash images ([`section`], [`hex`]), a debug-command layer that
//! knows the dongle's opcode contract ([`debug`]), per-family register
//! maps and quirks ([`unit`], [`drivers`]), a shared flash engine
//! ([`flash`]) that all families drive, a programmer façade that owns the
//! USB session ([`programmer`]), and a task orchestrator that sequences
//! everything a caller asked for ([`orchestrator`]).

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod crc;
pub mod debug;
pub mod drivers;
pub mod error;
pub mod flash;
pub mod hex;
pub mod orchestrator;
pub mod programmer;
pub mod progress;
pub mod section;
pub mod transport;
pub mod unit;

pub use error::{Error, Result};
