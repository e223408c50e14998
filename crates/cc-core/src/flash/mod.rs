//! The flash engine shared by every per-family driver: DMA-descriptor
//! programming, slow and fast writes, erase, banked/near reads, and the
//! two verify strategies (byte-compare and CRC-16).
//!
//! Families differ only in register addresses and block sizes, captured
//! in [`crate::unit::UnitCoreInfo`]; the algorithms here are common to
//! all of them.

mod engine;

pub use engine::*;
