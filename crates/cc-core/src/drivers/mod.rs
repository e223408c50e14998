//! Per-family drivers: register maps, capability detection, and the
//! family-specific flash/MAC/lock flows layered on top of
//! [`crate::flash`] and [`crate::debug`].
//!
//! Chip-family dispatch is a flat list of [`Driver`] trait objects,
//! matched by 16-bit chip id against each driver's
//! [`Driver::supported_units`] table, the way `cc_programmer.cpp`'s
//! `unit_drivers_` list is walked in the original implementation.

mod cc243x;
mod cc251x_111x;
mod cc253x_254x;

pub use cc243x::Cc243xDriver;
pub use cc251x_111x::Cc251x111xDriver;
pub use cc253x_254x::Cc253x254xDriver;

use crate::debug::DebugEngine;
use crate::error::{Error, Result};
use crate::progress::ProgressObserver;
use crate::section::DataSectionStore;
use crate::unit::{UnitCoreInfo, UnitInfo};

/// Capability and flow interface common to every chip family.
///
/// Families differ in register maps, block sizes, lock-data encoding,
/// and the presence of a fast DMA-interleaved write path; the shared
/// algorithms they all drive live in [`crate::flash`].
pub trait Driver {
    /// `(chip_id, printable name)` pairs this driver recognizes.
    fn supported_units(&self) -> &'static [(u16, &'static str)];

    /// The register map and block sizes for the variant last resolved
    /// by [`Driver::find_unit_info`] (or the family default before that
    /// call).
    fn core_info(&self) -> UnitCoreInfo;

    /// Read chip-specific SFRs to populate capability flags, flash/RAM
    /// size, revision, and internal id on `unit`. `unit.id`/`unit.name`
    /// are already set by the façade from [`Driver::supported_units`].
    fn find_unit_info(&mut self, debug: &mut DebugEngine<'_>, unit: &mut UnitInfo) -> Result<()>;

    /// Read the info page, if this family has one. Default: unsupported.
    fn read_info_page(&self, _debug: &mut DebugEngine<'_>, _unit: &UnitInfo) -> Result<Vec<u8>> {
        Err(Error::invariant("this family has no info page"))
    }

    /// Read one of the family's MAC addresses (`index` 0 or 1).
    fn mac_address_read(
        &self,
        _debug: &mut DebugEngine<'_>,
        _unit: &UnitInfo,
        _index: u32,
    ) -> Result<Vec<u8>> {
        Err(Error::invariant("this family has no MAC address"))
    }

    /// Write lock data and/or a MAC address directly to the target
    /// (used when the family can't embed them into the flash image
    /// before writing, e.g. one-byte-lock families' info page).
    fn config_write(
        &self,
        debug: &mut DebugEngine<'_>,
        unit: &UnitInfo,
        mac_address: Option<&[u8]>,
        lock_data: Option<&[u8]>,
    ) -> Result<()>;

    /// Program a materialized flash image.
    fn flash_write(
        &self,
        debug: &mut DebugEngine<'_>,
        unit: &UnitInfo,
        image: &[u8],
        progress: &mut dyn ProgressObserver,
    ) -> Result<()>;

    /// Read an arbitrary flash range, banked or not as the family
    /// requires.
    fn flash_read_block(
        &self,
        debug: &mut DebugEngine<'_>,
        unit: &UnitInfo,
        offset: u32,
        size: u32,
    ) -> Result<Vec<u8>>;

    /// Issue a full-chip erase (asynchronous on the target; the caller
    /// polls [`Driver::erase_check_completed`]).
    fn erase(&self, debug: &mut DebugEngine<'_>) -> Result<()> {
        crate::flash::erase_chip(debug, &self.core_info())
    }

    /// Poll whether a previously issued chip erase has completed.
    fn erase_check_completed(&self, debug: &mut DebugEngine<'_>, unit: &UnitInfo) -> Result<bool>;

    /// Erase a single page (must be page-aligned).
    fn erase_page(&self, debug: &mut DebugEngine<'_>, page_offset: u32) -> Result<bool> {
        crate::flash::erase_page(debug, &self.core_info(), page_offset)
    }

    /// Embed a MAC address into the flash image section store. Returns
    /// `false` (the default) for families with no MAC-in-flash storage,
    /// meaning the caller must fall back to [`Driver::config_write`].
    fn flash_image_embed_mac_address(
        &self,
        _sections: &mut DataSectionStore,
        _unit: &UnitInfo,
        _mac_address: &[u8],
    ) -> bool {
        false
    }

    /// Embed lock data into the flash image section store. Returns
    /// `false` (the default) for one-byte-lock families, meaning the
    /// caller must write the lock byte through the info page instead.
    fn flash_image_embed_lock_data(
        &self,
        _sections: &mut DataSectionStore,
        _unit: &UnitInfo,
        _lock_data: &[u8],
    ) -> bool {
        false
    }

    /// Parse a semicolon-separated qualifier string into this family's
    /// lock-data encoding.
    fn convert_lock_data(&self, qualifiers: &str) -> Result<Vec<u8>>;

    /// Resolve an absolute flash offset to the XDATA source address used
    /// by the hardware CRC-16 verify path ([`crate::flash::verify_by_crc`]),
    /// switching the bank window as a side effect for families whose
    /// flash is bank-switched. Default: flash is directly XDATA-mapped,
    /// no bank switch required (CC251x/111x).
    fn crc_source_address(
        &self,
        _debug: &mut DebugEngine<'_>,
        _info: &UnitCoreInfo,
        addr: u32,
    ) -> Result<u16> {
        Ok(addr as u16)
    }
}

/// Parse `"pages:RANGES"` (or bare `RANGES`) into a page-index iterator,
/// e.g. `"0,2-3"` -> `[0, 2, 3]`. Shared by every family that marks
/// individual pages in its lock data.
pub(crate) fn parse_page_ranges(ranges: &str) -> Result<Vec<usize>> {
    let mut pages = Vec::new();
    for token in ranges.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if let Some((a, b)) = token.split_once('-') {
            let start: usize = a
                .parse()
                .map_err(|_| Error::BadQualifier(format!("pages:{ranges}")))?;
            let end: usize = b
                .parse()
                .map_err(|_| Error::BadQualifier(format!("pages:{ranges}")))?;
            if start > end {
                return Err(Error::BadQualifier(format!("pages:{ranges}")));
            }
            pages.extend(start..=end);
        } else {
            let page: usize = token
                .parse()
                .map_err(|_| Error::BadQualifier(format!("pages:{ranges}")))?;
            pages.push(page);
        }
    }
    Ok(pages)
}

/// Shared "standard" one-byte lock qualifier set used by CC243x and
/// CC251x/111x: `debug` clears bit 0, `boot` clears bit 4, `flash`/
/// `pages` clears bits 1-3, `flash:SIZE` encodes `SIZE`'s index (in
/// `size_table`, inverted and masked to 3 bits) into bits 1-3.
pub(crate) fn convert_lock_data_standard(qualifiers: &str, size_table: &[u32]) -> Result<Vec<u8>> {
    let mut byte = 0xFFu8;
    for part in qualifiers.split(';').map(str::trim).filter(|s| !s.is_empty()) {
        if part == "debug" {
            byte &= !0x01;
        } else if part == "boot" {
            byte &= !0x10;
        } else if part == "flash" || part == "pages" {
            byte &= !0x0E;
        } else if let Some(size_str) = part.strip_prefix("flash:") {
            let size: u32 = size_str
                .parse()
                .map_err(|_| Error::BadQualifier(part.to_string()))?;
            let idx = size_table
                .iter()
                .position(|&s| s == size)
                .ok_or_else(|| Error::BadQualifier(part.to_string()))?;
            let bits = (!(idx as u8)) & 0x07;
            byte = (byte & !0x0E) | (bits << 1);
        } else {
            return Err(Error::BadQualifier(part.to_string()));
        }
    }
    Ok(vec![byte])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_ranges_parse_list_and_ranges() {
        assert_eq!(parse_page_ranges("0,2-3").unwrap(), vec![0, 2, 3]);
        assert_eq!(parse_page_ranges("5").unwrap(), vec![5]);
    }

    #[test]
    fn page_ranges_reject_reversed_range() {
        assert!(parse_page_ranges("5-2").is_err());
    }

    #[test]
    fn standard_set_debug_clears_bit0() {
        let data = convert_lock_data_standard("debug", &[0, 2, 4, 8, 16, 32, 64, 128]).unwrap();
        assert_eq!(data, vec![0xFE]);
    }

    #[test]
    fn standard_set_flash_size_encodes_index() {
        // size_table index of 8 is 3; (~3) & 7 = 0b100; bits 1-3 = 0b1000 -> 0x08.
        let data = convert_lock_data_standard("flash:8", &[0, 2, 4, 8, 16, 32, 64, 128]).unwrap();
        assert_eq!(data[0] & 0x0E, 0x08);
    }

    #[test]
    fn standard_set_unknown_qualifier_fails() {
        assert!(convert_lock_data_standard("bogus", &[0, 1]).is_err());
    }
}
