//! CC2430/CC2431: banked flash like CC253x/254x but a one-byte lock and
//! a single 8-byte MAC address stored at the end of flash.
//!
//! `XREG_FMAP = 0xDF9F` (from `cc_243x.cpp`) puts this family's SFR page
//! at the same `0xDFxx` base as CC251x/111x, but (per spec §4.3.3) its
//! revision/internal-id pair is read from a different offset and it
//! keeps CC253x/254x's banked-flash read path.

use crate::debug::DebugEngine;
use crate::drivers::{convert_lock_data_standard, Driver};
use crate::error::Result;
use crate::flash;
use crate::progress::ProgressObserver;
use crate::section::{DataSection, DataSectionStore};
use crate::unit::{UnitCoreInfo, UnitFlags, UnitInfo};

const SUPPORTED: &[(u16, &str)] = &[(0x8430, "CC2430"), (0x8431, "CC2431")];

const XDATA_REV_INTERNAL_ID: u16 = 0xDF60;
const SFR_FLASH_SIZE: u16 = 0xDF36;

const MAC_SIZE: usize = 8;

/// Candidate flash sizes, in KB, and the `flash:SIZE` index table.
const FLASH_SIZES_KB: &[u32] = &[0, 2, 4, 8, 16, 32, 64, 128];

const SEL_FLASH_INFO_PAGE: u8 = 0x08;

fn core_info() -> UnitCoreInfo {
    UnitCoreInfo {
        lock_size: 1,
        flash_word_size: 2,
        verify_block_size: 1024,
        write_block_size: 1024,
        xbank_offset: 0x8000,
        dma0_cfg_offset: 0x0800,
        dma_data_offset: 0x0800,
        memctr: 0xDFC7,
        fmap: 0xDF9F,
        rndl: 0xDFBD,
        rndh: 0xDFBE,
        fctl: 0xDF70,
        fwdata: 0xDF73,
        faddrl: 0xDF71,
        faddrh: 0xDF72,
        dma0_cfgl: 0xDFD2,
        dma0_cfgh: 0xDFD3,
        dma1_cfgl: 0xDFD4,
        dma1_cfgh: 0xDFD5,
        dma_arm: 0xDFD6,
        dma_req: 0xDFD7,
        dma_irq: 0xDFD1,
        fctl_write: 0x06,
        fctl_erase: 0x01,
        chip_erase_busy_bit: 0x80,
    }
}

/// Driver for CC2430/CC2431.
#[derive(Default)]
pub struct Cc243xDriver;

impl Cc243xDriver {
    /// A fresh driver instance.
    pub fn new() -> Self {
        Cc243xDriver
    }

    fn mac_offset(unit: &UnitInfo) -> u32 {
        unit.actual_flash_size_bytes() as u32 - MAC_SIZE as u32
    }
}

impl Driver for Cc243xDriver {
    fn supported_units(&self) -> &'static [(u16, &'static str)] {
        SUPPORTED
    }

    fn core_info(&self) -> UnitCoreInfo {
        core_info()
    }

    fn find_unit_info(&mut self, debug: &mut DebugEngine<'_>, unit: &mut UnitInfo) -> Result<()> {
        let byte = debug.read_xdata(SFR_FLASH_SIZE, 1)?[0];
        let code = (byte & 0x70) >> 4;
        unit.flash_size_kb = match code {
            1 => 32,
            2 => 64,
            3 => 128,
            _ => 0,
        };
        unit.max_flash_size_kb = 128;
        unit.flash_sizes_kb = vec![32, 64, 128];
        unit.flash_page_size_kb = 2;
        unit.ram_size_kb = 8;
        unit.mac_address_count = 1;
        unit.mac_address_size = MAC_SIZE;
        unit.flags = UnitFlags::HAS_INFO_PAGE | UnitFlags::HAS_MAC_ADDRESS;

        let rev_internal = debug.read_xdata(XDATA_REV_INTERNAL_ID, 2)?;
        unit.revision = rev_internal[0];
        unit.internal_id = rev_internal[1];
        Ok(())
    }

    fn mac_address_read(
        &self,
        debug: &mut DebugEngine<'_>,
        unit: &UnitInfo,
        index: u32,
    ) -> Result<Vec<u8>> {
        if index != 0 {
            return Err(crate::error::Error::invariant(
                "CC243x has only one MAC address",
            ));
        }
        let offset = Self::mac_offset(unit);
        self.flash_read_block(debug, unit, offset, MAC_SIZE as u32)
    }

    fn config_write(
        &self,
        debug: &mut DebugEngine<'_>,
        unit: &UnitInfo,
        mac_address: Option<&[u8]>,
        lock_data: Option<&[u8]>,
    ) -> Result<()> {
        if let Some(mac) = mac_address {
            let info = self.core_info();
            let offset = Self::mac_offset(unit);
            let bank = offset / crate::unit::FLASH_BANK_SIZE;
            debug.write_xdata(info.fmap, &[bank as u8])?;
            let mut padded = mac.to_vec();
            padded.resize(info.write_block_size as usize, 0xFF);
            flash::slow_write(debug, &info, &padded, &mut crate::progress::NullProgress)?;
        }
        if let Some(lock) = lock_data {
            let current_config = debug.read_config()?;
            flash::write_info_page_lock(
                debug,
                &self.core_info(),
                current_config,
                SEL_FLASH_INFO_PAGE,
                lock[0],
            )?;
        }
        Ok(())
    }

    fn flash_write(
        &self,
        debug: &mut DebugEngine<'_>,
        _unit: &UnitInfo,
        image: &[u8],
        progress: &mut dyn ProgressObserver,
    ) -> Result<()> {
        flash::slow_write(debug, &self.core_info(), image, progress)
    }

    fn flash_read_block(
        &self,
        debug: &mut DebugEngine<'_>,
        _unit: &UnitInfo,
        offset: u32,
        size: u32,
    ) -> Result<Vec<u8>> {
        flash::flash_read_block_banked(debug, &self.core_info(), offset, size)
    }

    fn erase_check_completed(&self, debug: &mut DebugEngine<'_>, _unit: &UnitInfo) -> Result<bool> {
        let status = debug.read_status()?;
        Ok(status & self.core_info().chip_erase_busy_bit == 0)
    }

    fn flash_image_embed_mac_address(
        &self,
        sections: &mut DataSectionStore,
        unit: &UnitInfo,
        mac_address: &[u8],
    ) -> bool {
        let offset = Self::mac_offset(unit);
        sections.add_section_overwrite(DataSection::new(offset, mac_address.to_vec()));
        true
    }

    fn convert_lock_data(&self, qualifiers: &str) -> Result<Vec<u8>> {
        convert_lock_data_standard(qualifiers, FLASH_SIZES_KB)
    }

    fn crc_source_address(&self, debug: &mut DebugEngine<'_>, info: &UnitCoreInfo, addr: u32) -> Result<u16> {
        let bank = addr / crate::unit::FLASH_BANK_SIZE;
        let bank_off = addr % crate::unit::FLASH_BANK_SIZE;
        debug.write_xdata(info.fmap, &[bank as u8])?;
        Ok((info.xbank_offset + bank_off) as u16)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_offset_is_8_bytes_before_flash_end() {
        let mut unit = UnitInfo::unrecognized(0x8430);
        unit.flash_size_kb = 32;
        unit.max_flash_size_kb = 128;
        assert_eq!(Cc243xDriver::mac_offset(&unit), 32 * 1024 - 8);
    }

    #[test]
    fn flash_size_qualifier_uses_family_table() {
        let driver = Cc243xDriver::new();
        assert!(driver.convert_lock_data("flash:64").is_ok());
        assert!(driver.convert_lock_data("flash:96").is_err());
    }
}
