//! Target identity, capability, and register-map data.

use bitflags::bitflags;

bitflags! {
    /// Capability flags read (or inferred) from the target during
    /// [`crate::programmer::Programmer::connect`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct UnitFlags: u32 {
        /// The part has a USB controller (irrelevant to programming, but
        /// reported because the original firmware reports it).
        const HAS_USB = 1 << 0;
        /// The part supports MAC-address read/write.
        const HAS_MAC_ADDRESS = 1 << 1;
        /// The part has a readable info page.
        const HAS_INFO_PAGE = 1 << 2;
    }
}

/// Identity and capabilities read from the target chip.
#[derive(Debug, Clone)]
pub struct UnitInfo {
    /// 16-bit chip ID as reported by the dongle's `GET_STATE` request.
    pub id: u16,
    /// Printable name, e.g. `"CC2530"`, or a synthesized `"CC<hex id>"`
    /// when the id matched no known family.
    pub name: String,
    /// Family-internal chip id byte.
    pub internal_id: u8,
    /// Silicon revision byte.
    pub revision: u8,
    /// Capability flags.
    pub flags: UnitFlags,
    /// Flash size in KB as read from the target, 0 if unknown.
    pub flash_size_kb: u32,
    /// Largest flash size this family can have.
    pub max_flash_size_kb: u32,
    /// The family's candidate flash sizes, in KB.
    pub flash_sizes_kb: Vec<u32>,
    /// SRAM size in KB.
    pub ram_size_kb: u32,
    /// Number of MAC addresses this part stores (0, 1, or 2).
    pub mac_address_count: u32,
    /// MAC address length in bytes (6 or 8).
    pub mac_address_size: usize,
    /// Flash page size in KB.
    pub flash_page_size_kb: u32,
}

impl UnitInfo {
    /// A placeholder used before the chip ID has been matched to any
    /// driver: synthesized name, no capabilities, no known flash size.
    pub fn unrecognized(id: u16) -> Self {
        UnitInfo {
            id,
            name: format!("CC{:04X}", id),
            internal_id: 0,
            revision: 0,
            flags: UnitFlags::empty(),
            flash_size_kb: 0,
            max_flash_size_kb: 0,
            flash_sizes_kb: Vec::new(),
            ram_size_kb: 0,
            mac_address_count: 0,
            mac_address_size: 0,
            flash_page_size_kb: 0,
        }
    }

    /// Size in bytes of flash actually present: the reported size if
    /// nonzero, else the family's maximum.
    pub fn actual_flash_size_bytes(&self) -> usize {
        let kb = if self.flash_size_kb != 0 {
            self.flash_size_kb
        } else {
            self.max_flash_size_kb
        };
        1024 * kb as usize
    }

    /// `true` if this unit matched a known family driver.
    pub fn is_supported(&self) -> bool {
        self.max_flash_size_kb != 0
    }
}

/// The per-family register map and block-size table.
///
/// Immutable after driver construction, except that a driver may adjust
/// block sizes for small variants of its own family (e.g. CC2543/4/5).
#[derive(Debug, Clone, Copy)]
pub struct UnitCoreInfo {
    /// Lock-data size in bytes (1 or 16).
    pub lock_size: usize,
    /// Bytes per flash word (the FADDR unit).
    pub flash_word_size: u32,
    /// Block size used by the CRC verify path.
    pub verify_block_size: u32,
    /// Block size used by the write path.
    pub write_block_size: u32,
    /// XDATA offset of the banked-flash read window.
    pub xbank_offset: u32,
    /// SRAM offset of the first DMA descriptor block.
    pub dma0_cfg_offset: u32,
    /// SRAM offset of the DMA data buffer(s).
    pub dma_data_offset: u32,

    /// XDATA address of MEMCTR.
    pub memctr: u16,
    /// XDATA address of FMAP.
    pub fmap: u16,
    /// XDATA address of RNDL.
    pub rndl: u16,
    /// XDATA address of RNDH.
    pub rndh: u16,
    /// XDATA address of FCTL.
    pub fctl: u16,
    /// XDATA address of FWDATA.
    pub fwdata: u16,
    /// XDATA address of FADDRL.
    pub faddrl: u16,
    /// XDATA address of FADDRH.
    pub faddrh: u16,
    /// XDATA address of DMA channel 0 config low byte.
    pub dma0_cfgl: u16,
    /// XDATA address of DMA channel 0 config high byte.
    pub dma0_cfgh: u16,
    /// XDATA address of the DMA channel 1-4 chain base pointer, low
    /// byte. Points at a 4-entry, 8-byte-stride descriptor chain: channel
    /// 1's descriptor sits at the base address, channel 2's at base+8,
    /// and so on through channel 4 at base+24. Only the CC253x/254x fast
    /// write path (§4.3.1) uses this; the other families leave it at the
    /// family's unused SFR slot.
    pub dma1_cfgl: u16,
    /// XDATA address of the DMA channel 1-4 chain base pointer, high byte.
    pub dma1_cfgh: u16,
    /// XDATA address of DMAARM.
    pub dma_arm: u16,
    /// XDATA address of DMAREQ.
    pub dma_req: u16,
    /// XDATA address of DMAIRQ.
    pub dma_irq: u16,

    /// Value written to FCTL to trigger a flash write.
    pub fctl_write: u8,
    /// Value written to FCTL to trigger a page erase.
    pub fctl_erase: u8,
    /// Bit in the debug status byte that is set while a full-chip erase
    /// is in progress. Documented in spec as "varies by part" — each
    /// family driver supplies its own value rather than a single global
    /// constant.
    pub chip_erase_busy_bit: u8,
}

/// `FCTL` busy bit: a previous flash write/erase has not finished.
pub const FCTL_BUSY: u8 = 0x80;
/// `FCTL` abort bit: a page erase was aborted (e.g. targeted a locked page).
pub const FCTL_ABORT: u8 = 0x20;
/// Value of the flash-empty byte used to fill images and detect
/// already-blank blocks.
pub const FLASH_EMPTY_BYTE: u8 = 0xFF;
/// Size in bytes of one flash bank, used for banked reads on CC253x/254x.
pub const FLASH_BANK_SIZE: u32 = 1024 * 32;
