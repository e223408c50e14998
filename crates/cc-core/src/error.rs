//! Error types for cc-core
//!
//! Mirrors the teacher's split: a small `Copy` enum for the hot path
//! (protocol/semantic errors raised while talking to the target) plus
//! line-carrying variants for the HEX parser, all derived with `thiserror`.

/// A 1-based source line number in a HEX file.
pub type LineNumber = u32;

/// Errors surfaced by cc-core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --- Transport errors (fatal to the current session) ---
    /// The USB transport failed to complete a transfer.
    #[error("USB transfer failed: {0}")]
    Transport(String),
    /// A transfer did not complete within its timeout.
    #[error("USB transfer timed out")]
    TransportTimeout,

    // --- Protocol errors ---
    /// The target did not report `CPU_HALTED` after a debug-mode reset.
    #[error("target did not halt after reset")]
    HaltFailed,
    /// Full-chip erase did not complete within the bounded poll window.
    #[error("chip erase timed out")]
    EraseTimeout,
    /// The 16-bit chip ID read from the target matches no known family.
    #[error("unrecognized chip id 0x{0:04X}")]
    UnrecognizedChip(u16),
    /// An operation was attempted on a target with no matching driver.
    #[error("no driver selected for this target")]
    NoDriver,
    /// The debug status register reported an unexpected bit pattern for
    /// the operation being performed.
    #[error("unexpected debug status: {0}")]
    UnexpectedStatus(String),

    // --- Data errors (HEX parsing, each carrying its 1-based line number) ---
    /// A record did not start with `:`.
    #[error("line {line}: record missing leading ':'")]
    HexMissingColon {
        /// Offending line.
        line: LineNumber,
    },
    /// A record contained a non-hex-digit character.
    #[error("line {line}: bad hex character")]
    HexBadCharacter {
        /// Offending line.
        line: LineNumber,
    },
    /// A record's hex payload had odd length, or exceeded the maximum
    /// record size.
    #[error("line {line}: record size odd or too long")]
    HexBadRecordSize {
        /// Offending line.
        line: LineNumber,
    },
    /// The declared byte count did not match the number of data bytes
    /// actually present.
    #[error("line {line}: byte count does not match data length")]
    HexByteCountMismatch {
        /// Offending line.
        line: LineNumber,
    },
    /// The record type field named a value outside 0..=5.
    #[error("line {line}: unknown record type")]
    HexUnknownRecordType {
        /// Offending line.
        line: LineNumber,
    },
    /// An Extended Segment/Linear/Start Linear Address record had a
    /// nonzero address field or an unexpected data length.
    #[error("line {line}: malformed address/start record")]
    HexBadPrefixRecord {
        /// Offending line.
        line: LineNumber,
    },
    /// The one's-complement checksum did not sum to zero mod 256.
    #[error("line {line}: checksum mismatch")]
    HexChecksumMismatch {
        /// Offending line.
        line: LineNumber,
    },
    /// Flushing the reader's in-progress section into the store collided
    /// with a previously loaded section.
    #[error("line {line}: section overlaps a previously loaded section")]
    HexSectionOverlap {
        /// Offending line.
        line: LineNumber,
    },

    /// A non-HEX attempt to insert an overlapping section without
    /// `overwrite` was rejected.
    #[error("section at 0x{address:06X} (len {len}) overlaps an existing section")]
    SectionOverlap {
        /// Base address of the rejected section.
        address: u32,
        /// Length in bytes of the rejected section.
        len: usize,
    },

    // --- Semantic errors ---
    /// The image to write is larger than the target's physical flash.
    #[error("image of {image_len} bytes exceeds flash size of {flash_len} bytes")]
    ImageExceedsFlash {
        /// Materialized image length.
        image_len: usize,
        /// Physical flash size in bytes.
        flash_len: usize,
    },
    /// A supplied MAC address did not match the family's expected length.
    #[error("MAC address must be {expected} bytes, got {actual}")]
    BadMacLength {
        /// Expected length in bytes.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },
    /// The requested flash-size override is not one of the family's
    /// candidate sizes.
    #[error("flash size {0} KB is not a supported size for this chip")]
    BadFlashSize(u32),
    /// A lock-qualifier string named an unknown or malformed qualifier.
    #[error("unrecognized lock qualifier: {0}")]
    BadQualifier(String),
    /// Raw lock data did not match the family's expected byte count.
    #[error("lock data must be {expected} bytes, got {actual}")]
    BadLockDataSize {
        /// Expected length in bytes.
        expected: usize,
        /// Length actually supplied.
        actual: usize,
    },
    /// Two requested options are mutually exclusive (e.g. write-mac with
    /// preserve-mac).
    #[error("incompatible options: {0}")]
    IncompatibleOptions(String),
    /// The target refused the operation because it is debug-locked.
    #[error("target is locked; erase is required before further access")]
    TargetLocked,
    /// A read-back comparison did not match the expected data.
    #[error("verify failed at offset 0x{offset:06X}: expected 0x{expected:02X}, got 0x{actual:02X}")]
    VerifyMismatch {
        /// Offset within the compared range.
        offset: u32,
        /// Expected byte value.
        expected: u8,
        /// Byte value actually read back.
        actual: u8,
    },
    /// The hardware CRC-16 did not match the host-computed CRC-16 over
    /// the same bytes.
    #[error("CRC verify failed at offset 0x{offset:06X}: expected 0x{expected:04X}, hardware reported 0x{actual:04X}")]
    CrcMismatch {
        /// Offset of the first byte of the mismatching sub-block.
        offset: u32,
        /// CRC-16 computed host-side over the section bytes.
        expected: u16,
        /// CRC-16 reported by the target's DMA/RND hardware.
        actual: u16,
    },

    // --- Internal invariant violations ---
    /// An operation that requires a capability (e.g. MAC support) was
    /// requested against a driver that lacks it.
    #[error("invariant violated at {location}: {message}")]
    Invariant {
        /// `file:line` of the check that failed.
        location: String,
        /// Human-readable explanation.
        message: String,
    },

    /// Plain I/O error, e.g. opening a HEX/bin file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Build an [`Error::Invariant`] tagged with the caller's source
    /// location (see `Location::caller`).
    #[track_caller]
    pub fn invariant(message: impl Into<String>) -> Self {
        let loc = std::panic::Location::caller();
        Error::Invariant {
            location: format!("{}:{}", loc.file(), loc.line()),
            message: message.into(),
        }
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
