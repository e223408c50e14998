//! Intel-HEX codec.
//!
//! Reads and writes the sparse [`DataSectionStore`] model directly;
//! there is no separate "HEX document" type. A HEX file's address
//! prefix records (Extended Segment/Linear Address) are folded into the
//! addresses of the Data records that follow them as they're read, and
//! reconstructed on write whenever an emitted record would otherwise
//! cross a 64 KiB boundary.

use crate::error::{Error, Result};
use crate::section::{DataSection, DataSectionStore};

const MAX_RECORD_DATA_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordType {
    Data,
    Eof,
    ExtendedSegmentAddress,
    StartSegmentAddress,
    ExtendedLinearAddress,
    StartLinearAddress,
}

struct Record {
    rtype: RecordType,
    address: u16,
    data: Vec<u8>,
}

fn hex_nibble(c: u8, line: u32) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        _ => Err(Error::HexBadCharacter { line }),
    }
}

fn parse_hex_bytes(s: &str, line: u32) -> Result<Vec<u8>> {
    let chars = s.as_bytes();
    if chars.len() % 2 != 0 {
        return Err(Error::HexBadRecordSize { line });
    }
    let mut out = Vec::with_capacity(chars.len() / 2);
    for pair in chars.chunks(2) {
        let hi = hex_nibble(pair[0], line)?;
        let lo = hex_nibble(pair[1], line)?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn parse_record_line(raw: &str, line: u32, check_checksum: bool) -> Result<Record> {
    let trimmed = raw.trim_end_matches(['\r', '\n']);
    if trimmed.is_empty() {
        return Err(Error::HexMissingColon { line });
    }
    let body = trimmed
        .strip_prefix(':')
        .ok_or(Error::HexMissingColon { line })?;

    let raw_bytes = parse_hex_bytes(body, line)?;
    // byte_count + addr_hi + addr_lo + type + checksum, at minimum.
    if raw_bytes.len() < 5 || raw_bytes.len() - 5 > MAX_RECORD_DATA_LEN {
        return Err(Error::HexBadRecordSize { line });
    }

    let byte_count = raw_bytes[0] as usize;
    let address = ((raw_bytes[1] as u16) << 8) | raw_bytes[2] as u16;
    let type_field = raw_bytes[3];
    let trailer = &raw_bytes[4..];

    if trailer.len() != byte_count + 1 {
        return Err(Error::HexByteCountMismatch { line });
    }
    let data = trailer[..byte_count].to_vec();
    let checksum = trailer[byte_count];

    if check_checksum {
        let sum = raw_bytes[..raw_bytes.len() - 1]
            .iter()
            .fold(0u8, |acc, &b| acc.wrapping_add(b));
        let expected = (!sum).wrapping_add(1);
        if checksum != expected {
            return Err(Error::HexChecksumMismatch { line });
        }
    }

    let rtype = match type_field {
        0 => RecordType::Data,
        1 => RecordType::Eof,
        2 => RecordType::ExtendedSegmentAddress,
        3 => RecordType::StartSegmentAddress,
        4 => RecordType::ExtendedLinearAddress,
        5 => RecordType::StartLinearAddress,
        _ => return Err(Error::HexUnknownRecordType { line }),
    };

    match rtype {
        RecordType::ExtendedSegmentAddress | RecordType::ExtendedLinearAddress => {
            if address != 0 || data.len() != 2 {
                return Err(Error::HexBadPrefixRecord { line });
            }
        }
        RecordType::StartSegmentAddress | RecordType::StartLinearAddress => {
            if address != 0 || data.len() != 4 {
                return Err(Error::HexBadPrefixRecord { line });
            }
        }
        RecordType::Eof => {
            if address != 0 || !data.is_empty() {
                return Err(Error::HexBadPrefixRecord { line });
            }
        }
        RecordType::Data => {}
    }

    Ok(Record {
        rtype,
        address,
        data,
    })
}

/// Parse a complete Intel-HEX document into a [`DataSectionStore`].
///
/// Checksum validation is always performed; use [`load_unchecked`] to
/// skip it (some dongle firmware dumps omit valid checksums on EOF-only
/// lines from other tools).
pub fn load(text: &str) -> Result<DataSectionStore> {
    load_impl(text, true)
}

/// Like [`load`], but does not validate record checksums.
pub fn load_unchecked(text: &str) -> Result<DataSectionStore> {
    load_impl(text, false)
}

fn load_impl(text: &str, check_checksum: bool) -> Result<DataSectionStore> {
    let mut store = DataSectionStore::new();
    let mut prefix: u32 = 0;
    let mut current: Option<DataSection> = None;
    let mut last_line = 0u32;

    for (idx, raw_line) in text.lines().enumerate() {
        let line = (idx + 1) as u32;
        last_line = line;
        if raw_line.trim().is_empty() {
            continue;
        }
        let record = parse_record_line(raw_line, line, check_checksum)?;
        match record.rtype {
            RecordType::Data => {
                let full_address = prefix | record.address as u32;
                let contiguous = current
                    .as_ref()
                    .map(|s| s.next_address() == full_address)
                    .unwrap_or(false);
                if contiguous {
                    current.as_mut().unwrap().bytes.extend_from_slice(&record.data);
                } else {
                    flush(&mut current, &mut store, line)?;
                    current = Some(DataSection::new(full_address, record.data));
                }
            }
            RecordType::ExtendedSegmentAddress => {
                prefix = (((record.data[0] as u32) << 8) | record.data[1] as u32) << 4;
            }
            RecordType::ExtendedLinearAddress => {
                prefix = (((record.data[0] as u32) << 8) | record.data[1] as u32) << 16;
            }
            RecordType::StartSegmentAddress | RecordType::StartLinearAddress => {}
            RecordType::Eof => {
                flush(&mut current, &mut store, line)?;
                return Ok(store);
            }
        }
    }
    flush(&mut current, &mut store, last_line)?;
    Ok(store)
}

fn flush(current: &mut Option<DataSection>, store: &mut DataSectionStore, line: u32) -> Result<()> {
    if let Some(section) = current.take() {
        store
            .add_section(section)
            .map_err(|_| Error::HexSectionOverlap { line })?;
    }
    Ok(())
}

fn checksum_byte(bytes: &[u8]) -> u8 {
    let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
    (!sum).wrapping_add(1)
}

fn write_record(out: &mut String, rtype: u8, address: u16, data: &[u8]) {
    let mut raw = Vec::with_capacity(4 + data.len());
    raw.push(data.len() as u8);
    raw.push((address >> 8) as u8);
    raw.push(address as u8);
    raw.push(rtype);
    raw.extend_from_slice(data);
    let checksum = checksum_byte(&raw);

    out.push(':');
    for b in &raw {
        out.push_str(&format!("{:02X}", b));
    }
    out.push_str(&format!("{:02X}", checksum));
    out.push_str("\r\n");
}

/// Serialize `store` as Intel HEX text, with CR+LF line terminators.
///
/// Emits an Extended Segment Address record whenever the next Data
/// record would otherwise cross a 64 KiB segment boundary, Data records
/// of at most 16 bytes, and a trailing EOF record.
pub fn save(store: &DataSectionStore) -> String {
    let mut out = String::new();
    let mut last_base: Option<u32> = None;

    for section in store.sections() {
        let mut offset = 0usize;
        while offset < section.len() {
            let addr = section.address + offset as u32;
            let base = addr & 0xFFFF_0000;
            if last_base != Some(base) {
                let segment = ((base >> 16) << 12) as u16;
                write_record(&mut out, 2, 0, &[(segment >> 8) as u8, segment as u8]);
                last_base = Some(base);
            }
            let chunk_len = (section.len() - offset).min(16);
            let chunk = &section.bytes[offset..offset + chunk_len];
            write_record(&mut out, 0, (addr & 0xFFFF) as u16, chunk);
            offset += chunk_len;
        }
    }
    write_record(&mut out, 1, 0, &[]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_record(address: u16, data: &[u8]) -> String {
        let mut out = String::new();
        write_record(&mut out, 0, address, data);
        out
    }

    fn eof_record() -> String {
        let mut out = String::new();
        write_record(&mut out, 1, 0, &[]);
        out
    }

    #[test]
    fn two_disjoint_sections() {
        let text = format!(
            "{}{}{}",
            data_record(0x0000, &[0xAA; 16]),
            data_record(0x0100, &[0x55; 8]),
            eof_record()
        );
        let store = load(&text).unwrap();
        assert_eq!(store.sections().len(), 2);
        assert_eq!(store.sections()[0].address, 0x0000);
        assert_eq!(store.sections()[1].address, 0x0100);
        assert_eq!(store.create_image(0xFF).len(), 0x108);
    }

    #[test]
    fn contiguous_records_merge() {
        let text = format!(
            "{}{}{}",
            data_record(0x0000, &[0xAA; 16]),
            data_record(0x0010, &[0xAA; 16]),
            eof_record()
        );
        let store = load(&text).unwrap();
        assert_eq!(store.sections().len(), 1);
        assert_eq!(store.sections()[0].address, 0x0000);
        assert_eq!(store.sections()[0].len(), 32);
    }

    #[test]
    fn overlapping_records_fail() {
        let text = format!(
            "{}{}{}",
            data_record(0x0000, &[0xAA; 16]),
            data_record(0x0008, &[0xAA; 16]),
            eof_record()
        );
        let err = load(&text).unwrap_err();
        assert!(matches!(err, Error::HexSectionOverlap { .. }));
    }

    #[test]
    fn checksum_mismatch_detected() {
        let mut text = data_record(0x0000, &[0xAA; 16]);
        let len = text.trim_end().len();
        let corrupt = if text.as_bytes()[len - 1] == b'0' { '1' } else { '0' };
        text.replace_range(len - 1..len, &corrupt.to_string());
        let err = load(&text).unwrap_err();
        assert!(matches!(err, Error::HexChecksumMismatch { .. }));
    }

    #[test]
    fn round_trip() {
        let mut store = DataSectionStore::new();
        store
            .add_section(DataSection::new(0x0000, vec![0xAA; 16]))
            .unwrap();
        store
            .add_section(DataSection::new(0x0100, vec![0x55; 8]))
            .unwrap();
        let text = save(&store);
        let reloaded = load(&text).unwrap();
        assert_eq!(store, reloaded);
    }

    #[test]
    fn every_record_checksum_sums_to_zero() {
        let mut store = DataSectionStore::new();
        store
            .add_section(DataSection::new(0x0000, vec![0x12; 40]))
            .unwrap();
        let text = save(&store);
        for line in text.lines() {
            let body = &line[1..];
            let bytes = parse_hex_bytes(body, 1).unwrap();
            let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
            assert_eq!(sum, 0);
        }
    }

    #[test]
    fn crosses_segment_boundary() {
        let mut store = DataSectionStore::new();
        store
            .add_section(DataSection::new(0x1_0000 - 8, vec![0x33; 16]))
            .unwrap();
        let text = save(&store);
        assert!(text.contains(":02000002"));
        let reloaded = load(&text).unwrap();
        assert_eq!(store, reloaded);
    }
}
