//! `path[:type[:offset]]` parsing for `--write`/`--read` arguments
//! (§6): `type` selects the file format (`bin`/`binary`/`hex`/`ihex`);
//! `offset` is a base load address for a raw binary, hex or decimal.
//!
//! When `type` is omitted it is inferred from the path's extension
//! (`.hex`/`.ihex` -> HEX, everything else -> binary), matching §6's
//! "selected by file extension ... or by explicit type suffix" rule.

use std::path::{Path, PathBuf};

use cc_core::error::{Error, Result};
use cc_core::hex;
use cc_core::section::{DataSection, DataSectionStore};

/// File format named by a path spec's `type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Raw binary image.
    Bin,
    /// Intel HEX text.
    Hex,
}

/// A parsed `path[:type[:offset]]` argument.
#[derive(Debug, Clone)]
pub struct FileSpec {
    /// Path to read or write.
    pub path: PathBuf,
    /// Format to read/write the file as.
    pub kind: FileKind,
    /// Base load address for a raw binary (ignored for HEX, which
    /// carries its own addresses).
    pub offset: u32,
}

fn kind_from_extension(path: &Path) -> FileKind {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("hex") || ext.eq_ignore_ascii_case("ihex") => FileKind::Hex,
        _ => FileKind::Bin,
    }
}

fn parse_offset(s: &str) -> Result<u32> {
    let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(rest) => (rest, 16),
        None => (s, 10),
    };
    u32::from_str_radix(digits, radix).map_err(|_| Error::invariant(format!("bad offset: {s}")))
}

/// Parse a `--write`/`--read` argument's path spec.
pub fn parse_file_spec(spec: &str) -> Result<FileSpec> {
    let mut parts = spec.split(':');
    let path = PathBuf::from(parts.next().unwrap_or_default());
    let kind = match parts.next() {
        None | Some("") => kind_from_extension(&path),
        Some("bin") | Some("binary") => FileKind::Bin,
        Some("hex") | Some("ihex") => FileKind::Hex,
        Some(other) => return Err(Error::invariant(format!("unknown file type: {other}"))),
    };
    let offset = match parts.next() {
        None => 0,
        Some(s) => parse_offset(s)?,
    };
    if parts.next().is_some() {
        return Err(Error::invariant(format!("too many ':' fields in path spec: {spec}")));
    }
    Ok(FileSpec { path, kind, offset })
}

/// Load a [`DataSectionStore`] from a `--write`/`--verify` path spec.
pub fn load_image(spec: &FileSpec) -> Result<DataSectionStore> {
    let bytes = std::fs::read(&spec.path)?;
    match spec.kind {
        FileKind::Hex => {
            let text = String::from_utf8(bytes).map_err(|_| Error::invariant("HEX file is not valid UTF-8"))?;
            hex::load(&text)
        }
        FileKind::Bin => {
            let mut store = DataSectionStore::new();
            store.add_section(DataSection::new(spec.offset, bytes))?;
            Ok(store)
        }
    }
}

/// Write a [`DataSectionStore`] out per a `--read` path spec.
pub fn save_image(spec: &FileSpec, store: &DataSectionStore) -> Result<()> {
    match spec.kind {
        FileKind::Hex => std::fs::write(&spec.path, hex::save(store))?,
        FileKind::Bin => std::fs::write(&spec.path, store.create_image(cc_core::unit::FLASH_EMPTY_BYTE))?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_path_infers_kind_from_extension() {
        let spec = parse_file_spec("image.hex").unwrap();
        assert_eq!(spec.kind, FileKind::Hex);
        assert_eq!(spec.offset, 0);

        let spec = parse_file_spec("image.bin").unwrap();
        assert_eq!(spec.kind, FileKind::Bin);
    }

    #[test]
    fn explicit_type_overrides_extension() {
        let spec = parse_file_spec("image.dat:hex").unwrap();
        assert_eq!(spec.kind, FileKind::Hex);
    }

    #[test]
    fn offset_parses_hex_and_decimal() {
        let spec = parse_file_spec("image.bin:bin:0x8000").unwrap();
        assert_eq!(spec.offset, 0x8000);

        let spec = parse_file_spec("image.bin:bin:32768").unwrap();
        assert_eq!(spec.offset, 0x8000);
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(parse_file_spec("image.bin:weird").is_err());
    }
}
