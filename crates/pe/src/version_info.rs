//! Codec for `RT_VERSION`'s `VS_VERSIONINFO` tree: a recursive, 4-byte-aligned, self-describing
//! structure of headers (`wLength`, `wValueLength`, `wType`, `szKey`) each followed by an optional
//! value and/or child nodes.
//!
//! Every node boundary, and the boundary between a node's key and its value/children, is rounded
//! up to a multiple of 4 bytes — but a node's own `wLength` is the *unrounded* distance from its
//! start to the end of its last child, so a leaf whose value ends on an odd offset reports an odd
//! `wLength`. The parent re-aligns before placing the next sibling regardless. This mirrors the
//! original resource compiler's output and must be reproduced exactly for `wLength` fields to
//! match byte-for-byte.

use crate::bytes::{Reader, Writer};
use crate::error::{Error, ParseFailedSnafu};
use crate::model::{FixedFileInfo, StringTable, Translation, VersionInfo};
use snafu::prelude::*;

const FIXED_FILE_INFO_SIZE: usize = 52;

struct NodeHeader {
    node_start: usize,
    w_length: u16,
    w_value_length: u16,
    w_type: u16,
    key: String,
}

impl NodeHeader {
    fn end(&self) -> usize {
        self.node_start + self.w_length as usize
    }
}

fn read_node_header(r: &mut Reader) -> Result<NodeHeader, Error> {
    let node_start = r.position();
    let w_length = r.read_u16()?;
    let w_value_length = r.read_u16()?;
    let w_type = r.read_u16()?;
    let key = r.read_wstring_nul()?;
    r.align4();
    Ok(NodeHeader { node_start, w_length, w_value_length, w_type, key })
}

fn parse_fixed_file_info(bytes: &[u8]) -> Result<FixedFileInfo, Error> {
    ensure!(
        bytes.len() >= FIXED_FILE_INFO_SIZE,
        ParseFailedSnafu { reason: "VS_FIXEDFILEINFO truncated" }
    );
    let u32_at = |offset: usize| u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap());
    Ok(FixedFileInfo {
        signature: u32_at(0),
        struc_version: u32_at(4),
        file_version_ms: u32_at(8),
        file_version_ls: u32_at(12),
        product_version_ms: u32_at(16),
        product_version_ls: u32_at(20),
        file_flags_mask: u32_at(24),
        file_flags: u32_at(28),
        file_os: u32_at(32),
        file_type: u32_at(36),
        file_subtype: u32_at(40),
        file_date_ms: u32_at(44),
        file_date_ls: u32_at(48),
    })
}

fn encode_fixed_file_info(info: &FixedFileInfo) -> Vec<u8> {
    let mut buf = Vec::with_capacity(FIXED_FILE_INFO_SIZE);
    for field in [
        info.signature,
        info.struc_version,
        info.file_version_ms,
        info.file_version_ls,
        info.product_version_ms,
        info.product_version_ls,
        info.file_flags_mask,
        info.file_flags,
        info.file_os,
        info.file_type,
        info.file_subtype,
        info.file_date_ms,
        info.file_date_ls,
    ] {
        buf.extend_from_slice(&field.to_le_bytes());
    }
    buf
}

/// Parses an 8 hex-digit `StringTable` key (`wwwwcccc`, language then code page).
fn parse_translation_key(key: &str) -> Option<Translation> {
    let value = u32::from_str_radix(key, 16).ok()?;
    Some(Translation { language: (value >> 16) as u16, code_page: value as u16 })
}

fn format_translation_key(translation: Translation) -> String {
    format!("{:04x}{:04x}", translation.language, translation.code_page)
}

fn parse_string_file_info(r: &mut Reader, end: usize) -> Result<Vec<StringTable>, Error> {
    let mut tables = Vec::new();
    while r.position() < end {
        let table_header = read_node_header(r)?;
        let table_end = table_header.end();
        let encoding = parse_translation_key(&table_header.key);

        let mut strings = Vec::new();
        while r.position() < table_end {
            let entry_header = read_node_header(r)?;
            let entry_end = entry_header.end();
            let value = if entry_header.w_value_length > 0 {
                r.read_wstring_units(entry_header.w_value_length as usize)?
            } else {
                String::new()
            };
            strings.push((entry_header.key, value));
            r.set_position(entry_end);
            r.align4();
        }
        tables.push(StringTable { encoding, strings });
        r.set_position(table_end);
        r.align4();
    }
    Ok(tables)
}

fn parse_var_file_info(r: &mut Reader, end: usize) -> Result<Vec<Translation>, Error> {
    let mut translations = Vec::new();
    while r.position() < end {
        let entry_header = read_node_header(r)?;
        let entry_end = entry_header.end();
        if entry_header.key == "Translation" {
            let byte_len = entry_header.w_value_length as usize;
            let count = byte_len / 4;
            for _ in 0..count {
                let language = r.read_u16()?;
                let code_page = r.read_u16()?;
                translations.push(Translation { language, code_page });
            }
        }
        r.set_position(entry_end);
        r.align4();
    }
    Ok(translations)
}

/// Deserializes a single `RT_VERSION` resource's raw bytes. `language_id` is supplied by the
/// caller since it comes from the resource directory entry, not the structure itself.
pub fn deserialize(data: &[u8], language_id: u16) -> Result<VersionInfo, Error> {
    let mut r = Reader::new(data);
    let root = read_node_header(&mut r)?;
    ensure!(
        root.key == "VS_VERSION_INFO",
        ParseFailedSnafu { reason: "root node is not VS_VERSION_INFO" }
    );

    let fixed = if root.w_value_length > 0 {
        let bytes = r.read_bytes(root.w_value_length as usize)?;
        Some(parse_fixed_file_info(bytes)?)
    } else {
        None
    };
    r.align4();

    let end = root.end().min(data.len());
    let mut string_tables = Vec::new();
    let mut supported_translations = Vec::new();
    while r.position() < end {
        let child = read_node_header(&mut r)?;
        let child_end = child.end();
        match child.key.as_str() {
            "StringFileInfo" => string_tables = parse_string_file_info(&mut r, child_end)?,
            "VarFileInfo" => supported_translations = parse_var_file_info(&mut r, child_end)?,
            _ => {}
        }
        r.set_position(child_end);
        r.align4();
    }

    Ok(VersionInfo { language_id, fixed, string_tables, supported_translations })
}

/// Writes one node: header, then the aligned value (if any), then each child (aligned before it
/// is written). The node's own `wLength` is left unrounded, matching the original encoder.
fn write_node(w: &mut Writer, key: &str, w_type: u16, w_value_length: u16, value: &[u8], children: impl FnOnce(&mut Writer)) {
    let node_start = w.position();
    w.write_u16(0); // patched below
    w.write_u16(w_value_length);
    w.write_u16(w_type);
    w.write_wstring_nul(key);
    w.align4();
    if !value.is_empty() {
        w.write_bytes(value);
    }
    children(w);
    let total = w.position() - node_start;
    w.patch_u16(node_start, total as u16);
}

fn write_string_entry(w: &mut Writer, name: &str, value: &str) {
    let units: Vec<u16> = value.encode_utf16().collect();
    let mut value_bytes = Vec::with_capacity((units.len() + 1) * 2);
    for unit in &units {
        value_bytes.extend_from_slice(&unit.to_le_bytes());
    }
    value_bytes.extend_from_slice(&0u16.to_le_bytes());
    let w_value_length = (units.len() + 1) as u16;
    write_node(w, name, 1, w_value_length, &value_bytes, |_| {});
}

fn write_string_table(w: &mut Writer, table: &StringTable) {
    let key = format_translation_key(table.encoding.unwrap_or(Translation { language: 0, code_page: 1200 }));
    write_node(w, &key, 1, 0, &[], |w| {
        for (name, value) in &table.strings {
            w.align4();
            write_string_entry(w, name, value);
        }
    });
}

fn write_string_file_info(w: &mut Writer, tables: &[StringTable]) {
    write_node(w, "StringFileInfo", 1, 0, &[], |w| {
        for table in tables {
            w.align4();
            write_string_table(w, table);
        }
    });
}

fn write_var_file_info(w: &mut Writer, translations: &[Translation]) {
    write_node(w, "VarFileInfo", 1, 0, &[], |w| {
        w.align4();
        let mut value = Vec::with_capacity(translations.len() * 4);
        for translation in translations {
            value.extend_from_slice(&translation.language.to_le_bytes());
            value.extend_from_slice(&translation.code_page.to_le_bytes());
        }
        write_node(w, "Translation", 0, value.len() as u16, &value, |_| {});
    });
}

/// Serializes a [`VersionInfo`] back into `RT_VERSION` bytes.
pub fn serialize(info: &VersionInfo) -> Vec<u8> {
    let mut w = Writer::new();
    let value = info.fixed.as_ref().map(encode_fixed_file_info);
    let value_bytes = value.as_deref().unwrap_or(&[]);
    write_node(&mut w, "VS_VERSION_INFO", 0, value_bytes.len() as u16, value_bytes, |w| {
        if !info.string_tables.is_empty() {
            w.align4();
            write_string_file_info(w, &info.string_tables);
        }
        if !info.supported_translations.is_empty() {
            w.align4();
            write_var_file_info(w, &info.supported_translations);
        }
    });
    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StringTable;

    fn sample() -> VersionInfo {
        let mut fixed = FixedFileInfo::default();
        fixed.set_file_version(1, 2, 3, 4);
        fixed.set_product_version(1, 0, 0, 0);
        VersionInfo {
            language_id: 0x0409,
            fixed: Some(fixed),
            string_tables: vec![StringTable {
                encoding: Some(Translation { language: 0x0409, code_page: 1200 }),
                strings: vec![
                    ("ProductName".into(), "rcedit".into()),
                    ("FileDescription".into(), "test fixture".into()),
                ],
            }],
            supported_translations: vec![Translation { language: 0x0409, code_page: 1200 }],
        }
    }

    #[test]
    fn round_trips_through_serialize_and_deserialize() {
        let info = sample();
        let bytes = serialize(&info);
        assert_eq!(bytes.len() % 2, 0);
        let decoded = deserialize(&bytes, info.language_id).unwrap();
        assert_eq!(decoded.fixed, info.fixed);
        assert_eq!(decoded.string_tables, info.string_tables);
        assert_eq!(decoded.supported_translations, info.supported_translations);
    }

    #[test]
    fn every_node_boundary_is_4_byte_aligned() {
        let bytes = serialize(&sample());
        assert_eq!(bytes.len() % 4, 0, "outermost root is written from offset 0 so must itself end aligned");
    }

    #[test]
    fn set_string_overwrites_first_match_and_appends_when_absent() {
        let mut info = sample();
        info.set_string("ProductName", "renamed");
        assert_eq!(info.get_string("ProductName"), Some("renamed"));

        info.set_string("CompanyName", "Example Corp");
        assert_eq!(info.get_string("CompanyName"), Some("Example Corp"));
        assert_eq!(info.string_tables[0].strings.last().unwrap().0, "CompanyName");
    }

    #[test]
    fn deserialize_rejects_wrong_root_key() {
        let mut w = Writer::new();
        write_node(&mut w, "NOT_VERSION_INFO", 0, 0, &[], |_| {});
        let err = deserialize(&w.into_bytes(), 0).unwrap_err();
        assert!(matches!(err, Error::ParseFailed { .. }));
    }
}
