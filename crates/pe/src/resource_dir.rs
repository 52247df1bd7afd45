//! Reads and writes the `IMAGE_RESOURCE_DIRECTORY` tree (`.rsrc` section contents): three levels
//! of directory (type, then name/id, then language) bottoming out in `IMAGE_RESOURCE_DATA_ENTRY`
//! records that point at the actual resource bytes.
//!
//! rcedit only ever deals with resources addressed by numeric type/name/language, never by
//! string name, so named directory entries (the high bit of `name_or_id` set) are skipped on
//! read and never produced on write.

use crate::error::{Error, ParseFailedSnafu};
use snafu::prelude::*;

pub const RT_ICON: u16 = 3;
pub const RT_STRING: u16 = 6;
pub const RT_RCDATA: u16 = 10;
pub const RT_GROUP_ICON: u16 = 14;
pub const RT_VERSION: u16 = 16;
pub const RT_MANIFEST: u16 = 24;

const DIRECTORY_HEADER_SIZE: usize = 16;
const DIRECTORY_ENTRY_SIZE: usize = 8;
const DATA_ENTRY_SIZE: usize = 16;

/// One leaf of the resource tree: a concrete (type, name, language) resource and its bytes.
#[derive(Clone, Debug)]
pub struct ResourceEntry {
    pub type_id: u16,
    pub name_id: u16,
    pub language: u16,
    pub data: Vec<u8>,
}

fn read_u16(data: &[u8], offset: usize) -> Result<u16, Error> {
    let bytes = data
        .get(offset..offset + 2)
        .context(ParseFailedSnafu { reason: "resource directory truncated" })?;
    Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u32(data: &[u8], offset: usize) -> Result<u32, Error> {
    let bytes = data
        .get(offset..offset + 4)
        .context(ParseFailedSnafu { reason: "resource directory truncated" })?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

/// One `(id, offset_to_data)` pair out of a directory's entry array.
struct DirEntry {
    id: u16,
    offset: u32,
    is_directory: bool,
}

fn read_directory_entries(section: &[u8], directory_offset: usize) -> Result<Vec<DirEntry>, Error> {
    let named = read_u16(section, directory_offset + 12)?;
    let ids = read_u16(section, directory_offset + 14)?;
    let count = named as usize + ids as usize;
    let entries_offset = directory_offset + DIRECTORY_HEADER_SIZE;

    let mut entries = Vec::with_capacity(ids as usize);
    for index in 0..count {
        let entry_offset = entries_offset + index * DIRECTORY_ENTRY_SIZE;
        let name_or_id = read_u32(section, entry_offset)?;
        if name_or_id & 0x8000_0000 != 0 {
            // Named entry; rcedit doesn't address resources by name. Skip it.
            continue;
        }
        let offset_to_data = read_u32(section, entry_offset + 4)?;
        entries.push(DirEntry {
            id: name_or_id as u16,
            offset: offset_to_data & 0x7FFF_FFFF,
            is_directory: offset_to_data & 0x8000_0000 != 0,
        });
    }
    Ok(entries)
}

/// Walks the whole resource directory tree, returning every numerically-addressed leaf resource.
pub fn parse_resource_section(section: &[u8], resource_section_rva: u32) -> Result<Vec<ResourceEntry>, Error> {
    let mut out = Vec::new();
    for type_entry in read_directory_entries(section, 0)? {
        ensure!(type_entry.is_directory, ParseFailedSnafu { reason: "type entry is not a subdirectory" });
        for name_entry in read_directory_entries(section, type_entry.offset as usize)? {
            ensure!(
                name_entry.is_directory,
                ParseFailedSnafu { reason: "name entry is not a subdirectory" }
            );
            for lang_entry in read_directory_entries(section, name_entry.offset as usize)? {
                ensure!(
                    !lang_entry.is_directory,
                    ParseFailedSnafu { reason: "language entry points at a subdirectory" }
                );
                let data_offset = lang_entry.offset as usize;
                let data_rva = read_u32(section, data_offset)?;
                let size = read_u32(section, data_offset + 4)? as usize;
                let local_offset = (data_rva - resource_section_rva) as usize;
                let data = section
                    .get(local_offset..local_offset + size)
                    .context(ParseFailedSnafu { reason: "resource data extends past section" })?
                    .to_vec();
                out.push(ResourceEntry {
                    type_id: type_entry.id,
                    name_id: name_entry.id,
                    language: lang_entry.id,
                    data,
                });
            }
        }
    }
    Ok(out)
}

/// Builds a fresh `.rsrc` section from a flat list of entries, reconstructing the three-level
/// directory tree. `section_rva` is the virtual address the new section will be mapped at, used
/// to compute each data entry's absolute RVA.
pub fn build_resource_section(entries: &[ResourceEntry], section_rva: u32) -> Vec<u8> {
    use std::collections::BTreeMap;

    // type -> name -> language -> entry index
    let mut tree: BTreeMap<u16, BTreeMap<u16, BTreeMap<u16, usize>>> = BTreeMap::new();
    for (index, entry) in entries.iter().enumerate() {
        tree.entry(entry.type_id)
            .or_default()
            .entry(entry.name_id)
            .or_default()
            .insert(entry.language, index);
    }

    // Directories are emitted breadth-first so every subdirectory offset is already known by the
    // time its parent entry is written: root, then all type-level dirs, then all name-level dirs.
    let type_count = tree.len();
    let name_count: usize = tree.values().map(BTreeMap::len).sum();
    let lang_count: usize = tree.values().flat_map(BTreeMap::values).map(BTreeMap::len).sum();

    let root_offset = 0usize;
    let type_dirs_offset = root_offset + DIRECTORY_HEADER_SIZE + type_count * DIRECTORY_ENTRY_SIZE;
    let name_dirs_offset = type_dirs_offset + type_count * DIRECTORY_HEADER_SIZE
        + name_count * DIRECTORY_ENTRY_SIZE;
    let data_entries_offset = name_dirs_offset + name_count * DIRECTORY_HEADER_SIZE
        + lang_count * DIRECTORY_ENTRY_SIZE;
    let data_blobs_offset = data_entries_offset + lang_count * DATA_ENTRY_SIZE;

    let mut buf = vec![0u8; data_blobs_offset];

    let write_u16 = |buf: &mut Vec<u8>, offset: usize, value: u16| {
        buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    };
    let write_u32 = |buf: &mut Vec<u8>, offset: usize, value: u32| {
        buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    };
    let write_dir_header = |buf: &mut Vec<u8>, offset: usize, id_count: u16| {
        write_u32(buf, offset, 0);
        write_u32(buf, offset + 4, 0);
        write_u16(buf, offset + 8, 0);
        write_u16(buf, offset + 10, 0);
        write_u16(buf, offset + 12, 0);
        write_u16(buf, offset + 14, id_count);
    };
    let write_dir_entry = |buf: &mut Vec<u8>, offset: usize, id: u16, target: u32, is_directory: bool| {
        write_u32(buf, offset, u32::from(id));
        let flag = if is_directory { 0x8000_0000 } else { 0 };
        write_u32(buf, offset + 4, target | flag);
    };

    write_dir_header(&mut buf, root_offset, type_count as u16);

    let mut type_dir_cursor = type_dirs_offset;
    let mut name_dir_cursor = name_dirs_offset;
    let mut data_entry_cursor = data_entries_offset;
    let mut data_blob_cursor = data_blobs_offset;

    for (type_entry_index, (type_id, names)) in tree.iter().enumerate() {
        let type_dir_offset = type_dir_cursor;
        write_dir_entry(
            &mut buf,
            root_offset + DIRECTORY_HEADER_SIZE + type_entry_index * DIRECTORY_ENTRY_SIZE,
            *type_id,
            type_dir_offset as u32,
            true,
        );
        write_dir_header(&mut buf, type_dir_offset, names.len() as u16);
        type_dir_cursor += DIRECTORY_HEADER_SIZE + names.len() * DIRECTORY_ENTRY_SIZE;

        for (name_entry_index, (name_id, languages)) in names.iter().enumerate() {
            let name_dir_offset = name_dir_cursor;
            write_dir_entry(
                &mut buf,
                type_dir_offset + DIRECTORY_HEADER_SIZE + name_entry_index * DIRECTORY_ENTRY_SIZE,
                *name_id,
                name_dir_offset as u32,
                true,
            );
            write_dir_header(&mut buf, name_dir_offset, languages.len() as u16);
            name_dir_cursor += DIRECTORY_HEADER_SIZE + languages.len() * DIRECTORY_ENTRY_SIZE;

            for (lang_entry_index, (language, entry_index)) in languages.iter().enumerate() {
                let data_entry_offset = data_entry_cursor;
                write_dir_entry(
                    &mut buf,
                    name_dir_offset + DIRECTORY_HEADER_SIZE + lang_entry_index * DIRECTORY_ENTRY_SIZE,
                    *language,
                    data_entry_offset as u32,
                    false,
                );

                let data = &entries[*entry_index].data;
                write_u32(&mut buf, data_entry_offset, section_rva + data_blob_cursor as u32);
                write_u32(&mut buf, data_entry_offset + 4, data.len() as u32);
                write_u32(&mut buf, data_entry_offset + 8, 0);
                write_u32(&mut buf, data_entry_offset + 12, 0);
                data_entry_cursor += DATA_ENTRY_SIZE;

                buf.extend_from_slice(data);
                let aligned = (buf.len() + 3) & !3;
                buf.resize(aligned, 0);
                data_blob_cursor = buf.len();
            }
        }
    }

    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_small_tree() {
        let entries = vec![
            ResourceEntry { type_id: RT_VERSION, name_id: 1, language: 0x0409, data: vec![1, 2, 3, 4] },
            ResourceEntry { type_id: RT_MANIFEST, name_id: 1, language: 1033, data: vec![5, 6, 7] },
        ];
        let section_rva = 0x2000;
        let section = build_resource_section(&entries, section_rva);
        let parsed = parse_resource_section(&section, section_rva).unwrap();
        assert_eq!(parsed.len(), 2);
        let version = parsed.iter().find(|e| e.type_id == RT_VERSION).unwrap();
        assert_eq!(version.data, vec![1, 2, 3, 4]);
        let manifest = parsed.iter().find(|e| e.type_id == RT_MANIFEST).unwrap();
        assert_eq!(manifest.data, vec![5, 6, 7]);
    }
}
