//! Hand-rolled PE/COFF resource rewriter for non-Windows hosts.
//!
//! Reads are done directly against the source file's `.rsrc` section. Writes never patch the
//! existing `.rsrc` section in place (there is no general guarantee the new contents fit in the
//! old section's reserved virtual size): instead a brand new section carrying the merged resource
//! tree is appended after the existing section table, the section header table is extended, the
//! file header's section count is bumped, and the resource data directory entry is repointed at
//! the new section. This grows the output file; rcedit accepts that rather than trying to reuse
//! the old `.rsrc` hole.

use super::{Collaborator, ResourceKey, Session};
use crate::error::{CommitFailedSnafu, Error, OpenFailedSnafu, ParseFailedSnafu};
use crate::pe::{PortableExecutable, SectionHeader};
use crate::resource_dir::{self, ResourceEntry};
use snafu::prelude::*;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const SECTION_NAME: &[u8; 8] = b".rsrc\0\0\0";
const DEFAULT_FILE_ALIGNMENT: u32 = 0x200;
const DEFAULT_SECTION_ALIGNMENT: u32 = 0x1000;

fn align_up(value: u32, alignment: u32) -> u32 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

#[derive(Default)]
pub struct PortableCollaborator {
    session: Session,
    original_bytes: Vec<u8>,
    entries: BTreeMap<ResourceKey, Vec<u8>>,
    pending: BTreeMap<ResourceKey, Vec<u8>>,
}

impl PortableCollaborator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Collaborator for PortableCollaborator {
    fn load(&mut self, path: &Path) -> Result<(), Error> {
        let bytes = fs::read(path)?;
        let pe = PortableExecutable::new(&bytes).context(OpenFailedSnafu {
            reason: format!("{} is not a valid PE file", path.display()),
        })?;
        if let (Some(section_data), Some(directory)) =
            (pe.resource_section_data(), pe.resource_directory())
        {
            let parsed = resource_dir::parse_resource_section(section_data, directory.virtual_address.get())?;
            for entry in parsed {
                self.entries.insert(
                    ResourceKey { type_id: entry.type_id, name_id: entry.name_id, language: entry.language },
                    entry.data,
                );
            }
        }
        self.original_bytes = bytes;
        self.session.loaded_path = Some(path.to_path_buf());
        Ok(())
    }

    fn enumerate(&self) -> Result<Vec<ResourceKey>, Error> {
        Ok(self.entries.keys().copied().collect())
    }

    fn read(&self, key: ResourceKey) -> Result<Vec<u8>, Error> {
        self.entries.get(&key).cloned().context(crate::error::NotFoundSnafu {
            reason: format!("resource {:?} not present", key),
        })
    }

    fn begin_update(&mut self, output_path: &Path) -> Result<(), Error> {
        self.pending = self.entries.clone();
        self.session.output_path = Some(output_path.to_path_buf());
        Ok(())
    }

    fn update(&mut self, key: ResourceKey, data: Vec<u8>) -> Result<(), Error> {
        self.pending.insert(key, data);
        Ok(())
    }

    fn remove(&mut self, key: ResourceKey) -> Result<(), Error> {
        self.pending.remove(&key);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), Error> {
        let output_path = self
            .session
            .output_path
            .clone()
            .context(CommitFailedSnafu { reason: "commit called before begin_update" })?;

        let pe = PortableExecutable::new(&self.original_bytes)
            .context(OpenFailedSnafu { reason: "source file no longer parses as PE" })?;

        let section_alignment = DEFAULT_SECTION_ALIGNMENT;
        let file_alignment = DEFAULT_FILE_ALIGNMENT;

        let last_section = pe
            .sections()
            .iter()
            .max_by_key(|section| section.virtual_address.get())
            .context(CommitFailedSnafu { reason: "PE file has no sections" })?;
        let new_section_rva = align_up(
            last_section.virtual_address.get() + last_section.virtual_size.get().max(1),
            section_alignment,
        );

        let entries: Vec<ResourceEntry> = self
            .pending
            .iter()
            .map(|(key, data)| ResourceEntry {
                type_id: key.type_id,
                name_id: key.name_id,
                language: key.language,
                data: data.clone(),
            })
            .collect();
        let section_data = resource_dir::build_resource_section(&entries, new_section_rva);

        let file_offset = align_up(self.original_bytes.len() as u32, file_alignment) as usize;
        let mut out = self.original_bytes.clone();
        out.resize(file_offset, 0);
        let raw_size = align_up(section_data.len() as u32, file_alignment) as usize;
        out.extend_from_slice(&section_data);
        out.resize(file_offset + raw_size, 0);

        let new_section = build_section_header(new_section_rva, section_data.len() as u32, file_offset as u32, raw_size as u32);
        append_section_header(&mut out, &pe, &new_section)?;
        patch_resource_directory(&mut out, new_section_rva, section_data.len() as u32)?;
        patch_section_count(&mut out)?;

        fs::write(&output_path, &out)?;
        Ok(())
    }

    fn discard(&mut self) -> Result<(), Error> {
        self.pending.clear();
        self.session.output_path = None;
        Ok(())
    }
}

fn build_section_header(rva: u32, virtual_size: u32, file_offset: u32, raw_size: u32) -> Vec<u8> {
    let mut header = vec![0u8; core::mem::size_of::<SectionHeader>()];
    header[0..8].copy_from_slice(SECTION_NAME);
    header[8..12].copy_from_slice(&virtual_size.to_le_bytes());
    header[12..16].copy_from_slice(&rva.to_le_bytes());
    header[16..20].copy_from_slice(&raw_size.to_le_bytes());
    header[20..24].copy_from_slice(&file_offset.to_le_bytes());
    // pointer_to_relocations, pointer_to_linenumbers, counts: zero.
    // IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ
    header[36..40].copy_from_slice(&0x4000_0040u32.to_le_bytes());
    header
}

/// Appends `new_section`'s header right after the existing section header table. This only works
/// because rcedit never touches the bytes between the header table and the first section's raw
/// data when that gap has room; real-world PE files reliably leave some slack there from the
/// original linker's header padding. When there isn't enough room this returns `CommitFailed`
/// rather than silently corrupting the layout.
fn append_section_header(out: &mut Vec<u8>, pe: &PortableExecutable, new_section: &[u8]) -> Result<(), Error> {
    let insert_at = pe.section_table_end;
    let first_raw_data = pe
        .sections()
        .iter()
        .map(|section| section.pointer_to_raw_data.get())
        .filter(|&offset| offset > 0)
        .min()
        .unwrap_or(insert_at as u32);
    ensure!(
        insert_at + new_section.len() <= first_raw_data as usize,
        CommitFailedSnafu {
            reason: "no room to append a section header without overlapping section data"
        }
    );
    out[insert_at..insert_at + new_section.len()].copy_from_slice(new_section);
    Ok(())
}

fn patch_section_count(out: &mut [u8]) -> Result<(), Error> {
    let count_offset = pe_header_offset(out)? + 4 + 2; // Machine(2) + NumberOfSections(2)
    let current = u16::from_le_bytes([out[count_offset], out[count_offset + 1]]);
    out[count_offset..count_offset + 2].copy_from_slice(&(current + 1).to_le_bytes());
    Ok(())
}

fn patch_resource_directory(out: &mut [u8], rva: u32, size: u32) -> Result<(), Error> {
    let optional_header_offset = pe_header_offset(out)? + 4 + 20; // PE sig(4) + COFF header(20)
    let optional_magic = u16::from_le_bytes([out[optional_header_offset], out[optional_header_offset + 1]]);
    let optional_header_size = if optional_magic == 0x20B { 112 } else { 96 };
    let directory_offset = optional_header_offset
        + optional_header_size
        + crate::pe::IMAGE_DIRECTORY_ENTRY_RESOURCE * 8;
    ensure!(
        directory_offset + 8 <= out.len(),
        ParseFailedSnafu { reason: "optional header too small for a resource data directory" }
    );
    out[directory_offset..directory_offset + 4].copy_from_slice(&rva.to_le_bytes());
    out[directory_offset + 4..directory_offset + 8].copy_from_slice(&size.to_le_bytes());
    Ok(())
}

fn pe_header_offset(out: &[u8]) -> Result<usize, Error> {
    ensure!(out.len() >= 0x40, ParseFailedSnafu { reason: "file too small for an MZ header" });
    Ok(u32::from_le_bytes(out[0x3C..0x40].try_into().unwrap()) as usize)
}
