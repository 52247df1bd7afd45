//! In-memory representation of the resources a [`crate::updater::ResourceUpdater`] edits.
//!
//! Every type here is a plain value; nothing holds a handle or borrows the source file. The
//! codecs in [`crate::version_info`], [`crate::string_table`], [`crate::icon`], and
//! [`crate::manifest`] translate between these types and their on-disk encodings.

use std::collections::BTreeMap;

/// `VS_FIXEDFILEINFO`, the binary-typed value of a `VS_VERSION_INFO` node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedFileInfo {
    pub signature: u32,
    pub struc_version: u32,
    pub file_version_ms: u32,
    pub file_version_ls: u32,
    pub product_version_ms: u32,
    pub product_version_ls: u32,
    pub file_flags_mask: u32,
    pub file_flags: u32,
    pub file_os: u32,
    pub file_type: u32,
    pub file_subtype: u32,
    pub file_date_ms: u32,
    pub file_date_ls: u32,
}

/// `dwSignature` every `VS_FIXEDFILEINFO` carries.
pub const VS_FFI_SIGNATURE: u32 = 0xFEEF_04BD;
/// `dwStrucVersion` for the 1.0 fixed structure layout.
pub const VS_FFI_STRUCVERSION: u32 = 0x0001_0000;
/// `dwFileFlagsMask`, matching every flag bit the structure defines.
pub const VS_FFI_FILEFLAGSMASK: u32 = 0x0000_003F;

impl Default for FixedFileInfo {
    fn default() -> Self {
        Self {
            signature: VS_FFI_SIGNATURE,
            struc_version: VS_FFI_STRUCVERSION,
            file_version_ms: 0,
            file_version_ls: 0,
            product_version_ms: 0,
            product_version_ls: 0,
            file_flags_mask: VS_FFI_FILEFLAGSMASK,
            file_flags: 0,
            file_os: 0x0004_0004, // VOS_NT_WINDOWS32
            file_type: 0x0000_0001, // VFT_APP
            file_subtype: 0,
            file_date_ms: 0,
            file_date_ls: 0,
        }
    }
}

impl FixedFileInfo {
    pub fn file_version(&self) -> (u16, u16, u16, u16) {
        (
            (self.file_version_ms >> 16) as u16,
            self.file_version_ms as u16,
            (self.file_version_ls >> 16) as u16,
            self.file_version_ls as u16,
        )
    }

    pub fn set_file_version(&mut self, major: u16, minor: u16, patch: u16, build: u16) {
        self.file_version_ms = (u32::from(major) << 16) | u32::from(minor);
        self.file_version_ls = (u32::from(patch) << 16) | u32::from(build);
    }

    pub fn product_version(&self) -> (u16, u16, u16, u16) {
        (
            (self.product_version_ms >> 16) as u16,
            self.product_version_ms as u16,
            (self.product_version_ls >> 16) as u16,
            self.product_version_ls as u16,
        )
    }

    pub fn set_product_version(&mut self, major: u16, minor: u16, patch: u16, build: u16) {
        self.product_version_ms = (u32::from(major) << 16) | u32::from(minor);
        self.product_version_ls = (u32::from(patch) << 16) | u32::from(build);
    }
}

/// A `(language, code page)` pair, as carried in a `VarFileInfo\Translation` entry and encoded
/// into every `StringFileInfo` table's hex key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Translation {
    pub language: u16,
    pub code_page: u16,
}

/// One `StringTable` block: a `(language, code page)` key plus its ordered name/value pairs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StringTable {
    pub encoding: Option<Translation>,
    /// Ordered so re-serialization is stable; lookups are by name.
    pub strings: Vec<(String, String)>,
}

impl StringTable {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.strings.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    /// Overwrites `name` if present, else appends. Returns whether a value was already present.
    pub fn set(&mut self, name: &str, value: impl Into<String>) -> bool {
        if let Some(entry) = self.strings.iter_mut().find(|(key, _)| key == name) {
            entry.1 = value.into();
            true
        } else {
            self.strings.push((String::from(name), value.into()));
            false
        }
    }
}

/// One language instance of `RT_VERSION`: a `VS_VERSION_INFO` root node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VersionInfo {
    pub language_id: u16,
    pub fixed: Option<FixedFileInfo>,
    pub string_tables: Vec<StringTable>,
    pub supported_translations: Vec<Translation>,
}

impl VersionInfo {
    /// Finds the value for `name`, optionally restricted to a table encoding; returns the first
    /// match in table order.
    pub fn get_string(&self, name: &str) -> Option<&str> {
        self.string_tables.iter().find_map(|table| table.get(name))
    }

    /// Sets `name` to `value`, following the "first match wins, else append to every table" rule.
    pub fn set_string(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        for table in &mut self.string_tables {
            if table.set(name, value.clone()) {
                return;
            }
        }
    }
}

/// The 16-slot string block carried by a single `RT_STRING` resource (covering 16 consecutive
/// string ids). Every slot is present, empty strings included, matching the on-disk layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StringBlock {
    pub slots: [String; 16],
}

impl Default for StringBlock {
    fn default() -> Self {
        Self { slots: core::array::from_fn(|_| String::new()) }
    }
}

impl StringBlock {
    /// Resource id for the block containing `string_id`.
    pub fn block_id(string_id: u16) -> u16 {
        (string_id >> 4) + 1
    }

    /// Index of `string_id` within its block.
    pub fn slot_index(string_id: u16) -> usize {
        (string_id & 0xF) as usize
    }
}

/// A single icon image inside an `.ico` file, decoded and ready to be packed as `RT_ICON`.
#[derive(Clone, Debug)]
pub struct IconImage {
    pub width: u8,
    pub height: u8,
    pub color_count: u8,
    pub planes: u16,
    pub bit_count: u16,
    pub data: Vec<u8>,
}

/// One `RT_GROUP_ICON` bundle: the directory resource plus the `RT_ICON` images it references,
/// in directory order.
#[derive(Clone, Debug, Default)]
pub struct IconBundle {
    pub images: Vec<IconImage>,
}

/// One language's icon bundles, keyed by group (bundle) id, plus the next id to allocate when a
/// bundle is added for this language.
#[derive(Clone, Debug, Default)]
pub struct IconLangState {
    pub max_icon_id: u16,
    pub bundles: BTreeMap<u16, IconBundle>,
}

/// `RT_MANIFEST` state: the original bytes (for restoring the pre-edit execution level) and the
/// current bytes (after substitution or a whole-file replacement).
///
/// A single pair, not keyed by language: the original tool's enumeration callback never looks at
/// `wIDLanguage` and simply overwrites this state every time it sees another `RT_MANIFEST`, so a
/// binary with more than one ends up with whichever was enumerated last.
#[derive(Clone, Debug, Default)]
pub struct ManifestState {
    pub original: Option<Vec<u8>>,
    pub current: Option<Vec<u8>>,
}

/// A raw `RT_RCDATA` entry: opaque bytes for one resource id.
#[derive(Clone, Debug)]
pub struct RcDataEntry {
    pub data: Vec<u8>,
}

/// The full in-memory resource surface of one PE file, as built by [`crate::updater::ResourceUpdater::load`].
#[derive(Clone, Debug, Default)]
pub struct ResourceModel {
    /// Ordered by enumeration/insertion order, not sorted by language id.
    pub version_infos: Vec<VersionInfo>,
    pub string_tables: BTreeMap<u16, BTreeMap<u16, StringBlock>>,
    pub icons: BTreeMap<u16, IconLangState>,
    pub manifest: ManifestState,
    /// `ChangeRcData` never reads existing `RT_RCDATA` resources off the source file during load;
    /// this map is only ever populated by `--set-rcdata`, matching the original tool.
    pub rcdata: BTreeMap<u16, BTreeMap<u16, RcDataEntry>>,
}

impl ResourceModel {
    pub fn version_info(&self, language_id: u16) -> Option<&VersionInfo> {
        self.version_infos.iter().find(|info| info.language_id == language_id)
    }

    pub fn version_info_mut(&mut self, language_id: u16) -> Option<&mut VersionInfo> {
        self.version_infos.iter_mut().find(|info| info.language_id == language_id)
    }

    /// First version info in insertion order, used when a CLI flag omits a language id.
    pub fn first_version_info_mut(&mut self) -> Option<&mut VersionInfo> {
        self.version_infos.first_mut()
    }

    /// First language id with any version info, in insertion order.
    pub fn first_version_language(&self) -> Option<u16> {
        self.version_infos.first().map(|info| info.language_id)
    }

    /// First language id with any icon bundle, in ascending language order (matches
    /// `std::map::begin()` over `IconTableMap` in the original).
    pub fn first_icon_language(&self) -> Option<u16> {
        self.icons.keys().next().copied()
    }
}
