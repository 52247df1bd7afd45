//! `ResourceUpdater`: the orchestrator that ties a [`Collaborator`] backend to the resource codecs
//! and the in-memory [`ResourceModel`].
//!
//! Mirrors `rescle.cc`'s `ResourceUpdater` directly: `Load` enumerates every resource the backend
//! surfaces and eagerly decodes `RT_VERSION` and `RT_STRING` into memory, but only *notices*
//! `RT_ICON`/`RT_GROUP_ICON` resources (tracking the highest icon id per language) without
//! decoding them — an icon bundle only enters [`ResourceModel::icons`] once `set_icon` touches it.
//! `RT_RCDATA` is never read at all; it only exists in the model once `set_rcdata` is called.
//! `RT_MANIFEST` is not keyed by language at all: the original's enumeration callback ignores
//! `wIDLanguage` and simply overwrites its one manifest slot every time it runs, so the last one
//! enumerated wins, and every write goes out under the fixed language id
//! [`manifest::MANIFEST_LANGUAGE_ID`] regardless of where the manifest was loaded from.
//! `Commit` writes in a fixed order — version info, manifest, string tables, icons, rcdata — since
//! earlier writes can allocate directory slots later writes depend on. Version info and string
//! tables are re-serialized unconditionally; icon bundles are written only if actually touched,
//! deleting any of that language's previously-known trailing `RT_ICON` ids the new bundle no
//! longer needs; the manifest is written only where it differs from its as-loaded bytes.
//!
//! Operations follow the `Empty -> Loaded -> Edited* -> Committed | Dropped` lifecycle: every
//! setter and `commit_to` reject calls made before `load` or after `commit_to`/`discard` with
//! [`Error::NotReady`].

use crate::collaborator::{Collaborator, ResourceKey};
use crate::error::{Error, MissingFixedFileInfoSnafu, NotReadySnafu};
use crate::model::{IconLangState, RcDataEntry, ResourceModel, StringBlock, Translation, VersionInfo};
use crate::resource_dir::{RT_GROUP_ICON, RT_ICON, RT_MANIFEST, RT_RCDATA, RT_STRING, RT_VERSION};
use crate::{icon, manifest, string_table, version_info};
use snafu::prelude::*;
use std::path::{Path, PathBuf};

/// Where a [`ResourceUpdater`] sits in the `Empty -> Loaded -> Edited* -> Committed | Dropped`
/// lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Empty,
    Loaded,
    Committed,
    Dropped,
}

/// Drives one load/edit/commit cycle of a PE file's resources through a [`Collaborator`] backend.
pub struct ResourceUpdater<C: Collaborator> {
    collaborator: C,
    model: ResourceModel,
    loaded_path: Option<PathBuf>,
    dirty_icons: std::collections::BTreeSet<(u16, u16)>,
    state: State,
}

impl<C: Collaborator> ResourceUpdater<C> {
    pub fn new(collaborator: C) -> Self {
        Self {
            collaborator,
            model: ResourceModel::default(),
            loaded_path: None,
            dirty_icons: std::collections::BTreeSet::new(),
            state: State::Empty,
        }
    }

    pub fn model(&self) -> &ResourceModel {
        &self.model
    }

    fn ensure_loaded(&self) -> Result<(), Error> {
        match self.state {
            State::Loaded => Ok(()),
            State::Empty => NotReadySnafu { reason: "no PE file loaded yet" }.fail(),
            State::Committed => NotReadySnafu { reason: "already committed" }.fail(),
            State::Dropped => NotReadySnafu { reason: "discarded" }.fail(),
        }
    }

    /// Loads `path` and decodes every resource the backend surfaces into the model.
    pub fn load(&mut self, path: &Path) -> Result<(), Error> {
        self.collaborator.load(path)?;
        self.loaded_path = Some(path.to_path_buf());

        for key in self.collaborator.enumerate()? {
            match key.type_id {
                RT_VERSION => {
                    let data = self.collaborator.read(key)?;
                    let info = version_info::deserialize(&data, key.language)?;
                    log::debug!("loaded VS_VERSIONINFO for language {}", key.language);
                    self.model.version_infos.push(info);
                }
                RT_STRING => {
                    let data = self.collaborator.read(key)?;
                    let block = string_table::deserialize(&data)?;
                    log::debug!("loaded RT_STRING block {} for language {}", key.name_id, key.language);
                    self.model
                        .string_tables
                        .entry(key.language)
                        .or_default()
                        .insert(key.name_id, block);
                }
                RT_ICON => {
                    let state = self.model.icons.entry(key.language).or_insert_with(IconLangState::default);
                    state.max_icon_id = state.max_icon_id.max(key.name_id);
                }
                RT_GROUP_ICON => {
                    // Recorded so the language is known even before any bundle is rebuilt; the
                    // bundle itself stays absent until `set_icon` touches it, matching the
                    // original's lazily-populated `IconBundles[name] = nullptr`.
                    self.model.icons.entry(key.language).or_insert_with(IconLangState::default);
                }
                RT_MANIFEST => {
                    let data = self.collaborator.read(key)?;
                    log::debug!("loaded RT_MANIFEST ({} bytes)", data.len());
                    // Not keyed by language: the original's callback overwrites its one manifest
                    // slot unconditionally, so the last one enumerated wins.
                    self.model.manifest.original = Some(data.clone());
                    self.model.manifest.current = Some(data);
                }
                RT_RCDATA => {
                    // Never read on load; `--set-rcdata` is the only way into the model.
                }
                _ => {}
            }
        }
        self.state = State::Loaded;
        Ok(())
    }

    // -- version info -----------------------------------------------------

    fn version_info_for(&mut self, language_id: Option<u16>) -> Option<&mut VersionInfo> {
        match language_id {
            Some(language_id) => self.model.version_info_mut(language_id),
            None => self.model.first_version_info_mut(),
        }
    }

    pub fn get_version_string(&self, language_id: Option<u16>, name: &str) -> Option<&str> {
        let info = match language_id {
            Some(language_id) => self.model.version_info(language_id),
            None => self.model.version_infos.first(),
        }?;
        info.get_string(name)
    }

    pub fn set_version_string(&mut self, language_id: Option<u16>, name: &str, value: &str) -> Result<(), Error> {
        self.ensure_loaded()?;
        let info = self.version_info_for(language_id).context(crate::error::NotFoundSnafu {
            reason: "no VS_VERSION_INFO loaded for the requested language",
        })?;
        info.set_string(name, value);
        Ok(())
    }

    pub fn set_file_version(&mut self, language_id: Option<u16>, major: u16, minor: u16, patch: u16, build: u16) -> Result<(), Error> {
        self.ensure_loaded()?;
        let language_id = language_id.or_else(|| self.model.first_version_language());
        let info = self.version_info_for(language_id).context(crate::error::NotFoundSnafu {
            reason: "no VS_VERSION_INFO loaded for the requested language",
        })?;
        let fixed = info
            .fixed
            .as_mut()
            .context(MissingFixedFileInfoSnafu { language_id: info.language_id })?;
        fixed.set_file_version(major, minor, patch, build);
        Ok(())
    }

    pub fn set_product_version(&mut self, language_id: Option<u16>, major: u16, minor: u16, patch: u16, build: u16) -> Result<(), Error> {
        self.ensure_loaded()?;
        let language_id = language_id.or_else(|| self.model.first_version_language());
        let info = self.version_info_for(language_id).context(crate::error::NotFoundSnafu {
            reason: "no VS_VERSION_INFO loaded for the requested language",
        })?;
        let fixed = info
            .fixed
            .as_mut()
            .context(MissingFixedFileInfoSnafu { language_id: info.language_id })?;
        fixed.set_product_version(major, minor, patch, build);
        Ok(())
    }

    // -- string tables (RT_STRING) -----------------------------------------

    pub fn get_resource_string(&self, language_id: Option<u16>, string_id: u16) -> Option<&str> {
        let language_id = language_id.or_else(|| self.model.string_tables.keys().next().copied())?;
        let blocks = self.model.string_tables.get(&language_id)?;
        let block = blocks.get(&StringBlock::block_id(string_id))?;
        let value = &block.slots[StringBlock::slot_index(string_id)];
        (!value.is_empty()).then_some(value.as_str())
    }

    pub fn set_resource_string(&mut self, language_id: Option<u16>, string_id: u16, value: &str) -> Result<(), Error> {
        self.ensure_loaded()?;
        let language_id = language_id
            .or_else(|| self.model.string_tables.keys().next().copied())
            .unwrap_or(0);
        let blocks = self.model.string_tables.entry(language_id).or_default();
        let block = blocks.entry(StringBlock::block_id(string_id)).or_default();
        block.slots[StringBlock::slot_index(string_id)] = value.to_string();
        Ok(())
    }

    // -- icons --------------------------------------------------------------

    /// Reads `ico_bytes` as a `.ico` file and installs it as bundle `bundle_id` (default: the
    /// first bundle id already known for the language, else `1`) for `language_id` (default: the
    /// first language with any icon presence, else the neutral language).
    pub fn set_icon(&mut self, language_id: Option<u16>, bundle_id: Option<u16>, ico_bytes: &[u8]) -> Result<(), Error> {
        self.ensure_loaded()?;
        let bundle = icon::parse_ico_file(ico_bytes)?;
        let language_id = language_id.or_else(|| self.model.first_icon_language()).unwrap_or(0);
        let state = self.model.icons.entry(language_id).or_insert_with(IconLangState::default);
        let bundle_id = bundle_id.or_else(|| state.bundles.keys().next().copied()).unwrap_or(1);
        state.max_icon_id = state.max_icon_id.max(bundle.images.len() as u16);
        state.bundles.insert(bundle_id, bundle);
        self.dirty_icons.insert((language_id, bundle_id));
        Ok(())
    }

    // -- manifest -------------------------------------------------------------

    pub fn set_requested_execution_level(&mut self, new_level: &str) -> Result<(), Error> {
        self.ensure_loaded()?;
        let Some(current) = self.model.manifest.current.clone() else { return Ok(()) };
        let original = self.model.manifest.original.clone().unwrap_or_default();
        let original_level = manifest::extract_requested_execution_level(&original).unwrap_or_default();
        let updated = manifest::set_requested_execution_level(&current, &original_level, new_level);
        self.model.manifest.current = Some(updated);
        Ok(())
    }

    /// Replaces the whole manifest with `bytes`. Not keyed by language: [`Self::commit_to`] always
    /// writes it under the fixed language id the original tool always writes manifests with.
    pub fn set_application_manifest(&mut self, bytes: Vec<u8>) -> Result<(), Error> {
        self.ensure_loaded()?;
        self.model.manifest.current = Some(bytes);
        Ok(())
    }

    // -- rcdata ---------------------------------------------------------------

    pub fn set_rcdata(&mut self, language_id: Option<u16>, resource_id: u16, data: Vec<u8>) -> Result<(), Error> {
        self.ensure_loaded()?;
        let language_id = language_id.unwrap_or(0);
        self.model
            .rcdata
            .entry(language_id)
            .or_default()
            .insert(resource_id, RcDataEntry { data });
        Ok(())
    }

    // -- commit -----------------------------------------------------------

    pub fn commit(&mut self) -> Result<(), Error> {
        self.commit_to(self.loaded_path.clone().context(crate::error::CommitFailedSnafu {
            reason: "commit called before load",
        })?)
    }

    /// Commits to `output_path`. The original tool always edits a file in place; `output_path` is
    /// the loaded path for `commit()`, and callers importing it as a standalone primitive (e.g.
    /// tests exercising [`Collaborator`] without touching real files) should note the Windows
    /// backend updates resources through `BeginUpdateResourceW`, which requires `output_path` to
    /// already exist and be a copy of the loaded file.
    pub fn commit_to(&mut self, output_path: PathBuf) -> Result<(), Error> {
        self.ensure_loaded()?;
        self.collaborator.begin_update(&output_path)?;

        // Fixed write order: version, then manifest, then strings, then icons, then rcdata.
        // Earlier writes can allocate directory slots later writes depend on, so this is observable.
        for info in &self.model.version_infos {
            let data = version_info::serialize(info);
            self.collaborator.update(ResourceKey { type_id: RT_VERSION, name_id: 1, language: info.language_id }, data)?;
        }

        if self.model.manifest.current != self.model.manifest.original {
            if let Some(current) = &self.model.manifest.current {
                self.collaborator.update(
                    ResourceKey { type_id: RT_MANIFEST, name_id: 1, language: manifest::MANIFEST_LANGUAGE_ID },
                    current.clone(),
                )?;
            }
        }

        for (&language, blocks) in &self.model.string_tables {
            for (&block_id, block) in blocks {
                let data = string_table::serialize(block);
                self.collaborator.update(
                    ResourceKey { type_id: RT_STRING, name_id: block_id, language },
                    data,
                )?;
            }
        }

        for &(language, bundle_id) in &self.dirty_icons {
            let Some(state) = self.model.icons.get(&language) else { continue };
            let Some(bundle) = state.bundles.get(&bundle_id) else { continue };

            log::debug!(
                "writing icon bundle {bundle_id} for language {language} ({} image(s))",
                bundle.images.len()
            );
            let group_data = icon::serialize_group_icon(bundle);
            self.collaborator.update(
                ResourceKey { type_id: RT_GROUP_ICON, name_id: bundle_id, language },
                group_data,
            )?;
            for (index, image) in bundle.images.iter().enumerate() {
                let id = icon::icon_resource_id(index);
                self.collaborator.update(ResourceKey { type_id: RT_ICON, name_id: id, language }, image.data.clone())?;
            }
            for id in (bundle.images.len() as u16 + 1)..=state.max_icon_id {
                log::debug!("removing stale RT_ICON {id} for language {language}");
                self.collaborator.remove(ResourceKey { type_id: RT_ICON, name_id: id, language })?;
            }
        }

        for (&language, entries) in &self.model.rcdata {
            for (&id, entry) in entries {
                self.collaborator.update(ResourceKey { type_id: RT_RCDATA, name_id: id, language }, entry.data.clone())?;
            }
        }

        self.collaborator.commit()?;
        self.state = State::Committed;
        Ok(())
    }

    pub fn discard(&mut self) -> Result<(), Error> {
        self.ensure_loaded()?;
        self.collaborator.discard()?;
        self.state = State::Dropped;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborator::Session;
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    /// A pure in-memory [`Collaborator`] for exercising [`ResourceUpdater`] without touching disk
    /// or a real PE file.
    #[derive(Default)]
    struct FakeCollaborator {
        session: Session,
        entries: BTreeMap<ResourceKey, Vec<u8>>,
        pending: BTreeMap<ResourceKey, Vec<u8>>,
        committed: Option<BTreeMap<ResourceKey, Vec<u8>>>,
    }

    impl Collaborator for FakeCollaborator {
        fn load(&mut self, path: &Path) -> Result<(), Error> {
            self.session.loaded_path = Some(path.to_path_buf());
            Ok(())
        }

        fn enumerate(&self) -> Result<Vec<ResourceKey>, Error> {
            Ok(self.entries.keys().copied().collect())
        }

        fn read(&self, key: ResourceKey) -> Result<Vec<u8>, Error> {
            self.entries.get(&key).cloned().context(crate::error::NotFoundSnafu { reason: "missing" })
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
            self.committed = Some(self.pending.clone());
            Ok(())
        }

        fn discard(&mut self) -> Result<(), Error> {
            self.pending.clear();
            Ok(())
        }
    }

    fn seed_version_info(collab: &mut FakeCollaborator, language: u16) {
        let mut info = VersionInfo { language_id: language, ..Default::default() };
        info.fixed = Some(Default::default());
        info.string_tables.push(crate::model::StringTable {
            encoding: Some(Translation { language, code_page: 1200 }),
            strings: vec![("ProductName".into(), "Example".into())],
        });
        let data = version_info::serialize(&info);
        collab.entries.insert(ResourceKey { type_id: RT_VERSION, name_id: 1, language }, data);
    }

    #[test]
    fn loads_version_info_and_reads_strings_back() {
        let mut collab = FakeCollaborator::default();
        seed_version_info(&mut collab, 0x0409);
        let mut updater = ResourceUpdater::new(collab);
        updater.load(Path::new("fixture.exe")).unwrap();
        assert_eq!(updater.get_version_string(None, "ProductName"), Some("Example"));
        assert_eq!(updater.get_version_string(Some(0x0409), "ProductName"), Some("Example"));
    }

    #[test]
    fn set_version_string_round_trips_through_commit() {
        let mut collab = FakeCollaborator::default();
        seed_version_info(&mut collab, 0x0409);
        let mut updater = ResourceUpdater::new(collab);
        updater.load(Path::new("fixture.exe")).unwrap();
        updater.set_version_string(None, "ProductName", "Renamed").unwrap();
        updater.commit_to(PathBuf::from("out.exe")).unwrap();
    }

    #[test]
    fn set_file_version_without_fixed_file_info_errors() {
        let mut collab = FakeCollaborator::default();
        let info = VersionInfo { language_id: 0x0409, fixed: None, ..Default::default() };
        collab.entries.insert(
            ResourceKey { type_id: RT_VERSION, name_id: 1, language: 0x0409 },
            version_info::serialize(&info),
        );
        let mut updater = ResourceUpdater::new(collab);
        updater.load(Path::new("fixture.exe")).unwrap();
        let err = updater.set_file_version(None, 1, 0, 0, 0).unwrap_err();
        assert!(matches!(err, Error::MissingFixedFileInfo { .. }));
    }

    #[test]
    fn resource_string_round_trips_block_addressing() {
        let mut updater = ResourceUpdater::new(FakeCollaborator::default());
        updater.load(Path::new("fixture.exe")).unwrap();
        updater.set_resource_string(Some(0x0409), 37, "hello").unwrap();
        assert_eq!(updater.get_resource_string(Some(0x0409), 37), Some("hello"));
        assert_eq!(updater.get_resource_string(Some(0x0409), 38), None);
    }

    fn sample_ico_bytes() -> Vec<u8> {
        use crate::bytes::Writer;
        let image_bytes = vec![0xAAu8; 8];
        let mut w = Writer::new();
        w.write_u16(0);
        w.write_u16(1);
        w.write_u16(1);
        let header_end = 6 + 16;
        w.write_bytes(&[16, 16, 0, 0]);
        w.write_u16(1);
        w.write_u16(32);
        w.write_u32(image_bytes.len() as u32);
        w.write_u32(header_end as u32);
        w.write_bytes(&image_bytes);
        w.into_bytes()
    }

    #[test]
    fn set_icon_defaults_to_first_bundle_and_marks_it_dirty() {
        let mut updater = ResourceUpdater::new(FakeCollaborator::default());
        updater.load(Path::new("fixture.exe")).unwrap();
        let ico = sample_ico_bytes();
        updater.set_icon(None, None, &ico).unwrap();
        assert!(updater.model().icons.get(&0).unwrap().bundles.contains_key(&1));
        updater.commit_to(PathBuf::from("out.exe")).unwrap();
    }

    #[test]
    fn set_requested_execution_level_substitutes_in_place() {
        let mut collab = FakeCollaborator::default();
        let manifest = br#"<requestedExecutionLevel level="asInvoker" uiAccess="false"/>"#.to_vec();
        collab.entries.insert(ResourceKey { type_id: RT_MANIFEST, name_id: 1, language: 1033 }, manifest);
        let mut updater = ResourceUpdater::new(collab);
        updater.load(Path::new("fixture.exe")).unwrap();
        updater.set_requested_execution_level("requireAdministrator").unwrap();
        let current = updater.model.manifest.current.as_ref().unwrap();
        assert_eq!(manifest::extract_requested_execution_level(current).unwrap(), b"requireAdministrator");
    }

    #[test]
    fn manifest_from_a_non_1033_language_is_still_written_under_1033() {
        let mut collab = FakeCollaborator::default();
        let manifest = br#"<requestedExecutionLevel level="asInvoker" uiAccess="false"/>"#.to_vec();
        collab.entries.insert(ResourceKey { type_id: RT_MANIFEST, name_id: 1, language: 0 }, manifest);
        let mut updater = ResourceUpdater::new(collab);
        updater.load(Path::new("fixture.exe")).unwrap();
        updater.set_requested_execution_level("requireAdministrator").unwrap();
        updater.commit_to(PathBuf::from("out.exe")).unwrap();
        let committed = updater.collaborator.committed.as_ref().unwrap();
        assert!(committed.contains_key(&ResourceKey {
            type_id: RT_MANIFEST,
            name_id: 1,
            language: manifest::MANIFEST_LANGUAGE_ID,
        }));
        assert!(!committed.keys().any(|key| key.type_id == RT_MANIFEST && key.language == 0));
    }

    #[test]
    fn setters_before_load_fail_with_not_ready() {
        let mut updater = ResourceUpdater::new(FakeCollaborator::default());
        let err = updater.set_resource_string(Some(0x0409), 1, "x").unwrap_err();
        assert!(matches!(err, Error::NotReady { .. }));
    }

    #[test]
    fn commit_twice_fails_with_not_ready() {
        let mut updater = ResourceUpdater::new(FakeCollaborator::default());
        updater.load(Path::new("fixture.exe")).unwrap();
        updater.commit_to(PathBuf::from("out.exe")).unwrap();
        let err = updater.commit_to(PathBuf::from("out.exe")).unwrap_err();
        assert!(matches!(err, Error::NotReady { .. }));
    }
}
