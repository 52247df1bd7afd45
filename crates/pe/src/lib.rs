//! Codec and mutation model for the resource section of a PE/COFF image: `VS_VERSIONINFO`,
//! `RT_STRING` blocks, `RT_GROUP_ICON`/`RT_ICON` pairs, `RT_MANIFEST`, and `RT_RCDATA`, plus the
//! [`updater::ResourceUpdater`] orchestrator that loads, edits, and commits them back through a
//! [`collaborator::Collaborator`] backend.
pub mod prelude;

pub mod bytes;
pub mod collaborator;
pub mod error;
pub mod icon;
pub mod manifest;
pub mod model;
pub mod pe;
pub mod rcdata;
pub mod resource_dir;
pub mod string_table;
pub mod updater;
pub mod version_info;
