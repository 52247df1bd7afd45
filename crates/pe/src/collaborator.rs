//! The seam between [`crate::updater::ResourceUpdater`] and the host's actual resource-editing
//! facility. On Windows that's the loader/resource-update APIs `rescle.cc` wraps directly; off
//! Windows it's a from-scratch PE/COFF rewrite.

use crate::error::Error;
use std::path::{Path, PathBuf};

/// Identifies one leaf resource: its type, its numeric name/id, and its language.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ResourceKey {
    pub type_id: u16,
    pub name_id: u16,
    pub language: u16,
}

/// Backend that knows how to read a PE file's resources and write a modified copy back out.
///
/// Usage is a strict state machine: [`load`](Collaborator::load), any number of
/// [`enumerate`](Collaborator::enumerate)/[`read`](Collaborator::read) calls, then
/// [`begin_update`](Collaborator::begin_update), any number of
/// [`update`](Collaborator::update) calls, then exactly one of
/// [`commit`](Collaborator::commit)/[`discard`](Collaborator::discard).
pub trait Collaborator {
    fn load(&mut self, path: &Path) -> Result<(), Error>;
    fn enumerate(&self) -> Result<Vec<ResourceKey>, Error>;
    fn read(&self, key: ResourceKey) -> Result<Vec<u8>, Error>;
    fn begin_update(&mut self, output_path: &Path) -> Result<(), Error>;
    fn update(&mut self, key: ResourceKey, data: Vec<u8>) -> Result<(), Error>;
    /// Deletes a resource outright (used to shrink an icon bundle's trailing `RT_ICON` ids).
    fn remove(&mut self, key: ResourceKey) -> Result<(), Error>;
    fn commit(&mut self) -> Result<(), Error>;
    fn discard(&mut self) -> Result<(), Error>;
}

/// Shared bookkeeping both backends need: the loaded path and where a pending update session
/// should ultimately write.
#[derive(Default)]
pub(crate) struct Session {
    pub(crate) loaded_path: Option<PathBuf>,
    pub(crate) output_path: Option<PathBuf>,
}

#[cfg(windows)]
pub mod windows;
pub mod portable;
