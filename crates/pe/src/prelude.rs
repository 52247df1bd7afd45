//! Re-exports the types most callers of `rcedit_pe` need: the error type, the resource model, and
//! the updater plus its collaborator backends.

pub use crate::collaborator::{Collaborator, ResourceKey};
pub use crate::error::Error;
pub use crate::model::{
    FixedFileInfo, IconBundle, IconImage, IconLangState, ManifestState, RcDataEntry, ResourceModel,
    StringBlock, StringTable, Translation, VersionInfo,
};
pub use crate::updater::ResourceUpdater;

pub use crate::collaborator::portable::PortableCollaborator;
#[cfg(windows)]
pub use crate::collaborator::windows::WindowsCollaborator;
