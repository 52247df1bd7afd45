//! Error conditions surfaced by the resource codec and the resource-update orchestrator.

use snafu::prelude::*;

/// Error conditions for loading, parsing, and committing PE resources.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
#[non_exhaustive]
pub enum Error {
    /// Thrown if the PE file cannot be loaded at all.
    #[snafu(display("Unable to open/load PE file: {reason}"))]
    OpenFailed { reason: String },

    /// Thrown if a version, icon, or resource directory structure violates its invariants.
    #[snafu(display("Malformed resource structure: {reason}"))]
    ParseFailed { reason: String },

    /// Thrown if a requested key/id/language is absent.
    #[snafu(display("Not found: {reason}"))]
    NotFound { reason: String },

    /// Thrown when setting a numeric version on a `VersionInfo` without a `FixedFileInfo`.
    #[snafu(display("No FixedFileInfo present for language {language_id:#06X}"))]
    MissingFixedFileInfo { language_id: u16 },

    /// Thrown if reading an icon/manifest/rcdata file from disk fails.
    #[snafu(display("I/O error: {source}"))]
    IoFailed { source: std::io::Error },

    /// Thrown if the collaborator rejects or fails the write session.
    #[snafu(display("Commit failed: {reason}"))]
    CommitFailed { reason: String },

    /// Thrown when an operation is attempted out of turn against the `Empty -> Loaded ->
    /// Edited* -> Committed` lifecycle (editing before `load`, committing twice).
    #[snafu(display("Not ready: {reason}"))]
    NotReady { reason: String },
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

impl From<std::io::Error> for Error {
    #[inline]
    fn from(source: std::io::Error) -> Self {
        Self::IoFailed { source }
    }
}

impl From<rcedit_core::data::Error> for Error {
    #[inline]
    fn from(error: rcedit_core::data::Error) -> Self {
        Self::ParseFailed { reason: error.to_string() }
    }
}
