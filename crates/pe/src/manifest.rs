//! `RT_MANIFEST` handling: capturing the `requestedExecutionLevel` value already present in a
//! manifest and substituting it, or replacing the manifest wholesale with a file from disk.
//!
//! The manifest is treated as a flat byte buffer, not a decoded string: the original tool reads
//! the resource's raw bytes directly (one byte per "wide char", never actually decoding UTF-16),
//! and searches for the literal ASCII bytes of `requestedExecutionLevel`/`uiAccess`. A manifest
//! whose level attribute contains a byte sequence that happens to collide with those markers
//! would be mis-sliced exactly as it would be upstream; this is preserved rather than hardened
//! since real manifests are plain ASCII/UTF-8 XML.

use crate::error::{Error, ParseFailedSnafu};
use snafu::prelude::*;

const LEVEL_MARKER: &[u8] = b"requestedExecutionLevel";
const END_MARKER: &[u8] = b"uiAccess";

/// Language id every manifest write uses, matching the original tool.
pub const MANIFEST_LANGUAGE_ID: u16 = 1033;

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|window| window == needle)
}

/// Extracts the bytes of the level attribute's value between `requestedExecutionLevel` and
/// `uiAccess`, at the exact offsets (`+31`/`-33`) the original encoding uses: `found` is the start
/// of the tag name `requestedExecutionLevel` (23 bytes) itself, and `found + 31` skips past that
/// plus the following ` level="` (8 bytes); `end - found - 33` additionally trims the closing
/// `" ` before `uiAccess` (2 bytes).
pub fn extract_requested_execution_level(manifest: &[u8]) -> Result<Vec<u8>, Error> {
    let found = find(manifest, LEVEL_MARKER).context(ParseFailedSnafu {
        reason: "manifest has no requestedExecutionLevel attribute",
    })?;
    let end = find(manifest, END_MARKER)
        .context(ParseFailedSnafu { reason: "manifest has no uiAccess attribute" })?;
    let start = found + 31;
    ensure!(
        end >= start + 2 && end - found >= 33,
        ParseFailedSnafu { reason: "manifest execution level markers out of expected order" }
    );
    let len = end - found - 33;
    manifest
        .get(start..start + len)
        .map(<[u8]>::to_vec)
        .context(ParseFailedSnafu { reason: "manifest execution level slice out of range" })
}

/// Replaces every occurrence of `original_level` with `new_level` in `manifest`, in place.
pub fn set_requested_execution_level(manifest: &[u8], original_level: &[u8], new_level: &str) -> Vec<u8> {
    if original_level.is_empty() {
        return manifest.to_vec();
    }
    let new_bytes = new_level.as_bytes();
    let mut out = Vec::with_capacity(manifest.len());
    let mut pos = 0;
    while pos < manifest.len() {
        if manifest[pos..].starts_with(original_level) {
            out.extend_from_slice(new_bytes);
            pos += original_level.len();
        } else {
            out.push(manifest[pos]);
            pos += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_manifest(level: &str) -> Vec<u8> {
        format!(
            r#"<?xml version="1.0"?><assembly><trustInfo><security><requestedPrivileges><requestedExecutionLevel level="{level}" uiAccess="false"/></requestedPrivileges></security></trustInfo></assembly>"#
        )
        .into_bytes()
    }

    #[test]
    fn extracts_asinvoker_level() {
        let manifest = sample_manifest("asInvoker");
        let level = extract_requested_execution_level(&manifest).unwrap();
        assert_eq!(level, b"asInvoker");
    }

    #[test]
    fn substitutes_every_occurrence() {
        let manifest = sample_manifest("asInvoker");
        let original = extract_requested_execution_level(&manifest).unwrap();
        let updated = set_requested_execution_level(&manifest, &original, "requireAdministrator");
        let level = extract_requested_execution_level(&updated).unwrap();
        assert_eq!(level, b"requireAdministrator");
    }

    #[test]
    fn missing_markers_is_a_parse_error() {
        let err = extract_requested_execution_level(b"<assembly/>").unwrap_err();
        assert!(matches!(err, Error::ParseFailed { .. }));
    }
}
