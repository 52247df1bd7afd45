//! `RT_RCDATA`: opaque application-defined data, ingested verbatim from a file on disk.
//!
//! Unlike the other resource types, rcedit never decodes `RT_RCDATA` contents; `--set-rcdata`
//! only ever replaces or inserts a whole blob keyed by its numeric resource id.

use crate::model::RcDataEntry;

/// Wraps `data` for insertion under a resource id. The language is carried by the map key in
/// [`crate::model::ResourceModel::rcdata`], not by this struct.
pub fn entry(data: Vec<u8>) -> RcDataEntry {
    RcDataEntry { data }
}
