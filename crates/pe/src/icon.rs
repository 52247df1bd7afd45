//! Codec between `.ico` files and the `RT_GROUP_ICON`/`RT_ICON` resource pair.
//!
//! A `.ico` file is an `ICONDIR` header, an array of `ICONDIRENTRY` records (14 bytes wide, one
//! per image, pointing at that image's raw bytes elsewhere in the file), then the image bytes
//! themselves. Each image becomes one `RT_ICON` resource; the directory becomes a single
//! `RT_GROUP_ICON` resource built from `GRPICONDIRENTRY` records.
//!
//! `GRPICONENTRY` here intentionally does not match the `winnt.h` `GRPICONDIRENTRY` layout: `planes`
//! and `bitCount` are each one byte wide rather than a `WORD`, `bitCount`'s on-disk byte is always
//! written as zero, and the real `wBitCount`/`dwBytesInRes` values are instead carried one slot to
//! the right, in `bytesInRes`/`bytesInRes2`. This is what the original tool ships and Explorer/the
//! loader both accept it, so the mapping is reproduced exactly rather than corrected:
//! `planes <- source planes (truncated to a byte)`, `bitCount <- 0`, `bytesInRes <- source
//! bitCount`, `bytesInRes2 <- low 16 bits of source bytesInRes`.

use crate::bytes::{Reader, Writer};
use crate::error::{Error, ParseFailedSnafu};
use crate::model::{IconBundle, IconImage};
use snafu::prelude::*;
use snafu::OptionExt;

const ICONDIRENTRY_SIZE: usize = 16;
const GRPICONENTRY_SIZE: usize = 14;

/// Parses a `.ico` file's bytes into an [`IconBundle`], in directory order.
pub fn parse_ico_file(data: &[u8]) -> Result<IconBundle, Error> {
    let mut r = Reader::new(data);
    let reserved = r.read_u16()?;
    let kind = r.read_u16()?;
    let count = r.read_u16()?;
    ensure!(
        reserved == 0 && kind == 1,
        ParseFailedSnafu { reason: "not an .ico file (bad ICONDIR header)" }
    );

    struct Entry {
        width: u8,
        height: u8,
        color_count: u8,
        planes: u16,
        bit_count: u16,
        bytes_in_res: u32,
        image_offset: u32,
    }

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let raw = r.read_bytes(ICONDIRENTRY_SIZE)?;
        entries.push(Entry {
            width: raw[0],
            height: raw[1],
            color_count: raw[2],
            planes: u16::from_le_bytes([raw[4], raw[5]]),
            bit_count: u16::from_le_bytes([raw[6], raw[7]]),
            bytes_in_res: u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            image_offset: u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
        });
    }

    let mut images = Vec::with_capacity(entries.len());
    for entry in entries {
        let start = entry.image_offset as usize;
        let end = start
            .checked_add(entry.bytes_in_res as usize)
            .context(ParseFailedSnafu { reason: "icon image extends past end of file" })?;
        let image_data = data
            .get(start..end)
            .context(ParseFailedSnafu { reason: "icon image offset out of range" })?;
        images.push(IconImage {
            width: entry.width,
            height: entry.height,
            color_count: entry.color_count,
            planes: entry.planes,
            bit_count: entry.bit_count,
            data: image_data.to_vec(),
        });
    }

    Ok(IconBundle { images })
}

/// Builds the `RT_GROUP_ICON` resource bytes for `bundle`. Resource ids for the matching
/// `RT_ICON` entries are assigned `1..=len()` in directory order.
pub fn serialize_group_icon(bundle: &IconBundle) -> Vec<u8> {
    let mut w = Writer::new();
    w.write_u16(0); // reserved
    w.write_u16(1); // type: icon
    w.write_u16(bundle.images.len() as u16);
    for (index, image) in bundle.images.iter().enumerate() {
        w.write_bytes(&[
            image.width,
            image.height,
            image.color_count,
            0,                 // reserved
            image.planes as u8, // planes <- source planes, truncated to a byte
            0,                 // bitCount <- always zeroed
        ]);
        w.write_u16(image.bit_count); // bytesInRes <- source bitCount
        w.write_u16(image.data.len() as u16); // bytesInRes2 <- low word of source bytesInRes
        w.write_u16(0); // reserved2
        w.write_u16((index + 1) as u16); // id
    }
    debug_assert_eq!(w.position(), 6 + bundle.images.len() * GRPICONENTRY_SIZE);
    w.into_bytes()
}

/// Resource id `RT_ICON` entries are assigned within a group, `1..=len()` in directory order.
pub fn icon_resource_id(index: usize) -> u16 {
    (index + 1) as u16
}

/// One entry out of an on-disk `RT_GROUP_ICON` resource: the image's directory metadata plus the
/// `RT_ICON` resource id that holds its bytes.
pub struct GroupIconEntry {
    pub width: u8,
    pub height: u8,
    pub color_count: u8,
    pub bit_count: u16,
    pub icon_id: u16,
}

/// Parses an existing `RT_GROUP_ICON` resource's bytes, recovering each referenced `RT_ICON` id.
/// Reverses the field swap [`serialize_group_icon`] applies: the real `wBitCount` is read back
/// from the `bytesInRes` slot.
pub fn parse_group_icon(data: &[u8]) -> Result<Vec<GroupIconEntry>, Error> {
    let mut r = Reader::new(data);
    let reserved = r.read_u16()?;
    let kind = r.read_u16()?;
    let count = r.read_u16()?;
    ensure!(
        reserved == 0 && kind == 1,
        ParseFailedSnafu { reason: "not a GRPICONHEADER (bad reserved/type fields)" }
    );

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let raw = r.read_bytes(GRPICONENTRY_SIZE)?;
        entries.push(GroupIconEntry {
            width: raw[0],
            height: raw[1],
            color_count: raw[2],
            bit_count: u16::from_le_bytes([raw[6], raw[7]]),
            icon_id: u16::from_le_bytes([raw[12], raw[13]]),
        });
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_ico_bytes() -> Vec<u8> {
        let image_bytes = vec![0xAAu8; 40];
        let mut w = Writer::new();
        w.write_u16(0);
        w.write_u16(1);
        w.write_u16(1);
        let header_end = 6 + ICONDIRENTRY_SIZE;
        w.write_bytes(&[16, 16, 0, 0]);
        w.write_u16(1);
        w.write_u16(32);
        w.write_u32(image_bytes.len() as u32);
        w.write_u32(header_end as u32);
        w.write_bytes(&image_bytes);
        w.into_bytes()
    }

    #[test]
    fn parses_single_image_ico() {
        let bundle = parse_ico_file(&sample_ico_bytes()).unwrap();
        assert_eq!(bundle.images.len(), 1);
        assert_eq!(bundle.images[0].width, 16);
        assert_eq!(bundle.images[0].bit_count, 32);
        assert_eq!(bundle.images[0].data.len(), 40);
    }

    #[test]
    fn group_icon_preserves_bytes_in_res_field_swap() {
        let bundle = parse_ico_file(&sample_ico_bytes()).unwrap();
        let group = serialize_group_icon(&bundle);
        // entry starts at offset 6; planes is at +4, bitCount at +5, bytesInRes at +6, bytesInRes2
        // at +8 within the entry.
        let entry = &group[6..6 + GRPICONENTRY_SIZE];
        let planes = entry[4];
        let bit_count_byte = entry[5];
        let bytes_in_res = u16::from_le_bytes([entry[6], entry[7]]);
        let bytes_in_res2 = u16::from_le_bytes([entry[8], entry[9]]);
        assert_eq!(planes, bundle.images[0].planes as u8);
        assert_eq!(bit_count_byte, 0);
        assert_eq!(bytes_in_res, bundle.images[0].bit_count);
        assert_eq!(bytes_in_res2, bundle.images[0].data.len() as u16);
    }

    #[test]
    fn rejects_non_ico_header() {
        let err = parse_ico_file(&[1, 0, 1, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, Error::ParseFailed { .. }));
    }
}
