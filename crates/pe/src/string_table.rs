//! Codec for `RT_STRING`: each resource is a fixed block of 16 consecutive string ids, one
//! pascal-style (`u16` length prefix, no NUL terminator) UTF-16LE string per slot. An empty slot
//! is a zero length prefix with no following bytes.

use crate::bytes::{Reader, Writer};
use crate::error::Error;
use crate::model::StringBlock;

pub fn deserialize(data: &[u8]) -> Result<StringBlock, Error> {
    let mut block = StringBlock::default();
    let mut r = Reader::new(data);
    for slot in &mut block.slots {
        let len = r.read_u16()?;
        if len > 0 {
            *slot = r.read_wstring_units(len as usize)?;
        }
    }
    Ok(block)
}

pub fn serialize(block: &StringBlock) -> Vec<u8> {
    let mut w = Writer::new();
    for slot in &block.slots {
        let units: Vec<u16> = slot.encode_utf16().collect();
        w.write_u16(units.len() as u16);
        for unit in units {
            w.write_u16(unit);
        }
    }
    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_sparse_block() {
        let mut block = StringBlock::default();
        block.slots[0] = "hello".into();
        block.slots[15] = "world".into();
        let bytes = serialize(&block);
        let decoded = deserialize(&bytes).unwrap();
        assert_eq!(decoded, block);
    }

    #[test]
    fn empty_block_round_trips_to_32_zero_bytes() {
        let block = StringBlock::default();
        let bytes = serialize(&block);
        assert_eq!(bytes, vec![0u8; 32]);
    }

    #[test]
    fn block_and_slot_addressing_matches_rt_string_convention() {
        assert_eq!(StringBlock::block_id(0), 1);
        assert_eq!(StringBlock::slot_index(0), 0);
        assert_eq!(StringBlock::block_id(15), 1);
        assert_eq!(StringBlock::slot_index(15), 15);
        assert_eq!(StringBlock::block_id(16), 2);
        assert_eq!(StringBlock::slot_index(16), 0);
    }
}
