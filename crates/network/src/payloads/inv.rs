//! Inventory announcements.

use appchain_core::{InventoryType, UInt256};
use appchain_io::{helper, BinaryWriter, IoError, IoResult, MemoryReader, Serializable};
use appchain_ledger::MAX_INV_GROUP_HASHES;

fn read_inventory_type(reader: &mut MemoryReader) -> IoResult<InventoryType> {
    let tag = reader.read_u8()?;
    InventoryType::from_byte(tag)
        .ok_or_else(|| IoError::invalid_format(format!("unknown inventory type 0x{tag:02x}")))
}

/// One announced hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvPayload {
    pub inv_type: InventoryType,
    pub hash: UInt256,
}

impl InvPayload {
    pub fn new(inv_type: InventoryType, hash: UInt256) -> Self {
        Self { inv_type, hash }
    }
}

impl Serializable for InvPayload {
    fn size(&self) -> usize {
        1 + UInt256::LENGTH
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.inv_type.to_byte());
        writer.write_serializable(&self.hash);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        Ok(Self {
            inv_type: read_inventory_type(reader)?,
            hash: reader.read_serializable()?,
        })
    }
}

/// Up to `MAX_INV_GROUP_HASHES` hashes of one inventory type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvGroupPayload {
    pub inv_type: InventoryType,
    pub hashes: Vec<UInt256>,
}

impl InvGroupPayload {
    /// # Panics
    ///
    /// Panics if `hashes` exceeds the group limit; use `create_groups` for
    /// arbitrary lists.
    pub fn new(inv_type: InventoryType, hashes: Vec<UInt256>) -> Self {
        assert!(
            hashes.len() <= MAX_INV_GROUP_HASHES,
            "inventory group holds at most {MAX_INV_GROUP_HASHES} hashes"
        );
        Self { inv_type, hashes }
    }

    /// Splits `hashes` into groups of at most `MAX_INV_GROUP_HASHES`.
    pub fn create_groups(inv_type: InventoryType, hashes: &[UInt256]) -> Vec<Self> {
        hashes
            .chunks(MAX_INV_GROUP_HASHES)
            .map(|chunk| Self {
                inv_type,
                hashes: chunk.to_vec(),
            })
            .collect()
    }
}

impl Serializable for InvGroupPayload {
    fn size(&self) -> usize {
        1 + helper::get_array_size(&self.hashes)
    }

    fn serialize(&self, writer: &mut BinaryWriter) {
        writer.write_u8(self.inv_type.to_byte());
        writer.write_serializable_vec(&self.hashes);
    }

    fn deserialize(reader: &mut MemoryReader) -> IoResult<Self> {
        let inv_type = read_inventory_type(reader)?;
        let hashes = reader.read_serializable_vec(MAX_INV_GROUP_HASHES)?;
        Ok(Self { inv_type, hashes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use appchain_core::hash256;
    use appchain_io::SerializableExt;

    fn hashes(count: usize) -> Vec<UInt256> {
        (0..count as u32).map(|i| hash256(&i.to_le_bytes())).collect()
    }

    #[test]
    fn test_create_groups_splits_at_limit() {
        let all = hashes(1200);
        let groups = InvGroupPayload::create_groups(InventoryType::Transaction, &all);
        let sizes: Vec<usize> = groups.iter().map(|group| group.hashes.len()).collect();
        assert_eq!(sizes, vec![500, 500, 200]);
        let rejoined: Vec<UInt256> = groups.into_iter().flat_map(|group| group.hashes).collect();
        assert_eq!(rejoined, all);

        assert!(InvGroupPayload::create_groups(InventoryType::Block, &[]).is_empty());
    }

    #[test]
    fn test_oversized_group_rejected() {
        let mut writer = BinaryWriter::new();
        writer.write_u8(InventoryType::Block.to_byte());
        writer.write_serializable_vec(&hashes(MAX_INV_GROUP_HASHES + 1));
        assert!(InvGroupPayload::from_array(&writer.into_bytes()).is_err());
    }

    #[test]
    fn test_unknown_inventory_type_rejected() {
        let mut bytes = InvPayload::new(InventoryType::Block, UInt256::zero()).to_array();
        bytes[0] = 0x7F;
        assert!(InvPayload::from_array(&bytes).is_err());
    }
}
