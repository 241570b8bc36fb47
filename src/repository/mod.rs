//! Block repository: an ordered collection of Mii records keyed by client id.
//!
//! Nothing is resident until [`BlockRepository::load_all_blocks`] runs.
//! After that, lookups and edits work on the resident copy and the store is
//! only touched again by the next load or save.  Duplicate ids resolve to the
//! first block in storage order.

mod file;
mod memory;

pub use file::FileBlockRepository;
pub use memory::MemoryBlockRepository;

use std::io;

use thiserror::Error;
use tracing::{debug, warn};

use crate::block::{generate_client_id, system_id_from_mac, BlockError, ClientIdKind, RawBlock};

pub const DEFAULT_SLOT_COUNT: usize = 100;
/// The `RNOD` magic.
pub const DEFAULT_HEADER_LEN: usize = 0x04;
pub const DEFAULT_CRC_OFFSET: usize = 0x1F1DE;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Failed to persist blocks: {0}")]
    Persistence(#[from] io::Error),
    #[error("No block with client id {0:08x}")]
    NotFound(u32),
    #[error("Block carries client id {found:08x}, expected {expected:08x}")]
    Mismatch { expected: u32, found: u32 },
    #[error("Client id 0 is reserved for empty slots")]
    InvalidClientId,
    #[error("A block with client id {0:08x} already exists")]
    DuplicateClientId(u32),
    #[error("All {0} slots are in use")]
    NoFreeSlot(usize),
    #[error("{count} blocks exceed the {slots} available slots")]
    TooManyBlocks { count: usize, slots: usize },
    #[error("No blocks are loaded")]
    NotLoaded,
    #[error(transparent)]
    Block(#[from] BlockError),
}

/// Store layout knobs.  The default matches `RFL_DB.dat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryOptions {
    pub slot_count: usize,
    pub header_len: usize,
    pub crc_offset: Option<usize>,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            slot_count: DEFAULT_SLOT_COUNT,
            header_len: DEFAULT_HEADER_LEN,
            crc_offset: Some(DEFAULT_CRC_OFFSET),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ResidentBlocks {
    blocks: Option<Vec<RawBlock>>,
    dirty:  bool,
}

impl ResidentBlocks {
    fn replace(&mut self, blocks: Vec<RawBlock>) {
        self.blocks = Some(blocks);
        self.dirty = false;
    }

    fn position(&self, id: u32) -> Option<usize> {
        if id == 0 {
            return None;
        }
        self.blocks.as_ref()?.iter().position(|b| b.client_id() == id)
    }
}

/// Implementors supply raw store access and somewhere to keep the resident
/// blocks; everything else is provided.
pub trait BlockRepository {
    /// An absent store yields `Ok(vec![])`.
    fn read_store(&self) -> Result<Vec<RawBlock>, RepositoryError>;
    fn write_store(&mut self, blocks: &[RawBlock]) -> Result<(), RepositoryError>;
    fn resident(&self) -> &ResidentBlocks;
    fn resident_mut(&mut self) -> &mut ResidentBlocks;
    fn options(&self) -> &RepositoryOptions;

    /// Discards unsaved edits.  An unreadable store loads as empty.
    fn load_all_blocks(&mut self) -> Vec<RawBlock> {
        let blocks = self.read_store().unwrap_or_else(|e| {
            warn!(error = %e, "block store unreadable, loading empty collection");
            Vec::new()
        });
        debug!(count = blocks.len(), "loaded blocks");
        self.resident_mut().replace(blocks.clone());
        blocks
    }

    /// Leaves the resident blocks and their dirty flag alone.
    fn save_all_blocks(&mut self, blocks: &[RawBlock]) -> Result<(), RepositoryError> {
        let slots = self.options().slot_count;
        if blocks.len() > slots {
            return Err(RepositoryError::TooManyBlocks { count: blocks.len(), slots });
        }
        self.write_store(blocks)?;
        debug!(count = blocks.len(), "saved blocks");
        Ok(())
    }

    fn save(&mut self) -> Result<(), RepositoryError> {
        let blocks = self.blocks().ok_or(RepositoryError::NotLoaded)?.to_vec();
        self.save_all_blocks(&blocks)?;
        self.resident_mut().dirty = false;
        Ok(())
    }

    fn get_raw_block_by_client_id(&self, id: u32) -> Option<RawBlock> {
        let index = self.resident().position(id)?;
        self.blocks().map(|blocks| blocks[index].clone())
    }

    fn update_block_by_client_id(&mut self, id: u32, new_block: RawBlock) -> Result<(), RepositoryError> {
        let found = new_block.client_id();
        if found != id {
            return Err(RepositoryError::Mismatch { expected: id, found });
        }
        let index = self.resident().position(id).ok_or(RepositoryError::NotFound(id))?;
        let resident = self.resident_mut();
        if let Some(blocks) = resident.blocks.as_mut() {
            blocks[index] = new_block;
            resident.dirty = true;
        }
        debug!(client_id = id, slot = index, "updated block");
        Ok(())
    }

    /// Returns the slot the block landed in.
    fn add_block(&mut self, block: RawBlock) -> Result<usize, RepositoryError> {
        let id = block.client_id();
        if id == 0 {
            return Err(RepositoryError::InvalidClientId);
        }
        if self.resident().position(id).is_some() {
            return Err(RepositoryError::DuplicateClientId(id));
        }
        let slots = self.options().slot_count;
        let resident = self.resident_mut();
        let blocks = resident.blocks.as_mut().ok_or(RepositoryError::NotLoaded)?;

        let index = match blocks.iter().position(RawBlock::is_empty) {
            Some(index) => {
                blocks[index] = block;
                index
            }
            None if blocks.len() < slots => {
                blocks.push(block);
                blocks.len() - 1
            }
            None => return Err(RepositoryError::NoFreeSlot(slots)),
        };
        resident.dirty = true;
        debug!(client_id = id, slot = index, "added block");
        Ok(index)
    }

    /// Stamp `block` with a freshly minted client id and the system id of the
    /// console at `mac`, then add it.  Returns the new id.
    fn add_new_block(&mut self, mut block: RawBlock, mac: &str, kind: ClientIdKind) -> Result<u32, RepositoryError> {
        block.set_system_id(system_id_from_mac(mac)?);
        if !self.is_loaded() {
            return Err(RepositoryError::NotLoaded);
        }
        let mut id = generate_client_id(kind);
        while self.resident().position(id).is_some() {
            id = generate_client_id(kind);
        }
        block.set_client_id(id);
        self.add_block(block)?;
        Ok(id)
    }

    /// Later slots keep their positions.
    fn remove_block_by_client_id(&mut self, id: u32) -> Result<(), RepositoryError> {
        let index = self.resident().position(id).ok_or(RepositoryError::NotFound(id))?;
        let resident = self.resident_mut();
        if let Some(blocks) = resident.blocks.as_mut() {
            blocks[index] = RawBlock::zeroed();
            resident.dirty = true;
        }
        debug!(client_id = id, slot = index, "removed block");
        Ok(())
    }

    fn blocks(&self) -> Option<&[RawBlock]> {
        self.resident().blocks.as_deref()
    }

    fn is_loaded(&self) -> bool {
        self.resident().blocks.is_some()
    }

    fn is_dirty(&self) -> bool {
        self.resident().dirty
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn mii(id: u32, name: &str) -> RawBlock {
        let mut block = RawBlock::zeroed();
        block.set_client_id(id);
        block.set_name(name);
        block
    }

    fn loaded(blocks: Vec<RawBlock>) -> MemoryBlockRepository {
        let mut repo = MemoryBlockRepository::with_blocks(blocks);
        repo.load_all_blocks();
        repo
    }

    #[test]
    fn starts_unloaded() {
        let repo = MemoryBlockRepository::with_blocks(vec![mii(1, "A")]);
        assert!(!repo.is_loaded());
        assert_eq!(repo.get_raw_block_by_client_id(1), None);
    }

    #[test]
    fn lookup_finds_each_block() {
        let blocks = vec![mii(1, "A"), RawBlock::zeroed(), mii(7, "B"), mii(3, "C")];
        let repo = loaded(blocks.clone());
        for block in blocks.iter().filter(|b| !b.is_empty()) {
            assert_eq!(repo.get_raw_block_by_client_id(block.client_id()).as_ref(), Some(block));
        }
        assert_eq!(repo.get_raw_block_by_client_id(0), None);
        assert_eq!(repo.get_raw_block_by_client_id(99), None);
    }

    #[test]
    fn duplicate_ids_resolve_to_first() {
        let repo = loaded(vec![mii(5, "First"), mii(5, "Second")]);
        assert_eq!(repo.get_raw_block_by_client_id(5).unwrap().name(), "First");
    }

    #[test]
    fn update_replaces_in_place() {
        let mut repo = loaded(vec![mii(1, "A"), mii(2, "B"), mii(3, "C")]);
        repo.update_block_by_client_id(2, mii(2, "Renamed")).unwrap();

        let names: Vec<_> = repo.blocks().unwrap().iter().map(RawBlock::name).collect();
        assert_eq!(names, ["A", "Renamed", "C"]);
        assert!(repo.is_dirty());
    }

    #[test]
    fn update_rejects_mismatch_without_changes() {
        let mut repo = loaded(vec![mii(1, "A"), mii(2, "B")]);
        let before = repo.blocks().unwrap().to_vec();

        let err = repo.update_block_by_client_id(2, mii(9, "X")).unwrap_err();
        assert!(matches!(err, RepositoryError::Mismatch { expected: 2, found: 9 }));
        assert_eq!(repo.blocks().unwrap(), &before[..]);
        assert!(!repo.is_dirty());
    }

    #[test]
    fn update_absent_is_not_found() {
        let mut repo = loaded(vec![mii(1, "A")]);
        let err = repo.update_block_by_client_id(4, mii(4, "D")).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(4)));

        let err = repo.update_block_by_client_id(0, RawBlock::zeroed()).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(0)));
    }

    #[test]
    fn add_fills_first_empty_slot() {
        let mut repo = loaded(vec![mii(1, "A"), RawBlock::zeroed(), mii(3, "C")]);
        assert_eq!(repo.add_block(mii(4, "D")).unwrap(), 1);
        assert_eq!(repo.add_block(mii(5, "E")).unwrap(), 3);
        assert!(matches!(repo.add_block(mii(5, "E")), Err(RepositoryError::DuplicateClientId(5))));
        assert!(matches!(repo.add_block(RawBlock::zeroed()), Err(RepositoryError::InvalidClientId)));
    }

    #[test]
    fn add_respects_slot_count() {
        let options = RepositoryOptions { slot_count: 2, ..RepositoryOptions::default() };
        let mut repo = MemoryBlockRepository::with_options(vec![mii(1, "A"), mii(2, "B")], options);
        assert!(matches!(repo.add_block(mii(3, "C")), Err(RepositoryError::NotLoaded)));
        repo.load_all_blocks();
        assert!(matches!(repo.add_block(mii(3, "C")), Err(RepositoryError::NoFreeSlot(2))));
    }

    #[test]
    fn add_new_block_mints_id() {
        let mut repo = loaded(vec![mii(1, "A"), RawBlock::zeroed()]);
        let mut block = RawBlock::zeroed();
        block.set_name("Fresh");

        let id = repo.add_new_block(block.clone(), "00:17:AB:12:34:56", ClientIdKind::Standard).unwrap();
        assert_eq!(id >> 29, 0b100);
        let added = repo.get_raw_block_by_client_id(id).unwrap();
        assert_eq!(added.name(), "Fresh");
        assert_eq!(added.system_id(), [0xC2, 0x12, 0x34, 0x56]);
        assert_eq!(repo.blocks().unwrap()[1], added);

        let second = repo.add_new_block(block.clone(), "00:17:AB:12:34:56", ClientIdKind::Blue).unwrap();
        assert_ne!(second, id);
        assert_eq!(second >> 29, 0b110);
    }

    #[test]
    fn add_new_block_checks_mac_and_state() {
        let mut repo = MemoryBlockRepository::new();
        let err = repo.add_new_block(RawBlock::zeroed(), "00:17:AB", ClientIdKind::Standard).unwrap_err();
        assert!(matches!(err, RepositoryError::Block(BlockError::InvalidMac(_))));
        let err = repo.add_new_block(RawBlock::zeroed(), "00:17:AB:12:34:56", ClientIdKind::Standard).unwrap_err();
        assert!(matches!(err, RepositoryError::NotLoaded));
    }

    #[test]
    fn remove_zeroes_slot() {
        let mut repo = loaded(vec![mii(1, "A"), mii(2, "B")]);
        repo.remove_block_by_client_id(1).unwrap();
        assert!(repo.blocks().unwrap()[0].is_empty());
        assert_eq!(repo.blocks().unwrap()[1].client_id(), 2);
        assert!(matches!(repo.remove_block_by_client_id(1), Err(RepositoryError::NotFound(1))));
    }

    #[test]
    fn reload_discards_edits() {
        let mut repo = loaded(vec![mii(1, "A")]);
        repo.update_block_by_client_id(1, mii(1, "Edited")).unwrap();
        repo.load_all_blocks();
        assert_eq!(repo.get_raw_block_by_client_id(1).unwrap().name(), "A");
        assert!(!repo.is_dirty());
    }

    #[test]
    fn saving_other_blocks_keeps_edits_dirty() {
        let mut repo = loaded(vec![mii(1, "A")]);
        repo.update_block_by_client_id(1, mii(1, "Edited")).unwrap();
        repo.save_all_blocks(&[mii(9, "Other")]).unwrap();

        assert!(repo.is_dirty());
        assert_eq!(repo.get_raw_block_by_client_id(1).unwrap().name(), "Edited");
        assert_eq!(repo.stored()[0].name(), "Other");

        repo.save().unwrap();
        assert!(!repo.is_dirty());
        assert_eq!(repo.stored()[0].name(), "Edited");
    }

    #[test]
    fn save_rejects_overflow() {
        let options = RepositoryOptions { slot_count: 1, ..RepositoryOptions::default() };
        let mut repo = MemoryBlockRepository::with_options(Vec::new(), options);
        let err = repo.save_all_blocks(&[mii(1, "A"), mii(2, "B")]).unwrap_err();
        assert!(matches!(err, RepositoryError::TooManyBlocks { count: 2, slots: 1 }));
    }
}
