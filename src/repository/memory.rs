use std::cell::Cell;
use std::io;

use super::{BlockRepository, RepositoryError, RepositoryOptions, ResidentBlocks};
use crate::block::RawBlock;

/// In-memory repository whose "store" is a plain vector.
///
/// Counts store reads and writes, and can be told to fail saves, so callers
/// can exercise their error paths without touching the filesystem.
#[derive(Debug, Default)]
pub struct MemoryBlockRepository {
    store:      Vec<RawBlock>,
    options:    RepositoryOptions,
    resident:   ResidentBlocks,
    fail_saves: bool,
    reads:      Cell<usize>,
    writes:     usize,
}

impl MemoryBlockRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_blocks(store: Vec<RawBlock>) -> Self {
        Self::with_options(store, RepositoryOptions::default())
    }

    pub fn with_options(store: Vec<RawBlock>, options: RepositoryOptions) -> Self {
        Self { store, options, ..Self::default() }
    }

    /// Make subsequent saves fail with a persistence error.
    pub fn fail_saves(&mut self, fail: bool) {
        self.fail_saves = fail;
    }

    /// Current contents of the backing store.
    pub fn stored(&self) -> &[RawBlock] {
        &self.store
    }

    pub fn store_reads(&self) -> usize {
        self.reads.get()
    }

    pub fn store_writes(&self) -> usize {
        self.writes
    }
}

impl BlockRepository for MemoryBlockRepository {
    fn read_store(&self) -> Result<Vec<RawBlock>, RepositoryError> {
        self.reads.set(self.reads.get() + 1);
        Ok(self.store.clone())
    }

    fn write_store(&mut self, blocks: &[RawBlock]) -> Result<(), RepositoryError> {
        if self.fail_saves {
            return Err(io::Error::new(io::ErrorKind::Other, "simulated write failure").into());
        }
        self.writes += 1;
        self.store = blocks.to_vec();
        Ok(())
    }

    fn resident(&self) -> &ResidentBlocks {
        &self.resident
    }

    fn resident_mut(&mut self) -> &mut ResidentBlocks {
        &mut self.resident
    }

    fn options(&self) -> &RepositoryOptions {
        &self.options
    }
}
