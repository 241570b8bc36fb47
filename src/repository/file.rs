//! `RFL_DB.dat`-style store: a header, fixed slots, then a CRC-16 trailer.
//!
//! ```text
//! [ header (4 B) | slot 0 (74 B) | ... | slot 99 (74 B) | ... | CRC-16 BE @ 0x1F1DE ]
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{BlockRepository, RepositoryError, RepositoryOptions, ResidentBlocks};
use crate::be;
use crate::block::{RawBlock, BLOCK_SIZE};
use crate::checksum::crc16_xmodem;

/// Production repository backed by a single database file.
#[derive(Debug)]
pub struct FileBlockRepository {
    path:     PathBuf,
    options:  RepositoryOptions,
    resident: ResidentBlocks,
}

impl FileBlockRepository {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self::with_options(path, RepositoryOptions::default())
    }

    pub fn with_options<P: AsRef<Path>>(path: P, options: RepositoryOptions) -> Self {
        Self {
            path: path.as_ref().to_owned(),
            options,
            resident: ResidentBlocks::default(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn slots_end(&self) -> usize {
        self.options.header_len + self.options.slot_count * BLOCK_SIZE
    }
}

impl BlockRepository for FileBlockRepository {
    fn read_store(&self) -> Result<Vec<RawBlock>, RepositoryError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "block store absent");
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let Some(slots) = bytes.get(self.options.header_len..) else {
            return Ok(Vec::new());
        };
        Ok(slots
            .chunks_exact(BLOCK_SIZE)
            .take(self.options.slot_count)
            .map(|chunk| {
                let mut block = RawBlock::zeroed();
                block.as_bytes_mut().copy_from_slice(chunk);
                block
            })
            .collect())
    }

    fn write_store(&mut self, blocks: &[RawBlock]) -> Result<(), RepositoryError> {
        if !self.exists() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Block store not found: {}", self.path.display()),
            )
            .into());
        }

        let mut db = fs::read(&self.path)?;
        let slots_end = self.slots_end();
        if db.len() < slots_end {
            db.resize(slots_end, 0);
        }

        let empty = RawBlock::zeroed();
        for slot in 0..self.options.slot_count {
            let block = blocks.get(slot).unwrap_or(&empty);
            let start = self.options.header_len + slot * BLOCK_SIZE;
            db[start..start + BLOCK_SIZE].copy_from_slice(block.as_bytes());
        }

        match self.options.crc_offset {
            Some(crc_offset) if db.len() >= crc_offset + 2 => {
                let crc = crc16_xmodem(&db[..crc_offset]);
                be::write_u16(&mut db, crc_offset, crc);
            }
            Some(crc_offset) => {
                warn!(len = db.len(), crc_offset, "store too short for CRC trailer, left unchecksummed");
            }
            None => {}
        }

        fs::write(&self.path, &db)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::tests::mii;
    use crate::repository::DEFAULT_CRC_OFFSET;
    use tempfile::tempdir;

    fn blank_db() -> Vec<u8> {
        let mut db = vec![0u8; DEFAULT_CRC_OFFSET + 2];
        db[..4].copy_from_slice(b"RNOD");
        db
    }

    #[test]
    fn absent_store_loads_empty() {
        let dir = tempdir().unwrap();
        let mut repo = FileBlockRepository::new(dir.path().join("RFL_DB.dat"));
        assert!(!repo.exists());
        assert!(repo.load_all_blocks().is_empty());
        assert!(repo.is_loaded());
    }

    #[test]
    fn short_store_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("RFL_DB.dat");
        fs::write(&path, b"RN").unwrap();
        assert!(FileBlockRepository::new(&path).load_all_blocks().is_empty());
    }

    #[test]
    fn truncated_slot_ends_collection() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("RFL_DB.dat");
        let mut bytes = b"RNOD".to_vec();
        bytes.extend_from_slice(mii(1, "A").as_bytes());
        bytes.extend_from_slice(&mii(2, "B").as_bytes()[..40]);
        fs::write(&path, &bytes).unwrap();

        let blocks = FileBlockRepository::new(&path).load_all_blocks();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].client_id(), 1);
    }

    #[test]
    fn save_requires_existing_store() {
        let dir = tempdir().unwrap();
        let mut repo = FileBlockRepository::new(dir.path().join("missing.dat"));
        let err = repo.save_all_blocks(&[mii(1, "A")]).unwrap_err();
        assert!(matches!(err, RepositoryError::Persistence(ref e) if e.kind() == io::ErrorKind::NotFound));
    }

    #[test]
    fn save_writes_slots_and_crc() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("RFL_DB.dat");
        let mut db = blank_db();
        // Stale data in slot 2 must be cleared by the save.
        db[4 + 2 * BLOCK_SIZE] = 0xFF;
        fs::write(&path, &db).unwrap();

        let mut repo = FileBlockRepository::new(&path);
        repo.save_all_blocks(&[mii(1, "A"), mii(2, "B")]).unwrap();

        let written = fs::read(&path).unwrap();
        assert_eq!(written.len(), DEFAULT_CRC_OFFSET + 2);
        assert_eq!(&written[..4], b"RNOD");
        assert_eq!(&written[4..4 + BLOCK_SIZE], mii(1, "A").as_bytes());
        assert!(written[4 + 2 * BLOCK_SIZE..4 + 3 * BLOCK_SIZE].iter().all(|&b| b == 0));

        let crc = be::read_u16(&written, DEFAULT_CRC_OFFSET);
        assert_eq!(crc, crc16_xmodem(&written[..DEFAULT_CRC_OFFSET]));
    }

    #[test]
    fn save_without_crc_grows_to_slots() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("plain.dat");
        fs::write(&path, b"HDR!").unwrap();

        let options = RepositoryOptions { slot_count: 3, header_len: 4, crc_offset: None };
        let mut repo = FileBlockRepository::with_options(&path, options);
        repo.save_all_blocks(&[mii(9, "Z")]).unwrap();

        assert_eq!(fs::read(&path).unwrap().len(), 4 + 3 * BLOCK_SIZE);
        let blocks = repo.load_all_blocks();
        assert_eq!(blocks.len(), 3);
        assert_eq!(blocks[0].client_id(), 9);
        assert!(blocks[1].is_empty() && blocks[2].is_empty());
    }
}
