//! Read-mostly view of the game's `rksys.dat` save file.
//!
//! ```text
//! 0x00000  "RKSD0006"
//! 0x00008  license 0 ("RKPD", 0x8CC0 B)
//!   ...    licenses 1-3
//! 0x27FFC  CRC-32 BE over [0, 0x27FFC)
//! ```
//!
//! Each license names its owner, links to the owner's Mii in the Mii
//! database by client id, stores the PID its friend code derives from, a few
//! counters, and up to 30 friend records carrying their own PID and Mii block.

use std::fs;
use std::path::Path;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use crate::be;
use crate::block::{RawBlock, BLOCK_SIZE};
use crate::checksum::crc32;
use crate::friend_code::{derive_friend_code, FriendCode};
use crate::repository::{BlockRepository, RepositoryError};

pub const SAVE_MAGIC: &[u8; 8] = b"RKSD0006";
pub const LICENSE_MAGIC: &[u8; 4] = b"RKPD";
pub const MAX_LICENSES: usize = 4;
pub const LICENSE_SIZE: usize = 0x8CC0;
pub const CRC_OFFSET: usize = 0x27FFC;
/// Smallest buffer that holds every license and the CRC trailer.
pub const MIN_SAVE_SIZE: usize = CRC_OFFSET + 4;

const NAME_OFFSET: usize = 0x14;
const NAME_CHARS: usize = 10;
const MIN_NAME_CHARS: usize = 3;
/// Client id of the owner's Mii, big-endian like the Mii block's own field.
const MII_ID_OFFSET: usize = 0x28;
const SYSTEM_ID_OFFSET: usize = 0x2C;
const PID_OFFSET: usize = 0x5C;
const VR_OFFSET: usize = 0xB0;
const BR_OFFSET: usize = 0xB2;
const RACE_COUNT_OFFSET: usize = 0xB4;
const WIN_COUNT_OFFSET: usize = 0xDC;

const MAX_FRIENDS: usize = 30;
const FRIENDS_OFFSET: usize = 0x56D0;
const FRIEND_SIZE: usize = 0x1C0;
const FRIEND_PID_OFFSET: usize = 0x04;
const FRIEND_LOSSES_OFFSET: usize = 0x12;
const FRIEND_WINS_OFFSET: usize = 0x14;
const FRIEND_VR_OFFSET: usize = 0x16;
const FRIEND_BR_OFFSET: usize = 0x18;
const FRIEND_MII_OFFSET: usize = 0x1A;
const FRIEND_COUNTRY_OFFSET: usize = 0x68;
const FRIEND_REGION_OFFSET: usize = 0x69;

#[derive(Error, Debug)]
pub enum LicenseError {
    #[error("Invalid save magic")]
    InvalidMagic,
    #[error("Save data too short: {0} bytes (need {min})", min = MIN_SAVE_SIZE)]
    TooShort(usize),
    #[error("License index {0} out of range (0-{max})", max = MAX_LICENSES - 1)]
    LicenseIndex(usize),
    #[error("License slot {0} is empty")]
    NoLicense(usize),
    #[error("Names must be between {min} and {max} characters long: {0:?}", min = MIN_NAME_CHARS, max = NAME_CHARS)]
    InvalidName(String),
    #[error("License {0} has no Mii")]
    NoMii(usize),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct Friend {
    pub friend_code: Option<FriendCode>,
    pub mii_name:    String,
    pub wins:        u16,
    pub losses:      u16,
    pub vr:          u16,
    pub br:          u16,
    pub country:     u8,
    pub region:      u8,
    #[serde(skip)]
    pub mii:         RawBlock,
}

#[derive(Debug, Clone, Serialize)]
pub struct License {
    pub index:       usize,
    pub name:        String,
    pub mii_id:      u32,
    pub system_id:   u32,
    pub friend_code: Option<FriendCode>,
    pub vr:          u16,
    pub br:          u16,
    pub race_count:  u32,
    pub win_count:   u32,
    pub friends:     Vec<Friend>,
}

impl License {
    /// The owner's Mii, looked up among the repository's resident blocks.
    pub fn mii<R: BlockRepository + ?Sized>(&self, repo: &R) -> Option<RawBlock> {
        repo.get_raw_block_by_client_id(self.mii_id)
    }
}

/// An in-memory `rksys.dat`.
#[derive(Clone)]
pub struct SaveFile {
    data: Vec<u8>,
}

fn license_offset(index: usize) -> usize {
    SAVE_MAGIC.len() + index * LICENSE_SIZE
}

impl SaveFile {
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, LicenseError> {
        if data.len() < MIN_SAVE_SIZE {
            return Err(LicenseError::TooShort(data.len()));
        }
        if &data[..SAVE_MAGIC.len()] != SAVE_MAGIC {
            return Err(LicenseError::InvalidMagic);
        }
        Ok(Self { data })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LicenseError> {
        let save = Self::from_bytes(fs::read(path.as_ref())?)?;
        if !save.verify_crc() {
            warn!(path = %path.as_ref().display(), "save file CRC mismatch");
        }
        Ok(save)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    fn has_license(&self, index: usize) -> bool {
        let offset = license_offset(index);
        &self.data[offset..offset + LICENSE_MAGIC.len()] == LICENSE_MAGIC
    }

    /// Every populated license slot, in slot order.
    pub fn licenses(&self) -> Vec<License> {
        (0..MAX_LICENSES)
            .filter(|&i| self.has_license(i))
            .map(|i| self.read_license(i))
            .collect()
    }

    /// Whether any populated license has an assigned friend code.
    pub fn has_valid_license(&self) -> bool {
        self.licenses().iter().any(|l| l.friend_code.is_some())
    }

    fn read_license(&self, index: usize) -> License {
        let base = license_offset(index);
        let data = &self.data;
        License {
            index,
            name:        be::read_fixed_utf16_string(data, base + NAME_OFFSET, NAME_CHARS),
            mii_id:      be::read_u32(data, base + MII_ID_OFFSET),
            system_id:   be::read_u32(data, base + SYSTEM_ID_OFFSET),
            friend_code: derive_friend_code(data, base + PID_OFFSET),
            vr:          be::read_u16(data, base + VR_OFFSET),
            br:          be::read_u16(data, base + BR_OFFSET),
            race_count:  be::read_u32(data, base + RACE_COUNT_OFFSET),
            win_count:   be::read_u32(data, base + WIN_COUNT_OFFSET),
            friends:     self.read_friends(base),
        }
    }

    fn read_friends(&self, license_base: usize) -> Vec<Friend> {
        let data = &self.data;
        (0..MAX_FRIENDS)
            .map(|i| license_base + FRIENDS_OFFSET + i * FRIEND_SIZE)
            .filter_map(|base| {
                let mii_start = base + FRIEND_MII_OFFSET;
                let mii = RawBlock::from_slice(&data[mii_start..mii_start + BLOCK_SIZE]).ok()?;
                if mii.is_empty() {
                    return None;
                }
                Some(Friend {
                    friend_code: derive_friend_code(data, base + FRIEND_PID_OFFSET),
                    mii_name:    mii.name(),
                    wins:        be::read_u16(data, base + FRIEND_WINS_OFFSET),
                    losses:      be::read_u16(data, base + FRIEND_LOSSES_OFFSET),
                    vr:          be::read_u16(data, base + FRIEND_VR_OFFSET),
                    br:          be::read_u16(data, base + FRIEND_BR_OFFSET),
                    country:     data[base + FRIEND_COUNTRY_OFFSET],
                    region:      data[base + FRIEND_REGION_OFFSET],
                    mii,
                })
            })
            .collect()
    }

    /// Overwrite the license's display name.  The CRC is left stale until
    /// [`fix_crc`](Self::fix_crc) or [`write_to`](Self::write_to).
    pub fn set_license_name(&mut self, index: usize, name: &str) -> Result<(), LicenseError> {
        if index >= MAX_LICENSES {
            return Err(LicenseError::LicenseIndex(index));
        }
        let offset = license_offset(index) + NAME_OFFSET;
        be::write_fixed_utf16_string(&mut self.data, offset, NAME_CHARS, name);
        debug!(index, new_name = name, "renamed license");
        Ok(())
    }

    /// Rename license `index` and the Mii it links to.
    ///
    /// Runs of whitespace collapse to one space and the result must be 3 to
    /// 10 UTF-16 units.  The Mii is renamed in `repo`'s resident blocks first,
    /// so a missing Mii leaves the save untouched.  Persisting both files is
    /// left to the caller.
    pub fn rename_license<R: BlockRepository + ?Sized>(
        &mut self,
        index: usize,
        name: &str,
        repo: &mut R,
    ) -> Result<(), LicenseError> {
        if index >= MAX_LICENSES {
            return Err(LicenseError::LicenseIndex(index));
        }
        if !self.has_license(index) {
            return Err(LicenseError::NoLicense(index));
        }
        let name = name.split_whitespace().collect::<Vec<_>>().join(" ");
        let units = name.encode_utf16().count();
        if !(MIN_NAME_CHARS..=NAME_CHARS).contains(&units) {
            return Err(LicenseError::InvalidName(name));
        }

        let mii_id = be::read_u32(&self.data, license_offset(index) + MII_ID_OFFSET);
        if mii_id == 0 {
            return Err(LicenseError::NoMii(index));
        }
        let mut mii = repo
            .get_raw_block_by_client_id(mii_id)
            .ok_or(RepositoryError::NotFound(mii_id))?;
        mii.set_name(&name);
        repo.update_block_by_client_id(mii_id, mii)?;

        self.set_license_name(index, &name)
    }

    pub fn compute_crc(&self) -> u32 {
        crc32(&self.data[..CRC_OFFSET])
    }

    pub fn stored_crc(&self) -> u32 {
        be::read_u32(&self.data, CRC_OFFSET)
    }

    pub fn verify_crc(&self) -> bool {
        self.compute_crc() == self.stored_crc()
    }

    pub fn fix_crc(&mut self) {
        let crc = self.compute_crc();
        be::write_u32(&mut self.data, CRC_OFFSET, crc);
    }

    /// Recompute the CRC and write the whole file.
    pub fn write_to<P: AsRef<Path>>(&mut self, path: P) -> Result<(), LicenseError> {
        self.fix_crc();
        fs::write(path, &self.data)?;
        Ok(())
    }
}
