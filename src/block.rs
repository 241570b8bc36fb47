//! Fixed-size Mii record as stored in the Mii database and in save files.
//!
//! Only the fields the repository and license reader need are exposed here;
//! appearance attributes stay opaque bytes.

use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::be;

/// Size in bytes of one Mii record.
pub const BLOCK_SIZE: usize = 0x4A;
/// Big-endian UTF-16 display name.
pub const NAME_OFFSET: usize = 0x02;
/// Name length in UTF-16 code units.
pub const NAME_CHARS: usize = 10;
/// Big-endian client identifier (the Mii ID), the repository key.
pub const CLIENT_ID_OFFSET: usize = 0x18;
/// Four bytes identifying the console that created the record.
pub const SYSTEM_ID_OFFSET: usize = 0x1C;

/// 2006-01-01T00:00:00Z, the zero point of the client id counter.
pub const CLIENT_ID_EPOCH: i64 = 1_136_073_600;
/// Seconds per client id counter step.
pub const CLIENT_ID_TICK_SECS: i64 = 4;
const CLIENT_ID_COUNTER_MASK: u32 = 0x1FFF_FFFF;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    #[error("Mii block must be {size} bytes, got {0}", size = BLOCK_SIZE)]
    WrongSize(usize),
    #[error("Invalid MAC address: {0:?}")]
    InvalidMac(String),
}

/// Selects the three flag bits above the client id counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientIdKind {
    #[default]
    Standard,
    Blue,
}

impl ClientIdKind {
    const fn prefix(self) -> u32 {
        match self {
            ClientIdKind::Standard => 0b100,
            ClientIdKind::Blue => 0b110,
        }
    }
}

/// Mints client ids from a 4-second clock counter.
///
/// Calls landing in the same tick (or on a clock that went backwards) take
/// the next counter value instead, so ids from one generator never repeat
/// until the 29-bit counter wraps.
#[derive(Debug, Default)]
pub struct ClientIdGenerator {
    last_counter: Option<u32>,
}

impl ClientIdGenerator {
    pub const fn new() -> Self {
        Self { last_counter: None }
    }

    pub fn next_at(&mut self, now: DateTime<Utc>, kind: ClientIdKind) -> u32 {
        let tick = ticks_since_epoch(now);
        let counter = match self.last_counter {
            Some(last) if tick <= last => last.wrapping_add(1),
            _ => tick,
        };
        self.last_counter = Some(counter);
        compose_client_id(counter, kind)
    }

    pub fn next(&mut self, kind: ClientIdKind) -> u32 {
        self.next_at(Utc::now(), kind)
    }
}

static CLIENT_IDS: Mutex<ClientIdGenerator> = Mutex::new(ClientIdGenerator::new());

/// Mint a fresh client id from the process-wide generator.
pub fn generate_client_id(kind: ClientIdKind) -> u32 {
    CLIENT_IDS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .next(kind)
}

/// Flag bits in 31..29, counter in 28..0.  Never zero.
pub const fn compose_client_id(counter: u32, kind: ClientIdKind) -> u32 {
    (kind.prefix() << 29) | (counter & CLIENT_ID_COUNTER_MASK)
}

fn ticks_since_epoch(now: DateTime<Utc>) -> u32 {
    let ticks = (now.timestamp() - CLIENT_ID_EPOCH).max(0) / CLIENT_ID_TICK_SECS;
    (ticks as u64 & u64::from(CLIENT_ID_COUNTER_MASK)) as u32
}

/// System id for the console with MAC `aa:bb:cc:dd:ee:ff`:
/// `[(aa + bb + cc) & 0xff, dd, ee, ff]`.
pub fn system_id_from_mac(mac: &str) -> Result<[u8; 4], BlockError> {
    let invalid = || BlockError::InvalidMac(mac.to_string());
    let octets = mac
        .trim()
        .split([':', '-'])
        .map(|part| u8::from_str_radix(part, 16).map_err(|_| invalid()))
        .collect::<Result<Vec<u8>, _>>()?;
    let [a, b, c, d, e, f]: [u8; 6] = octets.try_into().map_err(|_| invalid())?;
    Ok([a.wrapping_add(b).wrapping_add(c), d, e, f])
}

/// One opaque profile record.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct RawBlock([u8; BLOCK_SIZE]);

impl RawBlock {
    /// An empty slot.
    pub const fn zeroed() -> Self {
        Self([0u8; BLOCK_SIZE])
    }

    pub const fn from_bytes(bytes: [u8; BLOCK_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, BlockError> {
        let array: [u8; BLOCK_SIZE] = bytes
            .try_into()
            .map_err(|_| BlockError::WrongSize(bytes.len()))?;
        Ok(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; BLOCK_SIZE] {
        &self.0
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8; BLOCK_SIZE] {
        &mut self.0
    }

    pub fn client_id(&self) -> u32 {
        be::read_u32(&self.0, CLIENT_ID_OFFSET)
    }

    pub fn set_client_id(&mut self, id: u32) {
        be::write_u32(&mut self.0, CLIENT_ID_OFFSET, id);
    }

    pub fn system_id(&self) -> [u8; 4] {
        let mut id = [0u8; 4];
        id.copy_from_slice(&self.0[SYSTEM_ID_OFFSET..SYSTEM_ID_OFFSET + 4]);
        id
    }

    pub fn set_system_id(&mut self, id: [u8; 4]) {
        self.0[SYSTEM_ID_OFFSET..SYSTEM_ID_OFFSET + 4].copy_from_slice(&id);
    }

    /// All-zero records mark unused database slots.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn name(&self) -> String {
        be::read_fixed_utf16_string(&self.0, NAME_OFFSET, NAME_CHARS)
    }

    pub fn set_name(&mut self, name: &str) {
        be::write_fixed_utf16_string(&mut self.0, NAME_OFFSET, NAME_CHARS, name);
    }
}

impl Default for RawBlock {
    fn default() -> Self {
        Self::zeroed()
    }
}

impl AsRef<[u8]> for RawBlock {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; BLOCK_SIZE]> for RawBlock {
    fn from(bytes: [u8; BLOCK_SIZE]) -> Self {
        Self(bytes)
    }
}

impl TryFrom<&[u8]> for RawBlock {
    type Error = BlockError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        Self::from_slice(bytes)
    }
}

impl fmt::Debug for RawBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawBlock")
            .field("client_id", &format_args!("{:08x}", self.client_id()))
            .field("name", &self.name())
            .finish()
    }
}
