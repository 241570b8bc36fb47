//! Friend-code identity derivation.
//!
//! A friend code is the console's human-shareable name for a profile.  It is
//! `checksum7 * 2^32 + pid`, printed as twelve digits in three dash-separated
//! groups, where `checksum7` is the top seven bits of the first MD5 byte of
//! `pid (little-endian) || "JCMR"`.
//!
//! Every constant here is fixed by the deployed scheme.  MD5 is used for
//! bit-compatibility only.

use std::fmt;
use std::str::FromStr;

use md5::{Digest, Md5};
use serde::{Serialize, Serializer};
use thiserror::Error;
use unicode_general_category::{get_general_category, GeneralCategory};

use crate::be;

/// Tag appended to the byte-reversed PID before hashing.
pub const FRIEND_CODE_TAG: [u8; 4] = [0x4A, 0x43, 0x4D, 0x52];

/// Number of decimal digits in a rendered code.
pub const FRIEND_CODE_DIGITS: usize = 12;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FriendCodeError {
    #[error("Friend code is empty")]
    EmptyInput,
    #[error("Friend code must be exactly {digits} digits (found {found})", digits = FRIEND_CODE_DIGITS)]
    WrongLength { found: usize },
    #[error("Friend code contains invalid characters")]
    InvalidDigits,
}

/// A derived or parsed friend code, held in numeric form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FriendCode(u64);

impl FriendCode {
    /// Derive the code for `pid`.  A zero PID has no code.
    pub fn from_pid(pid: u32) -> Option<Self> {
        if pid == 0 {
            return None;
        }
        let checksum = u64::from(checksum7(pid));
        Some(Self((checksum << 32) + u64::from(pid)))
    }

    /// Wrap an already-numeric code without checking it.
    pub const fn from_value(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    /// The profile identifier carried in the low 32 bits.
    pub const fn pid(self) -> u32 {
        self.0 as u32
    }

    /// The checksum carried above the PID.
    pub const fn checksum(self) -> u64 {
        self.0 >> 32
    }

    /// Whether the embedded checksum matches the one derived from the PID.
    pub fn is_valid(self) -> bool {
        Self::from_pid(self.pid()) == Some(self)
    }
}

impl fmt::Display for FriendCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let group = |i: u32| (self.0 / 10u64.pow(4 * (2 - i))) % 10_000;
        write!(f, "{:04}-{:04}-{:04}", group(0), group(1), group(2))
    }
}

impl Serialize for FriendCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl FromStr for FriendCode {
    type Err = FriendCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_friend_code(s).map(Self)
    }
}

/// MD5 of the byte-reversed PID followed by [`FRIEND_CODE_TAG`].
pub fn checksum_digest(pid: u32) -> [u8; 16] {
    let mut scratch = [0u8; 8];
    scratch[..4].copy_from_slice(&pid.to_le_bytes());
    scratch[4..].copy_from_slice(&FRIEND_CODE_TAG);
    let mut digest = [0u8; 16];
    digest.copy_from_slice(&Md5::digest(scratch));
    digest
}

/// First digest byte (the leading two hex characters) shifted right by one.
fn checksum7(pid: u32) -> u8 {
    checksum_digest(pid)[0] >> 1
}

/// Derive the friend code for the PID stored big-endian at `offset`.
pub fn derive_friend_code(buf: &[u8], offset: usize) -> Option<FriendCode> {
    FriendCode::from_pid(be::read_u32(buf, offset))
}

/// Rendered form of [`derive_friend_code`]; empty when the record has no PID.
pub fn friend_code_string(buf: &[u8], offset: usize) -> String {
    derive_friend_code(buf, offset)
        .map(|code| code.to_string())
        .unwrap_or_default()
}

/// Parse user input such as `"1234-5678-9012"` or `"1234 5678 9012"`.
///
/// Every character outside the decimal-digit category (`Nd`) is ignored;
/// exactly twelve digits must remain.
pub fn parse_friend_code(text: &str) -> Result<u64, FriendCodeError> {
    if text.trim().is_empty() {
        return Err(FriendCodeError::EmptyInput);
    }

    let digits: String = text.chars().filter(|&c| is_decimal_digit(c)).collect();
    let found = digits.chars().count();
    if found != FRIEND_CODE_DIGITS {
        return Err(FriendCodeError::WrongLength { found });
    }

    digits.parse::<u64>().map_err(|_| FriendCodeError::InvalidDigits)
}

fn is_decimal_digit(c: char) -> bool {
    get_general_category(c) == GeneralCategory::DecimalNumber
}
