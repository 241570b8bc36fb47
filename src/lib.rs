pub mod be;
pub mod block;
pub mod checksum;
pub mod friend_code;
pub mod license;
pub mod repository;

pub use block::{generate_client_id, ClientIdGenerator, ClientIdKind, RawBlock, BLOCK_SIZE};
pub use friend_code::{derive_friend_code, friend_code_string, parse_friend_code, FriendCode, FriendCodeError};
pub use license::{License, SaveFile};
pub use repository::{
    BlockRepository, FileBlockRepository, MemoryBlockRepository, RepositoryError, RepositoryOptions,
};
