pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
/// Leading hex zeros required when the caller does not pick a difficulty.
pub const DEFAULT_DIFFICULTY: u32 = 2;
/// A SHA-256 digest has no more hex characters than this.
pub const MAX_DIFFICULTY: u32 = HASH_HEX_SIZE as u32;
