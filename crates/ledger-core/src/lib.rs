pub mod chain;
pub mod constants;
pub mod error;

pub use chain::{Chain, FailureKind, ValidationFailure, ValidationReport};
pub use error::{LedgerError, Result};
pub use pow::Proof;

use constants::{DEFAULT_DIFFICULTY, HASH_SIZE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

pub type Hash = [u8; HASH_SIZE];

/// SHA-256 of `bytes`. Stateless, so any number of chains may share it.
pub fn digest(bytes: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(&digest[..]);
    out
}

pub fn to_hex(hash: &Hash) -> String {
    hex::encode(hash)
}

/// Canonical byte encoding of a block payload.
///
/// Equal values must always produce identical bytes, since the encoding is
/// part of every block hash.
pub trait Payload {
    fn write_canonical(&self, out: &mut Vec<u8>);

    fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write_canonical(&mut out);
        out
    }
}

impl<P: Payload + ?Sized> Payload for &P {
    fn write_canonical(&self, out: &mut Vec<u8>) {
        (**self).write_canonical(out)
    }
}

impl Payload for [u8] {
    fn write_canonical(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl Payload for Vec<u8> {
    fn write_canonical(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self);
    }
}

impl Payload for str {
    fn write_canonical(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

impl Payload for String {
    fn write_canonical(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(self.as_bytes());
    }
}

macro_rules! int_payload {
    ($($ty:ty),*) => {
        $(impl Payload for $ty {
            fn write_canonical(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_le_bytes());
            }
        })*
    };
}

int_payload!(u8, u16, u32, u64, i32, i64);

/// A coin movement between two named parties.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    pub sender: String,
    pub receiver: String,
    pub firecoins: u64,
}

impl Transfer {
    pub fn new(sender: impl Into<String>, receiver: impl Into<String>, firecoins: u64) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            firecoins,
        }
    }

    /// The zero-value record that opens a fresh chain.
    pub fn genesis() -> Self {
        Self::new("Matchbox", "Matchbox", 0)
    }
}

impl Payload for Transfer {
    fn write_canonical(&self, out: &mut Vec<u8>) {
        // Length prefixes keep ("ab", "c") and ("a", "bc") apart.
        for field in [&self.sender, &self.receiver] {
            out.extend_from_slice(&(field.len() as u64).to_le_bytes());
            out.extend_from_slice(field.as_bytes());
        }
        out.extend_from_slice(&self.firecoins.to_le_bytes());
    }
}

/// A ledger entry. Built as an unmined candidate; only [`Chain`] can finalize
/// one, after which it is never handed out mutably.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block<T> {
    data: T,
    /// Nanoseconds since the Unix epoch.
    timestamp: u64,
    /// `None` is the genesis sentinel.
    previous_hash: Option<Hash>,
    nonce: u64,
    hash: Option<Hash>,
    difficulty: u32,
}

impl<T> Block<T> {
    pub fn new(data: T, previous_hash: Option<Hash>) -> Self {
        Self::with_timestamp(data, previous_hash, now_nanos())
    }

    pub fn with_timestamp(data: T, previous_hash: Option<Hash>, timestamp: u64) -> Self {
        Self {
            data,
            timestamp,
            previous_hash,
            nonce: 0,
            hash: None,
            difficulty: DEFAULT_DIFFICULTY,
        }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn previous_hash(&self) -> Option<Hash> {
        self.previous_hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Unset until the block has been mined.
    pub fn hash(&self) -> Option<Hash> {
        self.hash
    }

    pub fn hash_hex(&self) -> String {
        self.hash.as_ref().map(to_hex).unwrap_or_default()
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn is_finalized(&self) -> bool {
        self.hash.is_some()
    }

    pub(crate) fn finalize(mut self, difficulty: u32, proof: Proof) -> Self {
        self.difficulty = difficulty;
        self.nonce = proof.nonce;
        self.hash = Some(proof.hash);
        self
    }
}

impl<T: Payload> Block<T> {
    /// Everything hashed except the nonce:
    /// timestamp | payload length | payload | previous hash.
    pub(crate) fn preimage_prefix(&self) -> Vec<u8> {
        let payload = self.data.canonical_bytes();
        let mut bytes = Vec::with_capacity(8 + 8 + payload.len() + HASH_SIZE + 8);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&payload);
        if let Some(prev) = &self.previous_hash {
            bytes.extend_from_slice(prev);
        }
        bytes
    }

    pub fn hash_bytes(&self) -> Vec<u8> {
        let mut bytes = self.preimage_prefix();
        bytes.extend_from_slice(&self.nonce.to_le_bytes());
        bytes
    }

    pub fn compute_hash(&self) -> Hash {
        digest(&self.hash_bytes())
    }
}

fn now_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

pub mod pow {
    use super::{digest, to_hex, Block, Hash, Payload};
    use crate::constants::MAX_DIFFICULTY;
    use crate::error::{LedgerError, Result};
    use tracing::debug;

    /// A nonce together with the hash it produces.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Proof {
        pub nonce: u64,
        pub hash: Hash,
    }

    /// Number of leading `'0'` characters in the hex form of `hash`.
    pub fn count_leading_zero_nibbles(hash: &Hash) -> u32 {
        let mut total = 0u32;
        for b in hash {
            if *b == 0 {
                total += 2;
            } else {
                if b >> 4 == 0 {
                    total += 1;
                }
                break;
            }
        }
        total
    }

    pub fn meets_difficulty(hash: &Hash, difficulty: u32) -> bool {
        count_leading_zero_nibbles(hash) >= difficulty
    }

    pub fn check_difficulty(difficulty: u32) -> Result<()> {
        if difficulty > MAX_DIFFICULTY {
            return Err(LedgerError::DifficultyOutOfRange {
                difficulty,
                max: MAX_DIFFICULTY,
            });
        }
        Ok(())
    }

    /// Scan nonces upward from the candidate's current nonce and return the
    /// first one whose hash has at least `difficulty` leading hex zeros.
    ///
    /// Expected work is `16^difficulty` hashes. There is no cap: a difficulty
    /// above [`MAX_DIFFICULTY`] never returns, use [`mine_bounded`] when the
    /// input is not trusted.
    pub fn mine<T: Payload>(candidate: &Block<T>, difficulty: u32) -> Proof {
        let mut preimage = candidate.preimage_prefix();
        let prefix_len = preimage.len();
        let mut nonce = candidate.nonce();
        loop {
            preimage.truncate(prefix_len);
            preimage.extend_from_slice(&nonce.to_le_bytes());
            let hash = digest(&preimage);
            if meets_difficulty(&hash, difficulty) {
                debug!(nonce, difficulty, hash = %to_hex(&hash), "proof found");
                return Proof { nonce, hash };
            }
            nonce = nonce.wrapping_add(1);
        }
    }

    /// Like [`mine`], but gives up after `max_attempts` hashes or when the
    /// nonce space runs out.
    pub fn mine_bounded<T: Payload>(
        candidate: &Block<T>,
        difficulty: u32,
        max_attempts: u64,
    ) -> Result<Proof> {
        check_difficulty(difficulty)?;
        let mut preimage = candidate.preimage_prefix();
        let prefix_len = preimage.len();
        let mut nonce = candidate.nonce();
        let mut attempts = 0u64;
        while attempts < max_attempts {
            attempts += 1;
            preimage.truncate(prefix_len);
            preimage.extend_from_slice(&nonce.to_le_bytes());
            let hash = digest(&preimage);
            if meets_difficulty(&hash, difficulty) {
                debug!(nonce, difficulty, attempts, hash = %to_hex(&hash), "proof found");
                return Ok(Proof { nonce, hash });
            }
            nonce = match nonce.checked_add(1) {
                Some(next) => next,
                None => break,
            };
        }
        Err(LedgerError::MiningExhausted {
            attempts,
            difficulty,
        })
    }
}
