use crate::constants::DEFAULT_DIFFICULTY;
use crate::error::Result;
use crate::pow::{self, Proof};
use crate::{to_hex, Block, Hash, Payload};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};

/// Ordered, append-only sequence of mined blocks. Index 0 is genesis.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chain<T> {
    blocks: Vec<Block<T>>,
}

impl<T> Default for Chain<T> {
    fn default() -> Self {
        Self { blocks: Vec::new() }
    }
}

impl<T> Chain<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt blocks produced elsewhere. Nothing is checked here; run
    /// [`Chain::validate`] before trusting the result.
    pub fn from_blocks(blocks: Vec<Block<T>>) -> Self {
        Self { blocks }
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Block<T>] {
        &self.blocks
    }

    pub fn get(&self, index: usize) -> Option<&Block<T>> {
        self.blocks.get(index)
    }

    pub fn tip(&self) -> Option<&Block<T>> {
        self.blocks.last()
    }

    /// Stored hash of the tail block, `None` for an empty chain.
    pub fn tip_hash(&self) -> Option<Hash> {
        self.tip().and_then(Block::hash)
    }

    fn push_finalized(
        &mut self,
        candidate: Block<T>,
        difficulty: u32,
        proof: Proof,
    ) -> (Hash, &Block<T>) {
        let index = self.blocks.len();
        let block = candidate.finalize(difficulty, proof);
        info!(
            index,
            nonce = proof.nonce,
            difficulty,
            hash = %to_hex(&proof.hash),
            "mined block"
        );
        self.blocks.push(block);
        (proof.hash, &self.blocks[index])
    }
}

impl<T: Payload> Chain<T> {
    /// Mine `data` into a new tail block and return its proof hash.
    ///
    /// Blocks the calling thread until a nonce is found; expected work grows
    /// as `16^difficulty`.
    pub fn append(&mut self, data: T, difficulty: u32) -> Result<(Hash, &Block<T>)> {
        pow::check_difficulty(difficulty)?;
        let candidate = self.candidate(data);
        let proof = pow::mine(&candidate, difficulty);
        Ok(self.push_finalized(candidate, difficulty, proof))
    }

    pub fn append_default(&mut self, data: T) -> Result<(Hash, &Block<T>)> {
        self.append(data, DEFAULT_DIFFICULTY)
    }

    /// [`Chain::append`] with a cap on hashing work. On
    /// [`LedgerError::MiningExhausted`](crate::LedgerError::MiningExhausted)
    /// the chain is left untouched.
    pub fn append_bounded(
        &mut self,
        data: T,
        difficulty: u32,
        max_attempts: u64,
    ) -> Result<(Hash, &Block<T>)> {
        let candidate = self.candidate(data);
        let proof = match pow::mine_bounded(&candidate, difficulty, max_attempts) {
            Ok(proof) => proof,
            Err(e) => {
                warn!(index = self.blocks.len(), "append abandoned: {e}");
                return Err(e);
            }
        };
        Ok(self.push_finalized(candidate, difficulty, proof))
    }

    fn candidate(&self, data: T) -> Block<T> {
        let previous_hash = self
            .tip()
            .map(|tail| tail.hash().unwrap_or_else(|| tail.compute_hash()));
        Block::new(data, previous_hash)
    }

    /// Recompute every hash and cross-check linkage. Every block is examined
    /// even after a failure; each failure is logged.
    pub fn validate(&self) -> bool {
        let report = self.audit();
        for failure in &report.failures {
            warn!("{failure}");
        }
        if report.is_valid() {
            debug!(blocks = self.blocks.len(), "chain is valid");
        } else {
            warn!(failures = report.failures.len(), "chain is invalid");
        }
        report.is_valid()
    }

    /// The checks behind [`Chain::validate`], returned as data.
    ///
    /// For each block after genesis: its stored hash must equal its
    /// recomputed hash, and its `previous_hash` must equal the recomputed
    /// hash of its predecessor.
    pub fn audit(&self) -> ValidationReport {
        let mut report = ValidationReport::default();
        for (offset, pair) in self.blocks.windows(2).enumerate() {
            let index = offset + 1;
            let (prev, block) = (&pair[0], &pair[1]);
            report.blocks_checked += 1;

            let recomputed = block.compute_hash();
            if block.hash() != Some(recomputed) {
                report.push(index, FailureKind::SelfConsistency {
                    stored: block.hash(),
                    recomputed,
                });
            }

            let expected = prev.compute_hash();
            if block.previous_hash() != Some(expected) {
                report.push(index, FailureKind::Linkage {
                    expected,
                    found: block.previous_hash(),
                });
            }
        }
        report
    }

    /// [`Chain::audit`] plus the checks it leaves out: genesis must carry the
    /// sentinel and hash to itself, every stored hash must meet its stored
    /// difficulty, and each `previous_hash` must equal the predecessor's
    /// stored hash.
    pub fn audit_strict(&self) -> ValidationReport {
        let mut report = self.audit();
        let Some(genesis) = self.blocks.first() else {
            return report;
        };
        report.blocks_checked = self.blocks.len();

        if let Some(found) = genesis.previous_hash() {
            report.push(0, FailureKind::GenesisLink { found });
        }
        let recomputed = genesis.compute_hash();
        if genesis.hash() != Some(recomputed) {
            report.push(0, FailureKind::SelfConsistency {
                stored: genesis.hash(),
                recomputed,
            });
        }

        for (index, block) in self.blocks.iter().enumerate() {
            if let Some(hash) = block.hash() {
                let leading_zeros = pow::count_leading_zero_nibbles(&hash);
                if leading_zeros < block.difficulty() {
                    report.push(index, FailureKind::InsufficientWork {
                        difficulty: block.difficulty(),
                        leading_zeros,
                    });
                }
            }
            if index > 0 {
                let stored = self.blocks[index - 1].hash();
                if stored.is_some() && block.previous_hash() != stored {
                    report.push(index, FailureKind::StoredLinkage {
                        stored,
                        found: block.previous_hash(),
                    });
                }
            }
        }

        report.failures.sort_by_key(|f| f.index);
        report
    }
}

/// Outcome of a validation pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub blocks_checked: usize,
    pub failures: Vec<ValidationFailure>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failures recorded against block `index`.
    pub fn failures_at(&self, index: usize) -> impl Iterator<Item = &ValidationFailure> {
        self.failures.iter().filter(move |f| f.index == index)
    }

    fn push(&mut self, index: usize, kind: FailureKind) {
        self.failures.push(ValidationFailure { index, kind });
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationFailure {
    pub index: usize,
    pub kind: FailureKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FailureKind {
    /// Stored hash differs from the hash of the block's current contents.
    SelfConsistency {
        stored: Option<Hash>,
        recomputed: Hash,
    },
    /// `previous_hash` differs from the predecessor's recomputed hash.
    Linkage {
        expected: Hash,
        found: Option<Hash>,
    },
    /// `previous_hash` differs from the predecessor's stored hash.
    StoredLinkage {
        stored: Option<Hash>,
        found: Option<Hash>,
    },
    GenesisLink { found: Hash },
    InsufficientWork { difficulty: u32, leading_zeros: u32 },
}

impl FailureKind {
    pub fn is_self_consistency(&self) -> bool {
        matches!(self, FailureKind::SelfConsistency { .. })
    }

    pub fn is_linkage(&self) -> bool {
        matches!(
            self,
            FailureKind::Linkage { .. } | FailureKind::StoredLinkage { .. }
        )
    }
}

fn opt_hex(hash: &Option<Hash>) -> String {
    hash.as_ref().map(to_hex).unwrap_or_else(|| "<none>".into())
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let index = self.index;
        match &self.kind {
            FailureKind::SelfConsistency { stored, recomputed } => write!(
                f,
                "block {index}: stored hash {} does not match recomputed {}",
                opt_hex(stored),
                to_hex(recomputed)
            ),
            FailureKind::Linkage { expected, found } => write!(
                f,
                "block {index}: previous hash {} does not match block {} (recomputed {})",
                opt_hex(found),
                index - 1,
                to_hex(expected)
            ),
            FailureKind::StoredLinkage { stored, found } => write!(
                f,
                "block {index}: previous hash {} does not match stored hash {} of block {}",
                opt_hex(found),
                opt_hex(stored),
                index - 1
            ),
            FailureKind::GenesisLink { found } => write!(
                f,
                "block {index}: genesis must not reference a predecessor, found {}",
                to_hex(found)
            ),
            FailureKind::InsufficientWork {
                difficulty,
                leading_zeros,
            } => write!(
                f,
                "block {index}: hash has {leading_zeros} leading zeros, difficulty requires {difficulty}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::MAX_DIFFICULTY;
    use crate::{LedgerError, Transfer};

    fn transfer_chain(len: usize, difficulty: u32) -> Chain<Transfer> {
        let mut chain = Chain::new();
        if len == 0 {
            return chain;
        }
        chain.append(Transfer::genesis(), difficulty).unwrap();
        for i in 1..len {
            let tx = Transfer::new("Matchbox", format!("user-{i}"), i as u64);
            chain.append(tx, difficulty).unwrap();
        }
        chain
    }

    #[test]
    fn empty_and_single_block_chains_are_valid() {
        let chain: Chain<Transfer> = Chain::new();
        assert!(chain.is_empty());
        assert!(chain.validate());
        assert_eq!(chain.audit().blocks_checked, 0);

        let chain = transfer_chain(1, 2);
        assert_eq!(chain.len(), 1);
        assert!(chain.validate());
        assert!(chain.audit_strict().is_valid());
    }

    #[test]
    fn append_links_to_tail() {
        let mut chain = Chain::new();
        let (genesis_hash, genesis) = chain.append("genesis".to_string(), 1).unwrap();
        assert_eq!(genesis.previous_hash(), None);
        assert_eq!(genesis.hash(), Some(genesis_hash));

        let (hash, block) = chain.append("second".to_string(), 1).unwrap();
        assert_eq!(block.previous_hash(), Some(genesis_hash));
        assert_eq!(block.hash(), Some(hash));
        assert_eq!(block.difficulty(), 1);
        assert_eq!(chain.tip_hash(), Some(hash));
    }

    #[test]
    fn append_default_uses_difficulty_two() {
        let mut chain = Chain::new();
        let (hash, block) = chain.append_default(42u64).unwrap();
        assert_eq!(block.difficulty(), DEFAULT_DIFFICULTY);
        assert!(to_hex(&hash).starts_with("00"));
    }

    #[test]
    fn chain_growth_keeps_linkage() {
        let chain = transfer_chain(6, 1);
        assert_eq!(chain.len(), 6);
        for i in 1..chain.len() {
            assert_eq!(chain.blocks()[i].previous_hash(), chain.blocks()[i - 1].hash());
        }
    }

    #[test]
    fn untampered_chains_validate() {
        for len in 0..=10 {
            let chain = transfer_chain(len, 2);
            let report = chain.audit();
            assert!(report.is_valid(), "len {len}: {:?}", report.failures);
            assert_eq!(report.blocks_checked, len.saturating_sub(1));
            assert!(chain.audit_strict().is_valid());
            assert!(chain.validate());
        }
    }

    #[test]
    fn payload_mutation_is_detected() {
        let mut chain = transfer_chain(4, 2);
        chain.blocks[2].data.firecoins = 1_000_000;

        assert!(!chain.validate());
        let report = chain.audit();
        assert_eq!(report.blocks_checked, 3);
        assert!(report.failures_at(2).any(|f| f.kind.is_self_consistency()));
        assert!(report.failures_at(3).any(|f| f.kind.is_linkage()));
        assert_eq!(report.failures_at(1).count(), 0);
    }

    #[test]
    fn scan_continues_past_first_failure() {
        let mut chain = transfer_chain(5, 1);
        chain.blocks[1].data.receiver = "Mallory".into();
        chain.blocks[3].nonce += 1;

        let report = chain.audit();
        let indices: Vec<usize> = report
            .failures
            .iter()
            .filter(|f| f.kind.is_self_consistency())
            .map(|f| f.index)
            .collect();
        assert_eq!(indices, vec![1, 3]);
    }

    #[test]
    fn timestamp_mutation_is_detected() {
        let mut chain = transfer_chain(3, 1);
        chain.blocks[1].timestamp += 1;
        let report = chain.audit();
        assert!(report.failures_at(1).any(|f| f.kind.is_self_consistency()));
    }

    #[test]
    fn forged_hash_fails_self_consistency() {
        let mut chain = transfer_chain(3, 2);
        chain.blocks[1].hash = Some([0xAB; 32]);

        let report = chain.audit();
        assert!(!report.is_valid());
        assert_eq!(
            report.failures_at(1).next().map(|f| &f.kind),
            Some(&FailureKind::SelfConsistency {
                stored: Some([0xAB; 32]),
                recomputed: chain.blocks[1].compute_hash(),
            })
        );
    }

    #[test]
    fn forged_hash_breaks_following_stored_linkage() {
        let mut chain = transfer_chain(3, 2);
        let original = chain.blocks[1].hash;
        chain.blocks[1].hash = Some([0xAB; 32]);

        let report = chain.audit_strict();
        assert!(report.failures_at(2).any(|f| f.kind
            == FailureKind::StoredLinkage {
                stored: Some([0xAB; 32]),
                found: original,
            }));
    }

    #[test]
    fn remined_predecessor_breaks_linkage() {
        let mut chain = transfer_chain(3, 1);
        chain.blocks[1].data.receiver = "Mallory".into();
        let proof = pow::mine(&chain.blocks[1], 1);
        chain.blocks[1].nonce = proof.nonce;
        chain.blocks[1].hash = Some(proof.hash);

        let report = chain.audit();
        assert_eq!(report.failures_at(1).count(), 0);
        assert!(report.failures_at(2).any(|f| matches!(
            f.kind,
            FailureKind::Linkage { found, .. } if found != Some(proof.hash)
        )));
    }

    #[test]
    fn matchbox_scenario() {
        let mut chain = Chain::new();
        chain.append(Transfer::genesis(), 2).unwrap();
        chain.append(Transfer::new("Matchbox", "Flint", 5), 2).unwrap();
        chain.append(Transfer::new("Flint", "Tinder", 2), 2).unwrap();
        assert_eq!(chain.blocks()[0].previous_hash(), None);
        assert!(chain.validate());

        chain.blocks[1].data.receiver = "Kindling".into();
        assert!(!chain.validate());

        let report = chain.audit();
        assert!(report.failures_at(1).any(|f| f.kind.is_self_consistency()));
        assert!(!report.failures_at(1).any(|f| f.kind.is_linkage()));
    }

    #[test]
    fn strict_audit_checks_genesis() {
        let mut chain = transfer_chain(2, 1);
        chain.blocks[0].previous_hash = Some([1u8; 32]);
        assert_eq!(chain.audit().failures_at(0).count(), 0);

        let report = chain.audit_strict();
        assert!(report
            .failures_at(0)
            .any(|f| f.kind == FailureKind::GenesisLink { found: [1u8; 32] }));
        assert!(report.failures_at(0).any(|f| f.kind.is_self_consistency()));
        assert_eq!(report.blocks_checked, 2);
    }

    #[test]
    fn strict_audit_checks_difficulty() {
        let mut chain = transfer_chain(2, 1);
        let hash = chain.blocks[1].hash.unwrap();
        let leading_zeros = pow::count_leading_zero_nibbles(&hash);
        chain.blocks[1].difficulty = leading_zeros + 1;

        assert!(chain.validate());
        let report = chain.audit_strict();
        assert_eq!(
            report.failures,
            vec![ValidationFailure {
                index: 1,
                kind: FailureKind::InsufficientWork {
                    difficulty: leading_zeros + 1,
                    leading_zeros,
                },
            }]
        );
    }

    #[test]
    fn append_rejects_impossible_difficulty() {
        let mut chain: Chain<Transfer> = Chain::new();
        let err = chain
            .append(Transfer::genesis(), MAX_DIFFICULTY + 1)
            .unwrap_err();
        assert!(matches!(err, LedgerError::DifficultyOutOfRange { .. }));
        assert!(chain.is_empty());
    }

    #[test]
    fn bounded_append_leaves_chain_unchanged_on_exhaustion() {
        let mut chain = transfer_chain(1, 1);
        let err = chain
            .append_bounded(Transfer::new("a", "b", 1), MAX_DIFFICULTY, 5)
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::MiningExhausted {
                attempts: 5,
                difficulty: MAX_DIFFICULTY
            }
        );
        assert_eq!(chain.len(), 1);

        let (hash, block) = chain
            .append_bounded(Transfer::new("a", "b", 1), 1, 1_000_000)
            .unwrap();
        assert_eq!(block.hash(), Some(hash));
        assert_eq!(chain.len(), 2);
        assert!(chain.validate());
    }

    #[test]
    fn failure_display_names_index_and_check() {
        let failure = ValidationFailure {
            index: 3,
            kind: FailureKind::Linkage {
                expected: [0u8; 32],
                found: None,
            },
        };
        let text = failure.to_string();
        assert!(text.starts_with("block 3: previous hash <none>"));
        assert!(text.contains("block 2"));
    }
}
