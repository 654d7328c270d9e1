use ledger_core::{Chain, Transfer};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde_json::Value;

pub fn random_transfers(count: usize, seed: u64) -> Vec<Transfer> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count)
        .map(|i| Transfer {
            sender: format!("addr_from_{}", rng.gen_range(0..1000)),
            receiver: format!("addr_to_{i}"),
            firecoins: rng.gen_range(1..10_000),
        })
        .collect()
}

/// A genesis block followed by `extra` random transfers.
pub fn build_chain(extra: usize, difficulty: u32) -> Chain<Transfer> {
    let mut chain = Chain::new();
    chain
        .append(Transfer::genesis(), difficulty)
        .expect("genesis should mine");
    for tx in random_transfers(extra, 42) {
        chain.append(tx, difficulty).expect("block should mine");
    }
    chain
}

/// Round-trip the chain through JSON, letting `edit` change it on the way.
pub fn tamper_via_json(
    chain: &Chain<Transfer>,
    edit: impl FnOnce(&mut Value),
) -> Chain<Transfer> {
    let mut value = serde_json::to_value(chain).expect("chain should serialize");
    edit(&mut value);
    serde_json::from_value(value).expect("edited chain should deserialize")
}
