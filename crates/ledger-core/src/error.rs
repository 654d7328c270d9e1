use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("difficulty {difficulty} is out of range (max {max})")]
    DifficultyOutOfRange { difficulty: u32, max: u32 },

    #[error("no nonce met difficulty {difficulty} within {attempts} attempts")]
    MiningExhausted { attempts: u64, difficulty: u32 },
}
