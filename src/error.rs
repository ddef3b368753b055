//! Error types for the relaxation engines.

use std::io;

use thiserror::Error;

pub type RelaxResult<T> = Result<T, EngineError>;

/// Invalid run parameters, detected before any engine starts.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("array dimension must be at least 3, got {0}")]
    Dimension(usize),

    #[error("precision must lie in [0.0, 1.0], got {0}")]
    Precision(f64),

    #[error("worker count must be at least 1, got {0}")]
    Workers(usize),

    // 分散版のみ: ランク数は次元以下
    #[error("{workers} ranks cannot partition a grid of dimension {dimension}")]
    TooManyWorkers { workers: usize, dimension: usize },

    #[error("rank {rank} is out of range for {workers} workers")]
    Rank { rank: usize, workers: usize },
}

/// Transport failure inside a rank group.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommError {
    #[error("rank {rank} lost its connection to rank {peer}")]
    Disconnected { rank: usize, peer: usize },

    #[error("rank {rank} received abort from rank {origin}")]
    Aborted { rank: usize, origin: usize },

    #[error("rank {rank} expected {expected} values from rank {peer}, got {actual}")]
    SizeMismatch {
        rank: usize,
        peer: usize,
        expected: usize,
        actual: usize,
    },

    #[error("rank {rank} is outside a group of size {size}")]
    InvalidRank { rank: usize, size: usize },

    #[error("transport initialisation failed: {0}")]
    Init(String),
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("communication error: {0}")]
    Comm(#[from] CommError),

    #[error("failed to spawn worker {rank}: {source}")]
    Spawn {
        rank: usize,
        #[source]
        source: io::Error,
    },

    #[error("row lock {row} poisoned")]
    LockPoisoned { row: usize },

    #[error("worker {rank} panicked")]
    WorkerPanicked { rank: usize },

    /// Stopped because another worker of the same run failed.
    #[error("worker {rank} cancelled")]
    Cancelled { rank: usize },
}
