//! Relaxation solver for the discrete Laplace equation on a square grid.
//!
//! The fixed boundary (top and left edges at 1.0, bottom and right edges at
//! 0.0) is relaxed by repeated four-neighbour averaging until no interior cell
//! moves by more than the configured precision within one pass.
//!
//! Three engines are provided:
//!
//! - [`implementations::sequential`]: double-buffered Jacobi, the reference.
//! - [`implementations::shared_memory`]: one thread per worker updating one
//!   grid in place, one lock per row.
//! - [`implementations::distributed`]: isolated ranks that exchange ghost rows
//!   and agree on convergence through a gather + broadcast.

pub mod config;
pub mod error;
pub mod grid;
pub mod implementations;
pub mod partition;
pub mod stencil;

pub use config::{ExitPolicy, ReadMode, RelaxConfig};
pub use error::{CommError, ConfigError, EngineError, RelaxResult};
pub use grid::Grid;
pub use partition::Partition;

/// Outcome of an engine run.
#[derive(Clone, Debug)]
pub struct RelaxReport {
    pub grid: Grid,
    /// Passes performed. For the shared-memory engine this is the largest
    /// pass count of any worker.
    pub passes: usize,
}
