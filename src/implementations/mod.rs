pub mod distributed;
pub mod sequential;
pub mod shared_memory;

use std::fmt;
use std::str::FromStr;

use crate::config::RelaxConfig;
use crate::error::RelaxResult;
use crate::grid::Grid;
use crate::RelaxReport;

/// Engines selectable from the command line and the benchmark harness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Engine {
    Sequential,
    SharedMemory,
    Distributed,
}

impl Engine {
    pub const ALL: [Engine; 3] = [Engine::Sequential, Engine::SharedMemory, Engine::Distributed];

    /// Builds a fresh grid and relaxes it with this engine. The distributed
    /// engine runs its ranks in-process.
    pub fn run(self, config: &RelaxConfig) -> RelaxResult<RelaxReport> {
        match self {
            Engine::Sequential => {
                let grid = Grid::new(config.dimension())?;
                Ok(sequential::relax(grid, config.precision()))
            }
            Engine::SharedMemory => {
                let grid = Grid::new(config.dimension())?;
                shared_memory::relax(grid, config)
            }
            Engine::Distributed => distributed::relax_in_process(config),
        }
    }
}

impl fmt::Display for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Engine::Sequential => "sequential",
            Engine::SharedMemory => "shared-memory",
            Engine::Distributed => "distributed",
        };
        f.write_str(name)
    }
}

impl FromStr for Engine {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" | "single" => Ok(Engine::Sequential),
            "shared" | "shared-memory" => Ok(Engine::SharedMemory),
            "distributed" => Ok(Engine::Distributed),
            other => Err(format!("unknown engine: {}", other)),
        }
    }
}
