use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use crate::config::ReadMode;
use crate::error::EngineError;
use crate::grid::Grid;
use crate::stencil::average_of;

/// The one field every shared-memory worker reads and writes.
///
/// Cells hold `f64` bit patterns in atomics so an unlocked read of a row that
/// another worker is rewriting is well defined: it sees each cell either
/// before or after that worker's store, never a torn value.
pub struct SharedGrid {
    dimension: usize,
    cells: Vec<AtomicU64>,
}

impl SharedGrid {
    pub fn from_grid(grid: Grid) -> Self {
        let dimension = grid.dimension();
        let cells = grid
            .data
            .into_iter()
            .map(|value| AtomicU64::new(value.to_bits()))
            .collect();
        SharedGrid { dimension, cells }
    }

    pub fn into_grid(self) -> Grid {
        let data = self
            .cells
            .into_iter()
            .map(|cell| f64::from_bits(cell.into_inner()))
            .collect();
        Grid::from_parts(self.dimension, data)
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn load(&self, x: usize, y: usize) -> f64 {
        f64::from_bits(self.cells[x * self.dimension + y].load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, x: usize, y: usize, value: f64) {
        self.cells[x * self.dimension + y].store(value.to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn average_neighbours(&self, x: usize, y: usize) -> f64 {
        average_of(
            self.load(x - 1, y),
            self.load(x + 1, y),
            self.load(x, y - 1),
            self.load(x, y + 1),
        )
    }

    /// Copy of the field as it stands; other workers may still be writing.
    pub fn snapshot(&self) -> Grid {
        let data = self
            .cells
            .iter()
            .map(|cell| f64::from_bits(cell.load(Ordering::Relaxed)))
            .collect();
        Grid::from_parts(self.dimension, data)
    }
}

// 行ごとのミューテックス
pub struct RowLocks {
    locks: Vec<Mutex<()>>,
}

/// Locks held while a row is rewritten.
///
/// Fields drop in declaration order, which releases the row below, then the
/// row itself, then the row above: the reverse of acquisition.
pub struct RowGuard<'a> {
    _below: Option<MutexGuard<'a, ()>>,
    _row: MutexGuard<'a, ()>,
    _above: Option<MutexGuard<'a, ()>>,
}

impl RowLocks {
    pub fn new(rows: usize) -> Self {
        RowLocks {
            locks: (0..rows).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Locks interior row `x`; in protected mode also `x - 1` and `x + 1`,
    /// always in increasing row order.
    pub fn lock(&self, x: usize, mode: ReadMode) -> Result<RowGuard<'_>, EngineError> {
        let above = match mode {
            ReadMode::Protected => Some(self.acquire(x - 1)?),
            ReadMode::Relaxed => None,
        };
        let row = self.acquire(x)?;
        let below = match mode {
            ReadMode::Protected => Some(self.acquire(x + 1)?),
            ReadMode::Relaxed => None,
        };
        Ok(RowGuard {
            _below: below,
            _row: row,
            _above: above,
        })
    }

    fn acquire(&self, row: usize) -> Result<MutexGuard<'_, ()>, EngineError> {
        self.locks[row]
            .lock()
            .map_err(|_| EngineError::LockPoisoned { row })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_atomics() {
        let mut grid = Grid::new(5).unwrap();
        grid.data[2 * 5 + 2] = 0.125;
        let shared = SharedGrid::from_grid(grid.clone());
        assert_eq!(shared.load(2, 2), 0.125);
        shared.store(1, 1, 0.5);
        let back = shared.into_grid();
        assert_eq!(back.get(1, 1), 0.5);
        assert_eq!(back.get(2, 2), 0.125);
        assert!(back.boundary_intact());
    }

    #[test]
    fn snapshot_sees_stores_without_consuming() {
        let shared = SharedGrid::from_grid(Grid::new(4).unwrap());
        shared.store(2, 1, 0.25);
        let copy = shared.snapshot();
        assert_eq!(copy.get(2, 1), 0.25);
        assert!(copy.boundary_intact());
        assert_eq!(shared.load(2, 1), 0.25);
    }

    #[test]
    fn protected_lock_blocks_neighbouring_rows() {
        let locks = RowLocks::new(5);
        let guard = locks.lock(2, ReadMode::Protected).unwrap();
        assert!(locks.locks[1].try_lock().is_err());
        assert!(locks.locks[2].try_lock().is_err());
        assert!(locks.locks[3].try_lock().is_err());
        assert!(locks.locks[4].try_lock().is_ok());
        drop(guard);
        assert!(locks.locks[1].try_lock().is_ok());
    }

    #[test]
    fn relaxed_lock_holds_only_its_row() {
        let locks = RowLocks::new(5);
        let _guard = locks.lock(2, ReadMode::Relaxed).unwrap();
        assert!(locks.locks[1].try_lock().is_ok());
        assert!(locks.locks[2].try_lock().is_err());
        assert!(locks.locks[3].try_lock().is_ok());
    }
}
