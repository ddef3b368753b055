//! Row decomposition of the grid across workers.
//!
//! Rank `r` of `W` is handed the block `[r*q, (r+1)*q)` with `q = D / W`; the
//! last rank also takes the `D mod W` leftover rows, and so every row when
//! `W > D`. Of its block a rank only mutates the rows that are not part of
//! the fixed top or bottom boundary.

use std::ops::Range;

use crate::config::validate_dimension;
use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Partition {
    rank: usize,
    workers: usize,
    dimension: usize,
    block: Range<usize>,
}

impl Partition {
    pub fn new(rank: usize, workers: usize, dimension: usize) -> Result<Self, ConfigError> {
        validate_dimension(dimension)?;
        if workers < 1 {
            return Err(ConfigError::Workers(workers));
        }
        if rank >= workers {
            return Err(ConfigError::Rank { rank, workers });
        }

        let rows_per_worker = dimension / workers;
        let start = rank * rows_per_worker;
        let end = if rank == workers - 1 {
            dimension
        } else {
            start + rows_per_worker
        };

        Ok(Partition {
            rank,
            workers,
            dimension,
            block: start..end,
        })
    }

    pub fn all(workers: usize, dimension: usize) -> Result<Vec<Partition>, ConfigError> {
        if workers < 1 {
            return Err(ConfigError::Workers(workers));
        }
        (0..workers)
            .map(|rank| Partition::new(rank, workers, dimension))
            .collect()
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn is_first(&self) -> bool {
        self.rank == 0
    }

    pub fn is_last(&self) -> bool {
        self.rank == self.workers - 1
    }

    pub fn block(&self) -> Range<usize> {
        self.block.clone()
    }

    /// Rows this rank updates: its block minus the grid's top and bottom rows.
    pub fn owned(&self) -> Range<usize> {
        let start = self.block.start.max(1);
        let end = self.block.end.min(self.dimension - 1);
        start..end.max(start)
    }

    pub fn has_upper_neighbour(&self) -> bool {
        !self.is_first()
    }

    pub fn has_lower_neighbour(&self) -> bool {
        !self.is_last()
    }

    /// Grid rows held in the working buffer: the block plus one ghost row
    /// above and below where a neighbour exists.
    pub fn window(&self) -> Range<usize> {
        let start = if self.has_upper_neighbour() {
            self.block.start.saturating_sub(1)
        } else {
            self.block.start
        };
        let end = if self.has_lower_neighbour() {
            (self.block.end + 1).min(self.dimension)
        } else {
            self.block.end
        };
        start..end
    }

    pub fn local_row(&self, grid_row: usize) -> usize {
        grid_row - self.window().start
    }

    /// Number of values each rank contributes to the final gather, and the
    /// offset in the assembled grid where they land. Only owned rows travel.
    pub fn gather_layout(workers: usize, dimension: usize) -> Result<(Vec<usize>, Vec<usize>), ConfigError> {
        let partitions = Partition::all(workers, dimension)?;
        let counts = partitions
            .iter()
            .map(|p| p.owned().len() * dimension)
            .collect();
        let offsets = partitions
            .iter()
            .map(|p| p.owned().start * dimension)
            .collect();
        Ok((counts, offsets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn last_rank_absorbs_remainder() {
        let parts = Partition::all(3, 11).unwrap();
        assert_eq!(parts[0].block(), 0..3);
        assert_eq!(parts[1].block(), 3..6);
        assert_eq!(parts[2].block(), 6..11);
        assert_eq!(parts[0].owned(), 1..3);
        assert_eq!(parts[2].owned(), 6..10);
    }

    #[test]
    fn window_carries_ghost_rows() {
        let parts = Partition::all(3, 9).unwrap();
        assert_eq!(parts[0].window(), 0..4);
        assert_eq!(parts[1].window(), 2..7);
        assert_eq!(parts[2].window(), 5..9);
        assert_eq!(parts[1].local_row(3), 1);
    }

    #[test]
    fn single_worker_owns_all_interior_rows() {
        let part = Partition::new(0, 1, 5).unwrap();
        assert_eq!(part.block(), 0..5);
        assert_eq!(part.owned(), 1..4);
        assert_eq!(part.window(), 0..5);
    }

    #[test]
    fn one_row_blocks_on_the_boundary_own_nothing() {
        let parts = Partition::all(4, 4).unwrap();
        assert!(parts[0].owned().is_empty());
        assert_eq!(parts[1].owned(), 1..2);
        assert_eq!(parts[2].owned(), 2..3);
        assert!(parts[3].owned().is_empty());
    }

    #[test]
    fn more_workers_than_rows_leaves_all_to_the_last() {
        let parts = Partition::all(8, 4).unwrap();
        for part in &parts[..7] {
            assert!(part.block().is_empty());
            assert!(part.owned().is_empty());
        }
        assert_eq!(parts[7].block(), 0..4);
        assert_eq!(parts[7].owned(), 1..3);
    }

    #[test]
    fn rank_outside_the_group_is_an_error() {
        assert_eq!(
            Partition::new(3, 3, 10),
            Err(ConfigError::Rank { rank: 3, workers: 3 })
        );
        assert_eq!(Partition::all(0, 10), Err(ConfigError::Workers(0)));
    }

    #[test]
    fn gather_layout_matches_owned_rows() {
        let (counts, offsets) = Partition::gather_layout(3, 10).unwrap();
        assert_eq!(counts, vec![20, 30, 30]);
        assert_eq!(offsets, vec![10, 30, 60]);
    }
}
