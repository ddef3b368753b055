//! Shared-memory engine: one grid, one thread per worker, one lock per row.
//!
//! Each worker walks the interior rows of its partition top to bottom. It
//! locks the row it is about to rewrite, averages every interior cell from the
//! live field and stores the result straight back, so cells later in the pass
//! already see this pass's values (Gauss-Seidel rather than Jacobi). By default
//! a worker stops after its first pass in which none of its cells moved by
//! more than the precision; it does not wait for, or check on, the others.
//!
//! With [`ReadMode::Relaxed`] the rows above and below are read without their
//! locks while the neighbouring worker may be rewriting them. The converged
//! values therefore depend on thread timing and only agree with the
//! sequential engine up to a tolerance.
//!
//! Under [`ExitPolicy::Independent`] a worker that sweeps its rows before its
//! neighbours have started can balance against their initial zeros and stop
//! early. [`ExitPolicy::AwaitAll`] keeps every worker sweeping until all of
//! them have published a balanced pass.

mod shared_grid;

pub use shared_grid::{RowGuard, RowLocks, SharedGrid};

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{debug, enabled, info, Level};

use crate::config::{ExitPolicy, ReadMode, RelaxConfig};
use crate::error::{EngineError, RelaxResult};
use crate::grid::Grid;
use crate::partition::Partition;
use crate::stencil::average_neighbours;
use crate::RelaxReport;

pub fn relax(grid: Grid, config: &RelaxConfig) -> RelaxResult<RelaxReport> {
    config.validate()?;
    let workers = config.workers();
    let dimension = grid.dimension();
    let partitions = Partition::all(workers, dimension)?;

    let shared = SharedGrid::from_grid(grid);
    let locks = RowLocks::new(dimension);
    let balanced: Vec<AtomicBool> = (0..workers).map(|_| AtomicBool::new(false)).collect();
    let cancelled = AtomicBool::new(false);

    let results = run_workers(&partitions, &cancelled, |partition| {
        let worker = Worker {
            shared: &shared,
            locks: &locks,
            balanced: &balanced,
            cancelled: &cancelled,
            partition,
        };
        worker.run(config.precision(), config.read_mode(), config.exit_policy())
    });

    let mut passes = Vec::with_capacity(workers);
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(p) => passes.push(p),
            Err(e) => failures.push(e),
        }
    }
    if !failures.is_empty() {
        // キャンセルされた側ではなく原因となったエラーを返す
        let root_cause = failures
            .iter()
            .position(|e| !matches!(e, EngineError::Cancelled { .. }))
            .unwrap_or(0);
        return Err(failures.swap_remove(root_cause));
    }

    drop(locks);
    let max_passes = passes.iter().copied().max().unwrap_or(0);
    info!(
        workers,
        dimension,
        passes = max_passes,
        read_mode = ?config.read_mode(),
        exit_policy = ?config.exit_policy(),
        "shared-memory relaxation converged"
    );

    Ok(RelaxReport {
        grid: shared.into_grid(),
        passes: max_passes,
    })
}

/// Runs `f` once per partition, each on its own named thread, and joins them
/// all. Results come back in rank order. A worker that fails, panics or cannot
/// be spawned raises `cancelled`.
pub fn run_workers<T, F>(partitions: &[Partition], cancelled: &AtomicBool, f: F) -> Vec<RelaxResult<T>>
where
    T: Send,
    F: Fn(&Partition) -> RelaxResult<T> + Sync,
{
    let f = &f;

    thread::scope(|scope| {
        let handles: Vec<_> = partitions
            .iter()
            .map(|partition| {
                let rank = partition.rank();
                let spawned = thread::Builder::new()
                    .name(format!("relax-worker-{}", rank))
                    .spawn_scoped(scope, move || {
                        let guard = CancelOnFailure::arm(cancelled);
                        let result = f(partition);
                        if result.is_ok() {
                            guard.disarm();
                        }
                        result
                    });
                spawned.map_err(|source| {
                    cancelled.store(true, Ordering::Release);
                    EngineError::Spawn { rank, source }
                })
            })
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| match handle {
                Ok(handle) => handle
                    .join()
                    .unwrap_or(Err(EngineError::WorkerPanicked { rank })),
                Err(e) => Err(e),
            })
            .collect()
    })
}

// エラー終了・パニック時に他のワーカーへ中断を知らせる
struct CancelOnFailure<'a> {
    cancelled: &'a AtomicBool,
    armed: bool,
}

impl<'a> CancelOnFailure<'a> {
    fn arm(cancelled: &'a AtomicBool) -> Self {
        CancelOnFailure {
            cancelled,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for CancelOnFailure<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.cancelled.store(true, Ordering::Release);
        }
    }
}

pub struct Worker<'a> {
    pub shared: &'a SharedGrid,
    pub locks: &'a RowLocks,
    /// Per-rank flag: did that worker's latest pass stay within precision.
    pub balanced: &'a [AtomicBool],
    pub cancelled: &'a AtomicBool,
    pub partition: &'a Partition,
}

impl Worker<'_> {
    /// Sweeps the partition until the exit policy lets this worker stop.
    /// Returns the number of passes it took.
    pub fn run(&self, precision: f64, mode: ReadMode, policy: ExitPolicy) -> RelaxResult<usize> {
        let rank = self.partition.rank();
        let mut passes = 0;

        loop {
            if self.cancelled.load(Ordering::Acquire) {
                return Err(EngineError::Cancelled { rank });
            }

            let balanced = self.pass(precision, mode)?;
            passes += 1;
            self.balanced[rank].store(balanced, Ordering::Release);

            if balanced {
                match policy {
                    ExitPolicy::Independent => break,
                    ExitPolicy::AwaitAll if self.all_balanced() => break,
                    ExitPolicy::AwaitAll => thread::yield_now(),
                }
            }
        }

        debug!(rank, passes, rows = ?self.partition.owned(), "worker balanced");
        if enabled!(Level::DEBUG) {
            // 終了時点の格子 (他のワーカーはまだ更新中の可能性あり)
            debug!(rank, "grid as worker {} finished:\n{}", rank, self.shared.snapshot());
        }
        Ok(passes)
    }

    /// One in-place sweep over the owned rows, top to bottom.
    pub fn pass(&self, precision: f64, mode: ReadMode) -> RelaxResult<bool> {
        let d = self.shared.dimension();
        let mut balanced = true;

        for x in self.partition.owned() {
            let _guard = self.locks.lock(x, mode)?;
            for y in 1..d - 1 {
                let average = self.shared.average_neighbours(x, y);
                if balanced && (average - self.shared.load(x, y)).abs() > precision {
                    balanced = false;
                }
                self.shared.store(x, y, average);
            }
        }

        Ok(balanced)
    }

    fn all_balanced(&self) -> bool {
        self.balanced.iter().all(|flag| flag.load(Ordering::Acquire))
    }
}

/// One in-place pass over every interior row of `grid`, without threads.
pub fn in_place_step(grid: &mut Grid, precision: f64) -> bool {
    let d = grid.dimension();
    let mut balanced = true;
    for x in 1..d - 1 {
        for y in 1..d - 1 {
            let average = average_neighbours(&grid.data, d, x, y);
            if balanced && (average - grid.get(x, y)).abs() > precision {
                balanced = false;
            }
            grid.data[x * d + y] = average;
        }
    }
    balanced
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Barrier;

    #[test]
    fn every_worker_runs_on_its_own_thread_at_once() {
        let partitions = Partition::all(4, 16).unwrap();
        let cancelled = AtomicBool::new(false);
        // 4つ全員が同時に走っていなければ通過できない
        let barrier = Barrier::new(4);

        let results = run_workers(&partitions, &cancelled, |_| {
            barrier.wait();
            Ok(thread::current().name().map(str::to_string))
        });

        let names: HashSet<_> = results.into_iter().map(|r| r.unwrap().unwrap()).collect();
        let expected: HashSet<_> = (0..4).map(|i| format!("relax-worker-{}", i)).collect();
        assert_eq!(names, expected);
        assert!(!cancelled.load(Ordering::Acquire));
    }

    #[test]
    fn failing_worker_cancels_the_rest() {
        let partitions = Partition::all(3, 12).unwrap();
        let cancelled = AtomicBool::new(false);

        let results = run_workers(&partitions, &cancelled, |partition| {
            if partition.rank() == 1 {
                return Err::<(), _>(EngineError::LockPoisoned { row: 5 });
            }
            while !cancelled.load(Ordering::Acquire) {
                thread::yield_now();
            }
            Err(EngineError::Cancelled { rank: partition.rank() })
        });

        assert!(matches!(results[1], Err(EngineError::LockPoisoned { row: 5 })));
        assert!(matches!(results[0], Err(EngineError::Cancelled { rank: 0 })));
        assert!(matches!(results[2], Err(EngineError::Cancelled { rank: 2 })));
    }

    #[test]
    fn panicking_worker_is_reported_and_cancels() {
        let partitions = Partition::all(2, 8).unwrap();
        let cancelled = AtomicBool::new(false);

        let results = run_workers(&partitions, &cancelled, |partition| {
            if partition.rank() == 0 {
                panic!("worker blew up");
            }
            while !cancelled.load(Ordering::Acquire) {
                thread::yield_now();
            }
            Ok(())
        });

        assert!(matches!(results[0], Err(EngineError::WorkerPanicked { rank: 0 })));
        assert!(results[1].is_ok());
    }

    #[test]
    fn more_workers_than_rows() {
        let config = RelaxConfig::new(4, 0.0001, 8)
            .unwrap()
            .with_exit_policy(ExitPolicy::AwaitAll);
        let report = relax(Grid::new(4).unwrap(), &config).unwrap();
        assert!(report.grid.boundary_intact());
        assert!((report.grid.get(1, 1) - 0.75).abs() < 0.01);
    }
}
