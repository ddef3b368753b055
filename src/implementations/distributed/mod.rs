//! Distributed engine: isolated ranks, ghost-row exchange, and a
//! gather + broadcast convergence vote every iteration.

pub mod channel;
pub mod comm;
#[cfg(feature = "mpi")]
pub mod mpi;

pub use channel::{run_group, ChannelComm};
pub use comm::{Communicator, ROOT, TAG_DOWNWARD, TAG_UPWARD};

use std::ops::Range;

use tracing::{debug, info};

use crate::config::RelaxConfig;
use crate::error::{CommError, EngineError, RelaxResult};
use crate::grid::Grid;
use crate::partition::Partition;
use crate::stencil::average_from_rows;
use crate::RelaxReport;

/// Runs this rank's share of the relaxation. Every rank of `comm` must call
/// this with the same `dimension` and `precision`.
///
/// Returns the assembled grid on [`ROOT`] and `None` everywhere else.
pub fn relax<C: Communicator>(
    comm: &mut C,
    dimension: usize,
    precision: f64,
) -> RelaxResult<Option<RelaxReport>> {
    let rank = comm.rank();
    let workers = comm.size();
    RelaxConfig::new(dimension, precision, workers)?.validate_distributed()?;
    let partition = Partition::new(rank, workers, dimension)?;

    // 各ランクは境界込みのグリッドを個別に保持する
    let grid = Grid::new(dimension)?;
    let mut buffer = grid.rows(partition.window()).to_vec();
    let mut snapshot = buffer.clone();

    let owned = local_owned_rows(&partition);
    let mut iterations = 0;

    loop {
        exchange_ghost_rows(comm, &partition, &mut buffer)?;

        snapshot.copy_from_slice(&buffer);
        let balanced = relax_rows(&snapshot, &mut buffer, dimension, owned.clone(), precision);
        iterations += 1;

        let done = converged(comm, balanced)?;
        if done {
            break;
        }
        if rank == ROOT && iterations % 1000 == 0 {
            debug!(iterations, "distributed relaxation still running");
        }
    }

    let (counts, offsets) = Partition::gather_layout(workers, dimension)?;
    let local = &buffer[owned.start * dimension..owned.end * dimension];

    if rank == ROOT {
        let mut assembled = grid;
        comm.gather_rows(local, &counts, &offsets, Some(&mut assembled.data[..]))?;
        info!(workers, dimension, iterations, "distributed relaxation converged");
        Ok(Some(RelaxReport {
            grid: assembled,
            passes: iterations,
        }))
    } else {
        comm.gather_rows(local, &counts, &offsets, None)?;
        Ok(None)
    }
}

/// In-process ranks on threads, connected by rendezvous channels.
pub fn relax_in_process(config: &RelaxConfig) -> RelaxResult<RelaxReport> {
    config.validate_distributed()?;
    let dimension = config.dimension();
    let precision = config.precision();

    let results = run_group(config.workers(), |comm| relax(comm, dimension, precision));

    let mut report = None;
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(Some(r)) => report = Some(r),
            Ok(None) => {}
            Err(e) => failures.push(e),
        }
    }

    if !failures.is_empty() {
        // 中断を起こしたランクのエラーが本当の原因
        let root_cause = failures
            .iter()
            .position(|e| !matches!(e, EngineError::Comm(CommError::Aborted { .. })))
            .unwrap_or(0);
        return Err(failures.swap_remove(root_cause));
    }

    report.ok_or(EngineError::Comm(CommError::Init(
        "root rank returned no grid".to_string(),
    )))
}

/// Blocking ghost exchange. The order (send up, receive from below, send
/// down, receive from above) lets a chain of ranks complete without any two
/// neighbours both waiting to receive first.
pub fn exchange_ghost_rows<C: Communicator>(
    comm: &mut C,
    partition: &Partition,
    buffer: &mut [f64],
) -> Result<(), CommError> {
    let d = partition.dimension();
    let rank = partition.rank();
    let first = partition.local_row(partition.block().start);
    let last = partition.local_row(partition.block().end - 1);

    if partition.has_upper_neighbour() {
        comm.send_row(rank - 1, TAG_UPWARD, &buffer[first * d..(first + 1) * d])?;
    }
    if partition.has_lower_neighbour() {
        comm.recv_row(rank + 1, TAG_UPWARD, &mut buffer[(last + 1) * d..(last + 2) * d])?;
    }
    if partition.has_lower_neighbour() {
        comm.send_row(rank + 1, TAG_DOWNWARD, &buffer[last * d..(last + 1) * d])?;
    }
    if partition.has_upper_neighbour() {
        comm.recv_row(rank - 1, TAG_DOWNWARD, &mut buffer[0..d])?;
    }
    Ok(())
}

// ルートで全ランクのフラグを AND して結果を配る
pub fn converged<C: Communicator>(comm: &mut C, balanced: bool) -> Result<bool, CommError> {
    let flags = comm.gather_flags(balanced)?;
    let all_balanced = flags.map(|f| f.iter().all(|&b| b)).unwrap_or(false);
    comm.broadcast_flag(all_balanced)
}

// スナップショットから Jacobi 更新
fn relax_rows(snapshot: &[f64], buffer: &mut [f64], d: usize, rows: Range<usize>, precision: f64) -> bool {
    let mut balanced = true;
    for x in rows {
        let above = &snapshot[(x - 1) * d..x * d];
        let row = &snapshot[x * d..(x + 1) * d];
        let below = &snapshot[(x + 1) * d..(x + 2) * d];
        let out = &mut buffer[x * d..(x + 1) * d];
        for y in 1..d - 1 {
            let average = average_from_rows(above, row, below, y);
            if balanced && (average - row[y]).abs() > precision {
                balanced = false;
            }
            out[y] = average;
        }
    }
    balanced
}

fn local_owned_rows(partition: &Partition) -> Range<usize> {
    let owned = partition.owned();
    let start = partition.local_row(owned.start);
    start..start + owned.len()
}
