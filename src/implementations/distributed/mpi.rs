// MPI-backed communicator (feature = "mpi")

use mpi::datatype::PartitionMut;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::Communicator as _;
use mpi::traits::*;
use mpi::Count;

use super::comm::{Communicator, ROOT};
use crate::error::CommError;

/// One rank of an MPI job. The group size is whatever `mpirun -n` started.
///
/// MPI's default error handler aborts the job on any transport failure, so
/// the operations below only report size mismatches themselves.
pub struct MpiComm {
    world: SimpleCommunicator,
    rank: usize,
    size: usize,
    // finalizes MPI when dropped; must outlive `world`
    _universe: Universe,
}

impl MpiComm {
    pub fn init() -> Result<Self, CommError> {
        let universe =
            mpi::initialize().ok_or_else(|| CommError::Init("MPI was already initialised".to_string()))?;
        let world = universe.world();
        let rank = world.rank() as usize;
        let size = world.size() as usize;
        Ok(MpiComm {
            world,
            rank,
            size,
            _universe: universe,
        })
    }
}

impl Communicator for MpiComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send_row(&mut self, dest: usize, tag: u32, row: &[f64]) -> Result<(), CommError> {
        self.world
            .process_at_rank(dest as i32)
            .send_with_tag(row, tag as i32);
        Ok(())
    }

    fn recv_row(&mut self, source: usize, tag: u32, row: &mut [f64]) -> Result<(), CommError> {
        let status = self
            .world
            .process_at_rank(source as i32)
            .receive_into_with_tag(row, tag as i32);
        let received = status.count(f64::equivalent_datatype()) as usize;
        if received != row.len() {
            return Err(CommError::SizeMismatch {
                rank: self.rank,
                peer: source,
                expected: row.len(),
                actual: received,
            });
        }
        Ok(())
    }

    fn gather_flags(&mut self, flag: bool) -> Result<Option<Vec<bool>>, CommError> {
        let value = i32::from(flag);
        let root = self.world.process_at_rank(ROOT as i32);
        if self.rank == ROOT {
            let mut flags = vec![0i32; self.size];
            root.gather_into_root(&value, &mut flags[..]);
            Ok(Some(flags.into_iter().map(|v| v != 0).collect()))
        } else {
            root.gather_into(&value);
            Ok(None)
        }
    }

    fn broadcast_flag(&mut self, flag: bool) -> Result<bool, CommError> {
        let mut value = i32::from(flag);
        self.world
            .process_at_rank(ROOT as i32)
            .broadcast_into(&mut value);
        Ok(value != 0)
    }

    fn gather_rows(
        &mut self,
        local: &[f64],
        counts: &[usize],
        offsets: &[usize],
        out: Option<&mut [f64]>,
    ) -> Result<(), CommError> {
        let root = self.world.process_at_rank(ROOT as i32);
        if self.rank != ROOT {
            root.gather_varcount_into(local);
            return Ok(());
        }

        let out = out.ok_or(CommError::SizeMismatch {
            rank: self.rank,
            peer: ROOT,
            expected: counts.iter().sum(),
            actual: 0,
        })?;
        let counts: Vec<Count> = counts.iter().map(|&c| c as Count).collect();
        let displs: Vec<Count> = offsets.iter().map(|&o| o as Count).collect();
        let mut partition = PartitionMut::new(out, &counts[..], &displs[..]);
        root.gather_varcount_into_root(local, &mut partition);
        Ok(())
    }

    fn abort(&mut self, code: i32) {
        self.world.abort(code)
    }
}
