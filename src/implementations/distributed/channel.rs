use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use super::comm::{Communicator, ROOT};
use crate::error::{CommError, EngineError, RelaxResult};

const TAG_GATHER_FLAGS: u32 = 100;
const TAG_BROADCAST: u32 = 101;
const TAG_GATHER_ROWS: u32 = 102;

const NO_ABORT: usize = usize::MAX;

struct Message {
    tag: u32,
    payload: Vec<f64>,
}

/*
  In-process rank group over rendezvous channels.

  Every ordered pair of ranks gets its own `sync_channel(0)`, so a send only
  returns once the peer has taken the message, the way a synchronous MPI send
  behaves. A bad send/receive order therefore deadlocks here as well.
  Messages from one source arrive in order; one that arrives under another
  tag than the one asked for waits in `pending`.

  A rank dropped without `finalize()` (error return, panic) records itself as
  the abort origin and closes all of its channels. Peers blocked on it see the
  disconnect, fail, and close theirs in turn until the whole group is down.
*/
pub struct ChannelComm {
    rank: usize,
    size: usize,
    outgoing: Vec<Option<SyncSender<Message>>>,
    incoming: Vec<Option<Receiver<Message>>>,
    pending: VecDeque<(usize, u32, Vec<f64>)>,
    abort_origin: Arc<AtomicUsize>,
    finalized: bool,
}

impl ChannelComm {
    /// One endpoint per rank, in rank order.
    pub fn group(size: usize) -> Vec<ChannelComm> {
        let abort_origin = Arc::new(AtomicUsize::new(NO_ABORT));
        let mut outgoing: Vec<Vec<Option<SyncSender<Message>>>> =
            (0..size).map(|_| (0..size).map(|_| None).collect()).collect();
        let mut incoming: Vec<Vec<Option<Receiver<Message>>>> =
            (0..size).map(|_| (0..size).map(|_| None).collect()).collect();

        for from in 0..size {
            for to in (0..size).filter(|&to| to != from) {
                let (tx, rx) = mpsc::sync_channel(0);
                outgoing[from][to] = Some(tx);
                incoming[to][from] = Some(rx);
            }
        }

        outgoing
            .into_iter()
            .zip(incoming)
            .enumerate()
            .map(|(rank, (outgoing, incoming))| ChannelComm {
                rank,
                size,
                outgoing,
                incoming,
                pending: VecDeque::new(),
                abort_origin: Arc::clone(&abort_origin),
                finalized: false,
            })
            .collect()
    }

    /// Marks a clean shutdown; dropping afterwards does not abort the peers.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    fn check_rank(&self, peer: usize) -> Result<(), CommError> {
        if peer >= self.size || peer == self.rank {
            return Err(CommError::InvalidRank {
                rank: peer,
                size: self.size,
            });
        }
        Ok(())
    }

    // 切断の理由が中断なら Aborted として報告する
    fn lost(&self, peer: usize) -> CommError {
        match self.abort_origin.load(Ordering::Acquire) {
            NO_ABORT => CommError::Disconnected {
                rank: self.rank,
                peer,
            },
            origin => CommError::Aborted {
                rank: self.rank,
                origin,
            },
        }
    }

    fn send(&self, dest: usize, tag: u32, payload: Vec<f64>) -> Result<(), CommError> {
        self.check_rank(dest)?;
        let tx = self.outgoing[dest].as_ref().ok_or_else(|| self.lost(dest))?;
        tx.send(Message { tag, payload }).map_err(|_| self.lost(dest))
    }

    fn recv(&mut self, source: usize, tag: u32) -> Result<Vec<f64>, CommError> {
        self.check_rank(source)?;
        if let Some(pos) = self
            .pending
            .iter()
            .position(|(s, t, _)| *s == source && *t == tag)
        {
            if let Some((_, _, payload)) = self.pending.remove(pos) {
                return Ok(payload);
            }
        }

        loop {
            let received = match self.incoming[source].as_ref() {
                Some(rx) => rx.recv(),
                None => return Err(self.lost(source)),
            };
            match received {
                Ok(message) if message.tag == tag => return Ok(message.payload),
                Ok(message) => self.pending.push_back((source, message.tag, message.payload)),
                Err(_) => return Err(self.lost(source)),
            }
        }
    }

    fn recv_exact(&mut self, source: usize, tag: u32, expected: usize) -> Result<Vec<f64>, CommError> {
        let payload = self.recv(source, tag)?;
        if payload.len() != expected {
            return Err(CommError::SizeMismatch {
                rank: self.rank,
                peer: source,
                expected,
                actual: payload.len(),
            });
        }
        Ok(payload)
    }
}

impl Communicator for ChannelComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn send_row(&mut self, dest: usize, tag: u32, row: &[f64]) -> Result<(), CommError> {
        self.send(dest, tag, row.to_vec())
    }

    fn recv_row(&mut self, source: usize, tag: u32, row: &mut [f64]) -> Result<(), CommError> {
        let payload = self.recv_exact(source, tag, row.len())?;
        row.copy_from_slice(&payload);
        Ok(())
    }

    fn gather_flags(&mut self, flag: bool) -> Result<Option<Vec<bool>>, CommError> {
        let encoded = if flag { 1.0 } else { 0.0 };
        if self.rank != ROOT {
            self.send(ROOT, TAG_GATHER_FLAGS, vec![encoded])?;
            return Ok(None);
        }

        let mut flags = Vec::with_capacity(self.size);
        for source in 0..self.size {
            if source == ROOT {
                flags.push(flag);
            } else {
                let value = self.recv_exact(source, TAG_GATHER_FLAGS, 1)?;
                flags.push(value[0] != 0.0);
            }
        }
        Ok(Some(flags))
    }

    fn broadcast_flag(&mut self, flag: bool) -> Result<bool, CommError> {
        if self.rank != ROOT {
            let value = self.recv_exact(ROOT, TAG_BROADCAST, 1)?;
            return Ok(value[0] != 0.0);
        }

        let encoded = if flag { 1.0 } else { 0.0 };
        for dest in (0..self.size).filter(|&r| r != ROOT) {
            self.send(dest, TAG_BROADCAST, vec![encoded])?;
        }
        Ok(flag)
    }

    fn gather_rows(
        &mut self,
        local: &[f64],
        counts: &[usize],
        offsets: &[usize],
        out: Option<&mut [f64]>,
    ) -> Result<(), CommError> {
        if local.len() != counts[self.rank] {
            return Err(CommError::SizeMismatch {
                rank: self.rank,
                peer: self.rank,
                expected: counts[self.rank],
                actual: local.len(),
            });
        }
        if self.rank != ROOT {
            return self.send(ROOT, TAG_GATHER_ROWS, local.to_vec());
        }

        let out = out.ok_or(CommError::SizeMismatch {
            rank: self.rank,
            peer: ROOT,
            expected: counts.iter().sum(),
            actual: 0,
        })?;
        for source in 0..self.size {
            let range = offsets[source]..offsets[source] + counts[source];
            if source == ROOT {
                out[range].copy_from_slice(local);
            } else {
                let rows = self.recv_exact(source, TAG_GATHER_ROWS, counts[source])?;
                out[range].copy_from_slice(&rows);
            }
        }
        Ok(())
    }

    fn abort(&mut self, code: i32) {
        // 最初に中断したランクだけが記録される
        let first = self
            .abort_origin
            .compare_exchange(NO_ABORT, self.rank, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            warn!(rank = self.rank, code, "aborting rank group");
        }
        self.outgoing.iter_mut().for_each(|tx| *tx = None);
        self.incoming.iter_mut().for_each(|rx| *rx = None);
    }
}

impl Drop for ChannelComm {
    fn drop(&mut self) {
        if !self.finalized {
            self.abort(1);
        }
    }
}

/// Runs `f` once per rank, each on its own thread with its own endpoint, and
/// joins them all. Results come back in rank order.
pub fn run_group<T, F>(size: usize, f: F) -> Vec<RelaxResult<T>>
where
    T: Send,
    F: Fn(&mut ChannelComm) -> RelaxResult<T> + Sync,
{
    let comms = ChannelComm::group(size);
    let f = &f;

    thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|mut comm| {
                let rank = comm.rank();
                thread::Builder::new()
                    .name(format!("relax-rank-{}", rank))
                    .spawn_scoped(scope, move || {
                        let result = f(&mut comm);
                        if result.is_ok() {
                            comm.finalize();
                        }
                        debug!(rank, ok = result.is_ok(), "rank finished");
                        result
                    })
                    .map_err(|e| CommError::Init(format!("spawning rank {}: {}", rank, e)))
            })
            .collect();

        handles
            .into_iter()
            .enumerate()
            .map(|(rank, handle)| match handle {
                Ok(handle) => handle
                    .join()
                    .unwrap_or(Err(EngineError::WorkerPanicked { rank })),
                Err(e) => Err(e.into()),
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::implementations::distributed::comm::{TAG_DOWNWARD, TAG_UPWARD};
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    #[test]
    fn send_returns_only_after_the_peer_receives() {
        let receiving = AtomicBool::new(false);
        let results = run_group(2, |comm| {
            if comm.rank() == 0 {
                comm.send_row(1, TAG_UPWARD, &[1.0])?;
                Ok(receiving.load(Ordering::SeqCst))
            } else {
                thread::sleep(Duration::from_millis(50));
                receiving.store(true, Ordering::SeqCst);
                let mut row = [0.0];
                comm.recv_row(0, TAG_UPWARD, &mut row)?;
                Ok(row[0] == 1.0)
            }
        });
        for result in results {
            assert!(result.unwrap());
        }
    }

    #[test]
    fn out_of_order_messages_are_matched_by_tag() {
        let results = run_group(2, |comm| {
            if comm.rank() == 0 {
                comm.send_row(1, TAG_DOWNWARD, &[2.0, 2.0])?;
                comm.send_row(1, TAG_UPWARD, &[1.0, 1.0])?;
                Ok(Vec::new())
            } else {
                let mut up = [0.0; 2];
                let mut down = [0.0; 2];
                comm.recv_row(0, TAG_UPWARD, &mut up)?;
                comm.recv_row(0, TAG_DOWNWARD, &mut down)?;
                Ok(vec![up[0], down[0]])
            }
        });
        let values = results.into_iter().nth(1).unwrap().unwrap();
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[test]
    fn gather_and_broadcast_flags() {
        let results = run_group(3, |comm| {
            let flags = comm.gather_flags(comm.rank() != 1)?;
            let all = flags.map(|f| f.iter().all(|&b| b)).unwrap_or(false);
            Ok(comm.broadcast_flag(all)?)
        });
        for result in results {
            assert!(!result.unwrap());
        }
    }

    #[test]
    fn gather_rows_assembles_in_offset_order() {
        let results = run_group(3, |comm| {
            let rank = comm.rank();
            let local = vec![rank as f64; rank + 1];
            let counts = [1, 2, 3];
            let offsets = [0, 1, 3];
            let mut out = vec![-1.0; 6];
            let target = (rank == ROOT).then_some(&mut out[..]);
            comm.gather_rows(&local, &counts, &offsets, target)?;
            Ok(out)
        });
        let root = results.into_iter().next().unwrap().unwrap();
        assert_eq!(root, vec![0.0, 1.0, 1.0, 2.0, 2.0, 2.0]);
    }

    #[test]
    fn failing_rank_unblocks_its_peers() {
        let results = run_group(3, |comm| {
            if comm.rank() == 2 {
                return Err(CommError::Init("boom".into()).into());
            }
            let mut row = [0.0; 1];
            comm.recv_row(2, TAG_UPWARD, &mut row)?;
            Ok(())
        });
        assert!(matches!(results[2], Err(EngineError::Comm(CommError::Init(_)))));
        for result in &results[..2] {
            assert!(matches!(
                result,
                Err(EngineError::Comm(CommError::Aborted { origin: 2, .. }))
            ));
        }
    }

    #[test]
    fn rejects_self_and_out_of_range_peers() {
        let mut comms = ChannelComm::group(2);
        for comm in comms.iter_mut() {
            comm.finalize();
        }
        assert!(matches!(
            comms[0].send_row(0, TAG_UPWARD, &[0.0]),
            Err(CommError::InvalidRank { rank: 0, .. })
        ));
        assert!(matches!(
            comms[0].send_row(5, TAG_UPWARD, &[0.0]),
            Err(CommError::InvalidRank { rank: 5, .. })
        ));
    }
}
