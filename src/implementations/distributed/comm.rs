use crate::error::CommError;

// 上のランク (rank - 1) へ送る行
pub const TAG_UPWARD: u32 = 0;
// 下のランク (rank + 1) へ送る行
pub const TAG_DOWNWARD: u32 = 1;

/// Rank that evaluates convergence and assembles the result.
pub const ROOT: usize = 0;

/// Point-to-point and collective operations the distributed engine needs.
///
/// Every operation blocks until its matching partner operation on the other
/// ranks has completed. Failures are not retried: the caller aborts the whole
/// group.
pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    fn send_row(&mut self, dest: usize, tag: u32, row: &[f64]) -> Result<(), CommError>;

    fn recv_row(&mut self, source: usize, tag: u32, row: &mut [f64]) -> Result<(), CommError>;

    /// Rank-ordered flags at [`ROOT`], `None` elsewhere.
    fn gather_flags(&mut self, flag: bool) -> Result<Option<Vec<bool>>, CommError>;

    fn broadcast_flag(&mut self, flag: bool) -> Result<bool, CommError>;

    /// Variable-count gather into `out` at [`ROOT`]. Rank `r` contributes
    /// `counts[r]` values that land at `offsets[r]`. `out` is only read on
    /// [`ROOT`].
    fn gather_rows(
        &mut self,
        local: &[f64],
        counts: &[usize],
        offsets: &[usize],
        out: Option<&mut [f64]>,
    ) -> Result<(), CommError>;

    /// Tears the whole group down. Peers blocked in any operation fail.
    fn abort(&mut self, code: i32);
}
