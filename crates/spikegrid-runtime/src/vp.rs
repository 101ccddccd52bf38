//! Virtual-process layout
//!
//! `V = ranks × threads` virtual processes; nodes are assigned round-robin
//! by `vp = gid mod V`, and a two-level mapping takes a VP to its owning
//! `(rank, thread)`.

use spikegrid_core::error::{CoreError, Result};
use spikegrid_core::ids::{Gid, Thread};

/// The process/thread layout of the running kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VpManager {
    rank: usize,
    num_ranks: usize,
    num_threads: usize,
}

impl VpManager {
    /// Create a layout
    pub fn new(rank: usize, num_ranks: usize, num_threads: usize) -> Self {
        debug_assert!(num_ranks >= 1);
        debug_assert!(num_threads >= 1);
        debug_assert!(rank < num_ranks);
        Self {
            rank,
            num_ranks,
            num_threads,
        }
    }

    /// This process's rank
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of distributed processes
    pub fn num_ranks(&self) -> usize {
        self.num_ranks
    }

    /// Number of threads on this process
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Total number of virtual processes
    pub fn num_vps(&self) -> usize {
        self.num_ranks * self.num_threads
    }

    /// Change the thread count; the caller guards against live networks
    pub fn set_num_threads(&mut self, num_threads: usize) -> Result<()> {
        if num_threads == 0 {
            return Err(CoreError::bad_property(
                "local_num_threads",
                num_threads.to_string(),
                "> 0",
            ));
        }
        self.num_threads = num_threads;
        Ok(())
    }

    /// Virtual process of a gid
    pub fn vp_of(&self, gid: Gid) -> usize {
        gid.raw() as usize % self.num_vps()
    }

    /// Rank owning a virtual process
    pub fn rank_of_vp(&self, vp: usize) -> usize {
        vp % self.num_ranks
    }

    /// Thread owning a virtual process on its rank
    pub fn thread_of_vp(&self, vp: usize) -> Thread {
        vp / self.num_ranks
    }

    /// Whether a virtual process lives on this rank
    pub fn is_local_vp(&self, vp: usize) -> bool {
        self.rank_of_vp(vp) == self.rank
    }

    /// Rank owning a gid
    pub fn rank_of_gid(&self, gid: Gid) -> usize {
        self.rank_of_vp(self.vp_of(gid))
    }

    /// Thread owning a gid on its rank
    pub fn thread_of_gid(&self, gid: Gid) -> Thread {
        self.thread_of_vp(self.vp_of(gid))
    }

    /// Whether a gid's state lives on this rank
    pub fn is_local_gid(&self, gid: Gid) -> bool {
        self.is_local_vp(self.vp_of(gid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_robin_assignment() {
        let vp = VpManager::new(0, 2, 1);
        assert_eq!(vp.num_vps(), 2);
        // gid 1 -> vp 1 -> rank 1; gid 2 -> vp 0 -> rank 0
        assert_eq!(vp.vp_of(Gid::new(1)), 1);
        assert_eq!(vp.vp_of(Gid::new(2)), 0);
        assert_eq!(vp.rank_of_gid(Gid::new(1)), 1);
        assert_eq!(vp.rank_of_gid(Gid::new(2)), 0);
        assert!(vp.is_local_gid(Gid::new(2)));
        assert!(!vp.is_local_gid(Gid::new(1)));
    }

    #[test]
    fn test_two_threads_single_rank() {
        let vp = VpManager::new(0, 1, 2);
        assert_eq!(vp.num_vps(), 2);
        assert_eq!(vp.thread_of_gid(Gid::new(1)), 1);
        assert_eq!(vp.thread_of_gid(Gid::new(2)), 0);
        assert!(vp.is_local_gid(Gid::new(1)));
        assert!(vp.is_local_gid(Gid::new(2)));
    }

    #[test]
    fn test_hybrid_layout() {
        // 2 ranks x 2 threads = 4 vps
        let vp = VpManager::new(1, 2, 2);
        assert_eq!(vp.num_vps(), 4);
        let gid = Gid::new(7); // vp 3 -> rank 1, thread 1
        assert_eq!(vp.vp_of(gid), 3);
        assert_eq!(vp.rank_of_gid(gid), 1);
        assert_eq!(vp.thread_of_gid(gid), 1);
        assert!(vp.is_local_gid(gid));
    }
}
