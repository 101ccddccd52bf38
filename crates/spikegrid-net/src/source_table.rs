//! Build-time source table
//!
//! For every stored connection the table records the source gid, mirroring
//! the shape of the connection store. After the build phase a tail-walking
//! cursor converts the entries into target-routing packets, one per
//! contiguous same-source run; consumed entries are marked processed so
//! repeated rounds never emit duplicates. Once the target tables are
//! complete the table is cleaned to reclaim memory.

use spikegrid_core::ids::{Gid, Lcid, Thread};

/// One source entry, parallel to a stored connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Source {
    /// Gid of the source neuron
    pub gid: Gid,
    /// Primary (spike) vs secondary (rate) connection
    pub primary: bool,
    /// Consumed by the target-table build
    pub processed: bool,
    /// Connection is disabled and must not be routed
    pub disabled: bool,
}

impl Source {
    /// Create an unprocessed entry
    pub fn new(gid: Gid, primary: bool) -> Self {
        Self {
            gid,
            primary,
            processed: false,
            disabled: false,
        }
    }
}

/// Cursor into the table, walking from the tail towards the front
#[derive(Debug, Clone, Copy)]
struct Position {
    tid: isize,
    syn_index: isize,
    lcid: isize,
}

impl Position {
    fn exhausted() -> Self {
        Self {
            tid: -1,
            syn_index: -1,
            lcid: -1,
        }
    }
}

/// A routable connection endpoint produced by the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextTarget {
    /// Source gid of the run
    pub source_gid: Gid,
    /// Rank owning the source
    pub source_rank: usize,
    /// Thread of the connection entry
    pub tid: Thread,
    /// Synapse-type slot of the connection entry
    pub syn_index: usize,
    /// Local connection id of the run head
    pub lcid: Lcid,
    /// Primary vs secondary routing
    pub primary: bool,
}

/// The per-thread source record of every stored connection
#[derive(Debug, Clone, Default)]
pub struct SourceTable {
    sources: Vec<Vec<Vec<Source>>>,
    positions: Vec<Position>,
    cleared: bool,
}

impl SourceTable {
    /// Create a table for the given thread count
    pub fn new(num_threads: usize) -> Self {
        Self {
            sources: vec![Vec::new(); num_threads],
            positions: vec![Position::exhausted(); num_threads],
            cleared: false,
        }
    }

    /// Make sure a thread has at least `n` synapse-type slots
    pub fn ensure_slots(&mut self, tid: Thread, n: usize) {
        if self.sources[tid].len() < n {
            self.sources[tid].resize(n, Vec::new());
        }
    }

    /// Append a source entry, mirroring a connection-store append
    pub fn push(&mut self, tid: Thread, syn_index: usize, source: Source) -> Lcid {
        self.cleared = false;
        let v = &mut self.sources[tid][syn_index];
        v.push(source);
        v.len() - 1
    }

    /// The most recently appended entry of a slot
    pub fn last(&self, tid: Thread, syn_index: usize) -> Option<&Source> {
        self.sources[tid].get(syn_index).and_then(|v| v.last())
    }

    /// Entry lookup
    pub fn get(&self, tid: Thread, syn_index: usize, lcid: Lcid) -> Option<&Source> {
        self.sources[tid].get(syn_index).and_then(|v| v.get(lcid))
    }

    /// All entries of a slot
    pub fn slot(&self, tid: Thread, syn_index: usize) -> &[Source] {
        &self.sources[tid][syn_index]
    }

    /// Mutable entries of a slot, for the sorting pass
    pub fn slot_mut(&mut self, tid: Thread, syn_index: usize) -> &mut Vec<Source> {
        &mut self.sources[tid][syn_index]
    }

    /// Number of slots on a thread
    pub fn num_slots(&self, tid: Thread) -> usize {
        self.sources[tid].len()
    }

    /// Number of entries in a slot
    pub fn len(&self, tid: Thread, syn_index: usize) -> usize {
        self.sources[tid]
            .get(syn_index)
            .map_or(0, |v| v.len())
    }

    /// Mark a connection disabled so the cursor skips it
    pub fn disable(&mut self, tid: Thread, syn_index: usize, lcid: Lcid) {
        self.sources[tid][syn_index][lcid].disabled = true;
    }

    /// Point every worker's cursor at the tail of the whole table
    pub fn reset_positions(&mut self) {
        let tail = self.tail_position();
        for p in &mut self.positions {
            *p = tail;
        }
    }

    fn tail_position(&self) -> Position {
        for tid in (0..self.sources.len()).rev() {
            for syn_index in (0..self.sources[tid].len()).rev() {
                let len = self.sources[tid][syn_index].len();
                if len > 0 {
                    return Position {
                        tid: tid as isize,
                        syn_index: syn_index as isize,
                        lcid: len as isize - 1,
                    };
                }
            }
        }
        Position::exhausted()
    }

    /// Advance a worker's cursor to the next routable endpoint
    ///
    /// Only endpoints whose source rank falls into `[rank_start, rank_end)`
    /// are claimed by this worker. For a contiguous same-source run a single
    /// endpoint is produced, addressing the head of the run; the
    /// has-subsequent flags of the connection store are refreshed through
    /// `set_subsequent` along the way.
    pub fn get_next_target_data<R, S>(
        &mut self,
        worker: Thread,
        rank_start: usize,
        rank_end: usize,
        rank_of: R,
        mut set_subsequent: S,
    ) -> Option<NextTarget>
    where
        R: Fn(Gid) -> usize,
        S: FnMut(Thread, usize, Lcid, bool),
    {
        loop {
            let pos = self.positions[worker];

            if pos.lcid < 0 {
                if !self.retreat(worker) {
                    return None;
                }
                continue;
            }

            let tid = pos.tid as usize;
            let syn_index = pos.syn_index as usize;
            let lcid = pos.lcid as usize;
            let slot_len = self.sources[tid][syn_index].len();
            let current = self.sources[tid][syn_index][lcid];

            if current.processed || current.disabled {
                self.positions[worker].lcid -= 1;
                continue;
            }

            let source_rank = rank_of(current.gid);
            if source_rank < rank_start || source_rank >= rank_end {
                self.positions[worker].lcid -= 1;
                continue;
            }

            self.sources[tid][syn_index][lcid].processed = true;

            let next_same = lcid + 1 < slot_len
                && self.sources[tid][syn_index][lcid + 1].gid == current.gid;
            set_subsequent(tid, syn_index, lcid, next_same);

            // a run produces one endpoint at its head; keep walking while
            // the preceding entry continues the run
            if lcid > 0 {
                let prev = self.sources[tid][syn_index][lcid - 1];
                if prev.gid == current.gid && !prev.processed {
                    self.positions[worker].lcid -= 1;
                    continue;
                }
            }

            self.positions[worker].lcid -= 1;
            return Some(NextTarget {
                source_gid: current.gid,
                source_rank,
                tid,
                syn_index,
                lcid,
                primary: current.primary,
            });
        }
    }

    /// Give back the endpoint a worker claimed last
    ///
    /// Used when the communication buffer has no room left this round: the
    /// run head is unmarked and the cursor restored, so the next round
    /// re-emits the same endpoint.
    pub fn reject_last_target_data(&mut self, worker: Thread, claimed: &NextTarget) {
        self.sources[claimed.tid][claimed.syn_index][claimed.lcid].processed = false;
        let pos = &mut self.positions[worker];
        debug_assert_eq!(pos.tid, claimed.tid as isize);
        debug_assert_eq!(pos.syn_index, claimed.syn_index as isize);
        pos.lcid = claimed.lcid as isize;
    }

    /// Move a worker's cursor to the previous slot or thread
    fn retreat(&mut self, worker: Thread) -> bool {
        let pos = &mut self.positions[worker];
        pos.syn_index -= 1;
        while pos.tid >= 0 {
            while pos.syn_index >= 0 {
                let len = self.sources[pos.tid as usize][pos.syn_index as usize].len();
                if len > 0 {
                    pos.lcid = len as isize - 1;
                    return true;
                }
                pos.syn_index -= 1;
            }
            pos.tid -= 1;
            if pos.tid >= 0 {
                pos.syn_index = self.sources[pos.tid as usize].len() as isize - 1;
            }
        }
        pos.syn_index = -1;
        pos.lcid = -1;
        false
    }

    /// Whether every worker has consumed the whole table
    pub fn all_positions_exhausted(&self) -> bool {
        self.positions.iter().all(|p| p.tid < 0)
    }

    /// Release the entries once the target tables are complete
    ///
    /// Memory is only reclaimed up to the last unconsumed position; with
    /// every worker exhausted that is the whole table.
    pub fn clean(&mut self) {
        if self.all_positions_exhausted() {
            for t in &mut self.sources {
                for v in t.iter_mut() {
                    v.clear();
                    v.shrink_to_fit();
                }
            }
            self.cleared = true;
        }
    }

    /// Whether the table has been cleaned
    pub fn is_cleared(&self) -> bool {
        self.cleared
    }

    /// Visit every live entry of one thread
    pub fn for_each(&self, tid: Thread, mut f: impl FnMut(usize, Lcid, &Source)) {
        for (syn_index, slot) in self.sources[tid].iter().enumerate() {
            for (lcid, source) in slot.iter().enumerate() {
                f(syn_index, lcid, source);
            }
        }
    }
}
