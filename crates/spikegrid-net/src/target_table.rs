//! Presynaptic routing table
//!
//! For every local neuron, the list of remote endpoints its spikes must
//! reach. Built once after all connections exist by inverting the source
//! table through an all-to-all exchange of routing packets; read on every
//! slice by the spike gather.

use spikegrid_core::ids::Thread;

use crate::packed::{Target, TargetData};

/// Per-thread, per-local-neuron target lists
#[derive(Debug, Clone, Default)]
pub struct TargetTable {
    targets: Vec<Vec<Vec<Target>>>,
    secondary_send_pos: Vec<Vec<Vec<u32>>>,
}

impl TargetTable {
    /// Create a table for the given thread count
    pub fn new(num_threads: usize) -> Self {
        Self {
            targets: vec![Vec::new(); num_threads],
            secondary_send_pos: vec![Vec::new(); num_threads],
        }
    }

    /// Size a thread's lists for its local node count
    pub fn prepare(&mut self, tid: Thread, num_local_nodes: usize) {
        self.targets[tid].resize(num_local_nodes, Vec::new());
        self.secondary_send_pos[tid].resize(num_local_nodes, Vec::new());
    }

    /// File a routing packet under its source neuron
    pub fn add_target(&mut self, tid: Thread, packet: &TargetData) {
        let lid = packet.source_lid as usize;
        if self.targets[tid].len() <= lid {
            self.targets[tid].resize(lid + 1, Vec::new());
            self.secondary_send_pos[tid].resize(lid + 1, Vec::new());
        }
        if packet.primary {
            self.targets[tid][lid].push(packet.target);
        } else {
            self.secondary_send_pos[tid][lid].push(packet.secondary_send_pos);
        }
    }

    /// Primary endpoints of a local neuron
    pub fn targets(&self, tid: Thread, lid: usize) -> &[Target] {
        self.targets[tid]
            .get(lid)
            .map_or(&[], |v| v.as_slice())
    }

    /// Secondary send positions of a local neuron
    pub fn secondary_positions(&self, tid: Thread, lid: usize) -> &[u32] {
        self.secondary_send_pos[tid]
            .get(lid)
            .map_or(&[], |v| v.as_slice())
    }

    /// Total number of primary endpoints on a thread
    pub fn num_targets(&self, tid: Thread) -> usize {
        self.targets[tid].iter().map(Vec::len).sum()
    }

    /// Drop a thread's lists
    pub fn clear(&mut self, tid: Thread) {
        self.targets[tid].clear();
        self.secondary_send_pos[tid].clear();
    }

    /// Whether nothing has been filed yet
    pub fn is_empty(&self) -> bool {
        self.targets.iter().all(|t| t.iter().all(Vec::is_empty))
            && self
                .secondary_send_pos
                .iter()
                .all(|t| t.iter().all(Vec::is_empty))
    }
}
