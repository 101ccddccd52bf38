//! The per-thread connection store
//!
//! For each thread, a dense list of synapse-type slots; a connection is
//! identified by the triple `(thread, syn_index, lcid)`. Identity is the
//! index triple, never an address, so slots may grow freely. Each thread's
//! slots are an independent value, handed to that thread exclusively during
//! the parallel update region; the store is the owner of the spike hot
//! path, walking a same-source run behind a single dispatch.

use std::collections::BTreeMap;

use spikegrid_core::error::{CoreError, Result};
use spikegrid_core::event::{RateEvent, SpikeEvent};
use spikegrid_core::ids::{Gid, Lcid, SynId, Thread};
use spikegrid_core::node::{DeliveryCtx, Node};
use spikegrid_core::status::StatusDict;
use spikegrid_core::synapse::{CommonProps, SpikeCount};
use spikegrid_core::time::TimeGrid;

use crate::connector::{AnyConnection, ConnectorVec, SynKind};
use crate::packed::{MAX_LCID, MAX_SYN_INDEX};

/// One thread's synapse-type slots
#[derive(Debug, Clone, Default)]
pub struct ThreadConnections {
    syn_index_of: BTreeMap<SynId, usize>,
    syn_ids: Vec<SynId>,
    slots: Vec<ConnectorVec>,
}

impl ThreadConnections {
    /// Dense slot index of a synapse model
    pub fn syn_index(&self, syn_id: SynId) -> Option<usize> {
        self.syn_index_of.get(&syn_id).copied()
    }

    /// Slot index of a synapse model, creating the slot on first use
    pub fn ensure_slot(&mut self, syn_id: SynId, kind: SynKind) -> Result<usize> {
        if let Some(&syn_index) = self.syn_index_of.get(&syn_id) {
            return Ok(syn_index);
        }
        let syn_index = self.slots.len();
        if syn_index > MAX_SYN_INDEX {
            return Err(CoreError::kernel(
                "too many synapse types in use on one thread",
            ));
        }
        self.syn_index_of.insert(syn_id, syn_index);
        self.syn_ids.push(syn_id);
        self.slots.push(ConnectorVec::new(kind));
        Ok(syn_index)
    }

    /// Append a connection, returning its `(syn_index, lcid)`
    pub fn add(
        &mut self,
        syn_id: SynId,
        kind: SynKind,
        conn: AnyConnection,
    ) -> Result<(usize, Lcid)> {
        let syn_index = self.ensure_slot(syn_id, kind)?;
        let slot = &mut self.slots[syn_index];
        if slot.len() > MAX_LCID {
            return Err(CoreError::kernel(
                "connection vector exceeds the local-connection-id width",
            ));
        }
        let lcid = slot.push(conn)?;
        Ok((syn_index, lcid))
    }

    /// Deliver an event to the run starting at `(syn_index, lcid)`
    ///
    /// Continues through entries flagged has-subsequent-same-source and
    /// stops at the first without the flag.
    pub fn send(
        &mut self,
        syn_index: usize,
        lcid: Lcid,
        ev: &mut SpikeEvent,
        target_nodes: &mut [Box<dyn Node>],
        ctx: &DeliveryCtx,
        cp: &CommonProps,
    ) {
        self.slots[syn_index].send_run(lcid, ev, target_nodes, ctx, cp);
    }

    /// Synapse model stored in a slot
    pub fn get_syn_id(&self, syn_index: usize) -> SynId {
        self.syn_ids.get(syn_index).copied().unwrap_or(SynId::INVALID)
    }

    /// Kind stored in a slot
    pub fn kind_of(&self, syn_index: usize) -> SynKind {
        self.slots[syn_index].kind()
    }

    /// Number of synapse-type slots
    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Number of connections in a slot
    pub fn slot_len(&self, syn_index: usize) -> usize {
        self.slots[syn_index].len()
    }

    /// Total number of connections on this thread
    pub fn num_connections(&self) -> usize {
        self.slots.iter().map(ConnectorVec::len).sum()
    }

    /// Thread-local target id of a connection
    pub fn target_lid(&self, syn_index: usize, lcid: Lcid) -> usize {
        self.slots[syn_index].target_lid(lcid)
    }

    /// Delay of a connection in steps
    pub fn delay_steps(&self, syn_index: usize, lcid: Lcid) -> u32 {
        self.slots[syn_index].delay_steps(lcid)
    }

    /// Weight of a connection
    pub fn weight(&self, syn_index: usize, lcid: Lcid) -> f64 {
        self.slots[syn_index].weight(lcid)
    }

    /// Has-subsequent flag of a connection
    pub fn has_subsequent(&self, syn_index: usize, lcid: Lcid) -> bool {
        self.slots[syn_index].has_subsequent(lcid)
    }

    /// Set the has-subsequent flag of a connection
    pub fn set_has_subsequent(&mut self, syn_index: usize, lcid: Lcid, value: bool) {
        self.slots[syn_index].set_has_subsequent(lcid, value);
    }

    /// Pre-allocate a slot for a build-phase size estimate
    pub fn reserve(&mut self, syn_id: SynId, kind: SynKind, count: usize) -> Result<()> {
        let syn_index = self.ensure_slot(syn_id, kind)?;
        self.slots[syn_index].reserve(count);
        Ok(())
    }

    /// Status of a connection
    pub fn get_status(&self, syn_index: usize, lcid: Lcid) -> StatusDict {
        self.slots[syn_index].get_status(lcid)
    }

    /// Update a connection from a status dictionary
    pub fn set_status(&mut self, syn_index: usize, lcid: Lcid, dict: &StatusDict) -> Result<()> {
        self.slots[syn_index].set_status(lcid, dict)
    }

    /// Neuromodulated weight update across every slot
    pub fn trigger_update_weight(
        &mut self,
        vt_gid: Gid,
        spikes: &[SpikeCount],
        t_trig_ms: f64,
        common: &dyn Fn(SynId) -> CommonProps,
    ) {
        for (syn_index, slot) in self.slots.iter_mut().enumerate() {
            let cp = common(self.syn_ids[syn_index]);
            slot.trigger_update_weight(vt_gid, spikes, t_trig_ms, &cp);
        }
    }

    /// Visit every slot mutably, for the sorting pass
    pub fn for_each_slot_mut(&mut self, mut f: impl FnMut(usize, &mut ConnectorVec)) {
        for (syn_index, slot) in self.slots.iter_mut().enumerate() {
            f(syn_index, slot);
        }
    }

    /// Set the receive-buffer position of a secondary connection
    pub fn set_secondary_recv_pos(&mut self, syn_index: usize, lcid: Lcid, pos: u32) {
        if let Some(conns) = self.slots[syn_index].rate_conns_mut() {
            conns[lcid].recv_pos = pos;
        }
    }

    /// Receive-buffer position of a secondary connection
    pub fn get_secondary_recv_pos(&self, syn_index: usize, lcid: Lcid) -> u32 {
        self.slots[syn_index]
            .rate_conns()
            .map_or(u32::MAX, |c| c[lcid].recv_pos)
    }

    /// Deliver the secondary receive buffer to every rate connection
    pub fn deliver_secondary(&mut self, recv: &[f64], target_nodes: &mut [Box<dyn Node>]) {
        for slot in &mut self.slots {
            let Some(conns) = slot.rate_conns_mut() else {
                continue;
            };
            for conn in conns {
                let pos = conn.recv_pos as usize;
                if pos >= recv.len() {
                    continue;
                }
                let mut ev = RateEvent::new(Gid::INVALID, recv[pos]);
                ev.weight = conn.weight;
                ev.port = conn.port;
                target_nodes[conn.target_lid as usize].handle_rate(&ev);
            }
        }
    }

    /// Whether any slot holds secondary connections
    pub fn has_secondary(&self) -> bool {
        self.slots
            .iter()
            .any(|s| s.kind().is_secondary() && !s.is_empty())
    }
}

/// Per-thread, per-source compact storage of outgoing synapses
#[derive(Debug, Clone, Default)]
pub struct ConnectionStore {
    threads: Vec<ThreadConnections>,
}

impl ConnectionStore {
    /// Create a store for the given thread count
    pub fn new(num_threads: usize) -> Self {
        Self {
            threads: vec![ThreadConnections::default(); num_threads],
        }
    }

    /// Number of threads
    pub fn num_threads(&self) -> usize {
        self.threads.len()
    }

    /// One thread's slots
    pub fn thread(&self, tid: Thread) -> &ThreadConnections {
        &self.threads[tid]
    }

    /// One thread's slots, mutably
    pub fn thread_mut(&mut self, tid: Thread) -> &mut ThreadConnections {
        &mut self.threads[tid]
    }

    /// All threads' slots, for handing to the parallel region
    pub fn threads_mut(&mut self) -> &mut [ThreadConnections] {
        &mut self.threads
    }

    /// Total number of stored connections
    pub fn num_connections(&self) -> usize {
        self.threads.iter().map(ThreadConnections::num_connections).sum()
    }

    /// Number of stored connections of one synapse model
    pub fn num_connections_of(&self, syn_id: SynId) -> usize {
        self.threads
            .iter()
            .map(|t| t.syn_index(syn_id).map_or(0, |si| t.slot_len(si)))
            .sum()
    }

    /// Whether any thread holds secondary connections
    pub fn has_secondary(&self) -> bool {
        self.threads.iter().any(ThreadConnections::has_secondary)
    }

    /// Status of a connection, with the delay reported in milliseconds
    pub fn get_connection_status(
        &self,
        tid: Thread,
        syn_index: usize,
        lcid: Lcid,
        grid: &TimeGrid,
    ) -> StatusDict {
        let mut d = self.threads[tid].get_status(syn_index, lcid);
        if let Some(steps) = d.get_integer("delay_steps") {
            d.insert("delay", grid.steps_to_ms(steps));
        }
        d.clear_access_flags();
        d
    }

    /// Update a connection from a status dictionary
    pub fn set_connection_status(
        &mut self,
        tid: Thread,
        syn_index: usize,
        lcid: Lcid,
        dict: &StatusDict,
    ) -> Result<()> {
        self.threads[tid].set_status(syn_index, lcid, dict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synapses::{RateConnection, StaticSynapse, StdpSynapse};

    #[test]
    fn test_add_assigns_dense_indices() {
        let mut store = ConnectionStore::new(2);
        let a = SynId::new(0);
        let b = SynId::new(1);

        let t = store.thread_mut(0);
        let (si, lcid) = t
            .add(b, SynKind::Static, AnyConnection::Static(StaticSynapse::new(0, 1.0, 10)))
            .unwrap();
        assert_eq!((si, lcid), (0, 0));

        let (si, lcid) = t
            .add(a, SynKind::Stdp, AnyConnection::Stdp(StdpSynapse::new(0, 1.0, 10)))
            .unwrap();
        assert_eq!((si, lcid), (1, 0));

        let (si, lcid) = t
            .add(b, SynKind::Static, AnyConnection::Static(StaticSynapse::new(1, 2.0, 10)))
            .unwrap();
        assert_eq!((si, lcid), (0, 1));

        // the dense index is the registration order on this thread
        assert_eq!(t.get_syn_id(0), b);
        assert_eq!(t.get_syn_id(1), a);
        assert_eq!(t.get_syn_id(2), SynId::INVALID);
        assert_eq!(store.num_connections(), 3);
        assert_eq!(store.num_connections_of(b), 2);
    }

    #[test]
    fn test_threads_are_independent() {
        let mut store = ConnectionStore::new(2);
        let syn = SynId::new(0);
        store
            .thread_mut(1)
            .add(syn, SynKind::Static, AnyConnection::Static(StaticSynapse::new(0, 1.0, 10)))
            .unwrap();
        assert_eq!(store.thread(0).num_slots(), 0);
        assert_eq!(store.thread(1).num_slots(), 1);
        assert_eq!(store.thread(1).slot_len(0), 1);
    }

    #[test]
    fn test_connection_status_reports_ms_delay() {
        let grid = TimeGrid::default();
        let mut store = ConnectionStore::new(1);
        let syn = SynId::new(0);
        store
            .thread_mut(0)
            .add(syn, SynKind::Static, AnyConnection::Static(StaticSynapse::new(0, 1.5, 15)))
            .unwrap();

        let d = store.get_connection_status(0, 0, 0, &grid);
        assert_eq!(d.get_double("delay"), Some(1.5));
        assert_eq!(d.get_double("weight"), Some(1.5));
    }

    #[test]
    fn test_set_connection_status() {
        let mut store = ConnectionStore::new(1);
        let syn = SynId::new(0);
        store
            .thread_mut(0)
            .add(syn, SynKind::Static, AnyConnection::Static(StaticSynapse::new(0, 1.0, 10)))
            .unwrap();

        let mut d = StatusDict::new();
        d.insert("weight", 9.0);
        store.set_connection_status(0, 0, 0, &d).unwrap();
        assert_eq!(store.thread(0).weight(0, 0), 9.0);
    }

    #[test]
    fn test_secondary_recv_pos_and_flag() {
        let mut store = ConnectionStore::new(1);
        let syn = SynId::new(2);
        assert!(!store.has_secondary());
        store
            .thread_mut(0)
            .add(syn, SynKind::Rate, AnyConnection::Rate(RateConnection::new(0, 2.0, 10)))
            .unwrap();
        assert!(store.has_secondary());

        store.thread_mut(0).set_secondary_recv_pos(0, 0, 17);
        assert_eq!(store.thread(0).get_secondary_recv_pos(0, 0), 17);
    }
}
