//! Homogeneous connection vectors
//!
//! Connections of one synapse type on one thread live in a dense typed
//! vector. Heterogeneity across types is a vector of such slots, so the
//! spike hot path dispatches once per run and the inner loop is
//! monomorphic. Each entry carries a *has-subsequent-same-source* flag;
//! a send starting at some lcid walks the run until the flag goes false.

use spikegrid_core::error::{CoreError, Result};
use spikegrid_core::event::SpikeEvent;
use spikegrid_core::ids::{Gid, Lcid};
use spikegrid_core::node::{DeliveryCtx, Node};
use spikegrid_core::status::StatusDict;
use spikegrid_core::synapse::{CommonProps, Connection, SpikeCount};

use crate::synapses::{RateConnection, StaticSynapse, StdpSynapse};

/// The closed set of synapse implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynKind {
    /// Fixed weight and delay
    Static,
    /// Pair-based STDP
    Stdp,
    /// Secondary rate connection
    Rate,
}

impl SynKind {
    /// Whether connections of this kind deliver secondary events
    pub fn is_secondary(&self) -> bool {
        matches!(self, Self::Rate)
    }
}

/// A connection instance about to be stored
#[derive(Debug, Clone)]
pub enum AnyConnection {
    /// Static synapse
    Static(StaticSynapse),
    /// STDP synapse
    Stdp(StdpSynapse),
    /// Rate connection
    Rate(RateConnection),
}

/// Dense vector of connections of one type
#[derive(Debug, Clone, Default)]
pub struct Connector<C> {
    conns: Vec<C>,
    subsequent: Vec<bool>,
}

impl<C: Connection + Clone> Connector<C> {
    /// Create an empty connector
    pub fn new() -> Self {
        Self {
            conns: Vec::new(),
            subsequent: Vec::new(),
        }
    }

    /// Number of stored connections
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    /// Whether the connector is empty
    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    /// Pre-allocate for a build-phase size estimate
    pub fn reserve(&mut self, additional: usize) {
        self.conns.reserve(additional);
        self.subsequent.reserve(additional);
    }

    /// Append a connection; the flag of the new entry starts false
    pub fn push(&mut self, conn: C) -> Lcid {
        self.conns.push(conn);
        self.subsequent.push(false);
        self.conns.len() - 1
    }

    /// Deliver an event to the run starting at `start`
    ///
    /// The walk continues while the has-subsequent flag holds, stopping at
    /// the first entry where it is false. This is the spike hot path.
    pub fn send_run(
        &mut self,
        start: Lcid,
        ev: &mut SpikeEvent,
        target_nodes: &mut [Box<dyn Node>],
        ctx: &DeliveryCtx,
        cp: &CommonProps,
    ) {
        let mut lcid = start;
        loop {
            let conn = &mut self.conns[lcid];
            conn.send(ev, &mut *target_nodes[conn.target_lid()], ctx, cp);
            if !self.subsequent[lcid] {
                break;
            }
            lcid += 1;
        }
    }

    /// Neuromodulated weight update for every stored connection
    pub fn trigger_update_weight(
        &mut self,
        vt_gid: Gid,
        spikes: &[SpikeCount],
        t_trig_ms: f64,
        cp: &CommonProps,
    ) {
        if cp.vt_gid != vt_gid {
            return;
        }
        for conn in &mut self.conns {
            conn.trigger_update_weight(vt_gid, spikes, t_trig_ms, cp);
        }
    }

    /// Thread-local target id at an lcid
    pub fn target_lid(&self, lcid: Lcid) -> usize {
        self.conns[lcid].target_lid()
    }

    /// Has-subsequent flag at an lcid
    pub fn has_subsequent(&self, lcid: Lcid) -> bool {
        self.subsequent[lcid]
    }

    /// Set the has-subsequent flag at an lcid
    pub fn set_has_subsequent(&mut self, lcid: Lcid, value: bool) {
        self.subsequent[lcid] = value;
    }

    /// Re-order both the connections and their flags
    pub fn permute(&mut self, perm: &[usize]) {
        debug_assert_eq!(perm.len(), self.conns.len());
        self.conns = perm.iter().map(|&i| self.conns[i].clone()).collect();
        self.subsequent = perm.iter().map(|&i| self.subsequent[i]).collect();
    }

    /// Immutable access to the stored connections
    pub fn conns(&self) -> &[C] {
        &self.conns
    }

    /// Mutable access to the stored connections
    pub fn conns_mut(&mut self) -> &mut [C] {
        &mut self.conns
    }
}

/// One synapse-type slot of a thread's connection table
#[derive(Debug, Clone)]
pub enum ConnectorVec {
    /// Static synapses
    Static(Connector<StaticSynapse>),
    /// STDP synapses
    Stdp(Connector<StdpSynapse>),
    /// Rate connections
    Rate(Connector<RateConnection>),
}

impl ConnectorVec {
    /// Create an empty slot of the given kind
    pub fn new(kind: SynKind) -> Self {
        match kind {
            SynKind::Static => Self::Static(Connector::new()),
            SynKind::Stdp => Self::Stdp(Connector::new()),
            SynKind::Rate => Self::Rate(Connector::new()),
        }
    }

    /// Kind of the stored connections
    pub fn kind(&self) -> SynKind {
        match self {
            Self::Static(_) => SynKind::Static,
            Self::Stdp(_) => SynKind::Stdp,
            Self::Rate(_) => SynKind::Rate,
        }
    }

    /// Number of stored connections
    pub fn len(&self) -> usize {
        match self {
            Self::Static(c) => c.len(),
            Self::Stdp(c) => c.len(),
            Self::Rate(c) => c.len(),
        }
    }

    /// Whether the slot is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pre-allocate for a build-phase size estimate
    pub fn reserve(&mut self, additional: usize) {
        match self {
            Self::Static(c) => c.reserve(additional),
            Self::Stdp(c) => c.reserve(additional),
            Self::Rate(c) => c.reserve(additional),
        }
    }

    /// Append a connection of the matching kind
    pub fn push(&mut self, conn: AnyConnection) -> Result<Lcid> {
        match (self, conn) {
            (Self::Static(c), AnyConnection::Static(conn)) => Ok(c.push(conn)),
            (Self::Stdp(c), AnyConnection::Stdp(conn)) => Ok(c.push(conn)),
            (Self::Rate(c), AnyConnection::Rate(conn)) => Ok(c.push(conn)),
            _ => Err(CoreError::kernel(
                "connection kind does not match its synapse-type slot",
            )),
        }
    }

    /// Deliver an event to the run starting at `start`
    pub fn send_run(
        &mut self,
        start: Lcid,
        ev: &mut SpikeEvent,
        target_nodes: &mut [Box<dyn Node>],
        ctx: &DeliveryCtx,
        cp: &CommonProps,
    ) {
        match self {
            Self::Static(c) => c.send_run(start, ev, target_nodes, ctx, cp),
            Self::Stdp(c) => c.send_run(start, ev, target_nodes, ctx, cp),
            Self::Rate(c) => c.send_run(start, ev, target_nodes, ctx, cp),
        }
    }

    /// Neuromodulated weight update across the slot
    pub fn trigger_update_weight(
        &mut self,
        vt_gid: Gid,
        spikes: &[SpikeCount],
        t_trig_ms: f64,
        cp: &CommonProps,
    ) {
        match self {
            Self::Static(c) => c.trigger_update_weight(vt_gid, spikes, t_trig_ms, cp),
            Self::Stdp(c) => c.trigger_update_weight(vt_gid, spikes, t_trig_ms, cp),
            Self::Rate(c) => c.trigger_update_weight(vt_gid, spikes, t_trig_ms, cp),
        }
    }

    /// Thread-local target id at an lcid
    pub fn target_lid(&self, lcid: Lcid) -> usize {
        match self {
            Self::Static(c) => c.target_lid(lcid),
            Self::Stdp(c) => c.target_lid(lcid),
            Self::Rate(c) => c.target_lid(lcid),
        }
    }

    /// Has-subsequent flag at an lcid
    pub fn has_subsequent(&self, lcid: Lcid) -> bool {
        match self {
            Self::Static(c) => c.has_subsequent(lcid),
            Self::Stdp(c) => c.has_subsequent(lcid),
            Self::Rate(c) => c.has_subsequent(lcid),
        }
    }

    /// Set the has-subsequent flag at an lcid
    pub fn set_has_subsequent(&mut self, lcid: Lcid, value: bool) {
        match self {
            Self::Static(c) => c.set_has_subsequent(lcid, value),
            Self::Stdp(c) => c.set_has_subsequent(lcid, value),
            Self::Rate(c) => c.set_has_subsequent(lcid, value),
        }
    }

    /// Status of the connection at an lcid
    pub fn get_status(&self, lcid: Lcid) -> StatusDict {
        match self {
            Self::Static(c) => c.conns()[lcid].get_status(),
            Self::Stdp(c) => c.conns()[lcid].get_status(),
            Self::Rate(c) => c.conns()[lcid].get_status(),
        }
    }

    /// Update the connection at an lcid from a status dictionary
    pub fn set_status(&mut self, lcid: Lcid, dict: &StatusDict) -> Result<()> {
        match self {
            Self::Static(c) => c.conns_mut()[lcid].set_status(dict),
            Self::Stdp(c) => c.conns_mut()[lcid].set_status(dict),
            Self::Rate(c) => c.conns_mut()[lcid].set_status(dict),
        }
    }

    /// Delay in steps at an lcid
    pub fn delay_steps(&self, lcid: Lcid) -> u32 {
        match self {
            Self::Static(c) => c.conns()[lcid].delay_steps(),
            Self::Stdp(c) => c.conns()[lcid].delay_steps(),
            Self::Rate(c) => c.conns()[lcid].delay_steps(),
        }
    }

    /// Weight at an lcid
    pub fn weight(&self, lcid: Lcid) -> f64 {
        match self {
            Self::Static(c) => c.conns()[lcid].weight(),
            Self::Stdp(c) => c.conns()[lcid].weight(),
            Self::Rate(c) => c.conns()[lcid].weight(),
        }
    }

    /// Re-order the slot, `perm[new] = old`
    pub fn permute(&mut self, perm: &[usize]) {
        match self {
            Self::Static(c) => c.permute(perm),
            Self::Stdp(c) => c.permute(perm),
            Self::Rate(c) => c.permute(perm),
        }
    }

    /// Mutable access to the rate connections of a secondary slot
    pub fn rate_conns_mut(&mut self) -> Option<&mut [RateConnection]> {
        match self {
            Self::Rate(c) => Some(c.conns_mut()),
            _ => None,
        }
    }

    /// Immutable access to the rate connections of a secondary slot
    pub fn rate_conns(&self) -> Option<&[RateConnection]> {
        match self {
            Self::Rate(c) => Some(c.conns()),
            _ => None,
        }
    }
}
