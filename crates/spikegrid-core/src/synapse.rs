//! The synapse contract
//!
//! A connection transports one event from its (implicit) source to its
//! target node, mutating the event's weight and port on the way and possibly
//! updating its own state. The source gid is stored out-of-band in the
//! source table; a connection only knows the thread-local id of its target.

use crate::error::Result;
use crate::event::SpikeEvent;
use crate::ids::Gid;
use crate::node::{DeliveryCtx, Node};
use crate::status::StatusDict;

/// Capability set of a synapse model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SynCaps {
    /// Transports primary spike events
    pub delivers_primary: bool,
    /// Transports secondary (rate) events
    pub delivers_secondary: bool,
    /// Requires a symmetric counterpart connection
    pub requires_symmetric: bool,
    /// Carries a synaptic delay
    pub has_delay: bool,
}

impl SynCaps {
    /// Capabilities of an ordinary spike-transporting synapse
    pub const fn primary() -> Self {
        Self {
            delivers_primary: true,
            delivers_secondary: false,
            requires_symmetric: false,
            has_delay: true,
        }
    }

    /// Capabilities of a secondary-event connection
    pub const fn secondary() -> Self {
        Self {
            delivers_primary: false,
            delivers_secondary: true,
            requires_symmetric: false,
            has_delay: true,
        }
    }
}

/// Properties shared by all connections of one synapse model
#[derive(Debug, Clone)]
pub struct CommonProps {
    /// Volume transmitter gid for neuromodulated plasticity variants
    pub vt_gid: Gid,
    /// Step size in milliseconds, refreshed by the kernel on prepare
    pub resolution_ms: f64,
}

impl Default for CommonProps {
    fn default() -> Self {
        Self {
            vt_gid: Gid::INVALID,
            resolution_ms: 0.1,
        }
    }
}

/// A dated spike count, as produced by a volume transmitter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpikeCount {
    /// Spike time in milliseconds
    pub spike_time_ms: f64,
    /// Accumulated multiplicity at that time
    pub multiplicity: f64,
}

/// Contract every synapse model implements
pub trait Connection: Send {
    /// Thread-local id of the target node
    fn target_lid(&self) -> usize;

    /// Synaptic delay in steps
    fn delay_steps(&self) -> u32;

    /// Set the synaptic delay in steps
    fn set_delay_steps(&mut self, delay: u32);

    /// Synaptic weight
    fn weight(&self) -> f64;

    /// Set the synaptic weight
    fn set_weight(&mut self, weight: f64);

    /// Deliver `ev` to `target`, mutating the event's weight, delay and port
    fn send(
        &mut self,
        ev: &mut SpikeEvent,
        target: &mut dyn Node,
        ctx: &DeliveryCtx,
        cp: &CommonProps,
    );

    /// Neuromodulated weight update, filtered by volume-transmitter gid
    fn trigger_update_weight(
        &mut self,
        _vt_gid: Gid,
        _spikes: &[SpikeCount],
        _t_trig_ms: f64,
        _cp: &CommonProps,
    ) {
    }

    /// Read the connection's state as a status dictionary
    fn get_status(&self) -> StatusDict;

    /// Update the connection's state from a status dictionary
    fn set_status(&mut self, dict: &StatusDict) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps() {
        let caps = SynCaps::primary();
        assert!(caps.delivers_primary);
        assert!(!caps.delivers_secondary);
        assert!(caps.has_delay);

        let caps = SynCaps::secondary();
        assert!(caps.delivers_secondary);
    }

    #[test]
    fn test_common_props_default() {
        let cp = CommonProps::default();
        assert!(!cp.vt_gid.is_valid());
    }
}
