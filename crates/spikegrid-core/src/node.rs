//! The node contract
//!
//! A node is anything with internal state that the scheduler advances:
//! neurons, generators, rate units. Nodes never call back into the kernel;
//! spikes are emitted through a [`SpikeSink`] handle passed into `update`,
//! and ring-buffer bin lookup goes through the [`DeliveryCtx`] the caller
//! provides.

use crate::error::Result;
use crate::event::{RateEvent, SpikeEvent};
use crate::ids::{Gid, Step};
use crate::ring_buffer::Moduli;
use crate::status::StatusDict;
use crate::time::TimeGrid;

/// Per-slice context handed to nodes and connections during delivery and
/// update
#[derive(Debug, Clone, Copy)]
pub struct DeliveryCtx<'a> {
    /// Absolute step at the start of the current slice
    pub origin: Step,
    /// Shared ring-buffer modulo tables
    pub moduli: &'a Moduli,
}

impl<'a> DeliveryCtx<'a> {
    /// Create a context for the given slice origin
    pub fn new(origin: Step, moduli: &'a Moduli) -> Self {
        Self { origin, moduli }
    }

    /// Delivery step relative to the slice origin
    ///
    /// The caller guarantees `origin <= step < origin + min_delay +
    /// max_delay`; anything else is a delay-checker violation upstream.
    pub fn rel_step(&self, step: Step) -> usize {
        debug_assert!(step >= self.origin);
        (step - self.origin) as usize
    }
}

/// A single spike emission recorded during `update`
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    /// Step within the current slice at which the node fired
    pub lag: usize,
    /// Sub-step offset in milliseconds, 0.0 for on-grid models
    pub offset: f64,
    /// Number of coincident spikes
    pub multiplicity: u32,
}

/// Collects the spikes a node emits during one `update` call
#[derive(Debug, Default)]
pub struct SpikeSink {
    emissions: Vec<Emission>,
}

impl SpikeSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an on-grid spike at the given lag
    pub fn emit(&mut self, lag: usize) {
        self.emissions.push(Emission {
            lag,
            offset: 0.0,
            multiplicity: 1,
        });
    }

    /// Record an off-grid spike with a sub-step offset
    pub fn emit_off_grid(&mut self, lag: usize, offset: f64) {
        self.emissions.push(Emission {
            lag,
            offset,
            multiplicity: 1,
        });
    }

    /// Record several coincident spikes at the given lag
    pub fn emit_multiple(&mut self, lag: usize, multiplicity: u32) {
        self.emissions.push(Emission {
            lag,
            offset: 0.0,
            multiplicity,
        });
    }

    /// Take all recorded emissions, leaving the sink empty
    pub fn take(&mut self) -> Vec<Emission> {
        std::mem::take(&mut self.emissions)
    }

    /// Whether anything was emitted
    pub fn is_empty(&self) -> bool {
        self.emissions.is_empty()
    }

    /// Number of recorded emissions
    pub fn len(&self) -> usize {
        self.emissions.len()
    }
}

/// Contract every node model implements
pub trait Node: Send + std::fmt::Debug {
    /// Global id of this node
    fn gid(&self) -> Gid;

    /// Registered model name
    fn model_name(&self) -> &str;

    /// True for normal neurons represented by proxies on non-owning
    /// processes; false for models replicated on every thread
    fn has_proxies(&self) -> bool {
        true
    }

    /// True for models that consume only locally generated events
    fn is_local_receiver(&self) -> bool {
        false
    }

    /// True for models emitting sub-step-precise spike times
    fn is_off_grid(&self) -> bool {
        false
    }

    /// Whether the model accepts primary spike events
    fn accepts_spikes(&self) -> bool {
        true
    }

    /// Whether the model accepts secondary rate events
    fn accepts_rates(&self) -> bool {
        false
    }

    /// Whether the model emits a secondary rate value each slice
    fn sends_secondary(&self) -> bool {
        false
    }

    /// Whether the model provides the given receptor port
    fn handles_receptor(&self, port: u32) -> bool {
        port == 0
    }

    /// Allocate or re-size input buffers; called before the first slice and
    /// whenever the delay extrema change
    fn init_buffers(&mut self, moduli: &Moduli);

    /// Pre-compute state that depends on the time grid; called on every
    /// prepare
    fn calibrate(&mut self, grid: &TimeGrid);

    /// Release resources after the last slice
    fn finalize(&mut self) {}

    /// Advance internal dynamics over `[from, to)` lags of the current
    /// slice, emitting spikes into `out`
    fn update(&mut self, ctx: &DeliveryCtx, from: usize, to: usize, out: &mut SpikeSink);

    /// Accept a spike event
    fn handle_spike(&mut self, ev: &SpikeEvent, ctx: &DeliveryCtx);

    /// Accept a rate event
    fn handle_rate(&mut self, _ev: &RateEvent) {}

    /// Recent spike times of this node, newest last, for pair-based
    /// plasticity rules
    fn spike_history(&self) -> &[Step] {
        &[]
    }

    /// Secondary value transported for this node this slice
    fn secondary_value(&self) -> f64 {
        0.0
    }

    /// Read the node's state as a status dictionary
    fn get_status(&self) -> StatusDict;

    /// Update the node's state from a status dictionary
    fn set_status(&mut self, dict: &StatusDict) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spike_sink() {
        let mut sink = SpikeSink::new();
        assert!(sink.is_empty());

        sink.emit(3);
        sink.emit_off_grid(4, 0.05);
        sink.emit_multiple(4, 2);

        assert_eq!(sink.len(), 3);
        let taken = sink.take();
        assert_eq!(taken[0].lag, 3);
        assert_eq!(taken[1].offset, 0.05);
        assert_eq!(taken[2].multiplicity, 2);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_delivery_ctx_rel_step() {
        let moduli = Moduli::new(5, 10, 100);
        let ctx = DeliveryCtx::new(100, &moduli);
        assert_eq!(ctx.rel_step(100), 0);
        assert_eq!(ctx.rel_step(112), 12);
    }
}
