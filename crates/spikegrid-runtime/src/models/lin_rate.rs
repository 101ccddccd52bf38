//! Linear rate unit
//!
//! A node whose state is a continuous rate rather than a membrane
//! potential. Rates travel as secondary events through the fixed-chunk
//! buffer path: once per slice the unit publishes its rate, and incoming
//! weighted rates are held constant over the following slice.

use spikegrid_core::error::{CoreError, Result};
use spikegrid_core::event::{RateEvent, SpikeEvent};
use spikegrid_core::ids::Gid;
use spikegrid_core::node::{DeliveryCtx, Node, SpikeSink};
use spikegrid_core::ring_buffer::Moduli;
use spikegrid_core::status::StatusDict;
use spikegrid_core::time::TimeGrid;

/// Linear rate model
#[derive(Debug, Clone)]
pub struct LinRateNeuron {
    gid: Gid,

    // parameters
    tau: f64,
    mu: f64,

    // state
    rate: f64,
    input_acc: f64,
    input_held: f64,

    h: f64,
}

impl LinRateNeuron {
    /// Create a rate unit with default parameters
    pub fn new(gid: Gid) -> Self {
        Self {
            gid,
            tau: 10.0,
            mu: 0.0,
            rate: 0.0,
            input_acc: 0.0,
            input_held: 0.0,
            h: 0.1,
        }
    }
}

impl Node for LinRateNeuron {
    fn gid(&self) -> Gid {
        self.gid
    }

    fn model_name(&self) -> &str {
        "lin_rate"
    }

    fn accepts_spikes(&self) -> bool {
        false
    }

    fn accepts_rates(&self) -> bool {
        true
    }

    fn sends_secondary(&self) -> bool {
        true
    }

    fn init_buffers(&mut self, _moduli: &Moduli) {
        self.input_acc = 0.0;
        self.input_held = 0.0;
    }

    fn calibrate(&mut self, grid: &TimeGrid) {
        self.h = grid.resolution_ms();
    }

    fn update(&mut self, _ctx: &DeliveryCtx, from: usize, to: usize, _out: &mut SpikeSink) {
        if from == 0 {
            self.input_held = self.input_acc;
            self.input_acc = 0.0;
        }
        for _ in from..to {
            self.rate += self.h / self.tau * (self.mu - self.rate + self.input_held);
        }
    }

    fn handle_spike(&mut self, _ev: &SpikeEvent, _ctx: &DeliveryCtx) {}

    fn handle_rate(&mut self, ev: &RateEvent) {
        self.input_acc += ev.weighted_rate();
    }

    fn secondary_value(&self) -> f64 {
        self.rate
    }

    fn get_status(&self) -> StatusDict {
        let mut d = StatusDict::new();
        d.insert("model", "lin_rate");
        d.insert("rate", self.rate);
        d.insert("tau", self.tau);
        d.insert("mu", self.mu);
        d
    }

    fn set_status(&mut self, dict: &StatusDict) -> Result<()> {
        if let Some(v) = dict.get_double("tau") {
            if v <= 0.0 {
                return Err(CoreError::bad_property("tau", v.to_string(), "> 0.0"));
            }
            self.tau = v;
        }
        if let Some(v) = dict.get_double("mu") {
            self.mu = v;
        }
        if let Some(v) = dict.get_double("rate") {
            self.rate = v;
        }
        Ok(())
    }
}
