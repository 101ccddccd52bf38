//! Leaky integrate-and-fire neuron with delta synapses
//!
//! The membrane potential follows the exact exponential propagator between
//! steps; incoming weights are added directly to the potential at their
//! delivery step. Spike times of this node are kept for pair-based
//! plasticity rules on its incoming synapses.

use spikegrid_core::error::{CoreError, Result};
use spikegrid_core::event::SpikeEvent;
use spikegrid_core::ids::{Gid, Step};
use spikegrid_core::node::{DeliveryCtx, Node, SpikeSink};
use spikegrid_core::ring_buffer::{Moduli, RingBuffer};
use spikegrid_core::status::StatusDict;
use spikegrid_core::time::TimeGrid;

const MAX_HISTORY: usize = 64;

/// Leaky integrate-and-fire neuron
#[derive(Debug, Clone)]
pub struct IafNeuron {
    gid: Gid,

    // parameters
    tau_m: f64,
    c_m: f64,
    t_ref: f64,
    e_l: f64,
    v_th: f64,
    v_reset: f64,
    i_e: f64,

    // state
    v_m: f64,
    refract_left: Step,

    // calibrated constants
    propagator: f64,
    v_stationary: f64,
    refract_steps: Step,

    input: RingBuffer,
    history: Vec<Step>,
}

impl IafNeuron {
    /// Create a neuron with default parameters
    pub fn new(gid: Gid) -> Self {
        Self {
            gid,
            tau_m: 10.0,
            c_m: 250.0,
            t_ref: 2.0,
            e_l: -70.0,
            v_th: -55.0,
            v_reset: -70.0,
            i_e: 0.0,
            v_m: -70.0,
            refract_left: 0,
            propagator: 0.0,
            v_stationary: -70.0,
            refract_steps: 0,
            input: RingBuffer::new(),
            history: Vec::new(),
        }
    }

    fn record_spike(&mut self, step: Step) {
        if self.history.len() >= MAX_HISTORY {
            self.history.drain(..MAX_HISTORY / 2);
        }
        self.history.push(step);
    }
}

impl Node for IafNeuron {
    fn gid(&self) -> Gid {
        self.gid
    }

    fn model_name(&self) -> &str {
        "iaf_neuron"
    }

    fn init_buffers(&mut self, moduli: &Moduli) {
        self.input.resize(moduli);
    }

    fn calibrate(&mut self, grid: &TimeGrid) {
        let h = grid.resolution_ms();
        self.propagator = (-h / self.tau_m).exp();
        self.v_stationary = self.e_l + self.i_e * self.tau_m / self.c_m;
        self.refract_steps = grid.ms_to_steps(self.t_ref);
    }

    fn update(&mut self, ctx: &DeliveryCtx, from: usize, to: usize, out: &mut SpikeSink) {
        for lag in from..to {
            let input = self.input.get_value(ctx.moduli, lag);
            if self.refract_left > 0 {
                self.refract_left -= 1;
                continue;
            }
            self.v_m = self.v_stationary + (self.v_m - self.v_stationary) * self.propagator;
            self.v_m += input;
            if self.v_m >= self.v_th {
                self.v_m = self.v_reset;
                self.refract_left = self.refract_steps;
                self.record_spike(ctx.origin + lag as Step);
                out.emit(lag);
            }
        }
    }

    fn handle_spike(&mut self, ev: &SpikeEvent, ctx: &DeliveryCtx) {
        let rel = ctx.rel_step(ev.delivery_step());
        self.input
            .add_value(ctx.moduli, rel, ev.weight * ev.multiplicity as f64);
    }

    fn spike_history(&self) -> &[Step] {
        &self.history
    }

    fn get_status(&self) -> StatusDict {
        let mut d = StatusDict::new();
        d.insert("model", "iaf_neuron");
        d.insert("V_m", self.v_m);
        d.insert("E_L", self.e_l);
        d.insert("V_th", self.v_th);
        d.insert("V_reset", self.v_reset);
        d.insert("tau_m", self.tau_m);
        d.insert("C_m", self.c_m);
        d.insert("t_ref", self.t_ref);
        d.insert("I_e", self.i_e);
        d
    }

    fn set_status(&mut self, dict: &StatusDict) -> Result<()> {
        if let Some(v) = dict.get_double("tau_m") {
            if v <= 0.0 {
                return Err(CoreError::bad_property("tau_m", v.to_string(), "> 0.0"));
            }
            self.tau_m = v;
        }
        if let Some(v) = dict.get_double("C_m") {
            if v <= 0.0 {
                return Err(CoreError::bad_property("C_m", v.to_string(), "> 0.0"));
            }
            self.c_m = v;
        }
        if let Some(v) = dict.get_double("t_ref") {
            if v < 0.0 {
                return Err(CoreError::bad_property("t_ref", v.to_string(), ">= 0.0"));
            }
            self.t_ref = v;
        }
        if let Some(v) = dict.get_double("E_L") {
            self.e_l = v;
        }
        if let Some(v) = dict.get_double("V_reset") {
            self.v_reset = v;
        }
        if let Some(v) = dict.get_double("V_th") {
            self.v_th = v;
        }
        if self.v_th <= self.v_reset {
            return Err(CoreError::bad_property(
                "V_th",
                self.v_th.to_string(),
                "> V_reset",
            ));
        }
        if let Some(v) = dict.get_double("V_m") {
            self.v_m = v;
        }
        if let Some(v) = dict.get_double("I_e") {
            self.i_e = v;
        }
        Ok(())
    }
}
