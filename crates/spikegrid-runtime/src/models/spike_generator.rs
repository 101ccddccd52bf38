//! Scripted spike source
//!
//! Emits spikes at configured times. The generator is a fully routed node,
//! so its spikes travel the same presynaptic path as neuron spikes.

use spikegrid_core::error::{CoreError, Result};
use spikegrid_core::event::SpikeEvent;
use spikegrid_core::ids::{Gid, Step};
use spikegrid_core::node::{DeliveryCtx, Node, SpikeSink};
use spikegrid_core::ring_buffer::Moduli;
use spikegrid_core::status::StatusDict;
use spikegrid_core::time::TimeGrid;

/// Spike source with a fixed schedule
#[derive(Debug, Clone)]
pub struct SpikeGenerator {
    gid: Gid,
    spike_times: Vec<f64>,
    spike_steps: Vec<Step>,
}

impl SpikeGenerator {
    /// Create a generator with an empty schedule
    pub fn new(gid: Gid) -> Self {
        Self {
            gid,
            spike_times: Vec::new(),
            spike_steps: Vec::new(),
        }
    }
}

impl Node for SpikeGenerator {
    fn gid(&self) -> Gid {
        self.gid
    }

    fn model_name(&self) -> &str {
        "spike_generator"
    }

    fn accepts_spikes(&self) -> bool {
        false
    }

    fn init_buffers(&mut self, _moduli: &Moduli) {}

    fn calibrate(&mut self, grid: &TimeGrid) {
        self.spike_steps = self.spike_times.iter().map(|&t| grid.ms_to_steps(t)).collect();
        self.spike_steps.sort_unstable();
    }

    fn update(&mut self, ctx: &DeliveryCtx, from: usize, to: usize, out: &mut SpikeSink) {
        for lag in from..to {
            let step = ctx.origin + lag as Step;
            let first = self.spike_steps.partition_point(|&s| s < step);
            let count = self.spike_steps[first..]
                .iter()
                .take_while(|&&s| s == step)
                .count();
            if count == 1 {
                out.emit(lag);
            } else if count > 1 {
                out.emit_multiple(lag, count as u32);
            }
        }
    }

    fn handle_spike(&mut self, _ev: &SpikeEvent, _ctx: &DeliveryCtx) {}

    fn get_status(&self) -> StatusDict {
        let mut d = StatusDict::new();
        d.insert("model", "spike_generator");
        d.insert("spike_times", self.spike_times.clone());
        d
    }

    fn set_status(&mut self, dict: &StatusDict) -> Result<()> {
        if let Some(times) = dict.get_double_list("spike_times") {
            for &t in &times {
                if t < 0.0 || !t.is_finite() {
                    return Err(CoreError::bad_property(
                        "spike_times",
                        t.to_string(),
                        ">= 0.0",
                    ));
                }
            }
            self.spike_times = times;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emits_at_scheduled_steps() {
        let grid = TimeGrid::default();
        let moduli = Moduli::new(10, 10, 0);
        let mut g = SpikeGenerator::new(Gid::new(1));
        let mut d = StatusDict::new();
        d.insert("spike_times", vec![0.5, 1.2]);
        g.set_status(&d).unwrap();
        g.calibrate(&grid);

        let mut sink = SpikeSink::new();
        let ctx = DeliveryCtx::new(0, &moduli);
        g.update(&ctx, 0, 10, &mut sink);
        let emissions = sink.take();
        assert_eq!(emissions.len(), 1);
        assert_eq!(emissions[0].lag, 5);

        let ctx = DeliveryCtx::new(10, &moduli);
        g.update(&ctx, 0, 10, &mut sink);
        let emissions = sink.take();
        assert_eq!(emissions.len(), 1);
        assert_eq!(emissions[0].lag, 2);
    }

    #[test]
    fn test_coincident_times_fold_into_multiplicity() {
        let grid = TimeGrid::default();
        let moduli = Moduli::new(10, 10, 0);
        let mut g = SpikeGenerator::new(Gid::new(1));
        let mut d = StatusDict::new();
        d.insert("spike_times", vec![0.3, 0.3]);
        g.set_status(&d).unwrap();
        g.calibrate(&grid);

        let mut sink = SpikeSink::new();
        let ctx = DeliveryCtx::new(0, &moduli);
        g.update(&ctx, 0, 10, &mut sink);
        let emissions = sink.take();
        assert_eq!(emissions.len(), 1);
        assert_eq!(emissions[0].multiplicity, 2);
    }

    #[test]
    fn test_negative_time_rejected() {
        let mut g = SpikeGenerator::new(Gid::new(1));
        let mut d = StatusDict::new();
        d.insert("spike_times", vec![-1.0]);
        assert!(g.set_status(&d).is_err());
    }
}
