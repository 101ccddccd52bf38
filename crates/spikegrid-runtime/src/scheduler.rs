//! The time-slice scheduler
//!
//! Simulation time advances in slices of `min_delay` steps. Worker threads
//! live for the whole run, synchronized at two barriers per sub-slice: each
//! thread delivers the received spikes at a slice's first sub-slice and
//! updates its unfrozen nodes; between the barriers the master exchanges
//! the emitted spikes and advances the clock. Errors raised inside the
//! parallel region are captured per thread and rethrown on the master;
//! cancellation is cooperative and stops at the next slice boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

use parking_lot::{Mutex, RwLock};

use spikegrid_core::error::{CoreError, Result};
use spikegrid_core::ids::Step;
use spikegrid_core::node::{DeliveryCtx, SpikeSink};
use spikegrid_core::synapse::CommonProps;
use spikegrid_net::target_table::TargetTable;

use crate::connection_manager::ConnectionManager;
use crate::delivery::{
    deliver_events, gather_events, EmittedSpike, EventDelivery, RecordedSpike,
};
use crate::node_manager::{NodeManager, ThreadNodes};
use crate::transport::Transport;
use crate::vp::VpManager;

/// Lifecycle of the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Created, nothing prepared
    Fresh,
    /// Buffers sized, nodes calibrated
    Prepared,
    /// Inside the update loop
    Running,
    /// A run has completed; a further `simulate` re-prepares
    Finalized,
}

/// Scheduler state that survives across `simulate` calls
#[derive(Debug)]
pub struct SimState {
    /// Lifecycle phase
    pub phase: Phase,
    /// Absolute step at the current slice origin
    pub clock: Step,
    /// First unprocessed sub-slice step within the slice
    pub from_step: usize,
    /// Steps still to simulate
    pub to_do: Step,
    /// Slice length in steps
    pub min_delay: usize,
    /// Largest admitted delay in steps
    pub max_delay: usize,
    /// Whether `simulate` has completed at least once
    pub simulated: bool,
    /// Whether node buffers are sized for the current extrema
    pub buffers_initialized: bool,
    /// Cooperative cancellation flag
    pub terminate: Arc<AtomicBool>,
}

impl Default for SimState {
    fn default() -> Self {
        Self {
            phase: Phase::Fresh,
            clock: 0,
            from_step: 0,
            to_do: 0,
            min_delay: 1,
            max_delay: 1,
            simulated: false,
            buffers_initialized: false,
            terminate: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// Outcome of one `simulate` call
#[derive(Debug, Clone, Default)]
pub struct SimulationResult {
    /// Spikes recorded on this rank, per VP in emission order
    pub spikes: Vec<RecordedSpike>,
    /// Steps actually executed by this call
    pub steps_executed: Step,
    /// Wall duration of the call in simulated milliseconds
    pub duration_ms: f64,
}

/// Clock shared by the worker threads for one run
#[derive(Debug, Clone, Copy)]
struct SliceClock {
    origin: Step,
    from: usize,
    to: usize,
    to_do: Step,
    done: bool,
}

/// Run the update loop for `steps` further steps
#[allow(clippy::too_many_arguments)]
pub fn run_loop(
    sim: &mut SimState,
    nodes: &mut NodeManager,
    conn: &mut ConnectionManager,
    delivery: &EventDelivery,
    transport: &dyn Transport,
    vp: &VpManager,
    common: &[CommonProps],
    steps: Step,
    off_grid: bool,
    print_time: bool,
) -> Result<Vec<RecordedSpike>> {
    sim.to_do += steps;
    let min_delay = sim.min_delay;
    let num_threads = vp.num_threads();
    let num_ranks = vp.num_ranks();

    let barrier = Barrier::new(num_threads);
    let initial_to = sim.from_step + (sim.to_do as usize).min(min_delay - sim.from_step);
    let clock = RwLock::new(SliceClock {
        origin: sim.clock,
        from: sim.from_step,
        to: initial_to,
        to_do: sim.to_do,
        done: sim.to_do == 0,
    });
    let errors: Vec<Mutex<Option<CoreError>>> =
        (0..num_threads).map(|_| Mutex::new(None)).collect();
    let fatal: Mutex<Option<CoreError>> = Mutex::new(None);
    let terminate = sim.terminate.clone();

    let ConnectionManager {
        store, target_table, ..
    } = conn;
    let target_table: &TargetTable = target_table;
    let conn_shards = store.threads_mut();
    let node_shards = nodes.threads_mut();

    let mut master_log: Vec<RecordedSpike> = Vec::new();

    std::thread::scope(|s| {
        let mut handles = Vec::new();
        for (tid, (nshard, cshard)) in node_shards
            .iter_mut()
            .zip(conn_shards.iter_mut())
            .enumerate()
        {
            let barrier = &barrier;
            let clock = &clock;
            let errors = &errors;
            let fatal = &fatal;
            let terminate = &terminate;
            let handle = s.spawn(move || -> Vec<RecordedSpike> {
                let mut log = Vec::new();
                let mut sink = SpikeSink::new();
                loop {
                    let clk = *clock.read();
                    if clk.done {
                        break;
                    }
                    let result = worker_subslice(
                        tid, clk, nshard, cshard, delivery, common, min_delay, num_ranks,
                        &mut sink,
                    );
                    if let Err(e) = result {
                        *errors[tid].lock() = Some(e);
                    }
                    barrier.wait();
                    if tid == 0 {
                        master_advance(
                            clock,
                            errors,
                            fatal,
                            delivery,
                            target_table,
                            transport,
                            vp,
                            min_delay,
                            off_grid,
                            print_time,
                            terminate,
                            &mut log,
                        );
                    }
                    barrier.wait();
                }
                log
            });
            handles.push(handle);
        }
        for (tid, handle) in handles.into_iter().enumerate() {
            match handle.join() {
                Ok(log) => {
                    if tid == 0 {
                        master_log = log;
                    }
                }
                Err(_) => {
                    fatal
                        .lock()
                        .get_or_insert(CoreError::kernel("worker thread panicked"));
                }
            }
        }
    });

    let final_clock = *clock.read();
    sim.clock = final_clock.origin;
    sim.from_step = final_clock.from;
    sim.to_do = final_clock.to_do.max(0);

    if let Some(e) = fatal.lock().take() {
        return Err(e);
    }
    Ok(master_log)
}

/// Deliver and update one thread's share of a sub-slice
#[allow(clippy::too_many_arguments)]
fn worker_subslice(
    tid: usize,
    clk: SliceClock,
    nshard: &mut ThreadNodes,
    cshard: &mut spikegrid_net::store::ThreadConnections,
    delivery: &EventDelivery,
    common: &[CommonProps],
    min_delay: usize,
    num_ranks: usize,
    sink: &mut SpikeSink,
) -> Result<()> {
    let moduli = delivery.moduli.read();
    let ctx = DeliveryCtx::new(clk.origin, &moduli);
    let ThreadNodes { nodes, frozen, .. } = nshard;

    if clk.from == 0 {
        let bufs = delivery.buffers.read();
        deliver_events(tid, &bufs, cshard, nodes, &ctx, common, min_delay, num_ranks)?;
    }

    for (lid, node) in nodes.iter_mut().enumerate() {
        if frozen[lid] {
            continue;
        }
        node.update(&ctx, clk.from, clk.to, sink);
        if !sink.is_empty() {
            let mut reg = delivery.registers[tid].lock();
            for e in sink.take() {
                debug_assert!(e.lag <= u8::MAX as usize);
                reg.spikes.push(EmittedSpike {
                    gid: node.gid(),
                    lid: lid as u32,
                    lag: e.lag as u8,
                    offset: e.offset,
                    multiplicity: e.multiplicity,
                });
            }
        }
    }

    if clk.to == min_delay {
        let mut reg = delivery.registers[tid].lock();
        for (lid, node) in nodes.iter().enumerate() {
            if node.sends_secondary() {
                reg.secondary.push((lid as u32, node.secondary_value()));
            }
        }
    }

    Ok(())
}

/// Master step between the two barriers: rethrow captured errors, exchange
/// at slice boundaries, advance the clock
#[allow(clippy::too_many_arguments)]
fn master_advance(
    clock: &RwLock<SliceClock>,
    errors: &[Mutex<Option<CoreError>>],
    fatal: &Mutex<Option<CoreError>>,
    delivery: &EventDelivery,
    target_table: &TargetTable,
    transport: &dyn Transport,
    vp: &VpManager,
    min_delay: usize,
    off_grid: bool,
    print_time: bool,
    terminate: &AtomicBool,
    log: &mut Vec<RecordedSpike>,
) {
    let mut clk = clock.write();

    for slot in errors {
        if let Some(e) = slot.lock().take() {
            fatal.lock().get_or_insert(e);
        }
    }
    if fatal.lock().is_some() {
        clk.done = true;
        return;
    }

    clk.to_do -= (clk.to - clk.from) as Step;

    if clk.to == min_delay {
        if let Err(e) = gather_events(
            delivery,
            target_table,
            transport,
            vp,
            clk.origin,
            off_grid,
            log,
        ) {
            fatal.lock().get_or_insert(e);
            clk.done = true;
            return;
        }
        delivery.moduli.write().rotate();
        clk.origin += min_delay as Step;
        clk.from = 0;
        if print_time {
            log::info!(
                "slice complete at step {}, {} steps to go",
                clk.origin,
                clk.to_do
            );
        }
    } else {
        clk.from = clk.to;
    }

    if terminate.load(Ordering::Relaxed) {
        clk.done = true;
        return;
    }
    if clk.to_do <= 0 {
        clk.done = true;
        return;
    }
    clk.to = clk.from + (clk.to_do as usize).min(min_delay - clk.from);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_state_defaults() {
        let sim = SimState::default();
        assert_eq!(sim.phase, Phase::Fresh);
        assert_eq!(sim.clock, 0);
        assert_eq!(sim.to_do, 0);
        assert!(!sim.simulated);
    }

    #[test]
    fn test_slice_clock_partial_subslice() {
        // a 3-step request against a 10-step slice stops mid-slice
        let mut sim = SimState::default();
        sim.min_delay = 10;
        let initial_to = sim.from_step + (3usize).min(sim.min_delay - sim.from_step);
        assert_eq!(initial_to, 3);
    }
}
