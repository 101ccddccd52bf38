//! The simulation kernel
//!
//! An explicit value owned by the caller; there is no process-global state.
//! The kernel composes the time grid, the virtual-process layout, node and
//! model bookkeeping, the connection infrastructure, the per-VP generators
//! and the exchange transport, and drives the scheduler. All configuration
//! flows through the status-dictionary gateway.

use spikegrid_core::collection::GidCollection;
use spikegrid_core::error::{CoreError, Result};
use spikegrid_core::ids::{Gid, Lcid, Step, SynId, Thread};
use spikegrid_core::status::StatusDict;
use spikegrid_core::synapse::{CommonProps, SpikeCount};
use spikegrid_core::time::TimeGrid;
use spikegrid_net::builder::{ConnSpec, SynSpec, ValueSpec};
use spikegrid_net::connector::SynKind;

use crate::connection_manager::ConnectionManager;
use crate::delivery::EventDelivery;
use crate::node_manager::NodeManager;
use crate::registry::ModelRegistry;
use crate::rng::RngManager;
use crate::scheduler::{run_loop, Phase, SimState, SimulationResult};
use crate::transport::{LocalTransport, Transport};
use crate::vp::VpManager;

/// Kernel-level switches settable through the status gateway
#[derive(Debug, Clone, Copy)]
pub struct KernelConfig {
    /// Exchange spikes with sub-step offsets
    pub off_grid_spiking: bool,
    /// Report slice progress through the log
    pub print_time: bool,
    /// Unread status keys raise instead of warn
    pub dict_miss_is_error: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            off_grid_spiking: false,
            print_time: false,
            dict_miss_is_error: false,
        }
    }
}

/// The simulation kernel of one process
#[derive(Debug)]
pub struct Kernel {
    grid: TimeGrid,
    vp: VpManager,
    registry: ModelRegistry,
    nodes: NodeManager,
    conn: ConnectionManager,
    rng: RngManager,
    transport: Box<dyn Transport>,
    delivery: EventDelivery,
    sim: SimState,
    config: KernelConfig,
    common_props: Vec<CommonProps>,
}

impl Default for Kernel {
    fn default() -> Self {
        Self::new()
    }
}

impl Kernel {
    /// Create a single-rank kernel with one thread
    pub fn new() -> Self {
        Self::with_transport(Box::new(LocalTransport), 1)
    }

    /// Create a kernel on an explicit transport
    pub fn with_transport(transport: Box<dyn Transport>, num_threads: usize) -> Self {
        let vp = VpManager::new(transport.rank(), transport.num_ranks(), num_threads);
        let rng = RngManager::new(&vp);
        Self {
            grid: TimeGrid::default(),
            vp,
            registry: ModelRegistry::new(),
            nodes: NodeManager::new(&vp),
            conn: ConnectionManager::new(num_threads),
            rng,
            transport,
            delivery: EventDelivery::new(num_threads),
            sim: SimState::default(),
            config: KernelConfig::default(),
            common_props: Vec::new(),
        }
    }

    /// The time grid in use
    pub fn time_grid(&self) -> &TimeGrid {
        &self.grid
    }

    /// Lifecycle phase
    pub fn phase(&self) -> Phase {
        self.sim.phase
    }

    /// This process's rank
    pub fn rank(&self) -> usize {
        self.vp.rank()
    }

    /// Number of participating ranks
    pub fn num_ranks(&self) -> usize {
        self.vp.num_ranks()
    }

    /// The virtual-process layout
    pub fn vp_layout(&self) -> &VpManager {
        &self.vp
    }

    /// The model registry
    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// The connection infrastructure, for inspection
    pub fn connections(&self) -> &ConnectionManager {
        &self.conn
    }

    /// Node bookkeeping, for inspection
    pub fn nodes(&self) -> &NodeManager {
        &self.nodes
    }

    /// Total number of stored connections on this rank
    pub fn num_connections(&self) -> usize {
        self.conn.num_connections()
    }

    /// A handle that cancels the running simulation at the next slice
    /// boundary when set
    pub fn terminate_handle(&self) -> std::sync::Arc<std::sync::atomic::AtomicBool> {
        self.sim.terminate.clone()
    }

    /// Create `count` nodes of a registered model
    pub fn add_nodes(&mut self, model: &str, count: usize) -> Result<GidCollection> {
        if self.sim.phase == Phase::Running {
            return Err(CoreError::kernel("cannot create nodes while running"));
        }
        let model_id = self.registry.node_model_id(model)?;
        let collection = self
            .nodes
            .add_nodes(&self.registry, &self.vp, model_id, count)?;
        if self.registry.node_model(model_id).kind.is_off_grid() && !self.config.off_grid_spiking {
            log::info!("off-grid model {} created; enabling off-grid spike exchange", model);
            self.config.off_grid_spiking = true;
        }
        Ok(collection)
    }

    /// Clone a model under a new name with default overrides
    pub fn copy_model(&mut self, existing: &str, new_name: &str, overrides: StatusDict) -> Result<()> {
        self.registry.copy_model(existing, new_name, overrides)
    }

    /// Re-create nodes from a sequence of status dictionaries
    ///
    /// Each dictionary must name its `model`; `parent` keys are accepted
    /// and ignored.
    pub fn restore_nodes(&mut self, dicts: &[StatusDict]) -> Result<Vec<Gid>> {
        let mut created = Vec::with_capacity(dicts.len());
        for dict in dicts {
            let model = dict
                .get_text("model")
                .ok_or_else(|| CoreError::bad_property("model", "<missing>", "a model name"))?
                .to_string();
            let collection = self.add_nodes(&model, 1)?;
            let gid = collection.get(0).expect("one node created");
            self.set_node_status(gid, dict)?;
            created.push(gid);
        }
        Ok(created)
    }

    /// Freeze or thaw a node
    pub fn set_frozen(&mut self, gid: Gid, frozen: bool) -> Result<()> {
        self.nodes.set_frozen(&self.vp, gid, frozen)
    }

    /// Execute a connectivity rule over two populations
    ///
    /// Call-level problems (rule validation, list-length mismatches, an
    /// out-of-range constant delay) fail before any connection exists;
    /// problems with an individual drawn connection are logged as warnings
    /// and that connection is skipped.
    pub fn connect(
        &mut self,
        sources: &GidCollection,
        targets: &GidCollection,
        conn_spec: &ConnSpec,
        syn_spec: &SynSpec,
    ) -> Result<()> {
        if self.sim.phase == Phase::Running {
            return Err(CoreError::kernel("cannot connect while running"));
        }
        conn_spec.validate(sources.len(), targets.len())?;
        let syn_id = self.registry.syn_model_id(&syn_spec.model)?;
        let (kind, caps) = {
            let m = self.registry.syn_model(syn_id);
            (m.kind, m.caps)
        };
        let pair_count = conn_spec.deterministic_pair_count(sources.len(), targets.len());
        syn_spec.weight.validate("weight", pair_count)?;
        syn_spec.delay.validate("delay", pair_count)?;
        if let ValueSpec::Constant(delay_ms) = &syn_spec.delay {
            let steps = self.grid.delay_ms_to_steps(*delay_ms);
            self.conn.checker.admit(steps, &self.grid, self.sim.simulated)?;
        }

        let Kernel {
            grid,
            vp,
            registry,
            nodes,
            conn,
            rng,
            sim,
            ..
        } = self;
        let simulated = sim.simulated;
        let primary = !caps.delivers_secondary;

        if conn_spec.is_source_driven() {
            // source-driven rules draw from the global generator so every
            // rank sees the same pairs and keeps only its local targets
            for source in sources.iter() {
                let drawn = conn_spec.draw_targets(targets, source, rng.grng());
                for target in drawn {
                    let weight = syn_spec.weight.resolve(0, rng.grng());
                    let delay_ms = syn_spec.delay.resolve(0, rng.grng());
                    if !nodes.exists(target) || !vp.is_local_gid(target) {
                        if !nodes.exists(target) {
                            log::warn!("skipping connection {} -> {}: unknown target", source, target);
                        }
                        continue;
                    }
                    let tid = vp.thread_of_gid(target);
                    if let Err(e) = insert_one(
                        grid, registry, nodes, conn, simulated, syn_id, kind, primary, syn_spec,
                        weight, delay_ms, source, target, tid,
                    ) {
                        log::warn!("skipping connection {} -> {}: {}", source, target, e);
                    }
                }
            }
        } else {
            for (ti, target) in targets.iter().enumerate() {
                if !nodes.exists(target) {
                    log::warn!("skipping target {}: unknown node", target);
                    continue;
                }
                if !vp.is_local_gid(target) {
                    continue;
                }
                let vpid = vp.vp_of(target);
                let tid = vp.thread_of_gid(target);
                let drawn = conn_spec.draw_sources(sources, target, ti, rng.vp_rng(vpid));
                conn.store.thread_mut(tid).reserve(syn_id, kind, drawn.len())?;
                for source in drawn {
                    // pair order for list-valued specs: target-major over
                    // the raw collections
                    let pair_index = if matches!(conn_spec.rule, spikegrid_net::builder::ConnRule::OneToOne)
                    {
                        ti
                    } else {
                        sources
                            .position(source)
                            .map_or(ti, |si| ti * sources.len() + si)
                    };
                    let weight = syn_spec.weight.resolve(pair_index, rng.vp_rng(vpid));
                    let delay_ms = syn_spec.delay.resolve(pair_index, rng.vp_rng(vpid));
                    if let Err(e) = insert_one(
                        grid, registry, nodes, conn, simulated, syn_id, kind, primary, syn_spec,
                        weight, delay_ms, source, target, tid,
                    ) {
                        log::warn!("skipping connection {} -> {}: {}", source, target, e);
                    }
                }
            }
        }
        Ok(())
    }

    /// Neuromodulated weight update across every thread
    pub fn trigger_update_weight(
        &mut self,
        vt_gid: Gid,
        spikes: &[SpikeCount],
        t_trig_ms: f64,
    ) -> Result<()> {
        let Kernel {
            conn,
            registry,
            grid,
            ..
        } = self;
        let resolution = grid.resolution_ms();
        for tid in 0..conn.store.num_threads() {
            conn.store.thread_mut(tid).trigger_update_weight(
                vt_gid,
                spikes,
                t_trig_ms,
                &|syn_id: SynId| {
                    let mut cp = registry.syn_model(syn_id).common.clone();
                    cp.resolution_ms = resolution;
                    cp
                },
            );
        }
        Ok(())
    }

    /// Status of one connection, the delay reported in milliseconds
    pub fn get_connection_status(
        &self,
        tid: Thread,
        syn_index: usize,
        lcid: Lcid,
    ) -> StatusDict {
        self.conn
            .store
            .get_connection_status(tid, syn_index, lcid, &self.grid)
    }

    /// Gid of the target of one connection
    pub fn get_target_gid(&self, tid: Thread, syn_index: usize, lcid: Lcid) -> Result<Gid> {
        let lid = self.conn.store.thread(tid).target_lid(syn_index, lcid);
        self.nodes
            .thread(tid)
            .nodes
            .get(lid)
            .map(|n| n.gid())
            .ok_or(CoreError::UnknownNode { gid: 0 })
    }

    /// Advance the simulation by `ms` milliseconds
    ///
    /// A zero duration is a no-op; a negative duration is an error. The
    /// call resumes from wherever the previous one stopped, including
    /// mid-slice after a cancellation.
    pub fn simulate(&mut self, ms: f64) -> Result<SimulationResult> {
        if !ms.is_finite() || ms < 0.0 {
            return Err(CoreError::bad_property(
                "time",
                ms.to_string(),
                ">= 0.0",
            ));
        }
        let steps = self.grid.ms_to_steps(ms);
        if steps == 0 {
            return Ok(SimulationResult::default());
        }

        self.prepare()?;
        self.sim.phase = Phase::Running;
        let to_do_before = self.sim.to_do;

        let Kernel {
            nodes,
            conn,
            delivery,
            transport,
            vp,
            sim,
            common_props,
            config,
            ..
        } = self;
        let outcome = run_loop(
            sim,
            nodes,
            conn,
            delivery,
            transport.as_ref(),
            vp,
            common_props,
            steps,
            config.off_grid_spiking,
            config.print_time,
        );

        self.sim.phase = Phase::Finalized;
        self.sim.simulated = true;
        let spikes = outcome?;

        // the global generator must have advanced identically everywhere
        self.check_grng_synchrony()?;

        Ok(SimulationResult {
            spikes,
            steps_executed: to_do_before + steps - self.sim.to_do,
            duration_ms: ms,
        })
    }

    fn check_grng_synchrony(&mut self) -> Result<()> {
        let token = self.rng.grng_sync_token() as i64;
        let lo = self.transport.all_reduce_min_i64(token)?;
        let hi = self.transport.all_reduce_max_i64(token)?;
        if lo != hi {
            return Err(CoreError::kernel(
                "global random number generators are out of sync across ranks",
            ));
        }
        Ok(())
    }

    /// Prepare the kernel for a run
    fn prepare(&mut self) -> Result<()> {
        self.check_grng_synchrony()?;

        let local_min = self.conn.checker.min_steps();
        let local_max = self.conn.checker.max_steps();
        let min = self.transport.all_reduce_min_i64(local_min)?.max(1) as usize;
        let max = self.transport.all_reduce_max_i64(local_max)?.max(1) as usize;
        let extrema_changed = min != self.sim.min_delay || max != self.sim.max_delay;
        self.sim.min_delay = min;
        self.sim.max_delay = max;

        if !self.conn.tables_built {
            self.conn.build_target_tables(
                &self.vp,
                &self.nodes,
                &self.registry,
                self.transport.as_ref(),
            )?;
        }

        if extrema_changed || !self.sim.buffers_initialized {
            self.delivery.configure(
                self.vp.num_threads(),
                self.vp.num_ranks(),
                min,
                max,
                self.sim.clock,
                self.conn.secondary_chunk,
            );
            let moduli = self.delivery.moduli.read();
            for shard in self.nodes.threads_mut() {
                for (lid, node) in shard.nodes.iter_mut().enumerate() {
                    node.init_buffers(&moduli);
                    shard.initialized[lid] = true;
                }
            }
            self.sim.buffers_initialized = true;
        } else {
            // late-created nodes still need their buffers
            let moduli = self.delivery.moduli.read();
            for shard in self.nodes.threads_mut() {
                for (lid, node) in shard.nodes.iter_mut().enumerate() {
                    if !shard.initialized[lid] {
                        node.init_buffers(&moduli);
                        shard.initialized[lid] = true;
                    }
                }
            }
        }

        self.common_props = (0..self.registry.num_syn_models())
            .map(|i| {
                let mut cp = self.registry.syn_model(SynId::new(i as u8)).common.clone();
                cp.resolution_ms = self.grid.resolution_ms();
                cp
            })
            .collect();

        for shard in self.nodes.threads_mut() {
            for node in &mut shard.nodes {
                node.calibrate(&self.grid);
            }
        }

        self.sim.phase = Phase::Prepared;
        Ok(())
    }

    /// Kernel-wide status
    pub fn get_status(&self) -> StatusDict {
        let mut d = StatusDict::new();
        d.insert("resolution", self.grid.resolution_ms());
        d.insert("tics_per_ms", self.grid.tics_per_ms() as i64);
        d.insert("local_num_threads", self.vp.num_threads() as i64);
        d.insert("num_processes", self.vp.num_ranks() as i64);
        d.insert("total_num_virtual_procs", self.vp.num_vps() as i64);
        d.insert("network_size", self.nodes.num_nodes() as i64);
        d.insert("num_connections", self.conn.num_connections() as i64);
        d.insert(
            "time",
            self.grid.steps_to_ms(self.sim.clock + self.sim.from_step as Step),
        );
        d.insert("to_do", self.sim.to_do);
        d.insert("min_delay", self.grid.steps_to_ms(self.conn.checker.min_steps()));
        d.insert("max_delay", self.grid.steps_to_ms(self.conn.checker.max_steps()));
        d.insert(
            "rng_seeds",
            self.rng.seeds().iter().map(|&s| s as i64).collect::<Vec<i64>>(),
        );
        d.insert("grng_seed", self.rng.grng_seed() as i64);
        d.insert("off_grid_spiking", self.config.off_grid_spiking);
        d.insert("print_time", self.config.print_time);
        d.insert("dict_miss_is_error", self.config.dict_miss_is_error);
        d
    }

    /// Apply kernel-wide status changes
    ///
    /// Everything is validated before anything is applied; a failing call
    /// leaves the kernel untouched.
    pub fn set_status(&mut self, dict: &StatusDict) -> Result<()> {
        if self.sim.phase == Phase::Running {
            return Err(CoreError::kernel("cannot reconfigure while running"));
        }
        let has_nodes = !self.nodes.is_empty();
        let has_conns = self.conn.num_connections() > 0;

        if dict.contains("time") {
            dict.mark_accessed("time");
            return Err(CoreError::bad_property(
                "time",
                "<any>",
                "resetting the clock is not supported",
            ));
        }

        let resolution = dict.get_double("resolution");
        let tics_per_ms = dict.get_integer("tics_per_ms");
        if tics_per_ms.is_some() && resolution.is_none() {
            return Err(CoreError::kernel(
                "tics_per_ms can only be set together with resolution",
            ));
        }
        if resolution.is_some() && has_nodes {
            return Err(CoreError::kernel(
                "the time representation cannot change once nodes exist",
            ));
        }
        if resolution.is_some() && has_conns {
            return Err(CoreError::kernel(
                "the time representation cannot change once connections exist",
            ));
        }

        let threads = dict.get_integer("local_num_threads");
        if threads.is_some() && has_nodes {
            return Err(CoreError::kernel(
                "the thread count cannot change once nodes exist",
            ));
        }

        let min_delay = dict.get_double("min_delay");
        let max_delay = dict.get_double("max_delay");
        if min_delay.is_some() != max_delay.is_some() {
            return Err(CoreError::kernel(
                "min_delay and max_delay must be specified together",
            ));
        }
        // once simulated the checker refuses with the delay error below;
        // before that, a populated network blocks pinning outright
        if min_delay.is_some() && has_nodes && !self.sim.simulated {
            return Err(CoreError::kernel(
                "delay extrema cannot be pinned once nodes exist",
            ));
        }

        let rng_seeds = dict.get_int_list("rng_seeds");
        if let Some(seeds) = &rng_seeds {
            if seeds.len() != self.vp.num_vps() {
                return Err(CoreError::dimension_mismatch(
                    "rng_seeds",
                    seeds.len(),
                    self.vp.num_vps(),
                ));
            }
        }
        let grng_seed = dict.get_integer("grng_seed");
        let off_grid = dict.get_bool("off_grid_spiking");
        let print_time = dict.get_bool("print_time");
        let dict_miss = dict.get_bool("dict_miss_is_error");

        // dry-run the fallible pieces on copies
        let new_grid = match (resolution, tics_per_ms) {
            (Some(res), Some(tics)) => {
                let tics = tics as u64;
                Some(TimeGrid::new(tics, (res * tics as f64).round() as u64)?)
            }
            (Some(res), None) => {
                let mut g = self.grid;
                g.set_resolution_ms(res)?;
                Some(g)
            }
            _ => None,
        };
        let grid_for_checker = new_grid.unwrap_or(self.grid);
        let new_checker = if let (Some(lo), Some(hi)) = (min_delay, max_delay) {
            let mut c = self.conn.checker.clone();
            c.set_extrema(lo, hi, &grid_for_checker, has_conns, self.sim.simulated)?;
            Some(c)
        } else {
            None
        };
        if let Some(t) = threads {
            if t <= 0 {
                return Err(CoreError::bad_property(
                    "local_num_threads",
                    t.to_string(),
                    "> 0",
                ));
            }
        }

        // apply
        if let Some(g) = new_grid {
            self.grid = g;
        }
        if let Some(t) = threads {
            self.vp.set_num_threads(t as usize)?;
            self.rebuild_for_layout();
        }
        if let Some(c) = new_checker {
            self.conn.checker = c;
            self.sim.buffers_initialized = false;
        }
        if let Some(seeds) = rng_seeds {
            self.rng
                .set_seeds(seeds.iter().map(|&s| s as u64).collect(), &self.vp)?;
        }
        if let Some(seed) = grng_seed {
            self.rng.set_grng_seed(seed as u64, &self.vp)?;
        }
        if let Some(v) = off_grid {
            self.config.off_grid_spiking = v;
        }
        if let Some(v) = print_time {
            self.config.print_time = v;
        }
        if let Some(v) = dict_miss {
            self.config.dict_miss_is_error = v;
        }

        let unread = dict.unaccessed();
        if !unread.is_empty() {
            if self.config.dict_miss_is_error {
                return Err(CoreError::UnaccessedDictionaryEntry { keys: unread });
            }
            for key in unread {
                log::warn!("status key {} was not recognized", key);
            }
        }
        Ok(())
    }

    /// Status of one node; metadata only for nodes owned by other ranks
    pub fn get_node_status(&self, gid: Gid) -> Result<StatusDict> {
        let info = *self.nodes.info(gid)?;
        let local = self.vp.is_local_vp(info.vp as usize);
        let mut d = if let Some(node) = self.nodes.local_node(&self.vp, gid)? {
            node.get_status()
        } else {
            let mut d = StatusDict::new();
            d.insert("model", self.registry.node_model(info.model_id).name.clone());
            d
        };
        d.insert("gid", gid.raw() as i64);
        d.insert("vp", info.vp as i64);
        d.insert("thread", self.vp.thread_of_vp(info.vp as usize) as i64);
        d.insert("local", local);
        d.insert("frozen", self.nodes.is_frozen(&self.vp, gid)?);
        d.clear_access_flags();
        Ok(d)
    }

    /// Update one node from a status dictionary
    ///
    /// Applied on the owning rank; other ranks accept the call and touch
    /// only the shared metadata.
    pub fn set_node_status(&mut self, gid: Gid, dict: &StatusDict) -> Result<()> {
        if let Some(frozen) = dict.get_bool("frozen") {
            self.nodes.set_frozen(&self.vp, gid, frozen)?;
        }
        for meta in ["model", "gid", "vp", "thread", "local", "parent"] {
            dict.mark_accessed(meta);
        }
        let local = {
            let info = self.nodes.info(gid)?;
            self.vp.is_local_vp(info.vp as usize)
        };
        if let Some(node) = self.nodes.local_node_mut(&self.vp, gid)? {
            node.set_status(dict)?;
        }
        if local {
            let unread = dict.unaccessed();
            if !unread.is_empty() {
                if self.config.dict_miss_is_error {
                    return Err(CoreError::UnaccessedDictionaryEntry { keys: unread });
                }
                for key in unread {
                    log::warn!("status key {} was not read by node {}", key, gid);
                }
            }
        }
        Ok(())
    }

    /// Return the kernel to its freshly constructed state
    ///
    /// Keeps the transport; models revert to the built-ins, the network and
    /// all tables are dropped, generators are re-seeded with the defaults.
    pub fn reset(&mut self) {
        let num_threads = 1;
        self.grid = TimeGrid::default();
        self.vp = VpManager::new(self.transport.rank(), self.transport.num_ranks(), num_threads);
        self.registry = ModelRegistry::new();
        self.nodes = NodeManager::new(&self.vp);
        self.conn = ConnectionManager::new(num_threads);
        self.rng = RngManager::new(&self.vp);
        self.delivery = EventDelivery::new(num_threads);
        self.sim = SimState::default();
        self.config = KernelConfig::default();
        self.common_props.clear();
    }

    fn rebuild_for_layout(&mut self) {
        let num_threads = self.vp.num_threads();
        self.nodes = NodeManager::new(&self.vp);
        let checker = self.conn.checker.clone();
        self.conn = ConnectionManager::new(num_threads);
        self.conn.checker = checker;
        self.delivery = EventDelivery::new(num_threads);
        self.rng.reinit(&self.vp);
        self.sim.buffers_initialized = false;
    }
}

/// Build and store one connection; any error here is per-connection
#[allow(clippy::too_many_arguments)]
fn insert_one(
    grid: &TimeGrid,
    registry: &ModelRegistry,
    nodes: &NodeManager,
    conn: &mut ConnectionManager,
    simulated: bool,
    syn_id: SynId,
    kind: SynKind,
    primary: bool,
    syn_spec: &SynSpec,
    weight: f64,
    delay_ms: f64,
    source: Gid,
    target: Gid,
    tid: Thread,
) -> Result<()> {
    let source_model = registry.node_model(nodes.model_of(source)?);
    let target_model = registry.node_model(nodes.model_of(target)?);

    if primary && !target_model.kind.accepts_spikes() {
        return Err(CoreError::illegal_connection(format!(
            "target model {} does not accept spike events",
            target_model.name
        )));
    }
    if !primary {
        if !target_model.kind.accepts_rates() {
            return Err(CoreError::illegal_connection(format!(
                "target model {} does not accept rate events",
                target_model.name
            )));
        }
        if !source_model.kind.sends_secondary() {
            return Err(CoreError::illegal_connection(format!(
                "source model {} does not publish a secondary value",
                source_model.name
            )));
        }
    }
    if !target_model.kind.handles_receptor(syn_spec.receptor) {
        return Err(CoreError::UnknownReceptor {
            port: syn_spec.receptor,
            model: target_model.name.clone(),
        });
    }

    let delay_steps = grid.delay_ms_to_steps(delay_ms);
    conn.checker.admit(delay_steps, grid, simulated)?;

    let target_lid = nodes.lid_of(target)? as usize;
    let instance = registry.create_connection(
        syn_id,
        target_lid,
        weight,
        delay_steps as u32,
        syn_spec.receptor,
        &syn_spec.params,
    )?;
    conn.add_connection(tid, syn_id, kind, instance, source, primary)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spikegrid_net::builder::ConnRule;

    fn two_neurons(kernel: &mut Kernel) -> (Gid, Gid) {
        let c = kernel.add_nodes("iaf_neuron", 2).unwrap();
        (c.get(0).unwrap(), c.get(1).unwrap())
    }

    #[test]
    fn test_add_nodes_assigns_dense_gids() {
        let mut kernel = Kernel::new();
        let (a, b) = two_neurons(&mut kernel);
        assert_eq!(a, Gid::new(1));
        assert_eq!(b, Gid::new(2));
        assert_eq!(kernel.get_status().get_integer("network_size"), Some(2));
    }

    #[test]
    fn test_connect_one_to_one() {
        let mut kernel = Kernel::new();
        let (a, b) = two_neurons(&mut kernel);
        kernel
            .connect(
                &GidCollection::list(vec![a]),
                &GidCollection::list(vec![b]),
                &ConnSpec::new(ConnRule::OneToOne),
                &SynSpec::new("static_synapse")
                    .with_weight(ValueSpec::Constant(1.5))
                    .with_delay(ValueSpec::Constant(1.0)),
            )
            .unwrap();
        assert_eq!(kernel.num_connections(), 1);
        let status = kernel.get_connection_status(0, 0, 0);
        assert_eq!(status.get_double("weight"), Some(1.5));
        assert_eq!(status.get_double("delay"), Some(1.0));
        assert_eq!(kernel.get_target_gid(0, 0, 0).unwrap(), b);
    }

    #[test]
    fn test_connect_bad_constant_delay_is_call_level() {
        let mut kernel = Kernel::new();
        let (a, b) = two_neurons(&mut kernel);
        let err = kernel
            .connect(
                &GidCollection::list(vec![a]),
                &GidCollection::list(vec![b]),
                &ConnSpec::new(ConnRule::OneToOne),
                &SynSpec::new("static_synapse").with_delay(ValueSpec::Constant(0.01)),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::BadDelay { .. }));
        assert_eq!(kernel.num_connections(), 0, "no partial state");
    }

    #[test]
    fn test_connect_illegal_target_is_skipped() {
        let mut kernel = Kernel::new();
        let src = kernel.add_nodes("iaf_neuron", 1).unwrap().get(0).unwrap();
        let gen = kernel.add_nodes("spike_generator", 1).unwrap().get(0).unwrap();
        // generators do not accept spikes; the edge is skipped, not fatal
        kernel
            .connect(
                &GidCollection::list(vec![src]),
                &GidCollection::list(vec![gen]),
                &ConnSpec::new(ConnRule::OneToOne),
                &SynSpec::new("static_synapse"),
            )
            .unwrap();
        assert_eq!(kernel.num_connections(), 0);
    }

    #[test]
    fn test_unknown_model_is_fatal() {
        let mut kernel = Kernel::new();
        let (a, b) = two_neurons(&mut kernel);
        let err = kernel
            .connect(
                &GidCollection::list(vec![a]),
                &GidCollection::list(vec![b]),
                &ConnSpec::new(ConnRule::OneToOne),
                &SynSpec::new("no_such_synapse"),
            )
            .unwrap_err();
        assert!(matches!(err, CoreError::UnknownModel { .. }));
    }

    #[test]
    fn test_status_gateway_roundtrip() {
        let mut kernel = Kernel::new();
        let mut d = StatusDict::new();
        d.insert("print_time", true);
        d.insert("dict_miss_is_error", true);
        kernel.set_status(&d).unwrap();

        let status = kernel.get_status();
        assert_eq!(status.get_bool("print_time"), Some(true));
        assert_eq!(status.get_bool("dict_miss_is_error"), Some(true));
    }

    #[test]
    fn test_unknown_status_key_raises_when_strict() {
        let mut kernel = Kernel::new();
        let mut d = StatusDict::new();
        d.insert("dict_miss_is_error", true);
        kernel.set_status(&d).unwrap();

        let mut d = StatusDict::new();
        d.insert("no_such_key", 1.0);
        let err = kernel.set_status(&d).unwrap_err();
        assert!(matches!(err, CoreError::UnaccessedDictionaryEntry { .. }));
    }

    #[test]
    fn test_time_key_is_refused() {
        let mut kernel = Kernel::new();
        let mut d = StatusDict::new();
        d.insert("time", 0.0);
        let err = kernel.set_status(&d).unwrap_err();
        assert!(matches!(err, CoreError::BadProperty { .. }));
    }

    #[test]
    fn test_resolution_frozen_after_nodes() {
        let mut kernel = Kernel::new();
        kernel.add_nodes("iaf_neuron", 1).unwrap();
        let mut d = StatusDict::new();
        d.insert("resolution", 0.2);
        let err = kernel.set_status(&d).unwrap_err();
        assert!(matches!(err, CoreError::Kernel { .. }));
    }

    #[test]
    fn test_delay_extrema_require_both_keys() {
        let mut kernel = Kernel::new();
        let mut d = StatusDict::new();
        d.insert("min_delay", 1.0);
        let err = kernel.set_status(&d).unwrap_err();
        assert!(matches!(err, CoreError::Kernel { .. }));

        let mut d = StatusDict::new();
        d.insert("min_delay", 1.0);
        d.insert("max_delay", 5.0);
        kernel.set_status(&d).unwrap();
        assert!(kernel.connections().checker.user_pinned());
    }

    #[test]
    fn test_rng_seed_length_is_checked() {
        let mut kernel = Kernel::new();
        let mut d = StatusDict::new();
        d.insert("rng_seeds", vec![1i64, 2]);
        let err = kernel.set_status(&d).unwrap_err();
        assert!(matches!(err, CoreError::DimensionMismatch { .. }));

        let mut d = StatusDict::new();
        d.insert("rng_seeds", vec![12345i64]);
        kernel.set_status(&d).unwrap();
    }

    #[test]
    fn test_thread_count_rebuilds_layout() {
        let mut kernel = Kernel::new();
        let mut d = StatusDict::new();
        d.insert("local_num_threads", 2i64);
        kernel.set_status(&d).unwrap();
        assert_eq!(kernel.vp_layout().num_threads(), 2);
        assert_eq!(
            kernel.get_status().get_integer("total_num_virtual_procs"),
            Some(2)
        );

        kernel.add_nodes("iaf_neuron", 1).unwrap();
        let mut d = StatusDict::new();
        d.insert("local_num_threads", 4i64);
        assert!(kernel.set_status(&d).is_err());
    }

    #[test]
    fn test_node_status_roundtrip() {
        let mut kernel = Kernel::new();
        let gid = kernel.add_nodes("iaf_neuron", 1).unwrap().get(0).unwrap();

        let mut d = StatusDict::new();
        d.insert("I_e", 300.0);
        d.insert("frozen", true);
        kernel.set_node_status(gid, &d).unwrap();

        let status = kernel.get_node_status(gid).unwrap();
        assert_eq!(status.get_double("I_e"), Some(300.0));
        assert_eq!(status.get_bool("frozen"), Some(true));
        assert_eq!(status.get_bool("local"), Some(true));
        assert_eq!(status.get_integer("gid"), Some(gid.raw() as i64));
    }

    #[test]
    fn test_restore_nodes() {
        let mut kernel = Kernel::new();
        let mut d = StatusDict::new();
        d.insert("model", "iaf_neuron");
        d.insert("I_e", 120.0);
        d.insert("parent", 0i64);
        let created = kernel.restore_nodes(&[d]).unwrap();
        assert_eq!(created.len(), 1);
        let status = kernel.get_node_status(created[0]).unwrap();
        assert_eq!(status.get_double("I_e"), Some(120.0));
    }

    #[test]
    fn test_simulate_rejects_negative_and_skips_zero() {
        let mut kernel = Kernel::new();
        assert!(kernel.simulate(-1.0).is_err());
        let result = kernel.simulate(0.0).unwrap();
        assert_eq!(result.steps_executed, 0);
        assert_eq!(kernel.phase(), Phase::Fresh);
    }

    #[test]
    fn test_trigger_update_weight_walks_the_store() {
        let mut kernel = Kernel::new();
        let (a, b) = two_neurons(&mut kernel);
        kernel
            .connect(
                &GidCollection::list(vec![a]),
                &GidCollection::list(vec![b]),
                &ConnSpec::new(ConnRule::OneToOne),
                &SynSpec::new("stdp_synapse"),
            )
            .unwrap();

        // no registered volume transmitter matches, so weights are untouched
        let before = kernel.connections().store.thread(0).weight(0, 0);
        let counts = [SpikeCount {
            spike_time_ms: 0.5,
            multiplicity: 1.0,
        }];
        kernel
            .trigger_update_weight(Gid::new(99), &counts, 1.0)
            .unwrap();
        let after = kernel.connections().store.thread(0).weight(0, 0);
        assert_eq!(before, after);
    }

    #[test]
    fn test_layout_and_registry_accessors() {
        let kernel = Kernel::new();
        assert_eq!(kernel.rank(), 0);
        assert_eq!(kernel.num_ranks(), 1);
        assert_eq!(kernel.registry().num_node_models(), 4);
        assert_eq!(kernel.registry().num_syn_models(), 3);
    }

    #[test]
    fn test_reset_returns_to_fresh() {
        let mut kernel = Kernel::new();
        kernel.add_nodes("iaf_neuron", 3).unwrap();
        kernel.simulate(1.0).unwrap();
        assert_eq!(kernel.phase(), Phase::Finalized);

        kernel.reset();
        assert_eq!(kernel.phase(), Phase::Fresh);
        assert_eq!(kernel.nodes().num_nodes(), 0);
        assert_eq!(kernel.num_connections(), 0);
    }
}
