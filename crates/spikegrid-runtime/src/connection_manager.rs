//! Connection bookkeeping
//!
//! Composes the connection store, the two routing tables and the delay
//! checker, and runs the one-time conversion from the build-time source
//! table to the presynaptic target table: a sort pass restoring source
//! contiguity, secondary buffer-position assignment, and the round-based
//! all-to-all of routing packets.

use spikegrid_core::error::Result;
use spikegrid_core::ids::{Gid, Lcid, SynId, Thread};
use spikegrid_net::connector::{AnyConnection, SynKind};
use spikegrid_net::packed::{Marker, Target, TargetData};
use spikegrid_net::sort::sort_slot_by_source;
use spikegrid_net::source_table::{Source, SourceTable};
use spikegrid_net::store::ConnectionStore;
use spikegrid_net::target_table::TargetTable;
use spikegrid_net::DelayChecker;

use crate::node_manager::NodeManager;
use crate::registry::ModelRegistry;
use crate::transport::Transport;
use crate::vp::VpManager;

/// Routing packets exchanged per rank and round during the table build
const TARGET_CHUNK_ENTRIES: usize = 128;
const TARGET_ENTRY_WORDS: usize = 3;

/// The connection infrastructure of one process
#[derive(Debug)]
pub struct ConnectionManager {
    /// Post-synaptic connection storage
    pub store: ConnectionStore,
    /// Build-time source records
    pub source_table: SourceTable,
    /// Presynaptic routing table
    pub target_table: TargetTable,
    /// Delay admission
    pub checker: DelayChecker,
    /// Whether the routing tables match the stored connections
    pub tables_built: bool,
    /// Uniform per-rank chunk of the secondary value buffer
    pub secondary_chunk: usize,
}

impl ConnectionManager {
    /// Create the infrastructure for the given thread count
    pub fn new(num_threads: usize) -> Self {
        Self {
            store: ConnectionStore::new(num_threads),
            source_table: SourceTable::new(num_threads),
            target_table: TargetTable::new(num_threads),
            checker: DelayChecker::new(),
            tables_built: false,
            secondary_chunk: 0,
        }
    }

    /// Total number of stored connections
    pub fn num_connections(&self) -> usize {
        self.store.num_connections()
    }

    /// Append a connection and its source record, maintaining the
    /// has-subsequent flag of a growing same-source run
    pub fn add_connection(
        &mut self,
        tid: Thread,
        syn_id: SynId,
        kind: SynKind,
        conn: AnyConnection,
        source_gid: Gid,
        primary: bool,
    ) -> Result<(usize, Lcid)> {
        if self.source_table.is_cleared() {
            return Err(spikegrid_core::error::CoreError::kernel(
                "routing tables are compacted; no further connections can be added",
            ));
        }
        let (syn_index, lcid) = self.store.thread_mut(tid).add(syn_id, kind, conn)?;
        self.source_table.ensure_slots(tid, syn_index + 1);
        if lcid > 0 {
            if let Some(prev) = self.source_table.get(tid, syn_index, lcid - 1) {
                if prev.gid == source_gid {
                    self.store
                        .thread_mut(tid)
                        .set_has_subsequent(syn_index, lcid - 1, true);
                }
            }
        }
        self.source_table
            .push(tid, syn_index, Source::new(source_gid, primary));
        self.tables_built = false;
        Ok((syn_index, lcid))
    }

    /// Restore source contiguity in every slot
    pub fn sort_connections(&mut self) {
        let Self {
            store, source_table, ..
        } = self;
        for tid in 0..store.num_threads() {
            // a reserve-only slot may not have source records yet
            source_table.ensure_slots(tid, store.thread(tid).num_slots());
            store.thread_mut(tid).for_each_slot_mut(|syn_index, slot| {
                sort_slot_by_source(source_table.slot_mut(tid, syn_index), slot);
            });
        }
    }

    /// Assign buffer positions for secondary values
    ///
    /// Every rank derives the same sender index for a gid from the global
    /// node metadata, so the positions agree without negotiation; the chunk
    /// size is still reduced across ranks to assert that agreement.
    fn assign_secondary_positions(
        &mut self,
        vp: &VpManager,
        nodes: &NodeManager,
        registry: &ModelRegistry,
        transport: &dyn Transport,
    ) -> Result<()> {
        let num_ranks = vp.num_ranks();
        let mut per_rank_counts = vec![0u32; num_ranks];
        let mut sec_index = std::collections::BTreeMap::new();
        for raw in 1..=nodes.num_nodes() as u32 {
            let gid = Gid::new(raw);
            let model = nodes.model_of(gid)?;
            if registry.node_model(model).kind.sends_secondary() {
                let rank = vp.rank_of_gid(gid);
                sec_index.insert(gid, per_rank_counts[rank]);
                per_rank_counts[rank] += 1;
            }
        }
        let local_max = per_rank_counts.iter().copied().max().unwrap_or(0) as u64;
        let chunk = transport.all_reduce_max_u64(local_max)? as usize;
        self.secondary_chunk = chunk;

        let Self {
            store, source_table, ..
        } = self;
        for tid in 0..store.num_threads() {
            let mut positions = Vec::new();
            source_table.for_each(tid, |syn_index, lcid, source| {
                if !source.primary {
                    positions.push((syn_index, lcid, source.gid));
                }
            });
            let tc = store.thread_mut(tid);
            for (syn_index, lcid, gid) in positions {
                let rank = vp.rank_of_gid(gid);
                let idx = sec_index.get(&gid).copied().unwrap_or(0);
                tc.set_secondary_recv_pos(syn_index, lcid, (rank * chunk) as u32 + idx);
            }
        }
        Ok(())
    }

    /// Destination-rank range a build worker is responsible for
    fn rank_range(worker: Thread, num_workers: usize, num_ranks: usize) -> (usize, usize) {
        let start = worker * num_ranks / num_workers;
        let end = (worker + 1) * num_ranks / num_workers;
        (start, end)
    }

    /// Invert the source table into the target table
    ///
    /// Runs the round-based exchange: each round every worker pulls
    /// endpoints from its source-table cursor into fixed per-rank chunks,
    /// the chunks are exchanged, and receivers file the packets under the
    /// emitting neuron. Rounds continue until every rank reports its cursor
    /// exhausted.
    pub fn build_target_tables(
        &mut self,
        vp: &VpManager,
        nodes: &NodeManager,
        registry: &ModelRegistry,
        transport: &dyn Transport,
    ) -> Result<()> {
        self.sort_connections();
        self.assign_secondary_positions(vp, nodes, registry, transport)?;

        let num_ranks = vp.num_ranks();
        let num_threads = vp.num_threads();
        let my_rank = vp.rank();
        let chunk_words = TARGET_CHUNK_ENTRIES * TARGET_ENTRY_WORDS;

        for tid in 0..num_threads {
            self.target_table.clear(tid);
            self.target_table.prepare(tid, nodes.local_count(tid));
        }
        self.source_table.reset_positions();

        loop {
            let mut staging: Vec<Vec<TargetData>> = vec![Vec::new(); num_ranks];
            let mut pulled_dry = true;

            for worker in 0..num_threads {
                let (rank_start, rank_end) = Self::rank_range(worker, num_threads, num_ranks);
                let Self {
                    store, source_table, ..
                } = self;
                loop {
                    let next = source_table.get_next_target_data(
                        worker,
                        rank_start,
                        rank_end,
                        |gid| vp.rank_of_gid(gid),
                        |tid, syn_index, lcid, v| {
                            store.thread_mut(tid).set_has_subsequent(syn_index, lcid, v)
                        },
                    );
                    let Some(nt) = next else {
                        break;
                    };
                    if staging[nt.source_rank].len() >= TARGET_CHUNK_ENTRIES - 1 {
                        source_table.reject_last_target_data(worker, &nt);
                        pulled_dry = false;
                        break;
                    }
                    let secondary_send_pos = if nt.primary {
                        0
                    } else {
                        let recv_pos = store
                            .thread(nt.tid)
                            .get_secondary_recv_pos(nt.syn_index, nt.lcid);
                        (my_rank * self.secondary_chunk) as u32
                            + (recv_pos - (nt.source_rank * self.secondary_chunk) as u32)
                    };
                    staging[nt.source_rank].push(TargetData {
                        source_gid: nt.source_gid,
                        source_lid: nodes.lid_of(nt.source_gid)?,
                        source_tid: vp.thread_of_gid(nt.source_gid) as u32,
                        primary: nt.primary,
                        marker: Marker::None,
                        target: Target::new(nt.tid, my_rank, nt.syn_index, nt.lcid),
                        secondary_send_pos,
                    });
                }
            }

            // encode: data entries, a terminator, zero padding
            let mut send = vec![0u64; num_ranks * chunk_words];
            for (dest, entries) in staging.iter().enumerate() {
                let base = dest * chunk_words;
                let mut pos = base;
                for td in entries {
                    let words = td.to_words();
                    send[pos..pos + TARGET_ENTRY_WORDS].copy_from_slice(&words);
                    pos += TARGET_ENTRY_WORDS;
                }
                let terminator = TargetData::marker_only(if pulled_dry {
                    Marker::Complete
                } else {
                    Marker::End
                });
                send[pos..pos + TARGET_ENTRY_WORDS].copy_from_slice(&terminator.to_words());
            }

            let recv = transport.all_to_all_u64(&send, chunk_words)?;

            for src in 0..num_ranks {
                let base = src * chunk_words;
                for entry in 0..TARGET_CHUNK_ENTRIES {
                    let pos = base + entry * TARGET_ENTRY_WORDS;
                    let words = [recv[pos], recv[pos + 1], recv[pos + 2]];
                    let td = TargetData::from_words(words);
                    if !td.source_gid.is_valid() {
                        break;
                    }
                    self.target_table.add_target(td.source_tid as usize, &td);
                }
            }

            let all_done = transport.all_reduce_min_i64(pulled_dry as i64)? == 1;
            if all_done {
                break;
            }
        }

        self.source_table.clean();
        self.tables_built = true;
        Ok(())
    }
}
