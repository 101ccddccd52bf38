//! Slice-wise event delivery
//!
//! Spikes emitted during a slice are collected in per-thread registers,
//! translated through the target table into packed endpoint records,
//! exchanged in fixed per-rank chunks, and applied on the receiving side by
//! walking the connection store. Chunks grow on overflow through the
//! invalid-marker retry protocol. Secondary values travel in a parallel
//! fixed-chunk buffer with precomputed positions.

use parking_lot::{Mutex, RwLock};

use spikegrid_core::error::{CoreError, Result};
use spikegrid_core::event::SpikeEvent;
use spikegrid_core::ids::{Gid, Step};
use spikegrid_core::node::{DeliveryCtx, Node};
use spikegrid_core::ring_buffer::Moduli;
use spikegrid_core::synapse::CommonProps;
use spikegrid_net::packed::{Marker, SpikeData};
use spikegrid_net::store::ThreadConnections;
use spikegrid_net::target_table::TargetTable;

use crate::transport::Transport;
use crate::vp::VpManager;

/// One spike recorded by its emitting thread
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedSpike {
    /// Emitting node
    pub gid: Gid,
    /// Thread-local id of the emitting node
    pub lid: u32,
    /// Step within the slice
    pub lag: u8,
    /// Sub-step offset in milliseconds
    pub offset: f64,
    /// Coincident spike count
    pub multiplicity: u32,
}

/// A spike as seen by the recording log
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSpike {
    /// Emitting node
    pub gid: Gid,
    /// Absolute emission step
    pub step: Step,
    /// Sub-step offset in milliseconds
    pub offset: f64,
    /// Virtual process of the emitter
    pub vp: u32,
}

/// Per-thread collection point for one slice
#[derive(Debug, Default)]
pub struct ThreadRegister {
    /// Spikes emitted this slice
    pub spikes: Vec<EmittedSpike>,
    /// Secondary values staged this slice, `(lid, value)`
    pub secondary: Vec<(u32, f64)>,
}

/// The all-to-all buffers of one process
#[derive(Debug, Default)]
pub struct CommBuffers {
    /// Send buffer, destination-major per-rank chunks
    pub send: Vec<u64>,
    /// Receive buffer of the most recent exchange, source-major
    pub recv: Vec<u64>,
    /// Entries per rank chunk
    pub chunk_entries: usize,
    /// Words per entry of the most recent exchange; 0 before the first
    pub entry_words: usize,
    /// Secondary send buffer, f64 bit patterns
    pub secondary_send: Vec<u64>,
    /// Secondary receive values of the most recent exchange
    pub secondary_recv: Vec<f64>,
    /// Words per rank in the secondary buffers
    pub secondary_chunk: usize,
}

/// Registers, buffers and modulo tables shared across the worker threads
#[derive(Debug)]
pub struct EventDelivery {
    /// One register per thread, locked only by its owner and the master
    pub registers: Vec<Mutex<ThreadRegister>>,
    /// Exchange buffers, written by the master between barriers
    pub buffers: RwLock<CommBuffers>,
    /// Ring-buffer modulo tables, rotated by the master per slice
    pub moduli: RwLock<Moduli>,
}

impl EventDelivery {
    /// Create delivery state for the given thread count
    pub fn new(num_threads: usize) -> Self {
        Self {
            registers: (0..num_threads).map(|_| Mutex::new(ThreadRegister::default())).collect(),
            buffers: RwLock::new(CommBuffers::default()),
            moduli: RwLock::new(Moduli::new(1, 1, 0)),
        }
    }

    /// Initial spike chunk: `max(threads * min_delay, 2)` entries per rank
    pub fn initial_chunk(num_threads: usize, min_delay: usize) -> usize {
        (num_threads * min_delay).max(2)
    }

    /// Size the buffers and tables for a prepared simulation
    pub fn configure(
        &self,
        num_threads: usize,
        num_ranks: usize,
        min_delay: usize,
        max_delay: usize,
        origin: Step,
        secondary_chunk: usize,
    ) {
        *self.moduli.write() = Moduli::new(min_delay, max_delay, origin);
        let mut bufs = self.buffers.write();
        bufs.chunk_entries = Self::initial_chunk(num_threads, min_delay);
        bufs.send.clear();
        bufs.recv.clear();
        bufs.secondary_chunk = secondary_chunk;
        bufs.secondary_send = vec![0; num_ranks * secondary_chunk];
        bufs.secondary_recv = vec![0.0; num_ranks * secondary_chunk];
    }
}

/// Collocate the slice's spikes, exchange them, and publish the receive
/// buffer; master-only, between the update and advance barriers
#[allow(clippy::too_many_arguments)]
pub fn gather_events(
    delivery: &EventDelivery,
    target_table: &TargetTable,
    transport: &dyn Transport,
    vp: &VpManager,
    origin: Step,
    off_grid: bool,
    spike_log: &mut Vec<RecordedSpike>,
) -> Result<()> {
    let num_ranks = transport.num_ranks();
    let num_threads = delivery.registers.len();

    let mut staging: Vec<Vec<(u8, SpikeData, f64)>> = vec![Vec::new(); num_ranks];
    let mut secondary_staged: Vec<(u32, f64)> = Vec::new();

    for tid in 0..num_threads {
        let taken = std::mem::take(&mut *delivery.registers[tid].lock());
        for sp in taken.spikes {
            spike_log.push(RecordedSpike {
                gid: sp.gid,
                step: origin + sp.lag as Step,
                offset: sp.offset,
                vp: vp.vp_of(sp.gid) as u32,
            });
            for t in target_table.targets(tid, sp.lid as usize) {
                let sd = SpikeData::new(t.tid(), t.syn_index(), t.lcid(), sp.lag as usize);
                for _ in 0..sp.multiplicity {
                    staging[t.rank()].push((sp.lag, sd, sp.offset));
                }
            }
        }
        for (lid, value) in taken.secondary {
            for &pos in target_table.secondary_positions(tid, lid as usize) {
                secondary_staged.push((pos, value));
            }
        }
    }

    // lag blocks: stable sort keeps the per-VP emission order within a lag
    for entries in &mut staging {
        entries.sort_by_key(|e| e.0);
    }

    let entry_words = if off_grid { 2 } else { 1 };
    let mut bufs = delivery.buffers.write();
    bufs.entry_words = entry_words;
    loop {
        let chunk_entries = bufs.chunk_entries;
        let chunk_words = chunk_entries * entry_words;
        bufs.send.clear();
        bufs.send.resize(num_ranks * chunk_words, 0);

        let capacity = chunk_entries - 1;
        let mut overflow = false;
        for (dest, entries) in staging.iter().enumerate() {
            let n = entries.len().min(capacity);
            if entries.len() > capacity {
                overflow = true;
            }
            let base = dest * chunk_words;
            for (i, &(lag, sd, offset)) in entries[..n].iter().enumerate() {
                let mut sd = sd;
                let last_of_block = i + 1 == n || entries[i + 1].0 != lag;
                if last_of_block {
                    sd.set_marker(Marker::End);
                }
                let pos = base + i * entry_words;
                bufs.send[pos] = sd.0;
                if off_grid {
                    bufs.send[pos + 1] = offset.to_bits();
                }
            }
            let mut terminator = SpikeData::default();
            terminator.set_marker(if entries.len() > capacity {
                Marker::Invalid
            } else {
                Marker::Complete
            });
            let pos = base + n * entry_words;
            bufs.send[pos] = terminator.0;
        }

        let recv = transport.all_to_all_u64(&bufs.send, chunk_words)?;

        let needed = staging.iter().map(Vec::len).max().unwrap_or(0) + 1;
        let global_needed = transport.all_reduce_max_u64(needed as u64)? as usize;
        if !overflow && global_needed <= chunk_entries {
            bufs.recv = recv;
            break;
        }
        bufs.chunk_entries = global_needed.next_power_of_two();
    }

    if bufs.secondary_chunk > 0 {
        bufs.secondary_send.iter_mut().for_each(|w| *w = 0);
        for &(pos, value) in &secondary_staged {
            bufs.secondary_send[pos as usize] = value.to_bits();
        }
        let recv = transport.all_to_all_u64(&bufs.secondary_send, bufs.secondary_chunk)?;
        bufs.secondary_recv = recv.into_iter().map(f64::from_bits).collect();
    }

    Ok(())
}

/// Apply the receive buffer to one thread's connections; worker-side, at
/// the first sub-slice of every slice
///
/// The entry width comes from the buffer itself, so a toggle of the
/// off-grid switch between runs cannot misalign the decode.
#[allow(clippy::too_many_arguments)]
pub fn deliver_events(
    tid: usize,
    bufs: &CommBuffers,
    conn: &mut ThreadConnections,
    nodes: &mut [Box<dyn Node>],
    ctx: &DeliveryCtx,
    common: &[CommonProps],
    min_delay: usize,
    num_ranks: usize,
) -> Result<()> {
    let entry_words = bufs.entry_words;
    let chunk_words = bufs.chunk_entries * entry_words;
    if entry_words > 0 && bufs.recv.len() == num_ranks * chunk_words {
        for src in 0..num_ranks {
            let base = src * chunk_words;
            for e in 0..bufs.chunk_entries {
                let pos = base + e * entry_words;
                let sd = SpikeData(bufs.recv[pos]);
                match sd.marker() {
                    Marker::Complete => break,
                    Marker::Invalid => {
                        return Err(CoreError::kernel(
                            "invalid marker survived the exchange retry",
                        ))
                    }
                    _ => {}
                }
                if sd.tid() != tid {
                    continue;
                }
                let offset = if entry_words == 2 {
                    f64::from_bits(bufs.recv[pos + 1])
                } else {
                    0.0
                };
                let mut ev =
                    SpikeEvent::new(Gid::INVALID, ctx.origin - min_delay as Step + sd.lag() as Step);
                ev.offset = offset;
                let syn_id = conn.get_syn_id(sd.syn_index());
                let cp = &common[syn_id.raw() as usize];
                conn.send(sd.syn_index(), sd.lcid(), &mut ev, nodes, ctx, cp);
            }
        }
    }

    if !bufs.secondary_recv.is_empty() {
        conn.deliver_secondary(&bufs.secondary_recv, nodes);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;
    use spikegrid_net::packed::Target;

    #[test]
    fn test_initial_chunk_formula() {
        assert_eq!(EventDelivery::initial_chunk(2, 10), 20);
        assert_eq!(EventDelivery::initial_chunk(1, 1), 2);
    }

    #[test]
    fn test_gather_round_trip_single_rank() {
        let delivery = EventDelivery::new(1);
        delivery.configure(1, 1, 10, 10, 0, 0);

        let mut tt = TargetTable::new(1);
        tt.prepare(0, 1);
        tt.add_target(
            0,
            &spikegrid_net::packed::TargetData {
                source_gid: Gid::new(1),
                source_lid: 0,
                source_tid: 0,
                primary: true,
                marker: Marker::None,
                target: Target::new(0, 0, 0, 3),
                secondary_send_pos: 0,
            },
        );

        delivery.registers[0].lock().spikes.push(EmittedSpike {
            gid: Gid::new(1),
            lid: 0,
            lag: 4,
            offset: 0.0,
            multiplicity: 1,
        });

        let transport = LocalTransport;
        let vp = VpManager::new(0, 1, 1);
        let mut log = Vec::new();
        gather_events(&delivery, &tt, &transport, &vp, 0, false, &mut log).unwrap();

        assert_eq!(log.len(), 1);
        assert_eq!(log[0].step, 4);

        let bufs = delivery.buffers.read();
        // first entry is the routed spike, closing its lag block
        let sd = SpikeData(bufs.recv[0]);
        assert_eq!(sd.lcid(), 3);
        assert_eq!(sd.lag(), 4);
        assert_eq!(sd.marker(), Marker::End);
        // the terminator follows
        let term = SpikeData(bufs.recv[1]);
        assert_eq!(term.marker(), Marker::Complete);
    }

    #[test]
    fn test_gather_grows_chunk_on_overflow() {
        let delivery = EventDelivery::new(1);
        delivery.configure(1, 1, 1, 1, 0, 0);
        assert_eq!(delivery.buffers.read().chunk_entries, 2);

        let mut tt = TargetTable::new(1);
        tt.prepare(0, 1);
        for lcid in 0..8 {
            tt.add_target(
                0,
                &spikegrid_net::packed::TargetData {
                    source_gid: Gid::new(1),
                    source_lid: 0,
                    source_tid: 0,
                    primary: true,
                    marker: Marker::None,
                    target: Target::new(0, 0, 0, lcid),
                    secondary_send_pos: 0,
                },
            );
        }
        delivery.registers[0].lock().spikes.push(EmittedSpike {
            gid: Gid::new(1),
            lid: 0,
            lag: 0,
            offset: 0.0,
            multiplicity: 1,
        });

        let transport = LocalTransport;
        let vp = VpManager::new(0, 1, 1);
        let mut log = Vec::new();
        gather_events(&delivery, &tt, &transport, &vp, 0, false, &mut log).unwrap();

        let bufs = delivery.buffers.read();
        assert!(bufs.chunk_entries >= 9, "chunk must grow past the overflow");
        // all eight endpoints survived the retry
        let mut count = 0;
        for e in 0..bufs.chunk_entries {
            let sd = SpikeData(bufs.recv[e]);
            if sd.marker() == Marker::Complete {
                break;
            }
            count += 1;
        }
        assert_eq!(count, 8);
    }
}
