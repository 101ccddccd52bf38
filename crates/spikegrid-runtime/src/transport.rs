//! Exchange transport
//!
//! The kernel specifies *what* is exchanged between ranks, not how. This
//! module carries the two collective operations the scheduler needs: a
//! blocking all-to-all over fixed per-rank chunks and scalar all-reduces.
//! `LocalTransport` serves the single-process case; `MemCluster` connects
//! several in-process kernels for multi-rank runs and tests.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use spikegrid_core::error::{CoreError, Result};

/// Blocking collectives between the ranks of a simulation
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// This process's rank
    fn rank(&self) -> usize;

    /// Number of participating ranks
    fn num_ranks(&self) -> usize;

    /// Exchange fixed-size per-rank chunks of words
    ///
    /// `send` holds `num_ranks` chunks of `chunk_words` each, destination
    /// major. The returned buffer holds one chunk per source rank.
    fn all_to_all_u64(&self, send: &[u64], chunk_words: usize) -> Result<Vec<u64>>;

    /// Minimum of a signed scalar across ranks
    fn all_reduce_min_i64(&self, value: i64) -> Result<i64>;

    /// Maximum of a signed scalar across ranks
    fn all_reduce_max_i64(&self, value: i64) -> Result<i64>;

    /// Maximum of an unsigned scalar across ranks
    fn all_reduce_max_u64(&self, value: u64) -> Result<u64>;
}

/// Single-rank transport: every collective is a local copy
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalTransport;

impl Transport for LocalTransport {
    fn rank(&self) -> usize {
        0
    }

    fn num_ranks(&self) -> usize {
        1
    }

    fn all_to_all_u64(&self, send: &[u64], chunk_words: usize) -> Result<Vec<u64>> {
        if send.len() != chunk_words {
            return Err(CoreError::transport(format!(
                "all-to-all buffer holds {} words, expected {}",
                send.len(),
                chunk_words
            )));
        }
        Ok(send.to_vec())
    }

    fn all_reduce_min_i64(&self, value: i64) -> Result<i64> {
        Ok(value)
    }

    fn all_reduce_max_i64(&self, value: i64) -> Result<i64> {
        Ok(value)
    }

    fn all_reduce_max_u64(&self, value: u64) -> Result<u64> {
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    AllToAll { chunk_words: usize },
    MinI64,
    MaxI64,
    MaxU64,
}

#[derive(Debug)]
struct RoundState {
    round: u64,
    arrived: usize,
    op: Option<Op>,
    contribs: Vec<Option<Vec<u64>>>,
    outputs: Vec<Vec<u64>>,
    poisoned: bool,
}

#[derive(Debug)]
struct Shared {
    num_ranks: usize,
    state: Mutex<RoundState>,
    cv: Condvar,
}

/// One endpoint of an in-process rank group
///
/// All endpoints must issue the same sequence of collectives; a mismatch
/// poisons the group and every blocked call returns a transport error.
#[derive(Debug, Clone)]
pub struct MemTransport {
    shared: Arc<Shared>,
    rank: usize,
}

/// Builder for in-process rank groups
#[derive(Debug, Clone, Copy)]
pub struct MemCluster;

impl MemCluster {
    /// Create `num_ranks` connected endpoints
    pub fn endpoints(num_ranks: usize) -> Vec<MemTransport> {
        assert!(num_ranks >= 1);
        let shared = Arc::new(Shared {
            num_ranks,
            state: Mutex::new(RoundState {
                round: 0,
                arrived: 0,
                op: None,
                contribs: vec![None; num_ranks],
                outputs: vec![Vec::new(); num_ranks],
                poisoned: false,
            }),
            cv: Condvar::new(),
        });
        (0..num_ranks)
            .map(|rank| MemTransport {
                shared: shared.clone(),
                rank,
            })
            .collect()
    }
}

impl MemTransport {
    fn collect(&self, op: Op, payload: Vec<u64>) -> Result<Vec<u64>> {
        let n = self.shared.num_ranks;
        let mut state = self.shared.state.lock();
        if state.poisoned {
            return Err(CoreError::transport("rank group is poisoned"));
        }
        match state.op {
            None => state.op = Some(op),
            Some(active) if active == op => {}
            Some(active) => {
                state.poisoned = true;
                self.shared.cv.notify_all();
                return Err(CoreError::transport(format!(
                    "collective mismatch: rank {} issued {:?} while {:?} is active",
                    self.rank, op, active
                )));
            }
        }

        let my_round = state.round;
        state.contribs[self.rank] = Some(payload);
        state.arrived += 1;

        if state.arrived == n {
            let contribs: Vec<Vec<u64>> = state
                .contribs
                .iter_mut()
                .map(|c| c.take().unwrap_or_default())
                .collect();
            state.outputs = match op {
                Op::AllToAll { chunk_words } => {
                    for (src, c) in contribs.iter().enumerate() {
                        if c.len() != n * chunk_words {
                            state.poisoned = true;
                            self.shared.cv.notify_all();
                            return Err(CoreError::transport(format!(
                                "rank {} contributed {} words, expected {}",
                                src,
                                c.len(),
                                n * chunk_words
                            )));
                        }
                    }
                    (0..n)
                        .map(|dest| {
                            let mut out = Vec::with_capacity(n * chunk_words);
                            for c in &contribs {
                                out.extend_from_slice(
                                    &c[dest * chunk_words..(dest + 1) * chunk_words],
                                );
                            }
                            out
                        })
                        .collect()
                }
                Op::MinI64 => {
                    let v = contribs.iter().map(|c| c[0] as i64).min().unwrap_or(0);
                    vec![vec![v as u64]; n]
                }
                Op::MaxI64 => {
                    let v = contribs.iter().map(|c| c[0] as i64).max().unwrap_or(0);
                    vec![vec![v as u64]; n]
                }
                Op::MaxU64 => {
                    let v = contribs.iter().map(|c| c[0]).max().unwrap_or(0);
                    vec![vec![v]; n]
                }
            };
            state.arrived = 0;
            state.op = None;
            state.round += 1;
            self.shared.cv.notify_all();
        } else {
            while state.round == my_round && !state.poisoned {
                self.shared.cv.wait(&mut state);
            }
            if state.poisoned {
                return Err(CoreError::transport("rank group is poisoned"));
            }
        }

        Ok(state.outputs[self.rank].clone())
    }
}

impl Transport for MemTransport {
    fn rank(&self) -> usize {
        self.rank
    }

    fn num_ranks(&self) -> usize {
        self.shared.num_ranks
    }

    fn all_to_all_u64(&self, send: &[u64], chunk_words: usize) -> Result<Vec<u64>> {
        self.collect(Op::AllToAll { chunk_words }, send.to_vec())
    }

    fn all_reduce_min_i64(&self, value: i64) -> Result<i64> {
        let out = self.collect(Op::MinI64, vec![value as u64])?;
        Ok(out[0] as i64)
    }

    fn all_reduce_max_i64(&self, value: i64) -> Result<i64> {
        let out = self.collect(Op::MaxI64, vec![value as u64])?;
        Ok(out[0] as i64)
    }

    fn all_reduce_max_u64(&self, value: u64) -> Result<u64> {
        let out = self.collect(Op::MaxU64, vec![value])?;
        Ok(out[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_local_transport() {
        let t = LocalTransport;
        assert_eq!(t.num_ranks(), 1);
        let out = t.all_to_all_u64(&[1, 2, 3], 3).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
        assert!(t.all_to_all_u64(&[1, 2], 3).is_err());
        assert_eq!(t.all_reduce_min_i64(-5).unwrap(), -5);
    }

    #[test]
    fn test_mem_cluster_all_to_all() {
        let endpoints = MemCluster::endpoints(2);
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|t| {
                thread::spawn(move || {
                    let r = t.rank() as u64;
                    // two chunks of two words, destination major
                    let send = vec![10 * r, 10 * r + 1, 10 * r + 2, 10 * r + 3];
                    t.all_to_all_u64(&send, 2).unwrap()
                })
            })
            .collect();
        let results: Vec<Vec<u64>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        // rank 0 receives chunk 0 of each source
        assert_eq!(results[0], vec![0, 1, 10, 11]);
        // rank 1 receives chunk 1 of each source
        assert_eq!(results[1], vec![2, 3, 12, 13]);
    }

    #[test]
    fn test_mem_cluster_reduce() {
        let endpoints = MemCluster::endpoints(3);
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|t| {
                thread::spawn(move || {
                    let v = t.rank() as i64 - 1;
                    (
                        t.all_reduce_min_i64(v).unwrap(),
                        t.all_reduce_max_i64(v).unwrap(),
                    )
                })
            })
            .collect();
        for h in handles {
            let (min, max) = h.join().unwrap();
            assert_eq!(min, -1);
            assert_eq!(max, 1);
        }
    }

    #[test]
    fn test_mem_cluster_repeated_rounds() {
        let endpoints = MemCluster::endpoints(2);
        let handles: Vec<_> = endpoints
            .into_iter()
            .map(|t| {
                thread::spawn(move || {
                    let mut acc = Vec::new();
                    for round in 0..5u64 {
                        let out = t.all_reduce_max_u64(round * 2 + t.rank() as u64).unwrap();
                        acc.push(out);
                    }
                    acc
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), vec![1, 3, 5, 7, 9]);
        }
    }
}
