//! Random number generators
//!
//! One generator per virtual process, owned by the VP's thread, plus one
//! global generator whose state must stay synchronized across all ranks.
//! Connectivity draws use the target VP's generator so parallel
//! construction is deterministic for a fixed layout and seed vector.

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use spikegrid_core::error::{CoreError, Result};

use crate::vp::VpManager;

/// The per-VP and global generators of one process
#[derive(Debug)]
pub struct RngManager {
    seeds: Vec<u64>,
    rngs: Vec<Option<StdRng>>,
    grng_seed: u64,
    grng: StdRng,
}

impl RngManager {
    /// Create generators for the given layout with the default seed vector
    pub fn new(vp: &VpManager) -> Self {
        let num_vps = vp.num_vps();
        let seeds: Vec<u64> = (0..num_vps as u64).map(|i| i + 1).collect();
        let grng_seed = num_vps as u64 + 1;
        let mut mgr = Self {
            seeds,
            rngs: Vec::new(),
            grng_seed,
            grng: StdRng::seed_from_u64(grng_seed),
        };
        mgr.reinit(vp);
        mgr
    }

    /// Re-create every generator from the stored seeds
    pub fn reinit(&mut self, vp: &VpManager) {
        let num_vps = vp.num_vps();
        if self.seeds.len() != num_vps {
            self.seeds = (0..num_vps as u64).map(|i| i + 1).collect();
            self.grng_seed = num_vps as u64 + 1;
        }
        self.rngs = (0..num_vps)
            .map(|v| {
                if vp.is_local_vp(v) {
                    Some(StdRng::seed_from_u64(self.seeds[v]))
                } else {
                    None
                }
            })
            .collect();
        self.grng = StdRng::seed_from_u64(self.grng_seed);
    }

    /// The current seed vector
    pub fn seeds(&self) -> &[u64] {
        &self.seeds
    }

    /// The current global seed
    pub fn grng_seed(&self) -> u64 {
        self.grng_seed
    }

    /// Seed every VP generator; the vector length must equal V
    pub fn set_seeds(&mut self, seeds: Vec<u64>, vp: &VpManager) -> Result<()> {
        if seeds.len() != vp.num_vps() {
            return Err(CoreError::dimension_mismatch(
                "rng_seeds",
                seeds.len(),
                vp.num_vps(),
            ));
        }
        if seeds.contains(&self.grng_seed) {
            log::warn!(
                "an rng_seeds entry equals grng_seed {}; streams may overlap",
                self.grng_seed
            );
        }
        self.seeds = seeds;
        self.reinit(vp);
        Ok(())
    }

    /// Seed the global generator
    pub fn set_grng_seed(&mut self, seed: u64, vp: &VpManager) -> Result<()> {
        if self.seeds.contains(&seed) {
            log::warn!("grng_seed {} duplicates an rng_seeds entry; streams may overlap", seed);
        }
        self.grng_seed = seed;
        self.reinit(vp);
        Ok(())
    }

    /// The generator of a local VP
    pub fn vp_rng(&mut self, vp: usize) -> &mut StdRng {
        self.rngs[vp]
            .as_mut()
            .expect("RNG requested for a non-local virtual process")
    }

    /// The global generator
    pub fn grng(&mut self) -> &mut StdRng {
        &mut self.grng
    }

    /// Draw one word from the global generator, advancing it
    ///
    /// All ranks call this at the same points; an all-reduce over the drawn
    /// value detects divergence of the global stream.
    pub fn grng_sync_token(&mut self) -> u64 {
        self.grng.next_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_default_seed_vector() {
        let vp = VpManager::new(0, 1, 2);
        let rng = RngManager::new(&vp);
        assert_eq!(rng.seeds(), &[1, 2]);
        assert_eq!(rng.grng_seed(), 3);
    }

    #[test]
    fn test_seed_length_checked() {
        let vp = VpManager::new(0, 1, 2);
        let mut rng = RngManager::new(&vp);
        let err = rng.set_seeds(vec![1, 2, 3], &vp).unwrap_err();
        assert!(matches!(err, CoreError::DimensionMismatch { .. }));
        rng.set_seeds(vec![10, 20], &vp).unwrap();
        assert_eq!(rng.seeds(), &[10, 20]);
    }

    #[test]
    fn test_only_local_vps_have_generators() {
        let vp = VpManager::new(0, 2, 1);
        let mut rng = RngManager::new(&vp);
        // vp 0 is local to rank 0
        let _ = rng.vp_rng(0).gen::<u64>();
    }

    #[test]
    #[should_panic(expected = "non-local")]
    fn test_remote_vp_rng_panics() {
        let vp = VpManager::new(0, 2, 1);
        let mut rng = RngManager::new(&vp);
        let _ = rng.vp_rng(1);
    }

    #[test]
    fn test_reseeding_is_deterministic() {
        let vp = VpManager::new(0, 1, 1);
        let mut a = RngManager::new(&vp);
        let mut b = RngManager::new(&vp);
        a.set_seeds(vec![12345], &vp).unwrap();
        b.set_seeds(vec![12345], &vp).unwrap();
        let xa: Vec<u64> = (0..4).map(|_| a.vp_rng(0).gen()).collect();
        let xb: Vec<u64> = (0..4).map(|_| b.vp_rng(0).gen()).collect();
        assert_eq!(xa, xb);
    }

    #[test]
    fn test_sync_token_advances() {
        let vp = VpManager::new(0, 1, 1);
        let mut rng = RngManager::new(&vp);
        let t1 = rng.grng_sync_token();
        let t2 = rng.grng_sync_token();
        assert_ne!(t1, t2);
    }
}
