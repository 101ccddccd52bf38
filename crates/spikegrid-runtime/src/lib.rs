//! Simulation runtime for spikegrid
//!
//! This crate assembles the simulation kernel: the explicit `Kernel` value
//! owned by the caller, the virtual-process layout, node and model
//! bookkeeping, per-VP random number generators, the exchange transport,
//! slice-wise event delivery, and the barrier-synchronized scheduler.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod connection_manager;
pub mod delivery;
pub mod kernel;
pub mod models;
pub mod node_manager;
pub mod registry;
pub mod rng;
pub mod scheduler;
pub mod transport;
pub mod vp;

pub use delivery::RecordedSpike;
pub use kernel::{Kernel, KernelConfig};
pub use scheduler::{Phase, SimulationResult};
pub use transport::{LocalTransport, MemCluster, Transport};

// Re-export the public surface of the lower layers
pub use spikegrid_core::{
    CoreError, Gid, GidCollection, Result, StatusDict, StatusValue, TimeGrid,
};
pub use spikegrid_net::{ConnRule, ConnSpec, SynSpec, ValueSpec};

/// Runtime crate version for compatibility checking
pub const RUNTIME_VERSION: u32 = 1;
