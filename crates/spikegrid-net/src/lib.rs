//! Synaptic connection infrastructure
//!
//! The two-sided connection store of the simulation kernel: the
//! post-synaptic table of connections indexed by source run, the build-time
//! source table that is inverted into the presynaptic target table, the
//! delay checker guarding the slice length, and the declarative
//! connectivity builders.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod connector;
pub mod delay_checker;
pub mod packed;
pub mod sort;
pub mod source_table;
pub mod store;
pub mod synapses;
pub mod target_table;

pub use builder::{ConnRule, ConnSpec, SynSpec, ValueSpec};
pub use connector::{AnyConnection, Connector, ConnectorVec, SynKind};
pub use delay_checker::DelayChecker;
pub use packed::{Marker, OffGridSpikeData, SpikeData, Target, TargetData};
pub use source_table::{NextTarget, Source, SourceTable};
pub use store::{ConnectionStore, ThreadConnections};
pub use synapses::{RateConnection, StaticSynapse, StdpSynapse};
pub use target_table::TargetTable;
