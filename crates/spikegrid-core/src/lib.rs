//! Core types for the spikegrid simulation kernel
//!
//! This crate provides the building blocks shared by the connection
//! infrastructure and the runtime: the integer time grid, spike and rate
//! events, target-side ring buffers, status dictionaries, and the node and
//! synapse contracts every model implements.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod collection;
pub mod error;
pub mod event;
pub mod ids;
pub mod node;
pub mod ring_buffer;
pub mod status;
pub mod synapse;
pub mod time;

pub use collection::GidCollection;
pub use error::{CoreError, Result};
pub use event::{RateEvent, SpikeEvent};
pub use ids::{Gid, Lcid, ModelId, Step, SynId, Thread};
pub use node::{DeliveryCtx, Emission, Node, SpikeSink};
pub use ring_buffer::{Moduli, RingBuffer, SliceRingBuffer, SpikeOccurrence};
pub use status::{StatusDict, StatusValue};
pub use synapse::{CommonProps, Connection, SpikeCount, SynCaps};
pub use time::TimeGrid;

/// Core crate version for compatibility checking
pub const CORE_VERSION: u32 = 1;
