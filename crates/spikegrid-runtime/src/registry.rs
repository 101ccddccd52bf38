//! Model registry
//!
//! Maps model names to factories with dense small ids. `copy_model` clones
//! an entry under a new name with default parameter overrides, so copies
//! share code but not defaults. Node and synapse models live in separate
//! namespaces; names must be unique across both.

use std::collections::BTreeMap;

use spikegrid_core::error::{CoreError, Result};
use spikegrid_core::ids::{Gid, ModelId, SynId};
use spikegrid_core::node::Node;
use spikegrid_core::status::StatusDict;
use spikegrid_core::synapse::{CommonProps, Connection, SynCaps};
use spikegrid_net::connector::{AnyConnection, SynKind};
use spikegrid_net::synapses::{RateConnection, StaticSynapse, StdpSynapse};

use crate::models::{IafNeuron, IafPscDeltaCanon, LinRateNeuron, SpikeGenerator};

/// The closed set of node implementations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Grid-based leaky integrate-and-fire neuron
    IafNeuron,
    /// Off-grid leaky integrate-and-fire neuron
    IafPscDeltaCanon,
    /// Scripted spike source
    SpikeGenerator,
    /// Linear rate unit
    LinRate,
}

impl NodeKind {
    /// Whether instances are represented by proxies on non-owning ranks
    pub fn has_proxies(&self) -> bool {
        true
    }

    /// Whether instances emit sub-step-precise spike times
    pub fn is_off_grid(&self) -> bool {
        matches!(self, Self::IafPscDeltaCanon)
    }

    /// Whether instances accept primary spike events
    pub fn accepts_spikes(&self) -> bool {
        matches!(self, Self::IafNeuron | Self::IafPscDeltaCanon)
    }

    /// Whether instances accept secondary rate events
    pub fn accepts_rates(&self) -> bool {
        matches!(self, Self::LinRate)
    }

    /// Whether instances publish a secondary value each slice
    pub fn sends_secondary(&self) -> bool {
        matches!(self, Self::LinRate)
    }

    /// Whether instances provide the given receptor port
    pub fn handles_receptor(&self, port: u32) -> bool {
        port == 0
    }
}

/// A registered node model
#[derive(Debug, Clone)]
pub struct NodeModel {
    /// Registered name
    pub name: String,
    /// Implementation
    pub kind: NodeKind,
    /// Default parameter overrides applied at creation
    pub defaults: StatusDict,
}

/// A registered synapse model
#[derive(Debug, Clone)]
pub struct SynapseModel {
    /// Registered name
    pub name: String,
    /// Implementation
    pub kind: SynKind,
    /// Default parameter overrides applied at creation
    pub defaults: StatusDict,
    /// Capability set
    pub caps: SynCaps,
    /// Properties shared by all connections of this model
    pub common: CommonProps,
}

/// Name-to-factory registry for node and synapse models
#[derive(Debug)]
pub struct ModelRegistry {
    node_models: Vec<NodeModel>,
    node_ids: BTreeMap<String, ModelId>,
    syn_models: Vec<SynapseModel>,
    syn_ids: BTreeMap<String, SynId>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelRegistry {
    /// Create a registry with the built-in models registered
    pub fn new() -> Self {
        let mut registry = Self {
            node_models: Vec::new(),
            node_ids: BTreeMap::new(),
            syn_models: Vec::new(),
            syn_ids: BTreeMap::new(),
        };
        registry
            .register_node_model("iaf_neuron", NodeKind::IafNeuron, StatusDict::new())
            .expect("builtin registration");
        registry
            .register_node_model(
                "iaf_psc_delta_canon",
                NodeKind::IafPscDeltaCanon,
                StatusDict::new(),
            )
            .expect("builtin registration");
        registry
            .register_node_model("spike_generator", NodeKind::SpikeGenerator, StatusDict::new())
            .expect("builtin registration");
        registry
            .register_node_model("lin_rate", NodeKind::LinRate, StatusDict::new())
            .expect("builtin registration");
        registry
            .register_syn_model("static_synapse", SynKind::Static, StatusDict::new(), SynCaps::primary())
            .expect("builtin registration");
        registry
            .register_syn_model("stdp_synapse", SynKind::Stdp, StatusDict::new(), SynCaps::primary())
            .expect("builtin registration");
        registry
            .register_syn_model(
                "rate_connection",
                SynKind::Rate,
                StatusDict::new(),
                SynCaps::secondary(),
            )
            .expect("builtin registration");
        registry
    }

    fn name_in_use(&self, name: &str) -> bool {
        self.node_ids.contains_key(name) || self.syn_ids.contains_key(name)
    }

    /// Register a node model under a fresh name
    pub fn register_node_model(
        &mut self,
        name: &str,
        kind: NodeKind,
        defaults: StatusDict,
    ) -> Result<ModelId> {
        if self.name_in_use(name) {
            return Err(CoreError::NamingConflict {
                name: name.to_string(),
            });
        }
        let id = ModelId::new(self.node_models.len() as u16);
        self.node_models.push(NodeModel {
            name: name.to_string(),
            kind,
            defaults,
        });
        self.node_ids.insert(name.to_string(), id);
        Ok(id)
    }

    /// Register a synapse model under a fresh name
    pub fn register_syn_model(
        &mut self,
        name: &str,
        kind: SynKind,
        defaults: StatusDict,
        caps: SynCaps,
    ) -> Result<SynId> {
        if self.name_in_use(name) {
            return Err(CoreError::NamingConflict {
                name: name.to_string(),
            });
        }
        let id = SynId::new(self.syn_models.len() as u8);
        self.syn_models.push(SynapseModel {
            name: name.to_string(),
            kind,
            defaults,
            caps,
            common: CommonProps::default(),
        });
        self.syn_ids.insert(name.to_string(), id);
        Ok(id)
    }

    /// Look up a node model id
    pub fn node_model_id(&self, name: &str) -> Result<ModelId> {
        self.node_ids
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::UnknownModel {
                name: name.to_string(),
            })
    }

    /// Look up a synapse model id
    pub fn syn_model_id(&self, name: &str) -> Result<SynId> {
        self.syn_ids
            .get(name)
            .copied()
            .ok_or_else(|| CoreError::UnknownModel {
                name: name.to_string(),
            })
    }

    /// A registered node model
    pub fn node_model(&self, id: ModelId) -> &NodeModel {
        &self.node_models[id.raw() as usize]
    }

    /// A registered synapse model
    pub fn syn_model(&self, id: SynId) -> &SynapseModel {
        &self.syn_models[id.raw() as usize]
    }

    /// Number of registered node models
    pub fn num_node_models(&self) -> usize {
        self.node_models.len()
    }

    /// Number of registered synapse models
    pub fn num_syn_models(&self) -> usize {
        self.syn_models.len()
    }

    /// Clone a model under a new name with default overrides
    ///
    /// Works for node and synapse models alike; the new name must be free
    /// in both namespaces.
    pub fn copy_model(&mut self, existing: &str, new_name: &str, overrides: StatusDict) -> Result<()> {
        if self.name_in_use(new_name) {
            return Err(CoreError::NamingConflict {
                name: new_name.to_string(),
            });
        }
        if let Some(&id) = self.node_ids.get(existing) {
            let mut defaults = self.node_models[id.raw() as usize].defaults.clone();
            defaults.merge_from(&overrides);
            let kind = self.node_models[id.raw() as usize].kind;
            self.register_node_model(new_name, kind, defaults)?;
            return Ok(());
        }
        if let Some(&id) = self.syn_ids.get(existing) {
            let entry = self.syn_models[id.raw() as usize].clone();
            let mut defaults = entry.defaults;
            defaults.merge_from(&overrides);
            let new_id = self.register_syn_model(new_name, entry.kind, defaults, entry.caps)?;
            self.syn_models[new_id.raw() as usize].common = entry.common;
            return Ok(());
        }
        Err(CoreError::UnknownModel {
            name: existing.to_string(),
        })
    }

    /// Instantiate a node of a registered model
    pub fn create_node(&self, id: ModelId, gid: Gid) -> Result<Box<dyn Node>> {
        let entry = self.node_model(id);
        let mut node: Box<dyn Node> = match entry.kind {
            NodeKind::IafNeuron => Box::new(IafNeuron::new(gid)),
            NodeKind::IafPscDeltaCanon => Box::new(IafPscDeltaCanon::new(gid)),
            NodeKind::SpikeGenerator => Box::new(SpikeGenerator::new(gid)),
            NodeKind::LinRate => Box::new(LinRateNeuron::new(gid)),
        };
        node.set_status(&entry.defaults)?;
        entry.defaults.clear_access_flags();
        Ok(node)
    }

    /// Instantiate a connection of a registered synapse model
    pub fn create_connection(
        &self,
        id: SynId,
        target_lid: usize,
        weight: f64,
        delay_steps: u32,
        receptor: u32,
        params: &StatusDict,
    ) -> Result<AnyConnection> {
        let entry = self.syn_model(id);
        let mut conn = match entry.kind {
            SynKind::Static => AnyConnection::Static(StaticSynapse::new(target_lid, weight, delay_steps)),
            SynKind::Stdp => AnyConnection::Stdp(StdpSynapse::new(target_lid, weight, delay_steps)),
            SynKind::Rate => AnyConnection::Rate(RateConnection::new(target_lid, weight, delay_steps)),
        };
        let mut apply = |dict: &StatusDict, c: &mut AnyConnection| -> Result<()> {
            let r = match c {
                AnyConnection::Static(s) => s.set_status(dict),
                AnyConnection::Stdp(s) => s.set_status(dict),
                AnyConnection::Rate(s) => s.set_status(dict),
            };
            dict.clear_access_flags();
            r
        };
        apply(&entry.defaults, &mut conn)?;
        apply(params, &mut conn)?;
        // the explicit arguments always win over dictionary entries
        let fix = |c: &mut AnyConnection| match c {
            AnyConnection::Static(s) => {
                s.weight = weight;
                s.delay = delay_steps;
                s.port = receptor;
            }
            AnyConnection::Stdp(s) => {
                s.weight = weight;
                s.delay = delay_steps;
                s.port = receptor;
            }
            AnyConnection::Rate(s) => {
                s.weight = weight;
                s.delay = delay_steps;
                s.port = receptor;
            }
        };
        fix(&mut conn);
        Ok(conn)
    }
}
