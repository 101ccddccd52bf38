//! Node bookkeeping
//!
//! Metadata for every gid in the network, identical on every rank, plus the
//! per-thread vectors of locally owned node instances. A node on a
//! non-owning rank exists only as its metadata entry; instances are created
//! in gid order, so a node's thread-local id is computable on every rank.

use spikegrid_core::collection::GidCollection;
use spikegrid_core::error::{CoreError, Result};
use spikegrid_core::ids::{Gid, ModelId, Thread};
use spikegrid_core::node::Node;

use crate::registry::ModelRegistry;
use crate::vp::VpManager;

/// Global metadata of one node
#[derive(Debug, Clone, Copy)]
pub struct NodeInfo {
    /// Registered model
    pub model_id: ModelId,
    /// Owning virtual process
    pub vp: u32,
    /// Index on the owning thread's node vector
    pub lid: u32,
}

/// One thread's node instances
#[derive(Debug, Default)]
pub struct ThreadNodes {
    /// Owned instances, indexed by thread-local id
    pub nodes: Vec<Box<dyn Node>>,
    /// Frozen flags, parallel to `nodes`
    pub frozen: Vec<bool>,
    /// Whether a node's input buffers have been sized, parallel to `nodes`
    pub initialized: Vec<bool>,
}

/// All nodes of the network
#[derive(Debug, Default)]
pub struct NodeManager {
    infos: Vec<NodeInfo>,
    threads: Vec<ThreadNodes>,
    per_vp_count: Vec<u32>,
}

impl NodeManager {
    /// Create bookkeeping for the given layout
    pub fn new(vp: &VpManager) -> Self {
        Self {
            infos: Vec::new(),
            threads: (0..vp.num_threads()).map(|_| ThreadNodes::default()).collect(),
            per_vp_count: vec![0; vp.num_vps()],
        }
    }

    /// Number of nodes in the whole network
    pub fn num_nodes(&self) -> usize {
        self.infos.len()
    }

    /// Whether any node exists
    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    /// Create `count` nodes of a model, assigning gids densely
    pub fn add_nodes(
        &mut self,
        registry: &ModelRegistry,
        vp: &VpManager,
        model_id: ModelId,
        count: usize,
    ) -> Result<GidCollection> {
        if count == 0 {
            return Err(CoreError::bad_property("count", "0", "> 0"));
        }
        let first = Gid::new(self.infos.len() as u32 + 1);
        for i in 0..count {
            let gid = Gid::new(first.raw() + i as u32);
            let vpid = vp.vp_of(gid);
            let lid = self.per_vp_count[vpid];
            self.per_vp_count[vpid] += 1;
            self.infos.push(NodeInfo {
                model_id,
                vp: vpid as u32,
                lid,
            });
            if vp.is_local_vp(vpid) {
                let tid = vp.thread_of_vp(vpid);
                let node = registry.create_node(model_id, gid)?;
                debug_assert_eq!(self.threads[tid].nodes.len(), lid as usize);
                self.threads[tid].nodes.push(node);
                self.threads[tid].frozen.push(false);
                self.threads[tid].initialized.push(false);
            }
        }
        let last = Gid::new(first.raw() + count as u32 - 1);
        Ok(GidCollection::range(first, last))
    }

    /// Metadata of a gid
    pub fn info(&self, gid: Gid) -> Result<&NodeInfo> {
        let idx = gid.raw() as usize;
        if idx == 0 || idx > self.infos.len() {
            return Err(CoreError::UnknownNode { gid: gid.raw() });
        }
        Ok(&self.infos[idx - 1])
    }

    /// Whether a gid exists
    pub fn exists(&self, gid: Gid) -> bool {
        let idx = gid.raw() as usize;
        idx >= 1 && idx <= self.infos.len()
    }

    /// Model of a gid
    pub fn model_of(&self, gid: Gid) -> Result<ModelId> {
        Ok(self.info(gid)?.model_id)
    }

    /// Thread-local id of a gid on its owning thread
    pub fn lid_of(&self, gid: Gid) -> Result<u32> {
        Ok(self.info(gid)?.lid)
    }

    /// The local instance of a gid, if this rank owns it
    pub fn local_node_mut(&mut self, vp: &VpManager, gid: Gid) -> Result<Option<&mut Box<dyn Node>>> {
        let info = *self.info(gid)?;
        if !vp.is_local_vp(info.vp as usize) {
            return Ok(None);
        }
        let tid = vp.thread_of_vp(info.vp as usize);
        Ok(self.threads[tid].nodes.get_mut(info.lid as usize))
    }

    /// The local instance of a gid, if this rank owns it
    pub fn local_node(&self, vp: &VpManager, gid: Gid) -> Result<Option<&dyn Node>> {
        let info = *self.info(gid)?;
        if !vp.is_local_vp(info.vp as usize) {
            return Ok(None);
        }
        Ok(self.threads[tid_of(vp, &info)].nodes.get(info.lid as usize).map(|n| n.as_ref()))
    }

    /// Freeze or thaw a node; a no-op on ranks that do not own it
    pub fn set_frozen(&mut self, vp: &VpManager, gid: Gid, frozen: bool) -> Result<()> {
        let info = *self.info(gid)?;
        if vp.is_local_vp(info.vp as usize) {
            let tid = vp.thread_of_vp(info.vp as usize);
            self.threads[tid].frozen[info.lid as usize] = frozen;
        }
        Ok(())
    }

    /// Whether a node is frozen; false on ranks that do not own it
    pub fn is_frozen(&self, vp: &VpManager, gid: Gid) -> Result<bool> {
        let info = *self.info(gid)?;
        if vp.is_local_vp(info.vp as usize) {
            let tid = vp.thread_of_vp(info.vp as usize);
            Ok(self.threads[tid].frozen[info.lid as usize])
        } else {
            Ok(false)
        }
    }

    /// Number of instances owned by one thread
    pub fn local_count(&self, tid: Thread) -> usize {
        self.threads[tid].nodes.len()
    }

    /// One thread's instances
    pub fn thread(&self, tid: Thread) -> &ThreadNodes {
        &self.threads[tid]
    }

    /// All threads' instances, for handing to the parallel region
    pub fn threads_mut(&mut self) -> &mut [ThreadNodes] {
        &mut self.threads
    }
}

fn tid_of(vp: &VpManager, info: &NodeInfo) -> Thread {
    vp.thread_of_vp(info.vp as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dense_gids_and_lids() {
        let vp = VpManager::new(0, 1, 2);
        let registry = ModelRegistry::new();
        let mut nm = NodeManager::new(&vp);
        let model = registry.node_model_id("iaf_neuron").unwrap();

        let c = nm.add_nodes(&registry, &vp, model, 4).unwrap();
        assert_eq!(c.len(), 4);
        assert_eq!(c.get(0), Some(Gid::new(1)));
        assert_eq!(nm.num_nodes(), 4);

        // gids 1, 3 on thread 1; gids 2, 4 on thread 0
        assert_eq!(nm.lid_of(Gid::new(1)).unwrap(), 0);
        assert_eq!(nm.lid_of(Gid::new(3)).unwrap(), 1);
        assert_eq!(nm.lid_of(Gid::new(2)).unwrap(), 0);
        assert_eq!(nm.lid_of(Gid::new(4)).unwrap(), 1);
        assert_eq!(nm.local_count(0), 2);
        assert_eq!(nm.local_count(1), 2);
    }

    #[test]
    fn test_proxies_hold_no_state() {
        // rank 0 of a two-rank layout owns only the even gids
        let vp = VpManager::new(0, 2, 1);
        let registry = ModelRegistry::new();
        let mut nm = NodeManager::new(&vp);
        let model = registry.node_model_id("iaf_neuron").unwrap();

        nm.add_nodes(&registry, &vp, model, 4).unwrap();
        assert_eq!(nm.num_nodes(), 4);
        assert_eq!(nm.local_count(0), 2);
        assert!(nm.local_node(&vp, Gid::new(1)).unwrap().is_none());
        assert!(nm.local_node(&vp, Gid::new(2)).unwrap().is_some());
        // metadata exists for remote gids regardless
        assert_eq!(nm.lid_of(Gid::new(1)).unwrap(), 0);
    }

    #[test]
    fn test_unknown_node() {
        let vp = VpManager::new(0, 1, 1);
        let nm = NodeManager::new(&vp);
        assert!(matches!(
            nm.info(Gid::new(1)).unwrap_err(),
            CoreError::UnknownNode { .. }
        ));
    }

    #[test]
    fn test_frozen_flag() {
        let vp = VpManager::new(0, 1, 1);
        let registry = ModelRegistry::new();
        let mut nm = NodeManager::new(&vp);
        let model = registry.node_model_id("iaf_neuron").unwrap();
        let c = nm.add_nodes(&registry, &vp, model, 1).unwrap();
        let gid = c.get(0).unwrap();

        assert!(!nm.is_frozen(&vp, gid).unwrap());
        nm.set_frozen(&vp, gid, true).unwrap();
        assert!(nm.is_frozen(&vp, gid).unwrap());
    }
}
