//! Source-order sorting pass
//!
//! Builders with random draws append connections in arbitrary source order.
//! Before the target tables are built, every `(thread, syn_index)` vector is
//! co-sorted with its source entries by source gid, and the
//! has-subsequent-same-source flags are rebuilt, restoring the contiguity
//! invariant the spike hot path relies on.

use crate::connector::ConnectorVec;
use crate::source_table::Source;

/// Stable permutation sorting `sources` by gid
fn sort_permutation(sources: &[Source]) -> Vec<usize> {
    let mut perm: Vec<usize> = (0..sources.len()).collect();
    perm.sort_by_key(|&i| sources[i].gid);
    perm
}

/// Apply a permutation to a source vector, `perm[new] = old`
fn permute_sources(sources: &mut Vec<Source>, perm: &[usize]) {
    let old = std::mem::take(sources);
    *sources = perm.iter().map(|&i| old[i]).collect();
}

/// Co-sort one slot and its sources by source gid and rebuild the run flags
pub fn sort_slot_by_source(sources: &mut Vec<Source>, slot: &mut ConnectorVec) {
    debug_assert_eq!(sources.len(), slot.len());
    if sources.len() < 2 {
        return;
    }
    let perm = sort_permutation(sources);
    let already_sorted = perm.iter().enumerate().all(|(new, &old)| new == old);
    if !already_sorted {
        permute_sources(sources, &perm);
        slot.permute(&perm);
    }
    rebuild_run_flags(sources, slot);
}

/// Recompute the has-subsequent flags from the sorted sources
pub fn rebuild_run_flags(sources: &[Source], slot: &mut ConnectorVec) {
    for lcid in 0..sources.len() {
        let subsequent =
            lcid + 1 < sources.len() && sources[lcid + 1].gid == sources[lcid].gid;
        slot.set_has_subsequent(lcid, subsequent);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::{AnyConnection, SynKind};
    use crate::synapses::StaticSynapse;
    use spikegrid_core::ids::Gid;

    fn build(gids_weights: &[(u32, f64)]) -> (Vec<Source>, ConnectorVec) {
        let mut sources = Vec::new();
        let mut slot = ConnectorVec::new(SynKind::Static);
        for &(gid, w) in gids_weights {
            sources.push(Source::new(Gid::new(gid), true));
            slot.push(AnyConnection::Static(StaticSynapse::new(0, w, 10)))
                .unwrap();
        }
        (sources, slot)
    }

    #[test]
    fn test_sort_restores_contiguity() {
        let (mut sources, mut slot) = build(&[(5, 1.0), (3, 2.0), (5, 3.0), (3, 4.0)]);
        sort_slot_by_source(&mut sources, &mut slot);

        let gids: Vec<u32> = sources.iter().map(|s| s.gid.raw()).collect();
        assert_eq!(gids, vec![3, 3, 5, 5]);
        // stable: original relative order within equal gids
        assert_eq!(slot.weight(0), 2.0);
        assert_eq!(slot.weight(1), 4.0);
        assert_eq!(slot.weight(2), 1.0);
        assert_eq!(slot.weight(3), 3.0);
    }

    #[test]
    fn test_flags_mark_non_last_run_members() {
        let (mut sources, mut slot) = build(&[(5, 1.0), (3, 2.0), (5, 3.0)]);
        sort_slot_by_source(&mut sources, &mut slot);

        // sorted order is 3, 5, 5
        let gids: Vec<u32> = sources.iter().map(|s| s.gid.raw()).collect();
        assert_eq!(gids, vec![3, 5, 5]);
        assert!(!slot.has_subsequent(0));
        assert!(slot.has_subsequent(1));
        assert!(!slot.has_subsequent(2));
    }

    #[test]
    fn test_sorted_input_untouched() {
        let (mut sources, mut slot) = build(&[(1, 1.0), (1, 2.0), (2, 3.0)]);
        sort_slot_by_source(&mut sources, &mut slot);
        assert_eq!(slot.weight(0), 1.0);
        assert_eq!(slot.weight(1), 2.0);
        assert!(slot.has_subsequent(0));
        assert!(!slot.has_subsequent(1));
        assert!(!slot.has_subsequent(2));
    }
}
