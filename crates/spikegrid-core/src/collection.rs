//! Collections of global node ids
//!
//! Connectivity rules operate on whole populations. A collection is either a
//! contiguous gid range, as produced by node creation, or an explicit list.

use crate::ids::Gid;

/// A set of global node ids, iterated in ascending creation order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GidCollection {
    /// Contiguous inclusive range
    Range {
        /// First gid
        first: Gid,
        /// Last gid, inclusive
        last: Gid,
    },
    /// Explicit list of gids
    List(Vec<Gid>),
}

impl GidCollection {
    /// Build a contiguous range collection
    pub fn range(first: Gid, last: Gid) -> Self {
        debug_assert!(first.raw() <= last.raw());
        Self::Range { first, last }
    }

    /// Build an explicit list collection
    pub fn list(gids: Vec<Gid>) -> Self {
        Self::List(gids)
    }

    /// Number of gids in the collection
    pub fn len(&self) -> usize {
        match self {
            Self::Range { first, last } => (last.raw() - first.raw() + 1) as usize,
            Self::List(gids) => gids.len(),
        }
    }

    /// Whether the collection is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Gid at a position
    pub fn get(&self, index: usize) -> Option<Gid> {
        match self {
            Self::Range { first, last } => {
                let gid = first.raw() as u64 + index as u64;
                if gid <= last.raw() as u64 {
                    Some(Gid::new(gid as u32))
                } else {
                    None
                }
            }
            Self::List(gids) => gids.get(index).copied(),
        }
    }

    /// Position of a gid within the collection
    pub fn position(&self, gid: Gid) -> Option<usize> {
        match self {
            Self::Range { first, last } => {
                if gid.raw() >= first.raw() && gid.raw() <= last.raw() {
                    Some((gid.raw() - first.raw()) as usize)
                } else {
                    None
                }
            }
            Self::List(gids) => gids.iter().position(|&g| g == gid),
        }
    }

    /// Whether the collection contains a gid
    pub fn contains(&self, gid: Gid) -> bool {
        match self {
            Self::Range { first, last } => gid.raw() >= first.raw() && gid.raw() <= last.raw(),
            Self::List(gids) => gids.contains(&gid),
        }
    }

    /// Iterate over the gids in order
    pub fn iter(&self) -> GidIter<'_> {
        GidIter {
            collection: self,
            index: 0,
        }
    }
}

/// Iterator over a [`GidCollection`]
#[derive(Debug)]
pub struct GidIter<'a> {
    collection: &'a GidCollection,
    index: usize,
}

impl Iterator for GidIter<'_> {
    type Item = Gid;

    fn next(&mut self) -> Option<Gid> {
        let gid = self.collection.get(self.index)?;
        self.index += 1;
        Some(gid)
    }
}
