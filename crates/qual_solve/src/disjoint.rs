// ==============================================================================
// Wild-Pointer Partition
// ==============================================================================
//
// Groups wild atoms into equivalence classes by walking the active
// equality edges whose endpoints are both wild, and records for each
// class the first reason that pushed a member to Wild. The diagnostic
// bridge reports one reason per class rather than one per atom.

use std::collections::{BTreeMap, BTreeSet};

use smol_str::SmolStr;

use crate::storage::{AtomId, ConstraintStore};

const UNKNOWN_REASON: &str = "a constraint with no recorded cause";

/// Union-find with union by rank and path compression.
#[derive(Debug, Clone)]
pub(crate) struct UnionFind {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl UnionFind {
    pub(crate) fn new(len: usize) -> Self {
        Self {
            parent: (0..len as u32).collect(),
            rank: vec![0; len],
        }
    }

    pub(crate) fn find(&mut self, x: u32) -> u32 {
        let parent = self.parent[x as usize];
        if parent != x {
            let root = self.find(parent);
            self.parent[x as usize] = root;
            root
        } else {
            x
        }
    }

    pub(crate) fn union(&mut self, a: u32, b: u32) {
        let (a, b) = (self.find(a), self.find(b));
        if a == b {
            return;
        }
        match self.rank[a as usize].cmp(&self.rank[b as usize]) {
            std::cmp::Ordering::Less => self.parent[a as usize] = b,
            std::cmp::Ordering::Greater => self.parent[b as usize] = a,
            std::cmp::Ordering::Equal => {
                self.parent[a as usize] = b;
                self.rank[b as usize] += 1;
            }
        }
    }
}

/// One equivalence class of wild atoms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildClass {
    /// Members in ascending atom order.
    pub members: Vec<AtomId>,
    /// Reason of the lowest member that has one.
    pub reason: SmolStr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildPartition {
    pub classes: Vec<WildClass>,
    pub all_wild: BTreeSet<AtomId>,
}

impl WildPartition {
    pub fn compute(store: &ConstraintStore) -> Self {
        let mut uf = UnionFind::new(store.num_vars());
        for (a, b) in store.active_eq_edges() {
            if store.is_wild(a) && store.is_wild(b) {
                uf.union(a.as_u32(), b.as_u32());
            }
        }

        let all_wild: BTreeSet<AtomId> = store.atom_ids().filter(|&a| store.is_wild(a)).collect();

        let mut by_root: BTreeMap<u32, Vec<AtomId>> = BTreeMap::new();
        for &a in &all_wild {
            by_root.entry(uf.find(a.as_u32())).or_default().push(a);
        }

        let classes = by_root
            .into_values()
            .map(|members| {
                let reason = members
                    .iter()
                    .find_map(|&a| store.wild_reason(a).cloned())
                    .unwrap_or_else(|| SmolStr::new(UNKNOWN_REASON));
                WildClass { members, reason }
            })
            .collect();

        WildPartition { classes, all_wild }
    }

    /// The reason attached to the class containing `atom`, if the atom
    /// is wild.
    pub fn reason_for(&self, atom: AtomId) -> Option<&SmolStr> {
        self.classes
            .iter()
            .find(|c| c.members.binary_search(&atom).is_ok())
            .map(|c| &c.reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ConvertOptions;
    use qual_ty::Qual;

    #[test]
    fn union_find_groups_and_compresses() {
        let mut uf = UnionFind::new(5);
        uf.union(0, 1);
        uf.union(1, 2);
        uf.union(3, 4);
        assert_eq!(uf.find(0), uf.find(2));
        assert_eq!(uf.find(3), uf.find(4));
        assert_ne!(uf.find(0), uf.find(4));
    }

    #[test]
    fn partition_splits_on_non_wild_gaps() {
        let mut cs = ConstraintStore::new(&ConvertOptions::default());
        let a = cs.fresh_var();
        let b = cs.fresh_var();
        let c = cs.fresh_var();
        let d = cs.fresh_var();
        // a—b wild together; c stays Ptr; d wild alone.
        cs.add_eq(a, b);
        cs.add_eq(b, c);
        cs.add_fixed_with_reason(a, Qual::Wild, "cast from int");
        cs.add_fixed_with_reason(d, Qual::Wild, "union member access");
        // Keep c below Wild by not solving: assign by hand.
        cs.set_assignment(a, Qual::Wild);
        cs.set_assignment(b, Qual::Wild);
        cs.set_assignment(d, Qual::Wild);

        let partition = WildPartition::compute(&cs);
        assert_eq!(partition.classes.len(), 2);
        assert_eq!(partition.classes[0].members, vec![a, b]);
        assert_eq!(partition.classes[0].reason, "cast from int");
        assert_eq!(partition.classes[1].members, vec![d]);
        assert_eq!(partition.classes[1].reason, "union member access");
        assert_eq!(partition.reason_for(b).unwrap(), "cast from int");
        assert_eq!(partition.reason_for(c), None);
    }
}
