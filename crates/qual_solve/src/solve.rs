// ==============================================================================
// Monotone Worklist Solver
// ==============================================================================
//
// Drives the environment to the least fixed point consistent with the
// constraint set. The first round applies every fixed constraint; each
// following round drains the atoms raised by the previous one,
// propagating along active equality edges and along implication edges
// whose guard is met. Joins in a finite-height lattice make the result
// independent of worklist order, so no tie-breaking is exposed.
//
// The solver is total: Wild absorbs everything, so there is no failure
// channel.

use crate::storage::{AtomId, ConstraintStore};

/// Outcome of one solver run. `iterations == 1` means the environment
/// was already at the fixed point — the signal the subtyping loop and
/// the refinement driver key on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Solution {
    pub iterations: u32,
}

impl Solution {
    /// Whether this run raised any assignment.
    pub fn did_work(&self) -> bool {
        self.iterations > 1
    }
}

impl ConstraintStore {
    pub fn solve(&mut self) -> Solution {
        let mut iterations = 1u32;
        let mut work: Vec<AtomId> = Vec::new();

        // Round 1: seed from the fixed constraints.
        let fixed: Vec<_> = self.fixed_constraints().collect();
        for (a, q) in fixed {
            if self.raise(a, q) {
                work.push(a);
            }
        }

        while !work.is_empty() {
            iterations += 1;
            let batch = std::mem::take(&mut work);
            for a in batch {
                if !self.prop_thru_itype && self.itype_var_map().contains_key(&a) {
                    // An installed itype is a boundary: values may
                    // flow into the atom but not through it.
                    continue;
                }
                let val = self.assignment(a);

                let neighbors: Vec<AtomId> = self.eq_neighbors(a).collect();
                for b in neighbors {
                    if self.raise(b, val) {
                        work.push(b);
                    }
                }

                let imps: Vec<_> = self.imp_edges(a).to_vec();
                for imp in imps {
                    if imp.guard.leq(val) && self.raise(imp.target, imp.guard) {
                        work.push(imp.target);
                    }
                }
            }
        }

        Solution { iterations }
    }
}
