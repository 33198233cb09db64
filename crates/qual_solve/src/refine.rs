// ==============================================================================
// Iterative Itype Refinement
// ==============================================================================
//
// The outermost loop. Each round solves (with function subtyping),
// finds the functions whose parameter/return atoms moved, detects
// declaration atoms that went wild while their definition stayed
// precise (the bounds-safe interface candidates), erases the equality
// edges that would contradict the interface, and — when anything was
// erased — resets the whole environment, carrying only the recorded
// itype assignments across. Fixed point: a round that erases nothing.
//
// Termination: the itype map grows monotonically and is bounded by the
// number of declaration-side atoms, and a round without new erasures
// stops the loop.

use std::collections::{BTreeMap, BTreeSet};

use qual_ty::Qual;
use rustc_hash::FxHashMap;
use smol_str::SmolStr;

use crate::program::ProgramInfo;
use crate::storage::{AtomId, ReplacementMap};
use crate::vars::{highest_ranked, is_valid_ptr_var, ConstraintVariable, PtrVar};
use crate::ConvertOptions;

/// What one full refinement run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefineSummary {
    pub rounds: u32,
    pub itype_vars_detected: usize,
    pub edges_removed: usize,
}

/// One analysis run: the program facade plus the refinement
/// bookkeeping (saved values, current-round itype buffer) that must
/// not leak between runs.
#[derive(Debug)]
pub struct Session {
    pub info: ProgramInfo,
    /// Per paired function: parameter/return atoms of the definition
    /// side and the value each held after the last round.
    saved_func_values: BTreeMap<SmolStr, FxHashMap<AtomId, Option<Qual>>>,
    /// Itype facts discovered in the current round only.
    curr_iteration_itypes: BTreeMap<AtomId, Qual>,
}

impl Session {
    pub fn new(options: ConvertOptions) -> Self {
        Self {
            info: ProgramInfo::new(options),
            saved_func_values: BTreeMap::new(),
            curr_iteration_itypes: BTreeMap::new(),
        }
    }

    /// Run the refinement to its fixed point.
    pub fn refine(&mut self) -> RefineSummary {
        log::debug!("capturing constraint variables for all paired functions");
        self.perform_constraint_setup();

        if self.info.store().itype_var_map().is_empty() {
            assert!(
                self.info.store().check_initial_env_sanity(),
                "invalid initial environment: every pointer must start at Ptr"
            );
        }

        let mut summary = RefineSummary {
            rounds: 0,
            itype_vars_detected: 0,
            edges_removed: 0,
        };

        loop {
            summary.rounds += 1;
            let round = summary.rounds;
            log::info!("itype refinement round {round} starts");

            let solution = self.info.solve_with_subtyping();
            log::debug!(
                "round {round}: solver converged after {} iterations",
                solution.iterations
            );

            if self.info.options().dump_stats {
                let mut stats = String::new();
                if self.info.print_stats(&mut stats).is_ok() {
                    log::info!("round {round} stats:\n{stats}");
                }
            }

            let modified = self.identify_modified_functions();
            let num_itypes = self.detect_and_update_itype_vars(&modified);
            summary.itype_vars_detected += num_itypes;
            log::info!("round {round}: {num_itypes} new itype vars detected");

            let removed = self.reset_with_itype_constraints();
            summary.edges_removed += removed;
            log::info!("round {round}: {removed} equality edges removed");

            if removed == 0 {
                break;
            }
        }

        log::info!("fixed point reached after {} rounds", summary.rounds);
        summary
    }

    /// Snapshot the definition-side parameter and return atoms of
    /// every function that also has declarations. The `None` default
    /// makes every paired function count as modified in round one.
    fn perform_constraint_setup(&mut self) -> bool {
        self.saved_func_values.clear();
        let mut has_some = false;
        for (key, defns) in self.info.func_defn_var_map() {
            if self.info.func_decl_constraint_set(key).is_none() {
                continue;
            }
            let entry = self.saved_func_values.entry(key.clone()).or_default();
            for var in defns {
                let Some(func) = var.as_func() else { continue };
                for set in func.params.iter().chain(std::iter::once(&func.ret)) {
                    for pvc in set.iter().filter_map(ConstraintVariable::as_ptr) {
                        for &atom in pvc.atoms() {
                            entry.insert(atom, None);
                        }
                    }
                }
            }
            has_some = true;
        }
        has_some
    }

    /// A function is modified when any saved atom's current value
    /// differs from its saved one. Saved values are brought current in
    /// the same sweep.
    fn identify_modified_functions(&mut self) -> BTreeSet<SmolStr> {
        let mut modified = BTreeSet::new();
        let info = &self.info;
        for (key, atoms) in self.saved_func_values.iter_mut() {
            for (&atom, saved) in atoms.iter_mut() {
                let current = Some(info.store().assignment(atom));
                if *saved != current {
                    *saved = current;
                    modified.insert(key.clone());
                }
            }
        }
        modified
    }

    /// For each modified function, compare declaration against
    /// definition and record a bounds-safe interface wherever the
    /// definition stayed precise while the declaration went wild.
    fn detect_and_update_itype_vars(&mut self, modified: &BTreeSet<SmolStr>) -> usize {
        self.curr_iteration_itypes.clear();
        let mut num_itype_vars = 0;

        let mut recordings: Vec<(AtomId, Qual)> = Vec::new();
        for key in modified {
            let defns = &self.info.func_defn_var_map()[key];
            let decls = self
                .info
                .func_decl_constraint_set(key)
                .unwrap_or_else(|| panic!("modified function `{key}` has no declaration set"));

            let Some(defn) = highest_ranked(defns).and_then(ConstraintVariable::as_func) else {
                continue;
            };
            let Some(decl) = highest_ranked(decls).and_then(ConstraintVariable::as_func) else {
                continue;
            };

            let mut pairs: Vec<(&[ConstraintVariable], &[ConstraintVariable])> =
                vec![(decl.ret.as_slice(), defn.ret.as_slice())];
            if decl.arity() == defn.arity() {
                pairs.extend(
                    decl.params
                        .iter()
                        .map(Vec::as_slice)
                        .zip(defn.params.iter().map(Vec::as_slice)),
                );
            }

            for (decl_set, defn_set) in pairs {
                let decl_var = highest_ranked(decl_set);
                let defn_var = highest_ranked(defn_set);
                if !is_valid_ptr_var(decl_var) || !is_valid_ptr_var(defn_var) {
                    continue;
                }
                let decl_pvc = decl_var.unwrap().as_ptr().unwrap();
                let defn_pvc = defn_var.unwrap().as_ptr().unwrap();
                if self.collect_itype_updates(decl_pvc, defn_pvc, &mut recordings) {
                    num_itype_vars += 1;
                }
            }
        }

        for (atom, qual) in recordings {
            self.info.store_mut().record_itype(atom, qual);
            self.curr_iteration_itypes.insert(atom, qual);
        }
        num_itype_vars
    }

    /// Compare one declaration/definition pointer-variable pair and
    /// collect the itype facts it yields. By default only the
    /// outermost atoms are compared; `itype_all_levels` walks the
    /// whole atom sequence.
    fn collect_itype_updates(
        &self,
        decl: &PtrVar,
        defn: &PtrVar,
        recordings: &mut Vec<(AtomId, Qual)>,
    ) -> bool {
        let store = self.info.store();
        let levels = if self.info.options().itype_all_levels {
            decl.atoms().len().min(defn.atoms().len())
        } else {
            1
        };

        let mut any = false;
        for i in 0..levels {
            let decl_atom = decl.atoms()[i];
            let defn_atom = defn.atoms()[i];
            if store.is_wild(defn_atom) || !store.is_wild(decl_atom) {
                continue;
            }
            let observed = store.assignment(defn_atom);
            // Record only first sightings and strict raises; an
            // interface never weakens, and skipping the rest bounds
            // the driver by the number of declaration atoms.
            if let Some(&recorded) = store.itype_var_map().get(&decl_atom) {
                if observed.leq(recorded) {
                    continue;
                }
            }
            recordings.push((decl_atom, observed));
            any = true;
        }
        any
    }

    /// Restore every atom's erased equalities, then erase the ones
    /// that would contradict this round's itype facts. `NtArr` is the
    /// only qualifier whose interface installs pins on the far
    /// endpoints; everything else erases only. When any edge went
    /// away, reset the whole environment and write the itype atoms'
    /// prior assignments back so the interface decisions survive while
    /// everything else re-derives.
    fn reset_with_itype_constraints(&mut self) -> usize {
        let replacements: ReplacementMap = self
            .curr_iteration_itypes
            .iter()
            .map(|(&atom, &qual)| {
                let target = (qual == Qual::NtArr).then_some(qual);
                (atom, target)
            })
            .collect();

        let store = self.info.store_mut();
        let mut removed = 0;
        for atom in store.atom_ids().collect::<Vec<_>>() {
            store.reset_erased_constraints(atom);
            removed += store.replace_eq_constraints(atom, &replacements);
        }

        if removed > 0 {
            let backup: Vec<(AtomId, Qual)> = store
                .itype_var_map()
                .keys()
                .map(|&atom| (atom, store.assignment(atom)))
                .collect();
            store.reset();
            for (atom, qual) in backup {
                store.set_assignment(atom, qual);
            }
        }
        removed
    }
}
