// ==============================================================================
// Interactive Invalidation
// ==============================================================================
//
// The one concurrent surface of the core. A language-server front end
// lets the user assert "this pointer should not be wild"; the core
// severs the pointer's equality edges (neighbors keep their wildness
// through explicit pins), re-derives everything, and reports whether
// the assertion freed anything. The whole re-refinement runs under a
// process-wide mutex; a second request blocks until the first is done.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use qual_ty::Qual;
use smol_str::SmolStr;

use crate::diagnostic::{wild_diagnostics, WildDiagnostic};
use crate::refine::Session;
use crate::storage::{AtomId, ReplacementMap};

impl Session {
    /// Sever `target`'s equality edges for good, pin its former
    /// neighbors wild so the rest of the graph keeps its derivation,
    /// and re-run the refinement from a clean environment. True iff
    /// some previously-wild atom is no longer wild. An atom pinned
    /// wild by a direct fixed constraint cannot be freed this way.
    pub fn make_single_ptr_non_wild(&mut self, target: AtomId) -> bool {
        if self.info.wild_partition().is_none() {
            self.info.compute_ptr_disjoint_set();
        }
        let old_wild = self.info.wild_partition().unwrap().all_wild.clone();

        let store = self.info.store_mut();

        // Refinement-era erasures are recomputed below; restore them
        // so the permanent user erasure is the only one standing.
        for atom in store.atom_ids().collect::<Vec<_>>() {
            store.reset_erased_constraints(atom);
        }

        let mut replacements = ReplacementMap::new();
        replacements.insert(target, Some(Qual::Wild));
        store.replace_eq_constraints_permanent(target, &replacements);

        // Re-derive from scratch, carrying the recorded itype
        // assignments across the reset.
        let backup: Vec<(AtomId, Qual)> = store
            .itype_var_map()
            .keys()
            .map(|&atom| (atom, store.assignment(atom)))
            .collect();
        store.reset();
        for (atom, qual) in backup {
            store.set_assignment(atom, qual);
        }

        self.refine();
        self.info.compute_ptr_disjoint_set();

        let new_wild = &self.info.wild_partition().unwrap().all_wild;
        old_wild.difference(new_wild).next().is_some()
    }
}

/// A [`Session`] behind the process-wide lock. The only type in the
/// core that is safe to share across threads.
#[derive(Debug)]
pub struct InteractiveSession {
    inner: Mutex<Session>,
}

impl InteractiveSession {
    pub fn new(session: Session) -> Self {
        Self {
            inner: Mutex::new(session),
        }
    }

    pub fn make_single_ptr_non_wild(&self, target: AtomId) -> bool {
        self.inner.lock().make_single_ptr_non_wild(target)
    }

    /// Current wild-pointer diagnostics, aggregated per file.
    pub fn diagnostics(&self) -> BTreeMap<SmolStr, Vec<WildDiagnostic>> {
        let mut session = self.inner.lock();
        if session.info.wild_partition().is_none() {
            session.info.compute_ptr_disjoint_set();
        }
        wild_diagnostics(&session.info)
    }

    pub fn into_inner(self) -> Session {
        self.inner.into_inner()
    }
}
