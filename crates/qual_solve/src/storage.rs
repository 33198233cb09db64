// ==============================================================================
// Constraint Storage
// ==============================================================================
//
// Atoms live in a Vec-backed arena addressed by AtomId. Equality edges
// are pooled once and referenced from both endpoints' adjacency lists;
// an edge is never removed, only deactivated, so erasure and
// restoration are flag flips. Implication edges are directed and hang
// off their source atom. Fixed constraints pin an atom at (at least) a
// constant and join monotonically on re-insertion.

use std::collections::BTreeMap;

use derive_more::Debug;
use qual_ty::Qual;
use smol_str::SmolStr;

use crate::options::ConvertOptions;

/// Stable key of a variable atom in the constraint graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[debug("AtomId({_0})")]
pub struct AtomId(u32);

impl AtomId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for AtomId {
    #[inline]
    fn from(value: u32) -> Self {
        AtomId(value)
    }
}

/// Who deactivated an equality edge. Edges erased by the refinement
/// protocol are restorable per atom; edges erased by an interactive
/// user invalidation stay down until an explicit full reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eraser {
    Atom(AtomId),
    User,
}

/// One undirected equality edge in the pool.
#[derive(Debug, Clone)]
struct EqEdge {
    lhs: AtomId,
    rhs: AtomId,
    active: bool,
    erased_by: Option<Eraser>,
}

impl EqEdge {
    fn other(&self, a: AtomId) -> AtomId {
        if self.lhs == a {
            self.rhs
        } else {
            self.lhs
        }
    }

    fn touches(&self, a: AtomId) -> bool {
        self.lhs == a || self.rhs == a
    }
}

/// Directed edge: `source >= guard  =>  target >= guard`.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ImpEdge {
    pub(crate) guard: Qual,
    pub(crate) target: AtomId,
}

#[derive(Debug, Clone, Default)]
struct AtomSlot {
    /// Indices into the equality-edge pool.
    eq: Vec<usize>,
    /// Outgoing implication edges.
    imp: Vec<ImpEdge>,
}

/// Replacement map handed to [`ConstraintStore::replace_eq_constraints`]:
/// atom -> qualifier to pin onto the far endpoints of its erased
/// equality edges, or `None` to erase only.
pub type ReplacementMap = BTreeMap<AtomId, Option<Qual>>;

#[derive(Debug)]
pub struct ConstraintStore {
    env: Vec<Qual>,
    slots: Vec<AtomSlot>,
    edges: Vec<EqEdge>,
    fixed: BTreeMap<AtomId, Qual>,
    /// First reason that pinned each atom wild.
    wild_reasons: BTreeMap<AtomId, SmolStr>,
    /// Declaration atom -> qualifier observed at the paired definition.
    itype_vars: BTreeMap<AtomId, Qual>,
    all_types: bool,
    pub(crate) prop_thru_itype: bool,
}

impl ConstraintStore {
    pub fn new(options: &ConvertOptions) -> Self {
        Self {
            env: Vec::new(),
            slots: Vec::new(),
            edges: Vec::new(),
            fixed: BTreeMap::new(),
            wild_reasons: BTreeMap::new(),
            itype_vars: BTreeMap::new(),
            all_types: options.all_types,
            prop_thru_itype: options.enable_prop_thru_itype,
        }
    }

    /// Allocate a fresh variable atom at `Ptr`.
    pub fn fresh_var(&mut self) -> AtomId {
        let id = AtomId(self.env.len() as u32);
        self.env.push(Qual::Ptr);
        self.slots.push(AtomSlot::default());
        id
    }

    pub fn num_vars(&self) -> usize {
        self.env.len()
    }

    pub fn atom_ids(&self) -> impl Iterator<Item = AtomId> {
        (0..self.env.len() as u32).map(AtomId)
    }

    pub fn assignment(&self, a: AtomId) -> Qual {
        self.env[a.index()]
    }

    pub fn env(&self) -> &[Qual] {
        &self.env
    }

    pub fn is_wild(&self, a: AtomId) -> bool {
        self.env[a.index()].is_wild()
    }

    /// Without the full lattice, array qualifiers are not expressible
    /// and collapse to `Wild` at construction time.
    fn normalize(&self, q: Qual) -> Qual {
        if !self.all_types && matches!(q, Qual::NtArr | Qual::Arr) {
            Qual::Wild
        } else {
            q
        }
    }

    /// Add an equality constraint `a = b`. Self-edges carry no
    /// information and are dropped.
    pub fn add_eq(&mut self, a: AtomId, b: AtomId) {
        if a == b {
            return;
        }
        let idx = self.edges.len();
        self.edges.push(EqEdge {
            lhs: a,
            rhs: b,
            active: true,
            erased_by: None,
        });
        self.slots[a.index()].eq.push(idx);
        self.slots[b.index()].eq.push(idx);
    }

    /// Add an implication constraint `a >= guard => b >= guard`.
    pub fn add_imp(&mut self, a: AtomId, b: AtomId, guard: Qual) {
        let guard = self.normalize(guard);
        self.slots[a.index()].imp.push(ImpEdge { guard, target: b });
    }

    /// Pin `a` at (at least) `q`. Idempotent and monotone: repeated
    /// pins join with the strongest one seen.
    pub fn add_fixed(&mut self, a: AtomId, q: Qual) {
        let q = self.normalize(q);
        self.fixed
            .entry(a)
            .and_modify(|cur| *cur = cur.join(q))
            .or_insert(q);
    }

    /// [`add_fixed`](Self::add_fixed), recording why when the pin is
    /// `Wild`. The first recorded reason wins.
    pub fn add_fixed_with_reason(&mut self, a: AtomId, q: Qual, reason: impl Into<SmolStr>) {
        self.add_fixed(a, q);
        if self.normalize(q).is_wild() {
            self.wild_reasons.entry(a).or_insert_with(|| reason.into());
        }
    }

    pub fn wild_reason(&self, a: AtomId) -> Option<&SmolStr> {
        self.wild_reasons.get(&a)
    }

    pub(crate) fn fixed_constraints(&self) -> impl Iterator<Item = (AtomId, Qual)> + '_ {
        self.fixed.iter().map(|(&a, &q)| (a, q))
    }

    /// Active equality neighbors of `a`.
    pub fn eq_neighbors(&self, a: AtomId) -> impl Iterator<Item = AtomId> + '_ {
        self.slots[a.index()]
            .eq
            .iter()
            .map(|&idx| &self.edges[idx])
            .filter(|e| e.active)
            .map(move |e| e.other(a))
    }

    pub(crate) fn imp_edges(&self, a: AtomId) -> &[ImpEdge] {
        &self.slots[a.index()].imp
    }

    /// All active equality edges, as endpoint pairs.
    pub fn active_eq_edges(&self) -> impl Iterator<Item = (AtomId, AtomId)> + '_ {
        self.edges
            .iter()
            .filter(|e| e.active)
            .map(|e| (e.lhs, e.rhs))
    }

    pub fn num_active_eq_edges(&self) -> usize {
        self.edges.iter().filter(|e| e.active).count()
    }

    pub fn num_imp_edges(&self) -> usize {
        self.slots.iter().map(|s| s.imp.len()).sum()
    }

    /// Erase the active equality edges of `atom` that touch any atom
    /// in `replacements`, recording them against `atom` so
    /// [`reset_erased_constraints`](Self::reset_erased_constraints)
    /// can restore exactly this batch. For each erased edge, the
    /// endpoint opposite a mapped atom is pinned with the mapped
    /// qualifier when present (`None` erases only): the rest of the
    /// graph keeps the values it derived through the edge while the
    /// mapped atom is freed to re-derive from scratch. Returns the
    /// number of edges erased.
    pub fn replace_eq_constraints(&mut self, atom: AtomId, replacements: &ReplacementMap) -> usize {
        self.replace_eq_inner(atom, replacements, Eraser::Atom(atom))
    }

    /// Like [`replace_eq_constraints`](Self::replace_eq_constraints)
    /// but the erasure survives `reset_erased_constraints`. Used by
    /// interactive invalidation, which must outlive the refinement
    /// driver's restore-then-re-erase protocol.
    pub fn replace_eq_constraints_permanent(
        &mut self,
        atom: AtomId,
        replacements: &ReplacementMap,
    ) -> usize {
        self.replace_eq_inner(atom, replacements, Eraser::User)
    }

    fn replace_eq_inner(
        &mut self,
        atom: AtomId,
        replacements: &ReplacementMap,
        eraser: Eraser,
    ) -> usize {
        if replacements.is_empty() {
            return 0;
        }
        let mut removed = 0;
        let mut pins: Vec<(AtomId, Qual)> = Vec::new();
        for i in 0..self.slots[atom.index()].eq.len() {
            let idx = self.slots[atom.index()].eq[i];
            let edge = &mut self.edges[idx];
            if !edge.active {
                continue;
            }
            let lhs_mapped = replacements.contains_key(&edge.lhs);
            let rhs_mapped = replacements.contains_key(&edge.rhs);
            if !lhs_mapped && !rhs_mapped {
                continue;
            }
            edge.active = false;
            edge.erased_by = Some(eraser);
            removed += 1;
            if lhs_mapped {
                if let Some(q) = replacements[&edge.lhs] {
                    pins.push((edge.rhs, q));
                }
            }
            if rhs_mapped {
                if let Some(q) = replacements[&edge.rhs] {
                    pins.push((edge.lhs, q));
                }
            }
        }
        let reason = match eraser {
            Eraser::Atom(_) => "connected atom moved behind a bounds-safe interface",
            Eraser::User => "equality neighbor of a pointer invalidated by the user",
        };
        for (a, q) in pins {
            self.add_fixed_with_reason(a, q, reason);
        }
        removed
    }

    /// Restore the equality edges last erased by `atom`.
    pub fn reset_erased_constraints(&mut self, atom: AtomId) {
        for i in 0..self.slots[atom.index()].eq.len() {
            let idx = self.slots[atom.index()].eq[i];
            let edge = &mut self.edges[idx];
            if edge.erased_by == Some(Eraser::Atom(atom)) {
                debug_assert!(edge.touches(atom));
                edge.active = true;
                edge.erased_by = None;
            }
        }
    }

    /// Set every variable atom back to `Ptr`. Constraints are left in
    /// place; the next solve re-derives from them.
    pub fn reset(&mut self) {
        self.env.fill(Qual::Ptr);
    }

    /// Direct environment write, bypassing the monotone join. Only the
    /// refinement driver's reset-and-restore and the subtyping pass
    /// are entitled to this.
    pub(crate) fn set_assignment(&mut self, a: AtomId, q: Qual) {
        self.env[a.index()] = q;
    }

    pub(crate) fn raise(&mut self, a: AtomId, q: Qual) -> bool {
        let cur = self.env[a.index()];
        let joined = cur.join(q);
        if joined != cur {
            self.env[a.index()] = joined;
            true
        } else {
            false
        }
    }

    /// Every variable atom is at `Ptr`.
    pub fn check_initial_env_sanity(&self) -> bool {
        self.env.iter().all(|&q| q == Qual::Ptr)
    }

    pub fn itype_var_map(&self) -> &BTreeMap<AtomId, Qual> {
        &self.itype_vars
    }

    /// Record a bounds-safe interface fact for a declaration atom.
    /// Entries only appear and only move upward.
    pub(crate) fn record_itype(&mut self, a: AtomId, q: Qual) {
        self.itype_vars
            .entry(a)
            .and_modify(|cur| *cur = cur.join(q))
            .or_insert(q);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConstraintStore {
        ConstraintStore::new(&ConvertOptions {
            all_types: true,
            ..ConvertOptions::default()
        })
    }

    #[test]
    fn fresh_vars_start_at_ptr() {
        let mut cs = store();
        let a = cs.fresh_var();
        let b = cs.fresh_var();
        assert_eq!(cs.assignment(a), Qual::Ptr);
        assert_eq!(cs.assignment(b), Qual::Ptr);
        assert!(cs.check_initial_env_sanity());
    }

    #[test]
    fn add_fixed_is_monotone_and_idempotent() {
        let mut cs = store();
        let a = cs.fresh_var();
        cs.add_fixed(a, Qual::Arr);
        cs.add_fixed(a, Qual::NtArr);
        let fixed: Vec<_> = cs.fixed_constraints().collect();
        assert_eq!(fixed, vec![(a, Qual::Arr)]);
        cs.add_fixed(a, Qual::Wild);
        cs.add_fixed(a, Qual::Wild);
        let fixed: Vec<_> = cs.fixed_constraints().collect();
        assert_eq!(fixed, vec![(a, Qual::Wild)]);
    }

    #[test]
    fn collapsed_lattice_normalizes_array_quals() {
        let mut cs = ConstraintStore::new(&ConvertOptions::default());
        let a = cs.fresh_var();
        cs.add_fixed(a, Qual::NtArr);
        let fixed: Vec<_> = cs.fixed_constraints().collect();
        assert_eq!(fixed, vec![(a, Qual::Wild)]);
    }

    #[test]
    fn first_wild_reason_wins() {
        let mut cs = store();
        let a = cs.fresh_var();
        cs.add_fixed_with_reason(a, Qual::Wild, "cast to void *");
        cs.add_fixed_with_reason(a, Qual::Wild, "later reason");
        assert_eq!(cs.wild_reason(a).unwrap(), "cast to void *");
    }

    #[test]
    fn replace_erases_and_pins_far_endpoint() {
        let mut cs = store();
        let a = cs.fresh_var();
        let b = cs.fresh_var();
        cs.add_eq(a, b);

        let mut map = ReplacementMap::new();
        map.insert(a, Some(Qual::NtArr));
        let removed = cs.replace_eq_constraints(a, &map);

        assert_eq!(removed, 1);
        assert_eq!(cs.eq_neighbors(a).count(), 0);
        assert_eq!(cs.eq_neighbors(b).count(), 0);
        // The surviving endpoint was pinned, not the mapped atom.
        let fixed: Vec<_> = cs.fixed_constraints().collect();
        assert_eq!(fixed, vec![(b, Qual::NtArr)]);
    }

    #[test]
    fn erase_and_restore_round_trip() {
        let mut cs = store();
        let a = cs.fresh_var();
        let b = cs.fresh_var();
        let c = cs.fresh_var();
        cs.add_eq(a, b);
        cs.add_eq(b, c);

        let mut map = ReplacementMap::new();
        map.insert(b, None);
        let removed = cs.replace_eq_constraints(b, &map);
        assert_eq!(removed, 2);
        assert_eq!(cs.num_active_eq_edges(), 0);

        // Restoring from an uninvolved atom is a no-op.
        cs.reset_erased_constraints(a);
        assert_eq!(cs.num_active_eq_edges(), 0);

        cs.reset_erased_constraints(b);
        assert_eq!(cs.num_active_eq_edges(), 2);
        assert_eq!(cs.eq_neighbors(b).count(), 2);
    }

    #[test]
    fn inactive_edges_are_not_re_erased() {
        let mut cs = store();
        let a = cs.fresh_var();
        let b = cs.fresh_var();
        cs.add_eq(a, b);

        let mut map = ReplacementMap::new();
        map.insert(a, None);
        map.insert(b, None);
        assert_eq!(cs.replace_eq_constraints(a, &map), 1);
        // The edge is already down; scanning from b finds nothing.
        assert_eq!(cs.replace_eq_constraints(b, &map), 0);
        // So only a's batch holds it.
        cs.reset_erased_constraints(b);
        assert_eq!(cs.num_active_eq_edges(), 0);
        cs.reset_erased_constraints(a);
        assert_eq!(cs.num_active_eq_edges(), 1);
    }

    #[test]
    fn permanent_erasure_survives_restore() {
        let mut cs = store();
        let a = cs.fresh_var();
        let b = cs.fresh_var();
        cs.add_eq(a, b);

        let mut map = ReplacementMap::new();
        map.insert(a, Some(Qual::Wild));
        assert_eq!(cs.replace_eq_constraints_permanent(a, &map), 1);
        cs.reset_erased_constraints(a);
        cs.reset_erased_constraints(b);
        assert_eq!(cs.num_active_eq_edges(), 0);
    }
}
