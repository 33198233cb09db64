// ==============================================================================
// Property-Based Tests
// ==============================================================================
//
// Randomized constraint sets over a small atom pool, checking the
// solver laws: monotonicity, idempotence, order independence,
// absorbing wildness, and reset faithfulness.

use std::collections::BTreeSet;

use proptest::prelude::{prop, prop_oneof, proptest, Strategy};
use qual_ty::Qual;

use crate::storage::{AtomId, ConstraintStore};
use crate::ConvertOptions;

const NUM_ATOMS: usize = 8;

#[derive(Debug, Clone, Copy)]
enum GenConstraint {
    Eq(usize, usize),
    Imp(usize, usize, Qual),
    Fixed(usize, Qual),
}

fn arb_qual() -> impl Strategy<Value = Qual> {
    (0..Qual::ALL.len()).prop_map(|i| Qual::ALL[i])
}

fn arb_constraint() -> impl Strategy<Value = GenConstraint> {
    let atom = 0..NUM_ATOMS;
    prop_oneof![
        (atom.clone(), atom.clone()).prop_map(|(a, b)| GenConstraint::Eq(a, b)),
        (atom.clone(), atom.clone(), arb_qual()).prop_map(|(a, b, q)| GenConstraint::Imp(a, b, q)),
        (atom, arb_qual()).prop_map(|(a, q)| GenConstraint::Fixed(a, q)),
    ]
}

fn arb_constraints() -> impl Strategy<Value = Vec<GenConstraint>> {
    prop::collection::vec(arb_constraint(), 0..40)
}

fn build(constraints: &[GenConstraint]) -> (ConstraintStore, Vec<AtomId>) {
    let mut cs = ConstraintStore::new(&ConvertOptions {
        all_types: true,
        ..ConvertOptions::default()
    });
    let atoms: Vec<AtomId> = (0..NUM_ATOMS).map(|_| cs.fresh_var()).collect();
    apply(&mut cs, &atoms, constraints);
    (cs, atoms)
}

fn apply(cs: &mut ConstraintStore, atoms: &[AtomId], constraints: &[GenConstraint]) {
    for &c in constraints {
        match c {
            GenConstraint::Eq(a, b) => cs.add_eq(atoms[a], atoms[b]),
            GenConstraint::Imp(a, b, q) => cs.add_imp(atoms[a], atoms[b], q),
            GenConstraint::Fixed(a, q) => cs.add_fixed(atoms[a], q),
        }
    }
}

/// Transitive closure of `start` over the active equality edges.
fn eq_component(cs: &ConstraintStore, start: AtomId) -> BTreeSet<AtomId> {
    let mut seen = BTreeSet::from([start]);
    let mut work = vec![start];
    while let Some(a) = work.pop() {
        for b in cs.eq_neighbors(a) {
            if seen.insert(b) {
                work.push(b);
            }
        }
    }
    seen
}

proptest! {
    /// A solve never lowers any assignment.
    #[test]
    fn solve_is_monotone(constraints in arb_constraints()) {
        let (mut cs, _) = build(&constraints);
        let before: Vec<Qual> = cs.env().to_vec();
        cs.solve();
        for (b, a) in before.iter().zip(cs.env()) {
            assert!(b.leq(*a));
        }
    }

    /// Solving twice equals solving once, and the second run reports
    /// that it did no work.
    #[test]
    fn solve_is_idempotent(constraints in arb_constraints()) {
        let (mut cs, _) = build(&constraints);
        cs.solve();
        let first: Vec<Qual> = cs.env().to_vec();
        let second = cs.solve();
        assert!(!second.did_work());
        assert_eq!(cs.env(), first.as_slice());
    }

    /// The least fixed point does not depend on constraint order.
    #[test]
    fn solve_is_order_independent(constraints in arb_constraints()) {
        let mut reversed = constraints.clone();
        reversed.reverse();

        let (mut cs1, _) = build(&constraints);
        let (mut cs2, _) = build(&reversed);
        cs1.solve();
        cs2.solve();
        assert_eq!(cs1.env(), cs2.env());
    }

    /// Growing the constraint set only raises the environment.
    #[test]
    fn constraint_growth_is_monotone(
        first in arb_constraints(),
        second in arb_constraints(),
    ) {
        let (mut cs, atoms) = build(&first);
        cs.solve();
        let e1: Vec<Qual> = cs.env().to_vec();

        apply(&mut cs, &atoms, &second);
        cs.solve();
        for (b, a) in e1.iter().zip(cs.env()) {
            assert!(b.leq(*a));
        }
    }

    /// Once pinned wild, an atom and its whole equality component are
    /// wild after a solve.
    #[test]
    fn wildness_is_absorbing(constraints in arb_constraints(), target in 0..NUM_ATOMS) {
        let (mut cs, atoms) = build(&constraints);
        cs.add_fixed_with_reason(atoms[target], Qual::Wild, "pinned by the test");
        cs.solve();
        for a in eq_component(&cs, atoms[target]) {
            assert!(cs.is_wild(a));
        }
        // And a second solve cannot shake it loose.
        cs.solve();
        assert!(cs.is_wild(atoms[target]));
    }

    /// The refinement driver's reset-and-restore: itype atoms keep
    /// exactly their snapshot, everything else returns to Ptr.
    #[test]
    fn reset_restores_itype_snapshot_exactly(
        constraints in arb_constraints(),
        itype_picks in prop::collection::btree_set(0..NUM_ATOMS, 0..4),
    ) {
        let (mut cs, atoms) = build(&constraints);
        cs.solve();
        for &i in &itype_picks {
            cs.record_itype(atoms[i], cs.assignment(atoms[i]).join(Qual::NtArr));
        }

        let snapshot: Vec<(AtomId, Qual)> = cs
            .itype_var_map()
            .keys()
            .map(|&a| (a, cs.assignment(a)))
            .collect();
        cs.reset();
        for &(a, q) in &snapshot {
            cs.set_assignment(a, q);
        }

        for a in cs.atom_ids() {
            let expected = snapshot
                .iter()
                .find(|(s, _)| *s == a)
                .map(|&(_, q)| q)
                .unwrap_or(Qual::Ptr);
            assert_eq!(cs.assignment(a), expected);
        }
    }
}
