// ==============================================================================
// Function Subtyping
// ==============================================================================
//
// After the solver converges once, declarations are reconciled with
// their definitions across translation units. A definition strictly
// wilder than its declaration is a contravariant violation at the
// boundary; the declaration is promoted upward unless the atom is
// already behind a bounds-safe interface. Promotions may unlock
// further propagation, so the combined loop re-solves until a solve
// reports no work.

use qual_ty::Qual;

use crate::program::ProgramInfo;
use crate::solve::Solution;
use crate::storage::AtomId;
use crate::vars::{highest_ranked, is_valid_ptr_var, ConstraintVariable};

impl ProgramInfo {
    /// One reconciliation pass over every paired function. Returns
    /// true iff any promotion was installed; the promotion takes
    /// effect (and propagates) on the next solve.
    pub fn handle_function_subtyping(&mut self) -> bool {
        let mut promotions: Vec<(AtomId, Qual, smol_str::SmolStr)> = Vec::new();

        for (key, defns) in self.func_defn_var_map() {
            let Some(decls) = self.func_decl_constraint_set(key) else {
                continue;
            };
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
                let decl_atom = decl_var.unwrap().as_ptr().unwrap().outermost();
                let defn_atom = defn_var.unwrap().as_ptr().unwrap().outermost();

                let defn_val = self.store().assignment(defn_atom);
                let decl_val = self.store().assignment(decl_atom);
                if decl_val < defn_val {
                    if !self.store().prop_thru_itype
                        && self.store().itype_var_map().contains_key(&decl_atom)
                    {
                        // The boundary already carries an itype; keep
                        // the declaration precise for callers.
                        continue;
                    }
                    let reason =
                        smol_str::format_smolstr!("definition of `{key}` forces the declaration");
                    promotions.push((decl_atom, defn_val, reason));
                }
            }
        }

        let changed = !promotions.is_empty();
        for (atom, q, reason) in promotions {
            // Installed as a fixed constraint so the next solve both
            // applies and propagates it.
            self.store_mut().add_fixed_with_reason(atom, q, reason);
        }
        changed
    }

    /// Solve-then-reconcile until neither side has work left. The
    /// `did_work` guard keeps subtyping from re-running against an
    /// unchanged environment, which bounds the loop: each pass either
    /// raises some atom in a finite lattice or ends the loop.
    pub fn solve_with_subtyping(&mut self) -> Solution {
        loop {
            let solution = self.store_mut().solve();
            if !solution.did_work() || !self.handle_function_subtyping() {
                return solution;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ConvertOptions;
    use crate::vars::{FuncSite, FuncVar, PtrVar};

    fn program() -> ProgramInfo {
        ProgramInfo::new(ConvertOptions {
            all_types: true,
            ..ConvertOptions::default()
        })
    }

    fn one_param_func(info: &mut ProgramInfo, key: &str, site: FuncSite) -> (AtomId, AtomId) {
        let ret = PtrVar::new(info.store_mut(), 1);
        let param = PtrVar::new(info.store_mut(), 1);
        let (ret_atom, param_atom) = (ret.outermost(), param.outermost());
        info.add_function(
            FuncVar {
                key: key.into(),
                ret: vec![ret.into()],
                params: vec![vec![param.into()]],
                variadic: false,
                rank: 0,
            },
            site,
        );
        (ret_atom, param_atom)
    }

    #[test]
    fn wilder_definition_promotes_declaration() {
        let mut info = program();
        let (defn_ret, _) = one_param_func(&mut info, "f", FuncSite::Definition);
        let (decl_ret, _) = one_param_func(&mut info, "f", FuncSite::Declaration);
        info.store_mut().add_fixed(defn_ret, Qual::Arr);

        info.solve_with_subtyping();

        assert_eq!(info.store().assignment(defn_ret), Qual::Arr);
        assert_eq!(info.store().assignment(decl_ret), Qual::Arr);
    }

    #[test]
    fn precise_definition_leaves_wilder_declaration_alone() {
        let mut info = program();
        let (defn_ret, _) = one_param_func(&mut info, "f", FuncSite::Definition);
        let (decl_ret, _) = one_param_func(&mut info, "f", FuncSite::Declaration);
        info.store_mut()
            .add_fixed_with_reason(decl_ret, Qual::Wild, "cast at call site");

        info.solve_with_subtyping();

        assert_eq!(info.store().assignment(defn_ret), Qual::Ptr);
        assert_eq!(info.store().assignment(decl_ret), Qual::Wild);
    }

    #[test]
    fn promotion_reaches_atoms_linked_to_the_declaration() {
        let mut info = program();
        let (defn_ret, _) = one_param_func(&mut info, "f", FuncSite::Definition);
        let (decl_ret, _) = one_param_func(&mut info, "f", FuncSite::Declaration);
        // A caller-side pointer tied to the declared return.
        let caller = PtrVar::new(info.store_mut(), 1);
        let caller_atom = caller.outermost();
        info.add_variable(caller);
        info.store_mut().add_eq(caller_atom, decl_ret);
        info.store_mut()
            .add_fixed_with_reason(defn_ret, Qual::Wild, "definition body is unsafe");

        info.solve_with_subtyping();

        assert_eq!(info.store().assignment(decl_ret), Qual::Wild);
        assert_eq!(info.store().assignment(caller_atom), Qual::Wild);
    }
}
