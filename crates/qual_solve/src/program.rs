// ==============================================================================
// ProgramInfo — the facade collaborators talk to
// ==============================================================================
//
// Owns the constraint store and the cross-translation-unit function
// indices. The AST-walking front end registers variables and functions
// here; `link` stitches declaration sites to definition sites; the
// solver, subtyping pass and refinement driver all operate through
// this type.

use std::collections::BTreeMap;
use std::fmt;
use std::io;

use qual_ty::Qual;
use serde::Serialize;
use smol_str::SmolStr;
use thiserror::Error;

use crate::disjoint::WildPartition;
use crate::options::ConvertOptions;
use crate::storage::{AtomId, ConstraintStore};
use crate::vars::{highest_ranked, ConstraintVariable, FuncSite, FuncVar, PtrVar};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error(
        "function `{key}` is declared with {decl_arity} parameters \
         but defined with {defn_arity}"
    )]
    ArityMismatch {
        key: SmolStr,
        decl_arity: usize,
        defn_arity: usize,
    },
}

#[derive(Debug)]
pub struct ProgramInfo {
    options: ConvertOptions,
    store: ConstraintStore,
    /// Standalone (non-function) pointer variables.
    variables: Vec<ConstraintVariable>,
    func_defn: BTreeMap<SmolStr, Vec<ConstraintVariable>>,
    func_decl: BTreeMap<SmolStr, Vec<ConstraintVariable>>,
    partition: Option<WildPartition>,
}

impl ProgramInfo {
    pub fn new(options: ConvertOptions) -> Self {
        let store = ConstraintStore::new(&options);
        Self {
            options,
            store,
            variables: Vec::new(),
            func_defn: BTreeMap::new(),
            func_decl: BTreeMap::new(),
            partition: None,
        }
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    pub fn store(&self) -> &ConstraintStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConstraintStore {
        self.partition = None;
        &mut self.store
    }

    /// Register a standalone pointer variable.
    pub fn add_variable(&mut self, var: PtrVar) {
        let var = ConstraintVariable::Ptr(var);
        apply_registration_policy(&mut self.store, &self.options, &var);
        self.variables.push(var);
    }

    /// Register a function-variable constraint for one site.
    pub fn add_function(&mut self, func: FuncVar, site: FuncSite) {
        let key = func.key.clone();
        let var = ConstraintVariable::Func(func);
        apply_registration_policy(&mut self.store, &self.options, &var);
        let map = match site {
            FuncSite::Definition => &mut self.func_defn,
            FuncSite::Declaration => &mut self.func_decl,
        };
        map.entry(key).or_default().push(var);
    }

    pub fn func_defn_var_map(&self) -> &BTreeMap<SmolStr, Vec<ConstraintVariable>> {
        &self.func_defn
    }

    pub fn func_decl_constraint_set(&self, key: &str) -> Option<&[ConstraintVariable]> {
        self.func_decl.get(key).map(Vec::as_slice)
    }

    /// Cross-reference declarations to definitions. Verifies that
    /// every paired site agrees on arity and, when multiple
    /// declarations are merged, links corresponding parameter and
    /// return atoms level-wise so they form one equality class.
    pub fn link(&mut self) -> Result<(), LinkError> {
        let mut eq_pairs: Vec<(AtomId, AtomId)> = Vec::new();

        for (key, defns) in &self.func_defn {
            let Some(decls) = self.func_decl.get(key) else {
                // Declaration-free definition: nothing to reconcile.
                continue;
            };
            let Some(anchor) = highest_ranked(defns).and_then(ConstraintVariable::as_func) else {
                continue;
            };

            for site in defns.iter().chain(decls.iter()) {
                let Some(func) = site.as_func() else { continue };
                if !func.variadic && !anchor.variadic && func.arity() != anchor.arity() {
                    return Err(LinkError::ArityMismatch {
                        key: key.clone(),
                        decl_arity: func.arity(),
                        defn_arity: anchor.arity(),
                    });
                }
            }

            if self.options.merge_multiple_func_decls {
                for site in defns.iter().chain(decls.iter()) {
                    let Some(func) = site.as_func() else { continue };
                    collect_merge_pairs(anchor, func, &mut eq_pairs);
                }
            }
        }

        for (a, b) in eq_pairs {
            self.store.add_eq(a, b);
        }
        log::debug!("linked {} paired functions", self.func_defn.len());
        Ok(())
    }

    /// Classify wild atoms into equivalence classes over the active
    /// equality edges and remember the first reason that pushed each
    /// class wild.
    pub fn compute_ptr_disjoint_set(&mut self) {
        self.partition = Some(WildPartition::compute(&self.store));
    }

    pub fn wild_partition(&self) -> Option<&WildPartition> {
        self.partition.as_ref()
    }

    /// Visit every registered pointer variable, including the ones
    /// owned by function returns and parameters.
    pub fn for_each_ptr_var(&self, mut f: impl FnMut(&PtrVar)) {
        fn walk(var: &ConstraintVariable, f: &mut impl FnMut(&PtrVar)) {
            match var {
                ConstraintVariable::Ptr(p) => f(p),
                ConstraintVariable::Func(func) => {
                    for v in func.ret.iter().chain(func.params.iter().flatten()) {
                        walk(v, f);
                    }
                }
            }
        }
        for var in &self.variables {
            walk(var, &mut f);
        }
        for var in self.func_defn.values().flatten() {
            walk(var, &mut f);
        }
        for var in self.func_decl.values().flatten() {
            walk(var, &mut f);
        }
    }

    pub fn print_stats(&self, out: &mut impl fmt::Write) -> fmt::Result {
        let mut per_qual = [0usize; Qual::ALL.len()];
        for &q in self.store.env() {
            per_qual[q as usize] += 1;
        }
        writeln!(out, "atoms: {}", self.store.num_vars())?;
        for (q, count) in Qual::ALL.iter().zip(per_qual) {
            writeln!(out, "  {q}: {count}")?;
        }
        writeln!(
            out,
            "equality edges: {} active",
            self.store.num_active_eq_edges()
        )?;
        writeln!(out, "implication edges: {}", self.store.num_imp_edges())?;
        writeln!(out, "itype vars: {}", self.store.itype_var_map().len())?;
        let paired = self
            .func_defn
            .keys()
            .filter(|k| self.func_decl.contains_key(*k))
            .count();
        writeln!(out, "functions: {} defined, {} paired", self.func_defn.len(), paired)?;
        Ok(())
    }

    pub fn dump_json(&self, out: &mut impl io::Write) -> io::Result<()> {
        #[derive(Serialize)]
        struct EnvEntry {
            atom: u32,
            qual: Qual,
        }
        #[derive(Serialize)]
        struct EqEntry {
            lhs: u32,
            rhs: u32,
        }
        #[derive(Serialize)]
        struct FixedEntry {
            atom: u32,
            qual: Qual,
            #[serde(skip_serializing_if = "Option::is_none")]
            reason: Option<String>,
        }
        #[derive(Serialize)]
        struct ItypeEntry {
            atom: u32,
            qual: Qual,
        }
        #[derive(Serialize)]
        struct Dump {
            environment: Vec<EnvEntry>,
            eq_constraints: Vec<EqEntry>,
            fixed_constraints: Vec<FixedEntry>,
            itypes: Vec<ItypeEntry>,
        }

        let dump = Dump {
            environment: self
                .store
                .atom_ids()
                .map(|a| EnvEntry {
                    atom: a.as_u32(),
                    qual: self.store.assignment(a),
                })
                .collect(),
            eq_constraints: self
                .store
                .active_eq_edges()
                .map(|(a, b)| EqEntry {
                    lhs: a.as_u32(),
                    rhs: b.as_u32(),
                })
                .collect(),
            fixed_constraints: self
                .store
                .fixed_constraints()
                .map(|(a, q)| FixedEntry {
                    atom: a.as_u32(),
                    qual: q,
                    reason: self.store.wild_reason(a).map(|r| r.to_string()),
                })
                .collect(),
            itypes: self
                .store
                .itype_var_map()
                .iter()
                .map(|(&a, &q)| ItypeEntry {
                    atom: a.as_u32(),
                    qual: q,
                })
                .collect(),
        };
        serde_json::to_writer_pretty(&mut *out, &dump)?;
        out.write_all(b"\n")
    }
}

/// Builder-boundary policy, applied when the front end registers a
/// variable: allocator returns may be considered unsafe wholesale, and
/// without varargs handling the parameters of a variadic function
/// cannot be reasoned about.
fn apply_registration_policy(
    store: &mut ConstraintStore,
    options: &ConvertOptions,
    var: &ConstraintVariable,
) {
    match var {
        ConstraintVariable::Ptr(p) => {
            if p.alloc_return && options.consider_alloc_unsafe {
                store.add_fixed_with_reason(
                    p.outermost(),
                    Qual::Wild,
                    "allocator return considered unsafe",
                );
            }
        }
        ConstraintVariable::Func(func) => {
            for v in &func.ret {
                apply_registration_policy(store, options, v);
            }
            for set in &func.params {
                for v in set {
                    apply_registration_policy(store, options, v);
                    if func.variadic && !options.handle_varargs {
                        if let ConstraintVariable::Ptr(p) = v {
                            for &atom in p.atoms() {
                                store.add_fixed_with_reason(
                                    atom,
                                    Qual::Wild,
                                    "parameter of a variadic function",
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Level-wise equality links from `anchor` onto every pointer variable
/// of `other`'s return and parameter sets.
fn collect_merge_pairs(anchor: &FuncVar, other: &FuncVar, pairs: &mut Vec<(AtomId, AtomId)>) {
    let link_sets = |a: &[ConstraintVariable], b: &[ConstraintVariable], pairs: &mut Vec<_>| {
        let Some(anchor_ptr) = highest_ranked(a).and_then(ConstraintVariable::as_ptr) else {
            return;
        };
        for var in b {
            let Some(p) = var.as_ptr() else { continue };
            for (&x, &y) in anchor_ptr.atoms().iter().zip(p.atoms()) {
                if x != y {
                    pairs.push((x, y));
                }
            }
        }
    };

    link_sets(&anchor.ret, &other.ret, pairs);
    for (a_set, b_set) in anchor.params.iter().zip(&other.params) {
        link_sets(a_set, b_set, pairs);
    }
}
