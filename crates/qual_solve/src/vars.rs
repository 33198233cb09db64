// ==============================================================================
// Constraint Variables
// ==============================================================================
//
// The constraint-side representation of source objects. A pointer
// variable owns one atom per pointer level (`int **p` has two,
// outermost first); a function variable bundles a return set plus one
// set per parameter index — sets, because a function may be declared
// several times across headers and each site mints its own variables.

use smol_str::SmolStr;

use crate::storage::{AtomId, ConstraintStore};

/// Where a pointer was written in the analyzed sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtrSource {
    pub file: SmolStr,
    pub line: u32,
    pub col: u32,
}

/// Pointer-variable constraint: an ordered, non-empty atom sequence.
#[derive(Debug, Clone)]
pub struct PtrVar {
    atoms: Vec<AtomId>,
    pub source: Option<PtrSource>,
    /// Original textual type, kept for the rewriter.
    pub orig_type: Option<SmolStr>,
    /// Stable selection rank supplied by the front end; the highest
    /// ranked variable of a set represents it.
    pub rank: u32,
    /// This variable holds an allocator's return value.
    pub alloc_return: bool,
}

impl PtrVar {
    /// Mint a pointer variable with `levels` fresh atoms.
    pub fn new(store: &mut ConstraintStore, levels: usize) -> Self {
        assert!(levels > 0, "a pointer variable needs at least one level");
        let atoms = (0..levels).map(|_| store.fresh_var()).collect();
        Self {
            atoms,
            source: None,
            orig_type: None,
            rank: 0,
            alloc_return: false,
        }
    }

    pub fn with_source(mut self, source: PtrSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_orig_type(mut self, ty: impl Into<SmolStr>) -> Self {
        self.orig_type = Some(ty.into());
        self
    }

    pub fn with_rank(mut self, rank: u32) -> Self {
        self.rank = rank;
        self
    }

    pub fn alloc_return(mut self) -> Self {
        self.alloc_return = true;
        self
    }

    pub fn atoms(&self) -> &[AtomId] {
        &self.atoms
    }

    pub fn outermost(&self) -> AtomId {
        self.atoms[0]
    }
}

/// Which site of a function a variable set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncSite {
    Definition,
    Declaration,
}

/// Function-variable constraint.
#[derive(Debug, Clone)]
pub struct FuncVar {
    /// Mangled-or-qualified name, plus a translation-unit
    /// disambiguator for statics.
    pub key: SmolStr,
    pub ret: Vec<ConstraintVariable>,
    pub params: Vec<Vec<ConstraintVariable>>,
    pub variadic: bool,
    pub rank: u32,
}

impl FuncVar {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// The two constraint-variable variants. Operations that expect a
/// particular variant express it with `as_ptr`/`as_func` and a match
/// arm rather than a downcast.
#[derive(Debug, Clone)]
pub enum ConstraintVariable {
    Ptr(PtrVar),
    Func(FuncVar),
}

impl ConstraintVariable {
    pub fn as_ptr(&self) -> Option<&PtrVar> {
        match self {
            ConstraintVariable::Ptr(p) => Some(p),
            ConstraintVariable::Func(_) => None,
        }
    }

    pub fn as_func(&self) -> Option<&FuncVar> {
        match self {
            ConstraintVariable::Func(f) => Some(f),
            ConstraintVariable::Ptr(_) => None,
        }
    }

    pub fn rank(&self) -> u32 {
        match self {
            ConstraintVariable::Ptr(p) => p.rank,
            ConstraintVariable::Func(f) => f.rank,
        }
    }
}

impl From<PtrVar> for ConstraintVariable {
    fn from(value: PtrVar) -> Self {
        ConstraintVariable::Ptr(value)
    }
}

impl From<FuncVar> for ConstraintVariable {
    fn from(value: FuncVar) -> Self {
        ConstraintVariable::Func(value)
    }
}

/// Pick the representative of a variable set: highest rank, first on
/// ties, so the choice is stable.
pub fn highest_ranked(vars: &[ConstraintVariable]) -> Option<&ConstraintVariable> {
    vars.iter().reduce(|best, v| {
        if v.rank() > best.rank() {
            v
        } else {
            best
        }
    })
}

/// A usable pointer-variable representative: present, the pointer
/// variant, and carrying at least one atom.
pub fn is_valid_ptr_var(var: Option<&ConstraintVariable>) -> bool {
    matches!(var, Some(ConstraintVariable::Ptr(p)) if !p.atoms().is_empty())
}
