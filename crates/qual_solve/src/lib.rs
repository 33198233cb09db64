pub mod diagnostic;
mod disjoint;
mod interactive;
mod options;
mod program;
mod refine;
mod solve;
mod storage;
mod subtype;
mod vars;


#[cfg(test)]
mod pbt;

pub use qual_ty::Qual;

pub use disjoint::{WildClass, WildPartition};
pub use interactive::InteractiveSession;
pub use options::ConvertOptions;
pub use program::{LinkError, ProgramInfo};
pub use refine::{RefineSummary, Session};
pub use solve::Solution;
pub use storage::{AtomId, ConstraintStore, ReplacementMap};
pub use vars::{
    highest_ranked, is_valid_ptr_var, ConstraintVariable, FuncSite, FuncVar, PtrSource, PtrVar,
};
