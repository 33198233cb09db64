use std::fmt;

use serde::{Deserialize, Serialize};

/// A checked pointer qualifier.
///
/// The four constants form a total order
/// `Ptr < NtArr < Arr < Wild`: `Ptr` (a single-object pointer) is the
/// most precise thing we can say about a pointer, `Wild` means the
/// pointer cannot be converted at all. Solving only ever moves an
/// assignment upward, so the derived `Ord` doubles as the lattice
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Qual {
    /// Safe single-object pointer (`_Ptr`).
    Ptr,
    /// Null-terminated array pointer (`_Nt_array_ptr`).
    NtArr,
    /// General array pointer (`_Array_ptr`).
    Arr,
    /// Unconvertible.
    Wild,
}

impl Qual {
    /// Every constant, bottom first. Handy for exhaustive tests and
    /// proptest strategies.
    pub const ALL: [Qual; 4] = [Qual::Ptr, Qual::NtArr, Qual::Arr, Qual::Wild];

    /// Lattice order: `self <= other`.
    pub fn leq(self, other: Qual) -> bool {
        self <= other
    }

    /// Least upper bound.
    pub fn join(self, other: Qual) -> Qual {
        self.max(other)
    }

    pub fn is_wild(self) -> bool {
        matches!(self, Qual::Wild)
    }
}

impl fmt::Display for Qual {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Qual::Ptr => "ptr",
            Qual::NtArr => "ntarr",
            Qual::Arr => "arr",
            Qual::Wild => "wild",
        };
        write!(f, "{name}")
    }
}
