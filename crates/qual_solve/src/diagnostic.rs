// ==============================================================================
// Diagnostic Bridge
// ==============================================================================
//
// Turns the wild-pointer partition plus the registered source
// locations into display-ready diagnostics, aggregated per file. A
// language-server front end forwards these as-is; the CLI renders them
// to stderr.

use std::collections::BTreeMap;
use std::fmt;

use smol_str::SmolStr;

use crate::program::ProgramInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// One wild pointer surfaced at its source location. `code` is the
/// pointer's atom key, so a front end can route an invalidation
/// request back to the right atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WildDiagnostic {
    pub code: u32,
    pub file: SmolStr,
    pub line: u32,
    pub col: u32,
    pub severity: Severity,
    pub message: String,
}

/// Build diagnostics for every registered pointer variable whose
/// outermost atom is wild and whose source location is known,
/// aggregated by file and ordered by position. Expects
/// [`ProgramInfo::compute_ptr_disjoint_set`] to have run; returns an
/// empty map otherwise.
pub fn wild_diagnostics(info: &ProgramInfo) -> BTreeMap<SmolStr, Vec<WildDiagnostic>> {
    let Some(partition) = info.wild_partition() else {
        return BTreeMap::new();
    };

    let mut by_file: BTreeMap<SmolStr, Vec<WildDiagnostic>> = BTreeMap::new();
    info.for_each_ptr_var(|pvc| {
        let Some(source) = &pvc.source else { return };
        let atom = pvc.outermost();
        let Some(reason) = partition.reason_for(atom) else {
            return;
        };
        by_file
            .entry(source.file.clone())
            .or_default()
            .push(WildDiagnostic {
                code: atom.as_u32(),
                file: source.file.clone(),
                line: source.line,
                col: source.col,
                severity: Severity::Error,
                message: format!("Pointer is wild because of: {reason}"),
            });
    });

    for diags in by_file.values_mut() {
        diags.sort_by_key(|d| (d.line, d.col));
    }
    by_file
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::ConvertOptions;
    use crate::vars::{PtrSource, PtrVar};
    use qual_ty::Qual;

    #[test]
    fn diagnostics_group_by_file_and_quote_the_reason() {
        let mut info = ProgramInfo::new(ConvertOptions::default());
        let p = PtrVar::new(info.store_mut(), 1).with_source(PtrSource {
            file: "lib/list.c".into(),
            line: 12,
            col: 3,
        });
        let q = PtrVar::new(info.store_mut(), 1).with_source(PtrSource {
            file: "lib/list.c".into(),
            line: 4,
            col: 9,
        });
        let (pa, qa) = (p.outermost(), q.outermost());
        info.add_variable(p);
        info.add_variable(q);

        info.store_mut().add_eq(pa, qa);
        info.store_mut()
            .add_fixed_with_reason(qa, Qual::Wild, "cast from int");
        info.store_mut().solve();
        info.compute_ptr_disjoint_set();

        let diags = wild_diagnostics(&info);
        assert_eq!(diags.len(), 1);
        let file_diags = &diags["lib/list.c"];
        assert_eq!(file_diags.len(), 2);
        // Ordered by position, both blaming the same class reason.
        assert_eq!(file_diags[0].line, 4);
        assert_eq!(file_diags[1].line, 12);
        for d in file_diags {
            assert_eq!(d.severity, Severity::Error);
            assert_eq!(d.message, "Pointer is wild because of: cast from int");
        }
    }

    #[test]
    fn precise_pointers_produce_no_diagnostics() {
        let mut info = ProgramInfo::new(ConvertOptions::default());
        let p = PtrVar::new(info.store_mut(), 1).with_source(PtrSource {
            file: "main.c".into(),
            line: 1,
            col: 1,
        });
        info.add_variable(p);
        info.store_mut().solve();
        info.compute_ptr_disjoint_set();
        assert!(wild_diagnostics(&info).is_empty());
    }
}
