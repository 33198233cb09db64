// ==============================================================================
// Program Manifests
// ==============================================================================
//
// The narrow contract between the AST-walking front end and this tool:
// a JSON description of the pointer variables, functions, and
// constraints gathered from one translation unit. Loading a manifest
// registers everything with the session's `ProgramInfo`; variable
// names exist only here — the core deals in atom ids.

use std::collections::HashMap;
use std::path::Path;

use qual_solve::{AtomId, FuncSite, FuncVar, PtrSource, PtrVar, Session};
use qual_ty::Qual;
use serde::Deserialize;
use smol_str::SmolStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("could not read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("could not parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("duplicate variable name `{0}`")]
    DuplicateVariable(SmolStr),
    #[error("unknown variable `{0}` in a constraint")]
    UnknownVariable(SmolStr),
    #[error("variable `{name}` has {levels} levels, constraint refers to level {level}")]
    LevelOutOfRange {
        name: SmolStr,
        levels: usize,
        level: usize,
    },
}

fn default_levels() -> usize {
    1
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableDesc {
    pub name: SmolStr,
    #[serde(default = "default_levels")]
    pub levels: usize,
    #[serde(default)]
    pub file: Option<SmolStr>,
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub col: u32,
    /// Original textual type, kept for the rewriter.
    #[serde(default, rename = "type")]
    pub orig_type: Option<SmolStr>,
    #[serde(default)]
    pub rank: u32,
    #[serde(default)]
    pub alloc_return: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SiteDesc {
    Definition,
    Declaration,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionDesc {
    pub name: SmolStr,
    pub site: SiteDesc,
    #[serde(default)]
    pub variadic: bool,
    #[serde(default)]
    pub rank: u32,
    /// Pointer variable of the return, if the return is a pointer.
    #[serde(default)]
    pub ret: Option<VariableDesc>,
    /// One entry per parameter; `null` for non-pointer parameters.
    #[serde(default)]
    pub params: Vec<Option<VariableDesc>>,
}

/// Reference to a variable's atom; a bare name means the outermost
/// level.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum VarRef {
    Name(SmolStr),
    Level { name: SmolStr, level: usize },
}

impl VarRef {
    fn name(&self) -> &SmolStr {
        match self {
            VarRef::Name(name) => name,
            VarRef::Level { name, .. } => name,
        }
    }

    fn level(&self) -> usize {
        match self {
            VarRef::Name(_) => 0,
            VarRef::Level { level, .. } => *level,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConstraintDesc {
    Eq {
        a: VarRef,
        b: VarRef,
    },
    Imp {
        from: VarRef,
        to: VarRef,
        guard: Qual,
    },
    Fixed {
        var: VarRef,
        qual: Qual,
        #[serde(default)]
        reason: Option<String>,
    },
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProgramManifest {
    #[serde(default)]
    pub variables: Vec<VariableDesc>,
    #[serde(default)]
    pub functions: Vec<FunctionDesc>,
    #[serde(default)]
    pub constraints: Vec<ConstraintDesc>,
}

impl ProgramManifest {
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ManifestError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Register everything described here with the session.
    pub fn apply(&self, session: &mut Session) -> Result<(), ManifestError> {
        let mut names: HashMap<SmolStr, Vec<AtomId>> = HashMap::new();

        fn mint(
            session: &mut Session,
            names: &mut HashMap<SmolStr, Vec<AtomId>>,
            desc: &VariableDesc,
        ) -> Result<PtrVar, ManifestError> {
            let mut var =
                PtrVar::new(session.info.store_mut(), desc.levels.max(1)).with_rank(desc.rank);
            if let Some(file) = &desc.file {
                var = var.with_source(PtrSource {
                    file: file.clone(),
                    line: desc.line,
                    col: desc.col,
                });
            }
            if let Some(ty) = &desc.orig_type {
                var = var.with_orig_type(ty.clone());
            }
            if desc.alloc_return {
                var = var.alloc_return();
            }
            let previous = names.insert(desc.name.clone(), var.atoms().to_vec());
            if previous.is_some() {
                return Err(ManifestError::DuplicateVariable(desc.name.clone()));
            }
            Ok(var)
        }

        for desc in &self.variables {
            let var = mint(session, &mut names, desc)?;
            session.info.add_variable(var);
        }

        for func in &self.functions {
            let ret = match &func.ret {
                Some(desc) => vec![mint(session, &mut names, desc)?.into()],
                None => vec![],
            };
            let mut params = Vec::with_capacity(func.params.len());
            for param in &func.params {
                params.push(match param {
                    Some(desc) => vec![mint(session, &mut names, desc)?.into()],
                    None => vec![],
                });
            }
            let site = match func.site {
                SiteDesc::Definition => FuncSite::Definition,
                SiteDesc::Declaration => FuncSite::Declaration,
            };
            session.info.add_function(
                FuncVar {
                    key: func.name.clone(),
                    ret,
                    params,
                    variadic: func.variadic,
                    rank: func.rank,
                },
                site,
            );
        }

        let resolve =
            |names: &HashMap<SmolStr, Vec<AtomId>>, var_ref: &VarRef| -> Result<AtomId, ManifestError> {
                let atoms = names
                    .get(var_ref.name())
                    .ok_or_else(|| ManifestError::UnknownVariable(var_ref.name().clone()))?;
                atoms
                    .get(var_ref.level())
                    .copied()
                    .ok_or_else(|| ManifestError::LevelOutOfRange {
                        name: var_ref.name().clone(),
                        levels: atoms.len(),
                        level: var_ref.level(),
                    })
            };

        for constraint in &self.constraints {
            match constraint {
                ConstraintDesc::Eq { a, b } => {
                    let (a, b) = (resolve(&names, a)?, resolve(&names, b)?);
                    session.info.store_mut().add_eq(a, b);
                }
                ConstraintDesc::Imp { from, to, guard } => {
                    let (from, to) = (resolve(&names, from)?, resolve(&names, to)?);
                    session.info.store_mut().add_imp(from, to, *guard);
                }
                ConstraintDesc::Fixed { var, qual, reason } => {
                    let atom = resolve(&names, var)?;
                    match reason {
                        Some(reason) => session
                            .info
                            .store_mut()
                            .add_fixed_with_reason(atom, *qual, reason.as_str()),
                        None => session.info.store_mut().add_fixed(atom, *qual),
                    }
                }
            }
        }

        Ok(())
    }
}
