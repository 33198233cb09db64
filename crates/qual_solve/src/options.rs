use std::path::PathBuf;

/// Knobs recognized by the conversion core. The CLI maps its flags
/// onto this struct one-to-one; a language-server front end fills it
/// from its own configuration.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Dump constraint JSON at named stages.
    pub dump_intermediate: bool,
    /// Progress output at debug level.
    pub verbose: bool,
    /// Whether multiple declarations of the same function share
    /// constraint variables (linked level-wise during `link`).
    pub merge_multiple_func_decls: bool,
    /// Suffix for rewritten files; `"-"` means stdout and is only
    /// valid with a single input.
    pub output_postfix: String,
    /// Destination for the constraint JSON dump.
    pub constraint_output_json: PathBuf,
    /// Emit per-iteration statistics.
    pub dump_stats: bool,
    /// Treat variadic parameters with pointer constraints instead of
    /// pinning them wild.
    pub handle_varargs: bool,
    /// Allow propagation through atoms already installed as itypes.
    pub enable_prop_thru_itype: bool,
    /// Pin allocator return atoms to `Wild`.
    pub consider_alloc_unsafe: bool,
    /// Use the full `{Ptr, NtArr, Arr, Wild}` lattice; otherwise
    /// `NtArr`/`Arr` collapse into `Wild`.
    pub all_types: bool,
    /// Post-rewrite concern; accepted here, consumed by the rewriter.
    pub add_checked_regions: bool,
    /// Itype detection compares every atom of a pointer variable
    /// instead of only the outermost one.
    pub itype_all_levels: bool,
    /// Path root for source resolution.
    pub base_dir: PathBuf,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            dump_intermediate: false,
            verbose: false,
            merge_multiple_func_decls: false,
            output_postfix: "-".to_owned(),
            constraint_output_json: PathBuf::from("constraint_output.json"),
            dump_stats: false,
            handle_varargs: false,
            enable_prop_thru_itype: false,
            consider_alloc_unsafe: false,
            all_types: false,
            add_checked_regions: false,
            itype_all_levels: false,
            base_dir: PathBuf::new(),
        }
    }
}
