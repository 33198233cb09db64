// ==============================================================================
// cqual — checked pointer qualifier inference
// ==============================================================================
//
// Loads program manifests gathered by the C front end, links
// declarations to definitions, runs the iterative itype refinement to
// its fixed point, and reports every pointer that stayed wild along
// with the reason. Exit code 0 on success, 1 on any setup or link
// failure.

mod manifest;

use std::fs::File;
use std::path::PathBuf;

use clap::Parser;
use qual_solve::{diagnostic, ConvertOptions, Session};

use crate::manifest::ProgramManifest;

#[derive(Parser, Debug)]
#[command(
    name = "cqual",
    version,
    about = "Infer checked pointer qualifiers for legacy C"
)]
struct Cli {
    /// Program manifest files produced by the front end.
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Dump intermediate constraint information as JSON.
    #[arg(long = "dump-intermediate")]
    dump_intermediate: bool,

    /// Print verbose information.
    #[arg(long)]
    verbose: bool,

    /// Merge multiple declarations of functions.
    #[arg(long = "mergefds")]
    merge_fds: bool,

    /// Postfix to add to the names of rewritten files; "-" writes to
    /// stdout.
    #[arg(long = "output-postfix", default_value = "-")]
    output_postfix: String,

    /// Path where the analysis information is dumped as JSON.
    #[arg(long = "constraint-output", default_value = "constraint_output.json")]
    constraint_output: PathBuf,

    /// Dump per-iteration statistics.
    #[arg(long = "dump-stats")]
    dump_stats: bool,

    /// Enable handling of varargs in a sound manner.
    #[arg(long = "handle-varargs")]
    handle_varargs: bool,

    /// Enable propagation of constraints through ityped
    /// parameters/returns.
    #[arg(long = "enable-itypeprop")]
    enable_itypeprop: bool,

    /// Consider the allocators (malloc/calloc) as unsafe.
    #[arg(long = "alloc-unsafe")]
    alloc_unsafe: bool,

    /// Enable the full pointer qualifier lattice instead of collapsing
    /// array qualifiers into wild.
    #[arg(long = "all-types")]
    all_types: bool,

    /// Insert checked regions after rewriting (rewriter concern).
    #[arg(long = "add-checked-regions")]
    add_checked_regions: bool,

    /// Compare every pointer level during itype detection instead of
    /// only the outermost one.
    #[arg(long = "itype-all-levels")]
    itype_all_levels: bool,

    /// Base directory for the code being translated.
    #[arg(long = "base-dir", default_value = "", value_parser = clap::builder::ValueParser::new(|s: &str| -> Result<PathBuf, std::convert::Infallible> { Ok(PathBuf::from(s)) }))]
    base_dir: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    env_logger::Builder::from_default_env()
        .filter_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();
    std::process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    let base_dir = if cli.base_dir.as_os_str().is_empty() {
        match std::env::current_dir() {
            Ok(cwd) => cwd,
            Err(err) => {
                eprintln!("could not get current working dir: {err}");
                return 1;
            }
        }
    } else {
        cli.base_dir.clone()
    };

    if cli.output_postfix == "-" && cli.inputs.len() > 1 {
        eprintln!("cannot write rewritten output to stdout with more than one input");
        return 1;
    }

    let options = ConvertOptions {
        dump_intermediate: cli.dump_intermediate,
        verbose: cli.verbose,
        merge_multiple_func_decls: cli.merge_fds,
        output_postfix: cli.output_postfix.clone(),
        constraint_output_json: cli.constraint_output.clone(),
        dump_stats: cli.dump_stats,
        handle_varargs: cli.handle_varargs,
        enable_prop_thru_itype: cli.enable_itypeprop,
        consider_alloc_unsafe: cli.alloc_unsafe,
        all_types: cli.all_types,
        add_checked_regions: cli.add_checked_regions,
        itype_all_levels: cli.itype_all_levels,
        base_dir,
    };

    let mut session = Session::new(options);

    // 1. Gather constraints.
    for input in &cli.inputs {
        let manifest = match ProgramManifest::load(input) {
            Ok(manifest) => manifest,
            Err(err) => {
                eprintln!("error: {err}");
                return 1;
            }
        };
        if let Err(err) = manifest.apply(&mut session) {
            eprintln!("error: {err}");
            return 1;
        }
    }

    if let Err(err) = session.info.link() {
        eprintln!("linking failed: {err}");
        return 1;
    }

    // 2. Solve constraints by iteratively refining based on itypes.
    log::debug!("solving constraints");
    let summary = session.refine();
    log::debug!("constraints solved");

    // 3. Report wild pointers.
    session.info.compute_ptr_disjoint_set();
    let diagnostics = diagnostic::wild_diagnostics(&session.info);
    let mut reported = 0usize;
    for diags in diagnostics.values() {
        for d in diags {
            eprintln!(
                "{}:{}:{}: {}: {} [ptr {}]",
                d.file, d.line, d.col, d.severity, d.message, d.code
            );
            reported += 1;
        }
    }

    let wild_total = session
        .info
        .wild_partition()
        .map(|p| p.all_wild.len())
        .unwrap_or(0);
    eprintln!(
        "\nAnalyzed {} pointers in {} rounds: {} wild ({} with source locations), {} itypes",
        session.info.store().num_vars(),
        summary.rounds,
        wild_total,
        reported,
        session.info.store().itype_var_map().len(),
    );

    if cli.dump_intermediate {
        match File::create(&cli.constraint_output) {
            Ok(mut file) => {
                log::info!("writing json output to {}", cli.constraint_output.display());
                if let Err(err) = session.info.dump_json(&mut file) {
                    eprintln!("could not write constraint dump: {err}");
                    let _ = session.info.dump_json(&mut std::io::stderr());
                }
            }
            Err(err) => {
                eprintln!("could not create {}: {err}", cli.constraint_output.display());
                let _ = session.info.dump_json(&mut std::io::stderr());
            }
        }
    }

    if cli.dump_stats {
        let mut stats = String::new();
        if session.info.print_stats(&mut stats).is_ok() {
            eprint!("{stats}");
        }
    }

    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("cqual").chain(args.iter().copied()))
            .expect("arguments should parse")
    }

    #[test]
    fn defaults_match_the_documented_flags() {
        let cli = cli(&["prog.json"]);
        assert_eq!(cli.output_postfix, "-");
        assert_eq!(
            cli.constraint_output,
            PathBuf::from("constraint_output.json")
        );
        assert!(!cli.merge_fds);
        assert!(!cli.all_types);
        assert!(!cli.handle_varargs);
    }

    #[test]
    fn stdout_postfix_rejects_multiple_inputs() {
        let code = run(cli(&["a.json", "b.json"]));
        assert_eq!(code, 1);
    }

    #[test]
    fn missing_manifest_fails() {
        let code = run(cli(&[
            "--output-postfix",
            "checked",
            "/nonexistent/cqual-manifest.json",
        ]));
        assert_eq!(code, 1);
    }

    #[test]
    fn end_to_end_run_succeeds() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("cqual-manifest-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{
                "variables": [
                    { "name": "p", "file": "main.c", "line": 1, "col": 1 },
                    { "name": "q", "file": "main.c", "line": 2, "col": 1 }
                ],
                "constraints": [
                    { "eq": { "a": "p", "b": "q" } },
                    { "fixed": { "var": "q", "qual": "wild", "reason": "cast to void *" } }
                ]
            }"#,
        )
        .unwrap();

        let code = run(cli(&["--all-types", path.to_str().unwrap()]));
        std::fs::remove_file(&path).ok();
        assert_eq!(code, 0);
    }
}
