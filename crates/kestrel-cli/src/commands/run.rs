//! `kestrel run`: execute a unit through the JIT engine and report what
//! the profile-guided compiler made of it.

use super::{load_unit, parse_value};
use crate::output::StyledOutput;
use kestrel_engine::jit::profiling::SiteProfile;
use kestrel_engine::{JitConfig, JitEngine, Namespace, PgcStatus, ProfileSite, Value};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

pub struct RunArgs {
    pub args: Vec<String>,
    pub repeat: usize,
    pub show_ir: bool,
    pub json: bool,
}

/// Outcome of a run, as printed with `--json`
#[derive(Debug, Serialize)]
struct RunReport {
    unit: String,
    results: Vec<String>,
    error: Option<String>,
    output: Vec<String>,
    status: PgcStatus,
    generation: u64,
    native_size: usize,
    deopts: u64,
    compile_failures: u32,
    last_compile_error: Option<String>,
    speculations: Vec<String>,
    profile: Vec<(ProfileSite, SiteProfile)>,
}

pub fn execute(
    file: &Path,
    args: RunArgs,
    config: JitConfig,
    out: &mut StyledOutput,
) -> anyhow::Result<()> {
    let unit = Arc::new(load_unit(file)?);
    let values: Vec<Value> = args.args.iter().map(|arg| parse_value(arg)).collect();

    let engine = Arc::new(JitEngine::with_config(config));
    let namespace = Namespace::new();
    let _evaluator = namespace.install_evaluator(engine.clone());

    let mut results = Vec::new();
    let mut error = None;
    for run in 0..args.repeat.max(1) {
        match engine.dispatch(&unit, values.clone(), &namespace) {
            Ok(value) => {
                tracing::debug!(run, status = %engine.status(&unit), "run finished");
                results.push(value.repr());
            }
            Err(err) => {
                error = Some(err.to_string());
                break;
            }
        }
    }

    let state = engine.unit_state(&unit);
    let record = state.record();
    let history = state.history().clone();
    let report = RunReport {
        unit: unit.name().to_string(),
        results,
        error,
        output: namespace.take_output(),
        status: state.status(),
        generation: record.generation,
        native_size: record.native_size,
        deopts: state.deopt_count(),
        compile_failures: history.failures,
        last_compile_error: history.last_error,
        speculations: record
            .speculations
            .iter()
            .map(|spec| format!("{} {}", spec.site, spec.kind))
            .collect(),
        profile: state.profile().snapshot(),
    };

    if args.json {
        out.plain(&serde_json::to_string_pretty(&report)?);
        out.newline();
    } else {
        print_report(&report, out);
        if args.show_ir {
            out.newline();
            out.bold("ir");
            out.newline();
            out.dim(&record.ir_text());
        }
    }
    out.flush();

    match report.error {
        Some(message) => {
            out.stderr_error(&message);
            anyhow::bail!("{} raised after {} run(s)", report.unit, report.results.len() + 1)
        }
        None => Ok(()),
    }
}

fn print_report(report: &RunReport, out: &mut StyledOutput) {
    for line in &report.output {
        out.plain(line);
        out.newline();
    }
    for (run, result) in report.results.iter().enumerate() {
        out.dim(&format!("[{}] ", run + 1));
        out.plain(result);
        out.newline();
    }
    if let Some(message) = &report.error {
        out.error(&format!("[{}] {}", report.results.len() + 1, message));
        out.newline();
    }

    out.newline();
    out.bold(&report.unit);
    out.plain(" ");
    out.status(report.status);
    out.plain(&format!(
        "  generation {}, {} bytes, {} deopts",
        report.generation, report.native_size, report.deopts
    ));
    out.newline();

    if report.compile_failures > 0 || report.last_compile_error.is_some() {
        out.warning(&format!("compile failures: {}", report.compile_failures));
        if let Some(message) = &report.last_compile_error {
            out.plain(&format!(" ({})", message));
        }
        out.newline();
    }
    for speculation in &report.speculations {
        out.info("guard ");
        out.plain(speculation);
        out.newline();
    }
    for (site, profile) in &report.profile {
        let kinds: Vec<String> = profile
            .kinds
            .iter()
            .map(|(kind, hits)| format!("{} x{}", kind, hits))
            .collect();
        out.dim(&format!("{:>8}  ", site));
        out.plain(&kinds.join(", "));
        if profile.megamorphic {
            out.warning("  megamorphic");
        }
        out.newline();
    }
}
