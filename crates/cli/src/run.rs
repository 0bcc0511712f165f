//! `verigraph run` and `verigraph validate`.
//!
//! A batch verifies every document directory independently: a malformed
//! document is recorded as a failure and the rest of the batch continues.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use verigraph::input::{CLAIMS_FILE, TABLES_DIR};
use verigraph::model::VerificationReport;
use verigraph::{DeterministicMatcher, DocumentInput, Matcher, VerifyConfig, VerifyError};

use crate::assisted::AssistedMatcher;
use crate::exit_codes::batch_exit_code;
use crate::CliError;

pub struct RunArgs {
    pub documents: Vec<PathBuf>,
    pub config: Option<PathBuf>,
    pub assisted: bool,
    pub json: bool,
    pub output: Option<PathBuf>,
    pub quiet: bool,
}

#[derive(Debug, Serialize)]
struct Failure {
    document: String,
    path: String,
    error: String,
}

#[derive(Serialize)]
struct BatchOutput<'a> {
    documents: &'a [VerificationReport],
    failures: &'a [Failure],
}

// ============================================================================
// run
// ============================================================================

pub fn cmd_run(args: RunArgs) -> Result<u8, CliError> {
    let mut config = load_config(args.config.as_deref())?;
    if args.assisted {
        config.assisted.enabled = true;
        config.validate().map_err(|e| {
            CliError::config(e.to_string())
                .with_hint("--assisted needs [assisted] base_url and model in the config file")
        })?;
    }

    let matcher: Box<dyn Matcher> = if config.assisted.enabled {
        Box::new(AssistedMatcher::from_config(&config.assisted)?)
    } else {
        Box::new(DeterministicMatcher::new(&config.matching))
    };

    if let Some(dir) = &args.output {
        fs::create_dir_all(dir)
            .map_err(|e| CliError::runtime(format!("cannot create {}: {e}", dir.display())))?;
    }

    let mut reports = Vec::with_capacity(args.documents.len());
    let mut failures = Vec::new();

    for dir in &args.documents {
        let name = document_name(dir);
        let outcome = read_document(dir, &name)
            .and_then(|input| verigraph::run(&config, &input, matcher.as_ref()));

        let report = match outcome {
            Ok(report) => report,
            Err(e) if e.is_document_local() => {
                tracing::error!(document = %name, "{e}");
                failures.push(Failure {
                    document: name,
                    path: dir.display().to_string(),
                    error: e.to_string(),
                });
                continue;
            }
            Err(e) => return Err(engine_err(e)),
        };

        if let Some(out_dir) = &args.output {
            let path = out_dir.join(format!("{name}.verification.json"));
            let json = serde_json::to_string_pretty(&report)
                .map_err(|e| CliError::runtime(format!("JSON serialization failed: {e}")))?;
            fs::write(&path, json)
                .map_err(|e| CliError::runtime(format!("cannot write {}: {e}", path.display())))?;
            if !args.quiet {
                eprintln!("wrote {}", path.display());
            }
        }

        if !args.quiet {
            print_summary(&report);
        }
        reports.push(report);
    }

    if args.json {
        let batch = BatchOutput {
            documents: &reports,
            failures: &failures,
        };
        let json = serde_json::to_string_pretty(&batch)
            .map_err(|e| CliError::runtime(format!("JSON serialization failed: {e}")))?;
        println!("{json}");
    }

    if !args.quiet && !failures.is_empty() {
        eprintln!(
            "{} of {} document(s) malformed",
            failures.len(),
            args.documents.len()
        );
    }

    let findings = reports.iter().any(VerificationReport::has_findings);
    Ok(batch_exit_code(failures.len(), findings))
}

// ============================================================================
// validate
// ============================================================================

pub fn cmd_validate(path: &Path) -> Result<(), CliError> {
    let config = read_config(path)?;
    eprintln!(
        "valid: tolerance {}% / {} absolute, similarity floor {}, {} matcher",
        config.tolerance.relative * 100.0,
        config.tolerance.absolute,
        config.matching.similarity_floor,
        if config.assisted.enabled { "assisted" } else { "deterministic" },
    );
    Ok(())
}

// ============================================================================
// Helpers
// ============================================================================

fn load_config(path: Option<&Path>) -> Result<VerifyConfig, CliError> {
    match path {
        Some(path) => read_config(path),
        None => Ok(VerifyConfig::default()),
    }
}

fn read_config(path: &Path) -> Result<VerifyConfig, CliError> {
    let text = fs::read_to_string(path)
        .map_err(|e| CliError::args(format!("cannot read config {}: {e}", path.display())))?;
    VerifyConfig::from_toml(&text).map_err(engine_err)
}

fn engine_err(e: VerifyError) -> CliError {
    match e {
        VerifyError::ConfigParse(_) | VerifyError::ConfigValidation(_) => {
            CliError::config(e.to_string())
        }
        other => CliError::runtime(other.to_string()),
    }
}

/// Directory base name; falls back to the canonical path for `.` and friends.
fn document_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .or_else(|| {
            fs::canonicalize(dir)
                .ok()
                .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
        })
        .unwrap_or_else(|| "document".to_string())
}

/// Read `narrative_claims.json` and every `tables/*.json` under `dir`.
fn read_document(dir: &Path, name: &str) -> Result<DocumentInput, VerifyError> {
    let io_err = |path: &Path, e: std::io::Error| VerifyError::Io(format!("{}: {e}", path.display()));

    let claims_path = dir.join(CLAIMS_FILE);
    let claims = fs::read_to_string(&claims_path).map_err(|e| io_err(&claims_path, e))?;

    let tables_dir = dir.join(TABLES_DIR);
    let mut tables = Vec::new();
    for entry in fs::read_dir(&tables_dir).map_err(|e| io_err(&tables_dir, e))? {
        let path = entry.map_err(|e| io_err(&tables_dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(file) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        let text = fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        tables.push((file, text));
    }
    tracing::debug!(document = name, tables = tables.len(), "read document");

    DocumentInput::parse(name, &claims, tables)
}

fn print_summary(report: &VerificationReport) {
    let s = &report.summary;
    eprintln!(
        "{}: {} claim(s), {} table(s), {} cell(s), {} matcher",
        report.meta.document, s.total_claims, s.total_tables, s.total_cells, report.meta.matcher,
    );
    eprintln!(
        "  MATCH {}  MISMATCH {}  UNVERIFIABLE {}  QUALITATIVE {}  (match {}%)",
        s.matches, s.mismatches, s.unverifiable, s.qualitative, s.match_pct,
    );
    if s.consistency_groups > 0 {
        eprintln!(
            "  cross-table: {} of {} group(s) inconsistent",
            s.inconsistencies, s.consistency_groups,
        );
    }

    for m in &report.digest.mismatches {
        let period = m.period.as_deref().map(|p| format!(" {p}")).unwrap_or_default();
        eprintln!(
            "  mismatch  {} {}{}: claim {}, table {} ({})",
            m.claim_id, m.variable, period, m.claim_value, m.matched_value, m.table_id,
        );
    }
    for g in &report.digest.inconsistencies {
        let sources: Vec<String> = g.sources.iter().map(|(t, raw)| format!("{t} {raw}")).collect();
        eprintln!("  conflict  {} ({}): {}", g.variable_key, g.period, sources.join(" vs "));
    }
}
