use crate::classify::verify;
use crate::config::VerifyConfig;
use crate::consistency;
use crate::error::VerifyError;
use crate::evidence::{build_digest, compute_summary};
use crate::graph::{DocumentContext, GraphBuilder};
use crate::input::DocumentInput;
use crate::matcher::{DeterministicMatcher, Matcher};
use crate::model::{ReportMeta, VerificationReport};

/// Verify one document: build the context and graph, classify every
/// mention, then run the cross-table check over the same graph.
pub fn run(
    config: &VerifyConfig,
    input: &DocumentInput,
    matcher: &dyn Matcher,
) -> Result<VerificationReport, VerifyError> {
    config.validate()?;

    let span = tracing::info_span!("document", name = %input.name);
    let _enter = span.enter();
    tracing::info!(
        claims = input.claims.len(),
        tables = input.tables.len(),
        matcher = %matcher.provenance(),
        "verifying"
    );

    // Build phase: nothing below reads the context until it is complete.
    let ctx = DocumentContext::build(input);
    let graph = GraphBuilder::new(matcher, &config.matching).build(ctx, &input.claims);

    let classifications = verify(&graph, &config.tolerance);
    let consistency = if config.consistency.enabled {
        consistency::check(&graph, &config.consistency, &config.tolerance)
    } else {
        Vec::new()
    };

    let summary = compute_summary(&graph, &classifications, &consistency);
    let digest = build_digest(&graph, &classifications, &consistency);

    Ok(VerificationReport {
        meta: ReportMeta {
            document: input.name.clone(),
            engine_version: env!("CARGO_PKG_VERSION").to_string(),
            run_at: chrono::Utc::now().to_rfc3339(),
            input_digest: input.digest.clone(),
            matcher: matcher.provenance(),
        },
        graph,
        classifications,
        consistency,
        summary,
        digest,
    })
}

/// [`run`] with the deterministic matcher built from `config.matching`.
pub fn run_deterministic(config: &VerifyConfig, input: &DocumentInput) -> Result<VerificationReport, VerifyError> {
    let matcher = DeterministicMatcher::new(&config.matching);
    run(config, input, &matcher)
}
