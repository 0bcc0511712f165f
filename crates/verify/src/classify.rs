use rayon::prelude::*;

use crate::config::ToleranceConfig;
use crate::model::{
    ClaimNode, ClassificationKind, ClassificationResult, Graph, Mention, ReasonCode, Resolution,
};
use crate::value::{tolerance_bound, within_tolerance};

/// Classify every mention of every claim. One result per mention, one
/// QUALITATIVE result for a claim with no mentions. Claim order is kept.
pub fn verify(graph: &Graph, tolerance: &ToleranceConfig) -> Vec<ClassificationResult> {
    let span = tracing::Span::current();
    let results: Vec<ClassificationResult> = graph
        .nodes
        .claims
        .par_iter()
        .flat_map_iter(|claim| {
            let _enter = span.enter();
            classify_claim(graph, claim, tolerance)
        })
        .collect();

    tracing::info!(results = results.len(), "claims verified");
    results
}

fn classify_claim(graph: &Graph, claim: &ClaimNode, tolerance: &ToleranceConfig) -> Vec<ClassificationResult> {
    if claim.mentions.is_empty() {
        return vec![ClassificationResult {
            claim_id: claim.id.clone(),
            mention: None,
            variable: None,
            period: None,
            kind: ClassificationKind::Qualitative,
            reason: ReasonCode::NoNumericValue,
            claim_raw: None,
            claim_value: None,
            cell_id: None,
            cell_raw: None,
            cell_value: None,
            table_id: None,
            provenance: None,
            delta: None,
            tolerance: None,
            detail: "claim carries no numeric mention".into(),
        }];
    }
    claim
        .mentions
        .iter()
        .map(|m| classify_mention(graph, claim, m, tolerance))
        .collect()
}

fn classify_mention(
    graph: &Graph,
    claim: &ClaimNode,
    mention: &Mention,
    tolerance: &ToleranceConfig,
) -> ClassificationResult {
    let mut result = ClassificationResult {
        claim_id: claim.id.clone(),
        mention: Some(mention.index),
        variable: Some(mention.variable.clone()),
        period: mention.period.clone(),
        kind: ClassificationKind::Qualitative,
        reason: ReasonCode::NoNumericValue,
        claim_raw: mention.raw_value.clone(),
        claim_value: mention.value,
        cell_id: None,
        cell_raw: None,
        cell_value: None,
        table_id: None,
        provenance: None,
        delta: None,
        tolerance: None,
        detail: String::new(),
    };

    let Some(claim_value) = mention.value else {
        result.detail = match &mention.raw_value {
            Some(raw) => format!("'{raw}' is not a numeric value"),
            None => "mention carries no value".into(),
        };
        return result;
    };

    if let Resolution::MatcherUnavailable { message } = &mention.resolution {
        result.kind = ClassificationKind::Unverifiable;
        result.reason = ReasonCode::MatcherUnavailable;
        result.detail = message.clone();
        return result;
    }

    let edge = graph.accepted_edge(&claim.id, mention.index);
    let cell = edge.and_then(|e| graph.cell(&e.cell_id));
    let (Some(edge), Some(cell), Some(cell_value)) = (edge, cell, cell.and_then(|c| c.value)) else {
        result.kind = ClassificationKind::Unverifiable;
        result.reason = ReasonCode::NoCandidate;
        result.detail = format!(
            "no table cell for {}{} clears the similarity floor",
            mention.variable,
            mention.period.as_deref().map(|p| format!(" ({p})")).unwrap_or_default()
        );
        return result;
    };

    result.cell_id = Some(cell.id.clone());
    result.cell_raw = Some(cell.raw.clone());
    result.cell_value = Some(cell_value);
    result.table_id = Some(cell.table_id.clone());
    result.provenance = Some(edge.provenance);

    let location = format!("{} / {} in {}", cell.row_label, cell.column_label, cell.table_id);

    if !claim_value.scale_compatible(&cell_value) {
        result.kind = ClassificationKind::Mismatch;
        result.reason = ReasonCode::ScaleMismatch;
        result.detail = format!(
            "claim in {} vs table in {} ({location})",
            claim_value.unit_label(),
            cell_value.unit_label()
        );
        return result;
    }

    let delta = (claim_value.value - cell_value.value).abs();
    let bound = tolerance_bound(claim_value.value, cell_value.value, tolerance);
    result.delta = Some(delta);
    result.tolerance = Some(bound);

    let claim_raw = mention.raw_value.as_deref().unwrap_or_default();
    if within_tolerance(claim_value.value, cell_value.value, tolerance) {
        result.kind = ClassificationKind::Match;
        result.reason = ReasonCode::WithinTolerance;
        result.detail = format!("claim {claim_raw} | table {} ({location})", cell.raw);
    } else {
        result.kind = ClassificationKind::Mismatch;
        result.reason = ReasonCode::OutsideTolerance;
        result.detail = format!(
            "claim {claim_raw} | table {} ({location}), off by {delta:.3} > {bound:.3}",
            cell.raw
        );
    }
    tracing::debug!(claim = %claim.id, mention = mention.index, kind = %result.kind, "classified");
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CellNode, GraphEdges, GraphNodes, MatchEdge, Provenance};
    use crate::value::{parse_value, ParsedValue};

    fn cell(id: &str, raw: &str, value: Option<ParsedValue>) -> CellNode {
        CellNode {
            id: id.into(),
            table_id: "T1".into(),
            row: 0,
            column: 0,
            row_label: "Row".into(),
            column_label: "2023".into(),
            period: Some("2023".into()),
            raw: raw.into(),
            value,
        }
    }

    fn mention(raw: Option<&str>, value: Option<ParsedValue>, resolution: Resolution) -> Mention {
        Mention {
            index: 0,
            variable: "real_gdp".into(),
            period: Some("2023".into()),
            raw_value: raw.map(str::to_string),
            unit_hint: None,
            value,
            resolution,
        }
    }

    /// One claim, one mention, optionally resolved to one cell.
    fn single(claim_raw: &str, cell_raw: Option<(&str, ParsedValue)>) -> Graph {
        let value = parse_value(claim_raw).ok();
        let (cells, matches, resolution) = match cell_raw {
            Some((raw, v)) => (
                vec![cell("c0", raw, Some(v))],
                vec![MatchEdge {
                    claim_id: "claim_0".into(),
                    mention: 0,
                    cell_id: "c0".into(),
                    rank: 1,
                    score: 1.0,
                    provenance: Provenance::Deterministic,
                    justification: String::new(),
                }],
                Resolution::Resolved { cell_id: "c0".into() },
            ),
            None => (Vec::new(), Vec::new(), Resolution::NoCandidate),
        };
        let resolution = if value.is_none() { Resolution::NotAttempted } else { resolution };
        let claim = ClaimNode {
            id: "claim_0".into(),
            text: "text".into(),
            page: None,
            likely_table: None,
            variables: Vec::new(),
            mentions: vec![mention(Some(claim_raw), value, resolution)],
        };
        Graph::new(
            GraphNodes {
                claims: vec![claim],
                tables: Vec::new(),
                cells,
            },
            GraphEdges {
                matches,
                references: Vec::new(),
            },
        )
    }

    fn only(graph: &Graph) -> ClassificationResult {
        let mut results = verify(graph, &ToleranceConfig::default());
        assert_eq!(results.len(), 1);
        results.remove(0)
    }

    #[test]
    fn identical_values_match() {
        let r = only(&single("3.2", Some(("3.2", ParsedValue::level(3.2)))));
        assert_eq!(r.kind, ClassificationKind::Match);
        assert_eq!(r.reason, ReasonCode::WithinTolerance);
        assert_eq!(r.table_id.as_deref(), Some("T1"));
        assert_eq!(r.provenance, Some(Provenance::Deterministic));
    }

    #[test]
    fn outside_tolerance_mismatches() {
        let r = only(&single("-2", Some(("-2.2", ParsedValue::level(-2.2)))));
        assert_eq!(r.kind, ClassificationKind::Mismatch);
        assert_eq!(r.reason, ReasonCode::OutsideTolerance);
        assert!(r.delta.unwrap() > r.tolerance.unwrap());
    }

    #[test]
    fn scale_mismatch_wins_over_numeric_closeness() {
        let cell_value = ParsedValue::scaled(1.15, crate::value::Magnitude::Million);
        let r = only(&single("1.15 trillion", Some(("1.15", cell_value))));
        assert_eq!(r.kind, ClassificationKind::Mismatch);
        assert_eq!(r.reason, ReasonCode::ScaleMismatch);
        assert!(r.detail.contains("trillion"));
        assert!(r.delta.is_none());
    }

    #[test]
    fn no_candidate_is_unverifiable() {
        let r = only(&single("59.3", None));
        assert_eq!(r.kind, ClassificationKind::Unverifiable);
        assert_eq!(r.reason, ReasonCode::NoCandidate);
    }

    #[test]
    fn unparseable_value_is_qualitative() {
        let r = only(&single("appreciated", None));
        assert_eq!(r.kind, ClassificationKind::Qualitative);
        assert_eq!(r.reason, ReasonCode::NoNumericValue);
    }

    #[test]
    fn claim_without_mentions_is_qualitative() {
        let mut graph = single("3.2", None);
        graph.nodes.claims[0].mentions.clear();
        let r = only(&graph);
        assert_eq!(r.kind, ClassificationKind::Qualitative);
        assert_eq!(r.mention, None);
    }

    #[test]
    fn matcher_unavailable_is_unverifiable() {
        let mut graph = single("3.2", None);
        graph.nodes.claims[0].mentions[0].resolution = Resolution::MatcherUnavailable {
            message: "timed out".into(),
        };
        let r = only(&graph);
        assert_eq!(r.kind, ClassificationKind::Unverifiable);
        assert_eq!(r.reason, ReasonCode::MatcherUnavailable);
        assert_eq!(r.detail, "timed out");
    }

    #[test]
    fn lower_ranked_edges_are_ignored() {
        let mut graph = single("3.2", Some(("3.2", ParsedValue::level(3.2))));
        graph.edges.matches[0].rank = 2;
        let graph = Graph::new(graph.nodes.clone(), graph.edges.clone());
        let r = only(&graph);
        assert_eq!(r.kind, ClassificationKind::Unverifiable);
    }
}
