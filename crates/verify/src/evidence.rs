use std::collections::BTreeMap;

use crate::model::{
    ClassificationKind, ClassificationResult, ConsistencyGroup, Digest, FindingEntry, Graph,
    InconsistencyEntry, Provenance, ReasonCode, Summary,
};

/// Compute summary statistics from classifications and consistency groups.
pub fn compute_summary(
    graph: &Graph,
    results: &[ClassificationResult],
    consistency: &[ConsistencyGroup],
) -> Summary {
    let mut kind_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut matches = 0;
    let mut mismatches = 0;
    let mut unverifiable = 0;
    let mut qualitative = 0;
    let mut scale_mismatches = 0;
    let mut matcher_unavailable = 0;

    for r in results {
        *kind_counts.entry(r.kind.to_string()).or_insert(0) += 1;

        match r.kind {
            ClassificationKind::Match => matches += 1,
            ClassificationKind::Mismatch => mismatches += 1,
            ClassificationKind::Unverifiable => unverifiable += 1,
            ClassificationKind::Qualitative => qualitative += 1,
        }
        match r.reason {
            ReasonCode::ScaleMismatch => scale_mismatches += 1,
            ReasonCode::MatcherUnavailable => matcher_unavailable += 1,
            _ => {}
        }
    }

    let numeric = matches + mismatches + unverifiable;
    let match_pct = if numeric > 0 {
        (matches as f64 / numeric as f64 * 100.0).round() as u32
    } else {
        0
    };

    Summary {
        total_claims: graph.nodes.claims.len(),
        total_tables: graph.nodes.tables.len(),
        total_cells: graph.nodes.cells.len(),
        total_results: results.len(),
        matches,
        mismatches,
        unverifiable,
        qualitative,
        scale_mismatches,
        matcher_unavailable,
        consistency_groups: consistency.len(),
        inconsistencies: consistency.iter().filter(|g| g.is_inconsistent()).count(),
        match_pct,
        kind_counts,
    }
}

/// Pull the renderer's lists out of the results: cross-table
/// inconsistencies, mismatches, and confirmed matches per provenance.
pub fn build_digest(
    graph: &Graph,
    results: &[ClassificationResult],
    consistency: &[ConsistencyGroup],
) -> Digest {
    let inconsistencies = consistency
        .iter()
        .filter(|g| g.is_inconsistent())
        .map(|g| InconsistencyEntry {
            variable_key: g.variable_key.clone(),
            period: g.period.clone(),
            reason: g.reason,
            sources: g
                .observations
                .iter()
                .map(|o| (o.table_id.clone(), o.raw.clone()))
                .collect(),
        })
        .collect();

    let mut mismatches = Vec::new();
    let mut matches_by_provenance: BTreeMap<Provenance, Vec<FindingEntry>> = BTreeMap::new();
    for r in results {
        let Some(entry) = finding(graph, r) else {
            continue;
        };
        match (r.kind, r.provenance) {
            (ClassificationKind::Mismatch, _) => mismatches.push(entry),
            (ClassificationKind::Match, Some(p)) => matches_by_provenance.entry(p).or_default().push(entry),
            _ => {}
        }
    }

    Digest {
        inconsistencies,
        mismatches,
        matches_by_provenance,
    }
}

fn finding(graph: &Graph, r: &ClassificationResult) -> Option<FindingEntry> {
    let table_id = r.table_id.clone()?;
    let matched_value = r.cell_raw.clone()?;
    let mention = r.mention?;
    let claim = graph.nodes.claims.iter().find(|c| c.id == r.claim_id)?;
    let justification = graph
        .accepted_edge(&r.claim_id, mention)
        .map(|e| e.justification.clone())
        .filter(|j| !j.is_empty());

    Some(FindingEntry {
        claim_id: r.claim_id.clone(),
        claim_text: claim.text.clone(),
        variable: r.variable.clone().unwrap_or_default(),
        period: r.period.clone(),
        claim_value: r.claim_raw.clone().unwrap_or_default(),
        matched_value,
        table_id,
        reason: r.reason,
        justification,
    })
}
