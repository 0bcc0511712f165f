//! Document context and graph construction.
//!
//! The context (table nodes, cell nodes, one index per table) is built once
//! per document and shared read-only while claims resolve in parallel.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::config::MatchingConfig;
use crate::index::{normalize_label, period_key, CellIndex};
use crate::input::{ClaimRecord, DocumentInput, SourceTable};
use crate::matcher::{ClaimFragment, Matcher, SearchScope};
use crate::model::{
    CellNode, ClaimNode, Graph, GraphEdges, GraphNodes, MatchEdge, Mention, ReferenceEdge,
    Resolution, TableNode,
};
use crate::value::parse_value;

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

pub struct DocumentContext {
    pub tables: Vec<TableNode>,
    pub cells: Vec<CellNode>,
    indexes: Vec<CellIndex>,
    by_id: HashMap<String, usize>,
}

impl DocumentContext {
    pub fn build(input: &DocumentInput) -> Self {
        let mut tables = Vec::with_capacity(input.tables.len());
        let mut cells = Vec::new();
        for source in &input.tables {
            let (table, table_cells) = table_nodes(source);
            tables.push(table);
            cells.extend(table_cells);
        }

        let indexes: Vec<CellIndex> = tables.iter().map(|t| CellIndex::build(t, &cells)).collect();
        let by_id = tables
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.clone(), i))
            .collect();

        tracing::debug!(
            tables = tables.len(),
            cells = cells.len(),
            indexed = indexes.iter().map(CellIndex::len).sum::<usize>(),
            "document context built"
        );

        Self {
            tables,
            cells,
            indexes,
            by_id,
        }
    }

    /// Table named by a claim's hint: exact id, then case-insensitive id,
    /// then normalized id or title.
    pub fn resolve_table_hint(&self, hint: &str) -> Option<usize> {
        if let Some(&i) = self.by_id.get(hint) {
            return Some(i);
        }
        if let Some(i) = self.tables.iter().position(|t| t.id.eq_ignore_ascii_case(hint)) {
            return Some(i);
        }
        let norm = normalize_label(&hint.replace('_', " "));
        if norm.is_empty() {
            return None;
        }
        self.tables.iter().position(|t| {
            normalize_label(&t.id.replace('_', " ")) == norm
                || t.title.as_deref().is_some_and(|title| normalize_label(title) == norm)
        })
    }

    fn scope(&self, only: Option<usize>) -> SearchScope<'_> {
        let indexes = match only {
            Some(i) => vec![&self.indexes[i]],
            None => self.indexes.iter().collect(),
        };
        SearchScope {
            indexes,
            tables: &self.tables,
            cells: &self.cells,
        }
    }
}

/// Row-major cells for one table. Each cell's unit comes from its raw text,
/// else its row label ("Exports (millions)"), else the table's units line.
fn table_nodes(source: &SourceTable) -> (TableNode, Vec<CellNode>) {
    let columns = &source.columns;
    let mut cells = Vec::new();
    for (row, src_row) in source.rows.iter().enumerate() {
        for (col_label, raw) in &src_row.cells {
            let column = columns.iter().position(|c| c == col_label).unwrap_or(columns.len());
            let value = parse_value(raw).ok().map(|v| {
                v.with_unit_hint(Some(&src_row.label))
                    .with_unit_hint(source.units.as_deref())
            });
            cells.push(CellNode {
                id: CellNode::make_id(&source.id, row, column),
                table_id: source.id.clone(),
                row,
                column,
                row_label: src_row.label.clone(),
                column_label: col_label.clone(),
                period: period_key(col_label),
                raw: raw.clone(),
                value,
            });
        }
    }
    cells.sort_by_key(|c| (c.row, c.column));

    let table = TableNode {
        id: source.id.clone(),
        title: source.title.clone(),
        page: source.page,
        units: source.units.clone(),
        file: source.file.clone(),
        row_labels: source.rows.iter().map(|r| r.label.clone()).collect(),
        column_labels: columns.clone(),
    };
    (table, cells)
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct GraphBuilder<'a> {
    matcher: &'a dyn Matcher,
    fallback_to_all_tables: bool,
}

struct ResolvedClaim {
    node: ClaimNode,
    edges: Vec<MatchEdge>,
    reference: Option<ReferenceEdge>,
}

impl<'a> GraphBuilder<'a> {
    pub fn new(matcher: &'a dyn Matcher, matching: &MatchingConfig) -> Self {
        Self {
            matcher,
            fallback_to_all_tables: matching.fallback_to_all_tables,
        }
    }

    /// Resolve every claim against the context and assemble the graph.
    /// Claims resolve in parallel; output keeps claim order.
    pub fn build(&self, ctx: DocumentContext, claims: &[ClaimRecord]) -> Graph {
        // Worker threads do not inherit the caller's span.
        let span = tracing::Span::current();
        let resolved: Vec<ResolvedClaim> = claims
            .par_iter()
            .enumerate()
            .map(|(i, record)| {
                let _enter = span.enter();
                self.resolve_claim(&ctx, i, record)
            })
            .collect();

        let mut nodes = GraphNodes {
            claims: Vec::with_capacity(resolved.len()),
            tables: ctx.tables,
            cells: ctx.cells,
        };
        let mut edges = GraphEdges::default();
        for r in resolved {
            nodes.claims.push(r.node);
            edges.matches.extend(r.edges);
            edges.references.extend(r.reference);
        }

        tracing::info!(
            claims = nodes.claims.len(),
            match_edges = edges.matches.len(),
            "graph built"
        );
        Graph::new(nodes, edges)
    }

    fn resolve_claim(&self, ctx: &DocumentContext, i: usize, record: &ClaimRecord) -> ResolvedClaim {
        // `DocumentInput::parse` has already assigned collision-free ids.
        let id = record.id.clone().unwrap_or_else(|| format!("claim_{i}"));

        let hinted = record.table_hint().and_then(|hint| {
            let found = ctx.resolve_table_hint(hint);
            if found.is_none() {
                tracing::debug!(claim = %id, hint, "likely_table names no table; searching all");
            }
            found
        });

        let mut mentions: Vec<Mention> = record
            .values_mentioned
            .iter()
            .enumerate()
            .map(|(index, m)| {
                let raw_value = m.raw_value();
                let value = raw_value
                    .as_deref()
                    .and_then(|raw| parse_value(raw).ok())
                    .map(|v| v.with_unit_hint(m.unit.as_deref()));
                if raw_value.is_some() && value.is_none() {
                    tracing::debug!(claim = %id, mention = index, raw = ?raw_value, "value does not parse");
                }
                Mention {
                    index,
                    variable: m.variable.clone(),
                    period: m.period_text(),
                    raw_value,
                    unit_hint: m.unit.clone(),
                    value,
                    resolution: Resolution::NotAttempted,
                }
            })
            .collect();

        let mut edges = Vec::new();
        for mention in mentions.iter_mut() {
            if mention.value.is_none() {
                continue;
            }
            let fragment = ClaimFragment {
                claim_id: &id,
                claim_text: &record.claim_text,
                mention,
            };

            let mut outcome = self.matcher.resolve(&fragment, &ctx.scope(hinted));
            if hinted.is_some() && self.fallback_to_all_tables && matches!(&outcome, Ok(c) if c.is_empty()) {
                tracing::debug!(claim = %id, mention = mention.index, "no candidate in hinted table; widening");
                outcome = self.matcher.resolve(&fragment, &ctx.scope(None));
            }

            mention.resolution = match outcome {
                Ok(candidates) if candidates.is_empty() => Resolution::NoCandidate,
                Ok(candidates) => {
                    let accepted = ctx.cells[candidates[0].cell].id.clone();
                    edges.extend(candidates.into_iter().enumerate().map(|(rank, c)| MatchEdge {
                        claim_id: id.clone(),
                        mention: mention.index,
                        cell_id: ctx.cells[c.cell].id.clone(),
                        rank: rank + 1,
                        score: c.score,
                        provenance: self.matcher.provenance(),
                        justification: c.justification,
                    }));
                    Resolution::Resolved { cell_id: accepted }
                }
                Err(e) => {
                    tracing::warn!(claim = %id, mention = mention.index, error = %e, "matcher unavailable");
                    Resolution::MatcherUnavailable {
                        message: e.to_string(),
                    }
                }
            };
        }

        let reference = hinted.map(|t| ReferenceEdge {
            claim_id: id.clone(),
            table_id: ctx.tables[t].id.clone(),
        });

        ResolvedClaim {
            node: ClaimNode {
                id,
                text: record.claim_text.clone(),
                page: record.page_or_section.clone(),
                likely_table: record.table_hint().map(str::to_string),
                variables: record.variables_referenced.clone(),
                mentions,
            },
            edges,
            reference,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{Candidate, DeterministicMatcher, MatcherError};
    use crate::model::Provenance;
    use crate::value::Magnitude;

    const TABLE_A: &str = r#"{
        "table_id": "Table_1",
        "table_title": "Selected Economic Indicators",
        "units": "Millions of rupees",
        "data": {
            "Real GDP growth (percent)": {"2022": "2.1", "2023": "3.2"},
            "Reserve money": {"2019": "4,564", "2020": "4,901"},
            "Others": {"2023": "1.7"},
            "Others 1/": {"2023": "0.2"}
        }
    }"#;

    const TABLE_B: &str = r#"{
        "table_id": "Table_2",
        "rows": [{"label": "Reserve money", "values": {"2019": "4.3"}}]
    }"#;

    fn input(claims: &str) -> DocumentInput {
        DocumentInput::parse(
            "doc",
            claims,
            vec![
                ("Table_1.json".into(), TABLE_A.into()),
                ("Table_2.json".into(), TABLE_B.into()),
            ],
        )
        .unwrap()
    }

    struct Unreachable;

    impl Matcher for Unreachable {
        fn provenance(&self) -> Provenance {
            Provenance::Assisted
        }

        fn resolve(&self, _: &ClaimFragment<'_>, _: &SearchScope<'_>) -> Result<Vec<Candidate>, MatcherError> {
            Err(MatcherError::Unavailable {
                attempts: 3,
                message: "connection refused".into(),
            })
        }
    }

    #[test]
    fn context_applies_row_and_table_units() {
        let ctx = DocumentContext::build(&input("[]"));
        let growth = ctx.cells.iter().find(|c| c.raw == "3.2").unwrap();
        assert_eq!(growth.value.unwrap().unit, crate::value::Unit::Percent);
        let reserve = ctx.cells.iter().find(|c| c.raw == "4,564").unwrap();
        assert_eq!(reserve.value.unwrap().magnitude, Some(Magnitude::Million));
        assert_eq!(reserve.period.as_deref(), Some("2019"));
    }

    #[test]
    fn table_hint_resolution() {
        let ctx = DocumentContext::build(&input("[]"));
        assert_eq!(ctx.resolve_table_hint("Table_2"), Some(1));
        assert_eq!(ctx.resolve_table_hint("table_1"), Some(0));
        assert_eq!(ctx.resolve_table_hint("Table 1"), Some(0));
        assert_eq!(ctx.resolve_table_hint("selected economic indicators"), Some(0));
        assert_eq!(ctx.resolve_table_hint("Table_7"), None);
    }

    #[test]
    fn builds_edges_and_references() {
        let input = input(
            r#"[{"claim_text": "Growth reached 3.2 percent in 2023.",
                 "likely_table": "Table_1",
                 "values_mentioned": [{"variable": "real_gdp", "value": "3.2", "year": "2023"}]},
                {"claim_text": "The exchange rate appreciated.", "likely_table": "unknown"}]"#,
        );
        let matcher = DeterministicMatcher::new(&MatchingConfig::default());
        let graph = GraphBuilder::new(&matcher, &MatchingConfig::default())
            .build(DocumentContext::build(&input), &input.claims);

        assert_eq!(graph.nodes.claims.len(), 2);
        assert_eq!(graph.nodes.claims[0].id, "claim_0");
        assert_eq!(graph.edges.references.len(), 1);
        assert_eq!(graph.edges.references[0].table_id, "Table_1");

        let edge = graph.accepted_edge("claim_0", 0).unwrap();
        let cell = graph.cell(&edge.cell_id).unwrap();
        assert_eq!(cell.raw, "3.2");
        assert_eq!(edge.provenance, Provenance::Deterministic);
        assert!(matches!(
            &graph.nodes.claims[0].mentions[0].resolution,
            Resolution::Resolved { cell_id } if cell_id == &edge.cell_id
        ));
        assert!(graph.nodes.claims[1].mentions.is_empty());
    }

    #[test]
    fn hinted_table_restricts_search_unless_fallback() {
        let input = input(
            r#"[{"claim_text": "Reserve money stood at 4.3 in 2019.",
                 "likely_table": "Table_1",
                 "values_mentioned": [{"variable": "reserve_money", "value": "4.3", "year": "2019"}]}]"#,
        );
        let matcher = DeterministicMatcher::new(&MatchingConfig::default());
        let graph = GraphBuilder::new(&matcher, &MatchingConfig::default())
            .build(DocumentContext::build(&input), &input.claims);
        let edge = graph.accepted_edge("claim_0", 0).unwrap();
        assert!(edge.cell_id.starts_with("cell:Table_1:"));
        // Both tables hold a reserve money 2019 cell, but only Table_1 was searched.
        assert!(graph.edges.matches.iter().all(|e| e.cell_id.starts_with("cell:Table_1:")));
    }

    #[test]
    fn fallback_widens_empty_hinted_search() {
        let input = input(
            r#"[{"claim_text": "Reserve money stood at 4.3 in 2019.",
                 "likely_table": "Table_2",
                 "values_mentioned": [{"variable": "real_gdp", "value": "3.2", "year": "2023"}]}]"#,
        );
        let matching = MatchingConfig {
            fallback_to_all_tables: true,
            ..MatchingConfig::default()
        };
        let matcher = DeterministicMatcher::new(&matching);
        let graph = GraphBuilder::new(&matcher, &matching).build(DocumentContext::build(&input), &input.claims);
        let edge = graph.accepted_edge("claim_0", 0).unwrap();
        assert!(edge.cell_id.starts_with("cell:Table_1:"));
    }

    #[test]
    fn unavailable_matcher_degrades_mention() {
        let input = input(
            r#"[{"claim_text": "Growth reached 3.2 percent in 2023.",
                 "values_mentioned": [{"variable": "real_gdp", "value": "3.2", "year": "2023"},
                                      {"variable": "real_gdp", "value": "strong"}]}]"#,
        );
        let graph = GraphBuilder::new(&Unreachable, &MatchingConfig::default())
            .build(DocumentContext::build(&input), &input.claims);
        let mentions = &graph.nodes.claims[0].mentions;
        assert!(matches!(mentions[0].resolution, Resolution::MatcherUnavailable { .. }));
        // Non-numeric mentions never reach the matcher.
        assert_eq!(mentions[1].resolution, Resolution::NotAttempted);
        assert!(graph.edges.matches.is_empty());
    }
}
