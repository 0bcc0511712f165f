use std::cmp::Ordering;

use thiserror::Error;

use crate::config::MatchingConfig;
use crate::index::{search_phrases, CellIndex, CellQuery, RankedCell};
use crate::model::{CellNode, Mention, Provenance, TableNode};

// ---------------------------------------------------------------------------
// Boundary
// ---------------------------------------------------------------------------

/// What the matcher is asked about: one numeric mention of one claim.
#[derive(Debug, Clone, Copy)]
pub struct ClaimFragment<'a> {
    pub claim_id: &'a str,
    pub claim_text: &'a str,
    pub mention: &'a Mention,
}

/// The tables a mention may resolve into, plus the document's nodes so a
/// matcher can describe candidates.
#[derive(Debug, Clone)]
pub struct SearchScope<'a> {
    pub indexes: Vec<&'a CellIndex>,
    pub tables: &'a [TableNode],
    pub cells: &'a [CellNode],
}

/// A proposed referent. `cell` indexes [`SearchScope::cells`].
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub cell: usize,
    pub score: f64,
    pub justification: String,
}

#[derive(Debug, Error)]
pub enum MatcherError {
    /// The backing service could not be reached or gave no usable answer.
    #[error("matcher unavailable after {attempts} attempt(s): {message}")]
    Unavailable { attempts: u32, message: String },
}

/// Resolves a claim fragment to ranked candidate cells. Implementations
/// must be deterministic in their ordering for a given answer; the graph
/// builder accepts rank 1 and keeps the rest for audit.
pub trait Matcher: Send + Sync {
    fn provenance(&self) -> Provenance;

    fn resolve(
        &self,
        fragment: &ClaimFragment<'_>,
        scope: &SearchScope<'_>,
    ) -> Result<Vec<Candidate>, MatcherError>;
}

// ---------------------------------------------------------------------------
// Deterministic
// ---------------------------------------------------------------------------

/// Similarity search over the cell index. Never fails.
#[derive(Debug, Clone)]
pub struct DeterministicMatcher {
    floor: f64,
    max_candidates: usize,
}

impl DeterministicMatcher {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            floor: config.similarity_floor,
            max_candidates: config.max_candidates,
        }
    }

    /// Up to `limit` candidates across every index in scope, ranked by
    /// score then scope order. Also used by the assisted matcher with a
    /// relaxed floor.
    pub fn shortlist(
        fragment: &ClaimFragment<'_>,
        scope: &SearchScope<'_>,
        floor: f64,
        limit: usize,
    ) -> Vec<Candidate> {
        let mention = fragment.mention;
        let query = CellQuery {
            phrases: search_phrases(&mention.variable),
            period: mention.period.clone(),
            target: mention.value.map(|v| v.value),
            floor,
        };
        if query.phrases.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<RankedCell> = scope
            .indexes
            .iter()
            .flat_map(|index| index.lookup(&query))
            .collect();
        // Stable: equal hits keep scope order, then table order.
        hits.sort_by(compare_hits);
        hits.truncate(limit);

        hits.into_iter()
            .map(|hit| Candidate {
                cell: hit.cell,
                score: hit.score,
                justification: describe(hit, &scope.cells[hit.cell]),
            })
            .collect()
    }
}

impl Matcher for DeterministicMatcher {
    fn provenance(&self) -> Provenance {
        Provenance::Deterministic
    }

    fn resolve(
        &self,
        fragment: &ClaimFragment<'_>,
        scope: &SearchScope<'_>,
    ) -> Result<Vec<Candidate>, MatcherError> {
        Ok(Self::shortlist(fragment, scope, self.floor, self.max_candidates))
    }
}

/// Cross-table ordering; within one table [`CellIndex::lookup`] already
/// applied row and column order.
fn compare_hits(a: &RankedCell, b: &RankedCell) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(b.exact_period.cmp(&a.exact_period))
        .then(a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal))
}

fn describe(hit: RankedCell, cell: &CellNode) -> String {
    let period = if hit.exact_period {
        "exact period"
    } else {
        "period not pinned"
    };
    format!(
        "row '{}' similarity {:.2}, column '{}' ({period}) in {}",
        cell.row_label, hit.row_score, cell.column_label, cell.table_id
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::period_key;
    use crate::model::Resolution;
    use crate::value::parse_value;

    fn doc() -> (Vec<TableNode>, Vec<CellNode>) {
        let mut tables = Vec::new();
        let mut cells = Vec::new();
        for (id, label, col, raw) in [
            ("T1", "Real GDP growth", "2023", "3.2"),
            ("T2", "Real GDP growth", "2023", "3.1"),
            ("T2", "Broad money", "2023", "12.0"),
        ] {
            if !tables.iter().any(|t: &TableNode| t.id == id) {
                tables.push(TableNode {
                    id: id.into(),
                    title: None,
                    page: None,
                    units: None,
                    file: format!("{id}.json"),
                    row_labels: Vec::new(),
                    column_labels: vec![col.into()],
                });
            }
            let table = tables.iter_mut().find(|t| t.id == id).unwrap();
            let row = table.row_labels.len();
            table.row_labels.push(label.into());
            cells.push(CellNode {
                id: CellNode::make_id(id, row, 0),
                table_id: id.into(),
                row,
                column: 0,
                row_label: label.into(),
                column_label: col.into(),
                period: period_key(col),
                raw: raw.into(),
                value: parse_value(raw).ok(),
            });
        }
        (tables, cells)
    }

    fn mention(variable: &str, period: Option<&str>, raw: &str) -> Mention {
        Mention {
            index: 0,
            variable: variable.into(),
            period: period.map(str::to_string),
            raw_value: Some(raw.into()),
            unit_hint: None,
            value: parse_value(raw).ok(),
            resolution: Resolution::NotAttempted,
        }
    }

    #[test]
    fn ranks_across_tables_in_scope_order() {
        let (tables, cells) = doc();
        let indexes: Vec<CellIndex> = tables.iter().map(|t| CellIndex::build(t, &cells)).collect();
        let scope = SearchScope {
            indexes: indexes.iter().collect(),
            tables: &tables,
            cells: &cells,
        };
        let m = mention("real_gdp", Some("2023"), "3.2");
        let fragment = ClaimFragment {
            claim_id: "claim_0",
            claim_text: "Growth reached 3.2 percent in 2023.",
            mention: &m,
        };
        let matcher = DeterministicMatcher::new(&MatchingConfig::default());
        let candidates = matcher.resolve(&fragment, &scope).unwrap();
        assert_eq!(candidates.len(), 2);
        assert_eq!(cells[candidates[0].cell].table_id, "T1");
        assert_eq!(cells[candidates[1].cell].table_id, "T2");
        assert!(candidates[0].justification.contains("Real GDP growth"));
    }

    #[test]
    fn respects_max_candidates_and_scope() {
        let (tables, cells) = doc();
        let indexes: Vec<CellIndex> = tables.iter().map(|t| CellIndex::build(t, &cells)).collect();
        let scope = SearchScope {
            indexes: vec![&indexes[1]],
            tables: &tables,
            cells: &cells,
        };
        let m = mention("real_gdp", Some("2023"), "3.2");
        let fragment = ClaimFragment {
            claim_id: "claim_0",
            claim_text: "",
            mention: &m,
        };
        let config = MatchingConfig {
            max_candidates: 1,
            ..MatchingConfig::default()
        };
        let candidates = DeterministicMatcher::new(&config).resolve(&fragment, &scope).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(cells[candidates[0].cell].table_id, "T2");
    }

    #[test]
    fn nothing_above_floor_is_empty() {
        let (tables, cells) = doc();
        let indexes: Vec<CellIndex> = tables.iter().map(|t| CellIndex::build(t, &cells)).collect();
        let scope = SearchScope {
            indexes: indexes.iter().collect(),
            tables: &tables,
            cells: &cells,
        };
        let m = mention("tourism_receipts", None, "59.3");
        let fragment = ClaimFragment {
            claim_id: "claim_0",
            claim_text: "",
            mention: &m,
        };
        let matcher = DeterministicMatcher::new(&MatchingConfig::default());
        assert!(matcher.resolve(&fragment, &scope).unwrap().is_empty());
    }
}
