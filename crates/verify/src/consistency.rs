//! Cross-table consistency: the same variable for the same period reported
//! by two or more tables must agree within tolerance. Claims play no part.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::{ConsistencyConfig, ToleranceConfig};
use crate::index::normalize_label;
use crate::model::{ConsistencyGroup, ConsistencyVerdict, Graph, Observation, ReasonCode};
use crate::value::within_tolerance;

/// Group numeric cells by (normalized row label, period) and judge every
/// group that spans at least two tables. Each table row contributes its
/// first column for a period; duplicate rows stay separate observations.
pub fn check(graph: &Graph, config: &ConsistencyConfig, tolerance: &ToleranceConfig) -> Vec<ConsistencyGroup> {
    let mut groups: BTreeMap<(String, String), Vec<Observation>> = BTreeMap::new();
    let mut taken: BTreeSet<(&str, usize, &str)> = BTreeSet::new();

    for cell in &graph.nodes.cells {
        let (Some(value), Some(period)) = (cell.value, cell.period.as_deref()) else {
            continue;
        };
        let key = normalize_label(&cell.row_label);
        if key.chars().count() < config.min_label_len {
            continue;
        }
        // First column wins per (table, row, period), e.g. "2023" over "2023_Proj.".
        if !taken.insert((cell.table_id.as_str(), cell.row, period)) {
            continue;
        }
        groups
            .entry((key, period.to_string()))
            .or_default()
            .push(Observation {
                table_id: cell.table_id.clone(),
                cell_id: cell.id.clone(),
                row_label: cell.row_label.clone(),
                column_label: cell.column_label.clone(),
                raw: cell.raw.clone(),
                value,
            });
    }

    let findings: Vec<ConsistencyGroup> = groups
        .into_iter()
        .filter(|(_, obs)| obs.iter().map(|o| o.table_id.as_str()).collect::<BTreeSet<_>>().len() >= 2)
        .map(|((variable_key, period), observations)| judge(variable_key, period, observations, tolerance))
        .collect();

    let inconsistent = findings.iter().filter(|g| g.is_inconsistent()).count();
    tracing::info!(groups = findings.len(), inconsistent, "cross-table check done");
    findings
}

fn judge(
    variable_key: String,
    period: String,
    observations: Vec<Observation>,
    tolerance: &ToleranceConfig,
) -> ConsistencyGroup {
    let min = observations.iter().map(|o| o.value.value).fold(f64::INFINITY, f64::min);
    let max = observations.iter().map(|o| o.value.value).fold(f64::NEG_INFINITY, f64::max);
    let spread = max - min;

    let scale_clash = observations.iter().enumerate().any(|(i, a)| {
        observations[i + 1..]
            .iter()
            .any(|b| !a.value.scale_compatible(&b.value))
    });

    let (verdict, reason) = if scale_clash {
        (ConsistencyVerdict::Inconsistent, Some(ReasonCode::ScaleMismatch))
    } else if !within_tolerance(min, max, tolerance) {
        (ConsistencyVerdict::Inconsistent, Some(ReasonCode::OutsideTolerance))
    } else {
        (ConsistencyVerdict::Consistent, None)
    };

    let detail = match verdict {
        ConsistencyVerdict::Inconsistent => format!(
            "{variable_key} ({period}): {}",
            observations
                .iter()
                .map(|o| format!("{} ({})", o.raw, o.table_id))
                .collect::<Vec<_>>()
                .join(" vs ")
        ),
        ConsistencyVerdict::Consistent => format!(
            "{variable_key} ({period}): {} across {} observations",
            observations[0].raw,
            observations.len()
        ),
    };

    ConsistencyGroup {
        variable_key,
        period,
        verdict,
        reason,
        spread,
        detail,
        observations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::period_key;
    use crate::model::{CellNode, GraphEdges, GraphNodes};
    use crate::value::{parse_value, Magnitude, ParsedValue};

    fn cell(table: &str, row: usize, label: &str, col: &str, raw: &str) -> CellNode {
        CellNode {
            id: CellNode::make_id(table, row, 0),
            table_id: table.into(),
            row,
            column: 0,
            row_label: label.into(),
            column_label: col.into(),
            period: period_key(col),
            raw: raw.into(),
            value: parse_value(raw).ok(),
        }
    }

    fn graph(cells: Vec<CellNode>) -> Graph {
        Graph::new(
            GraphNodes {
                claims: Vec::new(),
                tables: Vec::new(),
                cells,
            },
            GraphEdges::default(),
        )
    }

    fn run(cells: Vec<CellNode>) -> Vec<ConsistencyGroup> {
        check(&graph(cells), &ConsistencyConfig::default(), &ToleranceConfig::default())
    }

    #[test]
    fn diverging_tables_are_inconsistent() {
        let groups = run(vec![
            cell("Table_A", 0, "Reserve money", "2019", "4,564"),
            cell("Table_B", 0, "Reserve money 1/", "2019", "4.3"),
        ]);
        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert_eq!(g.variable_key, "reserve money");
        assert_eq!(g.period, "2019");
        assert!(g.is_inconsistent());
        assert_eq!(g.reason, Some(ReasonCode::OutsideTolerance));
        assert_eq!(g.observations.len(), 2);
        assert!(g.detail.contains("4,564 (Table_A) vs 4.3 (Table_B)"));
    }

    #[test]
    fn spread_is_judged_from_min_to_max() {
        // Neighbouring tables agree; the first and last do not.
        let tol = ToleranceConfig::default();
        assert!(within_tolerance(100.0, 100.8, &tol));
        assert!(within_tolerance(100.8, 101.6, &tol));

        let groups = run(vec![
            cell("Table_A", 0, "Reserve money", "2019", "100"),
            cell("Table_B", 0, "Reserve money", "2019", "100.8"),
            cell("Table_C", 0, "Reserve money", "2019", "101.6"),
        ]);
        assert_eq!(groups.len(), 1);
        let g = &groups[0];
        assert_eq!(g.observations.len(), 3);
        assert!(g.is_inconsistent());
        assert_eq!(g.reason, Some(ReasonCode::OutsideTolerance));
        assert!((g.spread - 1.6).abs() < 1e-9);
    }

    #[test]
    fn periods_never_share_a_group() {
        let groups = run(vec![
            cell("Table_A", 0, "Reserve money", "2019", "4564"),
            cell("Table_B", 0, "Reserve money", "2020", "4901"),
        ]);
        assert!(groups.is_empty());
    }

    #[test]
    fn agreeing_tables_are_consistent() {
        let groups = run(vec![
            cell("Table_A", 0, "Broad money", "2023_Proj.", "12,010"),
            cell("Table_B", 0, "Broad money (percent change)", "2023", "12,050"),
        ]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].verdict, ConsistencyVerdict::Consistent);
        assert!(groups[0].reason.is_none());
    }

    #[test]
    fn single_table_and_short_labels_are_skipped() {
        let groups = run(vec![
            cell("Table_A", 0, "Others", "2023", "1.7"),
            cell("Table_A", 1, "Others", "2023", "0.2"),
            cell("Table_A", 2, "M2", "2023", "5"),
            cell("Table_B", 0, "M2", "2023", "9"),
        ]);
        assert!(groups.is_empty());
    }

    #[test]
    fn duplicate_rows_stay_separate_observations() {
        let groups = run(vec![
            cell("Table_A", 0, "Others", "2023", "1.7"),
            cell("Table_A", 1, "Others", "2023", "0.2"),
            cell("Table_B", 0, "Others", "2023", "1.7"),
        ]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].observations.len(), 3);
        assert!(groups[0].is_inconsistent());
    }

    #[test]
    fn scale_clash_is_inconsistent() {
        let mut a = cell("Table_A", 0, "Exports", "2023", "197");
        a.value = Some(ParsedValue::scaled(197.0, Magnitude::Million));
        let mut b = cell("Table_B", 0, "Exports", "2023", "197");
        b.value = Some(ParsedValue::scaled(197.0, Magnitude::Billion));
        let groups = run(vec![a, b]);
        assert_eq!(groups[0].reason, Some(ReasonCode::ScaleMismatch));
    }

    #[test]
    fn unknown_periods_never_group() {
        let groups = run(vec![
            cell("Table_A", 0, "Reserve money", "Est.", "4564"),
            cell("Table_B", 0, "Reserve money", "Latest", "4.3"),
        ]);
        assert!(groups.is_empty());
    }
}
