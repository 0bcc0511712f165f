//! Cell index: fuzzy (row label, period) lookup over one table's cells.
//!
//! Built once per table from the document's cell nodes and read-only
//! afterwards. Only numeric cells are indexed; a text cell can never back a
//! numeric claim.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use strsim::normalized_levenshtein;

use crate::model::{CellNode, TableNode};

// ---------------------------------------------------------------------------
// Label normalization
// ---------------------------------------------------------------------------

/// Lowercase, drop footnote markers (`1/`) and parentheticals, and collapse
/// punctuation to single spaces: `"Reserve money (millions) 1/"` →
/// `"reserve money"`.
pub fn normalize_label(label: &str) -> String {
    let lower = label.to_lowercase();

    let mut out = String::with_capacity(lower.len());
    let mut depth = 0usize;
    for c in lower.chars() {
        match c {
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ if depth > 0 => {}
            c if c.is_alphanumeric() || c == '%' || c == '/' => out.push(c),
            _ => out.push(' '),
        }
    }

    out.split_whitespace()
        .filter(|w| !is_footnote_marker(w))
        .map(|w| w.trim_matches('/'))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn is_footnote_marker(word: &str) -> bool {
    word.strip_suffix('/')
        .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

/// Period key of a column label or claim period: the first 4-digit year,
/// so `"2023_Proj."`, `"FY2023"` and `"2023/24"` all key to `"2023"`.
pub fn period_key(label: &str) -> Option<String> {
    let bytes = label.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_digit() {
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i - start == 4 {
                return Some(label[start..i].to_string());
            }
        } else {
            i += 1;
        }
    }
    None
}

// ---------------------------------------------------------------------------
// Similarity
// ---------------------------------------------------------------------------

fn contains_words(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    format!(" {haystack} ").contains(&format!(" {needle} "))
}

fn jaccard(a: &str, b: &str) -> f64 {
    let ta: BTreeSet<&str> = a.split(' ').collect();
    let tb: BTreeSet<&str> = b.split(' ').collect();
    let union = ta.union(&tb).count();
    if union == 0 {
        return 0.0;
    }
    ta.intersection(&tb).count() as f64 / union as f64
}

/// Edit similarity below this is noise between different words
/// ("exports" / "imports"), not a typo.
const EDIT_FLOOR: f64 = 0.85;

/// Similarity of two normalized labels in [0, 1]:
/// exact 1.0, label contains query, query contains label, then the best of
/// token overlap and near-typo edit similarity.
pub fn label_similarity(query: &str, label: &str) -> f64 {
    if query.is_empty() || label.is_empty() {
        return 0.0;
    }
    if query == label {
        return 1.0;
    }
    let ratio = |short: &str, long: &str| short.len() as f64 / long.len() as f64;
    if contains_words(label, query) {
        return 0.7 + 0.3 * ratio(query, label);
    }
    if contains_words(query, label) {
        return 0.4 + 0.3 * ratio(label, query);
    }
    let edit = normalized_levenshtein(query, label);
    let edit = if edit >= EDIT_FLOOR { edit } else { 0.0 };
    jaccard(query, label).max(edit)
}

// ---------------------------------------------------------------------------
// Variable synonyms
// ---------------------------------------------------------------------------

const SYNONYMS: &[(&str, &[&str])] = &[
    ("real gdp", &["real gdp", "gdp growth", "gdp real", "real gross domestic"]),
    ("inflation", &["inflation", "consumer price", "cpi", "price index"]),
    ("fiscal", &["fiscal", "overall balance", "primary balance", "budget"]),
    ("current account", &["current account", "external current"]),
    ("debt", &["debt", "gross debt", "public debt", "government debt"]),
    ("revenue", &["revenue", "total revenue", "government revenue"]),
    ("expenditure", &["expenditure", "total expenditure", "government spending"]),
    ("reserves", &["reserves", "international reserves", "gross reserves"]),
    ("exchange", &["exchange rate", "nominal exchange", "real exchange", "neer", "reer"]),
    ("interest", &["interest rate", "policy rate", "monetary policy"]),
    ("unemployment", &["unemployment", "unemployment rate"]),
    ("exports", &["exports", "total exports"]),
    ("imports", &["imports", "total imports"]),
    ("money", &["money supply", "broad money", "m2", "m3"]),
    ("credit", &["credit", "private sector credit", "private credit"]),
    ("lending", &["lending", "lending rate"]),
];

/// Search phrases for a variable mention: the mention itself plus the
/// synonyms of every known variable it names. Unknown variables fall back
/// to their individual words.
pub fn search_phrases(variable: &str) -> Vec<String> {
    let norm = normalize_label(&variable.replace('_', " "));
    if norm.is_empty() {
        return Vec::new();
    }

    let mut phrases = vec![norm.clone()];
    let mut hit = false;
    for (key, keywords) in SYNONYMS {
        if contains_words(&norm, key) || keywords.iter().any(|kw| contains_words(&norm, kw)) {
            hit = true;
            for kw in keywords.iter() {
                if !phrases.iter().any(|p| p == kw) {
                    phrases.push((*kw).to_string());
                }
            }
        }
    }
    if !hit {
        for word in norm.split(' ').filter(|w| w.len() > 2) {
            if !phrases.iter().any(|p| p == word) {
                phrases.push(word.to_string());
            }
        }
    }
    phrases
}

// ---------------------------------------------------------------------------
// Index
// ---------------------------------------------------------------------------

/// What a mention asks the index for.
#[derive(Debug, Clone)]
pub struct CellQuery {
    /// Normalized search phrases, see [`search_phrases`].
    pub phrases: Vec<String>,
    pub period: Option<String>,
    /// Claim value; breaks ties only when no period was stated.
    pub target: Option<f64>,
    pub floor: f64,
}

/// A lookup hit. `cell` indexes the document-wide cell list.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RankedCell {
    pub cell: usize,
    pub row_score: f64,
    pub column_score: f64,
    pub score: f64,
    pub exact_period: bool,
    /// |cell - target| when ranking without a period, else 0.
    pub distance: f64,
}

/// Column score when the mention states no period.
const NEUTRAL_COLUMN_SCORE: f64 = 0.5;

#[derive(Debug)]
struct IndexedCell {
    cell: usize,
    row: usize,
    column: usize,
    column_norm: String,
    period: Option<String>,
    value: f64,
}

#[derive(Debug)]
pub struct CellIndex {
    /// Normalized row labels in table order.
    rows: Vec<String>,
    cells: Vec<IndexedCell>,
}

impl CellIndex {
    /// Index one table. `cells` is the document-wide cell list; only cells
    /// owned by `table` are indexed.
    pub fn build(table: &TableNode, cells: &[CellNode]) -> Self {
        let rows = table.row_labels.iter().map(|l| normalize_label(l)).collect();

        let cells = cells
            .iter()
            .enumerate()
            .filter(|(_, c)| c.table_id == table.id)
            .filter_map(|(pos, c)| {
                c.value.map(|v| IndexedCell {
                    cell: pos,
                    row: c.row,
                    column: c.column,
                    column_norm: normalize_label(&c.column_label),
                    period: c.period.clone(),
                    value: v.value,
                })
            })
            .collect();

        Self { rows, cells }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Ranked cells whose row (and, with a stated period, column) clear the
    /// floor. Order: score, exact period, closeness to the target when no
    /// period was stated, then table order.
    pub fn lookup(&self, query: &CellQuery) -> Vec<RankedCell> {
        let row_scores: Vec<f64> = self
            .rows
            .iter()
            .map(|norm| {
                query
                    .phrases
                    .iter()
                    .map(|p| label_similarity(p, norm))
                    .fold(0.0, f64::max)
            })
            .collect();

        let query_period = query
            .period
            .as_deref()
            .map(|p| period_key(p).unwrap_or_else(|| normalize_label(p)));

        let mut hits: Vec<(RankedCell, usize, usize)> = self
            .cells
            .iter()
            .filter_map(|c| {
                let row_score = row_scores.get(c.row).copied().unwrap_or(0.0);
                if row_score < query.floor {
                    return None;
                }
                let (column_score, exact_period) = match &query_period {
                    None => (NEUTRAL_COLUMN_SCORE, false),
                    Some(p) if c.period.as_deref() == Some(p.as_str()) => (1.0, true),
                    // A column for a different year is never the same figure.
                    Some(_) if c.period.is_some() => return None,
                    Some(p) => (label_similarity(p, &c.column_norm), false),
                };
                if query_period.is_some() && column_score < query.floor {
                    return None;
                }
                let distance = match (&query_period, query.target) {
                    (None, Some(t)) => (c.value - t).abs(),
                    _ => 0.0,
                };
                let ranked = RankedCell {
                    cell: c.cell,
                    row_score,
                    column_score,
                    score: row_score * column_score,
                    exact_period,
                    distance,
                };
                Some((ranked, c.row, c.column))
            })
            .collect();

        hits.sort_by(|(a, ar, ac), (b, br, bc)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(b.exact_period.cmp(&a.exact_period))
                .then(a.distance.partial_cmp(&b.distance).unwrap_or(Ordering::Equal))
                .then(ar.cmp(br))
                .then(ac.cmp(bc))
        });

        hits.into_iter().map(|(r, _, _)| r).collect()
    }
}
