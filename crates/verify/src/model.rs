use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::value::ParsedValue;

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Which matcher variant produced an edge. Recorded for audit only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Deterministic,
    Assisted,
}

impl std::fmt::Display for Provenance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deterministic => write!(f, "deterministic"),
            Self::Assisted => write!(f, "assisted"),
        }
    }
}

// ---------------------------------------------------------------------------
// Nodes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ClaimNode {
    pub id: String,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub likely_table: Option<String>,
    pub variables: Vec<String>,
    pub mentions: Vec<Mention>,
}

/// One (variable, period, value, unit) tuple of a claim.
#[derive(Debug, Clone, Serialize)]
pub struct Mention {
    pub index: usize,
    pub variable: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_hint: Option<String>,
    /// `None` when the raw value is absent or does not parse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ParsedValue>,
    pub resolution: Resolution,
}

/// Outcome of asking the matcher about one mention.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Resolution {
    /// Mention has no numeric value; the matcher is never consulted.
    NotAttempted,
    Resolved { cell_id: String },
    NoCandidate,
    MatcherUnavailable { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct TableNode {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    pub file: String,
    pub row_labels: Vec<String>,
    pub column_labels: Vec<String>,
}

/// A single (row, column) data point. Duplicate row labels in a table give
/// distinct cells, told apart by `row`.
#[derive(Debug, Clone, Serialize)]
pub struct CellNode {
    pub id: String,
    pub table_id: String,
    pub row: usize,
    pub column: usize,
    pub row_label: String,
    pub column_label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    pub raw: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ParsedValue>,
}

impl CellNode {
    pub fn make_id(table_id: &str, row: usize, column: usize) -> String {
        format!("cell:{table_id}:r{row}:c{column}")
    }
}

// ---------------------------------------------------------------------------
// Edges
// ---------------------------------------------------------------------------

/// Claim mention → cell. Rank 1 is the accepted edge; the rest are kept
/// for audit and never classified.
#[derive(Debug, Clone, Serialize)]
pub struct MatchEdge {
    pub claim_id: String,
    pub mention: usize,
    pub cell_id: String,
    pub rank: usize,
    pub score: f64,
    pub provenance: Provenance,
    pub justification: String,
}

impl MatchEdge {
    pub fn is_accepted(&self) -> bool {
        self.rank == 1
    }
}

/// Claim → table it names as its likely source.
#[derive(Debug, Clone, Serialize)]
pub struct ReferenceEdge {
    pub claim_id: String,
    pub table_id: String,
}

// ---------------------------------------------------------------------------
// Graph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphNodes {
    pub claims: Vec<ClaimNode>,
    pub tables: Vec<TableNode>,
    pub cells: Vec<CellNode>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphEdges {
    pub matches: Vec<MatchEdge>,
    pub references: Vec<ReferenceEdge>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Graph {
    pub nodes: GraphNodes,
    pub edges: GraphEdges,
    #[serde(skip)]
    cell_pos: HashMap<String, usize>,
}

impl Graph {
    pub fn new(nodes: GraphNodes, edges: GraphEdges) -> Self {
        let cell_pos = nodes
            .cells
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        Self {
            nodes,
            edges,
            cell_pos,
        }
    }

    pub fn cell(&self, id: &str) -> Option<&CellNode> {
        self.cell_pos.get(id).map(|&i| &self.nodes.cells[i])
    }

    /// Every match edge of a claim, accepted and audit alike.
    pub fn edges_for(&self, claim_id: &str) -> Vec<&MatchEdge> {
        self.edges.matches.iter().filter(|e| e.claim_id == claim_id).collect()
    }

    /// The rank-1 edge for a claim mention, if any.
    pub fn accepted_edge(&self, claim_id: &str, mention: usize) -> Option<&MatchEdge> {
        self.edges
            .matches
            .iter()
            .find(|e| e.is_accepted() && e.claim_id == claim_id && e.mention == mention)
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassificationKind {
    Match,
    Mismatch,
    Unverifiable,
    Qualitative,
}

impl std::fmt::Display for ClassificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Match => write!(f, "MATCH"),
            Self::Mismatch => write!(f, "MISMATCH"),
            Self::Unverifiable => write!(f, "UNVERIFIABLE"),
            Self::Qualitative => write!(f, "QUALITATIVE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    NoNumericValue,
    NoCandidate,
    MatcherUnavailable,
    ScaleMismatch,
    OutsideTolerance,
    WithinTolerance,
}

/// One verdict per (claim, mention). A claim with no mentions at all gets a
/// single QUALITATIVE result with `mention = None`.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResult {
    pub claim_id: String,
    pub mention: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    pub kind: ClassificationKind,
    pub reason: ReasonCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_raw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claim_value: Option<ParsedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_raw: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cell_value: Option<ParsedValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provenance: Option<Provenance>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tolerance: Option<f64>,
    pub detail: String,
}

// ---------------------------------------------------------------------------
// Consistency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsistencyVerdict {
    Consistent,
    Inconsistent,
}

#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    pub table_id: String,
    pub cell_id: String,
    pub row_label: String,
    pub column_label: String,
    pub raw: String,
    pub value: ParsedValue,
}

/// Same-variable, same-period observations drawn from at least two tables.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyGroup {
    pub variable_key: String,
    pub period: String,
    pub verdict: ConsistencyVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    /// max - min over the observations.
    pub spread: f64,
    pub detail: String,
    pub observations: Vec<Observation>,
}

impl ConsistencyGroup {
    pub fn is_inconsistent(&self) -> bool {
        self.verdict == ConsistencyVerdict::Inconsistent
    }
}

// ---------------------------------------------------------------------------
// Summary + Output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total_claims: usize,
    pub total_tables: usize,
    pub total_cells: usize,
    pub total_results: usize,
    pub matches: usize,
    pub mismatches: usize,
    pub unverifiable: usize,
    pub qualitative: usize,
    pub scale_mismatches: usize,
    pub matcher_unavailable: usize,
    pub consistency_groups: usize,
    pub inconsistencies: usize,
    /// Rounded share of numeric results that matched, 0 when none.
    pub match_pct: u32,
    pub kind_counts: BTreeMap<String, usize>,
}

/// Renderer-ready lists pulled from classifications and consistency groups.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Digest {
    pub inconsistencies: Vec<InconsistencyEntry>,
    pub mismatches: Vec<FindingEntry>,
    pub matches_by_provenance: BTreeMap<Provenance, Vec<FindingEntry>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InconsistencyEntry {
    pub variable_key: String,
    pub period: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<ReasonCode>,
    /// (table id, raw value) per observation.
    pub sources: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FindingEntry {
    pub claim_id: String,
    pub claim_text: String,
    pub variable: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    pub claim_value: String,
    pub matched_value: String,
    pub table_id: String,
    pub reason: ReasonCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub justification: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportMeta {
    pub document: String,
    pub engine_version: String,
    pub run_at: String,
    pub input_digest: String,
    pub matcher: Provenance,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub meta: ReportMeta,
    pub graph: Graph,
    pub classifications: Vec<ClassificationResult>,
    pub consistency: Vec<ConsistencyGroup>,
    pub summary: Summary,
    pub digest: Digest,
}

impl VerificationReport {
    /// True when the run found anything a reviewer must act on.
    pub fn has_findings(&self) -> bool {
        self.summary.mismatches > 0 || self.summary.inconsistencies > 0
    }
}
