//! Input schema: the claims file and per-table files an upstream extractor
//! writes into each document directory. Parsing works on JSON text; reading
//! the files is the caller's job.

use std::collections::HashSet;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::VerifyError;

pub const CLAIMS_FILE: &str = "narrative_claims.json";
pub const TABLES_DIR: &str = "tables";

// ---------------------------------------------------------------------------
// Claims
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ClaimRecord {
    #[serde(default)]
    pub id: Option<String>,
    pub claim_text: String,
    #[serde(default)]
    pub page_or_section: Option<String>,
    #[serde(default)]
    pub likely_table: Option<String>,
    #[serde(default)]
    pub variables_referenced: Vec<String>,
    #[serde(default)]
    pub values_mentioned: Vec<MentionRecord>,
}

impl ClaimRecord {
    /// The table hint, with `"unknown"` and blanks treated as absent.
    pub fn table_hint(&self) -> Option<&str> {
        known(self.likely_table.as_deref())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MentionRecord {
    #[serde(default)]
    pub variable: String,
    #[serde(default)]
    pub value: Option<RawValue>,
    #[serde(default, alias = "year")]
    pub period: Option<RawValue>,
    #[serde(default)]
    pub unit: Option<String>,
}

impl MentionRecord {
    pub fn raw_value(&self) -> Option<String> {
        self.value.as_ref().map(RawValue::to_text).filter(|s| !s.trim().is_empty())
    }

    pub fn period_text(&self) -> Option<String> {
        let text = self.period.as_ref().map(RawValue::to_text);
        known(text.as_deref()).map(str::to_string)
    }
}

/// Extractors emit numbers both as JSON strings and JSON numbers.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RawValue {
    Text(String),
    Number(serde_json::Number),
}

impl RawValue {
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(s) => s.clone(),
            Self::Number(n) => n.to_string(),
        }
    }
}

fn known(value: Option<&str>) -> Option<&str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && !v.eq_ignore_ascii_case("unknown"))
}

pub fn parse_claims(json: &str) -> Result<Vec<ClaimRecord>, VerifyError> {
    serde_json::from_str(json).map_err(|e| VerifyError::malformed(CLAIMS_FILE, e.to_string()))
}

/// Give every claim its final id. Explicit ids must be unique; a claim
/// without one gets `claim_<index>`, suffixed until it collides with no
/// explicit id.
pub fn assign_claim_ids(claims: &mut [ClaimRecord]) -> Result<(), VerifyError> {
    let mut taken: HashSet<String> = HashSet::new();
    for claim in claims.iter_mut() {
        if claim.id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            claim.id = None;
        }
        if let Some(id) = &claim.id {
            if !taken.insert(id.clone()) {
                return Err(VerifyError::malformed(
                    CLAIMS_FILE,
                    format!("duplicate claim id '{id}'"),
                ));
            }
        }
    }

    for (i, claim) in claims.iter_mut().enumerate() {
        if claim.id.is_some() {
            continue;
        }
        let mut id = format!("claim_{i}");
        let mut n = 1;
        while taken.contains(&id) {
            id = format!("claim_{i}_{n}");
            n += 1;
        }
        taken.insert(id.clone());
        claim.id = Some(id);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TableRecord {
    #[serde(default)]
    table_id: Option<String>,
    #[serde(default)]
    table_title: Option<String>,
    #[serde(default)]
    page_num: Option<u32>,
    #[serde(default)]
    units: Option<String>,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Option<Vec<RowRecord>>,
    #[serde(default)]
    data: Option<RowEntries>,
}

/// `data` object entries in document order. Unlike [`Map`], repeated keys
/// are kept: extracted tables often repeat labels such as "Others".
#[derive(Debug, Default)]
struct RowEntries(Vec<(String, Value)>);

impl<'de> Deserialize<'de> for RowEntries {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = RowEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object mapping row labels to {column: value}")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<RowEntries, A::Error> {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some(entry) = map.next_entry::<String, Value>()? {
                    entries.push(entry);
                }
                Ok(RowEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[derive(Debug, Deserialize)]
struct RowRecord {
    label: String,
    #[serde(default)]
    values: Map<String, Value>,
}

/// A table as extracted, rows in source order. Duplicate row labels are
/// kept as separate rows.
#[derive(Debug, Clone)]
pub struct SourceTable {
    pub id: String,
    pub title: Option<String>,
    pub page: Option<u32>,
    pub units: Option<String>,
    pub file: String,
    pub columns: Vec<String>,
    pub rows: Vec<SourceRow>,
}

#[derive(Debug, Clone)]
pub struct SourceRow {
    pub label: String,
    /// (column label, raw cell text) in source order.
    pub cells: Vec<(String, String)>,
}

/// Parse one table file. `file_name` names the file in errors and its
/// stem is the fallback table id.
pub fn parse_table(file_name: &str, json: &str) -> Result<SourceTable, VerifyError> {
    let record: TableRecord =
        serde_json::from_str(json).map_err(|e| VerifyError::malformed(file_name, e.to_string()))?;

    let rows: Vec<SourceRow> = match (record.rows, record.data) {
        (Some(rows), _) => rows
            .into_iter()
            .map(|r| SourceRow {
                label: r.label,
                cells: cells_from_map(&r.values),
            })
            .collect(),
        (None, Some(data)) => data
            .0
            .iter()
            .filter_map(|(label, row)| match row {
                Value::Object(values) => Some(SourceRow {
                    label: label.clone(),
                    cells: cells_from_map(values),
                }),
                _ => {
                    tracing::debug!(file = file_name, row = %label, "skipping non-object row");
                    None
                }
            })
            .collect(),
        (None, None) => {
            return Err(VerifyError::malformed(
                file_name,
                "table has neither `rows` nor `data`",
            ))
        }
    };

    // Declared columns first, then any column only seen in the rows.
    let mut columns = record.columns;
    for row in &rows {
        for (col, _) in &row.cells {
            if !columns.contains(col) {
                columns.push(col.clone());
            }
        }
    }

    let stem = file_name.strip_suffix(".json").unwrap_or(file_name);
    let id = record
        .table_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| stem.to_string());

    Ok(SourceTable {
        id,
        title: record.table_title,
        page: record.page_num,
        units: record.units.filter(|u| !u.trim().is_empty()),
        file: file_name.to_string(),
        columns,
        rows,
    })
}

fn cells_from_map(values: &Map<String, Value>) -> Vec<(String, String)> {
    values
        .iter()
        .map(|(col, v)| {
            let raw = match v {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            (col.clone(), raw)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Document
// ---------------------------------------------------------------------------

/// Everything the engine needs for one document, already parsed.
#[derive(Debug, Clone)]
pub struct DocumentInput {
    pub name: String,
    pub claims: Vec<ClaimRecord>,
    pub tables: Vec<SourceTable>,
    /// sha256 over the claims text and every (file name, table text) pair.
    pub digest: String,
}

impl DocumentInput {
    /// Parse a document from its claims JSON and `(file name, JSON)` table
    /// pairs. Tables are ordered by file name.
    pub fn parse(
        name: &str,
        claims_json: &str,
        mut table_files: Vec<(String, String)>,
    ) -> Result<Self, VerifyError> {
        table_files.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Sha256::new();
        hasher.update(claims_json.as_bytes());
        for (file, json) in &table_files {
            hasher.update(file.as_bytes());
            hasher.update(json.as_bytes());
        }
        let digest = hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect::<String>();

        let mut claims = parse_claims(claims_json)?;
        assign_claim_ids(&mut claims)?;

        let mut tables = Vec::with_capacity(table_files.len());
        let mut seen_tables = HashSet::new();
        for (file, json) in &table_files {
            let table = parse_table(file, json)?;
            if !seen_tables.insert(table.id.clone()) {
                return Err(VerifyError::malformed(
                    file.as_str(),
                    format!("duplicate table id '{}'", table.id),
                ));
            }
            tables.push(table);
        }

        Ok(Self {
            name: name.to_string(),
            claims,
            tables,
            digest,
        })
    }
}
