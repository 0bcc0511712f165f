//! Value parsing and tolerance comparison.
//!
//! Raw strings from claims and table cells are normalized once into a
//! [`ParsedValue`]: the number as written, a unit tag, and an optional
//! magnitude. Magnitudes are never folded into the number, so a claim in
//! trillions and a cell in millions stay distinguishable.

use serde::Serialize;
use thiserror::Error;

use crate::config::ToleranceConfig;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Magnitude {
    Thousand,
    Million,
    Billion,
    Trillion,
}

impl Magnitude {
    /// Magnitude named by a single lowercase word. Single-letter
    /// abbreviations are only accepted directly after a number.
    fn from_word(word: &str, allow_letters: bool) -> Option<Self> {
        match word {
            "thousand" | "thousands" => Some(Self::Thousand),
            "mn" | "mln" | "million" | "millions" => Some(Self::Million),
            "bn" | "billion" | "billions" => Some(Self::Billion),
            "tn" | "trillion" | "trillions" => Some(Self::Trillion),
            "k" if allow_letters => Some(Self::Thousand),
            "m" if allow_letters => Some(Self::Million),
            "b" if allow_letters => Some(Self::Billion),
            "t" if allow_letters => Some(Self::Trillion),
            _ => None,
        }
    }
}

impl std::fmt::Display for Magnitude {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Thousand => write!(f, "thousand"),
            Self::Million => write!(f, "million"),
            Self::Billion => write!(f, "billion"),
            Self::Trillion => write!(f, "trillion"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// Bare number with no unit claim.
    Level,
    Percent,
    /// Number qualified by a magnitude word; see [`ParsedValue::magnitude`].
    Scaled,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ParsedValue {
    pub value: f64,
    pub unit: Unit,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub magnitude: Option<Magnitude>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("not a numeric value: {raw:?}")]
pub struct ParseFailure {
    pub raw: String,
}

impl ParsedValue {
    pub fn level(value: f64) -> Self {
        Self { value, unit: Unit::Level, magnitude: None }
    }

    pub fn percent(value: f64) -> Self {
        Self { value, unit: Unit::Percent, magnitude: None }
    }

    pub fn scaled(value: f64, magnitude: Magnitude) -> Self {
        Self { value, unit: Unit::Scaled, magnitude: Some(magnitude) }
    }

    /// Fill in a missing unit from a free-text hint such as a claim's
    /// `unit` field or a table's `units` line. A unit carried by the raw
    /// value itself always wins.
    pub fn with_unit_hint(self, hint: Option<&str>) -> Self {
        if self.unit != Unit::Level {
            return self;
        }
        match hint.and_then(unit_from_hint) {
            Some(UnitTag::Percent) => Self::percent(self.value),
            Some(UnitTag::Scaled(m)) => Self::scaled(self.value, m),
            None => self,
        }
    }

    /// Whether two values may be compared numerically. Percent vs scaled
    /// and differing magnitudes are incompatible; a bare level is
    /// compatible with anything.
    pub fn scale_compatible(&self, other: &ParsedValue) -> bool {
        match (self.unit, other.unit) {
            (Unit::Level, _) | (_, Unit::Level) => true,
            (Unit::Percent, Unit::Percent) => true,
            (Unit::Scaled, Unit::Scaled) => self.magnitude == other.magnitude,
            _ => false,
        }
    }

    /// Short human label for the unit, used in detail strings.
    pub fn unit_label(&self) -> String {
        match (self.unit, self.magnitude) {
            (Unit::Percent, _) => "percent".into(),
            (Unit::Scaled, Some(m)) => m.to_string(),
            _ => "level".into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

const NO_VALUE_MARKERS: &[&str] = &[
    "", "...", "…", "—", "–", "-", "n.a.", "n.a", "n/a", "na", "unknown", "none", "null",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnitTag {
    Percent,
    Scaled(Magnitude),
}

fn percent_word(word: &str) -> bool {
    matches!(word, "%" | "percent" | "per cent" | "pct" | "percentage" | "percentages")
}

/// Parse a raw value:
/// - Strip `$`, commas, whitespace
/// - Handle `(3.2)` → `-3.2`
/// - `%` / `percent` → percent; `million`, `bn`, ... → scaled
/// - Fails on empty input, no-value markers, or trailing garbage
pub fn parse_value(raw: &str) -> Result<ParsedValue, ParseFailure> {
    let fail = || ParseFailure { raw: raw.to_string() };
    let lower = raw.trim().to_lowercase();
    if NO_VALUE_MARKERS.contains(&lower.as_str()) {
        return Err(fail());
    }
    // Typeset minus signs and dashes used as a sign.
    let lower: String = lower
        .chars()
        .map(|c| if matches!(c, '\u{2212}' | '\u{2013}' | '\u{2012}') { '-' } else { c })
        .collect();

    // Split into the numeric head and the unit suffix.
    let split = lower
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || matches!(c, '.' | ',' | '+' | '-' | '(' | ')' | '$' | ' ')))
        .map(|(i, _)| i)
        .unwrap_or(lower.len());
    let (head, suffix) = lower.split_at(split);

    let value = parse_number(head).ok_or_else(fail)?;
    let tag = parse_suffix(suffix).map_err(|_| fail())?;

    Ok(match tag {
        None => ParsedValue::level(value),
        Some(UnitTag::Percent) => ParsedValue::percent(value),
        Some(UnitTag::Scaled(m)) => ParsedValue::scaled(value, m),
    })
}

fn parse_number(head: &str) -> Option<f64> {
    let trimmed = head.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (is_negative, inner) = if trimmed.starts_with('(') && trimmed.ends_with(')') && trimmed.len() > 2 {
        (true, &trimmed[1..trimmed.len() - 1])
    } else {
        (false, trimmed)
    };

    let cleaned: String = inner
        .chars()
        .filter(|c| *c != '$' && *c != ',' && !c.is_whitespace())
        .collect();
    if cleaned.is_empty() {
        return None;
    }

    for (i, c) in cleaned.chars().enumerate() {
        match c {
            '0'..='9' | '.' => {}
            '-' | '+' if i == 0 && !is_negative => {}
            _ => return None,
        }
    }

    let value: f64 = cleaned.parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if is_negative { -value } else { value })
}

/// The first suffix token must name a unit; anything after it
/// ("of GDP", "USD") is a qualifier and ignored.
fn parse_suffix(suffix: &str) -> Result<Option<UnitTag>, ()> {
    let suffix = suffix.trim();
    if suffix.is_empty() {
        return Ok(None);
    }
    if suffix.starts_with('%') {
        return Ok(Some(UnitTag::Percent));
    }

    let first = suffix
        .split(|c: char| c.is_whitespace() || c == ',' || c == '.')
        .find(|w| !w.is_empty())
        .unwrap_or("");
    if percent_word(first) || suffix.starts_with("per cent") {
        return Ok(Some(UnitTag::Percent));
    }
    match Magnitude::from_word(first, true) {
        Some(m) => Ok(Some(UnitTag::Scaled(m))),
        None => Err(()),
    }
}

/// Scan a free-text unit hint for the first percent or magnitude word.
fn unit_from_hint(hint: &str) -> Option<UnitTag> {
    let lower = hint.to_lowercase();
    if lower.contains("per cent") {
        return Some(UnitTag::Percent);
    }
    lower
        .split(|c: char| !(c.is_alphanumeric() || c == '%'))
        .filter(|w| !w.is_empty())
        .find_map(|word| {
            if percent_word(word) || word.ends_with('%') {
                Some(UnitTag::Percent)
            } else {
                Magnitude::from_word(word, false).map(UnitTag::Scaled)
            }
        })
}

// ---------------------------------------------------------------------------
// Tolerance
// ---------------------------------------------------------------------------

/// Allowed deviation between `a` and `b`: the larger of the absolute floor
/// and the relative share of the larger magnitude. Symmetric in its inputs.
pub fn tolerance_bound(a: f64, b: f64, tolerance: &ToleranceConfig) -> f64 {
    tolerance
        .absolute
        .max(tolerance.relative * a.abs().max(b.abs()))
}

/// Epsilon-inclusive comparison: preserve human-decimal boundary
/// semantics under IEEE-754 float representation.
pub fn within_tolerance(a: f64, b: f64, tolerance: &ToleranceConfig) -> bool {
    let delta = (a - b).abs();
    let bound = tolerance_bound(a, b, tolerance);
    let scale = 1.0_f64.max(a.abs()).max(b.abs()).max(delta).max(bound);
    let eps = f64::EPSILON * 16.0 * scale;
    delta <= bound + eps
}
