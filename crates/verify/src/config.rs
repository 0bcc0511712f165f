use serde::Deserialize;

use crate::error::VerifyError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Run configuration. Every section is optional; an empty file is valid.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VerifyConfig {
    #[serde(default)]
    pub tolerance: ToleranceConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub consistency: ConsistencyConfig,
    #[serde(default)]
    pub assisted: AssistedConfig,
}

// ---------------------------------------------------------------------------
// Tolerance
// ---------------------------------------------------------------------------

/// Numeric agreement policy shared by claim verification and the
/// cross-table check.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToleranceConfig {
    /// Share of the larger magnitude, in [0, 1).
    #[serde(default = "default_relative")]
    pub relative: f64,
    /// Absolute floor so rounded figures still agree.
    #[serde(default = "default_absolute")]
    pub absolute: f64,
}

fn default_relative() -> f64 {
    0.01
}

fn default_absolute() -> f64 {
    0.1
}

impl Default for ToleranceConfig {
    fn default() -> Self {
        Self {
            relative: default_relative(),
            absolute: default_absolute(),
        }
    }
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchingConfig {
    /// Row and column similarity below this never becomes a candidate.
    #[serde(default = "default_floor")]
    pub similarity_floor: f64,
    /// Candidates kept per mention (rank 1 accepted, the rest audit only).
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
    /// Search every table when the hinted table yields nothing.
    #[serde(default)]
    pub fallback_to_all_tables: bool,
}

fn default_floor() -> f64 {
    0.5
}

fn default_max_candidates() -> usize {
    5
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_floor: default_floor(),
            max_candidates: default_max_candidates(),
            fallback_to_all_tables: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Consistency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsistencyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Canonical row keys shorter than this are too generic to group on.
    #[serde(default = "default_min_label_len")]
    pub min_label_len: usize,
}

fn default_true() -> bool {
    true
}

fn default_min_label_len() -> usize {
    3
}

impl Default for ConsistencyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_label_len: default_min_label_len(),
        }
    }
}

// ---------------------------------------------------------------------------
// Assisted matcher
// ---------------------------------------------------------------------------

/// Settings for the text-understanding service behind the assisted matcher.
/// The engine never calls the service; the CLI builds the client from this.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssistedConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Deterministic candidates offered to the service per mention.
    #[serde(default = "default_shortlist")]
    pub shortlist: usize,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_api_key_env() -> String {
    "VERIGRAPH_ASSIST_KEY".into()
}

fn default_shortlist() -> usize {
    8
}

impl Default for AssistedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            model: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            api_key_env: default_api_key_env(),
            shortlist: default_shortlist(),
        }
    }
}

// ---------------------------------------------------------------------------
// Parse + Validate
// ---------------------------------------------------------------------------

impl VerifyConfig {
    pub fn from_toml(input: &str) -> Result<Self, VerifyError> {
        let config: VerifyConfig =
            toml::from_str(input).map_err(|e| VerifyError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), VerifyError> {
        let tol = &self.tolerance;
        if !(0.0..1.0).contains(&tol.relative) {
            return Err(VerifyError::ConfigValidation(format!(
                "tolerance.relative must be in [0, 1), got {}",
                tol.relative
            )));
        }
        if !tol.absolute.is_finite() || tol.absolute < 0.0 {
            return Err(VerifyError::ConfigValidation(format!(
                "tolerance.absolute must be a non-negative number, got {}",
                tol.absolute
            )));
        }

        let m = &self.matching;
        if !(m.similarity_floor > 0.0 && m.similarity_floor <= 1.0) {
            return Err(VerifyError::ConfigValidation(format!(
                "matching.similarity_floor must be in (0, 1], got {}",
                m.similarity_floor
            )));
        }
        if m.max_candidates == 0 {
            return Err(VerifyError::ConfigValidation(
                "matching.max_candidates must be at least 1".into(),
            ));
        }

        let a = &self.assisted;
        if a.enabled {
            if a.base_url.as_deref().map_or(true, str::is_empty) {
                return Err(VerifyError::ConfigValidation(
                    "assisted.base_url is required when assisted matching is enabled".into(),
                ));
            }
            if a.model.as_deref().map_or(true, str::is_empty) {
                return Err(VerifyError::ConfigValidation(
                    "assisted.model is required when assisted matching is enabled".into(),
                ));
            }
            if a.shortlist == 0 {
                return Err(VerifyError::ConfigValidation(
                    "assisted.shortlist must be at least 1".into(),
                ));
            }
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
