//! Assisted matcher for `verigraph run --assisted`.
//!
//! Shortlists candidate cells with the deterministic index (floor relaxed to
//! zero), then asks an OpenAI-compatible chat-completions service to pick one
//! by number. The service only chooses the referent; the engine still does
//! the numeric comparison.
//!
//! # Wire format
//!
//! Request: `POST {base_url}/chat/completions` with `response_format:
//! json_object` and `temperature: 0`. The reply's message content must be
//!
//! ```json
//! {"choice": 2, "justification": "Row and year match the claim."}
//! ```
//!
//! with `choice` a 1-based index into the listed candidates, or `null`.
//!
//! # Failure handling
//!
//! Transport errors, 429 and 5xx are retried with exponential backoff (429
//! honours `Retry-After`). No single wait exceeds `timeout_secs`. Any other
//! 4xx fails at once. Exhausted retries and
//! unusable replies surface as [`MatcherError::Unavailable`], which the engine
//! records as UNVERIFIABLE for that mention only.

use std::fmt::Write as _;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};
use verigraph::config::AssistedConfig;
use verigraph::{Candidate, ClaimFragment, DeterministicMatcher, Matcher, MatcherError, Provenance, SearchScope};

use crate::CliError;

const USER_AGENT: &str = concat!("verigraph/", env!("CARGO_PKG_VERSION"));

const SYSTEM_PROMPT: &str = "\
You link a numeric claim from a report's narrative to the table cell it cites. \
You are given the claim and a numbered list of candidate cells. \
Reply with a JSON object {\"choice\": <candidate number or null>, \"justification\": \"<one sentence>\"}. \
Choose null when no candidate measures the same variable for the same period. \
Do not judge whether the numbers agree.";

pub struct AssistedMatcher {
    http: reqwest::blocking::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    shortlist: usize,
    max_retries: u32,
    initial_backoff: Duration,
    /// Upper bound on any one wait between attempts.
    max_wait: Duration,
}

#[derive(Debug, Deserialize)]
struct Answer {
    choice: Option<usize>,
    #[serde(default)]
    justification: String,
}

impl AssistedMatcher {
    /// Build from a validated `[assisted]` section. The API key is read from
    /// `api_key_env`; a missing key is allowed for local servers.
    pub fn from_config(config: &AssistedConfig) -> Result<Self, CliError> {
        let base_url = config.base_url.as_deref().unwrap_or_default();
        let model = config.model.clone().unwrap_or_default();

        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| CliError::runtime(format!("cannot build HTTP client: {e}")))?;

        let api_key = std::env::var(&config.api_key_env).ok().filter(|k| !k.is_empty());
        if api_key.is_none() {
            tracing::warn!(
                "{} is not set; calling {} without credentials",
                config.api_key_env,
                base_url
            );
        }

        Ok(Self {
            http,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            model,
            api_key,
            shortlist: config.shortlist,
            max_retries: config.max_retries,
            initial_backoff: Duration::from_secs(1),
            max_wait: Duration::from_secs(config.timeout_secs),
        })
    }

    /// POST with retry + exponential backoff. Returns the parsed body and
    /// the number of attempts it took.
    fn post_with_retry(&self, body: &Value) -> Result<(Value, u32), MatcherError> {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let mut req = self.http.post(&self.endpoint).json(body);
            if let Some(key) = &self.api_key {
                req = req.bearer_auth(key);
            }

            let (message, wait) = match req.send() {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.json::<Value>().map(|v| (v, attempt)).map_err(|e| {
                            MatcherError::Unavailable {
                                attempts: attempt,
                                message: format!("unreadable response body: {e}"),
                            }
                        });
                    }

                    let code = status.as_u16();
                    // Other 4xx (not 429): fail immediately
                    if status.is_client_error() && code != 429 {
                        let text = resp.text().unwrap_or_default();
                        return Err(MatcherError::Unavailable {
                            attempts: attempt,
                            message: format!("HTTP {code}: {}", &text[..floor_char_boundary(&text, 200)]),
                        });
                    }

                    let wait = if code == 429 {
                        resp.headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .map(Duration::from_secs)
                            .unwrap_or(backoff)
                    } else {
                        backoff
                    };
                    (format!("HTTP {code}"), wait)
                }
                Err(e) => (e.to_string(), backoff),
            };
            let wait = wait.min(self.max_wait);

            if attempt > self.max_retries {
                return Err(MatcherError::Unavailable {
                    attempts: attempt,
                    message,
                });
            }
            tracing::warn!(
                "assisted matcher retry {}/{} in {:?} ({})",
                attempt,
                self.max_retries,
                wait,
                message
            );
            thread::sleep(wait);
            backoff *= 2;
        }
    }
}

impl Matcher for AssistedMatcher {
    fn provenance(&self) -> Provenance {
        Provenance::Assisted
    }

    fn resolve(
        &self,
        fragment: &ClaimFragment<'_>,
        scope: &SearchScope<'_>,
    ) -> Result<Vec<Candidate>, MatcherError> {
        let mut shortlist = DeterministicMatcher::shortlist(fragment, scope, 0.0, self.shortlist);
        if shortlist.is_empty() {
            return Ok(shortlist);
        }

        let body = json!({
            "model": self.model,
            "temperature": 0,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt(fragment, scope, &shortlist) },
            ],
        });
        let (response, attempts) = self.post_with_retry(&body)?;

        let answer = parse_answer(&response, shortlist.len())
            .map_err(|message| MatcherError::Unavailable { attempts, message })?;
        let Some((index, justification)) = answer else {
            tracing::debug!(claim = fragment.claim_id, "service chose no candidate");
            return Ok(Vec::new());
        };

        // Chosen cell first; the rest of the shortlist stays as audit edges.
        let mut chosen = shortlist.remove(index);
        if !justification.is_empty() {
            chosen.justification = justification;
        }
        shortlist.insert(0, chosen);
        Ok(shortlist)
    }
}

fn prompt(fragment: &ClaimFragment<'_>, scope: &SearchScope<'_>, shortlist: &[Candidate]) -> String {
    let mention = fragment.mention;
    let mut out = String::new();
    let _ = writeln!(out, "Claim: {}", fragment.claim_text);
    let _ = writeln!(out, "Variable: {}", mention.variable);
    let _ = writeln!(out, "Period: {}", mention.period.as_deref().unwrap_or("not stated"));
    let _ = writeln!(
        out,
        "Value: {}{}",
        mention.raw_value.as_deref().unwrap_or(""),
        mention.unit_hint.as_deref().map(|u| format!(" ({u})")).unwrap_or_default()
    );
    let _ = writeln!(out, "Candidates:");
    for (i, candidate) in shortlist.iter().enumerate() {
        let cell = &scope.cells[candidate.cell];
        let _ = writeln!(
            out,
            "{}. table {}: row \"{}\", column \"{}\" = {}",
            i + 1,
            cell.table_id,
            cell.row_label,
            cell.column_label,
            cell.raw
        );
    }
    out
}

/// `Ok(None)` when the service declines, `Ok(Some((index, justification)))`
/// with a 0-based index otherwise.
fn parse_answer(response: &Value, candidates: usize) -> Result<Option<(usize, String)>, String> {
    let content = response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .ok_or_else(|| "response has no message content".to_string())?;

    // Some models wrap JSON mode output in a code fence anyway.
    let content = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let answer: Answer = serde_json::from_str(content)
        .map_err(|e| format!("unparseable answer ({e}): {}", &content[..floor_char_boundary(content, 200)]))?;

    match answer.choice {
        None => Ok(None),
        Some(n) if (1..=candidates).contains(&n) => Ok(Some((n - 1, answer.justification))),
        Some(n) => Err(format!("choice {n} outside 1..={candidates}")),
    }
}

fn floor_char_boundary(s: &str, max: usize) -> usize {
    if s.len() <= max {
        return s.len();
    }
    (0..=max).rev().find(|&i| s.is_char_boundary(i)).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use verigraph::model::{ClassificationKind, ReasonCode};
    use verigraph::{DocumentInput, VerifyConfig};

    fn completion(content: &str) -> Value {
        json!({
            "id": "chatcmpl-test",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": content },
                "finish_reason": "stop"
            }]
        })
    }

    fn matcher(server: &MockServer, max_retries: u32) -> AssistedMatcher {
        let config = AssistedConfig {
            enabled: true,
            base_url: Some(server.url("/v1")),
            model: Some("test-model".into()),
            max_retries,
            api_key_env: "VERIGRAPH_TEST_KEY_NEVER_SET".into(),
            ..AssistedConfig::default()
        };
        AssistedMatcher {
            api_key: Some("test-key".into()),
            initial_backoff: Duration::ZERO,
            ..AssistedMatcher::from_config(&config).unwrap()
        }
    }

    fn document() -> DocumentInput {
        DocumentInput::parse(
            "assisted",
            r#"[{"id": "c1", "claim_text": "Real GDP grew 3.2 percent in 2023.",
                 "values_mentioned": [{"variable": "real_gdp", "value": "3.2", "year": "2023"}]}]"#,
            vec![(
                "Table_1.json".into(),
                r#"{"data": {"Real GDP growth (percent)": {"2022": "2.9", "2023": "3.2"},
                             "Nominal GDP": {"2022": "4,800", "2023": "5,000"}}}"#
                    .into(),
            )],
        )
        .unwrap()
    }

    // ── Selection ───────────────────────────────────────────────────

    #[test]
    fn service_choice_becomes_accepted_edge() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("authorization", "Bearer test-key");
            then.status(200).json_body(completion(
                r#"{"choice": 1, "justification": "Same variable and year."}"#,
            ));
        });

        let report = verigraph::run(&VerifyConfig::default(), &document(), &matcher(&server, 0)).unwrap();
        mock.assert_calls(1);

        let r = &report.classifications[0];
        assert_eq!(r.kind, ClassificationKind::Match);
        assert_eq!(r.cell_raw.as_deref(), Some("3.2"));
        assert_eq!(r.provenance, Some(Provenance::Assisted));

        let edge = report.graph.accepted_edge("c1", 0).unwrap();
        assert_eq!(edge.provenance, Provenance::Assisted);
        assert_eq!(edge.justification, "Same variable and year.");
    }

    #[test]
    fn declined_choice_is_no_candidate() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .json_body(completion(r#"{"choice": null, "justification": "No match."}"#));
        });

        let report = verigraph::run(&VerifyConfig::default(), &document(), &matcher(&server, 0)).unwrap();
        let r = &report.classifications[0];
        assert_eq!(r.kind, ClassificationKind::Unverifiable);
        assert_eq!(r.reason, ReasonCode::NoCandidate);
    }

    #[test]
    fn out_of_range_choice_is_unavailable() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(200)
                .json_body(completion(r#"{"choice": 9, "justification": "?"}"#));
        });

        let report = verigraph::run(&VerifyConfig::default(), &document(), &matcher(&server, 0)).unwrap();
        assert_eq!(report.classifications[0].reason, ReasonCode::MatcherUnavailable);
        assert_eq!(report.summary.matcher_unavailable, 1);
    }

    // ── Retry ───────────────────────────────────────────────────────

    #[test]
    fn server_errors_are_retried_then_degrade() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(503).body("overloaded");
        });

        let report = verigraph::run(&VerifyConfig::default(), &document(), &matcher(&server, 2)).unwrap();
        // 1 initial + 2 retries
        mock.assert_calls(3);
        let r = &report.classifications[0];
        assert_eq!(r.kind, ClassificationKind::Unverifiable);
        assert_eq!(r.reason, ReasonCode::MatcherUnavailable);
    }

    #[test]
    fn rate_limit_honours_retry_after() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(429).header("retry-after", "0");
        });

        let report = verigraph::run(&VerifyConfig::default(), &document(), &matcher(&server, 1)).unwrap();
        mock.assert_calls(2);
        assert_eq!(report.summary.matcher_unavailable, 1);
    }

    #[test]
    fn long_retry_after_is_capped() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(429).header("retry-after", "86400");
        });

        let capped = AssistedMatcher {
            max_wait: Duration::from_millis(10),
            ..matcher(&server, 1)
        };
        let started = std::time::Instant::now();
        let report = verigraph::run(&VerifyConfig::default(), &document(), &capped).unwrap();
        mock.assert_calls(2);
        assert_eq!(report.summary.matcher_unavailable, 1);
        assert!(started.elapsed() < Duration::from_secs(30));
    }

    #[test]
    fn client_error_fails_without_retry() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(401).json_body(json!({ "error": { "message": "invalid api key" } }));
        });

        let report = verigraph::run(&VerifyConfig::default(), &document(), &matcher(&server, 3)).unwrap();
        mock.assert_calls(1);
        assert_eq!(report.summary.matcher_unavailable, 1);
    }

    // ── Answer parsing ──────────────────────────────────────────────

    #[test]
    fn fenced_answer_is_accepted() {
        let response = completion("```json\n{\"choice\": 2, \"justification\": \"Row matches.\"}\n```");
        assert_eq!(
            parse_answer(&response, 3).unwrap(),
            Some((1, "Row matches.".to_string()))
        );
    }

    #[test]
    fn missing_content_is_an_error() {
        let err = parse_answer(&json!({ "choices": [] }), 3).unwrap_err();
        assert!(err.contains("no message content"));
    }

    #[test]
    fn zero_is_not_a_valid_choice() {
        assert!(parse_answer(&completion(r#"{"choice": 0}"#), 3).is_err());
    }
}
