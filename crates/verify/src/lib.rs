//! `verigraph`: claim-to-table verification graph engine.
//!
//! Pure engine crate: receives pre-read claims and table JSON, returns a
//! serializable verification report. No CLI or network dependencies; the
//! assisted matcher lives behind the [`Matcher`] trait.

pub mod classify;
pub mod config;
pub mod consistency;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod graph;
pub mod index;
pub mod input;
pub mod matcher;
pub mod model;
pub mod value;

pub use config::VerifyConfig;
pub use engine::{run, run_deterministic};
pub use error::VerifyError;
pub use input::DocumentInput;
pub use matcher::{Candidate, ClaimFragment, DeterministicMatcher, Matcher, MatcherError, SearchScope};
pub use model::{ClassificationKind, Provenance, VerificationReport};
