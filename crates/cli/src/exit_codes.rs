//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract; scripts rely on them.
//!
//! | Code | Meaning                                                   |
//! |------|-----------------------------------------------------------|
//! | 0    | Success, no findings                                      |
//! | 1    | Findings: a claim mismatched or tables disagree           |
//! | 2    | CLI usage error (bad args, missing file)                  |
//! | 3    | Invalid configuration                                     |
//! | 4    | Runtime error (output not writable, HTTP client setup)    |
//! | 5    | One or more documents malformed (others still verified)   |
//!
//! A batch with both malformed documents and findings exits 5.

/// Success - every document verified, nothing to report.
pub const EXIT_SUCCESS: u8 = 0;

/// At least one MISMATCH classification or inconsistent consistency group.
/// Like `diff(1)`, exit 1 means "the inputs disagree."
pub const EXIT_FINDINGS: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Config file failed to parse or validate.
pub const EXIT_CONFIG: u8 = 3;

/// Runtime failure outside any single document.
pub const EXIT_RUNTIME: u8 = 4;

/// A document's claims or tables could not be read or violate the schema.
pub const EXIT_MALFORMED: u8 = 5;

/// Exit code for a finished batch.
pub fn batch_exit_code(malformed: usize, findings: bool) -> u8 {
    if malformed > 0 {
        EXIT_MALFORMED
    } else if findings {
        EXIT_FINDINGS
    } else {
        EXIT_SUCCESS
    }
}
