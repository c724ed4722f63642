//! Duplicate fingerprinting
//!
//! Produces a stable guard key from a report's identifying fields. Maximal
//! digit runs in the message and stack trace are collapsed to a placeholder
//! before hashing, so reports that differ only in volatile numbers (ports,
//! counters, addresses) share a guard while genuinely different errors do
//! not. Pure, no I/O.

use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};

static DIGIT_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digit-run pattern"));

/// Field separator fed to the hash so adjacent fields cannot collide by
/// concatenation.
const FIELD_SEP: [u8; 1] = [0x1f];

/// Collapse every maximal digit run to `#`
#[must_use]
pub fn normalize(text: &str) -> String {
    DIGIT_RUNS.replace_all(text, "#").into_owned()
}

/// Compute the duplicate guard for a report
///
/// The source and error type participate verbatim; the message and stack
/// trace are normalized first. The guard is the first 128 bits of a SHA-256
/// digest, rendered as 32 lowercase hex characters.
#[must_use]
pub fn fingerprint(
    source: &str,
    message: &str,
    error_type: &str,
    stack_trace: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(FIELD_SEP);
    hasher.update(error_type.as_bytes());
    hasher.update(FIELD_SEP);
    hasher.update(normalize(message).as_bytes());
    if let Some(trace) = stack_trace {
        hasher.update(FIELD_SEP);
        hasher.update(normalize(trace).as_bytes());
    }

    let digest = hasher.finalize();
    digest[..16].iter().map(|b| format!("{b:02x}")).collect()
}
