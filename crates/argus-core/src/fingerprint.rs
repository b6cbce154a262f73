//! Stable query fingerprints for downstream caching and deduplication.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

/// Compute the deterministic fingerprint of a search.
///
/// Keywords are sorted before hashing, a missing location contributes an
/// empty segment, and extra parameters serialize in key order, so two
/// logically equal queries produce the same digest no matter how their
/// inputs were ordered. The result is a lowercase hex SHA-256.
pub fn query_fingerprint(
    keywords: &[String],
    location: Option<&str>,
    extra: &BTreeMap<String, String>,
) -> String {
    let mut sorted = keywords.to_vec();
    sorted.sort_unstable();

    let params = extra
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",");

    let canonical = format!(
        "{}|{}|{}",
        sorted.join(","),
        location.unwrap_or_default(),
        params
    );
    compute_hash(&canonical)
}

fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
