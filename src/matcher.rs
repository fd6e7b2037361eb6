use crate::models::Record;
use crate::normalize::normalize;

/// Whether `candidate` matches the free-text `query`.
///
/// Both sides are normalized. A whole-phrase substring hit wins outright;
/// otherwise every whitespace-separated query token has to appear somewhere
/// in the candidate, in any order. A query with no tokens matches nothing.
pub fn matches(query: &str, candidate: &str) -> bool {
    let query = normalize(query);
    if query.is_empty() {
        return false;
    }

    let candidate = normalize(candidate);
    if candidate.contains(&query) {
        return true;
    }

    query
        .split_whitespace()
        .all(|token| candidate.contains(token))
}

/// Keeps the records whose name matches `query`.
pub fn filter_matching(records: Vec<Record>, query: &str) -> Vec<Record> {
    records
        .into_iter()
        .filter(|record| matches(query, record.name()))
        .collect()
}
