//! Preview and direct-download variants of hosted-drive share links.
//!
//! Both transforms are pure string rewrites keyed on the file identifier
//! embedded in the link. Anything that is not a recognizable drive link is
//! passed through untouched.

use reqwest::Url;

const DRIVE_HOSTS: &[&str] = &["drive.google.com", "docs.google.com"];

/// Direct-download URL for `document_url`. Empty input gives an empty string.
pub fn download_url(document_url: &str) -> String {
    let document_url = document_url.trim();
    match drive_file_id(document_url) {
        Some(id) => format!("https://drive.google.com/uc?export=download&id={id}"),
        None => document_url.to_string(),
    }
}

/// Embeddable viewer URL for `document_url`, or `None` when there is nothing
/// to preview.
pub fn viewer_url(document_url: &str) -> Option<String> {
    let document_url = document_url.trim();
    if document_url.is_empty() {
        return None;
    }
    match drive_file_id(document_url) {
        Some(id) => Some(format!("https://drive.google.com/file/d/{id}/preview")),
        None => Some(document_url.to_string()),
    }
}

/// Extracts the file identifier from `/file/d/<id>/...`, `open?id=<id>` or
/// `uc?id=<id>` style links.
pub fn drive_file_id(link: &str) -> Option<String> {
    let url = Url::parse(link).ok()?;
    let host = url.host_str()?;
    if !DRIVE_HOSTS.contains(&host) {
        return None;
    }

    let segments: Vec<&str> = url.path_segments()?.collect();
    if let Some(pos) = segments.iter().position(|s| *s == "d") {
        if pos > 0 && segments[pos - 1] == "file" {
            return segments
                .get(pos + 1)
                .filter(|id| is_file_id(id))
                .map(|id| id.to_string());
        }
    }

    url.query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.into_owned())
        .filter(|id| is_file_id(id))
}

fn is_file_id(candidate: &str) -> bool {
    !candidate.is_empty()
        && candidate
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
