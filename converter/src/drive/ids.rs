use std::sync::LazyLock;

use regex::Regex;

/// Drive URL shapes, tried in order: file links, folder links, `?id=` links.
static ID_PATTERNS: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [
        r"/file/d/([a-zA-Z0-9_-]+)",
        r"/drive/folders/([a-zA-Z0-9_-]+)",
        r"id=([a-zA-Z0-9_-]+)",
    ]
    .map(|pattern| Regex::new(pattern).expect("drive id regex is valid"))
});

/// Extract a Drive file or folder ID from a share URL.
pub fn extract_id(url: &str) -> Option<String> {
    let id = ID_PATTERNS
        .iter()
        .find_map(|re| re.captures(url))
        .map(|captures| captures[1].to_string());

    if id.is_none() {
        tracing::warn!(url, "could not extract drive id from url");
    }
    id
}
