use std::sync::LazyLock;

use regex::Regex;

static INVALID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/:*?"<>|]"#).expect("invalid-chars regex is valid"));

const FALLBACK_NAME: &str = "unnamed_file";

/// Make a Drive file name safe to use as a local file name.
pub fn sanitize_filename(name: &str) -> String {
    let name = name.replace('\u{a0}', " ");
    let safe = INVALID_CHARS.replace_all(&name, "_");
    let safe = safe.trim();

    if safe.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        safe.to_string()
    }
}

/// Name of the MP3 produced from a video called `original`.
///
/// `"My Video.mp4"` becomes `"My Video.mp3"`; a leading dot is part of the
/// stem, not an extension.
pub fn mp3_name(original: &str) -> String {
    let safe = sanitize_filename(original);
    format!("{}.mp3", strip_extension(&safe))
}

fn strip_extension(name: &str) -> &str {
    let stem_start = name.len() - name.trim_start_matches('.').len();
    match name[stem_start..].rfind('.') {
        Some(dot) => &name[..stem_start + dot],
        None => name,
    }
}
