use chrono::{DateTime, Local};
use url::Url;

/// Longest title part kept in a file name, in characters.
pub const MAX_TITLE_CHARS: usize = 80;

/// Windows-safe Markdown file name: `{%Y%m%d_%H%M%S}_{title}.md`.
///
/// Without a title the last URL path segment is used, then the host, then `page`.
pub fn derive_md_filename(title: Option<&str>, url: &str, now: DateTime<Local>) -> String {
    let base = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| url_stem(url));
    let timestamp = now.format("%Y%m%d_%H%M%S");
    format!("{timestamp}_{}.md", sanitize_filename(&base, "untitled"))
}

fn url_stem(url: &str) -> String {
    let Ok(parsed) = Url::parse(url) else {
        return url.rsplit('/').find(|s| !s.is_empty()).unwrap_or("page").to_string();
    };
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back().map(str::to_string))
        .filter(|s| !s.is_empty())
        .or_else(|| parsed.host_str().map(str::to_string))
        .unwrap_or_else(|| "page".to_string())
}

/// Replace characters Windows forbids, collapse underscore runs, cap the length.
pub fn sanitize_filename(input: &str, fallback: &str) -> String {
    let cleaned: String = input
        .chars()
        .map(|c| if is_forbidden(c) { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim_matches(&['_', ' ', '.'][..]);

    let mut compacted = String::with_capacity(cleaned.len());
    let mut prev_underscore = false;
    for c in cleaned.chars() {
        if c == '_' && prev_underscore {
            continue;
        }
        prev_underscore = c == '_';
        compacted.push(c);
    }

    let mut name: String = compacted.chars().take(MAX_TITLE_CHARS).collect();
    name = name.trim_end_matches(&['_', ' ', '.'][..]).to_string();
    if name.is_empty() {
        name = fallback.to_string();
    }
    if is_reserved_windows_name(&name) {
        name.push('_');
    }
    name
}

fn is_forbidden(c: char) -> bool {
    matches!(c,
        '\\' | '/' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0'..='\u{1F}'
    )
}

fn is_reserved_windows_name(name: &str) -> bool {
    const RESERVED: &[&str] = &[
        "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
        "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
    ];
    RESERVED.iter().any(|r| r.eq_ignore_ascii_case(name))
}
