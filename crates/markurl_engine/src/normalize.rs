use once_cell::sync::Lazy;
use regex::Regex;

static HEADING: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(#{1,6})\s+(.+)$").expect("heading pattern"));
static HEADING_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^#{1,6}\s+").expect("heading prefix pattern"));
static BOLD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\*\*(.+)\*\*$").expect("bold pattern"));
static ITALIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\*(.+)\*$").expect("italic pattern"));
static BOLD_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\*{2,}\s*[^*].*?\s*\*{2,}\s*$").expect("bold line pattern"));
static BOLD_LINE_INNER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\*+\s*(.*?)\s*\*+\s*$").expect("bold line inner pattern"));
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").expect("blank run pattern"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Minimum length of a first line promoted to `#` without an exact title match.
const MIN_PROMOTED_CHARS: usize = 4;

/// Repair heading structure of a converted document.
///
/// - heading text loses one layer of `**`/`*` emphasis
/// - a line that is entirely bold becomes a `##` heading
/// - the first non-blank line becomes the `#` title when it matches `title`
///   (or, without a title, when it is at least four characters long)
/// - every heading is followed by a blank line
/// - runs of blank lines collapse to one and the text ends with a single newline
///
/// Blank input is returned unchanged.
pub fn normalize_markdown_headings(text: &str, title: Option<&str>) -> String {
    if text.trim().is_empty() {
        return text.to_string();
    }

    let mut lines: Vec<String> = text
        .lines()
        .map(|line| match HEADING.captures(line) {
            Some(caps) => format!("{} {}", &caps[1], strip_emphasis(caps[2].trim())),
            None => line.to_string(),
        })
        .map(|line| {
            if BOLD_LINE.is_match(&line) && !HEADING_PREFIX.is_match(&line) {
                let inner = BOLD_LINE_INNER.replace(&line, "$1");
                format!("## {}", inner.trim())
            } else {
                line
            }
        })
        .collect();

    if let Some(first) = lines.iter().position(|line| !line.trim().is_empty()) {
        if !HEADING_PREFIX.is_match(&lines[first]) {
            let candidate = strip_emphasis(&lines[first]);
            if should_promote(&candidate, title) {
                lines[first] = format!("# {candidate}");
            }
        }
    }

    let mut out: Vec<&str> = Vec::with_capacity(lines.len() + 8);
    for (index, line) in lines.iter().enumerate() {
        out.push(line);
        if HEADING_PREFIX.is_match(line) {
            if let Some(next) = lines.get(index + 1) {
                if !next.trim().is_empty() {
                    out.push("");
                }
            }
        }
    }

    let joined = out.join("\n");
    let collapsed = BLANK_RUN.replace_all(&joined, "\n\n");
    format!("{}\n", collapsed.trim())
}

fn strip_emphasis(text: &str) -> String {
    let mut text = text.trim().to_string();
    if BOLD.is_match(&text) {
        text = BOLD.replace(&text, "$1").into_owned();
    }
    if ITALIC.is_match(&text) {
        text = ITALIC.replace(&text, "$1").into_owned();
    }
    text.trim().to_string()
}

fn should_promote(candidate: &str, title: Option<&str>) -> bool {
    match title.filter(|t| !t.trim().is_empty()) {
        Some(title) => {
            let tnorm = collapse(title);
            let cnorm = collapse(candidate);
            cnorm == tnorm
                || (cnorm.chars().count() >= MIN_PROMOTED_CHARS
                    && tnorm.to_lowercase().starts_with(&cnorm.to_lowercase()))
        }
        None => candidate.chars().count() >= MIN_PROMOTED_CHARS,
    }
}

fn collapse(text: &str) -> String {
    WHITESPACE.replace_all(text, " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn heading_emphasis_loses_one_bold_and_one_italic_layer() {
        assert_eq!(normalize_markdown_headings("# ***Hello***\ntext", None), "# Hello\n\ntext\n");
        assert_eq!(normalize_markdown_headings("# ****Hello****", None), "# *Hello*\n");
    }

    #[test]
    fn title_prefix_needs_four_characters() {
        let title = Some("abcdef");
        assert_eq!(normalize_markdown_headings("Abc\nbody", title), "Abc\nbody\n");
        assert_eq!(normalize_markdown_headings("Abcd\nbody", title), "# Abcd\n\nbody\n");
        assert_eq!(normalize_markdown_headings("abcdef\nbody", title), "# abcdef\n\nbody\n");
    }

    #[test]
    fn without_title_long_first_lines_are_promoted() {
        assert_eq!(normalize_markdown_headings("Hello there\nbody", None), "# Hello there\n\nbody\n");
        assert_eq!(normalize_markdown_headings("Hey\nbody", None), "Hey\nbody\n");
    }

    #[test]
    fn blank_input_is_returned_as_is() {
        assert_eq!(normalize_markdown_headings("", Some("x")), "");
        assert_eq!(normalize_markdown_headings("  \n\t\n", None), "  \n\t\n");
    }

    #[test]
    fn blank_runs_with_stray_whitespace_collapse() {
        let text = "# T\n\ntext\n  \n\t\n \nend";
        assert_eq!(normalize_markdown_headings(text, None), "# T\n\ntext\n\nend\n");
    }

    #[test]
    fn second_pass_changes_nothing() {
        let once = normalize_markdown_headings("**Intro**\ntext\n\n\n\nMore", Some("Intro"));
        assert_eq!(once, "## Intro\n\ntext\n\nMore\n");
        assert_eq!(normalize_markdown_headings(&once, Some("Intro")), once);
    }
}
