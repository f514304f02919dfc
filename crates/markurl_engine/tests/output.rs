use chrono::{Local, TimeZone};
use markurl_engine::{derive_md_filename, normalize_markdown_headings, sanitize_filename};
use pretty_assertions::assert_eq;

fn noon() -> chrono::DateTime<Local> {
    Local.with_ymd_and_hms(2024, 5, 6, 12, 30, 45).unwrap()
}

#[test]
fn filename_is_timestamped_and_windows_safe() {
    let name = derive_md_filename(Some("My: Title?/Bad"), "https://example.com/foo", noon());
    assert_eq!(name, "20240506_123045_My_ Title_Bad.md");

    let reserved = derive_md_filename(Some("CON"), "https://example.com/foo", noon());
    assert_eq!(reserved, "20240506_123045_CON_.md");
}

#[test]
fn filename_falls_back_to_url_parts() {
    assert_eq!(
        derive_md_filename(None, "https://example.com/posts/hello-world", noon()),
        "20240506_123045_hello-world.md"
    );
    assert_eq!(
        derive_md_filename(Some("   "), "https://example.com/", noon()),
        "20240506_123045_example.com.md"
    );
}

#[test]
fn long_titles_are_cut_by_characters() {
    let title = "标题".repeat(60);
    let sanitized = sanitize_filename(&title, "untitled");
    assert_eq!(sanitized.chars().count(), 80);
    assert_eq!(sanitize_filename("___", "untitled"), "untitled");
    assert_eq!(sanitize_filename("a__b::c", "x"), "a_b_c");
}

#[test]
fn normalizer_promotes_the_title_line() {
    let output = normalize_markdown_headings("My Article\nContent", Some("My Article"));
    assert!(output.starts_with("# My Article\n\nContent"));
    assert!(output.ends_with("Content\n"));
}

#[test]
fn normalizer_collapses_blank_runs_and_bold_lines() {
    let input = "# Title\n\n\n\n**Section**\ntext\n\n\n\nmore\n\n\n";
    let output = normalize_markdown_headings(input, Some("Title"));
    assert!(!output.contains("\n\n\n"));
    assert!(output.contains("## Section\n\ntext"));
    assert!(output.ends_with("more\n"));
    assert!(!output.ends_with("\n\n"));
}
