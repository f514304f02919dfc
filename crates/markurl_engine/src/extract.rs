use scraper::{ElementRef, Html, Selector};

use crate::clean::{fragment_of, remove_selectors, SCRIPT_TAGS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedContent {
    pub title: Option<String>,
    pub content_html: String,
}

pub trait Extractor: Send + Sync {
    fn extract(&self, html: &str) -> ExtractedContent;
}

/// Lightweight "readability-like" extractor:
/// - pulls `<title>` text if present
/// - returns `<article>`, then `<main>`, then `<body>` inner html with scripts removed
/// - fallback to full document HTML.
#[derive(Debug, Default)]
pub struct ReadabilityLikeExtractor;

impl Extractor for ReadabilityLikeExtractor {
    fn extract(&self, html: &str) -> ExtractedContent {
        let doc = Html::parse_document(html);
        let title = page_title(&doc);
        let content_html = match select_first(&doc, &["article", "main", "body"]) {
            Some(node) => {
                let mut fragment = fragment_of(node);
                remove_selectors(&mut fragment, SCRIPT_TAGS);
                fragment.root_element().inner_html()
            }
            None => doc.root_element().html(),
        };
        ExtractedContent {
            title,
            content_html,
        }
    }
}

/// First element matched by the first selector that matches anything.
pub fn select_first<'a>(doc: &'a Html, selectors: &[&str]) -> Option<ElementRef<'a>> {
    selectors
        .iter()
        .filter_map(|raw| Selector::parse(raw).ok())
        .find_map(|sel| doc.select(&sel).next())
}

/// Whitespace-collapsed text of an element.
pub fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text of the first selector whose first match has non-empty text.
pub fn first_text(doc: &Html, selectors: &[&str]) -> Option<String> {
    selectors
        .iter()
        .filter_map(|raw| Selector::parse(raw).ok())
        .find_map(|sel| {
            doc.select(&sel)
                .map(|el| element_text(&el))
                .find(|text| !text.is_empty())
        })
}

/// Distinct non-empty texts of every match of every selector, in order.
pub fn all_texts(doc: &Html, selectors: &[&str]) -> Vec<String> {
    let mut texts: Vec<String> = Vec::new();
    for sel in selectors.iter().filter_map(|raw| Selector::parse(raw).ok()) {
        for text in doc.select(&sel).map(|el| element_text(&el)) {
            if !text.is_empty() && !texts.contains(&text) {
                texts.push(text);
            }
        }
    }
    texts
}

/// `datetime` attribute or text of the first element matched by any selector.
pub fn time_text(doc: &Html, selectors: &[&str]) -> Option<String> {
    let el = select_first(doc, selectors)?;
    el.value()
        .attr("datetime")
        .map(|dt| dt.trim().to_string())
        .filter(|dt| !dt.is_empty())
        .or_else(|| Some(element_text(&el)).filter(|text| !text.is_empty()))
}

/// `content` of `<meta property=..>` or `<meta name=..>`.
pub fn meta_content(doc: &Html, key: &str) -> Option<String> {
    let css = format!(r#"meta[property="{key}"], meta[name="{key}"]"#);
    let sel = Selector::parse(&css).ok()?;
    doc.select(&sel)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|content| !content.is_empty())
        .map(str::to_string)
}

pub fn page_title(doc: &Html) -> Option<String> {
    first_text(doc, &["title"])
}

/// Remove a trailing site name such as `" - 少数派"`.
pub fn strip_site_suffix(title: &str, suffixes: &[&str]) -> String {
    let trimmed = title.trim();
    suffixes
        .iter()
        .find_map(|suffix| trimmed.strip_suffix(suffix))
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Part of a `"Article - Site"` title before the first separator.
pub fn title_before_separator(title: &str) -> String {
    title.split(" - ").next().unwrap_or(title).trim().to_string()
}
