use ego_tree::NodeRef;
use scraper::node::Node;
use scraper::{ElementRef, Html};
use url::Url;

/// Attributes holding the real image URL on lazy-loading pages, in priority order.
pub const LAZY_IMAGE_ATTRS: &[&str] = &["data-src", "data-original", "data-lazy-src", "data-actualsrc"];

/// Zero-width and other invisible characters some CMS editors sprinkle into text.
pub const INVISIBLE_CHARS: &[char] = &[
    '\u{200b}', '\u{200c}', '\u{200d}', '\u{200e}', '\u{200f}', '\u{feff}', '\u{2060}', '\u{00a0}',
    '\u{2028}', '\u{2029}',
];

const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "iframe", "head", "svg", "canvas", "button",
    "input", "select", "textarea",
];

const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "header", "footer", "nav", "aside", "figure",
    "figcaption", "blockquote", "pre", "ul", "ol", "li", "table", "h1", "h2", "h3", "h4", "h5",
    "h6", "hr", "dl", "dt", "dd", "details", "summary", "address", "form", "body", "html",
];

/// Decision of a link rewrite hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkTarget {
    Keep(String),
    /// Drop the link and keep only its text.
    Unwrap,
}

pub type LinkRewrite = fn(&str) -> LinkTarget;

/// Replaces an element's rendering entirely when it returns `Some`.
pub type ElementHook = fn(&ElementRef<'_>) -> Option<String>;

/// DOM walker that renders cleaned article fragments as Markdown.
#[derive(Debug, Clone, Default)]
pub struct MarkdownConverter {
    base_url: Option<Url>,
    link_rewrite: Option<LinkRewrite>,
    element_hook: Option<ElementHook>,
    strip_invisible: bool,
}

impl MarkdownConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Url::parse(base_url).ok();
        self
    }

    pub fn with_link_rewrite(mut self, rewrite: LinkRewrite) -> Self {
        self.link_rewrite = Some(rewrite);
        self
    }

    pub fn with_element_hook(mut self, hook: ElementHook) -> Self {
        self.element_hook = Some(hook);
        self
    }

    pub fn strip_invisible(mut self, strip: bool) -> Self {
        self.strip_invisible = strip;
        self
    }

    pub fn convert_html(&self, html: &str) -> String {
        self.convert_document(&Html::parse_fragment(html))
    }

    pub fn convert_document(&self, document: &Html) -> String {
        finish(&self.block_children(document.root_element()))
    }

    fn block_children(&self, element: ElementRef) -> String {
        let mut out = String::new();
        let mut run = String::new();
        for child in element.children() {
            match child.value() {
                Node::Text(text) => run.push_str(&self.text(text)),
                Node::Element(_) => {
                    if let Some(el) = ElementRef::wrap(child) {
                        if is_block(&el) {
                            flush_run(&mut out, &mut run);
                            push_block(&mut out, &self.block(el));
                        } else {
                            run.push_str(&self.inline(el));
                        }
                    }
                }
                _ => {}
            }
        }
        flush_run(&mut out, &mut run);
        out
    }

    fn inline_children(&self, element: ElementRef) -> String {
        let mut out = String::new();
        for child in element.children() {
            self.visit_inline(child, &mut out);
        }
        out
    }

    fn visit_inline(&self, node: NodeRef<'_, Node>, out: &mut String) {
        match node.value() {
            Node::Text(text) => out.push_str(&self.text(text)),
            Node::Element(_) => {
                if let Some(el) = ElementRef::wrap(node) {
                    if is_block(&el) {
                        let block = self.block(el);
                        if !block.trim().is_empty() {
                            out.push(' ');
                            out.push_str(block.trim());
                            out.push(' ');
                        }
                    } else {
                        out.push_str(&self.inline(el));
                    }
                }
            }
            _ => {}
        }
    }

    fn block(&self, el: ElementRef) -> String {
        if let Some(rendered) = self.element_hook.and_then(|hook| hook(&el)) {
            return rendered;
        }
        let tag = el.value().name();
        match tag {
            _ if SKIPPED_TAGS.contains(&tag) => String::new(),
            "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                let level = usize::from(tag.as_bytes()[1] - b'0');
                let text = collapse_ws(&self.inline_children(el));
                if text.is_empty() {
                    String::new()
                } else {
                    format!("{} {}", "#".repeat(level), text)
                }
            }
            "p" | "dt" | "summary" => self.inline_children(el).trim().to_string(),
            "ul" => self.list(el, false),
            "ol" => self.list(el, true),
            "li" => format!("- {}", self.block_children(el).trim()),
            "blockquote" => quote(&self.block_children(el)),
            "pre" => code_block(el),
            "hr" => "---".to_string(),
            "table" => self.table(el),
            _ => self.block_children(el),
        }
    }

    fn inline(&self, el: ElementRef) -> String {
        if let Some(rendered) = self.element_hook.and_then(|hook| hook(&el)) {
            return rendered;
        }
        match el.value().name() {
            "strong" | "b" => wrap_emphasis(&self.inline_children(el), "**"),
            "em" | "i" => wrap_emphasis(&self.inline_children(el), "*"),
            "code" | "kbd" => {
                let code: String = el.text().collect();
                if code.trim().is_empty() {
                    String::new()
                } else {
                    format!("`{}`", code.trim())
                }
            }
            "br" => "\n".to_string(),
            "img" => self.image(el),
            "a" => self.anchor(el),
            _ => self.inline_children(el),
        }
    }

    fn text(&self, raw: &str) -> String {
        let mut out = String::with_capacity(raw.len());
        let mut last_space = false;
        for ch in raw.chars() {
            if self.strip_invisible && INVISIBLE_CHARS.contains(&ch) {
                continue;
            }
            if ch.is_whitespace() {
                if !last_space {
                    out.push(' ');
                }
                last_space = true;
            } else {
                out.push(ch);
                last_space = false;
            }
        }
        out
    }

    fn image(&self, el: ElementRef) -> String {
        let Some(src) = image_source(&el) else {
            return String::new();
        };
        let src = resolve(&src, self.base_url.as_ref()).unwrap_or(src);
        let alt = el
            .value()
            .attr("alt")
            .map(|alt| collapse_ws(alt).replace(['[', ']'], ""))
            .unwrap_or_default();
        format!("![{alt}]({src})")
    }

    fn anchor(&self, el: ElementRef) -> String {
        let text = self.inline_children(el);
        let Some(href) = el.value().attr("href").map(str::trim).filter(|h| !h.is_empty()) else {
            return text;
        };
        let lower = href.to_ascii_lowercase();
        if lower.starts_with('#') || lower.starts_with("javascript:") {
            return text;
        }
        let target = match self.link_rewrite {
            Some(rewrite) => rewrite(href),
            None => LinkTarget::Keep(href.to_string()),
        };
        let href = match target {
            LinkTarget::Unwrap => return text,
            LinkTarget::Keep(href) => resolve(&href, self.base_url.as_ref()).unwrap_or(href),
        };
        let label = text.trim();
        if label.is_empty() {
            return String::new();
        }
        format!("[{label}]({href})")
    }

    fn list(&self, el: ElementRef, ordered: bool) -> String {
        let mut items = Vec::new();
        let mut number = 1;
        for child in el.children().filter_map(ElementRef::wrap) {
            if child.value().name() != "li" {
                let nested = self.block(child);
                if !nested.trim().is_empty() {
                    items.push(indent(nested.trim(), "  "));
                }
                continue;
            }
            let body = self.block_children(child);
            let body = body.trim();
            if body.is_empty() {
                continue;
            }
            let marker = if ordered {
                format!("{number}. ")
            } else {
                "- ".to_string()
            };
            number += 1;
            let pad = " ".repeat(marker.len());
            let mut item = String::new();
            for (index, line) in body.lines().enumerate() {
                if index == 0 {
                    item.push_str(&marker);
                    item.push_str(line);
                } else {
                    item.push('\n');
                    if !line.trim().is_empty() {
                        item.push_str(&pad);
                        item.push_str(line);
                    }
                }
            }
            items.push(item);
        }
        items.join("\n")
    }

    fn table(&self, el: ElementRef) -> String {
        let mut rows: Vec<Vec<String>> = Vec::new();
        for row in el.descendants().filter_map(ElementRef::wrap) {
            if row.value().name() != "tr" {
                continue;
            }
            let cells: Vec<String> = row
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|cell| matches!(cell.value().name(), "td" | "th"))
                .map(|cell| collapse_ws(&self.inline_children(cell)).replace('|', "\\|"))
                .collect();
            if !cells.is_empty() {
                rows.push(cells);
            }
        }
        let Some(width) = rows.iter().map(Vec::len).max() else {
            return String::new();
        };
        let mut lines = Vec::with_capacity(rows.len() + 1);
        for (index, mut row) in rows.into_iter().enumerate() {
            row.resize(width, String::new());
            lines.push(format!("| {} |", row.join(" | ")));
            if index == 0 {
                lines.push(format!("|{}", " --- |".repeat(width)));
            }
        }
        lines.join("\n")
    }
}

/// Real image URL of an `<img>`: lazy attributes first, `data:` placeholders ignored.
pub fn image_source(el: &ElementRef) -> Option<String> {
    LAZY_IMAGE_ATTRS
        .iter()
        .chain(std::iter::once(&"src"))
        .filter_map(|attr| el.value().attr(attr))
        .map(str::trim)
        .find(|src| !src.is_empty() && !src.to_ascii_lowercase().starts_with("data:"))
        .map(str::to_string)
}

pub(crate) fn resolve(reference: &str, base: Option<&Url>) -> Option<String> {
    if let Ok(url) = Url::parse(reference) {
        return Some(url.into());
    }
    base.and_then(|base| base.join(reference).ok()).map(Into::into)
}

fn is_block(el: &ElementRef) -> bool {
    let tag = el.value().name();
    BLOCK_TAGS.contains(&tag) || SKIPPED_TAGS.contains(&tag)
}

fn flush_run(out: &mut String, run: &mut String) {
    let trimmed = run.trim();
    if !trimmed.is_empty() {
        push_block(out, trimmed);
    }
    run.clear();
}

fn push_block(out: &mut String, block: &str) {
    let block = block.trim_start_matches('\n').trim_end();
    if block.trim().is_empty() {
        return;
    }
    if !out.is_empty() {
        out.push_str("\n\n");
    }
    out.push_str(block);
}

fn wrap_emphasis(inner: &str, marker: &str) -> String {
    let trimmed = inner.trim();
    if trimmed.is_empty() {
        return inner.to_string();
    }
    let lead = if inner.starts_with(char::is_whitespace) { " " } else { "" };
    let trail = if inner.ends_with(char::is_whitespace) { " " } else { "" };
    format!("{lead}{marker}{trimmed}{marker}{trail}")
}

fn collapse_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn indent(text: &str, pad: &str) -> String {
    text.lines()
        .map(|line| {
            if line.is_empty() {
                String::new()
            } else {
                format!("{pad}{line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn quote(text: &str) -> String {
    text.trim()
        .lines()
        .map(|line| {
            if line.trim().is_empty() {
                ">".to_string()
            } else {
                format!("> {line}")
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn code_block(el: ElementRef) -> String {
    let code: String = el.text().collect();
    let language = el
        .descendants()
        .filter_map(ElementRef::wrap)
        .chain(std::iter::once(el))
        .filter_map(|node| node.value().attr("class"))
        .flat_map(str::split_whitespace)
        .find_map(|class| {
            class
                .strip_prefix("language-")
                .or_else(|| class.strip_prefix("lang-"))
        })
        .unwrap_or("");
    format!("```{language}\n{}\n```", code.trim_matches('\n'))
}

fn finish(markdown: &str) -> String {
    let mut lines = Vec::new();
    let mut in_fence = false;
    let mut blank_run = 0;
    for line in markdown.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
        }
        let line = if in_fence { line } else { line.trim_end() };
        if line.is_empty() && !in_fence {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        lines.push(line);
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_common_blocks() {
        let html = r#"
            <h2>Intro <b>part</b></h2>
            <p>Hello <strong>bold</strong> and <em>soft</em> <a href="/next">link</a>.</p>
            <ul><li>one</li><li>two <ol><li>nested</li></ol></li></ul>
            <pre><code class="language-rust">fn main() {}</code></pre>
            <blockquote><p>quoted</p></blockquote>
        "#;
        let md = MarkdownConverter::new()
            .with_base_url("https://example.com/post/")
            .convert_html(html);
        assert_eq!(
            md,
            "## Intro **part**\n\n\
             Hello **bold** and *soft* [link](https://example.com/next).\n\n\
             - one\n- two\n\n  1. nested\n\n\
             ```rust\nfn main() {}\n```\n\n\
             > quoted"
        );
    }

    #[test]
    fn lazy_images_win_over_placeholders() {
        let html = r#"<p><img src="data:image/svg+xml;base64,AAAA" data-original="//img.cdn.test/a.png" alt="pic"></p>"#;
        let md = MarkdownConverter::new()
            .with_base_url("https://blog.test/x")
            .convert_html(html);
        assert_eq!(md, "![pic](https://img.cdn.test/a.png)");
    }

    #[test]
    fn link_rewrite_can_unwrap() {
        fn unwrap_all(_: &str) -> LinkTarget {
            LinkTarget::Unwrap
        }
        let md = MarkdownConverter::new()
            .with_link_rewrite(unwrap_all)
            .convert_html(r#"<p>see <a href="https://x.test">this</a> page</p>"#);
        assert_eq!(md, "see this page");
    }

    #[test]
    fn invisible_characters_are_stripped_on_request() {
        let md = MarkdownConverter::new()
            .strip_invisible(true)
            .convert_html("<p>a\u{200b}b\u{feff}c</p>");
        assert_eq!(md, "abc");
    }

    #[test]
    fn tables_get_a_header_separator() {
        let md = MarkdownConverter::new()
            .convert_html("<table><tr><th>k</th><th>v</th></tr><tr><td>a</td><td>1|2</td></tr></table>");
        assert_eq!(md, "| k | v |\n| --- | --- |\n| a | 1\\|2 |");
    }
}
