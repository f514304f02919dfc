/// Metadata rendered as a bullet line above the article body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleMeta {
    pub author: Option<String>,
    pub published: Option<String>,
    pub categories: Vec<String>,
    pub tags: Vec<String>,
}

impl ArticleMeta {
    /// Labelled parts joined by `separator`, or `None` when nothing is known.
    pub fn summary(&self, separator: &str) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(author) = self.author.as_deref().filter(|a| !a.is_empty()) {
            parts.push(format!("Author: {author}"));
        }
        if let Some(published) = self.published.as_deref().filter(|p| !p.is_empty()) {
            parts.push(format!("Published: {published}"));
        }
        if !self.categories.is_empty() {
            parts.push(format!("Categories: {}", self.categories.join(", ")));
        }
        if !self.tags.is_empty() {
            parts.push(format!("Tags: {}", self.tags.join(", ")));
        }
        (!parts.is_empty()).then(|| parts.join(separator))
    }
}

/// `# title`, a source bullet, optional metadata bullets, then the body.
pub fn compose_article(title: Option<&str>, url: &str, meta_lines: &[String], body: &str) -> String {
    let mut doc = String::new();
    if let Some(title) = title.map(str::trim).filter(|t| !t.is_empty()) {
        doc.push_str(&format!("# {title}\n\n"));
    }
    doc.push_str(&format!("* Source: {url}\n"));
    for line in meta_lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        doc.push_str(&format!("* {line}\n"));
    }
    doc.push('\n');
    doc.push_str(body.trim());
    doc.push('\n');
    doc
}
