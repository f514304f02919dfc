use async_trait::async_trait;
use scraper::{ElementRef, Html};

use super::article::{fetch_article, ArticleProfile};
use super::{Acceptance, HandlerContext, SiteHandler};
use crate::browser::RenderPlan;
use crate::clean::remove_link_containers;
use crate::strategy::{BrowserStrategy, HttpStrategy};
use crate::{ConvertError, FetchResult};

const PROMO_LINKS: &[&str] = &[
    "https://sspai.com/page/client",
    "https://sspai.com/mall",
    "https://sspai.com/link?target=https%3A%2F%2Fwww.xiaohongshu.com%2Fuser%2Fprofile%2F63f5d65d000000001001d8d4",
];

const FOOTNOTE_ID_ATTRS: &[&str] = &["footnote-id", "data-footnote-id"];
const FOOTNOTE_TEXT_ATTRS: &[&str] = &["title", "data-footnote", "aria-label"];

const PROFILE: ArticleProfile = ArticleProfile {
    site: "sspai",
    title_selectors: &[
        "div#article-title",
        "h1.entry-title",
        "h1.post-title",
        "article h1",
        "main h1",
        ".entry-content h1",
        ".post h1",
        ".post-title",
        "h1",
    ],
    title_suffixes: &[" - 少数派"],
    author_selectors: &[
        "div.article-author > div.author-box > div > span > span > div > span",
        "div.article-author > div.author-box > div > span > span > div > a > div > span",
    ],
    time_selectors: &[".timer"],
    category_selectors: &[".series-title a"],
    tag_selectors: &[
        ".entry-tags a",
        ".post-tags a",
        ".tags a",
        ".tag-links a",
        "a[rel=\"tag\"]",
        ".entry-meta .tags a",
        ".post-meta .tags a",
    ],
    content_selectors: &["article div.article-body div.article__main__content.wangEditor-txt"],
    unwanted_selectors: &[
        "nav", ".nav", ".navigation", ".menu", "header", ".header", "#header", "footer", ".footer",
        ".site-footer", ".social", ".social-links", ".share", ".share-buttons", ".social-media",
        ".social-share", ".related-posts", ".more-posts", ".related", ".similar-posts",
        ".post-navigation", ".nav-links", ".page-links", ".comments", "#comments", ".comment",
        ".comment-list", ".comment-form", ".entry-meta", ".post-meta", ".meta", ".meta-info",
        ".screen-reader-text", ".sr-only", ".skip-link", ".loading", ".spinner", ".placeholder",
        ".advertisement", ".ad", ".ads", ".advertisement-container", ".recommendation",
        ".recommended", ".related-articles", ".author-bio", ".author-info", ".post-author-info",
        ".post-actions", ".post-tools", ".post-utilities", ".entry-footer", ".post-footer",
        ".share-post", ".like-post", ".bookmark-post", ".post-stats", ".view-count", ".like-count",
        ".qr-code", ".qrcode", ".scan-code", ".subscribe", ".follow", ".follow-author",
    ],
    meta_separator: " ",
    prepare: Some(remove_promotions),
    element_hook: Some(inline_footnote),
    min_chars: 200,
};

fn remove_promotions(doc: &mut Html) {
    remove_link_containers(doc, PROMO_LINKS, "p");
}

/// `<sup class="ss-footnote" title="...">` renders as `（注：...）`; empty ones vanish.
fn inline_footnote(el: &ElementRef<'_>) -> Option<String> {
    let value = el.value();
    if value.name() != "sup" || !value.classes().any(|c| c == "ss-footnote") {
        return None;
    }
    let has_id = FOOTNOTE_ID_ATTRS
        .iter()
        .any(|attr| value.attr(attr).is_some_and(|v| !v.trim().is_empty()))
        || el.text().any(|t| !t.trim().is_empty());
    let text = FOOTNOTE_TEXT_ATTRS
        .iter()
        .filter_map(|attr| value.attr(attr))
        .map(str::trim)
        .find(|v| !v.is_empty());
    match text {
        Some(text) if has_id => Some(format!("（注：{text}）")),
        _ => Some(String::new()),
    }
}

/// sspai.com articles.
#[derive(Debug, Default)]
pub struct SspaiHandler;

#[async_trait]
impl SiteHandler for SspaiHandler {
    fn name(&self) -> &'static str {
        "sspai"
    }

    fn matches(&self, url: &str) -> bool {
        url.to_ascii_lowercase().contains("sspai.com")
    }

    fn acceptance(&self) -> Acceptance {
        Acceptance::min_chars(200)
    }

    async fn fetch(&self, cx: &HandlerContext<'_>) -> Result<FetchResult, ConvertError> {
        let browser = BrowserStrategy {
            plan: RenderPlan::default(),
        };
        fetch_article(cx, &PROFILE, &[&HttpStrategy, &browser]).await
    }
}
