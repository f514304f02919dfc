use async_trait::async_trait;

use super::article::{fetch_article, ArticleProfile};
use super::{Acceptance, HandlerContext, SiteHandler};
use crate::browser::RenderPlan;
use crate::strategy::{BrowserStrategy, HttpStrategy};
use crate::{ConvertError, FetchResult};

const PROFILE: ArticleProfile = ArticleProfile {
    site: "appinn",
    title_selectors: &["div.single_post header h1.title.single-title.entry-title"],
    title_suffixes: &[" - 小众软件", " - Appinn"],
    author_selectors: &["div.single_post > header > div > span.theauthor > span > a"],
    time_selectors: &["div.single_post > header > div > span.thetime.updated > span"],
    category_selectors: &[],
    tag_selectors: &["div.single_post header div.post-info span.thecategory a"],
    content_selectors: &[
        "div.entry-content",
        "div.post-content",
        "article .entry-content",
        "article .content",
        "article",
        "main .entry-content",
        "main .content",
        "main article",
        "main",
        ".content",
        ".post-body",
        ".entry-body",
    ],
    unwanted_selectors: &[
        "nav", ".nav", ".navigation", ".menu", "header", ".header", "#header", "footer", ".footer",
        ".site-footer", ".social", ".social-links", ".share", ".share-buttons", ".social-media",
        ".social-share", ".related-posts", ".more-posts", ".related", ".similar-posts",
        ".post-navigation", ".nav-links", ".page-links", ".comments", "#comments", ".comment",
        ".comment-list", ".comment-form", ".entry-meta", ".post-meta", ".meta", ".meta-info",
        ".screen-reader-text", ".sr-only", ".skip-link", ".loading", ".spinner", ".placeholder",
        ".advertisement", ".ad", ".ads", ".advertisement-container", ".recommendation",
        ".recommended", ".related-articles", ".entry-footer", ".post-footer", ".author-bio",
        ".author-info", ".entry-header", ".post-header", ".breadcrumb", ".breadcrumbs", ".sidebar",
        ".widget", ".widget-area", ".entry-tags", ".post-tags", ".entry-categories",
        ".post-categories",
    ],
    meta_separator: "  ",
    prepare: None,
    element_hook: None,
    min_chars: 200,
};

/// appinn.com (小众软件) posts.
#[derive(Debug, Default)]
pub struct AppinnHandler;

#[async_trait]
impl SiteHandler for AppinnHandler {
    fn name(&self) -> &'static str {
        "appinn"
    }

    fn matches(&self, url: &str) -> bool {
        url.to_ascii_lowercase().contains("appinn.com")
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
