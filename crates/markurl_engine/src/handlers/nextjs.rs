use async_trait::async_trait;

use super::article::{fetch_article, ArticleProfile};
use super::{Acceptance, HandlerContext, SiteHandler};
use crate::browser::RenderPlan;
use crate::strategy::{BrowserStrategy, HttpStrategy};
use crate::{ConvertError, FetchResult};

const PROFILE: ArticleProfile = ArticleProfile {
    site: "nextjs",
    title_selectors: &[
        "main div.max-w-4xl div:first-child h1",
        "article h1",
        ".post h1",
        ".blog-post h1",
        ".content h1",
        ".entry-content h1",
        "h1.post-title",
        "h1.entry-title",
        "h1.page-title",
        "h1",
    ],
    title_suffixes: &[],
    author_selectors: &[
        ".author",
        ".post-author",
        ".blog-author",
        ".entry-author",
        ".byline",
        ".author-name",
        ".meta-author",
        ".post-meta .author",
    ],
    time_selectors: &[
        "main div.max-w-4xl div.my-4 p.text-sm",
        ".text-sm",
        "time[datetime]",
        ".publish-date",
        ".post-date",
        ".entry-date",
        ".blog-date",
        ".date",
        ".meta-date",
        ".post-meta .date",
        "[data-date]",
    ],
    category_selectors: &[
        ".categories a",
        ".post-categories a",
        ".blog-categories a",
        ".entry-categories a",
        ".category a",
        ".meta-category a",
        ".post-meta .category a",
        "a[rel=\"category\"]",
    ],
    tag_selectors: &[
        ".tags a",
        ".post-tags a",
        ".blog-tags a",
        ".entry-tags a",
        ".tag a",
        ".meta-tags a",
        ".post-meta .tags a",
        "a[rel=\"tag\"]",
    ],
    content_selectors: &[
        "div.max-w-4xl.mx-auto.w-full.px-6",
        "main",
        "main article",
        "article .post-content",
        "article .content",
        "article .entry-content",
        ".entry-content",
        ".post-content",
        ".content",
    ],
    // Title and date already live in the header.
    unwanted_selectors: &[
        "h1", "p.text-sm", "nav", ".nav", ".navigation", ".menu", ".navbar", "header", ".header",
        "#header", "aside", ".sidebar", ".toc", "#toc", ".table-of-contents", ".on-this-page",
        ".toc-container", ".toc-sidebar", ".hidden.text-sm.xl\\:block", ".hydrated", ".comments",
        "#comments", ".comment-list", ".comment-form", "footer", ".footer", ".site-footer",
        ".social", ".social-links", ".share", ".share-buttons", ".social-media", ".social-share",
        ".breadcrumb", ".breadcrumbs", ".advertisement", ".ads", ".ad", ".ad-container",
        ".ad-banner", ".promo", ".sponsored", ".affiliate", ".related-posts", ".more-posts",
        ".related", ".similar-posts", ".post-navigation", ".nav-links", ".page-links",
        ".author-info", ".post-author", ".blog-author", ".post-meta", ".entry-meta", ".meta",
        ".meta-info", ".screen-reader-text", ".sr-only", ".skip-link", ".loading", ".spinner",
        ".placeholder",
    ],
    meta_separator: "  ",
    prepare: None,
    element_hook: None,
    min_chars: 200,
};

/// Next.js blogs built on the Tailwind blog starter layout.
#[derive(Debug, Default)]
pub struct NextJsHandler;

#[async_trait]
impl SiteHandler for NextJsHandler {
    fn name(&self) -> &'static str {
        "nextjs"
    }

    fn matches(&self, url: &str) -> bool {
        url.to_ascii_lowercase().contains("guangzhengli.com/blog")
    }

    fn acceptance(&self) -> Acceptance {
        Acceptance::NON_EMPTY
    }

    async fn fetch(&self, cx: &HandlerContext<'_>) -> Result<FetchResult, ConvertError> {
        let browser = BrowserStrategy {
            plan: RenderPlan::default(),
        };
        fetch_article(cx, &PROFILE, &[&HttpStrategy, &browser]).await
    }
}
