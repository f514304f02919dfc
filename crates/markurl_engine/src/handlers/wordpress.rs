use async_trait::async_trait;

use super::article::{fetch_article, ArticleProfile};
use super::{Acceptance, HandlerContext, SiteHandler};
use crate::browser::RenderPlan;
use crate::strategy::{BrowserStrategy, HttpStrategy};
use crate::{ConvertError, FetchResult};

/// URL fragments that give a WordPress install away.
const WORDPRESS_HINTS: &[&str] = &["skywind.me/blog", "wordpress.com", "wp-content", "/wp-", "wp-includes"];

const PROFILE: ArticleProfile = ArticleProfile {
    site: "wordpress",
    title_selectors: &[
        "div#content[role=\"main\"] h1.entry-title",
        "div#content[role=\"main\"] h1.post-title",
        "div#content[role=\"main\"] h1.page-title",
        "div#content[role=\"main\"] h1",
    ],
    title_suffixes: &[],
    author_selectors: &[".author.vcard a", ".entry-author a", ".post-author a", ".byline a", ".author-name a"],
    time_selectors: &["time.entry-date", ".entry-date", ".post-date", ".published", "time[datetime]"],
    category_selectors: &[".entry-categories a", ".post-categories a", ".categories a", ".cat-links a"],
    tag_selectors: &[".entry-tags a", ".post-tags a", ".tags a", ".tag-links a"],
    content_selectors: &[
        "div#content[role=\"main\"] div.entry-content",
        "div.entry-content",
        "div.post-content",
        "div.entry-body",
        "div.article-content",
        "div.content",
        "article .entry-content",
        "main .entry-content",
    ],
    unwanted_selectors: &[
        ".advertisement", ".ads", ".ad", ".ad-container", ".ad-banner", ".promo", ".sponsored",
        ".affiliate", ".social-share", ".share", ".social", ".social-links", ".share-buttons",
        ".social-media", ".related-posts", ".more-posts", ".related", ".similar-posts",
        ".post-navigation", ".nav-links", ".page-links", ".comments", ".comment", "#comments",
        "#respond", ".comment-form", ".comment-list", ".comment-reply", ".comment-respond",
        ".entry-author-info", ".author-info", ".post-author", ".entry-meta", ".post-meta",
        ".entry-utility", ".wp-caption-text", ".gallery-caption", ".screen-reader-text", ".sr-only",
        ".skip-link", "#entry-author-info", ".pvc_stats.pvc_load_by_ajax_update",
        ".likebtn_container",
    ],
    meta_separator: "  ",
    prepare: None,
    element_hook: None,
    min_chars: 200,
};

/// WordPress blogs, recognized by URL shape.
#[derive(Debug, Default)]
pub struct WordPressHandler;

#[async_trait]
impl SiteHandler for WordPressHandler {
    fn name(&self) -> &'static str {
        "wordpress"
    }

    fn matches(&self, url: &str) -> bool {
        let url = url.to_ascii_lowercase();
        WORDPRESS_HINTS.iter().any(|hint| url.contains(hint))
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
