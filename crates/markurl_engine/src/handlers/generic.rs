//! Fallback for any URL no site handler claims.

use async_trait::async_trait;
use scraper::Html;
use url::Url;

use super::{Acceptance, HandlerContext, SiteHandler};
use crate::browser::RenderPlan;
use crate::clean::remove_selectors;
use crate::extract::{first_text, page_title, title_before_separator, Extractor, ReadabilityLikeExtractor};
use crate::markdown::MarkdownConverter;
use crate::strategy::{
    run_strategies, run_strategies_with, BrowserStrategy, DirectStrategy, HttpStrategy, RawPage,
    RetryPolicy, Strategy, Verdict,
};
use crate::{ConvertError, FetchResult};

/// Generic results must be longer than this many characters.
pub const MIN_CHARS: usize = 100;

/// Site chrome removed by the filtering strategy on every domain.
pub const COMMON_FILTERS: &[&str] = &[
    "head", "nav", ".nav", "header", ".header", "#header", "footer", ".footer", ".site-footer",
    "aside", ".sidebar", ".toc", "#toc", ".table-of-contents", ".on-this-page", ".toc-container",
    ".toc-sidebar", ".floating", ".suspension", ".suspended", ".float", "#comment", "#comments",
    ".comments", ".comment-list", ".comment-form", ".share", ".share-buttons", ".social",
    ".social-links", ".advertisement", ".ads", ".ad", ".ad-container", ".ad-banner", ".breadcrumb",
    ".breadcrumbs",
];

/// Extra chrome selectors keyed by host.
pub const DOMAIN_FILTERS: &[(&str, &[&str])] = &[(
    "juejin.cn",
    &[
        "header",
        ".article-suspended-panel.dynamic-data-ready",
        "#sidebar-container",
        ".article-end",
        "#comment-box",
        ".main-area.recommended-area.entry-list-container.shadow",
    ],
)];

const BODY_TITLE_SELECTORS: &[&str] = &["h1.article-title", "[itemprop=headline]", "article h1", "main h1", "h1"];

/// Chrome selectors for `url`: the common list plus its host's extras, deduplicated.
pub fn filters_for(url: &str) -> Vec<&'static str> {
    let host = Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default();
    let mut selectors: Vec<&'static str> = COMMON_FILTERS.to_vec();
    for (domain, extra) in DOMAIN_FILTERS {
        if host == *domain {
            for selector in *extra {
                if !selectors.contains(selector) {
                    selectors.push(selector);
                }
            }
        }
    }
    selectors
}

/// Article title from headline elements, without a trailing `" - Site"`.
fn body_title(doc: &Html) -> Option<String> {
    first_text(doc, BODY_TITLE_SELECTORS)
        .map(|t| title_before_separator(&t))
        .filter(|t| !t.is_empty())
}

fn strip_chrome(html: &str, url: &str) -> (String, Option<String>) {
    let mut doc = Html::parse_document(html);
    let removed = remove_selectors(&mut doc, &filters_for(url));
    engine_logging::engine_debug!("removed {removed} chrome elements from {url}");
    let title = body_title(&doc);
    (doc.html(), title)
}

/// HTTP fetch with site chrome stripped before extraction.
pub struct FilteredHttpStrategy;

#[async_trait]
impl Strategy for FilteredHttpStrategy {
    fn name(&self) -> &'static str {
        "filtered"
    }

    async fn fetch(&self, cx: &HandlerContext<'_>) -> Result<RawPage, ConvertError> {
        let page = cx.session.get_page(cx.url).await?;
        let (html, title) = strip_chrome(&page.html, cx.url);
        Ok(RawPage {
            html,
            title,
            final_url: page.final_url,
        })
    }
}

/// Readability-like extraction of a whole page into title and Markdown.
pub fn convert_page(raw: &RawPage, url: &str) -> FetchResult {
    let doc = Html::parse_document(&raw.html);
    let title = body_title(&doc)
        .or_else(|| raw.title.clone())
        .or_else(|| page_title(&doc));
    let extracted = ReadabilityLikeExtractor.extract(&raw.html);
    let base = if raw.final_url.is_empty() { url } else { raw.final_url.as_str() };
    let markdown = MarkdownConverter::new()
        .with_base_url(base)
        .convert_html(&extracted.content_html);
    FetchResult::ok(title, markdown)
}

/// Lightweight, enhanced and direct strategies once each, accepting any non-empty page.
pub(crate) async fn quick_chain(cx: &HandlerContext<'_>) -> Result<FetchResult, ConvertError> {
    let policy = RetryPolicy {
        max_attempts: 1,
        ..cx.retry_policy().clone()
    };
    let enhanced = BrowserStrategy {
        plan: RenderPlan::default(),
    };
    run_strategies_with(
        cx,
        &policy,
        "generic",
        &[&HttpStrategy, &enhanced, &DirectStrategy],
        |raw| {
            let result = convert_page(&raw, cx.url);
            if result.content.trim().is_empty() {
                Verdict::NextStrategy("empty content".to_string())
            } else {
                Verdict::Accept(result)
            }
        },
    )
    .await
}

/// Multi-strategy fallback for unknown sites.
#[derive(Debug, Default)]
pub struct GenericHandler;

#[async_trait]
impl SiteHandler for GenericHandler {
    fn name(&self) -> &'static str {
        "generic"
    }

    fn matches(&self, _url: &str) -> bool {
        true
    }

    fn acceptance(&self) -> Acceptance {
        Acceptance::min_chars(MIN_CHARS + 1)
    }

    async fn fetch(&self, cx: &HandlerContext<'_>) -> Result<FetchResult, ConvertError> {
        let enhanced = BrowserStrategy {
            plan: RenderPlan::default(),
        };
        let mut strategies: Vec<&dyn Strategy> = Vec::with_capacity(4);
        if cx.options.filter_site_chrome {
            strategies.push(&FilteredHttpStrategy);
        }
        strategies.extend([&HttpStrategy as &dyn Strategy, &enhanced, &DirectStrategy]);

        run_strategies(cx, "generic", &strategies, |raw| {
            cx.logger.clean_start();
            let result = convert_page(&raw, cx.url);
            let chars = result.content_chars();
            if chars <= MIN_CHARS {
                cx.logger.parse_content_short(chars, MIN_CHARS + 1);
                return Verdict::Retry(format!("content too short ({chars} chars)"));
            }
            cx.logger.clean_success();
            cx.logger.convert_start();
            cx.logger.convert_success();
            Verdict::Accept(result)
        })
        .await
    }
}
