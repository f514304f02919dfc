//! Shared pipeline for CMS-style article pages whose handlers only differ in selectors.

use scraper::Html;

use crate::clean::{dedupe_images, fragment_of, remove_selectors, SCRIPT_TAGS};
use crate::extract::{all_texts, first_text, page_title, select_first, time_text, title_before_separator};
use crate::handlers::HandlerContext;
use crate::header::{compose_article, ArticleMeta};
use crate::markdown::{ElementHook, MarkdownConverter};
use crate::strategy::{run_strategies, RawPage, Strategy, Verdict};
use crate::{ConvertError, FetchResult};

/// Per-site selector data.
pub(crate) struct ArticleProfile {
    pub site: &'static str,
    pub title_selectors: &'static [&'static str],
    /// Site names stripped from `<title>` before falling back to the `" - "` split.
    pub title_suffixes: &'static [&'static str],
    pub author_selectors: &'static [&'static str],
    pub time_selectors: &'static [&'static str],
    pub category_selectors: &'static [&'static str],
    pub tag_selectors: &'static [&'static str],
    pub content_selectors: &'static [&'static str],
    pub unwanted_selectors: &'static [&'static str],
    pub meta_separator: &'static str,
    /// Site-specific cleanup run before the unwanted selectors.
    pub prepare: Option<fn(&mut Html)>,
    pub element_hook: Option<ElementHook>,
    pub min_chars: usize,
}

impl ArticleProfile {
    fn title(&self, doc: &Html, hint: Option<&str>) -> Option<String> {
        first_text(doc, self.title_selectors)
            .or_else(|| hint.map(str::trim).filter(|h| !h.is_empty()).map(str::to_string))
            .or_else(|| {
                let raw = page_title(doc)?;
                let stripped = self
                    .title_suffixes
                    .iter()
                    .find_map(|suffix| raw.strip_suffix(suffix))
                    .map(|t| t.trim().to_string());
                Some(stripped.unwrap_or_else(|| title_before_separator(&raw)))
            })
            .filter(|t| !t.is_empty())
    }

    fn meta(&self, doc: &Html) -> ArticleMeta {
        ArticleMeta {
            author: first_text(doc, self.author_selectors),
            published: time_text(doc, self.time_selectors),
            categories: all_texts(doc, self.category_selectors),
            tags: all_texts(doc, self.tag_selectors),
        }
    }

    fn body(&self, doc: &Html, url: &str) -> String {
        let Some(content) = select_first(doc, self.content_selectors) else {
            return String::new();
        };
        let mut fragment = fragment_of(content);
        remove_selectors(&mut fragment, SCRIPT_TAGS);
        if let Some(prepare) = self.prepare {
            prepare(&mut fragment);
        }
        remove_selectors(&mut fragment, self.unwanted_selectors);
        dedupe_images(&mut fragment, Some(url));

        let mut converter = MarkdownConverter::new().with_base_url(url).strip_invisible(true);
        if let Some(hook) = self.element_hook {
            converter = converter.with_element_hook(hook);
        }
        converter.convert_document(&fragment)
    }

    /// Header and body of one raw page.
    pub fn process(&self, raw: &RawPage, url: &str) -> FetchResult {
        let doc = Html::parse_document(&raw.html);
        let title = self.title(&doc, raw.title.as_deref());
        let meta_lines: Vec<String> = self.meta(&doc).summary(self.meta_separator).into_iter().collect();
        let body = self.body(&doc, url);
        let markdown = compose_article(title.as_deref(), url, &meta_lines, &body);
        FetchResult::ok(title, markdown)
    }
}

/// Run `strategies` and process every page with `profile`; short results move on to the next strategy.
pub(crate) async fn fetch_article(
    cx: &HandlerContext<'_>,
    profile: &ArticleProfile,
    strategies: &[&dyn Strategy],
) -> Result<FetchResult, ConvertError> {
    run_strategies(cx, profile.site, strategies, |raw| {
        if raw.html.trim().is_empty() {
            return Verdict::Retry("empty page".to_string());
        }
        cx.logger.clean_start();
        let result = profile.process(&raw, cx.url);
        let chars = result.content.chars().count();
        if chars < profile.min_chars {
            cx.logger.parse_content_short(chars, profile.min_chars);
            return Verdict::NextStrategy(format!("content too short ({chars} chars)"));
        }
        cx.logger.clean_success();
        cx.logger.convert_start();
        cx.logger.convert_success();
        Verdict::Accept(result)
    })
    .await
}
