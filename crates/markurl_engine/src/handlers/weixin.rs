//! WeChat official-account articles (`mp.weixin.qq.com`).
//!
//! These pages are only fetched through a private, text-only browser: the
//! verification token check defeats plain HTTP and a warm shared profile.

use std::time::Duration;

use async_trait::async_trait;
use scraper::{ElementRef, Html};

use super::{Acceptance, HandlerContext, SiteHandler};
use crate::browser::{BrowserChoice, RenderPlan};
use crate::clean::{fragment_of, remove_selectors, remove_where, SCRIPT_TAGS};
use crate::extract::{first_text, select_first};
use crate::header::compose_article;
use crate::markdown::MarkdownConverter;
use crate::strategy::{run_strategies_with, BrowserStrategy, RawPage, RetryPolicy, Verdict};
use crate::{ConvertError, FetchResult};

const TITLE_SELECTORS: &[&str] = &["h1.rich_media_title#activity-name"];
const AUTHOR_SELECTORS: &[&str] = &["div#meta_content span.rich_media_meta.rich_media_meta_text"];
const ACCOUNT_SELECTORS: &[&str] = &["span.rich_media_meta_nickname#profileBt a#js_name"];
const DATE_SELECTORS: &[&str] = &["div#meta_content em#publish_time.rich_media_meta.rich_media_meta_text"];
const LOCATION_SELECTORS: &[&str] = &["div#meta_content em#js_ip_wording_wrp span#js_ip_wording"];
const CONTENT_SELECTORS: &[&str] = &["div.rich_media_content", "div#js_content"];

const CONTENT_CHALLENGE_MARKERS: &[&str] = &["环境异常", "完成验证", "去验证"];
const TITLE_CHALLENGE_MARKERS: &[&str] = &["环境异常", "验证"];

/// Element removal rule: every listed condition must hold.
///
/// `styles` and `ids` match as substrings of the `style` / `id` attribute,
/// `classes` must all be present. A rule with no condition never matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalRule {
    pub tag: &'static str,
    pub styles: &'static [&'static str],
    pub classes: &'static [&'static str],
    pub ids: &'static [&'static str],
}

impl RemovalRule {
    const fn classes(tag: &'static str, classes: &'static [&'static str]) -> Self {
        Self {
            tag,
            styles: &[],
            classes,
            ids: &[],
        }
    }

    const fn styles(tag: &'static str, styles: &'static [&'static str]) -> Self {
        Self {
            tag,
            styles,
            classes: &[],
            ids: &[],
        }
    }

    pub fn matches(&self, el: &ElementRef<'_>) -> bool {
        let value = el.value();
        if value.name() != self.tag {
            return false;
        }
        if self.styles.is_empty() && self.classes.is_empty() && self.ids.is_empty() {
            return false;
        }
        if !self.styles.is_empty() {
            let style = value.attr("style").unwrap_or_default().trim();
            if style.is_empty() || !self.styles.iter().all(|s| style.contains(s)) {
                return false;
            }
        }
        if !self.classes.iter().all(|class| value.classes().any(|c| c == *class)) {
            return false;
        }
        if !self.ids.is_empty() {
            let id = value.id().unwrap_or_default();
            if id.is_empty() || !self.ids.iter().all(|i| id.contains(i)) {
                return false;
            }
        }
        true
    }
}

/// Applied to every account.
pub const GENERAL_RULES: &[RemovalRule] = &[RemovalRule::classes("div", &["qr_code_pc", "qr_code_pc_inner"])];

const BG_GIF: RemovalRule = RemovalRule::classes("img", &["rich_pages", "wxw-img", "__bg_gif"]);

/// Extra rules keyed by account nickname.
pub const ACCOUNT_RULES: &[(&str, &[RemovalRule])] = &[
    (
        "央视财经",
        &[
            RemovalRule::classes("div", &["js_mpvedio_wrapper_wxv_4156197472454262787"]),
            RemovalRule::classes("section", &["js_darkmode__21"]),
        ],
    ),
    (
        "券商中国",
        &[
            BG_GIF,
            RemovalRule::classes("section", &["border: 1px solid rgb(170, 166, 149)"]),
            RemovalRule::styles(
                "section",
                &[
                    "caret-color: rgb(255, 0, 0)",
                    "color: rgb(163, 163, 163)",
                    "text-align: center",
                    "widows: 1",
                    "line-height: 25.0746px",
                ],
            ),
            RemovalRule::styles(
                "section",
                &["background-color: rgb(220, 194, 131)", "border: 1px solid rgb(170, 166, 149)"],
            ),
        ],
    ),
    ("中国基金报", &[BG_GIF]),
    (
        "一瑜中的",
        &[
            RemovalRule::styles("section", &["border-width: 3px"]),
            RemovalRule::styles("section", &["background-color: rgb(239, 239, 239)"]),
        ],
    ),
];

/// General rules followed by the account's own, if any.
pub fn rules_for(account: Option<&str>) -> Vec<RemovalRule> {
    let mut rules = GENERAL_RULES.to_vec();
    if let Some(account) = account {
        if let Some((_, extra)) = ACCOUNT_RULES.iter().find(|(name, _)| *name == account) {
            rules.extend_from_slice(extra);
        }
    }
    rules
}

fn body(doc: &Html, account: Option<&str>, url: &str) -> String {
    let Some(content) = select_first(doc, CONTENT_SELECTORS) else {
        return String::new();
    };
    let mut fragment = fragment_of(content);
    remove_selectors(&mut fragment, SCRIPT_TAGS);
    let rules = rules_for(account);
    let removed = remove_where(&mut fragment, |el| rules.iter().any(|rule| rule.matches(el)));
    if removed > 0 {
        engine_logging::engine_debug!("weixin removal rules dropped {removed} elements");
    }
    MarkdownConverter::new()
        .with_base_url(url)
        .strip_invisible(true)
        .convert_document(&fragment)
}

/// Title, header bullets and body of a rendered article page.
pub fn process_page(raw: &RawPage, url: &str) -> FetchResult {
    let doc = Html::parse_document(&raw.html);
    let title = raw
        .title
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| first_text(&doc, TITLE_SELECTORS));
    let account = first_text(&doc, ACCOUNT_SELECTORS);

    let meta: Vec<String> = [
        first_text(&doc, AUTHOR_SELECTORS),
        account.clone(),
        first_text(&doc, DATE_SELECTORS),
        first_text(&doc, LOCATION_SELECTORS),
    ]
    .into_iter()
    .flatten()
    .collect();
    let meta_lines: Vec<String> = if meta.is_empty() {
        Vec::new()
    } else {
        vec![meta.join("  ")]
    };

    let body = body(&doc, account.as_deref(), url);
    let markdown = compose_article(title.as_deref(), url, &meta_lines, &body);
    FetchResult::ok(title, markdown)
}

/// Why a processed page looks like the verification interstitial, if it does.
fn challenge(result: &FetchResult) -> Option<&'static str> {
    if let Some(marker) = CONTENT_CHALLENGE_MARKERS
        .iter()
        .find(|marker| result.content.contains(*marker))
    {
        return Some(marker);
    }
    let title = result.title.as_deref()?;
    TITLE_CHALLENGE_MARKERS
        .iter()
        .find(|marker| title.contains(*marker))
        .copied()
}

#[derive(Debug, Default)]
pub struct WeixinHandler;

#[async_trait]
impl SiteHandler for WeixinHandler {
    fn name(&self) -> &'static str {
        "weixin"
    }

    fn matches(&self, url: &str) -> bool {
        url.to_ascii_lowercase().contains("mp.weixin.qq.com")
    }

    fn prefers_shared_browser(&self) -> bool {
        false
    }

    fn acceptance(&self) -> Acceptance {
        Acceptance {
            min_chars: 1,
            blocked_markers: &["环境异常", "验证", "需完成验证"],
            trusted_chars: Some(1000),
        }
    }

    async fn fetch(&self, cx: &HandlerContext<'_>) -> Result<FetchResult, ConvertError> {
        let policy = RetryPolicy {
            retry_delay: (Duration::from_secs(3), Duration::from_secs(6)),
            ..cx.retry_policy().clone()
        };
        let browser = BrowserStrategy {
            plan: RenderPlan {
                browser: BrowserChoice::Independent,
                text_only: true,
                settle: (Duration::from_secs(3), Duration::from_secs(6)),
                ..RenderPlan::default()
            },
        };

        run_strategies_with(cx, &policy, "weixin", &[&browser], |raw| {
            cx.logger.clean_start();
            let result = process_page(&raw, cx.url);
            if let Some(marker) = challenge(&result) {
                return Verdict::Retry(format!("verification page detected ({marker})"));
            }
            cx.logger.clean_success();
            cx.logger.convert_start();
            cx.logger.convert_success();
            Verdict::Accept(result)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const URL: &str = "https://mp.weixin.qq.com/s/abc";

    fn page(account: &str, body: &str) -> RawPage {
        RawPage {
            html: format!(
                r#"<html><body>
                <h1 class="rich_media_title" id="activity-name"> 市场观察 </h1>
                <div id="meta_content"><span class="rich_media_meta rich_media_meta_text">记者甲</span>
                <em id="publish_time" class="rich_media_meta rich_media_meta_text">2024-05-01 08:00</em></div>
                <span class="rich_media_meta_nickname" id="profileBt"><a id="js_name">{account}</a></span>
                <div class="rich_media_content" id="js_content">{body}</div>
                </body></html>"#
            ),
            title: None,
            final_url: URL.to_string(),
        }
    }

    #[test]
    fn header_lists_meta_on_one_line() {
        let result = process_page(&page("一瑜中的", "<p>正文</p>"), URL);
        assert_eq!(result.title.as_deref(), Some("市场观察"));
        assert_eq!(
            result.content,
            format!("# 市场观察\n\n* Source: {URL}\n* 记者甲  一瑜中的  2024-05-01 08:00\n\n正文\n")
        );
    }

    #[test]
    fn account_rules_only_apply_to_their_account() {
        let body = r#"<p>保留</p><section style="border-width: 3px; color: red">推广</section>
            <div class="qr_code_pc qr_code_pc_inner">扫码</div>"#;
        let own = process_page(&page("一瑜中的", body), URL);
        assert!(own.content.contains("保留"));
        assert!(!own.content.contains("推广"));
        assert!(!own.content.contains("扫码"));

        let other = process_page(&page("别的号", body), URL);
        assert!(other.content.contains("推广"));
        assert!(!other.content.contains("扫码"));
    }

    #[test]
    fn verification_pages_are_detected() {
        let blocked = process_page(&page("x", "<p>当前环境异常，完成验证后即可继续访问</p>"), URL);
        assert_eq!(challenge(&blocked), Some("环境异常"));
        let fine = process_page(&page("x", "<p>正常文章</p>"), URL);
        assert_eq!(challenge(&fine), None);
    }

    #[test]
    fn empty_rules_never_match() {
        let rule = RemovalRule::classes("div", &[]);
        let doc = Html::parse_fragment("<div>x</div>");
        let div = doc.root_element().first_child().and_then(ElementRef::wrap).unwrap();
        assert!(!rule.matches(&div));
    }
}
