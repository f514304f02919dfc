//! Zhihu answers and column posts.
//!
//! Both page kinds need a real browser: login walls are dismissed and folded
//! answers expanded before the HTML is read. Other Zhihu URLs try the cheap
//! generic chain first.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use ego_tree::NodeId;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::generic::quick_chain;
use super::{Acceptance, HandlerContext, SiteHandler};
use crate::browser::{BrowserChoice, ModalPlan, RenderPlan};
use crate::clean::{fragment_of, remove_selectors, remove_where, SCRIPT_TAGS};
use crate::extract::{element_text, first_text, meta_content, page_title, select_first};
use crate::header::compose_article;
use crate::markdown::{image_source, LinkTarget, MarkdownConverter};
use crate::strategy::{run_strategies_with, BrowserStrategy, RawPage, RetryPolicy, Verdict};
use crate::{ConvertError, FetchResult};

const ZHIHU_ORIGIN: &str = "https://www.zhihu.com";

/// Results longer than this are real articles, whatever words they contain.
const TRUSTED_CHARS: usize = 1000;
const CONTENT_CHALLENGE_MARKERS: &[&str] = &["验证", "登录", "访问被拒绝", "403", "404"];
const TITLE_CHALLENGE_MARKERS: &[&str] = &["验证", "登录", "访问被拒绝"];

const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
Object.defineProperty(navigator, 'languages', { get: () => ['zh-CN', 'zh', 'en'] });
Object.defineProperty(screen, 'width', { get: () => 1920 });
Object.defineProperty(screen, 'height', { get: () => 1080 });
Object.defineProperty(Intl.DateTimeFormat.prototype, 'resolvedOptions', {
    value: function() { return { timeZone: 'Asia/Shanghai' }; }
});
Object.defineProperty(navigator, 'permissions', {
    get: () => ({ query: () => Promise.resolve({ state: 'granted' }) })
});
"#;

const LOGIN_MODAL: ModalPlan = ModalPlan {
    close_selectors: &[
        ".Modal-closeButton",
        ".SignFlow-close",
        "[aria-label=\"关闭\"]",
        ".Modal-close",
        ".close-button",
        "button[aria-label=\"关闭\"]",
        ".ant-modal-close",
        ".el-dialog__close",
        ".Qrcode-close",
    ],
    detect_selectors: &[".Modal-backdrop", ".Qrcode-qrcode"],
    escape_fallback: true,
    rounds: 3,
};

const EXPAND_SELECTORS: &[&str] = &[
    "button.ContentItem-expandButton",
    "[data-za-detail-view-element_name=\"展开阅读全文\"]",
    ".RichContent-inner button",
    "button[data-za-detail-view-element_name=\"展开阅读全文\"]",
];

static INTERNAL_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^https://www\.zhihu\.com/(question|answer|p)/").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZhihuPage {
    /// `www.zhihu.com/question/{id}/answer/{id}`
    Answer,
    /// `zhuanlan.zhihu.com/p/{id}`
    Column,
    Unknown,
}

impl ZhihuPage {
    pub fn classify(url: &str) -> Self {
        let Ok(parsed) = Url::parse(url) else {
            return ZhihuPage::Unknown;
        };
        let host = parsed.host_str().unwrap_or_default().to_ascii_lowercase();
        let path = parsed.path();
        if host == "zhuanlan.zhihu.com" && path.starts_with("/p/") {
            return ZhihuPage::Column;
        }
        if host == "www.zhihu.com" || host == "zhihu.com" {
            let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
            if parts.len() >= 4 && parts[0] == "question" && parts[2] == "answer" {
                return ZhihuPage::Answer;
            }
        }
        ZhihuPage::Unknown
    }

    fn wait_selector(self) -> &'static str {
        match self {
            ZhihuPage::Answer => "h1.QuestionHeader-title, div.QuestionAnswer-content",
            ZhihuPage::Column => "article",
            ZhihuPage::Unknown => "main",
        }
    }

    fn render_plan(self) -> RenderPlan {
        RenderPlan {
            browser: BrowserChoice::Shared,
            text_only: false,
            init_script: Some(STEALTH_SCRIPT),
            modal: Some(LOGIN_MODAL),
            expand_selectors: EXPAND_SELECTORS,
            wait_selector: Some(self.wait_selector()),
            settle: (Duration::from_secs(2), Duration::from_secs(3)),
        }
    }
}

fn absolute_zhihu(href: &str) -> String {
    if let Some(rest) = href.strip_prefix("//") {
        format!("https://{rest}")
    } else if href.starts_with('/') {
        format!("{ZHIHU_ORIGIN}{href}")
    } else {
        href.to_string()
    }
}

/// Unwraps search and in-site links, decodes `link.zhihu.com` redirects.
pub fn rewrite_link(href: &str) -> LinkTarget {
    if href.starts_with("https://zhida.zhihu.com/search?") || INTERNAL_LINK.is_match(href) {
        return LinkTarget::Unwrap;
    }
    if href.starts_with("https://link.zhihu.com/?target=") {
        let target = Url::parse(href).ok().and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "target")
                .map(|(_, value)| value.trim().to_string())
        });
        return match target.filter(|t| !t.is_empty()) {
            Some(target) => LinkTarget::Keep(target),
            None => LinkTarget::Unwrap,
        };
    }
    LinkTarget::Keep(absolute_zhihu(href))
}

fn title(doc: &Html, page: ZhihuPage) -> Option<String> {
    let specific = match page {
        ZhihuPage::Answer => first_text(doc, &["h1.QuestionHeader-title", "h1"]),
        ZhihuPage::Column => first_text(doc, &["h1.Post-Title"]).or_else(|| meta_content(doc, "og:title")),
        ZhihuPage::Unknown => None,
    };
    specific
        .or_else(|| first_text(doc, &["h1"]))
        .or_else(|| meta_content(doc, "og:title"))
        .or_else(|| page_title(doc))
}

/// First link under any selector that has visible text.
fn first_named_link<'a>(doc: &'a Html, selectors: &[&str]) -> Option<ElementRef<'a>> {
    selectors
        .iter()
        .filter_map(|raw| Selector::parse(raw).ok())
        .find_map(|sel| doc.select(&sel).find(|el| !element_text(el).is_empty()))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Author {
    name: String,
    href: Option<String>,
    badge: Option<String>,
}

impl Author {
    fn line(&self) -> String {
        let mut line = match &self.href {
            Some(href) => format!("Author: [{}]({href})", self.name),
            None => format!("Author: {}", self.name),
        };
        if let Some(badge) = &self.badge {
            line.push_str("  ");
            line.push_str(badge);
        }
        line
    }
}

fn author(doc: &Html, page: ZhihuPage) -> Option<Author> {
    let (link, badge_selector) = match page {
        ZhihuPage::Answer => (
            first_named_link(
                doc,
                &[
                    "div.ContentItem-meta a.UserLink-link",
                    "div.ContentItem-meta span.UserLink.AuthorInfo-name a",
                    "a.UserLink-link",
                ],
            ),
            "div.ContentItem-meta .AuthorInfo-detail .AuthorInfo-badgeText",
        ),
        ZhihuPage::Column => (
            select_first(doc, &["a.AuthorInfo-name", "span.AuthorInfo-name a", "div.Post-Author a"]),
            "div.Post-Author .AuthorInfo-detail .AuthorInfo-badgeText",
        ),
        ZhihuPage::Unknown => return None,
    };

    let mut name = link.map(|el| element_text(&el)).filter(|n| !n.is_empty());
    let href = link
        .and_then(|el| el.value().attr("href"))
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(absolute_zhihu);
    if name.is_none() && page == ZhihuPage::Column {
        name = meta_content(doc, "author");
    }
    Some(Author {
        name: name?,
        href,
        badge: first_text(doc, &[badge_selector]),
    })
}

fn published(doc: &Html, page: ZhihuPage) -> Option<String> {
    match page {
        ZhihuPage::Answer => first_text(doc, &["div.ContentItem-time", "div.RichContent div.ContentItem-time"]),
        ZhihuPage::Column => {
            first_text(doc, &["div.ContentItem-time"]).or_else(|| meta_content(doc, "article:published_time"))
        }
        ZhihuPage::Unknown => None,
    }
}

/// In figures with several images, keep only the first one with a usable source.
fn collapse_figure_images(fragment: &mut Html) -> usize {
    let (Ok(figures), Ok(images)) = (Selector::parse("figure"), Selector::parse("img")) else {
        return 0;
    };
    let mut doomed: HashSet<NodeId> = HashSet::new();
    for figure in fragment.select(&figures) {
        let imgs: Vec<ElementRef> = figure.select(&images).collect();
        if imgs.len() < 2 {
            continue;
        }
        let keep = imgs.iter().find(|img| image_source(img).is_some()).map(|img| img.id());
        doomed.extend(imgs.iter().map(|img| img.id()).filter(|id| Some(*id) != keep));
    }
    remove_where(fragment, |el| doomed.contains(&el.id()))
}

fn body(doc: &Html, page: ZhihuPage, url: &str) -> String {
    let content = match page {
        ZhihuPage::Answer => select_first(doc, &["div.RichContent-inner"]).or_else(|| {
            select_first(doc, &["div.RichContent.RichContent--unescapable div.RichContent-inner"])
        }),
        ZhihuPage::Column => select_first(doc, &["div.Post-RichTextContainer"]),
        ZhihuPage::Unknown => None,
    };
    let Some(content) = content else {
        return String::new();
    };

    let mut fragment = fragment_of(content);
    if page == ZhihuPage::Answer {
        collapse_figure_images(&mut fragment);
    }
    remove_selectors(&mut fragment, SCRIPT_TAGS);
    remove_selectors(&mut fragment, &["div.RichText-ADLinkCardContainer"]);
    MarkdownConverter::new()
        .with_base_url(url)
        .with_link_rewrite(rewrite_link)
        .strip_invisible(true)
        .convert_document(&fragment)
}

/// Title, author and time bullets, then the cleaned answer or post body.
pub fn process_page(raw: &RawPage, url: &str) -> FetchResult {
    let page = ZhihuPage::classify(url);
    let doc = Html::parse_document(&raw.html);
    let title = title(&doc, page);

    let mut meta_lines = Vec::new();
    if let Some(author) = author(&doc, page) {
        meta_lines.push(author.line());
    }
    if let Some(time) = published(&doc, page) {
        meta_lines.push(format!("Published: {time}"));
    }

    let body = body(&doc, page, url);
    let markdown = compose_article(title.as_deref(), url, &meta_lines, &body);
    FetchResult::ok(title, markdown)
}

/// Why a short processed page looks like a login or verification wall, if it does.
fn challenge(result: &FetchResult) -> Option<&'static str> {
    if result.content.chars().count() > TRUSTED_CHARS {
        return None;
    }
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
pub struct ZhihuHandler;

#[async_trait]
impl SiteHandler for ZhihuHandler {
    fn name(&self) -> &'static str {
        "zhihu"
    }

    fn matches(&self, url: &str) -> bool {
        url.to_ascii_lowercase().contains("zhihu.com")
    }

    fn acceptance(&self) -> Acceptance {
        Acceptance {
            min_chars: 1,
            blocked_markers: &["验证", "登录", "访问被拒绝", "403", "404", "页面不存在", "知乎", "zhihu"],
            trusted_chars: Some(TRUSTED_CHARS),
        }
    }

    async fn fetch(&self, cx: &HandlerContext<'_>) -> Result<FetchResult, ConvertError> {
        let page = ZhihuPage::classify(cx.url);
        if page == ZhihuPage::Unknown {
            let quick = quick_chain(cx).await?;
            if quick.success {
                return Ok(quick);
            }
            cx.logger.info("zhihu: generic strategies failed, rendering in a browser");
        }

        let policy = RetryPolicy {
            retry_delay: (Duration::from_secs(3), Duration::from_secs(6)),
            ..cx.retry_policy().clone()
        };
        let browser = BrowserStrategy {
            plan: page.render_plan(),
        };
        run_strategies_with(cx, &policy, "zhihu", &[&browser], |raw| {
            cx.logger.clean_start();
            let result = process_page(&raw, cx.url);
            if let Some(marker) = challenge(&result) {
                return Verdict::Retry(format!("login or verification page detected ({marker})"));
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

    #[test]
    fn classifies_by_host_and_path() {
        assert_eq!(ZhihuPage::classify("https://zhuanlan.zhihu.com/p/123"), ZhihuPage::Column);
        assert_eq!(
            ZhihuPage::classify("https://www.zhihu.com/question/1/answer/2"),
            ZhihuPage::Answer
        );
        assert_eq!(ZhihuPage::classify("https://zhihu.com/question/1/answer/2?x=1"), ZhihuPage::Answer);
        assert_eq!(ZhihuPage::classify("https://www.zhihu.com/question/1"), ZhihuPage::Unknown);
        assert_eq!(ZhihuPage::classify("not a url"), ZhihuPage::Unknown);
    }

    #[test]
    fn links_are_unwrapped_or_decoded() {
        assert_eq!(rewrite_link("https://zhida.zhihu.com/search?q=rust"), LinkTarget::Unwrap);
        assert_eq!(rewrite_link("https://www.zhihu.com/question/42"), LinkTarget::Unwrap);
        assert_eq!(
            rewrite_link("https://link.zhihu.com/?target=https%3A%2F%2Fexample.com%2Fa%3Fb%3D1"),
            LinkTarget::Keep("https://example.com/a?b=1".to_string())
        );
        assert_eq!(rewrite_link("https://link.zhihu.com/?target="), LinkTarget::Unwrap);
        assert_eq!(
            rewrite_link("/people/someone"),
            LinkTarget::Keep("https://www.zhihu.com/people/someone".to_string())
        );
        assert_eq!(
            rewrite_link("//pic1.zhimg.com/a.jpg"),
            LinkTarget::Keep("https://pic1.zhimg.com/a.jpg".to_string())
        );
    }

    #[test]
    fn answer_pages_get_author_time_and_clean_body() {
        let url = "https://www.zhihu.com/question/1/answer/2";
        let raw = RawPage {
            html: r#"<html><head><title>登录 - 知乎</title></head><body>
                <h1 class="QuestionHeader-title">如何学习 Rust？</h1>
                <div class="ContentItem-meta"><a class="UserLink-link" href="//www.zhihu.com/people/a"></a>
                  <a class="UserLink-link" href="/people/a">张三</a>
                  <div class="AuthorInfo-detail"><span class="AuthorInfo-badgeText">程序员</span></div></div>
                <div class="RichContent"><div class="RichContent-inner">
                  <p>先读<a href="https://zhida.zhihu.com/search?q=book">官方书</a>。</p>
                  <figure><img src="data:image/svg+xml;utf8,x"><img data-actualsrc="https://pic1.zhimg.com/v2-a.jpg"><img src="https://pic1.zhimg.com/v2-a_hd.jpg"></figure>
                  <div class="RichText-ADLinkCardContainer">广告</div>
                </div><div class="ContentItem-time">编辑于 2024-01-02   12:00</div></div>
                </body></html>"#
                .to_string(),
            title: Some("ignored".to_string()),
            final_url: url.to_string(),
        };
        let result = process_page(&raw, url);
        assert_eq!(result.title.as_deref(), Some("如何学习 Rust？"));
        assert_eq!(
            result.content,
            format!(
                "# 如何学习 Rust？\n\n* Source: {url}\n\
                 * Author: [张三](https://www.zhihu.com/people/a)  程序员\n\
                 * Published: 编辑于 2024-01-02 12:00\n\n\
                 先读官方书。\n\n![](https://pic1.zhimg.com/v2-a.jpg)\n"
            )
        );
        assert_eq!(challenge(&result), None);
    }

    #[test]
    fn short_login_walls_are_challenges() {
        let wall = FetchResult::ok(Some("知乎".into()), "请先登录后继续");
        assert_eq!(challenge(&wall), Some("登录"));
        let long = FetchResult::ok(None, format!("登录 {}", "字".repeat(1200)));
        assert_eq!(challenge(&long), None);
    }
}
