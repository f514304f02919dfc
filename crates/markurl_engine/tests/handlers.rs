use std::time::Duration;

use markurl_engine::handlers::{AppinnHandler, HandlerContext, NextJsHandler, SiteHandler, WordPressHandler};
use markurl_engine::{
    build_session, ConversionOptions, FetchSettings, HttpSession, NullLogger, RetryPolicy, StopCheck,
    UnavailableLauncher,
};
use pretty_assertions::assert_eq;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const FILLER: &str = "The quick brown fox jumps over the lazy dog while the handler keeps reading. \
    Every sentence here adds a few more characters so the article clears the length check. \
    One more line of plain prose rounds the paragraph off nicely for the converter.";

fn session() -> HttpSession {
    let settings = FetchSettings {
        backoff_base: Duration::from_millis(1),
        http_retries: 0,
        strategy_retry: RetryPolicy::immediate(),
        ..FetchSettings::default()
    };
    build_session(&settings, false, false).unwrap()
}

async fn serve(route: &str, html: String) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(html, "text/html; charset=utf-8"))
        .mount(&server)
        .await;
    server
}

fn context<'a>(
    url: &'a str,
    session: &'a HttpSession,
    options: &'a ConversionOptions,
    stop: &'a StopCheck,
) -> HandlerContext<'a> {
    HandlerContext {
        url,
        session,
        options,
        logger: &NullLogger,
        stop,
        shared_browser: None,
        launcher: &UnavailableLauncher,
    }
}

#[tokio::test]
async fn wordpress_posts_get_a_metadata_header() {
    let html = format!(
        r#"<html><head><title>Hello WordPress - Blog</title></head><body>
        <div id="content" role="main">
          <h1 class="entry-title">Hello WordPress</h1>
          <span class="author vcard"><a href="/author/lin">Lin</a></span>
          <time class="entry-date" datetime="2024-01-02">January 2</time>
          <span class="cat-links"><a href="/c/notes">Notes</a></span>
          <div class="entry-content">
            <p>{FILLER}</p>
            <img src="/wp-content/a.png" alt="chart"><img src="/wp-content/a.png" alt="chart">
            <div class="share">Share me</div>
            <script>alert(1)</script>
          </div>
        </div></body></html>"#
    );
    let server = serve("/2024/01/hello", html).await;
    let url = format!("{}/2024/01/hello", server.uri());
    let (session, options, stop) = (session(), ConversionOptions::default(), StopCheck::never());

    let result = WordPressHandler
        .fetch(&context(&url, &session, &options, &stop))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.title.as_deref(), Some("Hello WordPress"));
    assert!(result.content.starts_with(&format!(
        "# Hello WordPress\n\n* Source: {url}\n* Author: Lin  Published: 2024-01-02  Categories: Notes\n\n"
    )));
    assert!(result.content.contains("The quick brown fox"));
    assert_eq!(result.content.matches("/wp-content/a.png").count(), 1);
    assert!(!result.content.contains("Share me"));
    assert!(!result.content.contains("alert"));
}

#[tokio::test]
async fn appinn_posts_list_categories_as_tags() {
    let html = format!(
        r##"<html><head><title>小众工具 - 小众软件</title></head><body>
        <div class="single_post"><header>
          <h1 class="title single-title entry-title">小众工具</h1>
          <div class="post-info">
            <span class="theauthor"><span><a href="#">青小蛙</a></span></span>
            <span class="thetime updated"><span>2024/03/01</span></span>
            <span class="thecategory"><a href="#">Windows</a><a href="#">免费</a></span>
          </div>
        </header>
        <div class="entry-content"><p>{FILLER}</p><div class="related-posts">相关文章</div></div>
        </div></body></html>"##
    );
    let server = serve("/tool/", html).await;
    let url = format!("{}/tool/", server.uri());
    let (session, options, stop) = (session(), ConversionOptions::default(), StopCheck::never());

    let result = AppinnHandler
        .fetch(&context(&url, &session, &options, &stop))
        .await
        .unwrap();

    assert_eq!(result.title.as_deref(), Some("小众工具"));
    assert!(result.content.starts_with(&format!(
        "# 小众工具\n\n* Source: {url}\n* Author: 青小蛙  Published: 2024/03/01  Tags: Windows, 免费\n\n"
    )));
    assert!(!result.content.contains("相关文章"));
}

#[tokio::test]
async fn short_pages_exhaust_the_strategies_without_a_browser() {
    let html = "<html><body><article><h1>Tiny</h1><p>Too short.</p></article></body></html>".to_string();
    let server = serve("/blog/tiny", html).await;
    let url = format!("{}/blog/tiny", server.uri());
    let (session, options, stop) = (session(), ConversionOptions::default(), StopCheck::never());

    let result = NextJsHandler
        .fetch(&context(&url, &session, &options, &stop))
        .await
        .unwrap();

    assert!(!result.success);
    assert!(result.error.as_deref().unwrap_or_default().contains("all fetch strategies failed"));
}

#[tokio::test]
async fn stop_interrupts_a_handler_before_fetching() {
    let (session, options) = (session(), ConversionOptions::default());
    let stop = StopCheck::new(|| true);

    let err = WordPressHandler
        .fetch(&context("https://example.invalid/wp-content/x", &session, &options, &stop))
        .await
        .unwrap_err();

    assert!(err.is_stop());
}
