use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use markurl_engine::handlers::{Acceptance, GenericHandler, HandlerContext, SiteHandler};
use markurl_engine::{
    build_session, ConversionOptions, ConvertError, ConvertPayload, FetchResult, FetchSettings,
    HttpSession, NullLogger, PayloadMeta, Registry, RetryPolicy, SourceRequest, StopCheck,
    UnavailableLauncher,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Always answers with a login wall.
struct WalledHandler;

#[async_trait]
impl SiteHandler for WalledHandler {
    fn name(&self) -> &'static str {
        "walled"
    }

    fn matches(&self, url: &str) -> bool {
        url.contains("/walled")
    }

    fn acceptance(&self) -> Acceptance {
        Acceptance {
            min_chars: 1,
            blocked_markers: &["登录"],
            trusted_chars: Some(1000),
        }
    }

    async fn fetch(&self, _cx: &HandlerContext<'_>) -> Result<FetchResult, ConvertError> {
        Ok(FetchResult::ok(Some("请登录".to_string()), "请登录后查看全文"))
    }
}

fn registry() -> Registry {
    Registry::with_handlers(
        vec![Box::new(WalledHandler)],
        Box::new(GenericHandler),
        Arc::new(UnavailableLauncher),
    )
}

fn session() -> HttpSession {
    let settings = FetchSettings {
        backoff_base: Duration::from_millis(1),
        strategy_retry: RetryPolicy::immediate(),
        ..FetchSettings::default()
    };
    build_session(&settings, false, false).unwrap()
}

fn text_only() -> ConversionOptions {
    ConversionOptions {
        download_images: false,
        ..ConversionOptions::default()
    }
}

const ARTICLE: &str = r#"<html><head><title>Ignored - Example</title></head><body>
<article><h1>Real Article - Example</h1>
<p>This paragraph is long enough to pass the generic length check on its own, with plenty of words to spare for the validation rule.</p>
</article></body></html>"#;

#[tokio::test]
async fn blocked_results_fall_back_to_the_generic_pipeline() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/walled/post"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(ARTICLE, "text/html; charset=utf-8"))
        .mount(&server)
        .await;

    let request = SourceRequest::url(format!("{}/walled/post", server.uri()));
    let stop = StopCheck::never();
    let payload = ConvertPayload::new(&request, PayloadMeta::new(&NullLogger, &stop));

    let result = registry().convert(&payload, &session(), &text_only()).await.unwrap();

    assert_eq!(result.title.as_deref(), Some("Real Article"));
    assert!(!result.markdown.contains("登录"));
    assert!(result.markdown.contains("long enough to pass"));
    assert!(result.suggested_filename.ends_with("_Real Article.md"));
}

#[tokio::test]
async fn exhausted_generic_pipeline_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let request = SourceRequest::url(format!("{}/missing", server.uri()));
    let stop = StopCheck::never();
    let payload = ConvertPayload::new(&request, PayloadMeta::new(&NullLogger, &stop));

    let err = registry().convert(&payload, &session(), &text_only()).await.unwrap_err();
    assert!(matches!(err, ConvertError::Exhausted { ref handler, .. } if handler == "generic"));
}

#[tokio::test]
async fn stop_requests_are_not_reported_as_failures() {
    let request = SourceRequest::url("https://example.invalid/walled");
    let stop = StopCheck::new(|| true);
    let payload = ConvertPayload::new(&request, PayloadMeta::new(&NullLogger, &stop));

    let err = registry().convert(&payload, &session(), &text_only()).await.unwrap_err();
    assert!(err.is_stop());
}

#[tokio::test]
async fn markdown_files_take_their_first_heading_as_title() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("notes.md");
    std::fs::write(&file, "Intro line\n\n## Weekly Notes\n\ntext\n").unwrap();
    let untitled = temp.path().join("scratch.txt");
    std::fs::write(&untitled, "just text\n").unwrap();

    let stop = StopCheck::never();
    let registry = registry();
    let session = session();

    let request = SourceRequest::file(&file);
    let payload = ConvertPayload::new(&request, PayloadMeta::new(&NullLogger, &stop));
    let result = registry.convert(&payload, &session, &text_only()).await.unwrap();
    assert_eq!(result.title.as_deref(), Some("Weekly Notes"));
    assert!(result.suggested_filename.ends_with("_Weekly Notes.md"));

    let request = SourceRequest::file(&untitled);
    let payload = ConvertPayload::new(&request, PayloadMeta::new(&NullLogger, &stop));
    let result = registry.convert(&payload, &session, &text_only()).await.unwrap();
    assert_eq!(result.title, None);
    assert!(result.suggested_filename.ends_with("_scratch.md"));
    assert_eq!(result.markdown, "# just text\n");
}

#[tokio::test]
async fn html_sources_are_extracted_and_normalized() {
    let request = SourceRequest::html(ARTICLE);
    let stop = StopCheck::never();
    let payload = ConvertPayload::new(&request, PayloadMeta::new(&NullLogger, &stop));

    let result = registry().convert(&payload, &session(), &text_only()).await.unwrap();
    assert_eq!(result.title.as_deref(), Some("Ignored - Example"));
    assert!(result.markdown.starts_with("# Real Article - Example\n\nThis paragraph"));
}

#[tokio::test]
async fn missing_files_report_the_path() {
    let request = SourceRequest::file("/definitely/not/here.md");
    let stop = StopCheck::never();
    let payload = ConvertPayload::new(&request, PayloadMeta::new(&NullLogger, &stop));

    let err = registry().convert(&payload, &session(), &text_only()).await.unwrap_err();
    assert!(matches!(err, ConvertError::Read { .. }));
}

#[tokio::test]
async fn images_and_file_name_share_one_timestamp() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/chart.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\x89PNG\r\n\x1a\nchart".to_vec()))
        .mount(&server)
        .await;

    let temp = TempDir::new().unwrap();
    let file = temp.path().join("report.md");
    std::fs::write(&file, format!("# Report\n\n![chart]({}/chart.png)\n", server.uri())).unwrap();

    let request = SourceRequest::file(&file);
    let stop = StopCheck::never();
    let payload = ConvertPayload::new(&request, PayloadMeta::new(&NullLogger, &stop).with_out_dir(temp.path()));

    let result = registry()
        .convert(&payload, &session(), &ConversionOptions::default())
        .await
        .unwrap();

    let stamp = &result.suggested_filename[..15];
    assert_eq!(result.suggested_filename, format!("{stamp}_Report.md"));
    assert_eq!(result.markdown, format!("# Report\n\n![chart](img/{stamp}_001.png)\n"));
    assert!(temp.path().join("img").join(format!("{stamp}_001.png")).is_file());
}
