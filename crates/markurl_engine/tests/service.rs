use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use markurl_engine::browser::{BrowserError, BrowserLauncher, BrowserPage, BrowserSession, LaunchProfile};
use markurl_engine::handlers::{Acceptance, GenericHandler, HandlerContext, SiteHandler};
use markurl_engine::{
    Batch, BatchSummary, ConversionOptions, ConvertError, ConvertService, EventCallback, EventKind,
    FetchResult, FetchSettings, FsMarkdownWriter, ProgressEvent, Registry, SourceRequest,
    UnavailableLauncher,
};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

/// Test double keyed by host: `ok.test` converts, `boom.test` panics,
/// `slow.test` waits on the stop flag, `solo.test` refuses the shared browser.
struct ScriptedHandler;

#[async_trait]
impl SiteHandler for ScriptedHandler {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn matches(&self, url: &str) -> bool {
        url.contains(".test/")
    }

    fn prefers_shared_browser(&self) -> bool {
        false
    }

    fn acceptance(&self) -> Acceptance {
        Acceptance::NON_EMPTY
    }

    async fn fetch(&self, cx: &HandlerContext<'_>) -> Result<FetchResult, ConvertError> {
        if cx.url.contains("boom.test") {
            panic!("parser exploded");
        }
        if cx.url.contains("slow.test") {
            cx.stop.sleep(Duration::from_secs(5)).await?;
        }
        Ok(FetchResult::ok(
            Some("Scripted Page".to_string()),
            "Scripted Page\n\nSome converted text.",
        ))
    }
}

/// Same content, but it wants the shared browser.
struct BrowserFriendlyHandler;

#[async_trait]
impl SiteHandler for BrowserFriendlyHandler {
    fn name(&self) -> &'static str {
        "friendly"
    }

    fn matches(&self, url: &str) -> bool {
        url.contains(".shared/")
    }

    fn acceptance(&self) -> Acceptance {
        Acceptance::NON_EMPTY
    }

    async fn fetch(&self, cx: &HandlerContext<'_>) -> Result<FetchResult, ConvertError> {
        assert!(cx.shared_browser.is_some(), "shared browser should be lent");
        Ok(FetchResult::ok(Some("Friendly".to_string()), "Friendly\n\nbody"))
    }
}

#[derive(Default)]
struct CountingLauncher {
    launches: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

struct CountingSession {
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl BrowserLauncher for CountingLauncher {
    async fn launch(&self, _profile: &LaunchProfile) -> Result<Box<dyn BrowserSession>, BrowserError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingSession {
            closes: self.closes.clone(),
        }))
    }
}

#[async_trait]
impl BrowserSession for CountingSession {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        Err(BrowserError::Unavailable("pages are not scripted".to_string()))
    }

    async fn close(self: Box<Self>) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

fn service_with(launcher: Arc<dyn BrowserLauncher>) -> ConvertService {
    let registry = Registry::with_handlers(
        vec![Box::new(ScriptedHandler), Box::new(BrowserFriendlyHandler)],
        Box::new(GenericHandler),
        launcher,
    );
    ConvertService::new(Arc::new(registry), Arc::new(FsMarkdownWriter), FetchSettings::default())
}

fn recorder() -> (EventCallback, Arc<Mutex<Vec<ProgressEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    let callback: EventCallback = Arc::new(move |event| sink.lock().unwrap().push(event));
    (callback, events)
}

fn options(shared_browser: bool) -> ConversionOptions {
    ConversionOptions {
        download_images: false,
        use_shared_browser: shared_browser,
        ..ConversionOptions::default()
    }
}

fn markdown_files(dir: &std::path::Path) -> Vec<String> {
    std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
                .filter(|name| name.ends_with(".md"))
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn one_failing_request_does_not_abort_the_batch() {
    let out = TempDir::new().unwrap();
    let service = service_with(Arc::new(UnavailableLauncher));
    let (callback, events) = recorder();
    let requests = vec![
        SourceRequest::url("https://boom.test/post"),
        SourceRequest::url("https://ok.test/post"),
    ];

    assert!(service.run(Batch::new(requests, out.path(), options(false), callback)));
    let summary = service.wait().expect("summary");

    assert_eq!(
        summary,
        BatchSummary {
            succeeded: 1,
            failed: 1,
            total: 2,
            stopped: false,
        }
    );
    let files = markdown_files(out.path());
    assert_eq!(files.len(), 1);
    assert!(files[0].ends_with("_Scripted Page.md"));

    let events = events.lock().unwrap();
    let steps: Vec<Option<usize>> = events
        .iter()
        .filter(|e| e.kind == EventKind::ProgressStep)
        .map(|e| e.current)
        .collect();
    assert_eq!(steps, vec![Some(1), Some(2)]);
    assert!(events.iter().any(|e| e.kind == EventKind::Error));
    let done = events.last().expect("events");
    assert_eq!(done.kind, EventKind::ProgressDone);
    assert_eq!(done.data.as_ref().unwrap()["succeeded"], 1);
}

#[test]
fn second_run_while_busy_is_ignored() {
    let out = TempDir::new().unwrap();
    let service = service_with(Arc::new(UnavailableLauncher));
    let (callback, _events) = recorder();
    let slow = vec![SourceRequest::url("https://slow.test/post")];

    assert!(service.run(Batch::new(slow.clone(), out.path(), options(false), callback.clone())));
    assert!(service.is_running());
    assert!(!service.run(Batch::new(slow, out.path(), options(false), callback.clone())));

    service.stop();
    let summary = service.wait().expect("summary");
    assert!(summary.stopped);
    assert!(!service.is_running());

    let quick = vec![SourceRequest::url("https://ok.test/again")];
    assert!(service.run(Batch::new(quick, out.path(), options(false), callback)));
    assert_eq!(service.wait().map(|s| s.succeeded), Some(1));
}

#[test]
fn stop_emits_stopped_instead_of_error() {
    let out = TempDir::new().unwrap();
    let service = service_with(Arc::new(UnavailableLauncher));
    let (callback, events) = recorder();
    let requests = vec![
        SourceRequest::url("https://slow.test/one"),
        SourceRequest::url("https://ok.test/two"),
    ];

    assert!(service.run(Batch::new(requests, out.path(), options(false), callback)));
    std::thread::sleep(Duration::from_millis(100));
    service.stop();
    let summary = service.wait().expect("summary");

    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.failed, 0);
    assert!(summary.stopped);
    let events = events.lock().unwrap();
    assert!(!events.iter().any(|e| e.kind == EventKind::Error));
    let stopped = events.iter().position(|e| e.kind == EventKind::Stopped).expect("stopped event");
    assert_eq!(events.last().map(|e| e.kind), Some(EventKind::ProgressDone));
    assert!(stopped < events.len() - 1);
    assert!(markdown_files(out.path()).is_empty());
}

#[test]
fn shared_browser_follows_handler_preferences() {
    let out = TempDir::new().unwrap();
    let launcher = Arc::new(CountingLauncher::default());
    let launches = launcher.launches.clone();
    let closes = launcher.closes.clone();
    let service = service_with(launcher);
    let (callback, events) = recorder();
    let requests = vec![
        SourceRequest::url("https://a.shared/1"),
        SourceRequest::url("https://ok.test/2"),
        SourceRequest::url("https://b.shared/3"),
    ];

    assert!(service.run(Batch::new(requests, out.path(), options(true), callback)));
    let summary = service.wait().expect("summary");

    assert_eq!(summary.succeeded, 3);
    assert_eq!(launches.load(Ordering::SeqCst), 2);
    assert_eq!(closes.load(Ordering::SeqCst), 2);
    let lifecycle: Vec<String> = events
        .lock()
        .unwrap()
        .iter()
        .filter_map(|e| e.key.clone())
        .filter(|key| key.starts_with("browser_"))
        .collect();
    assert_eq!(
        lifecycle,
        vec!["browser_started", "browser_closed", "browser_restarted", "browser_closed"]
    );
}
