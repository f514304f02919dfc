//! Batch orchestration: one worker thread per run, requests processed in order.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use engine_logging::{engine_error, engine_info, engine_warn, set_task_label};
use futures_util::FutureExt;
use serde::Serialize;
use serde_json::json;

use crate::browser::{BrowserSession, LaunchProfile};
use crate::events::{EventCallback, EventDispatcher, ProgressSignal};
use crate::fetch::{build_session, FetchSettings, HttpSession};
use crate::logger::{ConvertLogger, EventLogger};
use crate::persist::{FsMarkdownWriter, MarkdownWriter};
use crate::registry::{ConvertPayload, PayloadMeta, Registry};
use crate::stop::StopCheck;
use crate::{ConversionOptions, ConvertError, EventKind, ProgressEvent, SourceKind, SourceRequest};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    pub stopped: bool,
}

/// One run request.
pub struct Batch {
    pub requests: Vec<SourceRequest>,
    pub out_dir: PathBuf,
    pub options: ConversionOptions,
    pub on_event: EventCallback,
    pub signal: Option<Arc<dyn ProgressSignal>>,
    /// Receives stage logging instead of the event logger when present.
    pub ui_logger: Option<Arc<dyn ConvertLogger>>,
}

impl Batch {
    pub fn new(requests: Vec<SourceRequest>, out_dir: impl Into<PathBuf>, options: ConversionOptions, on_event: EventCallback) -> Self {
        Self {
            requests,
            out_dir: out_dir.into(),
            options,
            on_event,
            signal: None,
            ui_logger: None,
        }
    }

    pub fn with_signal(mut self, signal: Arc<dyn ProgressSignal>) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_ui_logger(mut self, logger: Arc<dyn ConvertLogger>) -> Self {
        self.ui_logger = Some(logger);
        self
    }
}

/// Runs conversion batches on a background thread, one at a time.
pub struct ConvertService {
    registry: Arc<Registry>,
    writer: Arc<dyn MarkdownWriter>,
    settings: FetchSettings,
    stop_flag: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<BatchSummary>>>,
}

impl Default for ConvertService {
    fn default() -> Self {
        Self::new(Arc::new(Registry::default()), Arc::new(FsMarkdownWriter), FetchSettings::default())
    }
}

impl ConvertService {
    pub fn new(registry: Arc<Registry>, writer: Arc<dyn MarkdownWriter>, settings: FetchSettings) -> Self {
        Self {
            registry,
            writer,
            settings,
            stop_flag: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    /// Start `batch` on a new worker thread. Returns `false` and does nothing
    /// while a previous batch is still running.
    pub fn run(&self, batch: Batch) -> bool {
        let mut worker = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            engine_warn!("a batch is already running; ignoring run request");
            return false;
        }
        if let Some(finished) = worker.take() {
            let _ = finished.join();
        }

        self.stop_flag.store(false, Ordering::SeqCst);
        let job = BatchJob {
            registry: self.registry.clone(),
            writer: self.writer.clone(),
            settings: self.settings.clone(),
            stop: StopCheck::from_flag(self.stop_flag.clone()),
        };
        let spawned = std::thread::Builder::new()
            .name("markurl-batch".to_string())
            .spawn(move || job.run(batch));
        match spawned {
            Ok(handle) => {
                *worker = Some(handle);
                true
            }
            Err(err) => {
                engine_error!("could not start the batch worker: {err}");
                false
            }
        }
    }

    /// Ask the running batch to stop at its next checkpoint.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .map(|worker| worker.as_ref().is_some_and(|handle| !handle.is_finished()))
            .unwrap_or(false)
    }

    /// Block until the current batch ends; `None` when nothing was started.
    pub fn wait(&self) -> Option<BatchSummary> {
        let handle = match self.worker.lock() {
            Ok(mut worker) => worker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }?;
        handle.join().ok()
    }
}

struct BatchJob {
    registry: Arc<Registry>,
    writer: Arc<dyn MarkdownWriter>,
    settings: FetchSettings,
    stop: StopCheck,
}

impl BatchJob {
    fn run(self, batch: Batch) -> BatchSummary {
        let dispatcher = EventDispatcher::new(batch.on_event.clone(), batch.signal.clone());
        let total = batch.requests.len();
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build();
        match runtime {
            Ok(runtime) => runtime.block_on(self.run_batch(&batch, &dispatcher)),
            Err(err) => {
                engine_error!("could not start the batch runtime: {err}");
                dispatcher.emit(
                    ProgressEvent::new(EventKind::Error)
                        .with_key("runtime")
                        .with_text(err.to_string()),
                );
                let summary = BatchSummary {
                    failed: total,
                    total,
                    ..BatchSummary::default()
                };
                emit_done(&dispatcher, &summary);
                summary
            }
        }
    }

    async fn run_batch(&self, batch: &Batch, dispatcher: &EventDispatcher) -> BatchSummary {
        let total = batch.requests.len();
        let events = EventLogger::new(dispatcher.clone());
        let mut summary = BatchSummary {
            total,
            ..BatchSummary::default()
        };

        events.batch_start(total);
        dispatcher.emit(ProgressEvent::new(EventKind::ProgressInit).with_total(total));

        let session = match build_session(&self.settings, batch.options.ignore_ssl, batch.options.use_proxy) {
            Ok(session) => session,
            Err(err) => {
                events.error(&format!("{err}"));
                summary.failed = total;
                emit_done(dispatcher, &summary);
                return summary;
            }
        };

        let mut browser = SharedBrowser::new(self, dispatcher);
        if let Some(first) = batch.requests.first() {
            if self.wants_shared_browser(first, &batch.options) {
                browser.start().await;
            }
        }

        for (index, request) in batch.requests.iter().enumerate() {
            if self.stop.should_stop() {
                summary.stopped = true;
                break;
            }
            let position = index + 1;
            let _label = set_task_label(format!("{position}/{total}"));

            if self.wants_shared_browser(request, &batch.options) {
                if !browser.is_running() {
                    browser.start().await;
                }
            } else if browser.is_running() {
                browser.close().await;
            }

            let task_events = events.for_task(position, total);
            let logger: &dyn ConvertLogger = match &batch.ui_logger {
                Some(ui) => ui.as_ref(),
                None => &task_events,
            };
            logger.task_status(position, total, &request.value);

            let converted = AssertUnwindSafe(self.convert_one(request, batch, &session, logger, browser.session()))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(ConvertError::Unsupported("conversion panicked".to_string())));

            let outcome = match converted {
                Ok(path) => {
                    summary.succeeded += 1;
                    engine_info!("wrote {}", path.display());
                    json!({ "source": request.value, "path": path.display().to_string() })
                }
                Err(err) if err.is_stop() => {
                    summary.stopped = true;
                    break;
                }
                Err(err) => {
                    summary.failed += 1;
                    logger.url_failed(&request.value, &err.to_string());
                    json!({ "source": request.value, "error": err.to_string() })
                }
            };
            dispatcher.emit(
                ProgressEvent::new(EventKind::ProgressStep)
                    .with_current(position)
                    .with_total(total)
                    .with_data(outcome),
            );
        }

        browser.close().await;

        if summary.stopped {
            engine_warn!("batch stopped by request");
            dispatcher.emit(
                ProgressEvent::new(EventKind::Stopped)
                    .with_text("stopped")
                    .with_data(json!(summary)),
            );
        }
        events.batch_summary(summary.succeeded, summary.failed, summary.total);
        emit_done(dispatcher, &summary);
        summary
    }

    fn wants_shared_browser(&self, request: &SourceRequest, options: &ConversionOptions) -> bool {
        options.use_shared_browser
            && request.kind == SourceKind::Url
            && self.registry.should_use_shared_browser(&request.value)
    }

    async fn convert_one(
        &self,
        request: &SourceRequest,
        batch: &Batch,
        session: &HttpSession,
        logger: &dyn ConvertLogger,
        shared_browser: Option<&dyn BrowserSession>,
    ) -> Result<PathBuf, ConvertError> {
        let out_dir: &Path = &batch.out_dir;
        let meta = PayloadMeta::new(logger, &self.stop)
            .with_out_dir(out_dir)
            .with_shared_browser(shared_browser);
        let payload = ConvertPayload::new(request, meta);
        let result = self.registry.convert(&payload, session, &batch.options).await?;
        let path = self
            .writer
            .write_markdown(out_dir, &result.suggested_filename, &result.markdown)?;
        Ok(path)
    }
}

/// Batch-scoped browser whose lifecycle only the worker drives.
struct SharedBrowser<'a> {
    job: &'a BatchJob,
    dispatcher: &'a EventDispatcher,
    session: Option<Box<dyn BrowserSession>>,
    launches: usize,
    unavailable: bool,
}

impl<'a> SharedBrowser<'a> {
    fn new(job: &'a BatchJob, dispatcher: &'a EventDispatcher) -> Self {
        Self {
            job,
            dispatcher,
            session: None,
            launches: 0,
            unavailable: false,
        }
    }

    fn is_running(&self) -> bool {
        self.session.is_some()
    }

    fn session(&self) -> Option<&dyn BrowserSession> {
        self.session.as_deref()
    }

    /// Launch unless running; a launcher that failed once is not retried in this batch.
    async fn start(&mut self) {
        if self.session.is_some() || self.unavailable {
            return;
        }
        let profile = LaunchProfile::standard(self.job.settings.navigation_timeout);
        match self.job.registry.launcher().launch(&profile).await {
            Ok(session) => {
                self.session = Some(session);
                self.launches += 1;
                let key = if self.launches > 1 { "browser_restarted" } else { "browser_started" };
                engine_info!("shared browser launched ({key})");
                self.dispatcher
                    .emit(ProgressEvent::new(EventKind::Status).with_key(key));
            }
            Err(err) => {
                self.unavailable = true;
                engine_warn!("shared browser unavailable: {err}");
                self.dispatcher.emit(
                    ProgressEvent::new(EventKind::Detail)
                        .with_key("browser_unavailable")
                        .with_text(err.to_string()),
                );
            }
        }
    }

    async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
            engine_info!("shared browser closed");
            self.dispatcher
                .emit(ProgressEvent::new(EventKind::Status).with_key("browser_closed"));
        }
    }
}

fn emit_done(dispatcher: &EventDispatcher, summary: &BatchSummary) {
    dispatcher.emit(
        ProgressEvent::new(EventKind::ProgressDone)
            .with_total(summary.total)
            .with_current(summary.succeeded + summary.failed)
            .with_data(json!(summary)),
    );
}
