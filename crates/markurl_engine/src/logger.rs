//! Stage-level logging for conversions.
//!
//! Pipeline code calls [`ConvertLogger`] unconditionally; every method has a
//! no-op default so [`NullLogger`] stands in when nobody listens.
//! [`EventLogger`] turns each call into a log line and a [`ProgressEvent`].

use engine_logging::{engine_debug, engine_error, engine_info, engine_warn};
use serde_json::json;

use crate::events::EventDispatcher;
use crate::{EventKind, ProgressEvent};

pub trait ConvertLogger: Send + Sync {
    fn info(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
    fn debug(&self, _message: &str) {}

    fn task_status(&self, _index: usize, _total: usize, _source: &str) {}

    fn images_found(&self, _total: usize) {}
    fn images_progress(&self, _done: usize, _total: usize) {}
    fn images_done(&self, _saved: usize, _total: usize) {}

    fn fetch_start(&self, _strategy: &str, _attempt: u32, _max_attempts: u32) {}
    fn fetch_success(&self, _bytes: usize) {}
    fn fetch_failed(&self, _strategy: &str, _error: &str) {}
    fn fetch_retry(&self, _strategy: &str, _attempt: u32, _max_attempts: u32) {}

    fn parse_start(&self) {}
    fn parse_title(&self, _title: &str) {}
    fn parse_content_short(&self, _chars: usize, _min_chars: usize) {}
    fn parse_success(&self, _chars: usize) {}

    fn clean_start(&self) {}
    fn clean_success(&self) {}
    fn convert_start(&self) {}
    fn convert_success(&self) {}

    fn url_success(&self, _title: &str) {}
    fn url_failed(&self, _source: &str, _error: &str) {}

    fn batch_start(&self, _total: usize) {}
    fn batch_summary(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl ConvertLogger for NullLogger {}

/// Logger wired to the batch event sink, optionally scoped to one task.
#[derive(Debug, Clone)]
pub struct EventLogger {
    dispatcher: EventDispatcher,
    task: Option<(usize, usize)>,
}

impl EventLogger {
    pub fn new(dispatcher: EventDispatcher) -> Self {
        Self {
            dispatcher,
            task: None,
        }
    }

    /// Same sink, every event tagged with `index` of `total`.
    pub fn for_task(&self, index: usize, total: usize) -> Self {
        Self {
            dispatcher: self.dispatcher.clone(),
            task: Some((index, total)),
        }
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    fn detail(&self, key: &str, data: serde_json::Value) {
        self.dispatcher
            .emit(ProgressEvent::new(EventKind::Detail).with_key(key).with_data(self.tagged(data)));
    }

    fn status(&self, key: &str, text: String) {
        let mut event = ProgressEvent::new(EventKind::Status).with_key(key).with_text(text);
        if let Some((index, total)) = self.task {
            event = event.with_data(json!({ "task": index, "total": total }));
        }
        self.dispatcher.emit(event);
    }

    fn tagged(&self, mut data: serde_json::Value) -> serde_json::Value {
        if let (Some((index, _)), Some(map)) = (self.task, data.as_object_mut()) {
            map.insert("task".to_string(), json!(index));
        }
        data
    }
}

impl ConvertLogger for EventLogger {
    fn info(&self, message: &str) {
        engine_info!("{message}");
        self.status("info", message.to_string());
    }

    fn success(&self, message: &str) {
        engine_info!("{message}");
        self.status("success", message.to_string());
    }

    fn warning(&self, message: &str) {
        engine_warn!("{message}");
        self.detail("warning", json!({ "message": message }));
    }

    fn error(&self, message: &str) {
        engine_error!("{message}");
        self.dispatcher.emit(
            ProgressEvent::new(EventKind::Error)
                .with_key("error")
                .with_text(message)
                .with_data(self.tagged(json!({}))),
        );
    }

    fn debug(&self, message: &str) {
        engine_debug!("{message}");
    }

    fn task_status(&self, index: usize, total: usize, source: &str) {
        engine_info!("task {index}/{total}: {source}");
        self.dispatcher.emit(
            ProgressEvent::new(EventKind::Status)
                .with_key("task_status")
                .with_text(format!("[{index}/{total}] {source}"))
                .with_data(json!({ "task": index, "total": total, "source": source })),
        );
    }

    fn images_found(&self, total: usize) {
        engine_info!("found {total} images");
        self.detail("images_dl_init", json!({ "total": total }));
    }

    fn images_progress(&self, done: usize, total: usize) {
        let percent = if total == 0 { 100 } else { done * 100 / total };
        engine_debug!("images {done}/{total}");
        self.detail(
            "images_dl_progress",
            json!({ "done": done, "total": total, "percent": percent }),
        );
    }

    fn images_done(&self, saved: usize, total: usize) {
        engine_info!("saved {saved}/{total} images");
        self.detail("images_dl_done", json!({ "saved": saved, "total": total }));
    }

    fn fetch_start(&self, strategy: &str, attempt: u32, max_attempts: u32) {
        engine_info!("fetching with {strategy} (attempt {attempt}/{max_attempts})");
        self.detail(
            "fetch_start",
            json!({ "strategy": strategy, "attempt": attempt, "max_attempts": max_attempts }),
        );
    }

    fn fetch_success(&self, bytes: usize) {
        engine_debug!("fetched {bytes} bytes");
        self.detail("fetch_success", json!({ "bytes": bytes }));
    }

    fn fetch_failed(&self, strategy: &str, error: &str) {
        engine_warn!("{strategy} failed: {error}");
        self.detail("fetch_failed", json!({ "strategy": strategy, "error": error }));
    }

    fn fetch_retry(&self, strategy: &str, attempt: u32, max_attempts: u32) {
        engine_info!("retrying {strategy} ({attempt}/{max_attempts})");
        self.detail(
            "fetch_retry",
            json!({ "strategy": strategy, "attempt": attempt, "max_attempts": max_attempts }),
        );
    }

    fn parse_start(&self) {
        self.detail("parse_start", json!({}));
    }

    fn parse_title(&self, title: &str) {
        engine_debug!("title: {title}");
        self.detail("parse_title", json!({ "title": title }));
    }

    fn parse_content_short(&self, chars: usize, min_chars: usize) {
        engine_warn!("content too short ({chars} < {min_chars} chars)");
        self.detail(
            "parse_content_short",
            json!({ "chars": chars, "min_chars": min_chars }),
        );
    }

    fn parse_success(&self, chars: usize) {
        engine_debug!("parsed {chars} chars");
        self.detail("parse_success", json!({ "chars": chars }));
    }

    fn clean_start(&self) {
        self.detail("clean_start", json!({}));
    }

    fn clean_success(&self) {
        self.detail("clean_success", json!({}));
    }

    fn convert_start(&self) {
        self.detail("convert_start", json!({}));
    }

    fn convert_success(&self) {
        self.detail("convert_success", json!({}));
    }

    fn url_success(&self, title: &str) {
        engine_info!("converted: {title}");
        self.detail("url_success", json!({ "title": title }));
    }

    fn url_failed(&self, source: &str, error: &str) {
        engine_error!("failed {source}: {error}");
        self.dispatcher.emit(
            ProgressEvent::new(EventKind::Error)
                .with_key("url_failed")
                .with_text(format!("{source}: {error}"))
                .with_data(self.tagged(json!({ "source": source, "error": error }))),
        );
    }

    fn batch_start(&self, total: usize) {
        engine_info!("batch of {total} sources started");
        self.dispatcher.emit(
            ProgressEvent::new(EventKind::Status)
                .with_key("batch_start")
                .with_total(total),
        );
    }

    fn batch_summary(&self, succeeded: usize, failed: usize, total: usize) {
        engine_info!("batch finished: {succeeded} succeeded, {failed} failed, {total} total");
        self.dispatcher.emit(
            ProgressEvent::new(EventKind::Status)
                .with_key("batch_summary")
                .with_text(format!("{succeeded}/{total} converted, {failed} failed"))
                .with_data(json!({ "succeeded": succeeded, "failed": failed, "total": total })),
        );
    }
}
