#![deny(missing_docs)]
//! Shared logging utilities for the markurl workspace.
//!
//! This crate provides the `engine_*` logging macros used across the codebase,
//! a per-thread task label that the macros prepend to every line, and a
//! minimal test initializer for the global logger.

use std::cell::RefCell;

#[doc(hidden)]
pub use log as __log;

thread_local! {
    /// Label of the request currently processed on this thread, e.g. `3/10`.
    static TASK_LABEL: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Restores the previous task label when dropped.
#[must_use = "the label is cleared as soon as the guard is dropped"]
pub struct TaskLabelGuard {
    previous: Option<String>,
}

impl Drop for TaskLabelGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        TASK_LABEL.with(|label| *label.borrow_mut() = previous);
    }
}

/// Sets the task label for the current thread until the returned guard drops.
pub fn set_task_label(label: impl Into<String>) -> TaskLabelGuard {
    let next = Some(label.into());
    let previous = TASK_LABEL.with(|label| label.replace(next));
    TaskLabelGuard { previous }
}

/// Returns the task label of the current thread, if any.
pub fn task_label() -> Option<String> {
    TASK_LABEL.with(|label| label.borrow().clone())
}

/// Prefix the logging macros put in front of each message.
#[doc(hidden)]
pub fn task_prefix() -> String {
    TASK_LABEL.with(|label| match label.borrow().as_deref() {
        Some(label) => format!("[{label}] "),
        None => String::new(),
    })
}

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! engine_trace {
    ($($arg:tt)*) => {{
        $crate::__log::trace!("{}{}", $crate::task_prefix(), format_args!($($arg)*));
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! engine_info {
    ($($arg:tt)*) => {{
        $crate::__log::info!("{}{}", $crate::task_prefix(), format_args!($($arg)*));
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! engine_debug {
    ($($arg:tt)*) => {{
        $crate::__log::debug!("{}{}", $crate::task_prefix(), format_args!($($arg)*));
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! engine_warn {
    ($($arg:tt)*) => {{
        $crate::__log::warn!("{}{}", $crate::task_prefix(), format_args!($($arg)*));
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! engine_error {
    ($($arg:tt)*) => {{
        $crate::__log::error!("{}{}", $crate::task_prefix(), format_args!($($arg)*));
    }};
}

/// Initializes a simple terminal logger for use in tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode};

    let level = if cfg!(debug_assertions) {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = CombinedLogger::init(vec![TermLogger::new(
        level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_is_restored_when_guard_drops() {
        assert_eq!(task_label(), None);
        {
            let _outer = set_task_label("1/2");
            assert_eq!(task_prefix(), "[1/2] ");
            {
                let _inner = set_task_label("images");
                assert_eq!(task_label().as_deref(), Some("images"));
            }
            assert_eq!(task_label().as_deref(), Some("1/2"));
        }
        assert_eq!(task_prefix(), "");
    }
}
