//! Site handlers: one [`SiteHandler`] per content-source family.
//!
//! A handler fetches through the shared strategy loop and turns raw pages into
//! a [`FetchResult`]; the registry applies its [`Acceptance`] rule afterwards.

use async_trait::async_trait;

use crate::browser::{BrowserLauncher, BrowserSession};
use crate::fetch::{FetchSettings, HttpSession};
use crate::logger::ConvertLogger;
use crate::stop::StopCheck;
use crate::strategy::RetryPolicy;
use crate::{ConversionOptions, ConvertError, FetchResult};

mod article;
pub mod appinn;
pub mod generic;
pub mod nextjs;
pub mod sspai;
pub mod weixin;
pub mod wordpress;
pub mod zhihu;

pub use appinn::AppinnHandler;
pub use generic::GenericHandler;
pub use nextjs::NextJsHandler;
pub use sspai::SspaiHandler;
pub use weixin::WeixinHandler;
pub use wordpress::WordPressHandler;
pub use zhihu::ZhihuHandler;

/// Everything a handler may touch while converting one URL.
#[derive(Clone, Copy)]
pub struct HandlerContext<'a> {
    pub url: &'a str,
    pub session: &'a HttpSession,
    pub options: &'a ConversionOptions,
    pub logger: &'a dyn ConvertLogger,
    pub stop: &'a StopCheck,
    /// Browser lent by the conversion service for the whole batch.
    pub shared_browser: Option<&'a dyn BrowserSession>,
    pub launcher: &'a dyn BrowserLauncher,
}

impl<'a> HandlerContext<'a> {
    pub fn settings(&self) -> &'a FetchSettings {
        self.session.settings()
    }

    pub fn retry_policy(&self) -> &'a RetryPolicy {
        &self.session.settings().strategy_retry
    }
}

#[async_trait]
pub trait SiteHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn matches(&self, url: &str) -> bool;

    /// Whether a warm shared browser helps this handler.
    fn prefers_shared_browser(&self) -> bool {
        true
    }

    fn acceptance(&self) -> Acceptance;

    async fn fetch(&self, cx: &HandlerContext<'_>) -> Result<FetchResult, ConvertError>;
}

/// Validation rule a handler result must pass before the registry keeps it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acceptance {
    pub min_chars: usize,
    pub blocked_markers: &'static [&'static str],
    /// Results longer than this skip the marker check.
    pub trusted_chars: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    Failed(String),
    Empty,
    TooShort { chars: usize, min_chars: usize },
    Blocked(&'static str),
}

impl std::fmt::Display for Rejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Rejection::Failed(reason) => write!(f, "{reason}"),
            Rejection::Empty => write!(f, "empty content"),
            Rejection::TooShort { chars, min_chars } => {
                write!(f, "content too short ({chars} < {min_chars} chars)")
            }
            Rejection::Blocked(marker) => write!(f, "blocked page marker {marker:?}"),
        }
    }
}

impl Acceptance {
    pub const NON_EMPTY: Acceptance = Acceptance {
        min_chars: 1,
        blocked_markers: &[],
        trusted_chars: None,
    };

    pub const fn min_chars(min_chars: usize) -> Self {
        Acceptance {
            min_chars,
            blocked_markers: &[],
            trusted_chars: None,
        }
    }

    pub fn evaluate(&self, result: &FetchResult) -> Result<(), Rejection> {
        if !result.success {
            return Err(Rejection::Failed(
                result.error.clone().unwrap_or_else(|| "handler failed".to_string()),
            ));
        }
        if result.content.trim().is_empty() {
            return Err(Rejection::Empty);
        }
        let chars = result.content.chars().count();
        if self.trusted_chars.is_some_and(|trusted| chars > trusted) {
            return Ok(());
        }
        if chars < self.min_chars {
            return Err(Rejection::TooShort {
                chars,
                min_chars: self.min_chars,
            });
        }
        let title = result.title.as_deref().unwrap_or_default();
        match self
            .blocked_markers
            .iter()
            .find(|marker| title.contains(*marker) || result.content.contains(*marker))
        {
            Some(marker) => Err(Rejection::Blocked(marker)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUARDED: Acceptance = Acceptance {
        min_chars: 1,
        blocked_markers: &["验证", "登录"],
        trusted_chars: Some(20),
    };

    #[test]
    fn short_pages_with_markers_are_blocked() {
        let login = FetchResult::ok(Some("请登录".into()), "body");
        assert_eq!(GUARDED.evaluate(&login), Err(Rejection::Blocked("登录")));

        let long = FetchResult::ok(None, format!("需要验证 {}", "x".repeat(30)));
        assert_eq!(GUARDED.evaluate(&long), Ok(()));
    }

    #[test]
    fn length_and_failure_are_checked_first() {
        assert_eq!(
            Acceptance::min_chars(200).evaluate(&FetchResult::ok(None, "short")),
            Err(Rejection::TooShort {
                chars: 5,
                min_chars: 200
            })
        );
        assert_eq!(
            Acceptance::NON_EMPTY.evaluate(&FetchResult::ok(None, "  \n")),
            Err(Rejection::Empty)
        );
        assert!(matches!(
            Acceptance::NON_EMPTY.evaluate(&FetchResult::failed("boom")),
            Err(Rejection::Failed(_))
        ));
    }
}
