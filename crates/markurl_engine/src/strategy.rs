use std::time::Duration;

use async_trait::async_trait;

use crate::browser::{render_page, BrowserError, RenderPlan};
use crate::fetch::fetch_direct;
use crate::handlers::HandlerContext;
use crate::{ConvertError, FetchResult};

/// Attempt bounds and pauses for handler strategy loops.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub retry_delay: (Duration, Duration),
    pub strategy_gap: (Duration, Duration),
    /// Multiplies every pause, including browser settle waits. `0.0` disables waiting.
    pub time_scale: f64,
}

impl RetryPolicy {
    pub fn standard() -> Self {
        Self {
            max_attempts: 2,
            retry_delay: (Duration::from_secs(2), Duration::from_secs(4)),
            strategy_gap: (Duration::from_secs(1), Duration::from_secs(3)),
            time_scale: 1.0,
        }
    }

    pub fn immediate() -> Self {
        Self {
            time_scale: 0.0,
            ..Self::standard()
        }
    }

    /// Random pause within `range`, scaled by `time_scale`.
    pub fn pause(&self, (min, max): (Duration, Duration)) -> Duration {
        if self.time_scale <= 0.0 {
            return Duration::ZERO;
        }
        let base = if max <= min {
            min
        } else {
            let low = min.as_millis() as u64;
            let high = max.as_millis() as u64;
            Duration::from_millis(rand::random_range(low..=high))
        };
        base.mul_f64(self.time_scale)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

/// Raw page handed from a strategy to the handler's processing step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub html: String,
    pub title: Option<String>,
    pub final_url: String,
}

/// What the handler made of one raw page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accept(FetchResult),
    /// Try the same strategy again, e.g. a verification interstitial.
    Retry(String),
    /// Give up on this strategy, e.g. content below the minimum length.
    NextStrategy(String),
}

#[async_trait]
pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch(&self, cx: &HandlerContext<'_>) -> Result<RawPage, ConvertError>;
}

/// GET through the batch session.
pub struct HttpStrategy;

#[async_trait]
impl Strategy for HttpStrategy {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn fetch(&self, cx: &HandlerContext<'_>) -> Result<RawPage, ConvertError> {
        let page = cx.session.get_page(cx.url).await?;
        Ok(RawPage {
            html: page.html,
            title: None,
            final_url: page.final_url,
        })
    }
}

/// GET through a fresh client, bypassing the session pool and its retries.
pub struct DirectStrategy;

#[async_trait]
impl Strategy for DirectStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn fetch(&self, cx: &HandlerContext<'_>) -> Result<RawPage, ConvertError> {
        let page = fetch_direct(cx.url, cx.session).await?;
        Ok(RawPage {
            html: page.html,
            title: None,
            final_url: page.final_url,
        })
    }
}

/// Render in a browser following `plan`.
pub struct BrowserStrategy {
    pub plan: RenderPlan,
}

#[async_trait]
impl Strategy for BrowserStrategy {
    fn name(&self) -> &'static str {
        "browser"
    }

    async fn fetch(&self, cx: &HandlerContext<'_>) -> Result<RawPage, ConvertError> {
        render_page(cx, &self.plan).await
    }
}

/// Shared retry loop: strategies in order, each up to `max_attempts` times.
///
/// Stop requests propagate as `Err(ConvertError::Stopped)`. Exhaustion is not an
/// error: it yields a failed [`FetchResult`] that the registry treats as a fallback trigger.
pub async fn run_strategies<F>(
    cx: &HandlerContext<'_>,
    label: &str,
    strategies: &[&dyn Strategy],
    process: F,
) -> Result<FetchResult, ConvertError>
where
    F: FnMut(RawPage) -> Verdict + Send,
{
    run_strategies_with(cx, cx.retry_policy(), label, strategies, process).await
}

/// [`run_strategies`] with an explicit policy, for sites that need longer pauses.
pub async fn run_strategies_with<F>(
    cx: &HandlerContext<'_>,
    policy: &RetryPolicy,
    label: &str,
    strategies: &[&dyn Strategy],
    mut process: F,
) -> Result<FetchResult, ConvertError>
where
    F: FnMut(RawPage) -> Verdict + Send,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut last_error = String::from("no strategy available");

    for (index, strategy) in strategies.iter().enumerate() {
        if index > 0 {
            cx.stop.sleep(policy.pause(policy.strategy_gap)).await?;
        }
        for attempt in 1..=max_attempts {
            cx.stop.check()?;
            if attempt > 1 {
                cx.logger.fetch_retry(strategy.name(), attempt, max_attempts);
                cx.stop.sleep(policy.pause(policy.retry_delay)).await?;
            }
            cx.logger.fetch_start(strategy.name(), attempt, max_attempts);

            let raw = match strategy.fetch(cx).await {
                Ok(raw) => raw,
                Err(err) if err.is_stop() => return Err(err),
                Err(err) => {
                    cx.logger.fetch_failed(strategy.name(), &err.to_string());
                    last_error = format!("{}: {err}", strategy.name());
                    if matches!(err, ConvertError::Browser(BrowserError::Unavailable(_))) {
                        break;
                    }
                    continue;
                }
            };

            cx.logger.fetch_success(raw.html.len());
            cx.stop.check()?;
            cx.logger.parse_start();
            match process(raw) {
                Verdict::Accept(result) => {
                    if let Some(title) = result.title.as_deref() {
                        cx.logger.parse_title(title);
                    }
                    cx.logger.parse_success(result.content_chars());
                    return Ok(result);
                }
                Verdict::Retry(reason) => {
                    cx.logger.warning(&format!("{label}/{}: {reason}", strategy.name()));
                    last_error = reason;
                }
                Verdict::NextStrategy(reason) => {
                    cx.logger.warning(&format!("{label}/{}: {reason}", strategy.name()));
                    last_error = reason;
                    break;
                }
            }
        }
    }

    cx.logger.error(&format!("{label}: all fetch strategies failed"));
    Ok(FetchResult::failed(format!(
        "{label}: all fetch strategies failed, last error: {last_error}"
    )))
}
