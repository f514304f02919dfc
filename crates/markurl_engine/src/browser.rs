//! Browser automation seams and the driver helpers every handler shares.
//!
//! Handlers never talk to a browser implementation directly: they go through
//! [`BrowserLauncher`] / [`BrowserSession`] / [`BrowserPage`] so the shared
//! browser can be lent by reference and tests can use fake pages.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use engine_logging::{engine_debug, engine_info};

use crate::handlers::HandlerContext;
use crate::strategy::RawPage;
use crate::ConvertError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrowserError {
    #[error("browser automation unavailable: {0}")]
    Unavailable(String),
    #[error("browser protocol error: {0}")]
    Protocol(String),
    #[error("navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },
}

/// Command-line flags for a browser process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchProfile {
    pub args: Vec<String>,
    pub request_timeout: Duration,
}

const BASE_ARGS: &[&str] = &[
    "--disable-gpu",
    "--disable-dev-shm-usage",
    "--disable-blink-features=AutomationControlled",
    "--lang=zh-CN",
];

impl LaunchProfile {
    pub fn standard(request_timeout: Duration) -> Self {
        Self {
            args: BASE_ARGS.iter().map(|arg| arg.to_string()).collect(),
            request_timeout,
        }
    }

    /// Text-only profile: no images, no scripts.
    pub fn text_only(request_timeout: Duration) -> Self {
        let mut profile = Self::standard(request_timeout);
        profile.args.push("--blink-settings=imagesEnabled=false".to_string());
        profile.args.push("--disable-javascript".to_string());
        profile
    }
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

/// A running browser process.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError>;
    async fn close(self: Box<Self>);
}

#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn add_init_script(&self, script: &str) -> Result<(), BrowserError>;
    async fn set_user_agent(&self, user_agent: &str) -> Result<(), BrowserError>;
    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError>;
    async fn is_visible(&self, selector: &str) -> Result<bool, BrowserError>;
    /// Clicks the first match if it is visible; `Ok(false)` when nothing was clicked.
    async fn click_if_visible(&self, selector: &str) -> Result<bool, BrowserError>;
    async fn press_escape(&self) -> Result<(), BrowserError>;
    async fn html(&self) -> Result<String, BrowserError>;
    async fn title(&self) -> Result<Option<String>, BrowserError>;
    async fn close(self: Box<Self>) -> Result<(), BrowserError>;
}

/// Launcher for environments without a browser; every launch fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableLauncher;

#[async_trait]
impl BrowserLauncher for UnavailableLauncher {
    async fn launch(&self, _profile: &LaunchProfile) -> Result<Box<dyn BrowserSession>, BrowserError> {
        Err(BrowserError::Unavailable("browser automation disabled".to_string()))
    }
}

/// Hides the usual headless-automation fingerprints.
pub const STEALTH_SCRIPT: &str = r#"
Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
Object.defineProperty(navigator, 'plugins', { get: () => [1, 2, 3, 4, 5] });
Object.defineProperty(navigator, 'languages', { get: () => ['zh-CN', 'zh', 'en'] });
window.chrome = window.chrome || { runtime: {} };
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSetup<'a> {
    pub user_agent: &'a str,
    pub init_script: Option<&'a str>,
}

/// Open a page with user agent and init script applied; setup failures are logged, not fatal.
pub async fn open_page(
    session: &dyn BrowserSession,
    setup: &PageSetup<'_>,
) -> Result<Box<dyn BrowserPage>, BrowserError> {
    let page = session.new_page().await?;
    if let Err(err) = page.set_user_agent(setup.user_agent).await {
        engine_debug!("could not set user agent: {err}");
    }
    if let Some(script) = setup.init_script {
        if let Err(err) = page.add_init_script(script).await {
            engine_debug!("could not install init script: {err}");
        }
    }
    Ok(page)
}

/// Close a page, swallowing any failure.
pub async fn teardown_page(page: Box<dyn BrowserPage>) {
    if let Err(err) = page.close().await {
        engine_debug!("ignoring page close failure: {err}");
    }
}

/// Selectors used to get rid of login walls and similar overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModalPlan {
    /// Clicked in priority order; the first visible one wins.
    pub close_selectors: &'static [&'static str],
    /// When non-empty, rounds repeat while any of these is still visible.
    pub detect_selectors: &'static [&'static str],
    pub escape_fallback: bool,
    pub rounds: usize,
}

pub async fn dismiss_modals(page: &dyn BrowserPage, plan: &ModalPlan) -> bool {
    let detecting = !plan.detect_selectors.is_empty();
    let mut dismissed = false;
    for _ in 0..plan.rounds.max(1) {
        if detecting && !any_visible(page, plan.detect_selectors).await {
            return dismissed;
        }

        let mut clicked = false;
        for selector in plan.close_selectors {
            if page.click_if_visible(selector).await.unwrap_or(false) {
                engine_debug!("closed modal via {selector}");
                clicked = true;
                break;
            }
        }
        if clicked {
            dismissed = true;
        } else if plan.escape_fallback && page.press_escape().await.is_ok() {
            engine_debug!("sent Escape to dismiss modal");
            dismissed = true;
        } else {
            return dismissed;
        }

        if !detecting {
            return dismissed;
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    dismissed
}

async fn any_visible(page: &dyn BrowserPage, selectors: &[&str]) -> bool {
    for selector in selectors {
        if page.is_visible(selector).await.unwrap_or(false) {
            return true;
        }
    }
    false
}

const SELECTOR_POLL: Duration = Duration::from_millis(250);

/// Poll until `selector` is visible or `timeout` passes. Never fails.
pub async fn wait_for_selector_stable(page: &dyn BrowserPage, selector: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if page.is_visible(selector).await.unwrap_or(false) {
            return true;
        }
        let now = Instant::now();
        if now >= deadline {
            engine_debug!("selector {selector} not visible after {timeout:?}, continuing");
            return false;
        }
        tokio::time::sleep(SELECTOR_POLL.min(deadline - now)).await;
    }
}

/// Page HTML and title; `("", None)` on errors.
pub async fn read_content_and_title(page: &dyn BrowserPage) -> (String, Option<String>) {
    let html = page.html().await.unwrap_or_else(|err| {
        engine_debug!("could not read page html: {err}");
        String::new()
    });
    let title = page
        .title()
        .await
        .ok()
        .flatten()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    (html, title)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserChoice {
    /// Use the batch's shared browser when one is lent, else launch one.
    Shared,
    /// Always launch a private browser for this render.
    Independent,
}

/// Site-specific recipe for one browser render.
#[derive(Debug, Clone)]
pub struct RenderPlan {
    pub browser: BrowserChoice,
    pub text_only: bool,
    pub init_script: Option<&'static str>,
    pub modal: Option<ModalPlan>,
    pub expand_selectors: &'static [&'static str],
    pub wait_selector: Option<&'static str>,
    pub settle: (Duration, Duration),
}

impl Default for RenderPlan {
    fn default() -> Self {
        Self {
            browser: BrowserChoice::Shared,
            text_only: false,
            init_script: None,
            modal: None,
            expand_selectors: &[],
            wait_selector: None,
            settle: (Duration::from_secs(2), Duration::from_secs(2)),
        }
    }
}

/// Navigate and read back HTML and title according to `plan`.
pub async fn render_page(cx: &HandlerContext<'_>, plan: &RenderPlan) -> Result<RawPage, ConvertError> {
    let settings = cx.settings();
    let mut launched: Option<Box<dyn BrowserSession>> = None;
    let session: &dyn BrowserSession = match (plan.browser, cx.shared_browser) {
        (BrowserChoice::Shared, Some(shared)) => shared,
        _ => {
            let profile = if plan.text_only {
                LaunchProfile::text_only(settings.navigation_timeout)
            } else {
                LaunchProfile::standard(settings.navigation_timeout)
            };
            engine_info!("launching a private browser for {}", cx.url);
            &**launched.insert(cx.launcher.launch(&profile).await?)
        }
    };

    let setup = PageSetup {
        user_agent: &settings.user_agent,
        init_script: plan.init_script,
    };
    let rendered = match open_page(session, &setup).await {
        Ok(page) => {
            let rendered = drive_page(cx, page.as_ref(), plan).await;
            teardown_page(page).await;
            rendered
        }
        Err(err) => Err(err.into()),
    };

    if let Some(browser) = launched.take() {
        browser.close().await;
    }
    rendered
}

async fn drive_page(
    cx: &HandlerContext<'_>,
    page: &dyn BrowserPage,
    plan: &RenderPlan,
) -> Result<RawPage, ConvertError> {
    let settings = cx.settings();
    cx.stop.check()?;
    page.goto(cx.url, settings.navigation_timeout).await?;

    let policy = cx.retry_policy();
    cx.stop.sleep(policy.pause(plan.settle)).await?;

    if let Some(modal) = &plan.modal {
        dismiss_modals(page, modal).await;
    }
    for selector in plan.expand_selectors {
        if page.click_if_visible(selector).await.unwrap_or(false) {
            engine_debug!("expanded content via {selector}");
        }
    }
    if let Some(selector) = plan.wait_selector {
        wait_for_selector_stable(page, selector, settings.selector_timeout).await;
    }
    cx.stop.check()?;

    let (html, title) = read_content_and_title(page).await;
    Ok(RawPage {
        html,
        title,
        final_url: cx.url.to_string(),
    })
}
