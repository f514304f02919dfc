//! Headless Chromium over the DevTools protocol.

use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::cdp::browser_protocol::page::AddScriptToEvaluateOnNewDocumentParams;
use chromiumoxide::{Browser, BrowserConfig, Page};
use engine_logging::{engine_debug, engine_info};
use futures_util::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::browser::{BrowserError, BrowserLauncher, BrowserPage, BrowserSession, LaunchProfile};

#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumLauncher;

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self, profile: &LaunchProfile) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .request_timeout(profile.request_timeout)
            .window_size(1920, 1080);
        for arg in &profile.args {
            builder = builder.arg(arg.as_str());
        }
        let config = builder.build().map_err(BrowserError::Unavailable)?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|err| BrowserError::Unavailable(err.to_string()))?;

        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        engine_info!("chromium started");
        Ok(Box::new(ChromiumSession {
            browser: Mutex::new(browser),
            events,
        }))
    }
}

struct ChromiumSession {
    browser: Mutex<Browser>,
    events: JoinHandle<()>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .map_err(protocol)?;
        Ok(Box::new(ChromiumPage { page }))
    }

    async fn close(self: Box<Self>) {
        let ChromiumSession { browser, events } = *self;
        let mut browser = browser.into_inner();
        if let Err(err) = browser.close().await {
            engine_debug!("chromium close failed: {err}");
        }
        let _ = browser.wait().await;
        events.abort();
        engine_info!("chromium stopped");
    }
}

struct ChromiumPage {
    page: Page,
}

impl ChromiumPage {
    async fn eval_bool(&self, script: String) -> Result<bool, BrowserError> {
        self.page
            .evaluate(script)
            .await
            .map_err(protocol)?
            .into_value::<bool>()
            .map_err(|err| BrowserError::Protocol(err.to_string()))
    }
}

/// JS expression evaluating to the first element matching `selector`, or null.
fn query(selector: &str) -> String {
    let literal = serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
    format!("(() => {{ try {{ return document.querySelector({literal}); }} catch (e) {{ return null; }} }})()")
}

fn visible_check(selector: &str) -> String {
    format!(
        "(() => {{ const el = {}; if (!el) return false; \
         const style = window.getComputedStyle(el); const rect = el.getBoundingClientRect(); \
         return style.visibility !== 'hidden' && style.display !== 'none' && rect.width > 0 && rect.height > 0; }})()",
        query(selector)
    )
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn add_init_script(&self, script: &str) -> Result<(), BrowserError> {
        self.page
            .evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(script))
            .await
            .map_err(protocol)?;
        Ok(())
    }

    async fn set_user_agent(&self, user_agent: &str) -> Result<(), BrowserError> {
        self.page.set_user_agent(user_agent).await.map_err(protocol)?;
        Ok(())
    }

    async fn goto(&self, url: &str, timeout: Duration) -> Result<(), BrowserError> {
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(err)) => Err(protocol(err)),
            Err(_) => Err(BrowserError::NavigationTimeout {
                url: url.to_string(),
                timeout,
            }),
        }
    }

    async fn is_visible(&self, selector: &str) -> Result<bool, BrowserError> {
        self.eval_bool(visible_check(selector)).await
    }

    async fn click_if_visible(&self, selector: &str) -> Result<bool, BrowserError> {
        if !self.is_visible(selector).await? {
            return Ok(false);
        }
        // Native click first; a scripted click reaches elements covered by overlays.
        if let Ok(element) = self.page.find_element(selector).await {
            if element.click().await.is_ok() {
                return Ok(true);
            }
        }
        let script = format!(
            "(() => {{ const el = {}; if (!el) return false; el.click(); return true; }})()",
            query(selector)
        );
        self.eval_bool(script).await
    }

    async fn press_escape(&self) -> Result<(), BrowserError> {
        let script = "(() => { const target = document.activeElement || document.body || document; \
            for (const type of ['keydown', 'keyup']) { \
              target.dispatchEvent(new KeyboardEvent(type, { key: 'Escape', code: 'Escape', keyCode: 27, bubbles: true })); \
            } return true; })()";
        self.eval_bool(script.to_string()).await.map(|_| ())
    }

    async fn html(&self) -> Result<String, BrowserError> {
        self.page.content().await.map_err(protocol)
    }

    async fn title(&self) -> Result<Option<String>, BrowserError> {
        self.page.get_title().await.map_err(protocol)
    }

    async fn close(self: Box<Self>) -> Result<(), BrowserError> {
        self.page.close().await.map_err(protocol)
    }
}

fn protocol(err: chromiumoxide::error::CdpError) -> BrowserError {
    BrowserError::Protocol(err.to_string())
}
