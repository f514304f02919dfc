use std::time::Duration;

use bytes::{Bytes, BytesMut};
use engine_logging::{engine_debug, engine_warn};
use futures_util::StreamExt;
use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::StatusCode;

use crate::decode::decode_html;
use crate::strategy::RetryPolicy;
use crate::{ConvertError, FailureKind, FetchError};

/// Desktop Chrome user agent sent by every HTTP request and browser page.
pub const DESKTOP_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub max_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub user_agent: String,
    pub http_retries: u32,
    pub backoff_base: Duration,
    pub retry_statuses: Vec<u16>,
    pub strategy_retry: RetryPolicy,
    pub navigation_timeout: Duration,
    pub selector_timeout: Duration,
    pub image_concurrency: usize,
    pub image_timeout: Duration,
    pub max_image_bytes: u64,
    pub compact_image_names: bool,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            max_bytes: 10 * 1024 * 1024,
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
                "text/plain".to_string(),
            ],
            user_agent: DESKTOP_USER_AGENT.to_string(),
            http_retries: 3,
            backoff_base: Duration::from_millis(500),
            retry_statuses: vec![429, 500, 502, 503, 504],
            strategy_retry: RetryPolicy::standard(),
            navigation_timeout: Duration::from_secs(30),
            selector_timeout: Duration::from_secs(10),
            image_concurrency: 10,
            image_timeout: Duration::from_secs(30),
            max_image_bytes: 20 * 1024 * 1024,
            compact_image_names: false,
        }
    }
}

/// A decoded HTML page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub html: String,
    pub final_url: String,
    pub content_type: Option<String>,
    pub encoding_label: String,
}

/// Proxy and TLS choices of a batch; every client built for it applies them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientChoices {
    pub ignore_ssl: bool,
    pub use_proxy: bool,
}

/// The one HTTP client of a batch: keep-alive pool, retry policy, proxy and TLS choices.
#[derive(Debug, Clone)]
pub struct HttpSession {
    client: reqwest::Client,
    settings: FetchSettings,
    choices: ClientChoices,
}

/// Build the batch session.
///
/// With `use_proxy` the `HTTP_PROXY`/`HTTPS_PROXY` variables (either case) are honored;
/// without it no environment proxy is consulted at all.
pub fn build_session(
    settings: &FetchSettings,
    ignore_ssl: bool,
    use_proxy: bool,
) -> Result<HttpSession, ConvertError> {
    let choices = ClientChoices { ignore_ssl, use_proxy };
    if ignore_ssl {
        engine_warn!("TLS certificate verification is disabled for this batch");
    }
    let client = configured_builder(client_builder(settings), choices)
        .and_then(|builder| builder.build())
        .map_err(|err| ConvertError::Session(err.to_string()))?;
    Ok(HttpSession {
        client,
        settings: settings.clone(),
        choices,
    })
}

/// Apply proxy and TLS choices; no environment proxy is read unless `use_proxy` is set.
fn configured_builder(
    builder: reqwest::ClientBuilder,
    choices: ClientChoices,
) -> Result<reqwest::ClientBuilder, reqwest::Error> {
    let mut builder = builder.no_proxy();
    if choices.use_proxy {
        let http = env_proxy(&["HTTP_PROXY", "http_proxy"]);
        let https = env_proxy(&["HTTPS_PROXY", "https_proxy"]).or_else(|| http.clone());
        if let Some(proxy) = http {
            builder = builder.proxy(reqwest::Proxy::http(&proxy)?);
        }
        if let Some(proxy) = https {
            builder = builder.proxy(reqwest::Proxy::https(&proxy)?);
        }
    }
    if choices.ignore_ssl {
        builder = builder.danger_accept_invalid_certs(true);
    }
    Ok(builder)
}

fn client_builder(settings: &FetchSettings) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .user_agent(settings.user_agent.clone())
        .connect_timeout(settings.connect_timeout)
        .timeout(settings.request_timeout)
        .pool_idle_timeout(Duration::from_secs(90))
}

fn env_proxy(keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|value| !value.trim().is_empty())
}

impl HttpSession {
    pub fn settings(&self) -> &FetchSettings {
        &self.settings
    }

    pub fn choices(&self) -> ClientChoices {
        self.choices
    }

    pub fn user_agent(&self) -> Option<&str> {
        Some(self.settings.user_agent.as_str()).filter(|ua| !ua.trim().is_empty())
    }

    /// GET a page, retrying 429/5xx and transport failures with exponential backoff.
    pub async fn get_page(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let mut attempt = 0;
        loop {
            match fetch_page(&self.client, url, &self.settings).await {
                Ok(page) => return Ok(page),
                Err(err)
                    if attempt < self.settings.http_retries
                        && err.kind.is_retryable(&self.settings.retry_statuses) =>
                {
                    attempt += 1;
                    let delay = self.settings.backoff_base * 2u32.pow(attempt - 1);
                    engine_debug!(
                        "GET {url} failed ({err}), retry {attempt}/{} in {delay:?}",
                        self.settings.http_retries
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// GET raw bytes with extra headers; anything but `200 OK` is an error.
    pub async fn get_bytes(
        &self,
        url: &str,
        headers: HeaderMap,
        timeout: Duration,
    ) -> Result<Bytes, FetchError> {
        let max_bytes = self.settings.max_image_bytes;
        let download = async {
            let response = self
                .client
                .get(url)
                .headers(headers)
                .send()
                .await
                .map_err(map_reqwest_error)?;
            if response.status() != StatusCode::OK {
                let status = response.status();
                return Err(FetchError::new(
                    FailureKind::HttpStatus(status.as_u16()),
                    status.to_string(),
                ));
            }
            read_body(response, max_bytes).await
        };
        tokio::time::timeout(timeout, download)
            .await
            .map_err(|_| FetchError::new(FailureKind::Timeout, format!("no response within {timeout:?}")))?
    }
}

/// Single GET through a fresh client without retries or pooling.
///
/// The client is new, but it keeps the session's proxy and TLS choices.
pub async fn fetch_direct(url: &str, session: &HttpSession) -> Result<FetchedPage, FetchError> {
    let settings = session.settings();
    let builder = client_builder(settings).pool_max_idle_per_host(0);
    let client = configured_builder(builder, session.choices())
        .and_then(|builder| builder.build())
        .map_err(|err| FetchError::new(FailureKind::Network, err.to_string()))?;
    fetch_page(&client, url, settings).await
}

async fn fetch_page(
    client: &reqwest::Client,
    url: &str,
    settings: &FetchSettings,
) -> Result<FetchedPage, FetchError> {
    let parsed = reqwest::Url::parse(url)
        .map_err(|err| FetchError::new(FailureKind::InvalidUrl, err.to_string()))?;

    let response = client.get(parsed).send().await.map_err(map_reqwest_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::new(
            FailureKind::HttpStatus(status.as_u16()),
            status.to_string(),
        ));
    }

    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string());

    if let Some(ct) = content_type.as_deref() {
        if !is_content_type_allowed(settings, ct) {
            return Err(FetchError::new(
                FailureKind::Decode,
                format!("unsupported content type {ct}"),
            ));
        }
    }

    let bytes = read_body(response, settings.max_bytes).await?;
    let decoded = decode_html(&bytes, content_type.as_deref())
        .map_err(|err| FetchError::new(FailureKind::Decode, err.to_string()))?;

    Ok(FetchedPage {
        html: decoded.html,
        final_url,
        content_type,
        encoding_label: decoded.encoding_label,
    })
}

async fn read_body(response: reqwest::Response, max_bytes: u64) -> Result<Bytes, FetchError> {
    if let Some(content_len) = response.content_length() {
        if content_len > max_bytes {
            return Err(FetchError::new(
                FailureKind::TooLarge {
                    max_bytes,
                    actual: Some(content_len),
                },
                "response too large",
            ));
        }
    }

    let mut bytes = BytesMut::new();
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(map_reqwest_error)?;
        let next_len = bytes.len() as u64 + chunk.len() as u64;
        if next_len > max_bytes {
            return Err(FetchError::new(
                FailureKind::TooLarge {
                    max_bytes,
                    actual: Some(next_len),
                },
                "response too large",
            ));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes.freeze())
}

fn is_content_type_allowed(settings: &FetchSettings, content_type: &str) -> bool {
    let ct = content_type.split(';').next().unwrap_or(content_type).trim();
    settings
        .allowed_content_types
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(ct))
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::new(FailureKind::Timeout, err.to_string());
    }
    FetchError::new(FailureKind::Network, err.to_string())
}
