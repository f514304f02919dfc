//! Image localization: download the images a Markdown document references,
//! store each distinct image once and point the references at the local copies.
//!
//! Downloads run concurrently. A single lock guards the content-hash map, so two
//! URLs serving identical bytes always end up referencing the same file. Failed
//! downloads keep their remote URL.

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use engine_logging::{engine_debug, engine_info, engine_warn};
use futures_util::stream::{self, StreamExt};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, REFERER, USER_AGENT};
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use url::Url;

use crate::fetch::HttpSession;
use crate::logger::ConvertLogger;
use crate::sniff::sniff_image_extension;
use crate::stop::StopCheck;
use crate::ConvertError;

static MARKDOWN_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"!\[[^\]]*\]\(([^)]+)\)").expect("valid markdown image regex"));
static HTML_IMAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)<img\b[^>]*?\ssrc="([^"]+)"[^>]*>"#).expect("valid img tag regex"));
static MARKDOWN_ALT: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]").expect("valid alt regex"));

/// Extension given to files whose real format is decided from their bytes.
const UNKNOWN_EXT: &str = ".img";
const IMAGE_ACCEPT: &str = "image/avif,image/webp,image/apng,image/*,*/*;q=0.8";
const RESEQ_SUFFIX: &str = ".reseq.tmp";

/// Hosts serving extension-less or mislabelled images: `(domain, subdomains_too)`.
pub const SNIFF_DOMAINS: &[(&str, bool)] = &[("zhimg.com", true), ("qpic.cn", false), ("mmbiz.qpic.cn", false)];

#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("cannot create image directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("image download runtime failed: {0}")]
    Runtime(String),
}

/// Per-call parameters of [`localize_images`].
#[derive(Debug, Clone)]
pub struct LocalizeOptions {
    /// Page the Markdown came from; relative image URLs resolve against it.
    pub base_url: Option<String>,
    pub images_dir: PathBuf,
    /// Run timestamp used in file names; now when unset.
    pub timestamp: Option<DateTime<Local>>,
    /// Renumber surviving files densely after downloads settle.
    pub compact: bool,
}

impl LocalizeOptions {
    pub fn new(images_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_url: None,
            images_dir: images_dir.into(),
            timestamp: None,
            compact: false,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Local>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn compact(mut self, compact: bool) -> Self {
        self.compact = compact;
        self
    }
}

/// `github.com/<owner>/<repo>/raw/<ref>/<path>` served from `raw.githubusercontent.com`.
pub fn rewrite_github_raw(url: &str) -> String {
    if url.contains("github.com") && url.contains("/raw/") {
        url.replacen("github.com", "raw.githubusercontent.com", 1)
            .replacen("/raw/", "/", 1)
    } else {
        url.to_string()
    }
}

fn host_of(url: &str) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
        .unwrap_or_default()
}

/// Whether images from `host` get their extension from content sniffing.
pub fn needs_sniffing(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    SNIFF_DOMAINS.iter().any(|(domain, wildcard)| {
        host == *domain || (*wildcard && host.ends_with(&format!(".{domain}")))
    })
}

/// Whether `host` refuses images without a page `Referer` and browser headers.
pub fn needs_referer(host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    host.contains("mp.weixin.qq.com") || host.ends_with(".qpic.cn") || host.contains("weixin") || host.contains("wechat")
}

fn request_headers(host: &str, referer: Option<&str>, user_agent: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if !needs_referer(host) {
        return headers;
    }
    if let Some(value) = referer.and_then(|r| HeaderValue::from_str(r).ok()) {
        headers.insert(REFERER, value);
    }
    let agent = user_agent.unwrap_or("Mozilla/5.0");
    if let Ok(value) = HeaderValue::from_str(agent) {
        headers.insert(USER_AGENT, value);
    }
    headers.insert(ACCEPT, HeaderValue::from_static(IMAGE_ACCEPT));
    headers
}

/// Absolute URL for the image reference captured in `raw`, or `None` for inline data.
fn resolve_reference(raw: &str, base: Option<&Url>) -> Option<String> {
    let token = raw.split_whitespace().next()?;
    let src = token.trim_matches(|c| matches!(c, '<' | '>' | '"' | '\''));
    if src.is_empty() || src.starts_with("data:") {
        return None;
    }
    let src = match src.strip_prefix("//") {
        Some(rest) => format!("{}://{rest}", base.map_or("https", |b| b.scheme())),
        None => src.to_string(),
    };
    match base {
        Some(base) => base.join(&src).ok().map(String::from),
        None => Url::parse(&src).ok().map(String::from),
    }
}

/// Every image URL referenced by `markdown`, deduplicated, in order of first appearance.
pub fn image_urls(markdown: &str, base_url: Option<&str>) -> Vec<String> {
    let base = base_url.and_then(|b| Url::parse(b).ok());
    let mut urls: Vec<String> = Vec::new();
    for pattern in [&*MARKDOWN_IMAGE, &*HTML_IMAGE] {
        for caps in pattern.captures_iter(markdown) {
            if let Some(url) = resolve_reference(&caps[1], base.as_ref()) {
                if !urls.contains(&url) {
                    urls.push(url);
                }
            }
        }
    }
    urls
}

fn url_extension(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let name = parsed.path_segments()?.next_back()?.to_string();
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(format!(".{}", ext.to_ascii_lowercase()))
}

#[derive(Debug, Clone)]
struct PlannedImage {
    url: String,
    stem: String,
    ext: String,
    headers: HeaderMap,
}

/// Where each successful download ended up: file name inside the images dir.
type Downloads = HashMap<String, String>;

/// Download the images of `markdown` into `options.images_dir` and rewrite their references.
///
/// Only directory creation problems and stop requests are errors; a failed image
/// keeps its remote URL.
pub async fn localize_images(
    markdown: &str,
    options: &LocalizeOptions,
    session: &HttpSession,
    stop: &StopCheck,
    logger: &dyn ConvertLogger,
) -> Result<String, ConvertError> {
    let base = options.base_url.as_deref().and_then(|b| Url::parse(b).ok());
    let urls = image_urls(markdown, options.base_url.as_deref());
    if urls.is_empty() {
        return Ok(markdown.to_string());
    }
    logger.images_found(urls.len());

    tokio::fs::create_dir_all(&options.images_dir)
        .await
        .map_err(|source| ImageError::CreateDir {
            path: options.images_dir.clone(),
            source,
        })?;

    let stamp = options.timestamp.unwrap_or_else(Local::now).format("%Y%m%d_%H%M%S").to_string();
    let plans: Vec<PlannedImage> = urls
        .iter()
        .enumerate()
        .map(|(index, url)| {
            let host = host_of(url);
            let ext = match url_extension(url) {
                Some(ext) if !needs_sniffing(&host) => ext,
                _ => UNKNOWN_EXT.to_string(),
            };
            PlannedImage {
                url: url.clone(),
                stem: format!("{stamp}_{:03}", index + 1),
                ext,
                headers: request_headers(&host, options.base_url.as_deref(), session.user_agent()),
            }
        })
        .collect();

    let mut downloads = download_all(&plans, &options.images_dir, session, stop, logger).await?;
    let saved = downloads.values().collect::<std::collections::HashSet<_>>().len();
    logger.images_done(saved, plans.len());
    engine_info!("localized {saved} distinct images out of {} references", plans.len());

    if options.compact {
        compact_names(&urls, &mut downloads, &options.images_dir, &stamp).await;
    }

    let dir_name = options
        .images_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "img".to_string());
    Ok(rewrite_references(markdown, base.as_ref(), &downloads, &dir_name))
}

/// [`localize_images`] for synchronous callers: runs on a scoped thread with its own runtime.
///
/// Also usable from inside a running runtime, whose thread blocks until the images are done.
pub fn localize_images_blocking(
    markdown: &str,
    options: &LocalizeOptions,
    session: &HttpSession,
    stop: &StopCheck,
    logger: &dyn ConvertLogger,
) -> Result<String, ConvertError> {
    std::thread::scope(|scope| {
        let worker = scope.spawn(|| {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|err| ImageError::Runtime(err.to_string()))?;
            runtime.block_on(localize_images(markdown, options, session, stop, logger))
        });
        worker
            .join()
            .map_err(|_| ConvertError::from(ImageError::Runtime("image worker panicked".to_string())))?
    })
}

async fn download_all(
    plans: &[PlannedImage],
    dir: &Path,
    session: &HttpSession,
    stop: &StopCheck,
    logger: &dyn ConvertLogger,
) -> Result<Downloads, ConvertError> {
    let total = plans.len();
    let hashes: Mutex<HashMap<[u8; 32], String>> = Mutex::new(HashMap::new());
    let concurrency = session.settings().image_concurrency.max(1);
    logger.images_progress(0, total);

    let mut results = stream::iter(plans)
        .map(|plan| download_one(plan, dir, session, stop, &hashes))
        .buffer_unordered(concurrency);

    let mut downloads = Downloads::new();
    let mut done = 0;
    while let Some(outcome) = results.next().await {
        done += 1;
        logger.images_progress(done, total);
        if let Some((url, name)) = outcome? {
            downloads.insert(url, name);
        }
    }
    Ok(downloads)
}

/// `Ok(None)` when the image could not be fetched or stored.
async fn download_one(
    plan: &PlannedImage,
    dir: &Path,
    session: &HttpSession,
    stop: &StopCheck,
    hashes: &Mutex<HashMap<[u8; 32], String>>,
) -> Result<Option<(String, String)>, ConvertError> {
    stop.check()?;
    let fetch_url = rewrite_github_raw(&plan.url);
    let timeout = session.settings().image_timeout;
    let bytes = match session.get_bytes(&fetch_url, plan.headers.clone(), timeout).await {
        Ok(bytes) => bytes,
        Err(err) => {
            engine_warn!("image download failed for {fetch_url}: {err}");
            return Ok(None);
        }
    };

    let digest: [u8; 32] = Sha256::digest(&bytes).into();
    let ext = if plan.ext == UNKNOWN_EXT {
        sniff_image_extension(&bytes).unwrap_or(UNKNOWN_EXT)
    } else {
        plan.ext.as_str()
    };
    let name = format!("{}{ext}", plan.stem);

    let mut seen = hashes.lock().await;
    if let Some(existing) = seen.get(&digest) {
        engine_debug!("{} duplicates {existing}", plan.url);
        return Ok(Some((plan.url.clone(), existing.clone())));
    }
    let target = dir.join(&name);
    let partial = dir.join(format!("{name}.part"));
    let stored = async {
        tokio::fs::write(&partial, &bytes).await?;
        tokio::fs::rename(&partial, &target).await
    }
    .await;
    if let Err(err) = stored {
        engine_warn!("could not store image {}: {err}", target.display());
        let _ = tokio::fs::remove_file(&partial).await;
        return Ok(None);
    }
    seen.insert(digest, name.clone());
    Ok(Some((plan.url.clone(), name)))
}

/// Renumber the stored files densely in order of first reference. Missing files are skipped.
async fn compact_names(urls: &[String], downloads: &mut Downloads, dir: &Path, stamp: &str) {
    let mut ordered: Vec<String> = Vec::new();
    for url in urls {
        if let Some(name) = downloads.get(url) {
            if !ordered.contains(name) {
                ordered.push(name.clone());
            }
        }
    }

    let mut renames: Vec<(String, String)> = Vec::new();
    let mut next = 1;
    for name in ordered {
        if !tokio::fs::try_exists(dir.join(&name)).await.unwrap_or(false) {
            engine_debug!("{name} vanished before renumbering, skipping");
            continue;
        }
        let ext = Path::new(&name)
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_else(|| UNKNOWN_EXT.to_string());
        let renamed = format!("{stamp}_{next:03}{ext}");
        next += 1;
        if renamed != name {
            renames.push((name, renamed));
        }
    }

    let mut staged: Vec<(String, String)> = Vec::new();
    for (old, new) in renames {
        let temp = dir.join(format!("{old}{RESEQ_SUFFIX}"));
        match tokio::fs::rename(dir.join(&old), &temp).await {
            Ok(()) => staged.push((old, new)),
            Err(err) => engine_debug!("skipping renumbering of {old}: {err}"),
        }
    }
    let mut applied: HashMap<String, String> = HashMap::new();
    for (old, new) in staged {
        let temp = dir.join(format!("{old}{RESEQ_SUFFIX}"));
        match tokio::fs::rename(&temp, dir.join(&new)).await {
            Ok(()) => {
                applied.insert(old, new);
            }
            Err(err) => engine_warn!("could not renumber {old} to {new}: {err}"),
        }
    }
    for name in downloads.values_mut() {
        if let Some(new) = applied.get(name) {
            *name = new.clone();
        }
    }
}

fn rewrite_references(markdown: &str, base: Option<&Url>, downloads: &Downloads, dir_name: &str) -> String {
    let local = |raw: &str| -> Option<String> {
        let url = resolve_reference(raw, base)?;
        downloads.get(&url).map(|name| format!("{dir_name}/{name}"))
    };

    let rewritten = MARKDOWN_IMAGE.replace_all(markdown, |caps: &Captures| match local(&caps[1]) {
        Some(path) => {
            let alt = MARKDOWN_ALT
                .captures(&caps[0])
                .map(|alt| alt[1].to_string())
                .unwrap_or_default();
            format!("![{alt}]({path})")
        }
        None => caps[0].to_string(),
    });
    HTML_IMAGE
        .replace_all(&rewritten, |caps: &Captures| {
            let tag = &caps[0];
            match (caps.get(0), caps.get(1), local(&caps[1])) {
                (Some(whole), Some(src), Some(path)) => {
                    let (start, end) = (src.start() - whole.start(), src.end() - whole.start());
                    format!("{}{path}{}", &tag[..start], &tag[end..])
                }
                _ => tag.to_string(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn references_resolve_against_the_page() {
        let md = r#"![a](/img/a.png "cap") ![b](//cdn.test/b.jpg) ![c](data:image/png;base64,AAA)
<img class="x" src="rel/c.gif"> ![again](https://blog.test/img/a.png)"#;
        assert_eq!(
            image_urls(md, Some("https://blog.test/post/1")),
            vec![
                "https://blog.test/img/a.png",
                "https://cdn.test/b.jpg",
                "https://blog.test/post/rel/c.gif",
            ]
        );
        assert!(image_urls("![x](relative.png)", None).is_empty());
    }

    #[test]
    fn cdn_rules_are_static_data() {
        assert!(needs_sniffing("pic1.zhimg.com"));
        assert!(needs_sniffing("mmbiz.qpic.cn"));
        assert!(!needs_sniffing("other.qpic.cn"));
        assert!(needs_referer("mmbiz.qpic.cn"));
        assert!(!needs_referer("example.com"));

        let headers = request_headers("mmbiz.qpic.cn", Some("https://mp.weixin.qq.com/s/x"), None);
        assert_eq!(headers.get(REFERER).unwrap(), "https://mp.weixin.qq.com/s/x");
        assert_eq!(headers.get(USER_AGENT).unwrap(), "Mozilla/5.0");
        assert!(request_headers("example.com", Some("https://x.test"), Some("ua")).is_empty());
    }

    #[test]
    fn github_raw_links_use_the_content_host() {
        assert_eq!(
            rewrite_github_raw("https://github.com/o/r/raw/main/docs/a.png"),
            "https://raw.githubusercontent.com/o/r/main/docs/a.png"
        );
        assert_eq!(rewrite_github_raw("https://x.test/raw/a.png"), "https://x.test/raw/a.png");
    }

    #[test]
    fn extensions_come_from_the_last_path_segment() {
        assert_eq!(url_extension("https://x.test/a/b.PNG?x=1").as_deref(), Some(".png"));
        assert_eq!(url_extension("https://x.test/a/b"), None);
        assert_eq!(url_extension("https://x.test/a.dir/b"), None);
    }

    #[test]
    fn rewriting_keeps_alt_text_and_failed_urls() {
        let mut downloads = Downloads::new();
        downloads.insert("https://x.test/a.png".to_string(), "s_001.png".to_string());
        let md = "![alt](https://x.test/a.png \"t\") ![b](https://x.test/b.png) <img src=\"https://x.test/a.png\">";
        assert_eq!(
            rewrite_references(md, None, &downloads, "img"),
            "![alt](img/s_001.png) ![b](https://x.test/b.png) <img src=\"img/s_001.png\">"
        );
    }

    #[test]
    fn only_the_src_attribute_of_a_tag_is_rewritten() {
        let mut downloads = Downloads::new();
        downloads.insert("https://x.test/a.png".to_string(), "s_001.png".to_string());
        let lazy = r#"<img data-src="https://x.test/a.png" src="https://x.test/a.png">"#;
        assert_eq!(
            rewrite_references(lazy, None, &downloads, "img"),
            r#"<img data-src="https://x.test/a.png" src="img/s_001.png">"#
        );
        let trailing = r#"<img src="https://x.test/a.png" data-src="https://x.test/b.png">"#;
        assert_eq!(
            rewrite_references(trailing, None, &downloads, "img"),
            r#"<img src="img/s_001.png" data-src="https://x.test/b.png">"#
        );
        assert_eq!(image_urls(trailing, None), vec!["https://x.test/a.png"]);
    }
}
