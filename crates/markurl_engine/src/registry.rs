//! URL dispatch and the post-handler policy shared by every site.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use engine_logging::{engine_debug, engine_info, engine_warn};

use crate::browser::{BrowserLauncher, BrowserSession};
use crate::chromium::ChromiumLauncher;
use crate::decode::decode_html;
use crate::extract::{Extractor, ReadabilityLikeExtractor};
use crate::fetch::HttpSession;
use crate::filename::derive_md_filename;
use crate::handlers::{
    AppinnHandler, GenericHandler, HandlerContext, NextJsHandler, SiteHandler, SspaiHandler,
    WeixinHandler, WordPressHandler, ZhihuHandler,
};
use crate::images::{localize_images, LocalizeOptions};
use crate::logger::ConvertLogger;
use crate::markdown::MarkdownConverter;
use crate::normalize::normalize_markdown_headings;
use crate::stop::StopCheck;
use crate::{ConversionOptions, ConvertError, ConvertResult, FetchResult, SourceKind, SourceRequest};

/// Image directory name used next to the output file.
pub const IMAGES_DIR_NAME: &str = "img";

/// Per-request context handed to the registry together with the source.
#[derive(Clone, Copy)]
pub struct PayloadMeta<'a> {
    pub logger: &'a dyn ConvertLogger,
    pub stop: &'a StopCheck,
    pub out_dir: Option<&'a Path>,
    /// Defaults to `<out_dir>/img`.
    pub images_dir: Option<&'a Path>,
    pub shared_browser: Option<&'a dyn BrowserSession>,
}

impl<'a> PayloadMeta<'a> {
    pub fn new(logger: &'a dyn ConvertLogger, stop: &'a StopCheck) -> Self {
        Self {
            logger,
            stop,
            out_dir: None,
            images_dir: None,
            shared_browser: None,
        }
    }

    pub fn with_out_dir(mut self, out_dir: &'a Path) -> Self {
        self.out_dir = Some(out_dir);
        self
    }

    pub fn with_images_dir(mut self, images_dir: &'a Path) -> Self {
        self.images_dir = Some(images_dir);
        self
    }

    pub fn with_shared_browser(mut self, browser: Option<&'a dyn BrowserSession>) -> Self {
        self.shared_browser = browser;
        self
    }

    fn images_dir(&self) -> Option<PathBuf> {
        self.images_dir
            .map(Path::to_path_buf)
            .or_else(|| self.out_dir.map(|dir| dir.join(IMAGES_DIR_NAME)))
    }
}

pub struct ConvertPayload<'a> {
    pub kind: SourceKind,
    pub value: &'a str,
    pub meta: PayloadMeta<'a>,
}

impl<'a> ConvertPayload<'a> {
    pub fn new(request: &'a SourceRequest, meta: PayloadMeta<'a>) -> Self {
        Self {
            kind: request.kind,
            value: &request.value,
            meta,
        }
    }
}

/// Ordered site handlers plus the generic fallback.
pub struct Registry {
    handlers: Vec<Box<dyn SiteHandler>>,
    fallback: Box<dyn SiteHandler>,
    launcher: Arc<dyn BrowserLauncher>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Arc::new(ChromiumLauncher))
    }
}

impl Registry {
    /// Built-in handlers, first match wins.
    pub fn new(launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self::with_handlers(
            vec![
                Box::new(WeixinHandler),
                Box::new(ZhihuHandler),
                Box::new(WordPressHandler),
                Box::new(NextJsHandler),
                Box::new(SspaiHandler),
                Box::new(AppinnHandler),
            ],
            Box::new(GenericHandler),
            launcher,
        )
    }

    pub fn with_handlers(
        handlers: Vec<Box<dyn SiteHandler>>,
        fallback: Box<dyn SiteHandler>,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self {
            handlers,
            fallback,
            launcher,
        }
    }

    pub fn launcher(&self) -> &dyn BrowserLauncher {
        self.launcher.as_ref()
    }

    pub fn handler_for(&self, url: &str) -> &dyn SiteHandler {
        self.handlers
            .iter()
            .find(|handler| handler.matches(url))
            .map(|handler| handler.as_ref())
            .unwrap_or(self.fallback.as_ref())
    }

    /// Whether the handler for `url` profits from a warm shared browser.
    pub fn should_use_shared_browser(&self, url: &str) -> bool {
        self.handler_for(url).prefers_shared_browser()
    }

    pub async fn convert(
        &self,
        payload: &ConvertPayload<'_>,
        session: &HttpSession,
        options: &ConversionOptions,
    ) -> Result<ConvertResult, ConvertError> {
        payload.meta.stop.check()?;
        match payload.kind {
            SourceKind::Url => self.convert_url(payload, session, options).await,
            SourceKind::Html => {
                let (title, markdown) = html_to_markdown(payload.value, None);
                finish(payload, session, options, title, markdown, None, "html").await
            }
            SourceKind::File => convert_file(payload, session, options).await,
        }
    }

    async fn convert_url(
        &self,
        payload: &ConvertPayload<'_>,
        session: &HttpSession,
        options: &ConversionOptions,
    ) -> Result<ConvertResult, ConvertError> {
        let url = payload.value;
        let meta = &payload.meta;
        let cx = HandlerContext {
            url,
            session,
            options,
            logger: meta.logger,
            stop: meta.stop,
            shared_browser: meta.shared_browser,
            launcher: self.launcher.as_ref(),
        };

        let handler = self.handler_for(url);
        engine_info!("{url} -> {} handler", handler.name());
        let mut outcome = attempt(handler, &cx).await?;

        if let Err(reason) = &outcome {
            if handler.name() != self.fallback.name() {
                meta.logger
                    .warning(&format!("{} result rejected ({reason}); using the generic pipeline", handler.name()));
                outcome = attempt(self.fallback.as_ref(), &cx).await?;
            }
        }

        match outcome {
            Ok(result) => {
                let FetchResult { title, content, .. } = result;
                finish(payload, session, options, title, content, Some(url), url).await
            }
            Err(reason) => Err(ConvertError::Exhausted {
                handler: self.fallback.name().to_string(),
                reason,
            }),
        }
    }
}

/// Runs one handler and applies its acceptance rule. Only a stop request is an `Err`.
async fn attempt(
    handler: &dyn SiteHandler,
    cx: &HandlerContext<'_>,
) -> Result<Result<FetchResult, String>, ConvertError> {
    match handler.fetch(cx).await {
        Ok(result) => Ok(handler
            .acceptance()
            .evaluate(&result)
            .map(|()| result)
            .map_err(|rejection| rejection.to_string())),
        Err(err) if err.is_stop() => Err(err),
        Err(err) => {
            engine_warn!("{} handler failed: {err}", handler.name());
            Ok(Err(err.to_string()))
        }
    }
}

/// Normalize, localize images, name the file.
async fn finish(
    payload: &ConvertPayload<'_>,
    session: &HttpSession,
    options: &ConversionOptions,
    title: Option<String>,
    content: String,
    base_url: Option<&str>,
    name_hint: &str,
) -> Result<ConvertResult, ConvertError> {
    let meta = &payload.meta;
    let now = Local::now();
    let mut markdown = normalize_markdown_headings(&content, title.as_deref());

    if options.download_images {
        if let Some(images_dir) = meta.images_dir() {
            let mut localize = LocalizeOptions::new(images_dir)
                .compact(session.settings().compact_image_names)
                .with_timestamp(now);
            if let Some(base) = base_url {
                localize = localize.with_base_url(base);
            }
            match localize_images(&markdown, &localize, session, meta.stop, meta.logger).await {
                Ok(localized) => markdown = localized,
                Err(err) if err.is_stop() => return Err(err),
                Err(err) => meta.logger.warning(&format!("keeping remote images: {err}")),
            }
        } else {
            engine_debug!("no output directory; images stay remote");
        }
    }

    let suggested_filename = derive_md_filename(title.as_deref(), name_hint, now);
    if let Some(title) = &title {
        meta.logger.url_success(title);
    } else {
        meta.logger.url_success(&suggested_filename);
    }
    Ok(ConvertResult {
        title,
        markdown,
        suggested_filename,
    })
}

/// Title and Markdown of a whole HTML document.
fn html_to_markdown(html: &str, base_url: Option<&str>) -> (Option<String>, String) {
    let extracted = ReadabilityLikeExtractor.extract(html);
    let mut converter = MarkdownConverter::new();
    if let Some(base) = base_url {
        converter = converter.with_base_url(base);
    }
    (extracted.title, converter.convert_html(&extracted.content_html))
}

async fn convert_file(
    payload: &ConvertPayload<'_>,
    session: &HttpSession,
    options: &ConversionOptions,
) -> Result<ConvertResult, ConvertError> {
    let path = Path::new(payload.value);
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| ConvertError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let is_html = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"));

    let (title, markdown) = if is_html {
        let decoded = decode_html(&bytes, None).map_err(|err| ConvertError::Read {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
        })?;
        html_to_markdown(&decoded.html, None)
    } else {
        let text = String::from_utf8_lossy(&bytes).into_owned();
        (first_heading(&text), text)
    };
    finish(payload, session, options, title, markdown, None, &stem).await
}

fn first_heading(markdown: &str) -> Option<String> {
    markdown.lines().find_map(|line| {
        let rest = line.trim_start().strip_prefix('#')?;
        let text = rest.trim_start_matches('#');
        if !text.starts_with(char::is_whitespace) {
            return None;
        }
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    })
}
