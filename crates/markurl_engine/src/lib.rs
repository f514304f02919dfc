//! Markurl engine: turns web pages, HTML and Markdown sources into normalized Markdown files.
mod types;

pub mod browser;
pub mod chromium;
pub mod clean;
pub mod decode;
pub mod events;
pub mod extract;
pub mod fetch;
pub mod filename;
pub mod handlers;
pub mod header;
pub mod images;
pub mod journal;
pub mod logger;
pub mod markdown;
pub mod normalize;
pub mod persist;
pub mod registry;
pub mod service;
pub mod sniff;
pub mod stop;
pub mod strategy;

pub use browser::{BrowserError, BrowserLauncher, BrowserPage, BrowserSession, UnavailableLauncher};
pub use chromium::ChromiumLauncher;
pub use decode::{decode_html, DecodeError, DecodedHtml};
pub use events::{ChannelSignal, EventCallback, EventDispatcher, ProgressSignal};
pub use extract::{ExtractedContent, Extractor, ReadabilityLikeExtractor};
pub use fetch::{build_session, ClientChoices, FetchSettings, HttpSession};
pub use filename::{derive_md_filename, sanitize_filename};
pub use images::{localize_images, localize_images_blocking, ImageError, LocalizeOptions};
pub use journal::UrlJournal;
pub use logger::{ConvertLogger, EventLogger, NullLogger};
pub use normalize::normalize_markdown_headings;
pub use persist::{ensure_output_dir, FsMarkdownWriter, MarkdownWriter, PersistError};
pub use registry::{ConvertPayload, PayloadMeta, Registry};
pub use service::{Batch, BatchSummary, ConvertService};
pub use stop::StopCheck;
pub use strategy::RetryPolicy;
pub use types::{
    ConversionOptions, ConvertError, ConvertResult, EventKind, FailureKind, FetchError, FetchResult,
    ProgressEvent, SourceKind, SourceRequest,
};
