mod logging;

use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc};

use anyhow::{bail, Context, Result};
use clap::Parser;
use engine_logging::engine_info;
use markurl_engine::{
    Batch, ChannelSignal, ConversionOptions, ConvertService, EventKind, FetchSettings,
    FsMarkdownWriter, ProgressEvent, Registry, SourceKind, SourceRequest, UnavailableLauncher,
    UrlJournal,
};

use crate::logging::LogDestination;

/// Convert web pages, HTML files and Markdown files into normalized Markdown.
#[derive(Parser, Debug)]
#[command(name = "markurl", version, arg_required_else_help = true)]
struct Cli {
    /// URLs (http:// or https://) and file paths to convert, in order.
    #[arg(required = true)]
    sources: Vec<String>,

    /// Directory the Markdown files (and their img/ folder) are written to.
    #[arg(short, long, default_value = "output")]
    out_dir: PathBuf,

    /// Skip TLS certificate verification.
    #[arg(long)]
    ignore_ssl: bool,

    /// Honor HTTP_PROXY / HTTPS_PROXY.
    #[arg(long)]
    use_proxy: bool,

    /// Keep images as remote links.
    #[arg(long)]
    no_images: bool,

    /// Strip navigation, sidebars and comments before extracting unknown sites.
    #[arg(long)]
    filter_site_chrome: bool,

    /// Launch a fresh browser per request instead of sharing one.
    #[arg(long)]
    no_shared_browser: bool,

    /// Never start a browser; HTTP strategies only.
    #[arg(long)]
    no_browser: bool,

    /// Renumber downloaded images without gaps after deduplication.
    #[arg(long)]
    compact_images: bool,

    /// Where log lines go.
    #[arg(long, value_enum, default_value = "terminal")]
    log: LogDestination,

    /// Log file used by `--log file|both`.
    #[arg(long, default_value = "markurl.log")]
    log_file: PathBuf,

    /// Append submitted URLs to a daily journal in this directory.
    #[arg(long)]
    journal_dir: Option<PathBuf>,

    /// Debug-level logging.
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::initialize(cli.log, &cli.log_file, cli.verbose);

    let requests = cli
        .sources
        .iter()
        .map(|source| classify_source(source))
        .collect::<Result<Vec<_>>>()?;

    if let Some(dir) = &cli.journal_dir {
        let urls: Vec<&str> = requests
            .iter()
            .filter(|request| request.kind == SourceKind::Url)
            .map(|request| request.value.as_str())
            .collect();
        UrlJournal::new(dir)
            .append(&urls)
            .with_context(|| format!("writing the URL journal in {}", dir.display()))?;
    }

    let options = ConversionOptions {
        ignore_ssl: cli.ignore_ssl,
        use_proxy: cli.use_proxy,
        download_images: !cli.no_images,
        filter_site_chrome: cli.filter_site_chrome,
        use_shared_browser: !cli.no_shared_browser && !cli.no_browser,
    };
    let settings = FetchSettings {
        compact_image_names: cli.compact_images,
        ..FetchSettings::default()
    };
    let registry = if cli.no_browser {
        Registry::new(Arc::new(UnavailableLauncher))
    } else {
        Registry::default()
    };
    let service = ConvertService::new(Arc::new(registry), Arc::new(FsMarkdownWriter), settings);

    let (tx, rx) = mpsc::channel();
    let batch = Batch::new(requests, &cli.out_dir, options, Arc::new(print_event))
        .with_signal(Arc::new(ChannelSignal::new(tx)));
    engine_info!("converting {} sources into {}", cli.sources.len(), cli.out_dir.display());
    if !service.run(batch) {
        bail!("could not start the conversion worker");
    }

    // The sender lives in the batch; the loop ends when the worker drops it.
    for event in rx {
        print_event(event);
    }

    let summary = service
        .wait()
        .context("conversion worker ended without a summary")?;
    println!(
        "{} succeeded, {} failed, {} total",
        summary.succeeded, summary.failed, summary.total
    );
    if summary.stopped {
        bail!("conversion stopped");
    }
    if summary.failed > 0 {
        bail!("{} of {} sources failed", summary.failed, summary.total);
    }
    Ok(())
}

fn classify_source(source: &str) -> Result<SourceRequest> {
    let trimmed = source.trim();
    let lower = trimmed.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Ok(SourceRequest::url(trimmed));
    }
    let path = Path::new(trimmed);
    if path.is_file() {
        return Ok(SourceRequest::file(path));
    }
    bail!("{source:?} is neither an http(s) URL nor an existing file")
}

fn print_event(event: ProgressEvent) {
    if let Some(line) = describe_event(&event) {
        println!("{line}");
    }
}

fn describe_event(event: &ProgressEvent) -> Option<String> {
    let data = event.data.as_ref();
    let field = |name: &str| {
        data.and_then(|d| d.get(name))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    match event.kind {
        EventKind::Status => event.text.clone().or_else(|| event.key.clone()),
        EventKind::Detail => match event.key.as_deref() {
            Some("warning") => field("message").map(|m| format!("warning: {m}")),
            Some("browser_unavailable") => event.text.as_ref().map(|t| format!("browser unavailable: {t}")),
            _ => None,
        },
        EventKind::ProgressInit => event.total.map(|total| format!("{total} sources queued")),
        EventKind::ProgressStep => {
            let position = format!(
                "[{}/{}]",
                event.current.unwrap_or_default(),
                event.total.unwrap_or_default()
            );
            match (field("path"), field("error")) {
                (Some(path), _) => Some(format!("{position} saved {path}")),
                (None, Some(error)) => Some(format!("{position} failed: {error}")),
                (None, None) => Some(position),
            }
        }
        EventKind::ProgressDone => None,
        EventKind::Stopped => Some("stopped".to_string()),
        EventKind::Error => event.text.as_ref().map(|t| format!("error: {t}")),
    }
}
