//! Tus Uploadr - resumable uploads over the tus protocol
//!
//! Uploads one file and prints the upload URL. Interrupted uploads resume
//! from the server's offset on the next run.

use anyhow::{bail, Context};
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tus_uploadr::config::Config;
use tus_uploadr::source::{ChunkSource, FileSource};
use tus_uploadr::storage::{fingerprint, FileUrlStorage, UrlStorage};
use tus_uploadr::transport::HttpTransport;
use tus_uploadr::upload::{BlockingUploader, LogProgress, UploadError, Uploader};
use tus_uploadr::{logging, metrics, VERSION};

/// Tus Uploadr - resumable file uploads to any tus 1.0.0 server
#[derive(Parser, Debug)]
#[command(name = "tus-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// File to upload
    file: PathBuf,

    /// Creation endpoint (overrides the config file)
    #[arg(short, long)]
    endpoint: Option<String>,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bytes per chunk
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Recovery attempts per chunk
    #[arg(long)]
    retries: Option<u32>,

    /// Wait before each recovery attempt, in milliseconds
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Stop once this many bytes are persisted
    #[arg(long)]
    stop_at: Option<u64>,

    /// Upload metadata entry (key=value), repeatable
    #[arg(short, long = "metadata", value_parser = parse_metadata)]
    metadata: Vec<(String, String)>,

    /// Extra request header ('Name: value'), repeatable
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Resume this upload URL instead of creating a new resource
    #[arg(long)]
    resume_url: Option<Url>,

    /// Do not remember the upload URL between runs
    #[arg(long)]
    no_store: bool,

    /// Use the blocking uploader
    #[arg(long)]
    blocking: bool,

    /// Print Prometheus metrics after the upload
    #[arg(long)]
    print_metrics: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,
}

fn parse_metadata(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

fn parse_header(s: &str) -> Result<(String, String), String> {
    match s.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected 'Name: value', got '{}'", s)),
    }
}

/// Config file (or defaults) with command line overrides applied
fn load_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => Config::default(),
    };

    if let Some(endpoint) = &args.endpoint {
        config.endpoint = Some(endpoint.clone());
    }
    if let Some(chunk_size) = args.chunk_size {
        config.upload.chunk_size = chunk_size;
    }
    if let Some(retries) = args.retries {
        config.upload.retries = retries;
    }
    if let Some(retry_delay_ms) = args.retry_delay_ms {
        config.upload.retry_delay_ms = retry_delay_ms;
    }
    config.metadata.extend(args.metadata.iter().cloned());
    config.headers.extend(args.headers.iter().cloned());
    if args.no_store {
        config.upload.store_url = false;
    }

    config.validate()?;
    Ok(config)
}

/// Where the resume URL came from
enum ResumePoint {
    Explicit(Url),
    Stored(Url),
}

/// Decide whether a failed resume aborts the run
///
/// A stored URL the server answered for but no longer knows is dropped and a
/// new upload is created. Transport failures keep the entry for the next run,
/// and an explicit `--resume-url` must work.
fn check_resume(
    result: Result<u64, UploadError>,
    resume: &ResumePoint,
    storage: Option<&(Arc<dyn UrlStorage>, String)>,
) -> anyhow::Result<()> {
    match (result, resume) {
        (Ok(offset), _) => {
            info!(offset, "Resuming upload");
            Ok(())
        }
        (
            Err(e @ UploadError::CommunicationError {
                status: Some(_), ..
            }),
            ResumePoint::Stored(url),
        ) => {
            warn!(error = %e, upload_url = %url, "Stored upload URL is not usable, starting a new upload");
            if let Some((storage, key)) = storage {
                storage.remove_url(key)?;
            }
            Ok(())
        }
        (Err(e), _) => Err(e).context("Failed to resume upload"),
    }
}

fn run_blocking(
    mut uploader: BlockingUploader<HttpTransport, FileSource>,
    resume: Option<ResumePoint>,
    storage: Option<&(Arc<dyn UrlStorage>, String)>,
    stop_at: Option<u64>,
    label: String,
) -> anyhow::Result<(Option<Url>, u64)> {
    if let Some(resume) = resume {
        let url = match &resume {
            ResumePoint::Explicit(url) | ResumePoint::Stored(url) => url.clone(),
        };
        check_resume(uploader.resume_from(url), &resume, storage)?;
    }

    uploader.upload_with_progress(stop_at, &mut LogProgress::new(label))?;
    Ok((uploader.upload_url().cloned(), uploader.offset()))
}

fn run_async(
    mut uploader: Uploader<HttpTransport, FileSource>,
    resume: Option<ResumePoint>,
    storage: Option<&(Arc<dyn UrlStorage>, String)>,
    stop_at: Option<u64>,
    label: String,
) -> anyhow::Result<(Option<Url>, u64)> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let token = CancellationToken::new();
        let interrupt = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping after the current chunk");
                interrupt.cancel();
            }
        });
        uploader = uploader.with_cancellation(token);

        if let Some(resume) = resume {
            let url = match &resume {
                ResumePoint::Explicit(url) | ResumePoint::Stored(url) => url.clone(),
            };
            check_resume(uploader.resume_from(url).await, &resume, storage)?;
        }

        uploader
            .upload_with_progress(stop_at, &mut LogProgress::new(label))
            .await?;
        Ok::<_, anyhow::Error>((uploader.upload_url().cloned(), uploader.offset()))
    })
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    logging::init_subscriber(&args.log_level, args.json_logs)?;
    info!("Starting Tus Uploadr v{}", VERSION);

    let config = load_config(&args)?;
    let Some(endpoint) = config.endpoint_url()? else {
        bail!("No endpoint configured: pass --endpoint or set `endpoint` in the config file");
    };
    let options = config.upload_options()?;
    let transport = HttpTransport::new(config.transport_config())?;

    let mut source = FileSource::open(&args.file)
        .with_context(|| format!("Failed to open {:?}", args.file))?;
    let size = source.total_size()?;

    let storage: Option<(Arc<dyn UrlStorage>, String)> = if config.upload.store_url {
        let key = fingerprint(&mut source)?;
        let storage: Arc<dyn UrlStorage> = Arc::new(FileUrlStorage::new(&config.storage.path));
        Some((storage, key))
    } else {
        None
    };

    let resume = match (&args.resume_url, &storage) {
        (Some(url), _) => Some(ResumePoint::Explicit(url.clone())),
        (None, Some((storage, key))) => storage.get_url(key)?.map(ResumePoint::Stored),
        (None, None) => None,
    };

    info!(file = ?args.file, size, endpoint = %endpoint, "Uploading");

    let mut uploader = Uploader::new(transport, endpoint, source, options)?;
    if let Some((storage, key)) = &storage {
        uploader = uploader.with_url_storage(storage.clone(), key.clone());
    }

    let label = args.file.display().to_string();
    let (upload_url, offset) = if args.blocking {
        run_blocking(
            BlockingUploader::from_uploader(uploader)?,
            resume,
            storage.as_ref(),
            args.stop_at,
            label,
        )?
    } else {
        run_async(uploader, resume, storage.as_ref(), args.stop_at, label)?
    };

    if offset == size {
        info!(offset, "Upload complete");
        if let Some((storage, key)) = &storage {
            storage.remove_url(key)?;
        }
    } else {
        info!(offset, size, "Upload stopped before the end of the file");
    }

    if let Some(url) = upload_url {
        println!("{}", url);
    }

    if args.print_metrics {
        print!("{}", metrics::render());
    }

    Ok(())
}
