use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use capture_scheduler::config::{self, Config};
use capture_scheduler::generative::{
    preset_instruction, GenerativeClient, InlineMedia, RewriteTarget, RewriteTone,
};
use capture_scheduler::import::import_csv;
use capture_scheduler::media::normalize_mime;
use capture_scheduler::model::{BulkScheduleRequest, PUBLISH_NOW_LEAD_SECONDS};
use capture_scheduler::orchestrator::BulkScheduler;
use capture_scheduler::scheduler::{AlbumRequest, MediaRef, PostScheduler, ScheduleRequest};
use capture_scheduler::store::CaptureStore;
use capture_scheduler::transport::{HttpTransport, ReqwestTransport};
use capture_scheduler::uploader::MediaSource;

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List channels available to the API key
    Channels,
    /// Upload a local file or URL and print its storage id
    Upload { source: String },
    /// Schedule a single post; repeat --media for an album
    Schedule {
        #[arg(long)]
        caption: String,
        #[arg(long)]
        media: Vec<String>,
        #[arg(long)]
        storage_id: Option<String>,
        #[arg(long)]
        title: Option<String>,
        #[arg(long = "channel")]
        channels: Vec<String>,
        /// RFC 3339 time; defaults to now plus the configured delay
        #[arg(long, conflicts_with = "now")]
        at: Option<DateTime<Utc>>,
        /// Publish 30 seconds from now
        #[arg(long)]
        now: bool,
        #[arg(long)]
        draft: bool,
    },
    /// Schedule every item of a store category
    Bulk {
        #[arg(long)]
        store: PathBuf,
        #[arg(long)]
        category: String,
        #[arg(long, conflicts_with = "now")]
        start: Option<DateTime<Utc>>,
        /// Minutes between posts
        #[arg(long, conflicts_with = "now")]
        interval: Option<NonZeroU32>,
        /// Start 30 seconds from now, one minute apart
        #[arg(long)]
        now: bool,
        #[arg(long = "channel")]
        channels: Vec<String>,
        /// Remove the category's items when every item succeeded
        #[arg(long)]
        purge: bool,
    },
    /// Append rows of `imageUrl,caption,title,category` to the store
    ImportCsv {
        #[arg(long)]
        store: PathBuf,
        file: PathBuf,
    },
    /// Rewrite text with the generative service
    Rewrite {
        #[arg(long)]
        text: String,
        /// Free-form instruction; overrides --target/--tone
        #[arg(long)]
        instruction: Option<String>,
        #[arg(long, value_enum, default_value_t = Target::Caption)]
        target: Target,
        #[arg(long, value_enum, default_value_t = Tone::Engaging)]
        tone: Tone,
        /// Local image or video used as context
        #[arg(long)]
        media: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Target {
    Title,
    Caption,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Tone {
    Engaging,
    Shorten,
    Professional,
    Casual,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))
        .with_context(|| format!("loading {}", args.config.display()))?;
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);

    match args.command {
        Command::Channels => {
            let scheduler = PostScheduler::from_config(&cfg.posting, transport)?;
            let mut channels = scheduler.api().list_channels().await?;
            for channel in &mut channels {
                if channel.platform.is_none() {
                    channel.platform = cfg.posting.platform_of(&channel.id).map(str::to_string);
                }
            }
            print_json(&channels)?;
        }
        Command::Upload { source } => {
            let scheduler = PostScheduler::from_config(&cfg.posting, transport)?;
            let uploaded = scheduler.upload(media_source(&source).await?).await?;
            print_json(&uploaded)?;
        }
        Command::Schedule {
            caption,
            media,
            storage_id,
            title,
            channels,
            at,
            now,
            draft,
        } => {
            let scheduler = PostScheduler::from_config(&cfg.posting, transport)?;
            let channel_ids = channels_or_default(&cfg, channels)?;
            let schedule_at = if now {
                Utc::now() + ChronoDuration::seconds(PUBLISH_NOW_LEAD_SECONDS)
            } else {
                at.unwrap_or_else(|| default_start(&cfg))
            };
            if media.len() > 1 {
                let mut sources = Vec::with_capacity(media.len());
                for m in &media {
                    sources.push(media_source(m).await?);
                }
                let handle = scheduler
                    .schedule_album(AlbumRequest {
                        sources,
                        caption,
                        channel_ids,
                        schedule_at,
                        title,
                    })
                    .await?;
                print_json(&handle)?;
            } else {
                let media = match (storage_id, media.first()) {
                    (Some(id), _) => MediaRef::StorageId(id),
                    (None, Some(m)) => MediaRef::Source(media_source(m).await?),
                    (None, None) => MediaRef::None,
                };
                let handle = scheduler
                    .schedule(ScheduleRequest {
                        media,
                        caption,
                        channel_ids,
                        schedule_at,
                        title,
                        is_draft: draft,
                    })
                    .await?;
                print_json(&handle)?;
            }
        }
        Command::Bulk {
            store,
            category,
            start,
            interval,
            now,
            channels,
            purge,
        } => {
            let scheduler = PostScheduler::from_config(&cfg.posting, transport)?;
            let mut store = CaptureStore::load(&store).await?;
            let items = store.items(&category).to_vec();
            if items.is_empty() {
                warn!(category = %category, "no items in category");
            }
            let channel_ids = channels_or_default(&cfg, channels)?;
            let request = if now {
                BulkScheduleRequest::publish_now(items, channel_ids, Utc::now())
            } else {
                let interval_minutes = match interval {
                    Some(i) => i,
                    None => NonZeroU32::new(cfg.posting.default_delay_minutes)
                        .context("posting.default_delay_minutes must be > 0")?,
                };
                BulkScheduleRequest {
                    items,
                    channel_ids,
                    start_time: start.unwrap_or_else(|| default_start(&cfg)),
                    interval_minutes,
                }
            };
            let report = BulkScheduler::new(Arc::new(scheduler))
                .with_item_delay(cfg.posting.item_delay())
                .run(&request)
                .await?;
            print_json(&report)?;
            eprintln!("{} scheduled, {} failed", report.succeeded(), report.failed());

            if purge {
                if report.safe_to_purge() {
                    let consumed: Vec<usize> = report.results.iter().map(|r| r.index).collect();
                    let removed = store.remove_indices(&category, &consumed);
                    store.save().await?;
                    info!(removed, "store purged");
                } else {
                    warn!("failures present; keeping every item for review");
                }
            }
            if report.failed() > 0 {
                bail!("{} of {} items failed", report.failed(), report.results.len());
            }
        }
        Command::ImportCsv { store, file } => {
            let mut store = CaptureStore::load(&store).await?;
            let input = std::fs::File::open(&file)
                .with_context(|| format!("opening {}", file.display()))?;
            let imported = import_csv(&mut store, input, Utc::now().timestamp_millis())
                .with_context(|| format!("importing {}", file.display()))?;
            store.save().await?;
            println!("imported {} posts", imported);
        }
        Command::Rewrite {
            text,
            instruction,
            target,
            tone,
            media,
        } => {
            let generative = cfg
                .generative
                .as_ref()
                .context("generative section missing from config")?;
            let client = GenerativeClient::from_config(generative, transport)?;
            let instruction = instruction
                .unwrap_or_else(|| preset_instruction(target.into(), tone.into()).to_string());
            let rewritten = match media {
                Some(path) => {
                    let bytes = tokio::fs::read(&path)
                        .await
                        .with_context(|| format!("reading {}", path.display()))?;
                    let mime = normalize_mime(mime_from_extension(&path), &bytes);
                    client
                        .rewrite_with_media(&text, &instruction, &InlineMedia { mime, bytes })
                        .await?
                }
                None => client.rewrite_text(&text, &instruction).await?,
            };
            println!("{}", rewritten.trim());
        }
    }

    Ok(())
}

impl From<Target> for RewriteTarget {
    fn from(t: Target) -> Self {
        match t {
            Target::Title => RewriteTarget::Title,
            Target::Caption => RewriteTarget::Caption,
        }
    }
}

impl From<Tone> for RewriteTone {
    fn from(t: Tone) -> Self {
        match t {
            Tone::Engaging => RewriteTone::Engaging,
            Tone::Shorten => RewriteTone::Shorten,
            Tone::Professional => RewriteTone::Professional,
            Tone::Casual => RewriteTone::Casual,
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn default_start(cfg: &Config) -> DateTime<Utc> {
    Utc::now() + ChronoDuration::minutes(i64::from(cfg.posting.default_delay_minutes))
}

fn channels_or_default(cfg: &Config, channels: Vec<String>) -> Result<Vec<String>> {
    let channels = if channels.is_empty() {
        cfg.posting.default_channels.clone()
    } else {
        channels
    };
    if channels.is_empty() {
        bail!("no channels given and posting.default_channels is empty");
    }
    Ok(channels)
}

fn mime_from_extension(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "mov" => "video/mov",
        _ => return None,
    })
}

async fn media_source(arg: &str) -> Result<MediaSource> {
    if arg.starts_with("http://") || arg.starts_with("https://") {
        return Ok(MediaSource::RemoteUrl(arg.to_string()));
    }
    let path = Path::new(arg);
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(MediaSource::LocalBlob {
        bytes,
        mime: mime_from_extension(path).map(str::to_string),
        file_name: path.file_name().and_then(|n| n.to_str()).map(str::to_string),
    })
}
