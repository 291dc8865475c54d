use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use capture_scheduler::config::Config;
use capture_scheduler::generative::GenerativeClient;
use capture_scheduler::scheduler::PostScheduler;
use capture_scheduler::transport::{HttpTransport, ReqwestTransport};
use capture_scheduler::uploader::MediaSource;
use clap::Parser;

// 1x1 transparent PNG.
const TEST_PNG: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChw\
                        GA60e6kgAAAABJRU5ErkJggg==";

#[derive(Parser, Debug)]
struct Args {
    /// Path to YAML config
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Also create a draft post on the first channel
    #[arg(long)]
    draft: bool,
}

struct Check {
    name: &'static str,
    passed: bool,
    detail: String,
}

impl Check {
    fn new(name: &'static str, result: Result<String, String>) -> Self {
        match result {
            Ok(detail) => Self { name, passed: true, detail },
            Err(detail) => Self { name, passed: false, detail },
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let raw = fs::read_to_string(&args.config)?;
    let mut cfg: Config = serde_yaml::from_str(&raw)?;
    cfg.apply_env();
    let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);

    let mut checks = Vec::new();
    let key_present = !cfg.posting.api_key.trim().is_empty();
    checks.push(Check::new(
        "API key",
        if key_present {
            Ok("API key is configured".to_string())
        } else {
            Err("API key is missing".to_string())
        },
    ));

    if key_present {
        let scheduler = PostScheduler::from_config(&cfg.posting, Arc::clone(&transport))?;

        let channels = scheduler.api().list_channels().await.map_err(|e| e.to_string());
        checks.push(Check::new(
            "Posting API",
            channels
                .as_ref()
                .map(|c| format!("Connected successfully! Found {} channels.", c.len()))
                .map_err(Clone::clone),
        ));

        let uploaded = match STANDARD.decode(TEST_PNG) {
            Ok(bytes) => scheduler
                .upload(MediaSource::LocalBlob {
                    bytes,
                    mime: Some("image/png".to_string()),
                    file_name: Some("diagnose.png".to_string()),
                })
                .await
                .map(|u| u.storage_object_id)
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        checks.push(Check::new(
            "Media upload",
            uploaded.as_ref().map(|id| format!("storage_object_id {}", id)).map_err(Clone::clone),
        ));

        if args.draft {
            let draft = match (&channels, &uploaded) {
                (Ok(channels), Ok(storage_id)) => match channels.first() {
                    Some(channel) => scheduler
                        .schedule_test_draft(&channel.id, storage_id)
                        .await
                        .map(|h| format!("draft {} on channel {}", h.post_id, channel.id))
                        .map_err(|e| e.to_string()),
                    None => Err("No channels found".to_string()),
                },
                _ => Err("skipped: earlier checks failed".to_string()),
            };
            checks.push(Check::new("Draft post", draft));
        }
    }

    if let Some(gen_cfg) = &cfg.generative {
        let result = match GenerativeClient::from_config(gen_cfg, Arc::clone(&transport)) {
            Ok(client) => match client.test_connection().await {
                Ok(true) => Ok("model replied".to_string()),
                Ok(false) => Err("unexpected reply".to_string()),
                Err(e) => Err(e.to_string()),
            },
            Err(e) => Err(e.to_string()),
        };
        checks.push(Check::new("Generative API", result));
    }

    for check in &checks {
        println!(
            "{:<16} {:<5} {}",
            check.name,
            if check.passed { "PASS" } else { "FAIL" },
            check.detail
        );
    }
    if checks.iter().any(|c| !c.passed) {
        std::process::exit(1);
    }
    Ok(())
}
