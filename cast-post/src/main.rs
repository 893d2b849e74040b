//! cast-post - Upload one video and publish it to every connected platform

use clap::{Parser, ValueEnum};
use libcast::logging::LoggingConfig;
use libcast::oauth::LoopbackLauncher;
use libcast::service::events::Event;
use libcast::transform::MediaMeta;
use libcast::types::parse_platform_list;
use libcast::{
    CastError, CastService, Config, ContentType, MediaAsset, Platform, PublishReport, Result,
    TransformedVariant, VariantKey,
};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "cast-post")]
#[command(about = "Upload one video and publish it to every connected platform", long_about = None)]
struct Cli {
    /// Video file to upload
    #[arg(required_unless_present = "url", conflicts_with = "url")]
    file: Option<PathBuf>,

    /// Publish an already transcoded, publicly reachable video instead of uploading
    #[arg(long)]
    url: Option<String>,

    /// Target specific platform(s) (comma-separated, default: every connected platform)
    #[arg(short, long)]
    platform: Option<String>,

    /// Caption or description
    #[arg(short, long, default_value = "")]
    caption: String,

    /// Publish to Instagram as a story instead of a reel
    #[arg(long)]
    story: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    format: OutputFormat,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    LoggingConfig::from_env(cli.verbose).init();

    // Run the main logic and handle errors
    match run(cli).await {
        Ok(report) if report.any_success() => {}
        Ok(_) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<PublishReport> {
    let config = Config::load()?;
    let launcher = Arc::new(LoopbackLauncher::new(config.auth.redirect_port));
    let service = CastService::from_config(config, launcher)?;

    let platforms = match &cli.platform {
        Some(list) => parse_platform_list(list)?,
        None => service.connected_platforms()?,
    };
    if platforms.is_empty() {
        return Err(CastError::InvalidInput(
            "No connected platforms; run 'cast-creds connect <platform>' first".to_string(),
        ));
    }
    let targets = targets_for(&platforms, cli.story);

    if cli.format == OutputFormat::Text {
        spawn_progress_printer(&service);
    }

    let report = match (&cli.file, &cli.url) {
        (Some(file), _) => {
            service.config().require_transcoding()?;
            service
                .upload_and_publish_targets(file, &targets, &cli.caption)
                .await?
        }
        (None, Some(url)) => {
            let asset = pre_transcoded_asset(url, &targets)?;
            service.publish(&asset, &cli.caption).await
        }
        (None, None) => {
            return Err(CastError::InvalidInput(
                "Provide a video file or --url".to_string(),
            ))
        }
    };

    print_report(&report, cli.format)?;
    Ok(report)
}

fn targets_for(platforms: &BTreeSet<Platform>, story: bool) -> Vec<VariantKey> {
    platforms
        .iter()
        .map(|platform| match platform {
            Platform::Instagram if story => VariantKey::new(*platform, ContentType::Story),
            _ => VariantKey::default_for(*platform),
        })
        .collect()
}

/// Wrap a URL that is already in its final form as ready variants
fn pre_transcoded_asset(url: &str, targets: &[VariantKey]) -> Result<MediaAsset> {
    let parsed = url::Url::parse(url)
        .map_err(|e| CastError::InvalidInput(format!("Invalid --url '{}': {}", url, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CastError::InvalidInput(
            "--url must be an http(s) URL the platforms can fetch".to_string(),
        ));
    }
    let variants = targets
        .iter()
        .map(|key| TransformedVariant::pre_validated(*key, url));
    Ok(MediaAsset::new(url.to_string(), MediaMeta::default(), variants))
}

fn spawn_progress_printer(service: &CastService) {
    let mut events = service.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                Event::VariantReady {
                    platform,
                    content_type,
                    validated,
                    ..
                } => {
                    let note = if validated { "" } else { " (unconfirmed)" };
                    eprintln!("{}/{}: variant ready{}", platform, content_type, note);
                }
                Event::PublishProgress {
                    platform,
                    content_type,
                    state,
                    progress,
                    ..
                } => eprintln!("{}/{}: {} {}%", platform, content_type, state, progress),
                _ => {}
            }
        }
    });
}

fn print_report(report: &PublishReport, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            let output = serde_json::to_string_pretty(report)
                .map_err(|e| CastError::InvalidInput(format!("Failed to encode report: {}", e)))?;
            println!("{}", output);
        }
        OutputFormat::Text => {
            for outcome in &report.outcomes {
                let mark = if outcome.is_success() { "✓" } else { "✗" };
                println!(
                    "{} {} ({}): {}",
                    mark,
                    outcome.platform,
                    outcome.content_type,
                    outcome.summary()
                );
            }
        }
    }
    Ok(())
}
