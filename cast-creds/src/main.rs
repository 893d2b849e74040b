//! cast-creds - Connect and manage platform accounts for Cast
//!
//! Connecting runs the platform's authorization flow through a loopback
//! redirect listener; the resulting tokens land in the credential file named
//! by `[store] path`.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use libcast::logging::LoggingConfig;
use libcast::oauth::LoopbackLauncher;
use libcast::{CastError, CastService, Config, CredentialStatus, Platform};
use serde_json::json;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "cast-creds")]
#[command(about = "Connect and manage Cast platform accounts", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Authorize a platform in the browser and store its tokens
    Connect {
        /// Platform name (instagram, youtube, tiktok)
        platform: String,
    },

    /// Show the stored status of every platform (never contacts the platforms)
    Status {
        /// Only show this platform
        #[arg(long)]
        platform: Option<String>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Check stored tokens against the platform
    Validate {
        /// Platform name, or --all for every stored platform
        platform: Option<String>,

        /// Validate every platform
        #[arg(short, long)]
        all: bool,
    },

    /// Obtain fresh tokens for a platform
    Refresh {
        /// Platform name (instagram, youtube, tiktok)
        platform: String,
    },

    /// Revoke access and remove every stored key for a platform
    Disconnect {
        /// Platform name (instagram, youtube, tiktok)
        platform: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run_command(cli.command).await {
        eprintln!("Error: {}", e);
        let code = e
            .downcast_ref::<CastError>()
            .map(CastError::exit_code)
            .unwrap_or(1);
        std::process::exit(code);
    }
}

fn parse_platform(name: &str) -> Result<Platform> {
    Ok(name.parse::<Platform>()?)
}

fn build_service() -> Result<CastService> {
    let config = Config::load()?;
    let launcher = LoopbackLauncher::new(config.auth.redirect_port).with_opener(|platform, url| {
        eprintln!("Open this URL to connect {}:\n\n  {}\n", platform, url);
    });
    Ok(CastService::from_config(config, Arc::new(launcher))?)
}

async fn run_command(command: Commands) -> Result<()> {
    let service = build_service()?;
    match command {
        Commands::Connect { platform } => connect(&service, parse_platform(&platform)?).await,
        Commands::Status { platform, format } => {
            let platforms = match platform {
                Some(name) => vec![parse_platform(&name)?],
                None => Platform::ALL.to_vec(),
            };
            status(&service, &platforms, format)
        }
        Commands::Validate { platform, all } => {
            if all {
                validate_all(&service).await
            } else if let Some(platform) = platform {
                validate(&service, parse_platform(&platform)?).await
            } else {
                anyhow::bail!("Either specify a platform or use --all flag");
            }
        }
        Commands::Refresh { platform } => refresh(&service, parse_platform(&platform)?).await,
        Commands::Disconnect { platform } => {
            let platform = parse_platform(&platform)?;
            service.disconnect(platform).await?;
            println!("✓ Disconnected {}", platform);
            Ok(())
        }
    }
}

async fn connect(service: &CastService, platform: Platform) -> Result<()> {
    let credential = service.lifecycle().connect_credential(platform).await?;
    println!(
        "✓ Connected {} as {} ({})",
        platform, credential.display_name, credential.account_id
    );
    Ok(())
}

fn status(service: &CastService, platforms: &[Platform], format: OutputFormat) -> Result<()> {
    let mut rows = Vec::new();
    for platform in platforms {
        let status = service.status(*platform)?;
        let credential = service.lifecycle().credential(*platform)?;
        let summary = service.store().load_summary(*platform)?;
        rows.push((*platform, status, credential, summary));
    }

    match format {
        OutputFormat::Json => {
            let entries: Vec<_> = rows
                .iter()
                .map(|(platform, status, credential, summary)| {
                    json!({
                        "platform": platform,
                        "status": status,
                        "account_id": credential.as_ref().map(|c| c.account_id.clone()),
                        "display_name": credential.as_ref().map(|c| c.display_name.clone()),
                        "expires_at": credential.as_ref().and_then(|c| c.expires_at),
                        "summary": summary,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            for (platform, status, credential, _) in &rows {
                match credential {
                    Some(credential) => {
                        let expiry = credential
                            .expires_at
                            .map(|at| format!(", expires {}", at.format("%Y-%m-%d %H:%M UTC")))
                            .unwrap_or_default();
                        println!(
                            "{}: {} as {}{}",
                            platform, status, credential.display_name, expiry
                        );
                    }
                    None => println!("{}: {}", platform, status),
                }
            }
        }
    }
    Ok(())
}

async fn validate(service: &CastService, platform: Platform) -> Result<()> {
    let status = service.lifecycle().validate(platform).await?;
    match status {
        CredentialStatus::Connected => println!("✓ {}: token is valid", platform),
        CredentialStatus::Invalid => {
            println!("✗ {}: token is invalid; run 'cast-creds refresh {}'", platform, platform)
        }
        other => println!("{}: {}", platform, other),
    }
    Ok(())
}

async fn validate_all(service: &CastService) -> Result<()> {
    let mut failures = 0;
    for platform in Platform::ALL {
        if service.lifecycle().credential(platform)?.is_none() {
            continue;
        }
        if let Err(e) = validate(service, platform).await {
            eprintln!("✗ {}: {}", platform, e);
            failures += 1;
        }
    }
    if failures > 0 {
        anyhow::bail!("{} platform(s) could not be validated", failures);
    }
    Ok(())
}

async fn refresh(service: &CastService, platform: Platform) -> Result<()> {
    let credential = service.lifecycle().refresh(platform).await?;
    let expiry = credential
        .expires_at
        .map(|at| format!(" until {}", at.format("%Y-%m-%d")))
        .unwrap_or_default();
    println!("✓ Refreshed {} token{}", platform, expiry);
    Ok(())
}
