use anyhow::{Context, Result};
use clap::Parser;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use lusd::config::DirectoryConfig;
use lusd::server::DirectoryServer;

/// Logs larger than this are rotated aside before appending.
const MAX_LOG_FILE_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Parser)]
#[command(
    name = "lusd",
    version,
    about = "Directory service for ephemeral game-server registrations",
    long_about = None
)]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Override the configured listen host
    #[arg(long)]
    host: Option<IpAddr>,

    /// Override the configured listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, default_value = "text")]
    log_format: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging must exist before the config load so load-time diagnostics are
    // visible; the log-file location is probed first, quietly.
    let log_file = probe_log_file(&cli.config);
    setup_tracing(&cli.log_format, cli.verbose, log_file.as_deref())?;

    tracing::info!("lusd game server directory starting");

    let mut config = DirectoryConfig::load(&cli.config);
    if let Some(host) = cli.host {
        config.bind_address.set_ip(host);
    }
    if let Some(port) = cli.port {
        config.bind_address.set_port(port);
    }

    let server = DirectoryServer::new(config).context("Failed to create directory server")?;
    let info = server.info();

    println!("{}", info.display());
    println!();
    println!("Endpoints:");
    println!("  POST /report.php   - Register a game server");
    println!("  GET  /servers.txt  - Active server list");
    println!("  GET  /official.txt - Official server list");
    println!("  GET  /health       - Health check");
    println!("  GET  /version      - Build version");
    println!();
    println!("Directory server listening on http://{}", info.bind_address);
    println!("Press Ctrl+C to stop.\n");

    server
        .start_with_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                }
                Err(e) => {
                    tracing::error!("Failed to wait for Ctrl+C: {}", e);
                }
            }
        })
        .await
        .context("Directory server exited with error")?;

    println!("Directory server stopped.");
    Ok(())
}

/// Best-effort read of the logging knobs before the subscriber exists. The
/// full config load runs afterwards so its diagnostics are captured.
fn probe_log_file(path: &Path) -> Option<PathBuf> {
    let mut config = std::fs::read_to_string(path)
        .ok()
        .and_then(|content| toml::from_str::<DirectoryConfig>(&content).ok())
        .unwrap_or_default();

    if let Ok(enabled) = std::env::var("LUSD_LOG_ENABLED") {
        if let Ok(enabled) = enabled.parse::<bool>() {
            config.log_enabled = enabled;
        }
    }
    if let Ok(file) = std::env::var("LUSD_LOG_FILE") {
        if !file.is_empty() && file.len() <= 255 && !file.contains("..") {
            config.log_file = PathBuf::from(file);
        }
    }

    config.log_enabled.then_some(config.log_file)
}

fn setup_tracing(format: &str, verbose: bool, log_file: Option<&Path>) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("lusd=debug,info")
    } else {
        tracing_subscriber::EnvFilter::new("lusd=info,warn")
    };

    let console_layer = match format {
        "json" => tracing_subscriber::fmt::layer().json().boxed(),
        _ => tracing_subscriber::fmt::layer().pretty().boxed(),
    };

    let file_layer = log_file.and_then(|path| match open_log_file(path) {
        Ok(file) => Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(std::sync::Arc::new(file))
                .boxed(),
        ),
        Err(e) => {
            eprintln!(
                "warning: could not open log file {}: {e}, continuing with console logging only",
                path.display()
            );
            None
        }
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

/// Open the log file for appending, rotating it aside first if oversized.
fn open_log_file(path: &Path) -> std::io::Result<std::fs::File> {
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.len() > MAX_LOG_FILE_BYTES {
            let mut backup = path.as_os_str().to_owned();
            backup.push(".old");
            if let Err(e) = std::fs::rename(path, PathBuf::from(&backup)) {
                eprintln!("warning: could not rotate log file: {e}");
            }
        }
    }

    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
}
