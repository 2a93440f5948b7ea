use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use retronet_tftp::config::{load_config, validate_config, write_config};
use retronet_tftp::{LogFormat, ServerMode, TftpConfig, TftpServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "retronet-tftp-server", about = "Standalone TFTP server")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, default_value = "/etc/retronet/tftp.toml")]
    config: PathBuf,

    /// Write a default TOML configuration file and exit
    #[arg(long)]
    init_config: bool,

    /// Validate the configuration and exit (no socket bind)
    #[arg(long)]
    check_config: bool,

    /// Create the served directories if they do not exist
    #[arg(long)]
    create_dirs: bool,

    /// Directory to serve reads from
    #[arg(long)]
    root_dir: Option<PathBuf>,

    /// Directory to store writes in
    #[arg(long)]
    write_dir: Option<PathBuf>,

    /// Bind address for the TFTP server
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Allowed transfer directions
    #[arg(long, value_enum)]
    mode: Option<ServerMode>,

    /// Allow WRQs to overwrite existing files
    #[arg(long)]
    allow_overwrite: bool,

    /// Per-packet timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Consecutive timeouts tolerated before a transfer aborts
    #[arg(long)]
    max_timeouts: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        load_config(&cli.config)?
    } else {
        TftpConfig::default()
    };

    if let Some(root_dir) = cli.root_dir {
        config.root_dir = root_dir;
    }
    if let Some(write_dir) = cli.write_dir {
        config.write_dir = write_dir;
    }
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if cli.allow_overwrite {
        config.allow_overwrite = true;
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }
    if let Some(max_timeouts) = cli.max_timeouts {
        config.max_timeouts = max_timeouts;
    }

    if cli.init_config {
        write_config(&cli.config, &config)?;
        println!("Wrote config to {}", cli.config.display());
        return Ok(());
    }

    if cli.create_dirs {
        if config.mode.allows_read() {
            tokio::fs::create_dir_all(&config.root_dir).await?;
        }
        if config.mode.allows_write() {
            tokio::fs::create_dir_all(&config.write_dir).await?;
        }
    }

    if cli.check_config {
        validate_config(&config, true)?;
        println!("Config OK: {}", cli.config.display());
        return Ok(());
    }

    validate_config(&config, true)?;

    let _log_guard = if let Some(ref log_file) = config.logging.file {
        let dir = log_file.parent().unwrap_or_else(|| std::path::Path::new("."));
        let file_name = log_file
            .file_name()
            .and_then(|name| name.to_str())
            .context("logging.file must include a file name")?;
        let file_appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        match config.logging.format {
            LogFormat::Json => {
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                    .with_writer(non_blocking)
                    .init();
            }
            LogFormat::Text => {
                tracing_subscriber::fmt()
                    .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                    .with_writer(non_blocking)
                    .init();
            }
        }

        Some(guard)
    } else {
        match config.logging.format {
            LogFormat::Json => {
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                    .init();
            }
            LogFormat::Text => {
                tracing_subscriber::fmt()
                    .with_env_filter(EnvFilter::new(config.logging.level.clone()))
                    .init();
            }
        }

        None
    };

    let server = TftpServer::bind(&config).await?;

    tokio::select! {
        result = server.serve() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("interrupt received");
            server.close();
        }
    }

    Ok(())
}
