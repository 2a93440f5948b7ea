use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use retronet_tftp::{Mode, TftpClient};
use tokio::fs::File;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Lockstep TFTP client
#[derive(Parser, Debug)]
#[command(name = "retronet-tftp-client", about = "TFTP client", long_about = None)]
struct Cli {
    /// TFTP server address (e.g. 192.168.1.100:69)
    #[arg(short, long)]
    server: SocketAddr,

    /// Get file from server
    #[arg(short, long, conflicts_with = "put")]
    get: Option<String>,

    /// Put file to server
    #[arg(short, long, conflicts_with = "get")]
    put: Option<String>,

    /// Local file path (for get: destination, for put: source)
    #[arg(short, long)]
    file: Option<PathBuf>,

    /// Transfer mode (octet or netascii)
    #[arg(short, long, default_value = "octet")]
    mode: String,

    /// Per-packet timeout in seconds
    #[arg(short, long, default_value_t = 5)]
    timeout: u64,

    /// Consecutive timeouts tolerated before giving up
    #[arg(long, default_value_t = 5)]
    max_timeouts: u32,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_level))
        .with_target(false)
        .init();

    let mode = Mode::parse(&cli.mode)?;
    let client = TftpClient::new()
        .with_timeout(Duration::from_secs(cli.timeout))
        .with_max_timeouts(cli.max_timeouts);

    if let Some(remote_file) = cli.get {
        let local_file = cli.file.unwrap_or_else(|| PathBuf::from(&remote_file));
        info!("downloading {} from {} to {:?}", remote_file, cli.server, local_file);
        let mut output = File::create(&local_file)
            .await
            .with_context(|| format!("cannot create {}", local_file.display()))?;
        let bytes = client
            .receive_file(&remote_file, mode, &mut output, cli.server)
            .await?;
        info!("download complete: {bytes} bytes");
    } else if let Some(remote_file) = cli.put {
        let local_file = cli.file.unwrap_or_else(|| PathBuf::from(&remote_file));
        info!("uploading {:?} to {} as {}", local_file, cli.server, remote_file);
        let mut input = File::open(&local_file)
            .await
            .with_context(|| format!("cannot open {}", local_file.display()))?;
        let bytes = client
            .send_file(&remote_file, mode, &mut input, cli.server)
            .await?;
        info!("upload complete: {bytes} bytes");
    } else {
        bail!("must specify either --get or --put");
    }

    Ok(())
}
