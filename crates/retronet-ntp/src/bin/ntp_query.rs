use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::Parser;
use retronet_ntp::{NtpClient, NTP_PORT};
use tracing_subscriber::EnvFilter;

/// Query an NTP server and print the computed clock offset and delay
#[derive(Parser, Debug)]
#[command(name = "ntp-query", about = "NTPv3 time query client")]
struct Cli {
    /// NTP server, host or host:port
    server: String,

    /// Receive timeout in seconds
    #[arg(short, long, default_value_t = 10)]
    timeout: u64,

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

    let addr = resolve(&cli.server)?;

    let client = NtpClient::new().with_timeout(Duration::from_secs(cli.timeout));
    let mut info = client
        .get_time(addr)
        .await
        .with_context(|| format!("query to {addr} failed"))?;
    info.compute_details();

    let msg = info.message();
    println!("server:     {addr}");
    println!(
        "stratum:    {} (reference {})",
        msg.stratum,
        msg.reference_id_string()
    );
    if let Some(xmit) = msg.transmit_timestamp.to_datetime() {
        println!("xmit time:  {xmit}");
    }
    match info.offset() {
        Some(offset) => println!("offset:     {offset} ms"),
        None => println!("offset:     (not computable)"),
    }
    match info.delay() {
        Some(delay) => println!("delay:      {delay} ms"),
        None => println!("delay:      (not computable)"),
    }
    for comment in info.comments() {
        println!("note:       {comment}");
    }

    Ok(())
}

fn resolve(server: &str) -> anyhow::Result<SocketAddr> {
    let with_port = if server.contains(':') {
        server.to_string()
    } else {
        format!("{server}:{NTP_PORT}")
    };
    let Some(addr) = with_port
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {server}"))?
        .next()
    else {
        bail!("no addresses for {server}");
    };
    Ok(addr)
}
