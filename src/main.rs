//! ferry - command line HTTP fetcher
//!
//! Issues a request, optionally following redirects, and prints the status
//! line and body of the final response.

use clap::Parser;
use ferry::{Client, ClientConfig, RequestOptions};
use http::Method;
use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// ferry HTTP client
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(author, version, about = "HTTP client with pooled redirect following", long_about = None)]
struct Args {
    /// URL to fetch (relative URLs need base-url in the config file)
    url: String,

    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Request body
    #[arg(short = 'd', long)]
    data: Option<String>,

    /// Follow redirects
    #[arg(short = 'L', long)]
    location: bool,

    /// Maximum redirects to follow
    #[arg(long = "max-redirs")]
    max_redirs: Option<usize>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Overall deadline per request in milliseconds
    #[arg(short = 'm', long = "max-time")]
    max_time: Option<u64>,

    /// Issue the request this many times, one after another
    #[arg(long, default_value = "1")]
    repeat: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize TLS crypto provider (required for outbound HTTPS connections)
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    init_logging(&args.log_level, args.json_logs)?;

    let mut config = match &args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            ClientConfig::load(path)?
        }
        None => ClientConfig::default(),
    };
    if args.location {
        config.follow_redirects = ferry::OnOff::On;
    }
    if let Some(limit) = args.max_redirs {
        config.redirect_limit = limit;
    }
    config.validate()?;

    let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid method '{}': {}", args.method, e))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(args, config, method))
}

async fn run(args: Args, config: ClientConfig, method: Method) -> anyhow::Result<()> {
    let client = Client::new(config)?;
    let started = Instant::now();

    for i in 0..args.repeat.max(1) {
        let mut options = RequestOptions::new();
        if let Some(data) = &args.data {
            options = options.body(data.clone());
        }
        if let Some(ms) = args.max_time {
            options = options.timeout(Duration::from_millis(ms));
        }

        let response = tokio::select! {
            result = client.request(method.clone(), &args.url, options) => result?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        };

        for hop in response.redirects() {
            info!("Redirected from {}", hop);
        }
        info!("Final response from {}", response.url());

        let status = response.status();
        let version = response.version();
        let body = response.collect_all().await?;

        // Only the last of repeated requests is printed
        if i + 1 == args.repeat.max(1) {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{:?} {}", version, status)?;
            writeln!(stdout)?;
            stdout.write_all(&body)?;
            stdout.flush()?;
        }
    }

    let stats = client.pool_stats();
    info!(
        "{} request(s) in {:?}; pool: {} endpoints, {} live, {} idle, {} acquires",
        args.repeat.max(1),
        started.elapsed(),
        stats.endpoints,
        stats.live,
        stats.idle,
        stats.acquires
    );

    client.dispose();
    Ok(())
}

fn init_logging(level: &str, json: bool) -> anyhow::Result<()> {
    let level = level.parse::<Level>().unwrap_or(Level::WARN);
    let filter = EnvFilter::new(format!("ferry={},hyper=warn,rustls=warn", level));

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }

    Ok(())
}
