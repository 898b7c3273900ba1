use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use redscout::config::Config;
use redscout::format::{format_bytes, format_duration, format_number, format_ops_per_sec};
use redscout::namespace::ops::OpType;
use redscout::scanner::Scanner;
use redscout::state::State;
use redscout::store::RedisStore;

/// Live key-space and traffic profiler for Redis-compatible stores.
#[derive(Parser)]
#[command(name = "redscout", about)]
struct Cli {
    /// Path to the YAML configuration file. Defaults are used when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logging verbosity level (trace, debug, info, warn, error).
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Server host, overrides the config file.
    #[arg(long, env = "REDIS_HOST")]
    host: Option<String>,

    /// Server port, overrides the config file.
    #[arg(long, env = "REDIS_PORT")]
    port: Option<u16>,

    /// Database index, overrides the config file.
    #[arg(long, env = "REDIS_DB")]
    db: Option<u32>,

    /// Server password, overrides the config file.
    #[arg(long, env = "REDIS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print version information and exit.
    Version,
}

/// Build-time version info, injected via RUSTFLAGS.
mod version {
    /// Release version string.
    pub const RELEASE: &str = env!("CARGO_PKG_VERSION");

    /// Git commit hash (set at build time via env, or "unknown").
    pub fn git_commit() -> &'static str {
        option_env!("GIT_COMMIT").unwrap_or("unknown")
    }

    /// Full version string with platform info.
    pub fn full() -> String {
        format!(
            "{} (commit: {}, {}/{})",
            RELEASE,
            git_commit(),
            std::env::consts::OS,
            std::env::consts::ARCH,
        )
    }
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => Config::default(),
        };

        if let Some(host) = &self.host {
            cfg.redis.host = host.clone();
        }
        if let Some(port) = self.port {
            cfg.redis.port = port;
        }
        if let Some(db) = self.db {
            cfg.redis.db = db;
        }
        if let Some(password) = &self.password {
            cfg.redis.password = password.clone();
        }

        cfg.validate().context("invalid configuration")?;

        Ok(cfg)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle version subcommand before anything else.
    if let Some(Command::Version) = &cli.command {
        println!("redscout {}", version::full());
        return Ok(());
    }

    // Initialize tracing.
    let filter = EnvFilter::try_new(&cli.log_level)
        .with_context(|| format!("invalid log level: {}", cli.log_level))?;

    fmt().with_env_filter(filter).with_target(true).init();

    // Flags and REDIS_* variables override the file.
    let cfg = cli.load_config()?;

    info!(
        version = version::RELEASE,
        commit = version::git_commit(),
        host = %cfg.redis.host,
        port = cfg.redis.port,
        db = cfg.redis.db,
        "starting redscout",
    );

    // Build and run the tokio runtime.
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    rt.block_on(run(cfg))
}

async fn run(cfg: Config) -> Result<()> {
    // Set up signal handling.
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    tokio::spawn(async move {
        wait_for_signal().await;
        let _ = shutdown_tx.send(());
    });

    // Connect and start the scanner.
    let store = RedisStore::connect(&cfg.redis).await?;
    let scanner = Arc::new(Scanner::new(cfg, store)?);

    let consumer = tokio::spawn(log_snapshots(scanner.subscribe()));

    let interrupted = tokio::select! {
        res = scanner.start() => {
            res.context("starting scanner")?;
            false
        }
        _ = &mut shutdown_rx => true,
    };

    // Wait for shutdown signal.
    if !interrupted {
        let _ = shutdown_rx.await;
    }

    // Graceful shutdown.
    scanner.stop();
    consumer.abort();

    info!("redscout stopped");

    Ok(())
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received SIGINT, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "cannot register SIGTERM handler"),
        }
    }

    let _ = ctrl_c.await;
    info!("received SIGINT, shutting down");
}

/// Headless consumer: logs a summary of every published snapshot.
async fn log_snapshots(mut rx: broadcast::Receiver<Arc<State>>) {
    let mut last_status = String::new();

    loop {
        match rx.recv().await {
            Ok(state) => {
                if state.status != last_status {
                    info!(phase = %state.phase, status = %state.status, "status");
                    last_status.clone_from(&state.status);
                }
                if state.ready {
                    log_summary(&state);
                }
            }
            Err(RecvError::Lagged(skipped)) => debug!(skipped, "consumer lagging"),
            Err(RecvError::Closed) => return,
        }
    }
}

fn log_summary(state: &State) {
    let info = &state.info;

    debug!(
        version = %info.server.version,
        uptime = %format_duration(std::time::Duration::from_secs(info.server.uptime_secs)),
        clients = info.clients.connected,
        memory = %format_bytes(info.memory.used),
        ops = %format_ops_per_sec(info.stats.ops_per_sec as f64),
        hit_rate = %format!("{:.1}%", info.computed.hit_rate * 100.0),
        cpu = %format!("{:.1}%", info.computed.cpu_usage * 100.0),
        "server",
    );

    debug!(
        scanned = state.scanned_keys,
        observed_for = %format_duration(state.total_monitor_duration),
        namespaces = state.namespace_stats.len(),
        big_keys = state.big_keys.len(),
        hot_keys = state.hot_keys.len(),
        slow_log = state.slow_logs.len(),
        "sample",
    );

    for ns in state.namespace_stats.iter().take(5) {
        debug!(
            namespace = %ns.namespace,
            keys = %format_number(ns.est_keys as f64),
            memory = %format_bytes(ns.est_memory),
            ttl_percent = %format!("{:.0}%", ns.ttl_percent * 100.0),
            ops = %format_ops_per_sec(ns.ops_rate(OpType::Total)),
            "namespace",
        );
    }
}
