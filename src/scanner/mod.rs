mod analytics;
pub mod log;
mod sampling;

use std::sync::Arc;

use anyhow::{Context, Result};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::keys::KeyParser;
use crate::namespace::{sort_metrics, SortKey};
use crate::slowlog::{sort_entries, SlowLogSort};
use crate::state::{Phase, Publisher, State};
use crate::store::Store;

use self::log::ScratchLog;

/// Oldest server release whose sampling commands are known to work.
pub const MIN_SERVER_VERSION: semver::Version = semver::Version::new(4, 0, 0);

/// Keys requested per SCAN step.
const SCAN_BATCH_SIZE: usize = 1000;

/// Keys per MEMORY USAGE / TTL / TYPE pipeline.
const PIPELINE_BATCH_SIZE: usize = 100;

/// Operation records buffered before they are appended to the log.
const OP_FLUSH_SIZE: usize = 512;

/// Fatal startup failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StartupError {
    #[error("unsupported server version {found}, must be at least {minimum}")]
    UnsupportedVersion { found: String, minimum: String },

    #[error("cannot parse server version {found:?}")]
    UnparseableVersion { found: String },
}

/// Orchestrates sampling, polling and aggregation against one live store.
///
/// Resources are guarded separately so independent operations overlap:
/// the connection, the key-scan log and the operation log each have their
/// own async lock, and the shared [`State`] is only locked for short,
/// non-async critical sections. Every completed operation publishes a
/// snapshot of the state.
pub struct Scanner<S: Store> {
    cfg: Config,
    parser: KeyParser,
    conn: tokio::sync::Mutex<S>,
    scan_log: tokio::sync::Mutex<ScratchLog>,
    op_log: tokio::sync::Mutex<ScratchLog>,
    state: parking_lot::Mutex<State>,
    publisher: Publisher,
    cancel: CancellationToken,
}

impl<S: Store> Scanner<S> {
    /// Validates the configuration and creates the scratch logs.
    pub fn new(cfg: Config, store: S) -> Result<Self> {
        cfg.validate().context("invalid configuration")?;

        let parser = KeyParser::new(cfg.delimiter.clone(), cfg.compiled_id_patterns()?);
        let scan_log = ScratchLog::create(&cfg.logs_dir, "redscout_scan_")?;
        let op_log = ScratchLog::create(&cfg.logs_dir, "redscout_monitor_")?;

        debug!(
            scan_log = %scan_log.path().display(),
            op_log = %op_log.path().display(),
            "scratch logs created",
        );

        let mut state = State::new();
        state.namespace_sort = cfg.sort_by;

        Ok(Self {
            publisher: Publisher::new(cfg.publish_queue_size),
            parser,
            conn: tokio::sync::Mutex::new(store),
            scan_log: tokio::sync::Mutex::new(scan_log),
            op_log: tokio::sync::Mutex::new(op_log),
            state: parking_lot::Mutex::new(state),
            cancel: CancellationToken::new(),
            cfg,
        })
    }

    /// Receive every snapshot published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<State>> {
        self.publisher.subscribe()
    }

    /// Copy of the current state.
    pub fn snapshot(&self) -> State {
        self.state.lock().clone()
    }

    /// Mutate the state, then publish a snapshot of the result.
    fn update<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let (result, snapshot) = {
            let mut state = self.state.lock();
            let result = f(&mut state);
            (result, state.clone())
        };
        self.publisher.publish(snapshot);
        result
    }

    fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        self.update(|s| s.status = status);
    }

    fn set_phase(&self, phase: Phase, status: impl Into<String>) {
        let status = status.into();
        debug!(%phase, "phase changed");
        self.update(|s| {
            s.phase = phase;
            s.status = status;
        });
    }

    /// Runs the initial pass: info, version check, key-space sampling,
    /// traffic sampling and aggregation, then starts the info poller.
    ///
    /// Only an unsupported server version is returned as an error. Every
    /// other failure ends the pass early and is reported through the
    /// published status.
    pub async fn start(self: &Arc<Self>) -> Result<(), StartupError> {
        self.set_phase(Phase::FetchingInfo, "Fetching server info");
        if let Err(e) = self.refresh_server_info().await {
            error!(error = %e, "initial info fetch failed");
            self.set_status(format!("Error fetching server info: {e:#}"));
            return Ok(());
        }

        self.set_phase(Phase::VersionCheck, "Checking server version");
        let version = self.state.lock().info.server.version.clone();
        if let Err(e) = check_version(&version) {
            error!(error = %e, "server version check failed");
            self.set_status(e.to_string());
            return Err(e);
        }
        info!(%version, "server version supported");

        self.spawn_info_updates();

        self.set_phase(Phase::Scanning, "Scanning key space");
        if let Err(e) = self.sample_key_space().await {
            error!(error = %e, "key-space sampling failed");
            self.set_status(format!("Error scanning key space: {e:#}"));
            return Ok(());
        }

        self.set_phase(Phase::Monitoring, "Monitoring operations");
        if let Err(e) = self.sample_traffic(self.cfg.monitor_duration).await {
            error!(error = %e, "traffic sampling failed");
            self.set_status(format!("Error monitoring operations: {e:#}"));
            return Ok(());
        }

        self.set_phase(Phase::Aggregating, "Computing statistics");
        if let Err(e) = self.fetch_slow_log().await {
            warn!(error = %e, "slow log fetch failed");
            self.set_status(format!("Error fetching slow log: {e:#}"));
        }
        if let Err(e) = self.compute_namespace_stats().await {
            warn!(error = %e, "namespace aggregation failed");
            self.set_status(format!("Error generating namespace stats: {e:#}"));
        }
        if let Err(e) = self.compute_big_keys().await {
            error!(error = %e, "big key computation failed");
            self.set_status(format!("Error computing big keys: {e:#}"));
            return Ok(());
        }
        if let Err(e) = self.compute_hot_keys().await {
            error!(error = %e, "hot key computation failed");
            self.set_status(format!("Error computing hot keys: {e:#}"));
            return Ok(());
        }

        self.update(|s| {
            s.ready = true;
            s.phase = Phase::Ready;
            s.status = "Initial data load complete".to_string();
        });
        info!("initial data load complete");

        Ok(())
    }

    /// Samples more of the key space, then refreshes the namespace and
    /// big-key views.
    pub async fn resample_key_space(&self) {
        self.set_phase(Phase::Scanning, "Scanning key space");
        if let Err(e) = self.sample_key_space().await {
            self.set_status(format!("Error scanning key space: {e:#}"));
            return;
        }
        self.reaggregate(true, false).await;
    }

    /// Observes traffic for another monitor window, then refreshes the
    /// namespace and hot-key views.
    pub async fn resample_traffic(&self) {
        self.set_phase(Phase::Monitoring, "Monitoring operations");
        if let Err(e) = self.sample_traffic(self.cfg.monitor_duration).await {
            self.set_status(format!("Error monitoring operations: {e:#}"));
            return;
        }
        self.reaggregate(false, true).await;
    }

    async fn reaggregate(&self, big_keys: bool, hot_keys: bool) {
        self.set_phase(Phase::Aggregating, "Computing statistics");
        if let Err(e) = self.compute_namespace_stats().await {
            self.set_status(format!("Error generating namespace stats: {e:#}"));
        }
        if big_keys {
            if let Err(e) = self.compute_big_keys().await {
                self.set_status(format!("Error computing big keys: {e:#}"));
            }
        }
        if hot_keys {
            if let Err(e) = self.compute_hot_keys().await {
                self.set_status(format!("Error computing hot keys: {e:#}"));
            }
        }
        let ready = self.state.lock().ready;
        if ready {
            self.set_phase(Phase::Ready, "Statistics updated");
        }
    }

    /// Narrows the namespace view to `segment` below the current prefix.
    ///
    /// The prefix only moves when the new level has namespaces; otherwise
    /// the state is left as it was. Returns whether the prefix moved.
    pub async fn drill_down(&self, segment: &str) -> bool {
        let current = self.state.lock().current_prefix.clone();
        let prefix = match self.parser.append(&current, segment) {
            Ok(prefix) => prefix,
            Err(e) => {
                debug!(error = %e, segment, "cannot drill down");
                return false;
            }
        };

        info!(
            segment,
            prefix = %prefix.join(self.parser.delimiter()),
            "drilling down",
        );

        match self.namespace_metrics(&prefix).await {
            Ok(metrics) if !metrics.is_empty() => {
                self.update(|s| {
                    s.current_prefix = prefix;
                    s.namespace_stats = metrics;
                });
                true
            }
            Ok(_) => {
                info!(segment, "no namespaces below segment");
                false
            }
            Err(e) => {
                self.set_status(format!("Error generating namespace stats: {e:#}"));
                false
            }
        }
    }

    /// Moves the namespace view one level up. No-op at the root.
    pub async fn level_up(&self) -> bool {
        let current = self.state.lock().current_prefix.clone();
        let Ok(prefix) = current.pop() else {
            return false;
        };

        info!(
            from = %current.join(self.parser.delimiter()),
            to = %prefix.join(self.parser.delimiter()),
            "leveling up",
        );

        match self.namespace_metrics(&prefix).await {
            Ok(metrics) => {
                self.update(|s| {
                    s.current_prefix = prefix;
                    s.namespace_stats = metrics;
                });
                true
            }
            Err(e) => {
                self.set_status(format!("Error generating namespace stats: {e:#}"));
                false
            }
        }
    }

    /// Re-sorts the namespace view and remembers the order for later
    /// computations.
    pub fn sort_namespaces(&self, key: SortKey) {
        self.update(|s| {
            s.namespace_sort = key;
            sort_metrics(&mut s.namespace_stats, key);
        });
    }

    /// Re-sorts the slow-log view; later fetches keep this order.
    pub fn sort_slow_log(&self, key: SlowLogSort) {
        self.update(|s| {
            s.slow_log_sort = key;
            sort_entries(&mut s.slow_logs, key);
        });
    }

    /// Spawn the periodic info poller. It runs until [`Scanner::stop`].
    pub fn spawn_info_updates(self: &Arc<Self>) -> JoinHandle<()> {
        let scanner = Arc::clone(self);
        let cancel = self.cancel.clone();
        let interval = self.cfg.refresh_interval;

        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("info updates stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = scanner.refresh_server_info().await {
                            warn!(error = %e, "info refresh failed");
                        }
                    }
                }
            }
        })
    }

    /// Stop background tasks. An in-flight poll completes first.
    pub fn stop(&self) {
        self.cancel.cancel();
        info!("scanner stopped");
    }
}

/// Reads the leading `major[.minor[.patch]]` numbers of a server version.
fn parse_server_version(raw: &str) -> Option<semver::Version> {
    let mut parts = raw.trim().split('.').map(|p| {
        let digits: String = p.chars().take_while(char::is_ascii_digit).collect();
        digits.parse::<u64>().ok()
    });

    let major = parts.next()??;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some(semver::Version::new(major, minor, patch))
}

/// Rejects servers older than [`MIN_SERVER_VERSION`].
pub fn check_version(raw: &str) -> Result<(), StartupError> {
    let version = parse_server_version(raw).ok_or_else(|| StartupError::UnparseableVersion {
        found: raw.to_string(),
    })?;

    if version < MIN_SERVER_VERSION {
        return Err(StartupError::UnsupportedVersion {
            found: raw.to_string(),
            minimum: MIN_SERVER_VERSION.to_string(),
        });
    }

    Ok(())
}
