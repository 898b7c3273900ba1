use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use crate::info::InfoSnapshot;
use crate::keys::Key;
use crate::namespace::{NamespaceMetrics, SortKey};
use crate::slowlog::{SlowLogEntry, SlowLogSort};
use crate::topk::{BigKey, HotKey};

/// Orchestrator lifecycle phase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    FetchingInfo,
    VersionCheck,
    Scanning,
    Monitoring,
    Aggregating,
    Ready,
}

impl Phase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::FetchingInfo => "fetching_info",
            Self::VersionCheck => "version_check",
            Self::Scanning => "scanning",
            Self::Monitoring => "monitoring",
            Self::Aggregating => "aggregating",
            Self::Ready => "ready",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything the profiler has learned so far.
///
/// The live aggregate is owned by the scanner; consumers only ever see
/// cloned snapshots delivered through [`Publisher`].
#[derive(Debug, Clone, Default)]
pub struct State {
    /// Drill-down prefix namespaces are computed below.
    pub current_prefix: Key,
    /// SCAN cursor to resume from; 0 after the key space was exhausted.
    pub cursor: u64,
    /// Keys enumerated by all sampling passes.
    pub scanned_keys: u64,
    /// Total time traffic has been observed for.
    pub total_monitor_duration: Duration,

    pub info: InfoSnapshot,
    pub last_info_check: Option<DateTime<Utc>>,

    pub namespace_stats: Vec<NamespaceMetrics>,
    /// Order `namespace_stats` is kept in.
    pub namespace_sort: SortKey,
    pub slow_logs: Vec<SlowLogEntry>,
    pub slow_log_sort: SlowLogSort,
    pub big_keys: Vec<BigKey>,
    pub hot_keys: Vec<HotKey>,

    pub phase: Phase,
    pub status: String,
    /// Set once the first full sampling pass completed.
    pub ready: bool,
}

impl State {
    pub fn new() -> Self {
        Self {
            status: "Initializing".to_string(),
            ..Default::default()
        }
    }
}

/// Bounded, non-blocking fan-out of state snapshots.
///
/// Producers never wait: when the consumer falls behind by more than the
/// capacity, the oldest snapshots are discarded and the consumer resumes
/// from the newest ones.
#[derive(Debug, Clone)]
pub struct Publisher {
    tx: broadcast::Sender<Arc<State>>,
}

impl Publisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Enqueue a snapshot. Dropped silently when nobody subscribed.
    pub fn publish(&self, state: State) {
        let _ = self.tx.send(Arc::new(state));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<State>> {
        self.tx.subscribe()
    }
}
