pub mod ops;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use serde::Deserialize;

use crate::keys::{Key, KeyParser};
use crate::record::{OpRecord, ScanRecord};

use self::ops::OpType;

/// Raw per-namespace accumulator built by the log folds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceSnapshot {
    pub namespace: String,
    pub keys: u64,
    pub keys_with_ttl: u64,
    pub total_memory: u64,
    pub total_ttl_secs: u64,
    /// Observed command name -> occurrences.
    pub ops_frequency: HashMap<String, u64>,
    pub types: BTreeSet<String>,
}

impl NamespaceSnapshot {
    fn new(namespace: String) -> Self {
        Self {
            namespace,
            ..Default::default()
        }
    }
}

/// Population figures used to extrapolate a bounded sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct Extrapolation {
    /// Keys the server reports for the profiled database.
    pub total_server_keys: u64,
    /// Keys enumerated by all sampling passes so far.
    pub total_sampled_keys: u64,
    /// Total time traffic has been observed for.
    pub monitor_duration: Duration,
}

/// Extrapolated statistics for one namespace.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamespaceMetrics {
    pub namespace: String,
    pub est_keys: u64,
    pub est_memory: u64,
    pub mem_per_key: f64,
    /// Fraction of sampled keys carrying an expiry, in [0, 1].
    pub ttl_percent: f64,
    pub avg_ttl_secs: u64,
    /// Operations per second by class, including [`OpType::Total`].
    pub ops: BTreeMap<OpType, f64>,
    pub types: BTreeSet<String>,
}

impl NamespaceMetrics {
    pub fn ops_rate(&self, op: OpType) -> f64 {
        self.ops.get(&op).copied().unwrap_or(0.0)
    }
}

impl NamespaceSnapshot {
    /// Projects the raw counts into extrapolated metrics. Every ratio whose
    /// denominator is zero yields zero.
    pub fn to_metrics(&self, ext: &Extrapolation) -> NamespaceMetrics {
        let mut metrics = NamespaceMetrics {
            namespace: self.namespace.clone(),
            types: self.types.clone(),
            ..Default::default()
        };

        if self.keys > 0 {
            if ext.total_sampled_keys > 0 {
                metrics.est_keys = (u128::from(ext.total_server_keys) * u128::from(self.keys)
                    / u128::from(ext.total_sampled_keys))
                .try_into()
                .unwrap_or(u64::MAX);
            }
            metrics.mem_per_key = self.total_memory as f64 / self.keys as f64;
            metrics.est_memory = (metrics.est_keys as f64 * metrics.mem_per_key) as u64;
            metrics.ttl_percent = self.keys_with_ttl as f64 / self.keys as f64;
        }

        if self.keys_with_ttl > 0 {
            metrics.avg_ttl_secs = self.total_ttl_secs / self.keys_with_ttl;
        }

        let seconds = ext.monitor_duration.as_secs_f64();
        let mut total = 0.0;
        for (command, count) in &self.ops_frequency {
            let rate = if seconds > 0.0 {
                *count as f64 / seconds
            } else {
                0.0
            };
            *metrics.ops.entry(OpType::classify(command)).or_insert(0.0) += rate;
            total += rate;
        }
        metrics.ops.insert(OpType::Total, total);

        metrics
    }
}

/// Folds scan and operation records into per-namespace snapshots below a
/// drill-down prefix.
pub struct Aggregator<'a> {
    parser: &'a KeyParser,
    prefix: &'a Key,
    snapshots: HashMap<String, NamespaceSnapshot>,
}

impl<'a> Aggregator<'a> {
    pub fn new(parser: &'a KeyParser, prefix: &'a Key) -> Self {
        Self {
            parser,
            prefix,
            snapshots: HashMap::new(),
        }
    }

    fn snapshot_for(&mut self, raw_key: &str) -> Option<&mut NamespaceSnapshot> {
        let key = self.parser.tokenize(raw_key, true);
        let namespace = self.parser.namespace_of(&key, self.prefix, true).ok()?;
        Some(
            self.snapshots
                .entry(namespace.clone())
                .or_insert_with(|| NamespaceSnapshot::new(namespace)),
        )
    }

    /// Folds one scan log record. Keys outside the prefix are ignored.
    pub fn add_scan(&mut self, record: &ScanRecord) {
        let Some(snapshot) = self.snapshot_for(&record.key) else {
            return;
        };

        snapshot.keys += 1;
        snapshot.total_memory += record.memory;
        if record.ttl_secs > 0 {
            snapshot.keys_with_ttl += 1;
            snapshot.total_ttl_secs += record.ttl_secs;
        }
        if !snapshot.types.contains(&record.key_type) {
            snapshot.types.insert(record.key_type.clone());
        }
    }

    /// Folds one operation log record. Keys outside the prefix are ignored.
    pub fn add_op(&mut self, record: &OpRecord) {
        let Some(snapshot) = self.snapshot_for(&record.key) else {
            return;
        };

        *snapshot
            .ops_frequency
            .entry(record.command.clone())
            .or_insert(0) += 1;
    }

    pub fn snapshots(&self) -> &HashMap<String, NamespaceSnapshot> {
        &self.snapshots
    }

    /// Converts every snapshot to metrics, sorted by `sort`.
    pub fn into_metrics(self, ext: &Extrapolation, sort: SortKey) -> Vec<NamespaceMetrics> {
        let mut metrics: Vec<NamespaceMetrics> = self
            .snapshots
            .values()
            .map(|snapshot| snapshot.to_metrics(ext))
            .collect();
        sort_metrics(&mut metrics, sort);
        metrics
    }
}

/// Column namespace metrics are ordered by (always descending).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Keys,
    Memory,
    Ttl,
    Get,
    Set,
    Del,
    TotalOps,
}

/// Sorts descending by `key`; ties fall back to namespace name.
pub fn sort_metrics(metrics: &mut [NamespaceMetrics], key: SortKey) {
    metrics.sort_by(|a, b| {
        let primary = match key {
            SortKey::Keys => b.est_keys.cmp(&a.est_keys),
            SortKey::Memory => b.est_memory.cmp(&a.est_memory),
            SortKey::Ttl => b.avg_ttl_secs.cmp(&a.avg_ttl_secs),
            SortKey::Get => b.ops_rate(OpType::Get).total_cmp(&a.ops_rate(OpType::Get)),
            SortKey::Set => b.ops_rate(OpType::Set).total_cmp(&a.ops_rate(OpType::Set)),
            SortKey::Del => b.ops_rate(OpType::Del).total_cmp(&a.ops_rate(OpType::Del)),
            SortKey::TotalOps => b
                .ops_rate(OpType::Total)
                .total_cmp(&a.ops_rate(OpType::Total)),
        };
        primary.then_with(|| a.namespace.cmp(&b.namespace))
    });
}
