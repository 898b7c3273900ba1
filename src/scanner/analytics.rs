use std::collections::HashMap;

use anyhow::Result;
use tracing::{debug, info};

use super::Scanner;
use crate::keys::Key;
use crate::namespace::{Aggregator, Extrapolation, NamespaceMetrics};
use crate::record::{OpRecord, ScanRecord};
use crate::store::Store;
use crate::topk::{BigKey, HotKey, TopK};

impl<S: Store> Scanner<S> {
    /// Recomputes namespace metrics below the current prefix. Returns the
    /// number of namespaces published.
    ///
    /// The state is left untouched when there are no namespaces, or when the
    /// prefix moved while the logs were being read.
    pub async fn compute_namespace_stats(&self) -> Result<usize> {
        let prefix = self.state.lock().current_prefix.clone();
        let metrics = self.namespace_metrics(&prefix).await?;

        let count = metrics.len();
        if count == 0 {
            info!(
                prefix = %prefix.join(self.parser.delimiter()),
                "no namespaces found below prefix",
            );
            return Ok(0);
        }

        let applied = self.update(|s| {
            if s.current_prefix != prefix {
                return false;
            }
            s.namespace_stats = metrics;
            true
        });
        if !applied {
            debug!("prefix changed during aggregation, discarding stats");
            return Ok(0);
        }
        debug!(count, "namespace stats updated");

        Ok(count)
    }

    /// Folds both logs into metrics for the namespaces directly below
    /// `prefix`. Each log is locked only for its own pass.
    pub(super) async fn namespace_metrics(&self, prefix: &Key) -> Result<Vec<NamespaceMetrics>> {
        let mut agg = Aggregator::new(&self.parser, prefix);

        self.scan_log
            .lock()
            .await
            .for_each_line(|line| {
                if let Some(record) = ScanRecord::parse(line) {
                    agg.add_scan(&record);
                }
            })
            .await?;

        self.op_log
            .lock()
            .await
            .for_each_line(|line| {
                if let Some(record) = OpRecord::parse(line) {
                    agg.add_op(&record);
                }
            })
            .await?;

        let (ext, sort) = {
            let s = self.state.lock();
            let ext = Extrapolation {
                total_server_keys: s.info.total_keys(self.cfg.redis.db),
                total_sampled_keys: s.scanned_keys,
                monitor_duration: s.total_monitor_duration,
            };
            (ext, s.namespace_sort)
        };

        Ok(agg.into_metrics(&ext, sort))
    }

    /// Replaces the big-key view with the `top_k` largest scan log records,
    /// selected in one pass over the log.
    pub async fn compute_big_keys(&self) -> Result<usize> {
        let mut top = TopK::new(self.cfg.top_k);
        self.scan_log
            .lock()
            .await
            .for_each_line(|line| {
                if let Some(record) = ScanRecord::parse(line) {
                    top.offer(record.memory, record.key);
                }
            })
            .await?;

        let big_keys: Vec<BigKey> = top
            .into_sorted_desc()
            .into_iter()
            .map(|(size, key)| BigKey {
                key: self.parser.tokenize(&key, false),
                size,
            })
            .collect();

        let count = big_keys.len();
        self.update(|s| s.big_keys = big_keys);
        debug!(count, "big keys updated");

        Ok(count)
    }

    /// Replaces the hot-key view with the `top_k` most frequently
    /// operated-on keys, as operations per second of observed traffic.
    pub async fn compute_hot_keys(&self) -> Result<usize> {
        let mut counts: HashMap<String, u64> = HashMap::new();
        self.op_log
            .lock()
            .await
            .for_each_line(|line| {
                if let Some(record) = OpRecord::parse(line) {
                    *counts.entry(record.key).or_insert(0) += 1;
                }
            })
            .await?;

        let mut top = TopK::new(self.cfg.top_k);
        for (key, count) in counts {
            top.offer(count, key);
        }

        // Without observed traffic, counts are reported per one second.
        let seconds = {
            let observed = self.state.lock().total_monitor_duration.as_secs_f64();
            if observed > 0.0 {
                observed
            } else {
                1.0
            }
        };

        let hot_keys: Vec<HotKey> = top
            .into_sorted_desc()
            .into_iter()
            .map(|(count, key)| HotKey {
                key: self.parser.tokenize(&key, false),
                ops_per_sec: count as f64 / seconds,
            })
            .collect();

        let count = hot_keys.len();
        self.update(|s| s.hot_keys = hot_keys);
        debug!(count, "hot keys updated");

        Ok(count)
    }
}
