use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Utc;
use futures::{FutureExt, StreamExt};
use tracing::{debug, info, warn};

use super::{Scanner, OP_FLUSH_SIZE, PIPELINE_BATCH_SIZE, SCAN_BATCH_SIZE};
use crate::info::InfoSnapshot;
use crate::record::{OpRecord, ScanRecord};
use crate::slowlog::sort_entries;
use crate::store::Store;

impl<S: Store> Scanner<S> {
    /// Enumerates up to `scan_size` keys from the persisted cursor and
    /// appends their details to the scan log. Returns the keys enumerated.
    ///
    /// The connection is held for one SCAN step and its pipelines at a time,
    /// so info polls interleave at batch boundaries. The cursor is advanced
    /// before the connection is released; it wraps to 0 once the key space
    /// is exhausted, so the next pass starts over.
    pub async fn sample_key_space(&self) -> Result<u64> {
        let limit = self.cfg.scan_size;
        let mut scanned = 0u64;
        let mut recorded = 0usize;
        let mut vanished = 0usize;

        loop {
            let (next, records) = {
                let mut conn = self.conn.lock().await;
                let cursor = self.state.lock().cursor;
                let (next, keys) = conn.scan(cursor, SCAN_BATCH_SIZE).await?;

                let mut records = Vec::with_capacity(keys.len());
                for chunk in keys.chunks(PIPELINE_BATCH_SIZE) {
                    let details = conn.key_details(chunk).await?;
                    for (key, details) in chunk.iter().zip(details) {
                        match details {
                            Some(d) if is_loggable_key(key) => records.push(ScanRecord {
                                key: key.clone(),
                                memory: d.memory,
                                ttl_secs: d.ttl_secs,
                                key_type: d.key_type,
                            }),
                            _ => vanished += 1,
                        }
                    }
                }

                {
                    let mut state = self.state.lock();
                    state.cursor = next;
                    state.scanned_keys += keys.len() as u64;
                }
                scanned += keys.len() as u64;

                (next, records)
            };

            recorded += self.scan_log.lock().await.append(&records).await?;

            if next == 0 || scanned >= limit {
                break;
            }
        }

        info!(scanned, recorded, skipped = vanished, "key-space sample complete");
        self.set_status(format!("Scanned {scanned} keys"));

        Ok(scanned)
    }

    /// Records commands seen on a MONITOR subscription for `duration`.
    /// Returns the number of operations appended to the log.
    ///
    /// The connection lock is only held while the subscription is opened.
    /// When the stream closes early, the operations already received are
    /// kept and the time actually observed is added to the monitor total.
    pub async fn sample_traffic(&self, duration: Duration) -> Result<usize> {
        let mut stream = {
            let mut conn = self.conn.lock().await;
            conn.monitor().await?
        };
        let subscribed_at = tokio::time::Instant::now();

        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);

        let mut pending = Vec::with_capacity(OP_FLUSH_SIZE);
        let mut observed = 0usize;
        let mut closed = false;

        loop {
            tokio::select! {
                biased;

                _ = &mut deadline => break,

                line = stream.next() => match line {
                    Some(line) => {
                        pending.extend(OpRecord::from_monitor_line(&line));
                        if pending.len() >= OP_FLUSH_SIZE {
                            observed += self.flush_ops(&mut pending).await?;
                        }
                    }
                    None => {
                        closed = true;
                        break;
                    }
                },
            }
        }

        // Lines that arrived before the deadline but were not polled yet.
        while let Some(Some(line)) = stream.next().now_or_never() {
            pending.extend(OpRecord::from_monitor_line(&line));
        }
        drop(stream);
        observed += self.flush_ops(&mut pending).await?;

        if closed {
            let elapsed = subscribed_at.elapsed().min(duration);
            self.update(|s| s.total_monitor_duration += elapsed);
            warn!(observed, elapsed = ?elapsed, "monitor stream closed early");
            bail!("monitor stream closed after {observed} operations");
        }

        self.update(|s| {
            s.total_monitor_duration += duration;
            s.status = format!("Observed {observed} operations");
        });
        info!(observed, duration = ?duration, "traffic sample complete");

        Ok(observed)
    }

    async fn flush_ops(&self, pending: &mut Vec<OpRecord>) -> Result<usize> {
        if pending.is_empty() {
            return Ok(0);
        }
        let written = self.op_log.lock().await.append(pending.drain(..)).await?;
        debug!(written, "operation batch appended");
        Ok(written)
    }

    /// Polls INFO and replaces the server snapshot.
    ///
    /// Hit rate and CPU usage are rates since the previous poll; the first
    /// poll keeps the lifetime values, so a server with no lookups yet
    /// reports a hit rate of 1.0 rather than 0.0.
    pub async fn refresh_server_info(&self) -> Result<()> {
        let report = {
            let mut conn = self.conn.lock().await;
            conn.info().await?
        };
        let now = Utc::now();
        let mut info = InfoSnapshot::parse(&report);

        self.update(|s| {
            if s.last_info_check.is_some() {
                info.derive_from(&s.info, s.last_info_check, now);
            }
            s.info = info;
            s.last_info_check = Some(now);
        });

        Ok(())
    }

    /// Replaces the slow-log view with up to `top_k` entries, kept in the
    /// current slow-log order.
    pub async fn fetch_slow_log(&self) -> Result<usize> {
        let entries = {
            let mut conn = self.conn.lock().await;
            conn.slow_log(self.cfg.top_k).await?
        };

        let count = entries.len();
        self.update(|s| {
            s.slow_logs = entries;
            sort_entries(&mut s.slow_logs, s.slow_log_sort);
        });
        debug!(count, "slow log fetched");

        Ok(count)
    }
}

/// Whitespace would split the key across log fields.
fn is_loggable_key(key: &str) -> bool {
    !key.is_empty() && !key.chars().any(char::is_whitespace)
}
