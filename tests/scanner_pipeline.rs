use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::{TimeZone, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tempfile::TempDir;

use redscout::config::Config;
use redscout::keys::Key;
use redscout::namespace::ops::OpType;
use redscout::namespace::SortKey;
use redscout::scanner::{Scanner, StartupError};
use redscout::slowlog::{SlowLogEntry, SlowLogSort};
use redscout::state::Phase;
use redscout::store::{KeyDetails, MonitorStream, Store};

const MONITOR_WINDOW: Duration = Duration::from_millis(100);

#[derive(Default)]
struct FakeData {
    info: String,
    fail_info: bool,
    keys: Vec<(String, Option<KeyDetails>)>,
    monitor_lines: Vec<String>,
    /// End the monitor stream after its lines instead of staying open.
    monitor_closes: bool,
    slow_log: Vec<SlowLogEntry>,
}

/// In-memory store; clones share the same data.
#[derive(Clone, Default)]
struct FakeStore {
    data: Arc<Mutex<FakeData>>,
}

impl FakeStore {
    fn set_info(&self, report: String) {
        self.data.lock().info = report;
    }
}

impl Store for FakeStore {
    async fn info(&mut self) -> Result<String> {
        let data = self.data.lock();
        if data.fail_info {
            bail!("connection refused");
        }
        Ok(data.info.clone())
    }

    async fn scan(&mut self, cursor: u64, count: usize) -> Result<(u64, Vec<String>)> {
        let data = self.data.lock();
        let start = (cursor as usize).min(data.keys.len());
        let end = (start + count).min(data.keys.len());
        let next = if end >= data.keys.len() { 0 } else { end as u64 };
        let keys = data.keys[start..end].iter().map(|(k, _)| k.clone()).collect();
        Ok((next, keys))
    }

    async fn key_details(&mut self, keys: &[String]) -> Result<Vec<Option<KeyDetails>>> {
        let data = self.data.lock();
        Ok(keys
            .iter()
            .map(|key| {
                data.keys
                    .iter()
                    .find(|(k, _)| k == key)
                    .and_then(|(_, d)| d.clone())
            })
            .collect())
    }

    async fn slow_log(&mut self, count: usize) -> Result<Vec<SlowLogEntry>> {
        let data = self.data.lock();
        Ok(data.slow_log.iter().take(count).cloned().collect())
    }

    async fn monitor(&mut self) -> Result<MonitorStream> {
        let data = self.data.lock();
        let lines = stream::iter(data.monitor_lines.clone());
        if data.monitor_closes {
            Ok(lines.boxed())
        } else {
            Ok(lines.chain(stream::pending()).boxed())
        }
    }
}

fn info_report(version: &str, db0_keys: u64, hits: u64, misses: u64) -> String {
    format!(
        "# Server\r\nredis_version:{version}\r\nuptime_in_seconds:1000\r\n\
         # Stats\r\nkeyspace_hits:{hits}\r\nkeyspace_misses:{misses}\r\n\
         # Keyspace\r\ndb0:keys={db0_keys},expires=3,avg_ttl=60000\r\n"
    )
}

fn details(memory: u64, ttl_secs: u64, key_type: &str) -> Option<KeyDetails> {
    Some(KeyDetails {
        memory,
        ttl_secs,
        key_type: key_type.to_string(),
    })
}

fn monitor_line(command: &str, key: &str) -> String {
    format!(r#"1700000000.000001 [0 127.0.0.1:50000] "{command}" "{key}" "v""#)
}

/// Ten sampled keys out of 100: six `user:<n>` and four `session:<n>`.
fn sample_store() -> FakeStore {
    let mut keys = Vec::new();
    for i in 0..6u64 {
        let ttl = if i % 2 == 0 { 60 } else { 0 };
        keys.push((format!("user:{i}"), details(100 + i, ttl, "hash")));
    }
    for i in 0..4 {
        keys.push((format!("session:{i}"), details(50, 0, "string")));
    }

    let mut monitor_lines = Vec::new();
    for _ in 0..4 {
        monitor_lines.push(monitor_line("GET", "user:1"));
    }
    for _ in 0..2 {
        monitor_lines.push(monitor_line("SET", "user:2"));
    }
    monitor_lines.push(monitor_line("DEL", "session:1"));
    monitor_lines.push(monitor_line("EVAL", "return 1"));
    monitor_lines.push(r#"1700000000.000002 [0 127.0.0.1:50000] "PING""#.to_string());

    let slow_log = (1..=3)
        .map(|id| SlowLogEntry {
            id,
            timestamp: Utc
                .timestamp_opt(1_700_000_000 + id as i64, 0)
                .single()
                .expect("valid timestamp"),
            duration: Duration::from_millis(id * 10),
            command: "KEYS".to_string(),
            args: vec!["*".to_string()],
            client_addr: "127.0.0.1:50000".to_string(),
            client_name: String::new(),
        })
        .collect();

    FakeStore {
        data: Arc::new(Mutex::new(FakeData {
            info: info_report("7.2.4", 100, 100, 100),
            fail_info: false,
            keys,
            monitor_lines,
            monitor_closes: false,
            slow_log,
        })),
    }
}

fn test_config(dir: &TempDir) -> Config {
    Config {
        monitor_duration: MONITOR_WINDOW,
        refresh_interval: Duration::from_secs(60),
        logs_dir: dir.path().to_path_buf(),
        top_k: 3,
        id_patterns: vec!["[0-9]+".to_string()],
        ..Default::default()
    }
}

fn approx(actual: f64, expected: f64) -> bool {
    (actual - expected).abs() < 1e-6
}

async fn started(store: FakeStore, cfg: Config) -> Arc<Scanner<FakeStore>> {
    let scanner = Arc::new(Scanner::new(cfg, store).expect("scanner"));
    scanner.start().await.expect("start");
    scanner
}

#[tokio::test]
async fn test_initial_pass_populates_state() {
    let dir = tempfile::tempdir().expect("temp dir");
    let scanner = started(sample_store(), test_config(&dir)).await;
    let state = scanner.snapshot();

    assert!(state.ready);
    assert_eq!(state.phase, Phase::Ready);
    assert_eq!(state.status, "Initial data load complete");
    assert_eq!(state.scanned_keys, 10);
    assert_eq!(state.cursor, 0);
    assert_eq!(state.total_monitor_duration, MONITOR_WINDOW);
    assert!(state.last_info_check.is_some());

    let names: Vec<&str> = state
        .namespace_stats
        .iter()
        .map(|m| m.namespace.as_str())
        .collect();
    assert_eq!(names, ["user", "session"]);

    let user = &state.namespace_stats[0];
    assert_eq!(user.est_keys, 60);
    assert!(approx(user.mem_per_key, 102.5));
    assert_eq!(user.est_memory, 6150);
    assert!(approx(user.ttl_percent, 0.5));
    assert_eq!(user.avg_ttl_secs, 60);
    assert!(approx(user.ops_rate(OpType::Get), 40.0));
    assert!(approx(user.ops_rate(OpType::Set), 20.0));
    assert!(approx(user.ops_rate(OpType::Total), 60.0));

    let session = &state.namespace_stats[1];
    assert_eq!(session.est_keys, 40);
    assert_eq!(session.est_memory, 2000);
    assert_eq!(session.avg_ttl_secs, 0);
    assert!(approx(session.ops_rate(OpType::Del), 10.0));
    assert!(session.types.contains("string"));

    let big: Vec<(String, u64)> = state
        .big_keys
        .iter()
        .map(|b| (b.key.join(":"), b.size))
        .collect();
    assert_eq!(
        big,
        [
            ("user:5".to_string(), 105),
            ("user:4".to_string(), 104),
            ("user:3".to_string(), 103),
        ]
    );

    let hot: Vec<String> = state.hot_keys.iter().map(|h| h.key.join(":")).collect();
    assert_eq!(hot, ["user:1", "user:2", "session:1"]);
    assert!(approx(state.hot_keys[0].ops_per_sec, 40.0));

    let slow_ids: Vec<u64> = state.slow_logs.iter().map(|e| e.id).collect();
    assert_eq!(slow_ids, [3, 2, 1]);
}

#[tokio::test]
async fn test_drill_down_and_level_up() {
    let dir = tempfile::tempdir().expect("temp dir");
    let scanner = started(sample_store(), test_config(&dir)).await;

    assert!(scanner.drill_down("user").await);
    let state = scanner.snapshot();
    assert_eq!(state.current_prefix, Key::from_segments(["user"]));
    assert_eq!(state.namespace_stats.len(), 1);
    assert_eq!(state.namespace_stats[0].namespace, "{id}");
    assert_eq!(state.namespace_stats[0].est_keys, 60);

    // Keys directly under the wildcard have no further children.
    let before = scanner.snapshot().namespace_stats;
    assert!(!scanner.drill_down("{id}").await);
    let state = scanner.snapshot();
    assert_eq!(state.current_prefix, Key::from_segments(["user"]));
    assert_eq!(state.namespace_stats, before);

    assert!(!scanner.drill_down("").await);

    assert!(scanner.level_up().await);
    let state = scanner.snapshot();
    assert!(state.current_prefix.is_empty());
    assert_eq!(state.namespace_stats.len(), 2);

    assert!(!scanner.level_up().await);
    assert!(scanner.snapshot().current_prefix.is_empty());
}

#[tokio::test]
async fn test_drill_down_into_unknown_segment_keeps_state() {
    let dir = tempfile::tempdir().expect("temp dir");
    let scanner = started(sample_store(), test_config(&dir)).await;
    let before = scanner.snapshot();

    assert!(!scanner.drill_down("orders").await);

    let after = scanner.snapshot();
    assert_eq!(after.current_prefix, before.current_prefix);
    assert_eq!(after.namespace_stats, before.namespace_stats);
}

#[tokio::test]
async fn test_sort_namespaces() {
    let dir = tempfile::tempdir().expect("temp dir");
    let scanner = started(sample_store(), test_config(&dir)).await;

    scanner.sort_namespaces(SortKey::Del);
    let state = scanner.snapshot();
    assert_eq!(state.namespace_sort, SortKey::Del);
    assert_eq!(state.namespace_stats[0].namespace, "session");

    // The chosen order survives recomputation.
    scanner.compute_namespace_stats().await.expect("stats");
    assert_eq!(scanner.snapshot().namespace_stats[0].namespace, "session");
}

#[tokio::test]
async fn test_unsupported_version_is_fatal() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = sample_store();
    store.set_info(info_report("3.2.12", 100, 0, 0));

    let scanner = Arc::new(Scanner::new(test_config(&dir), store).expect("scanner"));
    let err = scanner.start().await.expect_err("old server rejected");
    assert!(matches!(err, StartupError::UnsupportedVersion { .. }));

    let state = scanner.snapshot();
    assert!(!state.ready);
    assert_eq!(state.phase, Phase::VersionCheck);
    assert_eq!(state.scanned_keys, 0);
    assert!(state.status.contains("unsupported"));
}

#[tokio::test]
async fn test_connectivity_failure_becomes_status() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = sample_store();
    store.data.lock().fail_info = true;

    let scanner = started(store, test_config(&dir)).await;
    let state = scanner.snapshot();
    assert!(!state.ready);
    assert_eq!(state.phase, Phase::FetchingInfo);
    assert!(state.status.starts_with("Error fetching server info"));
    assert!(state.status.contains("connection refused"));
}

#[tokio::test]
async fn test_scan_size_caps_pass_and_cursor_resumes() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = sample_store();
    {
        let mut data = store.data.lock();
        data.keys = (0..2500)
            .map(|i| (format!("k:{i}"), details(10, 0, "string")))
            .collect();
    }

    let cfg = Config {
        scan_size: 1000,
        ..test_config(&dir)
    };
    let scanner = Scanner::new(cfg, store).expect("scanner");

    assert_eq!(scanner.sample_key_space().await.expect("scan"), 1000);
    assert_eq!(scanner.snapshot().cursor, 1000);

    assert_eq!(scanner.sample_key_space().await.expect("scan"), 1000);
    assert_eq!(scanner.snapshot().cursor, 2000);

    assert_eq!(scanner.sample_key_space().await.expect("scan"), 500);
    let state = scanner.snapshot();
    assert_eq!(state.cursor, 0);
    assert_eq!(state.scanned_keys, 2500);

    // Starts over once the key space is exhausted.
    assert_eq!(scanner.sample_key_space().await.expect("scan"), 1000);
    assert_eq!(scanner.snapshot().scanned_keys, 3500);
}

#[tokio::test]
async fn test_vanished_keys_are_not_recorded() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = sample_store();
    {
        let mut data = store.data.lock();
        data.keys.push(("gone:1".to_string(), None));
        data.keys.push(("bad key".to_string(), details(9_999, 0, "string")));
    }

    let scanner = Scanner::new(test_config(&dir), store).expect("scanner");
    assert_eq!(scanner.sample_key_space().await.expect("scan"), 12);
    scanner.compute_big_keys().await.expect("big keys");
    scanner.compute_namespace_stats().await.expect("stats");

    let state = scanner.snapshot();
    assert_eq!(state.scanned_keys, 12);
    assert_eq!(state.big_keys[0].key.join(":"), "user:5");
    assert!(state.namespace_stats.iter().all(|m| m.namespace != "gone"));
}

#[tokio::test]
async fn test_zero_window_drains_buffered_traffic() {
    let dir = tempfile::tempdir().expect("temp dir");
    let scanner = Scanner::new(test_config(&dir), sample_store()).expect("scanner");

    let observed = scanner
        .sample_traffic(Duration::ZERO)
        .await
        .expect("traffic");
    assert_eq!(observed, 8);

    scanner.compute_hot_keys().await.expect("hot keys");
    let state = scanner.snapshot();
    assert_eq!(state.total_monitor_duration, Duration::ZERO);
    assert_eq!(state.hot_keys[0].key.join(":"), "user:1");
    assert!(approx(state.hot_keys[0].ops_per_sec, 4.0));
}

#[tokio::test]
async fn test_resample_accumulates_windows() {
    let dir = tempfile::tempdir().expect("temp dir");
    let scanner = started(sample_store(), test_config(&dir)).await;

    scanner.resample_traffic().await;
    let state = scanner.snapshot();
    assert_eq!(state.total_monitor_duration, MONITOR_WINDOW * 2);
    assert_eq!(state.phase, Phase::Ready);
    // Twice the operations over twice the time.
    assert!(approx(state.hot_keys[0].ops_per_sec, 40.0));

    scanner.resample_key_space().await;
    let state = scanner.snapshot();
    assert_eq!(state.scanned_keys, 20);
    assert_eq!(state.namespace_stats[0].est_keys, 60);
    assert_eq!(state.big_keys.len(), 3);
}

#[tokio::test]
async fn test_info_poller_derives_rates_between_polls() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = sample_store();
    let cfg = Config {
        refresh_interval: Duration::from_millis(30),
        ..test_config(&dir)
    };
    let scanner = started(store.clone(), cfg).await;

    store.set_info(info_report("7.2.4", 100, 190, 110));
    tokio::time::sleep(Duration::from_millis(150)).await;
    scanner.stop();

    let info = scanner.snapshot().info;
    assert_eq!(info.stats.keyspace_hits, 190);
    assert!(approx(info.computed.hit_rate, 0.9));
}

#[tokio::test]
async fn test_subscriber_sees_ready_snapshot() {
    let dir = tempfile::tempdir().expect("temp dir");
    let scanner = Arc::new(Scanner::new(test_config(&dir), sample_store()).expect("scanner"));
    let mut rx = scanner.subscribe();

    scanner.start().await.expect("start");

    let mut last = None;
    while let Ok(state) = rx.try_recv() {
        last = Some(state);
    }
    let last = last.expect("at least one snapshot");
    assert!(last.ready);
    assert_eq!(last.namespace_stats.len(), 2);
}

#[tokio::test]
async fn test_big_keys_match_full_sort_of_scan_log() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = sample_store();
    let scanner = Scanner::new(test_config(&dir), store.clone()).expect("scanner");

    // The cursor wraps after the first pass, so every key is logged twice.
    assert_eq!(scanner.sample_key_space().await.expect("scan"), 10);
    assert_eq!(scanner.snapshot().cursor, 0);
    assert_eq!(scanner.sample_key_space().await.expect("scan"), 10);
    scanner.compute_big_keys().await.expect("big keys");

    let keys = store.data.lock().keys.clone();
    let mut expected: Vec<(u64, String)> = keys
        .iter()
        .chain(keys.iter())
        .filter_map(|(k, d)| d.as_ref().map(|d| (d.memory, k.clone())))
        .collect();
    expected.sort_by(|a, b| b.cmp(a));
    expected.truncate(3);

    let got: Vec<(u64, String)> = scanner
        .snapshot()
        .big_keys
        .iter()
        .map(|b| (b.size, b.key.join(":")))
        .collect();
    assert_eq!(got, expected);
    assert_eq!(got[0], (105, "user:5".to_string()));
    assert_eq!(got[1], (105, "user:5".to_string()));
}

#[tokio::test]
async fn test_closed_monitor_stream_counts_observed_time() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = sample_store();
    {
        let mut data = store.data.lock();
        data.monitor_lines = (0..50).map(|_| monitor_line("GET", "hot:1")).collect();
        data.monitor_closes = true;
    }
    let scanner = Scanner::new(test_config(&dir), store).expect("scanner");

    let window = Duration::from_secs(10);
    let err = scanner
        .sample_traffic(window)
        .await
        .expect_err("stream closed early");
    assert!(err.to_string().contains("closed after 50 operations"));

    let observed = scanner.snapshot().total_monitor_duration;
    assert!(observed > Duration::ZERO);
    assert!(observed < window);

    scanner.compute_hot_keys().await.expect("hot keys");
    let state = scanner.snapshot();
    assert_eq!(state.hot_keys[0].key.join(":"), "hot:1");
    assert!(approx(
        state.hot_keys[0].ops_per_sec,
        50.0 / observed.as_secs_f64()
    ));
}

#[tokio::test]
async fn test_stopped_poller_no_longer_refreshes() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = sample_store();
    let cfg = Config {
        refresh_interval: Duration::from_millis(20),
        ..test_config(&dir)
    };
    let scanner = started(store.clone(), cfg).await;

    scanner.stop();
    // Let a poll that was already running finish.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let before = scanner.snapshot();

    store.set_info(info_report("7.2.4", 500, 900, 100));
    tokio::time::sleep(Duration::from_millis(200)).await;

    let after = scanner.snapshot();
    assert_eq!(after.last_info_check, before.last_info_check);
    assert_eq!(after.info, before.info);
    assert_eq!(after.info.total_keys(0), 100);
}

#[tokio::test]
async fn test_sort_slow_log() {
    let dir = tempfile::tempdir().expect("temp dir");
    let store = sample_store();
    {
        let mut data = store.data.lock();
        data.slow_log[0].command = "ZRANGE".to_string();
        data.slow_log[2].command = "DEL".to_string();
    }
    let scanner = Scanner::new(test_config(&dir), store).expect("scanner");
    scanner.fetch_slow_log().await.expect("slow log");

    let ids = |s: &redscout::state::State| s.slow_logs.iter().map(|e| e.id).collect::<Vec<_>>();
    assert_eq!(ids(&scanner.snapshot()), [3, 2, 1]);

    scanner.sort_slow_log(SlowLogSort::Command);
    let state = scanner.snapshot();
    assert_eq!(state.slow_log_sort, SlowLogSort::Command);
    assert_eq!(ids(&state), [1, 2, 3]);

    // A refetch keeps the chosen order.
    scanner.fetch_slow_log().await.expect("slow log");
    assert_eq!(ids(&scanner.snapshot()), [1, 2, 3]);
}
