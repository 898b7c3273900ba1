use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

/// Parsed server status report plus metrics derived against the previous poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfoSnapshot {
    pub server: ServerInfo,
    pub clients: ClientsInfo,
    pub memory: MemoryInfo,
    pub stats: StatsInfo,
    pub cpu: CpuInfo,
    /// Keyed by database name (`db0`, `db1`, ...).
    pub keyspace: BTreeMap<String, KeyspaceInfo>,
    pub computed: ComputedStats,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerInfo {
    pub version: String,
    pub os: String,
    pub arch_bits: u32,
    pub uptime_secs: u64,
    pub hz: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientsInfo {
    pub connected: u64,
    pub blocked: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryInfo {
    pub used: u64,
    pub used_human: String,
    pub max: u64,
    pub max_human: String,
    pub policy: String,
    pub peak_percent: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsInfo {
    pub total_connections: u64,
    pub ops_per_sec: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CpuInfo {
    pub user_secs: f64,
    pub system_secs: f64,
}

impl CpuInfo {
    pub fn total(&self) -> f64 {
        self.user_secs + self.system_secs
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyspaceInfo {
    pub keys: u64,
    pub expires: u64,
    /// Average TTL in seconds (the report carries milliseconds).
    pub avg_ttl_secs: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComputedStats {
    /// Fraction of lookups that hit, in [0, 1].
    pub hit_rate: f64,
    /// CPU seconds consumed per wall-clock second.
    pub cpu_usage: f64,
}

impl InfoSnapshot {
    /// Parses a `key:value` status report. Unknown keys and malformed lines
    /// are skipped.
    ///
    /// `computed` holds lifetime values: hit rate over all lookups since
    /// startup (1.0 when there were none) and CPU seconds per uptime second.
    pub fn parse(report: &str) -> Self {
        let mut info = Self::default();

        for line in report.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, val)) = line.split_once(':') else {
                continue;
            };

            match key {
                "redis_version" => info.server.version = val.to_string(),
                "os" => info.server.os = val.to_string(),
                "arch_bits" => info.server.arch_bits = val.parse().unwrap_or_default(),
                "uptime_in_seconds" => info.server.uptime_secs = val.parse().unwrap_or_default(),
                "hz" => info.server.hz = val.parse().unwrap_or_default(),

                "connected_clients" => info.clients.connected = val.parse().unwrap_or_default(),
                "blocked_clients" => info.clients.blocked = val.parse().unwrap_or_default(),

                "used_cpu_sys" => info.cpu.system_secs = val.parse().unwrap_or_default(),
                "used_cpu_user" => info.cpu.user_secs = val.parse().unwrap_or_default(),

                "used_memory" => info.memory.used = val.parse().unwrap_or_default(),
                "used_memory_human" => info.memory.used_human = val.to_string(),
                "maxmemory" => info.memory.max = val.parse().unwrap_or_default(),
                "maxmemory_human" => info.memory.max_human = val.to_string(),
                "maxmemory_policy" => info.memory.policy = val.to_string(),
                "used_memory_peak_perc" => {
                    info.memory.peak_percent =
                        val.trim_end_matches('%').parse().unwrap_or_default()
                }

                "total_connections_received" => {
                    info.stats.total_connections = val.parse().unwrap_or_default()
                }
                "instantaneous_ops_per_sec" => {
                    info.stats.ops_per_sec = val.parse().unwrap_or_default()
                }
                "keyspace_hits" => info.stats.keyspace_hits = val.parse().unwrap_or_default(),
                "keyspace_misses" => info.stats.keyspace_misses = val.parse().unwrap_or_default(),

                db if is_db_key(db) => {
                    info.keyspace.insert(db.to_string(), parse_keyspace(val));
                }
                _ => {}
            }
        }

        let lookups = info.stats.keyspace_hits + info.stats.keyspace_misses;
        info.computed.hit_rate = if lookups == 0 {
            1.0
        } else {
            info.stats.keyspace_hits as f64 / lookups as f64
        };

        if info.server.uptime_secs > 0 && info.cpu.total() > 0.0 {
            info.computed.cpu_usage = info.cpu.total() / info.server.uptime_secs as f64;
        }

        info
    }

    /// Replaces the lifetime `computed` values with rates since `previous`.
    ///
    /// Hit rate is carried over from `previous` when no lookups happened in
    /// between (or counters went backwards after a restart). CPU usage is
    /// only derived when a previous poll time is known.
    pub fn derive_from(
        &mut self,
        previous: &InfoSnapshot,
        previous_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) {
        let d_hits = self.stats.keyspace_hits as i64 - previous.stats.keyspace_hits as i64;
        let d_misses = self.stats.keyspace_misses as i64 - previous.stats.keyspace_misses as i64;

        if d_hits >= 0 && d_misses >= 0 && d_hits + d_misses > 0 {
            self.computed.hit_rate = d_hits as f64 / (d_hits + d_misses) as f64;
        } else {
            self.computed.hit_rate = previous.computed.hit_rate;
        }

        if let Some(previous_at) = previous_at {
            let elapsed_ms = (now - previous_at).num_milliseconds();
            if elapsed_ms > 0 {
                let d_cpu = self.cpu.total() - previous.cpu.total();
                self.computed.cpu_usage = (d_cpu * 1000.0 / elapsed_ms as f64).max(0.0);
            }
        }
    }

    /// Key count reported for the given database index, zero when absent.
    pub fn total_keys(&self, db: u32) -> u64 {
        self.keyspace
            .get(&format!("db{db}"))
            .map(|ks| ks.keys)
            .unwrap_or(0)
    }
}

fn is_db_key(key: &str) -> bool {
    key.strip_prefix("db")
        .is_some_and(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
}

fn parse_keyspace(val: &str) -> KeyspaceInfo {
    let mut ks = KeyspaceInfo::default();
    for pair in val.split(',') {
        let Some((field, value)) = pair.split_once('=') else {
            continue;
        };
        match field {
            "keys" => ks.keys = value.parse().unwrap_or_default(),
            "expires" => ks.expires = value.parse().unwrap_or_default(),
            "avg_ttl" => ks.avg_ttl_secs = value.parse::<u64>().unwrap_or_default() / 1000,
            _ => {}
        }
    }
    ks
}
