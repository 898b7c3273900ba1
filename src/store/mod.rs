use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use futures::stream::{BoxStream, StreamExt};
use redis::aio::MultiplexedConnection;
use redis::{from_redis_value, IntoConnectionInfo, Value};
use tracing::debug;

use crate::config::RedisConfig;
use crate::slowlog::SlowLogEntry;

/// Name the profiler registers its connections under.
const CLIENT_NAME: &str = "redscout";

/// Per-key properties retrieved during key-space sampling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDetails {
    pub memory: u64,
    /// Remaining TTL in seconds, 0 when the key has no expiry.
    pub ttl_secs: u64,
    pub key_type: String,
}

/// Raw MONITOR lines from a dedicated subscription.
pub type MonitorStream = BoxStream<'static, String>;

/// Capability the scanner needs from the profiled store.
///
/// Every method except [`Store::monitor`] uses the shared connection; the
/// caller serializes access.
pub trait Store: Send + 'static {
    /// Fetch the free-text status report.
    fn info(&mut self) -> impl Future<Output = Result<String>> + Send;

    /// Run one cursor step of the key-space enumeration.
    fn scan(
        &mut self,
        cursor: u64,
        count: usize,
    ) -> impl Future<Output = Result<(u64, Vec<String>)>> + Send;

    /// Retrieve memory, TTL and type for each key in one round trip.
    /// Keys whose lookup partially failed come back as `None`.
    fn key_details(
        &mut self,
        keys: &[String],
    ) -> impl Future<Output = Result<Vec<Option<KeyDetails>>>> + Send;

    /// Fetch up to `count` slow-log entries.
    fn slow_log(&mut self, count: usize) -> impl Future<Output = Result<Vec<SlowLogEntry>>> + Send;

    /// Open a command-stream subscription on its own connection.
    fn monitor(&mut self) -> impl Future<Output = Result<MonitorStream>> + Send;
}

/// [`Store`] backed by a Redis-compatible server.
pub struct RedisStore {
    client: redis::Client,
    conn: MultiplexedConnection,
}

impl RedisStore {
    /// Connect and verify the server answers.
    pub async fn connect(cfg: &RedisConfig) -> Result<Self> {
        let scheme = if cfg.tls { "rediss" } else { "redis" };
        let url = format!("{scheme}://{}:{}/", cfg.host, cfg.port);

        let mut info = url
            .as_str()
            .into_connection_info()
            .with_context(|| format!("invalid redis address {}:{}", cfg.host, cfg.port))?;
        info.redis.db = i64::from(cfg.db);
        if !cfg.username.is_empty() {
            info.redis.username = Some(cfg.username.clone());
        }
        if !cfg.password.is_empty() {
            info.redis.password = Some(cfg.password.clone());
        }

        let client = redis::Client::open(info).context("building redis client")?;
        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .with_context(|| format!("connecting to {}:{}", cfg.host, cfg.port))?;

        let _: () = redis::cmd("CLIENT")
            .arg("SETNAME")
            .arg(CLIENT_NAME)
            .query_async(&mut conn)
            .await
            .context("setting client name")?;

        debug!(host = %cfg.host, port = cfg.port, db = cfg.db, tls = cfg.tls, "connected");

        Ok(Self { client, conn })
    }
}

impl Store for RedisStore {
    async fn info(&mut self) -> Result<String> {
        redis::cmd("INFO")
            .query_async(&mut self.conn)
            .await
            .context("fetching INFO")
    }

    async fn scan(&mut self, cursor: u64, count: usize) -> Result<(u64, Vec<String>)> {
        redis::cmd("SCAN")
            .arg(cursor)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.conn)
            .await
            .with_context(|| format!("scanning from cursor {cursor}"))
    }

    async fn key_details(&mut self, keys: &[String]) -> Result<Vec<Option<KeyDetails>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for key in keys {
            pipe.cmd("MEMORY").arg("USAGE").arg(key);
            pipe.cmd("TTL").arg(key);
            pipe.cmd("TYPE").arg(key);
        }

        let values: Vec<Value> = pipe
            .query_async(&mut self.conn)
            .await
            .context("executing key details pipeline")?;

        Ok(values.chunks(3).map(key_details_from_values).collect())
    }

    async fn slow_log(&mut self, count: usize) -> Result<Vec<SlowLogEntry>> {
        let raw: Vec<Value> = redis::cmd("SLOWLOG")
            .arg("GET")
            .arg(count)
            .query_async(&mut self.conn)
            .await
            .context("fetching SLOWLOG")?;

        Ok(raw.iter().filter_map(slow_log_entry_from_value).collect())
    }

    async fn monitor(&mut self) -> Result<MonitorStream> {
        let mut monitor = self
            .client
            .get_async_monitor()
            .await
            .context("opening monitor connection")?;
        monitor.monitor().await.context("starting MONITOR")?;

        Ok(monitor.into_on_message::<String>().boxed())
    }
}

/// Decodes one MEMORY USAGE / TTL / TYPE triple.
fn key_details_from_values(triple: &[Value]) -> Option<KeyDetails> {
    let [memory, ttl, key_type] = triple else {
        return None;
    };

    let memory: u64 = from_redis_value::<Option<u64>>(memory).ok()??;
    let ttl: i64 = from_redis_value(ttl).ok()?;
    let key_type: String = from_redis_value(key_type).ok()?;

    // TTL -2 and type "none" both mean the key vanished between SCAN and now.
    if ttl == -2 || key_type == "none" {
        return None;
    }

    Some(KeyDetails {
        memory,
        ttl_secs: u64::try_from(ttl).unwrap_or(0),
        key_type,
    })
}

/// Decodes `[id, unix-ts, micros, [args..], client-addr, client-name]`.
/// The last two fields are absent on older servers.
fn slow_log_entry_from_value(value: &Value) -> Option<SlowLogEntry> {
    let fields: Vec<Value> = from_redis_value(value).ok()?;
    let id: u64 = from_redis_value(fields.first()?).ok()?;
    let ts: i64 = from_redis_value(fields.get(1)?).ok()?;
    let micros: u64 = from_redis_value(fields.get(2)?).ok()?;
    let mut args: Vec<String> = from_redis_value(fields.get(3)?).ok()?;

    let text = |idx: usize| -> String {
        fields
            .get(idx)
            .and_then(|v| from_redis_value::<String>(v).ok())
            .unwrap_or_default()
    };

    let command = if args.is_empty() {
        String::new()
    } else {
        args.remove(0)
    };

    Some(SlowLogEntry {
        id,
        timestamp: Utc.timestamp_opt(ts, 0).single()?,
        duration: Duration::from_micros(micros),
        command,
        args,
        client_addr: text(4),
        client_name: text(5),
    })
}
