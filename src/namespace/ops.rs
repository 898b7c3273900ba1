use std::fmt;

/// Operation class a command is counted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpType {
    Get,
    Set,
    Del,
    Eval,
    Unknown,
    /// Synthesized sum of every other class.
    Total,
}

impl OpType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Del => "del",
            Self::Eval => "eval",
            Self::Unknown => "unknown",
            Self::Total => "total",
        }
    }

    /// Classifies a command name, case-insensitively.
    pub fn classify(command: &str) -> Self {
        match command.to_ascii_lowercase().as_str() {
            "get" | "mget" | "hget" | "hmget" | "hgetall" | "zrange" | "zrevrange" | "lrange"
            | "scard" | "sismember" | "zcard" | "zrank" | "getbit" | "exists" | "ttl" | "pttl"
            | "type" | "keys" | "scan" => Self::Get,

            "set" | "mset" | "hset" | "hmset" | "lpush" | "rpush" | "sadd" | "zadd" | "setbit"
            | "incr" | "decr" | "incrby" | "append" | "setex" | "psetex" | "setnx" | "zincrby"
            | "expire" | "pexpire" | "expireat" | "persist" | "rename" | "renamenx" | "move"
            | "lset" | "linsert" | "hincrby" | "hincrbyfloat" => Self::Set,

            "del" | "unlink" | "flushdb" | "flushall" | "lpop" | "rpop" | "spop" | "zrem"
            | "hdel" | "srem" | "ltrim" => Self::Del,

            "eval" => Self::Eval,

            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scripting commands whose payload is opaque; traffic sampling drops them.
pub fn is_script_command(command: &str) -> bool {
    matches!(
        command.to_ascii_lowercase().as_str(),
        "eval" | "evalsha" | "eval_ro" | "evalsha_ro"
    )
}
