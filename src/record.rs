//! Line formats of the two scratch logs.
//!
//! Both are whitespace separated, one record per line. Keys containing
//! whitespace do not survive the round trip and are skipped on read.

use std::fmt;

/// One sampled key: `<key> <memory-bytes> <ttl-seconds> <type>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub key: String,
    pub memory: u64,
    /// Remaining TTL in seconds, 0 when the key has no expiry.
    pub ttl_secs: u64,
    pub key_type: String,
}

impl ScanRecord {
    /// Parses a scan log line, returning `None` for malformed lines.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let key = fields.next()?;
        let memory = fields.next()?.parse().ok()?;
        let ttl_secs = fields.next()?.parse().ok()?;
        let key_type = fields.next()?;
        if fields.next().is_some() {
            return None;
        }

        Some(Self {
            key: key.to_string(),
            memory,
            ttl_secs,
            key_type: key_type.to_string(),
        })
    }
}

impl fmt::Display for ScanRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.key, self.memory, self.ttl_secs, self.key_type
        )
    }
}

/// One observed command: `<key> <lowercased command>`. The key may be empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpRecord {
    pub key: String,
    pub command: String,
}

impl OpRecord {
    /// Parses an operation log line. Lines without a key are not
    /// attributable to any key and parse as `None`.
    pub fn parse(line: &str) -> Option<Self> {
        let mut fields = line.split_whitespace();
        let key = fields.next()?;
        let command = fields.next()?;
        if fields.next().is_some() {
            return None;
        }

        Some(Self {
            key: key.to_string(),
            command: command.to_string(),
        })
    }

    /// Extracts the command and first argument from a MONITOR line such as
    /// `1700000000.123456 [0 127.0.0.1:6379] "SET" "user:1" "x"`.
    ///
    /// Returns `None` when no quoted command is present or the command is a
    /// script invocation.
    pub fn from_monitor_line(line: &str) -> Option<Self> {
        let mut quoted = line.split('"').skip(1).step_by(2);
        let command = quoted.next()?.to_ascii_lowercase();
        if crate::namespace::ops::is_script_command(&command) {
            return None;
        }
        let key = quoted.next().unwrap_or_default().to_string();

        Some(Self { key, command })
    }
}

impl fmt::Display for OpRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key, self.command)
    }
}
