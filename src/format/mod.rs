//! Human-readable renderings of profiler figures.

use std::time::Duration;

const BYTE_UNITS: &[u8] = b"KMGTPE";

/// Binary-prefixed size, e.g. `1536` -> `1.5 KB`.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp + 1 < BYTE_UNITS.len() {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }

    format!(
        "{:.1} {}B",
        bytes as f64 / div as f64,
        BYTE_UNITS[exp] as char
    )
}

/// Compact count, e.g. `12345.0` -> `12.3K`.
pub fn format_number(n: f64) -> String {
    if n >= 1e9 {
        format!("{:.1}B", n / 1e9)
    } else if n >= 1e6 {
        format!("{:.1}M", n / 1e6)
    } else if n >= 1e3 {
        format!("{:.1}K", n / 1e3)
    } else {
        format!("{n:.0}")
    }
}

pub fn format_ops_per_sec(rate: f64) -> String {
    format!("{}/s", format_number(rate))
}

/// Whole-second duration as `1d 2h 3m 4s`, omitting zero units.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        return "0s".to_string();
    }

    let parts = [
        (secs / 86_400, 'd'),
        ((secs % 86_400) / 3_600, 'h'),
        ((secs % 3_600) / 60, 'm'),
        (secs % 60, 's'),
    ];

    parts
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect::<Vec<_>>()
        .join(" ")
}
