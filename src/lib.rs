//! Live profiler for Redis-compatible key-value stores.
//!
//! The [`scanner::Scanner`] samples the key space and live traffic through
//! a [`store::Store`], polls server info, and publishes aggregated
//! [`state::State`] snapshots for a consumer to render.

pub mod config;
pub mod format;
pub mod info;
pub mod keys;
pub mod namespace;
pub mod record;
pub mod scanner;
pub mod slowlog;
pub mod state;
pub mod store;
pub mod topk;
