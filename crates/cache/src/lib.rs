//! Shared cache capability used for cross-process coordination.
//!
//! Two things live behind this seam: dedup markers for inbound messages and
//! short-TTL creation locks. Both callers treat the cache as best-effort —
//! a cache outage degrades to fail-open behavior, it never blocks delivery.

pub mod error;
pub mod lock;
pub mod memory;
pub mod noop;

use std::time::Duration;

use async_trait::async_trait;

pub use {
    error::{Error, Result},
    lock::CreationLock,
    memory::MemoryCache,
    noop::NoopCache,
};

/// Key/value cache with TTL and an atomic set-if-absent primitive.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    async fn del(&self, key: &str) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomically set `key` only if it has no live value. Returns `true` if
    /// the value was written (the caller holds the slot).
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;
}
