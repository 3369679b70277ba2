use std::time::Duration;

use async_trait::async_trait;

use crate::{Cache, Result};

/// Cache that stores nothing.
///
/// Every read misses and `set_if_absent` always reports the slot as won, so
/// dedup and locking both degrade to their fail-open behavior. Substituted
/// in tests and in deployments with no shared cache configured.
#[derive(Default)]
pub struct NoopCache;

impl NoopCache {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Cache for NoopCache {
    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<()> {
        Ok(())
    }

    async fn del(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, _key: &str) -> Result<bool> {
        Ok(false)
    }

    async fn set_if_absent(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<bool> {
        Ok(true)
    }
}
