//! External cache tier contract.
//!
//! The manager treats the external tier as an accelerator, not a source of
//! truth: every call is bounded by `CacheConfig::external_timeout`, and an
//! `Err` or timeout degrades the operation to the local tier.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::local::expires_at;

/// Boxed future returned by every [`ExternalCache`] method.
pub type ExternalFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send + 'a>>;

/// A distributed cache client (Redis, Memcached, a managed KV service).
pub trait ExternalCache: Send + Sync {
    /// Fetch a value. `Ok(None)` is a miss.
    fn get<'a>(&'a self, key: &'a str) -> ExternalFuture<'a, Option<Value>>;
    /// Store a value that expires after `ttl`.
    fn set<'a>(&'a self, key: &'a str, value: &'a Value, ttl: Duration) -> ExternalFuture<'a, ()>;
    /// Remove a value.
    fn delete<'a>(&'a self, key: &'a str) -> ExternalFuture<'a, ()>;
    /// Whether a live value exists.
    fn exists<'a>(&'a self, key: &'a str) -> ExternalFuture<'a, bool>;
    /// Drop every value.
    fn flush_all(&self) -> ExternalFuture<'_, ()>;
}

/// In-process stand-in for an external tier, useful for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryExternalCache {
    entries: Mutex<HashMap<String, (Value, Instant)>>,
}

impl InMemoryExternalCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values, including expired ones not yet read.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

impl ExternalCache for InMemoryExternalCache {
    fn get<'a>(&'a self, key: &'a str) -> ExternalFuture<'a, Option<Value>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().await;
            match entries.get(key) {
                Some((_, expires_at)) if Instant::now() >= *expires_at => {
                    entries.remove(key);
                    Ok(None)
                }
                Some((value, _)) => Ok(Some(value.clone())),
                None => Ok(None),
            }
        })
    }

    fn set<'a>(&'a self, key: &'a str, value: &'a Value, ttl: Duration) -> ExternalFuture<'a, ()> {
        Box::pin(async move {
            self.entries
                .lock()
                .await
                .insert(key.to_string(), (value.clone(), expires_at(Instant::now(), ttl)));
            Ok(())
        })
    }

    fn delete<'a>(&'a self, key: &'a str) -> ExternalFuture<'a, ()> {
        Box::pin(async move {
            self.entries.lock().await.remove(key);
            Ok(())
        })
    }

    fn exists<'a>(&'a self, key: &'a str) -> ExternalFuture<'a, bool> {
        Box::pin(async move {
            let entries = self.entries.lock().await;
            Ok(entries
                .get(key)
                .is_some_and(|(_, expires_at)| Instant::now() < *expires_at))
        })
    }

    fn flush_all(&self) -> ExternalFuture<'_, ()> {
        Box::pin(async move {
            self.entries.lock().await.clear();
            Ok(())
        })
    }
}
