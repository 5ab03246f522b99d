//! Process-local session cache

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use async_trait::async_trait;
use tollgate_clock::{Clock, DurationSecs, System, UnixTime};

use super::{SessionCache, SessionKeyRef};
use crate::error::{session_cache_error, SessionCacheError};

/// A session cache held in process memory
///
/// Expired entries are treated as absent and purged lazily.
#[derive(Debug, Default)]
pub struct InMemorySessionCache<C = System> {
    entries: Mutex<HashMap<String, Entry>>,
    clock: C,
}

#[derive(Debug)]
struct Entry {
    value: String,
    expiry: UnixTime,
}

impl InMemorySessionCache<System> {
    /// Constructs an empty cache using the system clock
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C> InMemorySessionCache<C> {
    /// Sets a custom clock to be used
    ///
    /// Useful for testing purposes
    pub fn with_clock<D>(self, clock: D) -> InMemorySessionCache<D> {
        InMemorySessionCache {
            entries: self.entries,
            clock,
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, Entry>>, SessionCacheError> {
        self.entries
            .lock()
            .map_err(|_| session_cache_error("session cache lock poisoned"))
    }
}

impl<C: Clock> InMemorySessionCache<C> {
    /// The number of live entries
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries
            .lock()
            .map(|entries| entries.values().filter(|e| e.expiry > now).count())
            .unwrap_or_default()
    }

    /// Whether the cache holds no live entries
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl<C: Clock + Send + Sync + std::fmt::Debug> SessionCache for InMemorySessionCache<C> {
    async fn get(&self, key: &SessionKeyRef) -> Result<Option<String>, SessionCacheError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;

        match entries.get(key.as_str()) {
            Some(entry) if entry.expiry > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key.as_str());
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &SessionKeyRef,
        value: &str,
        ttl: DurationSecs,
    ) -> Result<(), SessionCacheError> {
        let now = self.clock.now();
        let mut entries = self.lock()?;

        entries.retain(|_, e| e.expiry > now);
        entries.insert(
            key.as_str().to_owned(),
            Entry {
                value: value.to_owned(),
                expiry: now + ttl,
            },
        );

        Ok(())
    }

    async fn delete(&self, key: &SessionKeyRef) -> Result<bool, SessionCacheError> {
        let now = self.clock.now();
        let removed = self.lock()?.remove(key.as_str());
        Ok(removed.map_or(false, |e| e.expiry > now))
    }

    async fn take(&self, key: &SessionKeyRef) -> Result<Option<String>, SessionCacheError> {
        let now = self.clock.now();
        let removed = self.lock()?.remove(key.as_str());
        Ok(removed.filter(|e| e.expiry > now).map(|e| e.value))
    }
}
