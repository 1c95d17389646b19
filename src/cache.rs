//! Process-lifetime cache of synthesized implementations.
//!
//! Each declaration identity maps to a single-flight cell: the first
//! caller to miss runs synthesis, concurrent callers for the same
//! identity wait for that result instead of asking the oracle again.
//! A failed synthesis leaves the cell empty, so the next call retries.
//! Entries are never evicted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, PoisonError};

use tokio::sync::OnceCell;

use crate::synth::SynthesizedImplementation;

type Slot = Arc<OnceCell<Arc<SynthesizedImplementation>>>;

/// A thread-safe map from declaration identity to implementation.
#[derive(Debug, Default)]
pub struct ImplementationCache {
    slots: Mutex<HashMap<String, Slot>>,
}

impl ImplementationCache {
    /// Create a new empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// The cached implementation for `identity`, if synthesis finished.
    pub fn lookup(&self, identity: &str) -> Option<Arc<SynthesizedImplementation>> {
        self.slots().get(identity).and_then(|slot| slot.get().cloned())
    }

    /// Insert `implementation` unless one is already cached.
    ///
    /// Returns whichever implementation the cache holds afterwards.
    pub fn insert(
        &self,
        identity: &str,
        implementation: SynthesizedImplementation,
    ) -> Arc<SynthesizedImplementation> {
        let slot = self.slot(identity);
        let implementation = Arc::new(implementation);
        match slot.set(Arc::clone(&implementation)) {
            Ok(()) => implementation,
            // Lost to a concurrent insert or a synthesis in flight.
            Err(_) => slot.get().cloned().unwrap_or(implementation),
        }
    }

    /// Return the cached implementation, running `synthesize` on a miss.
    ///
    /// The boolean is `true` only for the caller whose `synthesize`
    /// produced the entry.
    pub async fn get_or_synthesize<F, Fut, E>(
        &self,
        identity: &str,
        synthesize: F,
    ) -> Result<(Arc<SynthesizedImplementation>, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<SynthesizedImplementation, E>>,
    {
        let slot = self.slot(identity);
        if let Some(hit) = slot.get() {
            tracing::debug!(identity, "implementation cache hit");
            return Ok((Arc::clone(hit), false));
        }

        let mut fresh = false;
        let implementation = slot
            .get_or_try_init(|| async {
                tracing::debug!(identity, "implementation cache miss");
                let implementation = synthesize().await?;
                fresh = true;
                Ok(Arc::new(implementation))
            })
            .await?;
        Ok((Arc::clone(implementation), fresh))
    }

    /// Check if an implementation is cached for `identity`.
    pub fn contains(&self, identity: &str) -> bool {
        self.lookup(identity).is_some()
    }

    /// Number of cached implementations.
    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slot(&self, identity: &str) -> Slot {
        Arc::clone(self.slots().entry(identity.to_string()).or_default())
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        // The map holds no invariant a panicking holder could break.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

static GLOBAL_CACHE: LazyLock<Arc<ImplementationCache>> =
    LazyLock::new(|| Arc::new(ImplementationCache::new()));

/// Get the process-wide implementation cache.
///
/// Every [`AnyDef`](crate::AnyDef) uses this cache unless given its own.
pub fn global_cache() -> Arc<ImplementationCache> {
    Arc::clone(&GLOBAL_CACHE)
}
