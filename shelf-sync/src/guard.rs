//! Keyed single-flight guard
//!
//! At most one sync may run per key (`pull:{target}`, `push:{client}`). A
//! second caller is refused immediately instead of queueing behind the first.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::errors::{Result, SyncError};

#[derive(Debug, Clone, Default)]
pub struct SingleFlightGuard {
    held: Arc<Mutex<HashSet<String>>>,
}

/// Proof of holding a key; the key is released when this is dropped
#[derive(Debug)]
pub struct FlightPermit {
    key: String,
    held: Arc<Mutex<HashSet<String>>>,
}

impl SingleFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the key if nobody holds it
    pub fn try_acquire(&self, key: &str) -> Option<FlightPermit> {
        let mut held = lock(&self.held);
        if !held.insert(key.to_string()) {
            debug!("Flight {} already held", key);
            return None;
        }
        Some(FlightPermit {
            key: key.to_string(),
            held: Arc::clone(&self.held),
        })
    }

    /// Like [`try_acquire`](Self::try_acquire) but reports a busy key as `Locked`
    pub fn acquire(&self, key: &str) -> Result<FlightPermit> {
        self.try_acquire(key)
            .ok_or_else(|| SyncError::Locked(key.to_string()))
    }

    pub fn is_held(&self, key: &str) -> bool {
        lock(&self.held).contains(key)
    }

    pub fn held_keys(&self) -> BTreeSet<String> {
        lock(&self.held).iter().cloned().collect()
    }
}

impl FlightPermit {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for FlightPermit {
    fn drop(&mut self) {
        if !lock(&self.held).remove(&self.key) {
            warn!("Flight {} was released twice", self.key);
        }
    }
}

/// The set stays consistent even if a holder panicked, so poisoning is ignored
fn lock(held: &Mutex<HashSet<String>>) -> MutexGuard<'_, HashSet<String>> {
    held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorClass;

    #[test]
    fn test_second_acquire_is_refused() {
        let guard = SingleFlightGuard::new();

        let permit = guard.acquire("pull:plex").unwrap();
        assert_eq!(permit.key(), "pull:plex");
        assert!(guard.is_held("pull:plex"));

        let err = guard.acquire("pull:plex").unwrap_err();
        assert_eq!(err.class(), ErrorClass::Locked);

        // Other keys are independent
        assert!(guard.try_acquire("push:laptop").is_some());
    }

    #[test]
    fn test_drop_releases() {
        let guard = SingleFlightGuard::new();
        {
            let _permit = guard.try_acquire("pull:plex").unwrap();
            assert_eq!(guard.held_keys().len(), 1);
        }
        assert!(!guard.is_held("pull:plex"));
        assert!(guard.try_acquire("pull:plex").is_some());
    }

    #[tokio::test]
    async fn test_released_when_task_fails() {
        let guard = SingleFlightGuard::new();
        let inner = guard.clone();

        let handle = tokio::spawn(async move {
            let _permit = inner.acquire("pull:plex").unwrap();
            panic!("sync blew up");
        });
        assert!(handle.await.is_err());

        assert!(!guard.is_held("pull:plex"));
    }
}
