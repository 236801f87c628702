//! Single active client
//!
//! At most one client connection is served per process. Claiming the slot
//! signals the previous holder to close before the new one proceeds.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// Proof of holding the client slot
#[derive(Debug)]
pub struct ClientLease {
    pub id: u64,
    /// Flips to `true` when a newer client takes the slot
    pub evicted: watch::Receiver<bool>,
}

#[derive(Debug, Default)]
pub struct ClientRegistry {
    current: Mutex<Option<(u64, watch::Sender<bool>)>>,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the slot, evicting whoever held it
    pub fn claim(&self) -> ClientLease {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let (tx, rx) = watch::channel(false);

        let prior = self.current.lock().replace((id, tx));
        if let Some((prior_id, prior_tx)) = prior {
            tracing::info!(prior = prior_id, client = id, "New client connected, closing prior client");
            let _ = prior_tx.send(true);
        }

        ClientLease { id, evicted: rx }
    }

    /// Give the slot back if `id` still holds it
    pub fn release(&self, id: u64) {
        let mut current = self.current.lock();
        if matches!(current.as_ref(), Some((held, _)) if *held == id) {
            *current = None;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.current.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_evicts_prior_client() {
        let registry = ClientRegistry::new();
        let first = registry.claim();
        assert!(!*first.evicted.borrow());

        let second = registry.claim();
        assert!(*first.evicted.borrow());
        assert!(!*second.evicted.borrow());
        assert!(registry.is_connected());
    }

    #[test]
    fn test_stale_release_keeps_new_client() {
        let registry = ClientRegistry::new();
        let first = registry.claim();
        let second = registry.claim();

        registry.release(first.id);
        assert!(registry.is_connected());

        registry.release(second.id);
        assert!(!registry.is_connected());
    }
}
