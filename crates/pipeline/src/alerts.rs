//! Alert Book
//!
//! Shared front for the alert registry. Every accepted change publishes a
//! fresh snapshot on a watch channel, which is how the tick loop learns
//! about it without sharing the registry. With a store attached, a change
//! is saved before it is published; a failed save leaves the registry as
//! it was.

use crate::sinks::AlertStore;
use alerting::{AlertConfig, AlertError, AlertId, AlertRegistry, AlertUpdate, NewAlert};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

/// Snapshot of every alert, enabled or not, ordered by id
pub type AlertSnapshot = Arc<Vec<AlertConfig>>;

enum Persist {
    Save,
    Delete,
}

#[derive(Clone)]
pub struct AlertBook {
    registry: Arc<Mutex<AlertRegistry>>,
    snapshot: Arc<watch::Sender<AlertSnapshot>>,
    store: Option<Arc<dyn AlertStore>>,
    /// Serializes changes so saves land in the order they were made
    writes: Arc<tokio::sync::Mutex<()>>,
}

impl AlertBook {
    pub fn new(registry: AlertRegistry) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(registry.list()));
        Self {
            registry: Arc::new(Mutex::new(registry)),
            snapshot: Arc::new(tx),
            store: None,
            writes: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Save every later change to `store`
    pub fn with_store(mut self, store: Arc<dyn AlertStore>) -> Self {
        self.store = Some(store);
        self
    }

    fn lock(&self) -> MutexGuard<'_, AlertRegistry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn apply(
        &self,
        persist: Persist,
        change: impl FnOnce(&mut AlertRegistry) -> Result<AlertConfig, AlertError> + Send,
    ) -> Result<AlertConfig, AlertError> {
        let _write = self.writes.lock().await;
        let mut next = self.lock().clone();
        let config = change(&mut next)?;

        if let Some(store) = &self.store {
            let saved = match persist {
                Persist::Save => store.save_alert(&config).await,
                Persist::Delete => store.delete_alert(config.id).await,
            };
            saved.map_err(|e| AlertError::Storage(e.to_string()))?;
        }

        let snapshot = Arc::new(next.list());
        *self.lock() = next;
        self.snapshot.send_replace(snapshot);
        Ok(config)
    }

    pub async fn create(&self, request: NewAlert) -> Result<AlertConfig, AlertError> {
        self.apply(Persist::Save, |r| r.create(request)).await
    }

    pub async fn update(&self, id: AlertId, update: AlertUpdate) -> Result<AlertConfig, AlertError> {
        self.apply(Persist::Save, |r| r.update(id, update)).await
    }

    pub async fn set_enabled(&self, id: AlertId, enabled: bool) -> Result<AlertConfig, AlertError> {
        self.apply(Persist::Save, |r| r.set_enabled(id, enabled)).await
    }

    pub async fn remove(&self, id: AlertId) -> Result<AlertConfig, AlertError> {
        self.apply(Persist::Delete, |r| r.remove(id)).await
    }

    pub fn get(&self, id: AlertId) -> Option<AlertConfig> {
        self.lock().get(id).cloned()
    }

    pub fn list(&self) -> Vec<AlertConfig> {
        self.lock().list()
    }

    /// Alerts enabled right now
    pub fn enabled(&self) -> Vec<AlertConfig> {
        self.lock().enabled()
    }

    /// Current snapshot
    pub fn snapshot(&self) -> AlertSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receiver that sees every future snapshot
    pub fn watch(&self) -> watch::Receiver<AlertSnapshot> {
        self.snapshot.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sinks::SinkError;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct MemoryAlertStore {
        alerts: Mutex<BTreeMap<AlertId, AlertConfig>>,
        down: AtomicBool,
    }

    #[async_trait]
    impl AlertStore for MemoryAlertStore {
        async fn load_alerts(&self) -> Result<Vec<AlertConfig>, SinkError> {
            Ok(self.alerts.lock().unwrap().values().cloned().collect())
        }

        async fn save_alert(&self, alert: &AlertConfig) -> Result<(), SinkError> {
            if self.down.load(Ordering::SeqCst) {
                return Err(SinkError::Unavailable("disk full".into()));
            }
            self.alerts.lock().unwrap().insert(alert.id, alert.clone());
            Ok(())
        }

        async fn delete_alert(&self, id: AlertId) -> Result<(), SinkError> {
            self.alerts.lock().unwrap().remove(&id);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_changes_are_published() {
        let book = AlertBook::new(AlertRegistry::new(["BOOST"]));
        let mut rx = book.watch();
        assert!(rx.borrow_and_update().is_empty());

        let alert = book.create(NewAlert::new("Overboost", "BOOST", "gt", 20.0)).await.unwrap();
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().len(), 1);

        // Rejected changes publish nothing
        assert!(book.create(NewAlert::new("x", "RPM", "gt", 1.0)).await.is_err());
        assert!(!rx.has_changed().unwrap());

        book.set_enabled(alert.id, false).await.unwrap();
        assert!(!rx.borrow_and_update()[0].enabled);
        assert!(book.enabled().is_empty());
    }

    #[tokio::test]
    async fn test_changes_are_saved() {
        let store = Arc::new(MemoryAlertStore::default());
        let book = AlertBook::new(AlertRegistry::new(["BOOST", "RPM"])).with_store(store.clone());

        let a = book.create(NewAlert::new("Overboost", "BOOST", "gt", 20.0)).await.unwrap();
        let b = book.create(NewAlert::new("Redline", "RPM", "gte", 6500.0)).await.unwrap();
        book.set_enabled(a.id, false).await.unwrap();
        book.remove(b.id).await.unwrap();
        assert_eq!(store.load_alerts().await.unwrap(), book.list());

        // A failed save changes nothing
        store.down.store(true, Ordering::SeqCst);
        let mut rx = book.watch();
        let _ = rx.borrow_and_update();
        let result = book.create(NewAlert::new("Low RPM", "RPM", "lt", 700.0)).await;
        assert!(matches!(result, Err(AlertError::Storage(_))));
        assert_eq!(book.list().len(), 1);
        assert!(!rx.has_changed().unwrap());

        // Ids pick up after the saved ones
        store.down.store(false, Ordering::SeqCst);
        let mut registry = AlertRegistry::new(["BOOST", "RPM"]);
        registry.restore(store.load_alerts().await.unwrap());
        let reloaded = AlertBook::new(registry).with_store(store.clone());
        assert_eq!(reloaded.list(), book.list());
        let c = reloaded.create(NewAlert::new("Low RPM", "RPM", "lt", 700.0)).await.unwrap();
        assert!(c.id > a.id);
    }
}
