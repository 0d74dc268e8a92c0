use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::error;

use crate::error::StorageError;
use crate::settings::{resolve_effective_config, AppConfig, AppConfigPatch};
use crate::storage::{KeyValueStore, APP_CONFIG_KEY};

/// Holds the persisted [`AppConfig`] and the overrides layered over it.
pub struct ConfigService {
    store: Arc<dyn KeyValueStore>,
    stored: Mutex<AppConfig>,
    overrides: AppConfigPatch,
    tx: watch::Sender<AppConfig>,
}

impl ConfigService {
    pub fn load(store: Arc<dyn KeyValueStore>, overrides: AppConfigPatch) -> Result<Self, StorageError> {
        let stored = match store.get(APP_CONFIG_KEY) {
            Ok(None) => AppConfig::default(),
            Ok(Some(raw)) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                error!(error = %e, "discarding unreadable app config");
                AppConfig::default()
            }),
            Err(e) if e.is_corrupt() => {
                error!(error = %e, "discarding unreadable app config");
                AppConfig::default()
            }
            Err(e) => return Err(e),
        };
        let (tx, _rx) = watch::channel(resolve_effective_config(&stored, &overrides));
        Ok(Self { store, stored: Mutex::new(stored), overrides, tx })
    }

    /// Effective config: overrides, then stored values, then defaults.
    pub fn current(&self) -> AppConfig {
        self.tx.borrow().clone()
    }

    /// The persisted config, without overrides.
    pub fn stored(&self) -> AppConfig {
        self.stored.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AppConfig> {
        self.tx.subscribe()
    }

    /// Merges `patch` into the stored config and persists it. Overrides are
    /// never written back.
    pub fn update_config(&self, patch: AppConfigPatch) -> Result<(), StorageError> {
        let mut stored = self.stored.lock().unwrap_or_else(|e| e.into_inner());
        let mut next = stored.clone();
        next.apply_patch(patch);
        self.store.set(APP_CONFIG_KEY, &serde_json::to_string(&next)?)?;
        let effective = resolve_effective_config(&next, &self.overrides);
        *stored = next;
        // Publish under the lock so notifications follow write order.
        self.tx.send_replace(effective);
        Ok(())
    }
}
