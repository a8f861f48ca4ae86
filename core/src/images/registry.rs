use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::remote::{Fetcher, Uploader};
use crate::settings::Settings;
use crate::vault::Vault;

use super::{ImageManager, Result};

/// Lazily constructed cache of [`ImageManager`]s, one per document.
///
/// The registry owns every manager it hands out and callers receive mutable
/// borrows. It is an explicit value passed to its consumers rather than
/// process-wide state, so isolated instances can coexist (one per test, one
/// per plugin instance).
pub struct ManagerRegistry {
    vault: Arc<Vault>,
    settings: Arc<Settings>,
    uploader: Arc<dyn Uploader>,
    fetcher: Arc<dyn Fetcher>,
    managers: HashMap<String, ImageManager>,
}

impl ManagerRegistry {
    pub fn new(
        vault: Arc<Vault>,
        settings: Arc<Settings>,
        uploader: Arc<dyn Uploader>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Self {
        ManagerRegistry {
            vault,
            settings,
            uploader,
            fetcher,
            managers: HashMap::new(),
        }
    }

    /// Returns the manager for a document, constructing and loading it on
    /// first use.
    ///
    /// Construction never fails: a document without a sidecar starts with
    /// an empty map, and an unreadable sidecar is reported and treated the
    /// same way.
    pub async fn manager(&mut self, md_path: &str) -> &mut ImageManager {
        if !self.managers.contains_key(md_path) {
            let mut manager = ImageManager::new(
                Arc::clone(&self.vault),
                Arc::clone(&self.settings),
                Arc::clone(&self.uploader),
                Arc::clone(&self.fetcher),
                md_path,
            );
            match manager.load_from_json().await {
                Ok(loaded) => debug!(md_path, loaded, "Manager constructed"),
                Err(e) => warn!(md_path, error = %e, "could not load sidecar; starting empty"),
            }
            self.managers.insert(md_path.to_string(), manager);
        }
        self.managers
            .get_mut(md_path)
            .expect("manager inserted above")
    }

    /// Whether a manager is currently cached for this document.
    pub fn contains(&self, md_path: &str) -> bool {
        self.managers.contains_key(md_path)
    }

    /// Drops the cached manager for a deleted or closed document. On-disk
    /// state is untouched. Returns whether an entry existed.
    pub fn remove(&mut self, md_path: &str) -> bool {
        self.managers.remove(md_path).is_some()
    }

    /// Relocates a renamed document's assets and re-keys its cache entry.
    ///
    /// `Ok(false)` when no manager is cached for `old_path`. On a rename
    /// failure the entry stays keyed by `old_path`, matching the manager's
    /// rolled-back state.
    #[instrument(skip(self))]
    pub async fn rename(&mut self, old_path: &str, new_path: &str) -> Result<bool> {
        let Some(manager) = self.managers.get_mut(old_path) else {
            return Ok(false);
        };
        manager.rename_image_folder(new_path).await?;
        if let Some(manager) = self.managers.remove(old_path) {
            self.managers.insert(new_path.to_string(), manager);
        }
        debug!("Manager re-keyed");
        Ok(true)
    }
}
