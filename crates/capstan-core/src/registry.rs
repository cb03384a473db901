//! Dual-key index of live torrent controllers.
//!
//! Torrents are addressed two ways: by canonical display name and by the
//! storage filename of their archived descriptor. Both indexes are kept
//! in lockstep, and lookups that accept either key try the name first.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::controller::TorrentController;
use crate::error::{ControlError, ControlResult};

#[derive(Default)]
struct Indexes {
    by_name: BTreeMap<String, Arc<TorrentController>>,
    filename_to_name: BTreeMap<String, String>,
}

/// Thread-safe roster of every torrent the daemon manages.
#[derive(Default)]
pub struct TorrentRegistry {
    inner: RwLock<Indexes>,
}

impl TorrentRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prepared controller under both of its keys.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::DuplicateTorrent`] if either key is
    /// already taken.
    pub fn insert(&self, controller: Arc<TorrentController>) -> ControlResult<()> {
        let name = controller.name();
        let filename = controller.filename();
        let mut indexes = self.write();
        if indexes.by_name.contains_key(&name) || indexes.filename_to_name.contains_key(&filename)
        {
            return Err(ControlError::DuplicateTorrent { name, filename });
        }
        indexes.filename_to_name.insert(filename, name.clone());
        indexes.by_name.insert(name, controller);
        Ok(())
    }

    /// Look up a controller by display name.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidTorrent`] if no torrent has the
    /// name.
    pub fn get_by_name(&self, name: &str) -> ControlResult<Arc<TorrentController>> {
        self.read()
            .by_name
            .get(name)
            .cloned()
            .ok_or_else(|| ControlError::InvalidTorrent {
                identifier: name.to_owned(),
            })
    }

    /// Look up a controller by storage filename.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidTorrent`] if no torrent has the
    /// filename.
    pub fn get_by_filename(&self, filename: &str) -> ControlResult<Arc<TorrentController>> {
        let indexes = self.read();
        indexes
            .filename_to_name
            .get(filename)
            .and_then(|name| indexes.by_name.get(name))
            .cloned()
            .ok_or_else(|| ControlError::InvalidTorrent {
                identifier: filename.to_owned(),
            })
    }

    /// Look up a controller by either key, name first.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidTorrent`] if the identifier matches
    /// neither key.
    pub fn resolve(&self, identifier: &str) -> ControlResult<Arc<TorrentController>> {
        let indexes = self.read();
        if let Some(controller) = indexes.by_name.get(identifier) {
            return Ok(controller.clone());
        }
        indexes
            .filename_to_name
            .get(identifier)
            .and_then(|name| indexes.by_name.get(name))
            .cloned()
            .ok_or_else(|| ControlError::InvalidTorrent {
                identifier: identifier.to_owned(),
            })
    }

    /// Remove a controller by either key, name first, returning it.
    ///
    /// Both indexes are cleaned up together.
    ///
    /// # Errors
    ///
    /// Returns [`ControlError::InvalidTorrent`] if the identifier matches
    /// neither key.
    pub fn erase(&self, identifier: &str) -> ControlResult<Arc<TorrentController>> {
        let mut indexes = self.write();
        let name = if indexes.by_name.contains_key(identifier) {
            identifier.to_owned()
        } else if let Some(name) = indexes.filename_to_name.get(identifier) {
            name.clone()
        } else {
            return Err(ControlError::InvalidTorrent {
                identifier: identifier.to_owned(),
            });
        };

        let Some(controller) = indexes.by_name.remove(&name) else {
            return Err(ControlError::InvalidTorrent {
                identifier: identifier.to_owned(),
            });
        };
        indexes.filename_to_name.retain(|_, owner| owner != &name);
        Ok(controller)
    }

    /// Whether a torrent with the given name is registered.
    #[must_use]
    pub fn contains_name(&self, name: &str) -> bool {
        self.read().by_name.contains_key(name)
    }

    /// Number of registered torrents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read().by_name.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().by_name.is_empty()
    }

    /// Every registered controller, in name order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<TorrentController>> {
        self.read().by_name.values().cloned().collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Indexes> {
        self.inner.read().expect("registry lock poisoned")
    }

    fn write(&self) -> RwLockWriteGuard<'_, Indexes> {
        self.inner.write().expect("registry lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::TorrentOptions;
    use crate::store::Stores;
    use capstan_engine::{EngineSession, StorageMode};
    use capstan_events::EventBus;
    use capstan_test_support::fixtures;
    use capstan_test_support::mocks::RecordingSession;
    use std::path::Path;

    fn prepared_controller(root: &Path, name: &str) -> Arc<TorrentController> {
        let session: Arc<dyn EngineSession> = Arc::new(RecordingSession::new());
        let stores = Stores::new(root.join("state"));
        let controller = Arc::new(TorrentController::new(
            session,
            EventBus::with_capacity(64),
            stores,
            TorrentOptions {
                save_directory: root.join("payload"),
                move_to_directory: None,
                storage_mode: StorageMode::Sparse,
            },
        ));
        let descriptor = fixtures::write_descriptor(root, name, &[1_024]);
        controller.prepare(&descriptor).expect("prepare");
        controller
    }

    #[test]
    fn both_keys_resolve_to_the_same_controller() {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = TorrentRegistry::new();
        registry
            .insert(prepared_controller(dir.path(), "alpha"))
            .expect("insert");

        assert_eq!(registry.len(), 1);
        let by_name = registry.get_by_name("alpha").expect("by name");
        let by_filename = registry.get_by_filename("alpha.torrent").expect("by filename");
        assert!(Arc::ptr_eq(&by_name, &by_filename));
        assert!(Arc::ptr_eq(
            &registry.resolve("alpha.torrent").expect("resolve"),
            &by_name
        ));
    }

    #[test]
    fn duplicate_registrations_are_rejected() {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = TorrentRegistry::new();
        registry
            .insert(prepared_controller(dir.path(), "alpha"))
            .expect("insert");

        let error = registry
            .insert(prepared_controller(dir.path(), "alpha"))
            .expect_err("duplicate");
        assert!(matches!(error, ControlError::DuplicateTorrent { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn erase_cleans_both_indexes() {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = TorrentRegistry::new();
        registry
            .insert(prepared_controller(dir.path(), "alpha"))
            .expect("insert alpha");
        registry
            .insert(prepared_controller(dir.path(), "bravo"))
            .expect("insert bravo");

        let erased = registry.erase("alpha.torrent").expect("erase by filename");
        assert_eq!(erased.name(), "alpha");
        assert!(registry.get_by_name("alpha").is_err());
        assert!(registry.get_by_filename("alpha.torrent").is_err());
        assert_eq!(registry.len(), 1);

        registry.erase("bravo").expect("erase by name");
        assert!(registry.is_empty());
    }

    #[test]
    fn erase_of_unknown_identifiers_fails() {
        let registry = TorrentRegistry::new();
        let error = registry.erase("ghost").expect_err("unknown");
        assert!(matches!(error, ControlError::InvalidTorrent { identifier } if identifier == "ghost"));
    }

    #[test]
    fn snapshot_iterates_in_name_order() {
        let dir = tempfile::tempdir().expect("temp dir");
        let registry = TorrentRegistry::new();
        for name in ["delta", "bravo", "echo"] {
            registry
                .insert(prepared_controller(dir.path(), name))
                .expect("insert");
        }

        let names: Vec<String> = registry
            .snapshot()
            .iter()
            .map(|controller| controller.name())
            .collect();
        assert_eq!(names, vec!["bravo", "delta", "echo"]);
    }
}
