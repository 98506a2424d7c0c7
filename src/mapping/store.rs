//! PathMappingStore: the concurrently shared mapping table
//!
//! Readers take the read lock only long enough to clone the current
//! `Arc<PathMapping>`. Writers build a complete new table, persist it, and
//! only then swap the pointer under the write lock, so no reader ever sees
//! a partially applied change. Mutations (and reloads) are serialised by a
//! separate mutex that is never held by readers.
//!
//! Change notifications never wait on that mutex. A notification arriving
//! while a mutation is in flight only marks a reload as pending, and the
//! mutation performs it once it releases the lock.

use super::discovery::{self, DEFAULT_DESCRIPTOR};
use super::format::{decode_mapping, encode_mapping};
use super::PathMapping;
use crate::error::RepositoryError;
use crate::repository::Repository;
use crate::types::{FileRecord, UserInfo};
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::io::Read;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Default name of the mapping resource
pub const DEFAULT_CONFIG_FILE: &str = "openl-projects.properties";

/// A single structural change to the table
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingChange {
    Put { external: String, internal: String },
    Remove { external: String },
}

/// A new table and its serialized resource, not yet visible to readers
#[derive(Debug, Clone)]
pub struct PreparedMapping {
    pub mapping: PathMapping,
    pub resource: Vec<u8>,
}

/// Where the mapping lives inside the backend and how new projects are named
#[derive(Debug, Clone)]
pub struct MappingSettings {
    pub config_file: String,
    pub base_folder: String,
    pub descriptor: String,
}

impl Default for MappingSettings {
    fn default() -> Self {
        Self {
            config_file: DEFAULT_CONFIG_FILE.to_string(),
            base_folder: String::new(),
            descriptor: DEFAULT_DESCRIPTOR.to_string(),
        }
    }
}

pub struct PathMappingStore {
    current: RwLock<Arc<PathMapping>>,
    mutation: Mutex<()>,
    reload_pending: AtomicBool,
    settings: MappingSettings,
}

impl PathMappingStore {
    pub fn new(settings: MappingSettings) -> Self {
        Self {
            current: RwLock::new(Arc::new(PathMapping::new())),
            mutation: Mutex::new(()),
            reload_pending: AtomicBool::new(false),
            settings,
        }
    }

    pub fn settings(&self) -> &MappingSettings {
        &self.settings
    }

    /// Current published table
    pub fn snapshot(&self) -> Arc<PathMapping> {
        Arc::clone(&self.current.read())
    }

    /// Translate an external path, falling back to the path itself
    pub fn resolve_to_internal(&self, external_path: &str) -> String {
        resolve_to_internal(&self.snapshot(), external_path)
    }

    /// Translate an internal path, falling back to the path itself
    pub fn resolve_to_external(&self, internal_path: &str) -> String {
        resolve_to_external(&self.snapshot(), internal_path)
    }

    /// Load the table from the backend and publish it
    pub fn load(&self, repository: &dyn Repository) -> Result<Arc<PathMapping>, RepositoryError> {
        let loaded = {
            let _guard = self.mutation.lock();
            self.reload_pending.store(false, Ordering::Release);
            self.read_mapping(repository).map(|mapping| {
                info!("Loaded path mapping with {} projects", mapping.len());
                self.publish(mapping)
            })
        };
        self.settle(repository);
        loaded
    }

    /// Reload from the backend's authoritative state without blocking.
    ///
    /// Reloads right away when no mutation is in flight. Otherwise the
    /// reload is left pending for the mutation to run when it finishes.
    /// A failed read leaves an empty table (identity translation) rather
    /// than a stale one.
    pub fn request_reload(&self, repository: &dyn Repository) {
        self.reload_pending.store(true, Ordering::Release);
        self.settle(repository);
    }

    /// Run pending reloads for as long as the mutation lock is free
    fn settle(&self, repository: &dyn Repository) {
        while self.reload_pending.load(Ordering::Acquire) {
            let Some(_guard) = self.mutation.try_lock() else {
                debug!("Mutation in flight, deferring mapping reload");
                return;
            };
            if self.reload_pending.swap(false, Ordering::AcqRel) {
                self.reload_locked(repository);
            }
        }
    }

    /// Start a serialised mutation. Reloads requested while it is held run
    /// against `repository` once it is released.
    pub fn begin_mutation<'a>(&'a self, repository: &'a dyn Repository) -> MappingMutation<'a> {
        MappingMutation {
            store: self,
            repository,
            guard: Some(self.mutation.lock()),
        }
    }

    /// Apply one change and persist it with a plain save of the mapping resource.
    ///
    /// On a failed save the change is discarded, the table is reloaded from
    /// the backend and the save error is returned.
    pub fn mutate(
        &self,
        repository: &dyn Repository,
        change: MappingChange,
        author: Option<UserInfo>,
        comment: Option<String>,
    ) -> Result<Arc<PathMapping>, RepositoryError> {
        let mutation = self.begin_mutation(repository);
        let prepared = mutation.prepare(&change);
        let record = FileRecord {
            author,
            comment,
            ..FileRecord::new(&self.settings.config_file)
        };
        match repository.save(&record, &mut prepared.resource.as_slice()) {
            Ok(_) => Ok(mutation.publish(prepared)),
            Err(e) => {
                warn!("Failed to persist mapping change {:?}: {}", change, e);
                mutation.discard();
                Err(e)
            }
        }
    }

    fn read_mapping(&self, repository: &dyn Repository) -> Result<PathMapping, RepositoryError> {
        match repository.read(&self.settings.config_file)? {
            Some(item) => {
                let mut content = item.content;
                let mut text = String::new();
                content.read_to_string(&mut text)?;
                Ok(decode_mapping(&text, &self.settings.base_folder))
            }
            None => {
                debug!(
                    "Repository configuration file {} is not found, discovering projects",
                    self.settings.config_file
                );
                discovery::discover(
                    repository,
                    &self.settings.base_folder,
                    &self.settings.descriptor,
                )
            }
        }
    }

    fn reload_locked(&self, repository: &dyn Repository) {
        match self.read_mapping(repository) {
            Ok(mapping) => {
                debug!("Reloaded path mapping with {} projects", mapping.len());
                self.publish(mapping);
            }
            Err(e) => {
                error!("Failed to reload path mapping: {}", e);
                self.publish(PathMapping::new());
            }
        }
    }

    fn publish(&self, mapping: PathMapping) -> Arc<PathMapping> {
        let mapping = Arc::new(mapping);
        *self.current.write() = Arc::clone(&mapping);
        mapping
    }
}

/// Exclusive handle for one mapping change
pub struct MappingMutation<'a> {
    store: &'a PathMappingStore,
    repository: &'a dyn Repository,
    guard: Option<MutexGuard<'a, ()>>,
}

impl MappingMutation<'_> {
    /// Copy of the current table with `change` applied, plus its resource bytes
    pub fn prepare(&self, change: &MappingChange) -> PreparedMapping {
        let mut mapping = (*self.store.snapshot()).clone();
        match change {
            MappingChange::Put { external, internal } => {
                mapping.insert(external.clone(), internal.clone());
            }
            MappingChange::Remove { external } => {
                mapping.remove(external);
            }
        }
        let resource = encode_mapping(&mapping, &self.store.settings.base_folder).into_bytes();
        PreparedMapping { mapping, resource }
    }

    /// Make a persisted table visible to readers
    pub fn publish(self, prepared: PreparedMapping) -> Arc<PathMapping> {
        self.store.publish(prepared.mapping)
    }

    /// Drop the pending change and resynchronise with the backend
    pub fn discard(self) {
        self.store.reload_pending.store(false, Ordering::Release);
        self.store.reload_locked(self.repository);
    }
}

impl Drop for MappingMutation<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.store.settle(self.repository);
    }
}

pub(crate) fn resolve_to_internal(mapping: &PathMapping, external_path: &str) -> String {
    match mapping.to_internal(external_path) {
        Some(internal) => internal,
        None => {
            debug!(
                "Mapping for external folder '{}' is not found. Use it as is.",
                external_path
            );
            external_path.to_string()
        }
    }
}

pub(crate) fn resolve_to_external(mapping: &PathMapping, internal_path: &str) -> String {
    match mapping.to_external(internal_path) {
        Some(external) => external,
        None => {
            warn!(
                "Mapping for internal folder '{}' is not found. Use it as is.",
                internal_path
            );
            internal_path.to_string()
        }
    }
}
