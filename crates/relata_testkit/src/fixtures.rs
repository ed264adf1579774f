//! Test fixtures and store helpers.
//!
//! Provides convenience functions for setting up test stores and the
//! contexts that run against them.

use relata_core::{
    ContextOptions, CooperativeExecutor, ModelContext, Schema, Store, StoreConfiguration,
};
use std::path::PathBuf;
use std::sync::{Arc, Once};
use tempfile::TempDir;
use tracing::debug;

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// Filtering follows `RUST_LOG`; output goes through the test harness so it
/// only shows for failing tests.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<Store>,
    schema: Arc<Schema>,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory(schema: Arc<Schema>) -> Self {
        init_tracing();
        let store = Store::open(StoreConfiguration::in_memory(), Arc::clone(&schema))
            .expect("Failed to open in-memory store");
        Self {
            store: Arc::new(store),
            schema,
            _temp_dir: None,
        }
    }

    /// Creates a new file-backed test store in a temporary directory.
    pub fn file(schema: Arc<Schema>) -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = StoreConfiguration::file(temp_dir.path().join("store.relata"));
        let store =
            Store::open(config, Arc::clone(&schema)).expect("Failed to open file store");
        Self {
            store: Arc::new(store),
            schema,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the journal path if file-backed, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir
            .as_ref()
            .map(|d| d.path().join("store.relata"))
    }

    /// Drops the store and opens the same journal again, as a fresh process
    /// would. In-memory stores come back empty.
    pub fn reopen(self) -> Self {
        let Self {
            store,
            schema,
            _temp_dir,
        } = self;
        drop(store);

        let config = match &_temp_dir {
            Some(dir) => StoreConfiguration::file(dir.path().join("store.relata")),
            None => StoreConfiguration::in_memory(),
        };
        debug!(location = ?config.location, "reopening test store");
        let store = Store::open(config, Arc::clone(&schema)).expect("Failed to reopen store");
        Self {
            store: Arc::new(store),
            schema,
            _temp_dir,
        }
    }

    /// The schema the store was opened with.
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// A new context with autosave off.
    pub fn context(&self) -> ModelContext {
        ModelContext::new(self.store.clone())
    }

    /// A new context with autosave on, scheduled on `executor`.
    pub fn autosave_context(&self, executor: &Arc<CooperativeExecutor>) -> ModelContext {
        ModelContext::with_executor(
            self.store.clone(),
            executor.clone(),
            ContextOptions::new().autosave(true),
        )
    }
}

impl std::ops::Deref for TestStore {
    type Target = Store;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a fresh in-memory store over the model catalog.
///
/// # Example
///
/// ```rust
/// use relata_testkit::with_catalog;
///
/// let saved = with_catalog(|store| {
///     let context = store.context();
///     context.save().unwrap()
/// });
/// assert!(saved.is_empty());
/// ```
pub fn with_catalog<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let store = TestStore::memory(crate::models::catalog());
    f(&store)
}

/// Runs a test with a fresh file-backed store over the model catalog. The
/// closure gets the store back so it can call [`TestStore::reopen`].
pub fn with_catalog_file<F, R>(f: F) -> R
where
    F: FnOnce(TestStore) -> R,
{
    f(TestStore::file(crate::models::catalog()))
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;
    use relata_core::Record;

    /// A store holding `count` saved `SimpleItem`s with ids `0..count`.
    pub fn populated_store(count: i64) -> TestStore {
        let store = TestStore::memory(crate::models::catalog());
        let context = store.context();
        for id in 0..count {
            context
                .insert(
                    Record::new("SimpleItem")
                        .set("id", id)
                        .set("name", format!("item {id}")),
                )
                .expect("Failed to insert item");
        }
        context.save().expect("Failed to save items");
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populated_store_is_visible_to_new_contexts() {
        let store = scenarios::populated_store(5);
        assert_eq!(store.context().count_all("SimpleItem").unwrap(), 5);
        assert_eq!(store.sequence().as_u64(), 1);
    }

    #[test]
    fn file_store_survives_reopen() {
        let store = TestStore::file(crate::models::catalog());
        let context = store.context();
        context
            .insert(relata_core::Record::new("SimpleItem").set("id", 1).set("name", "a"))
            .unwrap();
        context.save().unwrap();
        drop(context);

        let store = store.reopen();
        assert!(store.path().is_some());
        assert_eq!(store.context().count_all("SimpleItem").unwrap(), 1);
    }

    #[test]
    fn memory_store_reopens_empty() {
        let store = scenarios::populated_store(2).reopen();
        assert_eq!(store.context().count_all("SimpleItem").unwrap(), 0);
    }
}
