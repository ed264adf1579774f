//! Store and context configuration.

use std::path::{Path, PathBuf};

/// Where a store keeps its journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Nothing outlives the store handle.
    #[default]
    InMemory,
    /// Journal file at [`StoreConfiguration::location`].
    File,
}

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct StoreConfiguration {
    /// In-memory or file-backed.
    pub storage_mode: StorageMode,

    /// Journal path; required for [`StorageMode::File`].
    pub location: Option<PathBuf>,

    /// Whether to discard an existing journal at open.
    pub truncate_existing: bool,

    /// Whether to fsync the journal on every commit (safer but slower).
    pub sync_on_commit: bool,
}

impl Default for StoreConfiguration {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::InMemory,
            location: None,
            truncate_existing: false,
            sync_on_commit: true,
        }
    }
}

impl StoreConfiguration {
    /// Creates a configuration with default values (in-memory).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration for an in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Configuration for a file store at `path`.
    #[must_use]
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            storage_mode: StorageMode::File,
            location: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Sets the storage mode.
    #[must_use]
    pub const fn storage_mode(mut self, mode: StorageMode) -> Self {
        self.storage_mode = mode;
        self
    }

    /// Sets the journal location.
    #[must_use]
    pub fn location(mut self, path: impl AsRef<Path>) -> Self {
        self.location = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets whether to discard an existing journal at open.
    #[must_use]
    pub const fn truncate_existing(mut self, value: bool) -> Self {
        self.truncate_existing = value;
        self
    }

    /// Sets whether to fsync on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }
}

/// Per-context options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextOptions {
    /// Whether mutations schedule a coalesced save on the context's executor.
    pub autosave: bool,
}

impl ContextOptions {
    /// Creates options with default values (autosave off).
    #[must_use]
    pub const fn new() -> Self {
        Self { autosave: false }
    }

    /// Sets whether autosave is enabled.
    #[must_use]
    pub const fn autosave(mut self, value: bool) -> Self {
        self.autosave = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_in_memory() {
        let config = StoreConfiguration::default();
        assert_eq!(config.storage_mode, StorageMode::InMemory);
        assert!(config.location.is_none());
        assert!(!config.truncate_existing);
        assert!(config.sync_on_commit);
    }

    #[test]
    fn file_builder_chains() {
        let config = StoreConfiguration::file("/tmp/store.journal")
            .truncate_existing(true)
            .sync_on_commit(false);
        assert_eq!(config.storage_mode, StorageMode::File);
        assert_eq!(
            config.location.as_deref(),
            Some(Path::new("/tmp/store.journal"))
        );
        assert!(config.truncate_existing);
        assert!(!config.sync_on_commit);
    }

    #[test]
    fn context_options_default_off() {
        assert!(!ContextOptions::default().autosave);
        assert!(ContextOptions::new().autosave(true).autosave);
    }
}
