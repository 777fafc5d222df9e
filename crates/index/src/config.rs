//! Configuration for page stores and the indexes built on them.

use crate::{
    backend::{DEFAULT_PAGE_SIZE, validate_page_size},
    btree::bucket,
    error::{Error, Result},
};

/// Storage-level configuration shared by every file of a [`PageStore`](crate::PageStore).
#[derive(Debug, Clone, bon::Builder)]
pub struct StoreConfig {
    /// Page size (must be power of 2, default 4096).
    #[builder(default = DEFAULT_PAGE_SIZE)]
    pub page_size: usize,
    /// Maximum pages to cache in memory per file.
    #[builder(default = 1024)]
    pub cache_size: usize,
    /// Whether to sync on every commit (default true for durability).
    #[builder(default = true)]
    pub sync_on_commit: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_size: 1024, // ~4MB with 4KB pages
            sync_on_commit: true,
        }
    }
}

impl StoreConfig {
    /// Checks that the page size is usable.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the page size is not a power of two in `512..=65536`.
    pub fn validate(&self) -> Result<()> {
        validate_page_size(self.page_size)
    }
}

/// Per-index configuration.
#[derive(Debug, Clone, bon::Builder)]
pub struct IndexConfig {
    /// Largest encoded key (tag byte included) accepted by `put`.
    #[builder(default = 512)]
    pub max_key_size: usize,
    /// Deepest descent before the tree is declared corrupted.
    #[builder(default = 64)]
    pub max_path_length: usize,
    /// Entries fetched per cursor refill.
    #[builder(default = 256)]
    pub cursor_batch_size: usize,
    /// Caps the entry count of every bucket. Only useful to force splits in tests.
    pub max_bucket_entries: Option<usize>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            max_key_size: 512,
            max_path_length: 64,
            cursor_batch_size: 256,
            max_bucket_entries: None,
        }
    }
}

impl IndexConfig {
    /// Checks the configuration against the page size of the hosting store.
    ///
    /// A bucket must hold four maximal entries next to a maximal stored
    /// prefix, otherwise a split could produce a half that does not fit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first violated constraint.
    pub fn validate(&self, page_size: usize) -> Result<()> {
        if self.max_key_size < 2 {
            return Err(Error::InvalidConfig {
                reason: format!("max_key_size must be at least 2, got {}", self.max_key_size),
            });
        }
        let limit = bucket::max_key_size_for(page_size);
        if self.max_key_size > limit {
            return Err(Error::InvalidConfig {
                reason: format!(
                    "max_key_size {} exceeds {} supported by {}-byte pages",
                    self.max_key_size, limit, page_size
                ),
            });
        }
        if self.max_path_length == 0 {
            return Err(Error::InvalidConfig { reason: "max_path_length must be positive".into() });
        }
        if self.cursor_batch_size == 0 {
            return Err(Error::InvalidConfig {
                reason: "cursor_batch_size must be positive".into(),
            });
        }
        if let Some(entries) = self.max_bucket_entries.filter(|&entries| entries < 2) {
            return Err(Error::InvalidConfig {
                reason: format!("max_bucket_entries must be at least 2, got {entries}"),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_config_builder() {
        let config =
            StoreConfig::builder().page_size(8192).cache_size(512).sync_on_commit(false).build();

        assert_eq!(config.page_size, 8192);
        assert_eq!(config.cache_size, 512);
        assert!(!config.sync_on_commit);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_store_config_builder_defaults() {
        let from_builder = StoreConfig::builder().build();
        let from_default = StoreConfig::default();

        assert_eq!(from_builder.page_size, from_default.page_size);
        assert_eq!(from_builder.cache_size, from_default.cache_size);
        assert_eq!(from_builder.sync_on_commit, from_default.sync_on_commit);
    }

    #[test]
    fn test_store_config_rejects_bad_page_size() {
        let config = StoreConfig::builder().page_size(1000).build();
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_index_config_builder_defaults() {
        let from_builder = IndexConfig::builder().build();
        let from_default = IndexConfig::default();

        assert_eq!(from_builder.max_key_size, from_default.max_key_size);
        assert_eq!(from_builder.max_path_length, from_default.max_path_length);
        assert_eq!(from_builder.cursor_batch_size, from_default.cursor_batch_size);
        assert_eq!(from_builder.max_bucket_entries, None);
        assert!(from_default.validate(DEFAULT_PAGE_SIZE).is_ok());
    }

    #[test]
    fn test_index_config_key_size_bound_by_page() {
        let config = IndexConfig::builder().max_key_size(512).build();
        assert!(config.validate(4096).is_ok());
        assert!(config.validate(512).is_err());

        let small = IndexConfig::builder().max_key_size(64).build();
        assert!(small.validate(512).is_ok());
    }

    #[test]
    fn test_index_config_rejects_tiny_bucket_cap() {
        let config = IndexConfig::builder().max_bucket_entries(1).build();
        assert!(config.validate(DEFAULT_PAGE_SIZE).is_err());

        let config = IndexConfig::builder().max_bucket_entries(2).build();
        assert!(config.validate(DEFAULT_PAGE_SIZE).is_ok());
    }
}
