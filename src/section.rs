//! # Section Persistence Manager
//!
//! Loads, saves, appends, and deletes *all* item types of one dataset
//! section (data or targets) as a unit, orchestrating a storage backend and
//! a filename layout resolved once from the section's backend descriptor.
//!
//! Save and append enforce the section invariant strictly: the supplied
//! item map's key set must equal the configured type set exactly, and every
//! type must carry the same item count. Load and delete accept an optional
//! type subset but reject requests for types the section does not have.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::array::ArrayValue;
use crate::layout::{resolve_layout, FilenameLayout, LayoutError};
use crate::schema::{BackendConfig, SectionConfig};
use crate::storage::{resolve_storage, ItemArray, ItemExpectation, ItemStorage, StorageError};

/// Errors from section-level persistence.
#[derive(Debug, thiserror::Error)]
pub enum SectionError {
    /// The dataset directory does not exist.
    #[error("directory does not exist: {0}")]
    MissingDirectory(PathBuf),

    /// A requested type subset names types the section does not have.
    #[error("item types {unknown:?} are not part of this section (known: {known:?})")]
    UnknownTypes {
        /// The unknown requested keys.
        unknown: Vec<String>,
        /// The keys the section actually has.
        known: Vec<String>,
    },

    /// The supplied item map does not match the configured type set.
    #[error("item type set mismatch: missing {missing:?}, unexpected {extra:?}")]
    TypeSetMismatch {
        /// Configured types absent from the supplied map.
        missing: Vec<String>,
        /// Supplied keys absent from the configuration.
        extra: Vec<String>,
    },

    /// An item type's count disagrees with the section count.
    #[error("item type '{type_key}' holds {actual} items, section expects {expected}")]
    CountMismatch {
        /// The offending type key.
        type_key: String,
        /// The section's item count.
        expected: usize,
        /// The type's actual item count.
        actual: usize,
    },

    /// An append batch with unequal per-type counts.
    #[error("ragged append batch: per-type item counts {counts:?} are not all equal")]
    RaggedBatch {
        /// Item count per supplied type key.
        counts: BTreeMap<String, usize>,
    },

    /// A storage backend operation failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Layout resolution failed.
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

/// Persists one whole section through a resolved backend + layout pair.
pub struct SectionManager {
    storage: Box<dyn ItemStorage>,
    layout: Box<dyn FilenameLayout>,
    extension: String,
}

impl SectionManager {
    /// Resolve the backend descriptor into a manager.
    pub fn from_backend(backend: &BackendConfig) -> Result<SectionManager, SectionError> {
        Ok(SectionManager {
            storage: resolve_storage(&backend.name)?,
            layout: resolve_layout(backend)?,
            extension: backend.filename_extension.clone(),
        })
    }

    /// Path of the file backing one item type.
    pub fn file_path(&self, directory: &Path, dataset_name: &str, type_key: &str) -> PathBuf {
        let base = self.layout.create_filename(dataset_name, type_key);
        directory.join(format!("{base}.{}", self.extension))
    }

    fn check_directory(directory: &Path) -> Result<(), SectionError> {
        if !directory.is_dir() {
            return Err(SectionError::MissingDirectory(directory.to_path_buf()));
        }
        Ok(())
    }

    /// Resolve a requested subset (default: all configured types), rejecting
    /// unknown keys.
    fn resolve_subset(
        config: &SectionConfig,
        subset: Option<&[String]>,
    ) -> Result<Vec<String>, SectionError> {
        match subset {
            None => Ok(config.types.keys().cloned().collect()),
            Some(requested) => {
                let unknown: Vec<String> = requested
                    .iter()
                    .filter(|k| !config.types.contains_key(*k))
                    .cloned()
                    .collect();
                if !unknown.is_empty() {
                    return Err(SectionError::UnknownTypes {
                        unknown,
                        known: config.types.keys().cloned().collect(),
                    });
                }
                Ok(requested.to_vec())
            }
        }
    }

    /// Require `items`' key set to equal the configured type set exactly.
    fn check_exact_type_set<V>(
        config: &SectionConfig,
        items: &BTreeMap<String, V>,
    ) -> Result<(), SectionError> {
        let missing: Vec<String> = config
            .types
            .keys()
            .filter(|k| !items.contains_key(*k))
            .cloned()
            .collect();
        let extra: Vec<String> = items
            .keys()
            .filter(|k| !config.types.contains_key(*k))
            .cloned()
            .collect();
        if !missing.is_empty() || !extra.is_empty() {
            return Err(SectionError::TypeSetMismatch { missing, extra });
        }
        Ok(())
    }

    fn expectation(config: &SectionConfig, type_key: &str) -> ItemExpectation {
        // callers reach this only for keys validated against config.types
        let spec = &config.types[type_key];
        ItemExpectation {
            num_items: config.num_items,
            item_shape: spec.shape.clone(),
            dtype: spec.dtype,
        }
    }

    /// Load every configured type (or the requested subset) of the section.
    pub fn load(
        &self,
        dataset_name: &str,
        directory: &Path,
        config: &SectionConfig,
        subset: Option<&[String]>,
    ) -> Result<BTreeMap<String, ItemArray>, SectionError> {
        Self::check_directory(directory)?;
        let mut items = BTreeMap::new();
        for type_key in Self::resolve_subset(config, subset)? {
            let path = self.file_path(directory, dataset_name, &type_key);
            let expected = Self::expectation(config, &type_key);
            debug!("loading {type_key} from {}", path.display());
            items.insert(type_key, self.storage.load(&path, Some(&expected))?);
        }
        Ok(items)
    }

    /// Save every type of the section; the key set of `items` must equal
    /// the configured type set exactly.
    pub fn save(
        &self,
        dataset_name: &str,
        directory: &Path,
        config: &SectionConfig,
        items: &BTreeMap<String, ItemArray>,
    ) -> Result<(), SectionError> {
        Self::check_directory(directory)?;
        Self::check_exact_type_set(config, items)?;
        for (type_key, value) in items {
            if value.num_items() != config.num_items {
                return Err(SectionError::CountMismatch {
                    type_key: type_key.clone(),
                    expected: config.num_items,
                    actual: value.num_items(),
                });
            }
        }
        for (type_key, value) in items {
            let path = self.file_path(directory, dataset_name, type_key);
            self.storage.save(&path, value)?;
        }
        info!(
            "saved section '{dataset_name}' ({} types, {} items)",
            items.len(),
            config.num_items
        );
        Ok(())
    }

    /// Append one batch of items to every type of the section.
    ///
    /// The key set of `items` must equal the configured type set exactly and
    /// all types must contribute the same number of new items; storage for
    /// each type is validated against `config.num_items` before growing.
    pub fn append(
        &self,
        dataset_name: &str,
        directory: &Path,
        config: &SectionConfig,
        items: &BTreeMap<String, ArrayValue>,
    ) -> Result<(), SectionError> {
        Self::check_directory(directory)?;
        Self::check_exact_type_set(config, items)?;

        let counts: BTreeMap<String, usize> = items
            .iter()
            .map(|(k, v)| (k.clone(), v.num_items()))
            .collect();
        let mut distinct = counts.values();
        let first = distinct.next().copied().unwrap_or(0);
        if counts.values().any(|&c| c != first) {
            return Err(SectionError::RaggedBatch { counts });
        }

        for (type_key, value) in items {
            let path = self.file_path(directory, dataset_name, type_key);
            let expected = Self::expectation(config, type_key);
            self.storage.append(&path, value, &expected)?;
        }
        info!("appended {first} items to section '{dataset_name}'");
        Ok(())
    }

    /// Delete the files of every configured type (or the requested subset).
    pub fn delete(
        &self,
        dataset_name: &str,
        directory: &Path,
        config: &SectionConfig,
        subset: Option<&[String]>,
    ) -> Result<(), SectionError> {
        Self::check_directory(directory)?;
        for type_key in Self::resolve_subset(config, subset)? {
            let path = self.file_path(directory, dataset_name, &type_key);
            debug!("deleting {}", path.display());
            self.storage.delete(&path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Dtype;
    use crate::schema::{
        TypeSpec, BACKEND_DENSE, DEFAULT_DENSE_EXTENSION, FORMAT_NAME_WITH_TYPE_SUFFIX,
    };
    use tempfile::tempdir;

    fn backend() -> BackendConfig {
        BackendConfig::new(
            BACKEND_DENSE,
            DEFAULT_DENSE_EXTENSION,
            FORMAT_NAME_WITH_TYPE_SUFFIX,
        )
    }

    fn config(num_items: usize) -> SectionConfig {
        let mut types = BTreeMap::new();
        types.insert(
            "raw".to_string(),
            TypeSpec {
                dtype: Dtype::U8,
                shape: vec![2, 3],
            },
        );
        types.insert(
            "yx".to_string(),
            TypeSpec {
                dtype: Dtype::U8,
                shape: vec![3],
            },
        );
        SectionConfig { num_items, types }
    }

    fn items(num_items: usize) -> BTreeMap<String, ItemArray> {
        let mut map = BTreeMap::new();
        map.insert(
            "raw".to_string(),
            ItemArray::Owned(ArrayValue::from_vec(
                &[num_items, 2, 3],
                (0..num_items * 6).map(|v| v as u8).collect(),
            )
            .unwrap()),
        );
        map.insert(
            "yx".to_string(),
            ItemArray::Owned(ArrayValue::from_vec(
                &[num_items, 3],
                (0..num_items * 3).map(|v| v as u8 + 100).collect(),
            )
            .unwrap()),
        );
        map
    }

    fn owned_items(num_items: usize) -> BTreeMap<String, ArrayValue> {
        items(num_items)
            .into_iter()
            .map(|(k, v)| (k, v.materialize().unwrap()))
            .collect()
    }

    #[test]
    fn save_and_load_whole_section() {
        let dir = tempdir().unwrap();
        let mgr = SectionManager::from_backend(&backend()).unwrap();
        let cfg = config(2);
        let saved = items(2);

        mgr.save("ds", dir.path(), &cfg, &saved).unwrap();
        assert!(dir.path().join("ds_raw.pkd").exists());
        assert!(dir.path().join("ds_yx.pkd").exists());

        let loaded = mgr.load("ds", dir.path(), &cfg, None).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(
            loaded["raw"].materialize().unwrap(),
            saved["raw"].materialize().unwrap()
        );
    }

    #[test]
    fn load_subset_only_reads_requested_types() {
        let dir = tempdir().unwrap();
        let mgr = SectionManager::from_backend(&backend()).unwrap();
        let cfg = config(2);
        mgr.save("ds", dir.path(), &cfg, &items(2)).unwrap();

        let subset = vec!["yx".to_string()];
        let loaded = mgr.load("ds", dir.path(), &cfg, Some(&subset)).unwrap();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.contains_key("yx"));
    }

    #[test]
    fn load_unknown_subset_type_fails() {
        let dir = tempdir().unwrap();
        let mgr = SectionManager::from_backend(&backend()).unwrap();
        let cfg = config(2);
        mgr.save("ds", dir.path(), &cfg, &items(2)).unwrap();

        let subset = vec!["gtux".to_string()];
        assert!(matches!(
            mgr.load("ds", dir.path(), &cfg, Some(&subset)),
            Err(SectionError::UnknownTypes { .. })
        ));
    }

    #[test]
    fn missing_directory_is_fatal() {
        let mgr = SectionManager::from_backend(&backend()).unwrap();
        let cfg = config(2);
        let bogus = Path::new("/nonexistent/packset-test-dir");
        assert!(matches!(
            mgr.load("ds", bogus, &cfg, None),
            Err(SectionError::MissingDirectory(_))
        ));
        assert!(matches!(
            mgr.save("ds", bogus, &cfg, &items(2)),
            Err(SectionError::MissingDirectory(_))
        ));
    }

    #[test]
    fn save_rejects_missing_and_extra_types() {
        let dir = tempdir().unwrap();
        let mgr = SectionManager::from_backend(&backend()).unwrap();
        let cfg = config(2);

        let mut missing = items(2);
        missing.remove("yx");
        assert!(matches!(
            mgr.save("ds", dir.path(), &cfg, &missing),
            Err(SectionError::TypeSetMismatch { ref missing, .. }) if missing == &["yx".to_string()]
        ));

        let mut extra = items(2);
        extra.insert(
            "gtux".to_string(),
            ItemArray::Owned(ArrayValue::zeros(Dtype::U8, &[2, 2])),
        );
        assert!(matches!(
            mgr.save("ds", dir.path(), &cfg, &extra),
            Err(SectionError::TypeSetMismatch { ref extra, .. }) if extra == &["gtux".to_string()]
        ));

        let empty: BTreeMap<String, ItemArray> = BTreeMap::new();
        assert!(matches!(
            mgr.save("ds", dir.path(), &cfg, &empty),
            Err(SectionError::TypeSetMismatch { .. })
        ));
    }

    #[test]
    fn save_rejects_wrong_item_count() {
        let dir = tempdir().unwrap();
        let mgr = SectionManager::from_backend(&backend()).unwrap();
        let cfg = config(3);
        assert!(matches!(
            mgr.save("ds", dir.path(), &cfg, &items(2)),
            Err(SectionError::CountMismatch { expected: 3, actual: 2, .. })
        ));
    }

    #[test]
    fn append_grows_every_type() {
        let dir = tempdir().unwrap();
        let mgr = SectionManager::from_backend(&backend()).unwrap();
        let cfg = config(2);
        mgr.save("ds", dir.path(), &cfg, &items(2)).unwrap();

        mgr.append("ds", dir.path(), &cfg, &owned_items(3)).unwrap();

        let grown = SectionConfig {
            num_items: 5,
            types: cfg.types.clone(),
        };
        let loaded = mgr.load("ds", dir.path(), &grown, None).unwrap();
        assert_eq!(loaded["raw"].num_items(), 5);
        assert_eq!(loaded["yx"].num_items(), 5);
    }

    #[test]
    fn append_rejects_ragged_batches() {
        let dir = tempdir().unwrap();
        let mgr = SectionManager::from_backend(&backend()).unwrap();
        let cfg = config(2);
        mgr.save("ds", dir.path(), &cfg, &items(2)).unwrap();

        let mut ragged = owned_items(2);
        ragged.insert(
            "yx".to_string(),
            ArrayValue::from_vec(&[1, 3], vec![1u8, 2, 3]).unwrap(),
        );
        assert!(matches!(
            mgr.append("ds", dir.path(), &cfg, &ragged),
            Err(SectionError::RaggedBatch { .. })
        ));
    }

    #[test]
    fn append_requires_exact_type_set() {
        let dir = tempdir().unwrap();
        let mgr = SectionManager::from_backend(&backend()).unwrap();
        let cfg = config(2);
        mgr.save("ds", dir.path(), &cfg, &items(2)).unwrap();

        let mut partial = owned_items(1);
        partial.remove("raw");
        assert!(matches!(
            mgr.append("ds", dir.path(), &cfg, &partial),
            Err(SectionError::TypeSetMismatch { .. })
        ));
    }

    #[test]
    fn delete_subset_leaves_other_files() {
        let dir = tempdir().unwrap();
        let mgr = SectionManager::from_backend(&backend()).unwrap();
        let cfg = config(2);
        mgr.save("ds", dir.path(), &cfg, &items(2)).unwrap();

        let subset = vec!["raw".to_string()];
        mgr.delete("ds", dir.path(), &cfg, Some(&subset)).unwrap();
        assert!(!dir.path().join("ds_raw.pkd").exists());
        assert!(dir.path().join("ds_yx.pkd").exists());

        // the surviving type is still loadable
        let loaded = mgr
            .load("ds", dir.path(), &cfg, Some(&["yx".to_string()]))
            .unwrap();
        assert_eq!(loaded["yx"].num_items(), 2);
    }
}
