//! # Dataset Persistence Handler
//!
//! Entry point for whole-dataset I/O: the configuration file, the data and
//! targets sections, and the metadata file of one dataset, all rooted in a
//! single directory. Backends and filename layouts are resolved from the
//! dataset's own attributes, so datasets written with different backends
//! coexist in one directory.
//!
//! Multi-file writes are not atomic: a failure partway through `save`
//! leaves already-written files in their finished state.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;

use crate::array::{ArrayValue, Dtype};
use crate::config::{create_config_str, parse_config_str, ConfigError};
use crate::dataset::{Dataset, DatasetError};
use crate::layout::{resolve_layout, LayoutError};
use crate::metadata::{load_records, save_records, MetaRecord, MetadataError};
use crate::schema::{DatasetAttributes, MetadataAttributes, CONFIG_FILE_SUFFIX, METADATA_TYPE_KEY};
use crate::section::{SectionError, SectionManager};
use crate::storage::{ItemArray, StorageError};

/// Errors from whole-dataset persistence.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    /// The dataset directory does not exist.
    #[error("directory does not exist: {0}")]
    MissingDirectory(PathBuf),

    /// The dataset's configuration file does not exist.
    #[error("configuration file not found: {0}")]
    MissingConfig(PathBuf),

    /// Filesystem failure outside the section backends.
    #[error("io error on {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Configuration parse or serialization failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Section-level failure.
    #[error(transparent)]
    Section(#[from] SectionError),

    /// Layout resolution failure.
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// Metadata file failure.
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    /// Dataset reassembly failure.
    #[error(transparent)]
    Dataset(#[from] DatasetError),

    /// Storage backend failure.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// An append batch whose sections disagree on the number of new items.
    #[error(
        "append batch misaligned: {data} data items, {targets} targets, {metadata} metadata records"
    )]
    BatchMismatch {
        /// New items per data type.
        data: usize,
        /// New target rows.
        targets: usize,
        /// New metadata records.
        metadata: usize,
    },
}

/// One of the three persisted parts of a dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// The per-item-type data arrays.
    Data,
    /// The targets arrays.
    Targets,
    /// The delimited metadata file.
    Metadata,
}

/// Loads and saves whole datasets under one directory.
pub struct DatasetPersistence {
    directory: PathBuf,
}

impl DatasetPersistence {
    /// A handler rooted at `directory`.
    pub fn new(directory: &Path) -> DatasetPersistence {
        DatasetPersistence {
            directory: directory.to_path_buf(),
        }
    }

    /// The directory this handler reads and writes.
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Path of a dataset's configuration file.
    pub fn config_path(&self, dataset_name: &str) -> PathBuf {
        self.directory
            .join(format!("{dataset_name}{CONFIG_FILE_SUFFIX}"))
    }

    fn check_directory(&self) -> Result<(), PersistError> {
        if !self.directory.is_dir() {
            return Err(PersistError::MissingDirectory(self.directory.clone()));
        }
        Ok(())
    }

    fn metadata_path(
        &self,
        dataset_name: &str,
        metadata: &MetadataAttributes,
    ) -> Result<PathBuf, PersistError> {
        let layout = resolve_layout(&metadata.backend)?;
        let base = layout.create_filename(dataset_name, METADATA_TYPE_KEY);
        Ok(self
            .directory
            .join(format!("{base}.{}", metadata.backend.filename_extension)))
    }

    /// Read and parse a dataset's configuration.
    pub fn load_attributes(&self, dataset_name: &str) -> Result<DatasetAttributes, PersistError> {
        let path = self.config_path(dataset_name);
        let raw = fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PersistError::MissingConfig(path.clone())
            } else {
                PersistError::Io {
                    path: path.clone(),
                    source: e,
                }
            }
        })?;
        Ok(parse_config_str(&raw)?)
    }

    /// Serialize and write a dataset's configuration (versioned encoding).
    pub fn save_attributes(
        &self,
        dataset_name: &str,
        attributes: &DatasetAttributes,
    ) -> Result<(), PersistError> {
        self.check_directory()?;
        let path = self.config_path(dataset_name);
        let text = create_config_str(attributes)?;
        fs::write(&path, text).map_err(|e| PersistError::Io {
            path: path.clone(),
            source: e,
        })?;
        Ok(())
    }

    /// Load a whole dataset: configuration, both array sections, metadata.
    pub fn load_dataset(&self, dataset_name: &str) -> Result<Dataset, PersistError> {
        let attributes = self.load_attributes(dataset_name)?;

        let data_manager = SectionManager::from_backend(&attributes.data.backend)?;
        let loaded = data_manager.load(
            dataset_name,
            &self.directory,
            &attributes.data_section(),
            None,
        )?;
        let mut data = BTreeMap::new();
        for (key, item) in loaded {
            data.insert(key, item.materialize()?);
        }

        let targets_manager = SectionManager::from_backend(&attributes.targets.backend)?;
        let mut loaded = targets_manager.load(
            dataset_name,
            &self.directory,
            &attributes.targets_section(),
            None,
        )?;
        // the section load returns exactly the configured type set
        let targets = match loaded.pop_first() {
            Some((_, item)) => item.materialize()?,
            None => ArrayValue::zeros(Dtype::U8, &[0]),
        };

        let meta_path = self.metadata_path(dataset_name, &attributes.metadata)?;
        let (_, records) = load_records(&meta_path)?;

        info!(
            "loaded dataset '{dataset_name}' ({} items) from {}",
            attributes.num_items,
            self.directory.display()
        );
        Ok(Dataset::from_parts(
            dataset_name,
            attributes,
            data,
            targets,
            records,
        )?)
    }

    /// Save a whole dataset: configuration, both array sections, metadata.
    pub fn save_dataset(&self, dataset: &Dataset) -> Result<(), PersistError> {
        self.check_directory()?;
        let attributes = dataset.attributes();
        let name = dataset.name();

        self.save_attributes(name, attributes)?;

        let data_manager = SectionManager::from_backend(&attributes.data.backend)?;
        let data_items: BTreeMap<String, ItemArray> = dataset
            .data_map()
            .iter()
            .map(|(k, v)| (k.clone(), ItemArray::Owned(v.clone())))
            .collect();
        data_manager.save(
            name,
            &self.directory,
            &attributes.data_section(),
            &data_items,
        )?;

        let targets_manager = SectionManager::from_backend(&attributes.targets.backend)?;
        let mut target_items = BTreeMap::new();
        target_items.insert(
            dataset.target_key().to_string(),
            ItemArray::Owned(dataset.targets().clone()),
        );
        targets_manager.save(
            name,
            &self.directory,
            &attributes.targets_section(),
            &target_items,
        )?;

        let meta_path = self.metadata_path(name, &attributes.metadata)?;
        save_records(&meta_path, dataset.metadata_fields(), dataset.metadata_records())?;

        info!(
            "saved dataset '{name}' ({} items) to {}",
            attributes.num_items,
            self.directory.display()
        );
        Ok(())
    }

    /// Append one batch of items to a stored dataset without loading its
    /// arrays, updating the configured item count afterwards.
    ///
    /// Every data type, the targets, and the metadata records must all
    /// contribute the same number of new items.
    pub fn append_items(
        &self,
        dataset_name: &str,
        data: &BTreeMap<String, ArrayValue>,
        targets: &ArrayValue,
        records: &[MetaRecord],
    ) -> Result<(), PersistError> {
        let mut attributes = self.load_attributes(dataset_name)?;

        let batch = targets.num_items();
        let data_batch = data.values().next().map(ArrayValue::num_items).unwrap_or(0);
        if data_batch != batch || records.len() != batch {
            return Err(PersistError::BatchMismatch {
                data: data_batch,
                targets: batch,
                metadata: records.len(),
            });
        }

        let data_manager = SectionManager::from_backend(&attributes.data.backend)?;
        data_manager.append(dataset_name, &self.directory, &attributes.data_section(), data)?;

        let targets_manager = SectionManager::from_backend(&attributes.targets.backend)?;
        let mut target_items = BTreeMap::new();
        // the targets section has a single configured type
        let target_key = attributes
            .targets
            .types
            .keys()
            .next()
            .cloned()
            .unwrap_or_default();
        target_items.insert(target_key, targets.clone());
        targets_manager.append(
            dataset_name,
            &self.directory,
            &attributes.targets_section(),
            &target_items,
        )?;

        let meta_path = self.metadata_path(dataset_name, &attributes.metadata)?;
        let (mut fields, mut existing) = load_records(&meta_path)?;
        for record in records {
            for field in record.keys() {
                if !fields.iter().any(|f| f == field) {
                    fields.push(field.clone());
                }
            }
            existing.push(record.clone());
        }
        save_records(&meta_path, &fields, &existing)?;

        attributes.num_items += batch;
        attributes.metadata.fields = fields;
        self.save_attributes(dataset_name, &attributes)?;
        info!("appended {batch} items to dataset '{dataset_name}'");
        Ok(())
    }

    /// Delete the files of one section (or an item-type subset of the data
    /// section), leaving the rest of the dataset on disk.
    pub fn delete_section(
        &self,
        dataset_name: &str,
        section: SectionKind,
        subset: Option<&[String]>,
    ) -> Result<(), PersistError> {
        let attributes = self.load_attributes(dataset_name)?;
        match section {
            SectionKind::Data => {
                let manager = SectionManager::from_backend(&attributes.data.backend)?;
                manager.delete(
                    dataset_name,
                    &self.directory,
                    &attributes.data_section(),
                    subset,
                )?;
            }
            SectionKind::Targets => {
                let manager = SectionManager::from_backend(&attributes.targets.backend)?;
                manager.delete(
                    dataset_name,
                    &self.directory,
                    &attributes.targets_section(),
                    subset,
                )?;
            }
            SectionKind::Metadata => {
                let path = self.metadata_path(dataset_name, &attributes.metadata)?;
                fs::remove_file(&path).map_err(|e| PersistError::Io {
                    path: path.clone(),
                    source: e,
                })?;
            }
        }
        Ok(())
    }

    /// Delete every file of a dataset, the configuration file last.
    pub fn delete_dataset(&self, dataset_name: &str) -> Result<(), PersistError> {
        let attributes = self.load_attributes(dataset_name)?;

        let data_manager = SectionManager::from_backend(&attributes.data.backend)?;
        data_manager.delete(
            dataset_name,
            &self.directory,
            &attributes.data_section(),
            None,
        )?;
        let targets_manager = SectionManager::from_backend(&attributes.targets.backend)?;
        targets_manager.delete(
            dataset_name,
            &self.directory,
            &attributes.targets_section(),
            None,
        )?;

        let meta_path = self.metadata_path(dataset_name, &attributes.metadata)?;
        fs::remove_file(&meta_path).map_err(|e| PersistError::Io {
            path: meta_path.clone(),
            source: e,
        })?;

        let config_path = self.config_path(dataset_name);
        fs::remove_file(&config_path).map_err(|e| PersistError::Io {
            path: config_path.clone(),
            source: e,
        })?;
        info!("deleted dataset '{dataset_name}'");
        Ok(())
    }
}
