//! # Filename Layout Strategies
//!
//! Pure mapping from `(dataset name, item type)` to a base filename without
//! extension. Three strategies are registered:
//!
//! | Format key | Result for (`ds`, `yx`) |
//! |---|---|
//! | `type_only` | `yx` |
//! | `name_with_type_suffix` | `ds_yx` |
//! | `name_with_suffix` (suffix `meta`) | `ds_meta` |
//!
//! `type_only` leaves cross-dataset collision avoidance to the caller;
//! `name_with_suffix` ignores the item type entirely and is meant for
//! single-file sections such as targets or metadata.

use std::collections::BTreeMap;

use crate::schema::{
    BackendConfig, DEFAULT_DELIMITER, FORMAT_NAME_WITH_SUFFIX, FORMAT_NAME_WITH_TYPE_SUFFIX,
    FORMAT_TYPE_ONLY,
};

/// Errors from layout resolution.
#[derive(Debug, thiserror::Error)]
pub enum LayoutError {
    /// No strategy is registered under the requested format key.
    #[error("unknown filename format '{0}'")]
    UnknownFormat(String),

    /// The format needs a backend-level suffix that was not configured.
    #[error("filename format '{format}' requires a backend suffix")]
    MissingSuffix {
        /// The format key that needed a suffix.
        format: String,
    },
}

/// Strategy mapping a dataset name and item type to a base filename.
pub trait FilenameLayout {
    /// Base filename (no extension) for one item type.
    fn create_filename(&self, dataset_name: &str, item_type: &str) -> String;
}

/// The item type key verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct TypeOnly;

impl FilenameLayout for TypeOnly {
    fn create_filename(&self, _dataset_name: &str, item_type: &str) -> String {
        item_type.to_string()
    }
}

/// `{dataset_name}{delimiter}{item_type}`.
#[derive(Debug, Clone)]
pub struct NameWithTypeSuffix {
    /// Delimiter between name and type key.
    pub delimiter: String,
}

impl FilenameLayout for NameWithTypeSuffix {
    fn create_filename(&self, dataset_name: &str, item_type: &str) -> String {
        format!("{dataset_name}{}{item_type}", self.delimiter)
    }
}

/// `{dataset_name}{delimiter}{suffix}` with a fixed, type-independent suffix.
#[derive(Debug, Clone)]
pub struct NameWithSuffix {
    /// Delimiter between name and suffix.
    pub delimiter: String,
    /// The fixed suffix.
    pub suffix: String,
}

impl FilenameLayout for NameWithSuffix {
    fn create_filename(&self, dataset_name: &str, _item_type: &str) -> String {
        format!("{dataset_name}{}{}", self.delimiter, self.suffix)
    }
}

/// Resolve a backend descriptor to its filename strategy.
pub fn resolve_layout(backend: &BackendConfig) -> Result<Box<dyn FilenameLayout>, LayoutError> {
    let delimiter = backend
        .delimiter
        .clone()
        .unwrap_or_else(|| DEFAULT_DELIMITER.to_string());
    match backend.filename_format.as_str() {
        FORMAT_TYPE_ONLY => Ok(Box::new(TypeOnly)),
        FORMAT_NAME_WITH_TYPE_SUFFIX => Ok(Box::new(NameWithTypeSuffix { delimiter })),
        FORMAT_NAME_WITH_SUFFIX => {
            let suffix = backend.suffix.clone().ok_or_else(|| LayoutError::MissingSuffix {
                format: FORMAT_NAME_WITH_SUFFIX.to_string(),
            })?;
            Ok(Box::new(NameWithSuffix { delimiter, suffix }))
        }
        other => Err(LayoutError::UnknownFormat(other.to_string())),
    }
}

/// Apply a strategy across a set of item-type keys.
pub fn create_filenames<'a, I>(
    layout: &dyn FilenameLayout,
    dataset_name: &str,
    item_types: I,
) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = &'a str>,
{
    item_types
        .into_iter()
        .map(|t| (t.to_string(), layout.create_filename(dataset_name, t)))
        .collect()
}
