//! # Storage Facade
//!
//! Backend-specific load/save/append/delete of a single item type's array.
//! Two backends share the [`ItemStorage`] contract:
//!
//! - [`dense`]: self-describing files (embedded dtype + shape header) that
//!   always materialize fully into memory on load.
//! - [`mapped`]: headerless raw files read through a lazily mapped,
//!   read-only view; dtype and shape must be supplied by the caller.
//!
//! Backends are resolved once, at configuration-load time, through
//! [`resolve_storage`]. All operations are strict: absent files, dtype,
//! count, or shape disagreements are errors carrying the path and the
//! expected-vs-actual values, never silent truncation or padding.

pub mod dense;
pub mod mapped;

use std::path::{Path, PathBuf};

pub use dense::DenseStorage;
pub use mapped::{ExtendHandle, MappedArray, MappedStorage};

use crate::array::{ArrayError, ArrayValue, Dtype};
use crate::schema::{BACKEND_DENSE, BACKEND_MAPPED};

/// Errors from storage backend operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// The underlying error.
        source: std::io::Error,
    },

    /// The backing file does not exist.
    #[error("no stored array at {path}")]
    Missing {
        /// The absent file.
        path: PathBuf,
    },

    /// Stored dtype disagrees with the expectation.
    #[error("{path}: dtype mismatch: expected {expected}, got {actual}")]
    DtypeMismatch {
        /// The file involved.
        path: PathBuf,
        /// Expected dtype.
        expected: Dtype,
        /// Actual dtype.
        actual: Dtype,
    },

    /// Stored item count disagrees with the expectation.
    #[error("{path}: item count mismatch: expected {expected}, got {actual}")]
    CountMismatch {
        /// The file involved.
        path: PathBuf,
        /// Expected item count.
        expected: usize,
        /// Actual item count.
        actual: usize,
    },

    /// Stored per-item shape disagrees with the expectation.
    #[error("{path}: item shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// The file involved.
        path: PathBuf,
        /// Expected per-item shape.
        expected: Vec<usize>,
        /// Actual per-item shape.
        actual: Vec<usize>,
    },

    /// A dense file header could not be understood.
    #[error("{path}: not a dense array file: {reason}")]
    BadHeader {
        /// The file involved.
        path: PathBuf,
        /// What was wrong with the header.
        reason: String,
    },

    /// A mapped file's byte length is not a whole number of items.
    #[error("{path}: file length {actual} bytes is not a whole number of {item_bytes}-byte items")]
    BadLength {
        /// The file involved.
        path: PathBuf,
        /// Actual file length in bytes.
        actual: u64,
        /// Byte size of one item.
        item_bytes: usize,
    },

    /// The mapped backend needs shape and dtype expectations to read.
    #[error("mapped storage requires shape and dtype expectations for {path}")]
    MissingExpectation {
        /// The file involved.
        path: PathBuf,
    },

    /// No backend is registered under the requested name.
    #[error("unknown storage backend '{0}'")]
    UnknownBackend(String),

    /// An array operation failed.
    #[error(transparent)]
    Array(#[from] ArrayError),
}

impl StorageError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> StorageError {
        if source.kind() == std::io::ErrorKind::NotFound {
            StorageError::Missing {
                path: path.to_path_buf(),
            }
        } else {
            StorageError::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// What a caller expects of a stored array: used to validate loads and
/// appends, and to interpret headerless mapped files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemExpectation {
    /// Number of items currently stored.
    pub num_items: usize,
    /// Shape of a single item.
    pub item_shape: Vec<usize>,
    /// Element type.
    pub dtype: Dtype,
}

impl ItemExpectation {
    /// Full stored shape, item axis first.
    pub fn full_shape(&self) -> Vec<usize> {
        let mut shape = Vec::with_capacity(self.item_shape.len() + 1);
        shape.push(self.num_items);
        shape.extend_from_slice(&self.item_shape);
        shape
    }

    /// Byte size of a single item.
    pub fn item_bytes(&self) -> usize {
        self.item_shape.iter().product::<usize>() * self.dtype.size_bytes()
    }
}

/// A loaded item-type array: either fully materialized or a lazily mapped
/// view over its backing file.
#[derive(Debug)]
pub enum ItemArray {
    /// Fully materialized in memory.
    Owned(ArrayValue),
    /// Read-only view backed by a mapped file.
    Mapped(MappedArray),
}

impl ItemArray {
    /// Element type.
    pub fn dtype(&self) -> Dtype {
        match self {
            ItemArray::Owned(v) => v.dtype(),
            ItemArray::Mapped(m) => m.dtype(),
        }
    }

    /// Full shape, item axis first.
    pub fn shape(&self) -> &[usize] {
        match self {
            ItemArray::Owned(v) => v.shape(),
            ItemArray::Mapped(m) => m.shape(),
        }
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.shape().first().copied().unwrap_or(0)
    }

    /// Per-item shape.
    pub fn item_shape(&self) -> &[usize] {
        let shape = self.shape();
        if shape.is_empty() {
            shape
        } else {
            &shape[1..]
        }
    }

    /// The backing file, for mapped views.
    pub fn source_path(&self) -> Option<&Path> {
        match self {
            ItemArray::Owned(_) => None,
            ItemArray::Mapped(m) => Some(m.path()),
        }
    }

    /// A fully materialized copy of the value.
    pub fn materialize(&self) -> Result<ArrayValue, StorageError> {
        match self {
            ItemArray::Owned(v) => Ok(v.clone()),
            ItemArray::Mapped(m) => Ok(m.to_value()?),
        }
    }
}

impl From<ArrayValue> for ItemArray {
    fn from(value: ArrayValue) -> Self {
        ItemArray::Owned(value)
    }
}

/// Load/save/append/delete of one item type's array for one backend.
pub trait ItemStorage {
    /// Load the stored array.
    ///
    /// Fails if the file is absent. When `expected` is supplied, dtype,
    /// item count, and per-item shape are validated against it; the mapped
    /// backend additionally requires it to interpret the bytes.
    fn load(&self, path: &Path, expected: Option<&ItemExpectation>)
        -> Result<ItemArray, StorageError>;

    /// Write the whole array as a new file, replacing any existing file.
    ///
    /// A mapped input value may be copied file-to-file instead of being
    /// re-encoded.
    fn save(&self, path: &Path, items: &ItemArray) -> Result<(), StorageError>;

    /// Grow the stored array by the items of `items`.
    ///
    /// Validates the new items' dtype and shape, then the existing stored
    /// array, against `expected`; on success storage holds
    /// `expected.num_items + items.num_items()` items with the new rows
    /// starting at offset `expected.num_items`.
    fn append(
        &self,
        path: &Path,
        items: &ArrayValue,
        expected: &ItemExpectation,
    ) -> Result<(), StorageError>;

    /// Remove the backing file. Deleting a missing file is an error.
    fn delete(&self, path: &Path) -> Result<(), StorageError>;
}

/// Resolve a backend name to a storage implementation.
pub fn resolve_storage(name: &str) -> Result<Box<dyn ItemStorage>, StorageError> {
    match name {
        BACKEND_DENSE => Ok(Box::new(DenseStorage)),
        BACKEND_MAPPED => Ok(Box::new(MappedStorage)),
        other => Err(StorageError::UnknownBackend(other.to_string())),
    }
}

/// Validate an in-memory batch of new items against an expectation
/// (dtype and per-item shape; the count is the batch's own).
pub(crate) fn validate_new_items(
    path: &Path,
    items: &ArrayValue,
    expected: &ItemExpectation,
) -> Result<(), StorageError> {
    if items.dtype() != expected.dtype {
        return Err(StorageError::DtypeMismatch {
            path: path.to_path_buf(),
            expected: expected.dtype,
            actual: items.dtype(),
        });
    }
    if items.item_shape() != expected.item_shape.as_slice() {
        return Err(StorageError::ShapeMismatch {
            path: path.to_path_buf(),
            expected: expected.item_shape.clone(),
            actual: items.item_shape().to_vec(),
        });
    }
    Ok(())
}

/// Validate a stored array's dtype/count/shape against an expectation.
pub(crate) fn validate_stored(
    path: &Path,
    dtype: Dtype,
    shape: &[usize],
    expected: &ItemExpectation,
) -> Result<(), StorageError> {
    if dtype != expected.dtype {
        return Err(StorageError::DtypeMismatch {
            path: path.to_path_buf(),
            expected: expected.dtype,
            actual: dtype,
        });
    }
    let num_items = shape.first().copied().unwrap_or(0);
    if num_items != expected.num_items {
        return Err(StorageError::CountMismatch {
            path: path.to_path_buf(),
            expected: expected.num_items,
            actual: num_items,
        });
    }
    let item_shape = if shape.is_empty() { shape } else { &shape[1..] };
    if item_shape != expected.item_shape.as_slice() {
        return Err(StorageError::ShapeMismatch {
            path: path.to_path_buf(),
            expected: expected.item_shape.clone(),
            actual: item_shape.to_vec(),
        });
    }
    Ok(())
}
