//! # Mapped Storage Backend
//!
//! Headerless raw array files read through a lazily mapped, read-only view.
//! The file carries nothing but little-endian element bytes; dtype and shape
//! come from the caller's [`ItemExpectation`], and the item count is
//! cross-checked against the file length. Appends open the same backing file
//! read-write through an explicit [`ExtendHandle`] that grows it in place
//! and flushes on every exit path.
//!
//! A [`MappedArray`] stays valid only while the backing file is left
//! untouched; mutating the file under an outstanding view is undefined
//! behavior at the filesystem level and is not guarded against.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::debug;
use memmap2::{Mmap, MmapOptions};

use crate::array::{ArrayError, ArrayValue, Dtype};
use crate::storage::{
    validate_new_items, ItemArray, ItemExpectation, ItemStorage, StorageError,
};

/// A read-only array view backed directly by a mapped file.
///
/// Items are decoded on demand; nothing is copied until [`to_value`] or
/// [`item`] is called.
///
/// [`to_value`]: MappedArray::to_value
/// [`item`]: MappedArray::item
#[derive(Debug)]
pub struct MappedArray {
    path: PathBuf,
    dtype: Dtype,
    shape: Vec<usize>,
    // None iff the file is empty (zero-length files cannot be mapped)
    mmap: Option<Mmap>,
}

impl MappedArray {
    /// Map the file at `path`, interpreting it per `expected`.
    pub fn map(path: &Path, expected: &ItemExpectation) -> Result<MappedArray, StorageError> {
        let file = File::open(path).map_err(|e| StorageError::io(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| StorageError::io(path, e))?
            .len();

        let item_bytes = expected.item_bytes();
        let stored_items = if item_bytes == 0 {
            expected.num_items
        } else {
            if len % item_bytes as u64 != 0 {
                return Err(StorageError::BadLength {
                    path: path.to_path_buf(),
                    actual: len,
                    item_bytes,
                });
            }
            (len / item_bytes as u64) as usize
        };
        if stored_items != expected.num_items {
            return Err(StorageError::CountMismatch {
                path: path.to_path_buf(),
                expected: expected.num_items,
                actual: stored_items,
            });
        }

        let mmap = if len == 0 {
            None
        } else {
            // SAFETY: mapped read-only; callers must not mutate the file
            // while the view is alive (documented crate-level contract).
            Some(unsafe {
                MmapOptions::new()
                    .map(&file)
                    .map_err(|e| StorageError::io(path, e))?
            })
        };

        Ok(MappedArray {
            path: path.to_path_buf(),
            dtype: expected.dtype,
            shape: expected.full_shape(),
            mmap,
        })
    }

    /// The backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Element type imposed by the caller.
    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Full shape, item axis first.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Number of items.
    pub fn num_items(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Per-item shape.
    pub fn item_shape(&self) -> &[usize] {
        &self.shape[1..]
    }

    /// The raw mapped bytes.
    pub fn bytes(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }

    /// Decode one item without materializing the rest.
    pub fn item(&self, index: usize) -> Result<ArrayValue, StorageError> {
        let num_items = self.num_items();
        if index >= num_items {
            return Err(StorageError::Array(ArrayError::ItemRange {
                start: index,
                end: index + 1,
                len: num_items,
            }));
        }
        let item_shape = self.item_shape().to_vec();
        let item_bytes = item_shape.iter().product::<usize>() * self.dtype.size_bytes();
        let start = index * item_bytes;
        let bytes = &self.bytes()[start..start + item_bytes];
        Ok(ArrayValue::from_le_bytes(self.dtype, &item_shape, bytes)?)
    }

    /// Decode the whole view into an owned value.
    pub fn to_value(&self) -> Result<ArrayValue, StorageError> {
        Ok(ArrayValue::from_le_bytes(
            self.dtype,
            &self.shape,
            self.bytes(),
        )?)
    }
}

/// A scoped read-write handle used to grow a mapped file in place.
///
/// The handle validates the existing file length on open, writes new items
/// at the end, and syncs the file on [`close`](ExtendHandle::close) as well
/// as on drop, so partial appends are flushed even on error paths.
#[derive(Debug)]
pub struct ExtendHandle {
    file: Option<File>,
    path: PathBuf,
}

impl ExtendHandle {
    /// Open `path` for extension, validating its current length against
    /// `expected`.
    pub fn open(path: &Path, expected: &ItemExpectation) -> Result<ExtendHandle, StorageError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| StorageError::io(path, e))?;
        let len = file
            .metadata()
            .map_err(|e| StorageError::io(path, e))?
            .len();

        let item_bytes = expected.item_bytes();
        if item_bytes > 0 {
            if len % item_bytes as u64 != 0 {
                return Err(StorageError::BadLength {
                    path: path.to_path_buf(),
                    actual: len,
                    item_bytes,
                });
            }
            let stored_items = (len / item_bytes as u64) as usize;
            if stored_items != expected.num_items {
                return Err(StorageError::CountMismatch {
                    path: path.to_path_buf(),
                    expected: expected.num_items,
                    actual: stored_items,
                });
            }
        }

        Ok(ExtendHandle {
            file: Some(file),
            path: path.to_path_buf(),
        })
    }

    /// Write new items at the end of the file.
    pub fn write_items(&mut self, items: &ArrayValue) -> Result<(), StorageError> {
        if let Some(file) = self.file.as_mut() {
            file.seek(SeekFrom::End(0))
                .map_err(|e| StorageError::io(&self.path, e))?;
            file.write_all(&items.to_le_bytes())
                .map_err(|e| StorageError::io(&self.path, e))?;
        }
        Ok(())
    }

    /// Flush and release the handle.
    pub fn close(mut self) -> Result<(), StorageError> {
        if let Some(file) = self.file.take() {
            file.sync_all().map_err(|e| StorageError::io(&self.path, e))?;
        }
        Ok(())
    }
}

impl Drop for ExtendHandle {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.sync_all();
        }
    }
}

/// The mapped (headerless, lazily viewed) backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct MappedStorage;

impl ItemStorage for MappedStorage {
    fn load(
        &self,
        path: &Path,
        expected: Option<&ItemExpectation>,
    ) -> Result<ItemArray, StorageError> {
        let expected = expected.ok_or_else(|| StorageError::MissingExpectation {
            path: path.to_path_buf(),
        })?;
        Ok(ItemArray::Mapped(MappedArray::map(path, expected)?))
    }

    fn save(&self, path: &Path, items: &ItemArray) -> Result<(), StorageError> {
        match items {
            // Both layouts are the same raw bytes; copy the backing file
            // instead of re-encoding.
            ItemArray::Mapped(mapped) => {
                if mapped.path() != path {
                    std::fs::copy(mapped.path(), path)
                        .map_err(|e| StorageError::io(mapped.path(), e))?;
                }
                Ok(())
            }
            ItemArray::Owned(value) => {
                std::fs::write(path, value.to_le_bytes()).map_err(|e| StorageError::io(path, e))?;
                debug!("wrote raw array {} ({:?})", path.display(), value.shape());
                Ok(())
            }
        }
    }

    fn append(
        &self,
        path: &Path,
        items: &ArrayValue,
        expected: &ItemExpectation,
    ) -> Result<(), StorageError> {
        validate_new_items(path, items, expected)?;
        let mut handle = ExtendHandle::open(path, expected)?;
        handle.write_items(items)?;
        handle.close()
    }

    fn delete(&self, path: &Path) -> Result<(), StorageError> {
        std::fs::remove_file(path).map_err(|e| StorageError::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(items: usize) -> ArrayValue {
        let values: Vec<i32> = (0..items as i32 * 4).map(|v| v * 7 - 5).collect();
        ArrayValue::from_vec(&[items, 4], values).unwrap()
    }

    fn expectation(items: usize) -> ItemExpectation {
        ItemExpectation {
            num_items: items,
            item_shape: vec![4],
            dtype: Dtype::I32,
        }
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.raw");
        let value = sample(3);

        MappedStorage.save(&path, &ItemArray::Owned(value.clone())).unwrap();
        let loaded = MappedStorage.load(&path, Some(&expectation(3))).unwrap();
        assert!(matches!(loaded, ItemArray::Mapped(_)));
        assert_eq!(loaded.materialize().unwrap(), value);
    }

    #[test]
    fn load_requires_expectation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.raw");
        MappedStorage.save(&path, &ItemArray::Owned(sample(1))).unwrap();
        assert!(matches!(
            MappedStorage.load(&path, None),
            Err(StorageError::MissingExpectation { .. })
        ));
    }

    #[test]
    fn load_missing_file_fails() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            MappedStorage.load(&dir.path().join("absent.raw"), Some(&expectation(1))),
            Err(StorageError::Missing { .. })
        ));
    }

    #[test]
    fn load_validates_count_via_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.raw");
        MappedStorage.save(&path, &ItemArray::Owned(sample(3))).unwrap();
        assert!(matches!(
            MappedStorage.load(&path, Some(&expectation(4))),
            Err(StorageError::CountMismatch { expected: 4, actual: 3, .. })
        ));
    }

    #[test]
    fn load_rejects_ragged_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.raw");
        std::fs::write(&path, [0u8; 17]).unwrap();
        assert!(matches!(
            MappedStorage.load(&path, Some(&expectation(1))),
            Err(StorageError::BadLength { actual: 17, .. })
        ));
    }

    #[test]
    fn item_decodes_single_rows_lazily() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.raw");
        let value = sample(3);
        MappedStorage.save(&path, &ItemArray::Owned(value.clone())).unwrap();

        let loaded = MappedStorage.load(&path, Some(&expectation(3))).unwrap();
        let ItemArray::Mapped(mapped) = loaded else {
            panic!("expected mapped view");
        };
        let row = mapped.item(1).unwrap();
        assert_eq!(row.expand_item(), value.slice_items(1, 2).unwrap());
        assert!(mapped.item(3).is_err());
    }

    #[test]
    fn save_copies_mapped_views_directly() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src.raw");
        let dst = dir.path().join("dst.raw");
        let value = sample(2);
        MappedStorage.save(&src, &ItemArray::Owned(value.clone())).unwrap();

        let view = MappedStorage.load(&src, Some(&expectation(2))).unwrap();
        MappedStorage.save(&dst, &view).unwrap();

        let copied = MappedStorage.load(&dst, Some(&expectation(2))).unwrap();
        assert_eq!(copied.materialize().unwrap(), value);
    }

    #[test]
    fn append_extends_in_place() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.raw");
        let first = sample(3);
        MappedStorage.save(&path, &ItemArray::Owned(first.clone())).unwrap();

        let more = sample(2);
        MappedStorage.append(&path, &more, &expectation(3)).unwrap();

        let loaded = MappedStorage
            .load(&path, Some(&expectation(5)))
            .unwrap()
            .materialize()
            .unwrap();
        assert_eq!(loaded.slice_items(0, 3).unwrap(), first);
        assert_eq!(loaded.slice_items(3, 5).unwrap(), more);
    }

    #[test]
    fn append_validates_existing_length() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.raw");
        MappedStorage.save(&path, &ItemArray::Owned(sample(3))).unwrap();
        assert!(matches!(
            MappedStorage.append(&path, &sample(1), &expectation(2)),
            Err(StorageError::CountMismatch { expected: 2, actual: 3, .. })
        ));
    }

    #[test]
    fn append_validates_new_items_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sample.raw");
        MappedStorage.save(&path, &ItemArray::Owned(sample(3))).unwrap();
        let bad = sample(1).cast(Dtype::U8);
        assert!(matches!(
            MappedStorage.append(&path, &bad, &expectation(3)),
            Err(StorageError::DtypeMismatch { .. })
        ));
    }

    #[test]
    fn delete_missing_file_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            MappedStorage.delete(&dir.path().join("absent.raw")),
            Err(StorageError::Missing { .. })
        ));
    }
}
