//! # Dense Storage Backend
//!
//! Self-describing array files: a 4-byte magic, a little-endian `u32` header
//! length, a JSON header carrying dtype and full shape, then the raw
//! little-endian element data. Loads always materialize the whole array.
//!
//! ```text
//! +------+------------+----------------------+------------------+
//! | PKD1 | header len | {"dtype":..,"shape":..} | element bytes |
//! +------+------------+----------------------+------------------+
//! ```

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::array::{ArrayValue, Dtype};
use crate::storage::{
    validate_new_items, validate_stored, ItemArray, ItemExpectation, ItemStorage, StorageError,
};

/// Magic bytes opening every dense array file.
pub const DENSE_MAGIC: [u8; 4] = *b"PKD1";

#[derive(Debug, Serialize, Deserialize)]
struct DenseHeader {
    dtype: String,
    shape: Vec<usize>,
}

/// The dense (self-describing, fully materialized) backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenseStorage;

impl DenseStorage {
    fn read_file(&self, path: &Path) -> Result<ArrayValue, StorageError> {
        let mut file = File::open(path).map_err(|e| StorageError::io(path, e))?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)
            .map_err(|e| StorageError::io(path, e))?;
        if magic != DENSE_MAGIC {
            return Err(StorageError::BadHeader {
                path: path.to_path_buf(),
                reason: format!("bad magic {magic:?}"),
            });
        }

        let header_len = file
            .read_u32::<LittleEndian>()
            .map_err(|e| StorageError::io(path, e))? as usize;
        let mut header_bytes = vec![0u8; header_len];
        file.read_exact(&mut header_bytes)
            .map_err(|e| StorageError::io(path, e))?;
        let header: DenseHeader =
            serde_json::from_slice(&header_bytes).map_err(|e| StorageError::BadHeader {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        let dtype = Dtype::from_name(&header.dtype).ok_or_else(|| StorageError::BadHeader {
            path: path.to_path_buf(),
            reason: format!("unknown dtype '{}'", header.dtype),
        })?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| StorageError::io(path, e))?;
        Ok(ArrayValue::from_le_bytes(dtype, &header.shape, &data)?)
    }

    fn write_file(&self, path: &Path, value: &ArrayValue) -> Result<(), StorageError> {
        let header = DenseHeader {
            dtype: value.dtype().name().to_string(),
            shape: value.shape().to_vec(),
        };
        let header_bytes = serde_json::to_vec(&header).map_err(|e| StorageError::BadHeader {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let file = File::create(path).map_err(|e| StorageError::io(path, e))?;
        let mut out = BufWriter::new(file);
        out.write_all(&DENSE_MAGIC)
            .map_err(|e| StorageError::io(path, e))?;
        out.write_u32::<LittleEndian>(header_bytes.len() as u32)
            .map_err(|e| StorageError::io(path, e))?;
        out.write_all(&header_bytes)
            .map_err(|e| StorageError::io(path, e))?;
        out.write_all(&value.to_le_bytes())
            .map_err(|e| StorageError::io(path, e))?;
        out.flush().map_err(|e| StorageError::io(path, e))?;
        debug!("wrote dense array {} ({:?})", path.display(), value.shape());
        Ok(())
    }
}

impl ItemStorage for DenseStorage {
    fn load(
        &self,
        path: &Path,
        expected: Option<&ItemExpectation>,
    ) -> Result<ItemArray, StorageError> {
        let value = self.read_file(path)?;
        if let Some(exp) = expected {
            validate_stored(path, value.dtype(), value.shape(), exp)?;
        }
        Ok(ItemArray::Owned(value))
    }

    fn save(&self, path: &Path, items: &ItemArray) -> Result<(), StorageError> {
        // Mapped inputs are re-encoded here; the headerless layout cannot be
        // byte-copied into a self-describing file.
        let value = items.materialize()?;
        self.write_file(path, &value)
    }

    fn append(
        &self,
        path: &Path,
        items: &ArrayValue,
        expected: &ItemExpectation,
    ) -> Result<(), StorageError> {
        validate_new_items(path, items, expected)?;
        let mut existing = self.read_file(path)?;
        validate_stored(path, existing.dtype(), existing.shape(), expected)?;
        existing.append_items(items)?;
        self.write_file(path, &existing)
    }

    fn delete(&self, path: &Path) -> Result<(), StorageError> {
        std::fs::remove_file(path).map_err(|e| StorageError::io(path, e))
    }
}
