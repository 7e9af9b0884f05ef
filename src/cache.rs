//! # Bounded Extraction Cache
//!
//! A fixed-capacity cache over expensive packet-extraction results, used
//! when one batch job re-reads the same source files many times. Keys are
//! source-path strings; values are the extracted packet arrays. When the
//! insertion-order queue reaches capacity, a configured *batch* of oldest
//! entries is evicted at once, amortizing eviction cost across many
//! insertions instead of paying it on every insert past capacity.
//!
//! The cache is not thread-safe and not reentrant; it is meant for
//! sequential, single-threaded batch loops.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use log::{debug, trace};

use crate::array::{ArrayValue, Dtype};
use crate::schema::PacketShape;
use crate::storage::{DenseStorage, ItemExpectation, ItemStorage, MappedArray, StorageError};

/// Errors from cache construction and lookups.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The eviction batch must leave room for at least one entry.
    #[error("eviction batch size {evict_count} must be smaller than capacity {capacity}")]
    BadConfig {
        /// Configured capacity.
        capacity: usize,
        /// Configured eviction batch size.
        evict_count: usize,
    },

    /// No registered extractor matches the key.
    #[error("no extractor registered for key '{key}'")]
    NoExtractor {
        /// The unresolvable key.
        key: String,
    },

    /// The extractor failed to read the source.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Capacity and eviction batch size of an [`ExtractionCache`].
#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    /// Maximum number of resident entries.
    pub capacity: usize,
    /// Number of oldest entries evicted together when full.
    pub evict_count: usize,
}

/// Computes a packet array from a source file; matched by key suffix.
pub trait PacketSourceExtractor {
    /// Whether this extractor handles the given key.
    fn can_extract(&self, key: &str) -> bool;

    /// Read and extract the packets behind `key`.
    fn extract(&self, key: &str) -> Result<ArrayValue, CacheError>;
}

/// Extractor for self-describing dense packet files.
#[derive(Debug, Clone)]
pub struct DenseFileExtractor {
    /// Filename extension handled (without the leading dot).
    pub extension: String,
}

impl PacketSourceExtractor for DenseFileExtractor {
    fn can_extract(&self, key: &str) -> bool {
        key.ends_with(&format!(".{}", self.extension))
    }

    fn extract(&self, key: &str) -> Result<ArrayValue, CacheError> {
        let loaded = DenseStorage.load(Path::new(key), None)?;
        Ok(loaded.materialize()?)
    }
}

/// Extractor for headerless raw packet files. The per-packet shape and
/// dtype are fixed at construction; the packet count comes from the file
/// length.
#[derive(Debug, Clone)]
pub struct RawFileExtractor {
    /// Filename extension handled (without the leading dot).
    pub extension: String,
    /// Shape of one packet in the file.
    pub packet_shape: PacketShape,
    /// Element type of the file.
    pub dtype: Dtype,
}

impl PacketSourceExtractor for RawFileExtractor {
    fn can_extract(&self, key: &str) -> bool {
        key.ends_with(&format!(".{}", self.extension))
    }

    fn extract(&self, key: &str) -> Result<ArrayValue, CacheError> {
        let path = Path::new(key);
        let packet_bytes =
            self.packet_shape.dims().iter().product::<usize>() * self.dtype.size_bytes();
        let len = std::fs::metadata(path)
            .map_err(|e| StorageError::io(path, e))?
            .len();
        if packet_bytes == 0 || len % packet_bytes as u64 != 0 {
            return Err(CacheError::Storage(StorageError::BadLength {
                path: path.to_path_buf(),
                actual: len,
                item_bytes: packet_bytes,
            }));
        }
        let expected = ItemExpectation {
            num_items: (len / packet_bytes as u64) as usize,
            item_shape: self.packet_shape.dims().to_vec(),
            dtype: self.dtype,
        };
        let mapped = MappedArray::map(path, &expected)?;
        Ok(mapped.to_value()?)
    }
}

/// Bounded, insertion-ordered cache of extraction results.
pub struct ExtractionCache {
    config: CacheConfig,
    extractors: Vec<Box<dyn PacketSourceExtractor>>,
    entries: HashMap<String, ArrayValue>,
    order: VecDeque<String>,
}

impl ExtractionCache {
    /// Build a cache with the given extractors.
    ///
    /// Fails unless `0 < evict_count < capacity`.
    pub fn new(
        config: CacheConfig,
        extractors: Vec<Box<dyn PacketSourceExtractor>>,
    ) -> Result<ExtractionCache, CacheError> {
        if config.evict_count == 0 || config.evict_count >= config.capacity {
            return Err(CacheError::BadConfig {
                capacity: config.capacity,
                evict_count: config.evict_count,
            });
        }
        Ok(ExtractionCache {
            config,
            extractors,
            entries: HashMap::new(),
            order: VecDeque::new(),
        })
    }

    /// Get the value for `key`, extracting and caching it on first access.
    pub fn get(&mut self, key: &str) -> Result<&ArrayValue, CacheError> {
        if !self.entries.contains_key(key) {
            let extractor = self
                .extractors
                .iter()
                .find(|e| e.can_extract(key))
                .ok_or_else(|| CacheError::NoExtractor {
                    key: key.to_string(),
                })?;
            trace!("cache miss for {key}");
            let value = extractor.extract(key)?;
            if self.order.len() >= self.config.capacity {
                self.evict_batch();
            }
            self.order.push_back(key.to_string());
            self.entries.insert(key.to_string(), value);
        }
        self.entries.get(key).ok_or_else(|| CacheError::NoExtractor {
            key: key.to_string(),
        })
    }

    /// Number of resident entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `key` is currently resident.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn evict_batch(&mut self) {
        debug!(
            "evicting {} of {} cached extractions",
            self.config.evict_count,
            self.order.len()
        );
        for _ in 0..self.config.evict_count {
            if let Some(oldest) = self.order.pop_front() {
                self.entries.remove(&oldest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Extractor that counts how often it runs.
    struct CountingExtractor {
        calls: Rc<Cell<usize>>,
    }

    impl PacketSourceExtractor for CountingExtractor {
        fn can_extract(&self, key: &str) -> bool {
            key.ends_with(".cnt")
        }

        fn extract(&self, key: &str) -> Result<ArrayValue, CacheError> {
            self.calls.set(self.calls.get() + 1);
            let seed = key.len() as u8;
            Ok(ArrayValue::from_vec(&[1, 2], vec![seed, seed.wrapping_add(1)]).expect("shape"))
        }
    }

    fn cache(capacity: usize, evict_count: usize) -> (ExtractionCache, Rc<Cell<usize>>) {
        let calls = Rc::new(Cell::new(0));
        let cache = ExtractionCache::new(
            CacheConfig {
                capacity,
                evict_count,
            },
            vec![Box::new(CountingExtractor {
                calls: Rc::clone(&calls),
            })],
        )
        .unwrap();
        (cache, calls)
    }

    #[test]
    fn construction_rejects_bad_batch_size() {
        assert!(matches!(
            ExtractionCache::new(
                CacheConfig {
                    capacity: 4,
                    evict_count: 4
                },
                vec![]
            ),
            Err(CacheError::BadConfig { .. })
        ));
        assert!(matches!(
            ExtractionCache::new(
                CacheConfig {
                    capacity: 4,
                    evict_count: 0
                },
                vec![]
            ),
            Err(CacheError::BadConfig { .. })
        ));
    }

    #[test]
    fn values_are_computed_once() {
        let (mut cache, calls) = cache(4, 1);
        let first = cache.get("a.cnt").unwrap().clone();
        let second = cache.get("a.cnt").unwrap().clone();
        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn unmatched_key_fails() {
        let (mut cache, _) = cache(4, 1);
        assert!(matches!(
            cache.get("a.unknown"),
            Err(CacheError::NoExtractor { .. })
        ));
    }

    #[test]
    fn bulk_eviction_arithmetic() {
        // capacity C = 5, eviction batch E = 2: after C+1 distinct keys the
        // cache holds exactly C - E + 1 = 4 entries.
        let (mut cache, _) = cache(5, 2);
        for i in 0..6 {
            cache.get(&format!("key{i}.cnt")).unwrap();
        }
        assert_eq!(cache.len(), 4);
        // the two oldest are gone, the rest are resident
        assert!(!cache.contains("key0.cnt"));
        assert!(!cache.contains("key1.cnt"));
        for i in 2..6 {
            assert!(cache.contains(&format!("key{i}.cnt")));
        }
    }

    #[test]
    fn evicted_keys_are_recomputed() {
        let (mut cache, calls) = cache(2, 1);
        cache.get("a.cnt").unwrap();
        cache.get("bb.cnt").unwrap();
        cache.get("ccc.cnt").unwrap(); // evicts a.cnt
        assert_eq!(calls.get(), 3);
        cache.get("a.cnt").unwrap();
        assert_eq!(calls.get(), 4);
    }
}
