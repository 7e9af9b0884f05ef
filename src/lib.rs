//! # packset - Packet-Derived Dataset Storage
//!
//! `packset` persists datasets built from fixed-shape sensor packets: each
//! source packet (frames x rows x columns) is converted into a configurable
//! set of derived item types (the raw packet plus per-axis maximum
//! projections), stored alongside per-item targets and metadata, and
//! described by a versioned TOML configuration.
//!
//! ## Key pieces
//!
//! - **Converter** ([`convert`]): pure packet → item-type arrays, with frame
//!   slicing and dtype casting.
//! - **Storage backends** ([`storage`]): self-describing dense files and
//!   headerless memory-mapped raw files behind one facade trait.
//! - **Filename layouts** ([`layout`]): pluggable (dataset name, item type) →
//!   filename strategies.
//! - **Section manager** ([`section`]): loads/saves/appends/deletes all item
//!   types of one section as a unit, enforcing the shared item count.
//! - **Configuration codec** ([`config`]): versioned TOML encodings of the
//!   canonical dataset attributes, including the legacy unversioned layout.
//! - **Dataset entity** ([`dataset`]): aligned in-memory collections with
//!   append, shuffle, and merge.
//! - **Persistence handler** ([`persist`]): whole-dataset load/save rooted in
//!   one directory.
//! - **Extraction cache** ([`cache`]): bounded cache with bulk eviction for
//!   batch jobs re-reading the same source files.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use packset::array::{ArrayValue, Dtype};
//! use packset::dataset::Dataset;
//! use packset::metadata::MetaRecord;
//! use packset::persist::DatasetPersistence;
//! use packset::schema::{ItemType, ItemTypeSet, PacketShape};
//!
//! let shape = PacketShape { frames: 20, rows: 48, cols: 48 };
//! let types = ItemTypeSet::new([ItemType::Raw, ItemType::Yx]);
//! let mut dataset = Dataset::new("run7", shape, &types, Dtype::U8)?;
//!
//! let packet = ArrayValue::zeros(Dtype::U8, &[20, 48, 48]);
//! let target = ArrayValue::zeros(Dtype::U8, &[2]);
//! dataset.add_item(&packet, &target, MetaRecord::new())?;
//!
//! let persistence = DatasetPersistence::new("data".as_ref());
//! persistence.save_dataset(&dataset)?;
//! # Ok::<(), anyhow::Error>(())
//! ```
//!
//! All I/O is synchronous and single-threaded; see the module docs for the
//! concurrency assumptions of the mapped backend and the cache.

pub mod array;
pub mod cache;
pub mod config;
pub mod convert;
pub mod dataset;
pub mod layout;
pub mod metadata;
pub mod persist;
pub mod schema;
pub mod section;
pub mod storage;

pub use array::{ArrayValue, Dtype};
pub use dataset::Dataset;
pub use persist::DatasetPersistence;
pub use schema::{DatasetAttributes, ItemType, ItemTypeSet, PacketShape};
