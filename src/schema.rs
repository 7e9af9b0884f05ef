//! # Dataset Schema
//!
//! Types and constants describing the shape of a packset dataset: the fixed
//! set of item types derived from a packet, per-type array specifications,
//! storage-backend descriptors, and the canonical (version-independent)
//! attribute structure that the configuration codec reads and writes.
//!
//! ## Item types
//!
//! | Key | Derivation | Item shape for packet `(f, r, c)` |
//! |-------|------------------------------------|-----------|
//! | `raw` | packet unchanged | `(f, r, c)` |
//! | `yx` | max over the frame axis | `(r, c)` |
//! | `gtux` | max over the row axis | `(f, c)` |
//! | `gtuy` | max over the column axis | `(f, r)` |

use std::collections::{BTreeMap, BTreeSet};

use crate::array::Dtype;

/// Version string of the current configuration schema.
pub const CONFIG_VERSION_V0: &str = "0";

/// Suffix appended to a dataset name to form its configuration filename.
pub const CONFIG_FILE_SUFFIX: &str = "_config.toml";

/// Backend name for self-describing, fully materialized array files.
pub const BACKEND_DENSE: &str = "dense";

/// Backend name for headerless, lazily mapped raw array files.
pub const BACKEND_MAPPED: &str = "mapped";

/// Backend name for delimited per-item metadata files.
pub const BACKEND_DELIMITED: &str = "delimited";

/// Filename format key: the item type key verbatim.
pub const FORMAT_TYPE_ONLY: &str = "type_only";

/// Filename format key: `{name}{delimiter}{item_type}`.
pub const FORMAT_NAME_WITH_TYPE_SUFFIX: &str = "name_with_type_suffix";

/// Filename format key: `{name}{delimiter}{suffix}` with a fixed suffix.
pub const FORMAT_NAME_WITH_SUFFIX: &str = "name_with_suffix";

/// Default delimiter between a dataset name and its filename suffix.
pub const DEFAULT_DELIMITER: &str = "_";

/// Default filename extension for dense array files.
pub const DEFAULT_DENSE_EXTENSION: &str = "pkd";

/// Default filename extension for mapped raw array files.
pub const DEFAULT_MAPPED_EXTENSION: &str = "raw";

/// Default filename extension for delimited metadata files.
pub const DEFAULT_METADATA_EXTENSION: &str = "tsv";

/// Type key used for the targets collection in section configurations.
pub const TARGETS_TYPE_KEY: &str = "classes";

/// Per-item shape of the default two-class target vector.
pub const DEFAULT_TARGET_SHAPE: [usize; 1] = [2];

/// Type key used when deriving a filename for the metadata section.
pub const METADATA_TYPE_KEY: &str = "metadata";

/// Errors from schema construction and key resolution.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// An item-type key outside the fixed set.
    #[error("unknown item type '{0}'")]
    UnknownItemType(String),

    /// A dtype name outside the supported set.
    #[error("unknown dtype '{0}'")]
    UnknownDtype(String),

    /// An item-type set with no active members.
    #[error("item type set is empty")]
    EmptyItemTypeSet,
}

/// Shape of one source packet: frames x rows x columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketShape {
    /// Number of frames (first packet axis).
    pub frames: usize,
    /// Number of rows (second packet axis).
    pub rows: usize,
    /// Number of columns (third packet axis).
    pub cols: usize,
}

impl PacketShape {
    /// The packet shape as an axis-ordered array.
    pub fn dims(&self) -> [usize; 3] {
        [self.frames, self.rows, self.cols]
    }
}

/// One of the fixed derived array kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ItemType {
    /// The packet itself, untransformed.
    Raw,
    /// Maximum projection along the frame axis.
    Yx,
    /// Maximum projection along the row axis.
    GtuX,
    /// Maximum projection along the column axis.
    GtuY,
}

impl ItemType {
    /// All item types, in canonical order.
    pub const ALL: [ItemType; 4] = [ItemType::Raw, ItemType::Yx, ItemType::GtuX, ItemType::GtuY];

    /// Configuration key for this item type.
    pub fn key(&self) -> &'static str {
        match self {
            ItemType::Raw => "raw",
            ItemType::Yx => "yx",
            ItemType::GtuX => "gtux",
            ItemType::GtuY => "gtuy",
        }
    }

    /// Resolve a configuration key to an item type.
    pub fn from_key(key: &str) -> Result<ItemType, SchemaError> {
        ItemType::ALL
            .iter()
            .copied()
            .find(|t| t.key() == key)
            .ok_or_else(|| SchemaError::UnknownItemType(key.to_string()))
    }

    /// The packet axis removed by this projection, or `None` for `raw`.
    pub fn projection_axis(&self) -> Option<usize> {
        match self {
            ItemType::Raw => None,
            ItemType::Yx => Some(0),
            ItemType::GtuX => Some(1),
            ItemType::GtuY => Some(2),
        }
    }

    /// Shape of one item of this type for the given packet shape.
    pub fn item_shape(&self, packet_shape: &PacketShape) -> Vec<usize> {
        let [f, r, c] = packet_shape.dims();
        match self {
            ItemType::Raw => vec![f, r, c],
            ItemType::Yx => vec![r, c],
            ItemType::GtuX => vec![f, c],
            ItemType::GtuY => vec![f, r],
        }
    }
}

impl std::fmt::Display for ItemType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// The set of item types active in a dataset. Never empty once a dataset is
/// constructed around it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ItemTypeSet {
    active: BTreeSet<ItemType>,
}

impl ItemTypeSet {
    /// Build a set from item types.
    pub fn new<I: IntoIterator<Item = ItemType>>(types: I) -> ItemTypeSet {
        ItemTypeSet {
            active: types.into_iter().collect(),
        }
    }

    /// Build a set from configuration keys, rejecting unknown keys.
    pub fn from_keys<'a, I: IntoIterator<Item = &'a str>>(
        keys: I,
    ) -> Result<ItemTypeSet, SchemaError> {
        let mut active = BTreeSet::new();
        for key in keys {
            active.insert(ItemType::from_key(key)?);
        }
        Ok(ItemTypeSet { active })
    }

    /// Whether the given type is active.
    pub fn contains(&self, item_type: ItemType) -> bool {
        self.active.contains(&item_type)
    }

    /// Activate a type.
    pub fn insert(&mut self, item_type: ItemType) {
        self.active.insert(item_type);
    }

    /// Active types in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = ItemType> + '_ {
        self.active.iter().copied()
    }

    /// Number of active types.
    pub fn len(&self) -> usize {
        self.active.len()
    }

    /// Whether no type is active.
    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }
}

/// Dtype and per-item shape of one stored item type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeSpec {
    /// Element type of the stored array.
    pub dtype: Dtype,
    /// Shape of a single item (without the item axis).
    pub shape: Vec<usize>,
}

/// Storage-backend descriptor for one dataset section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Registered backend name (`dense`, `mapped`, `delimited`).
    pub name: String,
    /// Filename extension (without the leading dot).
    pub filename_extension: String,
    /// Registered filename-format key.
    pub filename_format: String,
    /// Fixed filename suffix, for formats that use one.
    pub suffix: Option<String>,
    /// Delimiter between name and suffix; defaults to [`DEFAULT_DELIMITER`].
    pub delimiter: Option<String>,
}

impl BackendConfig {
    /// A descriptor with no suffix and the default delimiter.
    pub fn new(name: &str, filename_extension: &str, filename_format: &str) -> BackendConfig {
        BackendConfig {
            name: name.to_string(),
            filename_extension: filename_extension.to_string(),
            filename_format: filename_format.to_string(),
            suffix: None,
            delimiter: None,
        }
    }

    /// Set the fixed filename suffix.
    pub fn with_suffix(mut self, suffix: &str) -> BackendConfig {
        self.suffix = Some(suffix.to_string());
        self
    }

    /// Set the name/suffix delimiter.
    pub fn with_delimiter(mut self, delimiter: &str) -> BackendConfig {
        self.delimiter = Some(delimiter.to_string());
        self
    }
}

/// Everything the section persistence manager needs to know about one
/// array-valued section: its row count and its per-type specifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionConfig {
    /// Row count shared by every type of this section.
    pub num_items: usize,
    /// Per-type dtype and item shape, keyed by type key.
    pub types: BTreeMap<String, TypeSpec>,
}

/// Canonical attributes of the data section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataAttributes {
    /// Accepted source packet shape.
    pub packet_shape: PacketShape,
    /// Per-item-type specifications, keyed by item-type key.
    pub types: BTreeMap<String, TypeSpec>,
    /// Storage backend for this section.
    pub backend: BackendConfig,
}

/// Canonical attributes of the targets section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetsAttributes {
    /// Per-type specifications (normally a single entry).
    pub types: BTreeMap<String, TypeSpec>,
    /// Storage backend for this section.
    pub backend: BackendConfig,
}

/// Canonical attributes of the metadata section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataAttributes {
    /// Known per-item metadata field names, in column order.
    pub fields: Vec<String>,
    /// Storage backend for this section.
    pub backend: BackendConfig,
}

/// The version-independent in-memory representation of a dataset's
/// configuration, excluding actual array contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetAttributes {
    /// Schema version the attributes conform to.
    pub version: String,
    /// Number of items in the dataset.
    pub num_items: usize,
    /// Data section attributes.
    pub data: DataAttributes,
    /// Targets section attributes.
    pub targets: TargetsAttributes,
    /// Metadata section attributes.
    pub metadata: MetadataAttributes,
}

impl DatasetAttributes {
    /// Section configuration for the data section.
    pub fn data_section(&self) -> SectionConfig {
        SectionConfig {
            num_items: self.num_items,
            types: self.data.types.clone(),
        }
    }

    /// Section configuration for the targets section.
    pub fn targets_section(&self) -> SectionConfig {
        SectionConfig {
            num_items: self.num_items,
            types: self.targets.types.clone(),
        }
    }

    /// The active item-type set declared by the data section.
    pub fn item_types(&self) -> Result<ItemTypeSet, SchemaError> {
        ItemTypeSet::from_keys(self.data.types.keys().map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_shapes_follow_projection_axes() {
        let ps = PacketShape {
            frames: 20,
            rows: 48,
            cols: 64,
        };
        assert_eq!(ItemType::Raw.item_shape(&ps), vec![20, 48, 64]);
        assert_eq!(ItemType::Yx.item_shape(&ps), vec![48, 64]);
        assert_eq!(ItemType::GtuX.item_shape(&ps), vec![20, 64]);
        assert_eq!(ItemType::GtuY.item_shape(&ps), vec![20, 48]);
    }

    #[test]
    fn keys_round_trip() {
        for t in ItemType::ALL {
            assert_eq!(ItemType::from_key(t.key()).unwrap(), t);
        }
    }

    #[test]
    fn unknown_key_is_rejected() {
        assert!(matches!(
            ItemType::from_key("zy"),
            Err(SchemaError::UnknownItemType(_))
        ));
        assert!(ItemTypeSet::from_keys(["raw", "zy"]).is_err());
    }

    #[test]
    fn type_set_orders_canonically() {
        let set = ItemTypeSet::from_keys(["gtux", "raw"]).unwrap();
        let order: Vec<ItemType> = set.iter().collect();
        assert_eq!(order, vec![ItemType::Raw, ItemType::GtuX]);
    }
}
