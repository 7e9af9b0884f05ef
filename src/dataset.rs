//! # Dataset Entity
//!
//! The in-memory dataset: one array collection per active item type, one
//! targets collection, and one ordered metadata record list, all kept the
//! same length. Items enter either one at a time via [`Dataset::add_item`]
//! (which converts the source packet) or in bulk via [`Dataset::merge_with`].
//! A dataset marked non-resizable rejects both.
//!
//! Compatibility between datasets is structural (packet shape, item-type
//! set, per-type item shapes, target shape); dtypes may differ, merged rows
//! are cast to the receiving dataset's dtypes.

use std::collections::BTreeMap;

use log::debug;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::array::{ArrayError, ArrayValue, Dtype};
use crate::config::{data_backend_default, metadata_backend_default, targets_backend_default};
use crate::convert::{convert_packet, ConvertError};
use crate::metadata::MetaRecord;
use crate::schema::{
    DataAttributes, DatasetAttributes, ItemType, ItemTypeSet, MetadataAttributes, PacketShape,
    SchemaError, TargetsAttributes, TypeSpec, CONFIG_VERSION_V0, DEFAULT_TARGET_SHAPE,
    TARGETS_TYPE_KEY,
};

/// Errors from dataset construction and growth.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    /// The dataset is marked non-resizable.
    #[error("dataset '{0}' is not resizable")]
    NotResizable(String),

    /// A source packet with the wrong shape.
    #[error("packet shape {actual:?} does not match accepted shape {expected:?}")]
    PacketShapeMismatch {
        /// The accepted packet shape.
        expected: Vec<usize>,
        /// The supplied packet shape.
        actual: Vec<usize>,
    },

    /// A target item with the wrong shape.
    #[error("target shape {actual:?} does not match configured shape {expected:?}")]
    TargetShapeMismatch {
        /// The configured per-item target shape.
        expected: Vec<usize>,
        /// The supplied target shape.
        actual: Vec<usize>,
    },

    /// The datasets cannot be merged.
    #[error("incompatible datasets: {0}")]
    Incompatible(String),

    /// A collection whose length disagrees with the declared item count.
    #[error("collection '{collection}' holds {actual} items, expected {expected}")]
    Misaligned {
        /// Name of the offending collection.
        collection: String,
        /// Declared item count.
        expected: usize,
        /// Actual collection length.
        actual: usize,
    },

    /// An underlying array operation failed.
    #[error(transparent)]
    Array(#[from] ArrayError),

    /// Packet conversion failed.
    #[error(transparent)]
    Convert(#[from] ConvertError),

    /// Schema-level resolution failure.
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// An in-memory dataset with aligned data, targets, and metadata.
pub struct Dataset {
    name: String,
    attributes: DatasetAttributes,
    data: BTreeMap<String, ArrayValue>,
    target_key: String,
    targets: ArrayValue,
    records: Vec<MetaRecord>,
    resizable: bool,
}

impl Dataset {
    /// An empty, resizable dataset with default backends and the default
    /// two-class target vector.
    pub fn new(
        name: &str,
        packet_shape: PacketShape,
        item_types: &ItemTypeSet,
        dtype: Dtype,
    ) -> Result<Dataset, DatasetError> {
        if item_types.is_empty() {
            return Err(SchemaError::EmptyItemTypeSet.into());
        }
        let mut data_types = BTreeMap::new();
        for item_type in item_types.iter() {
            data_types.insert(
                item_type.key().to_string(),
                TypeSpec {
                    dtype,
                    shape: item_type.item_shape(&packet_shape),
                },
            );
        }
        let mut target_types = BTreeMap::new();
        target_types.insert(
            TARGETS_TYPE_KEY.to_string(),
            TypeSpec {
                dtype,
                shape: DEFAULT_TARGET_SHAPE.to_vec(),
            },
        );
        let attributes = DatasetAttributes {
            version: CONFIG_VERSION_V0.to_string(),
            num_items: 0,
            data: DataAttributes {
                packet_shape,
                types: data_types,
                backend: data_backend_default(),
            },
            targets: TargetsAttributes {
                types: target_types,
                backend: targets_backend_default(),
            },
            metadata: MetadataAttributes {
                fields: Vec::new(),
                backend: metadata_backend_default(),
            },
        };
        Ok(Dataset::empty_from(name, attributes))
    }

    /// An empty dataset shaped after existing attributes.
    pub fn from_attributes(name: &str, mut attributes: DatasetAttributes) -> Dataset {
        attributes.num_items = 0;
        Dataset::empty_from(name, attributes)
    }

    fn empty_from(name: &str, attributes: DatasetAttributes) -> Dataset {
        let data = attributes
            .data
            .types
            .iter()
            .map(|(key, spec)| {
                let mut shape = vec![0];
                shape.extend_from_slice(&spec.shape);
                (key.clone(), ArrayValue::zeros(spec.dtype, &shape))
            })
            .collect();
        let (target_key, target_spec) = first_target(&attributes);
        let mut target_shape = vec![0];
        target_shape.extend_from_slice(&target_spec.shape);
        let targets = ArrayValue::zeros(target_spec.dtype, &target_shape);
        Dataset {
            name: name.to_string(),
            attributes,
            data,
            target_key,
            targets,
            records: Vec::new(),
            resizable: true,
        }
    }

    /// Reassemble a dataset from already-materialized collections.
    pub fn from_parts(
        name: &str,
        attributes: DatasetAttributes,
        data: BTreeMap<String, ArrayValue>,
        targets: ArrayValue,
        records: Vec<MetaRecord>,
    ) -> Result<Dataset, DatasetError> {
        let expected = attributes.num_items;
        for (key, value) in &data {
            if !attributes.data.types.contains_key(key) {
                return Err(DatasetError::Incompatible(format!(
                    "data collection '{key}' is not declared by the configuration"
                )));
            }
            if value.num_items() != expected {
                return Err(DatasetError::Misaligned {
                    collection: key.clone(),
                    expected,
                    actual: value.num_items(),
                });
            }
        }
        for key in attributes.data.types.keys() {
            if !data.contains_key(key) {
                return Err(DatasetError::Incompatible(format!(
                    "declared data collection '{key}' was not supplied"
                )));
            }
        }
        if targets.num_items() != expected {
            return Err(DatasetError::Misaligned {
                collection: "targets".to_string(),
                expected,
                actual: targets.num_items(),
            });
        }
        if records.len() != expected {
            return Err(DatasetError::Misaligned {
                collection: "metadata".to_string(),
                expected,
                actual: records.len(),
            });
        }
        let (target_key, _) = first_target(&attributes);
        Ok(Dataset {
            name: name.to_string(),
            attributes,
            data,
            target_key,
            targets,
            records,
            resizable: true,
        })
    }

    /// Dataset name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Canonical attributes describing this dataset.
    pub fn attributes(&self) -> &DatasetAttributes {
        &self.attributes
    }

    /// Number of items currently held.
    pub fn num_items(&self) -> usize {
        self.attributes.num_items
    }

    /// The array collection of one item type.
    pub fn data(&self, type_key: &str) -> Option<&ArrayValue> {
        self.data.get(type_key)
    }

    /// All data collections, keyed by item-type key.
    pub fn data_map(&self) -> &BTreeMap<String, ArrayValue> {
        &self.data
    }

    /// Key of the targets collection.
    pub fn target_key(&self) -> &str {
        &self.target_key
    }

    /// The targets collection.
    pub fn targets(&self) -> &ArrayValue {
        &self.targets
    }

    /// Known metadata field names, in column order.
    pub fn metadata_fields(&self) -> &[String] {
        &self.attributes.metadata.fields
    }

    /// Per-item metadata records.
    pub fn metadata_records(&self) -> &[MetaRecord] {
        &self.records
    }

    /// Whether the dataset accepts new items.
    pub fn is_resizable(&self) -> bool {
        self.resizable
    }

    /// Allow or forbid growth.
    pub fn set_resizable(&mut self, resizable: bool) {
        self.resizable = resizable;
    }

    /// Declare a metadata field. Earlier records without the field read as
    /// empty when serialized.
    pub fn add_metafield(&mut self, field: &str) {
        let fields = &mut self.attributes.metadata.fields;
        if !fields.iter().any(|f| f == field) {
            fields.push(field.to_string());
        }
    }

    /// Convert one packet and append it, with its target and metadata, as a
    /// single new item across all collections.
    pub fn add_item(
        &mut self,
        packet: &ArrayValue,
        target: &ArrayValue,
        metadata: MetaRecord,
    ) -> Result<(), DatasetError> {
        if !self.resizable {
            return Err(DatasetError::NotResizable(self.name.clone()));
        }
        let accepted = self.attributes.data.packet_shape.dims();
        if packet.shape() != accepted {
            return Err(DatasetError::PacketShapeMismatch {
                expected: accepted.to_vec(),
                actual: packet.shape().to_vec(),
            });
        }
        let target_spec = &self.attributes.targets.types[&self.target_key];
        if target.shape() != target_spec.shape.as_slice() {
            return Err(DatasetError::TargetShapeMismatch {
                expected: target_spec.shape.clone(),
                actual: target.shape().to_vec(),
            });
        }

        let types = self.attributes.item_types()?;
        let converted = convert_packet(packet, &types, 0, None, packet.dtype())?;
        for (key, spec) in &self.attributes.data.types {
            let item_type = ItemType::from_key(key)?;
            // item_types() was built from these very keys
            let item = converted[&item_type].cast(spec.dtype).expand_item();
            if let Some(collection) = self.data.get_mut(key) {
                collection.append_items(&item)?;
            }
        }
        self.targets
            .append_items(&target.cast(target_spec.dtype).expand_item())?;

        for field in metadata.keys() {
            self.add_metafield(field);
        }
        self.records.push(metadata);
        self.attributes.num_items += 1;
        Ok(())
    }

    /// Apply `passes` random permutations, the same one per pass to data,
    /// targets, and metadata, preserving row alignment.
    pub fn shuffle<R: Rng>(&mut self, passes: usize, rng: &mut R) {
        let n = self.attributes.num_items;
        for _ in 0..passes {
            let mut order: Vec<usize> = (0..n).collect();
            order.shuffle(rng);
            for collection in self.data.values_mut() {
                *collection = collection.select_items(&order);
            }
            self.targets = self.targets.select_items(&order);
            self.records = order.iter().map(|&i| self.records[i].clone()).collect();
        }
        debug!("shuffled dataset '{}' ({passes} passes)", self.name);
    }

    /// Structural compatibility: same packet shape, item-type set, per-type
    /// item shapes, and target shape. Dtypes are allowed to differ.
    pub fn is_compatible_with(&self, other: &Dataset) -> bool {
        let a = &self.attributes;
        let b = &other.attributes;
        a.data.packet_shape == b.data.packet_shape
            && a.data.types.len() == b.data.types.len()
            && a.data
                .types
                .iter()
                .all(|(k, spec)| b.data.types.get(k).is_some_and(|o| o.shape == spec.shape))
            && self.target_key == other.target_key
            && a.targets.types[&self.target_key].shape == b.targets.types[&other.target_key].shape
    }

    /// Append a row range of another dataset (default: all of it), casting
    /// to this dataset's dtypes.
    pub fn merge_with(
        &mut self,
        other: &Dataset,
        range: Option<(usize, usize)>,
    ) -> Result<(), DatasetError> {
        if !self.resizable {
            return Err(DatasetError::NotResizable(self.name.clone()));
        }
        if !self.is_compatible_with(other) {
            return Err(DatasetError::Incompatible(format!(
                "'{}' and '{}' differ structurally",
                self.name, other.name
            )));
        }
        let (start, end) = range.unwrap_or((0, other.num_items()));

        for (key, spec) in &self.attributes.data.types {
            let incoming = other.data[key].slice_items(start, end)?.cast(spec.dtype);
            if let Some(collection) = self.data.get_mut(key) {
                collection.append_items(&incoming)?;
            }
        }
        let target_dtype = self.attributes.targets.types[&self.target_key].dtype;
        let incoming = other.targets.slice_items(start, end)?.cast(target_dtype);
        self.targets.append_items(&incoming)?;

        for record in &other.records[start..end] {
            for field in record.keys() {
                self.add_metafield(field);
            }
            self.records.push(record.clone());
        }
        self.attributes.num_items += end - start;
        debug!(
            "merged {} items of '{}' into '{}'",
            end - start,
            other.name,
            self.name
        );
        Ok(())
    }
}

fn first_target(attributes: &DatasetAttributes) -> (String, TypeSpec) {
    attributes
        .targets
        .types
        .iter()
        .next()
        .map(|(k, v)| (k.clone(), v.clone()))
        .unwrap_or_else(|| {
            (
                TARGETS_TYPE_KEY.to_string(),
                TypeSpec {
                    dtype: Dtype::U8,
                    shape: DEFAULT_TARGET_SHAPE.to_vec(),
                },
            )
        })
}
