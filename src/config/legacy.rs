//! Parser for the flat, unversioned configuration layout.
//!
//! The legacy layout predates per-section backends and per-type dtypes: a
//! single `general.dtype` applies to every stored array, item shapes are
//! derived from `[packet_shape]`, and the backends are fixed to the
//! historical defaults (dense arrays, `name_with_suffix` metadata with the
//! `meta` suffix). There is no serializer for this layout.

use std::collections::BTreeMap;

use crate::array::Dtype;
use crate::config::{
    optional_usize, require_bool, require_str, require_str_array, require_table, require_usize,
    ConfigError,
};
use crate::schema::{
    BackendConfig, DataAttributes, DatasetAttributes, ItemType, MetadataAttributes, PacketShape,
    SchemaError, TargetsAttributes, TypeSpec, BACKEND_DELIMITED, BACKEND_DENSE,
    CONFIG_VERSION_V0, DEFAULT_DENSE_EXTENSION, DEFAULT_METADATA_EXTENSION,
    DEFAULT_TARGET_SHAPE, FORMAT_NAME_WITH_SUFFIX, FORMAT_NAME_WITH_TYPE_SUFFIX,
    TARGETS_TYPE_KEY,
};

const LEGACY_TARGETS_SUFFIX: &str = "targets";
const LEGACY_METADATA_SUFFIX: &str = "meta";

/// Parse a legacy (unversioned) configuration table.
pub fn parse_legacy(root: &toml::Table) -> Result<DatasetAttributes, ConfigError> {
    let general = require_table(root, "general")?;

    let num_items = require_usize(general, "general", "num_data")?;
    let mut counts = vec![("num_data".to_string(), num_items)];
    for key in ["num_targets", "num_metadata"] {
        if let Some(count) = optional_usize(general, "general", key)? {
            counts.push((key.to_string(), count));
        }
    }
    if counts.iter().any(|(_, c)| *c != num_items) {
        return Err(ConfigError::InconsistentCounts { counts });
    }

    let dtype_name = require_str(general, "general", "dtype")?;
    let dtype = Dtype::from_name(dtype_name)
        .ok_or_else(|| SchemaError::UnknownDtype(dtype_name.to_string()))?;

    let fields = if general.contains_key("metafields") {
        require_str_array(general, "general", "metafields")?
    } else {
        Vec::new()
    };

    let shape_table = require_table(root, "packet_shape")?;
    let packet_shape = PacketShape {
        frames: require_usize(shape_table, "packet_shape", "frames")?,
        rows: require_usize(shape_table, "packet_shape", "rows")?,
        cols: require_usize(shape_table, "packet_shape", "cols")?,
    };

    let flags = require_table(root, "item_types")?;
    let mut data_types = BTreeMap::new();
    for key in flags.keys() {
        let item_type = ItemType::from_key(key)?;
        if require_bool(flags, "item_types", key)? {
            data_types.insert(
                key.clone(),
                TypeSpec {
                    dtype,
                    shape: item_type.item_shape(&packet_shape),
                },
            );
        }
    }
    if data_types.is_empty() {
        return Err(ConfigError::NoItemTypes);
    }

    let mut target_types = BTreeMap::new();
    target_types.insert(
        TARGETS_TYPE_KEY.to_string(),
        TypeSpec {
            dtype,
            shape: DEFAULT_TARGET_SHAPE.to_vec(),
        },
    );

    Ok(DatasetAttributes {
        version: CONFIG_VERSION_V0.to_string(),
        num_items,
        data: DataAttributes {
            packet_shape,
            types: data_types,
            backend: BackendConfig::new(
                BACKEND_DENSE,
                DEFAULT_DENSE_EXTENSION,
                FORMAT_NAME_WITH_TYPE_SUFFIX,
            ),
        },
        targets: TargetsAttributes {
            types: target_types,
            backend: BackendConfig::new(
                BACKEND_DENSE,
                DEFAULT_DENSE_EXTENSION,
                FORMAT_NAME_WITH_SUFFIX,
            )
            .with_suffix(LEGACY_TARGETS_SUFFIX),
        },
        metadata: MetadataAttributes {
            fields,
            backend: BackendConfig::new(
                BACKEND_DELIMITED,
                DEFAULT_METADATA_EXTENSION,
                FORMAT_NAME_WITH_SUFFIX,
            )
            .with_suffix(LEGACY_METADATA_SUFFIX),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(raw: &str) -> toml::Table {
        raw.parse().unwrap()
    }

    const MINIMAL: &str = r#"
        [general]
        num_data = 2
        dtype = "float32"

        [packet_shape]
        frames = 4
        rows = 8
        cols = 8

        [item_types]
        raw = false
        gtux = true
    "#;

    #[test]
    fn shared_dtype_and_derived_shapes() {
        let attrs = parse_legacy(&table(MINIMAL)).unwrap();
        assert_eq!(attrs.num_items, 2);
        assert_eq!(attrs.data.types.len(), 1);
        let gtux = &attrs.data.types["gtux"];
        assert_eq!(gtux.dtype, Dtype::F32);
        assert_eq!(gtux.shape, vec![4, 8]);
        assert_eq!(attrs.targets.types[TARGETS_TYPE_KEY].dtype, Dtype::F32);
        assert!(attrs.metadata.fields.is_empty());
    }

    #[test]
    fn counts_must_agree_when_present() {
        let raw = MINIMAL.replace("num_data = 2", "num_data = 2\nnum_targets = 5");
        assert!(matches!(
            parse_legacy(&table(&raw)),
            Err(ConfigError::InconsistentCounts { .. })
        ));
    }

    #[test]
    fn all_types_disabled_is_an_error() {
        let raw = MINIMAL.replace("gtux = true", "gtux = false");
        assert!(matches!(
            parse_legacy(&table(&raw)),
            Err(ConfigError::NoItemTypes)
        ));
    }

    #[test]
    fn unknown_item_type_key_is_rejected() {
        let raw = format!("{MINIMAL}\nzy = true");
        assert!(matches!(
            parse_legacy(&table(&raw)),
            Err(ConfigError::Schema(SchemaError::UnknownItemType(_)))
        ));
    }

    #[test]
    fn unknown_dtype_is_rejected() {
        let raw = MINIMAL.replace("float32", "float16");
        assert!(matches!(
            parse_legacy(&table(&raw)),
            Err(ConfigError::Schema(SchemaError::UnknownDtype(_)))
        ));
    }

    #[test]
    fn fixed_backends() {
        let attrs = parse_legacy(&table(MINIMAL)).unwrap();
        assert_eq!(attrs.data.backend.name, BACKEND_DENSE);
        assert_eq!(attrs.data.backend.filename_format, FORMAT_NAME_WITH_TYPE_SUFFIX);
        assert_eq!(attrs.targets.backend.suffix.as_deref(), Some("targets"));
        assert_eq!(attrs.metadata.backend.name, BACKEND_DELIMITED);
        assert_eq!(attrs.metadata.backend.suffix.as_deref(), Some("meta"));
    }
}
