//! Version-0 codec over the nested `"section:subsection"` layout.
//!
//! Top-level tables: `general` (version, item count), an optional shared
//! `"general:backend"`, `"data:packet_shape"`, one `"data:<item_type>"`
//! table per active type, `"targets:<type>"` tables, `metadata.fields`, and
//! optional per-section `"<section>:backend"` overrides. Backend resolution
//! is field-wise: a section's own backend table wins over the shared
//! `"general:backend"`, which wins over the built-in section default.

use std::collections::BTreeMap;

use crate::array::Dtype;
use crate::config::{
    optional_str, optional_table, require_str, require_str_array, require_table, require_usize,
    require_usize_array, ConfigCodec, ConfigError,
};
use crate::schema::{
    BackendConfig, DataAttributes, DatasetAttributes, ItemType, MetadataAttributes, PacketShape,
    SchemaError, TargetsAttributes, TypeSpec, BACKEND_DELIMITED, BACKEND_DENSE,
    CONFIG_VERSION_V0, DEFAULT_DENSE_EXTENSION, DEFAULT_METADATA_EXTENSION,
    FORMAT_NAME_WITH_SUFFIX, FORMAT_NAME_WITH_TYPE_SUFFIX, TARGETS_TYPE_KEY,
};

/// The version-0 configuration codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct V0Codec;

pub(crate) fn data_backend_default() -> BackendConfig {
    BackendConfig::new(
        BACKEND_DENSE,
        DEFAULT_DENSE_EXTENSION,
        FORMAT_NAME_WITH_TYPE_SUFFIX,
    )
}

pub(crate) fn targets_backend_default() -> BackendConfig {
    BackendConfig::new(
        BACKEND_DENSE,
        DEFAULT_DENSE_EXTENSION,
        FORMAT_NAME_WITH_SUFFIX,
    )
    .with_suffix("targets")
}

// Unlike the legacy layout, the version-0 default for metadata is the
// type-suffix format with no fixed suffix. Loading the same dataset through
// the two encodings therefore yields different metadata filenames unless the
// backend is spelled out.
pub(crate) fn metadata_backend_default() -> BackendConfig {
    BackendConfig::new(
        BACKEND_DELIMITED,
        DEFAULT_METADATA_EXTENSION,
        FORMAT_NAME_WITH_TYPE_SUFFIX,
    )
}

/// Field-wise merge: section table, then shared table, then the default.
fn resolve_backend(
    section_name: &str,
    section: Option<&toml::Table>,
    shared: Option<&toml::Table>,
    default: BackendConfig,
) -> Result<BackendConfig, ConfigError> {
    let mut backend = default;
    let layers = [
        (shared, "general:backend"),
        (section, section_name),
    ];
    for (table, location) in layers {
        let Some(table) = table else { continue };
        if let Some(name) = optional_str(table, location, "name")? {
            backend.name = name.to_string();
        }
        if let Some(ext) = optional_str(table, location, "filename_extension")? {
            backend.filename_extension = ext.to_string();
        }
        if let Some(format) = optional_str(table, location, "filename_format")? {
            backend.filename_format = format.to_string();
        }
        if let Some(suffix) = optional_str(table, location, "suffix")? {
            backend.suffix = Some(suffix.to_string());
        }
        if let Some(delimiter) = optional_str(table, location, "delimiter")? {
            backend.delimiter = Some(delimiter.to_string());
        }
    }
    Ok(backend)
}

/// Collect the `"<section>:<subsection>"` type tables of one section,
/// skipping the reserved subsection names.
fn collect_type_specs(
    root: &toml::Table,
    section: &str,
    reserved: &[&str],
) -> Result<BTreeMap<String, TypeSpec>, ConfigError> {
    let prefix = format!("{section}:");
    let mut types = BTreeMap::new();
    for (key, _) in root.iter() {
        let Some(subsection) = key.strip_prefix(&prefix) else {
            continue;
        };
        if reserved.contains(&subsection) {
            continue;
        }
        let table = require_table(root, key)?;
        let dtype_name = require_str(table, key, "dtype")?;
        let dtype = Dtype::from_name(dtype_name)
            .ok_or_else(|| SchemaError::UnknownDtype(dtype_name.to_string()))?;
        let shape = require_usize_array(table, key, "shape")?;
        types.insert(subsection.to_string(), TypeSpec { dtype, shape });
    }
    Ok(types)
}

fn backend_table(backend: &BackendConfig) -> toml::Table {
    let mut table = toml::Table::new();
    table.insert("name".to_string(), backend.name.clone().into());
    table.insert(
        "filename_extension".to_string(),
        backend.filename_extension.clone().into(),
    );
    table.insert(
        "filename_format".to_string(),
        backend.filename_format.clone().into(),
    );
    if let Some(suffix) = &backend.suffix {
        table.insert("suffix".to_string(), suffix.clone().into());
    }
    if let Some(delimiter) = &backend.delimiter {
        table.insert("delimiter".to_string(), delimiter.clone().into());
    }
    table
}

fn type_spec_table(spec: &TypeSpec) -> toml::Table {
    let mut table = toml::Table::new();
    table.insert("dtype".to_string(), spec.dtype.name().into());
    table.insert(
        "shape".to_string(),
        toml::Value::Array(spec.shape.iter().map(|&d| (d as i64).into()).collect()),
    );
    table
}

impl ConfigCodec for V0Codec {
    fn parse(&self, root: &toml::Table) -> Result<DatasetAttributes, ConfigError> {
        let general = require_table(root, "general")?;
        let version = require_str(general, "general", "version")?.to_string();
        let num_items = require_usize(general, "general", "num_items")?;
        let shared_backend = optional_table(root, "general:backend")?;

        let shape_table = require_table(root, "data:packet_shape")?;
        let packet_shape = PacketShape {
            frames: require_usize(shape_table, "data:packet_shape", "frames")?,
            rows: require_usize(shape_table, "data:packet_shape", "rows")?,
            cols: require_usize(shape_table, "data:packet_shape", "cols")?,
        };

        let data_types = collect_type_specs(root, "data", &["backend", "packet_shape"])?;
        if data_types.is_empty() {
            return Err(ConfigError::NoItemTypes);
        }
        for key in data_types.keys() {
            ItemType::from_key(key)?;
        }
        let data_backend = resolve_backend(
            "data:backend",
            optional_table(root, "data:backend")?,
            shared_backend,
            data_backend_default(),
        )?;

        let target_types = collect_type_specs(root, "targets", &["backend"])?;
        if target_types.is_empty() {
            return Err(ConfigError::MissingKey {
                section: "targets".to_string(),
                key: TARGETS_TYPE_KEY.to_string(),
            });
        }
        let targets_backend = resolve_backend(
            "targets:backend",
            optional_table(root, "targets:backend")?,
            shared_backend,
            targets_backend_default(),
        )?;

        let fields = match optional_table(root, "metadata")? {
            Some(meta) => require_str_array(meta, "metadata", "fields")?,
            None => Vec::new(),
        };
        let metadata_backend = resolve_backend(
            "metadata:backend",
            optional_table(root, "metadata:backend")?,
            shared_backend,
            metadata_backend_default(),
        )?;

        Ok(DatasetAttributes {
            version,
            num_items,
            data: DataAttributes {
                packet_shape,
                types: data_types,
                backend: data_backend,
            },
            targets: TargetsAttributes {
                types: target_types,
                backend: targets_backend,
            },
            metadata: MetadataAttributes {
                fields,
                backend: metadata_backend,
            },
        })
    }

    fn create(&self, attributes: &DatasetAttributes) -> Result<toml::Table, ConfigError> {
        let mut root = toml::Table::new();

        let mut general = toml::Table::new();
        general.insert("version".to_string(), CONFIG_VERSION_V0.into());
        general.insert(
            "num_items".to_string(),
            (attributes.num_items as i64).into(),
        );
        root.insert("general".to_string(), general.into());

        let mut shape = toml::Table::new();
        let ps = attributes.data.packet_shape;
        shape.insert("frames".to_string(), (ps.frames as i64).into());
        shape.insert("rows".to_string(), (ps.rows as i64).into());
        shape.insert("cols".to_string(), (ps.cols as i64).into());
        root.insert("data:packet_shape".to_string(), shape.into());

        root.insert(
            "data:backend".to_string(),
            backend_table(&attributes.data.backend).into(),
        );
        for (key, spec) in &attributes.data.types {
            root.insert(format!("data:{key}"), type_spec_table(spec).into());
        }

        root.insert(
            "targets:backend".to_string(),
            backend_table(&attributes.targets.backend).into(),
        );
        for (key, spec) in &attributes.targets.types {
            root.insert(format!("targets:{key}"), type_spec_table(spec).into());
        }

        let mut metadata = toml::Table::new();
        metadata.insert(
            "fields".to_string(),
            toml::Value::Array(
                attributes
                    .metadata
                    .fields
                    .iter()
                    .map(|f| f.clone().into())
                    .collect(),
            ),
        );
        root.insert("metadata".to_string(), metadata.into());
        root.insert(
            "metadata:backend".to_string(),
            backend_table(&attributes.metadata.backend).into(),
        );

        Ok(root)
    }
}
