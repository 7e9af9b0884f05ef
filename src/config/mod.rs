//! # Versioned Configuration Codec
//!
//! Reads and writes the on-disk TOML configuration of a dataset and maps it
//! to the canonical [`DatasetAttributes`](crate::schema::DatasetAttributes)
//! structure. Two physical encodings exist for schema version 0:
//!
//! - the **legacy unversioned** layout (flat `general` / `packet_shape` /
//!   `item_types` sections, one shared dtype), detected by the absence of a
//!   `version` key under `general`, and
//! - the **versioned** layout (nested `"section:subsection"` tables such as
//!   `["data:backend"]`, per-type dtypes, per-section backends), detected by
//!   `general.version == "0"`.
//!
//! [`create_config`] always emits the versioned encoding. Loading a legacy
//! file and writing it back therefore changes the physical representation
//! while preserving the canonical attributes; callers that care about the
//! on-disk form must probe the encoding themselves first.

use crate::schema::{DatasetAttributes, SchemaError, CONFIG_VERSION_V0};

mod legacy;
mod v0;

pub use legacy::parse_legacy;
pub use v0::V0Codec;

pub(crate) use v0::{data_backend_default, metadata_backend_default, targets_backend_default};

/// Errors from configuration parsing and serialization.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The configuration has no `general` section.
    #[error("configuration has no [general] section")]
    MissingGeneral,

    /// A required key is absent.
    #[error("missing key '{key}' in section [{section}]")]
    MissingKey {
        /// Section (table) name.
        section: String,
        /// The absent key.
        key: String,
    },

    /// A key holds a value of the wrong TOML type.
    #[error("key '{key}' in section [{section}] must be {expected}")]
    WrongType {
        /// Section (table) name.
        section: String,
        /// The offending key.
        key: String,
        /// Human-readable expected type.
        expected: &'static str,
    },

    /// No codec is registered for the declared schema version.
    #[error("unsupported configuration version '{0}'")]
    UnsupportedVersion(String),

    /// Legacy per-section item counts disagree.
    #[error("inconsistent item counts: {counts:?}")]
    InconsistentCounts {
        /// The observed (key, count) pairs.
        counts: Vec<(String, usize)>,
    },

    /// The data section declares no item types.
    #[error("configuration declares no active item types")]
    NoItemTypes,

    /// Schema-level resolution failure (unknown item type or dtype).
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The raw text is not valid TOML.
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
}

/// Which physical encoding a configuration uses, resolved once by
/// [`probe_encoding`] before parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigEncoding {
    /// The flat unversioned layout.
    LegacyV0,
    /// The versioned layout with the declared version string.
    Versioned(String),
}

/// Inspect the `general` section and decide the encoding.
pub fn probe_encoding(root: &toml::Table) -> Result<ConfigEncoding, ConfigError> {
    let general = match root.get("general") {
        Some(toml::Value::Table(t)) => t,
        Some(_) => {
            return Err(ConfigError::WrongType {
                section: String::new(),
                key: "general".to_string(),
                expected: "a table",
            })
        }
        None => return Err(ConfigError::MissingGeneral),
    };
    match general.get("version") {
        None => Ok(ConfigEncoding::LegacyV0),
        Some(toml::Value::String(v)) => Ok(ConfigEncoding::Versioned(v.clone())),
        Some(_) => Err(ConfigError::WrongType {
            section: "general".to_string(),
            key: "version".to_string(),
            expected: "a string",
        }),
    }
}

/// Bidirectional mapping between one versioned encoding and the canonical
/// attributes. The legacy layout is not a codec; it has no `create` path.
pub trait ConfigCodec {
    /// Parse a whole configuration table.
    fn parse(&self, root: &toml::Table) -> Result<DatasetAttributes, ConfigError>;

    /// Serialize canonical attributes into a configuration table.
    fn create(&self, attributes: &DatasetAttributes) -> Result<toml::Table, ConfigError>;
}

/// Version-string to codec lookup.
pub struct CodecRegistry {
    codecs: std::collections::BTreeMap<String, Box<dyn ConfigCodec>>,
}

impl CodecRegistry {
    /// An empty registry.
    pub fn new() -> CodecRegistry {
        CodecRegistry {
            codecs: std::collections::BTreeMap::new(),
        }
    }

    /// A registry with every built-in codec registered.
    pub fn with_defaults() -> CodecRegistry {
        let mut registry = CodecRegistry::new();
        registry.register(CONFIG_VERSION_V0, Box::new(V0Codec));
        registry
    }

    /// Register a codec under a version string.
    pub fn register(&mut self, version: &str, codec: Box<dyn ConfigCodec>) {
        self.codecs.insert(version.to_string(), codec);
    }

    /// Resolve a version string, failing if no codec handles it.
    pub fn resolve(&self, version: &str) -> Result<&dyn ConfigCodec, ConfigError> {
        self.codecs
            .get(version)
            .map(|c| c.as_ref())
            .ok_or_else(|| ConfigError::UnsupportedVersion(version.to_string()))
    }
}

impl Default for CodecRegistry {
    fn default() -> CodecRegistry {
        CodecRegistry::with_defaults()
    }
}

/// Parse a configuration table, dispatching on the probed encoding.
pub fn parse_config(root: &toml::Table) -> Result<DatasetAttributes, ConfigError> {
    match probe_encoding(root)? {
        ConfigEncoding::LegacyV0 => parse_legacy(root),
        ConfigEncoding::Versioned(version) => {
            CodecRegistry::with_defaults().resolve(&version)?.parse(root)
        }
    }
}

/// Parse raw TOML text into canonical attributes.
pub fn parse_config_str(raw: &str) -> Result<DatasetAttributes, ConfigError> {
    let root: toml::Table = raw.parse()?;
    parse_config(&root)
}

/// Serialize canonical attributes; always emits the versioned encoding.
pub fn create_config(attributes: &DatasetAttributes) -> Result<toml::Table, ConfigError> {
    CodecRegistry::with_defaults()
        .resolve(CONFIG_VERSION_V0)?
        .create(attributes)
}

/// Serialize canonical attributes to TOML text.
pub fn create_config_str(attributes: &DatasetAttributes) -> Result<String, ConfigError> {
    Ok(create_config(attributes)?.to_string())
}

// --- shared table accessors used by both parse paths ---

pub(crate) fn require_table<'a>(
    root: &'a toml::Table,
    name: &str,
) -> Result<&'a toml::Table, ConfigError> {
    match root.get(name) {
        Some(toml::Value::Table(t)) => Ok(t),
        Some(_) => Err(ConfigError::WrongType {
            section: String::new(),
            key: name.to_string(),
            expected: "a table",
        }),
        None => Err(ConfigError::MissingKey {
            section: String::new(),
            key: name.to_string(),
        }),
    }
}

pub(crate) fn optional_table<'a>(
    root: &'a toml::Table,
    name: &str,
) -> Result<Option<&'a toml::Table>, ConfigError> {
    match root.get(name) {
        Some(toml::Value::Table(t)) => Ok(Some(t)),
        Some(_) => Err(ConfigError::WrongType {
            section: String::new(),
            key: name.to_string(),
            expected: "a table",
        }),
        None => Ok(None),
    }
}

pub(crate) fn require_str<'a>(
    table: &'a toml::Table,
    section: &str,
    key: &str,
) -> Result<&'a str, ConfigError> {
    match table.get(key) {
        Some(toml::Value::String(s)) => Ok(s),
        Some(_) => Err(ConfigError::WrongType {
            section: section.to_string(),
            key: key.to_string(),
            expected: "a string",
        }),
        None => Err(ConfigError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

pub(crate) fn optional_str<'a>(
    table: &'a toml::Table,
    section: &str,
    key: &str,
) -> Result<Option<&'a str>, ConfigError> {
    match table.get(key) {
        Some(toml::Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ConfigError::WrongType {
            section: section.to_string(),
            key: key.to_string(),
            expected: "a string",
        }),
        None => Ok(None),
    }
}

pub(crate) fn require_usize(
    table: &toml::Table,
    section: &str,
    key: &str,
) -> Result<usize, ConfigError> {
    optional_usize(table, section, key)?.ok_or_else(|| ConfigError::MissingKey {
        section: section.to_string(),
        key: key.to_string(),
    })
}

pub(crate) fn optional_usize(
    table: &toml::Table,
    section: &str,
    key: &str,
) -> Result<Option<usize>, ConfigError> {
    match table.get(key) {
        Some(toml::Value::Integer(i)) if *i >= 0 => Ok(Some(*i as usize)),
        Some(_) => Err(ConfigError::WrongType {
            section: section.to_string(),
            key: key.to_string(),
            expected: "a non-negative integer",
        }),
        None => Ok(None),
    }
}

pub(crate) fn require_bool(
    table: &toml::Table,
    section: &str,
    key: &str,
) -> Result<bool, ConfigError> {
    match table.get(key) {
        Some(toml::Value::Boolean(b)) => Ok(*b),
        Some(_) => Err(ConfigError::WrongType {
            section: section.to_string(),
            key: key.to_string(),
            expected: "a boolean",
        }),
        None => Err(ConfigError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

pub(crate) fn require_str_array(
    table: &toml::Table,
    section: &str,
    key: &str,
) -> Result<Vec<String>, ConfigError> {
    let wrong = || ConfigError::WrongType {
        section: section.to_string(),
        key: key.to_string(),
        expected: "an array of strings",
    };
    match table.get(key) {
        Some(toml::Value::Array(values)) => values
            .iter()
            .map(|v| match v {
                toml::Value::String(s) => Ok(s.clone()),
                _ => Err(wrong()),
            })
            .collect(),
        Some(_) => Err(wrong()),
        None => Err(ConfigError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

pub(crate) fn require_usize_array(
    table: &toml::Table,
    section: &str,
    key: &str,
) -> Result<Vec<usize>, ConfigError> {
    let wrong = || ConfigError::WrongType {
        section: section.to_string(),
        key: key.to_string(),
        expected: "an array of non-negative integers",
    };
    match table.get(key) {
        Some(toml::Value::Array(values)) => values
            .iter()
            .map(|v| match v {
                toml::Value::Integer(i) if *i >= 0 => Ok(*i as usize),
                _ => Err(wrong()),
            })
            .collect(),
        Some(_) => Err(wrong()),
        None => Err(ConfigError::MissingKey {
            section: section.to_string(),
            key: key.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::Dtype;
    use crate::schema::{
        BackendConfig, DataAttributes, MetadataAttributes, PacketShape, TargetsAttributes,
        TypeSpec, BACKEND_DELIMITED, BACKEND_DENSE, BACKEND_MAPPED, DEFAULT_DENSE_EXTENSION,
        DEFAULT_METADATA_EXTENSION, FORMAT_NAME_WITH_SUFFIX, FORMAT_NAME_WITH_TYPE_SUFFIX,
        TARGETS_TYPE_KEY,
    };
    use std::collections::BTreeMap;

    const LEGACY_FIXTURE: &str = r#"
        [general]
        num_data = 3
        num_targets = 3
        dtype = "uint8"
        metafields = ["source", "packet_id"]

        [packet_shape]
        frames = 20
        rows = 48
        cols = 48

        [item_types]
        raw = true
        yx = true
        gtux = false
        gtuy = false
    "#;

    fn sample_attributes() -> DatasetAttributes {
        let mut data_types = BTreeMap::new();
        data_types.insert(
            "raw".to_string(),
            TypeSpec {
                dtype: Dtype::U8,
                shape: vec![20, 48, 48],
            },
        );
        data_types.insert(
            "yx".to_string(),
            TypeSpec {
                dtype: Dtype::F32,
                shape: vec![48, 48],
            },
        );
        let mut target_types = BTreeMap::new();
        target_types.insert(
            TARGETS_TYPE_KEY.to_string(),
            TypeSpec {
                dtype: Dtype::U8,
                shape: vec![2],
            },
        );
        DatasetAttributes {
            version: CONFIG_VERSION_V0.to_string(),
            num_items: 3,
            data: DataAttributes {
                packet_shape: PacketShape {
                    frames: 20,
                    rows: 48,
                    cols: 48,
                },
                types: data_types,
                backend: BackendConfig::new(
                    BACKEND_MAPPED,
                    "raw",
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
                .with_suffix("targets"),
            },
            metadata: MetadataAttributes {
                fields: vec!["source".to_string()],
                backend: BackendConfig::new(
                    BACKEND_DELIMITED,
                    DEFAULT_METADATA_EXTENSION,
                    FORMAT_NAME_WITH_TYPE_SUFFIX,
                ),
            },
        }
    }

    #[test]
    fn probe_dispatches_on_version_key() {
        let legacy: toml::Table = "[general]\nnum_data = 1".parse().unwrap();
        assert_eq!(probe_encoding(&legacy).unwrap(), ConfigEncoding::LegacyV0);

        let versioned: toml::Table = "[general]\nversion = \"0\"".parse().unwrap();
        assert_eq!(
            probe_encoding(&versioned).unwrap(),
            ConfigEncoding::Versioned("0".to_string())
        );

        let no_general: toml::Table = "[data]".parse().unwrap();
        assert!(matches!(
            probe_encoding(&no_general),
            Err(ConfigError::MissingGeneral)
        ));
    }

    #[test]
    fn unregistered_version_fails() {
        let raw = "[general]\nversion = \"2\"";
        assert!(matches!(
            parse_config_str(raw),
            Err(ConfigError::UnsupportedVersion(v)) if v == "2"
        ));
    }

    #[test]
    fn legacy_fixture_parses_via_legacy_path() {
        let attrs = parse_config_str(LEGACY_FIXTURE).unwrap();
        assert_eq!(attrs.num_items, 3);
        assert_eq!(attrs.version, CONFIG_VERSION_V0);
        assert_eq!(
            attrs.data.types.keys().cloned().collect::<Vec<_>>(),
            vec!["raw", "yx"]
        );
        assert_eq!(attrs.data.types["raw"].shape, vec![20, 48, 48]);
        assert_eq!(attrs.data.types["yx"].dtype, Dtype::U8);
        assert_eq!(attrs.metadata.fields, vec!["source", "packet_id"]);
    }

    #[test]
    fn create_then_parse_round_trips() {
        let attrs = sample_attributes();
        let text = create_config_str(&attrs).unwrap();
        let reparsed = parse_config_str(&text).unwrap();
        assert_eq!(reparsed, attrs);
    }

    #[test]
    fn create_emits_the_versioned_encoding() {
        let table = create_config(&sample_attributes()).unwrap();
        assert_eq!(
            probe_encoding(&table).unwrap(),
            ConfigEncoding::Versioned(CONFIG_VERSION_V0.to_string())
        );
        assert!(table.contains_key("data:backend"));
    }

    #[test]
    fn legacy_round_trip_changes_encoding_but_not_semantics() {
        let attrs = parse_config_str(LEGACY_FIXTURE).unwrap();
        let text = create_config_str(&attrs).unwrap();
        let reparsed = parse_config_str(&text).unwrap();
        assert_eq!(reparsed, attrs);

        let table: toml::Table = text.parse().unwrap();
        assert!(matches!(
            probe_encoding(&table).unwrap(),
            ConfigEncoding::Versioned(_)
        ));
    }

    #[test]
    fn versioned_default_differs_from_legacy_for_metadata() {
        // The two encodings deliberately disagree on the default metadata
        // filename format; this pins the observed behavior.
        let legacy = parse_config_str(LEGACY_FIXTURE).unwrap();
        assert_eq!(
            legacy.metadata.backend.filename_format,
            FORMAT_NAME_WITH_SUFFIX
        );
        assert_eq!(legacy.metadata.backend.suffix.as_deref(), Some("meta"));

        let versioned_raw = r#"
            [general]
            version = "0"
            num_items = 0

            ["data:packet_shape"]
            frames = 20
            rows = 48
            cols = 48

            ["data:raw"]
            dtype = "uint8"
            shape = [20, 48, 48]

            ["targets:classes"]
            dtype = "uint8"
            shape = [2]

            [metadata]
            fields = []
        "#;
        let versioned = parse_config_str(versioned_raw).unwrap();
        assert_eq!(
            versioned.metadata.backend.filename_format,
            FORMAT_NAME_WITH_TYPE_SUFFIX
        );
        assert_eq!(versioned.metadata.backend.suffix, None);
    }

    #[test]
    fn general_backend_defaults_are_overridden_per_section() {
        let raw = r#"
            [general]
            version = "0"
            num_items = 1

            ["general:backend"]
            name = "mapped"
            filename_extension = "raw"

            ["data:packet_shape"]
            frames = 2
            rows = 2
            cols = 2

            ["data:raw"]
            dtype = "uint8"
            shape = [2, 2, 2]

            ["targets:backend"]
            name = "dense"

            ["targets:classes"]
            dtype = "uint8"
            shape = [2]

            [metadata]
            fields = []
        "#;
        let attrs = parse_config_str(raw).unwrap();
        // data inherits the shared backend wholesale
        assert_eq!(attrs.data.backend.name, BACKEND_MAPPED);
        assert_eq!(attrs.data.backend.filename_extension, "raw");
        // targets overrides the name but inherits the extension
        assert_eq!(attrs.targets.backend.name, BACKEND_DENSE);
        assert_eq!(attrs.targets.backend.filename_extension, "raw");
    }
}
