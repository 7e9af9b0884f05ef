//! # Per-Item Metadata Files
//!
//! Tab-delimited text files holding one record per dataset item. The first
//! row is the header naming the metadata fields in column order; every
//! following row is one item's values. Fields a record does not carry are
//! written as empty strings, so ragged record maps always produce a
//! rectangular file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use log::debug;

/// One item's metadata: field name to value.
pub type MetaRecord = BTreeMap<String, String>;

/// Errors from metadata file reading and writing.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    /// The metadata file does not exist.
    #[error("metadata file not found: {0}")]
    Missing(PathBuf),

    /// Filesystem failure on the metadata file.
    #[error("metadata io error on {path}: {source}")]
    Io {
        /// The file involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed delimited content.
    #[error("malformed metadata in {path}: {source}")]
    Malformed {
        /// The file involved.
        path: PathBuf,
        /// Underlying parser error.
        #[source]
        source: csv::Error,
    },

    /// A record carries a field missing from the declared field list.
    #[error("record {index} carries undeclared field '{field}'")]
    UndeclaredField {
        /// Zero-based record index.
        index: usize,
        /// The offending field name.
        field: String,
    },
}

fn io_err(path: &Path, source: std::io::Error) -> MetadataError {
    if source.kind() == std::io::ErrorKind::NotFound {
        MetadataError::Missing(path.to_path_buf())
    } else {
        MetadataError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Write `records` to a tab-delimited file with `fields` as the header.
///
/// Every record may carry any subset of `fields`; a field outside the
/// declared list is an error rather than a silently dropped column.
pub fn save_records(
    path: &Path,
    fields: &[String],
    records: &[MetaRecord],
) -> Result<(), MetadataError> {
    for (index, record) in records.iter().enumerate() {
        if let Some(field) = record.keys().find(|k| !fields.contains(k)) {
            return Err(MetadataError::UndeclaredField {
                index,
                field: field.clone(),
            });
        }
    }

    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .map_err(|e| csv_err(path, e))?;
    writer
        .write_record(fields)
        .map_err(|e| csv_err(path, e))?;
    for record in records {
        let row: Vec<&str> = fields
            .iter()
            .map(|f| record.get(f).map(String::as_str).unwrap_or(""))
            .collect();
        writer.write_record(&row).map_err(|e| csv_err(path, e))?;
    }
    writer.flush().map_err(|e| io_err(path, e))?;
    debug!(
        "wrote {} metadata records ({} fields) to {}",
        records.len(),
        fields.len(),
        path.display()
    );
    Ok(())
}

/// Read a tab-delimited metadata file back into its field list and records.
///
/// Empty cells are omitted from the returned records, mirroring how
/// [`save_records`] fills absent fields.
pub fn load_records(path: &Path) -> Result<(Vec<String>, Vec<MetaRecord>), MetadataError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_path(path)
        .map_err(|e| csv_err(path, e))?;
    let fields: Vec<String> = reader
        .headers()
        .map_err(|e| csv_err(path, e))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| csv_err(path, e))?;
        let mut record = MetaRecord::new();
        for (field, value) in fields.iter().zip(row.iter()) {
            if !value.is_empty() {
                record.insert(field.clone(), value.to_string());
            }
        }
        records.push(record);
    }
    Ok((fields, records))
}

fn csv_err(path: &Path, source: csv::Error) -> MetadataError {
    if let csv::ErrorKind::Io(_) = source.kind() {
        match source.into_kind() {
            csv::ErrorKind::Io(io) => io_err(path, io),
            // into_kind matches the kind we just observed
            _ => unreachable!(),
        }
    } else {
        MetadataError::Malformed {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(pairs: &[(&str, &str)]) -> MetaRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn round_trip_preserves_fields_and_values() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ds_meta.tsv");
        let declared = fields(&["source", "packet_id"]);
        let records = vec![
            record(&[("source", "run7.pkd"), ("packet_id", "12")]),
            record(&[("source", "run7.pkd"), ("packet_id", "13")]),
        ];

        save_records(&path, &declared, &records).unwrap();
        let (loaded_fields, loaded) = load_records(&path).unwrap();
        assert_eq!(loaded_fields, declared);
        assert_eq!(loaded, records);
    }

    #[test]
    fn absent_fields_become_empty_cells_and_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ds_meta.tsv");
        let declared = fields(&["source", "flagged"]);
        let records = vec![
            record(&[("source", "a.raw")]),
            record(&[("source", "b.raw"), ("flagged", "yes")]),
        ];

        save_records(&path, &declared, &records).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("a.raw\t\n") || raw.contains("a.raw\t\r\n"));

        let (_, loaded) = load_records(&path).unwrap();
        assert!(!loaded[0].contains_key("flagged"));
        assert_eq!(loaded[1]["flagged"], "yes");
    }

    #[test]
    fn undeclared_field_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ds_meta.tsv");
        let declared = fields(&["source"]);
        let records = vec![record(&[("source", "a"), ("rogue", "x")])];
        assert!(matches!(
            save_records(&path, &declared, &records),
            Err(MetadataError::UndeclaredField { index: 0, .. })
        ));
    }

    #[test]
    fn empty_record_set_writes_header_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ds_meta.tsv");
        save_records(&path, &fields(&["source"]), &[]).unwrap();
        let (loaded_fields, loaded) = load_records(&path).unwrap();
        assert_eq!(loaded_fields, vec!["source"]);
        assert!(loaded.is_empty());
    }

    #[test]
    fn missing_file_is_distinct_from_parse_errors() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            load_records(&dir.path().join("absent.tsv")),
            Err(MetadataError::Missing(_))
        ));
    }
}
