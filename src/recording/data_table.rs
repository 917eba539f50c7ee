//! Column sinks for recorded data.
//!
//! Recording sessions export channels into anything implementing
//! [`DataTable`]. [`MemoryDataTable`] keeps the columns in memory and
//! serialises them as JSON; with the `storage_csv` feature, [`CsvExporter`]
//! writes them to a CSV file with the column descriptions as a commented
//! JSON header.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanResult};

/// Typed values of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "values", rename_all = "snake_case")]
pub enum ColumnValues {
    /// 32-bit integer samples.
    Int32(Vec<i32>),
    /// Scaled or transformed samples.
    Double(Vec<f64>),
}

impl ColumnValues {
    /// Number of rows.
    pub fn len(&self) -> usize {
        match self {
            ColumnValues::Int32(values) => values.len(),
            ColumnValues::Double(values) => values.len(),
        }
    }

    /// Whether the column has no rows.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, row: usize) -> Option<String> {
        match self {
            ColumnValues::Int32(values) => values.get(row).map(i32::to_string),
            ColumnValues::Double(values) => values.get(row).map(f64::to_string),
        }
    }
}

/// One named column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataColumn {
    /// Unique column key
    pub identifier: String,
    /// Free text shown in exports
    pub description: String,
    /// Column data
    pub values: ColumnValues,
}

/// Destination of exported channel data.
pub trait DataTable {
    /// Add a column of raw integer records.
    fn add_int32_column(&mut self, identifier: &str, description: &str, values: Vec<i32>) -> ScanResult<()>;

    /// Add a column of converted values.
    fn add_double_column(&mut self, identifier: &str, description: &str, values: Vec<f64>) -> ScanResult<()>;

    /// Whether a column with this identifier exists.
    fn has_column(&self, identifier: &str) -> bool;
}

/// In-memory table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryDataTable {
    created_at: DateTime<Utc>,
    columns: Vec<DataColumn>,
}

impl Default for MemoryDataTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDataTable {
    /// Empty table stamped with the current time.
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            columns: Vec::new(),
        }
    }

    /// When the table was created.
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Columns in insertion order.
    pub fn columns(&self) -> &[DataColumn] {
        &self.columns
    }

    /// Column with `identifier`, if present.
    pub fn column(&self, identifier: &str) -> Option<&DataColumn> {
        self.columns.iter().find(|column| column.identifier == identifier)
    }

    /// Length of the longest column.
    pub fn row_count(&self) -> usize {
        self.columns
            .iter()
            .map(|column| column.values.len())
            .max()
            .unwrap_or(0)
    }

    /// Pretty-printed JSON of the whole table.
    pub fn to_json(&self) -> ScanResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the JSON form to `path`.
    pub fn write_json(&self, path: &Path) -> ScanResult<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Read a table written by [`MemoryDataTable::write_json`].
    pub fn read_json(path: &Path) -> ScanResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn push(&mut self, identifier: &str, description: &str, values: ColumnValues) -> ScanResult<()> {
        if self.has_column(identifier) {
            return Err(ScanError::DuplicateColumn(identifier.to_string()));
        }
        self.columns.push(DataColumn {
            identifier: identifier.to_string(),
            description: description.to_string(),
            values,
        });
        Ok(())
    }

    /// Cells of one row; shorter columns yield empty cells.
    fn row(&self, row: usize) -> Vec<String> {
        self.columns
            .iter()
            .map(|column| column.values.cell(row).unwrap_or_default())
            .collect()
    }
}

impl DataTable for MemoryDataTable {
    fn add_int32_column(&mut self, identifier: &str, description: &str, values: Vec<i32>) -> ScanResult<()> {
        self.push(identifier, description, ColumnValues::Int32(values))
    }

    fn add_double_column(&mut self, identifier: &str, description: &str, values: Vec<f64>) -> ScanResult<()> {
        self.push(identifier, description, ColumnValues::Double(values))
    }

    fn has_column(&self, identifier: &str) -> bool {
        self.column(identifier).is_some()
    }
}

// ============================================================================
// CSV export
// ============================================================================

#[cfg(feature = "storage_csv")]
mod csv_enabled {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    use tracing::info;

    #[derive(Serialize)]
    struct CsvHeader<'a> {
        created_at: String,
        columns: Vec<(&'a str, &'a str)>,
    }

    /// Writes a [`MemoryDataTable`] as CSV.
    #[derive(Debug, Default)]
    pub struct CsvExporter;

    impl CsvExporter {
        /// CSV exporter.
        pub fn new() -> Self {
            Self
        }

        /// Write `table` to `path`, one row per record index.
        pub fn write(&self, table: &MemoryDataTable, path: &Path) -> ScanResult<()> {
            let mut file = File::create(path)?;

            let header = CsvHeader {
                created_at: table.created_at().to_rfc3339(),
                columns: table
                    .columns()
                    .iter()
                    .map(|column| (column.identifier.as_str(), column.description.as_str()))
                    .collect(),
            };
            let json = serde_json::to_string_pretty(&header)?;
            for line in json.lines() {
                file.write_all(b"# ")?;
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")?;
            }

            let mut writer = csv::Writer::from_writer(file);
            writer.write_record(table.columns().iter().map(|column| column.identifier.as_str()))?;
            for row in 0..table.row_count() {
                writer.write_record(table.row(row))?;
            }
            writer.flush()?;
            info!(path = %path.display(), rows = table.row_count(), "CSV export written");
            Ok(())
        }
    }
}

#[cfg(not(feature = "storage_csv"))]
mod csv_disabled {
    use super::*;

    /// CSV export is not compiled in.
    #[derive(Debug, Default)]
    pub struct CsvExporter;

    impl CsvExporter {
        /// Exporter stub.
        pub fn new() -> Self {
            Self
        }

        /// Always fails with [`ScanError::NotSupported`].
        pub fn write(&self, _table: &MemoryDataTable, _path: &Path) -> ScanResult<()> {
            Err(ScanError::NotSupported("storage_csv"))
        }
    }
}

#[cfg(feature = "storage_csv")]
pub use csv_enabled::CsvExporter;

#[cfg(not(feature = "storage_csv"))]
pub use csv_disabled::CsvExporter;

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> MemoryDataTable {
        let mut table = MemoryDataTable::new();
        table.add_int32_column("raw", "raw values", vec![1, 2, 3]).unwrap();
        table.add_double_column("mm", "millimeters", vec![0.5]).unwrap();
        table
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let mut table = table();
        assert!(matches!(
            table.add_int32_column("raw", "", vec![]),
            Err(ScanError::DuplicateColumn(_))
        ));
        assert_eq!(table.row_count(), 3);
    }

    #[test]
    fn test_json_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.json");
        let table = table();
        table.write_json(&path).unwrap();
        let loaded = MemoryDataTable::read_json(&path).unwrap();
        assert_eq!(loaded.columns(), table.columns());
        assert!(table.to_json().unwrap().contains("\"type\": \"int32\""));
    }

    #[cfg(feature = "storage_csv")]
    #[test]
    fn test_csv_pads_short_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("table.csv");
        CsvExporter::new().write(&table(), &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let data: Vec<&str> = text.lines().filter(|line| !line.starts_with('#')).collect();
        assert_eq!(data, vec!["raw,mm", "1,0.5", "2,", "3,"]);
    }
}
