//! One tabular unit: a CSV file with a header row

use std::io::Read;

use indexmap::IndexMap;

use super::ArchiveError;

/// File extension of every unit inside an archive
pub const UNIT_EXTENSION: &str = "csv";

/// Rows of one entity type or pivot, as text cells (empty cell = NULL)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabularUnit {
    /// Storage name of the entity or pivot
    pub name: String,
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl TabularUnit {
    pub fn new(name: impl Into<String>, header: Vec<String>) -> Self {
        Self {
            name: name.into(),
            header,
            rows: Vec::new(),
        }
    }

    /// `<name>.csv`
    pub fn file_name(&self) -> String {
        unit_file_name(&self.name)
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Index of a header column
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.header.iter().position(|h| h == column)
    }

    /// Rows keyed by header column, in header order
    pub fn records(&self) -> impl Iterator<Item = IndexMap<&str, &str>> {
        self.rows.iter().map(|row| {
            self.header
                .iter()
                .map(String::as_str)
                .zip(row.iter().map(String::as_str))
                .collect()
        })
    }

    /// Serialize as CSV
    pub fn to_csv(&self) -> Result<Vec<u8>, ArchiveError> {
        let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
        writer.write_record(&self.header)?;
        for row in &self.rows {
            writer.write_record(row)?;
        }
        writer
            .into_inner()
            .map_err(|e| ArchiveError::Io(e.into_error()))
    }

    /// Parse CSV content; every row must have as many cells as the header
    pub fn from_csv(name: impl Into<String>, reader: impl Read) -> Result<Self, ArchiveError> {
        let name = name.into();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let header: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
            .collect();
        if header.iter().any(|h| h.is_empty()) {
            return Err(ArchiveError::InvalidUnit {
                unit: name,
                message: "header contains an empty column name".to_string(),
            });
        }

        let mut unit = TabularUnit::new(name, header);
        for record in reader.records() {
            let record = record?;
            unit.push_row(record.iter().map(str::to_string).collect());
        }
        Ok(unit)
    }
}

/// File name of a unit inside an archive
pub fn unit_file_name(name: &str) -> String {
    format!("{}.{}", name, UNIT_EXTENSION)
}
