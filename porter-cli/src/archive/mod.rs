//! Archive containers of tabular units
//!
//! An archive is either a zip file or a plain directory holding one
//! `<table>.csv` per entity type or pivot.

pub mod directory;
pub mod unit;
pub mod zipped;

use std::path::Path;

use thiserror::Error;

pub use directory::{DirectorySink, DirectorySource};
pub use unit::TabularUnit;
pub use zipped::{ZipSink, ZipSource};

/// Failure reading or writing an archive
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("unit '{unit}' is invalid: {message}")]
    InvalidUnit { unit: String, message: String },

    #[error("archive is already finished")]
    Finished,
}

/// Destination of exported units
pub trait UnitSink {
    fn write_unit(&mut self, unit: &TabularUnit) -> Result<(), ArchiveError>;

    /// Flush and close the container
    fn finish(&mut self) -> Result<(), ArchiveError>;
}

/// Origin of units to import
pub trait UnitSource {
    /// Read a unit by storage name; `None` when the archive has no such file
    fn read_unit(&mut self, name: &str) -> Result<Option<TabularUnit>, ArchiveError>;

    /// Storage names of every unit present
    fn unit_names(&self) -> Vec<String>;
}

/// Whether a path names a zip container rather than a directory
pub fn is_zip_path(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// Open an existing archive for reading
pub fn open_source(path: &Path) -> Result<Box<dyn UnitSource>, ArchiveError> {
    if path.is_dir() {
        Ok(Box::new(DirectorySource::open(path)?))
    } else {
        Ok(Box::new(ZipSource::open(path)?))
    }
}

/// Create a new archive for writing (`.zip` file or directory)
pub fn create_sink(path: &Path) -> Result<Box<dyn UnitSink>, ArchiveError> {
    if is_zip_path(path) {
        Ok(Box::new(ZipSink::create(path)?))
    } else {
        Ok(Box::new(DirectorySink::create(path)?))
    }
}

/// Unit name for an archive entry path, if it is a unit file
fn unit_name_of(entry: &str) -> Option<String> {
    let file = entry.rsplit(|c| c == '/' || c == '\\').next()?;
    let stem = file.strip_suffix(&format!(".{}", unit::UNIT_EXTENSION))?;
    (!stem.is_empty()).then(|| stem.to_string())
}
