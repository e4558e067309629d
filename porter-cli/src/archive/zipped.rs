//! Zip file archives

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Write};
use std::path::Path;

use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::{ArchiveError, TabularUnit, UnitSink, UnitSource, unit_name_of};

/// Writes units into a new zip file
pub struct ZipSink {
    writer: Option<ZipWriter<File>>,
}

impl ZipSink {
    pub fn create(path: &Path) -> Result<Self, ArchiveError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            writer: Some(ZipWriter::new(file)),
        })
    }
}

impl UnitSink for ZipSink {
    fn write_unit(&mut self, unit: &TabularUnit) -> Result<(), ArchiveError> {
        let writer = self.writer.as_mut().ok_or(ArchiveError::Finished)?;
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        let bytes = unit.to_csv()?;
        writer.start_file(unit.file_name(), options)?;
        writer.write_all(&bytes)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ArchiveError> {
        if let Some(writer) = self.writer.take() {
            writer.finish()?;
        }
        Ok(())
    }
}

/// Reads units from an existing zip file
///
/// Units may sit at the root or inside a folder; the file name decides the
/// unit name.
pub struct ZipSource {
    archive: ZipArchive<BufReader<File>>,
    /// unit name -> entry path
    entries: BTreeMap<String, String>,
}

impl ZipSource {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path)?;
        let archive = ZipArchive::new(BufReader::new(file))?;

        let mut entries = BTreeMap::new();
        for entry in archive.file_names() {
            if let Some(name) = unit_name_of(entry) {
                if let Some(previous) = entries.insert(name.clone(), entry.to_string()) {
                    log::warn!(
                        "Archive contains '{}' twice ('{}' and '{}'); using the latter",
                        name,
                        previous,
                        entry
                    );
                }
            }
        }

        Ok(Self { archive, entries })
    }
}

impl UnitSource for ZipSource {
    fn read_unit(&mut self, name: &str) -> Result<Option<TabularUnit>, ArchiveError> {
        let Some(entry) = self.entries.get(name) else {
            return Ok(None);
        };
        match self.archive.by_name(entry) {
            Ok(file) => Ok(Some(TabularUnit::from_csv(name, file)?)),
            Err(ZipError::FileNotFound) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn unit_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_units_inside_folder_are_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested.zip");

        let mut writer = ZipWriter::new(File::create(&path).unwrap());
        writer
            .start_file("export/csv/tag.csv", SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"id,name\nt1,urgent\n").unwrap();
        writer.finish().unwrap();

        let mut source = ZipSource::open(&path).unwrap();
        let unit = source.read_unit("tag").unwrap().unwrap();
        assert_eq!(unit.rows, vec![vec!["t1".to_string(), "urgent".to_string()]]);
    }

    #[test]
    fn test_write_after_finish_fails() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = ZipSink::create(&dir.path().join("a.zip")).unwrap();
        sink.finish().unwrap();

        let unit = TabularUnit::new("tag", vec!["id".into()]);
        assert!(matches!(sink.write_unit(&unit), Err(ArchiveError::Finished)));
    }
}
