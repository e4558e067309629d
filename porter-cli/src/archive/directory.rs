//! Plain directory archives

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use super::{ArchiveError, TabularUnit, UnitSink, UnitSource, unit_name_of};

/// Writes `<name>.csv` files into a directory
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn create(root: &Path) -> Result<Self, ArchiveError> {
        std::fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }
}

impl UnitSink for DirectorySink {
    fn write_unit(&mut self, unit: &TabularUnit) -> Result<(), ArchiveError> {
        std::fs::write(self.root.join(unit.file_name()), unit.to_csv()?)?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), ArchiveError> {
        Ok(())
    }
}

/// Reads `<name>.csv` files from a directory (not recursive)
pub struct DirectorySource {
    files: BTreeMap<String, PathBuf>,
}

impl DirectorySource {
    pub fn open(root: &Path) -> Result<Self, ArchiveError> {
        let mut files = BTreeMap::new();
        for entry in std::fs::read_dir(root)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()).and_then(unit_name_of)
            else {
                continue;
            };
            files.insert(name, path);
        }
        Ok(Self { files })
    }
}

impl UnitSource for DirectorySource {
    fn read_unit(&mut self, name: &str) -> Result<Option<TabularUnit>, ArchiveError> {
        match self.files.get(name) {
            Some(path) => Ok(Some(TabularUnit::from_csv(name, File::open(path)?)?)),
            None => Ok(None),
        }
    }

    fn unit_names(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }
}
