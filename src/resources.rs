//! Named binary resources: firmware images and correction files.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::error::{ScanError, ScanResult};

/// Source of firmware and correction data referenced by presets.
pub trait ResourceProvider {
    /// Bytes of the resource called `name`.
    fn resource(&self, name: &str) -> ScanResult<Vec<u8>>;
}

/// Resources held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryResources {
    entries: HashMap<String, Vec<u8>>,
}

impl MemoryResources {
    /// Empty resource set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the resource `name`.
    pub fn insert(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.entries.insert(name.into(), data.into());
    }

    /// Builder form of [`Self::insert`].
    pub fn with(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.insert(name, data);
        self
    }
}

impl ResourceProvider for MemoryResources {
    fn resource(&self, name: &str) -> ScanResult<Vec<u8>> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| ScanError::ResourceNotFound(name.to_string()))
    }
}

/// Resources stored as files below a directory, one file per name.
#[derive(Debug, Clone)]
pub struct DirectoryResources {
    root: PathBuf,
}

impl DirectoryResources {
    /// Serve files below `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ResourceProvider for DirectoryResources {
    fn resource(&self, name: &str) -> ScanResult<Vec<u8>> {
        let invalid = name.is_empty()
            || name.contains(['/', '\\'])
            || name == "."
            || name == "..";
        if invalid {
            return Err(ScanError::ResourceNotFound(name.to_string()));
        }
        let path = self.root.join(name);
        if !path.is_file() {
            return Err(ScanError::ResourceNotFound(name.to_string()));
        }
        Ok(std::fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_resources() {
        let resources = MemoryResources::new().with("fw", b"abc".to_vec());
        assert_eq!(resources.resource("fw").unwrap(), b"abc");
        assert!(matches!(
            resources.resource("missing"),
            Err(ScanError::ResourceNotFound(_))
        ));
    }

    #[test]
    fn test_directory_resources() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("correction.ct5"), b"table").unwrap();
        let resources = DirectoryResources::new(dir.path());
        assert_eq!(resources.resource("correction.ct5").unwrap(), b"table");
        assert!(resources.resource("../correction.ct5").is_err());
        assert!(resources.resource("other").is_err());
    }
}
