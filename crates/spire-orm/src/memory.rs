//! Persistent storage for computed data such as the normalized schema.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use tracing::debug;

use crate::error::{OrmError, Result};

/// Section based key/value store surviving between process lifetimes.
pub trait Memory: Send + Sync {
    /// Data saved under `section`, `None` when nothing was saved.
    ///
    /// # Errors
    ///
    /// [`OrmError::Memory`] when the store cannot be read.
    fn load_data(&self, section: &str) -> Result<Option<Value>>;

    /// Replaces the data of `section`.
    ///
    /// # Errors
    ///
    /// [`OrmError::Memory`] when the store cannot be written.
    fn save_data(&self, section: &str, data: &Value) -> Result<()>;
}

impl<M: Memory + ?Sized> Memory for std::sync::Arc<M> {
    fn load_data(&self, section: &str) -> Result<Option<Value>> {
        (**self).load_data(section)
    }

    fn save_data(&self, section: &str, data: &Value) -> Result<()> {
        (**self).save_data(section, data)
    }
}

/// One JSON file per section inside a directory.
#[derive(Debug, Clone)]
pub struct FileMemory {
    directory: PathBuf,
}

impl FileMemory {
    /// Stores sections under `directory`, created on first save.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Directory holding the section files.
    #[must_use]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// File backing `section`. Path separators in the name are flattened.
    #[must_use]
    pub fn path(&self, section: &str) -> PathBuf {
        let file = section.replace(['/', '\\'], "-");
        self.directory.join(format!("{file}.json"))
    }
}

impl Memory for FileMemory {
    fn load_data(&self, section: &str) -> Result<Option<Value>> {
        let path = self.path(section);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(OrmError::Memory(format!("{}: {e}", path.display()))),
        };
        let data = serde_json::from_str(&content)
            .map_err(|e| OrmError::Memory(format!("{}: {e}", path.display())))?;
        debug!(section = %section, path = %path.display(), "Loaded memory section");
        Ok(Some(data))
    }

    fn save_data(&self, section: &str, data: &Value) -> Result<()> {
        let path = self.path(section);
        let io = |e: std::io::Error| OrmError::Memory(format!("{}: {e}", path.display()));
        std::fs::create_dir_all(&self.directory).map_err(io)?;
        let content = serde_json::to_string_pretty(data)?;

        // Readers never see a partial file.
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, content).map_err(io)?;
        std::fs::rename(&temp_path, &path).map_err(io)?;
        debug!(section = %section, path = %path.display(), "Saved memory section");
        Ok(())
    }
}

/// In-process memory, lost when dropped.
#[derive(Debug, Default)]
pub struct RuntimeMemory {
    sections: Mutex<HashMap<String, Value>>,
}

impl RuntimeMemory {
    /// Creates an empty memory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Memory for RuntimeMemory {
    fn load_data(&self, section: &str) -> Result<Option<Value>> {
        let sections = self.sections.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(sections.get(section).cloned())
    }

    fn save_data(&self, section: &str, data: &Value) -> Result<()> {
        self.sections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(section.to_string(), data.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_memory_round_trips_sections() {
        let dir = tempfile::tempdir().unwrap();
        let memory = FileMemory::new(dir.path().join("cache"));
        assert!(memory.load_data("orm.schema").unwrap().is_none());

        memory.save_data("orm.schema", &json!({"a": [1, 2]})).unwrap();
        assert_eq!(
            memory.load_data("orm.schema").unwrap(),
            Some(json!({"a": [1, 2]}))
        );
        assert!(memory.path("orm.schema").ends_with("orm.schema.json"));
        assert!(!memory.path("orm.schema").with_extension("tmp").exists());
    }

    #[test]
    fn file_memory_flattens_separators() {
        let memory = FileMemory::new("/tmp/spire");
        assert_eq!(
            memory.path("a/b"),
            PathBuf::from("/tmp/spire").join("a-b.json")
        );
    }

    #[test]
    fn corrupt_file_is_a_memory_error() {
        let dir = tempfile::tempdir().unwrap();
        let memory = FileMemory::new(dir.path());
        std::fs::write(memory.path("broken"), "{not json").unwrap();
        assert!(matches!(
            memory.load_data("broken"),
            Err(OrmError::Memory(_))
        ));
    }

    #[test]
    fn runtime_memory_replaces_sections() {
        let memory = RuntimeMemory::new();
        memory.save_data("s", &json!(1)).unwrap();
        memory.save_data("s", &json!(2)).unwrap();
        assert_eq!(memory.load_data("s").unwrap(), Some(json!(2)));
        assert!(memory.load_data("other").unwrap().is_none());
    }
}
