//! Memory module - durable agent state
//!
//! The agent keeps exactly two things across restarts: a free-form memory
//! text it rewrites at the end of every productive cycle, and a blacklist of
//! user/topic ids its forum tool refuses to act on. Both are read and written
//! as whole documents.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::Error;
use crate::Result;

/// Memory store trait - interface for persistent agent state
pub trait AgentStore: Send + Sync {
    /// Current memory text, empty when nothing was stored yet.
    fn load_memory(&self) -> Result<String>;

    /// Replace the memory text.
    fn save_memory(&self, content: &str) -> Result<()>;

    fn load_blacklist(&self) -> Result<BTreeSet<u64>>;

    fn save_blacklist(&self, ids: &BTreeSet<u64>) -> Result<()>;
}

/// File-based store: `memory.md` and `blacklist.txt` in a data directory.
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
        }
    }

    fn memory_path(&self) -> PathBuf {
        self.data_dir.join("memory.md")
    }

    fn blacklist_path(&self) -> PathBuf {
        self.data_dir.join("blacklist.txt")
    }

    fn write(&self, path: &Path, content: &str) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::write(path, content)
            .map_err(|e| Error::Memory(format!("Failed to write {:?}: {}", path, e)))
    }
}

impl AgentStore for FileStore {
    fn load_memory(&self) -> Result<String> {
        let path = self.memory_path();
        if path.exists() {
            std::fs::read_to_string(&path).map_err(Error::from)
        } else {
            Ok(String::new())
        }
    }

    fn save_memory(&self, content: &str) -> Result<()> {
        self.write(&self.memory_path(), content)
    }

    fn load_blacklist(&self) -> Result<BTreeSet<u64>> {
        let path = self.blacklist_path();
        if !path.exists() {
            return Ok(BTreeSet::new());
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(parse_blacklist(&content))
    }

    fn save_blacklist(&self, ids: &BTreeSet<u64>) -> Result<()> {
        let content = ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join("\n");
        self.write(&self.blacklist_path(), &content)
    }
}

/// One id per line; lines that are not integers are ignored.
fn parse_blacklist(content: &str) -> BTreeSet<u64> {
    content
        .lines()
        .filter_map(|line| line.trim().parse().ok())
        .collect()
}

/// In-memory store for testing
#[derive(Default)]
pub struct InMemoryStore {
    memory: std::sync::Mutex<String>,
    blacklist: std::sync::Mutex<BTreeSet<u64>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_memory(memory: &str) -> Self {
        Self {
            memory: std::sync::Mutex::new(memory.to_string()),
            ..Self::default()
        }
    }
}

impl AgentStore for InMemoryStore {
    fn load_memory(&self) -> Result<String> {
        Ok(self.memory.lock().map_err(|e| Error::Memory(e.to_string()))?.clone())
    }

    fn save_memory(&self, content: &str) -> Result<()> {
        *self.memory.lock().map_err(|e| Error::Memory(e.to_string()))? = content.to_string();
        Ok(())
    }

    fn load_blacklist(&self) -> Result<BTreeSet<u64>> {
        Ok(self.blacklist.lock().map_err(|e| Error::Memory(e.to_string()))?.clone())
    }

    fn save_blacklist(&self, ids: &BTreeSet<u64>) -> Result<()> {
        *self.blacklist.lock().map_err(|e| Error::Memory(e.to_string()))? = ids.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_store() {
        let store = InMemoryStore::with_memory("User likes coffee");
        assert!(store.load_memory().unwrap().contains("coffee"));

        store.save_memory("Replaced").unwrap();
        assert_eq!(store.load_memory().unwrap(), "Replaced");

        store.save_blacklist(&BTreeSet::from([3, 1])).unwrap();
        assert_eq!(store.load_blacklist().unwrap(), BTreeSet::from([1, 3]));
    }

    #[test]
    fn test_file_store_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(&dir.path().join("data"));
        assert_eq!(store.load_memory().unwrap(), "");
        assert!(store.load_blacklist().unwrap().is_empty());
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(&dir.path().join("data"));

        store.save_memory("# Memory\n\nAlice asked about Rust.").unwrap();
        store.save_memory("Only this").unwrap();
        assert_eq!(store.load_memory().unwrap(), "Only this");

        store.save_blacklist(&BTreeSet::from([42, 7])).unwrap();
        let raw = std::fs::read_to_string(dir.path().join("data").join("blacklist.txt")).unwrap();
        assert_eq!(raw, "7\n42");
        assert_eq!(store.load_blacklist().unwrap(), BTreeSet::from([7, 42]));
    }

    #[test]
    fn test_blacklist_ignores_junk_lines() {
        assert_eq!(parse_blacklist("12\n\nfoo\n 34 \n-1\n"), BTreeSet::from([12, 34]));
    }
}
