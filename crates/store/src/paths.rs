//! Path resolution for all Parley data files.
//!
//! Resolved once at startup from: `--data-dir` flag > `PARLEY_DATA_DIR` env >
//! `~/.parley`, then passed to whatever needs it.

use std::io;
use std::path::{Path, PathBuf};

pub const DATA_DIR_ENV: &str = "PARLEY_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Priority: `explicit` arg > `PARLEY_DATA_DIR` env > `~/.parley`.
    pub fn resolve(explicit: Option<&Path>) -> io::Result<Self> {
        let root = if let Some(p) = explicit {
            p.to_path_buf()
        } else if let Ok(env_val) = std::env::var(DATA_DIR_ENV) {
            PathBuf::from(env_val)
        } else {
            dirs::home_dir()
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "HOME directory not found"))?
                .join(".parley")
        };
        Ok(Self { root })
    }

    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn db_path(&self) -> PathBuf {
        self.root.join("parley.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn providers_path(&self) -> PathBuf {
        self.root.join("providers.toml")
    }

    /// Create all required subdirectories under the data dir.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_wins() {
        let dir = DataDir::resolve(Some(Path::new("/tmp/parley-explicit"))).unwrap();
        assert_eq!(dir.root(), Path::new("/tmp/parley-explicit"));
        assert_eq!(dir.db_path(), PathBuf::from("/tmp/parley-explicit/parley.db"));
        assert_eq!(
            dir.providers_path(),
            PathBuf::from("/tmp/parley-explicit/providers.toml")
        );
    }

    #[test]
    fn ensure_dirs_creates_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = DataDir::at(tmp.path().join("nested"));
        dir.ensure_dirs().unwrap();
        assert!(dir.log_dir().is_dir());
    }
}
