//! Data directory resolution.
//!
//! Resolved once at startup from: CLI `--data-dir` > `DONEBELL_DATA_DIR` env > `~/.donebell`.

use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    /// Priority: `explicit` arg > `DONEBELL_DATA_DIR` env > `~/.donebell`.
    pub fn resolve(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let root = if let Some(p) = explicit {
            p.to_path_buf()
        } else if let Ok(env_val) = std::env::var("DONEBELL_DATA_DIR") {
            PathBuf::from(env_val)
        } else {
            dirs::home_dir()
                .ok_or_else(|| anyhow::anyhow!("HOME directory not found"))?
                .join(".donebell")
        };
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn log_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn dedup_db_path(&self) -> PathBuf {
        self.root.join("dedup.db")
    }

    /// Create all required subdirectories under the data dir.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(&self.root)?;
        std::fs::create_dir_all(self.log_dir())?;
        Ok(())
    }
}
