//! Checkpoint file layout.
//!
//! Policies serialize themselves; this module only owns where those files
//! live. One file per run, named `agent_<run_id>.json` under a configurable
//! root directory.

use std::path::{Path, PathBuf};

use uuid::Uuid;

use crate::error::Result;

const CHECKPOINT_PREFIX: &str = "agent_";
const CHECKPOINT_EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct Checkpointer {
    root: PathBuf,
}

impl Checkpointer {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, run_id: Uuid) -> PathBuf {
        self.root
            .join(format!("{CHECKPOINT_PREFIX}{run_id}.{CHECKPOINT_EXTENSION}"))
    }

    pub fn ensure_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    pub fn exists(&self, run_id: Uuid) -> bool {
        self.path_for(run_id).is_file()
    }

    /// Delete a run's checkpoint; Ok(false) when none was on disk
    pub fn remove(&self, run_id: Uuid) -> Result<bool> {
        match std::fs::remove_file(self.path_for(run_id)) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Run ids with a checkpoint on disk. Files that do not follow the
    /// `agent_<uuid>.json` pattern are ignored.
    pub fn list(&self) -> Result<Vec<Uuid>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut ids = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CHECKPOINT_EXTENSION) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(raw_id) = stem.strip_prefix(CHECKPOINT_PREFIX) else {
                continue;
            };
            if let Ok(id) = Uuid::parse_str(raw_id) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}
