//! Persisted prompt answers, shared across runs of a repository.
//!
//! Prompt steps that declare a persistence scope/key have their answers
//! written to `.reports/answers.json`; later runs apply the stored value
//! instead of re-prompting (unless the run forces fresh collection).

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::warn;

const ANSWERS_FILE: &str = ".reports/answers.json";

#[derive(Debug, Default)]
pub struct PersistedAnswers {
    path: PathBuf,
    entries: serde_json::Map<String, Value>,
    dirty: bool,
}

impl PersistedAnswers {
    /// Load the repository's answer store; a missing or unreadable file is
    /// an empty store.
    pub fn load(repo_root: &Path) -> Self {
        let path = repo_root.join(ANSWERS_FILE);
        let entries = std::fs::read_to_string(&path)
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
            .unwrap_or_default();
        Self {
            path,
            entries,
            dirty: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.entries.insert(key.to_string(), value);
        self.dirty = true;
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write back if anything changed. Failures warn; persistence is an
    /// accelerator, not a correctness requirement.
    pub fn save(&mut self) {
        if !self.dirty {
            return;
        }
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&self.entries) {
            Ok(contents) => {
                if let Err(e) = std::fs::write(&self.path, contents) {
                    warn!(path = %self.path.display(), error = %e, "failed to save persisted answers");
                } else {
                    self.dirty = false;
                }
            }
            Err(e) => warn!(error = %e, "failed to serialise persisted answers"),
        }
    }
}
