//! Filesystem loader for definition documents.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Result, RuleError};

use super::document::{Definition, DefinitionEnvelope};

/// Outcome of loading a single definition file.
#[derive(Debug)]
pub struct LoadResult {
    /// Path to the file that was loaded.
    pub path: PathBuf,
    /// Status of the load attempt.
    pub status: LoadStatus,
}

/// Status of a single file load attempt.
#[derive(Debug)]
pub enum LoadStatus {
    Loaded { id: String },
    /// File was skipped (dotfile, non-YAML, etc.).
    Skipped { reason: String },
    /// Parse or validation error occurred.
    Failed { error: String },
}

/// Every definition found by a scan, plus a per-file report.
#[derive(Debug, Default)]
pub struct DefinitionSet {
    pub definitions: Vec<Definition>,
    pub results: Vec<LoadResult>,
}

impl DefinitionSet {
    pub fn failures(&self) -> impl Iterator<Item = &LoadResult> {
        self.results
            .iter()
            .filter(|r| matches!(r.status, LoadStatus::Failed { .. }))
    }
}

pub struct DefinitionLoader;

impl DefinitionLoader {
    /// Recursively scan `dir` for `*.yml` / `*.yaml` definitions.
    ///
    /// Dotfiles and non-YAML files are skipped. Parse errors and duplicate
    /// ids are reported per-file but do not abort the scan.
    pub fn load_dir(dir: &Path) -> Result<DefinitionSet> {
        let mut set = DefinitionSet::default();
        let mut seen = HashSet::new();
        Self::scan_dir_recursive(dir, &mut set, &mut seen)?;
        Ok(set)
    }

    fn scan_dir_recursive(dir: &Path, set: &mut DefinitionSet, seen: &mut HashSet<String>) -> Result<()> {
        let mut entries = fs::read_dir(dir)?
            .map(|e| e.map(|e| e.path()))
            .collect::<std::io::Result<Vec<_>>>()?;
        entries.sort();

        for path in entries {
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                if name.starts_with('.') {
                    if path.is_file() {
                        set.results.push(LoadResult {
                            path,
                            status: LoadStatus::Skipped {
                                reason: "dotfile".to_string(),
                            },
                        });
                    }
                    continue;
                }
            }

            if path.is_dir() {
                Self::scan_dir_recursive(&path, set, seen)?;
                continue;
            }

            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yml" || e == "yaml")
                .unwrap_or(false);
            if !is_yaml {
                set.results.push(LoadResult {
                    path,
                    status: LoadStatus::Skipped {
                        reason: "not a YAML file".to_string(),
                    },
                });
                continue;
            }

            let status = match Self::load_file(&path) {
                Ok(doc) if !seen.insert(doc.metadata().id.clone()) => {
                    warn!(path = %path.display(), id = %doc.metadata().id, "duplicate definition id");
                    LoadStatus::Failed {
                        error: format!("duplicate definition id '{}'", doc.metadata().id),
                    }
                }
                Ok(doc) => {
                    let id = doc.metadata().id.clone();
                    info!(id = %id, kind = %doc.kind(), path = %path.display(), "loaded definition");
                    set.definitions.push(doc);
                    LoadStatus::Loaded { id }
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to load definition file");
                    LoadStatus::Failed { error: e.to_string() }
                }
            };
            set.results.push(LoadResult { path, status });
        }

        Ok(())
    }

    /// Parse one file: envelope first, then the kind-specific spec.
    pub fn load_file(path: &Path) -> Result<Definition> {
        let contents = fs::read_to_string(path)?;
        Self::parse_str(&contents)
    }

    pub fn parse_str(contents: &str) -> Result<Definition> {
        let envelope: DefinitionEnvelope = serde_yaml::from_str(contents)?;

        if envelope.metadata.id.trim().is_empty() {
            return Err(RuleError::Validation(
                "definition metadata.id must not be empty".to_string(),
            ));
        }

        envelope.parse_full().map_err(|e| {
            RuleError::Validation(format!(
                "failed to parse definition '{}': {}",
                envelope.metadata.id, e
            ))
        })
    }
}
