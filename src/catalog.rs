//! Whitelisted hint catalog.
//!
//! Reads the cairo-lang whitelist format into an ordered list of [`HintEntry`]
//! values with stable integer ids. The catalog is never mutated after load and
//! is shared read-only between fuzzing workers.

use rand::Rng;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Stable index of a hint in the catalog.
pub type HintId = usize;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("hint catalog not found at {0}")]
    Missing(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed whitelist {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("entry {position} of {path} has no hint lines")]
    EmptyEntry { path: PathBuf, position: usize },
    #[error("hint catalog at {0} contains no entries")]
    Empty(PathBuf),
}

#[derive(Deserialize)]
struct WhitelistFile {
    allowed_reference_expressions_for_hint: Vec<WhitelistEntry>,
}

#[derive(Deserialize)]
struct WhitelistEntry {
    hint_lines: Vec<String>,
}

/// One whitelisted hint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HintEntry {
    pub id: HintId,
    pub source_lines: Vec<String>,
}

impl HintEntry {
    pub fn new(id: HintId, source_lines: Vec<String>) -> Self {
        Self { id, source_lines }
    }
}

/// Read-only, ordered set of hints.
#[derive(Debug, Clone)]
pub struct HintCatalog {
    entries: Vec<HintEntry>,
}

impl HintCatalog {
    /// Builds a catalog from in-memory snippets, numbering them from 0.
    pub fn from_snippets<I, S>(snippets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let entries = snippets
            .into_iter()
            .enumerate()
            .map(|(id, snippet)| {
                HintEntry::new(id, snippet.as_ref().lines().map(str::to_owned).collect())
            })
            .collect();
        Self { entries }
    }

    /// Loads a whitelist file, or every `*.json` file of a directory in
    /// sorted file-name order.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Err(CatalogError::Missing(path.to_path_buf()));
        }

        let files = if path.is_dir() {
            let read_dir = fs::read_dir(path).map_err(|source| CatalogError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let mut files = Vec::new();
            for dir_entry in read_dir {
                let dir_entry = dir_entry.map_err(|source| CatalogError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                let file = dir_entry.path();
                if file.extension().is_some_and(|ext| ext == "json") {
                    files.push(file);
                }
            }
            files.sort();
            files
        } else {
            vec![path.to_path_buf()]
        };

        let mut entries = Vec::new();
        for file in &files {
            let raw = fs::read_to_string(file).map_err(|source| CatalogError::Io {
                path: file.clone(),
                source,
            })?;
            let parsed: WhitelistFile =
                serde_json::from_str(&raw).map_err(|source| CatalogError::Parse {
                    path: file.clone(),
                    source,
                })?;
            for (position, entry) in parsed
                .allowed_reference_expressions_for_hint
                .into_iter()
                .enumerate()
            {
                if entry.hint_lines.iter().all(|line| line.trim().is_empty()) {
                    return Err(CatalogError::EmptyEntry {
                        path: file.clone(),
                        position,
                    });
                }
                entries.push(HintEntry::new(entries.len(), entry.hint_lines));
            }
            debug!(file = %file.display(), total = entries.len(), "loaded whitelist");
        }

        if entries.is_empty() {
            return Err(CatalogError::Empty(path.to_path_buf()));
        }
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, id: HintId) -> Option<&HintEntry> {
        self.entries.get(id)
    }

    pub fn entries(&self) -> &[HintEntry] {
        &self.entries
    }

    /// Draws one entry uniformly at random.
    ///
    /// Returns `None` only for an empty catalog, which [`HintCatalog::load`]
    /// never produces.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&HintEntry> {
        if self.entries.is_empty() {
            return None;
        }
        let index = rng.gen_range(0..self.entries.len());
        self.entries.get(index)
    }
}
