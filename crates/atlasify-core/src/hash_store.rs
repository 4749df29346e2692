//! Persisted per-file content hashes; the only source of "did this input
//! change" truth between runs.
//!
//! Keys are `/`-separated paths relative to the pipeline's input directory
//! (`<atlas folder>/<sprite path>`), values are hex SHA-256 digests.

use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::error::Result;
use crate::fs_util::write_atomic;
use crate::model::OrderedMap;
use crate::natural::natural_cmp;

/// `path key -> hex content hash`.
pub type FileHashes = BTreeMap<String, String>;

/// Paths whose hash differs between two maps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashDiff {
    /// Absent from the old map, or present with a different hash.
    pub changed: BTreeSet<String>,
    /// Present in the old map but no longer on disk.
    pub removed: BTreeSet<String>,
}

impl HashDiff {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// Loads and saves the hash file at a fixed path.
#[derive(Debug, Clone)]
pub struct HashStore {
    path: PathBuf,
}

impl HashStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the persisted map. A missing or corrupt file yields an empty map.
    pub fn load(&self) -> FileHashes {
        let data = match fs::read_to_string(&self.path) {
            Ok(d) => d,
            Err(_) => {
                debug!(path = %self.path.display(), "no hash file; starting empty");
                return FileHashes::new();
            }
        };
        match serde_json::from_str::<FileHashes>(&data) {
            Ok(map) => map,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "corrupt hash file; starting empty");
                FileHashes::new()
            }
        }
    }

    /// Writes the map with keys in natural order.
    pub fn save(&self, map: &FileHashes) -> Result<()> {
        let text = to_hash_document(map)?;
        write_atomic(&self.path, text.as_bytes())?;
        debug!(path = %self.path.display(), entries = map.len(), "hash file saved");
        Ok(())
    }
}

/// Serializes `map` as a JSON object whose keys follow natural sort order.
pub fn to_hash_document(map: &FileHashes) -> Result<String> {
    let mut entries: Vec<(String, String)> =
        map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    entries.sort_by(|a, b| natural_cmp(&a.0, &b.0));
    let mut text = serde_json::to_string_pretty(&OrderedMap(entries))?;
    text.push('\n');
    Ok(text)
}

/// Compares a previous map against the current scan.
pub fn diff(old: &FileHashes, current: &FileHashes) -> HashDiff {
    let changed = current
        .iter()
        .filter(|(k, v)| old.get(*k) != Some(*v))
        .map(|(k, _)| k.clone())
        .collect();
    let removed = old
        .keys()
        .filter(|k| !current.contains_key(*k))
        .cloned()
        .collect();
    HashDiff { changed, removed }
}

fn under_prefix<'a>(map: &'a FileHashes, atlas: &str) -> impl Iterator<Item = (&'a String, &'a String)> {
    let start = format!("{atlas}/");
    map.range(start.clone()..)
        .take_while(move |(k, _)| k.starts_with(start.as_str()))
}

/// Restricts both maps to entries under `<atlas>/` and diffs them.
pub fn atlas_changes(working: &FileHashes, current: &FileHashes, atlas: &str) -> HashDiff {
    let old: FileHashes = under_prefix(working, atlas)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    let cur: FileHashes = under_prefix(current, atlas)
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    diff(&old, &cur)
}

/// Skip decision for one atlas x scale. `true` means no work is needed.
pub fn should_skip(changes: &HashDiff, force: bool, outputs_exist: bool) -> bool {
    !(force || !changes.is_empty() || !outputs_exist)
}

/// Records the current hashes of an atlas in the working map and clears
/// the entries of removed files.
pub fn apply_changes(working: &mut FileHashes, current: &FileHashes, changes: &HashDiff) {
    for key in &changes.changed {
        if let Some(hash) = current.get(key) {
            working.insert(key.clone(), hash.clone());
        }
    }
    for key in &changes.removed {
        working.remove(key);
    }
}

/// Hex SHA-256 of a byte slice.
pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Hex SHA-256 of a file's contents.
pub fn hash_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path)?;
    Ok(hash_bytes(&bytes))
}

/// Hashes every `root/<key>` and returns the resulting map.
pub fn hash_files(root: &Path, keys: &[String]) -> Result<FileHashes> {
    let hash_one = |key: &String| -> Result<(String, String)> {
        Ok((key.clone(), hash_file(&root.join(key))?))
    };
    #[cfg(feature = "parallel")]
    let pairs: Vec<(String, String)> = keys.par_iter().map(hash_one).collect::<Result<_>>()?;
    #[cfg(not(feature = "parallel"))]
    let pairs: Vec<(String, String)> = keys.iter().map(hash_one).collect::<Result<_>>()?;
    Ok(pairs.into_iter().collect())
}
