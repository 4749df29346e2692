use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Contents written next to their destination but not yet visible there.
///
/// [`StagedFile::commit`] renames the temp file into place; dropping an
/// uncommitted file removes it.
#[derive(Debug)]
pub(crate) struct StagedFile {
    tmp: PathBuf,
    dest: PathBuf,
    committed: bool,
}

impl StagedFile {
    pub(crate) fn write(dest: &Path, bytes: &[u8]) -> Result<Self> {
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let staged = Self {
            tmp: temp_sibling(dest),
            dest: dest.to_path_buf(),
            committed: false,
        };
        fs::write(&staged.tmp, bytes)?;
        Ok(staged)
    }

    pub(crate) fn commit(mut self) -> Result<()> {
        fs::rename(&self.tmp, &self.dest)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

/// Writes `bytes` to a sibling temp file, then renames it over `path`.
///
/// Readers observe either the old file or the complete new one.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    StagedFile::write(path, bytes)?.commit()
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", std::process::id()))
}

/// Converts a relative path to a `/`-separated key.
pub(crate) fn path_key(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
