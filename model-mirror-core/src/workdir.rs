//! Local working directories, one per repository in flight.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::contract::RemoteFile;

/// Present in a working directory while a download into it has not completed.
pub const DOWNLOAD_MARKER: &str = "download_in_progress_marker";

/// Suffix of files still being written by a download.
pub const PARTIAL_SUFFIX: &str = ".incomplete";

/// Removes its directory when dropped, whichever way the pipeline ended.
#[derive(Debug)]
pub struct WorkDir {
    path: PathBuf,
    armed: bool,
}

impl WorkDir {
    pub fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    /// Leaves the directory (if any) in place when the guard goes away.
    pub fn keep(mut self) {
        self.armed = false;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// An interrupted earlier download left its marker behind.
    pub fn is_partial(&self) -> bool {
        self.path.join(DOWNLOAD_MARKER).exists()
    }

    /// Files currently in the directory, excluding VCS metadata and download bookkeeping.
    pub fn files(&self) -> io::Result<Vec<RemoteFile>> {
        list_local_files(&self.path)
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if !self.armed || !self.path.exists() {
            return;
        }
        info!(path = %self.path.display(), "Cleaning up local working directory");
        match fs::remove_dir_all(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "Removed local working directory"),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to remove local working directory")
            }
        }
    }
}

/// Recursively lists files under `root` as `/`-separated relative paths with sizes.
pub fn list_local_files(root: &Path) -> io::Result<Vec<RemoteFile>> {
    fn visit(dir: &Path, root: &Path, out: &mut Vec<RemoteFile>) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if entry.file_name() == ".git" {
                    continue;
                }
                visit(&path, root, out)?;
            } else if file_type.is_file() {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if name == DOWNLOAD_MARKER || name.ends_with(PARTIAL_SUFFIX) {
                    continue;
                }
                let Ok(rel) = path.strip_prefix(root) else {
                    continue;
                };
                let rel = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push(RemoteFile {
                    path: rel,
                    size: entry.metadata()?.len(),
                });
            }
        }
        Ok(())
    }

    let mut files = Vec::new();
    visit(root, root, &mut files)?;
    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_nested_files_and_skips_bookkeeping() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("onnx")).unwrap();
        fs::create_dir_all(root.join(".git/objects")).unwrap();
        fs::write(root.join("config.json"), b"{}").unwrap();
        fs::write(root.join("onnx/model.onnx"), b"abc").unwrap();
        fs::write(root.join(".git/HEAD"), b"ref").unwrap();
        fs::write(root.join(DOWNLOAD_MARKER), b"").unwrap();
        fs::write(root.join("model.bin.incomplete"), b"xx").unwrap();

        let files = list_local_files(root).unwrap();
        let paths: Vec<(&str, u64)> = files.iter().map(|f| (f.path.as_str(), f.size)).collect();
        assert_eq!(paths, vec![("config.json", 2), ("onnx/model.onnx", 3)]);
    }

    #[test]
    fn drop_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("org/model");
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("weights.bin"), b"0").unwrap();
        {
            let work = WorkDir::new(path.clone());
            assert!(work.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn kept_directory_survives_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("org/model");
        fs::create_dir_all(&path).unwrap();

        WorkDir::new(path.clone()).keep();

        assert!(path.exists());
    }
}
