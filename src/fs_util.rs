use std::fs;
use std::path::Path;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};

use crate::error::FerryError;

pub fn modified_time(path: &Utf8Path) -> Result<SystemTime, FerryError> {
    fs::metadata(path.as_std_path())
        .and_then(|meta| meta.modified())
        .map_err(|err| FerryError::Filesystem(format!("stat {path}: {err}")))
}

pub fn file_size(path: &Utf8Path) -> Result<u64, FerryError> {
    fs::metadata(path.as_std_path())
        .map(|meta| meta.len())
        .map_err(|err| FerryError::Filesystem(format!("stat {path}: {err}")))
}

pub fn ensure_dir(path: &Utf8Path) -> Result<(), FerryError> {
    fs::create_dir_all(path.as_std_path())
        .map_err(|err| FerryError::Filesystem(format!("create {path}: {err}")))
}

pub fn utf8_path(path: &Path) -> Result<Utf8PathBuf, FerryError> {
    Utf8PathBuf::from_path_buf(path.to_path_buf())
        .map_err(|path| FerryError::Filesystem(format!("non-utf8 path: {}", path.display())))
}

/// Copy `source` to `dest` through a temporary file in the destination
/// directory so that `dest` never holds a partially written file.
pub fn copy_file_atomic(source: &Utf8Path, dest: &Utf8Path) -> Result<(), FerryError> {
    let parent = dest
        .parent()
        .ok_or_else(|| FerryError::Filesystem("invalid destination path".to_string()))?;
    ensure_dir(parent)?;
    let temp = tempfile::Builder::new()
        .prefix(".ferry-copy")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| FerryError::Filesystem(err.to_string()))?;
    fs::copy(source.as_std_path(), temp.path())
        .map_err(|err| FerryError::Filesystem(format!("copy {source}: {err}")))?;
    if dest.as_std_path().exists() {
        fs::remove_file(dest.as_std_path())
            .map_err(|err| FerryError::Filesystem(err.to_string()))?;
    }
    temp.persist(dest.as_std_path())
        .map_err(|err| FerryError::Filesystem(err.to_string()))?;
    Ok(())
}

pub fn dir_is_empty(path: &Utf8Path) -> Result<bool, FerryError> {
    let mut entries = fs::read_dir(path.as_std_path())
        .map_err(|err| FerryError::Filesystem(format!("list {path}: {err}")))?;
    Ok(entries.next().is_none())
}

/// Remove `dir` and then each parent up to (excluding) `stop_at`, for as long
/// as the directories are empty. Returns the directories that were removed.
pub fn remove_empty_dirs(dir: &Utf8Path, stop_at: &Utf8Path) -> Vec<Utf8PathBuf> {
    let mut removed = Vec::new();
    let mut current = Some(dir);
    while let Some(path) = current {
        if path == stop_at || !path.starts_with(stop_at) {
            break;
        }
        if !matches!(dir_is_empty(path), Ok(true)) {
            break;
        }
        if fs::remove_dir(path.as_std_path()).is_err() {
            break;
        }
        removed.push(path.to_path_buf());
        current = path.parent();
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_copy_replaces_existing() {
        let temp = tempfile::tempdir().unwrap();
        let root = utf8_path(temp.path()).unwrap();
        let source = root.join("source.txt");
        let dest = root.join("nested/dest.txt");
        fs::write(source.as_std_path(), b"new").unwrap();
        fs::create_dir_all(root.join("nested").as_std_path()).unwrap();
        fs::write(dest.as_std_path(), b"old").unwrap();

        copy_file_atomic(&source, &dest).unwrap();
        assert_eq!(fs::read(dest.as_std_path()).unwrap(), b"new");
        assert_eq!(fs::read_dir(root.join("nested").as_std_path()).unwrap().count(), 1);
    }

    #[test]
    fn remove_empty_dirs_stops_at_content() {
        let temp = tempfile::tempdir().unwrap();
        let root = utf8_path(temp.path()).unwrap();
        fs::create_dir_all(root.join("a/b/c").as_std_path()).unwrap();
        fs::write(root.join("a/keep.txt").as_std_path(), b"x").unwrap();

        let removed = remove_empty_dirs(&root.join("a/b/c"), &root);
        assert_eq!(removed, vec![root.join("a/b/c"), root.join("a/b")]);
        assert!(root.join("a").as_std_path().exists());
    }
}
