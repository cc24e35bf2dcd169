use std::fs::create_dir_all;
use std::path::Path;
use std::path::PathBuf;

use tracing::debug;
use tracing::error;

use crate::Result;
use crate::StorageError;

pub fn create_dir_if_not_exist(path: &Path) -> Result<()> {
    if !path.exists() {
        if let Err(e) = create_dir_all(path) {
            error!("Failed to create directory {:?}: {:?}", path, e);
            return Err(StorageError::PathError {
                path: path.to_path_buf(),
                source: e,
            }
            .into());
        }
        debug!("created directory: {:?}", path);
    }
    Ok(())
}

/// Writes `buf` to `path`, creating parent directories first.
pub fn write_file(
    path: &Path,
    buf: &[u8],
) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_if_not_exist(parent)?;
    }
    std::fs::write(path, buf).map_err(|e| {
        StorageError::PathError {
            path: path.to_path_buf(),
            source: e,
        }
        .into()
    })
}

pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).map_err(|e| {
        StorageError::PathError {
            path: path.to_path_buf(),
            source: e,
        }
        .into()
    })
}

/// Removes `path` and everything below it. A missing path is not an error.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::PathError {
            path: path.to_path_buf(),
            source: e,
        }
        .into()),
    }
}

/// Regular files directly under `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => {
            return Err(StorageError::PathError {
                path: dir.to_path_buf(),
                source: e,
            }
            .into())
        }
    };
    let mut files = Vec::new();
    for entry in read_dir {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
