//! Filesystem primitives shared by the cache and the ingestion pipeline.
//!
//! Nothing here checks for existence before acting: reads treat `NotFound`
//! as absence, writes go through a temp file that is renamed into place, and
//! unique names are claimed with `create_new`.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};
use tempfile::NamedTempFile;

const MAX_NAME_ATTEMPTS: i64 = 1000;

/// Read a whole file, or `None` when it does not exist.
pub async fn read_if_exists(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write `bytes` to `path` so readers only ever see the complete file.
///
/// The temp file lives in the destination directory so the final rename
/// never crosses filesystems. On any failure it is dropped and removed.
pub fn write_atomic_blocking(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory"))?;
    std::fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

pub async fn write_atomic(path: PathBuf, bytes: Vec<u8>) -> io::Result<()> {
    tokio::task::spawn_blocking(move || write_atomic_blocking(&path, &bytes))
        .await
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
}

pub async fn ensure_dir(path: &Path) -> io::Result<()> {
    tokio::fs::create_dir_all(path).await
}

/// Move a file, copying when a plain rename is not possible.
///
/// The copy is staged next to `to` and renamed over it, so `to` never holds
/// a partial file.
pub async fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    match tokio::fs::rename(from, to).await {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!(
                "Rename {} -> {} failed ({}), falling back to copy",
                from.display(),
                to.display(),
                rename_err
            );
            let (src, dest) = (from.to_path_buf(), to.to_path_buf());
            tokio::task::spawn_blocking(move || copy_atomic_blocking(&src, &dest))
                .await
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
            if let Err(e) = tokio::fs::remove_file(from).await {
                warn!("Failed to remove {} after copy: {}", from.display(), e);
            }
            Ok(())
        }
    }
}

pub fn copy_atomic_blocking(from: &Path, to: &Path) -> io::Result<()> {
    let parent = to
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no parent directory"))?;

    let mut source = std::fs::File::open(from)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    io::copy(&mut source, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(to).map_err(|e| e.error)?;
    Ok(())
}

/// Claim `{stamp}-{name}` inside `dir`, bumping the stamp until a name is free.
///
/// The claimed path exists as an empty file on return; callers overwrite it
/// by renaming the real content onto it.
pub async fn reserve_unique(dir: &Path, stamp: i64, name: &str) -> io::Result<(String, PathBuf)> {
    for offset in 0..MAX_NAME_ATTEMPTS {
        let file_name = format!("{}-{}", stamp + offset, name);
        let path = dir.join(&file_name);
        match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(_) => return Ok((file_name, path)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e),
        }
    }
    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        format!("no free file name for {}", name),
    ))
}
