//! File-backed journal store.

use super::LogStore;
use crate::error::{OutboxError, OutboxResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A journal store in a single file.
///
/// The file is locked exclusively for the lifetime of the store, so two
/// sessions never interleave records in the same journal. Opening a
/// journal another process holds fails with [`OutboxError::JournalLocked`].
///
/// # Example
///
/// ```no_run
/// use sitedesk_outbox::{FileLogStore, LogStore};
/// use std::path::Path;
///
/// let mut store = FileLogStore::open(Path::new("outbox.journal")).unwrap();
/// store.append(b"record").unwrap();
/// store.sync().unwrap();
/// ```
#[derive(Debug)]
pub struct FileLogStore {
    path: PathBuf,
    file: File,
    size: u64,
}

impl FileLogStore {
    /// Opens or creates the journal file at `path`, creating parent directories.
    pub fn open(path: &Path) -> OutboxResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive()
            .map_err(|_| OutboxError::JournalLocked)?;

        let size = file.metadata()?.len();
        tracing::debug!(path = %path.display(), size, "opened journal file");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            size,
        })
    }

    /// Returns the path of the journal file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".compact");
        self.path.with_file_name(name)
    }

    /// Appends `data` at the logical end using `write`.
    ///
    /// If `write` fails part way, the file is cut back to its previous
    /// length so the next append does not land behind a partial frame.
    fn append_with(
        &mut self,
        data: &[u8],
        write: impl FnOnce(&mut File, &[u8]) -> std::io::Result<()>,
    ) -> OutboxResult<u64> {
        let offset = self.size;
        if data.is_empty() {
            return Ok(offset);
        }

        self.file.seek(SeekFrom::Start(offset))?;
        if let Err(e) = write(&mut self.file, data) {
            if let Err(rollback) = self.file.set_len(offset) {
                tracing::error!(
                    path = %self.path.display(),
                    error = %rollback,
                    "failed to cut partial append from journal"
                );
            }
            return Err(e.into());
        }
        self.size += data.len() as u64;
        Ok(offset)
    }
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> OutboxResult<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> OutboxResult<()> {
    Ok(())
}

impl LogStore for FileLogStore {
    fn read_at(&self, offset: u64, len: usize) -> OutboxResult<Vec<u8>> {
        let end = offset.saturating_add(len as u64);
        if end > self.size {
            return Err(OutboxError::ReadPastEnd {
                offset,
                len,
                size: self.size,
            });
        }
        if len == 0 {
            return Ok(Vec::new());
        }

        let mut file = &self.file;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> OutboxResult<u64> {
        self.append_with(data, |file, data| file.write_all(data))
    }

    fn sync(&mut self) -> OutboxResult<()> {
        self.file.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> OutboxResult<u64> {
        Ok(self.size)
    }

    fn truncate(&mut self, new_size: u64) -> OutboxResult<()> {
        if new_size > self.size {
            return Err(OutboxError::InvalidConfig(format!(
                "cannot truncate journal to {new_size} bytes, current size is {}",
                self.size
            )));
        }

        self.file.set_len(new_size)?;
        self.file.sync_all()?;
        self.size = new_size;
        Ok(())
    }

    fn replace(&mut self, image: &[u8]) -> OutboxResult<()> {
        let temp_path = self.temp_path();

        let mut temp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        temp.try_lock_exclusive()
            .map_err(|_| OutboxError::JournalLocked)?;
        let written = temp
            .write_all(image)
            .and_then(|()| temp.sync_all())
            .and_then(|()| std::fs::rename(&temp_path, &self.path));
        if let Err(e) = written {
            let _ = FileExt::unlock(&temp);
            let _ = std::fs::remove_file(&temp_path);
            return Err(e.into());
        }

        // The renamed file is the journal now; the old handle only unlocks.
        let old = std::mem::replace(&mut self.file, temp);
        let _ = FileExt::unlock(&old);
        self.size = image.len() as u64;
        sync_parent_dir(&self.path)
    }
}

impl Drop for FileLogStore {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_file_and_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("outbox.journal");

        let store = FileLogStore::open(&path).unwrap();
        assert_eq!(store.size().unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn append_and_read_back() {
        let dir = tempdir().unwrap();
        let mut store = FileLogStore::open(&dir.path().join("j")).unwrap();

        assert_eq!(store.append(b"hello").unwrap(), 0);
        assert_eq!(store.append(b" world").unwrap(), 5);
        assert_eq!(store.size().unwrap(), 11);
        assert_eq!(store.read_at(0, 11).unwrap(), b"hello world");
        assert_eq!(store.read_at(6, 5).unwrap(), b"world");
    }

    #[test]
    fn read_past_end_is_an_error() {
        let dir = tempdir().unwrap();
        let mut store = FileLogStore::open(&dir.path().join("j")).unwrap();
        store.append(b"abc").unwrap();

        assert!(matches!(
            store.read_at(2, 5),
            Err(OutboxError::ReadPastEnd { size: 3, .. })
        ));
    }

    #[test]
    fn contents_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j");
        {
            let mut store = FileLogStore::open(&path).unwrap();
            store.append(b"durable").unwrap();
            store.sync().unwrap();
        }

        let store = FileLogStore::open(&path).unwrap();
        assert_eq!(store.size().unwrap(), 7);
        assert_eq!(store.read_at(0, 7).unwrap(), b"durable");
    }

    #[test]
    fn truncate_shrinks_only() {
        let dir = tempdir().unwrap();
        let mut store = FileLogStore::open(&dir.path().join("j")).unwrap();
        store.append(b"0123456789").unwrap();

        store.truncate(4).unwrap();
        assert_eq!(store.size().unwrap(), 4);
        assert_eq!(store.append(b"x").unwrap(), 4);
        assert!(store.truncate(100).is_err());
    }

    #[test]
    fn failed_append_leaves_no_partial_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j");
        let mut store = FileLogStore::open(&path).unwrap();
        store.append(b"first").unwrap();

        let err = store.append_with(b"second", |file, data| {
            file.write_all(&data[..3])?;
            Err(std::io::Error::new(std::io::ErrorKind::Other, "disk full"))
        });
        assert!(matches!(err, Err(OutboxError::Io(_))));
        assert_eq!(store.size().unwrap(), 5);

        assert_eq!(store.append(b"third").unwrap(), 5);
        store.sync().unwrap();
        drop(store);

        assert_eq!(std::fs::read(&path).unwrap(), b"firstthird");
    }

    #[test]
    fn replace_swaps_contents_and_keeps_lock() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j");
        let mut store = FileLogStore::open(&path).unwrap();
        store.append(b"old contents").unwrap();

        store.replace(b"new").unwrap();
        assert_eq!(store.size().unwrap(), 3);
        assert_eq!(store.read_at(0, 3).unwrap(), b"new");
        assert!(!store.temp_path().exists());
        assert!(matches!(
            FileLogStore::open(&path),
            Err(OutboxError::JournalLocked)
        ));

        assert_eq!(store.append(b"!").unwrap(), 3);
        drop(store);
        assert_eq!(std::fs::read(&path).unwrap(), b"new!");
    }

    #[test]
    fn failed_replace_keeps_old_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j");
        let mut store = FileLogStore::open(&path).unwrap();
        store.append(b"keep me").unwrap();

        // A directory in the way makes the temp file impossible to create.
        std::fs::create_dir(store.temp_path()).unwrap();
        assert!(store.replace(b"lost").is_err());

        assert_eq!(store.read_at(0, 7).unwrap(), b"keep me");
        assert_eq!(store.append(b"!").unwrap(), 7);
        drop(store);
        assert_eq!(std::fs::read(&path).unwrap(), b"keep me!");
    }

    #[test]
    fn second_open_is_locked_out() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("j");
        let _held = FileLogStore::open(&path).unwrap();

        assert!(matches!(
            FileLogStore::open(&path),
            Err(OutboxError::JournalLocked)
        ));
    }
}
