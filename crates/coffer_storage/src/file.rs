//! Raw block I/O over a single host file.

use crate::error::{StorageError, StorageResult};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Size of one physical block on disk.
pub const RAW_BLOCK_SIZE: usize = 4096;

/// Upper bound on any requested file size (1 PiB).
pub(crate) const MAX_FILE_SIZE: u64 = 1024 * 1024 * 1024 * 1024 * 1024;

/// A host file addressed in whole physical blocks.
///
/// Opens (or creates) one file for read/write access and exposes exact-size
/// block reads and writes, durable sync, best-effort preallocation,
/// truncation, and delete-on-close. The file is not internally
/// synchronized: the encrypted view is its only user, under the map's
/// guard, so a seek/read or seek/write pair is never interleaved.
#[derive(Debug)]
pub struct BlockFile {
    file: Option<File>,
    path: PathBuf,
    remove_on_drop: bool,
}

impl BlockFile {
    /// Opens or creates the file at `path` with read/write access.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            remove_on_drop: false,
        })
    }

    /// Returns the path this file was opened with.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current file length in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    pub fn len(&self) -> StorageResult<u64> {
        Ok(self.handle()?.metadata()?.len())
    }

    /// True when the file is empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata cannot be read.
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Reads one physical block at `index` into `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error on seek failure, short read, or I/O failure.
    pub fn read_block(&mut self, index: u64, buf: &mut [u8; RAW_BLOCK_SIZE]) -> StorageResult<()> {
        let file = self.handle_mut()?;
        file.seek(SeekFrom::Start(index * RAW_BLOCK_SIZE as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    /// Writes one physical block at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error on seek or write failure.
    pub fn write_block(&mut self, index: u64, buf: &[u8; RAW_BLOCK_SIZE]) -> StorageResult<()> {
        let file = self.handle_mut()?;
        file.seek(SeekFrom::Start(index * RAW_BLOCK_SIZE as u64))?;
        file.write_all(buf)?;
        Ok(())
    }

    /// Pushes all written data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.handle()?.sync_all()?;
        Ok(())
    }

    /// Best-effort preallocation up to `bytes`. A no-op when the file is
    /// already large enough.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TooLarge`] past the 1 PiB limit, or the
    /// underlying I/O error.
    pub fn allocate(&mut self, bytes: u64) -> StorageResult<()> {
        if bytes > MAX_FILE_SIZE {
            return Err(StorageError::TooLarge { requested: bytes });
        }
        self.handle()?.allocate(bytes)?;
        Ok(())
    }

    /// Truncates (or extends with zeros) the file to `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::TooLarge`] past the 1 PiB limit, or the
    /// underlying I/O error.
    pub fn truncate(&mut self, bytes: u64) -> StorageResult<()> {
        if bytes > MAX_FILE_SIZE {
            return Err(StorageError::TooLarge { requested: bytes });
        }
        self.handle()?.set_len(bytes)?;
        Ok(())
    }

    /// Marks the file for removal.
    ///
    /// On Unix the path is unlinked immediately (the open handle keeps the
    /// data reachable until close). Elsewhere the removal happens after the
    /// handle is closed on drop. Returns whether the request was accepted.
    pub fn set_delete(&mut self) -> bool {
        #[cfg(unix)]
        {
            std::fs::remove_file(&self.path).is_ok()
        }
        #[cfg(not(unix))]
        {
            self.remove_on_drop = true;
            true
        }
    }

    fn handle(&self) -> StorageResult<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| StorageError::Io(io::Error::other("file closed")))
    }

    fn handle_mut(&mut self) -> StorageResult<&mut File> {
        self.file
            .as_mut()
            .ok_or_else(|| StorageError::Io(io::Error::other("file closed")))
    }
}

impl Drop for BlockFile {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            drop(file);
            if self.remove_on_drop {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }
}

/// Lists the names of either the files or the directories directly under
/// `path`. `.` and `..` are never returned.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn find_all(path: &Path, directories: bool) -> StorageResult<Vec<String>> {
    let mut result = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() == directories {
            result.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");

        {
            let mut file = BlockFile::open(&path).unwrap();
            assert_eq!(file.len().unwrap(), 0);
            file.write_block(0, &[0xAB; RAW_BLOCK_SIZE]).unwrap();
            file.sync().unwrap();
        }

        let mut file = BlockFile::open(&path).unwrap();
        assert_eq!(file.len().unwrap(), RAW_BLOCK_SIZE as u64);

        let mut buf = [0u8; RAW_BLOCK_SIZE];
        file.read_block(0, &mut buf).unwrap();
        assert_eq!(buf, [0xAB; RAW_BLOCK_SIZE]);
    }

    #[test]
    fn short_read_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");

        let mut file = BlockFile::open(&path).unwrap();
        file.truncate(100).unwrap();

        let mut buf = [0u8; RAW_BLOCK_SIZE];
        assert!(file.read_block(0, &mut buf).is_err());
    }

    #[test]
    fn truncate_rejects_absurd_size() {
        let dir = tempdir().unwrap();
        let mut file = BlockFile::open(&dir.path().join("store.bin")).unwrap();

        let result = file.truncate(MAX_FILE_SIZE + 1);
        assert!(matches!(result, Err(StorageError::TooLarge { .. })));
    }

    #[test]
    fn set_delete_removes_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.bin");

        let mut file = BlockFile::open(&path).unwrap();
        file.write_block(0, &[1u8; RAW_BLOCK_SIZE]).unwrap();
        assert!(file.set_delete());
        drop(file);

        assert!(!path.exists());
    }

    #[test]
    fn find_all_splits_files_and_directories() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"x").unwrap();
        std::fs::write(dir.path().join("b.bin"), b"y").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();

        let mut files = find_all(dir.path(), false).unwrap();
        files.sort();
        assert_eq!(files, vec!["a.bin", "b.bin"]);

        let dirs = find_all(dir.path(), true).unwrap();
        assert_eq!(dirs, vec!["sub"]);
    }
}
