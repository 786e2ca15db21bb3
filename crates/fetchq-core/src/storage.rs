//! Concurrent offset writer for the shared output file.
//!
//! All fetchers of one transfer write into the same file at disjoint
//! offsets computed from the immutable plan, so no locking is needed.

use anyhow::{Context, Result};
use std::fs::File;
#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Writer for the transfer's output file. Cloneable; each `write_at` is an
/// independent pwrite, safe from multiple threads.
#[derive(Clone)]
pub struct StorageWriter {
    file: Arc<File>,
    path: PathBuf,
}

impl StorageWriter {
    /// Open the output file read-write, creating it if absent. Never
    /// truncates: bytes from an earlier interrupted run are resumed, not lost.
    pub fn open_or_create(path: &Path) -> Result<Self> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open output file {}", path.display()))?;
        Ok(Self {
            file: Arc::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Write `data` at `offset` without moving any shared cursor.
    #[cfg(unix)]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let n = self
            .file
            .write_at(data, offset)
            .context("output write_at failed")?;
        if n != data.len() {
            anyhow::bail!("short write: {} of {}", n, data.len());
        }
        Ok(())
    }

    /// Non-Unix fallback: seek + write on a cloned handle.
    #[cfg(not(unix))]
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        use std::io::{Seek, SeekFrom, Write};
        let mut f = (*self.file).try_clone()?;
        f.seek(SeekFrom::Start(offset))?;
        f.write_all(data)?;
        Ok(())
    }

    /// Current on-disk size of the output file.
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata().context("stat output file")?.len())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writes_land_at_their_offsets() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let w = StorageWriter::open_or_create(&path).unwrap();
        w.write_at(4, b"BBBB").unwrap();
        w.write_at(0, b"AAAA").unwrap();
        let content = std::fs::read(&path).unwrap();
        assert_eq!(content, b"AAAABBBB");
    }

    #[test]
    fn reopen_does_not_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        {
            let w = StorageWriter::open_or_create(&path).unwrap();
            w.write_at(0, b"hello").unwrap();
        }
        let w = StorageWriter::open_or_create(&path).unwrap();
        assert_eq!(w.len().unwrap(), 5);
        w.write_at(5, b" world").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");
    }

    #[test]
    fn concurrent_disjoint_writes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let w = StorageWriter::open_or_create(&path).unwrap();
        let mut handles = Vec::new();
        for i in 0..4u64 {
            let w = w.clone();
            handles.push(std::thread::spawn(move || {
                let chunk = vec![b'a' + i as u8; 1024];
                w.write_at(i * 1024, &chunk).unwrap();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        let content = std::fs::read(&path).unwrap();
        assert_eq!(content.len(), 4096);
        for i in 0..4usize {
            assert!(content[i * 1024..(i + 1) * 1024]
                .iter()
                .all(|&b| b == b'a' + i as u8));
        }
    }
}
