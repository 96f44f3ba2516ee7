//! File handles on entries inside a ZIP archive.

use std::path::Path;

use crate::cache::{ArchiveCache, ArchiveRef};
use crate::zip::LazyHandle;

use super::{FileOps, FileStatus, OpenMode, StatusSlot};

#[derive(Debug)]
enum Content {
    /// Whole entry, decoded at open
    Reading(Vec<u8>),
    Writing(LazyHandle),
}

/// An entry inside an archive binding.
#[derive(Debug)]
pub struct ArchiveFile {
    archive: Option<ArchiveRef>,
    name: String,
    content: Content,
    size: u64,
    pos: u64,
    status: StatusSlot,
}

impl ArchiveFile {
    /// Open entry `name` of the archive at `archive_path`.
    ///
    /// Reading flushes the archive first (unless someone is writing to it) and
    /// decodes the whole entry. Writing starts a pending entry that becomes
    /// visible once the archive is flushed.
    pub fn open(
        cache: &ArchiveCache,
        archive_path: &Path,
        name: &str,
        mode: OpenMode,
    ) -> Result<Self, FileStatus> {
        let (guard, content) = if mode.is_write() {
            let guard = cache.acquire_writer(archive_path);
            let handle = {
                let mut cached = guard.borrow_mut();
                cached
                    .archive()
                    .new_file(name, 0, mode == OpenMode::Write)
                    .map_err(|e| FileStatus::from_zip(&e))?
            };
            (guard, Content::Writing(handle))
        } else {
            let guard = cache.acquire(archive_path);
            let data = {
                let mut cached = guard.borrow_mut();
                if let Err(e) = cached.flush() {
                    tracing::warn!(archive = %archive_path.display(), error = %e, "flush before read failed");
                }
                cached.archive().read(name).map_err(|e| {
                    tracing::debug!(archive = %archive_path.display(), %name, error = %e, "cannot read entry");
                    FileStatus::from_zip(&e)
                })?
            };
            (guard, Content::Reading(data))
        };

        let size = match &content {
            Content::Reading(data) => data.len() as u64,
            Content::Writing(_) => 0,
        };

        Ok(Self {
            archive: Some(guard),
            name: name.to_string(),
            content,
            size,
            pos: 0,
            status: StatusSlot::default(),
        })
    }

    /// Entry name within the archive.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Give up the archive reference ahead of drop.
    pub(crate) fn release(&mut self) {
        self.archive = None;
    }
}

impl FileOps for ArchiveFile {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let Content::Reading(data) = &self.content else {
            self.status.set(FileStatus::AccessDenied);
            return 0;
        };
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u64;
        n
    }

    fn write(&mut self, data: &[u8]) -> usize {
        let Content::Writing(handle) = &self.content else {
            self.status.set(FileStatus::AccessDenied);
            return 0;
        };
        let appended = match &self.archive {
            Some(guard) => guard.borrow_mut().archive().append(handle, data),
            None => false,
        };
        if !appended {
            self.status.set(FileStatus::NoSpace);
            return 0;
        }
        self.pos += data.len() as u64;
        self.size = self.pos;
        data.len()
    }

    fn at_eof(&self) -> bool {
        self.pos >= self.size
    }

    fn position(&self) -> u64 {
        self.pos
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn status(&mut self) -> FileStatus {
        self.status.take()
    }

    /// Hands out the decoded entry; later reads see an empty file.
    fn take_all_data(&mut self) -> Option<Vec<u8>> {
        match &mut self.content {
            Content::Reading(data) => {
                self.pos = self.size;
                Some(std::mem::take(data))
            }
            Content::Writing(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn written_entry_is_readable_after_writer_closes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pack.zip");
        let cache = ArchiveCache::default();

        let mut writer = ArchiveFile::open(&cache, &path, "docs/readme.txt", OpenMode::Write).unwrap();
        assert_eq!(writer.write(b"hello "), 6);
        assert_eq!(writer.write(b"archive"), 7);
        assert_eq!(writer.size(), 13);
        assert_eq!(writer.status(), FileStatus::Ok);

        // Not committed while the writer is open
        assert!(ArchiveFile::open(&cache, &path, "docs/readme.txt", OpenMode::Read).is_err());
        drop(writer);

        let mut reader = ArchiveFile::open(&cache, &path, "docs/readme.txt", OpenMode::Read).unwrap();
        assert_eq!(reader.size(), 13);
        let mut buf = [0u8; 5];
        assert_eq!(reader.read(&mut buf), 5);
        assert_eq!(&buf, b"hello");
        assert_eq!(reader.take_all_data().unwrap(), b"hello archive");
        assert!(reader.at_eof());
    }

    #[test]
    fn append_to_deleted_entry_reports_no_space() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pack.zip");
        let cache = ArchiveCache::default();

        let mut writer = ArchiveFile::open(&cache, &path, "tmp.bin", OpenMode::WriteUncompressed).unwrap();
        cache.get(&path).borrow_mut().archive().delete_file("tmp.bin").unwrap();

        assert_eq!(writer.write(b"lost"), 0);
        assert_eq!(writer.status(), FileStatus::NoSpace);
        assert_eq!(writer.status(), FileStatus::Ok);
    }

    #[test]
    fn second_writer_takes_the_entry_from_the_first() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pack.zip");
        let cache = ArchiveCache::default();

        let mut first = ArchiveFile::open(&cache, &path, "save.dat", OpenMode::Write).unwrap();
        assert_eq!(first.write(b"AAA"), 3);
        let mut second = ArchiveFile::open(&cache, &path, "save.dat", OpenMode::Write).unwrap();

        assert_eq!(first.write(b"aaa"), 0);
        assert_eq!(first.status(), FileStatus::NoSpace);
        assert_eq!(second.write(b"BBB"), 3);
        drop(first);
        drop(second);

        let mut reader = ArchiveFile::open(&cache, &path, "save.dat", OpenMode::Read).unwrap();
        assert_eq!(reader.take_all_data().unwrap(), b"BBB");
    }

    #[test]
    fn reading_from_writer_is_denied() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pack.zip");
        let cache = ArchiveCache::default();

        let mut writer = ArchiveFile::open(&cache, &path, "w", OpenMode::Write).unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(writer.read(&mut buf), 0);
        assert_eq!(writer.status(), FileStatus::AccessDenied);
    }
}
