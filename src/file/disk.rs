//! File handles on native files.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use super::{FileOps, FileStatus, OpenMode, StatusSlot};

/// A file in a directory binding.
#[derive(Debug)]
pub struct DiskFile {
    file: File,
    path: PathBuf,
    size: u64,
    pos: u64,
    status: StatusSlot,
}

impl DiskFile {
    /// Open `path`. In write mode the file is created or truncated, and a
    /// missing parent directory is created once before a single retry.
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self, FileStatus> {
        let file = if mode.is_write() {
            match Self::create(path) {
                Ok(file) => file,
                Err(first) => {
                    let Some(parent) = path.parent() else {
                        return Err(FileStatus::from_io(&first));
                    };
                    tracing::debug!(dir = %parent.display(), "creating missing directories");
                    fs::create_dir_all(parent)
                        .and_then(|_| Self::create(path))
                        .map_err(|e| FileStatus::from_io(&e))?
                }
            }
        } else {
            File::open(path).map_err(|e| FileStatus::from_io(&e))?
        };

        let size = if mode.is_write() {
            0
        } else {
            file.metadata().map_err(|e| FileStatus::from_io(&e))?.len()
        };

        Ok(Self {
            file,
            path: path.to_path_buf(),
            size,
            pos: 0,
            status: StatusSlot::default(),
        })
    }

    fn create(path: &Path) -> io::Result<File> {
        OpenOptions::new().write(true).create(true).truncate(true).open(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FileOps for DiskFile {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.status.set(FileStatus::from_io(&e));
                    break;
                }
            }
        }
        self.pos += filled as u64;
        filled
    }

    fn write(&mut self, data: &[u8]) -> usize {
        match self.file.write_all(data) {
            Ok(()) => {
                self.pos += data.len() as u64;
                self.size = self.size.max(self.pos);
                data.len()
            }
            Err(e) => {
                self.status.set(FileStatus::from_io(&e));
                0
            }
        }
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

    /// Disk files are read incrementally; there is no buffer to hand out.
    fn take_all_data(&mut self) -> Option<Vec<u8>> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_creates_missing_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c.txt");

        let mut file = DiskFile::open(&path, OpenMode::Write).unwrap();
        assert_eq!(file.write(b"hello"), 5);
        assert_eq!(file.size(), 5);
        assert_eq!(file.status(), FileStatus::Ok);
        drop(file);

        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn read_tracks_position_and_eof() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, b"0123456789").unwrap();

        let mut file = DiskFile::open(&path, OpenMode::Read).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(file.read(&mut buf), 4);
        assert_eq!(&buf, b"0123");
        assert_eq!(file.position(), 4);
        assert!(!file.at_eof());

        let mut rest = [0u8; 16];
        assert_eq!(file.read(&mut rest), 6);
        assert!(file.at_eof());
        assert!(file.take_all_data().is_none());
    }

    #[test]
    fn missing_file_fails_to_open_for_reading() {
        let dir = TempDir::new().unwrap();
        let err = DiskFile::open(&dir.path().join("nope"), OpenMode::Read).unwrap_err();
        assert_eq!(err, FileStatus::Other);
    }
}
