//! File handles over the two storage backends.
//!
//! [`VfsFile`] is what the VFS hands out. It wraps either a [`DiskFile`] or an
//! [`ArchiveFile`] and exposes them through [`FileOps`]. Backend errors never
//! escape as `io::Error`; they are folded into a one-shot [`FileStatus`].

mod archive;
mod disk;

pub use archive::ArchiveFile;
pub use disk::DiskFile;

use std::fmt;
use std::io;

use crate::cache::WeakCache;
use crate::error::ZipError;

/// Outcome of the last failed file operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FileStatus {
    #[default]
    Ok,
    NoSpace,
    AccessDenied,
    IoError,
    ResourceExhausted,
    Other,
}

impl FileStatus {
    pub fn is_ok(self) -> bool {
        self == FileStatus::Ok
    }

    pub fn from_io(err: &io::Error) -> Self {
        if let Some(status) = errno_status(err) {
            return status;
        }

        match err.kind() {
            io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded | io::ErrorKind::FileTooLarge => {
                FileStatus::NoSpace
            }
            io::ErrorKind::PermissionDenied
            | io::ErrorKind::ReadOnlyFilesystem
            | io::ErrorKind::ExecutableFileBusy => FileStatus::AccessDenied,
            io::ErrorKind::OutOfMemory => FileStatus::ResourceExhausted,
            io::ErrorKind::UnexpectedEof | io::ErrorKind::WriteZero => FileStatus::IoError,
            _ => FileStatus::Other,
        }
    }

    pub fn from_zip(err: &ZipError) -> Self {
        match err {
            ZipError::Io(e) => Self::from_io(e),
            ZipError::MalformedArchive(_) | ZipError::CorruptStream(_) => FileStatus::IoError,
            ZipError::LimitExceeded(_) => FileStatus::NoSpace,
            ZipError::UnsupportedCompression(_) | ZipError::NotFound(_) => FileStatus::Other,
        }
    }
}

#[cfg(unix)]
fn errno_status(err: &io::Error) -> Option<FileStatus> {
    match err.raw_os_error()? {
        // EIO
        5 => Some(FileStatus::IoError),
        // ENFILE, EMFILE
        23 | 24 => Some(FileStatus::ResourceExhausted),
        _ => None,
    }
}

#[cfg(not(unix))]
fn errno_status(_err: &io::Error) -> Option<FileStatus> {
    None
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            FileStatus::Ok => "ok",
            FileStatus::NoSpace => "no space left",
            FileStatus::AccessDenied => "access denied",
            FileStatus::IoError => "i/o error",
            FileStatus::ResourceExhausted => "resources exhausted",
            FileStatus::Other => "file error",
        };
        f.write_str(text)
    }
}

/// First-error-wins status slot, cleared when read.
#[derive(Debug, Default)]
pub(crate) struct StatusSlot(FileStatus);

impl StatusSlot {
    pub fn set(&mut self, status: FileStatus) {
        if self.0.is_ok() {
            self.0 = status;
        }
    }

    pub fn take(&mut self) -> FileStatus {
        std::mem::take(&mut self.0)
    }
}

/// How a file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    /// Write; archive entries are deflated
    Write,
    /// Write; archive entries are stored as-is
    WriteUncompressed,
}

impl OpenMode {
    pub fn is_write(self) -> bool {
        !matches!(self, OpenMode::Read)
    }
}

/// Operations shared by every file backend.
pub trait FileOps {
    /// Read into `buf`, returning the number of bytes read.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Write `data`, returning the number of bytes accepted.
    fn write(&mut self, data: &[u8]) -> usize;

    fn at_eof(&self) -> bool;

    fn position(&self) -> u64;

    fn size(&self) -> u64;

    /// Return and clear the status of the first failure since the last call.
    fn status(&mut self) -> FileStatus;

    /// The whole file content, if the backend can provide it in one piece.
    fn take_all_data(&mut self) -> Option<Vec<u8>>;
}

#[derive(Debug)]
pub enum FileBackend {
    Disk(DiskFile),
    Archive(ArchiveFile),
}

/// An open file in the virtual namespace.
#[derive(Debug)]
pub struct VfsFile {
    name: String,
    backend: FileBackend,
    cache: WeakCache,
}

macro_rules! dispatch {
    ($self:expr, $f:ident => $body:expr) => {
        match $self {
            FileBackend::Disk($f) => $body,
            FileBackend::Archive($f) => $body,
        }
    };
}

impl VfsFile {
    pub(crate) fn new(name: String, backend: FileBackend, cache: WeakCache) -> Self {
        Self { name, backend, cache }
    }

    /// The virtual path this file was opened under.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn backend(&self) -> &FileBackend {
        &self.backend
    }
}

impl FileOps for VfsFile {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        dispatch!(&mut self.backend, f => f.read(buf))
    }

    fn write(&mut self, data: &[u8]) -> usize {
        dispatch!(&mut self.backend, f => f.write(data))
    }

    fn at_eof(&self) -> bool {
        dispatch!(&self.backend, f => f.at_eof())
    }

    fn position(&self) -> u64 {
        dispatch!(&self.backend, f => f.position())
    }

    fn size(&self) -> u64 {
        dispatch!(&self.backend, f => f.size())
    }

    fn status(&mut self) -> FileStatus {
        dispatch!(&mut self.backend, f => f.status())
    }

    fn take_all_data(&mut self) -> Option<Vec<u8>> {
        dispatch!(&mut self.backend, f => f.take_all_data())
    }
}

impl Drop for VfsFile {
    fn drop(&mut self) {
        if let FileBackend::Archive(f) = &mut self.backend {
            f.release();
        }
        self.cache.check_up();
    }
}
