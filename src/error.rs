//! Error types shared across the crate.
//!
//! The ZIP codec reports [`ZipError`]. The VFS facade reports [`VfsError`], which
//! only ever carries a [`FileStatus`](crate::file::FileStatus) for backend
//! failures and never a raw OS error.

use std::io;

use thiserror::Error;

use crate::file::FileStatus;

/// Errors produced by the ZIP reader/writer.
#[derive(Debug, Error)]
pub enum ZipError {
    /// A signature or record did not match the ZIP layout.
    #[error("malformed archive: {0}")]
    MalformedArchive(String),

    /// The entry uses a compression method other than store or deflate.
    #[error("unsupported compression method: {0}")]
    UnsupportedCompression(u16),

    /// Entry data failed to inflate, had the wrong length, or failed its CRC check.
    #[error("corrupt entry stream: {0}")]
    CorruptStream(String),

    /// No entry with this name.
    #[error("no such entry: {0}")]
    NotFound(String),

    /// A value does not fit the 16/32-bit fields of a classic ZIP archive.
    #[error("archive limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ZipResult<T> = std::result::Result<T, ZipError>;

/// Errors surfaced by the [`Vfs`](crate::Vfs) facade.
#[derive(Debug, Error)]
pub enum VfsError {
    /// The virtual path does not resolve to a node, or no binding has the file.
    #[error("not found: {0}")]
    NotFound(String),

    /// A backend reported a failure through its one-shot status code.
    #[error("{path}: {status}")]
    Status { path: String, status: FileStatus },

    /// Fewer bytes were transferred than requested.
    #[error("{path}: transferred {done} of {wanted} bytes")]
    ShortTransfer {
        path: String,
        done: usize,
        wanted: usize,
    },

    /// None of the real paths could be bound to the virtual path.
    #[error("cannot mount {real} on {virtual_path}")]
    MountFailed { virtual_path: String, real: String },

    /// The virtual path is not a mount point, or the real path is not bound to it.
    #[error("not mounted: {0}")]
    NotMounted(String),

    #[error("config: {0}")]
    Config(String),
}

pub type VfsResult<T> = std::result::Result<T, VfsError>;
