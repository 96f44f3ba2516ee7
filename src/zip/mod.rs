//! ZIP archive reading and rewriting.
//!
//! ## Architecture
//!
//! - `structures`: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - `parser`: Low-level parsing of ZIP structures from any [`ReadAt`](crate::io::ReadAt) source
//! - `archive`: The mutable archive model used by the VFS
//! - `writer`: Rebuilds the archive file when pending changes are flushed
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Archives are read from the end: EOCD first, then the Central Directory.
//! Archives with a damaged directory are indexed by walking local headers instead.
//!
//! ## Limitations
//!
//! - STORED and DEFLATE only
//! - No ZIP64, encryption or multi-disk archives

mod archive;
mod parser;
mod structures;
mod writer;

pub use archive::{LazyHandle, ZipArchive, crc32};
pub use parser::{ParsedDirectory, ZipParser};
pub use structures::*;
