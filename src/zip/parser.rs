//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. Read the Central Directory to get metadata for all files
//! 3. For extraction, read each file's Local File Header and data
//!
//! When the central directory is damaged, the parser falls back to walking
//! the local file headers from the start of the archive. That recovers every
//! entry whose sizes are stored in its local header, but not per-entry comments.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};

use crate::error::{ZipError, ZipResult};
use crate::io::ReadAt;

use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Everything the parser learned about an archive.
#[derive(Debug, Default)]
pub struct ParsedDirectory {
    pub entries: Vec<ZipEntry>,
    pub comment: Vec<u8>,
    /// True when the central directory was unusable and entries came from local headers
    pub recovered: bool,
}

/// Low-level ZIP file parser.
///
/// Generic over the reader so tests can parse in-memory byte slices.
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: R,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: R) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Read the archive index, recovering from a damaged central directory.
    ///
    /// Only I/O errors other than truncation are returned; a malformed archive
    /// yields whatever the sequential scan could reconstruct.
    pub fn read_directory(&self) -> ZipResult<ParsedDirectory> {
        if self.size == 0 {
            return Ok(ParsedDirectory::default());
        }

        match self.list_files() {
            Ok(dir) => Ok(dir),
            Err(ZipError::MalformedArchive(reason)) => {
                tracing::warn!(%reason, "malformed archive, rebuilding index from local headers");
                self.scan_local_headers()
            }
            Err(ZipError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                tracing::warn!("truncated central directory, rebuilding index from local headers");
                self.scan_local_headers()
            }
            Err(e) => Err(e),
        }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// The EOCD is located at the end of the ZIP file. This method
    /// handles both the simple case (no comment) and archives with
    /// comments by searching backwards for the signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    pub fn find_eocd(&self) -> ZipResult<(EndOfCentralDirectory, u64)> {
        // Optimization: First try the simple case where there's no comment.
        if self.size >= EndOfCentralDirectory::SIZE as u64 {
            let offset = self.size - EndOfCentralDirectory::SIZE as u64;
            let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
            self.reader.read_exact_at(offset, &mut buf)?;

            // Check for signature and zero-length comment
            if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
                let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
                return Ok((eocd, offset));
            }
        }

        // The EOCD could be earlier if there's a ZIP comment.
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf)?;

        // Search backwards for EOCD signature (PK\x05\x06)
        if buf.len() >= EndOfCentralDirectory::SIZE {
            for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
                if &buf[i..i + 4] == EndOfCentralDirectory::SIGNATURE {
                    // The comment length field should match the remaining bytes.
                    let comment_len = u16::from_le_bytes([buf[i + 20], buf[i + 21]]) as usize;

                    if comment_len == buf.len() - i - EndOfCentralDirectory::SIZE {
                        let eocd = EndOfCentralDirectory::from_bytes(
                            &buf[i..i + EndOfCentralDirectory::SIZE],
                        )?;
                        return Ok((eocd, search_start + i as u64));
                    }
                }
            }
        }

        Err(ZipError::MalformedArchive(
            "end of central directory not found".into(),
        ))
    }

    /// List all files in the ZIP archive from its central directory.
    pub fn list_files(&self) -> ZipResult<ParsedDirectory> {
        let (eocd, eocd_offset) = self.find_eocd()?;

        let comment = self.read_vec(
            eocd_offset + EndOfCentralDirectory::SIZE as u64,
            eocd.comment_len as usize,
        )?;

        let cd_offset = eocd.cd_offset as u64;
        let cd_size = eocd.cd_size as u64;
        if cd_offset + cd_size > eocd_offset {
            return Err(ZipError::MalformedArchive(
                "central directory overlaps end record".into(),
            ));
        }

        // Read the entire Central Directory in one request
        let cd_data = self.read_vec(cd_offset, cd_size as usize)?;

        let mut entries = Vec::with_capacity(eocd.total_entries as usize);
        let mut cursor = Cursor::new(cd_data.as_slice());

        for _ in 0..eocd.total_entries {
            let entry = self.parse_cdfh(&mut cursor)?;
            entries.push(entry);
        }

        Ok(ParsedDirectory {
            entries,
            comment,
            recovered: false,
        })
    }

    /// Parse a Central Directory File Header from a cursor.
    fn parse_cdfh(&self, cursor: &mut Cursor<&[u8]>) -> ZipResult<ZipEntry> {
        // Read and verify the signature (PK\x01\x02)
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig)?;
        if sig != CDFH_SIGNATURE {
            return Err(ZipError::MalformedArchive(
                "invalid central directory file header".into(),
            ));
        }

        let version_made_by = cursor.read_u16::<LittleEndian>()?;
        let version_needed = cursor.read_u16::<LittleEndian>()?;
        let flags = cursor.read_u16::<LittleEndian>()?;
        let compression_method = cursor.read_u16::<LittleEndian>()?;
        let last_mod_time = cursor.read_u16::<LittleEndian>()?;
        let last_mod_date = cursor.read_u16::<LittleEndian>()?;
        let crc32 = cursor.read_u32::<LittleEndian>()?;
        let compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>()?;
        let extra_field_length = cursor.read_u16::<LittleEndian>()?;
        let file_comment_length = cursor.read_u16::<LittleEndian>()?;
        let disk_number_start = cursor.read_u16::<LittleEndian>()?;
        let internal_attrs = cursor.read_u16::<LittleEndian>()?;
        let external_attrs = cursor.read_u32::<LittleEndian>()?;
        let lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

        // Use lossy conversion to handle non-UTF8 filenames gracefully
        let mut file_name_bytes = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut file_name_bytes)?;
        let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();

        let mut extra_field = vec![0u8; extra_field_length as usize];
        cursor.read_exact(&mut extra_field)?;

        let mut comment = vec![0u8; file_comment_length as usize];
        cursor.read_exact(&mut comment)?;

        // Directory entries end with '/'
        let is_directory = file_name.ends_with('/');

        Ok(ZipEntry {
            file_name,
            version_made_by,
            version_needed,
            flags,
            compression_method: CompressionMethod::from_u16(compression_method),
            last_mod_time,
            last_mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            lfh_offset,
            disk_number_start,
            internal_attrs,
            external_attrs,
            extra_field,
            comment,
            is_directory,
            synthetic: false,
        })
    }

    /// Rebuild the index by walking local file headers from offset 0.
    ///
    /// Stops at the first record that is not a local header (normally the
    /// central directory) or at an entry whose sizes live in a data descriptor,
    /// since its end cannot be found without the central directory.
    pub fn scan_local_headers(&self) -> ZipResult<ParsedDirectory> {
        let mut entries = Vec::new();
        let mut offset = 0u64;

        while offset + LFH_SIZE as u64 <= self.size {
            let mut buf = [0u8; LFH_SIZE];
            self.reader.read_exact_at(offset, &mut buf)?;
            if &buf[0..4] != LFH_SIGNATURE {
                break;
            }
            let lfh = LocalFileHeader::from_bytes(&buf)?;

            let name_offset = offset + LFH_SIZE as u64;
            let mut next = offset + lfh.data_offset() + lfh.compressed_size as u64;
            if next > self.size {
                tracing::warn!(offset, "local entry runs past end of archive");
                break;
            }

            let name = self.read_vec(name_offset, lfh.file_name_length as usize)?;
            let extra = self.read_vec(
                name_offset + lfh.file_name_length as u64,
                lfh.extra_field_length as usize,
            )?;
            let file_name = String::from_utf8_lossy(&name).to_string();

            if lfh.flags & FLAG_DATA_DESCRIPTOR != 0 && lfh.compressed_size == 0 {
                tracing::warn!(%file_name, "entry sizes deferred to a data descriptor, stopping scan");
                break;
            }

            if lfh.flags & FLAG_DATA_DESCRIPTOR != 0 {
                let mut sig = [0u8; 4];
                if self.reader.read_exact_at(next, &mut sig).is_ok() && sig == DATA_DESCRIPTOR_SIGNATURE {
                    next += 16;
                } else {
                    next += 12;
                }
            }

            entries.push(ZipEntry::from_local_header(file_name, &lfh, offset, extra));
            offset = next;
        }

        Ok(ParsedDirectory {
            entries,
            comment: Vec::new(),
            recovered: true,
        })
    }

    /// Read and validate the Local File Header of an entry.
    pub fn read_local_header(&self, lfh_offset: u64) -> ZipResult<LocalFileHeader> {
        let mut lfh_buf = [0u8; LFH_SIZE];
        self.reader.read_exact_at(lfh_offset, &mut lfh_buf)?;
        LocalFileHeader::from_bytes(&lfh_buf)
    }

    /// Get the actual data offset for a file entry.
    ///
    /// The Local File Header (LFH) has variable-length fields (filename,
    /// extra field) that may differ from the Central Directory entry.
    pub fn get_data_offset(&self, entry: &ZipEntry) -> ZipResult<u64> {
        let lfh = self.read_local_header(entry.lfh_offset)?;
        Ok(entry.lfh_offset + lfh.data_offset())
    }

    /// Total length of an entry's local record: header, name, extra, data and
    /// the trailing data descriptor if the entry has one.
    pub fn local_record_len(&self, entry: &ZipEntry) -> ZipResult<u64> {
        let lfh = self.read_local_header(entry.lfh_offset)?;
        let mut len = lfh.data_offset() + entry.compressed_size;

        if entry.uses_data_descriptor() {
            let mut sig = [0u8; 4];
            self.reader.read_exact_at(entry.lfh_offset + len, &mut sig)?;
            len += if sig == DATA_DESCRIPTOR_SIGNATURE { 16 } else { 12 };
        }

        Ok(len)
    }

    /// Read `len` bytes at `offset` into a fresh buffer.
    pub fn read_vec(&self, offset: u64, len: usize) -> ZipResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Get a reference to the underlying reader.
    pub fn reader(&self) -> &R {
        &self.reader
    }
}
