//! Rebuilding an archive file from committed and pending entries.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use flate2::Compression;
use flate2::write::DeflateEncoder;
use tempfile::NamedTempFile;

use crate::error::ZipResult;
use crate::io::{LocalFileReader, ReadAt};

use super::archive::{LazyEntry, crc32};
use super::parser::ZipParser;
use super::structures::{CompressionMethod, EndOfCentralDirectory, ZipEntry, to_u16, to_u32};

const COPY_CHUNK: usize = 64 * 1024;

/// Write a new archive next to `path` and atomically move it into place.
///
/// `survivors` are copied verbatim from the current file in their original
/// order, followed by `pending` entries in the order given. Returns the entries
/// of the new archive with their new offsets.
pub(super) fn rebuild(
    path: &Path,
    survivors: &[&ZipEntry],
    pending: &[&LazyEntry],
    comment: &[u8],
) -> ZipResult<Vec<ZipEntry>> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let temp = NamedTempFile::new_in(dir)?;
    let mut out = CountingWriter::new(BufWriter::new(temp));
    let mut written = Vec::with_capacity(survivors.len() + pending.len());

    if !survivors.is_empty() {
        let parser = ZipParser::new(LocalFileReader::new(path)?);
        let mut ordered = survivors.to_vec();
        ordered.sort_by_key(|e| e.lfh_offset);

        for entry in ordered {
            let len = parser.local_record_len(entry)?;
            let mut moved = entry.clone();
            moved.lfh_offset = out.position();
            copy_range(parser.reader(), entry.lfh_offset, len, &mut out)?;
            written.push(moved);
        }
    }

    for lazy in pending {
        let mut entry = lazy.entry.clone();
        let data = encode(&mut entry, &lazy.buffer)?;
        entry.lfh_offset = out.position();
        entry.local_header()?.write_to(&mut out)?;
        out.write_all(entry.file_name.as_bytes())?;
        out.write_all(&data)?;
        written.push(entry);
    }

    let cd_offset = out.position();
    for entry in &written {
        entry.write_central_header(&mut out)?;
    }
    let cd_size = out.position() - cd_offset;

    let count = to_u16(written.len(), "entry count")?;
    let eocd = EndOfCentralDirectory {
        disk_number: 0,
        disk_with_cd: 0,
        disk_entries: count,
        total_entries: count,
        cd_size: to_u32(cd_size, "central directory size")?,
        cd_offset: to_u32(cd_offset, "central directory offset")?,
        comment_len: to_u16(comment.len(), "archive comment length")?,
    };
    eocd.write_to(&mut out)?;
    out.write_all(comment)?;

    let temp = out.into_inner().into_inner().map_err(|e| e.into_error())?;
    // The temp file is private; the replacement keeps the archive's mode
    if let Ok(meta) = fs::metadata(path) {
        temp.as_file().set_permissions(meta.permissions())?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    Ok(written)
}

/// Fill in CRC and sizes for `entry` and return the bytes to store.
///
/// Deflate falls back to store when compression does not make the data smaller.
fn encode(entry: &mut ZipEntry, data: &[u8]) -> ZipResult<Vec<u8>> {
    entry.crc32 = crc32(data);
    entry.uncompressed_size = data.len() as u64;

    let stored = if entry.compression_method == CompressionMethod::Deflate && !entry.is_directory {
        let mut encoder = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), Compression::default());
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;
        if compressed.len() < data.len() {
            entry.compressed_size = compressed.len() as u64;
            return Ok(compressed);
        }
        data.to_vec()
    } else {
        data.to_vec()
    };

    entry.compression_method = CompressionMethod::Stored;
    entry.version_needed = 10;
    entry.compressed_size = stored.len() as u64;
    Ok(stored)
}

fn copy_range<R: ReadAt, W: Write>(reader: &R, mut offset: u64, mut len: u64, out: &mut W) -> ZipResult<()> {
    let mut buf = vec![0u8; COPY_CHUNK.min(len as usize)];
    while len > 0 {
        let n = (len as usize).min(buf.len());
        reader.read_exact_at(offset, &mut buf[..n])?;
        out.write_all(&buf[..n])?;
        offset += n as u64;
        len -= n as u64;
    }
    Ok(())
}

/// Tracks how many bytes have gone through, to compute record offsets.
struct CountingWriter<W> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    fn position(&self) -> u64 {
        self.written
    }

    fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    #[test]
    fn incompressible_data_is_stored() {
        let mut entry = ZipEntry::new("noise.bin", CompressionMethod::Deflate, UNIX_EPOCH);
        // Deflate cannot shrink a couple of bytes
        let data = encode(&mut entry, b"xy").unwrap();

        assert_eq!(entry.compression_method, CompressionMethod::Stored);
        assert_eq!(data, b"xy");
        assert_eq!(entry.compressed_size, 2);
        assert_eq!(entry.uncompressed_size, 2);
    }

    #[test]
    fn repetitive_data_is_deflated() {
        let mut entry = ZipEntry::new("zeros.bin", CompressionMethod::Deflate, UNIX_EPOCH);
        let input = vec![0u8; 4096];
        let data = encode(&mut entry, &input).unwrap();

        assert_eq!(entry.compression_method, CompressionMethod::Deflate);
        assert!(entry.compressed_size < 4096);
        assert_eq!(data.len() as u64, entry.compressed_size);
        assert_eq!(entry.crc32, crc32(&input));
    }

    #[test]
    fn counting_writer_tracks_offset() {
        let mut out = CountingWriter::new(Vec::new());
        out.write_all(b"abc").unwrap();
        out.write_all(b"de").unwrap();
        assert_eq!(out.position(), 5);
        assert_eq!(out.into_inner(), b"abcde");
    }
}
