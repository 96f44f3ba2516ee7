//! In-memory model of one ZIP archive on disk.
//!
//! Reads go straight to the file. Mutations (new entries, deletions, the
//! archive comment) are kept in memory until [`ZipArchive::flush`] rewrites
//! the archive.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use flate2::read::DeflateDecoder;

use crate::error::{ZipError, ZipResult};
use crate::io::{LocalFileReader, ReadAt};

use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipEntry};
use super::writer;

/// Lazy entry buffers grow in steps of this many bytes.
const LAZY_CHUNK: usize = 1024;

/// Handle to an entry created with [`ZipArchive::new_file`].
///
/// A handle only reaches the entry it created: once the name is deleted or
/// started again by another `new_file`, appends through it fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LazyHandle {
    name: String,
    generation: u64,
}

impl LazyHandle {
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An entry buffered in memory, not yet part of the archive file.
#[derive(Debug)]
pub(super) struct LazyEntry {
    pub entry: ZipEntry,
    pub buffer: Vec<u8>,
    generation: u64,
}

impl LazyEntry {
    fn append(&mut self, data: &[u8]) {
        let needed = self.buffer.len() + data.len();
        if needed > self.buffer.capacity() {
            let target = needed.div_ceil(LAZY_CHUNK) * LAZY_CHUNK;
            self.buffer.reserve_exact(target - self.buffer.len());
        }
        self.buffer.extend_from_slice(data);
    }
}

#[derive(Debug, Default)]
struct Index {
    /// Committed entries plus synthetic directories, sorted by name
    entries: BTreeMap<String, ZipEntry>,
    lazy: BTreeMap<String, LazyEntry>,
    deleted: BTreeSet<String>,
    comment: Vec<u8>,
    comment_dirty: bool,
    /// Stamp for the next lazy entry
    next_generation: u64,
}

impl Index {
    fn visible(&self, name: &str) -> Option<&ZipEntry> {
        if self.deleted.contains(name) {
            return None;
        }
        self.entries.get(name)
    }

    fn has_pending(&self) -> bool {
        !self.lazy.is_empty() || !self.deleted.is_empty() || self.comment_dirty
    }

    /// Replace the entry set, re-deriving directories missing from the index.
    fn set_entries(&mut self, entries: impl IntoIterator<Item = ZipEntry>) {
        self.entries.clear();
        for entry in entries {
            // Later duplicates overwrite earlier ones
            self.entries.insert(entry.file_name.clone(), entry);
        }

        let mut implied = BTreeSet::new();
        for name in self.entries.keys() {
            for (i, _) in name.match_indices('/') {
                if i + 1 < name.len() {
                    implied.insert(&name[..=i]);
                }
            }
        }
        let missing: Vec<String> = implied
            .into_iter()
            .filter(|dir| !self.entries.contains_key(*dir))
            .map(str::to_string)
            .collect();
        for dir in missing {
            self.entries
                .insert(dir.clone(), ZipEntry::synthetic_directory(&dir));
        }
    }
}

/// A ZIP archive whose directory is read on first access.
#[derive(Debug)]
pub struct ZipArchive {
    path: PathBuf,
    index: Option<Index>,
}

impl ZipArchive {
    /// Bind to `path`. Nothing is read until the archive is first used; a
    /// missing or empty file is an empty archive that is created on flush.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            index: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the directory has been read yet.
    pub fn is_loaded(&self) -> bool {
        self.index.is_some()
    }

    fn load(&mut self) -> ZipResult<&mut Index> {
        if self.index.is_none() {
            let mut index = Index::default();
            if self.path.is_file() {
                let parser = ZipParser::new(LocalFileReader::new(&self.path)?);
                let dir = parser.read_directory()?;
                tracing::debug!(
                    path = %self.path.display(),
                    entries = dir.entries.len(),
                    recovered = dir.recovered,
                    "read archive directory"
                );
                index.comment = dir.comment;
                index.set_entries(dir.entries);
            } else {
                tracing::debug!(path = %self.path.display(), "archive does not exist yet");
            }
            self.index = Some(index);
        }

        // Populated just above
        Ok(self.index.get_or_insert_with(Index::default))
    }

    /// All visible entries (committed, not pending deletion), sorted by name.
    pub fn entries(&mut self) -> ZipResult<Vec<&ZipEntry>> {
        let index: &Index = self.load()?;
        Ok(index
            .entries
            .values()
            .filter(|e| !index.deleted.contains(&e.file_name))
            .collect())
    }

    /// Look up one visible entry.
    pub fn entry(&mut self, name: &str) -> ZipResult<Option<&ZipEntry>> {
        Ok(self.load()?.visible(name))
    }

    /// Whether `name` is a committed entry (or an implied directory).
    ///
    /// Entries still being written are not visible until flushed.
    pub fn file_exists(&mut self, name: &str) -> ZipResult<bool> {
        Ok(self.entry(name)?.is_some())
    }

    /// Decode the whole entry into memory.
    pub fn read(&mut self, name: &str) -> ZipResult<Vec<u8>> {
        let entry = match self.load()?.visible(name) {
            Some(e) if !e.synthetic => e.clone(),
            _ => return Err(ZipError::NotFound(name.to_string())),
        };
        if entry.is_directory {
            return Ok(Vec::new());
        }
        if let CompressionMethod::Unknown(method) = entry.compression_method {
            return Err(ZipError::UnsupportedCompression(method));
        }

        let parser = ZipParser::new(LocalFileReader::new(&self.path)?);
        let data_offset = parser.get_data_offset(&entry)?;
        let data_end = data_offset.checked_add(entry.compressed_size);
        if data_end.is_none_or(|end| end > parser.reader().size()) {
            return Err(ZipError::CorruptStream(format!(
                "{name}: {} bytes of data at offset {data_offset} run past the end of the archive",
                entry.compressed_size
            )));
        }
        let raw = parser.read_vec(data_offset, entry.compressed_size as usize)?;

        let data = match entry.compression_method {
            CompressionMethod::Stored => raw,
            CompressionMethod::Deflate => inflate(&raw, entry.uncompressed_size)?,
            CompressionMethod::Unknown(method) => return Err(ZipError::UnsupportedCompression(method)),
        };

        if data.len() as u64 != entry.uncompressed_size {
            return Err(ZipError::CorruptStream(format!(
                "{name}: expected {} bytes, got {}",
                entry.uncompressed_size,
                data.len()
            )));
        }
        let crc = crc32(&data);
        if crc != entry.crc32 {
            return Err(ZipError::CorruptStream(format!(
                "{name}: crc {crc:08x} does not match {:08x}",
                entry.crc32
            )));
        }

        Ok(data)
    }

    /// Start a new entry, replacing any pending entry of the same name.
    ///
    /// The data is collected with [`append`](Self::append) and only compressed
    /// and written by [`flush`](Self::flush).
    pub fn new_file(&mut self, name: &str, size_hint: usize, compress: bool) -> ZipResult<LazyHandle> {
        let index = self.load()?;
        let method = if compress {
            CompressionMethod::Deflate
        } else {
            CompressionMethod::Stored
        };

        let capacity = size_hint.div_ceil(LAZY_CHUNK) * LAZY_CHUNK;
        let generation = index.next_generation;
        index.next_generation += 1;
        let lazy = LazyEntry {
            entry: ZipEntry::new(name, method, SystemTime::now()),
            buffer: Vec::with_capacity(capacity),
            generation,
        };
        index.lazy.insert(name.to_string(), lazy);

        Ok(LazyHandle {
            name: name.to_string(),
            generation,
        })
    }

    /// Append bytes to a pending entry. Fails if the entry was deleted or
    /// restarted by another `new_file` meanwhile.
    pub fn append(&mut self, handle: &LazyHandle, data: &[u8]) -> bool {
        let Some(index) = self.index.as_mut() else {
            return false;
        };
        match index.lazy.get_mut(&handle.name) {
            Some(lazy) if lazy.generation == handle.generation => {
                lazy.append(data);
                true
            }
            _ => false,
        }
    }

    /// Mark `name` for removal on the next flush and drop any pending entry of
    /// that name. Returns whether there was anything to delete.
    pub fn delete_file(&mut self, name: &str) -> ZipResult<bool> {
        let index = self.load()?;
        let pending = index.lazy.remove(name).is_some();
        let committed = match index.visible(name) {
            Some(e) => !e.synthetic,
            None => false,
        };
        if committed {
            index.deleted.insert(name.to_string());
        }
        Ok(pending || committed)
    }

    pub fn comment(&mut self) -> ZipResult<&[u8]> {
        Ok(&self.load()?.comment)
    }

    pub fn set_comment(&mut self, comment: impl Into<Vec<u8>>) -> ZipResult<()> {
        let index = self.load()?;
        index.comment = comment.into();
        index.comment_dirty = true;
        Ok(())
    }

    /// Whether a flush would rewrite the file.
    pub fn has_pending(&self) -> bool {
        self.index.as_ref().is_some_and(Index::has_pending)
    }

    /// Commit pending changes by rebuilding the archive next to the original
    /// and atomically replacing it.
    ///
    /// Does nothing when there are no pending changes. On error both the file
    /// and the pending changes are left as they were.
    pub fn flush(&mut self) -> ZipResult<()> {
        let Some(index) = self.index.as_mut() else {
            return Ok(());
        };
        if !index.has_pending() {
            return Ok(());
        }

        let survivors: Vec<&ZipEntry> = index
            .entries
            .values()
            .filter(|e| {
                !e.synthetic
                    && !index.deleted.contains(&e.file_name)
                    && !index.lazy.contains_key(&e.file_name)
            })
            .collect();
        let pending: Vec<&LazyEntry> = index.lazy.values().collect();

        let written = writer::rebuild(&self.path, &survivors, &pending, &index.comment)?;
        tracing::debug!(
            path = %self.path.display(),
            entries = written.len(),
            added = pending.len(),
            deleted = index.deleted.len(),
            "archive flushed"
        );

        index.set_entries(written);
        index.lazy.clear();
        index.deleted.clear();
        index.comment_dirty = false;
        Ok(())
    }
}

/// Upper bound on the deflate ratio trusted when sizing the output buffer.
const MAX_PREALLOC_RATIO: u64 = 4;

fn inflate(raw: &[u8], expected: u64) -> ZipResult<Vec<u8>> {
    let capacity = expected.min(raw.len() as u64 * MAX_PREALLOC_RATIO);
    let mut out = Vec::with_capacity(capacity as usize);
    DeflateDecoder::new(raw)
        .read_to_end(&mut out)
        .map_err(|e| ZipError::CorruptStream(e.to_string()))?;
    Ok(out)
}

/// CRC-32 (ZIP polynomial) of `data`.
pub fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn archive_in(dir: &TempDir) -> ZipArchive {
        ZipArchive::open(dir.path().join("test.zip"))
    }

    fn put(archive: &mut ZipArchive, name: &str, data: &[u8], compress: bool) {
        let handle = archive.new_file(name, data.len(), compress).unwrap();
        assert!(archive.append(&handle, data));
    }

    #[test]
    fn missing_file_is_empty_archive() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        assert!(archive.entries().unwrap().is_empty());
        assert!(!archive.has_pending());
    }

    #[test]
    fn zero_length_file_is_empty_archive() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("test.zip"), b"").unwrap();
        let mut archive = archive_in(&dir);
        assert!(archive.entries().unwrap().is_empty());
    }

    #[test]
    fn pending_entries_are_invisible_until_flush() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        put(&mut archive, "a.txt", b"hello", true);

        assert!(!archive.file_exists("a.txt").unwrap());
        archive.flush().unwrap();
        assert!(archive.file_exists("a.txt").unwrap());
        assert_eq!(archive.read("a.txt").unwrap(), b"hello");
    }

    #[test]
    fn lazy_buffer_grows_in_chunks() {
        let mut lazy = LazyEntry {
            entry: ZipEntry::synthetic_directory("x/"),
            buffer: Vec::new(),
            generation: 0,
        };
        lazy.append(&[1u8; 10]);
        assert_eq!(lazy.buffer.capacity() % LAZY_CHUNK, 0);
        lazy.append(&[2u8; 2000]);
        assert_eq!(lazy.buffer.len(), 2010);
        assert!(lazy.buffer.capacity() >= 2048);
    }

    #[test]
    fn append_after_delete_fails() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        let handle = archive.new_file("gone.txt", 0, false).unwrap();
        assert!(archive.delete_file("gone.txt").unwrap());
        assert!(!archive.append(&handle, b"data"));
    }

    #[test]
    fn restarted_entry_rejects_the_older_handle() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        let first = archive.new_file("save.dat", 0, false).unwrap();
        assert!(archive.append(&first, b"AAA"));

        let second = archive.new_file("save.dat", 0, false).unwrap();
        assert_ne!(first, second);
        assert!(!archive.append(&first, b"aaa"));
        assert!(archive.append(&second, b"BBB"));
        archive.flush().unwrap();

        assert_eq!(archive.read("save.dat").unwrap(), b"BBB");
    }

    #[cfg(unix)]
    #[test]
    fn flush_keeps_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        put(&mut archive, "a.txt", b"alpha", false);
        archive.flush().unwrap();

        let path = dir.path().join("test.zip");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();

        put(&mut archive, "b.txt", b"beta", false);
        archive.flush().unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn new_file_after_delete_supersedes_deletion() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        put(&mut archive, "doc.txt", b"first", false);
        archive.flush().unwrap();

        assert!(archive.delete_file("doc.txt").unwrap());
        put(&mut archive, "doc.txt", b"second", false);
        archive.flush().unwrap();

        assert_eq!(archive.read("doc.txt").unwrap(), b"second");
    }

    #[test]
    fn deleting_unknown_name_reports_false() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        assert!(!archive.delete_file("nope").unwrap());
        assert!(!archive.has_pending());
    }

    #[test]
    fn implied_directories_are_synthesized() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        put(&mut archive, "a/b.txt", b"b", true);
        put(&mut archive, "a/c/d.txt", b"d", true);
        archive.flush().unwrap();

        let a = archive.entry("a/").unwrap().cloned().unwrap();
        assert!(a.is_directory && a.synthetic);
        assert!(archive.entry("a/c/").unwrap().unwrap().synthetic);
        assert!(matches!(archive.read("a/"), Err(ZipError::NotFound(_))));
    }

    #[test]
    fn flush_without_changes_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        put(&mut archive, "a.txt", b"alpha", true);
        archive.flush().unwrap();
        let before = std::fs::read(archive.path()).unwrap();
        let modified = std::fs::metadata(archive.path()).unwrap().modified().unwrap();

        archive.flush().unwrap();
        assert!(!archive.has_pending());
        assert_eq!(std::fs::read(archive.path()).unwrap(), before);
        assert_eq!(std::fs::metadata(archive.path()).unwrap().modified().unwrap(), modified);
    }

    #[test]
    fn failed_flush_keeps_file_and_pending_changes() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        put(&mut archive, "keep.txt", b"kept", false);
        archive.flush().unwrap();
        let before = std::fs::read(archive.path()).unwrap();

        put(&mut archive, "new.txt", b"new", false);
        // Too long for the 16-bit comment length field
        archive.set_comment(vec![b'c'; 70_000]).unwrap();
        assert!(matches!(archive.flush(), Err(ZipError::LimitExceeded(_))));

        assert_eq!(std::fs::read(archive.path()).unwrap(), before);
        assert!(archive.has_pending());
        assert!(!archive.file_exists("new.txt").unwrap());

        archive.set_comment(b"ok".to_vec()).unwrap();
        archive.flush().unwrap();
        assert_eq!(archive.read("new.txt").unwrap(), b"new");
        assert_eq!(archive.comment().unwrap(), b"ok");
    }

    #[test]
    fn deleted_entries_are_dropped_on_flush() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        put(&mut archive, "a/one.txt", b"1", false);
        put(&mut archive, "two.txt", b"2", false);
        archive.flush().unwrap();

        assert!(archive.delete_file("a/one.txt").unwrap());
        assert!(!archive.file_exists("a/one.txt").unwrap());
        archive.flush().unwrap();

        let mut reopened = ZipArchive::open(archive.path());
        let names: Vec<String> = reopened
            .entries()
            .unwrap()
            .into_iter()
            .map(|e| e.file_name.clone())
            .collect();
        assert_eq!(names, vec!["two.txt".to_string()]);
    }

    #[test]
    fn unknown_method_is_rejected() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        put(&mut archive, "x.bin", b"payload", false);
        archive.flush().unwrap();

        // Patch the method field of the central directory record (offset 10 in the CDFH)
        let path = archive.path().to_path_buf();
        let mut bytes = std::fs::read(&path).unwrap();
        let cd = bytes.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
        bytes[cd + 10] = 12;
        std::fs::write(&path, &bytes).unwrap();

        let mut reopened = ZipArchive::open(&path);
        assert!(matches!(
            reopened.read("x.bin"),
            Err(ZipError::UnsupportedCompression(12))
        ));
    }

    #[test]
    fn crc_mismatch_is_corrupt_stream() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        put(&mut archive, "x.txt", b"payload", false);
        archive.flush().unwrap();

        // Flip a data byte: local header (30) + name (5)
        let path = archive.path().to_path_buf();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[35] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let mut reopened = ZipArchive::open(&path);
        assert!(matches!(reopened.read("x.txt"), Err(ZipError::CorruptStream(_))));
    }

    #[test]
    fn size_past_end_of_file_is_corrupt_stream() {
        let dir = TempDir::new().unwrap();
        let mut archive = archive_in(&dir);
        put(&mut archive, "x.txt", b"payload", false);
        archive.flush().unwrap();

        // Central directory compressed size sits 20 bytes into the record
        let path = archive.path().to_path_buf();
        let mut bytes = std::fs::read(&path).unwrap();
        let cd = bytes.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
        bytes[cd + 20..cd + 24].copy_from_slice(&0x7FFF_FFF0u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        let mut reopened = ZipArchive::open(&path);
        assert!(matches!(reopened.read("x.txt"), Err(ZipError::CorruptStream(_))));
    }

    #[test]
    fn inflate_does_not_trust_the_declared_size() {
        let raw = {
            use flate2::write::DeflateEncoder;
            use std::io::Write;
            let mut enc = DeflateEncoder::new(Vec::new(), flate2::Compression::default());
            enc.write_all(b"short").unwrap();
            enc.finish().unwrap()
        };
        let out = inflate(&raw, u32::MAX as u64).unwrap();
        assert_eq!(out, b"short");
        assert!(out.capacity() as u64 <= raw.len() as u64 * MAX_PREALLOC_RATIO);
    }

    #[test]
    fn crc32_matches_reference_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }
}
