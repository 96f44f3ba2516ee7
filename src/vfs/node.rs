//! Mount points and the real directories and archives bound to them.

use std::collections::BTreeSet;
use std::fs;
use std::path::{self, Path, PathBuf};

use crate::cache::ArchiveCache;
use crate::file::{ArchiveFile, DiskFile, FileBackend, FileStatus, OpenMode};
use crate::glob::mask_matches;

use super::macros::MacroExpander;

/// Separator between real paths in a mount specification
pub const PATH_DIVIDER: char = ',';

const RECURSIVE_SUFFIX: &str = "/**";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Directory,
    Archive,
}

/// One real location behind a virtual directory.
#[derive(Debug, Clone)]
pub struct Binding {
    pub kind: BindingKind,
    /// Absolute real path (no trailing separator)
    pub path: PathBuf,
    /// Directory listings include nested files
    pub recursive: bool,
    /// The template as written in the mount specification
    pub template: String,
}

impl Binding {
    fn new(template: &str, expanded: &str) -> std::io::Result<Self> {
        let (expanded, recursive) = match expanded.strip_suffix(RECURSIVE_SUFFIX) {
            Some(dir) => (dir, true),
            None => (expanded, false),
        };
        let trailing = expanded.ends_with(['/', path::MAIN_SEPARATOR]);
        let path = path::absolute(Path::new(trim_separators(expanded)))?;

        let kind = if recursive || trailing || path.is_dir() {
            BindingKind::Directory
        } else {
            BindingKind::Archive
        };

        Ok(Self {
            kind,
            path,
            recursive,
            template: template.to_string(),
        })
    }

    fn is_dir(&self) -> bool {
        self.kind == BindingKind::Directory
    }

    fn join(&self, suffix: &str) -> PathBuf {
        if suffix.is_empty() {
            self.path.clone()
        } else {
            self.path.join(suffix)
        }
    }

    fn matches(&self, real: &str) -> bool {
        if self.template == real {
            return true;
        }
        let trimmed = real.strip_suffix(RECURSIVE_SUFFIX).unwrap_or(real);
        path::absolute(trim_separators(trimmed)).is_ok_and(|p| p == self.path)
    }

    /// Whether the archive is open or present on disk.
    fn archive_available(&self, cache: &ArchiveCache) -> bool {
        cache.contains(&self.path) || self.path.is_file()
    }
}

/// Drop trailing separators, but never the one that makes up a root such as
/// `/` or `C:\`.
fn trim_separators(mut real: &str) -> &str {
    while let Some(rest) = real.strip_suffix(['/', path::MAIN_SEPARATOR]) {
        if Path::new(real).parent().is_none() {
            break;
        }
        real = rest;
    }
    real
}

/// A virtual directory prefix bound to an ordered list of real locations.
#[derive(Debug, Clone)]
pub struct VfsNode {
    vpath: String,
    config_key: String,
    bindings: Vec<Binding>,
}

impl VfsNode {
    /// `vpath` must be canonical (see [`expand_path`](super::expand_path)).
    pub fn new(vpath: String, config_key: impl Into<String>) -> Self {
        Self {
            vpath,
            config_key: config_key.into(),
            bindings: Vec::new(),
        }
    }

    pub fn vpath(&self) -> &str {
        &self.vpath
    }

    /// Key under which this node is stored in the mount configuration.
    pub fn config_key(&self) -> &str {
        &self.config_key
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Templates joined back into a mount specification.
    pub fn templates(&self) -> String {
        self.bindings
            .iter()
            .map(|b| b.template.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Append the comma-separated real paths in `spec`. Templates that do not
    /// expand are skipped. Returns how many bindings were added.
    pub fn add_real_path(&mut self, spec: &str, expander: &MacroExpander<'_>) -> usize {
        let mut added = 0;
        for template in spec.split(PATH_DIVIDER).map(str::trim).filter(|t| !t.is_empty()) {
            let Some(expanded) = expander.expand(template) else {
                tracing::warn!(vpath = %self.vpath, %template, "cannot expand real path");
                continue;
            };
            match Binding::new(template, &expanded) {
                Ok(binding) => {
                    tracing::debug!(
                        vpath = %self.vpath,
                        real = %binding.path.display(),
                        kind = ?binding.kind,
                        recursive = binding.recursive,
                        "bound real path"
                    );
                    self.bindings.push(binding);
                    added += 1;
                }
                Err(e) => {
                    tracing::warn!(vpath = %self.vpath, %template, error = %e, "invalid real path");
                }
            }
        }
        added
    }

    /// Remove the binding whose template or expanded path equals `real`, or
    /// every binding when `real` is `None`.
    pub fn remove_real_path(&mut self, real: Option<&str>) -> bool {
        let Some(real) = real else {
            self.bindings.clear();
            return true;
        };
        match self.bindings.iter().position(|b| b.matches(real)) {
            Some(i) => {
                self.bindings.remove(i);
                true
            }
            None => false,
        }
    }

    /// Open `suffix` through the first binding that accepts it.
    pub fn open(&self, suffix: &str, mode: OpenMode, cache: &ArchiveCache) -> Result<FileBackend, FileStatus> {
        let mut status = FileStatus::Other;
        for binding in &self.bindings {
            let opened = if binding.is_dir() {
                DiskFile::open(&binding.join(suffix), mode).map(FileBackend::Disk)
            } else {
                if !mode.is_write() && !binding.archive_available(cache) {
                    continue;
                }
                ArchiveFile::open(cache, &binding.path, suffix, mode).map(FileBackend::Archive)
            };
            match opened {
                Ok(file) => return Ok(file),
                Err(e) => {
                    if status == FileStatus::Other {
                        status = e;
                    }
                }
            }
        }
        Err(status)
    }

    pub fn exists(&self, suffix: &str, cache: &ArchiveCache) -> bool {
        self.bindings.iter().any(|binding| {
            if binding.is_dir() {
                return binding.join(suffix).exists();
            }
            if !binding.archive_available(cache) {
                return false;
            }
            let archive = cache.get(&binding.path);
            let mut cached = archive.borrow_mut();
            match cached.archive().file_exists(suffix) {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!(archive = %binding.path.display(), error = %e, "cannot read archive");
                    false
                }
            }
        })
    }

    /// Delete `suffix` from the first binding that has it.
    pub fn delete(&self, suffix: &str, cache: &ArchiveCache) -> bool {
        self.bindings.iter().any(|binding| {
            if binding.is_dir() {
                return fs::remove_file(binding.join(suffix)).is_ok();
            }
            if !binding.archive_available(cache) {
                return false;
            }
            let archive = cache.get(&binding.path);
            let mut cached = archive.borrow_mut();
            cached.archive().delete_file(suffix).unwrap_or_else(|e| {
                tracing::warn!(archive = %binding.path.display(), error = %e, "cannot delete from archive");
                false
            })
        })
    }

    /// Native path of `suffix`: the first directory binding where it exists,
    /// otherwise where it would be created.
    pub fn real_path(&self, suffix: &str) -> Option<PathBuf> {
        let mut dirs = self.bindings.iter().filter(|b| b.is_dir()).map(|b| b.join(suffix));
        let first = dirs.next()?;
        if first.exists() {
            return Some(first);
        }
        Some(dirs.find(|p| p.exists()).unwrap_or(first))
    }

    /// Add the full virtual paths of everything directly below `suffix` whose
    /// name matches `mask`. Directories get a trailing `/`.
    pub fn find_files(&self, suffix: &str, mask: &str, cache: &ArchiveCache, out: &mut BTreeSet<String>) {
        let prefix = format!("{}{}", self.vpath, suffix);
        for binding in &self.bindings {
            if binding.is_dir() {
                list_dir(&binding.join(suffix), &prefix, "", mask, binding.recursive, out);
                continue;
            }
            if !binding.archive_available(cache) {
                continue;
            }

            let archive = cache.get(&binding.path);
            let mut cached = archive.borrow_mut();
            if let Err(e) = cached.flush() {
                tracing::warn!(archive = %binding.path.display(), error = %e, "flush before listing failed");
            }
            let entries = match cached.archive().entries() {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::warn!(archive = %binding.path.display(), error = %e, "cannot read archive");
                    continue;
                }
            };
            for entry in entries {
                let Some(rest) = entry.file_name.strip_prefix(suffix) else {
                    continue;
                };
                if rest.is_empty() {
                    continue;
                }
                let child = match rest.find('/') {
                    Some(i) => &rest[..=i],
                    None => rest,
                };
                if mask_matches(mask, child) {
                    out.insert(format!("{prefix}{child}"));
                }
            }
        }
    }
}

fn list_dir(dir: &Path, prefix: &str, rel: &str, mask: &str, recursive: bool, out: &mut BTreeSet<String>) {
    let Ok(read) = fs::read_dir(dir) else {
        return;
    };
    for entry in read.flatten() {
        let name = entry.file_name().to_string_lossy().into_owned();
        let path = entry.path();
        let is_dir = path.is_dir();
        let listed = if is_dir { format!("{name}/") } else { name };
        if mask_matches(mask, &listed) {
            out.insert(format!("{prefix}{rel}{listed}"));
        }
        if recursive && is_dir {
            list_dir(&path, prefix, &format!("{rel}{listed}"), mask, true, out);
        }
    }
}
