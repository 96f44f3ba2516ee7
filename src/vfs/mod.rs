//! The virtual filesystem facade.
//!
//! A [`Vfs`] owns the mount tree, the archive cache and the current virtual
//! directory. Paths handed to it are normalized with [`expand_path`] and
//! routed to the mount node with the longest matching prefix.
//!
//! ```no_run
//! use zipvfs::{Config, Vfs};
//!
//! let mut vfs = Vfs::new(Config::new());
//! vfs.mount("/data", "/srv/game/data/, /srv/game/data.zip")?;
//! vfs.write_file("/data/readme.txt", b"hi")?;
//! assert_eq!(vfs.read_file("/data/readme.txt")?, b"hi");
//! # Ok::<(), zipvfs::VfsError>(())
//! ```

mod macros;
mod node;
mod path;
mod tree;

pub use macros::MacroExpander;
pub use node::{Binding, BindingKind, PATH_DIVIDER, VfsNode};
pub use path::{SEPARATOR, expand_path, split_last};
pub use tree::VfsTree;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::{ArchiveCache, DEFAULT_IDLE};
use crate::config::Config;
use crate::error::{VfsError, VfsResult};
use crate::file::{FileOps, FileStatus, OpenMode, VfsFile};
use crate::glob::{has_glob_chars, mask_matches};

/// Configuration section holding `virtual path = real paths` pairs
pub const MOUNT_SECTION: &str = "VFS.Mount";
/// Configuration section for tunables
pub const OPTIONS_SECTION: &str = "VFS.Options";
/// Option key: seconds an unused archive stays open
pub const ARCHIVE_IDLE_KEY: &str = "ArchiveIdleSeconds";

pub struct Vfs {
    config: Config,
    tree: VfsTree,
    cache: ArchiveCache,
    cwd: String,
    dir_stack: Vec<String>,
}

impl Vfs {
    /// Build the mount tree from the `[VFS.Mount]` section of `config`.
    pub fn new(config: Config) -> Self {
        let idle = config
            .get_int(OPTIONS_SECTION, ARCHIVE_IDLE_KEY)
            .and_then(|secs| u64::try_from(secs).ok())
            .map_or(DEFAULT_IDLE, Duration::from_secs);

        let mut vfs = Self {
            config,
            tree: VfsTree::new(),
            cache: ArchiveCache::new(idle),
            cwd: "/".to_string(),
            dir_stack: Vec::new(),
        };

        for (key, spec) in vfs.config.entries(MOUNT_SECTION) {
            let vpath = vfs.expand_path(&key, true);
            let mut node = vfs
                .tree
                .remove(&vpath)
                .unwrap_or_else(|| VfsNode::new(vpath.clone(), key.as_str()));
            let added = node.add_real_path(&spec, &MacroExpander::new(&vfs.config));
            if added == 0 {
                tracing::warn!(%key, %spec, "cannot mount");
            }
            if !node.is_empty() {
                vfs.tree.insert(node);
            }
        }

        tracing::debug!(nodes = vfs.tree.len(), idle_secs = idle.as_secs(), "vfs ready");
        vfs
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &ArchiveCache {
        &self.cache
    }

    pub fn tree(&self) -> &VfsTree {
        &self.tree
    }

    /// Canonical form of `path` relative to the current directory.
    pub fn expand_path(&self, path: &str, is_dir: bool) -> String {
        expand_path(&self.cwd, path, is_dir)
    }

    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    pub fn chdir(&mut self, path: &str) {
        self.cwd = self.expand_path(path, true);
        self.cache.check_up();
    }

    /// Remember the current directory.
    pub fn push_dir(&mut self) {
        self.dir_stack.push(self.cwd.clone());
    }

    /// Return to the most recently pushed directory.
    pub fn pop_dir(&mut self) -> bool {
        match self.dir_stack.pop() {
            Some(dir) => {
                self.chdir(&dir);
                true
            }
            None => false,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        let expanded = self.expand_path(path, false);
        let found = match self.tree.resolve(&expanded) {
            Some((_, "")) => true,
            Some((node, suffix)) => node.exists(suffix, &self.cache),
            None => false,
        };
        // A bare directory name, or a directory that only holds mount points
        let found = found || {
            let dir = self.expand_path(path, true);
            self.tree.get(&dir).is_some() || !self.tree.child_dirs(&dir).is_empty()
        };
        self.cache.check_up();
        found
    }

    /// List a directory. The last path component is a mask unless the path
    /// ends with `/` or names a mount point.
    pub fn find_files(&self, path: &str) -> Vec<String> {
        let dir_form = self.expand_path(path, true);
        let expanded = if !has_glob_chars(path) && self.tree.get(&dir_form).is_some() {
            dir_form
        } else {
            self.expand_path(path, false)
        };

        let (dir, mask) = split_last(&expanded);
        let mask = if mask.is_empty() { "*" } else { mask };

        let mut found = BTreeSet::new();
        for child in self.tree.child_dirs(dir) {
            if mask_matches(mask, &child[dir.len()..]) {
                found.insert(child);
            }
        }
        if let Some((node, suffix)) = self.tree.resolve(dir) {
            node.find_files(suffix, mask, &self.cache, &mut found);
        }

        self.cache.check_up();
        found.into_iter().collect()
    }

    /// Open a file. Writes go to the first binding that accepts them.
    pub fn open(&self, path: &str, mode: OpenMode) -> VfsResult<VfsFile> {
        let result = self.open_inner(path, mode);
        self.cache.check_up();
        result
    }

    fn open_inner(&self, path: &str, mode: OpenMode) -> VfsResult<VfsFile> {
        let expanded = self.expand_path(path, false);
        let (node, suffix) = match self.tree.resolve(&expanded) {
            Some((_, "")) | None => return Err(VfsError::NotFound(expanded)),
            Some(found) => found,
        };

        match node.open(suffix, mode, &self.cache) {
            Ok(backend) => {
                tracing::debug!(path = %expanded, ?mode, "opened");
                Ok(VfsFile::new(expanded, backend, self.cache.downgrade()))
            }
            Err(FileStatus::Other) => Err(VfsError::NotFound(expanded)),
            Err(status) => Err(VfsError::Status {
                path: expanded,
                status,
            }),
        }
    }

    pub fn read_file(&self, path: &str) -> VfsResult<Vec<u8>> {
        let mut file = self.open(path, OpenMode::Read)?;
        if let Some(data) = file.take_all_data() {
            return Ok(data);
        }

        let size = file.size() as usize;
        let mut data = vec![0u8; size];
        let done = file.read(&mut data);
        if done != size {
            return Err(transfer_error(&mut file, done, size));
        }
        Ok(data)
    }

    /// Write `data` as the whole content of `path`. Entries written into an
    /// archive become visible once the archive is flushed.
    pub fn write_file(&self, path: &str, data: &[u8]) -> VfsResult<()> {
        let mut file = self.open(path, OpenMode::Write)?;
        let done = file.write(data);
        if done != data.len() {
            return Err(transfer_error(&mut file, done, data.len()));
        }
        match file.status() {
            FileStatus::Ok => Ok(()),
            status => Err(VfsError::Status {
                path: file.name().to_string(),
                status,
            }),
        }
    }

    pub fn delete_file(&self, path: &str) -> VfsResult<()> {
        let expanded = self.expand_path(path, false);
        let deleted = match self.tree.resolve(&expanded) {
            Some((_, "")) | None => false,
            Some((node, suffix)) => node.delete(suffix, &self.cache),
        };
        self.cache.check_up();
        if deleted {
            Ok(())
        } else {
            Err(VfsError::NotFound(expanded))
        }
    }

    /// Native path for `path`, when it lives in a directory binding.
    pub fn real_path(&self, path: &str) -> Option<PathBuf> {
        let expanded = self.expand_path(path, false);
        let real = self
            .tree
            .resolve(&expanded)
            .and_then(|(node, suffix)| node.real_path(suffix));
        self.cache.check_up();
        real
    }

    /// Bind the comma-separated real paths in `real_paths` to `virtual_path`,
    /// creating the mount point if needed.
    pub fn mount(&mut self, virtual_path: &str, real_paths: &str) -> VfsResult<()> {
        self.cache.check_up();

        let vpath = self.expand_path(virtual_path, true);
        let mut node = self
            .tree
            .remove(&vpath)
            .unwrap_or_else(|| VfsNode::new(vpath.clone(), virtual_path));
        let added = node.add_real_path(real_paths, &MacroExpander::new(&self.config));
        if !node.is_empty() {
            self.tree.insert(node);
        }

        if added == 0 {
            tracing::warn!(%vpath, real = %real_paths, "cannot mount");
            return Err(VfsError::MountFailed {
                virtual_path: vpath,
                real: real_paths.to_string(),
            });
        }
        tracing::debug!(%vpath, real = %real_paths, added, "mounted");
        Ok(())
    }

    /// Remove one binding (matched by template or real path), or every
    /// binding when `real_path` is `None`. A mount point left without
    /// bindings disappears, along with its configuration entry.
    pub fn unmount(&mut self, virtual_path: &str, real_path: Option<&str>) -> VfsResult<()> {
        self.cache.check_up();

        let vpath = self.expand_path(virtual_path, true);
        let Some(node) = self.tree.get_mut(&vpath) else {
            return Err(VfsError::NotMounted(vpath));
        };
        if !node.remove_real_path(real_path) {
            let what = format!("{} on {vpath}", real_path.unwrap_or_default());
            return Err(VfsError::NotMounted(what));
        }

        if node.is_empty() {
            let key = node.config_key().to_string();
            self.tree.remove(&vpath);
            self.config.remove(MOUNT_SECTION, &key);
            tracing::debug!(%vpath, "mount point removed");
        }
        Ok(())
    }

    /// Current mounts as `(virtual path, real path templates)`.
    pub fn mounts(&self) -> Vec<(String, String)> {
        let mounts = self
            .tree
            .iter()
            .map(|node| (node.vpath().to_string(), node.templates()))
            .collect();
        self.cache.check_up();
        mounts
    }

    /// Write the current mount table into the configuration and save it to `path`.
    pub fn save_mounts(&mut self, path: &Path) -> VfsResult<()> {
        let result = self.write_mounts(path);
        self.cache.check_up();
        result
    }

    fn write_mounts(&mut self, path: &Path) -> VfsResult<()> {
        self.config.clear_section(MOUNT_SECTION);
        for node in self.tree.iter() {
            if !self.config.set_str(MOUNT_SECTION, node.config_key(), &node.templates()) {
                return Err(VfsError::Config(format!("cannot write section {MOUNT_SECTION}")));
            }
        }
        self.config
            .save(path)
            .map_err(|e| VfsError::Config(format!("{e:#}")))
    }

    /// Flush every archive without open writers and close the unused ones.
    pub fn sync(&self) -> bool {
        self.cache.sync()
    }
}

fn transfer_error(file: &mut VfsFile, done: usize, wanted: usize) -> VfsError {
    match file.status() {
        FileStatus::Ok => VfsError::ShortTransfer {
            path: file.name().to_string(),
            done,
            wanted,
        },
        status => VfsError::Status {
            path: file.name().to_string(),
            status,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn vfs_on(dir: &TempDir) -> Vfs {
        let mut vfs = Vfs::new(Config::new());
        vfs.mount("/data", &format!("{}/", dir.path().display())).unwrap();
        vfs
    }

    #[test]
    fn cwd_and_directory_stack() {
        let dir = TempDir::new().unwrap();
        let mut vfs = vfs_on(&dir);
        assert_eq!(vfs.cwd(), "/");

        vfs.push_dir();
        vfs.chdir("data/sub");
        assert_eq!(vfs.cwd(), "/data/sub/");
        assert_eq!(vfs.expand_path("../x.txt", false), "/data/x.txt");

        assert!(vfs.pop_dir());
        assert_eq!(vfs.cwd(), "/");
        assert!(!vfs.pop_dir());
    }

    #[test]
    fn relative_paths_resolve_against_cwd() {
        let dir = TempDir::new().unwrap();
        let mut vfs = vfs_on(&dir);
        vfs.chdir("/data");
        vfs.write_file("notes.txt", b"n").unwrap();
        assert_eq!(std::fs::read(dir.path().join("notes.txt")).unwrap(), b"n");
        assert!(vfs.exists("/data/notes.txt"));
    }

    #[test]
    fn mount_points_exist_as_directories() {
        let dir = TempDir::new().unwrap();
        let vfs = vfs_on(&dir);
        assert!(vfs.exists("/data"));
        assert!(vfs.exists("/data/"));
        assert!(vfs.exists("/"));
        assert!(!vfs.exists("/nowhere/file"));
    }

    #[test]
    fn failed_mount_leaves_no_node() {
        let mut vfs = Vfs::new(Config::new());
        let err = vfs.mount("/bad", "$(ZIPVFS_TEST_UNSET_VAR)/x/").unwrap_err();
        assert!(matches!(err, VfsError::MountFailed { .. }));
        assert!(vfs.mounts().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn filesystem_root_can_be_mounted() {
        let mut vfs = Vfs::new(Config::new());
        vfs.mount("/host", "/").unwrap();
        assert_eq!(vfs.mounts(), [("/host/".to_string(), "/".to_string())]);
        assert_eq!(vfs.real_path("/host/etc").unwrap(), Path::new("/etc"));
        assert!(vfs.find_files("/host/").iter().any(|p| p == "/host/tmp/"));
    }

    #[test]
    fn unmount_removes_empty_nodes() {
        let dir = TempDir::new().unwrap();
        let mut vfs = vfs_on(&dir);
        let real = format!("{}/", dir.path().display());

        assert!(matches!(vfs.unmount("/data", Some("/not/bound")), Err(VfsError::NotMounted(_))));
        vfs.unmount("/data", Some(&real)).unwrap();
        assert!(vfs.mounts().is_empty());
        assert!(matches!(vfs.unmount("/data", None), Err(VfsError::NotMounted(_))));
    }

    #[test]
    fn opening_a_directory_is_not_found() {
        let dir = TempDir::new().unwrap();
        let vfs = vfs_on(&dir);
        assert!(matches!(vfs.open("/data/", OpenMode::Read), Err(VfsError::NotFound(_))));
        assert!(matches!(vfs.read_file("/data/missing"), Err(VfsError::NotFound(_))));
        assert!(matches!(vfs.delete_file("/data/missing"), Err(VfsError::NotFound(_))));
    }

    #[test]
    fn queries_sweep_idle_archives() {
        let dir = TempDir::new().unwrap();
        let zip = dir.path().join("idle.zip");
        let config = Config::parse("[VFS.Options]\nArchiveIdleSeconds = 0\n").unwrap();
        let mut vfs = Vfs::new(config);
        vfs.mount("/z", &zip.display().to_string()).unwrap();

        let open_and_wait = |vfs: &Vfs| {
            vfs.cache().get(&zip);
            assert_eq!(vfs.cache().len(), 1);
            std::thread::sleep(Duration::from_millis(5));
        };

        open_and_wait(&vfs);
        assert!(vfs.real_path("/z/a.txt").is_none());
        assert!(vfs.cache().is_empty());

        open_and_wait(&vfs);
        assert_eq!(vfs.mounts().len(), 1);
        assert!(vfs.cache().is_empty());

        open_and_wait(&vfs);
        vfs.save_mounts(&dir.path().join("vfs.toml")).unwrap();
        assert!(vfs.cache().is_empty());
    }

    #[test]
    fn idle_threshold_comes_from_config() {
        let config = Config::parse("[VFS.Options]\nArchiveIdleSeconds = 2\n").unwrap();
        let vfs = Vfs::new(config);
        assert_eq!(vfs.cache().idle(), Duration::from_secs(2));
    }
}
