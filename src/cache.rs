//! Open archives shared between file handles.
//!
//! Every handle on an archive entry holds an [`ArchiveRef`] guard. Once the
//! last guard is gone the archive stays open until it has been idle for longer
//! than the configured threshold, so quick close/reopen cycles reuse the
//! parsed directory. Eviction is cooperative: nothing happens until
//! [`ArchiveCache::check_up`] runs.

use std::cell::{RefCell, RefMut};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};
use std::time::{Duration, Instant};

use crate::error::ZipResult;
use crate::zip::ZipArchive;

/// Idle time after which an unreferenced archive is closed.
pub const DEFAULT_IDLE: Duration = Duration::from_secs(10);

/// A [`ZipArchive`] plus the bookkeeping the cache needs.
#[derive(Debug)]
pub struct CachedArchive {
    archive: ZipArchive,
    last_use: Instant,
    ref_count: usize,
    writing: usize,
}

impl CachedArchive {
    fn new(path: &Path) -> Self {
        Self {
            archive: ZipArchive::open(path),
            last_use: Instant::now(),
            ref_count: 0,
            writing: 0,
        }
    }

    pub fn archive(&mut self) -> &mut ZipArchive {
        &mut self.archive
    }

    pub fn ref_count(&self) -> usize {
        self.ref_count
    }

    /// Number of handles currently writing into this archive.
    pub fn writing(&self) -> usize {
        self.writing
    }

    pub fn last_use(&self) -> Instant {
        self.last_use
    }

    fn touch(&mut self) {
        self.last_use = Instant::now();
    }

    /// Flush pending changes unless a handle is still writing.
    pub fn flush(&mut self) -> ZipResult<()> {
        if self.writing > 0 {
            tracing::debug!(
                path = %self.archive.path().display(),
                writers = self.writing,
                "flush deferred, archive has open writers"
            );
            return Ok(());
        }
        self.archive.flush()
    }
}

impl Drop for CachedArchive {
    fn drop(&mut self) {
        if let Err(e) = self.archive.flush() {
            tracing::warn!(
                path = %self.archive.path().display(),
                error = %e,
                "failed to flush archive on close"
            );
        }
    }
}

/// Scope-bound reference to a cached archive.
///
/// Holding one keeps the archive from being evicted; dropping it restarts the
/// idle clock.
#[derive(Debug)]
pub struct ArchiveRef {
    archive: Rc<RefCell<CachedArchive>>,
    writer: bool,
}

impl ArchiveRef {
    fn new(archive: Rc<RefCell<CachedArchive>>, writer: bool) -> Self {
        {
            let mut cached = archive.borrow_mut();
            cached.ref_count += 1;
            if writer {
                cached.writing += 1;
            }
            cached.touch();
        }
        Self { archive, writer }
    }

    pub fn borrow_mut(&self) -> RefMut<'_, CachedArchive> {
        self.archive.borrow_mut()
    }

    pub fn is_writer(&self) -> bool {
        self.writer
    }
}

impl Drop for ArchiveRef {
    fn drop(&mut self) {
        let mut cached = self.archive.borrow_mut();
        cached.ref_count -= 1;
        if self.writer {
            cached.writing -= 1;
        }
        cached.touch();
    }
}

#[derive(Debug)]
struct CacheState {
    archives: BTreeMap<PathBuf, Rc<RefCell<CachedArchive>>>,
    idle: Duration,
}

/// The set of open archives, keyed by real path.
///
/// Cloning yields another handle to the same cache.
#[derive(Debug, Clone)]
pub struct ArchiveCache {
    state: Rc<RefCell<CacheState>>,
}

impl Default for ArchiveCache {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE)
    }
}

impl ArchiveCache {
    pub fn new(idle: Duration) -> Self {
        Self {
            state: Rc::new(RefCell::new(CacheState {
                archives: BTreeMap::new(),
                idle,
            })),
        }
    }

    pub fn idle(&self) -> Duration {
        self.state.borrow().idle
    }

    /// Look up the archive at `path`, opening it on a miss.
    pub fn get(&self, path: &Path) -> Rc<RefCell<CachedArchive>> {
        let mut state = self.state.borrow_mut();
        let archive = state
            .archives
            .entry(path.to_path_buf())
            .or_insert_with(|| {
                tracing::debug!(path = %path.display(), "opening archive");
                Rc::new(RefCell::new(CachedArchive::new(path)))
            })
            .clone();
        archive.borrow_mut().touch();
        archive
    }

    /// Take a reference on the archive at `path`.
    pub fn acquire(&self, path: &Path) -> ArchiveRef {
        ArchiveRef::new(self.get(path), false)
    }

    /// Take a reference that also counts as an open writer.
    pub fn acquire_writer(&self, path: &Path) -> ArchiveRef {
        ArchiveRef::new(self.get(path), true)
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.state.borrow().archives.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.state.borrow().archives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict archives that are unreferenced and idle for longer than the threshold.
    pub fn check_up(&self) -> usize {
        self.check_up_at(Instant::now())
    }

    /// [`check_up`](Self::check_up) against an explicit clock reading.
    pub fn check_up_at(&self, now: Instant) -> usize {
        let evicted = {
            let mut state = self.state.borrow_mut();
            let idle = state.idle;
            let expired: Vec<PathBuf> = state
                .archives
                .iter()
                .filter(|(_, a)| {
                    let a = a.borrow();
                    a.ref_count == 0 && now.saturating_duration_since(a.last_use) > idle
                })
                .map(|(p, _)| p.clone())
                .collect();

            expired
                .into_iter()
                .filter_map(|p| state.archives.remove_entry(&p))
                .collect::<Vec<_>>()
        };

        // Dropped outside the borrow; each drop flushes
        let count = evicted.len();
        for (path, archive) in evicted {
            tracing::debug!(path = %path.display(), "evicting idle archive");
            drop(archive);
        }
        count
    }

    /// Flush every archive without open writers, then close every archive
    /// without references. Returns false if any flush failed.
    pub fn sync(&self) -> bool {
        let archives: Vec<_> = self.state.borrow().archives.values().cloned().collect();

        let mut ok = true;
        for archive in &archives {
            let mut cached = archive.borrow_mut();
            if let Err(e) = cached.flush() {
                tracing::warn!(
                    path = %cached.archive.path().display(),
                    error = %e,
                    "failed to flush archive"
                );
                ok = false;
            }
        }
        drop(archives);

        let closed: Vec<_> = {
            let mut state = self.state.borrow_mut();
            let unused: Vec<PathBuf> = state
                .archives
                .iter()
                .filter(|(_, a)| a.borrow().ref_count == 0)
                .map(|(p, _)| p.clone())
                .collect();
            unused
                .into_iter()
                .filter_map(|p| state.archives.remove(&p))
                .collect()
        };
        drop(closed);

        ok
    }

    /// A handle that does not keep the cache alive.
    pub fn downgrade(&self) -> WeakCache {
        WeakCache {
            state: Rc::downgrade(&self.state),
        }
    }
}

/// Non-owning cache handle carried by open files.
#[derive(Debug, Clone, Default)]
pub struct WeakCache {
    state: Weak<RefCell<CacheState>>,
}

impl WeakCache {
    /// Run an eviction sweep if the cache is still alive and not in use.
    pub fn check_up(&self) {
        let Some(state) = self.state.upgrade() else {
            return;
        };
        if state.try_borrow_mut().is_err() {
            return;
        }
        ArchiveCache { state }.check_up();
    }
}
