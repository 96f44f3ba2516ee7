//! # zipvfs
//!
//! A virtual filesystem that mounts plain directories and ZIP archives under
//! one `/`-separated namespace.
//!
//! A virtual path such as `/data/maps/level1.map` is resolved against the
//! mount point with the longest matching prefix (`/data/`), then against each
//! real path bound to that mount point, in order. Real paths are directories
//! or ZIP archives; archives are opened lazily, kept in a small cache while
//! they are used and flushed back to disk once idle.
//!
//! ## Features
//!
//! - Mount directories and ZIP archives, several per mount point
//! - Read, write and delete files inside ZIP archives (STORED and DEFLATE)
//! - Recovery of archives with a damaged central directory
//! - `$(VAR)` expansion in real paths, from the environment or configuration
//! - Mount tables loaded from and saved to TOML configuration
//!
//! ## Example
//!
//! ```no_run
//! use zipvfs::{Config, Vfs};
//!
//! let config = Config::parse(
//!     r#"
//! [VFS.Mount]
//! "/data" = "$(GAME_HOME:/srv/game)/data/, $(GAME_HOME:/srv/game)/data.zip"
//! "#,
//! )?;
//! let vfs = Vfs::new(config);
//!
//! for name in vfs.find_files("/data/") {
//!     println!("{name}");
//! }
//! let level = vfs.read_file("/data/maps/level1.map")?;
//! println!("{} bytes", level.len());
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod file;
pub mod glob;
pub mod io;
pub mod vfs;
pub mod zip;

pub use cache::ArchiveCache;
pub use cli::Cli;
pub use config::Config;
pub use error::{VfsError, VfsResult, ZipError, ZipResult};
pub use file::{FileOps, FileStatus, OpenMode, VfsFile};
pub use io::{LocalFileReader, ReadAt};
pub use vfs::Vfs;
pub use zip::ZipArchive;
