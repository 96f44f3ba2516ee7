//! Command-line arguments of the `zipvfs` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "zipvfs")]
#[command(version)]
#[command(about = "Browse and edit directories and ZIP archives through one virtual namespace", long_about = None)]
#[command(after_help = "Examples:\n  \
  zipvfs -m /data=assets/,assets.zip ls /data/          list the merged mount point\n  \
  zipvfs -c vfs.toml cat /data/maps/level1.map | more   print a file through the mounts\n  \
  zipvfs -m /pak=game.zip put /pak/readme.txt < notes   store stdin inside an archive")]
pub struct Cli {
    /// TOML configuration holding the [VFS.Mount] table
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Extra mount, applied after the configuration (repeatable)
    #[arg(short = 'm', long = "mount", value_name = "VPATH=RPATHS")]
    pub mounts: Vec<String>,

    /// More logging on stderr (-v debug, -vv trace)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List a virtual directory; the last component may be a mask
    Ls {
        #[arg(value_name = "PATH", default_value = ".")]
        path: String,
    },

    /// Write a virtual file to stdout
    Cat {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Store a local file, or stdin, as a virtual file
    Put {
        #[arg(value_name = "PATH")]
        path: String,

        #[arg(value_name = "SRC")]
        source: Option<PathBuf>,
    },

    /// Delete a virtual file
    Rm {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Exit with status 0 if the virtual path exists, 1 otherwise
    Exists {
        #[arg(value_name = "PATH")]
        path: String,
    },

    /// Print the mount table
    Mounts,

    /// Save the mount table into a configuration file
    SaveMounts {
        /// Defaults to the file given with --config
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// List the raw entries of a ZIP archive
    ZipList {
        #[arg(value_name = "ARCHIVE")]
        archive: PathBuf,

        /// Show sizes, compression ratio and modification time
        #[arg(short = 'v')]
        verbose: bool,
    },
}

impl Cli {
    /// Split each `--mount` argument into its virtual and real parts.
    pub fn mount_pairs(&self) -> Result<Vec<(&str, &str)>, String> {
        self.mounts
            .iter()
            .map(|m| {
                m.split_once('=')
                    .map(|(vpath, rpaths)| (vpath.trim(), rpaths.trim()))
                    .ok_or_else(|| format!("expected VPATH=RPATHS, got `{m}`"))
            })
            .collect()
    }

    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_and_subcommand() {
        let cli = Cli::parse_from([
            "zipvfs", "-c", "vfs.toml", "-m", "/a=x/", "--mount", "/b = y.zip, z/", "-vv", "ls",
            "/a/*.txt",
        ]);
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("vfs.toml")));
        assert_eq!(cli.mount_pairs().unwrap(), [("/a", "x/"), ("/b", "y.zip, z/")]);
        assert_eq!(cli.log_level(), tracing::Level::TRACE);
        assert!(matches!(cli.command, Command::Ls { ref path } if path == "/a/*.txt"));
    }

    #[test]
    fn ls_defaults_to_current_directory() {
        let cli = Cli::parse_from(["zipvfs", "ls"]);
        assert!(matches!(cli.command, Command::Ls { ref path } if path == "."));
        assert_eq!(cli.log_level(), tracing::Level::WARN);
    }

    #[test]
    fn malformed_mount_is_reported() {
        let cli = Cli::parse_from(["zipvfs", "-m", "/a", "mounts"]);
        assert!(cli.mount_pairs().is_err());
    }

    #[test]
    fn zip_list_takes_its_own_verbose_flag() {
        let cli = Cli::parse_from(["zipvfs", "zip-list", "a.zip", "-v"]);
        assert!(matches!(cli.command, Command::ZipList { verbose: true, .. }));
        assert_eq!(cli.verbose, 0);
    }
}
