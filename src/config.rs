//! Sectioned key/value configuration backed by a TOML document.
//!
//! Section names are dotted paths into nested tables, so `VFS.Mount` is the
//! `[VFS.Mount]` table. Keys inside a section may contain any characters
//! (mount keys are virtual paths such as `"/data/"`).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use toml::{Table, Value};

#[derive(Debug, Clone, Default)]
pub struct Config {
    root: Table,
    path: Option<PathBuf>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration file. A missing file yields an empty configuration
    /// that [`save`](Self::save) will create.
    pub fn load(path: &Path) -> Result<Self> {
        let root = if path.exists() {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            text.parse::<Table>()
                .with_context(|| format!("failed to parse config {}", path.display()))?
        } else {
            Table::new()
        };
        Ok(Self {
            root,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn parse(text: &str) -> Result<Self> {
        let root = text.parse::<Table>().context("failed to parse config")?;
        Ok(Self { root, path: None })
    }

    /// File this configuration was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn section(&self, name: &str) -> Option<&Table> {
        name.split('.')
            .try_fold(&self.root, |table, part| table.get(part)?.as_table())
    }

    fn section_mut(&mut self, name: &str) -> Option<&mut Table> {
        let mut table = &mut self.root;
        for part in name.split('.') {
            let entry = table
                .entry(part.to_string())
                .or_insert(Value::Table(Table::new()));
            table = entry.as_table_mut()?;
        }
        Some(table)
    }

    /// String value of `key`; numbers and booleans are rendered as text.
    pub fn get_str(&self, section: &str, key: &str) -> Option<String> {
        match self.section(section)?.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Integer(i) => Some(i.to_string()),
            Value::Float(f) => Some(f.to_string()),
            Value::Boolean(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_int(&self, section: &str, key: &str) -> Option<i64> {
        match self.section(section)?.get(key)? {
            Value::Integer(i) => Some(*i),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Set `key` in `section`, creating the section as needed. Returns false
    /// if a non-table value is in the way of the section path.
    pub fn set_str(&mut self, section: &str, key: &str, value: &str) -> bool {
        match self.section_mut(section) {
            Some(table) => {
                table.insert(key.to_string(), Value::String(value.to_string()));
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, section: &str, key: &str) -> bool {
        let Some(table) = self.section(section) else {
            return false;
        };
        if !table.contains_key(key) {
            return false;
        }
        self.section_mut(section)
            .is_some_and(|t| t.remove(key).is_some())
    }

    /// Drop every key of `section`.
    pub fn clear_section(&mut self, section: &str) {
        if self.section(section).is_none() {
            return;
        }
        if let Some(table) = self.section_mut(section) {
            table.clear();
        }
    }

    /// All string-convertible entries of `section`, sorted by key.
    pub fn entries(&self, section: &str) -> Vec<(String, String)> {
        let Some(table) = self.section(section) else {
            return Vec::new();
        };
        table
            .keys()
            .filter_map(|k| Some((k.clone(), self.get_str(section, k)?)))
            .collect()
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(&self.root).context("failed to serialize config")
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = self.to_toml_string()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(path, text).with_context(|| format!("failed to write config {}", path.display()))
    }
}
