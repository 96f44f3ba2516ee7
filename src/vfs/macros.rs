//! Variable expansion in real-path templates.
//!
//! `$X` names a one-character variable and `$(NAME)` a longer one. Within
//! parentheses, `$(NAME:fallback)` supplies a literal (itself expanded) used
//! when `NAME` is not defined anywhere.

use std::env;
use std::path::MAIN_SEPARATOR;

use crate::config::Config;

/// Resolves variables against the environment, the configuration and a few
/// built-ins, in that order.
pub struct MacroExpander<'a> {
    config: &'a Config,
}

impl<'a> MacroExpander<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Expand every variable in `template`. Returns `None` if a variable has
    /// no value and no fallback, or the template is malformed.
    pub fn expand(&self, template: &str) -> Option<String> {
        let mut out = String::with_capacity(template.len());
        let mut chars = template.char_indices();

        while let Some((_, c)) = chars.next() {
            if c != '$' {
                out.push(c);
                continue;
            }

            match chars.next()? {
                (start, '(') => {
                    let mut depth = 1;
                    let mut end = None;
                    for (i, c) in chars.by_ref() {
                        match c {
                            '(' => depth += 1,
                            ')' => {
                                depth -= 1;
                                if depth == 0 {
                                    end = Some(i);
                                    break;
                                }
                            }
                            _ => {}
                        }
                    }
                    let body = &template[start + 1..end?];
                    let (name, fallback) = match body.split_once(':') {
                        Some((name, fallback)) => (name, Some(fallback)),
                        None => (body, None),
                    };
                    match self.lookup(name) {
                        Some(value) => out.push_str(&value),
                        None => out.push_str(&self.expand(fallback?)?),
                    }
                }
                (_, name) => {
                    let mut buf = [0u8; 4];
                    out.push_str(&self.lookup(name.encode_utf8(&mut buf))?);
                }
            }
        }

        Some(out)
    }

    /// Value of one variable.
    pub fn lookup(&self, name: &str) -> Option<String> {
        let valid_env_name = !name.is_empty() && !name.contains(['=', '\0']);
        if valid_env_name {
            if let Ok(value) = env::var(name) {
                return Some(value);
            }
        }

        let os_section = format!("VFS.{}", env::consts::OS);
        if let Some(value) = self.config.get_str(&os_section, name) {
            return Some(value);
        }

        if let Some(alias) = self.config.get_str("VFS.Alias", env::consts::OS) {
            if let Some(value) = self.config.get_str(&alias, name) {
                return Some(value);
            }
        }

        builtin(name)
    }
}

fn builtin(name: &str) -> Option<String> {
    match name {
        "/" => Some(MAIN_SEPARATOR.to_string()),
        "@" => {
            let exe = env::current_exe().ok()?;
            Some(exe.parent()?.to_string_lossy().into_owned())
        }
        "." => Some(env::current_dir().ok()?.to_string_lossy().into_owned()),
        _ => None,
    }
}
