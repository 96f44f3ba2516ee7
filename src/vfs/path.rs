//! Canonical virtual paths.
//!
//! A canonical path is absolute, uses `/` only, has no empty, `.` or `..`
//! segments, and ends with `/` when it names a directory.

/// Separator used in virtual paths on every platform.
pub const SEPARATOR: char = '/';

/// Normalize `path` against the current virtual directory `cwd`.
///
/// - relative paths are joined onto `cwd`
/// - `.` is dropped and `..` removes the previous segment, never going above `/`
/// - `~` discards everything before it and restarts at `/~/`
/// - repeated separators collapse
///
/// The result ends with `/` if `is_dir` is set or `path` itself ended with one.
pub fn expand_path(cwd: &str, path: &str, is_dir: bool) -> String {
    let mut segments: Vec<&str> = Vec::new();
    if !path.starts_with(SEPARATOR) {
        segments.extend(cwd.split(SEPARATOR).filter(|s| !s.is_empty()));
    }

    for part in path.split(SEPARATOR) {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            "~" => {
                segments.clear();
                segments.push("~");
            }
            name => segments.push(name),
        }
    }

    let mut out = String::with_capacity(path.len() + cwd.len() + 2);
    out.push(SEPARATOR);
    out.push_str(&segments.join("/"));

    let trailing = is_dir || path.ends_with(SEPARATOR) || path.is_empty();
    if !segments.is_empty() && trailing {
        out.push(SEPARATOR);
    }
    out
}

/// Split a canonical path into its directory part (with trailing `/`) and
/// final component.
pub fn split_last(path: &str) -> (&str, &str) {
    match path.rfind(SEPARATOR) {
        Some(i) => path.split_at(i + 1),
        None => ("", path),
    }
}
