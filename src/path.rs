//! Canonical sync paths.
//!
//! Every path handled by the engine is absolute, forward-slash separated,
//! starts with `/`, carries no trailing slash (except the root itself) and
//! contains no `.` or `..` segments. [`make_path`] converts arbitrary input
//! into that form; the other helpers operate on already-canonical paths.

/// Canonicalize a path for use with the sync engine.
///
/// Leading slash is added if missing, trailing slashes are stripped, `.`
/// segments are dropped and `..` segments pop their parent (never escaping
/// the root). The root is returned as `"/"`.
pub fn make_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Split a canonical path into the `(parent, name)` pair used by the
/// relational sync-state database.
///
/// The parent is the slash-joined path *without* a leading slash; the root
/// splits into `("", "")`, `/a` into `("", "a")` and `/a/b/c` into
/// `("a/b", "c")`.
pub fn split_parent_name(path: &str) -> (String, String) {
    let clean = make_path(path);
    if clean == "/" {
        return (String::new(), String::new());
    }
    let mut parts: Vec<&str> = clean.split('/').filter(|s| !s.is_empty()).collect();
    let name = parts.pop().unwrap_or_default().to_string();
    (parts.join("/"), name)
}

/// The parent key of a canonical path in relational storage: the full path
/// without the leading slash. Used to query a folder's direct children.
pub fn parent_key(path: &str) -> String {
    let clean = make_path(path);
    if clean == "/" {
        String::new()
    } else {
        clean[1..].to_string()
    }
}

/// Append a basename to a canonical directory path.
pub fn join_name(dir: &str, name: &str) -> String {
    if dir == "/" {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Whether `prefix` is a proper path-prefix of `path`.
///
/// `/a` is a proper prefix of `/a/b` but not of `/ab` and not of itself.
/// The root is a proper prefix of everything but itself.
pub fn is_proper_prefix(prefix: &str, path: &str) -> bool {
    if prefix == path {
        return false;
    }
    if prefix == "/" {
        return path.starts_with('/') && path != "/";
    }
    path.len() > prefix.len()
        && path.starts_with(prefix)
        && path.as_bytes()[prefix.len()] == b'/'
}

/// Split a canonical path into its segments, root yielding none.
pub fn segments(path: &str) -> Vec<String> {
    make_path(path)
        .split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
