//! Pure path resolution: a free function, not a method, so both the
//! filesystem and the file tree can share it without coupling. Walks
//! path components to collapse `.` and `..` without touching the real
//! filesystem, extended here to also join a relative path onto a
//! working directory.

/// Resolves `path` against `cwd`: absolute paths pass through unchanged
/// (after normalization); relative paths are joined onto `cwd` first.
/// `.` and `..` segments are normalised without any filesystem access.
/// The result always starts with `/` and never ends with `/` unless it
/// is the root itself.
pub fn resolve(cwd: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("{}/{}", cwd.trim_end_matches('/'), path)
    };
    normalize(&joined)
}

/// Normalises an absolute path: collapses `.` segments, resolves `..`
/// segments against what's already been walked, and drops empty segments
/// from repeated slashes.
pub fn normalize(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                stack.pop();
            }
            other => stack.push(other),
        }
    }
    if stack.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", stack.join("/"))
    }
}

/// Splits an absolute path into its parent directory path and final
/// component name. The root path has no parent.
pub fn split(path: &str) -> (Option<String>, String) {
    let normalized = normalize(path);
    if normalized == "/" {
        return (None, String::new());
    }
    match normalized.rfind('/') {
        Some(0) => (Some("/".to_string()), normalized[1..].to_string()),
        Some(i) => (Some(normalized[..i].to_string()), normalized[i + 1..].to_string()),
        None => (None, normalized),
    }
}

/// Joins a parent path and a name into a child path.
pub fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}
