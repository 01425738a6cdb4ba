//! Relative path helpers.
//!
//! Paths inside the virtualization root are kept slash-separated with no
//! leading or trailing separator; the root itself is the empty string.

/// Normalize a relative path.
///
/// # Arguments
/// * `path` - Path as received from the native layer or a content source
///
/// # Returns
/// Path with `/` separators, empty components removed.
pub fn normalize(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|component| !component.is_empty())
        .collect::<Vec<&str>>()
        .join("/")
}

/// Split a normalized path into parent directory and leaf name.
///
/// # Returns
/// `("", path)` for entries directly under the root.
pub fn split_parent(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Parent directory of a normalized path, `None` when the parent is the root.
pub fn parent(path: &str) -> Option<&str> {
    let (parent, _) = split_parent(path);
    if parent.is_empty() {
        None
    } else {
        Some(parent)
    }
}

/// Join a directory path and a child name.
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// Check that a path cannot climb out of the root.
pub fn is_contained(path: &str) -> bool {
    path.split(['/', '\\']).all(|component| component != "..")
}
