//! Prefix derivation.
//!
//! A prefix is the aggregation key of an object: its path relative to the
//! traversal root, truncated to at most `max_depth + 1` directory segments.
//! Objects sitting directly under the root share the [`ROOT_PREFIX`] key.
//! Truncation keeps the number of distinct prefixes bounded by the shape of
//! the tree above `max_depth`, whatever the number of objects below it.

/// Prefix used for objects that have no directory component.
pub const ROOT_PREFIX: &str = "ROOT";

/// Result of [`resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPrefix {
    pub prefix: String,
    /// Number of path segments below the root, file name included.
    pub depth: usize,
}

/// Derives the aggregation prefix of `path` relative to `root`.
///
/// Both `/` and `\` are accepted as separators, and empty segments are
/// ignored, so `"/data"`, `"/data/"` and `"\\data"` roots resolve alike. A
/// path outside `root` is resolved as if `root` were empty.
pub fn resolve(root: &str, path: &str, max_depth: usize) -> ResolvedPrefix {
    let segments = relative_segments(root, path);
    let depth = segments.len();

    let prefix = if depth <= 1 {
        ROOT_PREFIX.to_string()
    } else {
        let usable = (depth - 1).min(max_depth + 1);
        segments[..usable].join("/")
    };

    ResolvedPrefix { prefix, depth }
}

/// Returns the extension of the last path segment, dot included.
///
/// `"dir/archive.tar.gz"` gives `".gz"`; a segment without a dot gives `""`.
pub fn extension(path: &str) -> &str {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    match name.rfind('.') {
        Some(idx) => &name[idx..],
        None => "",
    }
}

fn relative_segments(root: &str, path: &str) -> Vec<String> {
    let root = root.replace('\\', "/");
    let path = path.replace('\\', "/");
    let root = root.trim_end_matches('/');

    let relative = match path.strip_prefix(root) {
        // Only strip on a segment boundary: "/data" is not a root of "/database".
        Some(rest) if root.is_empty() || rest.is_empty() || rest.starts_with('/') => rest,
        _ => path.as_str(),
    };

    relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(str::to_owned)
        .collect()
}
