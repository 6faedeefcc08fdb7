//! Directory path text handling.
//!
//! A path is a sequence of dot-joined ASCII segments with a canonical
//! leading dot. A trailing dot marks a folder (a partial qualification that
//! matches by prefix); a path without one names a file that may store a
//! value.

/// Canonicalize to a leading dot; the empty path becomes the root folder
/// `"."`.
pub fn normalize(path: &str) -> String {
    if path.starts_with('.') {
        path.to_owned()
    } else {
        format!(".{}", path)
    }
}

/// Folders are partially qualified and never store values.
pub fn is_folder(path: &str) -> bool {
    path.ends_with('.')
}

/// Join a view prefix and an already-normalized path.
pub fn join(prefix: &str, path: &str) -> String {
    debug_assert!(path.starts_with('.'));
    format!("{}{}", prefix, path)
}

/// The exclusive upper bound of a prefix scan: the prefix with its final
/// byte incremented. Paths are ASCII, so the increment cannot overflow.
pub fn scan_end(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    if let Some(last) = end.last_mut() {
        *last += 1;
    }
    end
}
