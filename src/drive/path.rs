//! Path canonicalization and volume-mount rewriting
//!
//! User-facing paths are relative to the drive's configured root. Canonical
//! paths are what the store is keyed by: `/drive/root:` + root + path.

use crate::config::VolumeMount;
use crate::graph::DRIVE_ROOT;

/// Normalize a user-facing path.
///
/// Strips query and fragment, percent-decodes, collapses repeated slashes
/// and drops the trailing slash. The root normalizes to `/`.
pub fn normalize(raw: &str) -> String {
    let without_query = match raw.find(|c: char| c == '?' || c == '#') {
        Some(idx) => &raw[..idx],
        None => raw,
    };
    let decoded = match urlencoding::decode(without_query) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => without_query.to_string(),
    };

    let segments: Vec<&str> = decoded.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return "/".to_string();
    }
    format!("/{}", segments.join("/"))
}

/// Split a path into (parent, leaf) at the last separator.
///
/// A path with no segments (`/drive/root:` or a bare name) yields `(path, "")`.
pub fn split(path: &str) -> (&str, &str) {
    if path.ends_with(':') {
        return (path, "");
    }
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => (path, ""),
    }
}

/// Canonical prefix for a drive root path
pub fn root_prefix(root_path: &str) -> String {
    match normalize(root_path).as_str() {
        "/" => DRIVE_ROOT.to_string(),
        root => format!("{}{}", DRIVE_ROOT, root),
    }
}

/// Append a normalized relative path to a prefix
fn join(prefix: &str, relative: &str) -> String {
    if relative == "/" {
        prefix.to_string()
    } else {
        format!("{}{}", prefix.trim_end_matches('/'), relative)
    }
}

/// Strip `prefix` from `path` if it is a segment-aligned prefix.
///
/// Returns the remainder as a normalized relative path.
fn strip_segment_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix == "/" {
        return Some(path);
    }
    if path == prefix {
        return Some("/");
    }
    path.strip_prefix(prefix).filter(|rest| rest.starts_with('/'))
}

/// Outcome of resolving a requested path
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPath {
    /// Normalized user-facing path
    pub relative: String,
    /// Store key
    pub canonical: String,
    pub parent: String,
    pub leaf: String,
    /// Mount that rewrote the path, if any
    pub mount: Option<VolumeMount>,
}

/// Maps user-facing paths to canonical paths for one drive
#[derive(Debug, Clone)]
pub struct PathResolver {
    root_prefix: String,
    mounts: Vec<(String, String, VolumeMount)>,
}

impl PathResolver {
    pub fn new(root_path: &str, mounts: &[VolumeMount]) -> Self {
        let mounts = mounts
            .iter()
            .map(|m| (normalize(&m.target), normalize(&m.source), m.clone()))
            .collect();
        Self {
            root_prefix: root_prefix(root_path),
            mounts,
        }
    }

    /// Canonical path of the drive root
    pub fn root(&self) -> &str {
        &self.root_prefix
    }

    pub fn resolve(&self, requested: &str) -> ResolvedPath {
        let relative = normalize(requested);

        // Last matching mount wins
        let mut rewritten = relative.clone();
        let mut applied = None;
        for (target, source, mount) in &self.mounts {
            if let Some(rest) = strip_segment_prefix(&relative, target) {
                rewritten = join(source, rest);
                applied = Some(mount.clone());
            }
        }

        let canonical = join(&self.root_prefix, &rewritten);
        let (parent, leaf) = split(&canonical);
        ResolvedPath {
            parent: parent.to_string(),
            leaf: leaf.to_string(),
            canonical,
            relative,
            mount: applied,
        }
    }

    /// Canonical path back to a drive-relative path (`/` for the root)
    pub fn to_relative(&self, canonical: &str) -> String {
        let rest = strip_segment_prefix(canonical, &self.root_prefix)
            .or_else(|| strip_segment_prefix(canonical, DRIVE_ROOT))
            .unwrap_or(canonical);
        normalize(rest)
    }

    /// Map a drive-relative path under `mount.source` back to `mount.target`
    pub fn unmount(&self, relative: &str, mount: &VolumeMount) -> String {
        let source = normalize(&mount.source);
        match strip_segment_prefix(relative, &source) {
            Some(rest) => join(&normalize(&mount.target), rest),
            None => relative.to_string(),
        }
    }
}
