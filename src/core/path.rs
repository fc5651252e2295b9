//! Structured directory paths.
//!
//! A [`PathResolver`] is bound to a root directory and a structure table that
//! remaps logical paths (`plugins/auth`) to physical ones (`lib/auth`). The
//! longest declared logical prefix of the requested segments is substituted;
//! whatever follows it is appended verbatim.

use super::error::{Error, Result};
use indexmap::IndexMap;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

static SLUG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z0-9/-]+$").expect("slug pattern"));

/// Check that `path` is an existing directory.
///
/// When `label` is given, it prefixes the error message.
pub fn ensure_dir<'a>(path: &'a Path, label: Option<&str>) -> Result<&'a Path> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(path),
        _ => Err(Error::not_a_directory(label, path)),
    }
}

/// Return `dir/name` if it is a regular file. Errors when `dir` itself is
/// not a directory.
pub fn has_file(dir: &Path, name: &str) -> Result<Option<PathBuf>> {
    ensure_dir(dir, None)?;
    if name.is_empty() {
        return Err(Error::InvalidArgument("\"file\" is not allowed to be empty".into()));
    }
    let path = dir.join(name);
    Ok(path.is_file().then_some(path))
}

/// Resolves logical path segments under a root directory.
#[derive(Debug, Clone)]
pub struct PathResolver {
    root: PathBuf,
    structure: Arc<IndexMap<String, Vec<String>>>,
}

impl PathResolver {
    /// Build a resolver for `root`, which must be an existing directory.
    pub fn new(root: impl Into<PathBuf>, structure: &IndexMap<String, String>) -> Result<Self> {
        Self::build(None, root.into(), structure)
    }

    /// Same as [`PathResolver::new`], with `label` prefixed to a
    /// not-a-directory error.
    pub fn labeled(
        label: &str,
        root: impl Into<PathBuf>,
        structure: &IndexMap<String, String>,
    ) -> Result<Self> {
        Self::build(Some(label), root.into(), structure)
    }

    fn build(
        label: Option<&str>,
        root: PathBuf,
        structure: &IndexMap<String, String>,
    ) -> Result<Self> {
        ensure_dir(&root, label)?;

        let mut table = IndexMap::with_capacity(structure.len());
        for (key, value) in structure {
            if !SLUG.is_match(key) {
                return Err(Error::InvalidStructure(format!(
                    "\"{key}\" is not a valid logical path"
                )));
            }
            if !SLUG.is_match(value) {
                return Err(Error::InvalidStructure(format!(
                    "\"{key}\" maps to \"{value}\", which is not a valid path"
                )));
            }
            let key = key.trim_matches('/');
            let value = value.trim_matches('/');
            // An empty replacement never matches.
            if value.is_empty() {
                continue;
            }
            table.insert(
                key.to_string(),
                value.split('/').map(str::to_string).collect(),
            );
        }

        Ok(Self {
            root,
            structure: Arc::new(table),
        })
    }

    /// The root directory, verbatim.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve logical segments to a native path under the root.
    ///
    /// With no segments this is the root itself.
    pub fn resolve<S: AsRef<str>>(&self, segments: &[S]) -> Result<PathBuf> {
        let segments: Vec<&str> = segments.iter().map(AsRef::as_ref).collect();
        if let Some(bad) = segments.iter().find(|s| Path::new(s).is_absolute()) {
            return Err(Error::InvalidArgument(format!(
                "Path method only accepts relative segments (provided: \"{bad}\")"
            )));
        }

        let mut path = self.root.clone();
        for segment in self.fold(&segments) {
            for part in segment.split('/').filter(|p| !p.is_empty()) {
                path.push(part);
            }
        }
        Ok(path)
    }

    /// Substitute the longest logical prefix of `segments` found in the
    /// structure table, keeping the unmatched tail.
    fn fold(&self, segments: &[&str]) -> Vec<String> {
        let Some((last, head)) = segments.split_last() else {
            return Vec::new();
        };
        if let Some(found) = self.structure.get(&segments.join("/")) {
            return found.clone();
        }
        let mut folded = self.fold(head);
        folded.push((*last).to_string());
        folded
    }
}
