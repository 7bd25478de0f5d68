//! Path sandbox
//!
//! Confines file writes to allow-listed roots. Both the target and each root
//! are resolved to absolute form: `..` is folded lexically, then the longest
//! existing ancestor is canonicalized so symlinks cannot be used to escape.

use std::ffi::OsString;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Write refused by policy
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("Path {path} escapes allowed roots {roots:?}")]
    OutsideSandbox { path: PathBuf, roots: Vec<PathBuf> },

    #[error("Blocked {kind} action: {detail}")]
    Blocked { kind: String, detail: String },
}

#[derive(Debug, Clone)]
pub struct PathSandbox {
    roots: Vec<PathBuf>,
}

impl PathSandbox {
    pub fn new<I, P>(roots: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let roots: Vec<PathBuf> = roots.into_iter().map(|r| resolve(r.as_ref())).collect();
        debug!(?roots, "PathSandbox::new: called");
        Self { roots }
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn is_allowed(&self, path: impl AsRef<Path>) -> bool {
        self.validate(path).is_ok()
    }

    /// Resolve `path` and require it to sit under at least one root
    pub fn validate(&self, path: impl AsRef<Path>) -> Result<PathBuf, PolicyViolation> {
        let path = path.as_ref();
        let resolved = resolve(path);
        if self.roots.iter().any(|root| resolved.starts_with(root)) {
            debug!(?resolved, "PathSandbox::validate: allowed");
            Ok(resolved)
        } else {
            debug!(?resolved, "PathSandbox::validate: outside every root");
            Err(PolicyViolation::OutsideSandbox {
                path: path.to_path_buf(),
                roots: self.roots.clone(),
            })
        }
    }
}

fn resolve(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let normalized = normalize_lexically(&absolute);

    let mut existing = normalized.as_path();
    let mut missing: Vec<OsString> = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in missing.iter().rev() {
                out.push(part);
            }
            return out;
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => return normalized,
        }
    }
}

fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
