//! Discovery of sibling source files for package sends.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobMatcher};
use thiserror::Error;

use crate::domain::model::Language;

/// File name that marks a Python package and is never sent on its own.
pub const PACKAGE_INIT: &str = "__init__.py";

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("failed to list package directory {}", .dir.display())]
    ListDirectory {
        dir: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid source glob '{glob}'")]
    InvalidGlob {
        glob: String,
        #[source]
        source: globset::Error,
    },
}

/// Files to send for one package action: every sibling, then the entry file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagePlan {
    pub siblings: Vec<PathBuf>,
    pub entry: PathBuf,
}

impl PackagePlan {
    /// Paths in send order.
    pub fn ordered(&self) -> impl Iterator<Item = &Path> {
        self.siblings
            .iter()
            .map(PathBuf::as_path)
            .chain(std::iter::once(self.entry.as_path()))
    }

    pub fn len(&self) -> usize {
        self.siblings.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Lists the siblings of `entry` matching the language's source glob.
///
/// The order is "siblings first, entry last" with siblings sorted by file name. No dependency
/// analysis happens, so files importing each other may still arrive in the wrong order.
pub fn plan(entry: &Path, language: Language) -> Result<PackagePlan, PackageError> {
    let matcher = source_matcher(language)?;
    let dir = match entry.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let entry_name = entry.file_name();

    let listing = fs::read_dir(&dir).map_err(|source| PackageError::ListDirectory {
        dir: dir.clone(),
        source,
    })?;

    let mut siblings = Vec::new();
    for item in listing {
        let item = item.map_err(|source| PackageError::ListDirectory {
            dir: dir.clone(),
            source,
        })?;
        let is_file = item.file_type().map(|ty| ty.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        let name = item.file_name();
        if Some(name.as_os_str()) == entry_name || name == PACKAGE_INIT {
            continue;
        }
        if matcher.is_match(&name) {
            siblings.push(dir.join(&name));
        }
    }
    siblings.sort();

    tracing::debug!(dir = %dir.display(), count = siblings.len(), "package siblings");

    Ok(PackagePlan {
        siblings,
        entry: entry.to_path_buf(),
    })
}

fn source_matcher(language: Language) -> Result<GlobMatcher, PackageError> {
    let glob = language.source_glob();
    Glob::new(glob)
        .map(|glob| glob.compile_matcher())
        .map_err(|source| PackageError::InvalidGlob {
            glob: glob.to_owned(),
            source,
        })
}
