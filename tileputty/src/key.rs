//! Remote key construction.
//!
//! Maps a local file under the tile cache root to its object key:
//!
//! ```text
//! /cache/0/0/0.mvt  ──►  {dataset}/{version}/{implementation}/0/0/0.mvt
//! /cache/meta.json  ──►  {dataset}/{version}/{implementation}/meta.json
//! ```
//!
//! Keys are computed from path text only (no filesystem access), so the same
//! inputs always yield the same key and re-uploads overwrite in place.
//! Backslashes are treated as separators so that caches produced on Windows
//! map to the same keys.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::coordinates::PublishCoordinates;
use crate::metadata::{extension_of, is_tile_extension};

/// Errors that can occur while computing a remote key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KeyError {
    /// The file does not live under the tile cache root.
    #[error("{} is not under tile cache root {}", path.display(), root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },

    /// The path has no file name component.
    #[error("{} has no file name", .0.display())]
    NoFileName(PathBuf),
}

/// How file names are turned into the last key segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStyle {
    /// Keep the file name as is (`0.mvt` → `0.mvt`).
    #[default]
    Preserve,

    /// Drop the extension of tile files (`0.mvt` → `0`), keep other names.
    ///
    /// Lets tile servers address tiles as `{z}/{x}/{y}`.
    StripTileExtension,
}

/// Translates local paths under one root into keys for one publish run.
#[derive(Debug, Clone)]
pub struct KeyTranslator {
    root: PathBuf,
    root_segments: Vec<String>,
    prefix: String,
    style: KeyStyle,
}

impl KeyTranslator {
    /// Create a translator for files under `root`.
    pub fn new(root: impl Into<PathBuf>, coordinates: &PublishCoordinates) -> Self {
        let root = root.into();
        let root_segments = segments(&root);
        Self {
            root,
            root_segments,
            prefix: coordinates.prefix(),
            style: KeyStyle::default(),
        }
    }

    /// Set the file name style.
    pub fn with_style(mut self, style: KeyStyle) -> Self {
        self.style = style;
        self
    }

    /// The tile cache root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Compute the key for a file under the root.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::OutsideRoot`] if the file is not below the root
    /// (the root itself included), or [`KeyError::NoFileName`] if the path
    /// does not end in a file name.
    pub fn key_for(&self, path: &Path) -> Result<String, KeyError> {
        let file_segments = segments(path);

        let relative = file_segments
            .strip_prefix(self.root_segments.as_slice())
            .filter(|rest| !rest.is_empty())
            .ok_or_else(|| KeyError::OutsideRoot {
                path: path.to_path_buf(),
                root: self.root.clone(),
            })?;

        let (file_name, directories) = relative
            .split_last()
            .ok_or_else(|| KeyError::NoFileName(path.to_path_buf()))?;
        if file_name == ".." {
            return Err(KeyError::NoFileName(path.to_path_buf()));
        }

        let mut key = self.prefix.clone();
        for directory in directories {
            key.push('/');
            key.push_str(directory);
        }
        key.push('/');
        key.push_str(&self.object_name(file_name));
        Ok(key)
    }

    fn object_name(&self, file_name: &str) -> String {
        match self.style {
            KeyStyle::Preserve => file_name.to_string(),
            KeyStyle::StripTileExtension => {
                let extension = extension_of(Path::new(file_name));
                if is_tile_extension(&extension) {
                    file_name[..file_name.len() - extension.len()].to_string()
                } else {
                    file_name.to_string()
                }
            }
        }
    }
}

/// Compute the key for a single file.
///
/// Convenience wrapper around [`KeyTranslator`] with [`KeyStyle::Preserve`].
pub fn remote_key(
    root: &Path,
    path: &Path,
    coordinates: &PublishCoordinates,
) -> Result<String, KeyError> {
    KeyTranslator::new(root, coordinates).key_for(path)
}

/// Path of a key relative to the run prefix, or `None` for foreign keys.
///
/// Inverse of [`remote_key`]: joining the result onto the root reproduces
/// the file's path below the root.
pub fn relative_path<'a>(key: &'a str, coordinates: &PublishCoordinates) -> Option<&'a str> {
    key.strip_prefix(coordinates.prefix().as_str())?
        .strip_prefix('/')
        .filter(|rest| !rest.is_empty())
}

/// Split a path into normalized segments.
///
/// Both separators are honored, and empty or `.` segments are dropped.
fn segments(path: &Path) -> Vec<String> {
    path.to_string_lossy()
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .map(str::to_string)
        .collect()
}
