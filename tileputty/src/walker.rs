//! Tile cache traversal.
//!
//! [`TileWalker`] lazily yields every regular file below a tile cache root.
//! Traversal is fail-fast: the first unreadable entry or symbolic link ends
//! the walk with an error, after which the iterator is exhausted.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

/// Errors that abort a tile cache traversal.
#[derive(Debug, Error)]
pub enum WalkError {
    /// The root could not be resolved.
    #[error("invalid tile cache root {}: {source}", path.display())]
    InvalidRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The root exists but is not a directory.
    #[error("tile cache root {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    /// A symbolic link was found below the root.
    #[error("symbolic links are not supported in a tile cache: {}", .0.display())]
    Symlink(PathBuf),

    /// A directory or file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Lazy iterator over the files of a tile cache.
///
/// Yields absolute paths of regular files in file-name order within each
/// directory. The root itself is never yielded.
pub struct TileWalker {
    root: PathBuf,
    entries: walkdir::IntoIter,
    finished: bool,
    files_seen: usize,
}

impl TileWalker {
    /// Start walking the tile cache at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the root cannot be resolved to an absolute path
    /// or is not a directory.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, WalkError> {
        let root = std::path::absolute(root.as_ref()).map_err(|e| WalkError::InvalidRoot {
            path: root.as_ref().to_path_buf(),
            source: e,
        })?;

        let metadata = std::fs::metadata(&root).map_err(|e| WalkError::InvalidRoot {
            path: root.clone(),
            source: e,
        })?;
        if !metadata.is_dir() {
            return Err(WalkError::NotADirectory(root));
        }

        let entries = WalkDir::new(&root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter();

        Ok(Self {
            root,
            entries,
            finished: false,
            files_seen: 0,
        })
    }

    /// The absolute root being walked.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Number of files yielded so far.
    pub fn files_seen(&self) -> usize {
        self.files_seen
    }

    fn fail(&mut self, error: WalkError) -> Option<Result<PathBuf, WalkError>> {
        self.finished = true;
        Some(Err(error))
    }
}

impl Iterator for TileWalker {
    type Item = Result<PathBuf, WalkError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let entry = match self.entries.next() {
                Some(Ok(entry)) => entry,
                Some(Err(e)) => {
                    let path = e
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    return self.fail(WalkError::Io { path, source: e });
                }
                None => {
                    self.finished = true;
                    debug!(
                        root = %self.root.display(),
                        files = self.files_seen,
                        "Tile cache walk complete"
                    );
                    return None;
                }
            };

            let file_type = entry.file_type();
            if file_type.is_symlink() {
                return self.fail(WalkError::Symlink(entry.into_path()));
            }
            if file_type.is_file() {
                self.files_seen += 1;
                return Some(Ok(entry.into_path()));
            }
            // Directories are descended into; sockets and fifos are skipped.
        }
    }
}
