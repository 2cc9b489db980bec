//! Error types for archive and extraction operations.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using `ArchiveError`.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Errors that can occur while building or extracting an archive.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// The operation was cancelled through its cancellation token.
    #[error("operation canceled")]
    Canceled,

    /// I/O operation failed.
    ///
    /// Missing sources and archives surface here with the OS not-found
    /// kind preserved, as do permission and unlink/symlink failures.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive is corrupted, truncated, or otherwise unreadable.
    #[error("invalid archive: {0}")]
    InvalidArchive(#[from] zip::result::ZipError),

    /// A path exists but is not the directory the operation needs.
    #[error("{path} exists and is not a directory")]
    NotADirectory {
        /// The colliding path.
        path: PathBuf,
    },

    /// An entry name failed structural validation.
    ///
    /// Rejected names are empty, absolute, drive-letter prefixed, or
    /// contain a `..` segment.
    #[error("invalid entry name: {name:?}")]
    InvalidEntryName {
        /// The offending decoded name.
        name: String,
    },

    /// Two registered records resolved to the same entry name.
    #[error("duplicate entry name: {name:?}")]
    DuplicateEntryName {
        /// The name registered twice.
        name: String,
    },

    /// Writing the entry would land outside the extraction target.
    #[error("refusing to write {path} outside extraction target {target}")]
    ArbitraryFileWrite {
        /// The real (resolved) path the write would have hit.
        path: PathBuf,
        /// The resolved extraction target root.
        target: PathBuf,
    },

    /// Compression level outside the supported `0..=9` range.
    #[error("invalid compression level: {level} (expected 0 for store, 1-9 for deflate)")]
    InvalidCompressionLevel {
        /// The rejected level.
        level: u8,
    },

    /// Recursive deletion of a filesystem root was requested.
    #[error("refusing to recursively delete root path {path}")]
    RootDeletionRefused {
        /// The refused path.
        path: PathBuf,
    },

    /// `archive` was called with an empty output path.
    #[error("zip path must not be empty")]
    EmptyZipPath,
}

impl ArchiveError {
    /// Returns `true` if this error represents a cancelled operation.
    ///
    /// # Examples
    ///
    /// ```
    /// use zipyard::ArchiveError;
    ///
    /// assert!(ArchiveError::Canceled.is_canceled());
    /// assert!(!ArchiveError::EmptyZipPath.is_canceled());
    /// ```
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }

    /// Returns `true` if this error represents a security violation.
    ///
    /// Security violations include:
    /// - Structurally invalid entry names (traversal segments, absolute
    ///   paths, drive-letter prefixes)
    /// - Duplicate entry names
    /// - Writes that would escape the extraction target
    ///
    /// # Examples
    ///
    /// ```
    /// use zipyard::ArchiveError;
    ///
    /// let err = ArchiveError::InvalidEntryName {
    ///     name: "../etc/passwd".to_string(),
    /// };
    /// assert!(err.is_security_violation());
    ///
    /// assert!(!ArchiveError::Canceled.is_security_violation());
    /// ```
    #[must_use]
    pub const fn is_security_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidEntryName { .. }
                | Self::DuplicateEntryName { .. }
                | Self::ArbitraryFileWrite { .. }
        )
    }

    /// Returns `true` if this error stems from a missing file or folder.
    ///
    /// Covers the OS not-found kind through both the direct I/O variant and
    /// the archive backend's own wrapped I/O errors.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Io(err) => err.kind() == std::io::ErrorKind::NotFound,
            Self::InvalidArchive(zip::result::ZipError::Io(err)) => {
                err.kind() == std::io::ErrorKind::NotFound
            }
            Self::InvalidArchive(zip::result::ZipError::FileNotFound) => true,
            _ => false,
        }
    }
}
