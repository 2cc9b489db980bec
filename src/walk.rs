//! Directory tree walking for archive creation.
//!
//! The walker flattens a tree into the linear sequence the archiver
//! consumes: files and symlinks appear individually, directories with
//! content contribute only their descendants, and a fully-empty directory
//! collapses to a single marker entry so the archive can recreate it.

use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use walkdir::WalkDir;

use crate::error::{ArchiveError, Result};

/// Walks a directory tree depth-first in the order the OS returns entries.
///
/// Symbolic links are classified with a second stat through the link but
/// never descended; a link to a directory is reported as a single symlink
/// entry. Any unreadable node (including a dangling link) fails the whole
/// walk — there is no partial-success mode.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use zipyard::walk::TreeWalker;
///
/// let walker = TreeWalker::new(Path::new("./project"));
/// for entry in walker.walk() {
///     let entry = entry?;
///     println!("{}", entry.path.display());
/// }
/// # Ok::<(), zipyard::ArchiveError>(())
/// ```
pub struct TreeWalker<'a> {
    root: &'a Path,
}

impl<'a> TreeWalker<'a> {
    /// Creates a walker rooted at `root`.
    ///
    /// The root must be an existing directory (a symlink to one is fine,
    /// matching how the OS opens it for enumeration); anything else
    /// surfaces as the first item of [`walk`](Self::walk).
    #[must_use]
    pub fn new(root: &'a Path) -> Self {
        Self { root }
    }

    /// Returns an iterator over the flattened tree.
    ///
    /// Ordering: depth-first in OS order, with a directory's descendants
    /// yielded before any later sibling. Directories themselves only
    /// appear when empty, as a terminal marker entry.
    ///
    /// # Errors
    ///
    /// Items error when the root is missing or not a directory, or when
    /// any `readdir`/`lstat`/`readlink` on a node fails. Iteration should
    /// stop at the first error.
    pub fn walk(&self) -> impl Iterator<Item = Result<FileEntry>> + '_ {
        let precheck = match fs::metadata(self.root) {
            Ok(meta) if meta.is_dir() => None,
            Ok(_) => Some(ArchiveError::NotADirectory {
                path: self.root.to_path_buf(),
            }),
            Err(err) => Some(ArchiveError::Io(err)),
        };

        let mut last_seen: Option<PathBuf> = None;
        let entries = precheck
            .is_none()
            .then(|| {
                WalkDir::new(self.root)
                    .min_depth(1)
                    .contents_first(true)
                    .follow_links(false)
                    .into_iter()
                    .filter_map(move |entry| match entry {
                        Ok(entry) => {
                            let path = entry.path().to_path_buf();
                            // contents_first yields a directory after its
                            // descendants, so it was empty exactly when the
                            // previous yield is not inside it.
                            let emit = !entry.file_type().is_dir()
                                || last_seen
                                    .as_ref()
                                    .is_none_or(|seen| !seen.starts_with(&path));
                            last_seen = Some(path);
                            emit.then(|| build_entry(&entry))
                        }
                        Err(err) => Some(Err(walkdir_error(err))),
                    })
            })
            .into_iter()
            .flatten();

        precheck.map(Err).into_iter().chain(entries)
    }

    /// Collects the whole walk, stopping at the first error.
    pub fn collect_entries(&self) -> Result<Vec<FileEntry>> {
        self.walk().collect()
    }
}

/// One node of a flattened tree, ready to be archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Full filesystem path to the node.
    pub path: PathBuf,

    /// How the node should be represented in an archive.
    pub kind: FileKind,

    /// Modification time from `lstat`.
    pub modified: SystemTime,

    /// Permission and file-type bits from `lstat` (synthesized on
    /// platforms without Unix modes).
    pub mode: u32,
}

/// Classification of a walked node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileKind {
    /// Regular file.
    File,

    /// Directory that yielded no descendants.
    Directory,

    /// Symbolic link, never descended.
    Symlink {
        /// The link target, exactly as stored on disk.
        target: PathBuf,
        /// Whether the target resolves to a directory.
        target_is_dir: bool,
    },
}

fn build_entry(entry: &walkdir::DirEntry) -> Result<FileEntry> {
    let path = entry.path().to_path_buf();
    let meta = entry.metadata().map_err(walkdir_error)?;

    let kind = if meta.file_type().is_symlink() {
        let target = fs::read_link(&path)?;
        // The link's own status says "symlink"; whether it behaves as a
        // directory depends on a stat through the link. A dangling link
        // fails here and aborts the walk.
        let target_meta = fs::metadata(&path)?;
        FileKind::Symlink {
            target,
            target_is_dir: target_meta.is_dir(),
        }
    } else if meta.is_dir() {
        FileKind::Directory
    } else {
        FileKind::File
    };

    let modified = meta.modified()?;
    let mode = unix_mode(&meta, &kind);

    Ok(FileEntry {
        path,
        kind,
        modified,
        mode,
    })
}

fn walkdir_error(err: walkdir::Error) -> ArchiveError {
    ArchiveError::Io(
        err.into_io_error()
            .unwrap_or_else(|| io::Error::other("filesystem loop detected")),
    )
}

#[cfg(unix)]
fn unix_mode(meta: &Metadata, _kind: &FileKind) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn unix_mode(_meta: &Metadata, kind: &FileKind) -> u32 {
    match kind {
        FileKind::Directory => 0o40_755,
        FileKind::Symlink { .. } => 0o120_777,
        FileKind::File => 0o100_644,
    }
}
