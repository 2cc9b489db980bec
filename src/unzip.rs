//! Archive extraction pipeline.
//!
//! One `extract` run is a sequential state machine: optional target
//! overwrite, open, then one loop iteration per entry in archive order.
//! Each iteration decodes and validates the entry name, offers it to the
//! caller's callback, and dispatches to a directory, symlink, or file
//! write; the escape guard vets every file write whose name could traverse
//! a previously extracted symlink. Cancellation is observed between
//! entries and between copy chunks, and always wins over a co-occurring
//! I/O error.

use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use zip::ZipArchive;

use crate::cancel::{CancelHandle, CancellationToken};
use crate::copy::{CopyBuffer, CopyOutcome, copy_cancellable};
use crate::error::{ArchiveError, Result};
use crate::fs::{create_symlink, ensure_dir, remove_tree};
use crate::security::{EntryContext, decode_entry_name, validate_entry_name};

type EntryCallback = Box<dyn FnMut(&mut EntryEvent<'_>) + Send>;

/// Per-operation configuration for [`Unzip`].
///
/// # Examples
///
/// ```
/// use zipyard::ExtractOptions;
///
/// let options = ExtractOptions::default()
///     .with_overwrite(true)
///     .with_on_entry(|entry| {
///         if entry.name().ends_with(".tmp") {
///             entry.skip();
///         }
///     });
/// ```
pub struct ExtractOptions {
    /// Recursively delete the target folder before extracting.
    /// Default: `false`.
    pub overwrite: bool,

    /// On Windows, materialize symlink entries as plain files holding the
    /// link target (creating real symlinks there usually needs elevated
    /// privileges). Ignored elsewhere. Default: `true`.
    pub symlink_as_file_on_windows: bool,

    on_entry: Option<EntryCallback>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            overwrite: false,
            symlink_as_file_on_windows: true,
            on_entry: None,
        }
    }
}

impl ExtractOptions {
    /// Creates options with the defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the overwrite flag.
    #[must_use]
    pub fn with_overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    /// Sets the Windows symlink-as-file policy.
    #[must_use]
    pub fn with_symlink_as_file_on_windows(mut self, as_file: bool) -> Self {
        self.symlink_as_file_on_windows = as_file;
        self
    }

    /// Installs a per-entry callback.
    ///
    /// The callback sees every entry (after name validation, before any
    /// write) and may mark it skipped.
    #[must_use]
    pub fn with_on_entry<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&mut EntryEvent<'_>) + Send + 'static,
    {
        self.on_entry = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for ExtractOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtractOptions")
            .field("overwrite", &self.overwrite)
            .field("symlink_as_file_on_windows", &self.symlink_as_file_on_windows)
            .field("on_entry", &self.on_entry.is_some())
            .finish()
    }
}

/// View of one archive entry handed to the per-entry callback.
#[derive(Debug)]
pub struct EntryEvent<'a> {
    name: &'a str,
    total_entries: usize,
    skipped: bool,
}

impl EntryEvent<'_> {
    /// The decoded, `/`-separated entry name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// Total number of entries the archive declares.
    #[must_use]
    pub fn total_entries(&self) -> usize {
        self.total_entries
    }

    /// Marks this entry to be skipped; nothing is written for it.
    pub fn skip(&mut self) {
        self.skipped = true;
    }
}

/// Streaming ZIP extractor with zip-slip protection and cooperative
/// cancellation.
///
/// Entries are read lazily, one at a time in archive order, so memory use
/// is bounded by a single entry's stream. One instance may be reused for
/// sequential operations; nothing from a finished run (including a
/// cancelled one) leaks into the next. Cancellation leaves already-written
/// entries on disk.
///
/// # Examples
///
/// ```no_run
/// use zipyard::{ExtractOptions, Unzip};
///
/// let mut unzip = Unzip::new(ExtractOptions::default());
/// unzip.extract("backup.zip", "restored")?;
/// # Ok::<(), zipyard::ArchiveError>(())
/// ```
pub struct Unzip {
    options: ExtractOptions,
    handle: CancelHandle,
}

impl Unzip {
    /// Creates an extractor with the given options.
    #[must_use]
    pub fn new(options: ExtractOptions) -> Self {
        Self {
            options,
            handle: CancelHandle::new(),
        }
    }

    /// Returns a handle that can cancel this instance's in-flight
    /// operation from another thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Extracts every entry of `archive_path` into `target`.
    ///
    /// The target folder is created if missing. Failures abort the run and
    /// leave already-written entries in place; once cancellation has been
    /// requested the result is always [`Canceled`](ArchiveError::Canceled),
    /// regardless of any I/O error it raced with.
    pub fn extract<P: AsRef<Path>, Q: AsRef<Path>>(
        &mut self,
        archive_path: P,
        target: Q,
    ) -> Result<()> {
        let token = self.handle.install_fresh();
        self.run_extract(archive_path.as_ref(), target.as_ref(), &token)
            .map_err(|err| token.wrap(err))
    }

    fn run_extract(
        &mut self,
        archive_path: &Path,
        target: &Path,
        token: &CancellationToken,
    ) -> Result<()> {
        if self.options.overwrite {
            remove_tree(target)?;
        }
        token.check()?;

        ensure_dir(target)?;
        let mut context = EntryContext::new(target)?;
        let file = File::open(archive_path)?;
        let mut archive = ZipArchive::new(file)?;
        let total = archive.len();
        let mut buffer = CopyBuffer::new();

        for index in 0..total {
            token.check()?;
            let mut entry = archive.by_index(index)?;

            let decoded = decode_entry_name(entry.name_raw());
            validate_entry_name(&decoded)?;

            if let Some(callback) = self.options.on_entry.as_mut() {
                let mut event = EntryEvent {
                    name: &decoded,
                    total_entries: total,
                    skipped: false,
                };
                callback(&mut event);
                if event.skipped {
                    continue;
                }
            }
            // The callback may have cancelled us.
            token.check()?;

            if decoded.ends_with('/') {
                ensure_dir(&context.target().join(&decoded))?;
                continue;
            }

            let out_path = context.target().join(&decoded);
            let parent = out_path
                .parent()
                .map_or_else(|| context.target().to_path_buf(), Path::to_path_buf);
            ensure_dir(&parent)?;
            if context.is_outside_root(&parent, &decoded)? {
                return Err(escape_error(&parent, &out_path, &context));
            }

            let mode = entry.unix_mode().unwrap_or(0o100_644);
            if mode & 0o170_000 == 0o120_000 && keep_symlinks(&self.options) {
                let mut payload = Vec::new();
                entry.read_to_end(&mut payload)?;
                let link_target = String::from_utf8_lossy(&payload).into_owned();
                create_symlink(&link_target, &out_path)?;
                context.record_symlink(&decoded);
                continue;
            }

            let mut output = open_output(&out_path, mode)?;
            let abort = Arc::new(AtomicBool::new(false));
            let armed = Arc::clone(&abort);
            let _sub = token.on_cancelled(move || armed.store(true, Ordering::SeqCst));
            if copy_cancellable(&mut entry, &mut output, &mut buffer, &abort)?
                == CopyOutcome::Aborted
            {
                return Err(ArchiveError::Canceled);
            }
        }

        drop(archive);
        token.check()?;
        Ok(())
    }
}

impl fmt::Debug for Unzip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Unzip")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Whether symlink entries become real symlinks on this platform under the
/// current options.
fn keep_symlinks(options: &ExtractOptions) -> bool {
    if cfg!(windows) {
        !options.symlink_as_file_on_windows
    } else {
        true
    }
}

fn escape_error(parent: &Path, out_path: &Path, context: &EntryContext) -> ArchiveError {
    // The guard just canonicalized this same path successfully.
    let real_parent = std::fs::canonicalize(parent).unwrap_or_else(|_| parent.to_path_buf());
    let leaf = out_path.file_name().map(PathBuf::from).unwrap_or_default();
    ArchiveError::ArbitraryFileWrite {
        path: real_parent.join(leaf),
        target: context.real_target().to_path_buf(),
    }
}

#[cfg(unix)]
fn open_output(path: &Path, mode: u32) -> Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let permissions = match mode & 0o777 {
        // Some producers store zeroed permission bits; an unreadable,
        // unwritable file helps nobody.
        0 => 0o644,
        bits => bits,
    };
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(permissions)
        .open(path)?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_output(path: &Path, _mode: u32) -> Result<File> {
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    Ok(file)
}
