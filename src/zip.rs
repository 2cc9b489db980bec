//! Archive creation pipeline.
//!
//! A [`Zip`] collects registered files and folders, then `archive` expands
//! them into a linear plan (walking folders, applying the symlink policy,
//! validating and deduplicating metadata paths) and streams the plan into
//! the archive writer, checking the cancellation token between records and
//! between copy chunks.

use std::collections::HashSet;
use std::fs::{File, Metadata};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::SystemTime;

use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use crate::cancel::{CancelHandle, CancellationToken};
use crate::copy::{CopyBuffer, CopyOutcome, copy_cancellable};
use crate::error::{ArchiveError, Result};
use crate::fs::{ensure_dir, remove_tree};
use crate::security::validate_entry_name;
use crate::walk::{FileEntry, FileKind, TreeWalker};

/// Per-operation configuration for [`Zip`].
///
/// # Examples
///
/// ```
/// use zipyard::ZipOptions;
///
/// let options = ZipOptions::default()
///     .with_overwrite(true)
///     .with_compression_level(9);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ZipOptions {
    /// Recursively delete an existing node at the output path before
    /// writing. Default: `false`.
    pub overwrite: bool,

    /// Archive symlink targets instead of the links themselves; linked
    /// directories are expanded in place. Default: `false` (links are
    /// stored losslessly as symlink entries).
    pub follow_symlinks: bool,

    /// Compression level: `0` stores entries uncompressed, `1`-`9` selects
    /// increasing deflate effort, `None` uses the writer's default deflate
    /// level. Levels above 9 are rejected when `archive` runs.
    pub compression_level: Option<u8>,
}

impl ZipOptions {
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

    /// Sets the follow-symlinks flag.
    #[must_use]
    pub fn with_follow_symlinks(mut self, follow: bool) -> Self {
        self.follow_symlinks = follow;
        self
    }

    /// Sets the compression level.
    #[must_use]
    pub fn with_compression_level(mut self, level: u8) -> Self {
        self.compression_level = Some(level);
        self
    }
}

/// One registered source awaiting `archive`.
#[derive(Debug, Clone)]
struct Registration {
    source: PathBuf,
    name: Option<String>,
}

/// Streaming ZIP archiver with cooperative cancellation.
///
/// Registration does not touch the filesystem; every source is stat-ed and
/// expanded only when [`archive`](Self::archive) runs. One instance may be
/// reused for sequential operations (each run installs a fresh token), and
/// a [`CancelHandle`] taken before the run can cancel it from another
/// thread.
///
/// # Examples
///
/// ```no_run
/// use zipyard::{Zip, ZipOptions};
///
/// let mut zip = Zip::new(ZipOptions::default().with_compression_level(9));
/// zip.add_file("notes.txt");
/// zip.add_folder_as("photos", "media");
/// zip.archive("backup.zip")?;
/// # Ok::<(), zipyard::ArchiveError>(())
/// ```
pub struct Zip {
    options: ZipOptions,
    files: Vec<Registration>,
    folders: Vec<Registration>,
    handle: CancelHandle,
}

impl Zip {
    /// Creates an archiver with the given options and nothing registered.
    #[must_use]
    pub fn new(options: ZipOptions) -> Self {
        Self {
            options,
            files: Vec::new(),
            folders: Vec::new(),
            handle: CancelHandle::new(),
        }
    }

    /// Registers one file under its base name.
    pub fn add_file<P: AsRef<Path>>(&mut self, source: P) -> &mut Self {
        self.files.push(Registration {
            source: source.as_ref().to_path_buf(),
            name: None,
        });
        self
    }

    /// Registers one file under an explicit metadata path.
    pub fn add_file_as<P: AsRef<Path>, S: Into<String>>(
        &mut self,
        source: P,
        name: S,
    ) -> &mut Self {
        self.files.push(Registration {
            source: source.as_ref().to_path_buf(),
            name: Some(name.into()),
        });
        self
    }

    /// Registers a folder whose contents land at the archive root.
    pub fn add_folder<P: AsRef<Path>>(&mut self, source: P) -> &mut Self {
        self.folders.push(Registration {
            source: source.as_ref().to_path_buf(),
            name: None,
        });
        self
    }

    /// Registers a folder whose contents land under `name`.
    pub fn add_folder_as<P: AsRef<Path>, S: Into<String>>(
        &mut self,
        source: P,
        name: S,
    ) -> &mut Self {
        self.folders.push(Registration {
            source: source.as_ref().to_path_buf(),
            name: Some(name.into()),
        });
        self
    }

    /// Returns a handle that can cancel this instance's in-flight
    /// operation from another thread.
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.handle.clone()
    }

    /// Archives every registered source into `output`.
    ///
    /// Expands registrations into a validated plan, then streams it into
    /// the archive writer. A cancellation that lands while the output file
    /// is being written removes it before the operation returns
    /// [`Canceled`](ArchiveError::Canceled); one that lands during
    /// planning leaves the output path untouched. On any other failure
    /// partial output is left in place.
    pub fn archive<P: AsRef<Path>>(&mut self, output: P) -> Result<()> {
        let output = output.as_ref();
        if output.as_os_str().is_empty() {
            return Err(ArchiveError::EmptyZipPath);
        }
        if let Some(level) = self.options.compression_level
            && level > 9
        {
            return Err(ArchiveError::InvalidCompressionLevel { level });
        }

        let token = self.handle.install_fresh();
        self.run_archive(output, &token).map_err(|err| token.wrap(err))
    }

    fn run_archive(&self, output: &Path, token: &CancellationToken) -> Result<()> {
        if self.options.overwrite {
            // A stuck node fails the create below with a clearer error.
            let _ = remove_tree(output);
        }
        token.check()?;

        let mut planner = Planner::new(&self.options, token);
        for file in &self.files {
            planner.plan_registered_file(file)?;
        }
        for folder in &self.folders {
            planner.plan_registered_folder(folder)?;
        }
        let plan = planner.into_records();
        token.check()?;

        if let Some(parent) = output.parent()
            && !parent.as_os_str().is_empty()
        {
            ensure_dir(parent)?;
        }
        if std::fs::symlink_metadata(output).is_ok() {
            std::fs::remove_file(output)?;
        }
        self.write_plan(&plan, output, token)
    }

    fn write_plan(
        &self,
        plan: &[PlanRecord],
        output: &Path,
        token: &CancellationToken,
    ) -> Result<()> {
        let sink = File::create(output)?;
        // Teardown is scoped to the sink this run created: a cancel that
        // lands during planning never reaches this point and must leave
        // any pre-existing archive at the output path alone.
        self.write_records(plan, sink, token).map_err(|err| {
            if token.is_cancelled() {
                // A dropped writer still finalizes into a structurally
                // valid archive missing a suffix of its entries; removing
                // the file is the only teardown that cannot be mistaken
                // for a complete run.
                let _ = std::fs::remove_file(output);
            }
            err
        })
    }

    fn write_records(
        &self,
        plan: &[PlanRecord],
        sink: File,
        token: &CancellationToken,
    ) -> Result<()> {
        let mut writer = ZipWriter::new(sink);
        let base = self.base_options();
        let mut buffer = CopyBuffer::new();

        let abort = Arc::new(AtomicBool::new(false));
        let armed = Arc::clone(&abort);
        let _sub = token.on_cancelled(move || armed.store(true, Ordering::SeqCst));

        for record in plan {
            token.check()?;
            let options = entry_options(base, record);
            match &record.kind {
                PlanKind::Directory => {
                    writer.add_directory(format!("{}/", record.name), options)?;
                }
                PlanKind::Symlink { target } => {
                    writer.add_symlink(record.name.as_str(), target.as_str(), options)?;
                }
                PlanKind::File { source } => {
                    let mut input = File::open(source)?;
                    writer.start_file(record.name.as_str(), options)?;
                    if copy_cancellable(&mut input, &mut writer, &mut buffer, &abort)?
                        == CopyOutcome::Aborted
                    {
                        return Err(ArchiveError::Canceled);
                    }
                }
            }
        }

        token.check()?;
        writer.finish()?;
        Ok(())
    }

    fn base_options(&self) -> SimpleFileOptions {
        match self.options.compression_level {
            Some(0) => SimpleFileOptions::default().compression_method(CompressionMethod::Stored),
            level => {
                let mut options =
                    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
                if let Some(level) = level {
                    options = options.compression_level(Some(i64::from(level)));
                }
                options
            }
        }
    }
}

impl std::fmt::Debug for Zip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Zip")
            .field("options", &self.options)
            .field("files", &self.files.len())
            .field("folders", &self.folders.len())
            .finish_non_exhaustive()
    }
}

/// One unit of the write sequence, fully resolved during planning.
#[derive(Debug)]
struct PlanRecord {
    name: String,
    kind: PlanKind,
    modified: SystemTime,
    mode: u32,
}

#[derive(Debug)]
enum PlanKind {
    File { source: PathBuf },
    Directory,
    Symlink { target: String },
}

/// Expands registrations into validated, deduplicated plan records.
struct Planner<'a> {
    options: &'a ZipOptions,
    token: &'a CancellationToken,
    records: Vec<PlanRecord>,
    names: HashSet<String>,
    // Canonical directory paths currently being expanded through symlinks;
    // revisiting one means the link chain loops.
    expanding: Vec<PathBuf>,
}

impl<'a> Planner<'a> {
    fn new(options: &'a ZipOptions, token: &'a CancellationToken) -> Self {
        Self {
            options,
            token,
            records: Vec::new(),
            names: HashSet::new(),
            expanding: Vec::new(),
        }
    }

    fn into_records(self) -> Vec<PlanRecord> {
        self.records
    }

    fn push(&mut self, record: PlanRecord) -> Result<()> {
        validate_entry_name(&record.name)?;
        if !self.names.insert(record.name.clone()) {
            return Err(ArchiveError::DuplicateEntryName { name: record.name });
        }
        self.records.push(record);
        Ok(())
    }

    fn plan_registered_file(&mut self, registration: &Registration) -> Result<()> {
        self.token.check()?;
        let source = &registration.source;
        let name = match &registration.name {
            Some(name) => normalize_name(name),
            None => source
                .file_name()
                .map(|base| base.to_string_lossy().into_owned())
                .ok_or_else(|| ArchiveError::InvalidEntryName {
                    name: source.display().to_string(),
                })?,
        };

        let meta = std::fs::symlink_metadata(source)?;
        if meta.file_type().is_symlink() {
            if self.options.follow_symlinks {
                let through = std::fs::metadata(source)?;
                self.plan_through_link(source, &name, through.is_dir())
            } else {
                self.plan_symlink_record(source, name, &meta)
            }
        } else if meta.is_dir() {
            Err(ArchiveError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{} is a directory; register it with add_folder",
                    source.display()
                ),
            )))
        } else {
            self.push(PlanRecord {
                name,
                kind: PlanKind::File {
                    source: source.clone(),
                },
                modified: meta.modified()?,
                mode: node_mode(&meta),
            })
        }
    }

    fn plan_registered_folder(&mut self, registration: &Registration) -> Result<()> {
        self.token.check()?;
        let prefix = registration
            .name
            .as_deref()
            .map(normalize_name)
            .unwrap_or_default();

        let real = std::fs::canonicalize(&registration.source)?;
        self.expanding.push(real);
        let result = self.plan_folder_tree(&registration.source, &prefix);
        self.expanding.pop();
        result
    }

    fn plan_folder_tree(&mut self, root: &Path, prefix: &str) -> Result<()> {
        let walker = TreeWalker::new(root);
        let mut walked = 0usize;
        for entry in walker.walk() {
            self.token.check()?;
            let entry = entry?;
            walked += 1;
            let name = join_name(prefix, entry.path.strip_prefix(root).map_err(|_| {
                io::Error::other(format!("walked entry escaped {}", root.display()))
            })?);
            self.plan_walked(&entry, name)?;
        }

        // A fully empty folder still materializes on extraction, but only
        // when it has a name of its own to be stored under.
        if walked == 0 && !prefix.is_empty() {
            let meta = std::fs::metadata(root)?;
            self.push(PlanRecord {
                name: prefix.to_string(),
                kind: PlanKind::Directory,
                modified: meta.modified()?,
                mode: node_mode(&meta),
            })?;
        }
        Ok(())
    }

    fn plan_walked(&mut self, entry: &FileEntry, name: String) -> Result<()> {
        match &entry.kind {
            FileKind::File => self.push(PlanRecord {
                name,
                kind: PlanKind::File {
                    source: entry.path.clone(),
                },
                modified: entry.modified,
                mode: entry.mode,
            }),
            FileKind::Directory => self.push(PlanRecord {
                name,
                kind: PlanKind::Directory,
                modified: entry.modified,
                mode: entry.mode,
            }),
            FileKind::Symlink { target, target_is_dir } => {
                if self.options.follow_symlinks {
                    self.plan_through_link(&entry.path, &name, *target_is_dir)
                } else {
                    self.push(PlanRecord {
                        name,
                        kind: PlanKind::Symlink {
                            target: target.to_string_lossy().into_owned(),
                        },
                        modified: entry.modified,
                        mode: entry.mode,
                    })
                }
            }
        }
    }

    fn plan_symlink_record(&mut self, source: &Path, name: String, meta: &Metadata) -> Result<()> {
        let target = std::fs::read_link(source)?;
        self.push(PlanRecord {
            name,
            kind: PlanKind::Symlink {
                target: target.to_string_lossy().into_owned(),
            },
            modified: meta.modified()?,
            mode: node_mode(meta),
        })
    }

    /// Plans the node a symlink points at, under the link's own name.
    fn plan_through_link(&mut self, path: &Path, name: &str, target_is_dir: bool) -> Result<()> {
        if target_is_dir {
            let real = std::fs::canonicalize(path)?;
            if self.expanding.contains(&real) {
                return Err(ArchiveError::Io(io::Error::other(format!(
                    "symlink cycle detected while following {}",
                    path.display()
                ))));
            }
            self.expanding.push(real.clone());
            let result = self.plan_folder_tree(&real, name);
            self.expanding.pop();
            result
        } else {
            let meta = std::fs::metadata(path)?;
            self.push(PlanRecord {
                name: name.to_string(),
                // Opening the link's path follows it to the target bytes.
                kind: PlanKind::File {
                    source: path.to_path_buf(),
                },
                modified: meta.modified()?,
                mode: node_mode(&meta),
            })
        }
    }
}

fn entry_options(base: SimpleFileOptions, record: &PlanRecord) -> SimpleFileOptions {
    let mut options = base.unix_permissions(record.mode & 0o777);
    if let Some(timestamp) = dos_datetime(record.modified) {
        options = options.last_modified_time(timestamp);
    }
    options
}

/// Converts an mtime into the archive's DOS timestamp; times the format
/// cannot represent (pre-1980 and far-future) yield `None` and the entry
/// keeps the writer's default timestamp.
fn dos_datetime(modified: SystemTime) -> Option<zip::DateTime> {
    let stamp = time::OffsetDateTime::from(modified);
    let year = u16::try_from(stamp.year()).ok()?;
    zip::DateTime::from_date_and_time(
        year,
        u8::from(stamp.month()),
        stamp.day(),
        stamp.hour(),
        stamp.minute(),
        stamp.second(),
    )
    .ok()
}

fn normalize_name(name: &str) -> String {
    name.replace('\\', "/").trim_end_matches('/').to_string()
}

fn join_name(prefix: &str, relative: &Path) -> String {
    let relative = relative.to_string_lossy().replace('\\', "/");
    if prefix.is_empty() {
        relative
    } else {
        format!("{prefix}/{relative}")
    }
}

#[cfg(unix)]
fn node_mode(meta: &Metadata) -> u32 {
    use std::os::unix::fs::MetadataExt;
    meta.mode()
}

#[cfg(not(unix))]
fn node_mode(meta: &Metadata) -> u32 {
    if meta.is_dir() { 0o40_755 } else { 0o100_644 }
}
