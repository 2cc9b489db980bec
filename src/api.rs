//! Convenience functions composing one archiver or extractor per call.

use std::path::Path;

use crate::error::Result;
use crate::unzip::{ExtractOptions, Unzip};
use crate::zip::{Zip, ZipOptions};

/// Archives a single file into `zip_path` under its base name.
///
/// # Examples
///
/// ```no_run
/// use zipyard::{ZipOptions, archive_file};
///
/// archive_file("notes.txt", "notes.zip", ZipOptions::default())?;
/// # Ok::<(), zipyard::ArchiveError>(())
/// ```
pub fn archive_file<P: AsRef<Path>, Q: AsRef<Path>>(
    file: P,
    zip_path: Q,
    options: ZipOptions,
) -> Result<()> {
    let mut zip = Zip::new(options);
    zip.add_file(file);
    zip.archive(zip_path)
}

/// Archives a folder's contents into `zip_path`, rooted at the archive
/// top level.
///
/// # Examples
///
/// ```no_run
/// use zipyard::{ZipOptions, archive_folder};
///
/// archive_folder("photos", "photos.zip", ZipOptions::default())?;
/// # Ok::<(), zipyard::ArchiveError>(())
/// ```
pub fn archive_folder<P: AsRef<Path>, Q: AsRef<Path>>(
    folder: P,
    zip_path: Q,
    options: ZipOptions,
) -> Result<()> {
    let mut zip = Zip::new(options);
    zip.add_folder(folder);
    zip.archive(zip_path)
}

/// Extracts an archive into `target`, creating it if missing.
///
/// # Examples
///
/// ```no_run
/// use zipyard::{ExtractOptions, extract};
///
/// extract("photos.zip", "restored", ExtractOptions::default())?;
/// # Ok::<(), zipyard::ArchiveError>(())
/// ```
pub fn extract<P: AsRef<Path>, Q: AsRef<Path>>(
    zip_path: P,
    target: Q,
    options: ExtractOptions,
) -> Result<()> {
    let mut unzip = Unzip::new(options);
    unzip.extract(zip_path, target)
}
