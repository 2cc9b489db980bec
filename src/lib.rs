//! Cancellable ZIP archiving and extraction with symlink handling and
//! zip-slip protection.
//!
//! `zipyard` streams filesystem trees into ZIP archives and back, one entry
//! at a time. Both pipelines observe a cooperative cancellation token at
//! every suspend point, symbolic links survive the round trip (stored as
//! symlink entries, recreated on extraction), and extraction refuses any
//! write that would land outside the target folder — including writes
//! routed through a symlinked directory the archive itself planted.
//!
//! # Examples
//!
//! ```no_run
//! use zipyard::{ExtractOptions, ZipOptions, archive_folder, extract};
//!
//! archive_folder("photos", "photos.zip", ZipOptions::default())?;
//! extract("photos.zip", "restored", ExtractOptions::default())?;
//! # Ok::<(), zipyard::ArchiveError>(())
//! ```
//!
//! For cancellation or multi-source archives, use the structs directly:
//!
//! ```no_run
//! use zipyard::{Zip, ZipOptions};
//!
//! let mut zip = Zip::new(ZipOptions::default().with_compression_level(9));
//! zip.add_file("Cargo.toml").add_folder_as("src", "source");
//!
//! let handle = zip.cancel_handle();
//! std::thread::spawn(move || handle.cancel());
//!
//! match zip.archive("backup.zip") {
//!     Err(err) if err.is_canceled() => eprintln!("canceled"),
//!     other => other?,
//! }
//! # Ok::<(), zipyard::ArchiveError>(())
//! ```

pub mod api;
pub mod cancel;
mod copy;
pub mod error;
mod fs;
mod security;
pub mod unzip;
pub mod walk;
pub mod zip;

pub use api::archive_file;
pub use api::archive_folder;
pub use api::extract;
pub use cancel::CancelHandle;
pub use cancel::CancellationToken;
pub use cancel::Subscription;
pub use error::ArchiveError;
pub use error::Result;
pub use unzip::EntryEvent;
pub use unzip::ExtractOptions;
pub use unzip::Unzip;
pub use walk::FileEntry;
pub use walk::FileKind;
pub use walk::TreeWalker;
pub use self::zip::Zip;
pub use self::zip::ZipOptions;
