//! Entry-name validation and the symlink-aware escape guard.
//!
//! Both pipelines funnel every archive member name through the structural
//! checks here. Extraction additionally carries an [`EntryContext`] per run:
//! once a symlink has been materialized inside the target tree, a later
//! entry whose name traverses through it could resolve outside the target
//! root, so those candidates get the full realpath-and-prefix check.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ArchiveError, Result};

/// Decodes raw entry-name bytes into the crate's canonical form: lossy
/// UTF-8 with backslashes normalized to forward slashes.
pub(crate) fn decode_entry_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).replace('\\', "/")
}

/// Structural validation of a decoded entry name.
///
/// Rejects names that are empty, absolute, drive-letter prefixed, or that
/// contain a `..` segment. Applied to every decoded name on extraction and
/// to every metadata path on archiving; the name must already be
/// `/`-separated (see [`decode_entry_name`]).
pub(crate) fn validate_entry_name(name: &str) -> Result<()> {
    let invalid = || ArchiveError::InvalidEntryName {
        name: name.to_string(),
    };

    if name.is_empty() || name.starts_with('/') {
        return Err(invalid());
    }
    if has_drive_prefix(name) {
        return Err(invalid());
    }
    if name.split('/').any(|segment| segment == "..") {
        return Err(invalid());
    }
    Ok(())
}

fn has_drive_prefix(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Per-extraction mutable state backing the escape guard.
///
/// Created fresh for every `extract` run and discarded at its end, so
/// symlink names recorded by one run never leak into the next.
#[derive(Debug)]
pub(crate) struct EntryContext {
    target: PathBuf,
    real_target: PathBuf,
    symlink_names: Vec<String>,
}

impl EntryContext {
    /// Resolves the target folder's real path up front; the folder must
    /// already exist.
    pub(crate) fn new(target: &Path) -> Result<Self> {
        let real_target = fs::canonicalize(target)?;
        Ok(Self {
            target: target.to_path_buf(),
            real_target,
            symlink_names: Vec::new(),
        })
    }

    /// The target folder as the caller named it.
    pub(crate) fn target(&self) -> &Path {
        &self.target
    }

    /// The target folder's resolved real path.
    pub(crate) fn real_target(&self) -> &Path {
        &self.real_target
    }

    /// Records a decoded name that was just written as a symlink, arming
    /// the guard for every later entry that mentions it.
    pub(crate) fn record_symlink(&mut self, decoded_name: &str) {
        self.symlink_names.push(decoded_name.to_string());
    }

    /// Reports whether `candidate` (an existing directory about to receive
    /// a write) resolves outside the target root.
    ///
    /// Cheap path first: when no recorded symlink name occurs as a
    /// substring of `decoded_name`, no link indirection can be in play and
    /// the candidate is inside the root by construction. Otherwise the
    /// candidate is resolved to its real path and checked component-wise
    /// against the real root.
    pub(crate) fn is_outside_root(&self, candidate: &Path, decoded_name: &str) -> Result<bool> {
        if !self.mentions_symlink(decoded_name) {
            return Ok(false);
        }
        let real = fs::canonicalize(candidate)?;
        Ok(!real.starts_with(&self.real_target))
    }

    fn mentions_symlink(&self, decoded_name: &str) -> bool {
        self.symlink_names
            .iter()
            .any(|link| decoded_name.contains(link.as_str()))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_decode_normalizes_backslashes() {
        assert_eq!(decode_entry_name(b"dir\\file.txt"), "dir/file.txt");
        assert_eq!(decode_entry_name(b"plain/file.txt"), "plain/file.txt");
    }

    #[test]
    fn test_decode_is_lossy() {
        let decoded = decode_entry_name(&[0x66, 0xFF, 0x6F]);
        assert!(decoded.contains('\u{FFFD}'));
    }

    #[test]
    fn test_validate_accepts_normal_names() {
        validate_entry_name("file.txt").unwrap();
        validate_entry_name("dir/sub/file.txt").unwrap();
        validate_entry_name("dir/").unwrap();
        validate_entry_name("..hidden").unwrap();
        validate_entry_name("a..b/c").unwrap();
    }

    #[test]
    fn test_validate_rejects_traversal_segments() {
        for name in ["../etc/passwd", "a/../b", "a/..", "..", "../", "a/../../b"] {
            let err = validate_entry_name(name).unwrap_err();
            assert!(
                matches!(err, ArchiveError::InvalidEntryName { .. }),
                "{name} should be rejected"
            );
        }
    }

    #[test]
    fn test_validate_rejects_absolute_and_drive_paths() {
        for name in ["", "/etc/passwd", "C:evil.txt", "c:/evil.txt"] {
            assert!(validate_entry_name(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_context_short_circuits_without_symlinks() {
        let temp = tempfile::TempDir::new().unwrap();
        let ctx = EntryContext::new(temp.path()).unwrap();

        // No symlinks recorded, so even a bogus candidate path is never
        // resolved.
        let outside = ctx
            .is_outside_root(&temp.path().join("missing/sub"), "missing/sub/file.txt")
            .unwrap();
        assert!(!outside);
    }

    #[cfg(unix)]
    #[test]
    fn test_context_detects_escape_through_symlink() {
        let temp = tempfile::TempDir::new().unwrap();
        let outside = temp.path().join("outside");
        let root = temp.path().join("root");
        fs::create_dir(&outside).unwrap();
        fs::create_dir(&root).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        let mut ctx = EntryContext::new(&root).unwrap();
        ctx.record_symlink("link");

        let escaped = ctx
            .is_outside_root(&root.join("link"), "link/evil.txt")
            .unwrap();
        assert!(escaped);
    }

    #[cfg(unix)]
    #[test]
    fn test_context_allows_symlink_inside_root() {
        let temp = tempfile::TempDir::new().unwrap();
        let root = temp.path().join("root");
        fs::create_dir_all(root.join("real")).unwrap();
        std::os::unix::fs::symlink("real", root.join("link")).unwrap();

        let mut ctx = EntryContext::new(&root).unwrap();
        ctx.record_symlink("link");

        let escaped = ctx
            .is_outside_root(&root.join("link"), "link/file.txt")
            .unwrap();
        assert!(!escaped);
    }

    #[test]
    fn test_context_missing_target_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = EntryContext::new(&temp.path().join("gone")).unwrap_err();
        assert!(err.is_not_found());
    }
}
