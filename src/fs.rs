//! Filesystem helpers shared by the archive and extraction pipelines.

use std::fs;
use std::io;
use std::path::Path;

use crate::error::{ArchiveError, Result};

/// Recursively creates `path`, walking up through missing parents.
///
/// An existing directory is success. An existing symlink whose resolved
/// target is a directory is success as well, so extraction can keep
/// writing through directory links it created earlier. Any other existing
/// node is a [`NotADirectory`](ArchiveError::NotADirectory) collision.
pub(crate) fn ensure_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        // Filesystem roots always exist.
        return Ok(());
    };
    match create_dir(path) {
        Err(ArchiveError::Io(err))
            if err.kind() == io::ErrorKind::NotFound && !parent.as_os_str().is_empty() =>
        {
            ensure_dir(parent)?;
            create_dir(path)
        }
        other => other,
    }
}

fn create_dir(path: &Path) -> Result<()> {
    match fs::create_dir(path) {
        Ok(()) => Ok(()),
        // A missing parent is the caller's cue to walk up.
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(err.into()),
        Err(err) => probe_existing(path, err),
    }
}

/// The create failed on a node that already exists; accept directories and
/// symlinks resolving to directories, reject everything else.
fn probe_existing(path: &Path, create_err: io::Error) -> Result<()> {
    let Ok(meta) = fs::symlink_metadata(path) else {
        return Err(create_err.into());
    };
    if meta.file_type().is_symlink() {
        let Ok(resolved) = fs::canonicalize(path) else {
            // Dangling link; surface the original create failure.
            return Err(create_err.into());
        };
        match fs::symlink_metadata(&resolved) {
            Ok(real_meta) if real_meta.is_dir() => Ok(()),
            Ok(_) => Err(ArchiveError::NotADirectory {
                path: path.to_path_buf(),
            }),
            Err(_) => Err(create_err.into()),
        }
    } else if meta.is_dir() {
        Ok(())
    } else {
        Err(ArchiveError::NotADirectory {
            path: path.to_path_buf(),
        })
    }
}

/// Recursively deletes `target`, tolerating a missing path.
///
/// Symlinks are never followed: a linked directory is unlinked as a single
/// node, leaving its target untouched. Read-only nodes get owner write
/// permission added before the unlink. Filesystem roots are refused before
/// anything is touched.
pub(crate) fn remove_tree(target: &Path) -> Result<()> {
    if is_root_path(target) {
        return Err(ArchiveError::RootDeletionRefused {
            path: target.to_path_buf(),
        });
    }
    match remove_node(target) {
        Err(ArchiveError::Io(err)) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn remove_node(target: &Path) -> Result<()> {
    let meta = fs::symlink_metadata(target)?;
    // symlink_metadata reports a link as a symlink even when its target is
    // a directory, so this branch only recurses into real directories.
    if meta.is_dir() {
        for child in fs::read_dir(target)? {
            remove_tree(&child?.path())?;
        }
        fs::remove_dir(target)?;
    } else {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = meta.permissions().mode();
            if mode & 0o200 == 0 {
                let mut perms = meta.permissions();
                perms.set_mode(mode | 0o200);
                fs::set_permissions(target, perms)?;
            }
        }
        #[cfg(windows)]
        {
            let mut perms = meta.permissions();
            if perms.readonly() {
                perms.set_readonly(false);
                fs::set_permissions(target, perms)?;
            }
        }
        fs::remove_file(target)?;
    }
    Ok(())
}

/// Reports whether `target` names a filesystem root (`/`, `\`, or a drive
/// root on Windows).
pub(crate) fn is_root_path(target: &Path) -> bool {
    let text = target.to_string_lossy();
    if text.is_empty() {
        return false;
    }
    if text == "/" || text == "\\" {
        return true;
    }
    if cfg!(windows) {
        let bytes = text.as_bytes();
        if bytes.len() < 2 || bytes.len() > 3 {
            return false;
        }
        return bytes[0].is_ascii_alphabetic()
            && bytes[1] == b':'
            && (bytes.len() == 2 || bytes[2] == b'\\' || bytes[2] == b'/');
    }
    false
}

/// Creates a symbolic link at `link` pointing at `target`.
#[cfg(unix)]
pub(crate) fn create_symlink(target: &str, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

/// Creates a symbolic link at `link` pointing at `target`.
///
/// Windows distinguishes file links from directory links, so the target is
/// probed (relative to the link's parent) to pick the right kind; an
/// unresolvable target falls back to a file link.
#[cfg(windows)]
pub(crate) fn create_symlink(target: &str, link: &Path) -> io::Result<()> {
    use std::os::windows::fs::{symlink_dir, symlink_file};

    let target_path = Path::new(target);
    let resolved = if target_path.is_absolute() {
        target_path.to_path_buf()
    } else {
        link.parent()
            .map_or_else(|| target_path.to_path_buf(), |parent| parent.join(target_path))
    };
    if resolved.is_dir() {
        symlink_dir(target, link)
    } else {
        symlink_file(target, link)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[test]
    fn test_ensure_dir_creates_nested_chain() {
        let temp = TempDir::new().unwrap();
        let deep = temp.path().join("a/b/c/d");
        ensure_dir(&deep).unwrap();
        assert!(deep.is_dir());
    }

    #[test]
    fn test_ensure_dir_existing_is_ok() {
        let temp = TempDir::new().unwrap();
        ensure_dir(temp.path()).unwrap();
        ensure_dir(temp.path()).unwrap();
    }

    #[test]
    fn test_ensure_dir_collides_with_file() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("occupied");
        fs::write(&file, b"x").unwrap();

        let err = ensure_dir(&file).unwrap_err();
        assert!(matches!(err, ArchiveError::NotADirectory { .. }));

        // Deeper collisions fail too, on the blocking component.
        let err = ensure_dir(&file.join("below")).unwrap_err();
        assert!(matches!(
            err,
            ArchiveError::NotADirectory { .. } | ArchiveError::Io(_)
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_dir_accepts_symlink_to_dir() {
        let temp = TempDir::new().unwrap();
        let real = temp.path().join("real");
        fs::create_dir(&real).unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        ensure_dir(&link).unwrap();
        assert!(link.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_ensure_dir_rejects_symlink_to_file() {
        let temp = TempDir::new().unwrap();
        let real = temp.path().join("real.txt");
        fs::write(&real, b"x").unwrap();
        let link = temp.path().join("link");
        std::os::unix::fs::symlink(&real, &link).unwrap();

        let err = ensure_dir(&link).unwrap_err();
        assert!(matches!(err, ArchiveError::NotADirectory { .. }));
    }

    #[test]
    fn test_remove_tree_missing_target_is_ok() {
        let temp = TempDir::new().unwrap();
        remove_tree(&temp.path().join("nope")).unwrap();
    }

    #[test]
    fn test_remove_tree_deletes_recursively() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        fs::create_dir_all(root.join("sub/deeper")).unwrap();
        fs::write(root.join("sub/file.txt"), b"data").unwrap();
        fs::write(root.join("top.txt"), b"data").unwrap();

        remove_tree(&root).unwrap();
        assert!(!root.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_tree_handles_readonly_files() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let root = temp.path().join("tree");
        fs::create_dir(&root).unwrap();
        let file = root.join("readonly.txt");
        fs::write(&file, b"data").unwrap();
        fs::set_permissions(&file, fs::Permissions::from_mode(0o444)).unwrap();

        remove_tree(&root).unwrap();
        assert!(!root.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_tree_does_not_follow_symlinks() {
        let temp = TempDir::new().unwrap();
        let outside = temp.path().join("outside");
        fs::create_dir(&outside).unwrap();
        fs::write(outside.join("keep.txt"), b"kept").unwrap();

        let root = temp.path().join("tree");
        fs::create_dir(&root).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("link")).unwrap();

        remove_tree(&root).unwrap();
        assert!(!root.exists());
        assert!(outside.join("keep.txt").exists());
    }

    #[test]
    fn test_remove_tree_refuses_root() {
        let err = remove_tree(Path::new("/")).unwrap_err();
        assert!(matches!(err, ArchiveError::RootDeletionRefused { .. }));
    }

    #[test]
    fn test_is_root_path() {
        assert!(is_root_path(Path::new("/")));
        assert!(is_root_path(Path::new("\\")));
        assert!(!is_root_path(Path::new("")));
        assert!(!is_root_path(Path::new("/tmp")));
        assert!(!is_root_path(&PathBuf::from("relative/path")));
    }

    #[cfg(windows)]
    #[test]
    fn test_is_root_path_drive_letters() {
        assert!(is_root_path(Path::new("C:")));
        assert!(is_root_path(Path::new("C:\\")));
        assert!(is_root_path(Path::new("d:/")));
        assert!(!is_root_path(Path::new("C:\\temp")));
        assert!(!is_root_path(Path::new("CC:")));
    }

    #[cfg(unix)]
    #[test]
    fn test_create_symlink() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("target.txt");
        fs::write(&file, b"content").unwrap();
        let link = temp.path().join("link.txt");

        create_symlink("target.txt", &link).unwrap();
        assert_eq!(fs::read_link(&link).unwrap(), Path::new("target.txt"));
        assert_eq!(fs::read_to_string(&link).unwrap(), "content");
    }
}
