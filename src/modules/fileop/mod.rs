// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

//! Low-level filesystem primitives shared by the message store, the filter
//! chain's copy filter, and file delivery. Every spool state transition is
//! ultimately one of the functions in this module; keeping them in one place
//! means the atomic-rename discipline the spool depends on is implemented
//! exactly once.

use std::path::Path;

/// Same-directory atomic rename. The spool's entire locking discipline rests
/// on this being atomic at the filesystem level (POSIX `rename(2)`).
pub fn rename(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::rename(src, dst)
}

/// Rename that is allowed to replace an existing destination file. Used by
/// the msgid filter's atomic content rewrite and by in-place envelope
/// rewrites; `std::fs::rename` already has these semantics on Unix, this
/// alias documents the intent at call sites.
pub fn rename_onto(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::rename(src, dst)
}

/// Best-effort unlink: a missing file is not an error.
pub fn remove(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Byte-wise copy, preserving nothing but the content.
pub fn copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::copy(src, dst)?;
    Ok(())
}

/// Attempts a hard link; falls back to a byte-wise copy on any failure
/// (notably cross-device `EXDEV`). On a successful hard link, if the
/// destination directory has the set-group-id bit, the linked file's group
/// ownership is aligned to the directory's group (Unix, best effort).
pub fn hardlink_or_copy(src: &Path, dst: &Path) -> std::io::Result<()> {
    match std::fs::hard_link(src, dst) {
        Ok(()) => {
            #[cfg(all(unix, feature = "unix-sgid-fixup"))]
            unix::fixup_group_ownership(dst);
            Ok(())
        }
        Err(_) => copy(src, dst),
    }
}

/// Creates a directory with an owner-only mode, best effort on non-Unix.
pub fn mkdir_tight(path: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(path)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        std::fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(all(unix, feature = "unix-sgid-fixup"))]
mod unix {
    use std::os::unix::fs::MetadataExt;
    use std::path::Path;

    /// If `path`'s parent directory has the set-group-id bit, chgrp `path`
    /// to the directory's group. Best effort: ignored if we lack the
    /// privilege to change group ownership.
    pub fn fixup_group_ownership(path: &Path) {
        let Some(parent) = path.parent() else {
            return;
        };
        let Ok(dir_meta) = std::fs::metadata(parent) else {
            return;
        };
        const S_ISGID: u32 = 0o2000;
        if dir_meta.mode() & S_ISGID == 0 {
            return;
        }
        let dir_gid = dir_meta.gid();
        // nix/libc are not in the dependency set; shell out to `chgrp`
        // rather than add a new crate for a best-effort, feature-gated
        // fixup that most deployments never exercise.
        let _ = std::process::Command::new("chgrp")
            .arg(dir_gid.to_string())
            .arg(path)
            .status();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn rename_moves_file_atomically() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a");
        let dst = dir.path().join("b");
        std::fs::write(&src, b"hello").unwrap();
        rename(&src, &dst).unwrap();
        assert!(!src.exists());
        assert_eq!(std::fs::read(&dst).unwrap(), b"hello");
    }

    #[test]
    fn remove_missing_file_is_not_an_error() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope");
        remove(&missing).unwrap();
    }

    #[test]
    fn hardlink_or_copy_produces_identical_content() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("content");
        let dst = dir.path().join("linked");
        std::fs::write(&src, b"payload").unwrap();
        hardlink_or_copy(&src, &dst).unwrap();
        assert_eq!(std::fs::read(&dst).unwrap(), b"payload");
    }

    #[test]
    fn mkdir_tight_creates_owner_only_directory() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("sub");
        mkdir_tight(&target).unwrap();
        assert!(target.is_dir());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&target).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }
    }
}
