// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

//! POP3 message-list semantics over the spool, per the design's §4.5. This
//! module has no socket/protocol handling of its own: it is the state
//! behind a POP3 session's `STAT`/`LIST`/`RETR`/`DELE`/`RSET`/`QUIT`
//! handlers, which are an external collaborator.

use std::fs;
use std::path::{Path, PathBuf};

use crate::modules::error::code::ErrorCode;
use crate::modules::error::RelayResult;
use crate::modules::fileop;
use crate::raise_error;

struct Entry {
    name: String,
    size: u64,
    in_parent: bool,
    deleted: bool,
}

/// A snapshot of one user's (or the shared spool's) message list, valid for
/// the lifetime of a single POP3 session. 1-based indices follow POP3
/// convention.
pub struct PopView {
    spool_dir: PathBuf,
    user_dir: PathBuf,
    by_name: bool,
    entries: Vec<Entry>,
}

impl PopView {
    /// `user` of `None` means the plain (non-by-name) spool root view.
    pub fn open(spool_dir: impl Into<PathBuf>, user: Option<&str>) -> RelayResult<Self> {
        let spool_dir = spool_dir.into();
        let by_name = user.is_some();
        let user_dir = match user {
            Some(name) => spool_dir.join(name),
            None => spool_dir.clone(),
        };

        let mut entries = Vec::new();
        let read_dir = match fs::read_dir(&user_dir) {
            Ok(rd) => rd,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    spool_dir,
                    user_dir,
                    by_name,
                    entries: Vec::new(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        for entry in read_dir.flatten() {
            let Ok(filename) = entry.file_name().into_string() else {
                continue;
            };
            let Some(name) = filename.strip_suffix(".envelope") else {
                continue;
            };

            let owned_content = user_dir.join(format!("{name}.content"));
            let parent_content = spool_dir.join(format!("{name}.content"));

            let (size, in_parent) = if let Ok(meta) = fs::metadata(&owned_content) {
                (meta.len(), false)
            } else if by_name {
                match fs::metadata(&parent_content) {
                    Ok(meta) => (meta.len(), true),
                    Err(_) => continue,
                }
            } else {
                continue;
            };

            entries.push(Entry {
                name: name.to_string(),
                size,
                in_parent,
                deleted: false,
            });
        }

        Ok(Self {
            spool_dir,
            user_dir,
            by_name,
            entries,
        })
    }

    pub fn message_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.deleted).count()
    }

    pub fn total_byte_count(&self) -> u64 {
        self.entries.iter().filter(|e| !e.deleted).map(|e| e.size).sum()
    }

    pub fn valid(&self, id: usize) -> bool {
        id >= 1 && id <= self.entries.len() && !self.entries[id - 1].deleted
    }

    fn content_path_for(&self, entry: &Entry) -> PathBuf {
        if entry.in_parent {
            self.spool_dir.join(format!("{}.content", entry.name))
        } else {
            self.user_dir.join(format!("{}.content", entry.name))
        }
    }

    pub fn content(&self, id: usize) -> RelayResult<PathBuf> {
        if !self.valid(id) {
            return Err(raise_error!(
                format!("message {id} is not a valid entry"),
                ErrorCode::MessageNotFound
            ));
        }
        let path = self.content_path_for(&self.entries[id - 1]);
        if !path.is_file() {
            return Err(raise_error!(
                format!("content file for message {id} is unreadable"),
                ErrorCode::CannotRead
            ));
        }
        Ok(path)
    }

    pub fn uidl(&self, id: usize) -> RelayResult<String> {
        if !self.valid(id) {
            return Err(raise_error!(
                format!("message {id} is not a valid entry"),
                ErrorCode::MessageNotFound
            ));
        }
        Ok(format!("{}.content", self.entries[id - 1].name))
    }

    pub fn remove(&mut self, id: usize) -> RelayResult<()> {
        if !self.valid(id) {
            return Err(raise_error!(
                format!("message {id} is not a valid entry"),
                ErrorCode::MessageNotFound
            ));
        }
        self.entries[id - 1].deleted = true;
        Ok(())
    }

    pub fn rollback(&mut self) {
        for entry in &mut self.entries {
            entry.deleted = false;
        }
    }

    /// A `.content` is shared if it lives in the parent spool (`in_parent`)
    /// and an envelope of the same name also exists directly in the spool
    /// root, or in any immediate sibling sub-directory of this view's user
    /// directory. The check stops at the first immediate sub-directory
    /// match; it does not recurse.
    fn is_shared(&self, entry: &Entry) -> bool {
        if !entry.in_parent {
            return false;
        }
        if self.spool_dir.join(format!("{}.envelope", entry.name)).is_file() {
            return true;
        }
        let Ok(read_dir) = fs::read_dir(&self.spool_dir) else {
            return false;
        };
        for sibling in read_dir.flatten() {
            if !sibling.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                continue;
            }
            let sibling_path = sibling.path();
            if sibling_path == self.user_dir {
                continue;
            }
            if sibling_path.join(format!("{}.envelope", entry.name)).is_file() {
                return true;
            }
        }
        false
    }

    /// Deletes every entry marked by `remove`. Always removes the per-user
    /// envelope; removes the content only when it is not shared. Attempts
    /// every deleted entry even if some fail, returning `CannotDelete` if
    /// any envelope removal failed.
    pub fn commit(&mut self) -> RelayResult<()> {
        let mut failures = Vec::new();
        for entry in &self.entries {
            if !entry.deleted {
                continue;
            }
            let envelope_path = self.user_dir.join(format!("{}.envelope", entry.name));
            if let Err(e) = fileop::remove(&envelope_path) {
                failures.push(format!("{}: {e}", entry.name));
                continue;
            }
            if !self.is_shared(entry) {
                let content_path = self.content_path_for(entry);
                let _ = fileop::remove(&content_path);
            }
        }
        if !failures.is_empty() {
            return Err(raise_error!(
                format!("failed to delete {} message(s): {}", failures.len(), failures.join(", ")),
                ErrorCode::CannotDelete
            ));
        }
        Ok(())
    }
}

/// Auto-provisions a pop-by-name user directory on first authentication, if
/// `user` is printable and a simple path component. Silently no-ops
/// otherwise: this is a missed provisioning opportunity, not an error.
pub fn provision_user_dir(spool_dir: &Path, user: &str) {
    if user.is_empty() || user.contains('/') || user.contains("..") || !user.chars().all(|c| c.is_ascii_graphic()) {
        return;
    }
    let dir = spool_dir.join(user);
    if dir.exists() {
        return;
    }
    let _ = fileop::mkdir_tight(&dir);
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_pair(dir: &Path, name: &str, body: &[u8]) {
        std::fs::write(dir.join(format!("{name}.envelope")), b"envelope").unwrap();
        std::fs::write(dir.join(format!("{name}.content")), body).unwrap();
    }

    #[test]
    fn lists_owned_messages_in_spool_root() {
        let dir = tempdir().unwrap();
        write_pair(dir.path(), "m1", b"hello");
        let view = PopView::open(dir.path(), None).unwrap();
        assert_eq!(view.message_count(), 1);
        assert_eq!(view.total_byte_count(), 5);
        assert!(view.valid(1));
    }

    #[test]
    fn by_name_view_resolves_shared_content_from_parent() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("m1.content"), b"shared body").unwrap();
        let alice = dir.path().join("alice");
        fileop::mkdir_tight(&alice).unwrap();
        std::fs::write(alice.join("m1.envelope"), b"envelope").unwrap();

        let view = PopView::open(dir.path(), Some("alice")).unwrap();
        assert_eq!(view.message_count(), 1);
        let content = view.content(1).unwrap();
        assert_eq!(content, dir.path().join("m1.content"));
    }

    #[test]
    fn commit_preserves_shared_content_but_removes_owned_envelope() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("m1.content"), b"shared body").unwrap();
        let alice = dir.path().join("alice");
        let bob = dir.path().join("bob");
        fileop::mkdir_tight(&alice).unwrap();
        fileop::mkdir_tight(&bob).unwrap();
        std::fs::write(alice.join("m1.envelope"), b"envelope").unwrap();
        std::fs::write(bob.join("m1.envelope"), b"envelope").unwrap();

        let mut view = PopView::open(dir.path(), Some("alice")).unwrap();
        view.remove(1).unwrap();
        view.commit().unwrap();

        assert!(!alice.join("m1.envelope").exists());
        assert!(bob.join("m1.envelope").exists());
        assert!(dir.path().join("m1.content").exists());
    }

    #[test]
    fn commit_removes_unshared_content() {
        let dir = tempdir().unwrap();
        let alice = dir.path().join("alice");
        fileop::mkdir_tight(&alice).unwrap();
        write_pair(&alice, "m1", b"private");

        let mut view = PopView::open(dir.path(), Some("alice")).unwrap();
        view.remove(1).unwrap();
        view.commit().unwrap();

        assert!(!alice.join("m1.envelope").exists());
        assert!(!alice.join("m1.content").exists());
    }

    #[test]
    fn rollback_clears_deletion_marks() {
        let dir = tempdir().unwrap();
        write_pair(dir.path(), "m1", b"hello");
        let mut view = PopView::open(dir.path(), None).unwrap();
        view.remove(1).unwrap();
        assert!(!view.valid(1));
        view.rollback();
        assert!(view.valid(1));
    }
}
