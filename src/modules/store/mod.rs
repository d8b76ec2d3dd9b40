// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

//! The message store: owns the spool directory and is the sole authority
//! over the envelope-suffix state machine described in the design's §3.

pub mod events;
pub mod id;
pub mod iter;
pub mod message;
pub mod new_message;
pub mod paths;

use std::fs;
use std::path::{Path, PathBuf};

use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::modules::error::RelayResult;
use crate::modules::fileop;
use crate::modules::store::events::StoreEvent;
pub use crate::modules::store::id::MessageId;
use crate::modules::store::id::MessageIdGenerator;
use crate::modules::store::iter::SpoolIter;
pub use crate::modules::store::message::StoredMessage;
pub use crate::modules::store::new_message::{EnvelopeSeed, NewMessage, NewMessageCommit};

const EVENTS_CAPACITY: usize = 256;

/// Owns a single spool directory. Cheap to clone-by-reference (`Arc`); the
/// store itself holds no in-memory index of messages — the filesystem is
/// the index, per the design's "no in-process locks" concurrency policy.
pub struct MessageStore {
    dir: PathBuf,
    ids: MessageIdGenerator,
    events: broadcast::Sender<StoreEvent>,
    max_message_size: Option<u64>,
}

impl MessageStore {
    /// `dir` must already exist; `max_message_size` of `None` or `Some(0)`
    /// means unlimited.
    pub fn new(dir: impl Into<PathBuf>, max_message_size: Option<u64>) -> RelayResult<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(crate::raise_error!(
                format!("spool directory {:?} does not exist", dir),
                crate::modules::error::code::ErrorCode::InvalidDirectory
            ));
        }
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        let max_message_size = max_message_size.filter(|&n| n > 0);
        Ok(Self {
            dir,
            ids: MessageIdGenerator::new(),
            events,
            max_message_size,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    /// A fresh, strictly-increasing (within this process) message id.
    pub fn new_id(&self) -> MessageId {
        self.ids.next()
    }

    /// Begins a new message: the caller streams content via
    /// [`NewMessage::add_content`] and accumulates recipients via
    /// [`NewMessage::add_to`], then calls [`NewMessage::commit`].
    pub fn new_message(&self, seed: EnvelopeSeed) -> NewMessage {
        let id = self.new_id();
        NewMessage::new(
            id,
            self.dir.clone(),
            seed.into_envelope(),
            self.max_message_size,
            self.events.clone(),
        )
    }

    /// Lazily enumerates messages. `lock = true` renames each entry to
    /// `.envelope.busy` as it is yielded (see [`SpoolIter`]); `lock = false`
    /// yields read-only snapshots and never touches the filesystem beyond
    /// reading.
    pub fn iterator(&self, lock: bool) -> SpoolIter {
        SpoolIter::new(self.dir.clone(), lock, self.events.clone())
    }

    /// Locks and returns a single message by id.
    pub fn get(&self, id: &MessageId) -> RelayResult<StoredMessage> {
        let envelope_path = paths::envelope_path(&self.dir, id);
        let busy_path = paths::busy_path(&self.dir, id);
        fileop::rename(&envelope_path, &busy_path)
            .map_err(|e| iter::get_error(id, e))?;

        match fs::read_to_string(&busy_path) {
            Ok(text) => match crate::modules::envelope::codec::parse(&text) {
                Ok(envelope) => Ok(StoredMessage::new(
                    id.clone(),
                    self.dir.clone(),
                    envelope,
                    true,
                    self.events.clone(),
                )),
                Err(e) => {
                    let bad_path = paths::bad_path(&self.dir, id);
                    let _ = fileop::rename(&busy_path, &bad_path);
                    Err(iter::get_error(id, e))
                }
            },
            Err(e) => {
                let bad_path = paths::bad_path(&self.dir, id);
                let _ = fileop::rename(&busy_path, &bad_path);
                Err(iter::get_error(id, e))
            }
        }
    }

    /// Ids of every message currently in `.envelope` (committed, unlocked).
    pub fn ids(&self) -> Vec<MessageId> {
        read_ids(&self.dir, |name| paths::id_from_envelope_filename(name))
    }

    /// Ids of every message currently in `.envelope.bad`.
    pub fn failures(&self) -> Vec<MessageId> {
        read_ids(&self.dir, |name| paths::id_from_bad_filename(name))
    }

    /// Best-effort: renames every `.envelope.bad` back to `.envelope`.
    /// Returns the number of messages successfully recovered.
    pub fn unfail_all(&self) -> usize {
        let mut recovered = 0;
        for id in self.failures() {
            let bad_path = paths::bad_path(&self.dir, &id);
            let envelope_path = paths::envelope_path(&self.dir, &id);
            match fileop::rename(&bad_path, &envelope_path) {
                Ok(()) => recovered += 1,
                Err(e) => warn!(message_id = %id, "failed to unfail message: {e}"),
            }
        }
        if recovered > 0 {
            info!(recovered, "unfailed messages back to envelope state");
            let _ = self.events.send(StoreEvent::Rescan);
        }
        recovered
    }

    /// Requests that subscribers (the forward driver) re-enumerate.
    pub fn rescan(&self) {
        let _ = self.events.send(StoreEvent::Rescan);
    }
}

fn read_ids(dir: &Path, extract: impl Fn(&str) -> Option<MessageId>) -> Vec<MessageId> {
    let mut ids: Vec<MessageId> = fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter_map(|name| extract(&name))
        .collect();
    ids.sort();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::store::new_message::EnvelopeSeed;
    use tempfile::tempdir;

    fn seed() -> EnvelopeSeed {
        EnvelopeSeed {
            mail_from: "alice@example.com".to_string(),
            client_ip: "10.0.0.1".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn new_id_is_strictly_increasing() {
        let dir = tempdir().unwrap();
        let store = MessageStore::new(dir.path(), None).unwrap();
        let a = store.new_id();
        let b = store.new_id();
        assert!(b > a);
    }

    #[test]
    fn commit_makes_message_visible_via_ids() {
        let dir = tempdir().unwrap();
        let store = MessageStore::new(dir.path(), None).unwrap();
        let mut msg = store.new_message(seed());
        msg.add_to("bob@example.com", false);
        msg.add_content(b"Subject: hi\r\n\r\nbody\r\n").unwrap();
        let NewMessageCommit::Committed(id) = msg.commit().unwrap() else {
            panic!("expected commit");
        };
        assert_eq!(store.ids(), vec![id.clone()]);
        assert!(paths::content_path(dir.path(), &id).exists());
        assert!(paths::envelope_path(dir.path(), &id).exists());
    }

    #[test]
    fn dropping_an_uncommitted_message_leaves_no_artefacts() {
        let dir = tempdir().unwrap();
        let store = MessageStore::new(dir.path(), None).unwrap();
        let id = {
            let mut msg = store.new_message(seed());
            msg.add_content(b"hello").unwrap();
            msg.prepare().unwrap();
            msg.id().clone()
        };
        assert!(!paths::content_path(dir.path(), &id).exists());
        assert!(!paths::new_path(dir.path(), &id).exists());
    }

    #[test]
    fn oversize_commit_yields_no_envelope() {
        let dir = tempdir().unwrap();
        let store = MessageStore::new(dir.path(), Some(4)).unwrap();
        let mut msg = store.new_message(seed());
        msg.add_content(b"this is far too long").unwrap();
        let id = msg.id().clone();
        let result = msg.commit().unwrap();
        assert!(matches!(result, NewMessageCommit::TooBig { .. }));
        assert!(!paths::envelope_path(dir.path(), &id).exists());
        assert!(!paths::content_path(dir.path(), &id).exists());
        assert!(!paths::new_path(dir.path(), &id).exists());
    }

    #[test]
    fn get_locks_via_rename_and_unlock_releases() {
        let dir = tempdir().unwrap();
        let store = MessageStore::new(dir.path(), None).unwrap();
        let mut msg = store.new_message(seed());
        msg.add_content(b"x").unwrap();
        let NewMessageCommit::Committed(id) = msg.commit().unwrap() else {
            panic!()
        };

        let locked = store.get(&id).unwrap();
        assert!(paths::busy_path(dir.path(), &id).exists());
        assert!(store.get(&id).is_err(), "second lock attempt must fail");
        locked.unlock().unwrap();
        assert!(paths::envelope_path(dir.path(), &id).exists());
    }

    #[test]
    fn locked_iteration_quarantines_unparseable_envelopes() {
        let dir = tempdir().unwrap();
        let store = MessageStore::new(dir.path(), None).unwrap();
        let id = store.new_id();
        std::fs::write(paths::content_path(dir.path(), &id), b"body").unwrap();
        std::fs::write(paths::envelope_path(dir.path(), &id), b"not an envelope").unwrap();

        let found: Vec<_> = store.iterator(true).collect();
        assert!(found.is_empty());
        assert!(paths::bad_path(dir.path(), &id).exists());
    }

    #[test]
    fn unfail_all_restores_bad_messages() {
        let dir = tempdir().unwrap();
        let store = MessageStore::new(dir.path(), None).unwrap();
        let mut msg = store.new_message(seed());
        msg.add_content(b"x").unwrap();
        let NewMessageCommit::Committed(id) = msg.commit().unwrap() else {
            panic!()
        };
        let locked = store.get(&id).unwrap();
        locked.fail("upstream rejected", "550").unwrap();
        assert_eq!(store.failures(), vec![id.clone()]);

        let recovered = store.unfail_all();
        assert_eq!(recovered, 1);
        assert_eq!(store.ids(), vec![id]);
        assert!(store.failures().is_empty());
    }
}
