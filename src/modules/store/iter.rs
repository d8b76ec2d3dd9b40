// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use std::fs;
use std::path::PathBuf;

use tokio::sync::broadcast;
use tracing::warn;

use crate::modules::envelope::codec;
use crate::modules::error::code::ErrorCode;
use crate::modules::fileop;
use crate::modules::store::events::StoreEvent;
use crate::modules::store::id::MessageId;
use crate::modules::store::message::StoredMessage;
use crate::modules::store::paths;
use crate::raise_error;

/// Lazily walks the spool directory's `<id>.envelope` entries. With
/// `lock = true`, each yielded message has already been renamed to
/// `.envelope.busy`; an envelope that fails to parse after locking is
/// renamed to `.envelope.bad` with the parse error as its reason and the
/// iteration silently continues (per the design's §8 boundary behaviour),
/// rather than surfacing an error to the caller.
pub struct SpoolIter {
    dir: PathBuf,
    lock: bool,
    events: broadcast::Sender<StoreEvent>,
    entries: std::vec::IntoIter<MessageId>,
}

impl SpoolIter {
    pub(crate) fn new(dir: PathBuf, lock: bool, events: broadcast::Sender<StoreEvent>) -> Self {
        let mut ids: Vec<MessageId> = fs::read_dir(&dir)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter_map(|name| paths::id_from_envelope_filename(&name))
            .collect();
        ids.sort();
        Self {
            dir,
            lock,
            events,
            entries: ids.into_iter(),
        }
    }
}

impl Iterator for SpoolIter {
    type Item = StoredMessage;

    fn next(&mut self) -> Option<StoredMessage> {
        loop {
            let id = self.entries.next()?;
            let envelope_path = paths::envelope_path(&self.dir, &id);

            if !self.lock {
                let Ok(text) = fs::read_to_string(&envelope_path) else {
                    continue;
                };
                let Ok(envelope) = codec::parse(&text) else {
                    continue;
                };
                return Some(StoredMessage::new(
                    id,
                    self.dir.clone(),
                    envelope,
                    false,
                    self.events.clone(),
                ));
            }

            let busy_path = paths::busy_path(&self.dir, &id);
            if fileop::rename(&envelope_path, &busy_path).is_err() {
                // Another worker already holds it, or it vanished since the
                // directory scan; either way, move on.
                continue;
            }

            match fs::read_to_string(&busy_path).map_err(|e| e.to_string()).and_then(|text| {
                codec::parse(&text).map_err(|e| e.to_string())
            }) {
                Ok(envelope) => {
                    return Some(StoredMessage::new(
                        id,
                        self.dir.clone(),
                        envelope,
                        true,
                        self.events.clone(),
                    ));
                }
                Err(reason) => {
                    warn!(message_id = %id, %reason, "envelope unreadable after locking, marking bad");
                    let bad_path = paths::bad_path(&self.dir, &id);
                    if let Err(e) = fileop::rename(&busy_path, &bad_path) {
                        warn!(message_id = %id, "failed to mark unreadable envelope bad: {e}");
                    }
                    continue;
                }
            }
        }
    }
}

pub(crate) fn get_error(id: &MessageId, reason: impl std::fmt::Display) -> crate::modules::error::RelayError {
    raise_error!(
        format!("failed to get message {id}: {reason}"),
        ErrorCode::GetError
    )
}
