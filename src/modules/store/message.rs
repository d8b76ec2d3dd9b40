// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use std::path::PathBuf;

use tokio::sync::broadcast;

use crate::modules::envelope::{codec, Envelope};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::RelayResult;
use crate::modules::fileop;
use crate::modules::store::events::StoreEvent;
use crate::modules::store::id::MessageId;
use crate::modules::store::paths;
use crate::raise_error;

/// A message retrieved from the spool, either as a read-only snapshot
/// (`lock = false`) or exclusively locked for processing (`lock = true`,
/// the envelope currently sits at `<id>.envelope.busy`).
///
/// Only a locked `StoredMessage` exposes the state-transition methods
/// (`rewrite`, `unlock`, `commit_delete`, `fail`, `abandon`): the lock *is*
/// the rename, so mutating the spool without holding it would violate the
/// exclusivity the whole design relies on.
pub struct StoredMessage {
    id: MessageId,
    dir: PathBuf,
    envelope: Envelope,
    locked: bool,
    events: broadcast::Sender<StoreEvent>,
}

impl StoredMessage {
    pub(crate) fn new(
        id: MessageId,
        dir: PathBuf,
        envelope: Envelope,
        locked: bool,
        events: broadcast::Sender<StoreEvent>,
    ) -> Self {
        Self {
            id,
            dir,
            envelope,
            locked,
            events,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    pub fn content_path(&self) -> PathBuf {
        paths::content_path(&self.dir, &self.id)
    }

    fn envelope_path(&self) -> PathBuf {
        paths::envelope_path(&self.dir, &self.id)
    }

    fn busy_path(&self) -> PathBuf {
        paths::busy_path(&self.dir, &self.id)
    }

    fn bad_path(&self) -> PathBuf {
        paths::bad_path(&self.dir, &self.id)
    }

    fn require_locked(&self) -> RelayResult<()> {
        if !self.locked {
            return Err(raise_error!(
                format!("{} is not locked for writing", self.id),
                ErrorCode::LockFailed
            ));
        }
        Ok(())
    }

    /// Rewrites the envelope currently at `.envelope.busy` in place, e.g.
    /// after the forward driver's mx-lookup filter fills in
    /// `ForwardToAddress`, without releasing the lock.
    pub fn rewrite(&self) -> RelayResult<()> {
        self.require_locked()?;
        let text = codec::serialize(&self.envelope);
        std::fs::write(self.busy_path(), text)?;
        Ok(())
    }

    /// Releases the lock without otherwise changing the message: renames
    /// `.envelope.busy → .envelope`. Used on transient failure, or after a
    /// partial forward success once the envelope has been rewritten to
    /// contain only the still-pending recipients.
    pub fn unlock(self) -> RelayResult<()> {
        self.require_locked()?;
        fileop::rename(&self.busy_path(), &self.envelope_path())?;
        Ok(())
    }

    /// Successful terminal state: deletes both `.envelope.busy` and the
    /// content file.
    pub fn commit_delete(self) -> RelayResult<()> {
        self.require_locked()?;
        fileop::remove(&self.busy_path())?;
        fileop::remove(&self.content_path())?;
        Ok(())
    }

    /// Permanent failure: renames `.envelope.busy → .envelope.bad`,
    /// recording `reason`/`reason_code` in the envelope first. The content
    /// file is left in place; a `.bad` message is a supported recovery
    /// target via `MessageStore::unfail_all`.
    pub fn fail(mut self, reason: impl Into<String>, reason_code: impl Into<String>) -> RelayResult<()> {
        self.require_locked()?;
        self.envelope.set_failure(reason, reason_code);
        let text = codec::serialize(&self.envelope);
        std::fs::write(self.busy_path(), text)?;
        fileop::rename(&self.busy_path(), &self.bad_path())?;
        Ok(())
    }

    /// Silent drop: deletes the envelope and content entirely. Used by a
    /// filter chain `Abandon` result on an already-locked message (e.g. the
    /// client-side chain, or the copy filter fanning a message out to
    /// per-user views and abandoning the original).
    pub fn abandon(self) -> RelayResult<()> {
        self.require_locked()?;
        fileop::remove(&self.busy_path())?;
        fileop::remove(&self.content_path())?;
        Ok(())
    }

    /// Commits the message but asks the store to re-enumerate, for filters
    /// whose side effects (e.g. the copy filter) material changed the
    /// spool in ways the current iteration pass won't see.
    pub fn commit_and_rescan(self) -> RelayResult<()> {
        self.require_locked()?;
        fileop::rename(&self.busy_path(), &self.envelope_path())?;
        let _ = self.events.send(StoreEvent::Rescan);
        Ok(())
    }
}

impl crate::modules::filter::FilterTarget for StoredMessage {
    fn id(&self) -> &MessageId {
        &self.id
    }

    fn content_path(&self) -> PathBuf {
        self.content_path()
    }

    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn spool_dir(&self) -> PathBuf {
        self.dir.clone()
    }
}
