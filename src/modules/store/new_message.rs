// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use tracing::warn;

use crate::modules::envelope::{codec, Envelope};
use crate::modules::error::RelayResult;
use crate::modules::fileop;
use crate::modules::metrics::RELAY_MESSAGES_STORED_TOTAL;
use crate::modules::store::events::StoreEvent;
use crate::modules::store::id::MessageId;
use crate::modules::store::paths;
use tokio::sync::broadcast;

/// The outcome of [`NewMessage::commit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NewMessageCommit {
    /// `<id>.envelope` now exists; the message is visible to the forward
    /// driver and POP.
    Committed(MessageId),
    /// The content exceeded the configured size ceiling. No `<id>.envelope`
    /// (or any other envelope suffix) was written and the content file has
    /// been removed; the caller is expected to surface a rejection to the
    /// submitting peer.
    TooBig { limit: u64, received: u64 },
}

/// A message under construction by the receiver. Streams content to
/// `<id>.content` and accumulates envelope fields in memory; nothing is
/// visible to any other worker until [`NewMessage::commit`] succeeds.
///
/// Dropping a `NewMessage` without calling `commit` or `abandon` leaves no
/// artefacts: the destructor removes whatever was written so far.
pub struct NewMessage {
    id: MessageId,
    dir: PathBuf,
    content_path: PathBuf,
    new_path: PathBuf,
    content_file: Option<File>,
    bytes_written: u64,
    max_size: Option<u64>,
    too_big: bool,
    envelope: Envelope,
    prepared: bool,
    finished: bool,
    events: broadcast::Sender<StoreEvent>,
}

impl NewMessage {
    pub(crate) fn new(
        id: MessageId,
        dir: PathBuf,
        envelope: Envelope,
        max_size: Option<u64>,
        events: broadcast::Sender<StoreEvent>,
    ) -> Self {
        let content_path = paths::content_path(&dir, &id);
        let new_path = paths::new_path(&dir, &id);
        Self {
            id,
            dir,
            content_path,
            new_path,
            content_file: None,
            bytes_written: 0,
            max_size,
            too_big: false,
            envelope,
            prepared: false,
            finished: false,
            events,
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    /// Accumulates one accepted RCPT TO recipient, in acceptance order.
    pub fn add_to(&mut self, address: impl Into<String>, is_local: bool) {
        self.envelope.add_recipient(address, is_local);
    }

    /// Streams a chunk of the DATA payload to `<id>.content`. Once the
    /// configured size ceiling (if any) is exceeded the chunk is still
    /// written (so the peer's DATA transfer can complete normally) but the
    /// message is marked too-big; `commit` will then refuse to produce a
    /// committed envelope.
    pub fn add_content(&mut self, bytes: &[u8]) -> RelayResult<()> {
        if self.content_file.is_none() {
            let file = File::create(&self.content_path)?;
            self.content_file = Some(file);
        }
        self.content_file.as_mut().unwrap().write_all(bytes)?;
        self.bytes_written += bytes.len() as u64;
        if let Some(limit) = self.max_size {
            if self.bytes_written > limit {
                self.too_big = true;
            }
        }
        Ok(())
    }

    /// Writes `<id>.envelope.new`. Idempotent; re-serialises the envelope
    /// as currently accumulated, so it is safe to call again after further
    /// `add_to` calls.
    pub fn prepare(&mut self) -> RelayResult<()> {
        let text = codec::serialize(&self.envelope);
        std::fs::write(&self.new_path, text)?;
        self.prepared = true;
        Ok(())
    }

    /// Renames `.new → .envelope`. Fails closed on a size-limit breach: no
    /// envelope of any kind is left behind and the content file is removed,
    /// satisfying "over-size writes never yield a committed `.envelope`".
    pub fn commit(mut self) -> RelayResult<NewMessageCommit> {
        if !self.prepared {
            self.prepare()?;
        }
        if self.too_big {
            let limit = self.max_size.unwrap_or(0);
            let received = self.bytes_written;
            fileop::remove(&self.new_path)?;
            fileop::remove(&self.content_path)?;
            self.finished = true;
            return Ok(NewMessageCommit::TooBig { limit, received });
        }
        let envelope_path = paths::envelope_path(&self.dir, &self.id);
        fileop::rename(&self.new_path, &envelope_path)?;
        self.finished = true;
        RELAY_MESSAGES_STORED_TOTAL.inc();
        let _ = self.events.send(StoreEvent::Updated(self.id.clone()));
        Ok(NewMessageCommit::Committed(self.id.clone()))
    }

    /// Explicit abandon, used when the server-side filter chain returns
    /// `Abandon`: removes the in-progress envelope and content, leaving no
    /// trace of the message.
    pub fn abandon(mut self) -> RelayResult<()> {
        fileop::remove(&self.new_path)?;
        fileop::remove(&self.content_path)?;
        self.finished = true;
        Ok(())
    }

    /// Rejects the message outright (e.g. a server-side filter `Fail`
    /// before commit): same cleanup as `abandon`, kept as a distinct name
    /// because the caller's reason for discarding differs.
    pub fn reject(self) -> RelayResult<()> {
        self.abandon()
    }

    fn cleanup_on_drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = fileop::remove(&self.new_path) {
            warn!(message_id = %self.id, "failed to clean up abandoned envelope.new: {e}");
        }
        if let Err(e) = fileop::remove(&self.content_path) {
            warn!(message_id = %self.id, "failed to clean up abandoned content file: {e}");
        }
    }
}

impl Drop for NewMessage {
    fn drop(&mut self) {
        self.cleanup_on_drop();
    }
}

impl crate::modules::filter::FilterTarget for NewMessage {
    fn id(&self) -> &MessageId {
        &self.id
    }

    fn content_path(&self) -> PathBuf {
        self.content_path.clone()
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

/// A seed of the envelope fields known at the start of submission (before
/// any recipients are accepted), i.e. everything the SMTP receiver learns
/// from the client's EHLO/MAIL FROM.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeSeed {
    pub client_ip: String,
    pub client_name: String,
    pub client_certificate: Option<String>,
    pub auth_mechanism: Option<String>,
    pub auth_id: Option<String>,
    pub mail_from: String,
    pub mail_from_auth: Option<String>,
    pub mail_from_body: crate::modules::envelope::BodyType,
    pub mail_from_smtputf8: bool,
    pub mail_from_size: Option<u64>,
}

impl EnvelopeSeed {
    pub(crate) fn into_envelope(self) -> Envelope {
        Envelope {
            client_ip: self.client_ip,
            client_name: self.client_name,
            client_certificate: self.client_certificate,
            auth_mechanism: self.auth_mechanism,
            auth_id: self.auth_id,
            mail_from: self.mail_from,
            mail_from_auth: self.mail_from_auth,
            mail_from_body: self.mail_from_body,
            mail_from_smtputf8: self.mail_from_smtputf8,
            mail_from_size: self.mail_from_size,
            ..Default::default()
        }
    }
}
