// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use std::path::{Path, PathBuf};

use crate::modules::store::id::MessageId;

pub const CONTENT_EXT: &str = "content";
pub const ENVELOPE_EXT: &str = "envelope";
pub const NEW_EXT: &str = "envelope.new";
pub const BUSY_EXT: &str = "envelope.busy";
pub const BAD_EXT: &str = "envelope.bad";

pub fn content_path(dir: &Path, id: &MessageId) -> PathBuf {
    dir.join(format!("{id}.{CONTENT_EXT}"))
}

pub fn envelope_path(dir: &Path, id: &MessageId) -> PathBuf {
    dir.join(format!("{id}.{ENVELOPE_EXT}"))
}

pub fn new_path(dir: &Path, id: &MessageId) -> PathBuf {
    dir.join(format!("{id}.{NEW_EXT}"))
}

pub fn busy_path(dir: &Path, id: &MessageId) -> PathBuf {
    dir.join(format!("{id}.{BUSY_EXT}"))
}

pub fn bad_path(dir: &Path, id: &MessageId) -> PathBuf {
    dir.join(format!("{id}.{BAD_EXT}"))
}

/// Extracts the `MessageId` out of a `<id>.envelope` filename, rejecting
/// anything else (the `.new`/`.busy`/`.bad` suffixes sort under a different
/// file stem and are handled by their own scans).
pub fn id_from_envelope_filename(name: &str) -> Option<MessageId> {
    let stem = name.strip_suffix(&format!(".{ENVELOPE_EXT}"))?;
    MessageId::parse(stem)
}

pub fn id_from_bad_filename(name: &str) -> Option<MessageId> {
    let stem = name.strip_suffix(&format!(".{BAD_EXT}"))?;
    MessageId::parse(stem)
}
