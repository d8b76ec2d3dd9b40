// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::warn;

use crate::modules::delivery;
use crate::modules::error::RelayResult;
use crate::modules::filter::{FilterOutcome, FilterTarget};

/// When no sub-directories exist, logs a warning once per process rather
/// than once per message.
static WARNED_NO_SUBDIRS: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyMode {
    PopByName,
    Plain,
    NoDelete,
}

/// Fans a message out to every eligible sub-directory of the spool.
pub struct CopyFilter {
    hardlink: bool,
    mode: CopyMode,
}

impl CopyFilter {
    pub fn new(hardlink: bool, mode: CopyMode) -> Self {
        Self { hardlink, mode }
    }

    pub fn id(&self) -> String {
        "copy".to_string()
    }

    pub async fn run(&self, target: &mut dyn FilterTarget) -> RelayResult<FilterOutcome> {
        let spool_dir = target.spool_dir();
        let tag = target.id().to_string();
        let envelope_src = crate::modules::store::paths::envelope_path(&spool_dir, target.id());
        let content_src = target.content_path();

        let subdirs: Vec<_> = fs::read_dir(&spool_dir)
            .into_iter()
            .flatten()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.') && name != "postmaster" && !name.is_empty())
            .collect();

        if subdirs.is_empty() {
            if !WARNED_NO_SUBDIRS.swap(true, Ordering::Relaxed) {
                warn!("copy filter: no eligible spool sub-directories found");
            }
            return Ok(FilterOutcome::ok());
        }

        let pop_by_name = self.mode == CopyMode::PopByName;
        let mut delivered = 0usize;
        for name in subdirs {
            let subdir = spool_dir.join(&name);
            match delivery::deliver_to(&tag, &subdir, &envelope_src, &content_src, self.hardlink, pop_by_name) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(message_id = %tag, subdir = %name, "copy filter delivery failed: {e}"),
            }
        }

        if delivered > 0 && self.mode != CopyMode::NoDelete {
            Ok(FilterOutcome::abandon())
        } else {
            Ok(FilterOutcome::ok())
        }
    }
}
