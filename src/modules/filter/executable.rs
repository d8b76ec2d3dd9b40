// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use tokio::process::Command;
use tracing::warn;

use crate::modules::error::RelayResult;
use crate::modules::filter::{FilterOutcome, FilterTarget};

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:<<|\[\[)([^>\]]*)(?:>>|\]\])").unwrap())
}

fn response_code_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([45]\d{2})(?:\s+(.*))?$").unwrap())
}

/// Invokes an external program as `<program> <content_path> <envelope_path>`.
/// See the design's §4.3 for the exit-code and stdout-marker protocol.
pub struct ExecutableFilter {
    path: PathBuf,
}

impl ExecutableFilter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn id(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.to_string_lossy().to_string())
    }

    pub async fn run(&self, target: &mut dyn FilterTarget, timeout: Duration) -> RelayResult<FilterOutcome> {
        let content_path = target.content_path();
        let envelope_path = crate::modules::store::paths::envelope_path(&target.spool_dir(), target.id());

        let child = Command::new(&self.path)
            .arg(&content_path)
            .arg(&envelope_path)
            .output();

        let output = match tokio::time::timeout(timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(filter = %self.id(), "failed to spawn filter: {e}");
                return Ok(FilterOutcome::fail(
                    "450 filter unavailable",
                    Some("450".to_string()),
                    format!("failed to spawn {}: {e}", self.path.display()),
                ));
            }
            Err(_) => {
                warn!(filter = %self.id(), "filter timed out");
                return Ok(FilterOutcome::fail(
                    "450 filter timeout",
                    Some("450".to_string()),
                    "timeout",
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut matches = stdout.lines().filter_map(|line| {
            marker_re()
                .captures(line.trim())
                .map(|c| c.get(1).map(|m| m.as_str().trim().to_string()).unwrap_or_default())
        });
        let first = matches.next();
        let reason = matches.next();

        let (response, code) = match &first {
            Some(text) => match response_code_re().captures(text) {
                Some(c) => (
                    c.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
                    Some(c.get(1).unwrap().as_str().to_string()),
                ),
                None => (text.clone(), None),
            },
            None => (String::new(), None),
        };

        let code_raw = output.status.code().unwrap_or(-1);
        Ok(match code_raw {
            0 => FilterOutcome::ok(),
            100..=107 => {
                let mask = ((code_raw - 100) % 4) as u8;
                let rescan = mask & 0b01 != 0;
                let abandon = mask & 0b10 != 0;
                match (abandon, rescan) {
                    (false, false) => FilterOutcome::ok(),
                    (false, true) => FilterOutcome::ok_rescan(),
                    (true, false) => FilterOutcome::abandon(),
                    (true, true) => FilterOutcome::abandon_rescan(),
                }
            }
            _ => {
                let reason = reason.or(first).unwrap_or_else(|| "filter rejected message".to_string());
                let response = if response.is_empty() {
                    "550 rejected by filter".to_string()
                } else {
                    response
                };
                FilterOutcome::fail(response, code, reason)
            }
        })
    }
}
