// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use std::io::{BufRead, BufReader, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::modules::error::RelayResult;
use crate::modules::fileop;
use crate::modules::filter::{FilterOutcome, FilterTarget};

const MAX_HEADER_LINE: usize = 10_000;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Synthesizes a `Message-ID:` header when the content lacks one. See the
/// design's §4.3 item 4.
pub struct MessageIdFilter {
    domain: String,
}

impl MessageIdFilter {
    pub fn new(domain: impl Into<String>) -> Self {
        Self { domain: domain.into() }
    }

    pub fn id(&self) -> String {
        "msgid".to_string()
    }

    pub async fn run(&self, target: &mut dyn FilterTarget) -> RelayResult<FilterOutcome> {
        let content_path = target.content_path();
        let domain = self.domain.clone();
        let result = tokio::task::spawn_blocking(move || synthesize(&content_path, &domain))
            .await
            .map_err(|e| crate::raise_error!(e.to_string(), crate::modules::error::code::ErrorCode::InternalError))?;

        Ok(match result {
            Ok(()) => FilterOutcome::ok(),
            Err(e) => FilterOutcome::fail("450 format error", Some("450".to_string()), e.to_string()),
        })
    }
}

fn has_message_id_header(path: &std::path::Path) -> std::io::Result<bool> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    loop {
        let mut line = Vec::new();
        let read = reader.by_ref().take(MAX_HEADER_LINE as u64).read_until(b'\n', &mut line)?;
        if read == 0 || line == b"\r\n" || line == b"\n" {
            return Ok(false);
        }
        let Some(colon) = line.iter().position(|&b| b == b':') else {
            continue;
        };
        let key = String::from_utf8_lossy(&line[..colon]).trim().to_lowercase();
        if key == "message-id" {
            return Ok(true);
        }
    }
}

fn synthesize(content_path: &std::path::Path, domain: &str) -> std::io::Result<()> {
    if has_message_id_header(content_path)? {
        return Ok(());
    }

    let tmp_path = content_path.with_extension("content.msgid.tmp");
    {
        let mut tmp = std::fs::File::create(&tmp_path)?;
        let unix_s = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        let counter = COUNTER.fetch_add(1, Ordering::SeqCst);
        let header = format!(
            "Message-ID: <{}.{}.{}.{}@{}>\r\n",
            unix_s.as_secs(),
            unix_s.subsec_micros(),
            std::process::id(),
            counter,
            domain
        );
        tmp.write_all(header.as_bytes())?;
        let mut original = std::fs::File::open(content_path)?;
        std::io::copy(&mut original, &mut tmp)?;
    }
    fileop::rename_onto(&tmp_path, content_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn leaves_content_with_existing_header_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.content");
        std::fs::write(&path, b"Message-ID: <already@there>\r\nSubject: hi\r\n\r\nbody").unwrap();
        synthesize(&path, "example.com").unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Message-ID: <already@there>"));
    }

    #[test]
    fn synthesizes_header_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.content");
        std::fs::write(&path, b"Subject: hi\r\n\r\nbody").unwrap();
        synthesize(&path, "example.com").unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("Message-ID: <"));
        assert!(text.contains("@example.com>\r\n"));
        assert!(text.ends_with("body"));
    }
}
