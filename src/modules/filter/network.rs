// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::warn;

use crate::modules::error::RelayResult;
use crate::modules::filter::{FilterOutcome, FilterTarget};

/// Connects to a configured `host:port`, sends the message id, and reads a
/// single response line: `<token>[ <reason>]`, token one of `ok`,
/// `abandon`, or a 3-digit numeric SMTP code.
pub struct NetworkFilter {
    address: String,
}

impl NetworkFilter {
    pub fn new(address: impl Into<String>) -> Self {
        Self { address: address.into() }
    }

    pub fn id(&self) -> String {
        self.address.clone()
    }

    pub async fn run(&self, target: &mut dyn FilterTarget, timeout: Duration) -> RelayResult<FilterOutcome> {
        match tokio::time::timeout(timeout, self.exchange(target)).await {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(e)) => {
                warn!(filter = %self.id(), "network filter failed: {e}");
                Ok(FilterOutcome::fail(
                    "450 filter unavailable",
                    Some("450".to_string()),
                    e.to_string(),
                ))
            }
            Err(_) => {
                warn!(filter = %self.id(), "network filter timed out");
                Ok(FilterOutcome::fail(
                    "450 filter timeout",
                    Some("450".to_string()),
                    "timeout",
                ))
            }
        }
    }

    async fn exchange(&self, target: &mut dyn FilterTarget) -> std::io::Result<FilterOutcome> {
        let mut stream = TcpStream::connect(&self.address).await?;
        let request = format!("{}\r\n", target.id());
        stream.write_all(request.as_bytes()).await?;

        let mut reader = BufReader::new(&mut stream);
        let mut line = String::new();
        reader.read_line(&mut line).await?;
        let line = line.trim_end_matches(['\r', '\n']);
        let mut parts = line.splitn(2, ' ');
        let token = parts.next().unwrap_or("").to_lowercase();
        let reason = parts.next().unwrap_or("").to_string();

        Ok(match token.as_str() {
            "ok" => FilterOutcome::ok(),
            "abandon" => FilterOutcome::abandon(),
            _ if token.len() == 3 && token.chars().all(|c| c.is_ascii_digit()) => {
                FilterOutcome::fail(format!("{token} {reason}"), Some(token.clone()), reason)
            }
            _ => FilterOutcome::fail(
                "550 rejected by filter",
                None,
                format!("unrecognised network filter response: {line}"),
            ),
        })
    }
}
