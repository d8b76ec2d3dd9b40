// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use mail_send::smtp::message::Message;
use mail_send::{SmtpClient, SmtpClientBuilder};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::modules::error::code::ErrorCode;
use crate::modules::error::RelayResult;
use crate::modules::envelope::Envelope;
use crate::raise_error;

/// The outcome of a single RCPT TO.
#[derive(Debug, Clone)]
pub struct RcptOutcome {
    pub address: String,
    pub accepted: bool,
    /// The upstream SMTP reply code, when the rejection came back as a
    /// proper SMTP response rather than a transport failure.
    pub code: Option<u16>,
}

/// Whether an upstream failure should be retried later (`Transient`) or
/// is final (`Permanent`), per the design's §7 classification: 4xx and
/// transport errors are transient, 5xx is permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// The result of one forward attempt against a single upstream session.
pub enum SendOutcome {
    /// Every recipient accepted and DATA completed.
    Delivered,
    /// Mixed results; `rejected` lists the recipients that must stay in
    /// the envelope for a later retry.
    Partial { rejected: Vec<RcptOutcome> },
    /// No recipient was accepted, or MAIL/DATA failed outright.
    Failed { kind: FailureKind, reason: String },
}

/// An open connection to one upstream SMTP server, wrapping `mail-send`'s
/// client. One instance is pooled per upstream via `bb8` (§4.4).
pub enum RelaySmtpClient {
    Plain(SmtpClient<TcpStream>),
    Tls(SmtpClient<TlsStream<TcpStream>>),
}

impl RelaySmtpClient {
    pub async fn connect(host: &str, port: u16, implicit_tls: bool) -> RelayResult<Self> {
        let builder = SmtpClientBuilder::new(host, port).implicit_tls(implicit_tls);
        if implicit_tls {
            let client = builder
                .connect()
                .await
                .map_err(|e| raise_error!(format!("smtp connect to {host}:{port} failed: {e}"), ErrorCode::ForwardTransientError))?;
            Ok(RelaySmtpClient::Tls(client))
        } else {
            let client = builder
                .connect_plain()
                .await
                .map_err(|e| raise_error!(format!("smtp connect to {host}:{port} failed: {e}"), ErrorCode::ForwardTransientError))?;
            Ok(RelaySmtpClient::Plain(client))
        }
    }

    pub async fn noop(&mut self) -> RelayResult<()> {
        let result = match self {
            RelaySmtpClient::Plain(c) => c.noop().await,
            RelaySmtpClient::Tls(c) => c.noop().await,
        };
        result.map_err(|e| raise_error!(e.to_string(), ErrorCode::ForwardTransientError))
    }

    /// Sends one envelope against this connection, recipient by recipient,
    /// so that a single rejected RCPT does not sink the whole message: the
    /// crate's high-level `send()` transacts a whole message atomically,
    /// so a per-recipient retry loop is the only way to recover the
    /// partial-acceptance semantics §4.4 requires (documented in
    /// DESIGN.md).
    pub async fn send(&mut self, envelope: &Envelope, content: &[u8]) -> SendOutcome {
        let remote: Vec<&str> = envelope
            .recipients
            .iter()
            .filter(|r| !r.is_local)
            .map(|r| r.address.as_str())
            .collect();

        if remote.is_empty() {
            return SendOutcome::Failed {
                kind: FailureKind::Permanent,
                reason: "no remote recipients".to_string(),
            };
        }

        let mut outcomes = Vec::with_capacity(remote.len());
        for address in &remote {
            let message = Message::new(envelope.mail_from.as_str(), vec![*address], content);

            let result = match self {
                RelaySmtpClient::Plain(c) => c.send(message).await,
                RelaySmtpClient::Tls(c) => c.send(message).await,
            };

            match result {
                Ok(()) => outcomes.push(RcptOutcome {
                    address: address.to_string(),
                    accepted: true,
                    code: None,
                }),
                Err(e) => {
                    let code = reply_code(&e);
                    outcomes.push(RcptOutcome {
                        address: address.to_string(),
                        accepted: false,
                        code,
                    });
                }
            }
        }

        let accepted = outcomes.iter().filter(|o| o.accepted).count();
        let rejected: Vec<RcptOutcome> = outcomes.into_iter().filter(|o| !o.accepted).collect();

        if rejected.is_empty() {
            SendOutcome::Delivered
        } else if accepted == 0 {
            // A transport/IO error (no SMTP reply at all) surfaces as
            // `code: None` and must be treated as transient per §7 ("transport
            // errors are always transient"), not just an absent 4xx code.
            let kind = if rejected.iter().any(|o| matches!(o.code, Some(code) if (500..600).contains(&code))) {
                FailureKind::Permanent
            } else {
                FailureKind::Transient
            };
            let reason = rejected
                .iter()
                .map(|o| format!("{}: {}", o.address, o.code.map(|c| c.to_string()).unwrap_or_else(|| "transport error".to_string())))
                .collect::<Vec<_>>()
                .join("; ");
            SendOutcome::Failed { kind, reason }
        } else {
            SendOutcome::Partial { rejected }
        }
    }
}

/// Extracts a 3-digit SMTP reply code from a `mail-send` error's rendered
/// text, when present. `mail-send`'s error type does not expose a
/// structured reply-code accessor across versions, so this parses the
/// conventional `"XYZ "` prefix produced by its `Display` impl.
fn reply_code(e: &mail_send::Error) -> Option<u16> {
    let text = e.to_string();
    text.split_whitespace()
        .next()
        .and_then(|tok| tok.parse::<u16>().ok())
        .filter(|&code| (200..600).contains(&code))
}
