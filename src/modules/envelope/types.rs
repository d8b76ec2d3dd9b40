// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

/// The `BODY=` MAIL FROM parameter, or unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BodyType {
    #[default]
    Unset,
    SevenBit,
    EightBitMime,
    BinaryMime,
}

impl BodyType {
    pub fn as_wire(&self) -> &'static str {
        match self {
            BodyType::Unset => "",
            BodyType::SevenBit => "7BIT",
            BodyType::EightBitMime => "8BITMIME",
            BodyType::BinaryMime => "BINARYMIME",
        }
    }

    pub fn from_wire(s: &str) -> BodyType {
        match s {
            "7BIT" => BodyType::SevenBit,
            "8BITMIME" => BodyType::EightBitMime,
            "BINARYMIME" => BodyType::BinaryMime,
            _ => BodyType::Unset,
        }
    }
}

/// A single RCPT TO recipient, in the order it was accepted during
/// submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: String,
    pub is_local: bool,
}

impl Recipient {
    pub fn new(address: impl Into<String>, is_local: bool) -> Self {
        Self {
            address: address.into(),
            is_local,
        }
    }
}

/// The per-message metadata record paired 1:1 with a content file.
///
/// Field names mirror the wire keys in §4.1 of the design (`mail_from` /
/// `From`, `forward_to` / `ForwardTo`, ...). Unknown `X-MailRelay-*` keys
/// encountered on parse are preserved verbatim in `extra` so that round-trip
/// through this codec never drops information a future format revision might
/// have added.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
    pub client_ip: String,
    pub client_name: String,
    pub client_certificate: Option<String>,
    pub auth_mechanism: Option<String>,
    pub auth_id: Option<String>,
    pub mail_from: String,
    pub mail_from_auth: Option<String>,
    pub mail_from_body: BodyType,
    pub mail_from_smtputf8: bool,
    pub mail_from_size: Option<u64>,
    pub forward_to: Option<String>,
    pub forward_to_address: Option<String>,
    pub recipients: Vec<Recipient>,
    pub utf8_mailboxes: bool,
    pub reason: Option<String>,
    pub reason_code: Option<String>,
    pub extra: Vec<(String, String)>,
}

impl Envelope {
    pub fn new(mail_from: impl Into<String>, client_ip: impl Into<String>) -> Self {
        Self {
            mail_from: mail_from.into(),
            client_ip: client_ip.into(),
            ..Default::default()
        }
    }

    pub fn add_recipient(&mut self, address: impl Into<String>, is_local: bool) {
        self.recipients.push(Recipient::new(address, is_local));
    }

    pub fn recipients_remote_count(&self) -> usize {
        self.recipients.iter().filter(|r| !r.is_local).count()
    }

    /// Retains only the recipients whose address is in `failed`, in their
    /// original relative order. Used by the forward driver to rewrite an
    /// envelope after a partial RCPT failure (§4.4 step 7).
    pub fn retain_recipients(&mut self, failed: &[String]) {
        self.recipients.retain(|r| failed.contains(&r.address));
    }

    pub fn set_failure(&mut self, reason: impl Into<String>, reason_code: impl Into<String>) {
        self.reason = Some(reason.into());
        self.reason_code = Some(reason_code.into());
    }
}
