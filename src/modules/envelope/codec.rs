// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use crate::modules::envelope::format;
use crate::modules::envelope::types::{BodyType, Envelope};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::RelayResult;
use crate::raise_error;

const PREFIX: &str = "X-MailRelay-";
const END_LINE: &str = "X-MailRelay-End: 1";

/// Printable-encodes a value for the wire: `\n` becomes `=0A`, `=` becomes
/// `=3D`, so that multi-line values (the client certificate PEM block) fit
/// on a single `Key: value` line and every other value is passed through
/// unchanged.
fn encode_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '=' => out.push_str("=3D"),
            '\n' => out.push_str("=0A"),
            '\r' => {}
            other => out.push(other),
        }
    }
    out
}

fn decode_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '=' && chars.peek().is_some() {
            let rest: String = chars.clone().take(2).collect();
            match rest.as_str() {
                "0A" => {
                    out.push('\n');
                    chars.next();
                    chars.next();
                    continue;
                }
                "3D" => {
                    out.push('=');
                    chars.next();
                    chars.next();
                    continue;
                }
                _ => {}
            }
        }
        out.push(ch);
    }
    out
}

fn line(key: &str, value: &str) -> String {
    format!("{PREFIX}{key}: {}", encode_value(value))
}

fn bool_str(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

/// Serialises an envelope to the on-disk text format described in §4.1/§6.
/// Always writes the current format tag: prior-generation envelopes are
/// upgraded silently the first time they are rewritten.
pub fn serialize(envelope: &Envelope) -> String {
    let mut lines = Vec::new();
    lines.push(format::CURRENT.to_string());
    lines.push(line("ClientIp", &envelope.client_ip));
    lines.push(line("ClientName", &envelope.client_name));
    lines.push(line(
        "ClientCertificate",
        envelope.client_certificate.as_deref().unwrap_or(""),
    ));
    lines.push(line(
        "AuthenticationMechanism",
        envelope.auth_mechanism.as_deref().unwrap_or("0"),
    ));
    lines.push(line(
        "AuthenticationId",
        envelope.auth_id.as_deref().unwrap_or("0"),
    ));
    lines.push(line("From", &envelope.mail_from));
    lines.push(line(
        "FromAuthIn",
        envelope.mail_from_auth.as_deref().unwrap_or(""),
    ));
    // `FromAuthOut` mirrors the AUTH= parameter sent onward to the next hop;
    // until the forward driver rewrites it this equals the inbound value.
    lines.push(line(
        "FromAuthOut",
        envelope.mail_from_auth.as_deref().unwrap_or(""),
    ));
    lines.push(line("Body", envelope.mail_from_body.as_wire()));
    lines.push(line("Smtputf8", bool_str(envelope.mail_from_smtputf8)));
    lines.push(line(
        "MailFromSize",
        &envelope
            .mail_from_size
            .map(|n| n.to_string())
            .unwrap_or_default(),
    ));
    lines.push(line(
        "Utf8MailboxNames",
        bool_str(envelope.utf8_mailboxes),
    ));
    lines.push(line(
        "ForwardTo",
        envelope.forward_to.as_deref().unwrap_or(""),
    ));
    lines.push(line(
        "ForwardToAddress",
        envelope.forward_to_address.as_deref().unwrap_or(""),
    ));
    lines.push(line("ToCount", &envelope.recipients.len().to_string()));
    lines.push(line(
        "ToRemoteCount",
        &envelope.recipients_remote_count().to_string(),
    ));
    for r in &envelope.recipients {
        lines.push(line(
            "ToList",
            &format!("{} {}", r.address, bool_str(r.is_local)),
        ));
    }
    for r in envelope.recipients.iter().filter(|r| r.is_local) {
        lines.push(line("ToLocalList", &r.address));
    }
    lines.push(line("Reason", envelope.reason.as_deref().unwrap_or("")));
    lines.push(line(
        "ReasonCode",
        envelope.reason_code.as_deref().unwrap_or(""),
    ));
    for (key, value) in &envelope.extra {
        lines.push(line(key, value));
    }
    lines.push(END_LINE.to_string());
    let mut text = lines.join("\n");
    text.push('\n');
    text
}

/// Parses the on-disk envelope text format. Tolerates CRLF line endings on
/// read even though this codec only ever writes LF.
pub fn parse(text: &str) -> RelayResult<Envelope> {
    let mut raw_lines = text.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));

    let format_line = raw_lines.next().ok_or_else(|| {
        raise_error!(
            "envelope is empty, no format marker".into(),
            ErrorCode::EnvelopeParseError
        )
    })?;
    if !format::is_known(format_line) {
        return Err(raise_error!(
            format!("unknown envelope format {:?}", format_line),
            ErrorCode::EnvelopeVersionError
        ));
    }

    let mut fields: Vec<(String, String)> = Vec::new();
    let mut saw_end = false;
    for raw in raw_lines {
        if raw.is_empty() {
            continue;
        }
        let Some(rest) = raw.strip_prefix(PREFIX) else {
            return Err(raise_error!(
                format!("unrecognised envelope line {:?}", raw),
                ErrorCode::EnvelopeParseError
            ));
        };
        let Some((key, value)) = rest.split_once(": ") else {
            return Err(raise_error!(
                format!("malformed envelope line {:?}", raw),
                ErrorCode::EnvelopeParseError
            ));
        };
        if key == "End" {
            saw_end = true;
            break;
        }
        fields.push((key.to_string(), decode_value(value)));
    }
    if !saw_end {
        return Err(raise_error!(
            "envelope missing End sentinel".into(),
            ErrorCode::EnvelopeTruncatedError
        ));
    }

    build_envelope(fields)
}

fn take<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
    fields
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn build_envelope(fields: Vec<(String, String)>) -> RelayResult<Envelope> {
    let get = |key: &str| take(&fields, key).unwrap_or("").to_string();
    let get_opt = |key: &str| {
        take(&fields, key).and_then(|v| if v.is_empty() { None } else { Some(v.to_string()) })
    };

    let to_count: usize = get("ToCount").parse().unwrap_or(0);
    let mut recipients = Vec::with_capacity(to_count);
    for (key, value) in &fields {
        if key != "ToList" {
            continue;
        }
        let Some((addr, flag)) = value.rsplit_once(' ') else {
            return Err(raise_error!(
                format!("malformed ToList entry {:?}", value),
                ErrorCode::EnvelopeParseError
            ));
        };
        recipients.push(crate::modules::envelope::types::Recipient::new(
            addr,
            flag == "1",
        ));
    }

    let known_keys = [
        "ClientIp",
        "ClientName",
        "ClientCertificate",
        "AuthenticationMechanism",
        "AuthenticationId",
        "From",
        "FromAuthIn",
        "FromAuthOut",
        "Body",
        "Smtputf8",
        "MailFromSize",
        "Utf8MailboxNames",
        "ForwardTo",
        "ForwardToAddress",
        "ToCount",
        "ToRemoteCount",
        "ToList",
        "ToLocalList",
        "Reason",
        "ReasonCode",
    ];
    let extra = fields
        .iter()
        .filter(|(k, _)| !known_keys.contains(&k.as_str()))
        .cloned()
        .collect();

    let sentinel = |v: Option<String>| v.filter(|s| s != "0");

    Ok(Envelope {
        client_ip: get("ClientIp"),
        client_name: get("ClientName"),
        client_certificate: get_opt("ClientCertificate"),
        auth_mechanism: sentinel(get_opt("AuthenticationMechanism")),
        auth_id: sentinel(get_opt("AuthenticationId")),
        mail_from: get("From"),
        mail_from_auth: get_opt("FromAuthIn"),
        mail_from_body: BodyType::from_wire(&get("Body")),
        mail_from_smtputf8: get("Smtputf8") == "1",
        mail_from_size: get_opt("MailFromSize").and_then(|v| v.parse().ok()),
        forward_to: get_opt("ForwardTo"),
        forward_to_address: get_opt("ForwardToAddress"),
        recipients,
        utf8_mailboxes: get("Utf8MailboxNames") == "1",
        reason: get_opt("Reason"),
        reason_code: get_opt("ReasonCode"),
        extra,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::envelope::types::BodyType;

    fn sample() -> Envelope {
        let mut e = Envelope::new("alice@example.com", "10.0.0.1");
        e.client_name = "mail.example.com".to_string();
        e.mail_from_body = BodyType::EightBitMime;
        e.mail_from_smtputf8 = true;
        e.mail_from_size = Some(4096);
        e.add_recipient("bob@example.com", false);
        e.add_recipient("carol@local", true);
        e
    }

    #[test]
    fn round_trips_a_plain_envelope() {
        let original = sample();
        let text = serialize(&original);
        let parsed = parse(&text).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn round_trips_with_newline_escaped_certificate() {
        let mut original = sample();
        original.client_certificate =
            Some("-----BEGIN CERTIFICATE-----\nMIIB==\n-----END CERTIFICATE-----\n".to_string());
        let text = serialize(&original);
        assert!(!text.contains("-----BEGIN CERTIFICATE-----\nMIIB"));
        let parsed = parse(&text).unwrap();
        assert_eq!(original.client_certificate, parsed.client_certificate);
    }

    #[test]
    fn writes_the_current_format_marker_first() {
        let text = serialize(&sample());
        assert_eq!(text.lines().next(), Some(format::CURRENT));
        assert!(text.ends_with("X-MailRelay-End: 1\n"));
    }

    #[test]
    fn reads_prior_format_generations() {
        let mut text = serialize(&sample());
        text = text.replacen(format::CURRENT, "#2821.5", 1);
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed.mail_from, "alice@example.com");
    }

    #[test]
    fn rejects_unknown_format_tag() {
        let text = serialize(&sample()).replacen(format::CURRENT, "#9999.1", 1);
        let err = parse(&text).unwrap_err();
        assert_eq!(err.code(), ErrorCode::EnvelopeVersionError);
    }

    #[test]
    fn rejects_truncated_envelope_missing_end() {
        let text = serialize(&sample());
        let truncated = text.trim_end_matches("X-MailRelay-End: 1\n");
        let err = parse(truncated).unwrap_err();
        assert_eq!(err.code(), ErrorCode::EnvelopeTruncatedError);
    }

    #[test]
    fn preserves_unknown_keys_across_round_trip() {
        let mut original = sample();
        original
            .extra
            .push(("FutureField".to_string(), "future-value".to_string()));
        let text = serialize(&original);
        assert!(text.contains("X-MailRelay-FutureField: future-value"));
        let parsed = parse(&text).unwrap();
        assert_eq!(original, parsed);
    }

    #[test]
    fn tolerates_crlf_line_endings_on_read() {
        let text = serialize(&sample()).replace('\n', "\r\n");
        let parsed = parse(&text).unwrap();
        assert_eq!(parsed, sample());
    }
}
