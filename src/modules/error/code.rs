// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[repr(u32)]
pub enum ErrorCode {
    // Parameter / protocol errors (10000-10999)
    InvalidParameter = 10000,
    EnvelopeParseError = 10010,
    EnvelopeVersionError = 10020,
    EnvelopeTruncatedError = 10030,

    // Configuration errors (20000-20999)
    InvalidDirectory = 20000,
    MissingConfiguration = 20010,

    // Store / spool errors (30000-30999)
    SizeLimitExceeded = 30000,
    MessageNotFound = 30010,
    LockFailed = 30020,
    GetError = 30030,

    // Filter errors (40000-40999)
    FilterFailed = 40000,
    FilterTimeout = 40010,

    // Forward / upstream errors (50000-50999)
    ForwardTransientError = 50000,
    ForwardPermanentError = 50010,
    MxLookupFailed = 50020,
    SmtpCommandFailed = 50030,

    // POP errors (60000-60999)
    CannotRead = 60000,
    CannotDelete = 60010,

    // Internal (70000-70999)
    InternalError = 70000,
}

impl ErrorCode {
    /// A short machine-stable tag, used as a tracing/metrics label.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorCode::InvalidParameter => "invalid_parameter",
            ErrorCode::EnvelopeParseError => "envelope_parse_error",
            ErrorCode::EnvelopeVersionError => "envelope_version_error",
            ErrorCode::EnvelopeTruncatedError => "envelope_truncated_error",
            ErrorCode::InvalidDirectory => "invalid_directory",
            ErrorCode::MissingConfiguration => "missing_configuration",
            ErrorCode::SizeLimitExceeded => "size_limit_exceeded",
            ErrorCode::MessageNotFound => "message_not_found",
            ErrorCode::LockFailed => "lock_failed",
            ErrorCode::GetError => "get_error",
            ErrorCode::FilterFailed => "filter_failed",
            ErrorCode::FilterTimeout => "filter_timeout",
            ErrorCode::ForwardTransientError => "forward_transient_error",
            ErrorCode::ForwardPermanentError => "forward_permanent_error",
            ErrorCode::MxLookupFailed => "mx_lookup_failed",
            ErrorCode::SmtpCommandFailed => "smtp_command_failed",
            ErrorCode::CannotRead => "cannot_read",
            ErrorCode::CannotDelete => "cannot_delete",
            ErrorCode::InternalError => "internal_error",
        }
    }
}
