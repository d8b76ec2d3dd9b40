// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use bb8::RunError;
use code::ErrorCode;
use snafu::{Location, Snafu};

use crate::raise_error;

pub mod code;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RelayError {
    #[snafu(display("{message}"))]
    Generic {
        message: String,
        #[snafu(implicit)]
        location: Location,
        code: ErrorCode,
    },
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::Generic { code, .. } => *code,
        }
    }
}

pub type RelayResult<T, E = RelayError> = std::result::Result<T, E>;

impl From<RunError<RelayError>> for RelayError {
    fn from(e: RunError<RelayError>) -> Self {
        match e {
            RunError::User(e) => e,
            RunError::TimedOut => raise_error!(
                "timed out acquiring a connection from the pool".into(),
                ErrorCode::ForwardTransientError
            ),
        }
    }
}

impl From<std::io::Error> for RelayError {
    fn from(e: std::io::Error) -> Self {
        raise_error!(e.to_string(), ErrorCode::InternalError)
    }
}
