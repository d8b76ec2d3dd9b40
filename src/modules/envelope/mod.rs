// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

//! The envelope wire format: a line-oriented text record paired 1:1 with a
//! spool content file, described in full in the design's §4.1.

pub mod codec;
pub mod format;
pub mod types;

pub use types::{BodyType, Envelope, Recipient};
