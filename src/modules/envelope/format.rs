// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

//! The envelope format-version ladder.
//!
//! Grounded on the original store's `format(int generation)` table: a
//! message written by an older daemon carries a lower generation number,
//! read transparently, and silently upgraded to [`CURRENT`] the next time it
//! is written. Generation `0` is current; `-5..0` are the five prior
//! generations this codec still reads.

/// The format tag written by this implementation.
pub const CURRENT: &str = "#2821.8";

/// All format tags this codec accepts on read, current first.
pub const KNOWN: &[&str] = &[
    "#2821.8", "#2821.7", "#2821.6", "#2821.5", "#2821.4", "#2821.3",
];

pub fn is_known(tag: &str) -> bool {
    KNOWN.contains(&tag)
}
