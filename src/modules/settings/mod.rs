// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

pub mod cli;
