// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use crate::modules::store::id::MessageId;

/// Broadcast by the store from inside the call that causes it; subscribers
/// (the forward driver, chiefly) must be reentrancy-safe and must not block
/// the commit path.
#[derive(Debug, Clone)]
pub enum StoreEvent {
    /// A new message was committed to `.envelope`.
    Updated(MessageId),
    /// A filter (or an operator) materially changed the spool; re-enumerate.
    Rescan,
}
