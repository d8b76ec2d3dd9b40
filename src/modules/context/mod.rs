// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

//! The crate's runtime handle: settings, the message store, and metrics
//! wiring, constructed once at startup and shared by `Arc` with every
//! long-lived component. See the design's §9 "Global mutable state".

use std::sync::Arc;

use crate::modules::error::RelayResult;
use crate::modules::settings::cli::Settings;
use crate::modules::store::MessageStore;

/// Implemented by ambient subsystems (signal manager, metrics, the store
/// itself) that need an async bootstrap step before the daemon starts
/// accepting work.
pub trait Initialize {
    async fn initialize() -> RelayResult<()>;
}

/// Implemented by background loops (forward driver, filter-timeout reaper)
/// that run for the lifetime of the process.
pub trait RelayTask {
    fn start();
}

/// Owns the store and settings for the process; handed out as an `Arc` to
/// the filter chains, the forward driver, and POP view constructors so none
/// of them need process-wide globals of their own.
pub struct Context {
    pub settings: &'static Settings,
    pub store: MessageStore,
}

impl Context {
    pub fn new(settings: &'static Settings, store: MessageStore) -> Arc<Self> {
        Arc::new(Self { settings, store })
    }
}
