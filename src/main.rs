// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use std::sync::Arc;
use std::time::Duration;

use mimalloc::MiMalloc;
use tracing::{error, info};

use crate::modules::common::signal::{SignalManager, SIGNAL_MANAGER};
use crate::modules::context::{Context, Initialize};
use crate::modules::error::code::ErrorCode;
use crate::modules::error::RelayResult;
use crate::modules::filter::copy::{CopyFilter, CopyMode};
use crate::modules::filter::executable::ExecutableFilter;
use crate::modules::filter::msgid::MessageIdFilter;
use crate::modules::filter::mx::MxFilter;
use crate::modules::filter::network::NetworkFilter;
use crate::modules::filter::{Filter, FilterChain};
use crate::modules::forward::ForwardDriver;
use crate::modules::metrics::MetricsService;
use crate::modules::scheduler::periodic::PeriodicTask;
use crate::modules::settings::cli::SETTINGS;
use crate::modules::store::MessageStore;
use crate::{raise_error, relay_version};

mod modules;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

static LOGO: &str = r#"
            _                 _ _                 _
  _ __ _  _| |_ _ __  __ _ ___| | |_ _ ___ _ _ _  _| |
 | '_ \ || |_ / _/\/ _` / -_) |  _| '_/ -_) | | '_ \|
 | .__/\_,_/__|___\__,_\___|_|\__|_| \___|_|_| .__/_|
 |_|                                         |_|
"#;

#[tokio::main]
async fn main() -> RelayResult<()> {
    modules::logger::initialize_logging();
    info!("{}", LOGO);
    info!("Starting rustmailrelay");
    info!("Version:  {}", relay_version!());
    info!("Git:      [{}]", env!("GIT_HASH"));

    if let Err(error) = run().await {
        error!("{:?}", error);
        return Err(error);
    }
    Ok(())
}

/// Wires settings, the spool store, and the filter chains together and
/// drives the forward loop. There is no public network-facing CLI or REST
/// API in this core: SMTP and POP3 wire acceptors are external
/// collaborators that talk to the spool directly.
async fn run() -> RelayResult<()> {
    SignalManager::initialize().await?;
    MetricsService::initialize().await?;

    let store = MessageStore::new(&SETTINGS.relay_spool_dir, max_message_size())?;
    let context = Context::new(&SETTINGS, store);

    // Validated at startup even though no in-process SMTP receiver consumes
    // it yet; the external receiver applies these at commit time.
    let _server_filters = build_filter_chain(&SETTINGS.relay_server_filters)?;
    let client_filters = build_filter_chain(&SETTINGS.relay_client_filters)?;

    let driver = Arc::new(ForwardDriver::new(
        context.clone(),
        client_filters,
        SETTINGS.relay_forward_default_host.clone(),
        SETTINGS.relay_forward_default_port,
    ));

    let tick_interval = driver.tick_interval();
    let handle = PeriodicTask::new("forward-driver").start(
        {
            let driver = driver.clone();
            move |_| {
                let driver = driver.clone();
                async move { driver.tick().await }
            }
        },
        None,
        tick_interval,
        false,
        true,
    );

    let mut shutdown = SIGNAL_MANAGER.subscribe();
    let _ = shutdown.recv().await;
    info!("shutting down forward driver");
    handle.cancel().await;

    Ok(())
}

fn max_message_size() -> Option<u64> {
    if SETTINGS.relay_max_message_size == 0 {
        None
    } else {
        Some(SETTINGS.relay_max_message_size)
    }
}

/// Parses the settings' ordered, comma-separated filter spec list into a
/// `FilterChain`. Each entry is either an absolute executable path, a
/// `net:host:port` network filter, or one of the built-ins `copy`,
/// `msgid`, `mx`.
fn build_filter_chain(specs: &[String]) -> RelayResult<FilterChain> {
    let mut filters = Vec::with_capacity(specs.len());
    for spec in specs {
        let filter = if let Some(address) = spec.strip_prefix("net:") {
            Filter::Network(NetworkFilter::new(address))
        } else {
            match spec.as_str() {
                "copy" => {
                    let mode = if SETTINGS.relay_pop_by_name { CopyMode::PopByName } else { CopyMode::Plain };
                    Filter::Copy(CopyFilter::new(true, mode))
                }
                "msgid" => Filter::MessageId(MessageIdFilter::new(local_domain())),
                "mx" => Filter::Mx(MxFilter::new(parse_nameservers()?, SETTINGS.relay_forward_default_port, Duration::from_secs(60))),
                path => Filter::Executable(ExecutableFilter::new(path)),
            }
        };
        filters.push(filter);
    }
    Ok(FilterChain::new(
        filters,
        Duration::from_secs(SETTINGS.relay_filter_timeout_secs),
    ))
}

fn local_domain() -> String {
    gethostname::gethostname().to_string_lossy().to_string()
}

fn parse_nameservers() -> RelayResult<Vec<std::net::SocketAddr>> {
    SETTINGS
        .relay_nameservers
        .iter()
        .map(|s| {
            s.parse()
                .map_err(|e| raise_error!(format!("invalid nameserver address {s:?}: {e}"), ErrorCode::InvalidParameter))
        })
        .collect()
}
