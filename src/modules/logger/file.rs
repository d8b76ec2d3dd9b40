// Copyright © 2025 rustmailrelay contributors
// Licensed under the GNU General Public License v3.0 or later.

use crate::modules::logger::{validate_log_level, LocalTimer};
use crate::modules::settings::cli::SETTINGS;
use std::sync::OnceLock;
use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;

pub static LOG_WORKER_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

pub fn setup_file_logger() -> Result<(), tracing::dispatcher::SetGlobalDefaultError> {
    validate_log_level(&SETTINGS.relay_log_level);
    let level = SETTINGS.relay_log_level.parse::<Level>().unwrap();
    let with_ansi = SETTINGS.relay_ansi_logs;

    std::fs::create_dir_all(&SETTINGS.relay_log_dir).expect("failed to create log directory");

    let (writer, guard) = server_log_writer();
    let _ = LOG_WORKER_GUARD.set(guard);

    let layer = fmt::layer()
        .with_timer(LocalTimer)
        .with_ansi(with_ansi)
        .with_level(true)
        .with_writer(writer)
        .with_target(true);

    let subscriber = tracing_subscriber::registry()
        .with(LevelFilter::from_level(level))
        .with(layer);

    tracing::subscriber::set_global_default(subscriber)
}

fn server_log_writer() -> (NonBlocking, WorkerGuard) {
    let rolling = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("relay")
        .max_log_files(SETTINGS.relay_max_server_log_files)
        .build(&SETTINGS.relay_log_dir)
        .expect("failed to initialize rolling file appender");
    tracing_appender::non_blocking(rolling)
}
