//! Centralised tracing initialisation for formsync.
//!
//! Call [`init_tracing`] once at program start. Besides the console layer it
//! can append plain-text lines to the handoff directory's `debug.log`, which
//! CI keeps as a job artifact.
//!
//! Safe to call more than once; only the first call takes effect.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Initialise the global tracing subscriber.
///
/// * `json`: emit newline-delimited JSON on the console.
/// * `level`: default verbosity when `RUST_LOG` is not set.
/// * `log_file`: also append to this file, without ANSI colours. A file
///   that cannot be opened is reported on stderr and skipped.
pub fn init_tracing(json: bool, level: Level, log_file: Option<&Path>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()));

    let file_layer = log_file.and_then(open_log).map(|file| {
        fmt::layer()
            .with_target(false)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .boxed()
    });

    let console_layer = if json {
        fmt::layer().with_target(false).json().boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    tracing_subscriber::registry()
        .with(file_layer)
        .with(console_layer)
        .with(env_filter)
        .try_init()
        .ok();
}

fn open_log(path: &Path) -> Option<File> {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            eprintln!("cannot create {}: {e}", parent.display());
            return None;
        }
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| eprintln!("cannot open {}: {e}", path.display()))
        .ok()
}
