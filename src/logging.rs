//! Log bootstrap.
//!
//! corvid logs through `tracing`. [`init`] installs a `fmt` subscriber whose
//! level sits behind a reload layer, so [`Resources::set_log_level`] can
//! change verbosity after boot without restarting.
//!
//! [`Resources::set_log_level`]: crate::Resources::set_log_level

use std::io;

use tracing::Subscriber;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Registry, fmt, reload};

/// Handle to the global subscriber's level.
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<LevelFilter, Registry>,
}

impl LogHandle {
    pub fn set_level(&self, level: LevelFilter) {
        if let Err(e) = self.handle.reload(level) {
            tracing::warn!("failed to change log level: {e}");
        }
    }

    pub fn level(&self) -> Option<LevelFilter> {
        self.handle.clone_current()
    }
}

/// Installs the global subscriber at `level`.
///
/// Returns `None` when a global subscriber is already installed (tests, or an
/// embedding application that configured its own); the level is then left to
/// whoever owns it.
pub fn init(level: &str) -> Option<LogHandle> {
    let (subscriber, handle) = subscriber(parse_level(level), io::stdout);
    subscriber.try_init().ok().map(|()| handle)
}

/// A `fmt` subscriber writing to `writer`, filtered by a reloadable level.
fn subscriber<W>(level: LevelFilter, writer: W) -> (impl Subscriber + Send + Sync + 'static, LogHandle)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let (filter, handle) = reload::Layer::new(level);
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer));
    (subscriber, LogHandle { handle })
}

/// Case-insensitive; anything unrecognised means `info`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.to_ascii_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "warn" => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        "off" => LevelFilter::OFF,
        _ => LevelFilter::INFO,
    }
}
