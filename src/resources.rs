//! The resource container shared by every component.
//!
//! Built once during boot, mutated through `&mut self` setters until
//! [`App::build`](crate::App::build) wraps it in an `Arc`, then read-only
//! except for the log level.

use std::any::Any;
use std::env;
use std::sync::Arc;

use crate::config::Config;
use crate::error::BoxError;
use crate::logging::{self, LogHandle};

/// A storage backend handed to components through [`Resources::db`].
///
/// corvid only drives its lifecycle: [`init`](DatabaseConnector::init) runs
/// before any service is initialised, [`shutdown`](DatabaseConnector::shutdown)
/// after every service has shut down.
pub trait DatabaseConnector: Send + Sync + 'static {
    fn init(&self, config: &Config) -> Result<(), BoxError>;

    fn shutdown(&self) -> Result<(), BoxError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any;
}

pub struct Resources {
    config: Config,
    log: Option<LogHandle>,
    db: Option<Arc<dyn DatabaseConnector>>,
}

impl Resources {
    pub fn new(config: Config) -> Self {
        Self { config, log: None, db: None }
    }

    /// Installs the global log subscriber at `GENERAL_LOG_LEVEL`, then loads
    /// [`Config::from_env`]. The subscriber goes first so applied overrides
    /// are logged.
    pub fn from_env() -> Self {
        let log = logging::init(&env::var("GENERAL_LOG_LEVEL").unwrap_or_default());
        let config = Config::from_env();
        Self { config, log, db: None }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replaces the configuration and applies its log level.
    pub fn set_config(&mut self, config: Config) {
        self.config = config;
        self.set_log_level(&self.config.general.log_level);
    }

    pub fn set_db(&mut self, db: Arc<dyn DatabaseConnector>) {
        self.db = Some(db);
    }

    pub fn set_log_handle(&mut self, handle: LogHandle) {
        self.log = Some(handle);
    }

    /// Adjusts the global log level. A no-op when corvid does not own the
    /// subscriber.
    pub fn set_log_level(&self, level: &str) {
        if let Some(log) = &self.log {
            log.set_level(logging::parse_level(level));
        }
    }

    pub fn log_handle(&self) -> Option<&LogHandle> {
        self.log.as_ref()
    }

    pub fn connector(&self) -> Option<&Arc<dyn DatabaseConnector>> {
        self.db.as_ref()
    }

    /// The storage connector, downcast to its concrete type.
    pub fn db<T: DatabaseConnector>(&self) -> Option<&T> {
        self.db.as_ref()?.as_any().downcast_ref()
    }
}

impl Default for Resources {
    fn default() -> Self {
        Self::new(Config::default())
    }
}
