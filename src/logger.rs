//! Leveled logging capability handed to the discovery clients and the prober.

use std::sync::Arc;

/// Sink for diagnostic messages, each with optional detail text such as an error chain.
pub trait Logger: Send + Sync {
    fn debug(&self, message: &str, details: Option<&str>);
    fn info(&self, message: &str, details: Option<&str>);
    fn warning(&self, message: &str, details: Option<&str>);
    fn error(&self, message: &str, details: Option<&str>);
}

/// Forwards to the `log` macros. Nothing is printed unless the application installs a logger.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFacade;

impl Logger for LogFacade {
    fn debug(&self, message: &str, details: Option<&str>) {
        match details {
            Some(d) => log::debug!("{message} ({d})"),
            None => log::debug!("{message}"),
        }
    }

    fn info(&self, message: &str, details: Option<&str>) {
        match details {
            Some(d) => log::info!("{message} ({d})"),
            None => log::info!("{message}"),
        }
    }

    fn warning(&self, message: &str, details: Option<&str>) {
        match details {
            Some(d) => log::warn!("{message} ({d})"),
            None => log::warn!("{message}"),
        }
    }

    fn error(&self, message: &str, details: Option<&str>) {
        match details {
            Some(d) => log::error!("{message} ({d})"),
            None => log::error!("{message}"),
        }
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullLogger;

impl Logger for NullLogger {
    fn debug(&self, _: &str, _: Option<&str>) {}
    fn info(&self, _: &str, _: Option<&str>) {}
    fn warning(&self, _: &str, _: Option<&str>) {}
    fn error(&self, _: &str, _: Option<&str>) {}
}

pub(crate) fn default_logger() -> Arc<dyn Logger> {
    Arc::new(LogFacade)
}
