//! Log routing for pool activity

use std::fmt;
use std::sync::Arc;

/// Severity attached to every pool log message
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// All levels, least severe first
    pub const ALL: [LogLevel; 6] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Fatal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Callback receiving a formatted message and its level
pub type LogHandler = Arc<dyn Fn(&str, LogLevel) + Send + Sync>;

/// Where pool log messages go
///
/// # Examples
///
/// ```
/// use esox_resourcepool::{LogLevel, LogTarget, PoolConfiguration};
///
/// let config = PoolConfiguration::new()
///     .with_log(LogTarget::custom(|message, level| {
///         if level >= LogLevel::Warn {
///             eprintln!("{message}");
///         }
///     }));
///
/// assert!(config.log.is_enabled());
/// ```
#[derive(Clone, Default)]
pub enum LogTarget {
    /// Drop every message
    #[default]
    Disabled,

    /// Emit `tracing` events tagged with the pool name
    Console,

    /// Hand messages to a caller-supplied handler
    Custom(LogHandler),
}

impl LogTarget {
    pub fn custom<H>(handler: H) -> Self
    where
        H: Fn(&str, LogLevel) + Send + Sync + 'static,
    {
        LogTarget::Custom(Arc::new(handler))
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, LogTarget::Disabled)
    }
}

impl fmt::Debug for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogTarget::Disabled => f.write_str("Disabled"),
            LogTarget::Console => f.write_str("Console"),
            LogTarget::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Logging capability resolved once per pool
pub(crate) struct PoolLogger {
    name: Arc<str>,
    target: LogTarget,
}

impl PoolLogger {
    pub fn new(name: &str, target: LogTarget) -> Self {
        Self {
            name: Arc::from(name),
            target,
        }
    }

    pub fn log(&self, level: LogLevel, args: fmt::Arguments<'_>) {
        match &self.target {
            LogTarget::Disabled => {}
            LogTarget::Console => {
                let pool = &*self.name;
                match level {
                    LogLevel::Trace => tracing::trace!(pool, "{}", args),
                    LogLevel::Debug => tracing::debug!(pool, "{}", args),
                    LogLevel::Info => tracing::info!(pool, "{}", args),
                    LogLevel::Warn => tracing::warn!(pool, "{}", args),
                    LogLevel::Error => tracing::error!(pool, "{}", args),
                    LogLevel::Fatal => tracing::error!(pool, fatal = true, "{}", args),
                }
            }
            LogTarget::Custom(handler) => {
                let message = format!("pool {} - {}", self.name, args);
                handler(&message, level);
            }
        }
    }

    pub fn trace(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Trace, args);
    }

    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Debug, args);
    }

    pub fn info(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Info, args);
    }

    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Warn, args);
    }

    pub fn error(&self, args: fmt::Arguments<'_>) {
        self.log(LogLevel::Error, args);
    }
}
