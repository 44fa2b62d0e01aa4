//! Logging setup helpers.
//!
//! The container emits structured `tracing` events under the
//! `blueprint_di` target. This module wires up a subscriber for the two
//! common shapes: JSON for production aggregation, pretty for local
//! development.
//!
//! # Example
//!
//! ```rust,ignore
//! use blueprint_di::logging;
//!
//! // JSON if logging-json is enabled, pretty otherwise
//! logging::init();
//!
//! // Or configure explicitly
//! logging::builder()
//!     .with_level(tracing::Level::TRACE)
//!     .di_only()
//!     .pretty()
//!     .init();
//! ```

#[cfg(feature = "logging")]
use tracing::Level;

/// Logging output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// JSON structured logging (production default)
    #[default]
    Json,
    /// Pretty colorful output (development)
    Pretty,
    /// Compact single-line output
    Compact,
}

/// Builder for subscriber configuration.
#[cfg(feature = "logging")]
#[derive(Debug, Clone)]
pub struct LoggingBuilder {
    level: Level,
    format: LogFormat,
    target: Option<&'static str>,
    with_file: bool,
    with_line_number: bool,
}

#[cfg(feature = "logging")]
impl Default for LoggingBuilder {
    fn default() -> Self {
        Self {
            level: Level::DEBUG,
            format: LogFormat::Json,
            target: None,
            with_file: false,
            with_line_number: false,
        }
    }
}

#[cfg(feature = "logging")]
impl LoggingBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the minimum level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Only show events from a specific target.
    pub fn with_target_filter(mut self, target: &'static str) -> Self {
        self.target = Some(target);
        self
    }

    /// Only show container events.
    pub fn di_only(self) -> Self {
        self.with_target_filter("blueprint_di")
    }

    /// Include file names in output.
    pub fn with_file(mut self) -> Self {
        self.with_file = true;
        self
    }

    /// Include line numbers in output.
    pub fn with_line_number(mut self) -> Self {
        self.with_line_number = true;
        self
    }

    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    pub fn pretty(mut self) -> Self {
        self.format = LogFormat::Pretty;
        self
    }

    pub fn compact(mut self) -> Self {
        self.format = LogFormat::Compact;
        self
    }

    /// Install the subscriber.
    ///
    /// Requires `logging-json` or `logging-pretty`; a no-op otherwise.
    #[cfg(any(feature = "logging-json", feature = "logging-pretty"))]
    pub fn init(self) {
        use tracing_subscriber::{EnvFilter, fmt, prelude::*};

        let filter = if let Some(target) = self.target {
            EnvFilter::new(format!("{}={}", target, self.level))
        } else {
            EnvFilter::new(self.level.to_string())
        };

        match self.format {
            #[cfg(feature = "logging-json")]
            LogFormat::Json => {
                let layer = fmt::layer()
                    .json()
                    .with_file(self.with_file)
                    .with_line_number(self.with_line_number)
                    .with_target(true);
                tracing_subscriber::registry().with(filter).with(layer).init();
            }
            #[cfg(not(feature = "logging-json"))]
            LogFormat::Json => {
                let layer = fmt::layer()
                    .with_file(self.with_file)
                    .with_line_number(self.with_line_number)
                    .with_target(true);
                tracing_subscriber::registry().with(filter).with(layer).init();
            }
            LogFormat::Pretty => {
                let layer = fmt::layer()
                    .pretty()
                    .with_file(self.with_file)
                    .with_line_number(self.with_line_number)
                    .with_target(true);
                tracing_subscriber::registry().with(filter).with(layer).init();
            }
            LogFormat::Compact => {
                let layer = fmt::layer()
                    .compact()
                    .with_file(self.with_file)
                    .with_line_number(self.with_line_number)
                    .with_target(true);
                tracing_subscriber::registry().with(filter).with(layer).init();
            }
        }
    }

    /// No-op without a subscriber feature.
    #[cfg(not(any(feature = "logging-json", feature = "logging-pretty")))]
    pub fn init(self) {}
}

/// Create a new logging builder.
#[cfg(feature = "logging")]
pub fn builder() -> LoggingBuilder {
    LoggingBuilder::new()
}

/// Initialize with defaults: JSON when `logging-json` is enabled, pretty
/// when only `logging-pretty` is.
#[cfg(feature = "logging")]
pub fn init() {
    #[cfg(feature = "logging-json")]
    builder().json().init();
    #[cfg(all(feature = "logging-pretty", not(feature = "logging-json")))]
    builder().pretty().init();
}

/// Initialize container-only logging.
#[cfg(feature = "logging")]
pub fn init_di_only() {
    builder().di_only().init();
}
