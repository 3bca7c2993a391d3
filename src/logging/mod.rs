//! # Log routing
//!
//! Debug and error records flow to the proxy's logger. On the wasm target
//! they go straight to the host log; native builds (tests) route through
//! the `log` facade. The host knows a Critical level the `log` facade does
//! not, so severity routing keeps its own level set.

mod audit;

pub use audit::{AuditLogBridge, REQUEST_ID_HEADER};

use crate::engine::Severity;

/// Log levels understood by the proxy host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Finest-grained diagnostics.
    Trace,
    /// Diagnostics.
    Debug,
    /// Normal operation.
    Info,
    /// Degraded but recovered.
    Warn,
    /// Failed operations.
    Error,
    /// The host's highest level, above Error.
    Critical,
}

/// Write one record to the host log.
#[cfg(target_arch = "wasm32")]
pub fn emit(level: Level, message: &str) {
    use proxy_wasm::types::LogLevel;
    let level = match level {
        Level::Trace => LogLevel::Trace,
        Level::Debug => LogLevel::Debug,
        Level::Info => LogLevel::Info,
        Level::Warn => LogLevel::Warn,
        Level::Error => LogLevel::Error,
        Level::Critical => LogLevel::Critical,
    };
    let _ = proxy_wasm::hostcalls::log(level, message);
}

/// Write one record to the host log.
#[cfg(not(target_arch = "wasm32"))]
pub fn emit(level: Level, message: &str) {
    let level = match level {
        Level::Trace => log::Level::Trace,
        Level::Debug => log::Level::Debug,
        Level::Info => log::Level::Info,
        Level::Warn => log::Level::Warn,
        Level::Error | Level::Critical => log::Level::Error,
    };
    log::log!(level, "{}", message);
}

/// Host log level for a matched-rule severity.
pub fn severity_level(severity: Severity) -> Level {
    match severity {
        Severity::Emergency | Severity::Alert | Severity::Critical => Level::Critical,
        Severity::Error => Level::Error,
        Severity::Warning => Level::Warn,
        Severity::Notice | Severity::Info => Level::Info,
        Severity::Debug => Level::Debug,
    }
}

/// Per-stream logger. Carries the stream's context id and, once a
/// non-default rule set is selected, the routed authority.
#[derive(Debug, Clone)]
pub struct StreamLogger {
    context_id: u32,
    authority: Option<String>,
}

impl StreamLogger {
    /// Logger for a fresh stream.
    pub fn new(context_id: u32) -> Self {
        Self {
            context_id,
            authority: None,
        }
    }

    /// Attach the authority the stream was routed by.
    pub fn set_authority(&mut self, authority: &str) {
        self.authority = Some(authority.to_string());
    }

    fn decorate(&self, text: &str) -> String {
        match &self.authority {
            Some(authority) => format!(
                "[context_id {}] [authority {}] {}",
                self.context_id, authority, text
            ),
            None => format!("[context_id {}] {}", self.context_id, text),
        }
    }

    /// Debug-level record.
    pub fn debug(&self, text: &str) {
        emit(Level::Debug, &self.decorate(text));
    }

    /// Info-level record.
    pub fn info(&self, text: &str) {
        emit(Level::Info, &self.decorate(text));
    }

    /// Warn-level record.
    pub fn warn(&self, text: &str) {
        emit(Level::Warn, &self.decorate(text));
    }

    /// Error-level record.
    pub fn error(&self, text: &str) {
        emit(Level::Error, &self.decorate(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_routing() {
        assert_eq!(severity_level(Severity::Emergency), Level::Critical);
        assert_eq!(severity_level(Severity::Alert), Level::Critical);
        assert_eq!(severity_level(Severity::Critical), Level::Critical);
        assert_eq!(severity_level(Severity::Error), Level::Error);
        assert_eq!(severity_level(Severity::Warning), Level::Warn);
        assert_eq!(severity_level(Severity::Notice), Level::Info);
        assert_eq!(severity_level(Severity::Info), Level::Info);
        assert_eq!(severity_level(Severity::Debug), Level::Debug);
    }

    #[test]
    fn test_stream_logger_decoration() {
        let mut logger = StreamLogger::new(7);
        assert_eq!(logger.decorate("hi"), "[context_id 7] hi");

        logger.set_authority("foo.example.com");
        assert_eq!(
            logger.decorate("hi"),
            "[context_id 7] [authority foo.example.com] hi"
        );
    }
}
