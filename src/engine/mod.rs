//! # Rule-engine contract
//!
//! The stream filter never talks to a rule engine directly; it drives the
//! object-safe [`Waf`] and [`Transaction`] traits. A [`WafFactory`]
//! compiles one directive set into one shared engine instance at plugin
//! start, and every HTTP exchange gets its own transaction from the engine
//! protecting its authority.
//!
//! The bundled [`DirectiveFactory`] implements the contract for a compact
//! SecLang subset so the module is usable and testable on its own. It is
//! not a full SecLang implementation; a production engine slots in behind
//! the same traits.

mod directives;
mod error;
mod ruleset;
mod transaction;

pub use directives::{BodyLimitAction, EngineMode};
pub use error::{EngineError, EngineResult};
pub use ruleset::DirectiveFactory;

use std::rc::Rc;

/// Verdict from a matched rule demanding that the exchange be denied or,
/// past the response-header phase, that the body be redacted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interruption {
    /// Disruptive action the rule requested (e.g. `deny`).
    pub action: String,
    /// Id of the rule that fired; 0 when the engine itself interrupted,
    /// for instance on a body-limit rejection.
    pub rule_id: i32,
    /// Response status requested by the rule; 0 lets the filter pick its
    /// default.
    pub status: u32,
}

/// Rule severities, ordered from most to least severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Severity 0.
    Emergency,
    /// Severity 1.
    Alert,
    /// Severity 2.
    Critical,
    /// Severity 3.
    Error,
    /// Severity 4.
    Warning,
    /// Severity 5.
    Notice,
    /// Severity 6.
    Info,
    /// Severity 7.
    Debug,
}

impl Severity {
    /// Parse a severity from its name or numeric form.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "EMERGENCY" | "0" => Some(Self::Emergency),
            "ALERT" | "1" => Some(Self::Alert),
            "CRITICAL" | "2" => Some(Self::Critical),
            "ERROR" | "3" => Some(Self::Error),
            "WARNING" | "4" => Some(Self::Warning),
            "NOTICE" | "5" => Some(Self::Notice),
            "INFO" | "6" => Some(Self::Info),
            "DEBUG" | "7" => Some(Self::Debug),
            _ => None,
        }
    }

    /// Lower-case severity name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Emergency => "emergency",
            Self::Alert => "alert",
            Self::Critical => "critical",
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Notice => "notice",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

/// A rule match surfaced for error logging: the severity picks the host
/// log level, the message is the pre-formatted error-log line.
#[derive(Debug, Clone)]
pub struct MatchedRule {
    /// Transaction the rule fired in.
    pub transaction_id: String,
    /// Id of the matched rule.
    pub rule_id: i32,
    /// Rule severity.
    pub severity: Severity,
    /// Pre-formatted error-log line.
    pub message: String,
}

/// Callback receiving matched-rule records as they fire.
pub type ErrorCallback = Rc<dyn Fn(&MatchedRule)>;

/// Construction-time settings shared by every engine instance.
#[derive(Clone)]
pub struct EngineSettings {
    /// Receives matched-rule records for error logging.
    pub error_callback: Option<ErrorCallback>,
    /// Bodies may only be buffered in memory; the sandbox exposes no
    /// filesystem, so the in-memory limit is the overall limit.
    pub in_memory_body_only: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            error_callback: None,
            in_memory_body_only: true,
        }
    }
}

/// A compiled rule-engine instance, shared-immutable after construction.
pub trait Waf {
    /// Start a transaction for one HTTP exchange.
    fn new_transaction(&self) -> Box<dyn Transaction>;
}

/// Compiles directive sets into engine instances.
pub trait WafFactory {
    /// Compile the ordered directive lines of one set.
    fn compile(
        &self,
        directives: &[String],
        settings: &EngineSettings,
    ) -> EngineResult<Rc<dyn Waf>>;
}

/// Rule evaluation for a single HTTP exchange.
///
/// The owning stream calls each `process_*` hook at most once, feeds body
/// chunks through the `write_*` methods, and closes the transaction when
/// the stream ends.
pub trait Transaction {
    /// Engine-assigned transaction id.
    fn id(&self) -> &str;

    /// True when `SecRuleEngine Off` disabled evaluation entirely.
    fn is_rule_engine_off(&self) -> bool;
    /// True when request bodies may be buffered and inspected.
    fn is_request_body_accessible(&self) -> bool;
    /// True when response bodies may be buffered and inspected.
    fn is_response_body_accessible(&self) -> bool;
    /// True when the response content type is inspectable.
    fn is_response_body_processable(&self) -> bool;

    /// Record the connection four-tuple.
    fn process_connection(&mut self, src_ip: &str, src_port: u32, dst_ip: &str, dst_port: u32);
    /// Record the request line.
    fn process_uri(&mut self, uri: &str, method: &str, protocol: &str);
    /// Add one request header.
    fn add_request_header(&mut self, name: &str, value: &str);
    /// Record the virtual host the request is addressed to.
    fn set_server_name(&mut self, server_name: &str);
    /// Evaluate phase-1 rules.
    fn process_request_headers(&mut self) -> Option<Interruption>;

    /// Buffer a request-body chunk. Returns the bytes actually written;
    /// fewer than offered means the configured limit was reached and the
    /// engine has dealt with the body phase itself.
    fn write_request_body(&mut self, chunk: &[u8]) -> EngineResult<(Option<Interruption>, usize)>;
    /// Evaluate phase-2 rules.
    fn process_request_body(&mut self) -> EngineResult<Option<Interruption>>;

    /// Add one response header.
    fn add_response_header(&mut self, name: &str, value: &str);
    /// Record the response status and evaluate phase-3 rules.
    fn process_response_headers(&mut self, status: u32, protocol: &str) -> Option<Interruption>;

    /// Buffer a response-body chunk; same limit semantics as the request
    /// side.
    fn write_response_body(&mut self, chunk: &[u8]) -> EngineResult<(Option<Interruption>, usize)>;
    /// Evaluate phase-4 rules.
    fn process_response_body(&mut self) -> EngineResult<Option<Interruption>>;

    /// Run the logging phase.
    fn process_logging(&mut self);
    /// Release engine-side resources. Errors on a second close.
    fn close(&mut self) -> EngineResult<()>;
}
