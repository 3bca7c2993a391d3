//! # waf-wasm-filter
//!
//! A ModSecurity-style Web Application Firewall filter that runs inside a
//! proxy host (Envoy or any other proxy-wasm implementation) as a sandboxed
//! wasm module.
//!
//! ## Features
//!
//! - Per-stream HTTP inspection across all four ModSecurity phases
//! - Chunked body buffering with in-memory limit enforcement
//! - Per-authority rule-set selection with an optional default set
//! - Interruption handling, including mid-response body redaction once
//!   response headers are already on the wire
//! - Host-side transaction and interruption counters
//!
//! ## Architecture
//!
//! The proxy drives the filter through per-stream callbacks (request
//! headers, streamed body chunks, response headers, stream end). The
//! [`stream::StreamContext`] state machine consumes those callbacks, feeds
//! a rule-engine transaction, and answers with [`stream::Flow::Continue`]
//! or [`stream::Flow::Pause`]. Rule evaluation sits behind the object-safe
//! [`engine::Waf`] and [`engine::Transaction`] traits; the bundled
//! directive engine implements them and a production-grade engine can
//! replace it without touching the filter.
//!
//! All host interaction goes through the [`host::Host`] trait, so the
//! state machine runs natively under a scripted host in tests while the
//! wasm build binds it to proxy-wasm hostcalls.

pub mod config;
pub mod engine;
pub mod host;
pub mod logging;
pub mod metrics;
pub mod plugin;
pub mod registry;
pub mod stream;

pub use plugin::FilterPlugin;
pub use stream::{Flow, Phase, StreamContext};
