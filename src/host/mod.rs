//! # Host ABI surface
//!
//! Every interaction with the proxy goes through the [`Host`] trait: header
//! maps, cumulative body buffers, body replacement, local responses,
//! connection properties and counter metrics. The wasm build binds it to
//! proxy-wasm hostcalls; tests drive the filter with a scripted
//! implementation instead.

#[cfg(target_arch = "wasm32")]
mod wasm;

#[cfg(target_arch = "wasm32")]
pub use wasm::WasmHost;

use thiserror::Error;

/// A failed host call, carrying the host's status code.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("host call failed with status {0}")]
pub struct HostError(pub u32);

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Synchronous operations the proxy host offers the filter.
///
/// Body reads return `Ok(None)` when the host holds no bytes at the
/// requested offset; that is distinct from a failed call.
pub trait Host {
    /// Value of one request header, pseudo-headers included.
    fn get_request_header(&self, name: &str) -> Option<String>;
    /// The full request-header map.
    fn get_request_headers(&self) -> Vec<(String, String)>;
    /// Value of one response header.
    fn get_response_header(&self, name: &str) -> Option<String>;
    /// The full response-header map.
    fn get_response_headers(&self) -> Vec<(String, String)>;

    /// Read `len` bytes of the buffered request body starting at `start`.
    fn get_request_body(&self, start: usize, len: usize) -> HostResult<Option<Vec<u8>>>;
    /// Read `len` bytes of the buffered response body starting at `start`.
    fn get_response_body(&self, start: usize, len: usize) -> HostResult<Option<Vec<u8>>>;
    /// Replace the entire buffered response body.
    fn replace_response_body(&self, body: &[u8]) -> HostResult<()>;

    /// Short-circuit the exchange with a synthetic response carrying the
    /// given status, no extra headers and no body.
    fn send_local_response(&self, status: u32) -> HostResult<()>;

    /// Raw bytes of a host property such as `source.address`.
    fn get_property(&self, path: &[&str]) -> Option<Vec<u8>>;

    /// Define (or look up) a counter metric, returning its handle.
    fn define_counter(&self, name: &str) -> HostResult<u32>;
    /// Increment a counter by `delta`.
    fn increment_counter(&self, counter: u32, delta: u64) -> HostResult<()>;
}
