//! proxy-wasm hostcall bindings.

use super::{Host, HostError, HostResult};
use proxy_wasm::hostcalls;
use proxy_wasm::types::{BufferType, MapType, MetricType, Status};

impl From<Status> for HostError {
    fn from(status: Status) -> Self {
        HostError(status as u32)
    }
}

/// [`Host`] implementation backed by proxy-wasm hostcalls. Stateless; the
/// SDK scopes every call to the active stream context.
#[derive(Debug, Clone, Copy, Default)]
pub struct WasmHost;

impl Host for WasmHost {
    fn get_request_header(&self, name: &str) -> Option<String> {
        hostcalls::get_map_value(MapType::HttpRequestHeaders, name)
            .ok()
            .flatten()
    }

    fn get_request_headers(&self) -> Vec<(String, String)> {
        hostcalls::get_map(MapType::HttpRequestHeaders).unwrap_or_default()
    }

    fn get_response_header(&self, name: &str) -> Option<String> {
        hostcalls::get_map_value(MapType::HttpResponseHeaders, name)
            .ok()
            .flatten()
    }

    fn get_response_headers(&self) -> Vec<(String, String)> {
        hostcalls::get_map(MapType::HttpResponseHeaders).unwrap_or_default()
    }

    fn get_request_body(&self, start: usize, len: usize) -> HostResult<Option<Vec<u8>>> {
        hostcalls::get_buffer(BufferType::HttpRequestBody, start, len).map_err(HostError::from)
    }

    fn get_response_body(&self, start: usize, len: usize) -> HostResult<Option<Vec<u8>>> {
        hostcalls::get_buffer(BufferType::HttpResponseBody, start, len).map_err(HostError::from)
    }

    fn replace_response_body(&self, body: &[u8]) -> HostResult<()> {
        hostcalls::set_buffer(BufferType::HttpResponseBody, 0, usize::MAX, body)
            .map_err(HostError::from)
    }

    fn send_local_response(&self, status: u32) -> HostResult<()> {
        // No extra headers, no body; the SDK reports "not a gRPC stream"
        // to the host.
        hostcalls::send_http_response(status, Vec::new(), None).map_err(HostError::from)
    }

    fn get_property(&self, path: &[&str]) -> Option<Vec<u8>> {
        hostcalls::get_property(path.to_vec()).ok().flatten()
    }

    fn define_counter(&self, name: &str) -> HostResult<u32> {
        hostcalls::define_metric(MetricType::Counter, name).map_err(HostError::from)
    }

    fn increment_counter(&self, counter: u32, delta: u64) -> HostResult<()> {
        hostcalls::increment_metric(counter, delta as i64).map_err(HostError::from)
    }
}
