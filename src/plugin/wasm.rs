//! proxy-wasm entrypoints: the VM-level factory, the root (plugin)
//! context and the per-stream HTTP context.

use super::FilterPlugin;
use crate::engine::DirectiveFactory;
use crate::host::WasmHost;
use crate::logging::{emit, Level};
use crate::stream::{Flow, StreamContext};
use proxy_wasm::traits::{Context, HttpContext, RootContext};
use proxy_wasm::types::{Action, ContextType, LogLevel};

proxy_wasm::main! {{
    proxy_wasm::set_log_level(LogLevel::Info);
    proxy_wasm::set_root_context(|_| -> Box<dyn RootContext> {
        Box::new(FilterRoot::new())
    });
}}

struct FilterRoot {
    plugin: FilterPlugin<DirectiveFactory>,
}

impl FilterRoot {
    fn new() -> Self {
        Self {
            plugin: FilterPlugin::new(DirectiveFactory),
        }
    }
}

impl Context for FilterRoot {}

impl RootContext for FilterRoot {
    fn on_configure(&mut self, _plugin_configuration_size: usize) -> bool {
        let data = self.get_plugin_configuration();
        match self.plugin.configure(data.as_deref()) {
            Ok(()) => true,
            Err(err) => {
                emit(
                    Level::Critical,
                    &format!("failed to configure the filter: {}", err),
                );
                false
            }
        }
    }

    fn create_http_context(&self, context_id: u32) -> Option<Box<dyn HttpContext>> {
        Some(Box::new(FilterStream {
            stream: self.plugin.new_stream(WasmHost, context_id),
        }))
    }

    fn get_type(&self) -> Option<ContextType> {
        Some(ContextType::HttpContext)
    }
}

struct FilterStream {
    stream: StreamContext<WasmHost>,
}

impl Context for FilterStream {}

impl HttpContext for FilterStream {
    fn on_http_request_headers(&mut self, num_headers: usize, end_of_stream: bool) -> Action {
        action(self.stream.on_request_headers(num_headers, end_of_stream))
    }

    fn on_http_request_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        action(self.stream.on_request_body(body_size, end_of_stream))
    }

    fn on_http_response_headers(&mut self, num_headers: usize, end_of_stream: bool) -> Action {
        action(self.stream.on_response_headers(num_headers, end_of_stream))
    }

    fn on_http_response_body(&mut self, body_size: usize, end_of_stream: bool) -> Action {
        action(self.stream.on_response_body(body_size, end_of_stream))
    }

    fn on_log(&mut self) {
        self.stream.on_stream_done();
    }
}

fn action(flow: Flow) -> Action {
    match flow {
        Flow::Continue => Action::Continue,
        Flow::Pause => Action::Pause,
    }
}
