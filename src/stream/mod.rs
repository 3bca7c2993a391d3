//! # Per-stream state machine
//!
//! One [`StreamContext`] lives for one HTTP exchange. The proxy feeds it
//! request headers, cumulative body chunks, response headers and a final
//! stream-done callback; the context drives the engine transaction through
//! the matching phases and answers each callback with [`Flow::Continue`]
//! or [`Flow::Pause`].
//!
//! Interruptions are terminal for the stream: the first one wins, the
//! phase it fired in decides between a synthetic local response
//! (request/response-header and request-body phases) and zero-filling the
//! response body (response-body phase, where the status line is already on
//! the wire).

mod address;

pub use address::{parse_port, parse_server_name, AddressError};

use crate::engine::{Interruption, Transaction};
use crate::host::Host;
use crate::logging::{AuditLogBridge, StreamLogger, REQUEST_ID_HEADER};
use crate::metrics::WafMetrics;
use crate::registry::WafMap;
use address::peer_address;
use std::cell::RefCell;
use std::rc::Rc;

/// Status used when an interrupting rule does not pick one.
const DEFAULT_DENY_STATUS: u32 = 403;

/// Protocol assumed when the host does not expose `request.protocol`.
const DEFAULT_PROTOCOL: &str = "HTTP/2.0";

/// Instruction returned to the proxy after each callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Let the exchange proceed.
    Continue,
    /// Hold the exchange until the next event.
    Pause,
}

/// The phase a stream was interrupted in; also the phase tag embedded in
/// interruption metric names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Request-header evaluation.
    RequestHeaders,
    /// Request-body evaluation.
    RequestBody,
    /// Response-header evaluation.
    ResponseHeaders,
    /// Response-body evaluation.
    ResponseBody,
}

impl Phase {
    /// Metric and log tag for the phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequestHeaders => "http_request_headers",
            Self::RequestBody => "http_request_body",
            Self::ResponseHeaders => "http_response_headers",
            Self::ResponseBody => "http_response_body",
        }
    }
}

/// Per-stream filter state.
pub struct StreamContext<H> {
    host: H,
    wafs: Rc<WafMap>,
    metrics: Rc<RefCell<WafMetrics>>,
    metric_labels: Vec<(String, String)>,
    audit: Rc<AuditLogBridge>,
    logger: StreamLogger,

    tx: Option<Box<dyn Transaction>>,
    http_protocol: String,
    processed_request_body: bool,
    processed_response_body: bool,
    body_read_index: usize,
    interrupted_at: Option<Phase>,
}

impl<H: Host> StreamContext<H> {
    pub(crate) fn new(
        host: H,
        context_id: u32,
        wafs: Rc<WafMap>,
        metrics: Rc<RefCell<WafMetrics>>,
        metric_labels: Vec<(String, String)>,
        audit: Rc<AuditLogBridge>,
    ) -> Self {
        Self {
            host,
            wafs,
            metrics,
            metric_labels,
            audit,
            logger: StreamLogger::new(context_id),
            tx: None,
            http_protocol: String::new(),
            processed_request_body: false,
            processed_response_body: false,
            body_read_index: 0,
            interrupted_at: None,
        }
    }

    /// The phase the stream was interrupted in, if any.
    pub fn interrupted_at(&self) -> Option<Phase> {
        self.interrupted_at
    }

    /// Bytes consumed from the host's cumulative buffer for the side
    /// currently streaming.
    pub fn body_read_index(&self) -> usize {
        self.body_read_index
    }

    /// Request-header phase: resolve the protecting engine, feed the
    /// request line and headers, evaluate phase 1.
    pub fn on_request_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Flow {
        self.metrics.borrow_mut().count_tx(&self.host);

        let Some(authority) = request_value(&self.host, ":authority", &["request", "host"]) else {
            self.logger
                .warn("no authority found, request proceeds unprotected");
            return Flow::Continue;
        };

        let (waf, is_default) = match self.wafs.get_or_default(&authority) {
            Ok(found) => found,
            Err(err) => {
                self.logger
                    .warn(&format!("{}, request proceeds unprotected", err));
                return Flow::Continue;
            }
        };

        let mut tx = waf.new_transaction();

        if !is_default {
            self.logger.set_authority(&authority);
            self.metric_labels
                .push(("authority".to_string(), authority.clone()));
        }

        if let Some(request_id) = self.host.get_request_header(REQUEST_ID_HEADER) {
            self.audit.register(tx.id(), request_id);
        }

        if tx.is_rule_engine_off() {
            self.tx = Some(tx);
            return Flow::Continue;
        }

        let (src_ip, src_port) = peer_address(&self.host, &self.logger, "source");
        let (dst_ip, dst_port) = peer_address(&self.host, &self.logger, "destination");
        tx.process_connection(&src_ip, src_port, &dst_ip, dst_port);

        let Some(method) = request_value(&self.host, ":method", &["request", "method"]) else {
            self.logger.error("failed to get :method");
            self.tx = Some(tx);
            return Flow::Continue;
        };

        // The :path pseudo-header carries the query too. CONNECT requests
        // have no :path, the authority stands in as the request target.
        let uri = match self.host.get_request_header(":path") {
            Some(path) => path,
            None if method == "CONNECT" => authority.clone(),
            None => {
                match self
                    .host
                    .get_property(&["request", "path"])
                    .and_then(|raw| String::from_utf8(raw).ok())
                {
                    Some(path) => path,
                    None => {
                        self.logger.error("failed to get :path");
                        self.tx = Some(tx);
                        return Flow::Continue;
                    }
                }
            }
        };

        self.http_protocol = self
            .host
            .get_property(&["request", "protocol"])
            .and_then(|raw| String::from_utf8(raw).ok())
            .unwrap_or_else(|| DEFAULT_PROTOCOL.to_string());

        tx.process_uri(&uri, &method, &self.http_protocol);

        for (name, value) in self.host.get_request_headers() {
            tx.add_request_header(&name, &value);
        }

        // CRS rules expect a Host header even over HTTP/2.
        tx.add_request_header("Host", &authority);
        tx.set_server_name(parse_server_name(&authority));

        let interruption = tx.process_request_headers();
        self.tx = Some(tx);
        match interruption {
            Some(interruption) => self.handle_interruption(Phase::RequestHeaders, &interruption),
            None => Flow::Continue,
        }
    }

    /// Request-body phase: accumulate the newly buffered chunk and run
    /// phase 2 at end-of-stream or at the engine's body limit.
    pub fn on_request_body(&mut self, body_size: usize, end_of_stream: bool) -> Flow {
        if self.interrupted_at.is_some() {
            self.logger.error("interruption already handled");
            return Flow::Pause;
        }
        if self.processed_request_body {
            return Flow::Continue;
        }
        let Some(tx) = self.tx.as_mut() else {
            return Flow::Continue;
        };
        if tx.is_rule_engine_off() {
            return Flow::Continue;
        }

        if !tx.is_request_body_accessible() {
            self.logger
                .debug("skipping request body inspection, body access is off");
            // Phase-2 rules over already-populated variables still run.
            self.processed_request_body = true;
            return match tx.process_request_body() {
                Ok(Some(interruption)) => {
                    self.handle_interruption(Phase::RequestBody, &interruption)
                }
                Ok(None) => Flow::Continue,
                Err(err) => {
                    self.logger
                        .error(&format!("failed to process request body: {}", err));
                    Flow::Continue
                }
            };
        }

        if body_size > self.body_read_index {
            let chunk_size = body_size - self.body_read_index;
            match self.host.get_request_body(self.body_read_index, chunk_size) {
                Ok(Some(chunk)) => {
                    let read = chunk.len();
                    match tx.write_request_body(&chunk) {
                        Ok((interruption, written)) => {
                            self.body_read_index += read;
                            if let Some(interruption) = interruption {
                                return self
                                    .handle_interruption(Phase::RequestBody, &interruption);
                            }
                            if written < read {
                                // The engine hit its body limit and has
                                // already run the body phase itself.
                                self.logger
                                    .debug("request body limit reached, buffering stopped");
                                self.processed_request_body = true;
                                return Flow::Continue;
                            }
                        }
                        Err(err) => {
                            self.logger
                                .error(&format!("failed to write request body: {}", err));
                            return Flow::Continue;
                        }
                    }
                }
                // The host sometimes re-reports an already-consumed size;
                // there is nothing at this offset.
                Ok(None) => {
                    self.logger.debug(&format!(
                        "request body not available at offset {} ({} bytes)",
                        self.body_read_index, chunk_size
                    ));
                    return Flow::Continue;
                }
                Err(err) => {
                    self.logger
                        .error(&format!("failed to read request body: {}", err));
                    return Flow::Continue;
                }
            }
        }

        if end_of_stream {
            self.processed_request_body = true;
            self.body_read_index = 0;
            return match tx.process_request_body() {
                Ok(Some(interruption)) => {
                    self.handle_interruption(Phase::RequestBody, &interruption)
                }
                Ok(None) => Flow::Continue,
                Err(err) => {
                    self.logger
                        .error(&format!("failed to process request body: {}", err));
                    Flow::Continue
                }
            };
        }

        // Keep buffering until the body is complete.
        Flow::Pause
    }

    /// Response-header phase: finish any unfired request-body phase, feed
    /// status and headers, evaluate phase 3.
    pub fn on_response_headers(&mut self, _num_headers: usize, _end_of_stream: bool) -> Flow {
        if self.interrupted_at.is_some() {
            // These are the headers of the local response this stream sent;
            // let them through untouched.
            self.logger
                .debug("interruption already handled, forwarding the local response");
            return Flow::Continue;
        }
        let Some(tx) = self.tx.as_mut() else {
            return Flow::Continue;
        };
        if tx.is_rule_engine_off() {
            return Flow::Continue;
        }

        // Requests without a body never reach the body callback, but
        // phase-2 rules still have to run once.
        if !self.processed_request_body {
            self.processed_request_body = true;
            match tx.process_request_body() {
                Ok(Some(interruption)) => {
                    return self.handle_interruption(Phase::ResponseHeaders, &interruption)
                }
                Ok(None) => {}
                Err(err) => {
                    self.logger
                        .error(&format!("failed to process request body: {}", err));
                    return Flow::Continue;
                }
            }
        }

        let Some(status) = response_status(&self.host) else {
            self.logger.error("failed to get :status");
            return Flow::Continue;
        };

        for (name, value) in self.host.get_response_headers() {
            tx.add_response_header(&name, &value);
        }

        match tx.process_response_headers(status, &self.http_protocol) {
            Some(interruption) => self.handle_interruption(Phase::ResponseHeaders, &interruption),
            None => Flow::Continue,
        }
    }

    /// Response-body phase: accumulate chunks and run phase 4 at
    /// end-of-stream; an interruption here can only redact, the status
    /// line is already on the wire.
    pub fn on_response_body(&mut self, body_size: usize, end_of_stream: bool) -> Flow {
        if self.interrupted_at.is_some() {
            self.logger
                .warn("interruption already handled, continuing response body replacement");
            return self.replace_response_body(body_size);
        }
        if self.processed_response_body {
            return Flow::Continue;
        }
        let Some(tx) = self.tx.as_mut() else {
            return Flow::Continue;
        };
        if tx.is_rule_engine_off() {
            return Flow::Continue;
        }

        if !tx.is_response_body_accessible() || !tx.is_response_body_processable() {
            self.logger.debug(
                "skipping response body inspection, body access is off or the body is not processable",
            );
            self.processed_response_body = true;
            return match tx.process_response_body() {
                Ok(Some(interruption)) => {
                    // Nothing was buffered; redact whatever the host holds.
                    self.body_read_index = body_size;
                    self.handle_interruption(Phase::ResponseBody, &interruption)
                }
                Ok(None) => Flow::Continue,
                Err(err) => {
                    self.logger
                        .error(&format!("failed to process response body: {}", err));
                    Flow::Continue
                }
            };
        }

        if body_size > self.body_read_index {
            let chunk_size = body_size - self.body_read_index;
            match self
                .host
                .get_response_body(self.body_read_index, chunk_size)
            {
                Ok(Some(chunk)) => {
                    let read = chunk.len();
                    match tx.write_response_body(&chunk) {
                        Ok((interruption, written)) => {
                            // The read index drives the redaction length;
                            // move it before acting on any interruption.
                            self.body_read_index += read;
                            if let Some(interruption) = interruption {
                                return self
                                    .handle_interruption(Phase::ResponseBody, &interruption);
                            }
                            if written < read {
                                self.logger
                                    .debug("response body limit reached, buffering stopped");
                                self.processed_response_body = true;
                                return Flow::Continue;
                            }
                        }
                        Err(err) => {
                            self.logger
                                .error(&format!("failed to write response body: {}", err));
                            return Flow::Continue;
                        }
                    }
                }
                Ok(None) => {
                    self.logger.debug(&format!(
                        "response body not available at offset {} ({} bytes)",
                        self.body_read_index, chunk_size
                    ));
                    return Flow::Continue;
                }
                Err(err) => {
                    self.logger
                        .error(&format!("failed to read response body: {}", err));
                    return Flow::Continue;
                }
            }
        }

        if end_of_stream {
            self.processed_response_body = true;
            return match tx.process_response_body() {
                Ok(Some(interruption)) => {
                    self.handle_interruption(Phase::ResponseBody, &interruption)
                }
                Ok(None) => {
                    self.body_read_index = 0;
                    Flow::Continue
                }
                Err(err) => {
                    self.logger
                        .error(&format!("failed to process response body: {}", err));
                    Flow::Continue
                }
            };
        }

        // The whole body has to be vetted before it goes downstream.
        Flow::Pause
    }

    /// Stream end: finish any unfired response-body phase for
    /// detection-only logging, run the logging phase, close the
    /// transaction.
    pub fn on_stream_done(&mut self) {
        if let Some(mut tx) = self.tx.take() {
            if !tx.is_rule_engine_off()
                && !self.processed_response_body
                && self.interrupted_at.is_none()
            {
                self.processed_response_body = true;
                match tx.process_response_body() {
                    Ok(Some(interruption)) => self.logger.info(&format!(
                        "rule {} interrupted at stream end, too late to enforce",
                        interruption.rule_id
                    )),
                    Ok(None) => {}
                    Err(err) => self
                        .logger
                        .error(&format!("failed to process response body: {}", err)),
                }
            }
            // Records may predate an engine switch-off; the logging phase
            // always runs.
            tx.process_logging();
            self.audit.unregister(tx.id());
            if let Err(err) = tx.close() {
                self.logger
                    .error(&format!("failed to close transaction: {}", err));
            }
        }
        self.logger.info("finished");
    }

    fn handle_interruption(&mut self, phase: Phase, interruption: &Interruption) -> Flow {
        if self.interrupted_at.is_some() {
            // A second interruption on one stream is a programming error.
            panic!("interruption already handled");
        }

        self.metrics.borrow_mut().count_tx_interruption(
            &self.host,
            phase.as_str(),
            interruption.rule_id,
            &self.metric_labels,
        );
        self.logger.info(&format!(
            "transaction interrupted, action {:?} at {}",
            interruption.action,
            phase.as_str()
        ));
        self.interrupted_at = Some(phase);

        if phase == Phase::ResponseBody {
            return self.replace_response_body(self.body_read_index);
        }

        let status = if interruption.status == 0 {
            DEFAULT_DENY_STATUS
        } else {
            interruption.status
        };
        if let Err(err) = self.host.send_local_response(status) {
            panic!("failed to send local response: {}", err);
        }
        // The local response must not be followed by upstream data.
        Flow::Pause
    }

    fn replace_response_body(&self, len: usize) -> Flow {
        if let Err(err) = self.host.replace_response_body(&vec![0u8; len]) {
            self.logger
                .error(&format!("failed to replace response body: {}", err));
            return Flow::Continue;
        }
        self.logger
            .warn("response body intervention occurred, body replaced");
        Flow::Continue
    }
}

/// A request input: the pseudo-header first, then the host property.
fn request_value<H: Host>(host: &H, header: &str, property: &[&str]) -> Option<String> {
    if let Some(value) = host.get_request_header(header) {
        return Some(value);
    }
    host.get_property(property)
        .and_then(|raw| String::from_utf8(raw).ok())
}

/// The response status: the `:status` pseudo-header first, then the
/// `response.code` property (a little-endian integer). A malformed header
/// degrades to 0, as the engine can evaluate non-status rules regardless.
fn response_status<H: Host>(host: &H) -> Option<u32> {
    if let Some(status) = host.get_response_header(":status") {
        return Some(status.parse().unwrap_or(0));
    }
    let raw = host.get_property(&["response", "code"])?;
    if raw.len() < 8 {
        return None;
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&raw[..8]);
    u32::try_from(u64::from_le_bytes(bytes)).ok()
}
