//! Scripted host double for driving the stream state machine natively.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use waf_wasm_filter::engine::DirectiveFactory;
use waf_wasm_filter::host::{Host, HostError, HostResult};
use waf_wasm_filter::FilterPlugin;

/// Everything the fake host remembers about one stream.
#[derive(Default)]
pub struct HostState {
    pub request_headers: Vec<(String, String)>,
    pub response_headers: Vec<(String, String)>,
    pub properties: HashMap<Vec<String>, Vec<u8>>,
    /// Cumulative request-body buffer, as the proxy reports it.
    pub request_body: Vec<u8>,
    /// Cumulative response-body buffer.
    pub response_body: Vec<u8>,
    /// Statuses of local responses the filter sent.
    pub local_responses: Vec<u32>,
    /// Bodies the filter asked the host to substitute.
    pub replaced_bodies: Vec<Vec<u8>>,
    counter_names: Vec<String>,
    counter_values: HashMap<String, u64>,
    /// Make every body read fail with a host error.
    pub fail_body_reads: bool,
}

/// Cheap-to-clone handle shared between the test and the stream under
/// test.
#[derive(Clone, Default)]
pub struct FakeHost {
    state: Rc<RefCell<HostState>>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_request_headers(&self, headers: &[(&str, &str)]) {
        self.state.borrow_mut().request_headers = headers
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
    }

    pub fn set_response_headers(&self, headers: &[(&str, &str)]) {
        self.state.borrow_mut().response_headers = headers
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
    }

    pub fn set_property(&self, path: &[&str], value: &[u8]) {
        self.state.borrow_mut().properties.insert(
            path.iter().map(|part| part.to_string()).collect(),
            value.to_vec(),
        );
    }

    /// Append a chunk to the cumulative request buffer, returning the new
    /// total size the proxy would report.
    pub fn push_request_body(&self, chunk: &[u8]) -> usize {
        let mut state = self.state.borrow_mut();
        state.request_body.extend_from_slice(chunk);
        state.request_body.len()
    }

    /// Append a chunk to the cumulative response buffer.
    pub fn push_response_body(&self, chunk: &[u8]) -> usize {
        let mut state = self.state.borrow_mut();
        state.response_body.extend_from_slice(chunk);
        state.response_body.len()
    }

    pub fn fail_body_reads(&self, fail: bool) {
        self.state.borrow_mut().fail_body_reads = fail;
    }

    pub fn local_responses(&self) -> Vec<u32> {
        self.state.borrow().local_responses.clone()
    }

    pub fn replaced_bodies(&self) -> Vec<Vec<u8>> {
        self.state.borrow().replaced_bodies.clone()
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.state
            .borrow()
            .counter_values
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn counter_names(&self) -> Vec<String> {
        self.state.borrow().counter_names.clone()
    }
}

fn find_header(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(header, _)| header.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.clone())
}

fn read_slice(
    buffer: &[u8],
    start: usize,
    len: usize,
    fail: bool,
) -> HostResult<Option<Vec<u8>>> {
    if fail {
        return Err(HostError(10));
    }
    if start >= buffer.len() {
        return Ok(None);
    }
    let end = (start + len).min(buffer.len());
    Ok(Some(buffer[start..end].to_vec()))
}

impl Host for FakeHost {
    fn get_request_header(&self, name: &str) -> Option<String> {
        find_header(&self.state.borrow().request_headers, name)
    }

    fn get_request_headers(&self) -> Vec<(String, String)> {
        self.state.borrow().request_headers.clone()
    }

    fn get_response_header(&self, name: &str) -> Option<String> {
        find_header(&self.state.borrow().response_headers, name)
    }

    fn get_response_headers(&self) -> Vec<(String, String)> {
        self.state.borrow().response_headers.clone()
    }

    fn get_request_body(&self, start: usize, len: usize) -> HostResult<Option<Vec<u8>>> {
        let state = self.state.borrow();
        read_slice(&state.request_body, start, len, state.fail_body_reads)
    }

    fn get_response_body(&self, start: usize, len: usize) -> HostResult<Option<Vec<u8>>> {
        let state = self.state.borrow();
        read_slice(&state.response_body, start, len, state.fail_body_reads)
    }

    fn replace_response_body(&self, body: &[u8]) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        state.response_body = body.to_vec();
        state.replaced_bodies.push(body.to_vec());
        Ok(())
    }

    fn send_local_response(&self, status: u32) -> HostResult<()> {
        self.state.borrow_mut().local_responses.push(status);
        Ok(())
    }

    fn get_property(&self, path: &[&str]) -> Option<Vec<u8>> {
        let key: Vec<String> = path.iter().map(|part| part.to_string()).collect();
        self.state.borrow().properties.get(&key).cloned()
    }

    fn define_counter(&self, name: &str) -> HostResult<u32> {
        let mut state = self.state.borrow_mut();
        if let Some(position) = state.counter_names.iter().position(|n| n == name) {
            return Ok(position as u32);
        }
        state.counter_names.push(name.to_string());
        Ok((state.counter_names.len() - 1) as u32)
    }

    fn increment_counter(&self, counter: u32, delta: u64) -> HostResult<()> {
        let mut state = self.state.borrow_mut();
        let name = state
            .counter_names
            .get(counter as usize)
            .cloned()
            .ok_or(HostError(2))?;
        *state.counter_values.entry(name).or_insert(0) += delta;
        Ok(())
    }
}

/// A plugin configured from the given JSON document; panics on any
/// configuration error, tests feed it valid documents.
pub fn configured_plugin(config: &str) -> FilterPlugin<DirectiveFactory> {
    let mut plugin = FilterPlugin::new(DirectiveFactory);
    plugin
        .configure(Some(config.as_bytes()))
        .expect("test configuration must be valid");
    plugin
}
