//! Per-exchange rule evaluation for the bundled engine.

use super::directives::{BodyLimitAction, EngineMode, Rule, RuleAction, Transform, Variable};
use super::error::{EngineError, EngineResult};
use super::ruleset::RuleSetCore;
use super::{Interruption, MatchedRule, Transaction};
use std::borrow::Cow;
use std::fmt::Write as _;
use std::rc::Rc;

const MATCHED_VALUE_PREVIEW: usize = 100;

pub(super) struct EngineTransaction {
    core: Rc<RuleSetCore>,
    id: String,

    uri: String,
    method: String,
    protocol: String,
    server_name: String,
    client_addr: String,

    request_headers: Vec<(String, String)>,
    response_headers: Vec<(String, String)>,
    response_status: u32,

    request_body: Vec<u8>,
    response_body: Vec<u8>,
    request_body_done: bool,
    response_body_done: bool,

    matched: Vec<i32>,
    closed: bool,
}

impl EngineTransaction {
    pub(super) fn new(core: Rc<RuleSetCore>, id: String) -> Self {
        Self {
            core,
            id,
            uri: String::new(),
            method: String::new(),
            protocol: String::new(),
            server_name: String::new(),
            client_addr: String::new(),
            request_headers: Vec::new(),
            response_headers: Vec::new(),
            response_status: 0,
            request_body: Vec::new(),
            response_body: Vec::new(),
            request_body_done: false,
            response_body_done: false,
            matched: Vec::new(),
            closed: false,
        }
    }

    /// Values a variable currently resolves to.
    fn values(&self, variable: &Variable) -> Vec<Cow<'_, str>> {
        match variable {
            Variable::RequestUri => vec![Cow::Borrowed(self.uri.as_str())],
            Variable::RequestMethod => vec![Cow::Borrowed(self.method.as_str())],
            Variable::RequestProtocol => vec![Cow::Borrowed(self.protocol.as_str())],
            Variable::RequestBody => vec![String::from_utf8_lossy(&self.request_body)],
            Variable::RequestHeaders(selector) => {
                header_values(&self.request_headers, selector.as_deref())
            }
            Variable::ResponseHeaders(selector) => {
                header_values(&self.response_headers, selector.as_deref())
            }
            Variable::ResponseBody => vec![String::from_utf8_lossy(&self.response_body)],
            Variable::ResponseStatus => vec![Cow::Owned(self.response_status.to_string())],
            Variable::ServerName => vec![Cow::Borrowed(self.server_name.as_str())],
            Variable::RemoteAddr => vec![Cow::Borrowed(self.client_addr.as_str())],
        }
    }

    /// First value of the rule's variables its operator matches.
    fn rule_match(&self, rule: &Rule) -> Option<String> {
        for variable in &rule.variables {
            for value in self.values(variable) {
                let transformed = apply_transforms(&rule.transforms, value);
                if rule.operator.matches(&transformed) {
                    return Some(truncate_value(&transformed, MATCHED_VALUE_PREVIEW));
                }
            }
        }
        None
    }

    /// Evaluate every rule of one phase in declaration order.
    fn evaluate_phase(&mut self, phase: u8) -> Option<Interruption> {
        let core = Rc::clone(&self.core);
        if core.config.mode == EngineMode::Off {
            return None;
        }

        for rule in core.config.rules.iter().filter(|rule| rule.phase == phase) {
            let Some(matched_value) = self.rule_match(rule) else {
                continue;
            };
            self.matched.push(rule.id);

            if rule.log {
                if let Some(callback) = &core.settings.error_callback {
                    callback(&MatchedRule {
                        transaction_id: self.id.clone(),
                        rule_id: rule.id,
                        severity: rule.severity,
                        message: self.format_error(rule, phase, &matched_value),
                    });
                }
            }

            if rule.action == RuleAction::Deny && core.config.mode == EngineMode::On {
                return Some(Interruption {
                    action: "deny".to_string(),
                    rule_id: rule.id,
                    status: rule.status,
                });
            }
        }
        None
    }

    fn format_error(&self, rule: &Rule, phase: u8, matched_value: &str) -> String {
        let outcome = match rule.action {
            RuleAction::Deny => "denied",
            RuleAction::Pass => "detected",
        };
        let mut message = format!(
            "[client {:?}] request {} (phase {}). Rule {} matched {:?}",
            self.client_addr, outcome, phase, rule.id, matched_value
        );
        if let Some(msg) = &rule.msg {
            let _ = write!(message, " [msg {:?}]", msg);
        }
        let _ = write!(
            message,
            " [severity {:?}] [uri {:?}]",
            rule.severity.as_str(),
            self.uri
        );
        message
    }

    fn process_request_body_inner(&mut self) -> Option<Interruption> {
        if self.request_body_done {
            return None;
        }
        self.request_body_done = true;
        self.evaluate_phase(2)
    }

    fn process_response_body_inner(&mut self) -> Option<Interruption> {
        if self.response_body_done {
            return None;
        }
        self.response_body_done = true;
        self.evaluate_phase(4)
    }
}

impl Transaction for EngineTransaction {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_rule_engine_off(&self) -> bool {
        self.core.config.mode == EngineMode::Off
    }

    fn is_request_body_accessible(&self) -> bool {
        self.core.config.request_body_access
    }

    fn is_response_body_accessible(&self) -> bool {
        self.core.config.response_body_access
    }

    fn is_response_body_processable(&self) -> bool {
        let mime_types = &self.core.config.response_body_mime_types;
        if mime_types.is_empty() {
            return true;
        }
        match header_value(&self.response_headers, "content-type") {
            // No declared type: inspect rather than wave through.
            None => true,
            Some(content_type) => {
                let media_type = content_type
                    .split(';')
                    .next()
                    .unwrap_or("")
                    .trim()
                    .to_ascii_lowercase();
                mime_types.iter().any(|mime| *mime == media_type)
            }
        }
    }

    fn process_connection(&mut self, src_ip: &str, _src_port: u32, _dst_ip: &str, _dst_port: u32) {
        self.client_addr = src_ip.to_string();
    }

    fn process_uri(&mut self, uri: &str, method: &str, protocol: &str) {
        self.uri = uri.to_string();
        self.method = method.to_string();
        self.protocol = protocol.to_string();
    }

    fn add_request_header(&mut self, name: &str, value: &str) {
        self.request_headers.push((name.to_string(), value.to_string()));
    }

    fn set_server_name(&mut self, server_name: &str) {
        self.server_name = server_name.to_string();
    }

    fn process_request_headers(&mut self) -> Option<Interruption> {
        self.evaluate_phase(1)
    }

    fn write_request_body(&mut self, chunk: &[u8]) -> EngineResult<(Option<Interruption>, usize)> {
        let limit = self.core.config.request_body_limit;
        let remaining = limit.saturating_sub(self.request_body.len());
        let writable = remaining.min(chunk.len());
        self.request_body.extend_from_slice(&chunk[..writable]);

        if writable < chunk.len() {
            return match self.core.config.request_body_limit_action {
                BodyLimitAction::Reject => Ok((
                    Some(Interruption {
                        action: "deny".to_string(),
                        rule_id: 0,
                        status: 413,
                    }),
                    writable,
                )),
                BodyLimitAction::ProcessPartial => {
                    Ok((self.process_request_body_inner(), writable))
                }
            };
        }
        Ok((None, writable))
    }

    fn process_request_body(&mut self) -> EngineResult<Option<Interruption>> {
        Ok(self.process_request_body_inner())
    }

    fn add_response_header(&mut self, name: &str, value: &str) {
        self.response_headers.push((name.to_string(), value.to_string()));
    }

    fn process_response_headers(&mut self, status: u32, _protocol: &str) -> Option<Interruption> {
        self.response_status = status;
        self.evaluate_phase(3)
    }

    fn write_response_body(&mut self, chunk: &[u8]) -> EngineResult<(Option<Interruption>, usize)> {
        let limit = self.core.config.response_body_limit;
        let remaining = limit.saturating_sub(self.response_body.len());
        let writable = remaining.min(chunk.len());
        self.response_body.extend_from_slice(&chunk[..writable]);

        if writable < chunk.len() {
            // Response limits never reject: headers may already be on the
            // wire, so the phase runs over the truncated buffer.
            return Ok((self.process_response_body_inner(), writable));
        }
        Ok((None, writable))
    }

    fn process_response_body(&mut self) -> EngineResult<Option<Interruption>> {
        Ok(self.process_response_body_inner())
    }

    fn process_logging(&mut self) {
        if self.core.config.mode == EngineMode::Off {
            return;
        }
        if !self.matched.is_empty() {
            log::debug!("transaction {} matched rules {:?}", self.id, self.matched);
        }
    }

    fn close(&mut self) -> EngineResult<()> {
        if self.closed {
            return Err(EngineError::TransactionClosed);
        }
        self.closed = true;
        self.request_body = Vec::new();
        self.response_body = Vec::new();
        Ok(())
    }
}

fn header_values<'a>(
    headers: &'a [(String, String)],
    selector: Option<&str>,
) -> Vec<Cow<'a, str>> {
    headers
        .iter()
        .filter(|(name, _)| selector.map_or(true, |wanted| name.eq_ignore_ascii_case(wanted)))
        .map(|(_, value)| Cow::Borrowed(value.as_str()))
        .collect()
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(header, _)| header.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Chain the rule's transformations, allocating only when one of them
/// changes the value.
fn apply_transforms<'a>(transforms: &[Transform], input: Cow<'a, str>) -> Cow<'a, str> {
    let mut owned: Option<String> = None;
    for transform in transforms {
        let current = owned.as_deref().unwrap_or(&input);
        if let Cow::Owned(changed) = transform.apply(current) {
            owned = Some(changed);
        }
    }
    match owned {
        Some(value) => Cow::Owned(value),
        None => input,
    }
}

fn truncate_value(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &value[..end])
}

#[cfg(test)]
mod tests {
    use super::super::{DirectiveFactory, EngineSettings, Severity, Waf, WafFactory};
    use super::*;
    use std::cell::RefCell;

    fn compile(directives: &[&str]) -> Rc<dyn Waf> {
        let directives: Vec<String> = directives.iter().map(|d| d.to_string()).collect();
        DirectiveFactory
            .compile(&directives, &EngineSettings::default())
            .unwrap()
    }

    fn compile_with_callback(
        directives: &[&str],
        seen: Rc<RefCell<Vec<MatchedRule>>>,
    ) -> Rc<dyn Waf> {
        let directives: Vec<String> = directives.iter().map(|d| d.to_string()).collect();
        let settings = EngineSettings {
            error_callback: Some(Rc::new(move |rule: &MatchedRule| {
                seen.borrow_mut().push(rule.clone());
            })),
            ..EngineSettings::default()
        };
        DirectiveFactory.compile(&directives, &settings).unwrap()
    }

    #[test]
    fn test_phase_one_deny() {
        let waf = compile(&[
            "SecRuleEngine On",
            "SecRule REQUEST_URI \"@streq /hello\" \"id:101,phase:1,deny\"",
        ]);
        let mut tx = waf.new_transaction();
        tx.process_uri("/hello", "GET", "HTTP/2.0");

        let interruption = tx.process_request_headers().unwrap();
        assert_eq!(interruption.rule_id, 101);
        assert_eq!(interruption.action, "deny");
        assert_eq!(interruption.status, 0);
    }

    #[test]
    fn test_detection_only_never_interrupts() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let waf = compile_with_callback(
            &[
                "SecRuleEngine DetectionOnly",
                "SecRule REQUEST_URI \"@streq /hello\" \"id:101,phase:1,deny,severity:WARNING\"",
            ],
            Rc::clone(&seen),
        );
        let mut tx = waf.new_transaction();
        tx.process_uri("/hello", "GET", "HTTP/2.0");

        assert!(tx.process_request_headers().is_none());
        let seen = seen.borrow();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].rule_id, 101);
        assert_eq!(seen[0].severity, Severity::Warning);
    }

    #[test]
    fn test_nolog_suppresses_the_callback() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let waf = compile_with_callback(
            &[
                "SecRuleEngine On",
                "SecRule REQUEST_URI \"@streq /hello\" \"id:101,phase:1,deny,nolog\"",
            ],
            Rc::clone(&seen),
        );
        let mut tx = waf.new_transaction();
        tx.process_uri("/hello", "GET", "HTTP/2.0");

        assert!(tx.process_request_headers().is_some());
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_request_body_contains() {
        let waf = compile(&[
            "SecRuleEngine On",
            "SecRequestBodyAccess On",
            "SecRule REQUEST_BODY \"@contains animal=bear\" \"id:102,phase:2,deny\"",
        ]);
        let mut tx = waf.new_transaction();

        let (interruption, written) = tx.write_request_body(b"animal=bear&food=honey").unwrap();
        assert!(interruption.is_none());
        assert_eq!(written, 22);

        let interruption = tx.process_request_body().unwrap().unwrap();
        assert_eq!(interruption.rule_id, 102);
    }

    #[test]
    fn test_request_body_limit_reject() {
        let waf = compile(&[
            "SecRuleEngine On",
            "SecRequestBodyAccess On",
            "SecRequestBodyLimit 2",
            "SecRequestBodyLimitAction Reject",
        ]);
        let mut tx = waf.new_transaction();

        let (interruption, written) = tx.write_request_body(b"name=yogi").unwrap();
        let interruption = interruption.unwrap();
        assert_eq!(written, 2);
        assert_eq!(interruption.status, 413);
        assert_eq!(interruption.rule_id, 0);
    }

    #[test]
    fn test_request_body_limit_process_partial() {
        let waf = compile(&[
            "SecRuleEngine On",
            "SecRequestBodyAccess On",
            "SecRequestBodyLimit 4",
            "SecRequestBodyLimitAction ProcessPartial",
            "SecRule REQUEST_BODY \"@contains name\" \"id:103,phase:2,deny\"",
        ]);
        let mut tx = waf.new_transaction();

        let (interruption, written) = tx.write_request_body(b"name=yogi").unwrap();
        assert_eq!(written, 4);
        assert_eq!(interruption.unwrap().rule_id, 103);

        // The body phase already ran at the truncation point.
        assert!(tx.process_request_body().unwrap().is_none());
    }

    #[test]
    fn test_response_status_rule() {
        let waf = compile(&[
            "SecRuleEngine On",
            "SecRule RESPONSE_STATUS \"@streq 200\" \"id:104,phase:3,deny\"",
        ]);
        let mut tx = waf.new_transaction();

        let interruption = tx.process_response_headers(200, "HTTP/2.0").unwrap();
        assert_eq!(interruption.rule_id, 104);
    }

    #[test]
    fn test_response_body_rule_with_lowercase_transform() {
        let waf = compile(&[
            "SecRuleEngine On",
            "SecResponseBodyAccess On",
            "SecRule RESPONSE_BODY \"@contains hello\" \"id:105,phase:4,t:lowercase,deny\"",
        ]);
        let mut tx = waf.new_transaction();

        tx.write_response_body(b"Hello, yogi!").unwrap();
        let interruption = tx.process_response_body().unwrap().unwrap();
        assert_eq!(interruption.rule_id, 105);
    }

    #[test]
    fn test_header_selector_is_case_insensitive() {
        let waf = compile(&[
            "SecRuleEngine On",
            "SecRule REQUEST_HEADERS:User-Agent \"@pm sqlmap\" \"id:106,phase:1,deny\"",
        ]);
        let mut tx = waf.new_transaction();
        tx.add_request_header("user-agent", "sqlmap/1.7");

        assert!(tx.process_request_headers().is_some());
    }

    #[test]
    fn test_mime_type_gate() {
        let waf = compile(&[
            "SecRuleEngine On",
            "SecResponseBodyAccess On",
            "SecResponseBodyMimeType text/html",
        ]);
        let mut tx = waf.new_transaction();

        tx.add_response_header("content-type", "text/html; charset=utf-8");
        assert!(tx.is_response_body_processable());

        let mut tx = waf.new_transaction();
        tx.add_response_header("content-type", "application/octet-stream");
        assert!(!tx.is_response_body_processable());
    }

    #[test]
    fn test_body_phases_run_once() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let waf = compile_with_callback(
            &[
                "SecRuleEngine DetectionOnly",
                "SecRequestBodyAccess On",
                "SecRule REQUEST_BODY \"@contains x\" \"id:107,phase:2\"",
            ],
            Rc::clone(&seen),
        );
        let mut tx = waf.new_transaction();
        tx.write_request_body(b"xyz").unwrap();

        tx.process_request_body().unwrap();
        tx.process_request_body().unwrap();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_close_twice_fails() {
        let waf = compile(&["SecRuleEngine On"]);
        let mut tx = waf.new_transaction();
        assert!(tx.close().is_ok());
        assert!(matches!(tx.close(), Err(EngineError::TransactionClosed)));
    }

    #[test]
    fn test_remote_addr_variable() {
        let waf = compile(&[
            "SecRuleEngine On",
            "SecRule REMOTE_ADDR \"@beginsWith 10.\" \"id:108,phase:1,deny\"",
        ]);
        let mut tx = waf.new_transaction();
        tx.process_connection("10.1.2.3", 34567, "10.0.0.1", 8080);

        assert!(tx.process_request_headers().is_some());
    }
}
