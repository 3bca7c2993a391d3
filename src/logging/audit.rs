//! Matched-rule logging with request correlation.

use super::{emit, severity_level};
use crate::engine::MatchedRule;
use std::cell::RefCell;
use std::collections::HashMap;

/// Standard Envoy request-id header.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Routes matched-rule records from the engine to the host log at the
/// level their severity demands, prefixed with the proxy's request id when
/// one was registered for the transaction.
#[derive(Debug, Default)]
pub struct AuditLogBridge {
    requests: RefCell<HashMap<String, String>>,
}

impl AuditLogBridge {
    /// Empty bridge.
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate a transaction with the request id it serves.
    pub fn register(&self, transaction_id: &str, request_id: String) {
        self.requests
            .borrow_mut()
            .insert(transaction_id.to_string(), request_id);
    }

    /// Drop a transaction's association at stream end.
    pub fn unregister(&self, transaction_id: &str) {
        self.requests.borrow_mut().remove(transaction_id);
    }

    /// Emit one matched-rule record.
    pub fn log(&self, rule: &MatchedRule) {
        let level = severity_level(rule.severity);
        match self.requests.borrow().get(&rule.transaction_id) {
            Some(request_id) => emit(
                level,
                &format!("[request-id {:?}] {}", request_id, rule.message),
            ),
            None => emit(level, &rule.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Severity;

    #[test]
    fn test_register_and_unregister() {
        let bridge = AuditLogBridge::new();
        bridge.register("tx-1", "req-abc".to_string());
        assert_eq!(
            bridge.requests.borrow().get("tx-1").map(String::as_str),
            Some("req-abc")
        );

        bridge.unregister("tx-1");
        assert!(bridge.requests.borrow().is_empty());
    }

    #[test]
    fn test_log_without_registration_does_not_panic() {
        let bridge = AuditLogBridge::new();
        bridge.log(&MatchedRule {
            transaction_id: "tx-9".to_string(),
            rule_id: 101,
            severity: Severity::Warning,
            message: "rule 101 matched".to_string(),
        });
    }
}
