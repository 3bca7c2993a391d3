//! Per-authority rule-set selection, metric labels included.

mod common;

use common::{configured_plugin, FakeHost};
use waf_wasm_filter::engine::DirectiveFactory;
use waf_wasm_filter::{FilterPlugin, Flow};

fn routing_plugin() -> FilterPlugin<DirectiveFactory> {
    configured_plugin(
        &serde_json::json!({
            "directives_map": {
                "default": [
                    "SecRuleEngine On",
                    "SecRule REQUEST_URI \"@streq /admin\" \"id:201,phase:1,deny\""
                ],
                "rs1": [
                    "SecRuleEngine On",
                    "SecRule REQUEST_URI \"@streq /rs1\" \"id:202,phase:1,deny\""
                ]
            },
            "default_directives": "default",
            "per_authority_directives": {"foo.example.com": "rs1"},
            "metric_labels": {"owner": "gateway-team"}
        })
        .to_string(),
    )
}

fn run_request(
    plugin: &FilterPlugin<DirectiveFactory>,
    host: &FakeHost,
    context_id: u32,
    authority: &str,
    path: &str,
) -> Flow {
    host.set_request_headers(&[
        (":authority", authority),
        (":method", "GET"),
        (":path", path),
    ]);
    let mut stream = plugin.new_stream(host.clone(), context_id);
    let flow = stream.on_request_headers(3, true);
    stream.on_stream_done();
    flow
}

#[test]
fn test_authority_routes_to_its_own_rule_set() {
    let plugin = routing_plugin();
    let host = FakeHost::new();

    assert_eq!(
        run_request(&plugin, &host, 1, "foo.example.com", "/rs1"),
        Flow::Pause
    );
    assert_eq!(host.local_responses(), vec![403]);
    assert_eq!(
        host.counter(
            "waf_filter.tx.interruptions_ruleid=202_phase=http_request_headers_owner=gateway-team_authority=foo.example.com"
        ),
        1
    );
}

#[test]
fn test_routed_authority_skips_default_rules() {
    let plugin = routing_plugin();
    let host = FakeHost::new();

    assert_eq!(
        run_request(&plugin, &host, 2, "foo.example.com", "/admin"),
        Flow::Continue
    );
    assert!(host.local_responses().is_empty());
}

#[test]
fn test_unrouted_authority_uses_default_rules() {
    let plugin = routing_plugin();
    let host = FakeHost::new();

    assert_eq!(
        run_request(&plugin, &host, 3, "bar.example.com", "/admin"),
        Flow::Pause
    );
    assert_eq!(host.local_responses(), vec![403]);
    // Default routing adds no authority label.
    assert_eq!(
        host.counter(
            "waf_filter.tx.interruptions_ruleid=201_phase=http_request_headers_owner=gateway-team"
        ),
        1
    );
}

#[test]
fn test_unrouted_authority_skips_per_authority_rules() {
    let plugin = routing_plugin();
    let host = FakeHost::new();

    assert_eq!(
        run_request(&plugin, &host, 4, "bar.example.com", "/rs1"),
        Flow::Continue
    );
    assert!(host.local_responses().is_empty());
}

#[test]
fn test_each_stream_counts_one_transaction() {
    let plugin = routing_plugin();
    let host = FakeHost::new();

    for (context_id, authority) in [(5, "foo.example.com"), (6, "bar.example.com")] {
        run_request(&plugin, &host, context_id, authority, "/harmless");
    }
    assert_eq!(host.counter("waf_filter.tx.total"), 2);
}

#[test]
fn test_unknown_authority_without_default_is_unprotected() {
    let plugin = configured_plugin(
        &serde_json::json!({
            "directives_map": {
                "rs1": [
                    "SecRuleEngine On",
                    "SecRule REQUEST_URI \"@streq /rs1\" \"id:202,phase:1,deny\""
                ]
            },
            "per_authority_directives": {"foo.example.com": "rs1"}
        })
        .to_string(),
    );
    let host = FakeHost::new();

    assert_eq!(
        run_request(&plugin, &host, 7, "bar.example.com", "/rs1"),
        Flow::Continue
    );
    assert!(host.local_responses().is_empty());
    assert_eq!(host.counter("waf_filter.tx.total"), 1);
}
