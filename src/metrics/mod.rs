//! # Counter metrics
//!
//! Counters live in the host's stats system; the filter only keeps a map
//! from fully-qualified name to the host-side handle, created lazily on
//! first use. Labels are embedded in the metric name as `_key=value`
//! suffixes because the stats backend extracts them from the name by
//! pattern.

use crate::host::Host;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Transactions seen, incremented once per stream.
pub const TX_TOTAL: &str = "waf_filter.tx.total";

/// Lazily-populated registry of host counter handles.
#[derive(Debug, Default)]
pub struct WafMetrics {
    counters: HashMap<String, u32>,
}

impl WafMetrics {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one transaction.
    pub fn count_tx(&mut self, host: &impl Host) {
        self.increment(host, TX_TOTAL.to_string());
    }

    /// Count one interrupted transaction. `labels` keep their given order;
    /// the backend relies on the exact name layout.
    pub fn count_tx_interruption(
        &mut self,
        host: &impl Host,
        phase: &str,
        rule_id: i32,
        labels: &[(String, String)],
    ) {
        let mut fqn = format!(
            "waf_filter.tx.interruptions_ruleid={}_phase={}",
            rule_id, phase
        );
        for (key, value) in labels {
            let _ = write!(fqn, "_{}={}", key, value);
        }
        self.increment(host, fqn);
    }

    fn increment(&mut self, host: &impl Host, fqn: String) {
        let counter = match self.counters.get(&fqn) {
            Some(counter) => *counter,
            None => match host.define_counter(&fqn) {
                Ok(counter) => {
                    self.counters.insert(fqn.clone(), counter);
                    counter
                }
                Err(err) => {
                    log::error!("failed to define counter {}: {}", fqn, err);
                    return;
                }
            },
        };
        if let Err(err) = host.increment_counter(counter, 1) {
            log::error!("failed to increment counter {}: {}", fqn, err);
        }
    }
}
