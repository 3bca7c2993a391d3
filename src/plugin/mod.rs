//! # Plugin lifecycle
//!
//! One [`FilterPlugin`] lives for the whole module: it parses the
//! host-supplied configuration at start, compiles every referenced
//! directive set into a shared engine, and hands each new HTTP stream its
//! own [`StreamContext`] bound to the right engine.

mod error;
#[cfg(target_arch = "wasm32")]
mod wasm;

pub use error::StartError;

use crate::config::PluginConfig;
use crate::engine::{EngineSettings, MatchedRule, WafFactory};
use crate::host::Host;
use crate::logging::AuditLogBridge;
use crate::metrics::WafMetrics;
use crate::registry::WafMap;
use crate::stream::StreamContext;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Process-wide plugin state: the engine registry, the counter registry
/// and the base metric labels shared by every stream.
pub struct FilterPlugin<F> {
    factory: F,
    wafs: Rc<WafMap>,
    metrics: Rc<RefCell<WafMetrics>>,
    metric_labels: Vec<(String, String)>,
    audit: Rc<AuditLogBridge>,
}

impl<F> std::fmt::Debug for FilterPlugin<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FilterPlugin").finish_non_exhaustive()
    }
}

impl<F: WafFactory> FilterPlugin<F> {
    /// Plugin with no configuration applied yet; every stream proceeds
    /// unprotected until [`FilterPlugin::configure`] succeeds.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            wafs: Rc::new(WafMap::new()),
            metrics: Rc::new(RefCell::new(WafMetrics::new())),
            metric_labels: Vec::new(),
            audit: Rc::new(AuditLogBridge::new()),
        }
    }

    /// Parse the raw plugin configuration and build the engine registry.
    ///
    /// A directive set is compiled only when an authority references it or
    /// it is the default set; a set that is neither is a configuration
    /// error. Errors here must fail plugin start.
    pub fn configure(&mut self, data: Option<&[u8]>) -> Result<(), StartError> {
        let config = PluginConfig::parse(data.unwrap_or_default())?;

        let mut authorities_by_set: HashMap<&str, Vec<&str>> = HashMap::new();
        for (authority, name) in &config.per_authority_directives {
            authorities_by_set
                .entry(name.as_str())
                .or_default()
                .push(authority.as_str());
        }

        let settings = EngineSettings {
            error_callback: Some({
                let audit = Rc::clone(&self.audit);
                Rc::new(move |rule: &MatchedRule| audit.log(rule))
            }),
            ..EngineSettings::default()
        };

        let mut wafs = WafMap::with_capacity(config.per_authority_directives.len());
        for (name, directives) in &config.directives_map {
            let is_default = config.default_directives.as_deref() == Some(name.as_str());
            let authorities = authorities_by_set.remove(name.as_str()).unwrap_or_default();
            if !is_default && authorities.is_empty() {
                return Err(StartError::UnknownDirectives(name.clone()));
            }

            let waf = self
                .factory
                .compile(directives, &settings)
                .map_err(|source| StartError::Compile {
                    name: name.clone(),
                    source,
                })?;

            for authority in authorities {
                wafs.put(authority, Rc::clone(&waf))?;
            }
            if is_default {
                wafs.set_default(waf);
            }
        }

        self.metric_labels = config.metric_labels;
        self.wafs = Rc::new(wafs);
        Ok(())
    }

    /// Per-stream context for a new HTTP exchange.
    pub fn new_stream<H: Host>(&self, host: H, context_id: u32) -> StreamContext<H> {
        StreamContext::new(
            host,
            context_id,
            Rc::clone(&self.wafs),
            Rc::clone(&self.metrics),
            self.metric_labels.clone(),
            Rc::clone(&self.audit),
        )
    }

    /// The engine registry built by the last successful configuration.
    pub fn wafs(&self) -> &WafMap {
        &self.wafs
    }
}
