//! # Rule-set registry
//!
//! Maps request authorities to compiled engine instances, with an optional
//! default engine for everything else. Populated once at plugin start and
//! read-only afterwards.

use crate::engine::Waf;
use std::collections::HashMap;
use std::rc::Rc;
use thiserror::Error;

/// Registry lookup and construction errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// An engine was registered under an empty authority.
    #[error("authority must not be empty")]
    EmptyAuthority,

    /// No exact match and no default engine configured.
    #[error("no rule set for authority {0:?} and no default rule set")]
    NoDefault(String),
}

/// Authority to engine map with an optional default.
#[derive(Default)]
pub struct WafMap {
    wafs: HashMap<String, Rc<dyn Waf>>,
    default_waf: Option<Rc<dyn Waf>>,
}

impl WafMap {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty registry sized for `capacity` authorities.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            wafs: HashMap::with_capacity(capacity),
            default_waf: None,
        }
    }

    /// Register the engine protecting `authority`. A duplicate authority
    /// silently overwrites within a construction pass, last one wins.
    pub fn put(&mut self, authority: &str, waf: Rc<dyn Waf>) -> Result<(), RegistryError> {
        if authority.is_empty() {
            return Err(RegistryError::EmptyAuthority);
        }
        self.wafs.insert(authority.to_string(), waf);
        Ok(())
    }

    /// Set the engine used when no authority matches, replacing any prior
    /// default.
    pub fn set_default(&mut self, waf: Rc<dyn Waf>) {
        self.default_waf = Some(waf);
    }

    /// Exact-match lookup, falling back to the default. The flag reports
    /// whether the fallback was taken.
    pub fn get_or_default(&self, authority: &str) -> Result<(Rc<dyn Waf>, bool), RegistryError> {
        if let Some(waf) = self.wafs.get(authority) {
            return Ok((Rc::clone(waf), false));
        }
        match &self.default_waf {
            Some(waf) => Ok((Rc::clone(waf), true)),
            None => Err(RegistryError::NoDefault(authority.to_string())),
        }
    }

    /// Number of registered authorities, the default excluded.
    pub fn len(&self) -> usize {
        self.wafs.len()
    }

    /// True when no authority is registered.
    pub fn is_empty(&self) -> bool {
        self.wafs.is_empty()
    }
}
