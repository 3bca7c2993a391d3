//! # Plugin configuration
//!
//! The host hands the filter an opaque JSON document at plugin start. This
//! module parses it into a validated [`PluginConfig`]:
//!
//! ```json
//! {
//!     "directives_map": {
//!         "default": ["SecRuleEngine On"],
//!         "strict": ["SecRuleEngine On", "SecRequestBodyAccess On"]
//!     },
//!     "default_directives": "default",
//!     "per_authority_directives": {"foo.example.com": "strict"},
//!     "metric_labels": {"owner": "gateway-team"}
//! }
//! ```
//!
//! Maps keep their document order, duplicate directive-set names resolve to
//! the first occurrence, and dangling references fail parsing. The legacy
//! top-level `rules` field is still accepted and normalized into a single
//! `default` directive set.

mod error;

pub use error::{ConfigError, ConfigResult};

use log::info;
use serde::de::{IgnoredAny, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Name of the directive set synthesized from the deprecated `rules` field.
const LEGACY_SET_NAME: &str = "default";

/// Parsed form of the plugin-configuration document.
///
/// Maps are kept as ordered pairs: metric labels must be emitted in a
/// stable order and directive sets compile in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Directive-set name to its ordered directive lines.
    #[serde(
        default,
        deserialize_with = "ordered_directive_sets",
        serialize_with = "pairs_as_map",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub directives_map: Vec<(String, Vec<String>)>,

    /// Directive set applied when no authority matches.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_directives: Option<String>,

    /// Authority to the directive set protecting it.
    #[serde(
        default,
        deserialize_with = "ordered_string_pairs",
        serialize_with = "pairs_as_map",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub per_authority_directives: Vec<(String, String)>,

    /// Labels appended to interruption metric names.
    #[serde(
        default,
        deserialize_with = "ordered_string_pairs",
        serialize_with = "pairs_as_map",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub metric_labels: Vec<(String, String)>,

    /// Deprecated flat rule list, normalized into `directives_map` by
    /// [`PluginConfig::parse`].
    #[serde(default, skip_serializing)]
    rules: Vec<String>,
}

impl PluginConfig {
    /// Parse and validate raw configuration bytes.
    ///
    /// Empty or whitespace-only input yields an empty (valid)
    /// configuration. Unknown top-level fields are ignored.
    pub fn parse(data: &[u8]) -> ConfigResult<Self> {
        let data = trim_ascii(data);
        if data.is_empty() {
            return Ok(Self::default());
        }

        let mut config: Self =
            serde_json::from_slice(data).map_err(|err| match err.classify() {
                serde_json::error::Category::Syntax | serde_json::error::Category::Eof => {
                    ConfigError::InvalidJson(String::from_utf8_lossy(data).into_owned())
                }
                _ => ConfigError::InvalidDocument(err.to_string()),
            })?;

        if let Some(name) = &config.default_directives {
            if config.directive_set(name).is_none() {
                return Err(ConfigError::UnknownDefaultDirectives(name.clone()));
            }
        }

        for (authority, name) in &config.per_authority_directives {
            if config.directive_set(name).is_none() {
                return Err(ConfigError::UnknownAuthorityDirectives {
                    authority: authority.clone(),
                    name: name.clone(),
                });
            }
        }

        if config.directives_map.is_empty() && !config.rules.is_empty() {
            info!("configuration uses the deprecated \"rules\" field, prefer \"directives_map\"");
            let rules = std::mem::take(&mut config.rules);
            config.directives_map.push((LEGACY_SET_NAME.to_string(), rules));
            config.default_directives = Some(LEGACY_SET_NAME.to_string());
        }

        Ok(config)
    }

    /// Look up a directive set by name.
    pub fn directive_set(&self, name: &str) -> Option<&[String]> {
        self.directives_map
            .iter()
            .find(|(set, _)| set == name)
            .map(|(_, directives)| directives.as_slice())
    }
}

fn trim_ascii(data: &[u8]) -> &[u8] {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    let end = data
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &data[start..end]
}

/// Deserialize a JSON object into ordered `(name, directives)` pairs,
/// keeping the first occurrence of a duplicated name.
fn ordered_directive_sets<'de, D>(deserializer: D) -> Result<Vec<(String, Vec<String>)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct SetsVisitor;

    impl<'de> Visitor<'de> for SetsVisitor {
        type Value = Vec<(String, Vec<String>)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of directive-set names to directive lists")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut sets: Vec<(String, Vec<String>)> = Vec::new();
            while let Some(name) = access.next_key::<String>()? {
                if sets.iter().any(|(existing, _)| *existing == name) {
                    access.next_value::<IgnoredAny>()?;
                    continue;
                }
                let directives = access.next_value::<Vec<String>>()?;
                sets.push((name, directives));
            }
            Ok(sets)
        }
    }

    deserializer.deserialize_map(SetsVisitor)
}

/// Deserialize a JSON object into ordered `(key, value)` string pairs,
/// keeping the first occurrence of a duplicated key.
fn ordered_string_pairs<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct PairsVisitor;

    impl<'de> Visitor<'de> for PairsVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a map of strings to strings")
        }

        fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut pairs: Vec<(String, String)> = Vec::new();
            while let Some(key) = access.next_key::<String>()? {
                if pairs.iter().any(|(existing, _)| *existing == key) {
                    access.next_value::<IgnoredAny>()?;
                    continue;
                }
                let value = access.next_value::<String>()?;
                pairs.push((key, value));
            }
            Ok(pairs)
        }
    }

    deserializer.deserialize_map(PairsVisitor)
}

fn pairs_as_map<S, V>(pairs: &[(String, V)], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
    V: Serialize,
{
    let mut map = serializer.serialize_map(Some(pairs.len()))?;
    for (key, value) in pairs {
        map.serialize_entry(key, value)?;
    }
    map.end()
}
