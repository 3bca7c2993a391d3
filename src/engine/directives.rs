//! Directive parsing for the bundled engine.
//!
//! Supports the engine switches and the `SecRule` grammar subset listed in
//! the crate documentation. Each configured directive line may itself hold
//! several newline-separated directives.

use super::error::{EngineError, EngineResult};
use super::Severity;
use regex::Regex;
use std::borrow::Cow;

/// Default request-body limit in bytes when `SecRequestBodyLimit` is not
/// given.
pub const DEFAULT_REQUEST_BODY_LIMIT: usize = 13_107_200;

/// Default response-body limit in bytes when `SecResponseBodyLimit` is not
/// given.
pub const DEFAULT_RESPONSE_BODY_LIMIT: usize = 524_288;

/// `SecRuleEngine` switch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EngineMode {
    /// Evaluate rules and enforce disruptive actions.
    #[default]
    On,
    /// Skip evaluation entirely.
    Off,
    /// Evaluate and log, never interrupt.
    DetectionOnly,
}

/// What to do when a body limit is reached.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BodyLimitAction {
    /// Interrupt the exchange with 413 Payload Too Large.
    Reject,
    /// Evaluate the body phase over the truncated buffer.
    #[default]
    ProcessPartial,
}

/// Variables a rule can inspect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Variable {
    /// `REQUEST_URI` (path plus query).
    RequestUri,
    /// `REQUEST_METHOD`.
    RequestMethod,
    /// `REQUEST_PROTOCOL`.
    RequestProtocol,
    /// `REQUEST_BODY`.
    RequestBody,
    /// `REQUEST_HEADERS` or `REQUEST_HEADERS:name`.
    RequestHeaders(Option<String>),
    /// `RESPONSE_HEADERS` or `RESPONSE_HEADERS:name`.
    ResponseHeaders(Option<String>),
    /// `RESPONSE_BODY`.
    ResponseBody,
    /// `RESPONSE_STATUS`.
    ResponseStatus,
    /// `SERVER_NAME`.
    ServerName,
    /// `REMOTE_ADDR`.
    RemoteAddr,
}

impl Variable {
    fn parse(token: &str) -> EngineResult<Self> {
        let (name, selector) = match token.split_once(':') {
            Some((name, selector)) => (name, Some(selector.to_ascii_lowercase())),
            None => (token, None),
        };
        match (name.to_ascii_uppercase().as_str(), selector) {
            ("REQUEST_URI", None) => Ok(Self::RequestUri),
            ("REQUEST_METHOD", None) => Ok(Self::RequestMethod),
            ("REQUEST_PROTOCOL", None) => Ok(Self::RequestProtocol),
            ("REQUEST_BODY", None) => Ok(Self::RequestBody),
            ("REQUEST_HEADERS", selector) => Ok(Self::RequestHeaders(selector)),
            ("RESPONSE_HEADERS", selector) => Ok(Self::ResponseHeaders(selector)),
            ("RESPONSE_BODY", None) => Ok(Self::ResponseBody),
            ("RESPONSE_STATUS", None) => Ok(Self::ResponseStatus),
            ("SERVER_NAME", None) => Ok(Self::ServerName),
            ("REMOTE_ADDR", None) => Ok(Self::RemoteAddr),
            _ => Err(EngineError::InvalidRule(format!(
                "unsupported variable {:?}",
                token
            ))),
        }
    }
}

/// Operator applied to each variable value.
#[derive(Debug, Clone)]
pub enum Operator {
    /// `@rx` (also the default for a bare expression).
    Rx(Regex),
    /// `@streq`.
    Streq(String),
    /// `@contains`.
    Contains(String),
    /// `@beginsWith`.
    BeginsWith(String),
    /// `@endsWith`.
    EndsWith(String),
    /// `@pm`, matched over a lowercased phrase list.
    Pm(Vec<String>),
}

impl Operator {
    fn parse(expression: &str) -> EngineResult<Self> {
        let expression = expression.trim();
        let Some(rest) = expression.strip_prefix('@') else {
            return Ok(Self::Rx(compile_regex(expression)?));
        };

        let (name, argument) = rest
            .split_once(char::is_whitespace)
            .unwrap_or((rest, ""));
        let argument = argument.trim();
        match name {
            "rx" => Ok(Self::Rx(compile_regex(argument)?)),
            "streq" => Ok(Self::Streq(argument.to_string())),
            "contains" => Ok(Self::Contains(argument.to_string())),
            "beginsWith" => Ok(Self::BeginsWith(argument.to_string())),
            "endsWith" => Ok(Self::EndsWith(argument.to_string())),
            "pm" => Ok(Self::Pm(
                argument
                    .split_whitespace()
                    .map(|phrase| phrase.to_lowercase())
                    .collect(),
            )),
            other => Err(EngineError::InvalidRule(format!(
                "unsupported operator @{}",
                other
            ))),
        }
    }

    /// Check one value against the operator.
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Rx(pattern) => pattern.is_match(value),
            Self::Streq(expected) => value == expected,
            Self::Contains(needle) => value.contains(needle.as_str()),
            Self::BeginsWith(prefix) => value.starts_with(prefix.as_str()),
            Self::EndsWith(suffix) => value.ends_with(suffix.as_str()),
            Self::Pm(phrases) => {
                let lower = value.to_lowercase();
                phrases.iter().any(|phrase| lower.contains(phrase.as_str()))
            }
        }
    }
}

fn compile_regex(pattern: &str) -> EngineResult<Regex> {
    Regex::new(pattern).map_err(|source| EngineError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Transformation applied before matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// `t:none`.
    None,
    /// `t:lowercase`.
    Lowercase,
    /// `t:urlDecode`.
    UrlDecode,
}

impl Transform {
    fn parse(name: &str) -> EngineResult<Self> {
        match name {
            "none" => Ok(Self::None),
            "lowercase" => Ok(Self::Lowercase),
            "urlDecode" => Ok(Self::UrlDecode),
            other => Err(EngineError::InvalidRule(format!(
                "unsupported transformation t:{}",
                other
            ))),
        }
    }

    /// Apply the transformation, allocating only when the value changes.
    pub fn apply<'a>(&self, input: &'a str) -> Cow<'a, str> {
        match self {
            Self::None => Cow::Borrowed(input),
            Self::Lowercase => Cow::Owned(input.to_lowercase()),
            Self::UrlDecode => Cow::Owned(url_decode(input)),
        }
    }
}

fn url_decode(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '%' {
            let hex: String = chars.by_ref().take(2).collect();
            if hex.len() == 2 {
                if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                    result.push(byte as char);
                    continue;
                }
            }
            result.push('%');
            result.push_str(&hex);
        } else if c == '+' {
            result.push(' ');
        } else {
            result.push(c);
        }
    }
    result
}

/// Disruptive action a rule requests on match.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RuleAction {
    /// Interrupt the exchange.
    Deny,
    /// Record the match only.
    #[default]
    Pass,
}

/// One compiled `SecRule`.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Unique rule id.
    pub id: i32,
    /// Evaluation phase, 1 through 4.
    pub phase: u8,
    /// Variables the rule inspects.
    pub variables: Vec<Variable>,
    /// Match operator.
    pub operator: Operator,
    /// Transformations applied before matching, in order.
    pub transforms: Vec<Transform>,
    /// Disruptive action.
    pub action: RuleAction,
    /// Status requested by `status:`; 0 when absent.
    pub status: u32,
    /// Rule severity; numeric 0 (emergency) when absent.
    pub severity: Severity,
    /// Operator message for the error log.
    pub msg: Option<String>,
    /// Whether a match is written to the error log.
    pub log: bool,
}

/// Compiled form of one directive set.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Rule-engine switch.
    pub mode: EngineMode,
    /// `SecRequestBodyAccess`.
    pub request_body_access: bool,
    /// `SecResponseBodyAccess`.
    pub response_body_access: bool,
    /// `SecRequestBodyLimit`.
    pub request_body_limit: usize,
    /// `SecRequestBodyLimitAction`.
    pub request_body_limit_action: BodyLimitAction,
    /// `SecResponseBodyLimit`.
    pub response_body_limit: usize,
    /// `SecResponseBodyMimeType`; empty means every content type is
    /// processable.
    pub response_body_mime_types: Vec<String>,
    /// Rules across all phases, in declaration order.
    pub rules: Vec<Rule>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: EngineMode::On,
            request_body_access: false,
            response_body_access: false,
            request_body_limit: DEFAULT_REQUEST_BODY_LIMIT,
            request_body_limit_action: BodyLimitAction::default(),
            response_body_limit: DEFAULT_RESPONSE_BODY_LIMIT,
            response_body_mime_types: Vec::new(),
            rules: Vec::new(),
        }
    }
}

/// Parse the ordered directive lines of one set.
pub fn parse_directive_set(directives: &[String]) -> EngineResult<EngineConfig> {
    let mut config = EngineConfig::default();
    for block in directives {
        for line in block.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            parse_line(line, &mut config)?;
        }
    }
    Ok(config)
}

fn parse_line(line: &str, config: &mut EngineConfig) -> EngineResult<()> {
    let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    match name {
        "SecRuleEngine" => config.mode = parse_mode(name, rest)?,
        "SecRequestBodyAccess" => config.request_body_access = parse_switch(name, rest)?,
        "SecResponseBodyAccess" => config.response_body_access = parse_switch(name, rest)?,
        "SecRequestBodyLimit" => config.request_body_limit = parse_number(name, rest)?,
        "SecRequestBodyLimitAction" => {
            config.request_body_limit_action = parse_limit_action(name, rest)?
        }
        "SecResponseBodyLimit" => config.response_body_limit = parse_number(name, rest)?,
        "SecResponseBodyMimeType" => {
            config.response_body_mime_types = rest
                .split_whitespace()
                .map(|mime| mime.to_ascii_lowercase())
                .collect()
        }
        "SecRule" => config.rules.push(parse_rule(rest)?),
        other => return Err(EngineError::UnknownDirective(other.to_string())),
    }
    Ok(())
}

fn parse_mode(directive: &str, value: &str) -> EngineResult<EngineMode> {
    match value {
        "On" => Ok(EngineMode::On),
        "Off" => Ok(EngineMode::Off),
        "DetectionOnly" => Ok(EngineMode::DetectionOnly),
        other => Err(invalid(directive, format!("unknown mode {:?}", other))),
    }
}

fn parse_switch(directive: &str, value: &str) -> EngineResult<bool> {
    match value {
        "On" => Ok(true),
        "Off" => Ok(false),
        other => Err(invalid(directive, format!("expected On or Off, got {:?}", other))),
    }
}

fn parse_number(directive: &str, value: &str) -> EngineResult<usize> {
    value
        .parse()
        .map_err(|_| invalid(directive, format!("expected a number, got {:?}", value)))
}

fn parse_limit_action(directive: &str, value: &str) -> EngineResult<BodyLimitAction> {
    match value {
        "Reject" => Ok(BodyLimitAction::Reject),
        "ProcessPartial" => Ok(BodyLimitAction::ProcessPartial),
        other => Err(invalid(directive, format!("unknown limit action {:?}", other))),
    }
}

fn invalid(directive: &str, message: String) -> EngineError {
    EngineError::InvalidDirective {
        directive: directive.to_string(),
        message,
    }
}

fn parse_rule(rest: &str) -> EngineResult<Rule> {
    let tokens = split_rule_tokens(rest)?;
    if tokens.len() < 2 {
        return Err(EngineError::InvalidRule(
            "expected variables and an operator".to_string(),
        ));
    }

    let variables = tokens[0]
        .split('|')
        .map(Variable::parse)
        .collect::<EngineResult<Vec<_>>>()?;
    let operator = Operator::parse(&tokens[1])?;

    let mut rule = Rule {
        id: 0,
        phase: 2,
        variables,
        operator,
        transforms: Vec::new(),
        action: RuleAction::default(),
        status: 0,
        severity: Severity::Emergency,
        msg: None,
        log: true,
    };

    if let Some(actions) = tokens.get(2) {
        for action in split_actions(actions) {
            apply_action(&mut rule, &action)?;
        }
    }

    if rule.id == 0 {
        return Err(EngineError::InvalidRule("missing id action".to_string()));
    }
    if !(1..=4).contains(&rule.phase) {
        return Err(EngineError::InvalidRule(format!(
            "rule {} has unsupported phase {}",
            rule.id, rule.phase
        )));
    }

    Ok(rule)
}

/// Split a `SecRule` body into the variables token, the quoted operator and
/// the quoted action list. Double quotes delimit tokens and `\"` escapes a
/// literal quote.
fn split_rule_tokens(input: &str) -> EngineResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut chars = input.chars();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\\' if in_quotes => match chars.next() {
                Some('"') => current.push('"'),
                Some(escaped) => {
                    current.push('\\');
                    current.push(escaped);
                }
                None => current.push('\\'),
            },
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err(EngineError::InvalidRule("unterminated quote".to_string()));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

/// Split a comma-separated action list; single quotes protect commas in
/// action values such as `msg:'a, b'`.
fn split_actions(input: &str) -> Vec<String> {
    let mut actions = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in input.chars() {
        match c {
            '\'' => in_quotes = !in_quotes,
            ',' if !in_quotes => actions.push(std::mem::take(&mut current)),
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        actions.push(current);
    }

    actions
        .into_iter()
        .map(|action| action.trim().to_string())
        .filter(|action| !action.is_empty())
        .collect()
}

fn apply_action(rule: &mut Rule, action: &str) -> EngineResult<()> {
    let (name, value) = action.split_once(':').unwrap_or((action, ""));
    match name {
        "id" => {
            rule.id = value.parse().map_err(|_| {
                EngineError::InvalidRule(format!("invalid id {:?}", value))
            })?
        }
        "phase" => {
            rule.phase = value.parse().map_err(|_| {
                EngineError::InvalidRule(format!("invalid phase {:?}", value))
            })?
        }
        "deny" | "drop" | "block" => rule.action = RuleAction::Deny,
        "pass" => rule.action = RuleAction::Pass,
        "status" => {
            rule.status = value.parse().map_err(|_| {
                EngineError::InvalidRule(format!("invalid status {:?}", value))
            })?
        }
        "severity" => {
            rule.severity = Severity::parse(value).ok_or_else(|| {
                EngineError::InvalidRule(format!("unknown severity {:?}", value))
            })?
        }
        "msg" => rule.msg = Some(value.to_string()),
        "log" => rule.log = true,
        "nolog" => rule.log = false,
        "t" => rule.transforms.push(Transform::parse(value)?),
        // Accepted for rule-set compatibility, no effect here.
        "capture" | "auditlog" | "noauditlog" | "tag" | "ver" | "rev" => {}
        other => {
            return Err(EngineError::InvalidRule(format!(
                "unsupported action {:?}",
                other
            )))
        }
    }
    Ok(())
}
