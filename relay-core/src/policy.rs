//! Request routing policy
//!
//! Each inbound request is classified as either intercepted (handled
//! locally) or forwarded to the remote origin. Rules are stateless and
//! evaluated per request.

use serde::{Deserialize, Serialize};
use wildmatch::WildMatch;

/// What to do with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteAction {
    /// Skip the remote roundtrip and run the extraction workflow
    Intercept,
    /// Proxy the request to the remote origin
    Forward,
}

/// Request context for rule matching
#[derive(Debug, Clone)]
pub struct RequestContext<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: Option<&'a str>,
}

/// Rule Condition - What to check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RuleCondition {
    /// Path starts with the given prefix (e.g., "/starter.zip")
    PathPrefix(String),

    /// Path matches a wildcard pattern (e.g., "/*.zip")
    PathGlob(String),

    /// HTTP Method matches (e.g., "GET")
    Method(String),

    /// Query string carries the named parameter
    QueryParam(String),
}

impl RuleCondition {
    /// Check if this condition matches the request
    pub fn matches(&self, req: &RequestContext<'_>) -> bool {
        match self {
            RuleCondition::PathPrefix(prefix) => req.path.starts_with(prefix.as_str()),
            RuleCondition::PathGlob(pattern) => WildMatch::new(pattern).matches(req.path),
            RuleCondition::Method(m) => req.method.eq_ignore_ascii_case(m),
            RuleCondition::QueryParam(key) => req.query.map_or(false, |q| {
                url::form_urlencoded::parse(q.as_bytes()).any(|(k, _)| k == key.as_str())
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    pub name: String,
    pub enabled: bool,

    /// Conditions that must be met for the rule to trigger (AND logic)
    pub conditions: Vec<RuleCondition>,

    pub action: RouteAction,
}

impl RouteRule {
    pub fn matches(&self, req: &RequestContext<'_>) -> bool {
        if !self.enabled {
            return false;
        }

        self.conditions
            .iter()
            .all(|condition| condition.matches(req))
    }
}

/// Ordered rule list. The first enabled matching rule decides; requests no
/// rule claims are forwarded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutePolicy {
    pub rules: Vec<RouteRule>,
}

impl RoutePolicy {
    /// The standard policy: intercept the archive download, forward the rest.
    pub fn for_prefix(prefix: &str) -> Self {
        Self {
            rules: vec![RouteRule {
                name: "archive-download".to_string(),
                enabled: true,
                conditions: vec![RuleCondition::PathPrefix(prefix.to_string())],
                action: RouteAction::Intercept,
            }],
        }
    }

    pub fn classify(&self, req: &RequestContext<'_>) -> RouteAction {
        self.rules
            .iter()
            .find(|rule| rule.matches(req))
            .map(|rule| rule.action)
            .unwrap_or(RouteAction::Forward)
    }
}
