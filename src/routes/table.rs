//! Convention route table: ordered path templates with regex token constraints. First match wins.

use crate::error::ConfigError;
use axum::http::Method;
use regex::Regex;

/// Letters first, then letters, digits or underscores.
pub const ALPHANUMERIC: &str = r"^[a-zA-Z]+[a-zA-Z0-9_]*$";
pub const NUMERIC: &str = r"^\d+$";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Token {
    Controller,
    Action,
    Id,
    Name,
}

impl Token {
    fn parse(template: &str, segment: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::Invalid {
            key: "route template",
            value: template.to_string(),
            reason: reason.to_string(),
        };
        let inner = segment
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
            .ok_or_else(|| invalid("segments must be {placeholders}"))?;
        match inner {
            "controller" => Ok(Token::Controller),
            "action" => Ok(Token::Action),
            "id" => Ok(Token::Id),
            "name" => Ok(Token::Name),
            _ => Err(invalid("unknown placeholder")),
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "controller" => Some(Token::Controller),
            "action" => Some(Token::Action),
            "id" => Some(Token::Id),
            "name" => Some(Token::Name),
            _ => None,
        }
    }
}

/// One path template, e.g. `{controller}/{action}/{id}`.
#[derive(Clone, Debug)]
pub struct RouteRule {
    name: &'static str,
    tokens: Vec<Token>,
    constraints: Vec<(Token, Regex)>,
    method: Option<Method>,
    action: Option<&'static str>,
}

impl RouteRule {
    pub fn new(name: &'static str, template: &str) -> Result<Self, ConfigError> {
        let tokens = template
            .split('/')
            .map(|seg| Token::parse(template, seg))
            .collect::<Result<Vec<_>, _>>()?;
        if tokens.first() != Some(&Token::Controller) {
            return Err(ConfigError::Invalid {
                key: "route template",
                value: template.to_string(),
                reason: "must start with {controller}".into(),
            });
        }
        Ok(RouteRule {
            name,
            tokens,
            constraints: Vec::new(),
            method: None,
            action: None,
        })
    }

    /// Require a token to match `pattern`.
    pub fn constrain(mut self, token: &str, pattern: &Regex) -> Result<Self, ConfigError> {
        let token = Token::from_name(token).ok_or_else(|| ConfigError::Invalid {
            key: "route constraint",
            value: token.to_string(),
            reason: "unknown placeholder".into(),
        })?;
        self.constraints.push((token, pattern.clone()));
        Ok(self)
    }

    /// Only match requests with this verb.
    pub fn method(mut self, method: Method) -> Self {
        self.method = Some(method);
        self
    }

    /// Action used when the template has no `{action}` token.
    pub fn default_action(mut self, action: &'static str) -> Self {
        self.action = Some(action);
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn matches(&self, method: &Method, segments: &[&str]) -> Option<RouteMatch> {
        if segments.len() != self.tokens.len() {
            return None;
        }
        if self.method.as_ref().is_some_and(|m| m != method) {
            return None;
        }
        for (token, pattern) in &self.constraints {
            let pos = self.tokens.iter().position(|t| t == token)?;
            if !pattern.is_match(segments[pos]) {
                return None;
            }
        }
        let mut m = RouteMatch {
            rule: self.name,
            controller: String::new(),
            action: None,
            id: None,
            name: None,
        };
        for (token, seg) in self.tokens.iter().zip(segments) {
            match token {
                Token::Controller => m.controller = seg.to_string(),
                Token::Action => m.action = Some(seg.to_string()),
                Token::Id => m.id = Some(seg.parse().ok()?),
                Token::Name => m.name = Some(seg.to_string()),
            }
        }
        if m.action.is_none() {
            m.action = self.action.map(str::to_string);
        }
        Some(m)
    }
}

/// Result of resolving a request path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteMatch {
    pub rule: &'static str,
    pub controller: String,
    /// `None` when neither the path nor the rule names one; the HTTP verb applies.
    pub action: Option<String>,
    pub id: Option<i64>,
    pub name: Option<String>,
}

impl RouteMatch {
    /// Action name, falling back to the request verb.
    pub fn action_or<'a>(&'a self, method: &'a Method) -> &'a str {
        self.action.as_deref().unwrap_or(method.as_str())
    }
}

#[derive(Clone, Debug, Default)]
pub struct RouteTable {
    rules: Vec<RouteRule>,
}

impl RouteTable {
    pub fn new() -> Self {
        RouteTable::default()
    }

    pub fn add(mut self, rule: RouteRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// The eight conventional rules.
    pub fn conventional() -> Result<Self, ConfigError> {
        let alpha = Regex::new(ALPHANUMERIC)?;
        let numeric = Regex::new(NUMERIC)?;
        let mut table = RouteTable::new()
            .add(
                RouteRule::new("ControllerActionId", "{controller}/{action}/{id}")?
                    .constrain("controller", &alpha)?
                    .constrain("action", &alpha)?
                    .constrain("id", &numeric)?,
            )
            .add(
                RouteRule::new("ControllerActionName", "{controller}/{action}/{name}")?
                    .constrain("controller", &alpha)?
                    .constrain("action", &alpha)?
                    .constrain("name", &alpha)?,
            )
            .add(
                RouteRule::new("ControllerId", "{controller}/{id}")?
                    .constrain("controller", &alpha)?
                    .constrain("id", &numeric)?,
            )
            .add(
                RouteRule::new("ControllerAction", "{controller}/{action}")?
                    .constrain("controller", &alpha)?
                    .constrain("action", &alpha)?,
            );
        for (name, method, action) in [
            ("ControllerGet", Method::GET, "Get"),
            ("ControllerPost", Method::POST, "Post"),
            ("ControllerPut", Method::PUT, "Put"),
            ("ControllerDelete", Method::DELETE, "Delete"),
        ] {
            table = table.add(
                RouteRule::new(name, "{controller}")?
                    .constrain("controller", &alpha)?
                    .method(method)
                    .default_action(action),
            );
        }
        Ok(table)
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }

    /// First rule matching `path` (relative to the mount point, slashes trimmed).
    pub fn resolve(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        self.rules.iter().find_map(|r| r.matches(method, &segments))
    }
}
