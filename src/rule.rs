//! Compiled routing rules.
//!
//! [`crate::config::RuleConfig`] is the on-disk shape; [`Rule`] is what the
//! router actually matches against, with `Glob`/`Regex` patterns compiled
//! once at startup rather than re-parsed per request.

use std::time::Duration;

use regex::Regex;

use crate::config::{LbMethod, MatchKind, RuleConfig};
use crate::error::ConfigError;

/// A pattern-matching strategy, pre-compiled from a [`MatchKind`]/pattern pair.
#[derive(Debug, Clone)]
pub enum CompiledPattern {
    /// Path must equal this string exactly.
    Exact(String),
    /// Path must match this compiled shell glob.
    Glob(GlobPattern),
    /// Path must match this compiled, anchored regex.
    Regex(Regex),
    /// Matches any path.
    Default,
}

/// A minimal shell-style glob (`*` and `?`) compiled into path segments for
/// matching without backtracking beyond a single pass.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: String,
}

impl GlobPattern {
    fn new(pattern: &str) -> Self {
        GlobPattern {
            pattern: pattern.to_string(),
        }
    }

    /// Matches `path` against this glob. `*` matches any run of characters
    /// (including none); `?` matches exactly one character.
    pub fn matches(&self, path: &str) -> bool {
        glob_match(self.pattern.as_bytes(), path.as_bytes())
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match (pattern.first(), text.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            glob_match(&pattern[1..], text) || (!text.is_empty() && glob_match(pattern, &text[1..]))
        }
        (Some(b'?'), Some(_)) => glob_match(&pattern[1..], &text[1..]),
        (Some(p), Some(t)) if p == t => glob_match(&pattern[1..], &text[1..]),
        _ => false,
    }
}

impl CompiledPattern {
    fn compile(rule: &RuleConfig) -> Result<Self, ConfigError> {
        Ok(match rule.match_kind {
            MatchKind::Exact => CompiledPattern::Exact(rule.pattern.clone()),
            MatchKind::Glob => CompiledPattern::Glob(GlobPattern::new(&rule.pattern)),
            MatchKind::Regex => {
                let anchored = format!("^(?:{})$", rule.pattern);
                CompiledPattern::Regex(Regex::new(&anchored).map_err(|source| {
                    ConfigError::InvalidRegex {
                        rule: rule.pattern.clone(),
                        source,
                    }
                })?)
            }
            MatchKind::Default => CompiledPattern::Default,
        })
    }

    /// Whether `path` satisfies this pattern.
    pub fn matches(&self, path: &str) -> bool {
        match self {
            CompiledPattern::Exact(p) => p == path,
            CompiledPattern::Glob(g) => g.matches(path),
            CompiledPattern::Regex(r) => r.is_match(path),
            CompiledPattern::Default => true,
        }
    }
}

/// A compiled routing rule.
#[derive(Debug, Clone)]
pub struct Rule {
    pattern: CompiledPattern,
    /// Name of the upstream group this rule routes matched requests to.
    pub upstream_group: String,
    /// Load-balancing method used within the group.
    pub lb_method: LbMethod,
    /// Per-rule read timeout override.
    pub read_timeout: Option<Duration>,
    /// Per-rule write timeout override.
    pub write_timeout: Option<Duration>,
    /// Whether a successful upgrade response detaches this connection into
    /// opaque passthrough mode.
    pub allow_passthrough: bool,
    /// Whether 3xx responses matched by this rule have their `Location`
    /// header rewritten through the vhost's header policy.
    pub allow_redirect: bool,
}

impl Rule {
    /// Compiles a [`RuleConfig`] into a matchable [`Rule`].
    pub fn compile(cfg: &RuleConfig) -> Result<Self, ConfigError> {
        Ok(Rule {
            pattern: CompiledPattern::compile(cfg)?,
            upstream_group: cfg.upstream_group.clone(),
            lb_method: cfg.lb_method,
            read_timeout: cfg.read_timeout,
            write_timeout: cfg.write_timeout,
            allow_passthrough: cfg.allow_passthrough,
            allow_redirect: cfg.allow_redirect,
        })
    }

    /// The effective read timeout, falling back to `server_default` when
    /// this rule didn't override it.
    pub fn read_timeout(&self, server_default: Duration) -> Duration {
        self.read_timeout.unwrap_or(server_default)
    }

    /// The effective write timeout, falling back to `server_default` when
    /// this rule didn't override it.
    pub fn write_timeout(&self, server_default: Duration) -> Duration {
        self.write_timeout.unwrap_or(server_default)
    }

    /// Whether this rule matches `path`.
    pub fn matches(&self, path: &str) -> bool {
        self.pattern.matches(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(kind: MatchKind, pattern: &str) -> RuleConfig {
        RuleConfig {
            match_kind: kind,
            pattern: pattern.to_string(),
            upstream_group: "g".to_string(),
            lb_method: LbMethod::Rtt,
            discovery_type: crate::config::DiscoveryType::Static,
            upstreams: vec![],
            read_timeout: None,
            write_timeout: None,
            allow_passthrough: false,
            allow_redirect: false,
        }
    }

    #[test]
    fn exact_match_requires_full_equality() {
        let r = Rule::compile(&rule(MatchKind::Exact, "/healthz")).unwrap();
        assert!(r.matches("/healthz"));
        assert!(!r.matches("/healthz/extra"));
    }

    #[test]
    fn glob_star_matches_any_suffix() {
        let r = Rule::compile(&rule(MatchKind::Glob, "/static/*")).unwrap();
        assert!(r.matches("/static/css/app.css"));
        assert!(!r.matches("/api/users"));
    }

    #[test]
    fn regex_is_anchored_both_ends() {
        let r = Rule::compile(&rule(MatchKind::Regex, r"/users/\d+")).unwrap();
        assert!(r.matches("/users/42"));
        assert!(!r.matches("/users/42/extra"));
        assert!(!r.matches("prefix/users/42"));
    }

    #[test]
    fn default_matches_everything() {
        let r = Rule::compile(&rule(MatchKind::Default, "")).unwrap();
        assert!(r.matches("/anything/at/all"));
    }

    #[test]
    fn invalid_regex_is_rejected_at_compile_time() {
        let err = Rule::compile(&rule(MatchKind::Regex, "(unclosed")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRegex { .. }));
    }
}
