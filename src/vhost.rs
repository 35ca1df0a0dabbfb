//! Compiled virtual hosts: name matching plus an ordered rule table.

use crate::config::{HeaderPolicy, VHostConfig};
use crate::error::{ConfigError, RouterError};
use crate::rule::Rule;

/// A compiled virtual host.
#[derive(Debug)]
pub struct VHost {
    server_name: String,
    aliases: Vec<String>,
    /// Header rewrite/forwarding policy applied to every match within this vhost.
    pub header_policy: HeaderPolicy,
    rules: Vec<Rule>,
}

impl VHost {
    /// Compiles a [`VHostConfig`] into a matchable [`VHost`].
    pub fn compile(cfg: &VHostConfig) -> Result<Self, ConfigError> {
        let rules = cfg
            .rules
            .iter()
            .map(Rule::compile)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(VHost {
            server_name: cfg.server_name.clone(),
            aliases: cfg.aliases.clone(),
            header_policy: cfg.header_policy.clone(),
            rules,
        })
    }

    /// Whether `host` (already stripped of a port suffix) matches this
    /// vhost's primary name, an alias, or a leading-`*.` wildcard alias.
    pub fn matches_host(&self, host: &str) -> bool {
        if self.server_name.eq_ignore_ascii_case(host) {
            return true;
        }

        self.aliases.iter().any(|alias| {
            if let Some(suffix) = alias.strip_prefix("*.") {
                host.len() > suffix.len()
                    && host[host.len() - suffix.len()..].eq_ignore_ascii_case(suffix)
                    && host.as_bytes()[host.len() - suffix.len() - 1] == b'.'
            } else {
                alias.eq_ignore_ascii_case(host)
            }
        })
    }

    /// Finds the first rule (in definition order) matching `path`.
    pub fn match_rule(&self, path: &str) -> Result<&Rule, RouterError> {
        self.rules
            .iter()
            .find(|r| r.matches(path))
            .ok_or(RouterError::NoRuleMatch)
    }
}

/// Strips a trailing `:port` from a `Host` header value, and lowercases it
/// for case-insensitive comparison (vhost names are compared
/// case-insensitively per RFC 9110 §4.2.3's treatment of `reg-name`).
pub fn normalize_host(host: &str) -> String {
    let without_port = host.split(':').next().unwrap_or(host);
    without_port.to_ascii_lowercase()
}

/// Looks up the first [`VHost`] whose name/alias matches `host`.
pub fn find_vhost<'a>(vhosts: &'a [VHost], host: &str) -> Result<&'a VHost, RouterError> {
    let host = normalize_host(host);
    vhosts
        .iter()
        .find(|v| v.matches_host(&host))
        .ok_or(RouterError::NoVHostMatch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MatchKind, RuleConfig};

    fn vhost_cfg(name: &str, aliases: &[&str]) -> VHostConfig {
        VHostConfig {
            server_name: name.to_string(),
            aliases: aliases.iter().map(|s| s.to_string()).collect(),
            header_policy: HeaderPolicy::default(),
            rules: vec![RuleConfig {
                match_kind: MatchKind::Default,
                pattern: String::new(),
                upstream_group: "g".to_string(),
                lb_method: Default::default(),
                discovery_type: crate::config::DiscoveryType::Static,
                upstreams: vec![],
                read_timeout: None,
                write_timeout: None,
                allow_passthrough: false,
                allow_redirect: false,
            }],
        }
    }

    #[test]
    fn matches_primary_name_case_insensitively() {
        let v = VHost::compile(&vhost_cfg("Example.com", &[])).unwrap();
        assert!(v.matches_host("example.com"));
    }

    #[test]
    fn matches_wildcard_alias() {
        let v = VHost::compile(&vhost_cfg("example.com", &["*.example.com"])).unwrap();
        assert!(v.matches_host("api.example.com"));
        assert!(!v.matches_host("evilexample.com"));
        assert!(!v.matches_host("example.com.evil.com"));
    }

    #[test]
    fn find_vhost_strips_port_from_host_header() {
        let vhosts = vec![VHost::compile(&vhost_cfg("example.com", &[])).unwrap()];
        assert!(find_vhost(&vhosts, "example.com:8443").is_ok());
    }

    #[test]
    fn find_vhost_errors_when_nothing_matches() {
        let vhosts = vec![VHost::compile(&vhost_cfg("example.com", &[])).unwrap()];
        assert_eq!(Err(RouterError::NoVHostMatch), find_vhost(&vhosts, "other.com"));
    }
}
