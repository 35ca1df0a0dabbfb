//! Typed configuration tree.
//!
//! The core only ever consumes a fully-built [`Config`]; turning a TOML
//! document into one is the `server` binary's job (`serde` + `toml`, with
//! `deny_unknown_fields` so a typo in a config file is a startup error, not a
//! silently-ignored field).

use std::net::SocketAddr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Top-level configuration: one or more listening servers, each with its own
/// vhost table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Worker thread count. Defaults to the number of available cores.
    #[serde(default)]
    pub worker_threads: Option<usize>,
    /// Logging configuration. Retained even though the core only consumes
    /// `level`, so a config file written for the original schema round-trips.
    #[serde(default)]
    pub logger: LoggerConfig,
    /// Listening servers.
    pub servers: Vec<ServerConfig>,
}

impl Config {
    /// Validates cross-references (upstream groups, regex patterns) that
    /// can't be checked by `serde` alone.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.iter().all(|s| s.vhosts.is_empty()) {
            return Err(ConfigError::NoVHosts);
        }

        for server in &self.servers {
            for vhost in &server.vhosts {
                for rule in &vhost.rules {
                    if rule.discovery_type != DiscoveryType::Static {
                        return Err(ConfigError::UnsupportedDiscoveryType(rule.discovery_type));
                    }
                    if let MatchKind::Regex = rule.match_kind {
                        regex::Regex::new(&rule.pattern).map_err(|source| {
                            ConfigError::InvalidRegex {
                                rule: rule.pattern.clone(),
                                source,
                            }
                        })?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Sums configured static upstream counts across every rule in every
    /// server, as this core's proxy for §5's "N pool connections per
    /// origin": since this core opens origin connections lazily rather than
    /// pre-warming a fixed pool at worker init, one potential connection per
    /// configured upstream is the worst case a running worker can reach.
    fn total_upstream_connections(&self) -> usize {
        self.servers
            .iter()
            .flat_map(|s| &s.vhosts)
            .flat_map(|v| &v.rules)
            .map(|r| r.upstreams.len())
            .sum()
    }

    /// Checks the process's current `RLIMIT_NOFILE` against the worst-case
    /// open-fd count from §5's resource-discipline formula:
    /// `total_connections * total_threads + total_pending + 2 *
    /// total_threads`. Returns a human-readable warning when the configured
    /// limit looks insufficient; this is a best-effort startup log, not
    /// enforcement (rlimit tuning itself is out of this core's scope, per
    /// §1's Non-goals).
    pub fn check_resource_limits(&self, worker_threads: usize) -> Option<String> {
        let total_connections = self.total_upstream_connections();
        let total_pending: usize = self.servers.iter().map(|s| s.max_pending).sum();
        let required = total_connections
            .saturating_mul(worker_threads)
            .saturating_add(total_pending)
            .saturating_add(2 * worker_threads);

        let soft_limit = current_nofile_limit()?;
        if (soft_limit as usize) < required {
            return Some(format!(
                "rlimit_nofile ({soft_limit}) is below the worst-case fd requirement \
                 ({required} = {total_connections} upstream conns * {worker_threads} workers \
                 + {total_pending} pending + {double} reserved); consider raising it",
                double = 2 * worker_threads,
            ));
        }
        None
    }
}

#[cfg(unix)]
fn current_nofile_limit() -> Option<u64> {
    let mut limit = libc::rlimit { rlim_cur: 0, rlim_max: 0 };
    let rc = unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) };
    (rc == 0).then_some(limit.rlim_cur as u64)
}

#[cfg(not(unix))]
fn current_nofile_limit() -> Option<u64> {
    None
}

/// Logging sink configuration. Only `level` is consumed by the core; the
/// rest describe a sink (file/syslog) that is the binary's concern.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggerConfig {
    /// `tracing` filter directive, e.g. `"info"` or `"rproxy=debug"`.
    pub level: String,
    /// Sink kind: `"stdout"`, `"file"`, or `"syslog"`. Binary boundary.
    pub r#type: String,
    /// File path, when `type = "file"`. Binary boundary.
    pub path: Option<String>,
    /// Log line format: `"text"` or `"json"`. Binary boundary.
    pub format: String,
    /// Syslog facility, when `type = "syslog"`. Binary boundary.
    pub facility: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        LoggerConfig {
            level: "info".to_string(),
            r#type: "stdout".to_string(),
            path: None,
            format: "text".to_string(),
            facility: None,
        }
    }
}

/// One listening server: a bind address, optional TLS, and a vhost table.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Address to bind and listen on.
    pub listen: SocketAddr,
    /// TLS certificate/key paths. Absent means plaintext.
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    /// Maximum pending (queued, connection-less) requests per worker before
    /// new connections are rejected at accept time.
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,
    /// How long a pending request may wait for an upstream connection.
    #[serde(default = "default_pending_timeout", with = "humantime_secs")]
    pub pending_timeout: Duration,
    /// Default read timeout for upstream connections, overridable per-rule.
    #[serde(default = "default_timeout", with = "humantime_secs")]
    pub read_timeout: Duration,
    /// Default write timeout for upstream connections, overridable per-rule.
    #[serde(default = "default_timeout", with = "humantime_secs")]
    pub write_timeout: Duration,
    /// High watermark, in bytes, before backpressure is applied to a peer.
    #[serde(default = "default_high_watermark")]
    pub high_watermark: usize,
    /// How long an origin connection stays `Down` before a retry is allowed.
    #[serde(default = "default_retry_interval", with = "humantime_secs")]
    pub retry_interval: Duration,
    /// Virtual hosts served on this listener.
    pub vhosts: Vec<VHostConfig>,
}

fn default_max_pending() -> usize {
    1024
}
fn default_pending_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_timeout() -> Duration {
    Duration::from_secs(30)
}
fn default_high_watermark() -> usize {
    1 << 20
}
fn default_retry_interval() -> Duration {
    Duration::from_secs(30)
}

mod humantime_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// TLS termination configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    /// PEM certificate chain path.
    pub cert_path: String,
    /// PEM private key path.
    pub key_path: String,
    /// Optional client-certificate CRL path, for mTLS revocation checks.
    #[serde(default)]
    pub crl_path: Option<String>,
}

/// A virtual host: a set of server names and the rules evaluated within it.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VHostConfig {
    /// Primary server name, matched against the request's `Host` header.
    pub server_name: String,
    /// Additional names this vhost also answers to.
    #[serde(default)]
    pub aliases: Vec<String>,
    /// Header rewrite and forwarding policy applied to every rule match.
    #[serde(default)]
    pub header_policy: HeaderPolicy,
    /// Rules evaluated in definition order; first match wins.
    pub rules: Vec<RuleConfig>,
}

/// Request-path matching strategy for a [`RuleConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchKind {
    /// Exact path match.
    Exact,
    /// Shell-glob match (`*`, `?`).
    Glob,
    /// Regex match, compiled once at config load.
    Regex,
    /// Matches any path not matched by an earlier rule.
    Default,
}

/// How an upstream group is populated. Only `Static` is implemented by this
/// core; the others are accepted for config-schema completeness and
/// rejected with a clear error at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryType {
    /// A fixed list of host:port pairs.
    Static,
    /// Resolved via the system resolver, polled on an interval.
    StrictDns,
    /// Resolved via a local DNS cache.
    LocalDns,
    /// Endpoint Discovery Service (xDS-style).
    Eds,
    /// The kernel-level original destination of a redirected connection.
    OriginalDst,
}

/// Load-balancing method used to select among healthy origins in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LbMethod {
    /// Lowest exponentially-weighted moving average round-trip time.
    Rtt,
    /// Round-robin over healthy origins, in definition order.
    RoundRobin,
    /// Uniform random choice among healthy origins.
    Random,
    /// Fewest active connections.
    MostIdle,
    /// Always the first healthy origin in definition order.
    None,
}

impl Default for LbMethod {
    fn default() -> Self {
        LbMethod::Rtt
    }
}

/// A single routing rule: a path pattern plus the upstream group and
/// timeouts to apply on a match.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    /// How [`RuleConfig::pattern`] is interpreted.
    pub match_kind: MatchKind,
    /// The path pattern itself. Ignored when `match_kind = "default"`.
    #[serde(default)]
    pub pattern: String,
    /// Name of the upstream group this rule routes to.
    pub upstream_group: String,
    /// Load-balancing method within the group.
    #[serde(default)]
    pub lb_method: LbMethod,
    /// How upstream hosts are discovered. Only `Static` is implemented.
    #[serde(default = "default_discovery")]
    pub discovery_type: DiscoveryType,
    /// Static upstream hosts, when `discovery_type = "static"`.
    #[serde(default)]
    pub upstreams: Vec<SocketAddr>,
    /// Overrides [`ServerConfig::read_timeout`] when set.
    #[serde(default, with = "humantime_secs_opt")]
    pub read_timeout: Option<Duration>,
    /// Overrides [`ServerConfig::write_timeout`] when set.
    #[serde(default, with = "humantime_secs_opt")]
    pub write_timeout: Option<Duration>,
    /// Whether a successful upgrade response switches this connection to
    /// opaque bidirectional byte-pump (passthrough) mode.
    #[serde(default)]
    pub allow_passthrough: bool,
    /// Whether a 3xx response's `Location` header is rewritten through the
    /// vhost's `header_policy.rewrite_urls` mapping before being relayed to
    /// the client.
    #[serde(default)]
    pub allow_redirect: bool,
}

fn default_discovery() -> DiscoveryType {
    DiscoveryType::Static
}

mod humantime_secs_opt {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&d.as_secs()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

/// Header rewrite and forwarding policy, applied to every request matched
/// within a vhost.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HeaderPolicy {
    /// Set `X-Forwarded-For` to the client address, overwriting any value
    /// the client itself sent.
    pub set_x_forwarded_for: bool,
    /// Set `X-SSL-Client-Verify`/`X-SSL-Client-Cert` style headers when the
    /// connection is mTLS-authenticated.
    pub set_ssl_headers: bool,
    /// Client certificate extensions to surface as `X-SSL-Client-<Name>` headers.
    pub x509_extensions: Vec<X509ExtensionConfig>,
    /// Header names stripped from the client request before forwarding.
    pub strip_headers: Vec<String>,
    /// `(from, to)` URL prefix rewrites applied to the request target before
    /// it's forwarded to the origin.
    pub rewrite_urls: Vec<(String, String)>,
}

/// One client-certificate extension to surface as a forwarded header.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct X509ExtensionConfig {
    /// Forwarded header name, e.g. `X-SSL-Client-SAN`.
    pub name: String,
    /// Dotted OID of the extension to extract.
    pub oid: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_config_with_no_vhosts() {
        let cfg = Config {
            worker_threads: None,
            logger: LoggerConfig::default(),
            servers: vec![ServerConfig {
                listen: "127.0.0.1:8080".parse().unwrap(),
                tls: None,
                max_pending: 1,
                pending_timeout: Duration::from_secs(1),
                read_timeout: Duration::from_secs(1),
                write_timeout: Duration::from_secs(1),
                high_watermark: 1024,
                retry_interval: Duration::from_secs(30),
                vhosts: vec![],
            }],
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::NoVHosts)));
    }

    #[test]
    fn rejects_non_static_discovery() {
        let rule = RuleConfig {
            match_kind: MatchKind::Default,
            pattern: String::new(),
            upstream_group: "g".to_string(),
            lb_method: LbMethod::Rtt,
            discovery_type: DiscoveryType::StrictDns,
            upstreams: vec![],
            read_timeout: None,
            write_timeout: None,
            allow_passthrough: false,
            allow_redirect: false,
        };
        let cfg = Config {
            worker_threads: None,
            logger: LoggerConfig::default(),
            servers: vec![ServerConfig {
                listen: "127.0.0.1:8080".parse().unwrap(),
                tls: None,
                max_pending: 1,
                pending_timeout: Duration::from_secs(1),
                read_timeout: Duration::from_secs(1),
                write_timeout: Duration::from_secs(1),
                high_watermark: 1024,
                retry_interval: Duration::from_secs(30),
                vhosts: vec![VHostConfig {
                    server_name: "example.com".to_string(),
                    aliases: vec![],
                    header_policy: HeaderPolicy::default(),
                    rules: vec![rule],
                }],
            }],
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::UnsupportedDiscoveryType(DiscoveryType::StrictDns))
        ));
    }

    #[test]
    fn lb_method_defaults_to_rtt() {
        assert_eq!(LbMethod::Rtt, LbMethod::default());
    }
}
