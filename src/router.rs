//! Top-level routing: vhost lookup, rule match, and origin selection.
//!
//! Two-stage, per §4.3: `Router::route` finds the vhost from the request's
//! `Host` header, then the first matching rule within it, then asks the
//! matched rule's upstream group to select a healthy origin. Each stage has
//! its own error variant so the caller can set the matching
//! [`crate::stream_info::ResponseFlags`] bit.

use std::collections::HashMap;

use crate::config::HeaderPolicy;
use crate::error::{PoolError, RouterError};
use crate::load_balancer::UpstreamGroup;
use crate::request::RequestContext;
use crate::rule::Rule;
use crate::vhost::{find_vhost, VHost};

/// The outcome of a successful route: the matched rule, the index of the
/// origin selected within its upstream group, and the matched vhost's header
/// policy.
pub struct RouteMatch<'a> {
    /// The rule that matched the request path.
    pub rule: &'a Rule,
    /// Index of the selected origin within its group's `origins()` slice.
    pub origin_idx: usize,
    /// The matched vhost's header rewrite/forwarding policy (§4.4).
    pub header_policy: HeaderPolicy,
}

/// Compiled vhosts plus the upstream groups they reference.
pub struct Router {
    vhosts: Vec<VHost>,
    groups: HashMap<String, UpstreamGroup>,
}

impl Router {
    /// Builds a router from compiled vhosts and upstream groups, keyed by
    /// group name.
    pub fn new(vhosts: Vec<VHost>, groups: Vec<UpstreamGroup>) -> Self {
        let groups = groups.into_iter().map(|g| (g.name.clone(), g)).collect();
        Router { vhosts, groups }
    }

    /// Routes `ctx` to a vhost, a rule, and a selected origin, recording the
    /// matched vhost/upstream-group names on the context for logging.
    pub fn route(&mut self, ctx: &mut RequestContext) -> Result<RouteMatch<'_>, RouteError> {
        let host = ctx.host().ok_or(RouteError::Router(RouterError::NoVHostMatch))?;
        let vhost = find_vhost(&self.vhosts, &host).map_err(RouteError::Router)?;

        let path = ctx.path().unwrap_or("/");
        let rule = vhost.match_rule(path).map_err(RouteError::Router)?;

        let group = self
            .groups
            .get_mut(&rule.upstream_group)
            .ok_or_else(|| RouteError::Pool(PoolError::NoHealthyUpstream(rule.upstream_group.clone())))?;
        let origin_idx = group.select(rule.lb_method).map_err(RouteError::Pool)?;

        let header_policy = vhost.header_policy.clone();

        ctx.matched_vhost = Some(host);
        ctx.matched_upstream_group = Some(rule.upstream_group.clone());

        Ok(RouteMatch { rule, origin_idx, header_policy })
    }

    /// Borrows the upstream group a prior [`RouteMatch`] selected from.
    pub fn group(&self, name: &str) -> Option<&UpstreamGroup> {
        self.groups.get(name)
    }

    /// Mutably borrows the upstream group a prior [`RouteMatch`] selected
    /// from, e.g. to release a leased connection.
    pub fn group_mut(&mut self, name: &str) -> Option<&mut UpstreamGroup> {
        self.groups.get_mut(name)
    }

    /// Mutable access to every upstream group, for the periodic sweep that
    /// retries `Down` origins regardless of which rules reference them.
    pub fn all_groups_mut(&mut self) -> impl Iterator<Item = &mut UpstreamGroup> {
        self.groups.values_mut()
    }
}

/// Either stage of routing can fail independently.
#[derive(Debug)]
pub enum RouteError {
    /// No vhost or rule matched the request.
    Router(RouterError),
    /// A rule matched, but its upstream group has no healthy origin.
    Pool(PoolError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HeaderPolicy, LbMethod, MatchKind, RuleConfig, VHostConfig};
    use crate::host::Origin;
    use crate::vhost::VHost;

    fn vhost(name: &str) -> VHostConfig {
        VHostConfig {
            server_name: name.to_string(),
            aliases: vec![],
            header_policy: HeaderPolicy::default(),
            rules: vec![RuleConfig {
                match_kind: MatchKind::Default,
                pattern: String::new(),
                upstream_group: "g".to_string(),
                lb_method: LbMethod::None,
                discovery_type: crate::config::DiscoveryType::Static,
                upstreams: vec![],
                read_timeout: None,
                write_timeout: None,
                allow_passthrough: false,
                allow_redirect: false,
            }],
        }
    }

    fn group_with_one_origin() -> UpstreamGroup {
        UpstreamGroup::new(
            "g",
            vec![Origin::new("127.0.0.1:9000".parse().unwrap())],
        )
    }

    #[test]
    fn routes_to_matching_vhost_and_selects_origin() {
        let mut router = Router::new(
            vec![VHost::compile(&vhost("example.com")).unwrap()],
            vec![group_with_one_origin()],
        );
        let mut ctx = RequestContext::new();
        ctx.add_header("Host", b"example.com");
        ctx.target = Some("/".to_string());

        let route = router.route(&mut ctx).unwrap();
        assert_eq!(0, route.origin_idx);
        assert_eq!(Some("example.com".to_string()), ctx.matched_vhost);
    }

    #[test]
    fn missing_host_header_fails_routing() {
        let mut router = Router::new(
            vec![VHost::compile(&vhost("example.com")).unwrap()],
            vec![group_with_one_origin()],
        );
        let mut ctx = RequestContext::new();
        ctx.target = Some("/".to_string());
        assert!(matches!(
            router.route(&mut ctx),
            Err(RouteError::Router(RouterError::NoVHostMatch))
        ));
    }

    #[test]
    fn unknown_upstream_group_fails_with_pool_error() {
        let mut router = Router::new(vec![VHost::compile(&vhost("example.com")).unwrap()], vec![]);
        let mut ctx = RequestContext::new();
        ctx.add_header("Host", b"example.com");
        ctx.target = Some("/".to_string());
        assert!(matches!(
            router.route(&mut ctx),
            Err(RouteError::Pool(PoolError::NoHealthyUpstream(_)))
        ));
    }
}
