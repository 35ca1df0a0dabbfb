//! Origin selection among a rule's upstream group.

use rand::Rng;

use crate::config::LbMethod;
use crate::error::PoolError;
use crate::host::Origin;

/// A named group of origins a rule routes to, plus the round-robin cursor
/// [`LbMethod::RoundRobin`] needs to remember between requests.
#[derive(Debug)]
pub struct UpstreamGroup {
    /// Group name, as referenced by [`crate::rule::Rule::upstream_group`].
    pub name: String,
    origins: Vec<Origin>,
    round_robin_cursor: usize,
}

impl UpstreamGroup {
    /// Creates a new, empty group.
    pub fn new(name: impl Into<String>, origins: Vec<Origin>) -> Self {
        UpstreamGroup {
            name: name.into(),
            origins,
            round_robin_cursor: 0,
        }
    }

    /// The origins in this group, in definition order.
    pub fn origins(&self) -> &[Origin] {
        &self.origins
    }

    /// Mutable access to an origin by index.
    pub fn origin_mut(&mut self, idx: usize) -> Option<&mut Origin> {
        self.origins.get_mut(idx)
    }

    /// Mutable access to every origin in the group, for periodic sweeps that
    /// aren't tied to a single selection.
    pub fn origins_mut(&mut self) -> impl Iterator<Item = &mut Origin> {
        self.origins.iter_mut()
    }

    /// Selects a healthy origin index using `method`. Ties (including the
    /// `rtt` method when every candidate has a zero RTT sample) break by
    /// first-in-definition-order, matching the load balancer's documented
    /// tie-break rule.
    pub fn select(&mut self, method: LbMethod) -> Result<usize, PoolError> {
        let healthy: Vec<usize> = self
            .origins
            .iter()
            .enumerate()
            .filter(|(_, o)| o.is_healthy())
            .map(|(i, _)| i)
            .collect();

        if healthy.is_empty() {
            return Err(PoolError::NoHealthyUpstream(self.name.clone()));
        }

        let chosen = match method {
            LbMethod::None => healthy[0],
            LbMethod::RoundRobin => {
                let idx = healthy[self.round_robin_cursor % healthy.len()];
                self.round_robin_cursor = self.round_robin_cursor.wrapping_add(1);
                idx
            }
            LbMethod::Random => {
                let i = rand::thread_rng().gen_range(0..healthy.len());
                healthy[i]
            }
            LbMethod::MostIdle => *healthy
                .iter()
                .max_by_key(|&&i| self.origins[i].idle_count())
                .expect("healthy is non-empty"),
            LbMethod::Rtt => *healthy
                .iter()
                .min_by(|&&a, &&b| {
                    rtt_of(&self.origins[a])
                        .partial_cmp(&rtt_of(&self.origins[b]))
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .expect("healthy is non-empty"),
        };

        Ok(chosen)
    }
}

fn rtt_of(origin: &Origin) -> f64 {
    origin
        .idle_connections()
        .map(|(_, c)| c.rtt_ewma_micros())
        .fold(f64::INFINITY, f64::min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn round_robin_cycles_through_origins_in_order() {
        let mut group = UpstreamGroup::new("g", vec![Origin::new(addr(1)), Origin::new(addr(2))]);
        let first = group.select(LbMethod::RoundRobin).unwrap();
        let second = group.select(LbMethod::RoundRobin).unwrap();
        let third = group.select(LbMethod::RoundRobin).unwrap();
        assert_ne!(first, second);
        assert_eq!(first, third);
    }

    #[test]
    fn none_method_always_picks_first_healthy() {
        let mut group = UpstreamGroup::new("g", vec![Origin::new(addr(1)), Origin::new(addr(2))]);
        assert_eq!(0, group.select(LbMethod::None).unwrap());
        assert_eq!(0, group.select(LbMethod::None).unwrap());
    }

    #[test]
    fn select_errors_when_every_origin_is_down() {
        let mut origin = Origin::new(addr(1));
        let key = origin.allocate();
        origin.begin_connect(key);
        origin.connected(key);
        origin.mark_down(key);
        let mut group = UpstreamGroup::new("g", vec![origin]);
        assert!(matches!(
            group.select(LbMethod::Rtt),
            Err(PoolError::NoHealthyUpstream(_))
        ));
    }

    #[test]
    fn most_idle_prefers_origin_with_more_idle_connections() {
        let mut a = Origin::new(addr(1));
        let ak = a.allocate();
        a.begin_connect(ak);
        a.connected(ak);

        let mut b = Origin::new(addr(2));
        let bk1 = b.allocate();
        b.begin_connect(bk1);
        b.connected(bk1);
        let bk2 = b.allocate();
        b.begin_connect(bk2);
        b.connected(bk2);

        let mut group = UpstreamGroup::new("g", vec![a, b]);
        assert_eq!(1, group.select(LbMethod::MostIdle).unwrap());
    }
}
