//! Traffic-shaping helper (spec.md §4.D): translate a byte-per-second
//! rate into a `tbf` qdisc on a given link.

use log::info;
use netlink_gateway::KernelGateway;

pub struct TrafficShaper;

impl TrafficShaper {
    /// Installs (or, for `rate == 0`, removes) a root `tbf` qdisc on
    /// `link_index`. Idempotent: re-applying the same rate leaves the
    /// qdisc unchanged (`qdisc_replace_tbf` is a netlink `NLM_F_REPLACE`,
    /// spec.md §4.D).
    pub fn apply(
        gateway: &dyn KernelGateway,
        link_index: u32,
        rate_bytes_per_second: u64,
    ) -> anyhow::Result<()> {
        if rate_bytes_per_second == 0 {
            info!("removing traffic shaping on link {link_index} (rate=0)");
            return match gateway.qdisc_del(link_index) {
                Ok(()) => Ok(()),
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e.into()),
            };
        }
        info!("applying tbf shaping on link {link_index}: {rate_bytes_per_second} B/s");
        gateway.qdisc_replace_tbf(link_index, rate_bytes_per_second)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netlink_gateway::FakeGateway;

    #[test]
    fn apply_then_reapply_same_rate_is_idempotent() {
        let gw = FakeGateway::new();
        TrafficShaper::apply(&gw, 7, 1_000_000).unwrap();
        TrafficShaper::apply(&gw, 7, 1_000_000).unwrap();
        assert_eq!(gw.qdisc_rate(7), Some(1_000_000));
    }

    #[test]
    fn zero_rate_removes_shaping() {
        let gw = FakeGateway::new();
        TrafficShaper::apply(&gw, 7, 1_000_000).unwrap();
        TrafficShaper::apply(&gw, 7, 0).unwrap();
        assert_eq!(gw.qdisc_rate(7), None);
    }

    #[test]
    fn zero_rate_with_no_existing_shaping_is_a_noop() {
        let gw = FakeGateway::new();
        TrafficShaper::apply(&gw, 7, 0).unwrap();
        assert_eq!(gw.qdisc_rate(7), None);
    }
}
