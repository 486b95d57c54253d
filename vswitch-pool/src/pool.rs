//! The pool itself (spec.md §4.G): a `vswitch_id -> vSwitchEntry` map with
//! a TTL, a positive-capacity threshold, `Ordered`/`Random` selection, and
//! per-key singleflight so concurrent misses on the same id collapse to one
//! oracle call (spec.md §8 property 6).

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use log::{debug, info};
use rand::Rng;

use cni_core::{CniError, CniResult};

use crate::context::Context;
use crate::oracle::{OracleError, VSwitchEntry, VpcOracle};

/// `capacity_threshold` / `ttl` pair the Go constructor takes explicitly
/// (`NewSwitchPool(100, "100m")`, SPEC_FULL.md §2) rather than hardcoded
/// constants.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub capacity_threshold: u32,
    pub ttl: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity_threshold: 100,
            ttl: Duration::from_secs(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    Ordered,
    Random,
}

pub struct SelectOptions {
    pub ignore_zone: bool,
    pub policy: SelectionPolicy,
}

/// A fetch in flight for a given vswitch id. Waiters block on `cv` until
/// `result` is populated, then clone it out — the Mutex+Condvar pair this
/// crate's concurrency note (spec.md §9) leaves as "an implementation
/// decision".
struct Inflight {
    result: Mutex<Option<Result<VSwitchEntry, OracleError>>>,
    cv: Condvar,
}

#[derive(Default)]
struct PoolState {
    cache: HashMap<String, VSwitchEntry>,
    inflight: HashMap<String, Arc<Inflight>>,
}

pub struct Pool {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl Pool {
    pub fn new(config: PoolConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Spec.md §4.G `GetOne`: resolve every candidate (cache-or-oracle,
    /// singleflighted), filter by capacity and zone, and select one
    /// eligible entry per `opts.policy`.
    pub fn get_one(
        &self,
        ctx: &Context,
        oracle: &dyn VpcOracle,
        zone: &str,
        candidates: &[String],
        opts: &SelectOptions,
    ) -> CniResult<VSwitchEntry> {
        let mut resolved = Vec::with_capacity(candidates.len());
        for id in candidates {
            resolved.push(self.get_or_fetch(ctx, oracle, id)?);
        }

        let eligible: Vec<&VSwitchEntry> = resolved
            .iter()
            .filter(|e| e.available_ip_count >= self.config.capacity_threshold)
            .filter(|e| opts.ignore_zone || e.zone_id == zone)
            .collect();

        if eligible.is_empty() {
            return Err(CniError::NoEligibleVSwitch);
        }

        let chosen = match opts.policy {
            SelectionPolicy::Ordered => eligible[0],
            SelectionPolicy::Random => {
                let idx = rand::thread_rng().gen_range(0..eligible.len());
                eligible[idx]
            }
        };
        Ok(chosen.clone())
    }

    /// Cache hit (and not expired) short-circuits; a miss either joins an
    /// in-flight oracle call for the same `id` or starts one.
    fn get_or_fetch(&self, ctx: &Context, oracle: &dyn VpcOracle, id: &str) -> CniResult<VSwitchEntry> {
        loop {
            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());

            if let Some(entry) = st.cache.get(id) {
                if entry.fetched_at.elapsed() < self.config.ttl {
                    debug!("vswitch {id} served from cache");
                    return Ok(entry.clone());
                }
                st.cache.remove(id);
            }

            if let Some(inflight) = st.inflight.get(id).cloned() {
                drop(st);
                let mut guard = inflight.result.lock().unwrap_or_else(|p| p.into_inner());
                while guard.is_none() {
                    guard = inflight.cv.wait(guard).unwrap_or_else(|p| p.into_inner());
                }
                return guard
                    .clone()
                    .expect("inflight result set before notify")
                    .map_err(|e| CniError::Oracle(e.0));
            }

            let inflight = Arc::new(Inflight {
                result: Mutex::new(None),
                cv: Condvar::new(),
            });
            st.inflight.insert(id.to_string(), inflight.clone());
            drop(st);

            info!("vswitch {id} cache miss, calling oracle");
            let outcome = oracle.describe_vswitch_by_id(ctx, id);

            {
                let mut guard = inflight.result.lock().unwrap_or_else(|p| p.into_inner());
                *guard = Some(outcome.clone());
                inflight.cv.notify_all();
            }

            let mut st = self.state.lock().unwrap_or_else(|p| p.into_inner());
            st.inflight.remove(id);
            if let Ok(entry) = &outcome {
                // spec.md §7: "`Oracle` ... the entry is not cached" on failure.
                st.cache.insert(id.to_string(), entry.clone());
            }
            drop(st);

            return outcome.map_err(|e| CniError::Oracle(e.0));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    struct FakeOracle {
        calls: AtomicUsize,
        entries: HashMap<&'static str, (&'static str, u32)>,
    }

    impl FakeOracle {
        fn new(entries: &[(&'static str, &'static str, u32)]) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                entries: entries.iter().map(|(id, zone, ip)| (*id, (*zone, *ip))).collect(),
            }
        }
    }

    impl VpcOracle for FakeOracle {
        fn describe_vswitch_by_id(&self, _ctx: &Context, id: &str) -> Result<VSwitchEntry, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // give other threads a chance to reach the singleflight check
            // while this call is still in flight.
            thread::sleep(Duration::from_millis(20));
            let (zone, ip) = self
                .entries
                .get(id)
                .copied()
                .ok_or_else(|| OracleError(format!("no such vswitch: {id}")))?;
            Ok(VSwitchEntry {
                id: id.to_string(),
                zone_id: zone.to_string(),
                available_ip_count: ip,
                fetched_at: Instant::now(),
            })
        }
    }

    fn ordered(ignore_zone: bool) -> SelectOptions {
        SelectOptions {
            ignore_zone,
            policy: SelectionPolicy::Ordered,
        }
    }

    fn random(ignore_zone: bool) -> SelectOptions {
        SelectOptions {
            ignore_zone,
            policy: SelectionPolicy::Random,
        }
    }

    /// Scenario S5: both candidates eligible, `Ordered`, 10 calls -> always
    /// the first candidate in input order.
    #[test]
    fn ordered_always_returns_first_eligible_candidate() {
        let pool = Pool::new(PoolConfig::default());
        let oracle = FakeOracle::new(&[("vsw-2", "zone-2", 10), ("vsw-3", "zone-2", 10)]);
        let candidates = vec!["vsw-2".to_string(), "vsw-3".to_string()];

        for _ in 0..10 {
            let picked = pool
                .get_one(&Context::background(), &oracle, "zone-2", &candidates, &ordered(false))
                .unwrap();
            assert_eq!(picked.id, "vsw-2");
        }
    }

    /// Scenario S6: same inputs, `Random` -> both ids appear across many calls.
    #[test]
    fn random_selects_across_all_eligible_candidates() {
        let pool = Pool::new(PoolConfig::default());
        let oracle = FakeOracle::new(&[("vsw-2", "zone-2", 10), ("vsw-3", "zone-2", 10)]);
        let candidates = vec!["vsw-2".to_string(), "vsw-3".to_string()];

        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            let picked = pool
                .get_one(&Context::background(), &oracle, "zone-2", &candidates, &random(false))
                .unwrap();
            seen.insert(picked.id);
        }
        assert_eq!(seen, ["vsw-2".to_string(), "vsw-3".to_string()].into_iter().collect());
    }

    #[test]
    fn filters_by_zone_unless_ignored() {
        let pool = Pool::new(PoolConfig::default());
        let oracle = FakeOracle::new(&[("vsw-1", "zone-1", 10), ("vsw-2", "zone-2", 10)]);
        let candidates = vec!["vsw-1".to_string(), "vsw-2".to_string()];

        let picked = pool
            .get_one(&Context::background(), &oracle, "zone-2", &candidates, &ordered(false))
            .unwrap();
        assert_eq!(picked.id, "vsw-2");

        // ignore_zone admits vsw-1 too, and it's first in input order.
        let picked = pool
            .get_one(&Context::background(), &oracle, "zone-2", &candidates, &ordered(true))
            .unwrap();
        assert_eq!(picked.id, "vsw-1");
    }

    #[test]
    fn below_threshold_entries_are_excluded() {
        let pool = Pool::new(PoolConfig {
            capacity_threshold: 100,
            ..PoolConfig::default()
        });
        let oracle = FakeOracle::new(&[("vsw-1", "zone-1", 5)]);
        let candidates = vec!["vsw-1".to_string()];

        let err = pool
            .get_one(&Context::background(), &oracle, "zone-1", &candidates, &ordered(false))
            .unwrap_err();
        assert!(matches!(err, CniError::NoEligibleVSwitch));
    }

    #[test]
    fn empty_candidate_set_is_no_eligible_vswitch() {
        let pool = Pool::new(PoolConfig::default());
        let oracle = FakeOracle::new(&[]);
        let err = pool
            .get_one(&Context::background(), &oracle, "zone-1", &[], &ordered(false))
            .unwrap_err();
        assert!(matches!(err, CniError::NoEligibleVSwitch));
    }

    #[test]
    fn cache_hit_does_not_call_oracle_again() {
        let pool = Pool::new(PoolConfig::default());
        let oracle = FakeOracle::new(&[("vsw-1", "zone-1", 10)]);
        let candidates = vec!["vsw-1".to_string()];

        pool.get_one(&Context::background(), &oracle, "zone-1", &candidates, &ordered(false))
            .unwrap();
        pool.get_one(&Context::background(), &oracle, "zone-1", &candidates, &ordered(false))
            .unwrap();
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn expired_entry_is_refetched() {
        let pool = Pool::new(PoolConfig {
            capacity_threshold: 0,
            ttl: Duration::from_millis(1),
        });
        let oracle = FakeOracle::new(&[("vsw-1", "zone-1", 10)]);
        let candidates = vec!["vsw-1".to_string()];

        pool.get_one(&Context::background(), &oracle, "zone-1", &candidates, &ordered(false))
            .unwrap();
        thread::sleep(Duration::from_millis(5));
        pool.get_one(&Context::background(), &oracle, "zone-1", &candidates, &ordered(false))
            .unwrap();
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
    }

    /// Property 6: concurrent misses on the same key collapse to one
    /// oracle call and every caller observes the same entry.
    #[test]
    fn concurrent_misses_on_same_key_singleflight() {
        let pool = Arc::new(Pool::new(PoolConfig::default()));
        let n = 8;
        let oracle = Arc::new(FakeOracle::new(&[("vsw-1", "zone-1", 10)]));

        // every thread starts at the same instant, so most of them reach
        // the singleflight check while the first thread's oracle call
        // (artificially slowed) is still in flight.
        let start = Arc::new(Barrier::new(n));
        let handles: Vec<_> = (0..n)
            .map(|_| {
                let pool = pool.clone();
                let oracle = oracle.clone();
                let start = start.clone();
                thread::spawn(move || {
                    start.wait();
                    pool.get_one(
                        &Context::background(),
                        oracle.as_ref(),
                        "zone-1",
                        &["vsw-1".to_string()],
                        &ordered(false),
                    )
                    .unwrap()
                })
            })
            .collect();

        let results: Vec<VSwitchEntry> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
        for r in &results {
            assert_eq!(r.id, "vsw-1");
            assert_eq!(r.available_ip_count, 10);
        }
    }

    #[test]
    fn oracle_failure_is_not_cached() {
        let pool = Pool::new(PoolConfig::default());
        let oracle = FakeOracle::new(&[]);
        let candidates = vec!["does-not-exist".to_string()];

        let err = pool
            .get_one(&Context::background(), &oracle, "zone-1", &candidates, &ordered(false))
            .unwrap_err();
        assert!(matches!(err, CniError::Oracle(_)));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);

        // a second attempt calls the oracle again (not cached), still fails.
        let err = pool
            .get_one(&Context::background(), &oracle, "zone-1", &candidates, &ordered(false))
            .unwrap_err();
        assert!(matches!(err, CniError::Oracle(_)));
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 2);
    }
}
