use crate::state::{FreshnessJudgment, SampleKey};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Write side of a gauge keyed by namespace, pod and container.
pub trait GaugeSurface {
    fn set_gauge(&mut self, key: &SampleKey, value: f64);
    fn remove_gauge(&mut self, key: &SampleKey);
}

impl GaugeSurface for BTreeMap<SampleKey, f64> {
    fn set_gauge(&mut self, key: &SampleKey, value: f64) {
        self.insert(key.clone(), value);
    }

    fn remove_gauge(&mut self, key: &SampleKey) {
        self.remove(key);
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub stale: usize,
    pub fresh: usize,
    pub removed: usize,
}

/// Keeps a gauge in line with the judgments of the latest cycle.
///
/// Keys written in the previous cycle that are missing from the current one are
/// removed before the new values are written, so vanished pods and containers do
/// not linger in the exposed series.
#[derive(Debug, Default)]
pub struct Reconciler {
    written: BTreeSet<SampleKey>,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reconcile<S: GaugeSurface>(
        &mut self,
        judgments: &[FreshnessJudgment],
        surface: &mut S,
    ) -> ReconcileSummary {
        let current: BTreeSet<SampleKey> = judgments.iter().map(|j| j.key.clone()).collect();
        let mut summary = ReconcileSummary::default();

        for key in self.written.difference(&current) {
            debug!("Removing gauge for vanished container {}", key);
            surface.remove_gauge(key);
            summary.removed += 1;
        }

        // Later judgments for the same key overwrite earlier ones
        let mut values: BTreeMap<&SampleKey, f64> = BTreeMap::new();
        for judgment in judgments {
            values.insert(&judgment.key, judgment.value());
        }
        for (key, value) in values {
            surface.set_gauge(key, value);
            if value > 0.0 {
                summary.stale += 1;
            } else {
                summary.fresh += 1;
            }
        }

        self.written = current;
        summary
    }

    #[cfg(test)]
    pub(crate) fn written(&self) -> &BTreeSet<SampleKey> {
        &self.written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::correlate;
    use crate::correlator::tests::{container, policy};

    fn judgment(namespace: &str, pod: &str, container: &str, is_stale: bool) -> FreshnessJudgment {
        FreshnessJudgment {
            key: SampleKey::new(namespace, pod, container),
            image: "img:v1".to_string(),
            policy_namespace: namespace.to_string(),
            policy_name: "policy".to_string(),
            latest_image: "img:v2".to_string(),
            is_stale,
        }
    }

    #[test]
    fn test_writes_stale_and_fresh_values() {
        let mut store = BTreeMap::new();
        let mut reconciler = Reconciler::new();

        let summary = reconciler.reconcile(
            &[judgment("ns", "a", "app", true), judgment("ns", "b", "app", false)],
            &mut store,
        );

        assert_eq!(store[&SampleKey::new("ns", "a", "app")], 1.0);
        assert_eq!(store[&SampleKey::new("ns", "b", "app")], 0.0);
        assert_eq!(
            summary,
            ReconcileSummary {
                stale: 1,
                fresh: 1,
                removed: 0
            }
        );
    }

    #[test]
    fn test_prunes_keys_missing_from_next_cycle() {
        let mut store = BTreeMap::new();
        let mut reconciler = Reconciler::new();
        reconciler.reconcile(&[judgment("ns", "p", "c", true)], &mut store);
        assert_eq!(store.get(&SampleKey::new("ns", "p", "c")), Some(&1.0));

        let summary = reconciler.reconcile(&[judgment("ns", "other", "c", false)], &mut store);

        assert!(!store.contains_key(&SampleKey::new("ns", "p", "c")));
        assert_eq!(store.len(), 1);
        assert_eq!(summary.removed, 1);
    }

    #[test]
    fn test_empty_cycle_clears_everything_written() {
        let mut store = BTreeMap::new();
        let mut reconciler = Reconciler::new();
        reconciler.reconcile(
            &[judgment("ns", "a", "app", true), judgment("ns", "b", "app", true)],
            &mut store,
        );

        reconciler.reconcile(&[], &mut store);

        assert!(store.is_empty());
        assert!(reconciler.written().is_empty());
    }

    #[test]
    fn test_later_judgment_for_same_key_wins() {
        let mut store = BTreeMap::new();
        let mut reconciler = Reconciler::new();

        let summary = reconciler.reconcile(
            &[judgment("ns", "a", "app", true), judgment("ns", "a", "app", false)],
            &mut store,
        );

        assert_eq!(store.len(), 1);
        assert_eq!(store[&SampleKey::new("ns", "a", "app")], 0.0);
        assert_eq!(summary.fresh, 1);
        assert_eq!(summary.stale, 0);
    }

    #[test]
    fn test_correlate_and_reconcile_are_deterministic() {
        let policies = vec![
            policy("ns", "one", "one:2"),
            policy("ns", "two", "two:5"),
            policy("ns", "dup", "one:3"),
        ];
        let containers = vec![
            container("ns", "a", "x", "one:2"),
            container("ns", "b", "y", "two:4"),
            container("ns", "c", "z", "one:3"),
            container("ns", "d", "w", "three:1"),
        ];

        let run = || {
            let mut store = BTreeMap::new();
            Reconciler::new().reconcile(&correlate(&policies, &containers), &mut store);
            store
        };

        assert_eq!(run(), run());
    }
}
