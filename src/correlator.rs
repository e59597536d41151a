use crate::image_reference::{ImageReference, base_identity};
use crate::state::{ContainerObservation, FreshnessJudgment, PolicyRecord};
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Joins policies and containers by base image identity, in input order.
///
/// When several policies share a base identity the last one wins.
pub fn correlate(
    policies: &[PolicyRecord],
    containers: &[ContainerObservation],
) -> Vec<FreshnessJudgment> {
    let index = index_policies(policies.iter());
    judge(&index, containers)
}

/// Like [`correlate`], but orders the policies with `compare` first so the tie-break
/// between policies sharing a base identity does not depend on API list order.
pub fn correlate_by<F>(
    policies: &[PolicyRecord],
    containers: &[ContainerObservation],
    mut compare: F,
) -> Vec<FreshnessJudgment>
where
    F: FnMut(&PolicyRecord, &PolicyRecord) -> Ordering,
{
    let mut ordered: Vec<&PolicyRecord> = policies.iter().collect();
    ordered.sort_by(|a, b| compare(a, b));
    let index = index_policies(ordered.into_iter());
    judge(&index, containers)
}

/// Oldest first, so the most recently created policy wins a tie-break.
pub fn by_creation_then_name(a: &PolicyRecord, b: &PolicyRecord) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.namespace.cmp(&b.namespace))
        .then_with(|| a.name.cmp(&b.name))
}

fn index_policies<'a>(
    policies: impl Iterator<Item = &'a PolicyRecord>,
) -> HashMap<String, &'a PolicyRecord> {
    let mut index: HashMap<String, &PolicyRecord> = HashMap::new();
    for policy in policies {
        let Some(latest_image) = policy.latest_image() else {
            debug!(
                "Skipping policy {}/{} without a latest image",
                policy.namespace, policy.name
            );
            continue;
        };
        let base = base_identity(latest_image);
        if let Some(previous) = index.insert(base.clone(), policy) {
            warn!(
                "Policies {}/{} and {}/{} both track image {}, using {}/{}",
                previous.namespace,
                previous.name,
                policy.namespace,
                policy.name,
                base,
                policy.namespace,
                policy.name
            );
        }
    }
    index
}

fn judge(
    index: &HashMap<String, &PolicyRecord>,
    containers: &[ContainerObservation],
) -> Vec<FreshnessJudgment> {
    containers
        .iter()
        .filter_map(|container| {
            let reference = ImageReference::parse(&container.image);
            let policy = index.get(reference.base_identity())?;
            // Only set for indexed policies
            let latest_image = policy.latest_image()?;
            Some(FreshnessJudgment {
                key: container.key(),
                image: container.image.clone(),
                policy_namespace: policy.namespace.clone(),
                policy_name: policy.name.clone(),
                latest_image: latest_image.to_string(),
                is_stale: container.image != latest_image,
            })
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    pub(crate) fn policy(namespace: &str, name: &str, latest_image: &str) -> PolicyRecord {
        PolicyRecord {
            namespace: namespace.to_string(),
            name: name.to_string(),
            latest_image: Some(latest_image.to_string()),
            version_range: None,
            created_at: None,
        }
    }

    pub(crate) fn container(
        namespace: &str,
        pod: &str,
        name: &str,
        image: &str,
    ) -> ContainerObservation {
        ContainerObservation {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            container: name.to_string(),
            image: image.to_string(),
        }
    }

    #[test]
    fn test_stale_and_fresh_containers() {
        let policies = vec![policy("ns", "repo", "repo:2.0")];
        let containers = vec![
            container("ns", "a", "app", "repo:1.0"),
            container("ns", "b", "app", "repo:2.0"),
            container("ns", "c", "app", "other:1.0"),
        ];

        let judgments = correlate(&policies, &containers);

        assert_eq!(judgments.len(), 2);
        assert_eq!(judgments[0].image, "repo:1.0");
        assert!(judgments[0].is_stale);
        assert_eq!(judgments[1].image, "repo:2.0");
        assert!(!judgments[1].is_stale);
        assert!(judgments.iter().all(|j| j.key.pod != "c"));
    }

    #[test]
    fn test_digest_pinned_container_is_compared_exactly() {
        let policies = vec![policy("flux", "app", "ghcr.io/org/app:1.4.0")];
        let containers = vec![container("prod", "app-0", "app", "ghcr.io/org/app@sha256:abcd")];

        let judgments = correlate(&policies, &containers);

        assert_eq!(judgments.len(), 1);
        assert!(judgments[0].is_stale);
        assert_eq!(judgments[0].latest_image, "ghcr.io/org/app:1.4.0");
    }

    #[test]
    fn test_policies_without_latest_image_are_ignored() {
        let empty = policy("ns", "empty", "");
        let mut missing = policy("ns", "missing", "");
        missing.latest_image = None;
        let containers = vec![container("ns", "a", "app", "repo:1.0")];

        assert!(correlate(&[empty, missing], &containers).is_empty());
    }

    #[test]
    fn test_last_policy_wins_in_input_order() {
        let policies = vec![policy("ns", "first", "repo:1.0"), policy("ns", "second", "repo:2.0")];
        let containers = vec![container("ns", "a", "app", "repo:1.0")];

        let judgments = correlate(&policies, &containers);

        assert_eq!(judgments[0].policy_name, "second");
        assert!(judgments[0].is_stale);
    }

    #[test]
    fn test_comparator_makes_tie_break_independent_of_list_order() {
        let mut older = policy("ns", "older", "repo:1.0");
        let mut newer = policy("ns", "newer", "repo:2.0");
        older.created_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        newer.created_at = Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
        let containers = vec![container("ns", "a", "app", "repo:2.0")];

        let forward = correlate_by(
            &[older.clone(), newer.clone()],
            &containers,
            by_creation_then_name,
        );
        let backward = correlate_by(&[newer, older], &containers, by_creation_then_name);

        assert_eq!(forward, backward);
        assert_eq!(forward[0].policy_name, "newer");
        assert!(!forward[0].is_stale);
    }

    #[test]
    fn test_registry_port_images_join() {
        let policies = vec![policy("ns", "app", "registry.local:5000/app:2.0")];
        let containers = vec![
            container("ns", "a", "app", "registry.local:5000/app:1.0"),
            container("ns", "b", "app", "registry.local/app:1.0"),
        ];

        let judgments = correlate(&policies, &containers);

        assert_eq!(judgments.len(), 1);
        assert_eq!(judgments[0].key.pod, "a");
        assert!(judgments[0].is_stale);
    }
}
