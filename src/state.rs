use chrono::{DateTime, Utc};
use std::fmt;

/// The latest image an ImagePolicy has recorded for one image family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRecord {
    pub namespace: String,
    pub name: String,
    pub latest_image: Option<String>,
    /// Semver range of the policy, only reported
    pub version_range: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
}

impl PolicyRecord {
    /// The latest image, treating an empty string as not recorded yet.
    pub fn latest_image(&self) -> Option<&str> {
        self.latest_image.as_deref().filter(|image| !image.is_empty())
    }
}

/// A container running in a pod, observed during one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerObservation {
    pub namespace: String,
    pub pod: String,
    pub container: String,
    pub image: String,
}

impl ContainerObservation {
    pub fn key(&self) -> SampleKey {
        SampleKey {
            namespace: self.namespace.clone(),
            pod: self.pod.clone(),
            container: self.container.clone(),
        }
    }
}

/// Label set of the `update_available` gauge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleKey {
    pub namespace: String,
    pub pod: String,
    pub container: String,
}

impl SampleKey {
    pub fn new(namespace: &str, pod: &str, container: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            pod: pod.to_string(),
            container: container.to_string(),
        }
    }

    pub fn label_values(&self) -> [&str; 3] {
        [&self.namespace, &self.pod, &self.container]
    }
}

impl fmt::Display for SampleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.pod, self.container)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreshnessJudgment {
    pub key: SampleKey,
    pub image: String,
    pub policy_namespace: String,
    pub policy_name: String,
    pub latest_image: String,
    pub is_stale: bool,
}

impl FreshnessJudgment {
    pub fn value(&self) -> f64 {
        if self.is_stale { 1.0 } else { 0.0 }
    }
}
