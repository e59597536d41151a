use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Flux image-reflector `ImagePolicy`, only the fields read by the exporter.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
#[kube(
    group = "image.toolkit.fluxcd.io",
    version = "v1beta2",
    kind = "ImagePolicy",
    plural = "imagepolicies",
    namespaced,
    status = "ImagePolicyStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ImagePolicySpec {
    #[serde(default)]
    pub image_repository_ref: Option<ImageRepositoryRef>,
    #[serde(default)]
    pub policy: PolicyChoice,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct ImageRepositoryRef {
    pub name: String,
    #[serde(default)]
    pub namespace: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct PolicyChoice {
    #[serde(default)]
    pub semver: Option<SemVerPolicy>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct SemVerPolicy {
    pub range: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct ImagePolicyStatus {
    #[serde(default)]
    pub latest_image: Option<String>,
    /// Newer Flux releases report the latest image as a structured reference
    #[serde(default)]
    pub latest_ref: Option<LatestRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct LatestRef {
    pub name: String,
    #[serde(default)]
    pub tag: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
}

impl LatestRef {
    pub fn image(&self) -> String {
        let mut image = self.name.clone();
        if let Some(tag) = self.tag.as_deref().filter(|t| !t.is_empty()) {
            image.push(':');
            image.push_str(tag);
        }
        if let Some(digest) = self.digest.as_deref().filter(|d| !d.is_empty()) {
            image.push('@');
            image.push_str(digest);
        }
        image
    }
}

impl ImagePolicy {
    /// `status.latestImage`, falling back to `status.latestRef`.
    pub fn latest_image(&self) -> Option<String> {
        let status = self.status.as_ref()?;
        match status.latest_image.as_deref() {
            Some(image) if !image.is_empty() => Some(image.to_string()),
            _ => status.latest_ref.as_ref().map(LatestRef::image),
        }
    }

    pub fn semver_range(&self) -> Option<&str> {
        self.spec.policy.semver.as_ref().map(|s| s.range.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_flux_image_policy() {
        let policy: ImagePolicy = serde_json::from_value(json!({
            "apiVersion": "image.toolkit.fluxcd.io/v1beta2",
            "kind": "ImagePolicy",
            "metadata": { "name": "podinfo", "namespace": "flux-system" },
            "spec": {
                "imageRepositoryRef": { "name": "podinfo" },
                "policy": { "semver": { "range": ">=5.0.0" } }
            },
            "status": { "latestImage": "ghcr.io/stefanprodan/podinfo:5.2.1" }
        }))
        .unwrap();

        assert_eq!(
            policy.latest_image().as_deref(),
            Some("ghcr.io/stefanprodan/podinfo:5.2.1")
        );
        assert_eq!(policy.semver_range(), Some(">=5.0.0"));
    }

    #[test]
    fn test_latest_ref_fallback() {
        let policy: ImagePolicy = serde_json::from_value(json!({
            "apiVersion": "image.toolkit.fluxcd.io/v1beta2",
            "kind": "ImagePolicy",
            "metadata": { "name": "app", "namespace": "apps" },
            "spec": { "policy": { "alphabetical": { "order": "asc" } } },
            "status": {
                "latestRef": { "name": "ghcr.io/org/app", "tag": "1.2.0", "digest": "sha256:abcd" }
            }
        }))
        .unwrap();

        assert_eq!(
            policy.latest_image().as_deref(),
            Some("ghcr.io/org/app:1.2.0@sha256:abcd")
        );
        assert_eq!(policy.semver_range(), None);
    }

    #[test]
    fn test_policy_without_status() {
        let policy: ImagePolicy = serde_json::from_value(json!({
            "apiVersion": "image.toolkit.fluxcd.io/v1beta2",
            "kind": "ImagePolicy",
            "metadata": { "name": "new", "namespace": "apps" },
            "spec": {}
        }))
        .unwrap();

        assert_eq!(policy.latest_image(), None);
    }
}
