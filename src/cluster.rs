use crate::config::NamespaceFilter;
use crate::image_policy::ImagePolicy;
use crate::state::{ContainerObservation, PolicyRecord};
use anyhow::Context;
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::ListParams;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to list {resource}: {source}")]
    List {
        resource: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("listing {resource} timed out after {after:?}")]
    Timeout {
        resource: &'static str,
        after: Duration,
    },
}

/// Full-snapshot reads of the cluster state correlated every cycle.
pub trait ClusterSource: Send + Sync + 'static {
    fn list_policies(&self) -> impl Future<Output = Result<Vec<PolicyRecord>, FetchError>> + Send;

    fn list_containers(
        &self,
    ) -> impl Future<Output = Result<Vec<ContainerObservation>, FetchError>> + Send;
}

pub async fn create_client(kubeconfig: Option<&Path>) -> anyhow::Result<Client> {
    info!("Initializing K8s client");
    let config = match Config::incluster() {
        Ok(config) => config,
        Err(e) => {
            debug!("In-cluster configuration unavailable: {}", e);
            match kubeconfig {
                Some(path) => {
                    info!("Loading kubeconfig from {}", path.display());
                    let kubeconfig = Kubeconfig::read_from(path).with_context(|| {
                        format!("Failed to read kubeconfig {}", path.display())
                    })?;
                    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                        .await
                        .context("Failed to load kubeconfig")?
                }
                None => Config::infer()
                    .await
                    .context("Failed to infer Kubernetes configuration")?,
            }
        }
    };

    let client = Client::try_from(config).context("Failed to create Kubernetes client")?;
    let api_server_info = client
        .apiserver_version()
        .await
        .context("Failed to connect to the Kubernetes API server")?;
    info!(
        "Connected to Kubernetes API server with version {}.{}",
        api_server_info.major, api_server_info.minor
    );
    Ok(client)
}

pub struct KubeClusterSource {
    client: Client,
    namespaces: NamespaceFilter,
}

impl KubeClusterSource {
    pub fn new(client: Client, namespaces: NamespaceFilter) -> Self {
        Self { client, namespaces }
    }
}

impl ClusterSource for KubeClusterSource {
    async fn list_policies(&self) -> Result<Vec<PolicyRecord>, FetchError> {
        let policies: Api<ImagePolicy> = Api::all(self.client.clone());
        let list = policies
            .list(&ListParams::default())
            .await
            .map_err(|e| FetchError::List {
                resource: "ImagePolicies",
                source: Box::new(e),
            })?;

        info!("Found {} ImagePolicies", list.items.len());
        Ok(list.items.iter().map(policy_record).collect())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerObservation>, FetchError> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let list = pods
            .list(&ListParams::default())
            .await
            .map_err(|e| FetchError::List {
                resource: "Pods",
                source: Box::new(e),
            })?;

        debug!("Found {} pods", list.items.len());
        Ok(list
            .items
            .iter()
            .filter(|pod| {
                let namespace = pod.metadata.namespace.as_deref().unwrap_or_default();
                self.namespaces.allows(namespace)
            })
            .flat_map(container_observations)
            .collect())
    }
}

fn policy_record(policy: &ImagePolicy) -> PolicyRecord {
    PolicyRecord {
        namespace: policy.metadata.namespace.clone().unwrap_or_default(),
        name: policy.metadata.name.clone().unwrap_or_default(),
        latest_image: policy.latest_image(),
        version_range: policy.semver_range().map(str::to_string),
        created_at: creation_timestamp(&policy.metadata),
    }
}

fn container_observations(pod: &Pod) -> Vec<ContainerObservation> {
    let namespace = pod.metadata.namespace.clone().unwrap_or_default();
    let pod_name = pod.metadata.name.clone().unwrap_or_default();

    pod.spec
        .iter()
        .flat_map(|spec| spec.containers.iter())
        .filter_map(|container| {
            let image = container.image.clone()?;
            Some(ContainerObservation {
                namespace: namespace.clone(),
                pod: pod_name.clone(),
                container: container.name.clone(),
                image,
            })
        })
        .collect()
}

fn creation_timestamp(metadata: &ObjectMeta) -> Option<DateTime<Utc>> {
    let value = serde_json::to_value(metadata.creation_timestamp.as_ref()?).ok()?;
    DateTime::parse_from_rfc3339(value.as_str()?)
        .ok()
        .map(|timestamp| timestamp.with_timezone(&Utc))
}
