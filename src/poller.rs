use crate::cluster::{ClusterSource, FetchError};
use crate::correlator::{by_creation_then_name, correlate_by};
use crate::metrics::FreshnessMetrics;
use crate::reconciler::ReconcileSummary;
use anyhow::Context;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info};

/// Runs fetch, correlate and reconcile cycles against a [`ClusterSource`].
pub struct Poller<S> {
    source: S,
    metrics: Arc<FreshnessMetrics>,
    fetch_timeout: Duration,
    // Held for a whole cycle so ticks never overlap
    cycle: Mutex<()>,
}

impl<S: ClusterSource> Poller<S> {
    pub fn new(source: S, metrics: Arc<FreshnessMetrics>, fetch_timeout: Duration) -> Self {
        Self {
            source,
            metrics,
            fetch_timeout,
            cycle: Mutex::new(()),
        }
    }

    #[cfg(test)]
    pub(crate) fn source(&self) -> &S {
        &self.source
    }

    /// Runs one cycle. On a fetch error the gauge is left untouched.
    pub async fn run_cycle(&self) -> Result<ReconcileSummary, FetchError> {
        let _cycle = self.cycle.lock().await;

        let fetched = futures::try_join!(
            with_deadline("ImagePolicies", self.fetch_timeout, self.source.list_policies()),
            with_deadline("Pods", self.fetch_timeout, self.source.list_containers()),
        );
        let (policies, containers) = match fetched {
            Ok(fetched) => fetched,
            Err(e) => {
                self.metrics.record_failure();
                return Err(e);
            }
        };

        for policy in &policies {
            debug!(
                "ImagePolicy {}/{} latest image {} semver range {}",
                policy.namespace,
                policy.name,
                policy.latest_image().unwrap_or("<none>"),
                policy.version_range.as_deref().unwrap_or("<none>")
            );
        }

        let judgments = correlate_by(&policies, &containers, by_creation_then_name);
        for judgment in judgments.iter().filter(|j| j.is_stale) {
            info!(
                "Pod {}/{} container {} runs {} but ImagePolicy {}/{} recorded {}",
                judgment.key.namespace,
                judgment.key.pod,
                judgment.key.container,
                judgment.image,
                judgment.policy_namespace,
                judgment.policy_name,
                judgment.latest_image
            );
        }

        let summary = self.metrics.apply(&judgments);
        info!(
            "Checked {} containers against {} ImagePolicies: {} stale, {} up to date, {} removed",
            containers.len(),
            policies.len(),
            summary.stale,
            summary.fresh,
            summary.removed
        );
        Ok(summary)
    }

    /// Runs the first cycle before returning, then schedules the next cycles at a
    /// fixed rate on a background job.
    pub async fn start(self: Arc<Self>, interval: Duration) -> anyhow::Result<JobScheduler> {
        // The scheduler repeats jobs in whole seconds
        if interval < Duration::from_secs(1) || interval.subsec_nanos() != 0 {
            anyhow::bail!(
                "Polling interval {:?} must be a whole number of seconds",
                interval
            );
        }

        self.run_cycle()
            .await
            .context("Initial polling cycle failed")?;

        info!("Scheduling polling cycles every {:?}", interval);
        let scheduler = JobScheduler::new().await?;
        let poller = self.clone();
        let job = Job::new_repeated_async(interval, move |_uuid, _l| {
            let poller = poller.clone();
            Box::pin(async move {
                if let Err(e) = poller.run_cycle().await {
                    error!("Skipping polling cycle: {}", e);
                }
            })
        })?;
        scheduler.add(job).await?;
        scheduler.start().await?;

        Ok(scheduler)
    }
}

async fn with_deadline<T>(
    resource: &'static str,
    after: Duration,
    fetch: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, FetchError> {
    tokio::time::timeout(after, fetch)
        .await
        .map_err(|_| FetchError::Timeout { resource, after })?
}
