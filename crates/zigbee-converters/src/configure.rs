//! Configure steps run when a device joins or re-announces
//!
//! Steps are idempotent async closures over a [`ConfigureContext`]. The
//! runner never lets one step abort the sequence: unsupported attributes or
//! clusters are skipped with a warning, transient transport failures are
//! retried with linear backoff, anything else is recorded and the next step
//! runs.

use crate::error::ConvertError;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use zigbee_core::{BindTarget, StackError, ZclDevice, ZclEndpoint};

/// Everything a configure step may touch
pub struct ConfigureContext {
    pub device: Arc<dyn ZclDevice>,
    /// Bind target for reports (the coordinator endpoint)
    pub coordinator: BindTarget,
    /// Resolved endpoint name map of the definition
    pub endpoint_names: BTreeMap<String, u8>,
}

impl ConfigureContext {
    #[must_use]
    pub fn new(device: Arc<dyn ZclDevice>, coordinator: BindTarget) -> Self {
        Self {
            device,
            coordinator,
            endpoint_names: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_endpoint_names(mut self, endpoint_names: BTreeMap<String, u8>) -> Self {
        self.endpoint_names = endpoint_names;
        self
    }

    pub fn endpoint(&self, id: u8) -> Result<Arc<dyn ZclEndpoint>, ConvertError> {
        self.device
            .endpoint(id)
            .ok_or_else(|| ConvertError::UnknownEndpoint(id.to_string()))
    }

    pub fn named_endpoint(&self, name: &str) -> Result<Arc<dyn ZclEndpoint>, ConvertError> {
        let id = self
            .endpoint_names
            .get(name)
            .ok_or_else(|| ConvertError::UnknownEndpoint(name.to_string()))?;
        self.endpoint(*id)
    }

    /// Endpoints serving `cluster_id`, falling back to the first endpoint
    #[must_use]
    pub fn endpoints_with(&self, cluster_id: u16) -> Vec<Arc<dyn ZclEndpoint>> {
        let info = self.device.info();
        let matching: Vec<_> = info
            .endpoints
            .iter()
            .filter(|ep| ep.has_input_cluster(cluster_id))
            .filter_map(|ep| self.device.endpoint(ep.id))
            .collect();
        if !matching.is_empty() {
            return matching;
        }
        info.endpoints
            .first()
            .and_then(|ep| self.device.endpoint(ep.id))
            .into_iter()
            .collect()
    }
}

type StepFn =
    dyn Fn(Arc<ConfigureContext>) -> BoxFuture<'static, Result<(), ConvertError>> + Send + Sync;

/// One named configure step
#[derive(Clone)]
pub struct ConfigureStep {
    name: String,
    run: Arc<StepFn>,
}

impl std::fmt::Debug for ConfigureStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigureStep").field("name", &self.name).finish()
    }
}

impl ConfigureStep {
    pub fn new<F>(name: &str, run: F) -> Self
    where
        F: Fn(Arc<ConfigureContext>) -> BoxFuture<'static, Result<(), ConvertError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            name: name.to_string(),
            run: Arc::new(run),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run(&self, ctx: Arc<ConfigureContext>) -> Result<(), ConvertError> {
        (self.run)(ctx).await
    }
}

/// Swallow an unsupported attribute/cluster failure of an optional sub-call
pub fn optional(result: Result<(), StackError>, what: &str) -> Result<(), StackError> {
    match result {
        Err(e) if e.is_unsupported() => {
            tracing::warn!("Skipping {}: {}", what, e);
            Ok(())
        }
        other => other,
    }
}

/// Retry behaviour for transient failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Attempts per step, including the first
    pub max_attempts: u32,
    /// Delay before retry `n` is `backoff * n`
    #[serde(with = "millis")]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "reason", rename_all = "snake_case")]
pub enum StepOutcome {
    Done,
    /// The device does not support what the step configures
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub outcome: StepOutcome,
    pub attempts: u32,
}

/// Outcome of a configure run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigureReport {
    pub steps: Vec<StepReport>,
}

impl ConfigureReport {
    /// No step failed (skipped steps are fine)
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.steps
            .iter()
            .all(|s| !matches!(s.outcome, StepOutcome::Failed(_)))
    }

    #[must_use]
    pub fn failed(&self) -> Vec<&StepReport> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, StepOutcome::Failed(_)))
            .collect()
    }
}

/// Run every step in order
pub async fn run_configure(
    steps: &[ConfigureStep],
    ctx: Arc<ConfigureContext>,
    policy: &RetryPolicy,
) -> ConfigureReport {
    let device = ctx.device.info().display_name();
    let mut report = ConfigureReport::default();

    for step in steps {
        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            match step.run(Arc::clone(&ctx)).await {
                Ok(()) => break StepOutcome::Done,
                Err(ConvertError::Stack(e)) if e.is_unsupported() => {
                    tracing::warn!("Configure step {} unsupported by {}: {}", step.name(), device, e);
                    break StepOutcome::Skipped(e.to_string());
                }
                Err(ConvertError::Stack(e)) if e.is_transient() && attempts < policy.max_attempts => {
                    tracing::warn!(
                        "Configure step {} of {} failed (attempt {}/{}): {}",
                        step.name(),
                        device,
                        attempts,
                        policy.max_attempts,
                        e
                    );
                    tokio::time::sleep(policy.backoff * attempts).await;
                }
                Err(e) => {
                    tracing::error!("Configure step {} of {} failed: {}", step.name(), device, e);
                    break StepOutcome::Failed(e.to_string());
                }
            }
        };
        report.steps.push(StepReport {
            name: step.name().to_string(),
            outcome,
            attempts,
        });
    }

    tracing::info!(
        "Configured {}: {} steps, {} failed",
        device,
        report.steps.len(),
        report.failed().len()
    );
    report
}
