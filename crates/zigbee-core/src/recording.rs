//! In-memory stack double
//!
//! [`RecordingDevice`] hands out [`RecordingEndpoint`]s that log every call
//! instead of reaching a radio. Hosts use it for dry runs of configure
//! sequences; the test suites use it to assert the exact stack traffic a
//! converter produces. Failures can be injected per cluster and attribute,
//! command or bind.

use crate::cluster::{AttributeRef, ClusterRef};
use crate::device::ZigbeeDevice;
use crate::stack::{BindTarget, ReportingConfig, StackError, ZclDevice, ZclEndpoint, ZclOptions};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// A call issued against a recording endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum StackCall {
    Read {
        endpoint: u8,
        cluster: String,
        attributes: Vec<String>,
    },
    Write {
        endpoint: u8,
        cluster: String,
        attributes: Vec<(String, Value)>,
        options: ZclOptions,
    },
    Command {
        endpoint: u8,
        cluster: String,
        command: String,
        payload: Map<String, Value>,
        options: ZclOptions,
    },
    CommandResponse {
        endpoint: u8,
        cluster: String,
        command: String,
        payload: Map<String, Value>,
    },
    ReadResponse {
        endpoint: u8,
        cluster: String,
        attributes: Map<String, Value>,
    },
    Bind {
        endpoint: u8,
        cluster: String,
        target: BindTarget,
    },
    ConfigureReporting {
        endpoint: u8,
        cluster: String,
        items: Vec<ReportingConfig>,
    },
}

/// Which operation a failure rule applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Attribute,
    Command,
    Bind,
}

#[derive(Debug, Clone)]
struct FailureRule {
    operation: Operation,
    cluster: String,
    target: Option<String>,
    error: StackError,
    /// `None` fails forever
    remaining: Option<usize>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Endpoint double that records calls
pub struct RecordingEndpoint {
    id: u8,
    ieee_address: [u8; 8],
    calls: Arc<Mutex<Vec<StackCall>>>,
    failures: Arc<Mutex<Vec<FailureRule>>>,
    /// Attribute values served to reads, keyed by cluster then attribute key
    attributes: Mutex<HashMap<String, Map<String, Value>>>,
    latency: Option<Duration>,
}

impl RecordingEndpoint {
    /// Create a standalone endpoint with its own call log
    #[must_use]
    pub fn new(id: u8, ieee_address: [u8; 8]) -> Self {
        Self::with_shared_log(
            id,
            ieee_address,
            Arc::new(Mutex::new(Vec::new())),
            Arc::new(Mutex::new(Vec::new())),
        )
    }

    fn with_shared_log(
        id: u8,
        ieee_address: [u8; 8],
        calls: Arc<Mutex<Vec<StackCall>>>,
        failures: Arc<Mutex<Vec<FailureRule>>>,
    ) -> Self {
        Self {
            id,
            ieee_address,
            calls,
            failures,
            attributes: Mutex::new(HashMap::new()),
            latency: None,
        }
    }

    /// Delay every call by `latency` before it completes
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Serve `value` when `cluster.attribute` is read
    pub fn set_attribute(&self, cluster: &str, attribute: &str, value: Value) {
        lock(&self.attributes)
            .entry(cluster.to_string())
            .or_default()
            .insert(attribute.to_string(), value);
    }

    /// Recorded calls, oldest first
    #[must_use]
    pub fn calls(&self) -> Vec<StackCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }

    /// Fail reads, writes and reporting configuration touching `cluster.attribute`
    pub fn fail_attribute(&self, cluster: &str, attribute: &str, error: StackError) {
        self.push_rule(Operation::Attribute, cluster, Some(attribute), error, None);
    }

    /// Fail the next `times` calls touching `cluster.attribute`
    pub fn fail_attribute_times(
        &self,
        cluster: &str,
        attribute: &str,
        error: StackError,
        times: usize,
    ) {
        self.push_rule(Operation::Attribute, cluster, Some(attribute), error, Some(times));
    }

    /// Fail a cluster command
    pub fn fail_command(&self, cluster: &str, command: &str, error: StackError) {
        self.push_rule(Operation::Command, cluster, Some(command), error, None);
    }

    /// Fail binds of a cluster
    pub fn fail_bind(&self, cluster: &str, error: StackError) {
        self.push_rule(Operation::Bind, cluster, None, error, None);
    }

    fn push_rule(
        &self,
        operation: Operation,
        cluster: &str,
        target: Option<&str>,
        error: StackError,
        remaining: Option<usize>,
    ) {
        lock(&self.failures).push(FailureRule {
            operation,
            cluster: ClusterRef::from(cluster).key(),
            target: target.map(str::to_string),
            error,
            remaining,
        });
    }

    /// Find and consume a matching failure rule
    fn check_failure(
        &self,
        operation: Operation,
        cluster: &str,
        targets: &[String],
    ) -> Result<(), StackError> {
        let mut rules = lock(&self.failures);
        let position = rules.iter().position(|rule| {
            rule.operation == operation
                && rule.cluster == cluster
                && rule.remaining != Some(0)
                && rule
                    .target
                    .as_ref()
                    .map_or(true, |target| targets.contains(target))
        });
        let Some(index) = position else {
            return Ok(());
        };
        let rule = &mut rules[index];
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Err(rule.error.clone())
    }

    fn record(&self, call: StackCall) {
        lock(&self.calls).push(call);
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl ZclEndpoint for RecordingEndpoint {
    fn id(&self) -> u8 {
        self.id
    }

    fn device_ieee(&self) -> [u8; 8] {
        self.ieee_address
    }

    async fn read(
        &self,
        cluster: &ClusterRef,
        attributes: &[AttributeRef],
        _options: &ZclOptions,
    ) -> Result<Map<String, Value>, StackError> {
        let cluster_key = cluster.key();
        let keys: Vec<String> = attributes.iter().map(AttributeRef::key).collect();
        self.record(StackCall::Read {
            endpoint: self.id,
            cluster: cluster_key.clone(),
            attributes: keys.clone(),
        });
        self.simulate_latency().await;
        self.check_failure(Operation::Attribute, &cluster_key, &keys)?;

        let served = lock(&self.attributes);
        let values = served
            .get(&cluster_key)
            .map(|values| {
                keys.iter()
                    .filter_map(|key| values.get(key).map(|v| (key.clone(), v.clone())))
                    .collect()
            })
            .unwrap_or_default();
        Ok(values)
    }

    async fn write(
        &self,
        cluster: &ClusterRef,
        attributes: &[(AttributeRef, Value)],
        options: &ZclOptions,
    ) -> Result<(), StackError> {
        let cluster_key = cluster.key();
        let pairs: Vec<(String, Value)> = attributes
            .iter()
            .map(|(attr, value)| (attr.key(), value.clone()))
            .collect();
        self.record(StackCall::Write {
            endpoint: self.id,
            cluster: cluster_key.clone(),
            attributes: pairs.clone(),
            options: options.clone(),
        });
        self.simulate_latency().await;
        let keys: Vec<String> = pairs.iter().map(|(key, _)| key.clone()).collect();
        self.check_failure(Operation::Attribute, &cluster_key, &keys)?;

        let mut served = lock(&self.attributes);
        let values = served.entry(cluster_key).or_default();
        for (key, value) in pairs {
            values.insert(key, value);
        }
        Ok(())
    }

    async fn command(
        &self,
        cluster: &ClusterRef,
        command: &str,
        payload: &Map<String, Value>,
        options: &ZclOptions,
    ) -> Result<Option<Map<String, Value>>, StackError> {
        let cluster_key = cluster.key();
        self.record(StackCall::Command {
            endpoint: self.id,
            cluster: cluster_key.clone(),
            command: command.to_string(),
            payload: payload.clone(),
            options: options.clone(),
        });
        self.simulate_latency().await;
        self.check_failure(Operation::Command, &cluster_key, &[command.to_string()])?;
        Ok(None)
    }

    async fn command_response(
        &self,
        cluster: &ClusterRef,
        command: &str,
        payload: &Map<String, Value>,
        _options: &ZclOptions,
        _transaction_sequence_number: Option<u8>,
    ) -> Result<(), StackError> {
        let cluster_key = cluster.key();
        self.record(StackCall::CommandResponse {
            endpoint: self.id,
            cluster: cluster_key.clone(),
            command: command.to_string(),
            payload: payload.clone(),
        });
        self.simulate_latency().await;
        self.check_failure(Operation::Command, &cluster_key, &[command.to_string()])
    }

    async fn read_response(
        &self,
        cluster: &ClusterRef,
        attributes: &Map<String, Value>,
        _options: &ZclOptions,
        _transaction_sequence_number: Option<u8>,
    ) -> Result<(), StackError> {
        let cluster_key = cluster.key();
        self.record(StackCall::ReadResponse {
            endpoint: self.id,
            cluster: cluster_key.clone(),
            attributes: attributes.clone(),
        });
        self.simulate_latency().await;
        let keys: Vec<String> = attributes.keys().cloned().collect();
        self.check_failure(Operation::Attribute, &cluster_key, &keys)
    }

    async fn bind(&self, cluster: &ClusterRef, target: &BindTarget) -> Result<(), StackError> {
        let cluster_key = cluster.key();
        self.record(StackCall::Bind {
            endpoint: self.id,
            cluster: cluster_key.clone(),
            target: target.clone(),
        });
        self.simulate_latency().await;
        self.check_failure(Operation::Bind, &cluster_key, &[])
    }

    async fn configure_reporting(
        &self,
        cluster: &ClusterRef,
        items: &[ReportingConfig],
        _options: &ZclOptions,
    ) -> Result<(), StackError> {
        let cluster_key = cluster.key();
        self.record(StackCall::ConfigureReporting {
            endpoint: self.id,
            cluster: cluster_key.clone(),
            items: items.to_vec(),
        });
        self.simulate_latency().await;
        let keys: Vec<String> = items.iter().map(|item| item.attribute.key()).collect();
        self.check_failure(Operation::Attribute, &cluster_key, &keys)
    }
}

/// Device double whose endpoints share one call log
pub struct RecordingDevice {
    info: ZigbeeDevice,
    endpoints: Vec<Arc<RecordingEndpoint>>,
    calls: Arc<Mutex<Vec<StackCall>>>,
}

impl RecordingDevice {
    /// Create one recording endpoint per descriptor endpoint
    #[must_use]
    pub fn new(info: ZigbeeDevice) -> Self {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let failures = Arc::new(Mutex::new(Vec::new()));
        let endpoints = info
            .endpoints
            .iter()
            .map(|ep| {
                Arc::new(RecordingEndpoint::with_shared_log(
                    ep.id,
                    info.ieee_address,
                    Arc::clone(&calls),
                    Arc::clone(&failures),
                ))
            })
            .collect();
        Self {
            info,
            endpoints,
            calls,
        }
    }

    /// Concrete endpoint handle, for seeding attributes and injecting failures
    #[must_use]
    pub fn recording_endpoint(&self, id: u8) -> Option<Arc<RecordingEndpoint>> {
        self.endpoints.iter().find(|ep| ep.id == id).cloned()
    }

    /// Calls issued on any endpoint, oldest first
    #[must_use]
    pub fn calls(&self) -> Vec<StackCall> {
        lock(&self.calls).clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.calls).clear();
    }
}

impl ZclDevice for RecordingDevice {
    fn info(&self) -> &ZigbeeDevice {
        &self.info
    }

    fn endpoint(&self, id: u8) -> Option<Arc<dyn ZclEndpoint>> {
        self.recording_endpoint(id)
            .map(|ep| ep as Arc<dyn ZclEndpoint>)
    }
}
