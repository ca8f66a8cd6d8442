//! Per-device conversion session
//!
//! A session binds one physical device to its definition. It owns the
//! published state and the correlation store, serializes inbound messages,
//! and routes set/get requests to outbound converters.

use crate::configure::{run_configure, ConfigureContext, ConfigureReport, RetryPolicy};
use crate::definition::Definition;
use crate::error::ConvertError;
use crate::fz::FzMeta;
use crate::state::{PartialMerge, State};
use crate::store::DeviceStore;
use crate::tz::{ToZigbee, TzMeta};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use zigbee_core::{BindTarget, ZclDevice, ZclEndpoint, ZclMessage, ZigbeeDevice};

/// Events published by a session
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// New state was published
    StateChanged {
        device_ieee: String,
        /// Keys changed by this update
        changed: State,
        /// Full state after the update
        state: State,
    },
    /// A configure run finished
    Configured {
        device_ieee: String,
        report: ConfigureReport,
    },
}

struct SessionInner {
    state: State,
    store: DeviceStore,
    options: State,
}

/// One outbound request resolved to a converter and endpoint
struct Route {
    key: String,
    value: Value,
    endpoint_name: Option<String>,
    converter: Arc<dyn ToZigbee>,
    endpoint: Arc<dyn ZclEndpoint>,
}

pub struct DeviceSession {
    definition: Arc<Definition>,
    device: Arc<dyn ZclDevice>,
    info: ZigbeeDevice,
    endpoint_names: BTreeMap<String, u8>,
    inner: Mutex<SessionInner>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl DeviceSession {
    #[must_use]
    pub fn new(definition: Arc<Definition>, device: Arc<dyn ZclDevice>, store_capacity: usize) -> Self {
        let info = device.info().clone();
        let endpoint_names = definition.endpoint_names(&info);
        let (event_tx, _) = broadcast::channel(64);
        Self {
            definition,
            device,
            info,
            endpoint_names,
            inner: Mutex::new(SessionInner {
                state: State::new(),
                store: DeviceStore::new(store_capacity),
                options: State::new(),
            }),
            event_tx,
        }
    }

    #[must_use]
    pub fn definition(&self) -> &Arc<Definition> {
        &self.definition
    }

    #[must_use]
    pub fn device(&self) -> &ZigbeeDevice {
        &self.info
    }

    #[must_use]
    pub fn endpoint_names(&self) -> &BTreeMap<String, u8> {
        &self.endpoint_names
    }

    /// Replace the user options (calibration, precision, ...)
    pub async fn set_options(&self, options: State) {
        self.inner.lock().await.options = options;
    }

    /// Current published state
    pub async fn state(&self) -> State {
        self.inner.lock().await.state.clone()
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Decode an inbound message and publish the merged result.
    ///
    /// Messages are handled one at a time in arrival order. Deferred replies
    /// queued by converters are spawned once decoding is done.
    pub async fn handle_message(&self, msg: &ZclMessage) -> State {
        let mut guard = self.inner.lock().await;
        let SessionInner {
            state,
            store,
            options,
        } = &mut *guard;

        let mut merge = PartialMerge::new(self.definition.merge_policy);
        let deferred = {
            let mut meta = FzMeta::new(
                &self.definition,
                &self.info,
                store,
                state,
                options,
                &self.endpoint_names,
            );
            if let Some(endpoint) = self.device.endpoint(msg.endpoint) {
                meta = meta.with_endpoint(endpoint);
            }
            for converter in self.definition.from_zigbee.matching(msg) {
                if let Some(partial) = converter.convert(msg, &mut meta) {
                    merge.add(converter.name(), partial);
                }
            }
            meta.take_deferred()
        };

        for reply in deferred {
            tracing::debug!("Spawning {} for {}", reply.description(), self.info.display_name());
            reply.spawn();
        }

        let mut changed = merge.finish();
        if changed.is_empty() {
            tracing::debug!(
                "No converter produced state for {} {} from {}",
                msg.cluster,
                msg.message_type,
                self.info.display_name()
            );
            return changed;
        }
        if let Some(linkquality) = msg.linkquality {
            changed.insert("linkquality".to_string(), Value::from(linkquality));
        }
        for (key, value) in &changed {
            state.insert(key.clone(), value.clone());
        }
        let snapshot = state.clone();
        drop(guard);

        self.publish(changed.clone(), snapshot);
        changed
    }

    fn publish(&self, changed: State, state: State) {
        // No receivers is fine
        let _ = self.event_tx.send(SessionEvent::StateChanged {
            device_ieee: self.info.ieee_address_string(),
            changed,
            state,
        });
    }

    /// Split `state_left` into `state` and `left` when `left` is an endpoint name
    fn resolve_key(&self, key: &str) -> (String, Option<String>) {
        for name in self.endpoint_names.keys() {
            if let Some(base) = key.strip_suffix(&format!("_{name}")) {
                if !base.is_empty() && self.definition.find_to_zigbee(base, Some(name)).is_some() {
                    return (base.to_string(), Some(name.clone()));
                }
            }
        }
        (key.to_string(), None)
    }

    /// Endpoint a request for `key` is sent to
    fn target_endpoint(
        &self,
        key: &str,
        endpoint_name: Option<&str>,
    ) -> Result<Arc<dyn ZclEndpoint>, ConvertError> {
        let id = match (self.definition.meta.enforced_endpoint(key), endpoint_name) {
            (Some(id), _) => id,
            (None, Some(name)) => *self
                .endpoint_names
                .get(name)
                .ok_or_else(|| ConvertError::UnknownEndpoint(name.to_string()))?,
            (None, None) => self
                .info
                .endpoints
                .first()
                .map(|ep| ep.id)
                .ok_or_else(|| ConvertError::UnknownEndpoint("default".to_string()))?,
        };
        self.device
            .endpoint(id)
            .ok_or_else(|| ConvertError::UnknownEndpoint(id.to_string()))
    }

    /// Resolve every key before touching the network
    fn routes(&self, request: &State) -> Result<Vec<Route>, ConvertError> {
        let mut resolved: Vec<(&String, &Value, String, Option<String>)> = request
            .iter()
            .map(|(raw_key, value)| {
                let (key, endpoint_name) = self.resolve_key(raw_key);
                (raw_key, value, key, endpoint_name)
            })
            .collect();
        // `state` goes first so qualifiers like on_time ride along with it
        resolved.sort_by_key(|(_, _, key, _)| key != "state");

        let mut routes: Vec<Route> = Vec::new();
        for (raw_key, value, key, endpoint_name) in resolved {
            let converter = self
                .definition
                .find_to_zigbee(&key, endpoint_name.as_deref())
                .ok_or_else(|| ConvertError::UnhandledKey(raw_key.clone()))?;
            let endpoint = self.target_endpoint(&key, endpoint_name.as_deref())?;

            // A converter owning several keys sees the whole request once
            let used = routes.iter().any(|r| {
                Arc::ptr_eq(&r.converter, converter) && r.endpoint.id() == endpoint.id()
            });
            if used {
                continue;
            }
            routes.push(Route {
                key,
                value: value.clone(),
                endpoint_name,
                converter: Arc::clone(converter),
                endpoint,
            });
        }
        Ok(routes)
    }

    /// Apply a set request.
    ///
    /// Keys may carry an endpoint suffix (`state_left`). Every key is validated
    /// before the first stack call, so a rejected value leaves the device
    /// untouched. A stack failure midway still publishes the keys confirmed
    /// before it, then returns the error.
    pub async fn set(&self, request: &State) -> Result<State, ConvertError> {
        let routes = self.routes(request)?;
        let (current, options) = {
            let inner = self.inner.lock().await;
            (inner.state.clone(), inner.options.clone())
        };
        for route in &routes {
            route
                .converter
                .validate_set(&route.key, &route.value, &self.tz_meta(request, &current, &options, route))
                .map_err(|e| {
                    tracing::warn!("Rejected {} for {}: {}", route.key, self.info.display_name(), e);
                    e
                })?;
        }

        let mut confirmed = State::new();
        let mut failure = None;
        for route in &routes {
            tracing::debug!(
                "Setting {} on {} via {}",
                route.key,
                self.info.display_name(),
                route.converter.name()
            );
            match route
                .converter
                .convert_set(
                    route.endpoint.as_ref(),
                    &route.key,
                    &route.value,
                    &self.tz_meta(request, &current, &options, route),
                )
                .await
            {
                Ok(Some(result)) => {
                    for (key, value) in result.state {
                        confirmed.insert(self.postfix(&key, route.endpoint_name.as_deref()), value);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Set {} on {} failed: {}", route.key, self.info.display_name(), e);
                    failure = Some(e);
                    break;
                }
            }
        }

        if !confirmed.is_empty() {
            let snapshot = {
                let mut inner = self.inner.lock().await;
                for (key, value) in &confirmed {
                    inner.state.insert(key.clone(), value.clone());
                }
                inner.state.clone()
            };
            self.publish(confirmed.clone(), snapshot);
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(confirmed),
        }
    }

    fn tz_meta<'a>(
        &'a self,
        message: &'a State,
        state: &'a State,
        options: &'a State,
        route: &'a Route,
    ) -> TzMeta<'a> {
        TzMeta {
            message,
            definition: &self.definition,
            device: self.device.as_ref(),
            state,
            options,
            endpoint_name: route.endpoint_name.as_deref(),
        }
    }

    fn postfix(&self, key: &str, endpoint_name: Option<&str>) -> String {
        match endpoint_name {
            Some(name) if !self.definition.meta.skips_multi_endpoint(key) => format!("{key}_{name}"),
            _ => key.to_string(),
        }
    }

    /// Issue reads refreshing `keys`; values arrive as inbound messages
    pub async fn get(&self, keys: &[&str]) -> Result<(), ConvertError> {
        let request: State = keys
            .iter()
            .map(|key| ((*key).to_string(), Value::String(String::new())))
            .collect();
        let routes = self.routes(&request)?;
        let (current, options) = {
            let inner = self.inner.lock().await;
            (inner.state.clone(), inner.options.clone())
        };
        for route in &routes {
            let meta = TzMeta {
                message: &request,
                definition: &self.definition,
                device: self.device.as_ref(),
                state: &current,
                options: &options,
                endpoint_name: route.endpoint_name.as_deref(),
            };
            route
                .converter
                .convert_get(route.endpoint.as_ref(), &route.key, &meta)
                .await?;
        }
        Ok(())
    }

    /// Run the definition's configure steps against the device
    pub async fn configure(&self, coordinator: BindTarget, policy: &RetryPolicy) -> ConfigureReport {
        let ctx = ConfigureContext::new(Arc::clone(&self.device), coordinator)
            .with_endpoint_names(self.endpoint_names.clone());
        let report = run_configure(&self.definition.configure, Arc::new(ctx), policy).await;
        if report.is_success() {
            tracing::info!("Configured {}", self.info.display_name());
        } else {
            tracing::warn!(
                "Configure of {} finished with {} failed steps",
                self.info.display_name(),
                report.failed().len()
            );
        }
        let _ = self.event_tx.send(SessionEvent::Configured {
            device_ieee: self.info.ieee_address_string(),
            report: report.clone(),
        });
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::DefinitionBuilder;
    use crate::extend::{
        child_lock, device_endpoints, electricity_meter, on_off, temperature, time_sync,
        DeviceEndpointsArgs, ElectricityMeterArgs, MeasurementArgs, OnOffArgs,
    };
    use serde_json::json;
    use zigbee_core::recording::{RecordingDevice, StackCall};
    use zigbee_core::{Endpoint, MessageType, StackError};

    fn thermostat() -> (Arc<RecordingDevice>, DeviceSession) {
        let definition = DefinitionBuilder::new("TRV", "Acme", "Radiator valve")
            .zigbee_model("TRV")
            .extend(temperature(MeasurementArgs::default()))
            .extend(child_lock())
            .extend(time_sync())
            .build()
            .unwrap();
        let info = ZigbeeDevice::new([0x51; 8], 0x51)
            .with_model("TRV")
            .with_endpoint(Endpoint::new(1, &[0x0000, 0x000a, 0x0201, 0x0204, 0x0402], &[]));
        let device = Arc::new(RecordingDevice::new(info));
        let session = DeviceSession::new(
            Arc::new(definition),
            Arc::clone(&device) as Arc<dyn ZclDevice>,
            16,
        );
        (device, session)
    }

    fn two_gang() -> (Arc<RecordingDevice>, DeviceSession) {
        let definition = DefinitionBuilder::new("SW2", "Acme", "Two gang switch")
            .zigbee_model("SW2")
            .extend(device_endpoints(DeviceEndpointsArgs::new(&[("left", 1), ("right", 2)])))
            .extend(on_off(OnOffArgs::default().with_endpoints(&["left", "right"])))
            .build()
            .unwrap();
        let info = ZigbeeDevice::new([0x52; 8], 0x52)
            .with_model("SW2")
            .with_endpoint(Endpoint::new(1, &[0x0006], &[]))
            .with_endpoint(Endpoint::new(2, &[0x0006], &[]));
        let device = Arc::new(RecordingDevice::new(info));
        let session = DeviceSession::new(
            Arc::new(definition),
            Arc::clone(&device) as Arc<dyn ZclDevice>,
            16,
        );
        (device, session)
    }

    fn plug() -> (Arc<RecordingDevice>, DeviceSession) {
        let definition = DefinitionBuilder::new("PLUG-M", "Acme", "Metering plug")
            .zigbee_model("PLUG-M")
            .extend(on_off(OnOffArgs::default()))
            .extend(electricity_meter(ElectricityMeterArgs::default()))
            .build()
            .unwrap();
        let info = ZigbeeDevice::new([0x53; 8], 0x53)
            .with_model("PLUG-M")
            .with_endpoint(Endpoint::new(1, &[0x0006, 0x0702, 0x0b04], &[]));
        let device = Arc::new(RecordingDevice::new(info));
        let session = DeviceSession::new(
            Arc::new(definition),
            Arc::clone(&device) as Arc<dyn ZclDevice>,
            16,
        );
        (device, session)
    }

    fn request(value: serde_json::Value) -> State {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_child_lock_writes_once() {
        let (device, session) = thermostat();
        let confirmed = session.set(&request(json!({"child_lock": "LOCK"}))).await.unwrap();
        assert_eq!(confirmed, request(json!({"child_lock": "LOCK"})));

        let calls = device.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            StackCall::Write { cluster, attributes, .. } => {
                assert_eq!(cluster, "hvacUserInterfaceCfg");
                assert_eq!(attributes, &vec![("keypadLockout".to_string(), json!(1))]);
            }
            other => panic!("unexpected call {other:?}"),
        }
        assert_eq!(session.state().await.get("child_lock"), Some(&json!("LOCK")));
    }

    #[tokio::test]
    async fn test_set_is_idempotent() {
        let (device, session) = thermostat();
        let first = session.set(&request(json!({"child_lock": "UNLOCK"}))).await.unwrap();
        let second = session.set(&request(json!({"child_lock": "UNLOCK"}))).await.unwrap();
        assert_eq!(first, second);
        let calls = device.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn test_rejected_set_leaves_state_unchanged() {
        let (device, session) = thermostat();
        let err = session
            .set(&request(json!({"child_lock": "LOCK", "colour": "red"})))
            .await
            .unwrap_err();
        assert_eq!(err, ConvertError::UnhandledKey("colour".to_string()));
        assert!(device.calls().is_empty());
        assert!(session.state().await.is_empty());

        let err = session.set(&request(json!({"temperature": 20}))).await.unwrap_err();
        assert_eq!(err, ConvertError::ReadOnly("temperature".to_string()));
    }

    #[tokio::test]
    async fn test_invalid_key_rejects_whole_request_before_writing() {
        let (device, session) = thermostat();
        let err = session
            .set(&request(json!({"child_lock": "LOCK", "temperature": 20})))
            .await
            .unwrap_err();
        assert_eq!(err, ConvertError::ReadOnly("temperature".to_string()));
        assert!(device.calls().is_empty());
        assert!(session.state().await.is_empty());
    }

    #[tokio::test]
    async fn test_toggle_is_rejected_without_commands() {
        let (device, session) = two_gang();
        let err = session
            .set(&request(json!({"state_left": "ON", "state_right": "TOGGLE"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ConvertError::InvalidValue { ref key, .. } if key == "state"));
        assert!(device.calls().is_empty());
        assert!(session.state().await.is_empty());
    }

    #[tokio::test]
    async fn test_stack_failure_publishes_confirmed_keys() {
        let (device, session) = two_gang();
        device
            .recording_endpoint(2)
            .unwrap()
            .fail_command("genOnOff", "off", StackError::Timeout(500));
        let mut events = session.subscribe();

        let err = session
            .set(&request(json!({"state_left": "ON", "state_right": "OFF"})))
            .await
            .unwrap_err();
        assert_eq!(err, ConvertError::Stack(StackError::Timeout(500)));
        assert_eq!(session.state().await, request(json!({"state_left": "ON"})));
        match events.recv().await.unwrap() {
            SessionEvent::StateChanged { changed, .. } => {
                assert_eq!(changed, request(json!({"state_left": "ON"})));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handle_message_publishes_state() {
        let (_device, session) = thermostat();
        let mut events = session.subscribe();
        let msg = ZclMessage::attribute_report("msTemperatureMeasurement", 1, json!({"measuredValue": 2150}))
            .with_linkquality(120);
        let changed = session.handle_message(&msg).await;
        assert_eq!(changed, request(json!({"temperature": 21.5, "linkquality": 120})));

        match events.recv().await.unwrap() {
            SessionEvent::StateChanged { state, .. } => {
                assert_eq!(state.get("temperature"), Some(&json!(21.5)));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_meter_factors_scale_later_reports() {
        let (_device, session) = plug();
        let report = ZclMessage::attribute_report("haElectricalMeasurement", 1, json!({"activePower": 1234}));
        assert_eq!(session.handle_message(&report).await, request(json!({"power": 1234})));

        let factors = ZclMessage::new("haElectricalMeasurement", MessageType::ReadResponse, 1)
            .with_data(json!({"acPowerMultiplier": 1, "acPowerDivisor": 10}));
        assert!(session.handle_message(&factors).await.is_empty());

        assert_eq!(session.handle_message(&report).await, request(json!({"power": 123.4})));

        let energy = ZclMessage::new("seMetering", MessageType::ReadResponse, 1)
            .with_data(json!({"multiplier": 1, "divisor": 1000}));
        session.handle_message(&energy).await;
        let summation = ZclMessage::attribute_report("seMetering", 1, json!({"currentSummDelivered": 52_500}));
        assert_eq!(session.handle_message(&summation).await, request(json!({"energy": 52.5})));
        assert_eq!(session.state().await.get("power"), Some(&json!(123.4)));
    }

    #[tokio::test]
    async fn test_deferred_reply_is_spawned() {
        let (device, session) = thermostat();
        let msg = ZclMessage::new("genTime", MessageType::Read, 1).with_transaction_sequence_number(4);
        assert!(session.handle_message(&msg).await.is_empty());
        for _ in 0..10 {
            if !device.calls().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(matches!(&device.calls()[0], StackCall::ReadResponse { cluster, .. } if cluster == "genTime"));
    }

    #[tokio::test]
    async fn test_endpoint_suffix_routes_to_endpoint() {
        let (device, session) = two_gang();
        let confirmed = session.set(&request(json!({"state_right": "ON"}))).await.unwrap();
        assert_eq!(confirmed, request(json!({"state_right": "ON"})));
        match &device.calls()[0] {
            StackCall::Command { endpoint, cluster, command, .. } => {
                assert_eq!(*endpoint, 2);
                assert_eq!(cluster, "genOnOff");
                assert_eq!(command, "on");
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_get_reads_attribute() {
        let (device, session) = thermostat();
        session.get(&["temperature"]).await.unwrap();
        assert!(matches!(
            &device.calls()[0],
            StackCall::Read { cluster, attributes, .. }
                if cluster == "msTemperatureMeasurement" && attributes == &vec!["measuredValue".to_string()]
        ));
        assert_eq!(
            session.get(&["nope"]).await,
            Err(ConvertError::UnhandledKey("nope".to_string()))
        );
    }

    #[tokio::test]
    async fn test_configure_emits_report() {
        let (_device, session) = thermostat();
        let mut events = session.subscribe();
        let report = session
            .configure(
                BindTarget::Endpoint {
                    ieee_address: [0; 8],
                    endpoint: 1,
                },
                &RetryPolicy::default(),
            )
            .await;
        assert!(report.is_success());
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::Configured { .. }));
    }
}
