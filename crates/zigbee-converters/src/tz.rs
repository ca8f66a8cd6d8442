//! Outbound (toZigbee) converters
//!
//! An outbound converter owns a fixed set of state keys. `convert_set` turns a
//! requested value into a bounded sequence of stack calls and returns the
//! state it can confirm from the request; `convert_get` turns a key into the
//! reads that refresh it. Keys outside the declared set are rejected with
//! [`ConvertError::UnhandledKey`], values outside the domain are rejected
//! before anything reaches the stack. [`ToZigbee::validate_set`] runs the
//! same checks without touching the stack, so a session can reject a whole
//! request up front.

use crate::codec::ValueCodec;
use crate::definition::Definition;
use crate::error::ConvertError;
use crate::exposes::{Access, Expose};
use crate::state::State;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use zigbee_core::{AttributeRef, ClusterRef, ZclDevice, ZclEndpoint, ZclOptions};

/// How a converter's keys combine with other converters claiming the same key
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPrecedence {
    /// The key belongs to this converter alone
    #[default]
    Exclusive,
    /// Shared with other cooperative converters; they are routed by endpoint
    Cooperative,
    /// Replaces converters registered earlier for the same key
    Override,
}

/// Confirmed result of a set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetResult {
    pub state: State,
}

impl SetResult {
    /// Result confirming a single key
    #[must_use]
    pub fn single(key: &str, value: Value) -> Self {
        let mut state = State::new();
        state.insert(key.to_string(), value);
        Self { state }
    }
}

/// Context handed to outbound converters
pub struct TzMeta<'a> {
    /// Full request, so converters can combine sibling keys
    pub message: &'a State,
    pub definition: &'a Definition,
    pub device: &'a dyn ZclDevice,
    /// Currently published state
    pub state: &'a State,
    /// User options for this device
    pub options: &'a State,
    /// Endpoint name the request was addressed to, if any
    pub endpoint_name: Option<&'a str>,
}

impl TzMeta<'_> {
    /// ZCL options for calls on `entity`, carrying the definition's manufacturer code
    #[must_use]
    pub fn zcl_options(&self) -> ZclOptions {
        ZclOptions {
            manufacturer_code: self.definition.meta.manufacturer_code,
            ..ZclOptions::default()
        }
    }

}

/// Contract of an outbound converter
#[async_trait]
pub trait ToZigbee: Send + Sync {
    fn name(&self) -> &str;

    /// Keys owned by this converter
    fn keys(&self) -> &[String];

    fn precedence(&self) -> KeyPrecedence {
        KeyPrecedence::Exclusive
    }

    /// Endpoint names this converter is restricted to
    fn endpoints(&self) -> Option<&[String]> {
        None
    }

    /// User options understood by this converter
    fn options(&self) -> &[Expose] {
        &[]
    }

    fn handles(&self, key: &str) -> bool {
        self.keys().iter().any(|k| k == key)
    }

    /// Whether the converter serves requests addressed to `endpoint_name`
    fn serves_endpoint(&self, endpoint_name: Option<&str>) -> bool {
        match (self.endpoints(), endpoint_name) {
            (None, _) => true,
            (Some(names), Some(name)) => names.iter().any(|n| n == name),
            (Some(_), None) => false,
        }
    }

    /// Check a set request without issuing any stack call
    fn validate_set(&self, key: &str, _value: &Value, _meta: &TzMeta<'_>) -> Result<(), ConvertError> {
        ensure_key(self, key)
    }

    async fn convert_set(
        &self,
        entity: &dyn ZclEndpoint,
        key: &str,
        value: &Value,
        meta: &TzMeta<'_>,
    ) -> Result<Option<SetResult>, ConvertError>;

    async fn convert_get(
        &self,
        entity: &dyn ZclEndpoint,
        key: &str,
        meta: &TzMeta<'_>,
    ) -> Result<(), ConvertError>;
}

fn ensure_key<T: ToZigbee + ?Sized>(converter: &T, key: &str) -> Result<(), ConvertError> {
    if converter.handles(key) {
        Ok(())
    } else {
        Err(ConvertError::UnhandledKey(key.to_string()))
    }
}

/// Writes and reads one attribute through a [`ValueCodec`]
#[derive(Debug, Clone)]
pub struct AttributeConverter {
    name: String,
    keys: Vec<String>,
    cluster: ClusterRef,
    attribute: AttributeRef,
    codec: ValueCodec,
    zcl_options: Option<ZclOptions>,
    read_only: bool,
    precedence: KeyPrecedence,
    endpoints: Option<Vec<String>>,
}

impl AttributeConverter {
    #[must_use]
    pub fn new(
        key: &str,
        cluster: impl Into<ClusterRef>,
        attribute: impl Into<AttributeRef>,
        codec: ValueCodec,
    ) -> Self {
        Self {
            name: key.to_string(),
            keys: vec![key.to_string()],
            cluster: cluster.into(),
            attribute: attribute.into(),
            codec,
            zcl_options: None,
            read_only: false,
            precedence: KeyPrecedence::Exclusive,
            endpoints: None,
        }
    }

    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    #[must_use]
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    #[must_use]
    pub fn with_zcl_options(mut self, options: ZclOptions) -> Self {
        self.zcl_options = Some(options);
        self
    }

    #[must_use]
    pub fn with_precedence(mut self, precedence: KeyPrecedence) -> Self {
        self.precedence = precedence;
        self
    }

    #[must_use]
    pub fn for_endpoints(mut self, endpoints: &[&str]) -> Self {
        self.endpoints = Some(endpoints.iter().map(|e| (*e).to_string()).collect());
        self
    }

    fn options_for(&self, meta: &TzMeta<'_>) -> ZclOptions {
        self.zcl_options.clone().unwrap_or_else(|| meta.zcl_options())
    }

    /// Access rights matching this converter
    #[must_use]
    pub fn access(&self) -> Access {
        if self.read_only {
            Access::STATE_GET
        } else {
            Access::ALL
        }
    }

    fn encode(&self, key: &str, value: &Value) -> Result<Value, ConvertError> {
        ensure_key(self, key)?;
        if self.read_only {
            return Err(ConvertError::ReadOnly(key.to_string()));
        }
        self.codec.encode(key, value)
    }
}

#[async_trait]
impl ToZigbee for AttributeConverter {
    fn name(&self) -> &str {
        &self.name
    }

    fn keys(&self) -> &[String] {
        &self.keys
    }

    fn precedence(&self) -> KeyPrecedence {
        self.precedence
    }

    fn endpoints(&self) -> Option<&[String]> {
        self.endpoints.as_deref()
    }

    fn validate_set(&self, key: &str, value: &Value, _meta: &TzMeta<'_>) -> Result<(), ConvertError> {
        self.encode(key, value).map(|_| ())
    }

    async fn convert_set(
        &self,
        entity: &dyn ZclEndpoint,
        key: &str,
        value: &Value,
        meta: &TzMeta<'_>,
    ) -> Result<Option<SetResult>, ConvertError> {
        let raw = self.encode(key, value)?;
        entity
            .write(
                &self.cluster,
                &[(self.attribute.clone(), raw)],
                &self.options_for(meta),
            )
            .await?;
        Ok(Some(SetResult::single(key, value.clone())))
    }

    async fn convert_get(
        &self,
        entity: &dyn ZclEndpoint,
        key: &str,
        meta: &TzMeta<'_>,
    ) -> Result<(), ConvertError> {
        ensure_key(self, key)?;
        entity
            .read(
                &self.cluster,
                std::slice::from_ref(&self.attribute),
                &self.options_for(meta),
            )
            .await?;
        Ok(())
    }
}

/// `state` via genOnOff commands, with optional timed-off
pub struct OnOffConverter {
    keys: Vec<String>,
    precedence: KeyPrecedence,
    endpoints: Option<Vec<String>>,
}

impl Default for OnOffConverter {
    fn default() -> Self {
        Self {
            keys: vec![
                "state".to_string(),
                "on_time".to_string(),
                "off_wait_time".to_string(),
            ],
            precedence: KeyPrecedence::Exclusive,
            endpoints: None,
        }
    }
}

impl OnOffConverter {
    /// One converter per endpoint, sharing the `state` key
    #[must_use]
    pub fn for_endpoint(endpoint: &str) -> Self {
        Self {
            precedence: KeyPrecedence::Cooperative,
            endpoints: Some(vec![endpoint.to_string()]),
            ..Self::default()
        }
    }
}

fn seconds_to_tenths(message: &State, key: &str) -> Result<u64, ConvertError> {
    match message.get(key) {
        None | Some(Value::Null) => Ok(0),
        Some(value) => value
            .as_f64()
            .filter(|v| *v >= 0.0)
            .map(|v| (v * 10.0).round() as u64)
            .ok_or_else(|| ConvertError::invalid(key, "must be a non-negative number")),
    }
}

/// Planned genOnOff request
enum OnOffRequest {
    /// Sibling of a state key, sent together with it
    Qualifier,
    Timed { on_time: u64, off_wait_time: u64 },
    Plain(&'static str),
}

impl OnOffConverter {
    fn plan(&self, key: &str, value: &Value, meta: &TzMeta<'_>) -> Result<OnOffRequest, ConvertError> {
        ensure_key(self, key)?;
        if key != "state" {
            // on_time/off_wait_time only qualify a state request
            return match meta.message.get("state") {
                Some(_) => Ok(OnOffRequest::Qualifier),
                None => Err(ConvertError::invalid(key, "requires a state in the same request")),
            };
        }

        // Only absolute targets: a toggle cannot be confirmed without reading back
        let command = match value.as_str().map(str::to_lowercase).as_deref() {
            Some("on") => "on",
            Some("off") => "off",
            _ => return Err(ConvertError::invalid(key, format!("expected ON or OFF, got {value}"))),
        };
        let timed = meta.message.contains_key("on_time") || meta.message.contains_key("off_wait_time");
        if command == "on" && timed {
            return Ok(OnOffRequest::Timed {
                on_time: seconds_to_tenths(meta.message, "on_time")?,
                off_wait_time: seconds_to_tenths(meta.message, "off_wait_time")?,
            });
        }
        Ok(OnOffRequest::Plain(command))
    }
}

#[async_trait]
impl ToZigbee for OnOffConverter {
    fn name(&self) -> &str {
        "on_off"
    }

    fn keys(&self) -> &[String] {
        &self.keys
    }

    fn precedence(&self) -> KeyPrecedence {
        self.precedence
    }

    fn endpoints(&self) -> Option<&[String]> {
        self.endpoints.as_deref()
    }

    fn validate_set(&self, key: &str, value: &Value, meta: &TzMeta<'_>) -> Result<(), ConvertError> {
        self.plan(key, value, meta).map(|_| ())
    }

    async fn convert_set(
        &self,
        entity: &dyn ZclEndpoint,
        key: &str,
        value: &Value,
        meta: &TzMeta<'_>,
    ) -> Result<Option<SetResult>, ConvertError> {
        let cluster = ClusterRef::from("genOnOff");
        let options = meta.zcl_options();

        match self.plan(key, value, meta)? {
            OnOffRequest::Qualifier => Ok(None),
            OnOffRequest::Timed {
                on_time,
                off_wait_time,
            } => {
                let mut payload = Map::new();
                payload.insert("ctrlbits".to_string(), Value::from(0));
                payload.insert("ontime".to_string(), Value::from(on_time));
                payload.insert("offwaittime".to_string(), Value::from(off_wait_time));
                entity
                    .command(&cluster, "onWithTimedOff", &payload, &options)
                    .await?;
                // Confirmed by the device's report once the timer starts
                Ok(None)
            }
            OnOffRequest::Plain(command) => {
                entity.command(&cluster, command, &Map::new(), &options).await?;
                Ok(Some(SetResult::single("state", Value::from(command.to_uppercase()))))
            }
        }
    }

    async fn convert_get(
        &self,
        entity: &dyn ZclEndpoint,
        key: &str,
        meta: &TzMeta<'_>,
    ) -> Result<(), ConvertError> {
        ensure_key(self, key)?;
        entity
            .read(&"genOnOff".into(), &["onOff".into()], &meta.zcl_options())
            .await?;
        Ok(())
    }
}

/// Default identify duration in seconds
pub const DEFAULT_IDENTIFY_TIMEOUT: u64 = 3;

/// `identify` via the genIdentify command
pub struct IdentifyConverter {
    keys: Vec<String>,
    options: Vec<Expose>,
}

impl Default for IdentifyConverter {
    fn default() -> Self {
        Self {
            keys: vec!["identify".to_string()],
            options: vec![Expose::numeric("identify_timeout", Access::SET)
                .with_description(
                    "Sets duration of identification procedure in seconds (i.e., how long device would flash). Value ranges from 1 to 30 seconds (default 3).",
                )
                .with_value_min(1.0)
                .with_value_max(30.0)],
        }
    }
}

#[async_trait]
impl ToZigbee for IdentifyConverter {
    fn name(&self) -> &str {
        "identify"
    }

    fn keys(&self) -> &[String] {
        &self.keys
    }

    fn options(&self) -> &[Expose] {
        &self.options
    }

    async fn convert_set(
        &self,
        entity: &dyn ZclEndpoint,
        key: &str,
        value: &Value,
        meta: &TzMeta<'_>,
    ) -> Result<Option<SetResult>, ConvertError> {
        ensure_key(self, key)?;
        // An explicit number wins over the configured timeout
        let timeout = value
            .as_u64()
            .or_else(|| meta.options.get("identify_timeout").and_then(Value::as_u64))
            .unwrap_or(DEFAULT_IDENTIFY_TIMEOUT);
        let mut payload = Map::new();
        payload.insert("identifytime".to_string(), Value::from(timeout));
        entity
            .command(&"genIdentify".into(), "identify", &payload, &meta.zcl_options())
            .await?;
        Ok(None)
    }

    async fn convert_get(
        &self,
        _entity: &dyn ZclEndpoint,
        key: &str,
        _meta: &TzMeta<'_>,
    ) -> Result<(), ConvertError> {
        ensure_key(self, key)?;
        Err(ConvertError::GetNotSupported(key.to_string()))
    }
}

/// Raw request payload of the generic converters
#[derive(Debug, Clone, Deserialize)]
struct RawRequest {
    cluster: ClusterRef,
    #[serde(default)]
    attributes: Vec<AttributeRef>,
    #[serde(default)]
    payload: Map<String, Value>,
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    options: Option<ZclOptions>,
    #[serde(default)]
    state_property: Option<String>,
}

impl RawRequest {
    fn parse(key: &str, value: &Value) -> Result<Self, ConvertError> {
        serde_json::from_value(value.clone()).map_err(|e| ConvertError::malformed(key, e.to_string()))
    }

    /// Reject requests the operation cannot carry out
    fn check(&self, key: &str, operation: RawOperation) -> Result<(), ConvertError> {
        match operation {
            RawOperation::Read if self.attributes.is_empty() => {
                Err(ConvertError::malformed(key, "no attributes to read"))
            }
            RawOperation::Write if self.payload.is_empty() => {
                Err(ConvertError::malformed(key, "empty write payload"))
            }
            RawOperation::Command if self.command.is_none() => {
                Err(ConvertError::malformed(key, "missing command"))
            }
            _ => Ok(()),
        }
    }
}

/// Which raw operation a [`RawConverter`] performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawOperation {
    Read,
    Write,
    Command,
}

impl RawOperation {
    fn key(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Command => "command",
        }
    }
}

/// Generic `read`/`write`/`command` access by cluster and attribute names
pub struct RawConverter {
    operation: RawOperation,
    keys: Vec<String>,
}

impl RawConverter {
    #[must_use]
    pub fn new(operation: RawOperation) -> Self {
        Self {
            operation,
            keys: vec![operation.key().to_string()],
        }
    }

    /// The three generic converters appended to every definition
    #[must_use]
    pub fn all() -> Vec<RawConverter> {
        vec![
            Self::new(RawOperation::Read),
            Self::new(RawOperation::Write),
            Self::new(RawOperation::Command),
        ]
    }
}

#[async_trait]
impl ToZigbee for RawConverter {
    fn name(&self) -> &str {
        self.operation.key()
    }

    fn keys(&self) -> &[String] {
        &self.keys
    }

    fn validate_set(&self, key: &str, value: &Value, _meta: &TzMeta<'_>) -> Result<(), ConvertError> {
        ensure_key(self, key)?;
        RawRequest::parse(key, value)?.check(key, self.operation)
    }

    async fn convert_set(
        &self,
        entity: &dyn ZclEndpoint,
        key: &str,
        value: &Value,
        meta: &TzMeta<'_>,
    ) -> Result<Option<SetResult>, ConvertError> {
        ensure_key(self, key)?;
        let request = RawRequest::parse(key, value)?;
        request.check(key, self.operation)?;
        let options = request.options.clone().unwrap_or_else(|| meta.zcl_options());

        match self.operation {
            RawOperation::Read => {
                let result = entity.read(&request.cluster, &request.attributes, &options).await?;
                tracing::info!("Read result of '{}': {:?}", request.cluster, result);
                Ok(request
                    .state_property
                    .map(|property| SetResult::single(&property, Value::Object(result))))
            }
            RawOperation::Write => {
                let attributes: Vec<(AttributeRef, Value)> = request
                    .payload
                    .iter()
                    .map(|(name, value)| (AttributeRef::from(name.as_str()), value.clone()))
                    .collect();
                entity.write(&request.cluster, &attributes, &options).await?;
                tracing::info!("Wrote '{:?}' to '{}'", request.payload, request.cluster);
                Ok(None)
            }
            RawOperation::Command => {
                let command = request
                    .command
                    .as_deref()
                    .ok_or_else(|| ConvertError::malformed(key, "missing command"))?;
                entity
                    .command(&request.cluster, command, &request.payload, &options)
                    .await?;
                tracing::info!(
                    "Invoked '{}.{}' with payload '{:?}'",
                    request.cluster,
                    command,
                    request.payload
                );
                Ok(None)
            }
        }
    }

    async fn convert_get(
        &self,
        _entity: &dyn ZclEndpoint,
        key: &str,
        _meta: &TzMeta<'_>,
    ) -> Result<(), ConvertError> {
        ensure_key(self, key)?;
        Err(ConvertError::GetNotSupported(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::DefinitionBuilder;
    use serde_json::json;
    use zigbee_core::recording::{RecordingDevice, StackCall};
    use zigbee_core::{Endpoint, ZigbeeDevice};

    fn fixture() -> (Definition, RecordingDevice) {
        let definition = DefinitionBuilder::new("TH-LOCK", "Acme", "Thermostat")
            .zigbee_model("TH-LOCK")
            .build()
            .unwrap();
        let device = RecordingDevice::new(
            ZigbeeDevice::new([3; 8], 3).with_endpoint(Endpoint::new(1, &[0x0006, 0x0204], &[])),
        );
        (definition, device)
    }

    fn child_lock() -> AttributeConverter {
        AttributeConverter::new(
            "child_lock",
            "hvacUserInterfaceCfg",
            "keypadLockout",
            ValueCodec::Binary {
                on: (json!("LOCK"), json!(1)),
                off: (json!("UNLOCK"), json!(0)),
            },
        )
    }

    #[tokio::test]
    async fn test_child_lock_writes_keypad_lockout() {
        let (definition, device) = fixture();
        let state = State::new();
        let message = State::new();
        let meta = TzMeta {
            message: &message,
            definition: &definition,
            device: &device,
            state: &state,
            options: &state,
            endpoint_name: None,
        };
        let entity = device.endpoint(1).unwrap();

        let result = child_lock()
            .convert_set(entity.as_ref(), "child_lock", &json!("LOCK"), &meta)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({"state": {"child_lock": "LOCK"}})
        );

        let calls = device.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            StackCall::Write {
                cluster,
                attributes,
                ..
            } => {
                assert_eq!(cluster, "hvacUserInterfaceCfg");
                assert_eq!(attributes, &vec![("keypadLockout".to_string(), json!(1))]);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_key_is_rejected_without_stack_calls() {
        let (definition, device) = fixture();
        let state = State::new();
        let meta = TzMeta {
            message: &state,
            definition: &definition,
            device: &device,
            state: &state,
            options: &state,
            endpoint_name: None,
        };
        let entity = device.endpoint(1).unwrap();
        let converter = child_lock();

        let set = converter
            .convert_set(entity.as_ref(), "brightness", &json!(10), &meta)
            .await;
        assert_eq!(set, Err(ConvertError::UnhandledKey("brightness".to_string())));
        let get = converter.convert_get(entity.as_ref(), "brightness", &meta).await;
        assert_eq!(get, Err(ConvertError::UnhandledKey("brightness".to_string())));

        let invalid = converter
            .convert_set(entity.as_ref(), "child_lock", &json!("OPEN"), &meta)
            .await;
        assert!(matches!(invalid, Err(ConvertError::InvalidValue { .. })));
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn test_set_is_idempotent() {
        let (definition, device) = fixture();
        let state = State::new();
        let meta = TzMeta {
            message: &state,
            definition: &definition,
            device: &device,
            state: &state,
            options: &state,
            endpoint_name: None,
        };
        let entity = device.endpoint(1).unwrap();
        let converter = child_lock();

        let first = converter
            .convert_set(entity.as_ref(), "child_lock", &json!("UNLOCK"), &meta)
            .await
            .unwrap();
        let second = converter
            .convert_set(entity.as_ref(), "child_lock", &json!("UNLOCK"), &meta)
            .await
            .unwrap();
        assert_eq!(first, second);

        let calls = device.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0], calls[1]);
    }

    #[tokio::test]
    async fn test_on_off_commands() {
        let (definition, device) = fixture();
        let mut state = State::new();
        state.insert("state".to_string(), json!("ON"));
        let mut message = State::new();
        message.insert("state".to_string(), json!("On"));
        let meta = TzMeta {
            message: &message,
            definition: &definition,
            device: &device,
            state: &state,
            options: &state,
            endpoint_name: None,
        };
        let entity = device.endpoint(1).unwrap();
        let converter = OnOffConverter::default();

        let off = converter
            .convert_set(entity.as_ref(), "state", &json!("off"), &meta)
            .await
            .unwrap();
        assert_eq!(off, Some(SetResult::single("state", json!("OFF"))));

        let on = converter
            .convert_set(entity.as_ref(), "state", &json!("On"), &meta)
            .await
            .unwrap();
        assert_eq!(on, Some(SetResult::single("state", json!("ON"))));

        let commands: Vec<String> = device
            .calls()
            .into_iter()
            .filter_map(|call| match call {
                StackCall::Command { command, .. } => Some(command),
                _ => None,
            })
            .collect();
        assert_eq!(commands, vec!["off".to_string(), "on".to_string()]);
    }

    #[tokio::test]
    async fn test_toggle_is_rejected() {
        let (definition, device) = fixture();
        let mut state = State::new();
        state.insert("state".to_string(), json!("OFF"));
        let mut message = State::new();
        message.insert("state".to_string(), json!("TOGGLE"));
        let meta = TzMeta {
            message: &message,
            definition: &definition,
            device: &device,
            state: &state,
            options: &state,
            endpoint_name: None,
        };
        let entity = device.endpoint(1).unwrap();
        let converter = OnOffConverter::default();

        let validated = converter.validate_set("state", &json!("TOGGLE"), &meta);
        assert!(matches!(validated, Err(ConvertError::InvalidValue { .. })));
        let set = converter
            .convert_set(entity.as_ref(), "state", &json!("toggle"), &meta)
            .await;
        assert!(matches!(set, Err(ConvertError::InvalidValue { .. })));
        assert!(device.calls().is_empty());
    }

    #[test]
    fn test_validate_set_matches_convert_set_checks() {
        let (definition, device) = fixture();
        let state = State::new();
        let meta = TzMeta {
            message: &state,
            definition: &definition,
            device: &device,
            state: &state,
            options: &state,
            endpoint_name: None,
        };

        let converter = child_lock();
        assert_eq!(converter.validate_set("child_lock", &json!("LOCK"), &meta), Ok(()));
        assert!(matches!(
            converter.validate_set("child_lock", &json!("OPEN"), &meta),
            Err(ConvertError::InvalidValue { .. })
        ));
        let read_only = child_lock().read_only(true);
        assert_eq!(
            read_only.validate_set("child_lock", &json!("LOCK"), &meta),
            Err(ConvertError::ReadOnly("child_lock".to_string()))
        );

        let write = RawConverter::new(RawOperation::Write);
        assert!(matches!(
            write.validate_set("write", &json!({"cluster": "genBasic", "payload": {}}), &meta),
            Err(ConvertError::MalformedPayload { .. })
        ));
        assert_eq!(
            write.validate_set(
                "write",
                &json!({"cluster": "genBasic", "payload": {"locationDesc": "hall"}}),
                &meta
            ),
            Ok(())
        );
        assert!(device.calls().is_empty());
    }

    #[tokio::test]
    async fn test_on_with_timed_off() {
        let (definition, device) = fixture();
        let state = State::new();
        let mut message = State::new();
        message.insert("state".to_string(), json!("ON"));
        message.insert("on_time".to_string(), json!(30));
        let meta = TzMeta {
            message: &message,
            definition: &definition,
            device: &device,
            state: &state,
            options: &state,
            endpoint_name: None,
        };
        let entity = device.endpoint(1).unwrap();
        let converter = OnOffConverter::default();

        let result = converter
            .convert_set(entity.as_ref(), "state", &json!("ON"), &meta)
            .await
            .unwrap();
        assert_eq!(result, None);
        let sibling = converter
            .convert_set(entity.as_ref(), "on_time", &json!(30), &meta)
            .await
            .unwrap();
        assert_eq!(sibling, None);

        let calls = device.calls();
        assert_eq!(calls.len(), 1);
        match &calls[0] {
            StackCall::Command {
                command, payload, ..
            } => {
                assert_eq!(command, "onWithTimedOff");
                assert_eq!(payload.get("ontime"), Some(&json!(300)));
                assert_eq!(payload.get("offwaittime"), Some(&json!(0)));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_identify_uses_option_timeout() {
        let (definition, device) = fixture();
        let state = State::new();
        let mut options = State::new();
        options.insert("identify_timeout".to_string(), json!(10));
        let meta = TzMeta {
            message: &state,
            definition: &definition,
            device: &device,
            state: &state,
            options: &options,
            endpoint_name: None,
        };
        let entity = device.endpoint(1).unwrap();
        let converter = IdentifyConverter::default();

        converter
            .convert_set(entity.as_ref(), "identify", &json!("identify"), &meta)
            .await
            .unwrap();
        match &device.calls()[0] {
            StackCall::Command { payload, .. } => {
                assert_eq!(payload.get("identifytime"), Some(&json!(10)));
            }
            other => panic!("unexpected call {other:?}"),
        }
        assert_eq!(
            converter.convert_get(entity.as_ref(), "identify", &meta).await,
            Err(ConvertError::GetNotSupported("identify".to_string()))
        );
    }

    #[tokio::test]
    async fn test_raw_converters() {
        let (definition, device) = fixture();
        device
            .recording_endpoint(1)
            .unwrap()
            .set_attribute("genBasic", "zclVersion", json!(8));
        let state = State::new();
        let meta = TzMeta {
            message: &state,
            definition: &definition,
            device: &device,
            state: &state,
            options: &state,
            endpoint_name: None,
        };
        let entity = device.endpoint(1).unwrap();

        let read = RawConverter::new(RawOperation::Read)
            .convert_set(
                entity.as_ref(),
                "read",
                &json!({"cluster": "genBasic", "attributes": ["zclVersion"], "state_property": "basic"}),
                &meta,
            )
            .await
            .unwrap();
        assert_eq!(read, Some(SetResult::single("basic", json!({"zclVersion": 8}))));

        let malformed = RawConverter::new(RawOperation::Command)
            .convert_set(entity.as_ref(), "command", &json!({"cluster": "genOnOff"}), &meta)
            .await;
        assert!(matches!(malformed, Err(ConvertError::MalformedPayload { .. })));
    }
}
