//! Inbound (fromZigbee) converters
//!
//! An inbound converter matches messages by `(cluster, message type)` and
//! decodes them into a partial device state. Dispatch goes through
//! [`FzRegistry`], a lookup table built once per definition, so a converter is
//! only offered messages it declared. Calling [`FromZigbee::convert`] directly
//! with anything else yields `None`.

use crate::definition::Definition;
use crate::exposes::Expose;
use crate::state::State;
use crate::store::DeviceStore;
use futures::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use zigbee_core::{ClusterRef, MessageType, StackError, ZclEndpoint, ZclMessage, ZigbeeDevice};

/// A fire-and-forget reply queued by a converter
pub struct DeferredReply {
    description: String,
    future: BoxFuture<'static, Result<(), StackError>>,
}

impl DeferredReply {
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Run the reply on the runtime; failures are logged and dropped
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        let Self {
            description,
            future,
        } = self;
        tokio::spawn(async move {
            match future.await {
                Ok(()) => tracing::debug!("Sent {}", description),
                Err(e) => tracing::warn!("Failed to send {}: {}", description, e),
            }
        })
    }

    /// Run the reply in place; used where no runtime task is wanted
    pub async fn run(self) -> Result<(), StackError> {
        self.future.await
    }
}

/// Context handed to inbound converters
pub struct FzMeta<'a> {
    pub definition: &'a Definition,
    pub device: &'a ZigbeeDevice,
    /// Correlation store of this device session
    pub store: &'a mut DeviceStore,
    /// Currently published state
    pub state: &'a State,
    /// User options for this device
    pub options: &'a State,
    /// Handle of the endpoint the message came from
    pub endpoint: Option<Arc<dyn ZclEndpoint>>,
    endpoint_names: &'a BTreeMap<String, u8>,
    deferred: Vec<DeferredReply>,
}

impl<'a> FzMeta<'a> {
    #[must_use]
    pub fn new(
        definition: &'a Definition,
        device: &'a ZigbeeDevice,
        store: &'a mut DeviceStore,
        state: &'a State,
        options: &'a State,
        endpoint_names: &'a BTreeMap<String, u8>,
    ) -> Self {
        Self {
            definition,
            device,
            store,
            state,
            options,
            endpoint: None,
            endpoint_names,
            deferred: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Arc<dyn ZclEndpoint>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Queue a reply to run after decoding finishes
    pub fn defer<F>(&mut self, description: &str, future: F)
    where
        F: Future<Output = Result<(), StackError>> + Send + 'static,
    {
        self.deferred.push(DeferredReply {
            description: description.to_string(),
            future: Box::pin(future),
        });
    }

    /// Drain queued replies
    pub fn take_deferred(&mut self) -> Vec<DeferredReply> {
        std::mem::take(&mut self.deferred)
    }

    /// Whether this message was already decoded for `event`.
    ///
    /// Keyed by source endpoint and event kind; messages without a sequence
    /// number are never treated as duplicates.
    pub fn is_duplicate(&mut self, msg: &ZclMessage, event: &str) -> bool {
        if self.definition.meta.publish_duplicate_transaction() {
            return false;
        }
        let Some(tsn) = msg.meta.transaction_sequence_number else {
            return false;
        };
        let key = format!("{}_{}", msg.endpoint, event);
        let duplicate = self.store.has_already_processed(&key, tsn);
        if duplicate {
            tracing::debug!(
                "Dropping duplicate {} (tsn {}) from {}",
                event,
                tsn,
                self.device.display_name()
            );
        }
        duplicate
    }

    /// Logical name of the message's source endpoint
    #[must_use]
    pub fn endpoint_name(&self, msg: &ZclMessage) -> Option<&str> {
        self.endpoint_names
            .iter()
            .find(|(_, id)| **id == msg.endpoint)
            .map(|(name, _)| name.as_str())
    }

    /// `property_<endpoint>` for multi-endpoint definitions, else `property`
    #[must_use]
    pub fn postfix_with_endpoint_name(&self, property: &str, msg: &ZclMessage) -> String {
        let meta = &self.definition.meta;
        if !meta.multi_endpoint() || meta.skips_multi_endpoint(property) {
            return property.to_string();
        }
        if self.endpoint_names.is_empty() {
            return format!("{}_{}", property, msg.endpoint);
        }
        match self.endpoint_name(msg) {
            Some(name) => format!("{property}_{name}"),
            None => property.to_string(),
        }
    }
}

/// Contract of an inbound converter
pub trait FromZigbee: Send + Sync {
    fn name(&self) -> &str;

    fn cluster(&self) -> &ClusterRef;

    fn message_types(&self) -> &[MessageType];

    /// User options understood by this converter
    fn options(&self) -> &[Expose] {
        &[]
    }

    fn matches(&self, msg: &ZclMessage) -> bool {
        self.cluster().matches(&msg.cluster) && self.message_types().contains(&msg.message_type)
    }

    /// Decode `msg` into partial state; `None` when nothing applies
    fn convert(&self, msg: &ZclMessage, meta: &mut FzMeta<'_>) -> Option<State>;
}

type DecodeFn = dyn Fn(&ZclMessage, &mut FzMeta<'_>) -> Option<State> + Send + Sync;

/// Inbound converter backed by a closure
#[derive(Clone)]
pub struct FzConverter {
    name: String,
    cluster: ClusterRef,
    types: Vec<MessageType>,
    options: Vec<Expose>,
    decode: Arc<DecodeFn>,
}

impl FzConverter {
    pub fn new<F>(name: &str, cluster: impl Into<ClusterRef>, types: &[MessageType], decode: F) -> Self
    where
        F: Fn(&ZclMessage, &mut FzMeta<'_>) -> Option<State> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            cluster: cluster.into(),
            types: types.to_vec(),
            options: Vec::new(),
            decode: Arc::new(decode),
        }
    }

    /// Attribute reports and read responses
    #[must_use]
    pub fn attribute_types() -> [MessageType; 2] {
        [MessageType::AttributeReport, MessageType::ReadResponse]
    }

    #[must_use]
    pub fn with_option(mut self, option: Expose) -> Self {
        self.options.push(option);
        self
    }
}

impl FromZigbee for FzConverter {
    fn name(&self) -> &str {
        &self.name
    }

    fn cluster(&self) -> &ClusterRef {
        &self.cluster
    }

    fn message_types(&self) -> &[MessageType] {
        &self.types
    }

    fn options(&self) -> &[Expose] {
        &self.options
    }

    fn convert(&self, msg: &ZclMessage, meta: &mut FzMeta<'_>) -> Option<State> {
        if !self.matches(msg) {
            return None;
        }
        (self.decode)(msg, meta)
    }
}

/// Lookup key of the dispatch table
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DispatchKey {
    cluster: String,
    message_type: MessageType,
}

/// Inbound converters of one definition, indexed by cluster and message type
#[derive(Clone, Default)]
pub struct FzRegistry {
    converters: Vec<Arc<dyn FromZigbee>>,
    index: HashMap<DispatchKey, Vec<usize>>,
}

impl FzRegistry {
    #[must_use]
    pub fn new(converters: Vec<Arc<dyn FromZigbee>>) -> Self {
        let mut index: HashMap<DispatchKey, Vec<usize>> = HashMap::new();
        for (position, converter) in converters.iter().enumerate() {
            let cluster = converter.cluster().key();
            for message_type in converter.message_types() {
                index
                    .entry(DispatchKey {
                        cluster: cluster.clone(),
                        message_type: message_type.clone(),
                    })
                    .or_default()
                    .push(position);
            }
        }
        Self { converters, index }
    }

    /// Converters registered for the message, in registration order
    pub fn matching<'s>(&'s self, msg: &ZclMessage) -> impl Iterator<Item = &'s Arc<dyn FromZigbee>> + 's {
        let key = DispatchKey {
            cluster: msg.cluster.key(),
            message_type: msg.message_type.clone(),
        };
        self.index
            .get(&key)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .filter_map(|position| self.converters.get(*position))
    }

    #[must_use]
    pub fn all(&self) -> &[Arc<dyn FromZigbee>] {
        &self.converters
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.converters.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::DefinitionBuilder;
    use serde_json::json;

    fn temperature_converter() -> FzConverter {
        FzConverter::new(
            "temperature",
            "msTemperatureMeasurement",
            &FzConverter::attribute_types(),
            |msg, _meta| {
                let raw = msg.attribute_f64("measuredValue")?;
                let mut state = State::new();
                state.insert("temperature".to_string(), json!(raw / 100.0));
                Some(state)
            },
        )
    }

    #[test]
    fn test_non_matching_message_returns_none() {
        let definition = DefinitionBuilder::new("TH01", "Acme", "Sensor")
            .zigbee_model("TH01")
            .build()
            .unwrap();
        let device = ZigbeeDevice::new([1; 8], 1);
        let mut store = DeviceStore::default();
        let state = State::new();
        let names = BTreeMap::new();
        let mut meta = FzMeta::new(&definition, &device, &mut store, &state, &state, &names);

        let converter = temperature_converter();
        let wrong_cluster =
            ZclMessage::attribute_report("msRelativeHumidity", 1, json!({"measuredValue": 2150}));
        let wrong_type = ZclMessage::command("msTemperatureMeasurement", "on", 1, json!({}));
        let missing_field =
            ZclMessage::attribute_report("msTemperatureMeasurement", 1, json!({"tolerance": 5}));

        assert_eq!(converter.convert(&wrong_cluster, &mut meta), None);
        assert_eq!(converter.convert(&wrong_type, &mut meta), None);
        assert_eq!(converter.convert(&missing_field, &mut meta), None);
    }

    #[test]
    fn test_registry_dispatch_by_id_or_name() {
        let registry = FzRegistry::new(vec![
            Arc::new(temperature_converter()) as Arc<dyn FromZigbee>,
            Arc::new(FzConverter::new(
                "on_off",
                6u16,
                &FzConverter::attribute_types(),
                |_, _| None,
            )) as Arc<dyn FromZigbee>,
        ]);

        let by_id = ZclMessage::attribute_report(0x0402u16, 1, json!({}));
        let names: Vec<&str> = registry.matching(&by_id).map(|c| c.name()).collect();
        assert_eq!(names, vec!["temperature"]);

        let on_off = ZclMessage::new("genOnOff", MessageType::ReadResponse, 1);
        assert_eq!(registry.matching(&on_off).count(), 1);

        let unknown = ZclMessage::new("genOnOff", MessageType::Raw, 1);
        assert_eq!(registry.matching(&unknown).count(), 0);
    }

    #[test]
    fn test_is_duplicate_per_endpoint_and_event() {
        let definition = DefinitionBuilder::new("BTN", "Acme", "Button")
            .zigbee_model("BTN")
            .build()
            .unwrap();
        let device = ZigbeeDevice::new([2; 8], 2);
        let mut store = DeviceStore::default();
        let state = State::new();
        let names = BTreeMap::new();
        let mut meta = FzMeta::new(&definition, &device, &mut store, &state, &state, &names);

        let press = ZclMessage::command("genOnOff", "on", 1, json!({}))
            .with_transaction_sequence_number(7);
        assert!(!meta.is_duplicate(&press, "commandOn"));
        assert!(meta.is_duplicate(&press, "commandOn"));
        assert!(!meta.is_duplicate(&press, "commandOff"));

        let other_endpoint = ZclMessage::command("genOnOff", "on", 2, json!({}))
            .with_transaction_sequence_number(7);
        assert!(!meta.is_duplicate(&other_endpoint, "commandOn"));
    }

    #[test]
    fn test_duplicate_check_disabled_by_meta() {
        let definition = DefinitionBuilder::new("BTN", "Acme", "Button")
            .zigbee_model("BTN")
            .meta(crate::definition::DefinitionMeta {
                publish_duplicate_transaction: Some(true),
                ..Default::default()
            })
            .build()
            .unwrap();
        let device = ZigbeeDevice::new([2; 8], 2);
        let mut store = DeviceStore::default();
        let state = State::new();
        let names = BTreeMap::new();
        let mut meta = FzMeta::new(&definition, &device, &mut store, &state, &state, &names);

        let press = ZclMessage::command("genOnOff", "on", 1, json!({}))
            .with_transaction_sequence_number(7);
        assert!(!meta.is_duplicate(&press, "commandOn"));
        assert!(!meta.is_duplicate(&press, "commandOn"));
    }
}
