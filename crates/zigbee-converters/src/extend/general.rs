//! General purpose extends: switching, identification, endpoint naming,
//! remote commands and clock synchronisation.

use super::attribute::{
    binary, endpoint_requirements, from_listed_endpoint, per_endpoint, single, BinaryArgs,
};
use super::{target_endpoints, Extend};
use crate::configure::{optional, ConfigureStep};
use crate::definition::{DefinitionMeta, EndpointMap};
use crate::exposes::{presets, Expose};
use crate::fz::FzConverter;
use crate::reporting::{self, Preset};
use crate::tz::{IdentifyConverter, OnOffConverter};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use zigbee_core::{ClusterRef, MessageType, ZclEndpoint, ZclOptions};

fn enabled() -> bool {
    true
}

/// Options of [`on_off`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnOffArgs {
    /// One switch per named endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_names: Option<Vec<String>>,
    #[serde(default = "enabled")]
    pub configure_reporting: bool,
}

impl Default for OnOffArgs {
    fn default() -> Self {
        Self {
            endpoint_names: None,
            configure_reporting: true,
        }
    }
}

impl OnOffArgs {
    #[must_use]
    pub fn with_endpoints(mut self, endpoints: &[&str]) -> Self {
        self.endpoint_names = Some(endpoints.iter().map(|e| (*e).to_string()).collect());
        self
    }

    #[must_use]
    pub fn without_reporting(mut self) -> Self {
        self.configure_reporting = false;
        self
    }
}

/// genOnOff switch: `state` per endpoint, ON/OFF
#[must_use]
pub fn on_off(args: OnOffArgs) -> Extend {
    let endpoints = args.endpoint_names.as_deref();

    let filter = args.endpoint_names.clone();
    let inbound = FzConverter::new(
        "on_off",
        "genOnOff",
        &FzConverter::attribute_types(),
        move |msg, meta| {
            let on_off = msg.attribute("onOff")?.as_u64()?;
            if !from_listed_endpoint(filter.as_deref(), msg, meta) {
                return None;
            }
            let state = if on_off == 1 { "ON" } else { "OFF" };
            Some(single(
                meta.postfix_with_endpoint_name("state", msg),
                Value::from(state),
            ))
        },
    );

    let mut extend = Extend::new("on_off").with_from_zigbee(inbound);
    extend = match endpoints {
        None => extend.with_to_zigbee(OnOffConverter::default()),
        Some(names) => names.iter().fold(extend, |extend, endpoint| {
            extend.with_to_zigbee(OnOffConverter::for_endpoint(endpoint))
        }),
    };
    extend = per_endpoint(extend, Expose::switch(), endpoints);

    if args.configure_reporting {
        let names = args.endpoint_names.clone();
        extend = extend.with_configure(ConfigureStep::new("on_off_reporting", move |ctx| {
            let names = names.clone();
            Box::pin(async move {
                let cluster = ClusterRef::from("genOnOff");
                for endpoint in target_endpoints(&ctx, names.as_deref(), &cluster)? {
                    endpoint.bind(&cluster, &ctx.coordinator).await?;
                    Preset::OnOff.apply(endpoint.as_ref(), None).await?;
                }
                Ok(())
            })
        }));
    }
    endpoint_requirements(extend, endpoints)
}

#[must_use]
pub fn identify() -> Extend {
    Extend::new("identify")
        .with_to_zigbee(IdentifyConverter::default())
        .with_expose(presets::identify())
}

/// Keypad lockout of the thermostat user interface
#[must_use]
pub fn child_lock() -> Extend {
    let extend = binary(
        BinaryArgs::new(
            "child_lock",
            "hvacUserInterfaceCfg",
            "keypadLockout",
            (json!("LOCK"), json!(1)),
            (json!("UNLOCK"), json!(0)),
        )
        .with_description("Enables/disables physical input on the device"),
    );
    extend.with_configure(ConfigureStep::new("child_lock_reporting", |ctx| {
        Box::pin(async move {
            let clusters = [ClusterRef::from("hvacUserInterfaceCfg")];
            for endpoint in target_endpoints(&ctx, None, &clusters[0])? {
                reporting::bind(endpoint.as_ref(), &ctx.coordinator, &clusters).await?;
                // Not every thermostat reports keypadLockout
                optional(
                    Preset::ThermostatKeypadLockMode.apply(endpoint.as_ref(), None).await,
                    "keypadLockout reporting",
                )?;
            }
            Ok(())
        })
    }))
}

/// Named endpoints of a multi endpoint device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEndpointsArgs {
    pub endpoints: BTreeMap<String, u8>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multi_endpoint_skip: Vec<String>,
}

impl DeviceEndpointsArgs {
    #[must_use]
    pub fn new(endpoints: &[(&str, u8)]) -> Self {
        Self {
            endpoints: endpoints
                .iter()
                .map(|(name, id)| ((*name).to_string(), *id))
                .collect(),
            multi_endpoint_skip: Vec::new(),
        }
    }

    /// Properties that stay unsuffixed
    #[must_use]
    pub fn with_skip(mut self, properties: &[&str]) -> Self {
        self.multi_endpoint_skip = properties.iter().map(|p| (*p).to_string()).collect();
        self
    }
}

#[must_use]
pub fn device_endpoints(args: DeviceEndpointsArgs) -> Extend {
    let skip = (!args.multi_endpoint_skip.is_empty()).then_some(args.multi_endpoint_skip);
    Extend::new("device_endpoints")
        .with_endpoints(EndpointMap::Static(args.endpoints))
        .with_meta(DefinitionMeta {
            multi_endpoint: Some(true),
            multi_endpoint_skip: skip,
            ..DefinitionMeta::default()
        })
}

/// `moveWithOnOff` becomes `move_with_on_off`
fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Commands sent by a remote, published as actions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandActionsArgs {
    pub cluster: ClusterRef,
    /// Stack command names, e.g. `on`, `off`, `toggle`
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_names: Option<Vec<String>>,
    /// Bind the cluster to the coordinator so commands reach it
    #[serde(default = "enabled")]
    pub bind: bool,
}

impl CommandActionsArgs {
    #[must_use]
    pub fn new(cluster: impl Into<ClusterRef>, commands: &[&str]) -> Self {
        Self {
            cluster: cluster.into(),
            commands: commands.iter().map(|c| (*c).to_string()).collect(),
            endpoint_names: None,
            bind: true,
        }
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: &[&str]) -> Self {
        self.endpoint_names = Some(endpoints.iter().map(|e| (*e).to_string()).collect());
        self
    }

    #[must_use]
    pub fn without_bind(mut self) -> Self {
        self.bind = false;
        self
    }
}

#[must_use]
pub fn command_actions(args: CommandActionsArgs) -> Extend {
    let name = format!("{}_actions", args.cluster);
    let types: Vec<MessageType> = args
        .commands
        .iter()
        .map(|c| MessageType::command(c))
        .collect();

    let filter = args.endpoint_names.clone();
    let inbound = FzConverter::new(&name, args.cluster.clone(), &types, move |msg, meta| {
        let MessageType::Command(command) = &msg.message_type else {
            return None;
        };
        if !from_listed_endpoint(filter.as_deref(), msg, meta) {
            return None;
        }
        if meta.is_duplicate(msg, &msg.message_type.to_string()) {
            return None;
        }
        let action = meta.postfix_with_endpoint_name(&snake_case(command), msg);
        let mut state = single("action".to_string(), Value::from(action));
        if let Some(group) = msg.group_id {
            if !meta.definition.meta.disable_action_group() {
                state.insert("action_group".to_string(), Value::from(group));
            }
        }
        Some(state)
    });

    let actions: Vec<String> = args
        .commands
        .iter()
        .flat_map(|command| {
            let action = snake_case(command);
            match &args.endpoint_names {
                None => vec![action],
                Some(endpoints) => endpoints.iter().map(|e| format!("{action}_{e}")).collect(),
            }
        })
        .collect();
    let actions: Vec<&str> = actions.iter().map(String::as_str).collect();

    let mut extend = Extend::new(&name)
        .with_from_zigbee(inbound)
        .with_expose(presets::action(&actions));

    if args.bind {
        let cluster = args.cluster.clone();
        let names = args.endpoint_names.clone();
        extend = extend.with_configure(ConfigureStep::new(&format!("{name}_bind"), move |ctx| {
            let cluster = cluster.clone();
            let names = names.clone();
            Box::pin(async move {
                let endpoints: Vec<Arc<dyn ZclEndpoint>> = match (&names, cluster.id()) {
                    (Some(names), _) => names
                        .iter()
                        .map(|name| ctx.named_endpoint(name))
                        .collect::<Result<_, _>>()?,
                    (None, Some(id)) => {
                        let info = ctx.device.info();
                        let sending: Vec<_> = info
                            .endpoints
                            .iter()
                            .filter(|ep| ep.has_output_cluster(id))
                            .filter_map(|ep| ctx.device.endpoint(ep.id))
                            .collect();
                        if sending.is_empty() {
                            ctx.endpoints_with(id)
                        } else {
                            sending
                        }
                    }
                    (None, None) => ctx.device.endpoints(),
                };
                for endpoint in endpoints {
                    endpoint.bind(&cluster, &ctx.coordinator).await?;
                }
                Ok(())
            })
        }));
    }

    if args.endpoint_names.is_some() {
        extend = extend.requiring_endpoint_map().with_meta(DefinitionMeta {
            multi_endpoint: Some(true),
            ..DefinitionMeta::default()
        });
    }
    extend
}

/// Seconds between the Unix epoch and the Zigbee epoch (2000-01-01 UTC)
const ZIGBEE_EPOCH_OFFSET: i64 = 946_684_800;

/// `(time, localTime)` attributes of the genTime cluster for `now`
#[must_use]
pub fn zigbee_time(now: DateTime<Utc>, utc_offset_seconds: i32) -> (i64, i64) {
    let utc = now.timestamp() - ZIGBEE_EPOCH_OFFSET;
    (utc, utc + i64::from(utc_offset_seconds))
}

/// Answer genTime reads from devices with the coordinator's clock
#[must_use]
pub fn time_sync() -> Extend {
    let inbound = FzConverter::new("time_sync", "genTime", &[MessageType::Read], |msg, meta| {
        let Some(endpoint) = meta.endpoint.clone() else {
            tracing::debug!(
                "No endpoint handle to answer genTime read from {}",
                meta.device.display_name()
            );
            return None;
        };
        let offset = Local::now().offset().local_minus_utc();
        let (time, local_time) = zigbee_time(Utc::now(), offset);
        let transaction = msg.meta.transaction_sequence_number;
        meta.defer("genTime read response", async move {
            let mut attributes = Map::new();
            attributes.insert("time".to_string(), Value::from(time));
            attributes.insert("localTime".to_string(), Value::from(local_time));
            endpoint
                .read_response(
                    &ClusterRef::from("genTime"),
                    &attributes,
                    &ZclOptions::default(),
                    transaction,
                )
                .await
        });
        None
    });

    Extend::new("time_sync").with_from_zigbee(inbound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configure::{run_configure, ConfigureContext, RetryPolicy};
    use crate::definition::DefinitionBuilder;
    use crate::extend::test_support::{decode, decode_with_store};
    use crate::fz::FzMeta;
    use crate::state::State;
    use crate::store::DeviceStore;
    use zigbee_core::recording::{RecordingDevice, RecordingEndpoint, StackCall};
    use zigbee_core::{BindTarget, Endpoint, ReportableChange, StackError, ZclMessage, ZigbeeDevice};

    fn two_gang() -> ZigbeeDevice {
        ZigbeeDevice::new([0x21; 8], 0x21)
            .with_model("SW2")
            .with_endpoint(Endpoint::new(1, &[0x0006], &[]))
            .with_endpoint(Endpoint::new(2, &[0x0006], &[]))
    }

    #[test]
    fn test_on_off_per_endpoint() {
        let definition = DefinitionBuilder::new("SW2", "Acme", "Two gang switch")
            .zigbee_model("SW2")
            .extend(device_endpoints(DeviceEndpointsArgs::new(&[("left", 1), ("right", 2)])))
            .extend(on_off(OnOffArgs::default().with_endpoints(&["left", "right"])))
            .build()
            .unwrap();

        let msg = ZclMessage::attribute_report("genOnOff", 2, json!({"onOff": 1}));
        let state = decode(&definition, &two_gang(), &msg, &State::new());
        assert_eq!(state.get("state_right"), Some(&json!("ON")));
        assert!(definition.find_to_zigbee("state", Some("left")).is_some());
        assert!(definition.find_to_zigbee("state", Some("right")).is_some());
    }

    #[test]
    fn test_command_actions_with_group_and_dedup() {
        let definition = DefinitionBuilder::new("RC1", "Acme", "Remote")
            .zigbee_model("RC1")
            .extend(command_actions(CommandActionsArgs::new(
                "genLevelCtrl",
                &["moveWithOnOff", "stop"],
            )))
            .build()
            .unwrap();
        let device = ZigbeeDevice::new([0x22; 8], 0x22);
        let msg = ZclMessage::command("genLevelCtrl", "moveWithOnOff", 1, json!({"movemode": 0}))
            .with_group(5)
            .with_transaction_sequence_number(3);

        let mut store = DeviceStore::default();
        let first = decode_with_store(&definition, &device, &msg, &mut store);
        assert_eq!(first.get("action"), Some(&json!("move_with_on_off")));
        assert_eq!(first.get("action_group"), Some(&json!(5)));
        assert!(decode_with_store(&definition, &device, &msg, &mut store).is_empty());

        let action = definition.exposes.iter().find(|e| e.has_name("action")).unwrap();
        assert_eq!(action.values, vec!["move_with_on_off".to_string(), "stop".to_string()]);
    }

    #[test]
    fn test_zigbee_time() {
        let now = DateTime::parse_from_rfc3339("2000-01-01T00:01:40Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(zigbee_time(now, 3600), (100, 3700));
    }

    #[tokio::test]
    async fn test_time_sync_defers_read_response() {
        let definition = DefinitionBuilder::new("TRV", "Acme", "Valve")
            .zigbee_model("TRV")
            .extend(time_sync())
            .build()
            .unwrap();
        let device = ZigbeeDevice::new([0x23; 8], 0x23);
        let endpoint = Arc::new(RecordingEndpoint::new(1, device.ieee_address));
        let mut store = DeviceStore::default();
        let state = State::new();
        let names = BTreeMap::new();
        let mut meta = FzMeta::new(&definition, &device, &mut store, &state, &state, &names)
            .with_endpoint(Arc::clone(&endpoint) as Arc<dyn ZclEndpoint>);

        let msg = ZclMessage::new("genTime", MessageType::Read, 1).with_transaction_sequence_number(9);
        let converter = definition.from_zigbee.matching(&msg).next().unwrap();
        assert_eq!(converter.convert(&msg, &mut meta), None);

        let deferred = meta.take_deferred();
        assert_eq!(deferred.len(), 1);
        for reply in deferred {
            reply.run().await.unwrap();
        }
        match &endpoint.calls()[0] {
            StackCall::ReadResponse { cluster, attributes, .. } => {
                assert_eq!(cluster, "genTime");
                assert!(attributes.contains_key("time"));
                assert!(attributes.contains_key("localTime"));
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_on_off_configure_binds_each_endpoint() {
        let definition = DefinitionBuilder::new("SW2", "Acme", "Two gang switch")
            .zigbee_model("SW2")
            .extend(device_endpoints(DeviceEndpointsArgs::new(&[("left", 1), ("right", 2)])))
            .extend(on_off(OnOffArgs::default().with_endpoints(&["left", "right"])))
            .build()
            .unwrap();
        let info = two_gang();
        let names = definition.endpoint_names(&info);
        let device = Arc::new(RecordingDevice::new(info));
        let ctx = ConfigureContext::new(
            Arc::clone(&device) as Arc<dyn zigbee_core::ZclDevice>,
            BindTarget::Endpoint {
                ieee_address: [0; 8],
                endpoint: 1,
            },
        )
        .with_endpoint_names(names);

        let report = run_configure(&definition.configure, Arc::new(ctx), &RetryPolicy::default()).await;
        assert!(report.is_success());
        let binds = device
            .calls()
            .iter()
            .filter(|call| matches!(call, StackCall::Bind { .. }))
            .count();
        assert_eq!(binds, 2);
    }

    #[tokio::test]
    async fn test_child_lock_configures_keypad_reporting() {
        let definition = DefinitionBuilder::new("TRV", "Acme", "Valve")
            .zigbee_model("TRV")
            .extend(child_lock())
            .build()
            .unwrap();
        let device = Arc::new(RecordingDevice::new(
            ZigbeeDevice::new([0x24; 8], 0x24).with_endpoint(Endpoint::new(1, &[0x0201, 0x0204], &[])),
        ));
        let ctx = ConfigureContext::new(
            Arc::clone(&device) as Arc<dyn zigbee_core::ZclDevice>,
            BindTarget::Endpoint {
                ieee_address: [0; 8],
                endpoint: 1,
            },
        );
        let report = run_configure(&definition.configure, Arc::new(ctx), &RetryPolicy::default()).await;
        assert!(report.is_success());

        let calls = device.calls();
        assert!(matches!(&calls[0], StackCall::Bind { cluster, .. } if cluster == "hvacUserInterfaceCfg"));
        match &calls[1] {
            StackCall::ConfigureReporting { cluster, items, .. } => {
                assert_eq!(cluster, "hvacUserInterfaceCfg");
                assert_eq!(items[0].attribute.key(), "keypadLockout");
                assert_eq!(items[0].reportable_change, ReportableChange::Discrete);
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_child_lock_reporting_is_optional() {
        let definition = DefinitionBuilder::new("TRV", "Acme", "Valve")
            .zigbee_model("TRV")
            .extend(child_lock())
            .build()
            .unwrap();
        let device = Arc::new(RecordingDevice::new(
            ZigbeeDevice::new([0x25; 8], 0x25).with_endpoint(Endpoint::new(1, &[0x0204], &[])),
        ));
        device.recording_endpoint(1).unwrap().fail_attribute(
            "hvacUserInterfaceCfg",
            "keypadLockout",
            StackError::UnsupportedAttribute {
                cluster: "hvacUserInterfaceCfg".to_string(),
                attribute: "keypadLockout".to_string(),
            },
        );
        let ctx = ConfigureContext::new(
            Arc::clone(&device) as Arc<dyn zigbee_core::ZclDevice>,
            BindTarget::Endpoint {
                ieee_address: [0; 8],
                endpoint: 1,
            },
        );
        let report = run_configure(&definition.configure, Arc::new(ctx), &RetryPolicy::default()).await;
        assert!(report.is_success());
    }
}
