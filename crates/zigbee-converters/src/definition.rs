//! Device definitions and their assembly
//!
//! A [`Definition`] is built once by [`DefinitionBuilder::build`] from extend
//! fragments and directly declared converters, then shared immutably by all
//! sessions of matching devices.
//!
//! Assembly order: extends in declaration order, then the directly declared
//! parts. Inbound converters, exposes and configure steps are concatenated.
//! Outbound keys are checked for collisions (see [`KeyPrecedence`]) and the
//! generic `read`/`write`/`command` converters are appended for keys nobody
//! claimed.

use crate::configure::ConfigureStep;
use crate::error::AssemblyError;
use crate::exposes::{presets, Expose};
use crate::extend::Extend;
use crate::fingerprint::{Fingerprint, WhiteLabel};
use crate::fz::{FromZigbee, FzRegistry};
use crate::state::MergePolicy;
use crate::tz::{KeyPrecedence, RawConverter, ToZigbee};
use crate::utils::VoltageCurve;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use zigbee_core::ZigbeeDevice;

/// Battery handling hints
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryMeta {
    /// Derive the percentage from the voltage instead of the reported percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voltage_to_percentage: Option<VoltageCurve>,
    /// The device reports 0-100 instead of 0-200 half percent steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dont_divide_percentage: Option<bool>,
}

/// Behaviour flags of a definition
///
/// Every field is optional so that extends can contribute defaults the
/// definition leaves unset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionMeta {
    /// Suffix published properties with the endpoint name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_endpoint: Option<bool>,
    /// Properties published without suffix on multi endpoint devices
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_endpoint_skip: Option<Vec<String>>,
    /// Key to endpoint overrides for set/get routing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multi_endpoint_enforce: Option<BTreeMap<String, u8>>,
    /// Publish retransmitted messages instead of dropping them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publish_duplicate_transaction: Option<bool>,
    /// Do not publish `action_group` for group commands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_action_group: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery: Option<BatteryMeta>,
    /// Manufacturer code sent with vendor specific attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer_code: Option<u16>,
}

impl DefinitionMeta {
    /// Take the fields of `other` that are unset here
    pub fn fill_from(&mut self, other: &DefinitionMeta) {
        fn fill<T: Clone>(slot: &mut Option<T>, other: &Option<T>) {
            if slot.is_none() {
                slot.clone_from(other);
            }
        }
        fill(&mut self.multi_endpoint, &other.multi_endpoint);
        fill(&mut self.multi_endpoint_skip, &other.multi_endpoint_skip);
        fill(&mut self.multi_endpoint_enforce, &other.multi_endpoint_enforce);
        fill(
            &mut self.publish_duplicate_transaction,
            &other.publish_duplicate_transaction,
        );
        fill(&mut self.disable_action_group, &other.disable_action_group);
        fill(&mut self.battery, &other.battery);
        fill(&mut self.manufacturer_code, &other.manufacturer_code);
    }

    #[must_use]
    pub fn publish_duplicate_transaction(&self) -> bool {
        self.publish_duplicate_transaction.unwrap_or(false)
    }

    #[must_use]
    pub fn multi_endpoint(&self) -> bool {
        self.multi_endpoint.unwrap_or(false)
    }

    #[must_use]
    pub fn disable_action_group(&self) -> bool {
        self.disable_action_group.unwrap_or(false)
    }

    #[must_use]
    pub fn skips_multi_endpoint(&self, property: &str) -> bool {
        self.multi_endpoint_skip
            .as_ref()
            .is_some_and(|skip| skip.iter().any(|p| p == property))
    }

    /// Endpoint a key is pinned to, if any
    #[must_use]
    pub fn enforced_endpoint(&self, key: &str) -> Option<u8> {
        self.multi_endpoint_enforce
            .as_ref()
            .and_then(|enforce| enforce.get(key).copied())
    }
}

type EndpointFn = dyn Fn(&ZigbeeDevice) -> BTreeMap<String, u8> + Send + Sync;

/// Logical endpoint names of a definition
#[derive(Clone)]
pub enum EndpointMap {
    Static(BTreeMap<String, u8>),
    /// Computed from the live device, for variable topologies
    Dynamic(Arc<EndpointFn>),
}

impl EndpointMap {
    #[must_use]
    pub fn from_pairs(pairs: &[(&str, u8)]) -> Self {
        Self::Static(
            pairs
                .iter()
                .map(|(name, id)| ((*name).to_string(), *id))
                .collect(),
        )
    }

    pub fn dynamic<F>(resolve: F) -> Self
    where
        F: Fn(&ZigbeeDevice) -> BTreeMap<String, u8> + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(resolve))
    }

    #[must_use]
    pub fn resolve(&self, device: &ZigbeeDevice) -> BTreeMap<String, u8> {
        match self {
            Self::Static(map) => map.clone(),
            Self::Dynamic(resolve) => resolve(device),
        }
    }
}

impl fmt::Debug for EndpointMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(map) => f.debug_tuple("Static").field(map).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

/// An assembled, immutable device definition
pub struct Definition {
    pub model: String,
    pub vendor: String,
    pub description: String,
    pub zigbee_model: Vec<String>,
    pub fingerprint: Vec<Fingerprint>,
    pub white_label: Vec<WhiteLabel>,
    pub from_zigbee: FzRegistry,
    pub to_zigbee: Vec<Arc<dyn ToZigbee>>,
    pub exposes: Vec<Expose>,
    pub configure: Vec<ConfigureStep>,
    /// User options understood by the converters, unique by name
    pub options: Vec<Expose>,
    pub meta: DefinitionMeta,
    pub endpoints: Option<EndpointMap>,
    pub merge_policy: MergePolicy,
    /// Names of the extends this definition was assembled from
    pub extends: Vec<String>,
    /// Built on the fly for an unknown device
    pub generated: bool,
    key_owners: HashMap<String, Vec<usize>>,
}

impl fmt::Debug for Definition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Definition")
            .field("model", &self.model)
            .field("vendor", &self.vendor)
            .field("zigbee_model", &self.zigbee_model)
            .field("extends", &self.extends)
            .field("generated", &self.generated)
            .finish_non_exhaustive()
    }
}

impl Definition {
    /// Endpoint names resolved against `device`; empty without a map
    #[must_use]
    pub fn endpoint_names(&self, device: &ZigbeeDevice) -> BTreeMap<String, u8> {
        self.endpoints
            .as_ref()
            .map(|map| map.resolve(device))
            .unwrap_or_default()
    }

    /// Outbound converter for `key` addressed to `endpoint_name`.
    ///
    /// Cooperative claimants are tried in registration order; a request
    /// without endpoint falls back to the first claimant.
    #[must_use]
    pub fn find_to_zigbee(&self, key: &str, endpoint_name: Option<&str>) -> Option<&Arc<dyn ToZigbee>> {
        let owners = self.key_owners.get(key)?;
        let mut claimants = owners.iter().filter_map(|i| self.to_zigbee.get(*i));
        if let Some(found) = claimants.clone().find(|c| c.serves_endpoint(endpoint_name)) {
            return Some(found);
        }
        if endpoint_name.is_none() {
            return claimants.next();
        }
        None
    }

    /// All outbound keys, sorted
    #[must_use]
    pub fn to_zigbee_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.key_owners.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

/// Builder for [`Definition`]
pub struct DefinitionBuilder {
    model: String,
    vendor: String,
    description: String,
    zigbee_model: Vec<String>,
    fingerprint: Vec<Fingerprint>,
    white_label: Vec<WhiteLabel>,
    extends: Vec<Extend>,
    from_zigbee: Vec<Arc<dyn FromZigbee>>,
    to_zigbee: Vec<Arc<dyn ToZigbee>>,
    exposes: Vec<Expose>,
    configure: Vec<ConfigureStep>,
    meta: DefinitionMeta,
    endpoints: Option<EndpointMap>,
    merge_policy: MergePolicy,
    generated: bool,
}

impl DefinitionBuilder {
    #[must_use]
    pub fn new(model: &str, vendor: &str, description: &str) -> Self {
        Self {
            model: model.to_string(),
            vendor: vendor.to_string(),
            description: description.to_string(),
            zigbee_model: Vec::new(),
            fingerprint: Vec::new(),
            white_label: Vec::new(),
            extends: Vec::new(),
            from_zigbee: Vec::new(),
            to_zigbee: Vec::new(),
            exposes: Vec::new(),
            configure: Vec::new(),
            meta: DefinitionMeta::default(),
            endpoints: None,
            merge_policy: MergePolicy::default(),
            generated: false,
        }
    }

    #[must_use]
    pub fn zigbee_model(mut self, model: &str) -> Self {
        self.zigbee_model.push(model.to_string());
        self
    }

    #[must_use]
    pub fn fingerprint(mut self, fingerprint: Fingerprint) -> Self {
        self.fingerprint.push(fingerprint);
        self
    }

    #[must_use]
    pub fn white_label(mut self, white_label: WhiteLabel) -> Self {
        self.white_label.push(white_label);
        self
    }

    #[must_use]
    pub fn extend(mut self, extend: Extend) -> Self {
        self.extends.push(extend);
        self
    }

    #[must_use]
    pub fn from_zigbee(mut self, converter: impl FromZigbee + 'static) -> Self {
        self.from_zigbee.push(Arc::new(converter));
        self
    }

    #[must_use]
    pub fn to_zigbee(mut self, converter: impl ToZigbee + 'static) -> Self {
        self.to_zigbee.push(Arc::new(converter));
        self
    }

    #[must_use]
    pub fn expose(mut self, expose: Expose) -> Self {
        self.exposes.push(expose);
        self
    }

    #[must_use]
    pub fn configure(mut self, step: ConfigureStep) -> Self {
        self.configure.push(step);
        self
    }

    #[must_use]
    pub fn meta(mut self, meta: DefinitionMeta) -> Self {
        self.meta = meta;
        self
    }

    #[must_use]
    pub fn endpoints(mut self, endpoints: EndpointMap) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    #[must_use]
    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }

    #[must_use]
    pub fn generated(mut self, generated: bool) -> Self {
        self.generated = generated;
        self
    }

    /// Assemble the definition, failing on conflicting registrations
    pub fn build(self) -> Result<Definition, AssemblyError> {
        let model = self.model;
        if self.zigbee_model.is_empty() && self.fingerprint.is_empty() {
            return Err(AssemblyError::NoMatcher(model));
        }

        let mut from_zigbee = Vec::new();
        let mut to_zigbee: Vec<Arc<dyn ToZigbee>> = Vec::new();
        let mut exposes = Vec::new();
        let mut configure = Vec::new();
        let mut meta = self.meta;
        let mut endpoints = self.endpoints;
        let mut extend_names = Vec::with_capacity(self.extends.len());
        let mut needs_map: Option<String> = None;

        for extend in self.extends {
            if let Some(map) = extend.endpoints {
                if endpoints.is_some() {
                    return Err(AssemblyError::MultipleEndpointMaps(model));
                }
                endpoints = Some(map);
            }
            if let Some(extend_meta) = &extend.meta {
                meta.fill_from(extend_meta);
            }
            from_zigbee.extend(extend.from_zigbee);
            to_zigbee.extend(extend.to_zigbee);
            exposes.extend(extend.exposes);
            configure.extend(extend.configure);
            if extend.requires_endpoint_map && needs_map.is_none() {
                needs_map = Some(extend.name.clone());
            }
            extend_names.push(extend.name);
        }

        if let (None, Some(extend)) = (&endpoints, needs_map) {
            return Err(AssemblyError::MissingEndpointMap { model, extend });
        }

        from_zigbee.extend(self.from_zigbee);
        to_zigbee.extend(self.to_zigbee);
        exposes.extend(self.exposes);
        configure.extend(self.configure);

        let mut key_owners: HashMap<String, Vec<usize>> = HashMap::new();
        for (position, converter) in to_zigbee.iter().enumerate() {
            for key in converter.keys() {
                claim_key(&model, &mut key_owners, &to_zigbee, key, position)?;
            }
        }
        for raw in RawConverter::all() {
            if raw.keys().iter().any(|key| key_owners.contains_key(key)) {
                continue;
            }
            let position = to_zigbee.len();
            for key in raw.keys() {
                key_owners.insert(key.clone(), vec![position]);
            }
            to_zigbee.push(Arc::new(raw));
        }

        if !exposes.iter().any(|e| e.has_name("linkquality")) {
            exposes.push(presets::linkquality());
        }
        for expose in &exposes {
            expose
                .validate()
                .map_err(|reason| AssemblyError::InvalidExpose {
                    model: model.clone(),
                    reason,
                })?;
        }

        let mut options: Vec<Expose> = Vec::new();
        let offered = from_zigbee
            .iter()
            .flat_map(|c| c.options().iter())
            .chain(to_zigbee.iter().flat_map(|c| c.options().iter()));
        for option in offered {
            if !options.iter().any(|o| o.name == option.name) {
                options.push(option.clone());
            }
        }

        tracing::debug!(
            "Assembled definition {} ({} inbound, {} outbound, {} exposes)",
            model,
            from_zigbee.len(),
            to_zigbee.len(),
            exposes.len()
        );

        Ok(Definition {
            model,
            vendor: self.vendor,
            description: self.description,
            zigbee_model: self.zigbee_model,
            fingerprint: self.fingerprint,
            white_label: self.white_label,
            from_zigbee: FzRegistry::new(from_zigbee),
            to_zigbee,
            exposes,
            configure,
            options,
            meta,
            endpoints,
            merge_policy: self.merge_policy,
            extends: extend_names,
            generated: self.generated,
            key_owners,
        })
    }
}

/// Register `position` as an owner of `key`, honouring precedence
fn claim_key(
    model: &str,
    key_owners: &mut HashMap<String, Vec<usize>>,
    to_zigbee: &[Arc<dyn ToZigbee>],
    key: &str,
    position: usize,
) -> Result<(), AssemblyError> {
    let claimant = &to_zigbee[position];
    let owners = key_owners.entry(key.to_string()).or_default();
    if owners.is_empty() {
        owners.push(position);
        return Ok(());
    }

    match claimant.precedence() {
        KeyPrecedence::Override => {
            tracing::debug!(
                "Converter {} overrides key {} in definition {}",
                claimant.name(),
                key,
                model
            );
            *owners = vec![position];
            Ok(())
        }
        KeyPrecedence::Cooperative
            if owners
                .iter()
                .all(|i| to_zigbee[*i].precedence() == KeyPrecedence::Cooperative) =>
        {
            // Cooperative owners must split the endpoints between them
            let clash = owners
                .iter()
                .find(|i| endpoints_overlap(to_zigbee[**i].endpoints(), claimant.endpoints()));
            match clash {
                Some(owner) => Err(AssemblyError::DuplicateKey {
                    model: model.to_string(),
                    key: key.to_string(),
                    first: to_zigbee[*owner].name().to_string(),
                    second: claimant.name().to_string(),
                }),
                None => {
                    owners.push(position);
                    Ok(())
                }
            }
        }
        _ => Err(AssemblyError::DuplicateKey {
            model: model.to_string(),
            key: key.to_string(),
            first: to_zigbee[owners[0]].name().to_string(),
            second: claimant.name().to_string(),
        }),
    }
}

/// An unrestricted converter serves every endpoint
fn endpoints_overlap(a: Option<&[String]>, b: Option<&[String]>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.iter().any(|name| b.contains(name)),
        _ => true,
    }
}
