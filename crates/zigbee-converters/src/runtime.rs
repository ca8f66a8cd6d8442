//! Converter runtime
//!
//! Owns the catalog and one [`DeviceSession`] per attached device. Requests
//! are routed by IEEE address; session events are re-broadcast on a single
//! runtime channel.

use crate::catalog::Catalog;
use crate::config::ConverterConfig;
use crate::configure::ConfigureReport;
use crate::error::{AssemblyError, CatalogError, ConvertError};
use crate::generate::generate_declaration;
use crate::model::DeclaredDefinition;
use crate::persistence;
use crate::session::{DeviceSession, SessionEvent};
use crate::state::State;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use zigbee_core::{format_ieee_address, BindTarget, ZclDevice, ZclMessage};

pub struct ConverterRuntime {
    config: ConverterConfig,
    catalog: Arc<Catalog>,
    /// Sessions keyed by colon separated IEEE address
    sessions: Arc<DashMap<String, Arc<DeviceSession>>>,
    /// Declarations generated for devices missing from the catalog
    generated: DashMap<String, DeclaredDefinition>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl ConverterRuntime {
    #[must_use]
    pub fn new(config: ConverterConfig, catalog: Arc<Catalog>) -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self {
            config,
            catalog,
            sessions: Arc::new(DashMap::new()),
            generated: DashMap::new(),
            event_tx,
        }
    }

    /// Create a runtime whose catalog is read from the configured file.
    ///
    /// Declarations that fail to assemble are logged and skipped.
    pub async fn load(config: ConverterConfig) -> Self {
        let catalog = Catalog::new();
        for declared in persistence::load_definitions(&config.catalog_path()).await {
            match declared.assemble() {
                Ok(definition) => {
                    catalog.add(definition);
                }
                Err(e) => tracing::warn!("Skipping definition {}: {}", declared.model, e),
            }
        }
        tracing::info!("Catalog ready with {} definitions", catalog.len());
        Self::new(config, Arc::new(catalog))
    }

    #[must_use]
    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Attach a device, generating a definition when the catalog has none
    pub fn attach(&self, device: Arc<dyn ZclDevice>) -> Result<Arc<DeviceSession>, AssemblyError> {
        let info = device.info();
        let ieee = info.ieee_address_string();

        let definition = match self.catalog.find_by_device(info) {
            Some(found) => {
                tracing::info!(
                    "Attached {} as {} ({})",
                    info.display_name(),
                    found.model(),
                    found.vendor()
                );
                found.definition
            }
            None => {
                let mut declared = generate_declaration(info);
                declared.merge_policy = Some(self.config.merge_policy);
                let definition = declared.builder().generated(true).build()?;
                tracing::info!(
                    "No definition for {}, generated one with extends {:?}",
                    info.display_name(),
                    definition.extends
                );
                self.generated.insert(ieee.clone(), declared);
                Arc::new(definition)
            }
        };

        let session = Arc::new(DeviceSession::new(
            definition,
            device,
            self.config.store_capacity,
        ));
        self.forward_events(&session);
        if let Some(previous) = self.sessions.insert(ieee.clone(), Arc::clone(&session)) {
            tracing::debug!("Replaced session for {} ({})", ieee, previous.definition().model);
        }
        Ok(session)
    }

    /// Relay a session's events onto the runtime channel until the session goes away
    fn forward_events(&self, session: &Arc<DeviceSession>) {
        let mut rx = session.subscribe();
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let _ = tx.send(event);
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Session event relay lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Drop the session of a device that left
    pub fn detach(&self, ieee: &str) -> Option<Arc<DeviceSession>> {
        let removed = self.sessions.remove(ieee).map(|(_, session)| session);
        if removed.is_some() {
            tracing::info!("Detached {}", ieee);
        }
        removed
    }

    #[must_use]
    pub fn session(&self, ieee: &str) -> Option<Arc<DeviceSession>> {
        self.sessions.get(ieee).map(|s| Arc::clone(s.value()))
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn require(&self, ieee: &str) -> Result<Arc<DeviceSession>, ConvertError> {
        self.session(ieee)
            .ok_or_else(|| ConvertError::DeviceNotFound(ieee.to_string()))
    }

    /// Decode a message from an attached device
    pub async fn handle_message(&self, msg: &ZclMessage) -> Result<State, ConvertError> {
        let ieee = format_ieee_address(&msg.device_ieee);
        let session = self.require(&ieee)?;
        Ok(session.handle_message(msg).await)
    }

    pub async fn set(&self, ieee: &str, request: &State) -> Result<State, ConvertError> {
        self.require(ieee)?.set(request).await
    }

    pub async fn get(&self, ieee: &str, keys: &[&str]) -> Result<(), ConvertError> {
        self.require(ieee)?.get(keys).await
    }

    /// Configure a device with the configured retry policy
    pub async fn configure(
        &self,
        ieee: &str,
        coordinator: BindTarget,
    ) -> Result<ConfigureReport, ConvertError> {
        let session = self.require(ieee)?;
        Ok(session.configure(coordinator, &self.config.retry).await)
    }

    /// Subscribe to events of every session
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    /// Declarations generated so far, for copying into the catalog
    #[must_use]
    pub fn generated_declarations(&self) -> Vec<DeclaredDefinition> {
        self.generated.iter().map(|d| d.value().clone()).collect()
    }

    /// Append generated declarations to the catalog file
    pub async fn save_generated(&self) -> Result<usize, CatalogError> {
        let path = self.config.catalog_path();
        let mut declared = persistence::load_definitions(&path).await;
        let mut added = 0;
        for generated in self.generated_declarations() {
            if declared.iter().all(|d| d.model != generated.model) {
                declared.push(generated);
                added += 1;
            }
        }
        persistence::save_definitions(&path, &declared).await?;
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::DefinitionBuilder;
    use crate::extend::{child_lock, temperature, MeasurementArgs};
    use serde_json::json;
    use zigbee_core::recording::RecordingDevice;
    use zigbee_core::{Endpoint, ZigbeeDevice};

    fn init_tracing() {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
        let _ = tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "zigbee_converters=debug".into()),
            )
            .try_init();
    }

    fn catalog() -> Arc<Catalog> {
        let definition = DefinitionBuilder::new("TRV", "Acme", "Radiator valve")
            .zigbee_model("TRV")
            .extend(temperature(MeasurementArgs::default()))
            .extend(child_lock())
            .build()
            .unwrap();
        Arc::new(Catalog::with_definitions([definition]))
    }

    fn device(ieee: [u8; 8], model: Option<&str>) -> Arc<dyn ZclDevice> {
        let mut info = ZigbeeDevice::new(ieee, 0x1000)
            .with_endpoint(Endpoint::new(1, &[0x0000, 0x0402, 0x0204], &[]));
        if let Some(model) = model {
            info = info.with_model(model);
        }
        Arc::new(RecordingDevice::new(info))
    }

    #[tokio::test]
    async fn test_attach_and_route_message() {
        init_tracing();
        let runtime = ConverterRuntime::new(ConverterConfig::default(), catalog());
        let session = runtime.attach(device([0x61; 8], Some("TRV"))).unwrap();
        assert!(!session.definition().generated);
        assert_eq!(runtime.session_count(), 1);

        let mut events = runtime.subscribe();
        let msg = ZclMessage::attribute_report("msTemperatureMeasurement", 1, json!({"measuredValue": 1900}))
            .from_device([0x61; 8]);
        let state = runtime.handle_message(&msg).await.unwrap();
        assert_eq!(state.get("temperature"), Some(&json!(19)));
        assert!(matches!(events.recv().await.unwrap(), SessionEvent::StateChanged { .. }));

        let ieee = format_ieee_address(&[0x61; 8]);
        let confirmed = runtime
            .set(&ieee, json!({"child_lock": "LOCK"}).as_object().unwrap())
            .await
            .unwrap();
        assert_eq!(confirmed.get("child_lock"), Some(&json!("LOCK")));

        assert!(runtime.detach(&ieee).is_some());
        assert_eq!(
            runtime.handle_message(&msg).await,
            Err(ConvertError::DeviceNotFound(ieee))
        );
    }

    #[tokio::test]
    async fn test_unknown_device_gets_generated_definition() {
        init_tracing();
        let runtime = ConverterRuntime::new(ConverterConfig::default(), catalog());
        let session = runtime.attach(device([0x62; 8], Some("Mystery"))).unwrap();
        assert!(session.definition().generated);
        assert_eq!(session.definition().extends, vec!["temperature"]);
        assert_eq!(runtime.generated_declarations().len(), 1);
    }

    #[tokio::test]
    async fn test_load_and_save_generated() {
        init_tracing();
        let dir = std::env::temp_dir().join(format!("zigbee-runtime-{}", std::process::id()));
        let config = ConverterConfig {
            data_dir: dir.clone(),
            ..ConverterConfig::default()
        };
        let runtime = ConverterRuntime::load(config.clone()).await;
        assert!(runtime.catalog().is_empty());

        runtime.attach(device([0x63; 8], Some("Mystery"))).unwrap();
        assert_eq!(runtime.save_generated().await.unwrap(), 1);

        let reloaded = ConverterRuntime::load(config).await;
        assert!(reloaded.catalog().find_by_zigbee_model("mystery").is_some());

        let _ = std::fs::remove_dir_all(dir);
    }
}
