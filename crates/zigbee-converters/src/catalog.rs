//! Definition catalog
//!
//! Holds assembled definitions and resolves the one serving a physical device.
//! Later registrations win every lookup they take part in.

use crate::definition::Definition;
use crate::fingerprint::WhiteLabel;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use zigbee_core::ZigbeeDevice;

/// Result of a catalog lookup
#[derive(Debug, Clone)]
pub struct DefinitionMatch {
    pub definition: Arc<Definition>,
    /// Set when the device was recognised as a re-branded variant
    pub white_label: Option<WhiteLabel>,
}

impl DefinitionMatch {
    fn plain(definition: Arc<Definition>) -> Self {
        Self {
            definition,
            white_label: None,
        }
    }

    #[must_use]
    pub fn model(&self) -> &str {
        self.white_label
            .as_ref()
            .map_or(&self.definition.model, |wl| &wl.model)
    }

    #[must_use]
    pub fn vendor(&self) -> &str {
        self.white_label
            .as_ref()
            .map_or(&self.definition.vendor, |wl| &wl.vendor)
    }

    #[must_use]
    pub fn description(&self) -> &str {
        self.white_label
            .as_ref()
            .and_then(|wl| wl.description.as_deref())
            .unwrap_or(&self.definition.description)
    }
}

struct Entry {
    definition: Arc<Definition>,
    sequence: u64,
}

/// Registry of device definitions
#[derive(Default)]
pub struct Catalog {
    /// Keyed by model name
    definitions: DashMap<String, Entry>,
    sequence: AtomicU64,
}

fn zigbee_model_key(model: &str) -> String {
    model.to_lowercase()
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from definitions in registration order
    #[must_use]
    pub fn with_definitions(definitions: impl IntoIterator<Item = Definition>) -> Self {
        let catalog = Self::new();
        for definition in definitions {
            catalog.add(definition);
        }
        catalog
    }

    /// Register a definition, replacing any earlier one with the same model
    pub fn add(&self, definition: Definition) -> Arc<Definition> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let definition = Arc::new(definition);
        let replaced = self
            .definitions
            .insert(
                definition.model.clone(),
                Entry {
                    definition: Arc::clone(&definition),
                    sequence,
                },
            )
            .is_some();
        if replaced {
            tracing::info!("Replaced definition {}", definition.model);
        } else {
            tracing::debug!("Added definition {}", definition.model);
        }
        definition
    }

    pub fn remove(&self, model: &str) -> Option<Arc<Definition>> {
        self.definitions.remove(model).map(|(_, entry)| entry.definition)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// All definitions, oldest registration first
    #[must_use]
    pub fn definitions(&self) -> Vec<Arc<Definition>> {
        let mut entries: Vec<(u64, Arc<Definition>)> = self
            .definitions
            .iter()
            .map(|entry| (entry.sequence, Arc::clone(&entry.definition)))
            .collect();
        entries.sort_by_key(|(sequence, _)| *sequence);
        entries.into_iter().map(|(_, definition)| definition).collect()
    }

    /// Definition declaring `zigbee_model`, compared case-insensitively.
    ///
    /// Some firmwares pad the model id with NUL bytes; those are trimmed when
    /// the exact lookup misses.
    #[must_use]
    pub fn find_by_zigbee_model(&self, zigbee_model: &str) -> Option<Arc<Definition>> {
        self.lookup_zigbee_model(&zigbee_model_key(zigbee_model))
            .or_else(|| {
                let trimmed = zigbee_model.trim_end_matches('\0').trim_end();
                (trimmed.len() != zigbee_model.len())
                    .then(|| self.lookup_zigbee_model(&zigbee_model_key(trimmed)))
                    .flatten()
            })
    }

    fn lookup_zigbee_model(&self, key: &str) -> Option<Arc<Definition>> {
        self.definitions
            .iter()
            .filter(|entry| {
                entry
                    .definition
                    .zigbee_model
                    .iter()
                    .any(|m| zigbee_model_key(m) == key)
            })
            .max_by_key(|entry| entry.sequence)
            .map(|entry| Arc::clone(&entry.definition))
    }

    /// Definition serving `device`.
    ///
    /// Fingerprints are tried first, highest priority then newest
    /// registration; the Basic cluster model id is the fallback.
    #[must_use]
    pub fn find_by_device(&self, device: &ZigbeeDevice) -> Option<DefinitionMatch> {
        let mut best: Option<(i32, u64, DefinitionMatch)> = None;
        for entry in self.definitions.iter() {
            let definition = &entry.definition;
            let own = definition
                .fingerprint
                .iter()
                .filter(|fp| fp.matches(device))
                .map(|fp| (fp.priority, None));
            let labelled = definition.white_label.iter().flat_map(|wl| {
                wl.fingerprint
                    .iter()
                    .filter(|fp| fp.matches(device))
                    .map(move |fp| (fp.priority, Some(wl.clone())))
            });
            for (priority, white_label) in own.chain(labelled) {
                let better = best.as_ref().map_or(true, |(p, s, _)| {
                    (priority, entry.sequence) > (*p, *s)
                });
                if better {
                    best = Some((
                        priority,
                        entry.sequence,
                        DefinitionMatch {
                            definition: Arc::clone(definition),
                            white_label,
                        },
                    ));
                }
            }
        }
        if let Some((_, _, found)) = best {
            return Some(found);
        }

        let model_id = device.model_id.as_deref()?;
        self.find_by_zigbee_model(model_id).map(DefinitionMatch::plain)
    }

    /// Definition by model name, including white-label models
    #[must_use]
    pub fn find_by_model(&self, model: &str) -> Option<DefinitionMatch> {
        if let Some(entry) = self.definitions.get(model) {
            return Some(DefinitionMatch::plain(Arc::clone(&entry.definition)));
        }
        self.definitions
            .iter()
            .filter_map(|entry| {
                entry
                    .definition
                    .white_label
                    .iter()
                    .find(|wl| wl.model == model)
                    .map(|wl| (entry.sequence, Arc::clone(&entry.definition), wl.clone()))
            })
            .max_by_key(|(sequence, _, _)| *sequence)
            .map(|(_, definition, white_label)| DefinitionMatch {
                definition,
                white_label: Some(white_label),
            })
    }
}
