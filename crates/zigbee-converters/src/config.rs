//! Runtime configuration

use crate::configure::RetryPolicy;
use crate::state::MergePolicy;
use crate::store::DEFAULT_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Settings of a [`crate::runtime::ConverterRuntime`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    /// Directory holding the catalog file
    pub data_dir: PathBuf,
    pub catalog_file: String,
    /// Retries of configure steps that hit transient failures
    pub retry: RetryPolicy,
    /// Default merge policy for generated definitions
    pub merge_policy: MergePolicy,
    /// Correlation store entries per device
    pub store_capacity: usize,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            catalog_file: "definitions.json".to_string(),
            retry: RetryPolicy::default(),
            merge_policy: MergePolicy::default(),
            store_capacity: DEFAULT_CAPACITY,
        }
    }
}

impl ConverterConfig {
    /// Read overrides from `DATA_DIR`, `CONFIGURE_MAX_ATTEMPTS`,
    /// `CONFIGURE_BACKOFF_MS` and `STORE_CAPACITY`
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let data_dir = lookup("DATA_DIR").map_or(defaults.data_dir, PathBuf::from);
        let max_attempts = parse_or(
            &lookup,
            "CONFIGURE_MAX_ATTEMPTS",
            defaults.retry.max_attempts,
        )
        .max(1);
        let backoff_ms = parse_or(
            &lookup,
            "CONFIGURE_BACKOFF_MS",
            u64::try_from(defaults.retry.backoff.as_millis()).unwrap_or(500),
        );
        let store_capacity = parse_or(&lookup, "STORE_CAPACITY", defaults.store_capacity);

        Self {
            data_dir,
            retry: RetryPolicy {
                max_attempts,
                backoff: Duration::from_millis(backoff_ms),
            },
            store_capacity,
            ..defaults
        }
    }

    /// Full path of the catalog file
    #[must_use]
    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(&self.catalog_file)
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> T {
    match lookup(name) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Invalid {} value '{}', using default", name, raw);
            default
        }),
    }
}
