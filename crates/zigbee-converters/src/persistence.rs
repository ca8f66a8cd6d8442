//! Declared definition persistence using JSON file storage

use crate::error::CatalogError;
use crate::model::DeclaredDefinition;
use std::path::Path;
use tokio::fs;

/// Load declared definitions from a JSON file
pub async fn load_definitions(path: &Path) -> Vec<DeclaredDefinition> {
    match fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str::<Vec<DeclaredDefinition>>(&contents) {
            Ok(definitions) => {
                tracing::info!("Loaded {} definitions from {:?}", definitions.len(), path);
                definitions
            }
            Err(e) => {
                tracing::warn!("Failed to parse definitions file {:?}: {}", path, e);
                Vec::new()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No definitions file found at {:?}", path);
            Vec::new()
        }
        Err(e) => {
            tracing::warn!("Failed to read definitions file {:?}: {}", path, e);
            Vec::new()
        }
    }
}

/// Save declared definitions to a JSON file atomically
#[allow(clippy::missing_errors_doc)]
pub async fn save_definitions(
    path: &Path,
    definitions: &[DeclaredDefinition],
) -> Result<(), CatalogError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let json = serde_json::to_string_pretty(definitions)?;

    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, &json).await?;
    fs::rename(&tmp_path, path).await?;

    tracing::debug!("Saved {} definitions to {:?}", definitions.len(), path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extend::MeasurementArgs;
    use crate::model::ExtendSpec;

    fn scratch(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("zigbee-converters-{}-{}", name, std::process::id()))
            .join("definitions.json")
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let path = scratch("roundtrip");
        let declared = vec![DeclaredDefinition::new("TH01", "Acme", "Climate sensor")
            .with_zigbee_model("TH01")
            .with_extend(ExtendSpec::Temperature(MeasurementArgs::default()))];

        save_definitions(&path, &declared).await.unwrap();
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(load_definitions(&path).await, declared);

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }

    #[tokio::test]
    async fn test_missing_or_corrupt_file_loads_empty() {
        let path = scratch("corrupt");
        assert!(load_definitions(&path).await.is_empty());

        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_definitions(&path).await.is_empty());

        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
