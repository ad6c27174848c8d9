//! Directory of device definition files
//!
//! Every `*.yaml`, `*.yml` or `*.json` file in the directory holds one
//! [`DeviceDefinition`]. Files that fail to parse or validate are logged
//! and skipped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::{DeviceDefinition, DeviceLibrary};
use crate::error::{GatewayError, Result};

#[derive(Debug)]
pub struct FileLibrary {
    dir: PathBuf,
    devices: HashMap<(u32, u32), Arc<DeviceDefinition>>,
}

impl FileLibrary {
    /// Load every definition in `dir`
    pub async fn load(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut entries = tokio::fs::read_dir(&dir).await.map_err(|e| {
            GatewayError::io(format!(
                "failed to read library directory {}: {}",
                dir.display(),
                e
            ))
        })?;

        let mut devices = HashMap::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GatewayError::io(format!("failed to read directory entry: {}", e)))?
        {
            let path = entry.path();
            let format = match path.extension().and_then(|s| s.to_str()) {
                Some("yaml") | Some("yml") => Format::Yaml,
                Some("json") => Format::Json,
                _ => continue,
            };

            match load_file(&path, format).await {
                Ok(definition) => {
                    let key = (definition.manufacturer_id, definition.product_id);
                    info!(
                        "Loaded device definition {} ({} {}) from {}",
                        definition.product_code(),
                        definition.manufacturer,
                        definition.product,
                        path.display()
                    );
                    if devices.insert(key, Arc::new(definition)).is_some() {
                        warn!(
                            "{} redefines an already loaded product, keeping the later file",
                            path.display()
                        );
                    }
                },
                Err(e) => warn!("Skipping device definition {}: {}", path.display(), e),
            }
        }

        info!(
            "Device library {}: {} definitions",
            dir.display(),
            devices.len()
        );
        Ok(Self { dir, devices })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

impl DeviceLibrary for FileLibrary {
    fn find_device(&self, manufacturer_id: u32, product_id: u32) -> Option<Arc<DeviceDefinition>> {
        self.devices.get(&(manufacturer_id, product_id)).cloned()
    }
}

#[derive(Clone, Copy)]
enum Format {
    Yaml,
    Json,
}

async fn load_file(path: &Path, format: Format) -> Result<DeviceDefinition> {
    let text = tokio::fs::read_to_string(path).await?;
    match format {
        Format::Yaml => DeviceDefinition::from_yaml_str(&text),
        Format::Json => DeviceDefinition::from_json_str(&text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[tokio::test]
    #[traced_test]
    async fn test_load_directory_skips_invalid() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("meter.yaml"),
            "manufacturer_id: 1\nproduct_id: 2\nproduct: Meter\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("switch.json"),
            r#"{"manufacturer_id": 3, "product_id": 4}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.yml"), "manufacturer_id: [").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let lib = FileLibrary::load(dir.path()).await.unwrap();
        assert_eq!(lib.len(), 2);
        assert_eq!(lib.find_device(1, 2).unwrap().product, "Meter");
        assert!(lib.find_device(3, 4).is_some());
        assert!(logs_contain("Skipping device definition"));
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileLibrary::load(dir.path().join("nope")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Io(_)));
    }
}
