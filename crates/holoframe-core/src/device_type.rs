//! Catalog of supported display hardware
//!
//! Each hardware model is registered once, keyed by the type tag the driver
//! reports as `hardwareVersion`.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::device::DummyConfiguration;
use crate::layout::LayoutId;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CatalogError {
    #[error("There is no display of type '{0}'")]
    UnknownDeviceType(String),
}

/// Static metadata of one hardware model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceType {
    /// Tag reported by the driver (e.g. "standard")
    pub tag: String,
    /// Human readable model name
    pub name: String,
    /// Quilt layouts the hardware accepts, in preference order
    pub layouts: Vec<LayoutId>,
    /// Configuration used when the model is emulated
    pub dummy: DummyConfiguration,
}

impl DeviceType {
    pub fn new(tag: &str, name: &str, layouts: Vec<LayoutId>) -> Self {
        Self {
            tag: tag.to_string(),
            name: name.to_string(),
            layouts,
            dummy: DummyConfiguration::looking_glass(name, tag),
        }
    }
}

/// Registry of known hardware models
#[derive(Debug, Clone)]
pub struct DeviceTypeCatalog {
    types: Vec<DeviceType>,
}

impl Default for DeviceTypeCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl DeviceTypeCatalog {
    pub fn empty() -> Self {
        Self { types: Vec::new() }
    }

    /// Catalog of all built-in models; layout ids refer to
    /// [`LayoutCatalog::builtin`](crate::layout::LayoutCatalog::builtin)
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.register(DeviceType::new(
            "standard",
            "8.9'' Looking Glass",
            vec![LayoutId(0), LayoutId(1), LayoutId(2)],
        ));
        catalog.register(DeviceType::new(
            "portrait",
            "Looking Glass Portrait",
            vec![LayoutId(3)],
        ));
        catalog
    }

    /// Add a model, replacing any earlier registration of the same tag
    pub fn register(&mut self, device_type: DeviceType) {
        debug!(tag = %device_type.tag, name = %device_type.name, "Registered device type");
        match self.types.iter_mut().find(|t| t.tag == device_type.tag) {
            Some(existing) => *existing = device_type,
            None => self.types.push(device_type),
        }
    }

    pub fn get(&self, tag: &str) -> Result<&DeviceType, CatalogError> {
        self.types
            .iter()
            .find(|t| t.tag == tag)
            .ok_or_else(|| CatalogError::UnknownDeviceType(tag.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceType> {
        self.types.iter()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::LayoutCatalog;

    #[test]
    fn test_builtin_types() {
        let catalog = DeviceTypeCatalog::builtin();
        assert_eq!(catalog.len(), 2);

        let standard = catalog.get("standard").unwrap();
        assert_eq!(standard.name, "8.9'' Looking Glass");
        assert_eq!(standard.layouts.len(), 3);
        assert_eq!(standard.dummy.hardware_type, "standard");

        let portrait = catalog.get("portrait").unwrap();
        assert_eq!(portrait.dummy.name, "Looking Glass Portrait");
    }

    #[test]
    fn test_builtin_layouts_resolve() {
        let layouts = LayoutCatalog::builtin();
        for device_type in DeviceTypeCatalog::builtin().iter() {
            for id in &device_type.layouts {
                assert!(layouts.get(*id).is_some(), "{} references missing layout {}", device_type.tag, id);
            }
        }
        let portrait = DeviceTypeCatalog::builtin();
        let layout = layouts.get(portrait.get("portrait").unwrap().layouts[0]).unwrap();
        assert_eq!((layout.columns, layout.rows), (8, 6));
    }

    #[test]
    fn test_unknown_type() {
        let catalog = DeviceTypeCatalog::builtin();
        assert_eq!(
            catalog.get("holographic-toaster"),
            Err(CatalogError::UnknownDeviceType("holographic-toaster".to_string()))
        );
    }

    #[test]
    fn test_register_replaces_tag() {
        let mut catalog = DeviceTypeCatalog::builtin();
        catalog.register(DeviceType::new("portrait", "Portrait Rev B", vec![LayoutId(3)]));
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("portrait").unwrap().name, "Portrait Rev B");

        catalog.register(DeviceType::new("large", "15.6'' Looking Glass", vec![LayoutId(1)]));
        assert_eq!(catalog.len(), 3);
    }
}
