//! Explicit owner of all registry state

use holoframe_core::{DeviceId, DeviceTypeCatalog, LayoutCatalog};
use holoframe_driver::{ServiceKind, TransportOptions};
use tracing::info;

use crate::device_registry::{DeviceRegistry, RegistryError};
use crate::service_registry::{ServiceRegistry, SharedService};

/// Services, devices and the layout catalog of one application
pub struct Context {
    pub services: ServiceRegistry,
    pub devices: DeviceRegistry,
    pub layouts: LayoutCatalog,
}

impl Default for Context {
    fn default() -> Self {
        Self::new(DeviceTypeCatalog::builtin(), LayoutCatalog::builtin())
    }
}

impl Context {
    pub fn new(types: DeviceTypeCatalog, layouts: LayoutCatalog) -> Self {
        Self {
            services: ServiceRegistry::new(),
            devices: DeviceRegistry::new(types),
            layouts,
        }
    }

    /// Add a driver service, bind it to the device registry and connect it
    ///
    /// The service stays registered and bound when the connection fails, so
    /// the caller can retry `connect` on it.
    pub async fn connect_default(
        &mut self,
        options: &TransportOptions,
    ) -> Result<SharedService, RegistryError> {
        let service = self.services.add(ServiceKind::HoloPlayService, options).await?;
        self.devices.bind_service(service.clone());
        service.lock().await.connect().await?;
        Ok(service)
    }

    pub async fn refresh(&mut self) -> Result<(), RegistryError> {
        self.devices.refresh(&self.layouts).await
    }

    pub fn add_emulated(&mut self, exclude: &[String]) -> Vec<DeviceId> {
        self.devices.add_emulated(exclude, &self.layouts)
    }

    /// Close every service; devices keep their state but lose their service
    pub async fn shutdown(&mut self) {
        self.devices.unbind_service();
        self.services.close_all().await;
        info!("Context shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_registry::DeviceFilter;
    use holoframe_driver::testing::{sample_report, FakeDriver};
    use std::time::Duration;

    #[tokio::test]
    async fn test_connect_default_and_refresh() {
        let driver = FakeDriver::start().await;
        driver.set_devices(vec![sample_report("LKG-A", "standard", 0)]);

        let mut context = Context::default();
        let service = context.connect_default(&driver.options()).await.unwrap();
        assert!(context.services.is_active(&service));
        assert!(service.lock().await.is_ready());
        drop(service);

        context.refresh().await.unwrap();
        context.add_emulated(&[]);
        assert_eq!(context.devices.count(&DeviceFilter::connected()), 1);
        assert_eq!(context.devices.count(&DeviceFilter::emulated()), 2);

        context.shutdown().await;
        assert!(context.services.is_empty());
        let device = context.devices.get_active().unwrap();
        assert!(device.service().is_none());
        assert_eq!(device.serial(), "LKG-A");
    }

    #[tokio::test]
    async fn test_connect_default_refused() {
        let mut context = Context::default();
        let options = TransportOptions {
            address: "ipc:///nonexistent/holoframe/driver.ipc".to_string(),
            timeout: Duration::from_millis(100),
        };

        assert!(matches!(
            context.connect_default(&options).await,
            Err(RegistryError::Service(_))
        ));
        assert_eq!(context.services.len(), 1);
        // Refresh degrades to a no-op
        context.refresh().await.unwrap();
        assert!(context.devices.is_empty());
    }
}
