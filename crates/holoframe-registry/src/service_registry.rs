//! Registry of driver services

use holoframe_driver::{Service, ServiceError, ServiceKind, TransportOptions};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A service shared between the registry and the devices it reported.
/// The lock serializes driver round trips on one session.
pub type SharedService = Arc<Mutex<Service>>;

/// Flat list of services plus one active selection
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    services: Vec<SharedService>,
    active: Option<SharedService>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and track a service. It becomes active when there is no
    /// active service or the active one is not ready.
    pub async fn add(
        &mut self,
        kind: ServiceKind,
        options: &TransportOptions,
    ) -> Result<SharedService, ServiceError> {
        let service = Arc::new(Mutex::new(Service::new(kind, options)?));
        self.services.push(service.clone());
        info!(kind = %kind, address = %options.address, "Added service");

        let promote = match &self.active {
            None => true,
            Some(active) => !active.lock().await.is_ready(),
        };
        if promote {
            debug!(kind = %kind, "Service is now active");
            self.active = Some(service.clone());
        }

        Ok(service)
    }

    /// Stop tracking a service; removing an unknown service is a no-op.
    /// The service is not closed here.
    pub fn remove(&mut self, service: &SharedService) -> bool {
        if self.active.as_ref().is_some_and(|a| Arc::ptr_eq(a, service)) {
            self.active = None;
        }

        let before = self.services.len();
        self.services.retain(|s| !Arc::ptr_eq(s, service));
        let removed = self.services.len() != before;
        if removed {
            info!("Removed service");
        } else {
            debug!("Service was not tracked");
        }
        removed
    }

    pub fn active(&self) -> Option<SharedService> {
        self.active.clone()
    }

    pub fn is_active(&self, service: &SharedService) -> bool {
        self.active.as_ref().is_some_and(|a| Arc::ptr_eq(a, service))
    }

    /// Make a tracked service active; returns false if it is not tracked
    pub fn set_active(&mut self, service: &SharedService) -> bool {
        match self.services.iter().find(|s| Arc::ptr_eq(s, service)) {
            Some(tracked) => {
                self.active = Some(tracked.clone());
                true
            }
            None => false,
        }
    }

    pub fn clear_active(&mut self) {
        self.active = None;
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedService> {
        self.services.iter()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Close and forget every service
    pub async fn close_all(&mut self) {
        for service in self.services.drain(..) {
            service.lock().await.close();
        }
        self.active = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use holoframe_driver::testing::FakeDriver;
    use std::time::Duration;

    fn unreachable() -> TransportOptions {
        TransportOptions {
            address: "ipc:///nonexistent/holoframe/driver.ipc".to_string(),
            timeout: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn test_first_service_becomes_active() {
        let mut registry = ServiceRegistry::new();
        let service = registry.add(ServiceKind::HoloPlayService, &unreachable()).await.unwrap();

        assert_eq!(registry.len(), 1);
        assert!(registry.is_active(&service));
    }

    #[tokio::test]
    async fn test_ready_service_keeps_active() {
        let driver = FakeDriver::start().await;
        let mut registry = ServiceRegistry::new();

        let first = registry.add(ServiceKind::HoloPlayService, &driver.options()).await.unwrap();
        first.lock().await.connect().await.unwrap();

        let second = registry.add(ServiceKind::HoloPlayService, &unreachable()).await.unwrap();
        assert!(registry.is_active(&first));
        assert!(!registry.is_active(&second));
    }

    #[tokio::test]
    async fn test_not_ready_active_is_replaced() {
        let mut registry = ServiceRegistry::new();
        let first = registry.add(ServiceKind::HoloPlayService, &unreachable()).await.unwrap();
        let second = registry.add(ServiceKind::HoloPlayService, &unreachable()).await.unwrap();

        assert!(!registry.is_active(&first));
        assert!(registry.is_active(&second));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let mut registry = ServiceRegistry::new();
        let service = registry.add(ServiceKind::HoloPlayService, &unreachable()).await.unwrap();

        service.lock().await.close();
        assert!(registry.remove(&service));
        assert!(registry.active().is_none());
        assert!(registry.is_empty());

        assert!(!registry.remove(&service));
        assert!(!registry.set_active(&service));
    }

    #[tokio::test]
    async fn test_invalid_address_not_tracked() {
        let mut registry = ServiceRegistry::new();
        let options = TransportOptions {
            address: "ws://localhost:11222/driver".to_string(),
            ..TransportOptions::default()
        };
        assert!(registry.add(ServiceKind::HoloPlayService, &options).await.is_err());
        assert!(registry.is_empty());
    }
}
