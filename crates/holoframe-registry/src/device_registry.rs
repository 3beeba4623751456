//! Registry of tracked displays
//!
//! Devices are reconciled against the bound service's reports by serial
//! number. They are updated in place, marked disconnected when the driver
//! stops reporting them, and only dropped by an explicit `remove`.

use holoframe_core::{CatalogError, DeviceId, DeviceTypeCatalog, LayoutCatalog};
use holoframe_driver::{DeviceEnumeration, ServiceError};
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::service_registry::SharedService;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("There is no device with id {0}")]
    UnknownDevice(DeviceId),
    #[error("Device {0} is not tracked by this registry")]
    DeviceNotTracked(DeviceId),
    #[error("There is no display of type '{0}'")]
    UnknownDeviceType(String),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl From<CatalogError> for RegistryError {
    fn from(e: CatalogError) -> Self {
        match e {
            CatalogError::UnknownDeviceType(tag) => RegistryError::UnknownDeviceType(tag),
        }
    }
}

/// Registry change notifications
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// New device tracked
    DeviceAdded(DeviceId),
    /// Known device reported again after being disconnected
    DeviceConnected(DeviceId),
    /// Device no longer reported by the driver
    DeviceDisconnected(DeviceId),
    /// Configuration of a connected device refreshed
    DeviceUpdated(DeviceId),
    DeviceRemoved(DeviceId),
    ActiveChanged(Option<DeviceId>),
    RefreshCompleted { reported: usize, tracked: usize },
}

/// Criteria for [`DeviceRegistry::list`]; `None` matches anything
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceFilter {
    pub connected: Option<bool>,
    pub emulated: Option<bool>,
    pub hardware_type: Option<String>,
}

impl DeviceFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn connected() -> Self {
        Self {
            connected: Some(true),
            ..Self::default()
        }
    }

    pub fn emulated() -> Self {
        Self {
            emulated: Some(true),
            ..Self::default()
        }
    }

    pub fn matches(&self, device: &Device) -> bool {
        self.connected.map_or(true, |c| device.is_connected() == c)
            && self.emulated.map_or(true, |e| device.is_emulated() == e)
            && self
                .hardware_type
                .as_deref()
                .map_or(true, |t| device.hardware_type() == t)
    }
}

pub struct DeviceRegistry {
    types: DeviceTypeCatalog,
    /// In insertion (first-seen) order
    devices: Vec<Device>,
    active: Option<DeviceId>,
    next_id: u32,
    service: Option<SharedService>,
    event_tx: broadcast::Sender<RegistryEvent>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new(DeviceTypeCatalog::builtin())
    }
}

impl DeviceRegistry {
    pub fn new(types: DeviceTypeCatalog) -> Self {
        let (event_tx, _) = broadcast::channel(100);
        Self {
            types,
            devices: Vec::new(),
            active: None,
            next_id: 0,
            service: None,
            event_tx,
        }
    }

    pub fn types(&self) -> &DeviceTypeCatalog {
        &self.types
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: RegistryEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Service whose reports [`refresh`](Self::refresh) reconciles
    pub fn bind_service(&mut self, service: SharedService) {
        self.service = Some(service);
    }

    pub fn unbind_service(&mut self) -> Option<SharedService> {
        self.service.take()
    }

    pub fn service(&self) -> Option<&SharedService> {
        self.service.as_ref()
    }

    fn allocate_id(&mut self) -> DeviceId {
        let id = DeviceId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Reconcile tracked devices with the bound service's device list
    pub async fn refresh(&mut self, layouts: &LayoutCatalog) -> Result<(), RegistryError> {
        let Some(service) = self.service.clone() else {
            warn!("No service bound, not refreshing devices");
            return Ok(());
        };
        let mut session = service.lock().await;
        if !session.is_ready() {
            warn!(address = %session.address(), "Service not ready, not refreshing devices");
            return Ok(());
        }

        let previously_connected: HashSet<DeviceId> = self
            .devices
            .iter()
            .filter(|d| !d.is_emulated() && d.is_connected())
            .map(|d| d.id())
            .collect();
        for device in self.devices.iter_mut().filter(|d| !d.is_emulated()) {
            device.set_disconnected();
        }

        let enumeration = session.enumerate_devices().await;
        drop(session);

        let reported = match enumeration {
            Ok(DeviceEnumeration::Found(devices)) => devices,
            Ok(_) => Vec::new(),
            Err(e) => {
                self.emit_disconnects(&previously_connected);
                return Err(e.into());
            }
        };
        let reported_count = reported.len();

        for report in reported {
            let serial = report.serial().to_string();
            let existing = self
                .devices
                .iter_mut()
                .find(|d| !d.is_emulated() && d.serial() == serial);

            if let Some(device) = existing {
                let was_connected = device.is_connected() || previously_connected.contains(&device.id());
                device.update(report, &service);
                let id = device.id();
                debug!(device = %id, serial = %serial, "Updated device");
                if was_connected {
                    self.emit(RegistryEvent::DeviceUpdated(id));
                } else {
                    info!(device = %id, serial = %serial, "Device reconnected");
                    self.emit(RegistryEvent::DeviceConnected(id));
                }
                continue;
            }

            let device_type = match self.types.get(report.hardware_type()) {
                Ok(device_type) => device_type.clone(),
                Err(e) => {
                    self.emit_disconnects(&previously_connected);
                    return Err(e.into());
                }
            };
            let id = self.allocate_id();
            let device = Device::from_report(id, &device_type, report, &service, layouts);
            info!(device = %id, serial = %serial, kind = %device_type.tag, "Found device");
            self.devices.push(device);
            self.emit(RegistryEvent::DeviceAdded(id));

            if !self.active_is_connected() {
                self.set_active(Some(id));
            }
        }

        self.emit_disconnects(&previously_connected);
        let tracked = self.devices.len();
        info!(reported = reported_count, tracked, "Device refresh complete");
        self.emit(RegistryEvent::RefreshCompleted {
            reported: reported_count,
            tracked,
        });
        Ok(())
    }

    fn emit_disconnects(&self, previously_connected: &HashSet<DeviceId>) {
        for device in &self.devices {
            if previously_connected.contains(&device.id()) && !device.is_connected() {
                info!(device = %device.id(), serial = %device.serial(), "Device disconnected");
                self.emit(RegistryEvent::DeviceDisconnected(device.id()));
            }
        }
    }

    fn active_is_connected(&self) -> bool {
        self.get_active().is_some_and(Device::is_connected)
    }

    fn set_active(&mut self, id: Option<DeviceId>) {
        if self.active != id {
            self.active = id;
            debug!(device = ?id, "Active device changed");
            self.emit(RegistryEvent::ActiveChanged(id));
        }
    }

    /// Add one emulated device per catalog type that has none yet, skipping
    /// the excluded tags; returns the new ids
    pub fn add_emulated(&mut self, exclude: &[String], layouts: &LayoutCatalog) -> Vec<DeviceId> {
        let missing: Vec<_> = self
            .types
            .iter()
            .filter(|t| !exclude.contains(&t.tag))
            .filter(|t| {
                !self
                    .devices
                    .iter()
                    .any(|d| d.is_emulated() && d.hardware_type() == t.tag)
            })
            .cloned()
            .collect();

        let mut added = Vec::with_capacity(missing.len());
        for device_type in missing {
            let id = self.allocate_id();
            self.devices.push(Device::emulated(id, &device_type, layouts));
            info!(device = %id, kind = %device_type.tag, "Added emulated device");
            self.emit(RegistryEvent::DeviceAdded(id));
            added.push(id);
        }
        added
    }

    /// Stop tracking a device. Unlike service removal this is strict: the
    /// device must be tracked.
    pub fn remove(&mut self, id: DeviceId) -> Result<Device, RegistryError> {
        let position = self
            .devices
            .iter()
            .position(|d| d.id() == id)
            .ok_or(RegistryError::DeviceNotTracked(id))?;

        if self.active == Some(id) {
            self.set_active(None);
        }
        let device = self.devices.remove(position);
        info!(device = %id, "Removed device");
        self.emit(RegistryEvent::DeviceRemoved(id));
        Ok(device)
    }

    pub fn select_active(&mut self, id: DeviceId) -> Result<(), RegistryError> {
        if self.get(id).is_none() {
            return Err(RegistryError::UnknownDevice(id));
        }
        self.set_active(Some(id));
        Ok(())
    }

    pub fn get_active(&self) -> Option<&Device> {
        self.active.and_then(|id| self.get(id))
    }

    pub fn get_active_mut(&mut self) -> Option<&mut Device> {
        let id = self.active?;
        self.get_mut(id)
    }

    pub fn active_id(&self) -> Option<DeviceId> {
        self.active
    }

    pub fn clear_active(&mut self) {
        self.set_active(None);
    }

    /// Whether any tracked device, connected or not, has this serial
    pub fn exists(&self, serial: &str) -> bool {
        self.devices.iter().any(|d| d.serial() == serial)
    }

    pub fn get(&self, id: DeviceId) -> Option<&Device> {
        self.devices.iter().find(|d| d.id() == id)
    }

    pub fn get_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.iter_mut().find(|d| d.id() == id)
    }

    pub fn list(&self, filter: &DeviceFilter) -> Vec<&Device> {
        self.devices.iter().filter(|d| filter.matches(d)).collect()
    }

    pub fn count(&self, filter: &DeviceFilter) -> usize {
        self.devices.iter().filter(|d| filter.matches(d)).count()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
