//! Tracked lightfield displays

use chrono::{DateTime, Utc};
use holoframe_core::{
    DeviceConfiguration, DeviceId, DeviceType, LayoutCatalog, Lightfield, QuiltError, QuiltLayout,
    ReportedDevice,
};
use holoframe_driver::{QuiltSettings, Service, ServiceError};
use serde::Serialize;
use std::sync::{Arc, Weak};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::service_registry::SharedService;

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Device {device} does not support the quilt layout '{layout}'")]
    UnsupportedLayout { device: DeviceId, layout: String },
    #[error("Device {0} is not bound to a driver service")]
    NoService(DeviceId),
    #[error("The service of device {0} no longer exists")]
    ServiceGone(DeviceId),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Quilt(#[from] QuiltError),
    #[error("Quilt encoder failed: {0}")]
    Encoder(String),
}

/// Per-call overrides of the device's calibration defaults
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DisplayOptions {
    pub aspect: Option<f64>,
    pub invert: Option<bool>,
}

/// A display known to the registry, connected or not
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    hardware_type: String,
    name: String,
    emulated: bool,
    connected: bool,
    configuration: DeviceConfiguration,
    service: Option<Weak<Mutex<Service>>>,
    displayed: Option<Arc<Lightfield>>,
    presets: Vec<QuiltLayout>,
    first_seen: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

/// Serializable snapshot of a device
#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub id: DeviceId,
    pub name: String,
    pub hardware_type: String,
    pub serial: String,
    pub index: i64,
    pub emulated: bool,
    pub connected: bool,
    pub aspect: f64,
    pub view_cone: f64,
    pub presets: Vec<QuiltLayout>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Device {
    /// Device for a driver report, bound to the service that made it
    pub(crate) fn from_report(
        id: DeviceId,
        device_type: &DeviceType,
        reported: ReportedDevice,
        service: &SharedService,
        layouts: &LayoutCatalog,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            hardware_type: device_type.tag.clone(),
            name: device_type.name.clone(),
            emulated: false,
            connected: true,
            configuration: DeviceConfiguration::Driver(reported),
            service: Some(Arc::downgrade(service)),
            displayed: None,
            presets: resolve_presets(device_type, layouts),
            first_seen: now,
            last_seen: now,
        }
    }

    /// Placeholder for a hardware type that is not attached
    pub(crate) fn emulated(id: DeviceId, device_type: &DeviceType, layouts: &LayoutCatalog) -> Self {
        let now = Utc::now();
        Self {
            id,
            hardware_type: device_type.tag.clone(),
            name: device_type.name.clone(),
            emulated: true,
            connected: false,
            configuration: DeviceConfiguration::Emulated(device_type.dummy.clone()),
            service: None,
            displayed: None,
            presets: resolve_presets(device_type, layouts),
            first_seen: now,
            last_seen: now,
        }
    }

    pub fn id(&self) -> DeviceId {
        self.id
    }

    pub fn hardware_type(&self) -> &str {
        &self.hardware_type
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_emulated(&self) -> bool {
        self.emulated
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn configuration(&self) -> &DeviceConfiguration {
        &self.configuration
    }

    pub fn serial(&self) -> &str {
        self.configuration.serial()
    }

    /// Driver display index
    pub fn index(&self) -> i64 {
        self.configuration.index()
    }

    /// Quilt layouts this hardware accepts, in preference order
    pub fn presets(&self) -> &[QuiltLayout] {
        &self.presets
    }

    /// Lightfield currently shown on the device
    pub fn displayed(&self) -> Option<&Arc<Lightfield>> {
        self.displayed.as_ref()
    }

    pub fn first_seen(&self) -> DateTime<Utc> {
        self.first_seen
    }

    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_seen
    }

    /// The bound service, if it is still alive
    pub fn service(&self) -> Option<SharedService> {
        self.service.as_ref().and_then(Weak::upgrade)
    }

    pub fn supports(&self, layout: &QuiltLayout) -> bool {
        self.presets.iter().any(|preset| preset.same_format(layout))
    }

    pub fn summary(&self) -> DeviceSummary {
        DeviceSummary {
            id: self.id,
            name: self.name.clone(),
            hardware_type: self.hardware_type.clone(),
            serial: self.serial().to_string(),
            index: self.index(),
            emulated: self.emulated,
            connected: self.connected,
            aspect: self.configuration.aspect(),
            view_cone: self.configuration.view_cone(),
            presets: self.presets.clone(),
            first_seen: self.first_seen,
            last_seen: self.last_seen,
        }
    }

    /// Replace the configuration with a fresh driver report
    pub(crate) fn update(&mut self, reported: ReportedDevice, service: &SharedService) {
        self.configuration = DeviceConfiguration::Driver(reported);
        self.service = Some(Arc::downgrade(service));
        self.connected = true;
        self.last_seen = Utc::now();
    }

    pub(crate) fn set_disconnected(&mut self) {
        self.connected = false;
    }

    fn bound_service(&self) -> Result<SharedService, DeviceError> {
        let weak = self.service.as_ref().ok_or(DeviceError::NoService(self.id))?;
        weak.upgrade().ok_or(DeviceError::ServiceGone(self.id))
    }

    /// Show a lightfield on this device
    ///
    /// Aspect and inversion default to the device calibration. On success the
    /// lightfield is remembered as displayed.
    pub async fn display(
        &mut self,
        lightfield: Arc<Lightfield>,
        options: DisplayOptions,
    ) -> Result<(), DeviceError> {
        let layout = lightfield.layout();
        if !self.supports(layout) {
            return Err(DeviceError::UnsupportedLayout {
                device: self.id,
                layout: layout.to_string(),
            });
        }
        let service = self.bound_service()?;

        let settings = QuiltSettings {
            vx: layout.columns,
            vy: layout.rows,
            vtotal: layout.view_count() as u32,
            aspect: options.aspect.unwrap_or_else(|| self.configuration.aspect()),
            invert: options.invert.unwrap_or_else(|| self.configuration.invert()),
        };

        let source = lightfield.clone();
        let quilt = tokio::task::spawn_blocking(move || source.to_png())
            .await
            .map_err(|e| DeviceError::Encoder(e.to_string()))??;

        service.lock().await.show(self.index(), quilt, settings).await?;

        info!(device = %self.id, layout = %lightfield.layout(), "Displayed lightfield");
        self.displayed = Some(lightfield);
        Ok(())
    }

    /// Hide the displayed lightfield; a no-op when nothing is displayed
    pub async fn clear(&mut self) -> Result<(), DeviceError> {
        if self.displayed.is_none() {
            debug!(device = %self.id, "Nothing displayed");
            return Ok(());
        }

        match self.service() {
            Some(service) => {
                service.lock().await.hide(self.index()).await?;
                info!(device = %self.id, "Cleared display");
            }
            None => warn!(device = %self.id, "No service to hide the lightfield on"),
        }
        self.displayed = None;
        Ok(())
    }

    /// Reset the display to the driver's idle screen
    pub async fn wipe(&mut self) -> Result<(), DeviceError> {
        let service = self.bound_service()?;
        service.lock().await.wipe(self.index()).await?;
        self.displayed = None;
        info!(device = %self.id, "Wiped display");
        Ok(())
    }
}

impl std::fmt::Display for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.emulated {
            write!(f, "[Emulated] ")?;
        }
        write!(f, "{} (id: {})", self.name, self.id)
    }
}

fn resolve_presets(device_type: &DeviceType, layouts: &LayoutCatalog) -> Vec<QuiltLayout> {
    device_type
        .layouts
        .iter()
        .filter_map(|id| {
            let layout = layouts.get(*id).cloned();
            if layout.is_none() {
                warn!(tag = %device_type.tag, layout = %id, "Device type references unknown layout");
            }
            layout
        })
        .collect()
}
