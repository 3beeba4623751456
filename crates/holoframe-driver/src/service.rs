//! Driver service: a session with the display driver
//!
//! A `Service` owns its transport exclusively and moves through
//! `NotReady -> Ready -> Closed`. Every driver operation is a single
//! request/reply round trip whose reply carries an error code.

use holoframe_core::{Calibration, CalibrationError, DeviceReport, ReportedDevice};
use serde_cbor::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::protocol::{device_state, service_error, QuiltSettings, Reply, Request};
use crate::transport::{DriverTransport, TransportError, TransportOptions};

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Service is not connected to the driver")]
    NotReady,
    #[error("Service has been closed")]
    Closed,
    #[error("There is no service of type '{0}'")]
    UnknownServiceType(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("Driver returned error {code} ({message}) for '{command}'")]
    Protocol {
        command: &'static str,
        code: i64,
        message: &'static str,
    },
    #[error("Malformed driver reply: {0}")]
    Malformed(String),
    #[error("Failed to encode request: {0}")]
    Encode(#[source] serde_cbor::Error),
    #[error("Invalid calibration for device {serial}: {source}")]
    Calibration {
        serial: String,
        #[source]
        source: CalibrationError,
    },
}

impl ServiceError {
    /// Driver error code, for protocol-level failures
    pub fn code(&self) -> Option<i64> {
        match self {
            ServiceError::Protocol { code, .. } => Some(*code),
            _ => None,
        }
    }
}

/// Kinds of driver services, registered by tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// The HoloPlay display driver
    HoloPlayService,
}

impl ServiceKind {
    pub const ALL: [ServiceKind; 1] = [ServiceKind::HoloPlayService];

    pub fn tag(&self) -> &'static str {
        match self {
            ServiceKind::HoloPlayService => "holoplayservice",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServiceKind::HoloPlayService => "HoloPlay Service",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, ServiceError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.tag() == tag)
            .ok_or_else(|| ServiceError::UnknownServiceType(tag.to_string()))
    }
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    NotReady,
    Ready,
    Closed,
}

/// Outcome of a device enumeration
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEnumeration {
    /// The service is not connected; nothing was asked
    NotReady,
    /// The driver answered but reports no usable device
    NoDevicesFound,
    Found(Vec<ReportedDevice>),
}

impl DeviceEnumeration {
    /// Reported devices, empty unless `Found`
    pub fn into_devices(self) -> Vec<ReportedDevice> {
        match self {
            DeviceEnumeration::Found(devices) => devices,
            _ => Vec::new(),
        }
    }
}

pub struct Service {
    kind: ServiceKind,
    transport: DriverTransport,
    state: ServiceState,
    version: String,
}

impl Service {
    /// Create a service for `options.address`; call [`connect`](Self::connect)
    /// before issuing commands
    pub fn new(kind: ServiceKind, options: &TransportOptions) -> Result<Self, ServiceError> {
        let transport = DriverTransport::new(options)?;
        debug!(kind = %kind, address = %options.address, "Created service");
        Ok(Self {
            kind,
            transport,
            state: ServiceState::NotReady,
            version: String::new(),
        })
    }

    pub fn kind(&self) -> ServiceKind {
        self.kind
    }

    pub fn address(&self) -> &str {
        self.transport.address()
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ServiceState::Ready
    }

    /// Last version string the driver reported (empty if never asked)
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Connect to the driver; on failure the service stays not-ready and
    /// `connect` may be retried
    pub async fn connect(&mut self) -> Result<(), ServiceError> {
        match self.state {
            ServiceState::Closed => return Err(ServiceError::Closed),
            ServiceState::Ready => return Ok(()),
            ServiceState::NotReady => {}
        }

        match self.transport.connect().await {
            Ok(()) => {
                self.state = ServiceState::Ready;
                info!(kind = %self.kind, address = %self.address(), "Service ready");
                Ok(())
            }
            Err(e) => {
                warn!(kind = %self.kind, address = %self.address(), "Failed to connect: {}", e);
                Err(e.into())
            }
        }
    }

    /// Query the driver version; returns the cached value when not ready
    pub async fn get_version(&mut self) -> Result<String, ServiceError> {
        if !self.is_ready() {
            debug!(kind = %self.kind, "Not ready, returning cached version");
            return Ok(self.version.clone());
        }

        let reply = self.round_trip(Request::info()).await?;
        if let Some(version) = reply.version {
            self.version = version;
        }
        Ok(self.version.clone())
    }

    /// List the devices the driver reports in state "ok", with derived
    /// calibration
    pub async fn enumerate_devices(&mut self) -> Result<DeviceEnumeration, ServiceError> {
        if !self.is_ready() {
            debug!(kind = %self.kind, "Not ready, skipping device enumeration");
            return Ok(DeviceEnumeration::NotReady);
        }

        let reply = self.round_trip(Request::info()).await?;
        if let Some(version) = reply.version {
            self.version = version;
        }

        let mut devices = Vec::new();
        for entry in reply.devices {
            match device_state(&entry) {
                Some("ok") => devices.push(parse_device(entry)?),
                state => debug!(state = ?state, "Skipping device not in ok state"),
            }
        }

        debug!(kind = %self.kind, count = devices.len(), "Enumerated devices");
        if devices.is_empty() {
            Ok(DeviceEnumeration::NoDevicesFound)
        } else {
            Ok(DeviceEnumeration::Found(devices))
        }
    }

    /// Show a quilt image (encoded PNG bytes) on the display at `index`
    pub async fn show(
        &mut self,
        index: i64,
        quilt: Vec<u8>,
        settings: QuiltSettings,
    ) -> Result<(), ServiceError> {
        debug!(display = index, size = quilt.len(), vx = settings.vx, vy = settings.vy, "Showing quilt");
        self.round_trip(Request::show(index, quilt, settings)).await?;
        Ok(())
    }

    /// Show a quilt stored earlier with [`cache`](Self::cache)
    pub async fn show_cached(
        &mut self,
        index: i64,
        name: &str,
        settings: QuiltSettings,
    ) -> Result<(), ServiceError> {
        self.round_trip(Request::show_cached(index, name, settings)).await?;
        Ok(())
    }

    /// Store a quilt on the driver side under `name`
    pub async fn cache(
        &mut self,
        index: i64,
        name: &str,
        quilt: Vec<u8>,
        settings: QuiltSettings,
    ) -> Result<(), ServiceError> {
        self.round_trip(Request::cache(index, name, quilt, settings)).await?;
        Ok(())
    }

    pub async fn hide(&mut self, index: i64) -> Result<(), ServiceError> {
        self.round_trip(Request::hide(index)).await?;
        Ok(())
    }

    pub async fn wipe(&mut self, index: i64) -> Result<(), ServiceError> {
        self.round_trip(Request::wipe(index)).await?;
        Ok(())
    }

    /// Disconnect and release the transport; never fails
    pub fn close(&mut self) {
        if self.state == ServiceState::Ready {
            self.transport.disconnect();
        }
        self.transport.close();
        if self.state != ServiceState::Closed {
            info!(kind = %self.kind, address = %self.address(), "Service closed");
        }
        self.state = ServiceState::Closed;
    }

    async fn round_trip(&mut self, request: Request) -> Result<Reply, ServiceError> {
        match self.state {
            ServiceState::Ready => {}
            ServiceState::NotReady => return Err(ServiceError::NotReady),
            ServiceState::Closed => return Err(ServiceError::Closed),
        }

        let command = request.name();
        let payload = request.encode().map_err(ServiceError::Encode)?;
        drop(request);

        let bytes = match self.transport.request(payload).await {
            Ok(bytes) => bytes,
            Err(e) => {
                if !self.transport.is_connected() {
                    warn!(kind = %self.kind, command, "Lost connection to driver");
                    self.state = ServiceState::NotReady;
                }
                return Err(e.into());
            }
        };

        let reply = Reply::decode(&bytes).map_err(|e| ServiceError::Malformed(e.to_string()))?;
        if reply.error != service_error::NO_ERROR {
            warn!(command, code = reply.error, "Driver reported an error");
            return Err(ServiceError::Protocol {
                command,
                code: reply.error,
                message: service_error::describe(reply.error),
            });
        }
        Ok(reply)
    }
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service")
            .field("kind", &self.kind)
            .field("address", &self.address())
            .field("state", &self.state)
            .field("version", &self.version)
            .finish()
    }
}

fn parse_device(entry: Value) -> Result<ReportedDevice, ServiceError> {
    let report: DeviceReport = serde_cbor::value::from_value(entry)
        .map_err(|e| ServiceError::Malformed(format!("device entry: {}", e)))?;
    let calibration =
        Calibration::from_raw(report.calibration.clone()).map_err(|source| ServiceError::Calibration {
            serial: report.calibration.serial.clone(),
            source,
        })?;
    Ok(ReportedDevice { report, calibration })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_report, FakeDriver};
    use std::time::Duration;

    fn settings() -> QuiltSettings {
        QuiltSettings {
            vx: 8,
            vy: 6,
            vtotal: 48,
            aspect: 0.75,
            invert: false,
        }
    }

    async fn connected(driver: &FakeDriver) -> Service {
        let mut service = Service::new(ServiceKind::HoloPlayService, &driver.options()).unwrap();
        service.connect().await.unwrap();
        service
    }

    #[test]
    fn test_service_kind_tags() {
        assert_eq!(ServiceKind::from_tag("holoplayservice").unwrap(), ServiceKind::HoloPlayService);
        assert!(matches!(
            ServiceKind::from_tag("bridge"),
            Err(ServiceError::UnknownServiceType(tag)) if tag == "bridge"
        ));
    }

    #[tokio::test]
    async fn test_not_ready_degrades() {
        let options = TransportOptions {
            address: "ipc:///nonexistent/holoframe/driver.ipc".to_string(),
            timeout: Duration::from_millis(200),
        };
        let mut service = Service::new(ServiceKind::HoloPlayService, &options).unwrap();

        assert!(matches!(
            service.connect().await,
            Err(ServiceError::Transport(TransportError::ConnectionRefused(_)))
        ));
        assert!(!service.is_ready());
        assert_eq!(service.get_version().await.unwrap(), "");
        assert_eq!(service.enumerate_devices().await.unwrap(), DeviceEnumeration::NotReady);
        assert!(matches!(service.hide(0).await, Err(ServiceError::NotReady)));

        service.close();
        service.close();
        assert_eq!(service.state(), ServiceState::Closed);
        assert!(matches!(service.connect().await, Err(ServiceError::Closed)));
    }

    #[tokio::test]
    async fn test_version_is_cached() {
        let driver = FakeDriver::start().await;
        driver.set_version("1.2.2");
        let mut service = connected(&driver).await;

        assert_eq!(service.get_version().await.unwrap(), "1.2.2");
        assert_eq!(service.version(), "1.2.2");

        // Once closed the cached value is still answered
        service.close();
        assert_eq!(service.get_version().await.unwrap(), "1.2.2");
    }

    #[tokio::test]
    async fn test_enumerate_filters_state() {
        let driver = FakeDriver::start().await;
        let mut unplugged = sample_report("LKG-B", "standard", 1);
        unplugged.state = "nocalibration".to_string();
        driver.set_devices(vec![sample_report("LKG-A", "portrait", 0), unplugged]);

        let mut service = connected(&driver).await;
        let devices = match service.enumerate_devices().await.unwrap() {
            DeviceEnumeration::Found(devices) => devices,
            other => panic!("unexpected enumeration: {:?}", other),
        };
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].serial(), "LKG-A");
        assert_eq!(devices[0].hardware_type(), "portrait");
        assert_eq!(devices[0].calibration.derived.fringe, 0.0);
        assert_eq!((devices[0].calibration.derived.ri, devices[0].calibration.derived.bi), (0, 2));

        driver.set_devices(Vec::new());
        assert_eq!(service.enumerate_devices().await.unwrap(), DeviceEnumeration::NoDevicesFound);
    }

    #[tokio::test]
    async fn test_zero_slope_surfaces() {
        let driver = FakeDriver::start().await;
        let mut broken = sample_report("LKG-Z", "standard", 0);
        broken.calibration.slope = 0.0;
        driver.set_devices(vec![broken]);

        let mut service = connected(&driver).await;
        assert!(matches!(
            service.enumerate_devices().await,
            Err(ServiceError::Calibration { serial, source: CalibrationError::ZeroSlope }) if serial == "LKG-Z"
        ));
    }

    #[tokio::test]
    async fn test_show_and_clear_commands() {
        let driver = FakeDriver::start().await;
        let mut service = connected(&driver).await;

        service.show(1, vec![0x89, b'P', b'N', b'G'], settings()).await.unwrap();
        service.hide(1).await.unwrap();
        service.wipe(1).await.unwrap();
        service.cache(1, "intro", vec![1, 2], settings()).await.unwrap();
        service.show_cached(1, "intro", settings()).await.unwrap();

        let requests = driver.requests();
        let commands: Vec<_> = requests.iter().map(|r| r.command.as_str()).collect();
        assert_eq!(commands, ["show", "hide", "wipe", "cache", "show"]);
        assert_eq!(requests[0].bin, vec![0x89, b'P', b'N', b'G']);
        assert_eq!(requests[0].target_display(), Some(1));
        assert!(requests[4].bin.is_empty());
    }

    #[tokio::test]
    async fn test_driver_error_code() {
        let driver = FakeDriver::start().await;
        let mut service = connected(&driver).await;

        driver.set_error(service_error::LKG_NOT_FOUND);
        let err = service.hide(7).await.unwrap_err();
        assert_eq!(err.code(), Some(service_error::LKG_NOT_FOUND));
        assert!(matches!(err, ServiceError::Protocol { command: "hide", .. }));
        // Transport exchange itself succeeded
        assert!(service.is_ready());
    }

    #[tokio::test]
    async fn test_malformed_reply() {
        let driver = FakeDriver::start().await;
        let mut service = connected(&driver).await;

        driver.set_raw_reply(Some(Value::Text("not a map".to_string())));
        assert!(matches!(service.wipe(0).await, Err(ServiceError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_timeout_then_lost_connection() {
        let mut driver = FakeDriver::start().await;
        let options = TransportOptions {
            timeout: Duration::from_millis(200),
            ..driver.options()
        };
        let mut service = Service::new(ServiceKind::HoloPlayService, &options).unwrap();
        service.connect().await.unwrap();

        driver.set_silent(true);
        assert!(matches!(
            service.hide(0).await,
            Err(ServiceError::Transport(TransportError::Timeout(_)))
        ));
        assert!(service.is_ready());

        driver.shutdown().await;
        assert!(matches!(
            service.hide(0).await,
            Err(ServiceError::Transport(TransportError::ConnectionLost(_)))
        ));
        assert_eq!(service.state(), ServiceState::NotReady);
    }
}
