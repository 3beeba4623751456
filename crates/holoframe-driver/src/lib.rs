//! Holoframe Driver - Client for the lightfield display driver
//!
//! Provides:
//! - A request/reply transport speaking the driver's socket framing
//! - CBOR request and reply envelopes
//! - `Service`, one session with the driver (version, devices, show/hide)

pub mod protocol;
pub mod service;
pub mod transport;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use protocol::{service_error, QuiltSettings, Reply, Request};
pub use service::{DeviceEnumeration, Service, ServiceError, ServiceKind, ServiceState};
pub use transport::{
    DriverTransport, Endpoint, TransportError, TransportOptions, DEFAULT_ADDRESS, DEFAULT_TIMEOUT_MS,
};
