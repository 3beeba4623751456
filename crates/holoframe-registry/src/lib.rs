//! Holoframe Registry - Lifecycle of driver services and displays
//!
//! This crate tracks:
//! - Driver services and which one is active
//! - Displays reported by the driver or emulated, reconciled by serial
//! - The context object tying both to the layout catalog

pub mod context;
pub mod device;
pub mod device_registry;
pub mod service_registry;

pub use context::Context;
pub use device::{Device, DeviceError, DeviceSummary, DisplayOptions};
pub use device_registry::{DeviceFilter, DeviceRegistry, RegistryError, RegistryEvent};
pub use service_registry::{ServiceRegistry, SharedService};
