//! Holoframe Core - Core types, calibration and the quilt codec
//!
//! This crate provides the foundational, I/O free types for Holoframe:
//! - Calibration records reported by the display driver and derived optics
//! - Quilt layouts and the runtime layout catalog
//! - Lightfield images and the quilt encode/decode transform
//! - The catalog of supported display hardware

pub mod calibration;
pub mod device;
pub mod device_type;
pub mod layout;
pub mod lightfield;

pub use calibration::{derive, Calibration, CalibrationError, DerivedCalibration, RawCalibration};
pub use device::{DeviceConfiguration, DeviceId, DeviceReport, DummyConfiguration, ReportedDevice};
pub use device_type::{CatalogError, DeviceType, DeviceTypeCatalog};
pub use layout::{LayoutCatalog, LayoutError, LayoutId, QuiltLayout};
pub use lightfield::{ColorMode, Lightfield, QuiltError, ViewFormat, ViewSet};
