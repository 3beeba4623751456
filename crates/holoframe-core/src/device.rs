//! Device identity and configuration records

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::calibration::{Calibration, RawCalibration};

/// Registry-assigned device identifier; never reused within a registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeviceId(pub u32);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One entry of the driver's device list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReport {
    /// Driver-side state; only "ok" devices are usable
    #[serde(default)]
    pub state: String,
    /// Hardware type tag (e.g. "standard", "portrait")
    #[serde(default)]
    pub hardware_version: String,
    #[serde(default)]
    pub hwid: String,
    #[serde(default)]
    pub hdmi: String,
    /// Display index used as `targetDisplay` in driver commands
    #[serde(default)]
    pub index: i64,
    /// Window origin on the desktop
    #[serde(default)]
    pub window_coords: Option<[f64; 2]>,
    pub calibration: RawCalibration,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_cbor::Value>,
}

/// A driver-reported device together with its derived calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportedDevice {
    pub report: DeviceReport,
    pub calibration: Calibration,
}

impl ReportedDevice {
    pub fn serial(&self) -> &str {
        &self.calibration.raw.serial
    }

    pub fn hardware_type(&self) -> &str {
        &self.report.hardware_version
    }
}

/// Static configuration carried by emulated devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DummyConfiguration {
    pub index: i64,
    pub hdmi: String,
    pub name: String,
    pub serial: String,
    #[serde(rename = "type")]
    pub hardware_type: String,

    // window & screen
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: f64,

    // calibration
    pub pitch: f64,
    pub tilt: f64,
    pub center: f64,
    pub subp: f64,
    pub fringe: f64,
    pub ri: u8,
    pub bi: u8,
    pub inv_view: u8,
    pub view_cone: f64,
}

impl DummyConfiguration {
    /// Placeholder values of a portrait-class display
    pub fn looking_glass(name: &str, hardware_type: &str) -> Self {
        Self {
            index: -1,
            hdmi: "LKG0001DUMMY".to_string(),
            name: name.to_string(),
            serial: "LKG-1-DUMMY".to_string(),
            hardware_type: hardware_type.to_string(),
            x: -1536,
            y: 0,
            width: 1536,
            height: 2048,
            aspect_ratio: 0.75,
            pitch: 354.70953369140625,
            tilt: -0.11324916034936905,
            center: -0.11902174353599548,
            subp: 0.0001302083401242271,
            fringe: 0.0,
            ri: 0,
            bi: 2,
            inv_view: 1,
            view_cone: 58.0,
        }
    }
}

/// Configuration of a tracked device: what the driver reported, or a
/// static placeholder for emulated devices
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum DeviceConfiguration {
    Driver(ReportedDevice),
    Emulated(DummyConfiguration),
}

impl DeviceConfiguration {
    pub fn serial(&self) -> &str {
        match self {
            DeviceConfiguration::Driver(reported) => reported.serial(),
            DeviceConfiguration::Emulated(dummy) => &dummy.serial,
        }
    }

    /// Driver display index
    pub fn index(&self) -> i64 {
        match self {
            DeviceConfiguration::Driver(reported) => reported.report.index,
            DeviceConfiguration::Emulated(dummy) => dummy.index,
        }
    }

    pub fn aspect(&self) -> f64 {
        match self {
            DeviceConfiguration::Driver(reported) => reported.calibration.aspect(),
            DeviceConfiguration::Emulated(dummy) => dummy.aspect_ratio,
        }
    }

    pub fn invert(&self) -> bool {
        match self {
            DeviceConfiguration::Driver(reported) => reported.calibration.invert(),
            DeviceConfiguration::Emulated(dummy) => dummy.inv_view != 0,
        }
    }

    pub fn view_cone(&self) -> f64 {
        match self {
            DeviceConfiguration::Driver(reported) => reported.calibration.raw.view_cone,
            DeviceConfiguration::Emulated(dummy) => dummy.view_cone,
        }
    }

    pub fn is_emulated(&self) -> bool {
        matches!(self, DeviceConfiguration::Emulated(_))
    }
}
