//! Display calibration as reported by the driver, and the optical
//! parameters derived from it

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CalibrationError {
    #[error("Calibration has a slope of zero")]
    ZeroSlope,
}

/// Calibration block exactly as the driver sends it
///
/// The driver wraps most numeric fields in `{"value": x}` objects; both the
/// wrapped and the bare form are accepted. Unknown keys are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCalibration {
    #[serde(default)]
    pub serial: String,
    #[serde(default, with = "value_object")]
    pub pitch: f64,
    #[serde(with = "value_object")]
    pub slope: f64,
    #[serde(default, with = "value_object")]
    pub center: f64,
    #[serde(default, with = "value_object")]
    pub view_cone: f64,
    #[serde(default, with = "value_object")]
    pub inv_view: f64,
    #[serde(default, with = "value_object")]
    pub vertical_angle: f64,
    #[serde(rename = "DPI", with = "value_object")]
    pub dpi: f64,
    #[serde(with = "value_object")]
    pub screen_w: f64,
    #[serde(with = "value_object")]
    pub screen_h: f64,
    #[serde(default, with = "value_object")]
    pub flip_image_x: f64,
    #[serde(default, with = "value_object")]
    pub flip_image_y: f64,
    #[serde(default, with = "flag_object")]
    pub flip_subp: bool,
    /// Fields this crate does not interpret
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_cbor::Value>,
}

/// Optical parameters computed from a [`RawCalibration`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedCalibration {
    pub tilt: f64,
    /// Pitch in display units, replacing the raw lenticular pitch
    pub pitch: f64,
    pub subp: f64,
    /// Index of the red subpixel
    pub ri: u8,
    /// Index of the blue subpixel
    pub bi: u8,
    pub fringe: f64,
}

/// Raw calibration together with its derived values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub raw: RawCalibration,
    pub derived: DerivedCalibration,
}

impl Calibration {
    /// Derive the optical parameters for a raw calibration block
    pub fn from_raw(raw: RawCalibration) -> Result<Self, CalibrationError> {
        let derived = derive(&raw)?;
        Ok(Self { raw, derived })
    }

    /// Aspect ratio of the physical screen (width / height)
    pub fn aspect(&self) -> f64 {
        self.raw.screen_w / self.raw.screen_h
    }

    /// Whether the view order is inverted on this display
    pub fn invert(&self) -> bool {
        self.raw.inv_view != 0.0
    }
}

/// Compute tilt, pitch, subpixel offset and subpixel order for a display
pub fn derive(raw: &RawCalibration) -> Result<DerivedCalibration, CalibrationError> {
    if raw.slope == 0.0 {
        return Err(CalibrationError::ZeroSlope);
    }

    let tilt = raw.screen_h / (raw.screen_w * raw.slope);
    let pitch = -(raw.screen_w / raw.dpi) * raw.pitch * raw.slope.abs().atan().sin();
    let subp = pitch / (3.0 * raw.screen_w);
    let (ri, bi) = if raw.flip_subp { (2, 0) } else { (0, 2) };

    Ok(DerivedCalibration {
        tilt,
        pitch,
        subp,
        ri,
        bi,
        fringe: 0.0,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Wrapped<T> {
    Bare(T),
    Object { value: T },
}

impl<T> Wrapped<T> {
    fn into_inner(self) -> T {
        match self {
            Wrapped::Bare(v) | Wrapped::Object { value: v } => v,
        }
    }
}

// Numeric field that may arrive as `x` or `{"value": x}`
mod value_object {
    use super::Wrapped;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(*value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Wrapped::<f64>::deserialize(deserializer)?.into_inner())
    }
}

// Boolean field that may arrive as a bool or a number, bare or wrapped
mod flag_object {
    use super::Wrapped;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Number(f64),
    }

    pub fn serialize<S>(value: &bool, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_bool(*value)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<bool, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match Wrapped::<Flag>::deserialize(deserializer)?.into_inner() {
            Flag::Bool(b) => b,
            Flag::Number(n) => n != 0.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn portrait_raw() -> RawCalibration {
        RawCalibration {
            serial: "LKG-P01234".to_string(),
            pitch: 52.0,
            slope: -7.0,
            center: 0.5,
            view_cone: 40.0,
            inv_view: 1.0,
            vertical_angle: 0.0,
            dpi: 324.0,
            screen_w: 1536.0,
            screen_h: 2048.0,
            flip_image_x: 0.0,
            flip_image_y: 0.0,
            flip_subp: false,
            extra: BTreeMap::new(),
        }
    }

    #[test]
    fn test_derive_values() {
        let raw = portrait_raw();
        let derived = derive(&raw).unwrap();

        let tilt = 2048.0 / (1536.0 * -7.0);
        let pitch = -(1536.0 / 324.0) * 52.0 * (7.0f64).atan().sin();
        assert!((derived.tilt - tilt).abs() < 1e-12);
        assert!((derived.pitch - pitch).abs() < 1e-12);
        assert!((derived.subp - pitch / (3.0 * 1536.0)).abs() < 1e-15);
        assert_eq!((derived.ri, derived.bi), (0, 2));
        assert_eq!(derived.fringe, 0.0);
    }

    #[test]
    fn test_flip_subpixel_order() {
        let mut raw = portrait_raw();
        raw.flip_subp = true;
        let derived = derive(&raw).unwrap();
        assert_eq!((derived.ri, derived.bi), (2, 0));
        assert_eq!(derived.fringe, 0.0);
    }

    #[test]
    fn test_derive_is_deterministic() {
        let raw = portrait_raw();
        assert_eq!(derive(&raw).unwrap(), derive(&raw).unwrap());
    }

    #[test]
    fn test_zero_slope_rejected() {
        let mut raw = portrait_raw();
        raw.slope = 0.0;
        assert_eq!(derive(&raw), Err(CalibrationError::ZeroSlope));
    }

    #[test]
    fn test_wrapped_and_bare_fields() {
        let json = r#"{
            "configVersion": "1.0",
            "serial": "LKG-2K-01234",
            "pitch": {"value": 49.8},
            "slope": -5.4,
            "center": {"value": 0.08},
            "viewCone": {"value": 40},
            "invView": {"value": 1},
            "DPI": {"value": 338},
            "screenW": {"value": 2560},
            "screenH": 1600,
            "flipSubp": {"value": 1}
        }"#;
        let raw: RawCalibration = serde_json::from_str(json).unwrap();

        assert_eq!(raw.pitch, 49.8);
        assert_eq!(raw.slope, -5.4);
        assert_eq!(raw.dpi, 338.0);
        assert_eq!(raw.screen_h, 1600.0);
        assert!(raw.flip_subp);
        assert!(raw.extra.contains_key("configVersion"));

        let calibration = Calibration::from_raw(raw).unwrap();
        assert!((calibration.aspect() - 1.6).abs() < 1e-12);
        assert!(calibration.invert());
        assert_eq!((calibration.derived.ri, calibration.derived.bi), (2, 0));
    }
}
