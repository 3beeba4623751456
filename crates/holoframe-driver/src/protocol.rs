//! Driver message envelopes
//!
//! Requests are CBOR maps `{ "cmd": { <name>: {...} }, "bin": <bytes> }`;
//! replies are CBOR maps carrying an `error` code and, for `info`, the driver
//! version and device list.

use serde::{Deserialize, Serialize};
use serde_cbor::Value;

/// Driver-side error codes carried in replies
pub mod service_error {
    pub const NO_ERROR: i64 = 0;
    pub const BAD_CBOR: i64 = 1;
    pub const BAD_COMMAND: i64 = 2;
    pub const NO_IMAGE: i64 = 3;
    pub const LKG_NOT_FOUND: i64 = 4;
    pub const NOT_IN_CACHE: i64 = 5;
    pub const INIT_TOO_LATE: i64 = 6;
    pub const NOT_ALLOWED: i64 = 7;

    /// Human readable name of a driver error code
    pub fn describe(code: i64) -> &'static str {
        match code {
            NO_ERROR => "no error",
            BAD_CBOR => "malformed CBOR request",
            BAD_COMMAND => "unknown command",
            NO_IMAGE => "no image data",
            LKG_NOT_FOUND => "display not found",
            NOT_IN_CACHE => "quilt not in cache",
            INIT_TOO_LATE => "initialization too late",
            NOT_ALLOWED => "not allowed",
            _ => "unknown error",
        }
    }
}

/// Request envelope
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    pub cmd: Command,
    #[serde(with = "serde_bytes")]
    pub bin: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Command {
    Info {},
    Show(ShowCommand),
    Hide(TargetCommand),
    Wipe(TargetCommand),
    Cache(CacheCommand),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetCommand {
    pub target_display: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShowCommand {
    pub target_display: i64,
    pub source: QuiltSource,
    pub quilt: QuiltDescriptor,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheCommand {
    pub target_display: i64,
    pub quilt: QuiltDescriptor,
}

/// Where the driver takes the quilt of a `show` command from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuiltSource {
    /// The request's `bin` payload
    #[serde(rename = "bindata")]
    BinData,
    /// A quilt cached earlier under `quilt.name`
    Cache,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuiltDescriptor {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub settings: QuiltSettings,
}

/// Layout metadata the driver needs to slice a quilt
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuiltSettings {
    /// Columns
    pub vx: u32,
    /// Rows
    pub vy: u32,
    /// Total number of views
    pub vtotal: u32,
    pub aspect: f64,
    pub invert: bool,
}

impl Request {
    pub fn info() -> Self {
        Self {
            cmd: Command::Info {},
            bin: Vec::new(),
        }
    }

    /// Show a quilt image shipped in the request itself
    pub fn show(target_display: i64, quilt: Vec<u8>, settings: QuiltSettings) -> Self {
        Self {
            cmd: Command::Show(ShowCommand {
                target_display,
                source: QuiltSource::BinData,
                quilt: QuiltDescriptor {
                    kind: Some("image".to_string()),
                    name: None,
                    settings,
                },
            }),
            bin: quilt,
        }
    }

    /// Show a quilt cached earlier with [`Request::cache`]
    pub fn show_cached(target_display: i64, name: &str, settings: QuiltSettings) -> Self {
        Self {
            cmd: Command::Show(ShowCommand {
                target_display,
                source: QuiltSource::Cache,
                quilt: QuiltDescriptor {
                    kind: Some("image".to_string()),
                    name: Some(name.to_string()),
                    settings,
                },
            }),
            bin: Vec::new(),
        }
    }

    pub fn cache(target_display: i64, name: &str, quilt: Vec<u8>, settings: QuiltSettings) -> Self {
        Self {
            cmd: Command::Cache(CacheCommand {
                target_display,
                quilt: QuiltDescriptor {
                    kind: None,
                    name: Some(name.to_string()),
                    settings,
                },
            }),
            bin: quilt,
        }
    }

    pub fn hide(target_display: i64) -> Self {
        Self {
            cmd: Command::Hide(TargetCommand { target_display }),
            bin: Vec::new(),
        }
    }

    pub fn wipe(target_display: i64) -> Self {
        Self {
            cmd: Command::Wipe(TargetCommand { target_display }),
            bin: Vec::new(),
        }
    }

    /// Command name as it appears on the wire
    pub fn name(&self) -> &'static str {
        match self.cmd {
            Command::Info {} => "info",
            Command::Show(_) => "show",
            Command::Hide(_) => "hide",
            Command::Wipe(_) => "wipe",
            Command::Cache(_) => "cache",
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_cbor::Error> {
        serde_cbor::to_vec(self)
    }
}

/// Reply envelope
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Reply {
    pub error: i64,
    #[serde(default)]
    pub version: Option<String>,
    /// Device entries, kept raw until filtered by state
    #[serde(default)]
    pub devices: Vec<Value>,
}

impl Reply {
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_cbor::Error> {
        serde_cbor::from_slice(bytes)
    }
}

/// `state` field of a raw device entry
pub fn device_state(device: &Value) -> Option<&str> {
    match device {
        Value::Map(map) => match map.get(&Value::Text("state".to_string())) {
            Some(Value::Text(state)) => Some(state.as_str()),
            _ => None,
        },
        _ => None,
    }
}
