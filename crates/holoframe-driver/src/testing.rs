//! In-process fake display driver for tests
//!
//! Listens on a Unix socket inside a temporary directory, speaks the same
//! REP-side framing as the real driver, records every request and answers
//! from a scripted state.

use holoframe_core::{DeviceReport, RawCalibration};
use serde_cbor::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::debug;

use crate::protocol::QuiltSettings;
use crate::transport::{
    handshake_bytes, parse_handshake, take_frame, Framing, TransportOptions, PROTO_REP0, PROTO_REQ0,
};

/// One request as the fake driver received it
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedRequest {
    /// Command name (`info`, `show`, ...)
    pub command: String,
    /// Command fields
    pub fields: Value,
    pub bin: Vec<u8>,
}

impl RecordedRequest {
    pub fn target_display(&self) -> Option<i64> {
        match lookup(&self.fields, "targetDisplay") {
            Some(Value::Integer(i)) => i64::try_from(*i).ok(),
            _ => None,
        }
    }

    /// Quilt settings of a `show` or `cache` request
    pub fn quilt_settings(&self) -> Option<QuiltSettings> {
        let settings = lookup(&self.fields, "quilt").and_then(|quilt| lookup(quilt, "settings"))?;
        serde_cbor::value::from_value(settings.clone()).ok()
    }
}

#[derive(Debug, Default)]
struct Script {
    version: String,
    devices: Vec<Value>,
    error: i64,
    silent: bool,
    raw_reply: Option<Value>,
    requests: Vec<RecordedRequest>,
}

pub struct FakeDriver {
    _dir: TempDir,
    path: PathBuf,
    script: Arc<Mutex<Script>>,
    server: Option<JoinHandle<()>>,
}

impl FakeDriver {
    /// Bind a fresh socket and start answering
    pub async fn start() -> Self {
        let dir = TempDir::new().unwrap_or_else(|e| panic!("temp dir: {}", e));
        let path = dir.path().join("driver.ipc");
        let listener = UnixListener::bind(&path).unwrap_or_else(|e| panic!("bind {}: {}", path.display(), e));

        let script = Arc::new(Mutex::new(Script {
            version: "1.2.2".to_string(),
            ..Script::default()
        }));

        let shared = script.clone();
        let server = tokio::spawn(async move {
            let mut connections = JoinSet::new();
            while let Ok((stream, _)) = listener.accept().await {
                connections.spawn(serve(stream, shared.clone()));
            }
        });

        Self {
            _dir: dir,
            path,
            script,
            server: Some(server),
        }
    }

    /// Transport options pointing at this driver
    pub fn options(&self) -> TransportOptions {
        TransportOptions {
            address: self.address(),
            timeout: Duration::from_secs(2),
        }
    }

    pub fn address(&self) -> String {
        format!("ipc://{}", self.path.display())
    }

    pub fn set_version(&self, version: &str) {
        self.script().version = version.to_string();
    }

    pub fn set_devices(&self, devices: Vec<DeviceReport>) {
        let devices = devices
            .iter()
            .map(|d| serde_cbor::value::to_value(d).unwrap_or_else(|e| panic!("device to cbor: {}", e)))
            .collect();
        self.script().devices = devices;
    }

    /// Device entries sent verbatim
    pub fn set_raw_devices(&self, devices: Vec<Value>) {
        self.script().devices = devices;
    }

    /// Error code put in every following reply
    pub fn set_error(&self, code: i64) {
        self.script().error = code;
    }

    /// Stop answering (requests are still recorded)
    pub fn set_silent(&self, silent: bool) {
        self.script().silent = silent;
    }

    /// Reply sent verbatim instead of a generated one
    pub fn set_raw_reply(&self, reply: Option<Value>) {
        self.script().raw_reply = reply;
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.script().requests.clone()
    }

    /// Close the listener and every open connection
    pub async fn shutdown(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
            let _ = server.await;
        }
        let _ = std::fs::remove_file(&self.path);
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for FakeDriver {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

/// Device report with plausible portrait calibration
pub fn sample_report(serial: &str, hardware_type: &str, index: i64) -> DeviceReport {
    DeviceReport {
        state: "ok".to_string(),
        hardware_version: hardware_type.to_string(),
        hwid: format!("{}-HWID", serial),
        hdmi: "LKG79PxDHMAF".to_string(),
        index,
        window_coords: Some([2560.0, 0.0]),
        calibration: RawCalibration {
            serial: serial.to_string(),
            pitch: 52.0,
            slope: -7.0,
            center: 0.5,
            view_cone: 40.0,
            inv_view: 0.0,
            vertical_angle: 0.0,
            dpi: 324.0,
            screen_w: 1536.0,
            screen_h: 2048.0,
            flip_image_x: 0.0,
            flip_image_y: 0.0,
            flip_subp: false,
            extra: BTreeMap::new(),
        },
        extra: BTreeMap::new(),
    }
}

async fn serve(mut stream: UnixStream, script: Arc<Mutex<Script>>) {
    let mut hello = [0u8; 8];
    if stream.read_exact(&mut hello).await.is_err() || parse_handshake(&hello) != Some(PROTO_REQ0) {
        return;
    }
    if stream.write_all(&handshake_bytes(PROTO_REP0)).await.is_err() {
        return;
    }

    let mut pending = Vec::new();
    loop {
        let body = match take_frame(&mut pending, Framing::Ipc) {
            Ok(Some(body)) => body,
            Ok(None) => match stream.read_buf(&mut pending).await {
                Ok(0) | Err(_) => return,
                Ok(_) => continue,
            },
            Err(_) => return,
        };
        if body.len() < 4 {
            return;
        }

        let (id, payload) = body.split_at(4);
        let reply = {
            let mut script = script.lock().unwrap_or_else(|e| e.into_inner());
            let request = record(payload);
            debug!(command = %request.command, "Fake driver received request");
            let reply = answer(&script, &request.command);
            script.requests.push(request);
            if script.silent {
                continue;
            }
            reply
        };

        let Ok(encoded) = serde_cbor::to_vec(&reply) else {
            return;
        };
        let mut frame = Framing::Ipc.header((id.len() + encoded.len()) as u64);
        frame.extend_from_slice(id);
        frame.extend_from_slice(&encoded);
        if stream.write_all(&frame).await.is_err() {
            return;
        }
    }
}

fn record(payload: &[u8]) -> RecordedRequest {
    let envelope: Value = serde_cbor::from_slice(payload).unwrap_or(Value::Null);
    let (command, fields) = match lookup(&envelope, "cmd") {
        Some(Value::Map(cmd)) => match cmd.iter().next() {
            Some((Value::Text(name), fields)) => (name.clone(), fields.clone()),
            _ => (String::new(), Value::Null),
        },
        _ => (String::new(), Value::Null),
    };
    let bin = match lookup(&envelope, "bin") {
        Some(Value::Bytes(bin)) => bin.clone(),
        _ => Vec::new(),
    };
    RecordedRequest { command, fields, bin }
}

fn answer(script: &Script, command: &str) -> Value {
    if let Some(raw) = &script.raw_reply {
        return raw.clone();
    }

    let mut reply = BTreeMap::new();
    let code = match command {
        "info" | "show" | "hide" | "wipe" | "cache" => script.error,
        _ => 2,
    };
    reply.insert(text("error"), Value::Integer(code.into()));
    if command == "info" {
        reply.insert(text("version"), text(&script.version));
        reply.insert(text("devices"), Value::Array(script.devices.clone()));
    }
    Value::Map(reply)
}

fn lookup<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Map(map) => map.get(&text(key)),
        _ => None,
    }
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}
