//! Simulated Frame-Grabber SDK
//!
//! [`MockSdk`] implements [`AcquisitionSdk`] in memory so the whole driver can
//! run without a frame grabber. It models the parts of the real SDK the driver
//! depends on:
//!
//! - servers with and without acquisition devices
//! - reference rules between objects: a buffer cannot be destroyed while a
//!   transfer uses it, a device cannot be destroyed while a buffer uses it
//! - a GenICam-style feature table with ranges, read-only features, missing
//!   features, and a `PixelFormat` feature that is locked while a transfer
//!   exists on the device
//! - exposure-timed snap and grab with a deterministic test pattern
//!
//! Failures are injected with [`MockSdk::inject`] (one-shot) and
//! [`MockSdk::set_stalled`] (transfer never completes). Every object call is
//! recorded and can be inspected with [`MockSdk::calls`].

use crate::components::features::{
    BINNING_HORIZONTAL, BINNING_VERTICAL, DEVICE_TEMPERATURE, EXPOSURE_TIME, GAIN, PIXEL_FORMAT,
    SENSOR_HEIGHT, SENSOR_WIDTH,
};
use crate::components::sdk::{
    AcquisitionSdk, BufferId, BufferSpec, DeviceId, FeatureInfo, FeatureStore, FeatureValue,
    SdkError, SdkResult, ServerInfo, TransferId,
};
use gige_core::data::Roi;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

/// Failures that can be injected into the next matching call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockFault {
    /// Server enumeration fails.
    DetectServers,
    /// Device creation fails.
    CreateDevice,
    /// Buffer creation fails.
    CreateBuffer,
    /// Transfer creation fails.
    CreateTransfer,
    /// Snap fails to start.
    Snap,
    /// Grab fails to start.
    Grab,
    /// The next write to this feature is rejected.
    RejectFeature(String),
}

/// Configuration of the simulated camera.
#[derive(Debug, Clone)]
pub struct MockCameraConfig {
    /// Servers reported by discovery, in order.
    pub servers: Vec<ServerInfo>,
    /// Sensor width in pixels.
    pub sensor_width: u32,
    /// Sensor height in pixels.
    pub sensor_height: u32,
    /// Reported device temperature in degrees Celsius.
    pub temperature_c: f64,
    /// Exposure range in microseconds.
    pub exposure_range_us: (f64, f64),
    /// Gain range.
    pub gain_range: (f64, f64),
}

impl Default for MockCameraConfig {
    fn default() -> Self {
        Self {
            servers: vec![
                ServerInfo {
                    name: "System".to_string(),
                    acq_device_count: 0,
                },
                ServerInfo {
                    name: "Nano-M1280_1".to_string(),
                    acq_device_count: 1,
                },
            ],
            sensor_width: 1280,
            sensor_height: 1024,
            temperature_c: 42.5,
            exposure_range_us: (10.0, 1_000_000.0),
            gain_range: (1.0, 8.0),
        }
    }
}

/// Object and call counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockStats {
    /// Devices created.
    pub devices_created: usize,
    /// Devices destroyed.
    pub devices_destroyed: usize,
    /// Buffers created.
    pub buffers_created: usize,
    /// Buffers destroyed.
    pub buffers_destroyed: usize,
    /// Transfers created.
    pub transfers_created: usize,
    /// Transfers destroyed.
    pub transfers_destroyed: usize,
    /// Snap calls.
    pub snaps: usize,
    /// Grab calls.
    pub grabs: usize,
    /// Freeze calls.
    pub freezes: usize,
    /// Abort calls.
    pub aborts: usize,
    /// Frames rendered into buffers.
    pub frames: u64,
}

struct MockFeature {
    value: FeatureValue,
    info: FeatureInfo,
    choices: Vec<String>,
}

struct MockBuffer {
    device: u32,
    spec: BufferSpec,
    slots: Vec<Vec<u8>>,
    latest: Option<usize>,
}

#[derive(Debug, Clone, Copy)]
enum TransferMode {
    Idle,
    Snap { remaining: u32, next_at: Instant },
    Grab { next_at: Instant },
    Freezing,
}

struct MockTransfer {
    device: u32,
    buffer: u32,
    mode: TransferMode,
}

enum Progress {
    Done(Option<u64>),
    WaitUntil(Instant),
    Never,
}

struct MockState {
    config: MockCameraConfig,
    next_handle: u32,
    devices: HashMap<u32, String>,
    buffers: HashMap<u32, MockBuffer>,
    transfers: HashMap<u32, MockTransfer>,
    features: BTreeMap<String, MockFeature>,
    faults: Vec<MockFault>,
    stalled: bool,
    frame_counter: u64,
    stats: MockStats,
    calls: Vec<String>,
}

impl MockState {
    fn handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    fn take_fault(&mut self, fault: &MockFault) -> bool {
        match self.faults.iter().position(|f| f == fault) {
            Some(idx) => {
                self.faults.remove(idx);
                true
            }
            None => false,
        }
    }

    fn check_device(&self, device: DeviceId) -> SdkResult<()> {
        if self.devices.contains_key(&device.0) {
            Ok(())
        } else {
            Err(SdkError::InvalidHandle {
                kind: "device",
                id: device.0,
            })
        }
    }

    fn exposure(&self) -> Duration {
        let us = self
            .features
            .get(EXPOSURE_TIME)
            .and_then(|f| f.value.as_f64())
            .unwrap_or(1000.0);
        Duration::from_secs_f64(us.max(0.0) / 1_000_000.0)
    }

    fn pixel_modulo(&self) -> u64 {
        match self.features.get(PIXEL_FORMAT).and_then(|f| f.value.as_str()) {
            Some("Mono10") => 1024,
            _ => 256,
        }
    }

    fn grabbing_on(&self, device: u32) -> bool {
        self.transfers
            .values()
            .any(|t| t.device == device && !matches!(t.mode, TransferMode::Idle))
    }

    /// Render the next test-pattern frame into the transfer's buffer.
    fn render(&mut self, buffer: u32) -> u64 {
        let frame = self.frame_counter;
        self.frame_counter += 1;
        self.stats.frames += 1;
        let modulo = self.pixel_modulo();
        if let Some(buf) = self.buffers.get_mut(&buffer) {
            let slot = buf.latest.map_or(0, |i| (i + 1) % buf.slots.len());
            let bpp = buf.spec.format.bytes_per_pixel() as usize;
            let width = buf.spec.width as u64;
            let data = &mut buf.slots[slot];
            for (i, px) in data.chunks_exact_mut(bpp).enumerate() {
                let x = i as u64 % width;
                let y = i as u64 / width;
                let value = (x + y + frame) % modulo;
                if bpp == 1 {
                    px[0] = value as u8;
                } else {
                    px.copy_from_slice(&(value as u16).to_le_bytes());
                }
            }
            buf.latest = Some(slot);
        }
        frame
    }

    /// Advance a snap or freeze toward idle.
    fn advance_to_idle(&mut self, transfer: TransferId, now: Instant) -> SdkResult<Progress> {
        let exposure = self.exposure();
        let stalled = self.stalled;
        let tr = self
            .transfers
            .get_mut(&transfer.0)
            .ok_or(SdkError::InvalidHandle {
                kind: "transfer",
                id: transfer.0,
            })?;
        let buffer = tr.buffer;
        let mode = tr.mode;
        match mode {
            TransferMode::Idle => Ok(Progress::Done(None)),
            _ if stalled => Ok(Progress::Never),
            TransferMode::Freezing => {
                tr.mode = TransferMode::Idle;
                Ok(Progress::Done(None))
            }
            TransferMode::Grab { .. } => Ok(Progress::Never),
            TransferMode::Snap { remaining, next_at } => {
                if now < next_at {
                    return Ok(Progress::WaitUntil(next_at));
                }
                if remaining <= 1 {
                    tr.mode = TransferMode::Idle;
                } else {
                    tr.mode = TransferMode::Snap {
                        remaining: remaining - 1,
                        next_at: now + exposure,
                    };
                }
                let done = matches!(tr.mode, TransferMode::Idle);
                let frame = self.render(buffer);
                if done {
                    Ok(Progress::Done(Some(frame)))
                } else {
                    Ok(Progress::WaitUntil(now + exposure))
                }
            }
        }
    }

    /// Advance a grab to its next frame.
    fn advance_grab(&mut self, transfer: TransferId, now: Instant) -> SdkResult<Progress> {
        let exposure = self.exposure();
        let stalled = self.stalled;
        let tr = self
            .transfers
            .get_mut(&transfer.0)
            .ok_or(SdkError::InvalidHandle {
                kind: "transfer",
                id: transfer.0,
            })?;
        let buffer = tr.buffer;
        let mode = tr.mode;
        match mode {
            TransferMode::Grab { .. } if stalled => Ok(Progress::Never),
            TransferMode::Grab { next_at } => {
                if now < next_at {
                    return Ok(Progress::WaitUntil(next_at));
                }
                tr.mode = TransferMode::Grab {
                    next_at: now + exposure,
                };
                Ok(Progress::Done(Some(self.render(buffer))))
            }
            _ => Ok(Progress::Done(None)),
        }
    }
}

/// In-memory implementation of [`AcquisitionSdk`].
pub struct MockSdk {
    state: Mutex<MockState>,
}

impl Default for MockSdk {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSdk {
    /// Simulated camera with default configuration.
    pub fn new() -> Self {
        Self::with_config(MockCameraConfig::default())
    }

    /// Simulated camera with custom configuration.
    pub fn with_config(config: MockCameraConfig) -> Self {
        let features = default_features(&config);
        Self {
            state: Mutex::new(MockState {
                config,
                next_handle: 0,
                devices: HashMap::new(),
                buffers: HashMap::new(),
                transfers: HashMap::new(),
                features,
                faults: Vec::new(),
                stalled: false,
                frame_counter: 0,
                stats: MockStats::default(),
                calls: Vec::new(),
            }),
        }
    }

    /// Simulated system with servers but no acquisition device.
    pub fn without_cameras() -> Self {
        Self::with_config(MockCameraConfig {
            servers: vec![ServerInfo {
                name: "System".to_string(),
                acq_device_count: 0,
            }],
            ..Default::default()
        })
    }

    /// Fail the next call matching `fault`.
    pub fn inject(&self, fault: MockFault) {
        self.state.lock().faults.push(fault);
    }

    /// Make every transfer wait run into its timeout.
    pub fn set_stalled(&self, stalled: bool) {
        self.state.lock().stalled = stalled;
    }

    /// Change the reported device temperature.
    pub fn set_temperature(&self, celsius: f64) {
        if let Some(f) = self.state.lock().features.get_mut(DEVICE_TEMPERATURE) {
            f.value = FeatureValue::Float(celsius);
        }
    }

    /// Remove a feature from the device, as if the model did not implement it.
    pub fn remove_feature(&self, name: &str) {
        self.state.lock().features.remove(name);
    }

    /// Overwrite a feature value, bypassing choices, ranges and locks.
    pub fn override_feature(&self, name: &str, value: FeatureValue) {
        if let Some(f) = self.state.lock().features.get_mut(name) {
            f.value = value;
        }
    }

    /// Current value of a feature, bypassing availability checks.
    pub fn feature(&self, name: &str) -> Option<FeatureValue> {
        self.state.lock().features.get(name).map(|f| f.value.clone())
    }

    /// Counter snapshot.
    pub fn stats(&self) -> MockStats {
        self.state.lock().stats.clone()
    }

    /// Number of live (devices, buffers, transfers).
    pub fn live_objects(&self) -> (usize, usize, usize) {
        let st = self.state.lock();
        (st.devices.len(), st.buffers.len(), st.transfers.len())
    }

    /// Geometry and format of every live buffer.
    pub fn live_buffers(&self) -> Vec<BufferSpec> {
        self.state.lock().buffers.values().map(|b| b.spec).collect()
    }

    /// Object and feature-write calls in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Whether any transfer is snapping or grabbing.
    pub fn is_acquiring(&self) -> bool {
        self.state
            .lock()
            .transfers
            .values()
            .any(|t| !matches!(t.mode, TransferMode::Idle))
    }

    fn block_until(
        &self,
        timeout: Duration,
        mut step: impl FnMut(&mut MockState, Instant) -> SdkResult<Progress>,
    ) -> SdkResult<Option<Option<u64>>> {
        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            let progress = {
                let mut st = self.state.lock();
                step(&mut *st, now)?
            };
            let until = match progress {
                Progress::Done(frame) => return Ok(Some(frame)),
                Progress::WaitUntil(at) => at.min(deadline),
                Progress::Never => deadline,
            };
            if now >= deadline {
                return Ok(None);
            }
            std::thread::sleep(until.saturating_duration_since(now));
        }
    }
}

fn feature(value: FeatureValue, writable: bool) -> MockFeature {
    MockFeature {
        value,
        info: FeatureInfo {
            min: None,
            max: None,
            writable,
        },
        choices: Vec::new(),
    }
}

fn ranged(value: f64, min: f64, max: f64) -> MockFeature {
    MockFeature {
        value: FeatureValue::Float(value),
        info: FeatureInfo {
            min: Some(min),
            max: Some(max),
            writable: true,
        },
        choices: Vec::new(),
    }
}

fn choice(value: FeatureValue, choices: &[&str]) -> MockFeature {
    MockFeature {
        value,
        info: FeatureInfo {
            min: None,
            max: None,
            writable: true,
        },
        choices: choices.iter().map(|c| c.to_string()).collect(),
    }
}

fn default_features(config: &MockCameraConfig) -> BTreeMap<String, MockFeature> {
    let mut features = BTreeMap::new();
    let mut add = |name: &str, f: MockFeature| {
        features.insert(name.to_string(), f);
    };

    add(
        PIXEL_FORMAT,
        choice(FeatureValue::String("Mono8".into()), &["Mono8", "Mono10"]),
    );
    add(BINNING_HORIZONTAL, choice(FeatureValue::Integer(1), &["1", "2", "4"]));
    add(BINNING_VERTICAL, choice(FeatureValue::Integer(1), &["1", "2", "4"]));
    add(GAIN, ranged(2.0, config.gain_range.0, config.gain_range.1));
    add(
        EXPOSURE_TIME,
        ranged(
            10_000.0,
            config.exposure_range_us.0,
            config.exposure_range_us.1,
        ),
    );
    add(
        DEVICE_TEMPERATURE,
        feature(FeatureValue::Float(config.temperature_c), false),
    );
    add(
        SENSOR_WIDTH,
        feature(FeatureValue::Integer(i64::from(config.sensor_width)), false),
    );
    add(
        SENSOR_HEIGHT,
        feature(FeatureValue::Integer(i64::from(config.sensor_height)), false),
    );

    for (name, value) in [
        ("DeviceVendorName", "Teledyne DALSA"),
        ("DeviceFamilyName", "Genie Nano"),
        ("DeviceModelName", "Nano-M1280"),
        ("DeviceVersion", "1.0"),
        ("DeviceFirmwareVersion", "1.07.00"),
        ("DeviceSerialNumber", "S1234567"),
        ("DeviceUserID", "bench-1"),
        ("deviceMacAddress", "00:01:0D:C2:AA:01"),
        ("sensorColorType", "Monochrome"),
        ("PixelCoding", "Mono"),
    ] {
        add(name, feature(FeatureValue::String(value.into()), false));
    }
    for (name, value) in [("BlackLevel", 0), ("pixelSizeInput", 10), ("PixelSize", 8)] {
        add(name, feature(FeatureValue::Integer(value), false));
    }

    features
}

impl FeatureStore for MockSdk {
    fn is_feature_available(&self, device: DeviceId, name: &str) -> SdkResult<bool> {
        let st = self.state.lock();
        st.check_device(device)?;
        Ok(st.features.contains_key(name))
    }

    fn get_feature(&self, device: DeviceId, name: &str) -> SdkResult<FeatureValue> {
        let st = self.state.lock();
        st.check_device(device)?;
        st.features
            .get(name)
            .map(|f| f.value.clone())
            .ok_or_else(|| SdkError::FeatureUnavailable(name.to_string()))
    }

    fn set_feature(&self, device: DeviceId, name: &str, value: FeatureValue) -> SdkResult<()> {
        let mut st = self.state.lock();
        st.check_device(device)?;
        st.calls.push(format!("set_feature {}={}", name, value));

        let rejected = |reason: &str| SdkError::Rejected {
            name: name.to_string(),
            reason: reason.to_string(),
        };

        if st.take_fault(&MockFault::RejectFeature(name.to_string())) {
            return Err(rejected("injected rejection"));
        }
        if name == PIXEL_FORMAT && st.transfers.values().any(|t| t.device == device.0) {
            return Err(rejected("locked while a transfer is connected"));
        }
        if (name == BINNING_HORIZONTAL || name == BINNING_VERTICAL) && st.grabbing_on(device.0) {
            return Err(rejected("locked while acquiring"));
        }

        let f = st
            .features
            .get_mut(name)
            .ok_or_else(|| SdkError::FeatureUnavailable(name.to_string()))?;
        if !f.info.writable {
            return Err(rejected("feature is read-only"));
        }
        if !f.choices.is_empty() && !f.choices.iter().any(|c| *c == value.to_string()) {
            return Err(rejected("value is not an enumeration entry"));
        }
        let numeric = value.as_f64();
        if let (Some(v), Some(min)) = (numeric, f.info.min) {
            if v < min {
                return Err(rejected("below minimum"));
            }
        }
        if let (Some(v), Some(max)) = (numeric, f.info.max) {
            if v > max {
                return Err(rejected("above maximum"));
            }
        }
        let value = match (&f.value, value) {
            (FeatureValue::Float(_), FeatureValue::Integer(v)) => FeatureValue::Float(v as f64),
            (_, v) => v,
        };
        f.value = value;
        Ok(())
    }

    fn feature_info(&self, device: DeviceId, name: &str) -> SdkResult<FeatureInfo> {
        let st = self.state.lock();
        st.check_device(device)?;
        st.features
            .get(name)
            .map(|f| f.info)
            .ok_or_else(|| SdkError::FeatureUnavailable(name.to_string()))
    }
}

impl AcquisitionSdk for MockSdk {
    fn detect_servers(&self) -> SdkResult<Vec<ServerInfo>> {
        let mut st = self.state.lock();
        if st.take_fault(&MockFault::DetectServers) {
            return Err(SdkError::Failed("server enumeration failed".into()));
        }
        Ok(st.config.servers.clone())
    }

    fn create_device(&self, server: &str) -> SdkResult<DeviceId> {
        let mut st = self.state.lock();
        st.calls.push("create_device".into());
        if st.take_fault(&MockFault::CreateDevice) {
            return Err(SdkError::CreateFailed("device did not respond".into()));
        }
        let known = st
            .config
            .servers
            .iter()
            .any(|s| s.name == server && s.acq_device_count > 0);
        if !known {
            return Err(SdkError::CreateFailed(format!(
                "server '{}' has no acquisition device",
                server
            )));
        }
        let id = st.handle();
        st.devices.insert(id, server.to_string());
        st.stats.devices_created += 1;
        Ok(DeviceId(id))
    }

    fn destroy_device(&self, device: DeviceId) -> SdkResult<()> {
        let mut st = self.state.lock();
        st.calls.push("destroy_device".into());
        st.check_device(device)?;
        if st.buffers.values().any(|b| b.device == device.0) {
            return Err(SdkError::Failed("device still has buffers".into()));
        }
        st.devices.remove(&device.0);
        st.stats.devices_destroyed += 1;
        Ok(())
    }

    fn create_buffer(&self, device: DeviceId, spec: &BufferSpec) -> SdkResult<BufferId> {
        let mut st = self.state.lock();
        st.calls.push("create_buffer".into());
        st.check_device(device)?;
        if st.take_fault(&MockFault::CreateBuffer) {
            return Err(SdkError::CreateFailed("out of buffer memory".into()));
        }
        if spec.count == 0 || spec.width == 0 || spec.height == 0 {
            return Err(SdkError::CreateFailed("empty buffer layout".into()));
        }
        let slots = spec.count + usize::from(spec.with_trash);
        let id = st.handle();
        st.buffers.insert(
            id,
            MockBuffer {
                device: device.0,
                spec: *spec,
                slots: vec![vec![0; spec.frame_bytes()]; slots],
                latest: None,
            },
        );
        st.stats.buffers_created += 1;
        Ok(BufferId(id))
    }

    fn destroy_buffer(&self, buffer: BufferId) -> SdkResult<()> {
        let mut st = self.state.lock();
        st.calls.push("destroy_buffer".into());
        if !st.buffers.contains_key(&buffer.0) {
            return Err(SdkError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            });
        }
        if st.transfers.values().any(|t| t.buffer == buffer.0) {
            return Err(SdkError::Failed("buffer still has a transfer".into()));
        }
        st.buffers.remove(&buffer.0);
        st.stats.buffers_destroyed += 1;
        Ok(())
    }

    fn create_transfer(&self, device: DeviceId, buffer: BufferId) -> SdkResult<TransferId> {
        let mut st = self.state.lock();
        st.calls.push("create_transfer".into());
        st.check_device(device)?;
        if !st.buffers.contains_key(&buffer.0) {
            return Err(SdkError::InvalidHandle {
                kind: "buffer",
                id: buffer.0,
            });
        }
        if st.take_fault(&MockFault::CreateTransfer) {
            return Err(SdkError::CreateFailed("transfer engine unavailable".into()));
        }
        let id = st.handle();
        st.transfers.insert(
            id,
            MockTransfer {
                device: device.0,
                buffer: buffer.0,
                mode: TransferMode::Idle,
            },
        );
        st.stats.transfers_created += 1;
        Ok(TransferId(id))
    }

    fn destroy_transfer(&self, transfer: TransferId) -> SdkResult<()> {
        let mut st = self.state.lock();
        st.calls.push("destroy_transfer".into());
        match st.transfers.remove(&transfer.0) {
            Some(_) => {
                st.stats.transfers_destroyed += 1;
                Ok(())
            }
            None => Err(SdkError::InvalidHandle {
                kind: "transfer",
                id: transfer.0,
            }),
        }
    }

    fn snap(&self, transfer: TransferId, count: u32) -> SdkResult<()> {
        let mut st = self.state.lock();
        st.stats.snaps += 1;
        if st.take_fault(&MockFault::Snap) {
            return Err(SdkError::Failed("snap could not be started".into()));
        }
        let next_at = Instant::now() + st.exposure();
        let tr = st
            .transfers
            .get_mut(&transfer.0)
            .ok_or(SdkError::InvalidHandle {
                kind: "transfer",
                id: transfer.0,
            })?;
        if !matches!(tr.mode, TransferMode::Idle) {
            return Err(SdkError::Failed("transfer already active".into()));
        }
        tr.mode = TransferMode::Snap {
            remaining: count.max(1),
            next_at,
        };
        Ok(())
    }

    fn grab(&self, transfer: TransferId) -> SdkResult<()> {
        let mut st = self.state.lock();
        st.stats.grabs += 1;
        if st.take_fault(&MockFault::Grab) {
            return Err(SdkError::Failed("grab could not be started".into()));
        }
        let next_at = Instant::now() + st.exposure();
        let tr = st
            .transfers
            .get_mut(&transfer.0)
            .ok_or(SdkError::InvalidHandle {
                kind: "transfer",
                id: transfer.0,
            })?;
        if !matches!(tr.mode, TransferMode::Idle) {
            return Err(SdkError::Failed("transfer already active".into()));
        }
        tr.mode = TransferMode::Grab { next_at };
        Ok(())
    }

    fn freeze(&self, transfer: TransferId) -> SdkResult<()> {
        let mut st = self.state.lock();
        st.stats.freezes += 1;
        let tr = st
            .transfers
            .get_mut(&transfer.0)
            .ok_or(SdkError::InvalidHandle {
                kind: "transfer",
                id: transfer.0,
            })?;
        if matches!(tr.mode, TransferMode::Grab { .. }) {
            tr.mode = TransferMode::Freezing;
        }
        Ok(())
    }

    fn abort(&self, transfer: TransferId) -> SdkResult<()> {
        let mut st = self.state.lock();
        st.stats.aborts += 1;
        let tr = st
            .transfers
            .get_mut(&transfer.0)
            .ok_or(SdkError::InvalidHandle {
                kind: "transfer",
                id: transfer.0,
            })?;
        tr.mode = TransferMode::Idle;
        Ok(())
    }

    fn wait(&self, transfer: TransferId, timeout: Duration) -> SdkResult<bool> {
        let outcome = self.block_until(timeout, |st, now| st.advance_to_idle(transfer, now))?;
        Ok(outcome.is_some())
    }

    fn wait_frame(&self, transfer: TransferId, timeout: Duration) -> SdkResult<Option<u64>> {
        let outcome = self.block_until(timeout, |st, now| st.advance_grab(transfer, now))?;
        Ok(outcome.flatten())
    }

    fn read_rect(&self, buffer: BufferId, rect: Roi, out: &mut [u8]) -> SdkResult<()> {
        let st = self.state.lock();
        let buf = st.buffers.get(&buffer.0).ok_or(SdkError::InvalidHandle {
            kind: "buffer",
            id: buffer.0,
        })?;
        if !rect.fits_within(buf.spec.width, buf.spec.height) {
            return Err(SdkError::Failed(format!(
                "rectangle {}x{}+{}+{} outside {}x{} buffer",
                rect.width, rect.height, rect.x, rect.y, buf.spec.width, buf.spec.height
            )));
        }
        let bpp = buf.spec.format.bytes_per_pixel() as usize;
        let row_bytes = rect.width as usize * bpp;
        if out.len() != row_bytes * rect.height as usize {
            return Err(SdkError::Failed(format!(
                "destination holds {} bytes, rectangle needs {}",
                out.len(),
                row_bytes * rect.height as usize
            )));
        }
        let Some(slot) = buf.latest else {
            out.fill(0);
            return Ok(());
        };
        let src = &buf.slots[slot];
        let stride = buf.spec.width as usize * bpp;
        for (row, dst) in out.chunks_exact_mut(row_bytes).enumerate() {
            let start = (rect.y as usize + row) * stride + rect.x as usize * bpp;
            dst.copy_from_slice(&src[start..start + row_bytes]);
        }
        Ok(())
    }
}
