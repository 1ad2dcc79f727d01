//! Teledyne DALSA Sapera GigE Camera Driver (Componentized)
//!
//! Components:
//! - Connection: server discovery and device opening
//! - Resources: scoped device / buffer / transfer ownership
//! - Features: typed GenICam feature access
//! - Bridge: declarative property / feature bindings
//! - Acquisition: host image, ROI and single-frame capture
//! - Sequence: continuous acquisition worker
//!
//! The frame-grabber SDK is reached through [`components::sdk::AcquisitionSdk`].
//! With the `mock` feature (default) [`SaperaGigE::new_mock`] runs the whole
//! driver against the simulated SDK in [`components::mock`].

pub mod components;
pub mod config;

use async_trait::async_trait;
use gige_core::capabilities::{
    Device, ExposureControl, ImageSource, Parameterized, SequenceAcquisition, SequenceSettings,
};
use gige_core::data::{Frame, Roi};
use gige_core::error::{AdapterError, AdapterResult};
use gige_core::property::{Property, PropertySet, PropertyValue};
use parking_lot::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

pub use crate::components::bridge::names;
pub use crate::components::features::{DeviceInfo, PixelType, SaperaFeatures};
pub use crate::components::sdk::{AcquisitionSdk, ServerInfo};
pub use crate::components::sequence::{SequenceSummary, StopReason};
pub use crate::config::SaperaConfig;

use crate::components::acquisition::{SaperaAcquisition, SharedResources};
use crate::components::bridge::{AfterSet, PropertyBridge, SideEffect};
use crate::components::connection::SaperaConnection;
use crate::components::features::{BINNING_CHOICES, EXPOSURE_TIME, GAIN};
use crate::components::resources::{ReconfigureError, Reconfigure, ResourceTriple};
use crate::components::sdk::{BufferSpec, FeatureValue};
use crate::components::sequence::{SequencePlan, SequenceWorker};

/// Adapter name reported to hosts.
pub const DEVICE_NAME: &str = "SaperaGigE";

/// Value of the read-only "Description" property.
pub const DEVICE_DESCRIPTION: &str = "Sapera GigE Camera Adapter";

/// Everything [`open_session`] brings up on the blocking pool.
struct Session {
    resources: ResourceTriple,
    servers: Vec<ServerInfo>,
    server: ServerInfo,
    pixel_type: PixelType,
    sensor: (u32, u32),
    device_info: DeviceInfo,
}

/// Driver for Sapera GigE cameras.
///
/// # Drop Order
///
/// Fields drop in declaration order. `sequence` drops before `resources` so the
/// worker is told to stop before the foreground releases its reference to the
/// hardware. The worker holds its own reference and freezes the transfer on
/// exit, so the device is never left streaming.
pub struct SaperaGigE {
    config: SaperaConfig,
    sdk: Arc<dyn AcquisitionSdk>,

    sequence: SequenceWorker,
    resources: SharedResources,
    acquisition: SaperaAcquisition,

    properties: PropertySet,
    servers: Vec<ServerInfo>,
    device_info: DeviceInfo,
    last_sequence: Option<SequenceSummary>,
    initialized: bool,
}

impl SaperaGigE {
    /// Create an uninitialized driver on top of `sdk`.
    pub fn new(sdk: Arc<dyn AcquisitionSdk>, config: SaperaConfig) -> Self {
        let capturing = Arc::new(AtomicBool::new(false));
        let mut properties = PropertySet::new();
        properties.register(description_property());

        Self {
            config,
            sdk,
            sequence: SequenceWorker::new(capturing.clone()),
            resources: Arc::new(Mutex::new(None)),
            acquisition: SaperaAcquisition::new(capturing),
            properties,
            servers: Vec::new(),
            device_info: DeviceInfo::default(),
            last_sequence: None,
            initialized: false,
        }
    }

    /// Create a driver backed by the simulated SDK.
    #[cfg(feature = "mock")]
    pub fn new_mock(config: SaperaConfig) -> Self {
        Self::new(Arc::new(components::mock::MockSdk::new()), config)
    }

    /// Driver configuration.
    pub fn config(&self) -> &SaperaConfig {
        &self.config
    }

    /// Servers that expose an acquisition device. Does not require initialization.
    pub fn available_servers(&self) -> AdapterResult<Vec<ServerInfo>> {
        SaperaConnection::new(self.sdk.clone()).list_available_cameras()
    }

    /// Servers discovered by the last initialization.
    pub fn servers(&self) -> &[ServerInfo] {
        &self.servers
    }

    /// Identity snapshot taken at initialization.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.device_info
    }

    /// Current pixel type.
    pub fn pixel_type(&self) -> PixelType {
        self.acquisition.pixel_type()
    }

    /// Summary of the last stopped sequence.
    pub fn last_sequence(&self) -> Option<&SequenceSummary> {
        self.last_sequence.as_ref()
    }

    fn ensure_initialized(&self) -> AdapterResult<()> {
        if !self.initialized {
            return Err(AdapterError::NotInitialized);
        }
        Ok(())
    }

    fn register_properties(&mut self, session: &Session) -> AdapterResult<()> {
        let properties = &mut self.properties;
        properties.clear();
        properties.register(description_property());

        properties.register(
            Property::new(names::CAMERA_SERVER, PropertyValue::from(session.server.name.as_str()))
                .with_description("Frame-grabber server the camera is attached to")
                .with_allowed_values(session.servers.iter().map(|s| s.name.clone()))
                .read_only(),
        );
        properties.register(
            Property::new(names::BINNING, PropertyValue::Integer(1))
                .with_description("Symmetric binning factor")
                .with_allowed_values(BINNING_CHOICES.iter().map(|b| b.to_string())),
        );
        properties.register(
            Property::new(
                names::PIXEL_TYPE,
                PropertyValue::from(session.pixel_type.label()),
            )
            .with_description("Pixel depth of acquired images")
            .with_allowed_values(PixelType::all_choices()),
        );
        properties.register(
            Property::new(names::GAIN, PropertyValue::Float(self.config.default_gain))
                .with_description("Analog gain"),
        );
        properties.register(
            Property::new(
                names::EXPOSURE,
                PropertyValue::Float(self.config.default_exposure_ms),
            )
            .with_description("Exposure time")
            .with_units("ms"),
        );
        properties.register(
            Property::new(names::TEMPERATURE, PropertyValue::Float(0.0))
                .with_description("Sensor board temperature")
                .with_units("C")
                .read_only(),
        );

        for (label, value) in &session.device_info.strings {
            properties.register(Property::new(*label, PropertyValue::from(value.as_str())).read_only());
        }
        for (label, value) in &session.device_info.integers {
            properties.register(Property::new(*label, PropertyValue::Integer(*value)).read_only());
        }

        let device = session.resources.device();
        for binding in components::bridge::BINDINGS {
            if let Some(property) = properties.get(binding.property) {
                PropertyBridge::install_limits(binding, device, property)?;
            }
        }
        PropertyBridge::refresh_all(device, properties)
    }

    /// Rebuild the buffer under `change`.
    ///
    /// Returns the device's reason when it refused a new pixel format; the
    /// previous resources are then still in place. Any other failure leaves
    /// the driver uninitialized with everything released.
    fn reconfigure(&mut self, change: Reconfigure) -> AdapterResult<Option<String>> {
        let mut guard = self.resources.lock();
        let triple = guard.take().ok_or(AdapterError::NotInitialized)?;
        match triple.reconfigure(change) {
            Ok(triple) => {
                *guard = Some(triple);
                Ok(None)
            }
            Err(ReconfigureError::Rejected { resources, reason }) => {
                *guard = Some(resources);
                Ok(Some(reason))
            }
            Err(ReconfigureError::Failed(e)) => {
                drop(guard);
                tracing::error!(error = %e, "Buffer reconfiguration failed; camera released");
                self.initialized = false;
                Err(e)
            }
        }
    }

    fn apply_binning(&mut self, property: &Property) -> AdapterResult<()> {
        let binning = property
            .get()
            .as_i64()
            .and_then(|b| u32::try_from(b).ok())
            .ok_or_else(|| AdapterError::invalid_value(names::BINNING, "not a binning factor"))?;
        let spec = self.acquisition.buffer_spec_for(
            binning,
            self.acquisition.pixel_type(),
            self.config.buffer_count,
        );
        if let Some(reason) = self.reconfigure(Reconfigure {
            pixel_format: None,
            spec,
        })? {
            return Err(AdapterError::Reformat(reason));
        }
        self.acquisition.set_binning(binning);
        tracing::info!(binning, "Binning changed");
        Ok(())
    }

    fn apply_pixel_format(
        &mut self,
        property: &Property,
        previous: PropertyValue,
        value: FeatureValue,
    ) -> AdapterResult<()> {
        let pixel_type = value
            .as_str()
            .and_then(PixelType::from_feature)
            .ok_or_else(|| AdapterError::invalid_value(names::PIXEL_TYPE, value.to_string()))?;
        let spec = self.acquisition.buffer_spec_for(
            self.acquisition.binning(),
            pixel_type,
            self.config.buffer_count,
        );
        match self.reconfigure(Reconfigure {
            pixel_format: Some(value),
            spec,
        })? {
            None => {
                self.acquisition.set_pixel_type(pixel_type);
                tracing::info!(pixel_type = pixel_type.label(), "Pixel type changed");
                Ok(())
            }
            Some(reason) => {
                property.update(previous);
                Err(AdapterError::invalid_value(names::PIXEL_TYPE, reason))
            }
        }
    }

    fn exposure_ms(&self) -> f64 {
        self.properties
            .get(names::EXPOSURE)
            .and_then(|p| p.get().as_f64())
            .unwrap_or(self.config.default_exposure_ms)
    }
}

fn description_property() -> Property {
    Property::new(names::DESCRIPTION, PropertyValue::from(DEVICE_DESCRIPTION)).read_only()
}

/// Discover, open and configure the camera. Runs on the blocking pool.
///
/// Every resource created here is released if a later step fails.
fn open_session(sdk: Arc<dyn AcquisitionSdk>, config: &SaperaConfig) -> AdapterResult<Session> {
    let connection = SaperaConnection::new(sdk);
    let servers = connection.list_available_cameras()?;
    let server = SaperaConnection::select(&servers, config.server.as_deref())?.clone();
    let device = connection.open(&server)?;

    let pixel_type = match SaperaFeatures::pixel_type(&device)? {
        Some(pixel_type) => pixel_type,
        None => {
            tracing::warn!("Device pixel format unsupported, switching to Mono8");
            SaperaFeatures::set_pixel_type(&device, PixelType::Mono8)?;
            PixelType::Mono8
        }
    };
    let sensor = SaperaFeatures::sensor_size(&device, config.fallback_sensor_size());

    SaperaFeatures::set_binning(&device, 1)?;
    SaperaFeatures::set_float(&device, GAIN, config.default_gain)?;
    SaperaFeatures::set_float(&device, EXPOSURE_TIME, config.default_exposure_ms * 1000.0)?;
    let device_info = SaperaFeatures::device_info(&device)?;

    let spec = BufferSpec {
        count: config.buffer_count,
        format: pixel_type.buffer_format(),
        width: sensor.0,
        height: sensor.1,
        with_trash: true,
    };
    let resources = ResourceTriple::assemble(device, spec)?;

    Ok(Session {
        resources,
        servers,
        server,
        pixel_type,
        sensor,
        device_info,
    })
}

fn join_error(operation: &str, e: tokio::task::JoinError) -> AdapterError {
    AdapterError::Hardware(format!("{operation} task failed: {e}"))
}

#[async_trait]
impl Device for SaperaGigE {
    fn name(&self) -> &str {
        DEVICE_NAME
    }

    fn description(&self) -> &str {
        DEVICE_DESCRIPTION
    }

    async fn initialize(&mut self) -> AdapterResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.config.validate()?;

        let sdk = self.sdk.clone();
        let config = self.config.clone();
        let session = tokio::task::spawn_blocking(move || open_session(sdk, &config))
            .await
            .map_err(|e| join_error("initialization", e))??;

        self.register_properties(&session)?;
        self.acquisition
            .configure(session.sensor, 1, session.pixel_type);

        tracing::info!(
            server = %session.server.name,
            model = session.device_info.model_name().unwrap_or("unknown"),
            serial = session.device_info.serial_number().unwrap_or("unknown"),
            width = session.sensor.0,
            height = session.sensor.1,
            pixel_type = session.pixel_type.label(),
            "Sapera GigE camera initialized"
        );

        self.servers = session.servers;
        self.device_info = session.device_info;
        *self.resources.lock() = Some(session.resources);
        self.initialized = true;
        Ok(())
    }

    async fn shutdown(&mut self) -> AdapterResult<()> {
        let stopped = self.sequence.stop().await;
        if let Ok(Some(summary)) = &stopped {
            self.last_sequence = Some(summary.clone());
        }

        let triple = self.resources.lock().take();
        self.initialized = false;
        let Some(triple) = triple else {
            return stopped.map(|_| ());
        };

        let timeout = self.config.stop_timeout();
        let released = tokio::task::spawn_blocking(move || triple.teardown(timeout))
            .await
            .map_err(|e| join_error("shutdown", e))?;
        tracing::info!("Sapera GigE camera shut down");

        stopped?;
        released
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[async_trait]
impl ImageSource for SaperaGigE {
    async fn snap_image(&mut self) -> AdapterResult<()> {
        self.acquisition.ensure_idle()?;
        self.ensure_initialized()?;

        let resources = self.resources.clone();
        let timeout = self.config.snap_timeout();
        tokio::task::spawn_blocking(move || SaperaAcquisition::snap_blocking(&resources, timeout))
            .await
            .map_err(|e| join_error("snap", e))?
    }

    fn get_image_buffer(&mut self) -> AdapterResult<&[u8]> {
        self.ensure_initialized()?;
        self.acquisition.read_image(&self.resources)
    }

    fn image_width(&self) -> u32 {
        self.acquisition.image().width()
    }

    fn image_height(&self) -> u32 {
        self.acquisition.image().height()
    }

    fn image_bytes_per_pixel(&self) -> u32 {
        self.acquisition.pixel_type().bytes_per_pixel()
    }

    fn bit_depth(&self) -> u32 {
        self.acquisition.pixel_type().bit_depth()
    }

    fn set_roi(&mut self, roi: Roi) -> AdapterResult<()> {
        self.ensure_initialized()?;
        self.acquisition.set_roi(roi)
    }

    fn roi(&self) -> Roi {
        self.acquisition.roi()
    }
}

#[async_trait]
impl ExposureControl for SaperaGigE {
    async fn set_exposure(&mut self, exposure_ms: f64) -> AdapterResult<()> {
        self.set_property(names::EXPOSURE, PropertyValue::Float(exposure_ms))
            .await
    }

    async fn exposure(&self) -> AdapterResult<f64> {
        let value = self.get_property(names::EXPOSURE).await?;
        value
            .as_f64()
            .ok_or_else(|| AdapterError::Hardware(format!("exposure is not numeric: {value}")))
    }

    async fn set_binning(&mut self, binning: u32) -> AdapterResult<()> {
        self.set_property(names::BINNING, PropertyValue::Integer(i64::from(binning)))
            .await
    }

    fn binning(&self) -> u32 {
        self.acquisition.binning()
    }
}

#[async_trait]
impl SequenceAcquisition for SaperaGigE {
    async fn start_sequence_acquisition(
        &mut self,
        settings: SequenceSettings,
    ) -> AdapterResult<mpsc::Receiver<Arc<Frame>>> {
        self.ensure_initialized()?;
        if !self.sequence.is_running() {
            // Collect a run that ended on its own so its summary is kept.
            if let Some(summary) = self.sequence.stop().await? {
                self.last_sequence = Some(summary);
            }
        }
        let pixel_type = self.acquisition.pixel_type();
        let exposure =
            Duration::try_from_secs_f64(self.exposure_ms() / 1000.0).unwrap_or(Duration::ZERO);
        let plan = SequencePlan {
            rect: self.acquisition.readback_rect(),
            bit_depth: pixel_type.bit_depth(),
            bytes_per_pixel: pixel_type.bytes_per_pixel(),
            frame_timeout: exposure + self.config.snap_timeout(),
            stop_timeout: self.config.stop_timeout(),
            queue_depth: self.config.sequence_queue_depth,
        };
        self.sequence
            .start(self.resources.clone(), plan, settings)
    }

    async fn stop_sequence_acquisition(&mut self) -> AdapterResult<()> {
        let Some(summary) = self.sequence.stop().await? else {
            return Ok(());
        };
        let error = summary.error.clone();
        self.last_sequence = Some(summary);
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn is_capturing(&self) -> bool {
        self.acquisition.is_capturing()
    }
}

#[async_trait]
impl Parameterized for SaperaGigE {
    fn properties(&self) -> &PropertySet {
        &self.properties
    }

    async fn get_property(&self, name: &str) -> AdapterResult<PropertyValue> {
        let property = self.properties.require(name)?.clone();
        if let Some(binding) = PropertyBridge::binding(name) {
            let resources = self.resources.clone();
            let refreshed = property.clone();
            let span = tracing::Span::current();
            tokio::task::spawn_blocking(move || {
                let _entered = span.enter();
                let guard = resources.lock();
                let triple = guard.as_ref().ok_or(AdapterError::NotInitialized)?;
                PropertyBridge::before_get(binding, triple.device(), &refreshed)
            })
            .await
            .map_err(|e| join_error("property read", e))??;
        }
        Ok(property.get())
    }

    async fn set_property(&mut self, name: &str, value: PropertyValue) -> AdapterResult<()> {
        let property = self.properties.require(name)?.clone();
        let Some(binding) = PropertyBridge::binding(name) else {
            return property.set(value);
        };
        if binding.side_effect != SideEffect::None {
            self.acquisition.ensure_idle()?;
        }
        self.ensure_initialized()?;

        let previous = property.get();
        property.set(value)?;
        let resources = self.resources.clone();
        let written = property.clone();
        let confirmed = previous.clone();
        let span = tracing::Span::current();
        let outcome = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let guard = resources.lock();
            match guard.as_ref() {
                Some(triple) => {
                    PropertyBridge::after_set(binding, triple.device(), &written, &confirmed)
                }
                None => {
                    written.update(confirmed);
                    Err(AdapterError::NotInitialized)
                }
            }
        })
        .await
        .map_err(|e| join_error("property write", e))??;

        match outcome {
            AfterSet::Applied(SideEffect::Geometry) => self.apply_binning(&property),
            AfterSet::Applied(_) => Ok(()),
            AfterSet::Deferred { value, .. } => self.apply_pixel_format(&property, previous, value),
        }
    }
}

impl Drop for SaperaGigE {
    fn drop(&mut self) {
        if self.initialized {
            tracing::warn!(
                "SaperaGigE dropped while initialized. \
                 Call shutdown().await before dropping for a bounded transfer stop."
            );
        }
    }
}
