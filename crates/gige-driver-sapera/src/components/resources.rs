//! Scoped Hardware Resources
//!
//! Owning wrappers around the three SDK objects an acquisition needs:
//!
//! - [`AcqDevice`]: the opened camera
//! - [`FrameBuffer`]: frame memory bound to a device
//! - [`Transfer`]: the engine moving frames from device to buffer
//!
//! Each wrapper releases its SDK object on drop. Dependents hold a clone of
//! what they depend on (a buffer holds its device, a transfer holds its
//! buffer), so an object is always destroyed after everything built on it,
//! whatever order the wrappers themselves are dropped in.
//!
//! [`ResourceTriple`] bundles the three for the driver. Creation unwinds
//! automatically: if the buffer or transfer fails, the objects created so far
//! are dropped before the error is returned.

use crate::components::features::PIXEL_FORMAT;
use crate::components::sdk::{
    AcquisitionSdk, BufferId, BufferSpec, DeviceId, FeatureInfo, FeatureValue, SdkResult,
    TransferId,
};
use gige_core::data::Roi;
use gige_core::error::{AdapterError, AdapterResult};
use std::sync::Arc;
use std::time::Duration;

/// Whole milliseconds of `timeout`, saturating.
pub(crate) fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

// =============================================================================
// Device
// =============================================================================

struct DeviceHandle {
    sdk: Arc<dyn AcquisitionSdk>,
    id: DeviceId,
    server: String,
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        match self.sdk.destroy_device(self.id) {
            Ok(()) => tracing::debug!(server = %self.server, device = self.id.0, "Device destroyed"),
            Err(e) => tracing::warn!(server = %self.server, error = %e, "Failed to destroy device"),
        }
    }
}

/// An opened acquisition device. Clones share the same SDK object.
#[derive(Clone)]
pub struct AcqDevice {
    inner: Arc<DeviceHandle>,
}

impl std::fmt::Debug for AcqDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcqDevice")
            .field("id", &self.inner.id)
            .field("server", &self.inner.server)
            .finish()
    }
}

impl AcqDevice {
    /// Open the acquisition device of `server`.
    pub fn open(sdk: Arc<dyn AcquisitionSdk>, server: &str) -> AdapterResult<Self> {
        let id = sdk
            .create_device(server)
            .map_err(|e| AdapterError::Creation {
                object: "device",
                message: e.to_string(),
            })?;
        tracing::debug!(server, device = id.0, "Device created");
        Ok(Self {
            inner: Arc::new(DeviceHandle {
                sdk,
                id,
                server: server.to_string(),
            }),
        })
    }

    /// SDK handle.
    pub fn id(&self) -> DeviceId {
        self.inner.id
    }

    /// Server this device was opened on.
    pub fn server(&self) -> &str {
        &self.inner.server
    }

    fn sdk(&self) -> &dyn AcquisitionSdk {
        &*self.inner.sdk
    }

    fn shared_sdk(&self) -> Arc<dyn AcquisitionSdk> {
        self.inner.sdk.clone()
    }

    /// Whether the device implements `name`.
    pub fn is_feature_available(&self, name: &str) -> SdkResult<bool> {
        self.sdk().is_feature_available(self.id(), name)
    }

    /// Read a feature.
    pub fn get_feature(&self, name: &str) -> SdkResult<FeatureValue> {
        self.sdk().get_feature(self.id(), name)
    }

    /// Write a feature.
    pub fn set_feature(&self, name: &str, value: FeatureValue) -> SdkResult<()> {
        tracing::trace!(feature = name, %value, "Writing feature");
        self.sdk().set_feature(self.id(), name, value)
    }

    /// Range and access information of a feature.
    pub fn feature_info(&self, name: &str) -> SdkResult<FeatureInfo> {
        self.sdk().feature_info(self.id(), name)
    }
}

// =============================================================================
// Buffer
// =============================================================================

struct BufferHandle {
    id: BufferId,
    spec: BufferSpec,
    // Released after the buffer itself.
    device: AcqDevice,
}

impl Drop for BufferHandle {
    fn drop(&mut self) {
        match self.device.sdk().destroy_buffer(self.id) {
            Ok(()) => tracing::debug!(buffer = self.id.0, "Buffer destroyed"),
            Err(e) => tracing::warn!(buffer = self.id.0, error = %e, "Failed to destroy buffer"),
        }
    }
}

/// Frame memory bound to a device. Clones share the same SDK object.
#[derive(Clone)]
pub struct FrameBuffer {
    inner: Arc<BufferHandle>,
}

impl FrameBuffer {
    /// Allocate a buffer for `device`.
    pub fn create(device: &AcqDevice, spec: BufferSpec) -> AdapterResult<Self> {
        let id = device
            .sdk()
            .create_buffer(device.id(), &spec)
            .map_err(|e| AdapterError::Creation {
                object: "buffer",
                message: e.to_string(),
            })?;
        tracing::debug!(
            buffer = id.0,
            width = spec.width,
            height = spec.height,
            format = ?spec.format,
            count = spec.count,
            "Buffer created"
        );
        Ok(Self {
            inner: Arc::new(BufferHandle {
                id,
                spec,
                device: device.clone(),
            }),
        })
    }

    /// SDK handle.
    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    /// Layout the buffer was created with.
    pub fn spec(&self) -> BufferSpec {
        self.inner.spec
    }

    /// Device the buffer belongs to.
    pub fn device(&self) -> &AcqDevice {
        &self.inner.device
    }

    /// Copy a rectangle of the most recent frame into `out`.
    pub fn read_rect(&self, rect: Roi, out: &mut [u8]) -> AdapterResult<()> {
        self.inner
            .device
            .sdk()
            .read_rect(self.id(), rect, out)
            .map_err(AdapterError::from)
    }
}

// =============================================================================
// Transfer
// =============================================================================

/// Transfer engine connecting a device to a buffer.
///
/// A transfer dropped while acquiring is aborted before it is destroyed.
pub struct Transfer {
    id: TransferId,
    active: bool,
    // Released after the transfer itself.
    buffer: FrameBuffer,
}

impl Drop for Transfer {
    fn drop(&mut self) {
        if self.active {
            if let Err(e) = self.sdk().abort(self.id) {
                tracing::warn!(transfer = self.id.0, error = %e, "Failed to abort transfer");
            }
        }
        match self.sdk().destroy_transfer(self.id) {
            Ok(()) => tracing::debug!(transfer = self.id.0, "Transfer destroyed"),
            Err(e) => {
                tracing::warn!(transfer = self.id.0, error = %e, "Failed to destroy transfer")
            }
        }
    }
}

impl Transfer {
    /// Connect `buffer`'s device to `buffer`.
    pub fn create(buffer: &FrameBuffer) -> AdapterResult<Self> {
        let device = buffer.device();
        let id = device
            .sdk()
            .create_transfer(device.id(), buffer.id())
            .map_err(|e| AdapterError::Creation {
                object: "transfer",
                message: e.to_string(),
            })?;
        tracing::debug!(transfer = id.0, buffer = buffer.id().0, "Transfer created");
        Ok(Self {
            id,
            active: false,
            buffer: buffer.clone(),
        })
    }

    fn sdk(&self) -> &dyn AcquisitionSdk {
        self.buffer.device().sdk()
    }

    /// SDK handle.
    pub fn id(&self) -> TransferId {
        self.id
    }

    /// Whether a snap or grab is in progress.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Acquire one frame and wait for it to land in the buffer.
    pub fn snap(&mut self, timeout: Duration) -> AdapterResult<()> {
        self.sdk().snap(self.id, 1)?;
        self.active = true;
        if self.sdk().wait(self.id, timeout)? {
            self.active = false;
            Ok(())
        } else {
            tracing::warn!(timeout_ms = millis(timeout), "Snap did not complete, aborting");
            self.abort();
            Err(AdapterError::Timeout {
                operation: "snap",
                timeout_ms: millis(timeout),
            })
        }
    }

    /// Start continuous acquisition.
    pub fn start_grab(&mut self) -> AdapterResult<()> {
        self.sdk().grab(self.id)?;
        self.active = true;
        Ok(())
    }

    /// Handle for waiting on frames without borrowing the transfer.
    pub fn waiter(&self) -> TransferWaiter {
        TransferWaiter {
            sdk: self.buffer.device().shared_sdk(),
            id: self.id,
        }
    }

    /// Freeze the transfer and wait for it to go idle.
    ///
    /// If it is still running after `timeout` it is aborted and a timeout is
    /// reported; the transfer is idle either way.
    pub fn stop(&mut self, timeout: Duration) -> AdapterResult<()> {
        self.sdk().freeze(self.id)?;
        if self.sdk().wait(self.id, timeout)? {
            self.active = false;
            Ok(())
        } else {
            tracing::warn!(
                timeout_ms = millis(timeout),
                "Transfer did not stop in time, aborting"
            );
            self.abort();
            Err(AdapterError::Timeout {
                operation: "transfer stop",
                timeout_ms: millis(timeout),
            })
        }
    }

    fn abort(&mut self) {
        match self.sdk().abort(self.id) {
            Ok(()) => self.active = false,
            Err(e) => tracing::warn!(transfer = self.id.0, error = %e, "Failed to abort transfer"),
        }
    }
}

/// Waits on a transfer's frames while the resources stay unlocked.
///
/// The handle does not keep the transfer alive. A transfer destroyed during
/// the wait surfaces as an SDK error.
#[derive(Clone)]
pub struct TransferWaiter {
    sdk: Arc<dyn AcquisitionSdk>,
    id: TransferId,
}

impl TransferWaiter {
    /// Transfer this handle waits on.
    pub fn id(&self) -> TransferId {
        self.id
    }

    /// Wait for the next frame of a continuous acquisition.
    pub fn next_frame(&self, timeout: Duration) -> AdapterResult<Option<u64>> {
        Ok(self.sdk.wait_frame(self.id, timeout)?)
    }
}

// =============================================================================
// Triple
// =============================================================================

/// Buffer change applied by [`ResourceTriple::reconfigure`].
#[derive(Debug, Clone)]
pub struct Reconfigure {
    /// New `PixelFormat` feature value, written while no transfer exists.
    pub pixel_format: Option<FeatureValue>,
    /// Layout of the replacement buffer.
    pub spec: BufferSpec,
}

/// Outcome of a failed [`ResourceTriple::reconfigure`].
pub enum ReconfigureError {
    /// The device refused the new pixel format. The original resources are
    /// returned intact.
    Rejected {
        /// Resources as they were before the call.
        resources: ResourceTriple,
        /// Reason reported by the device.
        reason: String,
    },
    /// A resource could not be recreated. Everything has been released.
    Failed(AdapterError),
}

impl std::fmt::Debug for ReconfigureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconfigureError::Rejected { reason, .. } => {
                f.debug_struct("Rejected").field("reason", reason).finish()
            }
            ReconfigureError::Failed(e) => f.debug_tuple("Failed").field(e).finish(),
        }
    }
}

/// Device, buffer and transfer of one initialized camera.
///
/// Either all three exist or the triple does not: there is no partially
/// built state reachable from outside this module.
pub struct ResourceTriple {
    transfer: Transfer,
    buffer: FrameBuffer,
    device: AcqDevice,
}

impl std::fmt::Debug for ResourceTriple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceTriple")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl ResourceTriple {
    /// Create a buffer and transfer for an opened device.
    ///
    /// On failure everything, including `device`, is released.
    pub fn assemble(device: AcqDevice, spec: BufferSpec) -> AdapterResult<Self> {
        let buffer = FrameBuffer::create(&device, spec)?;
        let transfer = Transfer::create(&buffer)?;
        Ok(Self {
            transfer,
            buffer,
            device,
        })
    }

    /// The device.
    pub fn device(&self) -> &AcqDevice {
        &self.device
    }

    /// The buffer.
    pub fn buffer(&self) -> &FrameBuffer {
        &self.buffer
    }

    /// The transfer engine.
    pub fn transfer(&self) -> &Transfer {
        &self.transfer
    }

    /// Mutable access to the transfer engine.
    pub fn transfer_mut(&mut self) -> &mut Transfer {
        &mut self.transfer
    }

    /// Acquire one frame into the buffer.
    pub fn snap(&mut self, timeout: Duration) -> AdapterResult<()> {
        self.transfer.snap(timeout)
    }

    /// Copy a rectangle of the most recent frame into `out`.
    pub fn read_rect(&self, rect: Roi, out: &mut [u8]) -> AdapterResult<()> {
        self.buffer.read_rect(rect, out)
    }

    /// Replace the buffer (and optionally the pixel format) without
    /// reopening the device.
    ///
    /// Order: destroy the transfer, write `PixelFormat`, destroy and recreate
    /// the buffer, recreate the transfer.
    pub fn reconfigure(self, change: Reconfigure) -> Result<Self, ReconfigureError> {
        let ResourceTriple {
            transfer,
            buffer,
            device,
        } = self;
        drop(transfer);

        if let Some(format) = change.pixel_format {
            if let Err(e) = device.set_feature(PIXEL_FORMAT, format.clone()) {
                tracing::warn!(%format, error = %e, "Pixel format rejected, restoring transfer");
                return match Transfer::create(&buffer) {
                    Ok(transfer) => Err(ReconfigureError::Rejected {
                        resources: ResourceTriple {
                            transfer,
                            buffer,
                            device,
                        },
                        reason: e.to_string(),
                    }),
                    Err(err) => Err(ReconfigureError::Failed(AdapterError::Reformat(
                        err.to_string(),
                    ))),
                };
            }
        }

        drop(buffer);
        let rebuilt = FrameBuffer::create(&device, change.spec).and_then(|buffer| {
            let transfer = Transfer::create(&buffer)?;
            Ok((transfer, buffer))
        });
        match rebuilt {
            Ok((transfer, buffer)) => Ok(Self {
                transfer,
                buffer,
                device,
            }),
            Err(e) => Err(ReconfigureError::Failed(AdapterError::Reformat(
                e.to_string(),
            ))),
        }
    }

    /// Stop any acquisition and release everything.
    ///
    /// The resources are released even when the stop times out; the timeout
    /// is still reported.
    pub fn teardown(mut self, stop_timeout: Duration) -> AdapterResult<()> {
        let stopped = self.transfer.stop(stop_timeout);
        drop(self);
        stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::mock::{MockFault, MockSdk};
    use crate::components::sdk::BufferFormat;

    const SERVER: &str = "Nano-M1280_1";

    fn spec(format: BufferFormat) -> BufferSpec {
        BufferSpec {
            count: 2,
            format,
            width: 64,
            height: 32,
            with_trash: true,
        }
    }

    fn triple(sdk: &Arc<MockSdk>) -> ResourceTriple {
        let device = AcqDevice::open(sdk.clone(), SERVER).unwrap();
        ResourceTriple::assemble(device, spec(BufferFormat::Mono8)).unwrap()
    }

    #[test]
    fn drop_releases_in_reverse_creation_order() {
        let sdk = Arc::new(MockSdk::new());
        let resources = triple(&sdk);
        sdk.clear_calls();
        drop(resources);
        assert_eq!(
            sdk.calls(),
            vec!["destroy_transfer", "destroy_buffer", "destroy_device"]
        );
        assert_eq!(sdk.live_objects(), (0, 0, 0));
    }

    #[test]
    fn failed_transfer_unwinds_buffer_and_device() {
        let sdk = Arc::new(MockSdk::new());
        sdk.inject(MockFault::CreateTransfer);
        let device = AcqDevice::open(sdk.clone(), SERVER).unwrap();
        let err = ResourceTriple::assemble(device, spec(BufferFormat::Mono8)).unwrap_err();
        assert!(matches!(err, AdapterError::Creation { object: "transfer", .. }));
        assert_eq!(sdk.live_objects(), (0, 0, 0));
    }

    #[test]
    fn reconfigure_keeps_device() {
        let sdk = Arc::new(MockSdk::new());
        let resources = triple(&sdk);
        let device_id = resources.device().id();
        sdk.clear_calls();

        let resources = resources
            .reconfigure(Reconfigure {
                pixel_format: Some(FeatureValue::String("Mono10".into())),
                spec: spec(BufferFormat::Mono16),
            })
            .unwrap();

        assert_eq!(resources.device().id(), device_id);
        assert_eq!(resources.buffer().spec().format, BufferFormat::Mono16);
        assert_eq!(
            sdk.calls(),
            vec![
                "destroy_transfer",
                "set_feature PixelFormat=Mono10",
                "destroy_buffer",
                "create_buffer",
                "create_transfer",
            ]
        );
        assert_eq!(sdk.live_objects(), (1, 1, 1));
    }

    #[test]
    fn rejected_format_returns_intact_resources() {
        let sdk = Arc::new(MockSdk::new());
        let resources = triple(&sdk);
        sdk.inject(MockFault::RejectFeature(PIXEL_FORMAT.to_string()));

        let err = resources
            .reconfigure(Reconfigure {
                pixel_format: Some(FeatureValue::String("Mono10".into())),
                spec: spec(BufferFormat::Mono16),
            })
            .unwrap_err();

        match err {
            ReconfigureError::Rejected { resources, .. } => {
                assert_eq!(resources.buffer().spec().format, BufferFormat::Mono8);
                assert_eq!(sdk.live_objects(), (1, 1, 1));
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[test]
    fn failed_buffer_recreation_releases_everything() {
        let sdk = Arc::new(MockSdk::new());
        let resources = triple(&sdk);
        sdk.inject(MockFault::CreateBuffer);

        let err = resources
            .reconfigure(Reconfigure {
                pixel_format: Some(FeatureValue::String("Mono10".into())),
                spec: spec(BufferFormat::Mono16),
            })
            .unwrap_err();

        assert!(matches!(
            err,
            ReconfigureError::Failed(AdapterError::Reformat(_))
        ));
        assert_eq!(sdk.live_objects(), (0, 0, 0));
    }

    #[test]
    fn teardown_times_out_but_still_releases() {
        let sdk = Arc::new(MockSdk::new());
        let mut resources = triple(&sdk);
        resources.transfer_mut().start_grab().unwrap();
        sdk.set_stalled(true);

        let err = resources.teardown(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, AdapterError::Timeout { operation: "transfer stop", .. }));
        assert_eq!(sdk.live_objects(), (0, 0, 0));
        assert!(sdk.stats().aborts >= 1);
    }

    #[test]
    fn dropping_active_transfer_aborts_it() {
        let sdk = Arc::new(MockSdk::new());
        let mut resources = triple(&sdk);
        resources.transfer_mut().start_grab().unwrap();
        assert!(sdk.is_acquiring());
        drop(resources);
        assert_eq!(sdk.stats().aborts, 1);
        assert_eq!(sdk.live_objects(), (0, 0, 0));
    }
}
