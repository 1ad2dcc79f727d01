//! Continuous Acquisition
//!
//! [`SequenceWorker`] runs the transfer in grab mode on a blocking thread and
//! hands each frame to the host through a bounded channel.
//!
//! # Shutdown
//!
//! The worker checks a stop flag between frames and while waiting on a full
//! queue, so [`SequenceWorker::stop`] never deadlocks against a host that has
//! stopped draining frames. Whatever ends the loop (stop request, frame limit,
//! error, panic) the transfer is frozen by [`StreamGuard`] before the
//! capturing flag clears.

use crate::components::acquisition::SharedResources;
use crate::components::resources::{millis, TransferWaiter};
use chrono::{DateTime, Utc};
use gige_core::capabilities::SequenceSettings;
use gige_core::data::{Frame, Roi};
use gige_core::error::{AdapterError, AdapterResult};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

/// Pause between delivery attempts while the host queue is full.
const BACKPRESSURE_POLL: Duration = Duration::from_millis(2);

/// Granularity of the stop check during inter-frame intervals.
const INTERVAL_POLL: Duration = Duration::from_millis(10);

/// Fixed parameters of one sequence run.
#[derive(Debug, Clone, Copy)]
pub struct SequencePlan {
    /// Rectangle copied out of each hardware frame.
    pub rect: Roi,
    /// Significant bits per pixel.
    pub bit_depth: u32,
    /// Bytes per pixel in delivered frames.
    pub bytes_per_pixel: u32,
    /// Bound on waiting for a single frame.
    pub frame_timeout: Duration,
    /// Bound on freezing the transfer at the end of the run.
    pub stop_timeout: Duration,
    /// Capacity of the host channel.
    pub queue_depth: usize,
}

/// Why a sequence ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The host asked it to stop.
    Requested,
    /// The requested number of frames was delivered.
    Completed,
    /// The host queue was full and the run was set to stop on overflow.
    Overflow,
    /// The host dropped its receiver.
    HostDisconnected,
    /// Frame acquisition failed.
    Failed,
}

/// Outcome of a finished sequence.
#[derive(Debug, Clone)]
pub struct SequenceSummary {
    /// Frames handed to the host.
    pub frames: u64,
    /// What ended the run.
    pub reason: StopReason,
    /// Acquisition or stop failure, if any.
    pub error: Option<AdapterError>,
    /// When the worker started.
    pub started_at: DateTime<Utc>,
    /// When the transfer was left idle.
    pub finished_at: DateTime<Utc>,
}

/// Continuous acquisition on a blocking worker thread.
pub struct SequenceWorker {
    capturing: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    frames: Arc<AtomicU64>,
    handle: Option<JoinHandle<SequenceSummary>>,
}

impl SequenceWorker {
    /// `capturing` is shared with the foreground device so it can refuse
    /// conflicting operations.
    pub fn new(capturing: Arc<AtomicBool>) -> Self {
        Self {
            capturing,
            stop: Arc::new(AtomicBool::new(false)),
            frames: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    /// True while the worker holds the transfer in grab mode.
    pub fn is_running(&self) -> bool {
        self.capturing.load(Ordering::SeqCst)
    }

    /// Frames delivered by the current or last run.
    pub fn frames_delivered(&self) -> u64 {
        self.frames.load(Ordering::SeqCst)
    }

    /// Start grabbing and return the frame receiver.
    ///
    /// Settings are checked and the grab is started before this returns, so
    /// those failures are reported here rather than through the summary. A
    /// finished run that was not collected with [`stop`](Self::stop) first
    /// loses its summary. Must be called from within a Tokio runtime.
    pub fn start(
        &mut self,
        resources: SharedResources,
        plan: SequencePlan,
        settings: SequenceSettings,
    ) -> AdapterResult<mpsc::Receiver<Arc<Frame>>> {
        if self.is_running() {
            return Err(AdapterError::Busy);
        }
        let interval = settings.interval()?;
        if let Some(previous) = self.handle.take() {
            previous.abort();
        }

        let waiter = {
            let mut guard = resources.lock();
            let triple = guard.as_mut().ok_or(AdapterError::NotInitialized)?;
            triple
                .transfer_mut()
                .start_grab()
                .map_err(|e| AdapterError::SequenceUnavailable(e.to_string()))?;
            triple.transfer().waiter()
        };

        let (tx, rx) = mpsc::channel(plan.queue_depth.max(1));
        self.stop.store(false, Ordering::SeqCst);
        self.frames.store(0, Ordering::SeqCst);
        self.capturing.store(true, Ordering::SeqCst);

        tracing::info!(
            width = plan.rect.width,
            height = plan.rect.height,
            num_images = ?settings.num_images,
            interval_ms = settings.interval_ms,
            "Sequence acquisition started"
        );

        let stop = self.stop.clone();
        let capturing = self.capturing.clone();
        let frames = self.frames.clone();
        self.handle = Some(tokio::task::spawn_blocking(move || {
            let run = Run {
                resources,
                waiter,
                plan,
                interval,
                num_images: settings.num_images,
                stop_on_overflow: settings.stop_on_overflow,
            };
            run.execute(stop, capturing, frames, tx)
        }));
        Ok(rx)
    }

    /// Ask the worker to stop without waiting for it.
    pub fn signal_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Stop the worker and wait for it to leave the device idle.
    ///
    /// Returns `None` if no sequence was started since the last stop.
    pub async fn stop(&mut self) -> AdapterResult<Option<SequenceSummary>> {
        self.signal_stop();
        let Some(handle) = self.handle.take() else {
            return Ok(None);
        };
        match handle.await {
            Ok(summary) => Ok(Some(summary)),
            Err(e) => {
                self.capturing.store(false, Ordering::SeqCst);
                Err(AdapterError::Hardware(format!("sequence worker failed: {e}")))
            }
        }
    }
}

impl Drop for SequenceWorker {
    fn drop(&mut self) {
        if self.is_running() {
            tracing::warn!("SequenceWorker dropped while capturing; signalling stop");
        }
        self.signal_stop();
    }
}

/// Freezes the transfer and clears the capturing flag when the run ends.
struct StreamGuard<'a> {
    resources: &'a SharedResources,
    capturing: &'a AtomicBool,
    stop_timeout: Duration,
    finished: bool,
}

impl StreamGuard<'_> {
    fn finish(&mut self) -> AdapterResult<()> {
        self.finished = true;
        let result = self.freeze();
        self.capturing.store(false, Ordering::SeqCst);
        result
    }

    fn freeze(&self) -> AdapterResult<()> {
        let mut guard = self.resources.lock();
        match guard.as_mut() {
            Some(triple) if triple.transfer().is_active() => {
                triple.transfer_mut().stop(self.stop_timeout)
            }
            _ => Ok(()),
        }
    }
}

impl Drop for StreamGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(e) = self.freeze() {
            tracing::error!(error = %e, "Failed to stop transfer after sequence worker exit");
        }
        self.capturing.store(false, Ordering::SeqCst);
    }
}

enum Delivery {
    Sent,
    Overflow,
    Closed,
    Stopped,
}

/// Everything the blocking loop needs, fixed at start.
struct Run {
    resources: SharedResources,
    waiter: TransferWaiter,
    plan: SequencePlan,
    interval: Duration,
    num_images: Option<u64>,
    stop_on_overflow: bool,
}

impl Run {
    fn execute(
        self,
        stop: Arc<AtomicBool>,
        capturing: Arc<AtomicBool>,
        frames: Arc<AtomicU64>,
        tx: mpsc::Sender<Arc<Frame>>,
    ) -> SequenceSummary {
        let started_at = Utc::now();
        let mut guard = StreamGuard {
            resources: &self.resources,
            capturing: &capturing,
            stop_timeout: self.plan.stop_timeout,
            finished: false,
        };
        let mut delivered: u64 = 0;

        let (reason, error) = loop {
            if stop.load(Ordering::SeqCst) {
                break (StopReason::Requested, None);
            }
            if self.num_images.is_some_and(|n| delivered >= n) {
                break (StopReason::Completed, None);
            }

            let frame = match self.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    break (
                        StopReason::Failed,
                        Some(AdapterError::Timeout {
                            operation: "sequence frame",
                            timeout_ms: millis(self.plan.frame_timeout),
                        }),
                    )
                }
                Err(e) => break (StopReason::Failed, Some(e)),
            };

            let frame = Arc::new(frame.with_sequence(delivered, self.plan.rect));
            match deliver(&tx, frame, &stop, self.stop_on_overflow) {
                Delivery::Sent => {}
                Delivery::Overflow => break (StopReason::Overflow, None),
                Delivery::Closed => break (StopReason::HostDisconnected, None),
                Delivery::Stopped => break (StopReason::Requested, None),
            }
            delivered += 1;
            frames.store(delivered, Ordering::SeqCst);

            if !self.interval.is_zero() {
                sleep_unless_stopped(self.interval, &stop);
            }
        };

        let stopped = guard.finish();
        let error = error.or(stopped.err());
        let finished_at = Utc::now();

        match &error {
            Some(e) => tracing::warn!(frames = delivered, ?reason, error = %e, "Sequence acquisition ended with error"),
            None => tracing::info!(frames = delivered, ?reason, "Sequence acquisition finished"),
        }

        SequenceSummary {
            frames: delivered,
            reason,
            error,
            started_at,
            finished_at,
        }
    }

    /// Wait for a frame with the resources unlocked, then lock only to copy
    /// it out.
    fn next_frame(&self) -> AdapterResult<Option<Frame>> {
        let plan = &self.plan;
        if self.waiter.next_frame(plan.frame_timeout)?.is_none() {
            return Ok(None);
        }
        let guard = self.resources.lock();
        let triple = guard.as_ref().ok_or(AdapterError::NotInitialized)?;
        if triple.transfer().id() != self.waiter.id() {
            return Err(AdapterError::Hardware(
                "transfer replaced during sequence acquisition".into(),
            ));
        }
        let mut data = vec![0u8; plan.rect.area() * plan.bytes_per_pixel as usize];
        triple.read_rect(plan.rect, &mut data)?;
        Ok(Some(Frame::from_bytes(
            plan.rect.width,
            plan.rect.height,
            plan.bit_depth,
            data,
        )))
    }
}

fn deliver(
    tx: &mpsc::Sender<Arc<Frame>>,
    frame: Arc<Frame>,
    stop: &AtomicBool,
    stop_on_overflow: bool,
) -> Delivery {
    let mut pending = frame;
    loop {
        match tx.try_send(pending) {
            Ok(()) => return Delivery::Sent,
            Err(TrySendError::Closed(_)) => return Delivery::Closed,
            Err(TrySendError::Full(frame)) => {
                if stop_on_overflow {
                    tracing::warn!("Sequence queue full, stopping on overflow");
                    return Delivery::Overflow;
                }
                if stop.load(Ordering::SeqCst) {
                    return Delivery::Stopped;
                }
                pending = frame;
                std::thread::sleep(BACKPRESSURE_POLL);
            }
        }
    }
}

fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let mut remaining = total;
    while !remaining.is_zero() && !stop.load(Ordering::SeqCst) {
        let step = remaining.min(INTERVAL_POLL);
        std::thread::sleep(step);
        remaining = remaining.saturating_sub(step);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::mock::{MockCameraConfig, MockFault, MockSdk};
    use crate::components::resources::{AcqDevice, ResourceTriple};
    use crate::components::sdk::{BufferFormat, BufferSpec};
    use parking_lot::Mutex;

    fn setup() -> (Arc<MockSdk>, SharedResources) {
        let sdk = Arc::new(MockSdk::with_config(MockCameraConfig {
            sensor_width: 64,
            sensor_height: 48,
            ..Default::default()
        }));
        let device = AcqDevice::open(sdk.clone(), "Nano-M1280_1").unwrap();
        let triple = ResourceTriple::assemble(
            device,
            BufferSpec {
                count: 2,
                format: BufferFormat::Mono8,
                width: 64,
                height: 48,
                with_trash: true,
            },
        )
        .unwrap();
        (sdk, Arc::new(Mutex::new(Some(triple))))
    }

    fn plan() -> SequencePlan {
        SequencePlan {
            rect: Roi::new(0, 0, 64, 48),
            bit_depth: 8,
            bytes_per_pixel: 1,
            frame_timeout: Duration::from_secs(1),
            stop_timeout: Duration::from_secs(1),
            queue_depth: 4,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn delivers_requested_frames_then_idles() {
        let (sdk, resources) = setup();
        let capturing = Arc::new(AtomicBool::new(false));
        let mut worker = SequenceWorker::new(capturing.clone());

        let mut rx = worker
            .start(resources, plan(), SequenceSettings::frames(3))
            .unwrap();
        let mut numbers = Vec::new();
        while let Some(frame) = rx.recv().await {
            numbers.push(frame.frame_number);
        }

        assert_eq!(numbers, vec![0, 1, 2]);
        let summary = worker.stop().await.unwrap().unwrap();
        assert_eq!(summary.reason, StopReason::Completed);
        assert_eq!(summary.frames, 3);
        assert!(!capturing.load(Ordering::SeqCst));
        assert!(!sdk.is_acquiring());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn stop_does_not_wait_for_undrained_queue() {
        let (sdk, resources) = setup();
        let mut worker = SequenceWorker::new(Arc::new(AtomicBool::new(false)));

        let _rx = worker
            .start(resources, plan(), SequenceSettings::default())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let summary = tokio::time::timeout(Duration::from_secs(5), worker.stop())
            .await
            .expect("stop must not hang")
            .unwrap()
            .unwrap();
        assert_eq!(summary.reason, StopReason::Requested);
        assert!(!worker.is_running());
        assert!(!sdk.is_acquiring());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn overflow_ends_run_when_requested() {
        let (_sdk, resources) = setup();
        let mut worker = SequenceWorker::new(Arc::new(AtomicBool::new(false)));
        let settings = SequenceSettings {
            stop_on_overflow: true,
            ..Default::default()
        };
        let plan = SequencePlan {
            queue_depth: 1,
            ..plan()
        };

        let _rx = worker.start(resources, plan, settings).unwrap();
        let summary = tokio::time::timeout(Duration::from_secs(5), async {
            while worker.is_running() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            worker.stop().await
        })
        .await
        .unwrap()
        .unwrap()
        .unwrap();
        assert_eq!(summary.reason, StopReason::Overflow);
        assert_eq!(summary.frames, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn grab_failure_is_reported_at_start() {
        let (sdk, resources) = setup();
        let capturing = Arc::new(AtomicBool::new(false));
        let mut worker = SequenceWorker::new(capturing.clone());

        sdk.inject(MockFault::Grab);
        let err = worker
            .start(resources, plan(), SequenceSettings::default())
            .unwrap_err();
        assert!(matches!(err, AdapterError::SequenceUnavailable(_)));
        assert!(!capturing.load(Ordering::SeqCst));
        assert!(worker.stop().await.unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_start_while_running_is_busy() {
        let (_sdk, resources) = setup();
        let mut worker = SequenceWorker::new(Arc::new(AtomicBool::new(false)));

        let _rx = worker
            .start(resources.clone(), plan(), SequenceSettings::default())
            .unwrap();
        assert!(matches!(
            worker.start(resources, plan(), SequenceSettings::default()),
            Err(AdapterError::Busy)
        ));
        worker.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn unusable_interval_is_rejected_before_grab() {
        let (sdk, resources) = setup();
        let capturing = Arc::new(AtomicBool::new(false));
        let mut worker = SequenceWorker::new(capturing.clone());
        let settings = SequenceSettings {
            num_images: Some(3),
            interval_ms: 1e300,
            ..Default::default()
        };

        let err = worker.start(resources, plan(), settings).unwrap_err();
        assert!(matches!(err, AdapterError::InvalidPropertyValue { .. }));
        assert_eq!(sdk.stats().grabs, 0);
        assert!(!capturing.load(Ordering::SeqCst));
        assert!(!sdk.is_acquiring());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn frame_wait_leaves_resources_unlocked() {
        let (sdk, resources) = setup();
        let mut worker = SequenceWorker::new(Arc::new(AtomicBool::new(false)));

        let mut rx = worker
            .start(resources.clone(), plan(), SequenceSettings::default())
            .unwrap();
        rx.recv().await.unwrap();
        sdk.set_stalled(true);

        // The worker is now parked in a one-second frame wait.
        let locked = resources.try_lock_for(Duration::from_millis(200));
        assert!(locked.is_some());
        drop(locked);

        sdk.set_stalled(false);
        drop(rx);
        worker.stop().await.unwrap();
    }
}
