use crate::detector::CanvasDetector;
use crate::frame::{Frame, FrameSlot};
use crate::overlay::{self, StationStatus};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use parking_lot::Mutex;
use sparkbox_foundation::{CameraConfig, CameraError, ShutdownGuard};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How long spawn() waits for the first decoded frame.
const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to the dedicated camera thread. The camera is opened and read
/// on its own OS thread; decoded frames land in the raw slot and the
/// detector-annotated frames in the annotated slot.
pub struct CameraCaptureThread {
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl CameraCaptureThread {
    pub fn spawn(
        config: CameraConfig,
        detector: Arc<Mutex<CanvasDetector>>,
        status: Arc<StationStatus>,
        raw_slot: Arc<FrameSlot>,
        annotated_slot: Arc<FrameSlot>,
        shutdown: Arc<ShutdownGuard>,
    ) -> Result<Self, CameraError> {
        let running = Arc::new(AtomicBool::new(true));
        let thread_running = running.clone();
        let (startup_tx, startup_rx) = crossbeam_channel::bounded::<Result<(), CameraError>>(1);

        let handle = thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(
                    CameraFormat::new(
                        Resolution::new(config.width, config.height),
                        FrameFormat::MJPEG,
                        30,
                    ),
                ));

                let mut camera =
                    match Camera::new(CameraIndex::Index(config.device_id), requested) {
                        Ok(c) => c,
                        Err(e) => {
                            let _ = startup_tx.send(Err(CameraError::OpenFailed {
                                device: config.device_id,
                                reason: e.to_string(),
                            }));
                            return;
                        }
                    };
                if let Err(e) = camera.open_stream() {
                    let _ = startup_tx.send(Err(CameraError::OpenFailed {
                        device: config.device_id,
                        reason: e.to_string(),
                    }));
                    return;
                }
                tracing::info!(
                    device = config.device_id,
                    width = config.width,
                    height = config.height,
                    "Camera stream opened"
                );
                let _ = startup_tx.send(Ok(()));

                while thread_running.load(Ordering::Relaxed) {
                    let rgb = camera
                        .frame()
                        .map_err(|e| CameraError::ReadFailed(e.to_string()))
                        .and_then(|buffer| {
                            let decoded = buffer
                                .decode_image::<RgbFormat>()
                                .map_err(|e| CameraError::DecodeFailed(e.to_string()))?;
                            let (w, h) = decoded.dimensions();
                            image::RgbImage::from_raw(w, h, decoded.into_raw()).ok_or_else(|| {
                                CameraError::DecodeFailed("frame buffer size mismatch".into())
                            })
                        });

                    let rgb = match rgb {
                        Ok(img) => img,
                        Err(e) => {
                            tracing::error!("Camera read failed: {}; requesting shutdown", e);
                            shutdown.request_shutdown();
                            break;
                        }
                    };

                    raw_slot.store(Frame::new(rgb.clone()));

                    let (mut annotated, _report) = detector.lock().process(&rgb);
                    overlay::draw_status(&mut annotated, &status.snapshot());
                    annotated_slot.store(Frame::new(annotated));
                }

                let _ = camera.stop_stream();
                tracing::info!("Camera capture thread shutting down");
            })
            .map_err(|e| CameraError::OpenFailed {
                device: config.device_id,
                reason: format!("failed to spawn camera thread: {}", e),
            })?;

        // Fail startup if the device never opened.
        match startup_rx.recv_timeout(FIRST_FRAME_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                running.store(false, Ordering::Relaxed);
                let _ = handle.join();
                return Err(CameraError::FirstFrameTimeout(FIRST_FRAME_TIMEOUT));
            }
        }

        Ok(Self { handle, running })
    }

    /// Block until the first frame has been published, or time out.
    pub fn wait_for_first_frame(
        raw_slot: &FrameSlot,
        timeout: Duration,
    ) -> Result<(), CameraError> {
        let start = Instant::now();
        while start.elapsed() < timeout {
            if raw_slot.has_frame() {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(50));
        }
        Err(CameraError::FirstFrameTimeout(timeout))
    }

    pub fn stop(self) {
        self.running.store(false, Ordering::Relaxed);
        let _ = self.handle.join();
    }
}
