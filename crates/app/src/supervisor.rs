//! Top-level station wiring: owns the camera loop, recorder, scheduler
//! and mode machine. Components request mode transitions through the
//! supervisor; nothing else touches the mode.

use crate::events::{EventBus, EventState};
use crate::scheduler::{JobKind, JobOutcome, PipelineScheduler};
use parking_lot::Mutex;
use sparkbox_agents::{ConversationStore, PreviewAgent, SolutionAgent, VisionAgent};
use sparkbox_audio::VoiceRecorder;
use sparkbox_foundation::{
    AppConfig, AudioError, ModeManager, ShutdownGuard, SparkBoxError, StationMode,
};
use sparkbox_stt::RemoteTranscriber;
use sparkbox_vision::{
    snapshot, CameraCaptureThread, CameraIntrinsics, CanvasDetector, FrameSlot, StationStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Why a capture request could not even be attempted. Maps onto the
/// snapshot endpoint's 503/400 answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureRequestError {
    Offline,
    NoFrame,
}

impl std::fmt::Display for CaptureRequestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureRequestError::Offline => write!(f, "System offline"),
            CaptureRequestError::NoFrame => write!(f, "No camera frame available"),
        }
    }
}

pub struct StationSupervisor {
    config: Arc<AppConfig>,
    bus: Arc<EventBus>,
    mode: ModeManager,
    status: Arc<StationStatus>,
    detector: Arc<Mutex<CanvasDetector>>,
    raw_slot: Arc<FrameSlot>,
    annotated_slot: Arc<FrameSlot>,
    scheduler: PipelineScheduler,
    store: Arc<Mutex<ConversationStore>>,
    recorder: Arc<VoiceRecorder>,
    transcriber: Arc<RemoteTranscriber>,
    shutdown: Arc<ShutdownGuard>,
    camera: Mutex<Option<CameraCaptureThread>>,
}

impl StationSupervisor {
    /// Bring the station up in dependency order: directories, camera,
    /// agents, scheduler. Publishes `ready` once the first frame is in.
    pub async fn start(
        config: AppConfig,
        shutdown: Arc<ShutdownGuard>,
    ) -> Result<Arc<Self>, SparkBoxError> {
        let config = Arc::new(config);

        for dir in [
            config.paths.logs_dir.clone(),
            config.capture_dir(),
            config.temp_dir(),
            config.ai_logs_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }

        let intrinsics = match &config.camera.intrinsics {
            Some(path) => CameraIntrinsics::load(path).map_err(SparkBoxError::Config)?,
            None => {
                tracing::warn!("No intrinsics configured; running without undistortion");
                CameraIntrinsics::identity()
            }
        };

        let bus = Arc::new(EventBus::new());
        let status = Arc::new(StationStatus::new());
        let detector = Arc::new(Mutex::new(CanvasDetector::new(intrinsics)));
        let raw_slot = Arc::new(FrameSlot::new());
        let annotated_slot = Arc::new(FrameSlot::new());

        let camera = CameraCaptureThread::spawn(
            config.camera.clone(),
            detector.clone(),
            status.clone(),
            raw_slot.clone(),
            annotated_slot.clone(),
            shutdown.clone(),
        )
        .map_err(SparkBoxError::Camera)?;
        CameraCaptureThread::wait_for_first_frame(&raw_slot, Duration::from_secs(5))
            .map_err(SparkBoxError::Camera)?;

        let store = Arc::new(Mutex::new(ConversationStore::new(config.ai_logs_dir())));
        let vision = Arc::new(VisionAgent::new(config.vision.clone()));
        let solution = Arc::new(SolutionAgent::new(config.solution_generator.clone()));
        let preview = Arc::new(PreviewAgent::new(config.image_generator.clone()));
        let (scheduler, outcome_rx) = PipelineScheduler::new(
            bus.clone(),
            store.clone(),
            vision,
            solution,
            preview,
        );

        let recorder = Arc::new(VoiceRecorder::new(config.recorder_path()));
        let transcriber = Arc::new(RemoteTranscriber::new(config.voice.clone()));

        let supervisor = Arc::new(Self {
            config,
            bus,
            mode: ModeManager::new(),
            status,
            detector,
            raw_slot,
            annotated_slot,
            scheduler,
            store,
            recorder,
            transcriber,
            shutdown,
            camera: Mutex::new(Some(camera)),
        });

        tokio::spawn(Self::run_outcome_loop(supervisor.clone(), outcome_rx));

        supervisor
            .bus
            .publish(EventState::Ready, "System Ready", None);
        tracing::info!("Station ready");
        Ok(supervisor)
    }

    /// Applies mode transitions as jobs leave the scheduler slot.
    async fn run_outcome_loop(
        supervisor: Arc<Self>,
        mut outcome_rx: mpsc::UnboundedReceiver<JobOutcome>,
    ) {
        while let Some(outcome) = outcome_rx.recv().await {
            match outcome.kind {
                JobKind::Capture => {
                    supervisor.status.set_processing(false);
                    if outcome.ok {
                        supervisor
                            .status
                            .set_message("Pipeline Complete! Check Console.");
                        let _ = supervisor.mode.transition(StationMode::Result);
                    } else {
                        supervisor.status.set_message("Error in Pipeline");
                        let _ = supervisor.mode.transition(StationMode::Idle);
                    }
                }
                JobKind::Chat => {
                    supervisor.status.set_message(if outcome.ok {
                        "AI Responded!"
                    } else {
                        "AI Chat Failed"
                    });
                    if supervisor.mode.current() == StationMode::Voice {
                        let _ = supervisor.mode.transition(StationMode::Result);
                    }
                }
            }
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn annotated_slot(&self) -> &Arc<FrameSlot> {
        &self.annotated_slot
    }

    pub fn mode(&self) -> StationMode {
        self.mode.current()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_shutdown_requested()
    }

    pub fn latest_result(&self) -> Option<serde_json::Value> {
        self.store.lock().project().map(|p| p.to_response())
    }

    /// Take a snapshot of the latest raw frame and submit the pipeline
    /// job. A busy slot emits the busy error and changes nothing.
    pub fn capture(&self) -> Result<(), CaptureRequestError> {
        if self.is_shutting_down() {
            return Err(CaptureRequestError::Offline);
        }
        if self.scheduler.is_busy() {
            self.bus.publish(EventState::Error, "系统忙，请稍后", None);
            return Ok(());
        }

        let frame = self.raw_slot.load().ok_or(CaptureRequestError::NoFrame)?;

        let saved = {
            let detector = self.detector.lock();
            snapshot::save_rectified_snapshot(
                &frame,
                &detector,
                &self.config.capture_dir(),
                &self.config.temp_dir(),
            )
        };
        let temp_path = match saved {
            Ok((_, temp)) => temp,
            Err(e) => {
                tracing::error!("Snapshot failed: {}", e);
                self.bus
                    .publish(EventState::Error, format!("快照失败: {}", e), None);
                return Ok(());
            }
        };

        if self.scheduler.submit_capture(temp_path) {
            if matches!(self.mode.current(), StationMode::Result | StationMode::Voice) {
                let _ = self.mode.transition(StationMode::Idle);
            }
            let _ = self.mode.transition(StationMode::Processing);
            self.status.set_processing(true);
            self.status.set_message("Analyzing Image...");
        }
        Ok(())
    }

    /// Clear the current project and return to Idle. Ignored while a job
    /// holds the slot.
    pub fn reset(&self) {
        if self.scheduler.is_busy() {
            tracing::debug!("Reset ignored: job in flight");
            return;
        }

        self.store.lock().clear();
        if matches!(self.mode.current(), StationMode::Result | StationMode::Voice) {
            let _ = self.mode.transition(StationMode::Idle);
        }
        self.status.set_message("Ready");
        self.status.set_processing(false);
        self.status.set_recording(false);

        tracing::info!("Station reset");
        self.bus.publish(
            EventState::Control,
            "Reset",
            Some(serde_json::json!({"action": "reset"})),
        );
    }

    /// Enter voice mode from the result screen.
    pub fn voice_enter(&self) {
        if self.mode.current() != StationMode::Result {
            return;
        }
        if self.mode.transition(StationMode::Voice).is_ok() {
            self.bus.publish(
                EventState::Control,
                "Enter Voice",
                Some(serde_json::json!({"action": "enter_voice"})),
            );
        }
    }

    /// Begin push-to-talk recording.
    pub fn voice_start(&self) -> &'static str {
        if self.recorder.is_recording() {
            return "already_recording";
        }
        match self.recorder.start() {
            Ok(()) => {
                self.status.set_recording(true);
                self.status.set_message("Recording...");
                self.bus
                    .publish(EventState::VoiceRecording, "正在录音...", None);
                "recording_started"
            }
            Err(e) => {
                tracing::error!("Recorder start failed: {}", e);
                self.bus.publish(EventState::VoiceError, e.to_string(), None);
                "error"
            }
        }
    }

    /// Stop recording, transcribe in the background, and hand the
    /// transcript to the scheduler as a chat turn.
    pub fn voice_stop(self: &Arc<Self>) -> &'static str {
        if !self.recorder.is_recording() {
            return "not_recording";
        }

        self.status.set_recording(false);
        let wav_path = match self.recorder.stop() {
            Ok(path) => path,
            Err(AudioError::NoAudioCaptured) => {
                self.bus
                    .publish(EventState::VoiceError, "transcription failed", None);
                return "recording_stopped";
            }
            Err(e) => {
                tracing::error!("Recorder stop failed: {}", e);
                self.bus.publish(EventState::VoiceError, e.to_string(), None);
                return "error";
            }
        };

        self.status.set_message("Processing voice...");
        let supervisor = self.clone();
        tokio::spawn(async move {
            supervisor
                .bus
                .publish(EventState::VoiceProcessing, "正在转录语音...", None);

            let sample_rate = supervisor.recorder.sample_rate();
            match supervisor.transcriber.transcribe(&wav_path, sample_rate).await {
                Ok(Some(text)) => {
                    tracing::info!(text = %text, "Voice recognized");
                    supervisor.scheduler.submit_chat(text);
                }
                Ok(None) => {
                    tracing::warn!("Transcription returned nothing");
                    supervisor
                        .bus
                        .publish(EventState::VoiceError, "transcription failed", None);
                }
                Err(e) => {
                    tracing::error!("Transcription failed: {}", e);
                    supervisor.bus.publish(
                        EventState::VoiceError,
                        e.to_string(),
                        Some(serde_json::json!({ "stage": e.stage })),
                    );
                }
            }
        });
        "recording_stopped"
    }

    pub fn request_shutdown(&self) {
        self.shutdown.request_shutdown();
    }

    /// Teardown after the HTTP server has stopped accepting: camera,
    /// recorder, temp artifacts. GPIO lines are released by the arbiter
    /// task observing the shutdown flag.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down station");

        if let Some(camera) = self.camera.lock().take() {
            tokio::task::block_in_place(|| camera.stop());
        }

        if self.recorder.is_recording() {
            let _ = self.recorder.stop();
        }

        let temp_dir = self.config.temp_dir();
        if temp_dir.exists() {
            if let Err(e) = std::fs::remove_dir_all(&temp_dir) {
                tracing::warn!("Temp cleanup failed: {}", e);
            } else {
                let _ = std::fs::create_dir_all(&temp_dir);
            }
        }

        tracing::info!("Station shutdown complete");
    }
}
