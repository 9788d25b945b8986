//! Single-slot AI job scheduler. At most one capture or chat job runs at
//! a time; admission is a compare-and-swap on the busy flag, and the
//! slot is released by a drop guard on every termination path.

use crate::events::{EventBus, EventState};
use parking_lot::Mutex;
use sparkbox_agents::{
    ChatMessage, ConversationStore, PreviewAgent, Project, SolutionAgent, TurnRole, VisionAgent,
};
use sparkbox_foundation::StageError;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Capture,
    Chat,
}

/// Reported to the supervisor when a job leaves the slot. Only the
/// supervisor transitions the mode machine.
#[derive(Debug, Clone, Copy)]
pub struct JobOutcome {
    pub kind: JobKind,
    pub ok: bool,
}

struct SlotGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

#[derive(Clone)]
pub struct PipelineScheduler {
    busy: Arc<AtomicBool>,
    bus: Arc<EventBus>,
    store: Arc<Mutex<ConversationStore>>,
    vision: Arc<VisionAgent>,
    solution: Arc<SolutionAgent>,
    preview: Arc<PreviewAgent>,
    download_client: reqwest::Client,
    outcome_tx: mpsc::UnboundedSender<JobOutcome>,
}

impl PipelineScheduler {
    pub fn new(
        bus: Arc<EventBus>,
        store: Arc<Mutex<ConversationStore>>,
        vision: Arc<VisionAgent>,
        solution: Arc<SolutionAgent>,
        preview: Arc<PreviewAgent>,
    ) -> (Self, mpsc::UnboundedReceiver<JobOutcome>) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            busy: Arc::new(AtomicBool::new(false)),
            bus,
            store,
            vision,
            solution,
            preview,
            download_client: reqwest::Client::new(),
            outcome_tx,
        };
        (scheduler, outcome_rx)
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    /// Submit a capture job for an already-rectified snapshot. Returns
    /// whether the job was admitted; a busy slot emits the error event
    /// and admits nothing.
    pub fn submit_capture(&self, image_path: PathBuf) -> bool {
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("Capture rejected: pipeline slot busy");
            self.bus.publish(EventState::Error, "系统忙，请稍后", None);
            return false;
        }

        let guard = SlotGuard {
            busy: self.busy.clone(),
        };
        let scheduler = self.clone();
        tokio::spawn(async move {
            let ok = scheduler.run_capture(&image_path).await;
            let _ = scheduler.outcome_tx.send(JobOutcome {
                kind: JobKind::Capture,
                ok,
            });
            drop(guard);
        });
        true
    }

    /// Submit a voice chat turn. Rejected while the slot is busy or when
    /// no project exists yet.
    pub fn submit_chat(&self, text: String) -> bool {
        if self.is_busy() {
            tracing::warn!("Chat rejected: pipeline slot busy");
            self.bus
                .publish(EventState::VoiceError, "AI正在忙碌，请稍后再试", None);
            return false;
        }
        if self.store.lock().project().is_none() {
            tracing::warn!("Chat rejected: no project to talk about");
            self.bus
                .publish(EventState::VoiceError, "请先拍照分析图片", None);
            return false;
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            self.bus
                .publish(EventState::VoiceError, "AI正在忙碌，请稍后再试", None);
            return false;
        }

        let guard = SlotGuard {
            busy: self.busy.clone(),
        };
        let scheduler = self.clone();
        tokio::spawn(async move {
            let ok = scheduler.run_chat(&text).await;
            let _ = scheduler.outcome_tx.send(JobOutcome {
                kind: JobKind::Chat,
                ok,
            });
            drop(guard);
        });
        true
    }

    /// Capture pipeline: vision → solution → preview, logging turns and
    /// streaming stage events as it goes. A failed stage aborts the rest
    /// of this job only.
    async fn run_capture(&self, image_path: &PathBuf) -> bool {
        tracing::info!(path = %image_path.display(), "Starting capture pipeline");
        self.bus
            .publish(EventState::Processing, "Analyzing Image...", None);

        {
            let mut store = self.store.lock();
            if let Err(e) = store.start_session() {
                tracing::error!("Cannot open session log: {}", e);
            }
            // A new analysis starts from a blank dialogue.
            store.clear_chat();
        }

        self.bus
            .publish(EventState::Processing, "Vision Analysis...", None);
        let vision = match self.vision.analyze(image_path).await {
            Ok(v) => v,
            Err(e) => return self.fail_stage(e),
        };
        if let Err(e) = self.store.lock().log_local_image(TurnRole::User, image_path) {
            tracing::warn!("Failed to log capture image: {}", e);
        }
        tracing::info!(title = %vision.project_title, "Vision analysis done");

        self.bus.publish(
            EventState::Processing,
            "Generating Solution...",
            Some(serde_json::json!({ "vision": &vision })),
        );
        let solution = match self.solution.generate(&vision, None, &[], None).await {
            Ok(s) => s,
            Err(e) => return self.fail_stage(e),
        };
        if let Err(e) = self
            .store
            .lock()
            .append_text(TurnRole::Assistant, &solution.render_block())
        {
            tracing::warn!("Failed to log solution text: {}", e);
        }
        tracing::info!(project = %solution.project_name, "Solution generated");

        self.bus
            .publish(EventState::Processing, "Generating Preview Image...", None);
        let preview_url = match self.preview.generate(&solution.image_prompt) {
            Ok(url) => url,
            Err(e) => return self.fail_stage(e),
        };
        self.preview.prefetch(&preview_url);

        let images_dir = self.store.lock().images_dir().to_path_buf();
        if let Some(rel) = ConversationStore::download_generated_image(
            &self.download_client,
            &preview_url,
            &images_dir,
        )
        .await
        {
            if let Err(e) = self.store.lock().log_image_path(TurnRole::Assistant, &rel) {
                tracing::warn!("Failed to log preview image: {}", e);
            }
        }

        let project = Project::new(vision, solution.clone(), Some(preview_url));
        let response = project.to_response();
        {
            let mut store = self.store.lock();
            // Seed the voice dialogue with the freshly generated plan.
            let system = format!(
                "{}\n\n【当前方案】\n{}",
                self.solution.system_prompt(),
                serde_json::to_string_pretty(&solution).unwrap_or_default()
            );
            store.reset_chat(ChatMessage::system(system));
            store.set_project(project);
        }

        tracing::info!("Capture pipeline complete");
        self.bus
            .publish(EventState::Complete, "Analysis Complete!", Some(response));
        true
    }

    /// Chat turn over the maintained message list.
    async fn run_chat(&self, text: &str) -> bool {
        let messages = {
            let mut store = self.store.lock();
            if let Err(e) = store.append_text(TurnRole::User, text) {
                tracing::warn!("Failed to log user turn: {}", e);
            }
            store.push_chat(ChatMessage::user(text));
            store.chat_messages().to_vec()
        };

        self.bus.publish(
            EventState::VoiceUser,
            text,
            Some(serde_json::json!({ "user_text": text })),
        );
        self.bus
            .publish(EventState::VoiceProcessing, "AI正在思考...", None);

        match self.solution.chat(&messages).await {
            Ok(reply) => {
                {
                    let mut store = self.store.lock();
                    store.push_chat(ChatMessage::assistant(reply.clone()));
                    if let Err(e) = store.append_text(TurnRole::Assistant, &reply) {
                        tracing::warn!("Failed to log assistant turn: {}", e);
                    }
                }
                self.bus.publish(
                    EventState::VoiceResponse,
                    reply.clone(),
                    Some(serde_json::json!({ "ai_text": reply })),
                );
                true
            }
            Err(e) => {
                tracing::error!("Chat failed: {}", e);
                self.bus.publish(
                    EventState::VoiceError,
                    "AI回复失败",
                    Some(serde_json::json!({ "stage": e.stage })),
                );
                false
            }
        }
    }

    fn fail_stage(&self, err: StageError) -> bool {
        tracing::error!(stage = %err.stage, "Pipeline stage failed: {}", err.message);
        self.bus.publish(
            EventState::Error,
            err.to_string(),
            Some(serde_json::json!({ "stage": err.stage })),
        );
        false
    }
}
