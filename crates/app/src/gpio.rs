//! GPIO input arbiter. Buttons are active-low lines polled on dedicated
//! threads with software debounce; the arbiter task maps edges and
//! levels onto station actions according to the current mode.

use crate::events::{EventBus, EventState};
use crate::supervisor::StationSupervisor;
use gpio_cdev::{Chip, LineRequestFlags};
use sparkbox_foundation::{ButtonConfig, IoConfig, StationMode};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Minimum spacing between accepted capture presses.
const CAPTURE_COOLDOWN: Duration = Duration::from_secs(1);
/// Window after a reset during which capture presses are chatter.
const RESET_REFRACTORY: Duration = Duration::from_secs(2);
/// Arbiter polling period.
const TICK: Duration = Duration::from_millis(10);

/// One debounced active-low button. A polling thread keeps the level and
/// one-shot edge flags fresh.
pub struct GpioButton {
    pressed_event: Arc<AtomicBool>,
    level: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl GpioButton {
    pub fn open(chip_path: &str, name: &str, config: &ButtonConfig) -> std::io::Result<Self> {
        let gpio_err = |e: gpio_cdev::Error| std::io::Error::new(std::io::ErrorKind::Other, e);
        let mut chip = Chip::new(chip_path).map_err(gpio_err)?;
        let line = chip.get_line(config.pin).map_err(gpio_err)?;
        let request = line
            .request(LineRequestFlags::INPUT, 1, "sparkbox")
            .map_err(gpio_err)?;

        let pressed_event = Arc::new(AtomicBool::new(false));
        let level = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));

        let thread_event = pressed_event.clone();
        let thread_level = level.clone();
        let thread_running = running.clone();
        let debounce = Duration::from_millis(config.debounce_ms);
        let thread_name = format!("gpio-{}", name);

        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let mut previous = false;
                let mut last_edge = Instant::now() - debounce;
                while thread_running.load(Ordering::Relaxed) {
                    // Active low: 0 means pressed.
                    let pressed = matches!(request.get_value(), Ok(0));
                    thread_level.store(pressed, Ordering::Relaxed);

                    if pressed && !previous {
                        let now = Instant::now();
                        if now.duration_since(last_edge) >= debounce {
                            // Runt-press filter: the level must survive the
                            // debounce window.
                            std::thread::sleep(debounce.min(Duration::from_millis(20)));
                            if matches!(request.get_value(), Ok(0)) {
                                last_edge = now;
                                thread_event.store(true, Ordering::Relaxed);
                            }
                        }
                    }
                    previous = pressed;
                    std::thread::sleep(Duration::from_millis(5));
                }
            })?;

        Ok(Self {
            pressed_event,
            level,
            running,
            handle: Some(handle),
        })
    }

    /// One-shot falling-edge flag; reading it clears it.
    pub fn take_press(&self) -> bool {
        self.pressed_event.swap(false, Ordering::Relaxed)
    }

    /// Instantaneous press state.
    pub fn is_pressed(&self) -> bool {
        self.level.load(Ordering::Relaxed)
    }
}

impl Drop for GpioButton {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Everything the decision step needs from the hardware for one tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct ButtonSnapshot {
    pub capture_edge: bool,
    pub video_edge: bool,
    pub video_level: bool,
    pub pgup_edge: bool,
    pub pgdn_edge: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArbiterAction {
    Capture,
    Reset,
    EnterVoice,
    VoiceStart,
    VoiceStop,
    PagePrev,
    PageNext,
}

/// Pure decision core of the arbiter: contextual button mapping plus the
/// timing windows that filter chatter.
pub struct ArbiterLogic {
    last_capture: Option<Instant>,
    last_reset: Option<Instant>,
    release_required: bool,
}

impl Default for ArbiterLogic {
    fn default() -> Self {
        Self::new()
    }
}

impl ArbiterLogic {
    pub fn new() -> Self {
        Self {
            last_capture: None,
            last_reset: None,
            release_required: false,
        }
    }

    pub fn step(
        &mut self,
        now: Instant,
        mode: StationMode,
        recording: bool,
        snapshot: &ButtonSnapshot,
    ) -> Vec<ArbiterAction> {
        let mut actions = Vec::new();

        if snapshot.capture_edge {
            if let Some(action) = self.on_capture_edge(now, mode) {
                actions.push(action);
            }
        }

        match mode {
            StationMode::Result => {
                if snapshot.video_edge {
                    self.release_required = true;
                    actions.push(ArbiterAction::EnterVoice);
                }
            }
            StationMode::Voice => {
                if self.release_required {
                    if !snapshot.video_level {
                        self.release_required = false;
                    }
                } else if snapshot.video_level && !recording {
                    actions.push(ArbiterAction::VoiceStart);
                } else if !snapshot.video_level && recording {
                    actions.push(ArbiterAction::VoiceStop);
                }
            }
            _ => {}
        }

        if snapshot.pgup_edge {
            actions.push(ArbiterAction::PagePrev);
        }
        if snapshot.pgdn_edge {
            actions.push(ArbiterAction::PageNext);
        }

        actions
    }

    fn on_capture_edge(&mut self, now: Instant, mode: StationMode) -> Option<ArbiterAction> {
        if let Some(last) = self.last_capture {
            if now.duration_since(last) < CAPTURE_COOLDOWN {
                tracing::debug!("Capture press ignored (cooldown)");
                return None;
            }
        }
        self.last_capture = Some(now);

        match mode {
            StationMode::Idle | StationMode::Processing => {
                if let Some(reset_at) = self.last_reset {
                    if now.duration_since(reset_at) < RESET_REFRACTORY {
                        tracing::debug!("Capture press ignored (reset refractory)");
                        return None;
                    }
                }
                Some(ArbiterAction::Capture)
            }
            StationMode::Result | StationMode::Voice => {
                self.last_reset = Some(now);
                self.release_required = false;
                Some(ArbiterAction::Reset)
            }
        }
    }
}

/// Drives the logic against real lines and dispatches actions to the
/// supervisor. Owning the buttons here scopes the GPIO handles to the
/// arbiter; dropping it releases every line.
pub struct InputArbiter {
    buttons: HashMap<String, GpioButton>,
}

impl InputArbiter {
    pub fn open(io: &IoConfig) -> Self {
        let mut buttons = HashMap::new();
        for (name, config) in &io.buttons {
            let key = name.to_ascii_lowercase();
            match GpioButton::open(&io.chip, &key, config) {
                Ok(button) => {
                    tracing::info!(button = %key, pin = config.pin, "GPIO button ready");
                    buttons.insert(key, button);
                }
                Err(e) => {
                    tracing::warn!(button = %key, pin = config.pin, "GPIO button unavailable: {}", e);
                }
            }
        }
        Self { buttons }
    }

    pub fn has_buttons(&self) -> bool {
        !self.buttons.is_empty()
    }

    fn snapshot(&self) -> ButtonSnapshot {
        let edge = |name: &str| self.buttons.get(name).map_or(false, |b| b.take_press());
        let level = |name: &str| self.buttons.get(name).map_or(false, |b| b.is_pressed());
        ButtonSnapshot {
            capture_edge: edge("capture"),
            video_edge: edge("video"),
            video_level: level("video"),
            pgup_edge: edge("pgup"),
            pgdn_edge: edge("pgdn"),
        }
    }

    /// Poll until shutdown. The buttons (and their GPIO handles) are
    /// released when the task ends.
    pub fn spawn(self, supervisor: Arc<StationSupervisor>, bus: Arc<EventBus>) {
        tokio::spawn(async move {
            let mut logic = ArbiterLogic::new();
            let mut tick = tokio::time::interval(TICK);
            loop {
                if supervisor.is_shutting_down() {
                    break;
                }
                tick.tick().await;

                let snapshot = self.snapshot();
                let actions = logic.step(
                    Instant::now(),
                    supervisor.mode(),
                    supervisor.is_recording(),
                    &snapshot,
                );

                for action in actions {
                    dispatch(action, &supervisor, &bus);
                }
            }
            tracing::info!("Input arbiter stopped; GPIO lines released");
        });
    }
}

fn dispatch(action: ArbiterAction, supervisor: &Arc<StationSupervisor>, bus: &Arc<EventBus>) {
    match action {
        ArbiterAction::Capture => {
            tracing::info!("[gpio] capture button -> snapshot");
            if let Err(e) = supervisor.capture() {
                tracing::warn!("Capture failed: {}", e);
            }
        }
        ArbiterAction::Reset => {
            tracing::info!("[gpio] capture button -> reset");
            supervisor.reset();
        }
        ArbiterAction::EnterVoice => {
            tracing::info!("[gpio] video button -> enter voice mode");
            supervisor.voice_enter();
        }
        ArbiterAction::VoiceStart => {
            tracing::info!("[gpio] video held -> start recording");
            supervisor.voice_start();
        }
        ArbiterAction::VoiceStop => {
            tracing::info!("[gpio] video released -> stop recording");
            supervisor.voice_stop();
        }
        ArbiterAction::PagePrev => {
            bus.publish(
                EventState::Control,
                "Previous",
                Some(serde_json::json!({"action": "prev"})),
            );
        }
        ArbiterAction::PageNext => {
            bus.publish(
                EventState::Control,
                "Next",
                Some(serde_json::json!({"action": "next"})),
            );
        }
    }
}
