use crate::error::SparkBoxError;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::RwLock;
use std::sync::Arc;

/// Coarse station state. The physical buttons change meaning depending on
/// which mode the station is in, so every transition goes through the
/// supervisor-owned [`ModeManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationMode {
    /// No project. Capture takes a snapshot; chat is rejected.
    Idle,
    /// A pipeline job holds the scheduler slot. Capture and chat are rejected.
    Processing,
    /// A project exists, no job running. Capture resets; voice mode may be entered.
    Result,
    /// Push-to-talk semantics are live on the voice button.
    Voice,
}

pub struct ModeManager {
    mode: Arc<RwLock<StationMode>>,
    mode_tx: Sender<StationMode>,
    mode_rx: Receiver<StationMode>,
}

impl Default for ModeManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeManager {
    pub fn new() -> Self {
        let (mode_tx, mode_rx) = crossbeam_channel::unbounded();
        Self {
            mode: Arc::new(RwLock::new(StationMode::Idle)),
            mode_tx,
            mode_rx,
        }
    }

    pub fn transition(&self, new_mode: StationMode) -> Result<(), SparkBoxError> {
        let mut current = self.mode.write();

        let valid = matches!(
            (&*current, &new_mode),
            (StationMode::Idle, StationMode::Processing)
                | (StationMode::Processing, StationMode::Result)
                | (StationMode::Processing, StationMode::Idle)
                | (StationMode::Result, StationMode::Idle)
                | (StationMode::Result, StationMode::Voice)
                | (StationMode::Voice, StationMode::Result)
                | (StationMode::Voice, StationMode::Idle)
        );

        if !valid {
            return Err(SparkBoxError::Fatal(format!(
                "Invalid mode transition: {:?} -> {:?}",
                *current, new_mode
            )));
        }

        tracing::info!("Mode transition: {:?} -> {:?}", *current, new_mode);
        *current = new_mode;
        let _ = self.mode_tx.send(new_mode);
        Ok(())
    }

    pub fn current(&self) -> StationMode {
        *self.mode.read()
    }

    pub fn subscribe(&self) -> Receiver<StationMode> {
        self.mode_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions() {
        let mgr = ModeManager::new();
        assert_eq!(mgr.current(), StationMode::Idle);
        mgr.transition(StationMode::Processing).unwrap();
        mgr.transition(StationMode::Result).unwrap();
        mgr.transition(StationMode::Voice).unwrap();
        mgr.transition(StationMode::Result).unwrap();
        mgr.transition(StationMode::Idle).unwrap();
    }

    #[test]
    fn failed_pipeline_returns_to_idle() {
        let mgr = ModeManager::new();
        mgr.transition(StationMode::Processing).unwrap();
        mgr.transition(StationMode::Idle).unwrap();
        assert_eq!(mgr.current(), StationMode::Idle);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let mgr = ModeManager::new();
        assert!(mgr.transition(StationMode::Result).is_err());
        assert!(mgr.transition(StationMode::Voice).is_err());
        // Still Idle after rejected transitions.
        assert_eq!(mgr.current(), StationMode::Idle);
    }

    #[test]
    fn subscribers_see_transitions_in_order() {
        let mgr = ModeManager::new();
        let rx = mgr.subscribe();
        mgr.transition(StationMode::Processing).unwrap();
        mgr.transition(StationMode::Result).unwrap();
        assert_eq!(rx.recv().unwrap(), StationMode::Processing);
        assert_eq!(rx.recv().unwrap(), StationMode::Result);
    }
}
