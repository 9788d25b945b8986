pub mod client;
pub mod conversation;
pub mod extract;
pub mod preview;
pub mod solution;
pub mod types;
pub mod vision;

pub use conversation::{ConversationStore, TurnKind, TurnRecord, TurnRole};
pub use preview::PreviewAgent;
pub use solution::SolutionAgent;
pub use types::{ChatMessage, Project, SolutionResult, VisionResult};
pub use vision::VisionAgent;
