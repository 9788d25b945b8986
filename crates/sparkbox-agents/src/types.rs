use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output of the vision stage. Extra keys from the model pass through in
/// `extra`; the three named fields are required for the stage to count
/// as successful.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionResult {
    pub project_title: String,
    pub visual_components: Vec<Value>,
    pub user_intent_analysis: Value,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Output of the solution stage. `image_prompt` feeds the preview stage
/// and must be non-empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolutionResult {
    pub project_name: String,
    #[serde(default)]
    pub target_user: Option<String>,
    #[serde(default)]
    pub difficulty: Option<String>,
    pub core_idea: String,
    pub materials: Vec<String>,
    pub steps: Vec<String>,
    pub learning_outcomes: Vec<String>,
    pub image_prompt: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl SolutionResult {
    /// Fixed human-readable rendering logged as the assistant turn after
    /// the solution stage.
    pub fn render_block(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        parts.push(format!("项目名称：{}", self.project_name));
        parts.push(format!("核心思路：{}", self.core_idea));

        if !self.materials.is_empty() {
            parts.push(format!("材料清单：{}", self.materials.join("、")));
        }

        if !self.steps.is_empty() {
            let lines: Vec<String> = self
                .steps
                .iter()
                .enumerate()
                .map(|(i, step)| format!("{}. {}", i + 1, step))
                .collect();
            parts.push(format!("制作步骤：\n{}", lines.join("\n")));
        }

        if !self.learning_outcomes.is_empty() {
            let lines: Vec<String> = self
                .learning_outcomes
                .iter()
                .map(|o| format!("- {}", o))
                .collect();
            parts.push(format!("学习收获：\n{}", lines.join("\n")));
        }

        parts.join("\n\n")
    }
}

/// A chat-completions message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".into(),
            content: content.into(),
        }
    }
}

/// One project, as produced by a successful capture and mutated by chat
/// turns. Replaced wholesale by the next capture.
#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: String,
    #[serde(skip)]
    pub created_at: DateTime<Local>,
    pub vision: VisionResult,
    pub solution: SolutionResult,
    pub preview_url: Option<String>,
}

impl Project {
    pub fn new(vision: VisionResult, solution: SolutionResult, preview_url: Option<String>) -> Self {
        let created_at = Local::now();
        let id = format!(
            "proj_{}_{:04x}",
            created_at.format("%Y%m%d%H%M%S"),
            rand::random::<u16>()
        );
        Self {
            id,
            created_at,
            vision,
            solution,
            preview_url,
        }
    }

    /// The combined result served by `/api/result` and carried on the
    /// `complete` event.
    pub fn to_response(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "vision": self.vision,
            "solution": self.solution,
            "preview_url": self.preview_url,
            "timestamp": self.created_at.to_rfc3339(),
        })
    }
}
