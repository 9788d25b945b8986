use crate::client::{build_client, chat_completion, with_retry};
use crate::extract;
use crate::types::{ChatMessage, SolutionResult, VisionResult};
use sparkbox_foundation::{Stage, SolutionConfig, StageError};
use std::time::Duration;

/// Instruction appended when the prompt carries fresh user feedback.
const OPTIMIZE_SUFFIX: &str = "\n请基于上述对话历史和当前方案，结合用户的新反馈，提出改进和优化的解决方案。\n保持原有方案的优点，针对用户反馈的问题进行针对性改进。";

pub struct SolutionAgent {
    client: reqwest::Client,
    config: SolutionConfig,
}

impl SolutionAgent {
    pub fn new(config: SolutionConfig) -> Self {
        Self {
            client: build_client(Duration::from_secs(120)),
            config,
        }
    }

    /// Generate (or regenerate) the structured maker plan. Prompt
    /// assembly is deterministic: system prompt, vision data, then the
    /// optional current solution, conversation history and new feedback.
    pub async fn generate(
        &self,
        vision: &VisionResult,
        current: Option<&SolutionResult>,
        history: &[ChatMessage],
        user_message: Option<&str>,
    ) -> Result<SolutionResult, StageError> {
        let prompt = self.build_prompt(vision, current, history, user_message);
        let messages = serde_json::json!([{ "role": "user", "content": prompt }]);

        if user_message.is_some() {
            tracing::info!(model = %self.config.model_name, "Refining solution from feedback");
        } else {
            tracing::info!(model = %self.config.model_name, "Generating solution");
        }

        let body = with_retry(|| {
            chat_completion(
                &self.client,
                &self.config.base_url,
                &self.config.api_key,
                &self.config.model_name,
                messages.clone(),
                Stage::Solution,
            )
        })
        .await?;

        let object = extract::extract_object(&body)
            .ok_or_else(|| StageError::parse(Stage::Solution, "no JSON object in response"))?;

        serde_json::from_str(&object).map_err(|e| {
            StageError::parse(Stage::Solution, format!("solution result invalid: {}", e))
        })
    }

    /// The configured mentor prompt; the scheduler uses it to seed the
    /// chat system turn.
    pub fn system_prompt(&self) -> &str {
        &self.config.prompt
    }

    /// Free-text conversation over the accumulated message list. Used
    /// only once a project exists; the reply is not JSON.
    pub async fn chat(&self, messages: &[ChatMessage]) -> Result<String, StageError> {
        let payload = serde_json::to_value(messages)
            .map_err(|e| StageError::rejected(Stage::Chat, e.to_string()))?;

        tracing::info!(model = %self.config.model_name, turns = messages.len(), "Chatting");

        with_retry(|| {
            chat_completion(
                &self.client,
                &self.config.base_url,
                &self.config.api_key,
                &self.config.model_name,
                payload.clone(),
                Stage::Chat,
            )
        })
        .await
    }

    fn build_prompt(
        &self,
        vision: &VisionResult,
        current: Option<&SolutionResult>,
        history: &[ChatMessage],
        user_message: Option<&str>,
    ) -> String {
        let vision_json =
            serde_json::to_string_pretty(vision).unwrap_or_else(|_| "{}".to_string());

        let mut prompt = format!(
            "\n{}\n\n【当前学生的草图视觉分析数据】\n{}\n",
            self.config.prompt, vision_json
        );

        if let Some(solution) = current {
            let solution_json =
                serde_json::to_string_pretty(solution).unwrap_or_else(|_| "{}".to_string());
            prompt.push_str(&format!("\n\n【当前已有的解决方案】\n{}\n", solution_json));
        }

        if !history.is_empty() {
            let lines: Vec<String> = history
                .iter()
                .map(|m| format!("{}: {}", m.role, m.content))
                .collect();
            prompt.push_str(&format!("\n\n【对话历史】\n{}\n", lines.join("\n")));
        }

        if let Some(feedback) = user_message {
            prompt.push_str(&format!(
                "\n\n【用户新的反馈或建议】\n{}\n{}",
                feedback, OPTIMIZE_SUFFIX
            ));
        }

        prompt
    }
}
