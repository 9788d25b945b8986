use rand::Rng;
use sparkbox_foundation::{ImageGenConfig, Stage, StageError};
use std::time::Duration;

const POLLINATIONS_BASE: &str = "https://image.pollinations.ai/prompt/";

/// Positive styling pushed after the model's own description to force a
/// photographic look.
const PHOTOREALISTIC_SUFFIX: &str = ", documentary photograph shot on dslr, macro lens close-up, \
tangible textures, rough materials, messy wiring, \
natural workshop lighting, film grain, sharp focus";

/// Negative constraints; the service treats the tail of the prompt as
/// style guidance.
const NEGATIVE_CONSTRAINTS: &str = ", NOT cartoon, NOT 3d render, NOT cgi, NOT anime, \
NOT blender, no smooth plastic, no perfect shapes";

pub struct PreviewAgent {
    client: reqwest::Client,
    config: ImageGenConfig,
    base_url: String,
}

impl PreviewAgent {
    pub fn new(config: ImageGenConfig) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            config,
            base_url: POLLINATIONS_BASE.to_string(),
        }
    }

    /// Point at a different generation endpoint (test hook).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build the generation URL for a prompt. The stage fails on an
    /// empty prompt; the URL itself is the stage's result.
    pub fn generate(&self, image_prompt: &str) -> Result<String, StageError> {
        if image_prompt.trim().is_empty() {
            return Err(StageError::parse(Stage::Preview, "empty image prompt"));
        }
        let seed: u32 = rand::thread_rng().gen();
        Ok(self.build_url(image_prompt, seed))
    }

    fn build_url(&self, image_prompt: &str, seed: u32) -> String {
        let full_prompt = format!(
            "{}{}{}",
            image_prompt, PHOTOREALISTIC_SUFFIX, NEGATIVE_CONSTRAINTS
        );
        let encoded = urlencoding::encode(&full_prompt);
        format!(
            "{}{}?model={}&width={}&height={}&seed={}&nologo=true&enhance=false",
            self.base_url,
            encoded,
            self.config.model_name,
            self.config.width,
            self.config.height,
            seed
        )
    }

    /// Fire a small best-effort GET so the remote renders the image
    /// before the browser asks for it. Reads at most one chunk.
    pub fn prefetch(&self, url: &str) {
        let client = self.client.clone();
        let url = url.to_string();
        tokio::spawn(async move {
            tracing::debug!(url = %url, "Prefetching preview image");
            match client.get(&url).send().await {
                Ok(mut response) => {
                    let _ = response.chunk().await;
                }
                Err(e) => {
                    tracing::debug!("Preview prefetch failed: {}", e);
                }
            }
        });
    }
}
