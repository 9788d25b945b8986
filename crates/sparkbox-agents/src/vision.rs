use crate::client::{build_client, chat_completion, with_retry};
use crate::extract;
use crate::types::VisionResult;
use base64::prelude::*;
use sparkbox_foundation::{Stage, StageError, VisionConfig};
use std::path::Path;
use std::time::Duration;

/// Fixed instruction appended to the configured prompt so the model
/// answers with a bare JSON object.
const NO_MARKDOWN_SUFFIX: &str = "\n\n请务必只输出纯 JSON，不要包含 Markdown 标记。";

pub struct VisionAgent {
    client: reqwest::Client,
    config: VisionConfig,
}

impl VisionAgent {
    pub fn new(config: VisionConfig) -> Self {
        Self {
            client: build_client(Duration::from_secs(60)),
            config,
        }
    }

    /// Analyze the rectified sketch: upscale if needed, send as a base64
    /// JPEG image part, and parse the JSON object out of the reply.
    pub async fn analyze(&self, image_path: &Path) -> Result<VisionResult, StageError> {
        let encoded = self.encode_image(image_path)?;
        let prompt = format!("{}{}", self.config.prompt, NO_MARKDOWN_SUFFIX);

        let messages = serde_json::json!([
            {
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt },
                    {
                        "type": "image_url",
                        "image_url": { "url": format!("data:image/jpeg;base64,{}", encoded) }
                    }
                ]
            }
        ]);

        tracing::info!(model = %self.config.model_name, "Running vision analysis");

        let body = with_retry(|| {
            chat_completion(
                &self.client,
                &self.config.base_url,
                &self.config.api_key,
                &self.config.model_name,
                messages.clone(),
                Stage::Vision,
            )
        })
        .await?;

        let object = extract::extract_object(&body)
            .ok_or_else(|| StageError::parse(Stage::Vision, "no JSON object in response"))?;

        serde_json::from_str(&object)
            .map_err(|e| StageError::parse(Stage::Vision, format!("vision result invalid: {}", e)))
    }

    /// Load the image, upscale the shorter side to `target_min_size` if
    /// necessary, re-encode as JPEG, base64.
    fn encode_image(&self, path: &Path) -> Result<String, StageError> {
        let img = image::open(path).map_err(|e| {
            StageError::rejected(Stage::Vision, format!("open {}: {}", path.display(), e))
        })?;
        let rgb = img.to_rgb8();

        let (w, h) = rgb.dimensions();
        let min_side = w.min(h);
        let target = self.config.target_min_size;

        let rgb = if min_side < target {
            let scale = target as f32 / min_side as f32;
            let (nw, nh) = (
                (w as f32 * scale).round() as u32,
                (h as f32 * scale).round() as u32,
            );
            tracing::info!("Upscaling sketch: {}x{} -> {}x{}", w, h, nw, nh);
            image::imageops::resize(&rgb, nw, nh, image::imageops::FilterType::Lanczos3)
        } else {
            rgb
        };

        let mut buffer = Vec::new();
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, 90)
            .encode_image(&rgb)
            .map_err(|e| StageError::rejected(Stage::Vision, format!("jpeg encode: {}", e)))?;

        Ok(BASE64_STANDARD.encode(&buffer))
    }
}
