//! Shared chat-completions plumbing for the vision and solution
//! adapters, including the bounded retry policy.

use sparkbox_foundation::{Stage, StageError};
use std::future::Future;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 3;
const INITIAL_DELAY: Duration = Duration::from_millis(500);
const MAX_DELAY: Duration = Duration::from_secs(4);

pub fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(5))
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

/// Run `op` up to three times, doubling the delay between attempts while
/// the error stays transport-level.
pub async fn with_retry<T, F, Fut>(op: F) -> Result<T, StageError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, StageError>>,
{
    let mut delay = INITIAL_DELAY;
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.retryable && attempt < MAX_ATTEMPTS => {
                tracing::warn!(
                    stage = %err.stage,
                    attempt,
                    "Stage call failed ({}); retrying in {:?}",
                    err.message,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// POST an OpenAI-style chat completion and return the first choice's
/// message content.
pub async fn chat_completion(
    client: &reqwest::Client,
    base_url: &str,
    api_key: &str,
    model: &str,
    messages: serde_json::Value,
    stage: Stage,
) -> Result<String, StageError> {
    let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
    let payload = serde_json::json!({
        "model": model,
        "messages": messages,
    });

    let response = client
        .post(&url)
        .bearer_auth(api_key)
        .json(&payload)
        .send()
        .await
        .map_err(|e| StageError::transport(stage, e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = format!("upstream returned {}: {}", status, body);
        return if status.is_server_error() {
            Err(StageError::transport(stage, message))
        } else {
            Err(StageError::rejected(stage, message))
        };
    }

    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| StageError::parse(stage, e.to_string()))?;

    body["choices"][0]["message"]["content"]
        .as_str()
        .map(|s| s.to_string())
        .ok_or_else(|| StageError::parse(stage, "response has no message content"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_stops_after_three_transport_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StageError> = with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StageError::transport(Stage::Vision, "down")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn parse_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), StageError> = with_retry(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(StageError::parse(Stage::Solution, "bad body")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn success_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = with_retry(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(StageError::transport(Stage::Preview, "blip"))
                } else {
                    Ok(7u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
