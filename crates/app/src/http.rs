//! REST endpoints, the MJPEG feed and the SSE event stream. The browser
//! is an untrusted renderer: it only sees the supervisor through these
//! handlers and the event bus.

use crate::supervisor::{CaptureRequestError, StationSupervisor};
use axum::body::{Body, Bytes};
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;

type AppState = Arc<StationSupervisor>;

pub fn router(supervisor: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/status", get(api_status))
        .route("/api/result", get(api_result))
        .route("/api/reset", post(api_reset))
        .route("/api/snapshot", post(api_snapshot))
        .route("/api/voice/start", post(api_voice_start))
        .route("/api/voice/stop", post(api_voice_stop))
        .route("/api/quit", post(api_quit))
        .route("/api/proxy_image", get(api_proxy_image))
        .route("/video_feed", get(video_feed))
        .route("/stream", get(stream))
        .layer(TraceLayer::new_for_http())
        .with_state(supervisor)
}

async fn index() -> Html<&'static str> {
    Html(include_str!("../assets/sparkbox.html"))
}

async fn api_status(State(supervisor): State<AppState>) -> Json<serde_json::Value> {
    let latest = supervisor.bus().latest_status();
    Json(serde_json::to_value(latest).unwrap_or_else(|_| serde_json::json!({})))
}

async fn api_result(State(supervisor): State<AppState>) -> Json<serde_json::Value> {
    match supervisor.latest_result() {
        Some(result) => Json(result),
        None => Json(serde_json::json!({"error": "No results available"})),
    }
}

async fn api_reset(State(supervisor): State<AppState>) -> Json<serde_json::Value> {
    supervisor.reset();
    Json(serde_json::json!({"status": "reset_ok"}))
}

async fn api_snapshot(State(supervisor): State<AppState>) -> Response {
    match supervisor.capture() {
        Ok(()) => Json(serde_json::json!({"status": "snapshot_triggered"})).into_response(),
        Err(CaptureRequestError::Offline) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "System offline"})),
        )
            .into_response(),
        Err(CaptureRequestError::NoFrame) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "No camera frame available"})),
        )
            .into_response(),
    }
}

async fn api_voice_start(State(supervisor): State<AppState>) -> Response {
    match supervisor.voice_start() {
        "error" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "recorder failed"})),
        )
            .into_response(),
        status => Json(serde_json::json!({"status": status})).into_response(),
    }
}

async fn api_voice_stop(State(supervisor): State<AppState>) -> Response {
    match supervisor.voice_stop() {
        "error" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "recorder failed"})),
        )
            .into_response(),
        status => Json(serde_json::json!({"status": status})).into_response(),
    }
}

async fn api_quit(State(supervisor): State<AppState>) -> Json<serde_json::Value> {
    supervisor.request_shutdown();
    Json(serde_json::json!({"status": "stopping"}))
}

#[derive(Debug, Deserialize)]
struct ProxyQuery {
    url: String,
}

/// Fetch a remote image with browser-like headers and stream it back.
/// Failures answer with an embedded placeholder image.
async fn api_proxy_image(Query(query): Query<ProxyQuery>) -> Response {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new());

    let fetched = client
        .get(&query.url)
        .header(
            header::USER_AGENT,
            "Mozilla/5.0 (X11; Linux aarch64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36",
        )
        .header(header::ACCEPT, "image/avif,image/webp,image/*,*/*;q=0.8")
        .send()
        .await;

    match fetched {
        Ok(response) if response.status().is_success() => {
            let content_type = response
                .headers()
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("image/jpeg")
                .to_string();
            match response.bytes().await {
                Ok(bytes) => {
                    ([(header::CONTENT_TYPE, content_type)], bytes).into_response()
                }
                Err(e) => {
                    tracing::warn!("Proxy image body failed: {}", e);
                    placeholder_response()
                }
            }
        }
        Ok(response) => {
            tracing::warn!(status = %response.status(), url = %query.url, "Proxy image upstream error");
            placeholder_response()
        }
        Err(e) => {
            tracing::warn!("Proxy image fetch failed: {}", e);
            placeholder_response()
        }
    }
}

fn placeholder_response() -> Response {
    static PLACEHOLDER: std::sync::OnceLock<Vec<u8>> = std::sync::OnceLock::new();
    let bytes = PLACEHOLDER.get_or_init(|| {
        let img = image::RgbImage::from_pixel(64, 64, image::Rgb([180, 180, 180]));
        let mut buffer = Vec::new();
        let _ = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, 80)
            .encode_image(&img);
        buffer
    });
    (
        [(header::CONTENT_TYPE, "image/jpeg")],
        Bytes::from(bytes.clone()),
    )
        .into_response()
}

/// MJPEG at the producer's rate: each newly published annotated frame is
/// encoded once per client and pushed as one multipart part.
async fn video_feed(State(supervisor): State<AppState>) -> Response {
    let slot = supervisor.annotated_slot().clone();

    let stream = futures::stream::unfold(None::<Instant>, move |last_seen| {
        let slot = slot.clone();
        async move {
            loop {
                if let Some(frame) = slot.load() {
                    if last_seen.map_or(true, |ts| frame.timestamp > ts) {
                        let mut jpeg = Vec::new();
                        let encoded =
                            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 80)
                                .encode_image(&frame.pixels);
                        if encoded.is_ok() {
                            let mut part = format!(
                                "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
                                jpeg.len()
                            )
                            .into_bytes();
                            part.extend_from_slice(&jpeg);
                            part.extend_from_slice(b"\r\n");
                            return Some((
                                Ok::<_, Infallible>(Bytes::from(part)),
                                Some(frame.timestamp),
                            ));
                        }
                    }
                }
                tokio::time::sleep(Duration::from_millis(33)).await;
            }
        }
    });

    Response::builder()
        .header(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=frame",
        )
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

/// Server-sent events: one `data:` line per station event, keepalive
/// every 30 s of silence. Lagged subscribers skip dropped events and
/// continue from the oldest retained one.
async fn stream(
    State(supervisor): State<AppState>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let rx = supervisor.bus().subscribe();

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".into());
                    return Some((Ok(Event::default().data(data)), rx));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!(missed, "SSE subscriber lagged");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(30))
            .text("keepalive"),
    )
}
