//! End-to-end scheduler runs against mocked upstream endpoints: stage
//! event ordering, single-slot admission, and chat gating.

use parking_lot::Mutex;
use std::io::Write;

use sparkbox_app::events::{EventBus, EventState, StationEvent};
use sparkbox_app::scheduler::PipelineScheduler;
use sparkbox_agents::{ConversationStore, PreviewAgent, SolutionAgent, VisionAgent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::Receiver;

struct Harness {
    scheduler: PipelineScheduler,
    bus: Arc<EventBus>,
    store: Arc<Mutex<ConversationStore>>,
    _logs: tempfile::TempDir,
}

fn vision_body() -> String {
    serde_json::json!({
        "choices": [{ "message": { "content":
            "{\"project_title\": \"避障小车\", \"visual_components\": [\"轮子\"], \"user_intent_analysis\": \"想做小车\"}"
        } }]
    })
    .to_string()
}

fn solution_body() -> String {
    serde_json::json!({
        "choices": [{ "message": { "content":
            "{\"project_name\": \"避障小车\", \"core_idea\": \"超声波避障\", \"materials\": [\"超声波模块\"], \"steps\": [\"接线\"], \"learning_outcomes\": [\"电子\"], \"image_prompt\": \"a robot car\"}"
        } }]
    })
    .to_string()
}

fn chat_body(text: &str) -> String {
    serde_json::json!({
        "choices": [{ "message": { "content": text } }]
    })
    .to_string()
}

fn build_harness(base_url: &str) -> Harness {
    let bus = Arc::new(EventBus::new());
    let logs = tempfile::tempdir().unwrap();
    let store = Arc::new(Mutex::new(ConversationStore::new(
        logs.path().join("ai_logs"),
    )));

    let vision = Arc::new(VisionAgent::new(
        serde_json::from_value(serde_json::json!({
            "api_key": "sk-test",
            "base_url": base_url,
            "model_name": "qwen-vl-plus",
            "prompt": "分析草图。",
            "target_min_size": 16
        }))
        .unwrap(),
    ));
    let solution = Arc::new(SolutionAgent::new(
        serde_json::from_value(serde_json::json!({
            "api_key": "sk-test",
            "base_url": base_url,
            "model_name": "qwen-plus",
            "prompt": "你是一位创客导师。"
        }))
        .unwrap(),
    ));
    let preview = Arc::new(
        PreviewAgent::new(sparkbox_foundation::ImageGenConfig::default())
            .with_base_url(format!("{}/prompt/", base_url)),
    );

    let (scheduler, mut outcome_rx) =
        PipelineScheduler::new(bus.clone(), store.clone(), vision, solution, preview);
    // Drain outcomes so the channel never backs up.
    tokio::spawn(async move { while outcome_rx.recv().await.is_some() {} });

    Harness {
        scheduler,
        bus,
        store,
        _logs: logs,
    }
}

fn sketch_file() -> tempfile::NamedTempFile {
    let file = tempfile::Builder::new().suffix(".jpg").tempfile().unwrap();
    image::RgbImage::from_pixel(32, 32, image::Rgb([220, 220, 220]))
        .save(file.path())
        .unwrap();
    file
}

async fn collect_until(
    rx: &mut Receiver<StationEvent>,
    terminal: &[EventState],
) -> Vec<StationEvent> {
    let mut events = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("event stream stalled")
            .expect("bus closed");
        let state = event.state;
        events.push(event);
        if terminal.contains(&state) {
            return events;
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn capture_job_emits_stage_events_in_order() {
    let mut server = mockito::Server::new_async().await;
    let harness = build_harness(&server.url());

    // Both stages hit the same path; tell them apart by request body.
    let vision_mock = server
        .mock("POST", "/chat/completions")
        .match_body(mockito::Matcher::Regex("image_url".to_string()))
        .with_status(200)
        .with_body(vision_body())
        .create_async()
        .await;
    let solution_mock = server
        .mock("POST", "/chat/completions")
        .match_body(mockito::Matcher::Regex("草图视觉分析数据".to_string()))
        .with_status(200)
        .with_body(solution_body())
        .create_async()
        .await;
    server
        .mock("GET", mockito::Matcher::Regex("^/prompt/".to_string()))
        .with_status(200)
        .with_body(&b"\xff\xd8jpeg"[..])
        .create_async()
        .await;

    let mut rx = harness.bus.subscribe();
    let sketch = sketch_file();
    assert!(harness.scheduler.submit_capture(sketch.path().to_path_buf()));

    let events = collect_until(&mut rx, &[EventState::Complete, EventState::Error]).await;
    let messages: Vec<&str> = events.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(
        messages,
        vec![
            "Analyzing Image...",
            "Vision Analysis...",
            "Generating Solution...",
            "Generating Preview Image...",
            "Analysis Complete!",
        ]
    );

    let complete = events.last().unwrap();
    assert_eq!(complete.state, EventState::Complete);
    let data = complete.data.as_ref().unwrap();
    assert_eq!(data["solution"]["project_name"], "避障小车");
    assert!(data["preview_url"].as_str().unwrap().contains("/prompt/"));

    vision_mock.assert_async().await;
    solution_mock.assert_async().await;

    // Exactly one terminal event per accepted job.
    let terminals = events
        .iter()
        .filter(|e| matches!(e.state, EventState::Complete | EventState::Error))
        .count();
    assert_eq!(terminals, 1);

    // Slot released after completion.
    assert!(!harness.scheduler.is_busy());

    // Project landed in the store with a seeded chat system turn.
    let store = harness.store.lock();
    assert!(store.project().is_some());
    assert_eq!(store.chat_messages().len(), 1);
    assert_eq!(store.chat_messages()[0].role, "system");
}

#[tokio::test(flavor = "multi_thread")]
async fn vision_failure_aborts_job_with_stage_tag() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(chat_body("I see nothing useful."))
        .create_async()
        .await;

    let harness = build_harness(&server.url());
    let mut rx = harness.bus.subscribe();
    let sketch = sketch_file();
    assert!(harness.scheduler.submit_capture(sketch.path().to_path_buf()));

    let events = collect_until(&mut rx, &[EventState::Complete, EventState::Error]).await;
    let last = events.last().unwrap();
    assert_eq!(last.state, EventState::Error);
    assert_eq!(last.data.as_ref().unwrap()["stage"], "vision");

    // Only the pre-vision stages ran.
    assert!(events.iter().all(|e| e.message != "Generating Solution..."));
    assert!(!harness.scheduler.is_busy());
}

#[tokio::test(flavor = "multi_thread")]
async fn busy_slot_rejects_second_capture_with_event() {
    let mut server = mockito::Server::new_async().await;
    // A slow vision stage keeps the slot held.
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_chunked_body(|w| {
            std::thread::sleep(Duration::from_millis(800));
            w.write_all(vision_body().as_bytes())
        })
        .create_async()
        .await;

    let harness = build_harness(&server.url());
    let mut rx = harness.bus.subscribe();
    let sketch = sketch_file();

    assert!(harness.scheduler.submit_capture(sketch.path().to_path_buf()));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.scheduler.is_busy());

    // Second press while processing.
    assert!(!harness.scheduler.submit_capture(sketch.path().to_path_buf()));

    let events = collect_until(&mut rx, &[EventState::Error, EventState::Complete]).await;
    assert!(events
        .iter()
        .any(|e| e.state == EventState::Error && e.message == "系统忙，请稍后"));
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_without_project_is_rejected() {
    let server = mockito::Server::new_async().await;
    let harness = build_harness(&server.url());
    let mut rx = harness.bus.subscribe();

    assert!(!harness.scheduler.submit_chat("make it cheaper".into()));

    let event = rx.recv().await.unwrap();
    assert_eq!(event.state, EventState::VoiceError);
    assert_eq!(event.message, "请先拍照分析图片");
    assert!(!harness.scheduler.is_busy());
}

#[tokio::test(flavor = "multi_thread")]
async fn chat_appends_turns_and_emits_voice_events() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body(chat_body("可以换用回收纸板。"))
        .create_async()
        .await;

    let harness = build_harness(&server.url());

    // Install a project directly so chat is admitted.
    {
        let mut store = harness.store.lock();
        store.start_session().unwrap();
        let vision = serde_json::from_value(serde_json::json!({
            "project_title": "t", "visual_components": [], "user_intent_analysis": ""
        }))
        .unwrap();
        let solution = serde_json::from_value(serde_json::json!({
            "project_name": "t", "core_idea": "i", "materials": [], "steps": [],
            "learning_outcomes": [], "image_prompt": "p"
        }))
        .unwrap();
        store.reset_chat(sparkbox_agents::ChatMessage::system("你是一位创客导师。"));
        store.set_project(sparkbox_agents::Project::new(vision, solution, None));
    }

    let mut rx = harness.bus.subscribe();
    assert!(harness.scheduler.submit_chat("make it cheaper".into()));

    let events = collect_until(&mut rx, &[EventState::VoiceResponse, EventState::VoiceError]).await;
    let states: Vec<EventState> = events.iter().map(|e| e.state).collect();
    assert_eq!(
        states,
        vec![
            EventState::VoiceUser,
            EventState::VoiceProcessing,
            EventState::VoiceResponse,
        ]
    );
    assert_eq!(events[0].message, "make it cheaper");
    assert!(!events[2].message.is_empty());

    // Memory now holds system + user + assistant.
    let store = harness.store.lock();
    assert_eq!(store.chat_messages().len(), 3);
    assert_eq!(store.chat_messages()[2].role, "assistant");
}
