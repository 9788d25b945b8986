use sparkbox_agents::{ChatMessage, ConversationStore, TurnKind, TurnRecord, TurnRole};

fn read_log(path: &std::path::Path) -> Vec<TurnRecord> {
    serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
}

#[test]
fn session_log_name_has_timestamp_and_suffix() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ConversationStore::new(dir.path().to_path_buf());
    let path = store.start_session().unwrap();

    let name = path.file_name().unwrap().to_string_lossy().into_owned();
    // YYYY-MM-DD_HHMMSS_<rand6>.json
    assert!(name.ends_with(".json"));
    let stem = name.trim_end_matches(".json");
    let parts: Vec<&str> = stem.split('_').collect();
    assert_eq!(parts.len(), 3, "unexpected name: {}", name);
    assert_eq!(parts[0].len(), 10);
    assert_eq!(parts[1].len(), 6);
    assert_eq!(parts[2].len(), 6);
}

#[test]
fn turns_append_in_submission_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ConversationStore::new(dir.path().to_path_buf());
    store.start_session().unwrap();

    store.append_text(TurnRole::Assistant, "项目名称：小车").unwrap();
    store.append_text(TurnRole::User, "make it cheaper").unwrap();
    store.append_text(TurnRole::Assistant, "可以换用回收材料。").unwrap();

    let entries = read_log(store.log_path().unwrap());
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].role, TurnRole::Assistant);
    assert_eq!(entries[1].content, "make it cheaper");
    assert_eq!(entries[2].role, TurnRole::Assistant);
    assert!(entries.iter().all(|t| t.kind == TurnKind::Text));
}

#[test]
fn empty_text_turns_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ConversationStore::new(dir.path().to_path_buf());
    store.start_session().unwrap();

    store.append_text(TurnRole::User, "").unwrap();
    store.append_text(TurnRole::User, "hello").unwrap();

    let entries = read_log(store.log_path().unwrap());
    assert_eq!(entries.len(), 1);
}

#[test]
fn local_image_is_copied_and_resolves_under_log_dir() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ConversationStore::new(dir.path().join("ai_logs"));
    store.start_session().unwrap();

    let src = dir.path().join("capture_20240501_120000.jpg");
    std::fs::write(&src, b"\xff\xd8fakejpeg").unwrap();

    store.log_local_image(TurnRole::User, &src).unwrap();

    let entries = read_log(store.log_path().unwrap());
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].kind, TurnKind::Image);
    assert_eq!(entries[0].content, "images/capture_20240501_120000.jpg");

    // Relative path resolves against the log directory.
    let resolved = dir.path().join("ai_logs").join(&entries[0].content);
    assert!(resolved.exists());
}

#[test]
fn serialized_roles_are_user_and_assistant() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ConversationStore::new(dir.path().to_path_buf());
    store.start_session().unwrap();
    store.append_text(TurnRole::User, "hi").unwrap();
    store.append_text(TurnRole::Assistant, "你好").unwrap();

    let raw: serde_json::Value =
        serde_json::from_slice(&std::fs::read(store.log_path().unwrap()).unwrap()).unwrap();
    assert_eq!(raw[0]["role"], "user");
    assert_eq!(raw[0]["type"], "text");
    assert_eq!(raw[1]["role"], "assistant");
}

#[test]
fn clear_drops_memory_but_keeps_log_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ConversationStore::new(dir.path().to_path_buf());
    store.start_session().unwrap();
    store.append_text(TurnRole::User, "hello").unwrap();
    let log_path = store.log_path().unwrap().to_path_buf();

    store.reset_chat(ChatMessage::system("系统"));
    store.push_chat(ChatMessage::user("hi"));
    assert_eq!(store.chat_messages().len(), 2);

    store.clear();
    assert!(store.chat_messages().is_empty());
    assert!(store.project().is_none());
    assert!(store.log_path().is_none());
    // The previous session's file is untouched.
    assert!(log_path.exists());
    assert_eq!(read_log(&log_path).len(), 1);
}

#[test]
fn new_session_gets_a_new_file() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ConversationStore::new(dir.path().to_path_buf());
    let first = store.start_session().unwrap();
    store.append_text(TurnRole::User, "one").unwrap();

    let second = store.start_session().unwrap();
    store.append_text(TurnRole::User, "two").unwrap();

    assert_ne!(first, second);
    assert_eq!(read_log(&first).len(), 1);
    assert_eq!(read_log(&second).len(), 1);
}

#[tokio::test]
async fn remote_image_download_lands_in_images_dir() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/preview.jpg")
        .with_status(200)
        .with_header("content-type", "image/jpeg")
        .with_body(&b"\xff\xd8fakejpeg"[..])
        .create_async()
        .await;

    let dir = tempfile::tempdir().unwrap();
    let images_dir = dir.path().join("images");
    let client = reqwest::Client::new();

    let rel = ConversationStore::download_generated_image(
        &client,
        &format!("{}/preview.jpg", server.url()),
        &images_dir,
    )
    .await
    .expect("download succeeds");

    assert!(rel.starts_with("images/generated_"));
    assert!(rel.ends_with(".jpg"));
    let file = dir.path().join(&rel);
    assert_eq!(std::fs::read(&file).unwrap(), b"\xff\xd8fakejpeg");
}

#[tokio::test]
async fn failed_download_returns_none() {
    let dir = tempfile::tempdir().unwrap();
    let client = reqwest::Client::new();
    let rel = ConversationStore::download_generated_image(
        &client,
        "http://127.0.0.1:9/preview.jpg",
        &dir.path().join("images"),
    )
    .await;
    assert!(rel.is_none());
}
