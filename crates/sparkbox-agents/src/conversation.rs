//! Project-scoped dialogue memory plus the append-only per-session log.
//! One capture = one log file; image turns reference files copied or
//! downloaded into the log's `images/` subdirectory.

use crate::types::{ChatMessage, Project};
use chrono::Local;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnKind {
    Text,
    Image,
}

/// One entry of the session log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRecord {
    pub role: TurnRole,
    #[serde(rename = "type")]
    pub kind: TurnKind,
    pub content: String,
}

/// In-memory conversation state for the current project and the handle
/// to its session log. All file access happens behind the owner's lock,
/// so each log file sees one writer at a time.
pub struct ConversationStore {
    log_dir: PathBuf,
    images_dir: PathBuf,
    log_path: Option<PathBuf>,
    chat: Vec<ChatMessage>,
    project: Option<Project>,
}

impl ConversationStore {
    pub fn new(log_dir: PathBuf) -> Self {
        let images_dir = log_dir.join("images");
        Self {
            log_dir,
            images_dir,
            log_path: None,
            chat: Vec::new(),
            project: None,
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Allocate a fresh log file for a new capture session. Called
    /// before the vision stage runs.
    pub fn start_session(&mut self) -> io::Result<PathBuf> {
        std::fs::create_dir_all(&self.log_dir)?;
        std::fs::create_dir_all(&self.images_dir)?;

        let suffix: String = {
            let mut rng = rand::thread_rng();
            (0..6)
                .map(|_| {
                    let n: u8 = rng.gen_range(0..16);
                    char::from_digit(n as u32, 16).unwrap()
                })
                .collect()
        };
        let filename = format!("{}_{}.json", Local::now().format("%Y-%m-%d_%H%M%S"), suffix);
        let path = self.log_dir.join(filename);
        tracing::info!(path = %path.display(), "New session log");
        self.log_path = Some(path.clone());
        Ok(path)
    }

    /// Append a text turn. Empty content is silently skipped.
    pub fn append_text(&mut self, role: TurnRole, content: &str) -> io::Result<()> {
        if content.is_empty() {
            return Ok(());
        }
        self.append_record(TurnRecord {
            role,
            kind: TurnKind::Text,
            content: content.to_string(),
        })
    }

    /// Copy a local image into the log's images directory under its
    /// original name and append an image turn with the relative path.
    pub fn log_local_image(&mut self, role: TurnRole, source: &Path) -> io::Result<()> {
        if !source.exists() {
            tracing::warn!(path = %source.display(), "Image to log does not exist");
            return Ok(());
        }
        std::fs::create_dir_all(&self.images_dir)?;

        let name = source
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "image path has no name"))?;
        let dest = self.images_dir.join(name);
        if source != dest {
            std::fs::copy(source, &dest)?;
        }

        let rel = format!("images/{}", name.to_string_lossy());
        self.append_record(TurnRecord {
            role,
            kind: TurnKind::Image,
            content: rel,
        })
    }

    /// Append an image turn for an already-materialized relative path
    /// (e.g. a downloaded preview).
    pub fn log_image_path(&mut self, role: TurnRole, rel_path: &str) -> io::Result<()> {
        self.append_record(TurnRecord {
            role,
            kind: TurnKind::Image,
            content: rel_path.to_string(),
        })
    }

    fn append_record(&mut self, record: TurnRecord) -> io::Result<()> {
        let path = match &self.log_path {
            Some(p) => p.clone(),
            None => self.start_session()?,
        };

        let mut entries: Vec<TurnRecord> = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e),
        };
        entries.push(record);

        let body = serde_json::to_vec_pretty(&entries)?;
        std::fs::write(&path, body)
    }

    /// Fetch a remote image once into `images_dir`, returning the
    /// relative path used in the log.
    pub async fn download_generated_image(
        client: &reqwest::Client,
        url: &str,
        images_dir: &Path,
    ) -> Option<String> {
        let filename = format!("generated_{}.jpg", Local::now().format("%Y%m%d_%H%M%S"));
        let dest = images_dir.join(&filename);

        let bytes = match client.get(url).send().await {
            Ok(response) => match response.bytes().await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Preview download failed mid-body: {}", e);
                    return None;
                }
            },
            Err(e) => {
                tracing::warn!("Preview download failed: {}", e);
                return None;
            }
        };

        if let Err(e) = std::fs::create_dir_all(images_dir) {
            tracing::warn!("Cannot create images dir: {}", e);
            return None;
        }
        if let Err(e) = std::fs::write(&dest, &bytes) {
            tracing::warn!(path = %dest.display(), "Cannot store downloaded image: {}", e);
            return None;
        }
        Some(format!("images/{}", filename))
    }

    // --- project + chat memory -------------------------------------

    pub fn project(&self) -> Option<&Project> {
        self.project.as_ref()
    }

    pub fn set_project(&mut self, project: Project) {
        self.project = Some(project);
    }

    pub fn chat_messages(&self) -> &[ChatMessage] {
        &self.chat
    }

    pub fn push_chat(&mut self, message: ChatMessage) {
        self.chat.push(message);
    }

    /// Replace the chat memory with a fresh system turn. Done when a new
    /// project lands so the dialogue starts from the generated plan.
    pub fn reset_chat(&mut self, system: ChatMessage) {
        self.chat.clear();
        self.chat.push(system);
    }

    /// Drop the dialogue only; a new capture clears prior memory before
    /// generating its solution.
    pub fn clear_chat(&mut self) {
        self.chat.clear();
    }

    /// Drop in-memory conversation and project. Past log files stay on
    /// disk untouched.
    pub fn clear(&mut self) {
        self.chat.clear();
        self.project = None;
        self.log_path = None;
        tracing::info!("Conversation memory cleared");
    }
}
