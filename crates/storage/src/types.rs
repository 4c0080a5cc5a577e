use super::ids::{FileId, MessageId, OwnerId, ProjectId, PromptId, SessionId};

/// Placeholder title a session is created with; the orchestrator rewrites it
/// exactly once, on the first completed turn.
pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Storage-local message role. Only conversation turns are persisted; system
/// entries exist solely in the outbound context window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRecord {
    pub id: ProjectId,
    pub owner_id: OwnerId,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub created_at_unix_ms: u64,
    pub updated_at_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProject {
    pub owner_id: OwnerId,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub system_prompt: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptRecord {
    pub id: PromptId,
    pub project_id: ProjectId,
    pub title: String,
    pub content: String,
    pub created_at_unix_ms: u64,
    pub updated_at_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPrompt {
    pub title: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: SessionId,
    pub project_id: ProjectId,
    pub title: String,
    pub created_at_unix_ms: u64,
    pub updated_at_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SessionPatch {
    pub title: Option<String>,
    pub updated_at_unix_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub id: MessageId,
    pub session_id: SessionId,
    pub seq: u64,
    pub role: MessageRole,
    pub content: String,
    pub created_at_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: FileId,
    pub project_id: ProjectId,
    pub stored_filename: String,
    pub original_filename: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub external_ref: Option<String>,
    pub created_at_unix_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub stored_filename: String,
    pub original_filename: String,
    pub size_bytes: u64,
    pub content_type: String,
    pub external_ref: Option<String>,
}
