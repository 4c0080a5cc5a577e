pub mod error;
pub mod ids;
pub mod sqlite;
pub mod types;

pub use error::{StorageError, StorageResult};
pub use ids::{FileId, MessageId, OwnerId, ProjectId, PromptId, SessionId};
pub use sqlite::{SqliteStorage, TurnTransaction};
pub use types::{
    DEFAULT_SESSION_TITLE, FileRecord, MessageRecord, MessageRole, NewFile, NewMessage,
    NewProject, NewPrompt, ProjectPatch, ProjectRecord, PromptRecord, SessionPatch, SessionRecord,
};
