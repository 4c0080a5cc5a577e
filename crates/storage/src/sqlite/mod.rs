use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

use snafu::{OptionExt, ResultExt};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};

use super::error::{
    CreateSqliteDirectorySnafu, InvariantViolationSnafu, NotFoundSnafu, SqliteConnectOptionsSnafu,
    SqliteConnectSnafu, SqliteMigrateSnafu, SqlitePragmaSnafu, SqliteQuerySnafu, StorageResult,
};
use super::ids::{FileId, MessageId, OwnerId, ProjectId, PromptId, SessionId};
use super::types::{
    FileRecord, MessageRecord, MessageRole, NewFile, NewMessage, NewProject, NewPrompt,
    ProjectPatch, ProjectRecord, PromptRecord, SessionPatch, SessionRecord,
};

/// SQLite-backed store for the project/session/message/file trees.
///
/// A single-connection pool keeps writes serialized; every multi-statement
/// write runs inside an explicit transaction.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    pub async fn open(database_location: &str) -> StorageResult<Self> {
        ensure_database_directory(database_location)?;

        let database_url = normalize_database_url(database_location);
        let connect_options = SqliteConnectOptions::from_str(&database_url)
            .context(SqliteConnectOptionsSnafu {
                stage: "sqlite-open-parse-url",
                database_url: database_url.clone(),
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_millis(5_000));

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(connect_options)
            .await
            .context(SqliteConnectSnafu {
                stage: "sqlite-open-connect",
                database_url: database_url.clone(),
            })?;

        // Explicit PRAGMA writes make bootstrap behavior deterministic.
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-foreign-keys",
                pragma: "foreign_keys",
            })?;
        sqlx::query("PRAGMA busy_timeout = 5000;")
            .execute(&pool)
            .await
            .context(SqlitePragmaSnafu {
                stage: "sqlite-open-pragma-busy-timeout",
                pragma: "busy_timeout",
            })?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context(SqliteMigrateSnafu {
                stage: "sqlite-open-migrate",
            })?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- projects ---

    pub async fn create_project(&self, input: NewProject) -> StorageResult<ProjectRecord> {
        let project_id = ProjectId::new_v7();
        let now = unix_timestamp_ms();

        sqlx::query(
            "INSERT INTO projects (id, owner_id, name, description, system_prompt, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(project_id.to_string())
        .bind(input.owner_id.to_string())
        .bind(input.name.clone())
        .bind(input.description.clone())
        .bind(input.system_prompt.clone())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "project-create-insert",
        })?;

        Ok(ProjectRecord {
            id: project_id,
            owner_id: input.owner_id,
            name: input.name,
            description: input.description,
            system_prompt: input.system_prompt,
            created_at_unix_ms: i64_to_u64(now, "project-create-created-at")?,
            updated_at_unix_ms: i64_to_u64(now, "project-create-updated-at")?,
        })
    }

    pub async fn get_project(
        &self,
        project_id: ProjectId,
    ) -> StorageResult<Option<ProjectRecord>> {
        let row = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, owner_id, name, description, system_prompt, created_at, updated_at FROM projects WHERE id = ?",
        )
        .bind(project_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "project-get-query",
        })?;

        row.map(project_row_to_record).transpose()
    }

    pub async fn list_projects(&self, owner_id: OwnerId) -> StorageResult<Vec<ProjectRecord>> {
        let rows = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, owner_id, name, description, system_prompt, created_at, updated_at FROM projects WHERE owner_id = ? ORDER BY updated_at DESC, id DESC",
        )
        .bind(owner_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "project-list-query",
        })?;

        rows.into_iter().map(project_row_to_record).collect()
    }

    pub async fn update_project(
        &self,
        project_id: ProjectId,
        patch: ProjectPatch,
    ) -> StorageResult<ProjectRecord> {
        let now = unix_timestamp_ms();
        let update_result = sqlx::query(
            "UPDATE projects SET name = COALESCE(?, name), description = COALESCE(?, description), system_prompt = COALESCE(?, system_prompt), updated_at = ? WHERE id = ?",
        )
        .bind(patch.name)
        .bind(patch.description)
        .bind(patch.system_prompt)
        .bind(now)
        .bind(project_id.to_string())
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "project-update-apply",
        })?;

        if update_result.rows_affected() == 0 {
            return NotFoundSnafu {
                stage: "project-update-missing",
                entity: "project",
                id: project_id.to_string(),
            }
            .fail();
        }

        self.get_project(project_id)
            .await?
            .context(NotFoundSnafu {
                stage: "project-update-load-missing",
                entity: "project",
                id: project_id.to_string(),
            })
    }

    /// Deletes the project row; child rows fall with it through the schema's
    /// ON DELETE CASCADE edges. Backing file bytes are the caller's problem.
    pub async fn delete_project(&self, project_id: ProjectId) -> StorageResult<()> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(project_id.to_string())
            .execute(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "project-delete-apply",
            })?;

        if result.rows_affected() == 0 {
            return NotFoundSnafu {
                stage: "project-delete-missing",
                entity: "project",
                id: project_id.to_string(),
            }
            .fail();
        }

        Ok(())
    }

    // --- prompts ---

    pub async fn create_prompt(
        &self,
        project_id: ProjectId,
        input: NewPrompt,
    ) -> StorageResult<PromptRecord> {
        self.ensure_project_exists(project_id, "prompt-create-project-missing")
            .await?;

        let prompt_id = PromptId::new_v7();
        let now = unix_timestamp_ms();

        sqlx::query(
            "INSERT INTO prompts (id, project_id, title, content, created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(prompt_id.to_string())
        .bind(project_id.to_string())
        .bind(input.title.clone())
        .bind(input.content.clone())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "prompt-create-insert",
        })?;

        Ok(PromptRecord {
            id: prompt_id,
            project_id,
            title: input.title,
            content: input.content,
            created_at_unix_ms: i64_to_u64(now, "prompt-create-created-at")?,
            updated_at_unix_ms: i64_to_u64(now, "prompt-create-updated-at")?,
        })
    }

    pub async fn list_prompts(&self, project_id: ProjectId) -> StorageResult<Vec<PromptRecord>> {
        self.ensure_project_exists(project_id, "prompt-list-project-missing")
            .await?;

        let rows = sqlx::query_as::<_, PromptRow>(
            "SELECT id, project_id, title, content, created_at, updated_at FROM prompts WHERE project_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "prompt-list-query",
        })?;

        rows.into_iter().map(prompt_row_to_record).collect()
    }

    // --- chat sessions ---

    pub async fn create_session(
        &self,
        project_id: ProjectId,
        title: String,
    ) -> StorageResult<SessionRecord> {
        self.ensure_project_exists(project_id, "session-create-project-missing")
            .await?;

        let session_id = SessionId::new_v7();
        let now = unix_timestamp_ms();

        sqlx::query(
            "INSERT INTO chat_sessions (id, project_id, title, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(session_id.to_string())
        .bind(project_id.to_string())
        .bind(title.clone())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "session-create-insert",
        })?;

        Ok(SessionRecord {
            id: session_id,
            project_id,
            title,
            created_at_unix_ms: i64_to_u64(now, "session-create-created-at")?,
            updated_at_unix_ms: i64_to_u64(now, "session-create-updated-at")?,
        })
    }

    pub async fn get_session(
        &self,
        session_id: SessionId,
    ) -> StorageResult<Option<SessionRecord>> {
        let row = sqlx::query_as::<_, SessionRow>(
            "SELECT id, project_id, title, created_at, updated_at FROM chat_sessions WHERE id = ?",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "session-get-query",
        })?;

        row.map(session_row_to_record).transpose()
    }

    /// Recency list for the project page: most recently updated first.
    pub async fn list_sessions(&self, project_id: ProjectId) -> StorageResult<Vec<SessionRecord>> {
        self.ensure_project_exists(project_id, "session-list-project-missing")
            .await?;

        let rows = sqlx::query_as::<_, SessionRow>(
            "SELECT id, project_id, title, created_at, updated_at FROM chat_sessions WHERE project_id = ? ORDER BY updated_at DESC, id DESC",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "session-list-query",
        })?;

        rows.into_iter().map(session_row_to_record).collect()
    }

    // --- chat messages ---

    pub async fn list_messages(&self, session_id: SessionId) -> StorageResult<Vec<MessageRecord>> {
        self.ensure_session_exists(session_id, "message-list-session-missing")
            .await?;

        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, session_id, seq, role, content, created_at FROM chat_messages WHERE session_id = ? ORDER BY created_at ASC, seq ASC",
        )
        .bind(session_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "message-list-query",
        })?;

        rows.into_iter().map(message_row_to_record).collect()
    }

    // --- uploaded files ---

    pub async fn register_file(
        &self,
        project_id: ProjectId,
        input: NewFile,
    ) -> StorageResult<FileRecord> {
        self.ensure_project_exists(project_id, "file-register-project-missing")
            .await?;

        let file_id = FileId::new_v7();
        let now = unix_timestamp_ms();

        sqlx::query(
            "INSERT INTO uploaded_files (id, project_id, stored_filename, original_filename, size_bytes, content_type, external_ref, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(file_id.to_string())
        .bind(project_id.to_string())
        .bind(input.stored_filename.clone())
        .bind(input.original_filename.clone())
        .bind(u64_to_i64(input.size_bytes, "file-register-size-bytes")?)
        .bind(input.content_type.clone())
        .bind(input.external_ref.clone())
        .bind(now)
        .execute(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "file-register-insert",
        })?;

        Ok(FileRecord {
            id: file_id,
            project_id,
            stored_filename: input.stored_filename,
            original_filename: input.original_filename,
            size_bytes: input.size_bytes,
            content_type: input.content_type,
            external_ref: input.external_ref,
            created_at_unix_ms: i64_to_u64(now, "file-register-created-at")?,
        })
    }

    /// Upload-order listing; the extractor depends on this ordering.
    pub async fn list_files(&self, project_id: ProjectId) -> StorageResult<Vec<FileRecord>> {
        self.ensure_project_exists(project_id, "file-list-project-missing")
            .await?;

        let rows = sqlx::query_as::<_, FileRow>(
            "SELECT id, project_id, stored_filename, original_filename, size_bytes, content_type, external_ref, created_at FROM uploaded_files WHERE project_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(project_id.to_string())
        .fetch_all(&self.pool)
        .await
        .context(SqliteQuerySnafu {
            stage: "file-list-query",
        })?;

        rows.into_iter().map(file_row_to_record).collect()
    }

    // --- turn transaction ---

    /// Opens the single transaction that scopes one chat turn. The session and
    /// its project are resolved up front so the orchestrator fails fast on
    /// dead references before any write happens.
    pub async fn begin_turn(&self, session_id: SessionId) -> StorageResult<TurnTransaction> {
        let mut tx = self.pool.begin().await.context(SqliteQuerySnafu {
            stage: "turn-begin",
        })?;

        let session_row = sqlx::query_as::<_, SessionRow>(
            "SELECT id, project_id, title, created_at, updated_at FROM chat_sessions WHERE id = ?",
        )
        .bind(session_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .context(SqliteQuerySnafu {
            stage: "turn-begin-load-session",
        })?
        .context(NotFoundSnafu {
            stage: "turn-begin-session-missing",
            entity: "session",
            id: session_id.to_string(),
        })?;
        let session = session_row_to_record(session_row)?;

        let project_row = sqlx::query_as::<_, ProjectRow>(
            "SELECT id, owner_id, name, description, system_prompt, created_at, updated_at FROM projects WHERE id = ?",
        )
        .bind(session.project_id.to_string())
        .fetch_optional(&mut *tx)
        .await
        .context(SqliteQuerySnafu {
            stage: "turn-begin-load-project",
        })?
        .context(InvariantViolationSnafu {
            stage: "turn-begin-project-missing",
            details: format!("session '{}' references a dead project", session.id),
        })?;
        let project = project_row_to_record(project_row)?;

        Ok(TurnTransaction {
            tx,
            session,
            project,
        })
    }

    async fn ensure_project_exists(
        &self,
        project_id: ProjectId,
        stage: &'static str,
    ) -> StorageResult<()> {
        let existing = sqlx::query_scalar::<_, i64>("SELECT 1 FROM projects WHERE id = ? LIMIT 1")
            .bind(project_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context(SqliteQuerySnafu {
                stage: "project-exists-query",
            })?;

        if existing.is_none() {
            return NotFoundSnafu {
                stage,
                entity: "project",
                id: project_id.to_string(),
            }
            .fail();
        }

        Ok(())
    }

    async fn ensure_session_exists(
        &self,
        session_id: SessionId,
        stage: &'static str,
    ) -> StorageResult<()> {
        let existing =
            sqlx::query_scalar::<_, i64>("SELECT 1 FROM chat_sessions WHERE id = ? LIMIT 1")
                .bind(session_id.to_string())
                .fetch_optional(&self.pool)
                .await
                .context(SqliteQuerySnafu {
                    stage: "session-exists-query",
                })?;

        if existing.is_none() {
            return NotFoundSnafu {
                stage,
                entity: "session",
                id: session_id.to_string(),
            }
            .fail();
        }

        Ok(())
    }
}

/// All writes of one chat turn, scoped to one SQLite transaction. Dropping the
/// value without calling [`TurnTransaction::commit`] rolls everything back,
/// which is what keeps failed turns invisible.
pub struct TurnTransaction {
    tx: sqlx::Transaction<'static, sqlx::Sqlite>,
    session: SessionRecord,
    project: ProjectRecord,
}

impl TurnTransaction {
    pub fn session(&self) -> &SessionRecord {
        &self.session
    }

    pub fn project(&self) -> &ProjectRecord {
        &self.project
    }

    pub async fn list_messages(&mut self) -> StorageResult<Vec<MessageRecord>> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, session_id, seq, role, content, created_at FROM chat_messages WHERE session_id = ? ORDER BY created_at ASC, seq ASC",
        )
        .bind(self.session.id.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .context(SqliteQuerySnafu {
            stage: "turn-message-list-query",
        })?;

        rows.into_iter().map(message_row_to_record).collect()
    }

    pub async fn list_files(&mut self) -> StorageResult<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRow>(
            "SELECT id, project_id, stored_filename, original_filename, size_bytes, content_type, external_ref, created_at FROM uploaded_files WHERE project_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(self.project.id.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .context(SqliteQuerySnafu {
            stage: "turn-file-list-query",
        })?;

        rows.into_iter().map(file_row_to_record).collect()
    }

    pub async fn append_message(&mut self, input: NewMessage) -> StorageResult<MessageRecord> {
        let (last_seq, last_created_at) = sqlx::query_as::<_, (i64, i64)>(
            "SELECT COALESCE(MAX(seq), 0), COALESCE(MAX(created_at), 0) FROM chat_messages WHERE session_id = ?",
        )
        .bind(self.session.id.to_string())
        .fetch_one(&mut *self.tx)
        .await
        .context(SqliteQuerySnafu {
            stage: "turn-message-append-next-seq",
        })?;

        // created_at is the session's sole ordering key, so clamp it to stay
        // strictly increasing even when two appends land in the same tick.
        let created_at = unix_timestamp_ms().max(last_created_at.saturating_add(1));
        let next_seq = last_seq.saturating_add(1);
        let message_id = MessageId::new_v7();

        sqlx::query(
            "INSERT INTO chat_messages (id, session_id, seq, role, content, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(message_id.to_string())
        .bind(self.session.id.to_string())
        .bind(next_seq)
        .bind(role_to_sql(input.role))
        .bind(input.content.clone())
        .bind(created_at)
        .execute(&mut *self.tx)
        .await
        .context(SqliteQuerySnafu {
            stage: "turn-message-append-insert",
        })?;

        Ok(MessageRecord {
            id: message_id,
            session_id: self.session.id,
            seq: i64_to_u64(next_seq, "turn-message-append-seq")?,
            role: input.role,
            content: input.content,
            created_at_unix_ms: i64_to_u64(created_at, "turn-message-append-created-at")?,
        })
    }

    pub async fn update_session(&mut self, patch: SessionPatch) -> StorageResult<()> {
        let updated_at = patch
            .updated_at_unix_ms
            .map(|value| u64_to_i64(value, "turn-session-update-updated-at"))
            .transpose()?;

        let update_result = sqlx::query(
            "UPDATE chat_sessions SET title = COALESCE(?, title), updated_at = COALESCE(?, updated_at) WHERE id = ?",
        )
        .bind(patch.title.clone())
        .bind(updated_at)
        .bind(self.session.id.to_string())
        .execute(&mut *self.tx)
        .await
        .context(SqliteQuerySnafu {
            stage: "turn-session-update-apply",
        })?;

        if update_result.rows_affected() == 0 {
            return NotFoundSnafu {
                stage: "turn-session-update-missing",
                entity: "session",
                id: self.session.id.to_string(),
            }
            .fail();
        }

        if let Some(title) = patch.title {
            self.session.title = title;
        }
        if let Some(updated_at_unix_ms) = patch.updated_at_unix_ms {
            self.session.updated_at_unix_ms = updated_at_unix_ms;
        }

        Ok(())
    }

    pub async fn commit(self) -> StorageResult<()> {
        self.tx.commit().await.context(SqliteQuerySnafu {
            stage: "turn-commit",
        })
    }

    /// Explicit rollback for readability at call sites; dropping has the same
    /// effect.
    pub async fn rollback(self) -> StorageResult<()> {
        self.tx.rollback().await.context(SqliteQuerySnafu {
            stage: "turn-rollback",
        })
    }
}

#[derive(Debug, FromRow)]
struct ProjectRow {
    id: String,
    owner_id: String,
    name: String,
    description: String,
    system_prompt: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, FromRow)]
struct PromptRow {
    id: String,
    project_id: String,
    title: String,
    content: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, FromRow)]
struct SessionRow {
    id: String,
    project_id: String,
    title: String,
    created_at: i64,
    updated_at: i64,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: String,
    session_id: String,
    seq: i64,
    role: String,
    content: String,
    created_at: i64,
}

#[derive(Debug, FromRow)]
struct FileRow {
    id: String,
    project_id: String,
    stored_filename: String,
    original_filename: String,
    size_bytes: i64,
    content_type: String,
    external_ref: Option<String>,
    created_at: i64,
}

fn project_row_to_record(row: ProjectRow) -> StorageResult<ProjectRecord> {
    Ok(ProjectRecord {
        id: ProjectId::parse(&row.id)?,
        owner_id: OwnerId::parse(&row.owner_id)?,
        name: row.name,
        description: row.description,
        system_prompt: row.system_prompt,
        created_at_unix_ms: i64_to_u64(row.created_at, "project-row-created-at")?,
        updated_at_unix_ms: i64_to_u64(row.updated_at, "project-row-updated-at")?,
    })
}

fn prompt_row_to_record(row: PromptRow) -> StorageResult<PromptRecord> {
    Ok(PromptRecord {
        id: PromptId::parse(&row.id)?,
        project_id: ProjectId::parse(&row.project_id)?,
        title: row.title,
        content: row.content,
        created_at_unix_ms: i64_to_u64(row.created_at, "prompt-row-created-at")?,
        updated_at_unix_ms: i64_to_u64(row.updated_at, "prompt-row-updated-at")?,
    })
}

fn session_row_to_record(row: SessionRow) -> StorageResult<SessionRecord> {
    Ok(SessionRecord {
        id: SessionId::parse(&row.id)?,
        project_id: ProjectId::parse(&row.project_id)?,
        title: row.title,
        created_at_unix_ms: i64_to_u64(row.created_at, "session-row-created-at")?,
        updated_at_unix_ms: i64_to_u64(row.updated_at, "session-row-updated-at")?,
    })
}

fn message_row_to_record(row: MessageRow) -> StorageResult<MessageRecord> {
    Ok(MessageRecord {
        id: MessageId::parse(&row.id)?,
        session_id: SessionId::parse(&row.session_id)?,
        seq: i64_to_u64(row.seq, "message-row-seq")?,
        role: role_from_sql(&row.role)?,
        content: row.content,
        created_at_unix_ms: i64_to_u64(row.created_at, "message-row-created-at")?,
    })
}

fn file_row_to_record(row: FileRow) -> StorageResult<FileRecord> {
    Ok(FileRecord {
        id: FileId::parse(&row.id)?,
        project_id: ProjectId::parse(&row.project_id)?,
        stored_filename: row.stored_filename,
        original_filename: row.original_filename,
        size_bytes: i64_to_u64(row.size_bytes, "file-row-size-bytes")?,
        content_type: row.content_type,
        external_ref: row.external_ref,
        created_at_unix_ms: i64_to_u64(row.created_at, "file-row-created-at")?,
    })
}

fn role_to_sql(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

fn role_from_sql(raw: &str) -> StorageResult<MessageRole> {
    match raw {
        "user" => Ok(MessageRole::User),
        "assistant" => Ok(MessageRole::Assistant),
        _ => InvariantViolationSnafu {
            stage: "message-role-from-sql",
            details: format!("unknown message role '{raw}'"),
        }
        .fail(),
    }
}

fn unix_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0_i64, |duration| duration.as_millis() as i64)
}

fn i64_to_u64(value: i64, stage: &'static str) -> StorageResult<u64> {
    value
        .try_into()
        .map_err(|_| super::error::StorageError::InvariantViolation {
            stage,
            details: format!("negative sqlite integer '{value}' cannot map to u64"),
        })
}

fn u64_to_i64(value: u64, stage: &'static str) -> StorageResult<i64> {
    value
        .try_into()
        .map_err(|_| super::error::StorageError::InvariantViolation {
            stage,
            details: format!("u64 '{value}' cannot map to sqlite i64"),
        })
}

fn ensure_database_directory(database_location: &str) -> StorageResult<()> {
    if database_location.starts_with("sqlite:") || database_location == ":memory:" {
        return Ok(());
    }

    let path = Path::new(database_location);
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context(CreateSqliteDirectorySnafu {
            stage: "sqlite-open-create-directory",
            path: parent.display().to_string(),
        })?;
    }

    Ok(())
}

fn normalize_database_url(database_location: &str) -> String {
    if database_location.starts_with("sqlite:") {
        return database_location.to_string();
    }

    if database_location == ":memory:" {
        return "sqlite::memory:".to_string();
    }

    format!("sqlite://{database_location}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DEFAULT_SESSION_TITLE, NewFile, NewMessage, NewProject, NewPrompt};

    async fn open_memory_store() -> SqliteStorage {
        SqliteStorage::open(":memory:").await.unwrap()
    }

    async fn seed_project(store: &SqliteStorage) -> ProjectRecord {
        store
            .create_project(NewProject {
                owner_id: OwnerId::new_v7(),
                name: "support agent".to_string(),
                description: "answers support tickets".to_string(),
                system_prompt: "Be terse.".to_string(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn project_roundtrip_and_owner_listing() {
        let store = open_memory_store().await;
        let project = seed_project(&store).await;

        let loaded = store.get_project(project.id).await.unwrap().unwrap();
        assert_eq!(loaded, project);

        let listed = store.list_projects(project.owner_id).await.unwrap();
        assert_eq!(listed.len(), 1);

        let other_owner = store.list_projects(OwnerId::new_v7()).await.unwrap();
        assert!(other_owner.is_empty());
    }

    #[tokio::test]
    async fn project_patch_updates_only_given_fields() {
        let store = open_memory_store().await;
        let project = seed_project(&store).await;

        let updated = store
            .update_project(
                project.id,
                ProjectPatch {
                    description: Some("handles billing questions".to_string()),
                    ..ProjectPatch::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, project.name);
        assert_eq!(updated.system_prompt, project.system_prompt);
        assert_eq!(updated.description, "handles billing questions");
    }

    #[tokio::test]
    async fn update_missing_project_reports_not_found() {
        let store = open_memory_store().await;
        let result = store
            .update_project(ProjectId::new_v7(), ProjectPatch::default())
            .await;
        assert!(matches!(
            result,
            Err(crate::StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn turn_appends_keep_created_at_strictly_increasing() {
        let store = open_memory_store().await;
        let project = seed_project(&store).await;
        let session = store
            .create_session(project.id, DEFAULT_SESSION_TITLE.to_string())
            .await
            .unwrap();

        let mut turn = store.begin_turn(session.id).await.unwrap();
        let first = turn
            .append_message(NewMessage {
                role: MessageRole::User,
                content: "a".to_string(),
            })
            .await
            .unwrap();
        let second = turn
            .append_message(NewMessage {
                role: MessageRole::Assistant,
                content: "b".to_string(),
            })
            .await
            .unwrap();
        turn.commit().await.unwrap();

        assert!(first.created_at_unix_ms < second.created_at_unix_ms);
        assert_eq!(second.seq, first.seq + 1);

        let listed = store.list_messages(session.id).await.unwrap();
        assert_eq!(listed, vec![first, second]);
    }

    #[tokio::test]
    async fn dropped_turn_leaves_no_rows_behind() {
        let store = open_memory_store().await;
        let project = seed_project(&store).await;
        let session = store
            .create_session(project.id, DEFAULT_SESSION_TITLE.to_string())
            .await
            .unwrap();

        {
            let mut turn = store.begin_turn(session.id).await.unwrap();
            turn.append_message(NewMessage {
                role: MessageRole::User,
                content: "never committed".to_string(),
            })
            .await
            .unwrap();
            turn.rollback().await.unwrap();
        }

        let listed = store.list_messages(session.id).await.unwrap();
        assert!(listed.is_empty());
    }

    #[tokio::test]
    async fn begin_turn_on_missing_session_reports_not_found() {
        let store = open_memory_store().await;
        let result = store.begin_turn(SessionId::new_v7()).await;
        assert!(matches!(
            result,
            Err(crate::StorageError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn session_title_and_recency_updates_apply_in_turn() {
        let store = open_memory_store().await;
        let project = seed_project(&store).await;
        let session = store
            .create_session(project.id, DEFAULT_SESSION_TITLE.to_string())
            .await
            .unwrap();

        let mut turn = store.begin_turn(session.id).await.unwrap();
        turn.update_session(SessionPatch {
            title: Some("tell me about".to_string()),
            updated_at_unix_ms: Some(session.updated_at_unix_ms + 10),
        })
        .await
        .unwrap();
        turn.commit().await.unwrap();

        let reloaded = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(reloaded.title, "tell me about");
        assert_eq!(reloaded.updated_at_unix_ms, session.updated_at_unix_ms + 10);
    }

    #[tokio::test]
    async fn cascade_delete_removes_the_whole_project_tree() {
        let store = open_memory_store().await;
        let project = seed_project(&store).await;
        let session = store
            .create_session(project.id, DEFAULT_SESSION_TITLE.to_string())
            .await
            .unwrap();

        store
            .create_prompt(
                project.id,
                NewPrompt {
                    title: "greeting".to_string(),
                    content: "say hello".to_string(),
                },
            )
            .await
            .unwrap();
        store
            .register_file(
                project.id,
                NewFile {
                    stored_filename: "abc_manual.txt".to_string(),
                    original_filename: "manual.txt".to_string(),
                    size_bytes: 14,
                    content_type: "text/plain".to_string(),
                    external_ref: None,
                },
            )
            .await
            .unwrap();

        let mut turn = store.begin_turn(session.id).await.unwrap();
        turn.append_message(NewMessage {
            role: MessageRole::User,
            content: "hi".to_string(),
        })
        .await
        .unwrap();
        turn.append_message(NewMessage {
            role: MessageRole::Assistant,
            content: "hello".to_string(),
        })
        .await
        .unwrap();
        turn.commit().await.unwrap();

        store.delete_project(project.id).await.unwrap();

        for table in ["chat_sessions", "chat_messages", "prompts", "uploaded_files"] {
            let remaining =
                sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {table}"))
                    .fetch_one(store.pool())
                    .await
                    .unwrap();
            assert_eq!(remaining, 0, "orphaned rows left in {table}");
        }
    }

    #[tokio::test]
    async fn file_listing_preserves_upload_order() {
        let store = open_memory_store().await;
        let project = seed_project(&store).await;

        for name in ["first.txt", "second.pdf", "third.png"] {
            // Millisecond timestamps are the primary order key; keep the
            // registrations on distinct ticks.
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
            store
                .register_file(
                    project.id,
                    NewFile {
                        stored_filename: format!("{}_{name}", FileId::new_v7()),
                        original_filename: name.to_string(),
                        size_bytes: 1,
                        content_type: "application/octet-stream".to_string(),
                        external_ref: None,
                    },
                )
                .await
                .unwrap();
        }

        let listed = store.list_files(project.id).await.unwrap();
        let names: Vec<_> = listed
            .iter()
            .map(|file| file.original_filename.as_str())
            .collect();
        assert_eq!(names, vec!["first.txt", "second.pdf", "third.png"]);
    }
}
