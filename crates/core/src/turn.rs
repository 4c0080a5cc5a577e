use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use plinth_storage::{
    DEFAULT_SESSION_TITLE, MessageRecord, MessageRole, NewMessage, OwnerId, SessionId,
    SessionPatch, SessionRecord,
};

use super::context;
use super::error::{CoreResult, EmptyMessageSnafu, NotFoundSnafu, map_generation, map_storage};
use super::extract::project_file_context;
use super::service::ChatService;

pub const TITLE_TOKEN_LIMIT: usize = 5;

/// One async mutex per live session, so two turns against the same session
/// queue instead of interleaving. Handles are never evicted; a session entry
/// is a single Arc and sessions are not unbounded per process.
#[derive(Default)]
pub struct SessionLocks {
    inner: StdMutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    fn handle(&self, session_id: SessionId) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        map.entry(session_id).or_default().clone()
    }
}

/// Everything a completed turn produced, as committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub user_message: MessageRecord,
    pub assistant_message: MessageRecord,
    pub session: SessionRecord,
}

/// Derives a session title from the first message: its first five whitespace
/// tokens, with a trailing ellipsis only when the message had more.
pub fn auto_title(user_text: &str) -> String {
    let tokens: Vec<&str> = user_text.split_whitespace().collect();
    let mut title = tokens
        .iter()
        .take(TITLE_TOKEN_LIMIT)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if tokens.len() > TITLE_TOKEN_LIMIT {
        title.push_str("...");
    }
    title
}

impl ChatService {
    /// Runs one chat turn: persist the user message, generate a reply with the
    /// project's system prompt and file context, persist the reply, and touch
    /// the session. All writes share one transaction; if generation fails the
    /// session is left exactly as it was.
    pub async fn submit_turn(
        &self,
        owner: OwnerId,
        session_id: SessionId,
        user_text: &str,
    ) -> CoreResult<TurnOutcome> {
        let trimmed = user_text.trim();
        if trimmed.is_empty() {
            return EmptyMessageSnafu {
                stage: "turn-validate-text",
            }
            .fail();
        }

        // Turns against the same session run strictly one after another.
        let turn_lock = self.turn_locks.handle(session_id);
        let _guard = turn_lock.lock().await;

        let mut turn = self
            .storage
            .begin_turn(session_id)
            .await
            .map_err(map_storage("turn-begin"))?;

        if turn.project().owner_id != owner {
            return NotFoundSnafu {
                stage: "turn-authorize",
                entity: "session",
                id: session_id.to_string(),
            }
            .fail();
        }

        // History is captured before the new message lands, so the context
        // window carries predecessors only.
        let history = turn
            .list_messages()
            .await
            .map_err(map_storage("turn-load-history"))?;
        let first_turn = history.is_empty();

        let user_message = turn
            .append_message(NewMessage {
                role: MessageRole::User,
                content: trimmed.to_string(),
            })
            .await
            .map_err(map_storage("turn-persist-user"))?;

        let files = turn
            .list_files()
            .await
            .map_err(map_storage("turn-load-files"))?;
        let file_context =
            project_file_context(&files, &self.upload_dir, self.parser.as_ref()).await;
        let window = context::assemble(&file_context, &history, trimmed);

        let system_prompt = turn.project().system_prompt.clone();
        let completion = match self.generation.generate(&window, Some(&system_prompt)).await {
            Ok(completion) => completion,
            Err(failure) => {
                tracing::warn!(
                    session_id = %session_id,
                    error = %failure,
                    "generation failed, discarding the pending user message"
                );
                if let Err(rollback_failure) = turn.rollback().await {
                    tracing::error!(
                        session_id = %session_id,
                        error = %rollback_failure,
                        "turn rollback failed"
                    );
                }
                return Err(map_generation("turn-generate")(failure));
            }
        };

        let assistant_message = turn
            .append_message(NewMessage {
                role: MessageRole::Assistant,
                content: completion,
            })
            .await
            .map_err(map_storage("turn-persist-assistant"))?;

        // Recency must move even when the clock has not.
        let touched_at = assistant_message
            .created_at_unix_ms
            .max(turn.session().updated_at_unix_ms.saturating_add(1));
        let title = (first_turn && turn.session().title == DEFAULT_SESSION_TITLE)
            .then(|| auto_title(trimmed));
        turn.update_session(SessionPatch {
            title,
            updated_at_unix_ms: Some(touched_at),
        })
        .await
        .map_err(map_storage("turn-touch-session"))?;

        let session = turn.session().clone();
        turn.commit().await.map_err(map_storage("turn-commit"))?;

        tracing::info!(
            session_id = %session.id,
            user_message_id = %user_message.id,
            assistant_message_id = %assistant_message.id,
            "turn committed"
        );

        Ok(TurnOutcome {
            user_message,
            assistant_message,
            session,
        })
    }
}
