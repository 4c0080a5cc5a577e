use plinth_llm::{ChatMessage, Role};
use plinth_storage::{MessageRecord, MessageRole};

/// Fixed sentence introducing the file-context system entry.
pub const FILE_CONTEXT_PREAMBLE: &str = "The following files are available for this project:";

/// Builds the ordered context window for one turn: optional file-context
/// system entry, then history ascending, then the new user entry.
///
/// The project's own system prompt is deliberately absent here; the
/// generation client prepends it ahead of everything, giving the fixed
/// precedence system_prompt → file context → history → new message.
pub fn assemble(
    file_context: &str,
    history: &[MessageRecord],
    new_user_text: &str,
) -> Vec<ChatMessage> {
    let mut window = Vec::with_capacity(history.len() + 2);

    if !file_context.is_empty() {
        window.push(ChatMessage::system(format!(
            "{FILE_CONTEXT_PREAMBLE}\n{file_context}"
        )));
    }

    for message in history {
        window.push(ChatMessage::new(
            map_role(message.role),
            message.content.clone(),
        ));
    }

    window.push(ChatMessage::user(new_user_text));
    window
}

fn map_role(role: MessageRole) -> Role {
    match role {
        MessageRole::User => Role::User,
        MessageRole::Assistant => Role::Assistant,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plinth_storage::{MessageId, SessionId};

    fn record(role: MessageRole, content: &str, created_at: u64) -> MessageRecord {
        MessageRecord {
            id: MessageId::new_v7(),
            session_id: SessionId::new_v7(),
            seq: created_at,
            role,
            content: content.to_string(),
            created_at_unix_ms: created_at,
        }
    }

    #[test]
    fn ordering_is_file_context_then_history_then_new_message() {
        let history = vec![
            record(MessageRole::User, "a", 1),
            record(MessageRole::Assistant, "b", 2),
        ];

        let window = assemble("F1 content", &history, "c");

        assert_eq!(
            window,
            vec![
                ChatMessage::system(format!("{FILE_CONTEXT_PREAMBLE}\nF1 content")),
                ChatMessage::user("a"),
                ChatMessage::assistant("b"),
                ChatMessage::user("c"),
            ]
        );
    }

    #[test]
    fn empty_file_context_adds_no_system_entry() {
        let window = assemble("", &[], "hello");
        assert_eq!(window, vec![ChatMessage::user("hello")]);
    }
}
