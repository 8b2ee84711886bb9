//! Collaborator Interfaces (C8): thin capability contracts to chat-log, memory, and session
//! stores that the core consumes but never reads the implementation of. `NoopCollaborators` is
//! the default wiring when no backing store is configured.

use async_trait::async_trait;

#[async_trait]
pub trait Collaborators: Send + Sync {
    async fn persist_chat_log(&self, user_id: &str, model: &str, prompt: &str, reply: &str, interaction_id: &str);

    async fn get_memory(&self, user_id: &str) -> String;

    /// Opaque from the core's perspective: the core only calls it, never reads the implementation.
    async fn update_memory(&self, user_id: &str, prompt: &str);

    async fn append_to_session(&self, session_id: &str, user_id: &str, message: &str, model: &str);
}

#[derive(Default)]
pub struct NoopCollaborators;

#[async_trait]
impl Collaborators for NoopCollaborators {
    async fn persist_chat_log(&self, _user_id: &str, _model: &str, _prompt: &str, _reply: &str, _interaction_id: &str) {}

    async fn get_memory(&self, _user_id: &str) -> String {
        String::new()
    }

    async fn update_memory(&self, _user_id: &str, _prompt: &str) {}

    async fn append_to_session(&self, _session_id: &str, _user_id: &str, _message: &str, _model: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_collaborators_get_memory_is_always_empty() {
        let collaborators = NoopCollaborators::default();
        assert_eq!(collaborators.get_memory("anyone").await, "");
    }
}
