//! Conversational turns.
//!
//! A [`ChatSession`] owns one conversation: each inbound message resolves
//! the user, assembles a retrieval-augmented system prompt (persona,
//! available references, retrieved chunks, recent history), and calls the
//! completion service. Losing the user's identity degrades to the default
//! persona; a completion failure degrades to an apology — neither ever
//! fails the turn.

use std::sync::Arc;
use tracing::{error, info, warn};

use crate::identity::{GuideUser, UserDirectory, UserKind};
use crate::llm::CompletionService;
use crate::references::ReferenceCatalog;
use crate::session::RetrievalSession;

const APOLOGY: &str =
    "I'm sorry — something went wrong while answering that. Please try again.";

/// How many prior exchanges to carry into the prompt.
const HISTORY_WINDOW: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

pub struct ChatSession {
    default_persona: String,
    persona_prompt: Option<String>,
    directory: Arc<UserDirectory>,
    retrieval: Arc<RetrievalSession>,
    catalog: Arc<ReferenceCatalog>,
    completion: Arc<dyn CompletionService>,
    conversation: Vec<Message>,
}

impl ChatSession {
    pub fn new(
        default_persona: String,
        persona_prompt: Option<String>,
        directory: Arc<UserDirectory>,
        retrieval: Arc<RetrievalSession>,
        catalog: Arc<ReferenceCatalog>,
        completion: Arc<dyn CompletionService>,
    ) -> Self {
        Self {
            default_persona,
            persona_prompt,
            directory,
            retrieval,
            catalog,
            completion,
            conversation: Vec::new(),
        }
    }

    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    /// Respond to one user message, appending both sides to the
    /// conversation and returning the assistant message.
    pub async fn respond(&mut self, user: Option<UserKind>, text: &str) -> Message {
        let guide_user = match user {
            Some(kind) => self.directory.resolve(&kind).await,
            None => {
                warn!("no resolvable user on inbound message, using anonymous identity");
                self.directory.find_or_create_anonymous().await
            }
        };
        info!(user = %guide_user.username, "responding to message");

        self.conversation.push(Message {
            role: Role::User,
            content: text.to_string(),
        });

        let context = self.system_context(&guide_user, text).await;

        let content = match self.completion.complete(text, &context).await {
            Ok(answer) => answer,
            Err(e) => {
                error!(error = %e, "completion failed, degrading to apology");
                APOLOGY.to_string()
            }
        };

        let message = Message {
            role: Role::Assistant,
            content,
        };
        self.conversation.push(message.clone());
        message
    }

    async fn system_context(&self, user: &GuideUser, question: &str) -> String {
        let persona = user
            .persona
            .as_deref()
            .unwrap_or(&self.default_persona);

        let mut context = format!(
            "You are {persona}, a documentation assistant. Answer from the \
             reference material below; say so when it does not cover the question.\n"
        );

        if let Some(prompt) = &self.persona_prompt {
            context.push_str(prompt);
            context.push('\n');
        }

        // Anonymous users keep the generic greeting.
        if user.username != "anonymous" {
            context.push_str(&format!("You are talking to {}.\n", user.display_name));
        }
        if let Some(custom) = &user.custom_prompt {
            context.push_str(custom);
            context.push('\n');
        }

        let references = self.catalog.references_for_user(Some(user));
        if !references.is_empty() {
            context.push_str("\nAvailable references:\n");
            for reference in references {
                context.push_str(&format!(
                    "- {}: {}\n",
                    reference.name(),
                    reference.description()
                ));
            }
        }

        match self.retrieval.retrieve(question).await {
            Ok(matches) if !matches.is_empty() => {
                context.push_str("\nRetrieved material:\n");
                for m in matches {
                    context.push_str(&format!("[{}] {}\n\n", m.document_title, m.text));
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "retrieval failed, continuing without context");
            }
        }

        let window_start = self.conversation.len().saturating_sub(HISTORY_WINDOW);
        let history = &self.conversation[window_start..];
        if history.len() > 1 {
            context.push_str("\nConversation so far:\n");
            for message in history {
                let who = match message.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                };
                context.push_str(&format!("{}: {}\n", who, message.content));
            }
        }

        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::session::RagOptions;
    use crate::store::ChunkingStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records the context it was handed and echoes a fixed answer.
    struct RecordingCompletion {
        contexts: Mutex<Vec<String>>,
    }

    impl RecordingCompletion {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                contexts: Mutex::new(Vec::new()),
            })
        }

        fn last_context(&self) -> String {
            self.contexts.lock().unwrap().last().cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl CompletionService for RecordingCompletion {
        async fn complete(&self, _prompt: &str, context: &str) -> Result<String> {
            self.contexts.lock().unwrap().push(context.to_string());
            Ok("Here is your answer.".to_string())
        }
    }

    struct FailingCompletion;

    #[async_trait]
    impl CompletionService for FailingCompletion {
        async fn complete(&self, _prompt: &str, _context: &str) -> Result<String> {
            anyhow::bail!("model unavailable")
        }
    }

    async fn session_with(completion: Arc<dyn CompletionService>) -> (TempDir, ChatSession) {
        let tmp = TempDir::new().unwrap();
        let store = ChunkingStore::open(&tmp.path().join("docent.sqlite"), 2800)
            .await
            .unwrap();
        store.provision().await.unwrap();

        let toml = format!(
            r#"
[persona]
default = "Sage"

[store]
path = "{}/docent.sqlite"

[server]
bind = "127.0.0.1:0"
"#,
            tmp.path().display()
        );
        let config: Config = toml::from_str(&toml).unwrap();
        let (catalog, _) = ReferenceCatalog::assemble(&config, &store);

        let chat = ChatSession::new(
            "Sage".to_string(),
            None,
            UserDirectory::new(),
            Arc::new(RetrievalSession::new(store, RagOptions::default())),
            Arc::new(catalog),
            completion,
        );
        (tmp, chat)
    }

    #[tokio::test]
    async fn missing_identity_degrades_to_default_persona() {
        let completion = RecordingCompletion::new();
        let (_tmp, mut chat) = session_with(completion.clone()).await;

        let reply = chat.respond(None, "hello there").await;
        assert_eq!(reply.content, "Here is your answer.");
        assert!(completion.last_context().contains("You are Sage"));
    }

    #[tokio::test]
    async fn completion_failure_yields_apology_not_error() {
        let (_tmp, mut chat) = session_with(Arc::new(FailingCompletion)).await;

        let reply = chat.respond(Some(UserKind::Anonymous), "hello").await;
        assert_eq!(reply.content, APOLOGY);
        // Both sides of the turn are still on the conversation.
        assert_eq!(chat.conversation().len(), 2);
    }

    #[tokio::test]
    async fn known_user_is_named_in_context() {
        let completion = RecordingCompletion::new();
        let (_tmp, mut chat) = session_with(completion.clone()).await;

        chat.respond(
            Some(UserKind::Web {
                id: "w1".into(),
                username: "alice".into(),
                display_name: Some("Alice".into()),
            }),
            "hi",
        )
        .await;
        assert!(completion.last_context().contains("talking to Alice"));
    }

    #[tokio::test]
    async fn history_carries_across_turns() {
        let completion = RecordingCompletion::new();
        let (_tmp, mut chat) = session_with(completion.clone()).await;

        chat.respond(Some(UserKind::Anonymous), "first question").await;
        chat.respond(Some(UserKind::Anonymous), "second question").await;

        let context = completion.last_context();
        assert!(context.contains("first question"));
        assert_eq!(chat.conversation().len(), 4);
    }
}
