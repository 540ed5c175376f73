//! User identity resolution.
//!
//! Inbound messages carry a [`UserKind`] — a closed set of identity kinds
//! rather than runtime type dispatch. The [`UserDirectory`] maps each kind
//! to a canonical [`GuideUser`] record, creating one on first contact.
//! Find-or-create runs under a single lock so concurrent first-contact
//! requests from the same channel never create duplicate records.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// The identity attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UserKind {
    Discord {
        id: String,
        username: String,
        display_name: Option<String>,
    },
    Web {
        id: String,
        username: String,
        display_name: Option<String>,
    },
    /// Non-authenticated web sessions share one anonymous record.
    Anonymous,
    Other { label: String },
}

impl UserKind {
    /// Stable directory key for this identity.
    pub fn key(&self) -> String {
        match self {
            UserKind::Discord { id, .. } => format!("discord:{}", id),
            UserKind::Web { id, .. } => format!("web:{}", id),
            UserKind::Anonymous => "anonymous".to_string(),
            UserKind::Other { label } => format!("other:{}", label),
        }
    }
}

/// Canonical user record used for reference scoping and template context.
#[derive(Debug, Clone)]
pub struct GuideUser {
    pub id: String,
    pub display_name: String,
    pub username: String,
    /// Persona override; falls back to the configured default when unset.
    pub persona: Option<String>,
    /// Extra prompt text the user has configured for themselves.
    pub custom_prompt: Option<String>,
}

impl GuideUser {
    pub fn from_kind(kind: &UserKind) -> Self {
        match kind {
            UserKind::Discord {
                username,
                display_name,
                ..
            }
            | UserKind::Web {
                username,
                display_name,
                ..
            } => Self {
                id: Uuid::new_v4().to_string(),
                display_name: display_name.clone().unwrap_or_else(|| username.clone()),
                username: username.clone(),
                persona: None,
                custom_prompt: None,
            },
            UserKind::Anonymous => Self {
                id: Uuid::new_v4().to_string(),
                display_name: "Friend".to_string(),
                username: "anonymous".to_string(),
                persona: None,
                custom_prompt: None,
            },
            UserKind::Other { label } => Self {
                id: Uuid::new_v4().to_string(),
                display_name: label.clone(),
                username: label.clone(),
                persona: None,
                custom_prompt: None,
            },
        }
    }
}

/// In-memory user lookup with atomic find-or-create.
#[derive(Default)]
pub struct UserDirectory {
    users: Mutex<HashMap<String, GuideUser>>,
}

impl UserDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Map an identity to its canonical record, creating it on first
    /// contact. The whole operation holds the directory lock, so two
    /// concurrent calls for the same identity return the same record.
    pub async fn resolve(&self, kind: &UserKind) -> GuideUser {
        let mut users = self.users.lock().await;
        users
            .entry(kind.key())
            .or_insert_with(|| GuideUser::from_kind(kind))
            .clone()
    }

    pub async fn find_or_create_anonymous(&self) -> GuideUser {
        self.resolve(&UserKind::Anonymous).await
    }

    pub async fn find_by_id(&self, id: &str) -> Option<GuideUser> {
        let users = self.users.lock().await;
        users.values().find(|u| u.id == id).cloned()
    }

    pub async fn update_persona(&self, id: &str, persona: &str) -> Option<GuideUser> {
        let mut users = self.users.lock().await;
        let user = users.values_mut().find(|u| u.id == id)?;
        user.persona = Some(persona.to_string());
        Some(user.clone())
    }

    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn discord_user_created_once() {
        let directory = UserDirectory::new();
        let kind = UserKind::Discord {
            id: "42".into(),
            username: "jdoe".into(),
            display_name: Some("J. Doe".into()),
        };

        let first = directory.resolve(&kind).await;
        let second = directory.resolve(&kind).await;
        assert_eq!(first.id, second.id);
        assert_eq!(first.display_name, "J. Doe");
        assert_eq!(directory.len().await, 1);
    }

    #[tokio::test]
    async fn display_name_falls_back_to_username() {
        let directory = UserDirectory::new();
        let user = directory
            .resolve(&UserKind::Web {
                id: "w1".into(),
                username: "alice".into(),
                display_name: None,
            })
            .await;
        assert_eq!(user.display_name, "alice");
    }

    #[tokio::test]
    async fn concurrent_anonymous_first_contact_creates_one_record() {
        let directory = UserDirectory::new();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let directory = directory.clone();
            handles.push(tokio::spawn(async move {
                directory.find_or_create_anonymous().await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().id);
        }

        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(directory.len().await, 1);
    }

    #[tokio::test]
    async fn persona_override_persists() {
        let directory = UserDirectory::new();
        let user = directory.find_or_create_anonymous().await;

        let updated = directory.update_persona(&user.id, "Archivist").await.unwrap();
        assert_eq!(updated.persona.as_deref(), Some("Archivist"));

        let reread = directory.find_by_id(&user.id).await.unwrap();
        assert_eq!(reread.persona.as_deref(), Some("Archivist"));
    }
}
