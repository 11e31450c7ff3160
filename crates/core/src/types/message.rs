//! Dialogue payloads and chat messages

use serde::{Deserialize, Serialize};

/// Speaker role of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    #[default]
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Map raw role spellings from client payloads onto the canonical roles.
    /// Unknown spellings default to `User`.
    pub fn normalize(raw: &str) -> Role {
        match raw.trim().to_lowercase().as_str() {
            "user" | "human" | "用户" => Role::User,
            "assistant" | "ai" | "bot" => Role::Assistant,
            "system" => Role::System,
            _ => Role::User,
        }
    }
}

/// One message of an incoming dialogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueMessage {
    pub role: String,
    pub msg: String,
}

/// Write-path input: a dialogue tied to an end user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialoguePayload {
    /// Caller-supplied stable reference; re-ingesting the same `ref_id`
    /// upserts rather than duplicates
    pub ref_id: String,
    pub messages: Vec<DialogueMessage>,
}

/// A chat message sent to a language model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_normalization() {
        assert_eq!(Role::normalize("user"), Role::User);
        assert_eq!(Role::normalize("Human"), Role::User);
        assert_eq!(Role::normalize("用户"), Role::User);
        assert_eq!(Role::normalize("AI"), Role::Assistant);
        assert_eq!(Role::normalize("bot"), Role::Assistant);
        assert_eq!(Role::normalize("narrator"), Role::User);
    }
}
