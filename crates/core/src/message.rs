//! Message and Conversation domain types.
//!
//! A conversation is the model's view of one task: a system turn, then
//! alternating user turns (screen state, optionally with a screenshot) and
//! assistant turns (the model's thinking/action pair).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a conversation (one task).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConversationId(pub String);

impl ConversationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The role of a message sender in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Task instructions and output format rules
    System,
    /// Device state reported to the model
    User,
    /// The model's reply
    Assistant,
}

/// An image attached to a user turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAttachment {
    /// MIME type, e.g. `image/png`
    pub mime_type: String,

    /// Base64-encoded pixel data
    pub base64_data: String,
}

impl ImageAttachment {
    pub fn png(base64_data: impl Into<String>) -> Self {
        Self {
            mime_type: "image/png".into(),
            base64_data: base64_data.into(),
        }
    }

    /// Render as a `data:` URL suitable for OpenAI-style `image_url` parts.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.base64_data)
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who sent this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// At most one screenshot, only on user turns that have not yet been sent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<ImageAttachment>,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            image: None,
            timestamp: Utc::now(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Create a new text-only user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a user message carrying a screenshot.
    pub fn user_with_image(content: impl Into<String>, image: ImageAttachment) -> Self {
        let mut msg = Self::with_role(Role::User, content);
        msg.image = Some(image);
        msg
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn has_image(&self) -> bool {
        self.image.is_some()
    }
}

/// An ordered sequence of messages for a single task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Unique conversation ID
    pub id: ConversationId,

    /// Ordered messages
    pub messages: Vec<Message>,

    /// When this conversation was created
    pub created_at: DateTime<Utc>,

    /// When the last message was added
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a new empty conversation.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: ConversationId::new(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Add a message to the conversation.
    ///
    /// Images are single-use: any image still attached to an earlier turn is
    /// dropped so that only the newest turn can carry one.
    pub fn push(&mut self, message: Message) {
        if message.has_image() {
            for earlier in &mut self.messages {
                earlier.image = None;
            }
        }
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    /// Drop the image from the most recent message, if any.
    ///
    /// Returns `true` when an image was removed.
    pub fn strip_latest_image(&mut self) -> bool {
        match self.messages.last_mut() {
            Some(last) => last.image.take().is_some(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Number of messages that still carry an image.
    pub fn image_count(&self) -> usize {
        self.messages.iter().filter(|m| m.has_image()).count()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}
