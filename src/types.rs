//! Common types used throughout the finwiz bot.

use chrono::{DateTime, Utc};
use poise::serenity_prelude::{ChannelId, MessageId, UserId};
use serde::Serialize;

/// Role of a message in the conversation.
///
/// Maps to chat-completions API message roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message from the human user
    User,
    /// System prompt or instructions
    System,
}

/// A chat message as delivered by the platform layer.
///
/// Decoupled from serenity's `Message` so the dispatcher can be driven by
/// anything that produces these fields.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub display_name: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub mentions: Vec<UserId>,
    /// Author of the message this one replies to, when the reference resolved.
    pub reply_to_author: Option<UserId>,
}

impl InboundMessage {
    #[must_use]
    pub fn mentions_user(&self, user_id: UserId) -> bool {
        self.mentions.contains(&user_id)
    }
}
