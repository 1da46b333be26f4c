//! Bounded per-channel cache of recent messages.
//!
//! Gives the language model a few lines of conversational grounding. Each
//! channel keeps at most `limit` messages, evicting the oldest first.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use log::debug;
use poise::serenity_prelude::{ChannelId, MessageId};

use crate::types::InboundMessage;

/// Default number of messages retained per channel.
pub const DEFAULT_CACHE_LIMIT: usize = 5;

/// Upper bound on messages handed out by [`ContextCache::snapshot`].
///
/// Independent of the retention limit so raising that limit does not grow
/// prompts unchecked.
pub const SNAPSHOT_LIMIT: usize = 10;

/// One captured chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedMessage {
    pub author_name: String,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub id: MessageId,
}

impl From<&InboundMessage> for CachedMessage {
    fn from(message: &InboundMessage) -> Self {
        Self {
            author_name: message.display_name.clone(),
            content: message.content.clone(),
            timestamp: message.created_at,
            id: message.id,
        }
    }
}

/// Process-wide message cache keyed by channel.
///
/// Channel entries are never evicted, only their contents.
#[derive(Debug)]
pub struct ContextCache {
    channels: DashMap<ChannelId, VecDeque<CachedMessage>>,
    limit: usize,
}

impl Default for ContextCache {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_LIMIT)
    }
}

impl ContextCache {
    /// Creates a cache retaining `limit` messages per channel (at least one).
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            channels: DashMap::new(),
            limit: limit.max(1),
        }
    }

    /// Appends a message to the channel, dropping the oldest entries on overflow.
    pub fn record(&self, channel_id: ChannelId, message: CachedMessage) {
        let mut entries = self
            .channels
            .entry(channel_id)
            .or_insert_with(|| VecDeque::with_capacity(self.limit + 1));
        entries.push_back(message);
        while entries.len() > self.limit {
            entries.pop_front();
        }
        debug!(
            "Cached message in channel {channel_id} ({} held)",
            entries.len()
        );
    }

    /// Returns a copy of the channel's messages, oldest first, without `exclude_id`.
    ///
    /// Exclusion happens before the [`SNAPSHOT_LIMIT`] cap is applied.
    #[must_use]
    pub fn snapshot(&self, channel_id: ChannelId, exclude_id: MessageId) -> Vec<CachedMessage> {
        let Some(entries) = self.channels.get(&channel_id) else {
            return Vec::new();
        };

        let kept: Vec<&CachedMessage> = entries.iter().filter(|m| m.id != exclude_id).collect();
        let skip = kept.len().saturating_sub(SNAPSHOT_LIMIT);
        kept.into_iter().skip(skip).cloned().collect()
    }

    /// Empties the channel. Unknown channels are left untouched.
    pub fn clear(&self, channel_id: ChannelId) {
        if let Some(mut entries) = self.channels.get_mut(&channel_id) {
            entries.clear();
            debug!("Cleared context for channel {channel_id}");
        }
    }

    #[must_use]
    pub fn size(&self, channel_id: ChannelId) -> usize {
        self.channels
            .get(&channel_id)
            .map_or(0, |entries| entries.len())
    }
}
