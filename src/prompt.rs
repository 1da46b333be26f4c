//! Prompt composition for the completion API.

use std::fmt::Write;

use crate::context_cache::CachedMessage;

/// Prefix shared by Discord's canonical (`<@id>`) and nickname (`<@!id>`) mentions.
pub const MENTION_PREFIX: &str = "<@";

const SYSTEM_PROMPT: &str = "You are a helpful Discord bot called tanyafinwiz, and you specialize in giving answers regarding financial topics.
Your task is to provide helpful responses based on the conversation context, in the spirit of improving financial literacy and understanding.
You should:
- Provide accurate, concise answers to questions about financial topics.
- Use the context of the conversation to inform your responses.
- Avoid giving personal opinions, personalized financial advice or speculation.
- Give cautions about financial risks when appropriate.
- Say \"I don't know\" if you are unsure about something.
- Give references to financial concepts or resources when appropriate.
- Refrain from answering questions that are not related to financial topics.
You've been mentioned in a conversation and need to respond.";

/// System and user prompt pair sent to the completion endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedPrompt {
    pub system: String,
    pub user: String,
}

/// Turns a question plus recent channel context into a [`ComposedPrompt`].
#[derive(Debug, Clone)]
pub struct PromptComposer {
    command_prefix: char,
}

impl Default for PromptComposer {
    fn default() -> Self {
        Self::new('!')
    }
}

impl PromptComposer {
    #[must_use]
    pub fn new(command_prefix: char) -> Self {
        Self { command_prefix }
    }

    #[must_use]
    pub fn compose(
        &self,
        question: &str,
        context: &[CachedMessage],
        asking_user: &str,
    ) -> ComposedPrompt {
        let mut user = self.context_block(context);
        if !user.is_empty() {
            user.push('\n');
        }
        let _ = write!(user, "{asking_user} asked: {question}");

        ComposedPrompt {
            system: SYSTEM_PROMPT.to_string(),
            user,
        }
    }

    /// Renders the usable context lines, or an empty string if none survive filtering.
    #[must_use]
    pub fn context_block(&self, context: &[CachedMessage]) -> String {
        let mut lines = context
            .iter()
            .filter(|message| self.is_grounding(&message.content))
            .peekable();

        if lines.peek().is_none() {
            return String::new();
        }

        let mut block = String::from("Recent conversation:\n");
        for message in lines {
            let _ = writeln!(block, "{}: {}", message.author_name, message.content);
        }
        block
    }

    /// Commands and mention chatter are kept out of the model's context.
    fn is_grounding(&self, content: &str) -> bool {
        !content.starts_with(self.command_prefix) && !content.starts_with(MENTION_PREFIX)
    }
}
