//! Decides whether an inbound message is owed a reply and produces it.
//!
//! Every message goes through the [`ContextCache`] first. Messages that
//! address the bot (a mention, or a reply to one of the bot's own messages)
//! are answered by composing a prompt from the cached channel context and
//! sending it to the completion backend. Completion failures never escape:
//! the user gets a fixed fallback reply instead.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use poise::serenity_prelude::{ChannelId, MessageId, UserId};

use crate::context_cache::{CachedMessage, ContextCache};
use crate::error::{COMPLETION_FALLBACK, HANDLING_FALLBACK, Result};
use crate::openai::CompletionBackend;
use crate::prompt::PromptComposer;
use crate::types::InboundMessage;

/// Outbound operations the dispatcher needs from the chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Replies to `message_id`, pinging its author.
    async fn reply(&self, channel_id: ChannelId, message_id: MessageId, text: &str) -> Result<()>;

    /// Shows the "typing" indicator in the channel until the returned value is dropped.
    fn start_typing(&self, channel_id: ChannelId) -> TypingIndicator;

    async fn send_direct_message(&self, user_id: UserId, text: &str) -> Result<()>;
}

/// Keeps a channel's typing indicator alive while held.
pub struct TypingIndicator {
    _active: Box<dyn Send>,
}

impl TypingIndicator {
    #[must_use]
    pub fn new<T: Send + 'static>(active: T) -> Self {
        Self {
            _active: Box::new(active),
        }
    }
}

/// Platform events the bot reacts to, one method per event kind.
#[async_trait]
pub trait ChatEvents: Send + Sync {
    async fn on_ready(&self, bot_name: &str);

    async fn on_message(
        &self,
        platform: &dyn ChatPlatform,
        message: &InboundMessage,
    ) -> Result<Outcome>;

    async fn on_member_join(&self, platform: &dyn ChatPlatform, user_id: UserId) -> Result<()>;
}

/// How an inbound message was dealt with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Authored by the bot itself; neither cached nor answered.
    OwnMessage,
    /// Cached, but nobody asked the bot anything.
    NotAddressed,
    /// Answered with generated text.
    Replied,
    /// The completion call failed and the fallback text was sent.
    RepliedWithFallback,
    /// Sending the answer failed and the generic error text was sent instead.
    RepliedWithError,
}

pub struct Dispatcher {
    bot_user_id: UserId,
    cache: Arc<ContextCache>,
    composer: PromptComposer,
    completion: Arc<dyn CompletionBackend>,
}

impl Dispatcher {
    pub fn new(
        bot_user_id: UserId,
        cache: Arc<ContextCache>,
        composer: PromptComposer,
        completion: Arc<dyn CompletionBackend>,
    ) -> Self {
        Self {
            bot_user_id,
            cache,
            composer,
            completion,
        }
    }

    /// True when the message mentions the bot or replies to one of its messages.
    #[must_use]
    pub fn is_addressed(&self, message: &InboundMessage) -> bool {
        message.mentions_user(self.bot_user_id)
            || message.reply_to_author == Some(self.bot_user_id)
    }

    /// Removes the bot's mention tokens, in both encodings, from the question.
    #[must_use]
    pub fn clean_question(&self, content: &str) -> String {
        let canonical = format!("<@{}>", self.bot_user_id);
        let nickname = format!("<@!{}>", self.bot_user_id);
        content
            .replace(&canonical, "")
            .replace(&nickname, "")
            .trim()
            .to_string()
    }

    /// Asks the completion backend for an answer, falling back to a fixed text on failure.
    pub async fn generate_reply(
        &self,
        question: &str,
        context: &[CachedMessage],
        asking_user: &str,
    ) -> String {
        self.answer(question, context, asking_user).await.0
    }

    async fn answer(
        &self,
        question: &str,
        context: &[CachedMessage],
        asking_user: &str,
    ) -> (String, Outcome) {
        let prompt = self.composer.compose(question, context, asking_user);
        match self.completion.complete(&prompt).await {
            Ok(text) => (text, Outcome::Replied),
            Err(e) => {
                error!("Completion request for {asking_user} failed: {e}");
                (COMPLETION_FALLBACK.to_string(), Outcome::RepliedWithFallback)
            }
        }
    }

    /// Caches the message and answers it if it addresses the bot.
    pub async fn handle_inbound(
        &self,
        platform: &dyn ChatPlatform,
        message: &InboundMessage,
    ) -> Result<Outcome> {
        if message.author_id == self.bot_user_id {
            return Ok(Outcome::OwnMessage);
        }

        self.cache
            .record(message.channel_id, CachedMessage::from(message));

        if !self.is_addressed(message) {
            return Ok(Outcome::NotAddressed);
        }

        info!(
            "Received question from {} in channel {}: {}",
            message.display_name, message.channel_id, message.content
        );

        let typing = platform.start_typing(message.channel_id);

        let context = self.cache.snapshot(message.channel_id, message.id);
        let question = self.clean_question(&message.content);
        debug!("Answering with {} context messages", context.len());

        let (text, outcome) = self
            .answer(&question, &context, &message.display_name)
            .await;
        drop(typing);

        match platform
            .reply(message.channel_id, message.id, &text)
            .await
        {
            Ok(()) => {
                info!(
                    "Replied to {} in channel {}: {}",
                    message.display_name, message.channel_id, text
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(
                    "Error replying to {} in channel {}: {}",
                    message.display_name, message.channel_id, e
                );
                platform
                    .reply(message.channel_id, message.id, HANDLING_FALLBACK)
                    .await?;
                Ok(Outcome::RepliedWithError)
            }
        }
    }
}

#[async_trait]
impl ChatEvents for Dispatcher {
    async fn on_ready(&self, bot_name: &str) {
        info!("Ready when you are! {bot_name} ({})", self.bot_user_id);
    }

    async fn on_message(
        &self,
        platform: &dyn ChatPlatform,
        message: &InboundMessage,
    ) -> Result<Outcome> {
        self.handle_inbound(platform, message).await
    }

    async fn on_member_join(&self, platform: &dyn ChatPlatform, user_id: UserId) -> Result<()> {
        let welcome = format!("Welcome aboard, <@{user_id}>!");
        if let Err(e) = platform.send_direct_message(user_id, &welcome).await {
            warn!("Could not send welcome message to {user_id}: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use chrono::Utc;
    use reqwest::StatusCode;

    use super::*;
    use crate::error::BotError;
    use crate::prompt::ComposedPrompt;

    const BOT: UserId = UserId::new(1000);
    const ALICE: UserId = UserId::new(2000);
    const CHANNEL: ChannelId = ChannelId::new(10);

    #[derive(Default)]
    struct FakePlatform {
        replies: Mutex<Vec<(MessageId, String)>>,
        direct_messages: Mutex<Vec<(UserId, String)>>,
        typing_started: AtomicUsize,
        typing_active: Arc<AtomicUsize>,
        typing_at_reply: Mutex<Vec<usize>>,
        failing_replies: Mutex<usize>,
    }

    /// Counts as an active indicator until dropped.
    struct ActiveTyping(Arc<AtomicUsize>);

    impl Drop for ActiveTyping {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl FakePlatform {
        fn failing_first_replies(count: usize) -> Self {
            let platform = Self::default();
            *platform.failing_replies.lock().unwrap() = count;
            platform
        }

        fn replies(&self) -> Vec<(MessageId, String)> {
            self.replies.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatPlatform for FakePlatform {
        async fn reply(
            &self,
            _channel_id: ChannelId,
            message_id: MessageId,
            text: &str,
        ) -> Result<()> {
            self.typing_at_reply
                .lock()
                .unwrap()
                .push(self.typing_active.load(Ordering::SeqCst));
            {
                let mut failing = self.failing_replies.lock().unwrap();
                if *failing > 0 {
                    *failing -= 1;
                    return Err(BotError::Config("reply rejected".to_string()));
                }
            }
            self.replies
                .lock()
                .unwrap()
                .push((message_id, text.to_string()));
            Ok(())
        }

        fn start_typing(&self, _channel_id: ChannelId) -> TypingIndicator {
            self.typing_started.fetch_add(1, Ordering::SeqCst);
            self.typing_active.fetch_add(1, Ordering::SeqCst);
            TypingIndicator::new(ActiveTyping(Arc::clone(&self.typing_active)))
        }

        async fn send_direct_message(&self, user_id: UserId, text: &str) -> Result<()> {
            self.direct_messages
                .lock()
                .unwrap()
                .push((user_id, text.to_string()));
            Ok(())
        }
    }

    struct FakeCompletion {
        answer: Option<String>,
        prompts: Mutex<Vec<ComposedPrompt>>,
    }

    impl FakeCompletion {
        fn answering(text: &str) -> Arc<Self> {
            Arc::new(Self {
                answer: Some(text.to_string()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                answer: None,
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<ComposedPrompt> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CompletionBackend for FakeCompletion {
        async fn complete(&self, prompt: &ComposedPrompt) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.clone());
            self.answer.clone().ok_or(BotError::CompletionApi {
                status: StatusCode::SERVICE_UNAVAILABLE,
                message: "upstream unavailable".to_string(),
            })
        }
    }

    /// Backend that takes a while and notes whether typing was shown meanwhile.
    struct SlowCompletion {
        typing_active: Arc<AtomicUsize>,
        typing_seen: AtomicUsize,
    }

    #[async_trait]
    impl CompletionBackend for SlowCompletion {
        async fn complete(&self, _prompt: &ComposedPrompt) -> Result<String> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.typing_seen
                .store(self.typing_active.load(Ordering::SeqCst), Ordering::SeqCst);
            Ok("done".to_string())
        }
    }

    fn dispatcher(completion: Arc<FakeCompletion>) -> (Dispatcher, Arc<ContextCache>) {
        let cache = Arc::new(ContextCache::new(5));
        let dispatcher = Dispatcher::new(
            BOT,
            Arc::clone(&cache),
            PromptComposer::default(),
            completion,
        );
        (dispatcher, cache)
    }

    fn inbound(id: u64, author: UserId, content: &str) -> InboundMessage {
        InboundMessage {
            id: MessageId::new(id),
            channel_id: CHANNEL,
            author_id: author,
            display_name: "alice".to_string(),
            content: content.to_string(),
            created_at: Utc::now(),
            mentions: Vec::new(),
            reply_to_author: None,
        }
    }

    fn mentioning_bot(id: u64, content: &str) -> InboundMessage {
        InboundMessage {
            mentions: vec![BOT],
            ..inbound(id, ALICE, content)
        }
    }

    #[tokio::test]
    async fn unaddressed_message_is_cached_only() {
        let completion = FakeCompletion::answering("unused");
        let (dispatcher, cache) = dispatcher(Arc::clone(&completion));
        let platform = FakePlatform::default();

        let outcome = dispatcher
            .handle_inbound(&platform, &inbound(1, ALICE, "stocks are up"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::NotAddressed);
        assert_eq!(cache.size(CHANNEL), 1);
        assert!(platform.replies().is_empty());
        assert!(completion.prompts().is_empty());
    }

    #[tokio::test]
    async fn own_messages_are_ignored() {
        let completion = FakeCompletion::answering("unused");
        let (dispatcher, cache) = dispatcher(Arc::clone(&completion));
        let platform = FakePlatform::default();
        let own = InboundMessage {
            mentions: vec![BOT],
            ..inbound(1, BOT, "<@1000> talking to myself")
        };

        let outcome = dispatcher.handle_inbound(&platform, &own).await.unwrap();

        assert_eq!(outcome, Outcome::OwnMessage);
        assert_eq!(cache.size(CHANNEL), 0);
        assert!(platform.replies().is_empty());
        assert!(completion.prompts().is_empty());
    }

    #[tokio::test]
    async fn mention_is_answered_with_cleaned_question() {
        let completion = FakeCompletion::answering("A bond is a loan to an issuer.");
        let (dispatcher, _cache) = dispatcher(Arc::clone(&completion));
        let platform = FakePlatform::default();

        let outcome = dispatcher
            .handle_inbound(&platform, &mentioning_bot(5, "<@1000> what is a bond?"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Replied);
        assert_eq!(
            platform.replies(),
            vec![(
                MessageId::new(5),
                "A bond is a loan to an issuer.".to_string()
            )]
        );
        assert_eq!(platform.typing_started.load(Ordering::SeqCst), 1);

        let prompts = completion.prompts();
        assert_eq!(prompts.len(), 1);
        assert_eq!(prompts[0].user, "alice asked: what is a bond?");
    }

    #[tokio::test]
    async fn reply_to_bot_counts_as_addressed() {
        let completion = FakeCompletion::answering("yes");
        let (dispatcher, _cache) = dispatcher(completion);
        let platform = FakePlatform::default();
        let reply = InboundMessage {
            reply_to_author: Some(BOT),
            ..inbound(3, ALICE, "and what about stocks?")
        };

        let outcome = dispatcher.handle_inbound(&platform, &reply).await.unwrap();

        assert_eq!(outcome, Outcome::Replied);
        assert_eq!(platform.replies().len(), 1);
    }

    #[tokio::test]
    async fn reply_to_someone_else_is_not_addressed() {
        let completion = FakeCompletion::answering("unused");
        let (dispatcher, _cache) = dispatcher(completion);
        let platform = FakePlatform::default();
        let reply = InboundMessage {
            reply_to_author: Some(UserId::new(3000)),
            ..inbound(3, ALICE, "agreed")
        };

        let outcome = dispatcher.handle_inbound(&platform, &reply).await.unwrap();
        assert_eq!(outcome, Outcome::NotAddressed);
    }

    #[tokio::test]
    async fn context_excludes_the_triggering_message() {
        let completion = FakeCompletion::answering("ok");
        let (dispatcher, _cache) = dispatcher(Arc::clone(&completion));
        let platform = FakePlatform::default();

        for (id, text) in [(1, "rates went up"), (2, "!context_size"), (3, "mortgages too")] {
            dispatcher
                .handle_inbound(&platform, &inbound(id, ALICE, text))
                .await
                .unwrap();
        }
        dispatcher
            .handle_inbound(&platform, &mentioning_bot(4, "<@!1000> why?"))
            .await
            .unwrap();

        let prompts = completion.prompts();
        assert_eq!(
            prompts[0].user,
            "Recent conversation:\nalice: rates went up\nalice: mortgages too\n\nalice asked: why?"
        );
    }

    #[tokio::test]
    async fn completion_failure_sends_fallback() {
        let (dispatcher, _cache) = dispatcher(FakeCompletion::failing());
        let platform = FakePlatform::default();

        let outcome = dispatcher
            .handle_inbound(&platform, &mentioning_bot(9, "<@1000> what is an ETF?"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::RepliedWithFallback);
        assert_eq!(
            platform.replies(),
            vec![(MessageId::new(9), COMPLETION_FALLBACK.to_string())]
        );
    }

    #[tokio::test]
    async fn generate_reply_never_propagates_errors() {
        let (dispatcher, _cache) = dispatcher(FakeCompletion::failing());
        let reply = dispatcher.generate_reply("what is a bond?", &[], "alice").await;
        assert_eq!(reply, COMPLETION_FALLBACK);
    }

    #[tokio::test]
    async fn failed_reply_falls_back_to_error_text() {
        let (dispatcher, _cache) = dispatcher(FakeCompletion::answering("answer"));
        let platform = FakePlatform::failing_first_replies(1);

        let outcome = dispatcher
            .handle_inbound(&platform, &mentioning_bot(2, "<@1000> hi"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::RepliedWithError);
        assert_eq!(
            platform.replies(),
            vec![(MessageId::new(2), HANDLING_FALLBACK.to_string())]
        );
    }

    #[tokio::test]
    async fn failed_fallback_reply_is_returned_as_error() {
        let (dispatcher, _cache) = dispatcher(FakeCompletion::answering("answer"));
        let platform = FakePlatform::failing_first_replies(2);

        let result = dispatcher
            .handle_inbound(&platform, &mentioning_bot(2, "<@1000> hi"))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn member_join_sends_welcome() {
        let (dispatcher, _cache) = dispatcher(FakeCompletion::answering("unused"));
        let platform = FakePlatform::default();

        dispatcher.on_member_join(&platform, ALICE).await.unwrap();

        assert_eq!(
            *platform.direct_messages.lock().unwrap(),
            vec![(ALICE, "Welcome aboard, <@2000>!".to_string())]
        );
    }

    #[tokio::test]
    async fn typing_lasts_for_the_whole_completion_call() {
        let platform = FakePlatform::default();
        let completion = Arc::new(SlowCompletion {
            typing_active: Arc::clone(&platform.typing_active),
            typing_seen: AtomicUsize::new(0),
        });
        let dispatcher = Dispatcher::new(
            BOT,
            Arc::new(ContextCache::new(5)),
            PromptComposer::default(),
            Arc::clone(&completion) as Arc<dyn CompletionBackend>,
        );

        let outcome = dispatcher
            .handle_inbound(&platform, &mentioning_bot(6, "<@1000> what is a dividend?"))
            .await
            .unwrap();

        assert_eq!(outcome, Outcome::Replied);
        assert_eq!(completion.typing_seen.load(Ordering::SeqCst), 1);
        assert_eq!(*platform.typing_at_reply.lock().unwrap(), vec![0]);
        assert_eq!(platform.typing_active.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn command_message_is_cached_before_commands_run() {
        let (dispatcher, cache) = dispatcher(FakeCompletion::answering("unused"));
        let platform = FakePlatform::default();

        dispatcher
            .handle_inbound(&platform, &inbound(1, ALICE, "!context_size"))
            .await
            .unwrap();
        assert_eq!(cache.size(CHANNEL), 1);

        dispatcher
            .handle_inbound(&platform, &inbound(2, ALICE, "!clear_context"))
            .await
            .unwrap();
        cache.clear(CHANNEL);
        assert_eq!(cache.size(CHANNEL), 0);
    }

    #[test]
    fn clean_question_strips_both_mention_forms() {
        let (dispatcher, _cache) = dispatcher(FakeCompletion::answering("unused"));
        assert_eq!(
            dispatcher.clean_question("<@1000> what <@!1000> is a bond? <@2000>"),
            "what  is a bond? <@2000>"
        );
    }
}
