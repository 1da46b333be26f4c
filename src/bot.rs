//! Discord bot core logic and event handling.

use std::sync::Arc;

use async_trait::async_trait;
use log::{debug, error, info};
use poise::{
    Framework, FrameworkOptions, PrefixFrameworkOptions, builtins,
    serenity_prelude::{
        ChannelId, Client, ClientBuilder, Context, CreateMessage, Framework as SerenityFramework,
        FullEvent, GatewayIntents, Http, Message as SerenityMessage, MessageId, UserId,
    },
};

use crate::commands::bot_commands;
use crate::config::Config;
use crate::context_cache::ContextCache;
use crate::dispatcher::{ChatEvents, ChatPlatform, Dispatcher, TypingIndicator};
use crate::error::{BotError, Result};
use crate::openai::{CompletionBackend, OpenAiClient};
use crate::prompt::PromptComposer;
use crate::types::InboundMessage;

/// Shared state handed to every command and event.
pub struct Data {
    cache: Arc<ContextCache>,
    dispatcher: Arc<Dispatcher>,
}

impl Data {
    #[must_use]
    pub fn cache(&self) -> &ContextCache {
        &self.cache
    }
}

/// Run the Discord bot.
pub async fn run() -> Result<()> {
    info!("Initializing bot");
    let config = Config::from_env()?;

    debug!("Initializing completion client");
    let completion: Arc<dyn CompletionBackend> = Arc::new(
        OpenAiClient::new(config.openai_api_key.clone(), config.openai_model.clone())?
            .with_api_url(config.openai_api_url.clone()),
    );

    debug!("Fetching bot user");
    let bot_user = Http::new(&config.discord_token).get_current_user().await?;
    info!("Running as {} ({})", bot_user.name, bot_user.id);

    let cache = Arc::new(ContextCache::new(config.cache_limit));
    let dispatcher = Arc::new(Dispatcher::new(
        bot_user.id,
        Arc::clone(&cache),
        PromptComposer::new(config.command_prefix),
        completion,
    ));

    debug!("Setting up gateway intents");
    let intents = GatewayIntents::non_privileged()
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS;

    debug!("Building framework");
    let data = Data {
        cache,
        dispatcher: Arc::clone(&dispatcher),
    };
    let commands = Framework::builder()
        .options(FrameworkOptions {
            commands: bot_commands(),
            prefix_options: PrefixFrameworkOptions {
                prefix: Some(config.command_prefix.to_string()),
                // Mentions are questions for the model, not command invocations
                mention_as_prefix: false,
                ..Default::default()
            },
            event_handler: |ctx, event, _framework, data| Box::pin(event_handler(ctx, event, data)),
            ..Default::default()
        })
        .setup(move |ctx, _ready, framework| {
            Box::pin(async move {
                info!("Bot is ready and connected to Discord");
                debug!("Registering commands globally");
                builtins::register_globally(ctx, &framework.options().commands).await?;
                info!("Commands registered successfully");
                Ok(data)
            })
        })
        .build();

    debug!("Creating Discord client");
    let mut client = ClientBuilder::new(&config.discord_token, intents)
        .framework(CacheFirst {
            dispatcher,
            commands,
        })
        .await?;

    info!("Starting Discord client");

    tokio::select! {
        result = client.start() => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, shutting down...");
        }
    }

    Ok(())
}

/// Hands every message to the dispatcher before the command framework sees it,
/// so commands observe a cache that already holds their own invocation.
struct CacheFirst {
    dispatcher: Arc<Dispatcher>,
    commands: Framework<Data, BotError>,
}

#[async_trait]
impl SerenityFramework for CacheFirst {
    async fn init(&mut self, client: &Client) {
        self.commands.init(client).await;
    }

    async fn dispatch(&self, ctx: Context, event: FullEvent) {
        if let FullEvent::Message { new_message } = &event {
            let platform = SerenityPlatform {
                http: Arc::clone(&ctx.http),
            };
            match self
                .dispatcher
                .on_message(&platform, &to_inbound(new_message))
                .await
            {
                Ok(outcome) => debug!("Message {} handled: {:?}", new_message.id, outcome),
                Err(e) => error!("Failed to handle message {}: {}", new_message.id, e),
            }
        }
        self.commands.dispatch(ctx, event).await;
    }
}

/// [`ChatPlatform`] backed by serenity's HTTP client.
struct SerenityPlatform {
    http: Arc<Http>,
}

#[async_trait]
impl ChatPlatform for SerenityPlatform {
    async fn reply(&self, channel_id: ChannelId, message_id: MessageId, text: &str) -> Result<()> {
        let message = CreateMessage::new()
            .content(text)
            .reference_message((channel_id, message_id));
        channel_id.send_message(&self.http, message).await?;
        Ok(())
    }

    fn start_typing(&self, channel_id: ChannelId) -> TypingIndicator {
        TypingIndicator::new(channel_id.start_typing(&self.http))
    }

    async fn send_direct_message(&self, user_id: UserId, text: &str) -> Result<()> {
        user_id
            .direct_message(&self.http, CreateMessage::new().content(text))
            .await?;
        Ok(())
    }
}

/// Server nickname, then global display name, then username.
fn display_name(nick: Option<&str>, global_name: Option<&str>, username: &str) -> String {
    nick.or(global_name).unwrap_or(username).to_string()
}

/// Flattens a serenity message into the fields the dispatcher works with.
fn to_inbound(message: &SerenityMessage) -> InboundMessage {
    let author = &message.author;
    let nick = message
        .member
        .as_ref()
        .and_then(|member| member.nick.as_deref());

    InboundMessage {
        id: message.id,
        channel_id: message.channel_id,
        author_id: author.id,
        display_name: display_name(nick, author.global_name.as_deref(), &author.name),
        content: message.content.clone(),
        created_at: *message.timestamp,
        mentions: message.mentions.iter().map(|user| user.id).collect(),
        reply_to_author: message
            .referenced_message
            .as_ref()
            .map(|parent| parent.author.id),
    }
}

async fn event_handler(ctx: &Context, event: &FullEvent, data: &Data) -> Result<()> {
    match event {
        FullEvent::Ready { data_about_bot } => {
            data.dispatcher.on_ready(&data_about_bot.user.name).await;
        }
        FullEvent::GuildMemberAddition { new_member } => {
            let platform = SerenityPlatform {
                http: Arc::clone(&ctx.http),
            };
            data.dispatcher
                .on_member_join(&platform, new_member.user.id)
                .await?;
        }
        _ => {}
    }
    Ok(())
}
