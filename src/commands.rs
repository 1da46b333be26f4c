//! Text and slash commands routed by poise.

use poise::serenity_prelude::{Mentionable, UserId};

use crate::bot::Data;
use crate::error::{BotError, Result};

/// Context type for bot commands.
type Context<'a> = poise::Context<'a, Data, BotError>;

pub const CLEARED_REPLY: &str = "Context cleared for this channel!";

#[must_use]
pub fn greeting(user_id: UserId) -> String {
    format!("Hello {}!", user_id.mention())
}

#[must_use]
pub fn context_size_reply(size: usize) -> String {
    format!("I'm keeping track of {size} recent messages in this channel.")
}

/// Say hello.
#[poise::command(prefix_command, slash_command)]
pub async fn hello(ctx: Context<'_>) -> Result<()> {
    ctx.say(greeting(ctx.author().id)).await?;
    Ok(())
}

/// Clear the conversation context for this channel.
#[poise::command(prefix_command, slash_command)]
pub async fn clear_context(ctx: Context<'_>) -> Result<()> {
    ctx.data().cache().clear(ctx.channel_id());
    ctx.say(CLEARED_REPLY).await?;
    Ok(())
}

/// Show how many messages are in context.
#[poise::command(prefix_command, slash_command)]
pub async fn context_size(ctx: Context<'_>) -> Result<()> {
    let size = ctx.data().cache().size(ctx.channel_id());
    ctx.say(context_size_reply(size)).await?;
    Ok(())
}

/// Get the command table registered with the framework.
#[must_use]
pub fn bot_commands() -> Vec<poise::Command<Data, BotError>> {
    vec![hello(), clear_context(), context_size()]
}
