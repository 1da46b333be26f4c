use thiserror::Error;

/// Reply sent when the completion endpoint could not produce an answer.
pub const COMPLETION_FALLBACK: &str =
    "Sorry, I'm having trouble processing that right now. Please try again later!";

/// Reply sent when anything else goes wrong while answering a mention.
pub const HANDLING_FALLBACK: &str = "Sorry, I encountered an error processing your request!";

#[derive(Error, Debug)]
pub enum BotError {
    #[error("Serenity error: {0}")]
    Serenity(Box<poise::serenity_prelude::Error>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Completion API error ({status}): {message}")]
    CompletionApi {
        status: reqwest::StatusCode,
        message: String,
    },

    #[error("Completion response error: {0}")]
    CompletionResponse(String),

    #[error("HTTP request error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl From<poise::serenity_prelude::Error> for BotError {
    fn from(err: poise::serenity_prelude::Error) -> Self {
        BotError::Serenity(Box::new(err))
    }
}

pub type Result<T> = std::result::Result<T, BotError>;

