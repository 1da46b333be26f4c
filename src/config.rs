use std::env;

use log::{debug, error, info};

use crate::context_cache::DEFAULT_CACHE_LIMIT;
use crate::error::{BotError, Result};
use crate::openai::DEFAULT_API_URL;

const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_COMMAND_PREFIX: char = '!';

#[derive(Debug, Clone)]
pub struct Config {
    pub discord_token: String,
    pub openai_api_key: String,
    pub openai_model: String,
    pub openai_api_url: String,
    pub command_prefix: char,
    pub cache_limit: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        debug!("Loading configuration from environment");
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated the same as missing ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let discord_token = required(&get, "DISCORD_TOKEN")?;
        let openai_api_key = required(&get, "OPENAI_API_KEY")?;

        let openai_model =
            get("OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
        let openai_api_url =
            get("OPENAI_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let command_prefix = match get("COMMAND_PREFIX") {
            None => DEFAULT_COMMAND_PREFIX,
            Some(raw) => parse_prefix(&raw)?,
        };

        let cache_limit = match get("CONTEXT_CACHE_LIMIT") {
            None => DEFAULT_CACHE_LIMIT,
            Some(raw) => parse_cache_limit(&raw)?,
        };

        info!("Configuration loaded successfully");
        debug!("Discord token length: {} characters", discord_token.len());
        debug!("OpenAI API key length: {} characters", openai_api_key.len());
        debug!("OpenAI model: {openai_model}");
        debug!("Command prefix: {command_prefix}");
        debug!("Context cache limit: {cache_limit}");

        Ok(Self {
            discord_token,
            openai_api_key,
            openai_model,
            openai_api_url,
            command_prefix,
            cache_limit,
        })
    }
}

fn required<F>(get: &F, key: &str) -> Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    get(key).ok_or_else(|| {
        error!("Failed to load {key} from environment");
        BotError::Config(format!("{key} environment variable not set"))
    })
}

fn parse_prefix(raw: &str) -> Result<char> {
    let mut chars = raw.trim().chars();
    match (chars.next(), chars.next()) {
        (Some(prefix), None) => Ok(prefix),
        _ => Err(BotError::Config(format!(
            "COMMAND_PREFIX must be a single character, got {raw:?}"
        ))),
    }
}

fn parse_cache_limit(raw: &str) -> Result<usize> {
    match raw.trim().parse::<usize>() {
        Ok(limit) if limit > 0 => Ok(limit),
        _ => Err(BotError::Config(format!(
            "CONTEXT_CACHE_LIMIT must be a positive integer, got {raw:?}"
        ))),
    }
}
