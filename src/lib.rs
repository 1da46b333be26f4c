pub mod bot;
pub mod commands;
pub mod config;
pub mod context_cache;
pub mod dispatcher;
pub mod error;
pub mod openai;
pub mod prompt;
pub mod types;

pub use bot::run;
