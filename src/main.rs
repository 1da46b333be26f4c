use std::{env, fs::File};

use env_logger::{Env, Target};

fn init_logging() {
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or("finwiz=info,serenity=warn"));

    let log_file = env::var("LOG_FILE").ok().filter(|path| !path.is_empty());
    let mut open_error = None;
    if let Some(path) = &log_file {
        match File::create(path) {
            Ok(file) => {
                builder.target(Target::Pipe(Box::new(file)));
            }
            Err(e) => open_error = Some(e),
        }
    }
    builder.init();

    if let (Some(path), Some(e)) = (log_file, open_error) {
        log::warn!("Could not open log file {path}, logging to stderr: {e}");
    }
}

#[tokio::main]
async fn main() -> finwiz::error::Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        log::debug!("A rustls crypto provider was already installed");
    }

    log::info!("Starting finwiz Discord bot");

    match finwiz::run().await {
        Ok(()) => {
            log::info!("Bot shut down successfully");
            Ok(())
        }
        Err(e) => {
            log::error!("Bot encountered an error: {e}");
            Err(e)
        }
    }
}
