use std::process::ExitCode;
use std::sync::Arc;

use observer::{Observer, ObserverError};
use pipeline::zap::ZapParser;
use pipeline::{DispatchError, Dispatcher, RecorderError};

mod cli;
mod config;
mod observer;
mod pipeline;
mod recorders;
mod signals;

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error("Loading config: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Setting up recorders: {0}")]
    Recorder(#[from] RecorderError),
    #[error("{0}")]
    Dispatch(#[from] DispatchError),
    #[error("Installing signal handlers: {0}")]
    Signals(#[from] std::io::Error),
    #[error("Starting observer: {0}")]
    Observer(#[from] ObserverError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenv::dotenv();
    let args = cli::get_cli_args();

    let default_filter = if args.dev { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &cli::Args) -> Result<(), StartupError> {
    if !args.dev {
        match std::fs::read_to_string(&args.release_file) {
            Ok(release) => log::info!("Running release {}", release.trim()),
            Err(e) => log::warn!("Could not read {:?}: {e}", args.release_file),
        }
    }

    let config = config::LogwatchConfig::try_init(&args.config)?;

    let recorders = recorders::from_args(args)?;
    let dispatcher = Arc::new(Dispatcher::new(recorders)?.ignoring_levels(config.ignored_levels.clone()));
    log::info!("Recording to {}", dispatcher.recorder_names().join(", "));

    let parser = Arc::new(ZapParser::new().with_raw_fallback(config.raw_fallback));
    let terminate = signals::handle_termination()?;

    let mut observer = Observer::start(
        &args.dir,
        parser,
        Arc::clone(&dispatcher),
        config.observer(),
        terminate,
    )?;
    log::info!("Watching {:?}", args.dir);
    signals::notify_ready();

    let reason = observer.done().await;
    log::info!("Shutting down ({reason:?})");
    signals::notify_stopping();

    dispatcher.close().await;
    observer.close();
    Ok(())
}
