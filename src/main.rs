use clap::Parser;
use gerrit_autoreview::config::{BotConfig, DEFAULT_CONFIG_FILE};
use gerrit_autoreview::error::AppError;
use gerrit_autoreview::services::{GerritClient, PollLoop, StatusServer};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "gerrit-autoreview", version, about = "Auto-approve Gerrit changes once every reviewer agrees")]
struct Args {
    /// Path to the TOML config file
    #[arg(short = 'f', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Print every fetched change and debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    once: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), AppError> {
    let config = BotConfig::load(&args.config)?;
    let mut poll_config = config.poll_config()?;
    poll_config.verbose = args.verbose;

    let client = GerritClient::new(config.client_config()?)?;
    log::info!(
        "Polling {} as {} every {:?} (CI: {})",
        config.gerrit.host,
        config.gerrit.user,
        poll_config.interval,
        if poll_config.ci_identity.is_empty() {
            "<none>"
        } else {
            poll_config.ci_identity.as_str()
        }
    );

    let mut poll_loop = PollLoop::new(client, poll_config);

    if args.once {
        poll_loop.run_cycle().await?;
        return Ok(());
    }

    let (handle, mut task) = poll_loop.start_background();
    let status_server = match config.status_addr() {
        Some(addr) => Some(StatusServer::start(&addr, handle.clone()).await?),
        None => None,
    };

    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        joined = &mut task => {
            joined.map_err(|e| AppError::internal(format!("Poll loop panicked: {}", e)))?;
            false
        }
    };

    if interrupted {
        log::info!("Interrupted, stopping after current cycle");
        handle.stop().await?;
        task.await
            .map_err(|e| AppError::internal(format!("Poll loop panicked: {}", e)))?;
    }
    if let Some(server) = status_server {
        server.stop().await;
    }

    Ok(())
}
