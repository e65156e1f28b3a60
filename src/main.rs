use std::sync::Arc;

use chat_authority::config::{self, AppConfig};
use chat_authority::console::{self, Console};
use chat_authority::{AuthorityService, ChatAuthority, Clock, SystemClock};
use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use tokio::signal;

#[derive(Parser)]
#[command(
    name = "chat-authority",
    version,
    about = "Authority-routed chat with validation, rate limiting and history"
)]
struct Cli {
    /// Path to JSON config file
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH, value_name = "FILE")]
    config: String,
    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Drive an in-process authority from stdin (default)
    Console,
    /// Write the default config to the config path
    InitConfig,
    /// Print the effective config
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode.unwrap_or(Mode::Console) {
        Mode::InitConfig => {
            config::save_config(&cli.config, &AppConfig::default())?;
            log::info!("Wrote default config to {}", cli.config);
            Ok(())
        }
        Mode::ShowConfig => {
            let app_config = config::load_config(&cli.config);
            println!("{}", serde_json::to_string_pretty(&app_config)?);
            Ok(())
        }
        Mode::Console => run_console(config::load_config(&cli.config)).await,
    }
}

async fn run_console(app_config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let authority = ChatAuthority::new(app_config.settings.clone(), clock.clone())?;
    let (handle, service) = AuthorityService::spawn(authority, app_config.service_options());

    let console = Console::new(handle, clock);
    tokio::select! {
        result = console::run(console) => {
            if let Err(err) = result {
                log::error!("Console terminated: {err}");
            }
        }
        _ = signal::ctrl_c() => {
            log::info!("Received shutdown signal, stopping chat authority...");
        }
    }

    // Every handle is gone once the console is dropped, which ends the service.
    if let Err(err) = service.await {
        log::error!("Chat authority task failed: {err}");
    }
    Ok(())
}
