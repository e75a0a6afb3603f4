pub mod bot;
pub mod cli;
pub mod core;
pub mod providers;
pub mod store;

use crate::bot::telegram::{TelegramClient, run_polling};
use crate::bot::{Bot, COMMANDS};
use crate::core::config::AppConfig;
use crate::core::refresh::{DailySchedule, RefreshOutcome, Refresher, Scheduler};
use crate::core::session::SessionStore;
use crate::core::{RateService, RateStore};
use crate::providers::cbr::CbrRateSource;
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub enum AppCommand {
    Run,
    Refresh,
    Rates,
    Convert {
        from: String,
        to: String,
        amount: String,
    },
}

pub async fn run_command(
    command: AppCommand,
    config_path: Option<&str>,
    in_memory_store: bool,
) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    debug!("Loaded config: {:#?}", redacted(&config));

    let store = store::open_store(&config, in_memory_store).await?;
    let refresher = Arc::new(build_refresher(&config, Arc::clone(&store))?);
    let service = RateService::new(Arc::clone(&store));

    // An in-memory store starts empty, fill it before reading
    if in_memory_store && matches!(command, AppCommand::Rates | AppCommand::Convert { .. }) {
        refresher.refresh().await?;
    }

    match command {
        AppCommand::Run => run_bot(&config, refresher, service).await,
        AppCommand::Refresh => {
            match refresher.refresh().await? {
                RefreshOutcome::Updated { entries } => info!("Stored {entries} rates"),
                RefreshOutcome::Skipped => info!("Refresh skipped"),
            }
            Ok(())
        }
        AppCommand::Rates => {
            let rates = service.list_rates().await?;
            cli::rates::display_rates(rates.as_deref(), &config.source.base_currency);
            Ok(())
        }
        AppCommand::Convert { from, to, amount } => {
            let conversion = service.convert_text(&from, &to, &amount).await?;
            cli::rates::display_conversion(&conversion);
            Ok(())
        }
    }
}

fn build_refresher(config: &AppConfig, store: Arc<dyn RateStore>) -> Result<Refresher> {
    let source = CbrRateSource::new(
        &config.source.url,
        Duration::from_secs(config.source.timeout_secs),
    )
    .context("Failed to build rate source client")?;
    Ok(Refresher::new(
        Arc::new(source),
        store,
        &config.source.base_currency,
    ))
}

async fn run_bot(config: &AppConfig, refresher: Arc<Refresher>, service: RateService) -> Result<()> {
    info!("Rates bot starting...");

    let schedule = DailySchedule::new(config.schedule.hour, config.schedule.minute)?;
    let scheduler = Scheduler::new(refresher, schedule);
    scheduler.refresh_now().await;
    let scheduler_task = scheduler.spawn();

    let client = Arc::new(TelegramClient::new(
        &config.telegram.api_url,
        &config.telegram.token,
    )?);
    if let Err(e) = client.set_my_commands(&COMMANDS).await {
        warn!(error = %e, "Failed to register bot commands");
    }

    let bot = Arc::new(Bot::new(service, SessionStore::new()));
    let result = tokio::select! {
        result = run_polling(client, bot) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    };
    scheduler_task.abort();
    result
}

fn redacted(config: &AppConfig) -> AppConfig {
    let mut config = config.clone();
    config.telegram.token = "<redacted>".to_string();
    config
}
