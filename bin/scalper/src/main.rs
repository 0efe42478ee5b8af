use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::{Config, ExecutionGateway, MarketData, TradeEvent, TradingMode};
use engine::{BitvavoClient, BotFileConfig, ControlSurface, Scheduler, SchedulerDeps};
use paper::PaperClient;
use store::SqliteStore;
use strategy::{ParameterTuner, Scanner, SignalRegistry};
use telegram_ctrl::{render, send_alert, start_bot, BotDeps};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env().context("invalid environment configuration")?;
    let bot_cfg = BotFileConfig::load(&cfg.bot_config_path)?;
    info!(mode = %cfg.trading_mode, config = %cfg.bot_config_path, "Scalper starting");

    // ── Position store ────────────────────────────────────────────────────────
    let store = Arc::new(
        SqliteStore::connect(&cfg.database_url, bot_cfg.store_settings())
            .await
            .context("failed to open the position store")?,
    );

    // ── Venue (injected based on TRADING_MODE) ────────────────────────────────
    let (market, gateway): (Arc<dyn MarketData>, Arc<dyn ExecutionGateway>) =
        match cfg.trading_mode {
            TradingMode::Live => {
                info!("Live trading mode, orders go to Bitvavo");
                let client = Arc::new(BitvavoClient::new(
                    cfg.bitvavo_api_key.clone(),
                    cfg.bitvavo_secret.clone(),
                )?);
                (client.clone() as Arc<dyn MarketData>, client as Arc<dyn ExecutionGateway>)
            }
            TradingMode::Paper => {
                info!(
                    slippage_bps = cfg.paper_slippage_bps,
                    "Paper trading mode, fills are simulated"
                );
                let upstream = Arc::new(BitvavoClient::public()?);
                let client = Arc::new(PaperClient::new(upstream, cfg.paper_slippage_bps));
                (client.clone() as Arc<dyn MarketData>, client as Arc<dyn ExecutionGateway>)
            }
        };

    // ── Scheduler ─────────────────────────────────────────────────────────────
    let (event_tx, mut event_rx) = mpsc::channel::<TradeEvent>(64);
    let registry = SignalRegistry::from_config(&bot_cfg.scanner)?;
    let scanner = Arc::new(Scanner::new(bot_cfg.scanner.clone(), registry, market.clone()));
    let tuner = Arc::new(ParameterTuner::new(store.clone(), bot_cfg.bounds));

    let (scheduler, handle) = Scheduler::new(
        bot_cfg.scheduler.clone(),
        bot_cfg.exit.clone(),
        SchedulerDeps {
            scanner,
            market,
            gateway,
            store: store.clone(),
            tuner,
            events: event_tx.clone(),
        },
    );

    let control = ControlSurface::new(
        store,
        handle.clone(),
        cfg.trading_mode,
        event_tx,
        bot_cfg.store.closed_trade_capacity,
    );

    // ── Trade event forwarder (log + Telegram alerts) ─────────────────────────
    let alert_bot = teloxide::Bot::new(cfg.telegram_token.clone());
    let chat_ids: Vec<teloxide::types::ChatId> = cfg
        .telegram_allowed_user_ids
        .iter()
        .map(|&id| teloxide::types::ChatId(id))
        .collect();
    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let msg = render::event(&event);
            match &event {
                TradeEvent::ExitStuck { .. }
                | TradeEvent::UnmanagedFill { .. }
                | TradeEvent::EntryFailed { ambiguous: true, .. } => {
                    warn!(event = ?event, "{msg}")
                }
                _ => info!(event = ?event, "{msg}"),
            }
            send_alert(&alert_bot, &chat_ids, &msg).await;
        }
    });

    // ── Operator surfaces ─────────────────────────────────────────────────────
    let bot_deps = BotDeps {
        control: control.clone(),
        allowed_user_ids: Arc::new(cfg.telegram_allowed_user_ids.clone()),
    };
    tokio::spawn(start_bot(cfg.telegram_token.clone(), bot_deps));

    let api_state = api::AppState {
        control,
        dashboard_token: cfg.dashboard_token.clone(),
    };
    let port = cfg.dashboard_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!(error = %e, "HTTP front door stopped");
        }
    });

    // ── Run until ctrl-c ──────────────────────────────────────────────────────
    let scheduler_task = tokio::spawn(scheduler.run());
    info!("All subsystems started. Waiting for shutdown signal.");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Shutdown signal received");
    handle.shutdown();
    if let Err(e) = scheduler_task.await {
        error!(error = %e, "Scheduler task ended abnormally");
    }
    info!("Scalper stopped");
    Ok(())
}
