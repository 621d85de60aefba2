use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use scb_core::{
    config::Config,
    domain::ChatId,
    fanout::FanOut,
    jobs::ScheduledJobs,
    messaging::{
        port::ChatTransport,
        throttled::{ThrottleConfig, ThrottledTransport},
    },
    roles::RoleGate,
    scheduler::CronScheduler,
    session::SessionStore,
    store::{memory::MemoryStore, DocumentStore},
    Dispatcher,
};
use scb_firebase::FirebaseStore;
use scb_telegram::TelegramTransport;

#[tokio::main]
async fn main() -> Result<(), scb_core::Error> {
    scb_core::logging::init("scb")?;

    let cfg = Config::load()?;

    let store: Arc<dyn DocumentStore> = match &cfg.firebase_database_url {
        Some(url) => Arc::new(FirebaseStore::new(
            url,
            cfg.firebase_auth_token.clone(),
            cfg.store_timeout,
        )?),
        None => {
            tracing::warn!("FIREBASE_DATABASE_URL not set; using the in-memory store (nothing survives a restart)");
            Arc::new(MemoryStore::new())
        }
    };

    let roles = RoleGate::new(store.clone());
    for &id in &cfg.bootstrap_admins {
        if let Err(e) = roles.grant(ChatId(id)).await {
            tracing::warn!(chat_id = id, error = %e, "could not seed bootstrap admin");
        }
    }

    let telegram = TelegramTransport::from_token(cfg.telegram_bot_token.clone());
    let bot = telegram.bot();
    // 429s that slip through are retried by the Telegram adapter.
    let transport: Arc<dyn ChatTransport> = Arc::new(ThrottledTransport::new(
        Arc::new(telegram),
        ThrottleConfig::default(),
    ));

    let sessions = Arc::new(SessionStore::new(cfg.session_idle_timeout));
    let dispatcher = Arc::new(Dispatcher::from_config(
        &cfg,
        transport.clone(),
        store.clone(),
        sessions.clone(),
    ));
    if let Err(e) = dispatcher.publish_command_menus().await {
        tracing::warn!(error = %e, "could not publish command menus");
    }

    let shutdown = CancellationToken::new();
    let sweeper = sessions
        .clone()
        .spawn_sweeper(cfg.session_sweep_interval, shutdown.clone());

    let jobs = ScheduledJobs::new(
        store,
        sessions,
        FanOut::new(transport, cfg.fanout_recipient_timeout, cfg.fanout_concurrency),
    );
    let scheduler = CronScheduler::new(cfg.schedule_file.clone(), jobs);
    scheduler.start().await?;
    scheduler.ensure_watcher().await;

    let polled = scb_telegram::router::run_polling(bot, dispatcher).await;

    shutdown.cancel();
    scheduler.stop().await;
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "session sweeper ended abnormally");
    }

    polled.map_err(|e| scb_core::Error::External(format!("telegram bot failed: {e}")))
}
