use std::sync::Arc;

use anyhow::Context;
use points_ledger::{
    adapters::{clock::SystemClock, database::memory::MemoryDatabase, log::TracingLogSink},
    commands::{audit_ledger::AuditLedgerRequest, DomainLogic},
    config::Config,
    ledger::Ledger,
    logging,
};
use tokio::sync::watch;
use tower::ServiceExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("cannot load configuration")?;
    logging::init_logging(&config.log)?;

    let ledger = Ledger::new(
        Arc::new(MemoryDatabase::default()),
        Arc::new(SystemClock),
        Arc::new(TracingLogSink),
        config.retry_policy(),
    );
    let domain = DomainLogic::new(ledger.clone());

    let audit = domain.oneshot(AuditLedgerRequest).await?;
    if !audit.is_consistent() {
        anyhow::bail!("ledger is inconsistent: {:?}", audit.violations);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = tokio::spawn({
        let sweeper = ledger.sweeper.clone();
        let interval = config.sweep_interval();
        let page_limit = config.sweeper.page_limit;
        async move { sweeper.run_every(interval, page_limit, shutdown_rx).await }
    });
    tracing::info!(
        interval_secs = config.sweeper.interval_secs,
        page_limit = config.sweeper.page_limit,
        "expiration sweeper started"
    );

    tokio::signal::ctrl_c()
        .await
        .context("cannot listen for shutdown signal")?;
    tracing::info!("shutting down");
    shutdown_tx.send(true)?;
    sweeper.await?;

    Ok(())
}
