//! Tally balance reconciler.
//!
//! Scans every balance row on a fixed interval and records a critical
//! alert for each row that is negative or whose holdings disagree with
//! its lifetime totals.
//!
//! Usage:
//!   reconciler        - Run until interrupted
//!   reconciler once   - Run a single pass and exit non-zero if unhealthy

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tally_core::FraudAlertEngine;
use tally_core::limits::{FileLimits, LimitsProvider};
use tally_db::{PgLedgerStore, connect_with};
use tally_shared::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "reconciler=info,tally_core=info,tally_db=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load().context("Failed to load configuration")?;
    let once = std::env::args().nth(1).as_deref() == Some("once");

    let db = connect_with(&config.database)
        .await
        .context("Failed to connect to database")?;
    info!("Connected to database");

    let store = Arc::new(
        PgLedgerStore::new(db)
            .with_lock_timeout(Duration::from_millis(config.ledger.lock_timeout_ms)),
    );
    let limits = Arc::new(LimitsProvider::new(
        FileLimits,
        Duration::from_secs(config.ledger.limits_ttl_secs),
    ));
    let engine = FraudAlertEngine::new(store.clone(), store.clone(), store, limits);
    let page_size = config.ledger.reconcile_page_size;

    if once {
        let report = engine.reconcile_all(page_size).await?;
        info!(
            scanned = report.scanned,
            alerts = report.alerts_raised,
            "Reconciliation pass finished"
        );
        if !report.is_clean() {
            anyhow::bail!(
                "{} mismatched and {} negative balances",
                report.mismatched,
                report.negative
            );
        }
        return Ok(());
    }

    let mut ticker =
        tokio::time::interval(Duration::from_secs(config.ledger.reconcile_interval_secs.max(1)));
    info!(
        interval_secs = config.ledger.reconcile_interval_secs,
        "Reconciler started"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = engine.reconcile_all(page_size).await {
                    error!(error = %e, "Reconciliation pass failed");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down reconciler");
                break;
            }
        }
    }

    Ok(())
}
