//! Scheduler: the long-running loop that keeps the market moving.
//!
//! Two timers share one task: a short settlement interval and a slower
//! poll of the calendar day. The expiry scan runs once per day boundary
//! as observed by the market's clock, first catching up on any earlier
//! day whose contracts are still in place (the service was down over
//! midnight). Errors are logged and the work is retried on the next tick;
//! nothing here stops the process.

use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::engine::settlement::SettlementReport;
use crate::market::TransferMarket;
use crate::types::{ExpirySummary, SettlementOutcome};

pub struct Scheduler {
    market: Arc<TransferMarket>,
    settlement_interval: Duration,
    expiry_interval: Duration,
    last_expiry_run: Option<NaiveDate>,
}

impl Scheduler {
    pub fn new(market: Arc<TransferMarket>, config: &SchedulerConfig) -> Self {
        Self {
            market,
            settlement_interval: Duration::from_secs(config.settlement_interval_secs.max(1)),
            expiry_interval: Duration::from_secs(config.expiry_check_interval_secs.max(1)),
            last_expiry_run: None,
        }
    }

    /// Run until `shutdown` flips to true or its sender goes away.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut settle = tokio::time::interval(self.settlement_interval);
        settle.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut expiry = tokio::time::interval(self.expiry_interval);
        expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            settlement_secs = self.settlement_interval.as_secs(),
            expiry_check_secs = self.expiry_interval.as_secs(),
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = expiry.tick() => {
                    self.tick_expiry().await;
                }
                _ = settle.tick() => {
                    self.tick_settlement().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Scheduler stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Run the expiry scan if today's has not run yet, together with every
    /// missed day before it. Returns the combined summary.
    pub async fn tick_expiry(&mut self) -> Option<ExpirySummary> {
        let today = self.market.now().date_naive();
        if self.last_expiry_run == Some(today) {
            return None;
        }

        let first = match self.market.earliest_missed_expiry(today).await {
            Ok(Some(missed)) => {
                warn!(from = %missed, to = %today, "Catching up on missed expiry days");
                missed
            }
            Ok(None) => today,
            Err(e) => {
                error!(date = %today, error = %e, "Expiry catch-up lookup failed, retrying next tick");
                return None;
            }
        };

        let mut total = ExpirySummary::default();
        let mut date = first;
        loop {
            match self.market.run_daily_expiry(date).await {
                Ok(summary) => {
                    total.contracts_expired += summary.contracts_expired;
                    total.listings_opened += summary.listings_opened;
                }
                Err(e) => {
                    error!(date = %date, error = %e, "Expiry scan failed, retrying next tick");
                    return None;
                }
            }
            match date.succ_opt() {
                Some(next) if next <= today => date = next,
                _ => break,
            }
        }

        self.last_expiry_run = Some(today);
        Some(total)
    }

    pub async fn tick_settlement(&self) -> Option<SettlementReport> {
        match self.market.settle_now().await {
            Ok(report) => {
                let failed = report.count(SettlementOutcome::Failed);
                if failed > 0 {
                    warn!(run_id = %report.run_id, failed, "Some listings failed to settle");
                }
                Some(report)
            }
            Err(e) => {
                error!(error = %e, "Settlement sweep failed, retrying next tick");
                None
            }
        }
    }

    /// Operator-triggered sweep outside the timer. Same guard as the
    /// periodic path, so it is safe to call while a sweep is in flight.
    pub async fn run_once(&self) -> crate::storage::Result<SettlementReport> {
        self.market.settle_now().await
    }

    pub fn last_expiry_run(&self) -> Option<NaiveDate> {
        self.last_expiry_run
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
