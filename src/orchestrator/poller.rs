//! Activity poll task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info};

use super::Orchestrator;

/// Sample on every tick until `stop` fires or its sender is dropped
pub(super) async fn run(
    orchestrator: Arc<Orchestrator>,
    period: Duration,
    mut stop: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!("activity poll task started");

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = poll_once(&orchestrator, &mut ticker) => {}
        }
    }

    info!("activity poll task stopped");
}

async fn poll_once(orchestrator: &Orchestrator, ticker: &mut Interval) {
    ticker.tick().await;

    let sampler = orchestrator.sampler();
    match tokio::task::spawn_blocking(move || sampler.sample()).await {
        Ok(status) => orchestrator.observe(status).await,
        Err(e) => error!(error = %e, "activity sampler failed"),
    }
}
