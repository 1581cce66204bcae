//! Session liveness monitor
//!
//! One per established session. Probes the link on a fixed interval and
//! hands a dead session back to the orchestrator exactly once. Never
//! reconnects; that is left to the user.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::Orchestrator;

/// Upper bound for a single liveness probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub(super) async fn watch(orchestrator: Arc<Orchestrator>, generation: u64, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    debug!(generation, ?period, "session monitor started");

    loop {
        ticker.tick().await;

        if !orchestrator.is_current_session(generation) {
            debug!(generation, "session ended, monitor exiting");
            return;
        }

        let alive = match timeout(PROBE_TIMEOUT, orchestrator.link().is_connected()).await {
            Ok(alive) => alive,
            Err(_) => {
                warn!(generation, "liveness probe timed out");
                false
            }
        };

        if !alive {
            orchestrator
                .handle_session_lost(generation, "connection lost (monitor)")
                .await;
            return;
        }
    }
}
