//! Session callbacks and the presentation hook.
//!
//! The controller awaits `present_outcome` between drawing an outcome and
//! settling it, so a front end can animate the flip. Every other callback
//! fires after the state change it reports has been applied.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::types::{BatchSummary, CoinSide, GameError, PlayMode, RoundRecord, SessionProgress};

/// Receiver for session events. All methods default to no-ops.
#[async_trait]
pub trait SessionObserver: Send + Sync {
    /// Called after the outcome is drawn and before it is settled.
    async fn present_outcome(&self, _mode: PlayMode, _outcome: CoinSide) {}

    fn on_round_settled(&self, _record: &RoundRecord) {}

    fn on_session_progress(&self, _progress: &SessionProgress) {}

    fn on_session_complete(&self, _summary: &BatchSummary) {}

    /// Non-fatal problems, e.g. a failed save.
    fn on_warning(&self, _warning: &GameError) {}
}

/// Observer that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl SessionObserver for NoopObserver {}

/// Observer that logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

#[async_trait]
impl SessionObserver for TracingObserver {
    fn on_round_settled(&self, record: &RoundRecord) {
        info!(
            mode = %record.mode(),
            result = %record.outcome(),
            choice = ?record.choice(),
            profit = ?record.profit(),
            "Round settled"
        );
    }

    fn on_session_progress(&self, progress: &SessionProgress) {
        info!(
            session = %progress.session_id,
            round = progress.current_round,
            total = progress.total_rounds,
            net_profit = progress.net_profit,
            "Batch progress"
        );
    }

    fn on_session_complete(&self, summary: &BatchSummary) {
        info!(
            session = %summary.session_id,
            rounds = summary.rounds_played,
            net_profit = summary.net_profit,
            classification = %summary.classification,
            cancelled = summary.cancelled,
            balance = summary.balance_after,
            "Batch complete"
        );
    }

    fn on_warning(&self, warning: &GameError) {
        warn!(warning = %warning, "Session warning");
    }
}
