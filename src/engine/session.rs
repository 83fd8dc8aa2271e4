//! Session controller. Runs test flips, single wagers and continuous
//! batches against one ledger.
//!
//! Exactly one session runs at a time. The active session is an explicit
//! `SessionPhase` owned by the controller; entering a phase while another
//! is active fails with `ReentrancyRejected`, and leaving it is tied to a
//! guard so every exit path (success, error, dropped future) returns the
//! controller to `Idle`.
//!
//! Per round the order is fixed: reserve → draw → presentation hook →
//! settle → record → persist → notify → pace. Round `i + 1` never starts
//! before round `i` has been fully applied.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::analytics::AnalyticsReport;
use crate::config::{AppConfig, GameConfig, PacingConfig};
use crate::engine::events::SessionObserver;
use crate::engine::history::HistoryStore;
use crate::engine::ledger::{Ledger, Reservation, Settlement};
use crate::engine::outcome::OutcomeSource;
use crate::engine::stats::ModeStats;
use crate::storage::PersistenceGateway;
use crate::types::{
    BatchClassification, BatchSummary, BetSpec, CoinSide, GameError, PlayMode, RoundRecord,
    SessionProgress, Snapshot, TestSummary, SPEED_MODE_MIN_ROUNDS,
};

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// Live state of a continuous batch. Exists only while the batch runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuousSession {
    pub id: Uuid,
    pub current_round: u32,
    pub total_rounds: u32,
    pub choice: CoinSide,
    pub bet_amount: u64,
    pub net_profit: i64,
    pub speed_mode: bool,
}

impl ContinuousSession {
    fn new(request: &ContinuousRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            current_round: 0,
            total_rounds: request.rounds,
            choice: request.bet.choice,
            bet_amount: request.bet.amount,
            net_profit: 0,
            speed_mode: request.speed_mode,
        }
    }

    fn progress(&self) -> SessionProgress {
        SessionProgress {
            session_id: self.id,
            current_round: self.current_round,
            total_rounds: self.total_rounds,
            net_profit: self.net_profit,
        }
    }
}

/// What the controller is doing right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    RunningTest,
    RunningSingle,
    RunningBatch(ContinuousSession),
}

impl SessionPhase {
    pub fn is_idle(&self) -> bool {
        matches!(self, SessionPhase::Idle)
    }

    /// The play mode of the active session, `None` when idle.
    pub fn mode(&self) -> Option<PlayMode> {
        match self {
            SessionPhase::Idle => None,
            SessionPhase::RunningTest => Some(PlayMode::Test),
            SessionPhase::RunningSingle => Some(PlayMode::Real),
            SessionPhase::RunningBatch(_) => Some(PlayMode::Continuous),
        }
    }
}

/// A request to run a batch of identical wagers back to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuousRequest {
    pub bet: BetSpec,
    pub rounds: u32,
    /// Shorter pacing between rounds. Only allowed for long batches.
    pub speed_mode: bool,
}

impl ContinuousRequest {
    pub fn new(bet: BetSpec, rounds: u32) -> Self {
        Self {
            bet,
            rounds,
            speed_mode: false,
        }
    }

    pub fn with_speed_mode(mut self, speed_mode: bool) -> Self {
        self.speed_mode = speed_mode;
        self
    }
}

/// Resets the phase to `Idle` when dropped.
struct PhaseGuard<'a> {
    phase: &'a Mutex<SessionPhase>,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        *self.phase.lock() = SessionPhase::Idle;
    }
}

/// A stake that has been debited but not yet settled. Dropping it
/// unsettled (the round's future was dropped mid-hook) credits the cost
/// back, so an abandoned round leaves no trace in the balance.
struct PendingStake<'a> {
    book: &'a Mutex<Book>,
    refund: Option<u64>,
}

impl<'a> PendingStake<'a> {
    fn reserve(book: &'a Mutex<Book>, bet: &BetSpec) -> Result<(Self, Reservation), GameError> {
        let reservation = book.lock().ledger.reserve(bet)?;
        let stake = Self {
            book,
            refund: Some(reservation.cost()),
        };
        Ok((stake, reservation))
    }

    fn settle(mut self, reservation: Reservation, outcome: CoinSide) -> Settlement {
        self.refund = None;
        self.book.lock().ledger.settle(reservation, outcome)
    }
}

impl Drop for PendingStake<'_> {
    fn drop(&mut self) {
        if let Some(cost) = self.refund.take() {
            self.book.lock().ledger.refund(cost);
            warn!(refunded = cost, "Round abandoned before settlement, stake returned");
        }
    }
}

// ---------------------------------------------------------------------------
// Book: balance, stats, history
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Book {
    ledger: Ledger,
    test_stats: ModeStats,
    real_stats: ModeStats,
    history: HistoryStore,
}

impl Book {
    fn from_snapshot(snapshot: Snapshot, history_capacity: usize) -> Self {
        Self {
            ledger: Ledger::new(snapshot.balance),
            test_stats: snapshot.test_stats,
            real_stats: snapshot.real_stats,
            history: HistoryStore::from_records(snapshot.history, history_capacity),
        }
    }

    fn snapshot(&self) -> Snapshot {
        Snapshot {
            balance: self.ledger.balance(),
            test_stats: self.test_stats,
            real_stats: self.real_stats,
            history: self.history.to_vec(),
        }
    }

    /// Append a record and count its outcome in the matching bucket.
    fn record(&mut self, record: RoundRecord) {
        match record.mode() {
            PlayMode::Test => self.test_stats.record(record.outcome()),
            PlayMode::Real | PlayMode::Continuous => self.real_stats.record(record.outcome()),
        }
        self.history.append(record);
    }

    fn reset(&mut self, initial_balance: u64) {
        self.ledger.reset(initial_balance);
        self.test_stats.reset();
        self.real_stats.reset();
        self.history.clear();
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct SessionController {
    game: GameConfig,
    pacing: PacingConfig,
    book: Mutex<Book>,
    phase: Mutex<SessionPhase>,
    source: Arc<dyn OutcomeSource>,
    store: Arc<dyn PersistenceGateway>,
    observer: Arc<dyn SessionObserver>,
}

impl SessionController {
    /// Build a controller, restoring state from `store` exactly once.
    ///
    /// A missing snapshot starts a fresh game. An unreadable one is
    /// reported as a warning and also starts fresh; later saves are still
    /// attempted.
    pub fn open(
        config: &AppConfig,
        source: Arc<dyn OutcomeSource>,
        store: Arc<dyn PersistenceGateway>,
        observer: Arc<dyn SessionObserver>,
    ) -> Self {
        let game = config.game.clone();

        let snapshot = match store.load() {
            Ok(Some(mut snapshot)) => {
                let repairs = snapshot.sanitize(game.history_capacity);
                if repairs > 0 {
                    warn!(repairs, "Loaded snapshot needed repairs");
                }
                info!(
                    balance = snapshot.balance,
                    history = snapshot.history.len(),
                    "Resumed from saved state"
                );
                snapshot
            }
            Ok(None) => {
                info!(balance = game.initial_balance, "Fresh start");
                Snapshot::fresh(game.initial_balance)
            }
            Err(e) => {
                warn!(error = %e, "Failed to load saved state, starting fresh");
                observer.on_warning(&GameError::PersistenceUnavailable(format!("{e:#}")));
                Snapshot::fresh(game.initial_balance)
            }
        };

        Self {
            book: Mutex::new(Book::from_snapshot(snapshot, game.history_capacity)),
            phase: Mutex::new(SessionPhase::Idle),
            game,
            pacing: config.pacing.clone(),
            source,
            store,
            observer,
        }
    }

    // -- Queries ---------------------------------------------------------

    pub fn balance(&self) -> u64 {
        self.book.lock().ledger.balance()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.book.lock().snapshot()
    }

    /// Stats bucket for a mode; real and continuous share one bucket.
    pub fn stats(&self, mode: PlayMode) -> ModeStats {
        let book = self.book.lock();
        match mode {
            PlayMode::Test => book.test_stats,
            PlayMode::Real | PlayMode::Continuous => book.real_stats,
        }
    }

    /// Newest-first history, optionally filtered by mode and truncated.
    pub fn history(&self, mode: Option<PlayMode>, limit: Option<usize>) -> Vec<RoundRecord> {
        let book = self.book.lock();
        book.history
            .query(mode)
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase.lock().clone()
    }

    pub fn is_busy(&self) -> bool {
        !self.phase.lock().is_idle()
    }

    /// The running batch, if any.
    pub fn continuous_session(&self) -> Option<ContinuousSession> {
        match &*self.phase.lock() {
            SessionPhase::RunningBatch(session) => Some(session.clone()),
            _ => None,
        }
    }

    /// How many wagers of `amount` the current balance covers.
    pub fn max_rounds(&self, amount: u64) -> u64 {
        let bet = BetSpec::new(amount, CoinSide::Heads);
        self.book.lock().ledger.max_rounds(&bet)
    }

    /// Recompute every derived statistic from the current history.
    pub fn analytics(&self) -> AnalyticsReport {
        let book = self.book.lock();
        let history = book.history.to_vec();
        AnalyticsReport::compute(&history, &book.test_stats, &book.real_stats)
    }

    // -- Test flips ------------------------------------------------------

    /// Flip the coin `rounds` times with nothing at stake.
    pub async fn play_test(&self, rounds: u32) -> Result<TestSummary, GameError> {
        let _guard = self.enter(SessionPhase::RunningTest)?;

        let max = self.game.max_test_rounds;
        if rounds == 0 || rounds > max {
            warn!(rounds, max, "Rejected test run");
            return Err(GameError::InvalidRoundCount { requested: rounds, max });
        }

        info!(rounds, "Test run started");
        let mut summary = TestSummary { rounds: 0, heads: 0, tails: 0 };

        for round in 1..=rounds {
            let outcome = self.source.next_outcome();
            self.observer.present_outcome(PlayMode::Test, outcome).await;

            let record = RoundRecord::test(outcome);
            self.commit(record.clone());
            self.observer.on_round_settled(&record);

            summary.rounds += 1;
            match outcome {
                CoinSide::Heads => summary.heads += 1,
                CoinSide::Tails => summary.tails += 1,
            }

            if round < rounds {
                self.pace(self.pacing.test_interval(), None).await;
            }
        }

        info!(
            rounds = summary.rounds,
            heads = summary.heads,
            tails = summary.tails,
            "Test run complete"
        );
        Ok(summary)
    }

    // -- Single wager ----------------------------------------------------

    /// Place one wager and settle it.
    pub async fn play_real(&self, bet: BetSpec) -> Result<RoundRecord, GameError> {
        let _guard = self.enter(SessionPhase::RunningSingle)?;

        let (stake, reservation) = PendingStake::reserve(&self.book, &bet)?;

        let outcome = self.source.next_outcome();
        self.observer.present_outcome(PlayMode::Real, outcome).await;

        let settlement = stake.settle(reservation, outcome);
        let record = RoundRecord::real(outcome, bet.choice, settlement.profit);
        self.commit(record.clone());
        self.observer.on_round_settled(&record);

        info!(
            amount = bet.amount,
            choice = %bet.choice,
            result = %outcome,
            profit = ?record.profit(),
            balance = self.balance(),
            "Wager settled"
        );
        Ok(record)
    }

    // -- Continuous batch ------------------------------------------------

    /// Run a batch of identical wagers in strict sequence.
    ///
    /// The batch is admitted or rejected as a whole: if the balance cannot
    /// cover every round up front, nothing is debited. Cancelling `cancel`
    /// stops the batch before its next round; settled rounds stand.
    pub async fn start_continuous(
        &self,
        request: ContinuousRequest,
        cancel: &CancellationToken,
    ) -> Result<BatchSummary, GameError> {
        let session = ContinuousSession::new(&request);
        let session_id = session.id;
        let _guard = self.enter(SessionPhase::RunningBatch(session))?;

        self.admit(&request)?;

        info!(
            session = %session_id,
            rounds = request.rounds,
            amount = request.bet.amount,
            choice = %request.bet.choice,
            speed_mode = request.speed_mode,
            "Batch admitted"
        );

        let interval = self.pacing.batch_interval(request.speed_mode);
        let mut net_profit: i64 = 0;
        let mut rounds_played: u32 = 0;
        let mut cancelled = false;

        for round in 1..=request.rounds {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }
            self.update_batch(|s| s.current_round = round);

            let (stake, reservation) = PendingStake::reserve(&self.book, &request.bet)?;

            let outcome = self.source.next_outcome();
            self.observer.present_outcome(PlayMode::Continuous, outcome).await;

            let settlement = stake.settle(reservation, outcome);
            let record = RoundRecord::continuous(outcome, request.bet.choice, settlement.profit);
            net_profit = net_profit.saturating_add(settlement.profit);
            rounds_played = round;

            let progress = self.update_batch(|s| s.net_profit = net_profit);
            self.commit(record.clone());
            self.observer.on_round_settled(&record);
            if let Some(progress) = progress {
                self.observer.on_session_progress(&progress);
            }

            if round < request.rounds {
                self.pace(interval, Some(cancel)).await;
            }
        }

        let snapshot = self.snapshot();
        self.persist(&snapshot);

        let summary = BatchSummary {
            session_id,
            rounds_played,
            total_rounds: request.rounds,
            net_profit,
            classification: BatchClassification::from_net_profit(net_profit),
            cancelled,
            balance_after: snapshot.balance,
        };

        if cancelled {
            warn!(
                session = %session_id,
                played = rounds_played,
                total = request.rounds,
                "Batch cancelled"
            );
        }
        self.observer.on_session_complete(&summary);
        Ok(summary)
    }

    /// Whole-batch admission: request shape first, then affordability.
    fn admit(&self, request: &ContinuousRequest) -> Result<(), GameError> {
        if request.rounds == 0 {
            return Err(GameError::InvalidRoundCount {
                requested: 0,
                max: self.max_rounds(request.bet.amount).min(u32::MAX as u64) as u32,
            });
        }
        if request.speed_mode && request.rounds <= SPEED_MODE_MIN_ROUNDS {
            return Err(GameError::SpeedModeUnavailable { rounds: request.rounds });
        }

        let book = self.book.lock();
        book.ledger.validate(&request.bet)?;
        book.ledger
            .ensure_covers(&request.bet, u64::from(request.rounds))
            .inspect_err(|e| warn!(error = %e, "Batch rejected"))
    }

    // -- Reset & housekeeping --------------------------------------------

    /// Restore the initial balance and wipe stats and history.
    pub fn reset(&self) -> Result<Snapshot, GameError> {
        let initial = self.game.initial_balance;
        let snapshot = self.while_idle(|book| {
            book.reset(initial);
            book.snapshot()
        })?;
        info!(balance = initial, "Game reset");
        Ok(snapshot)
    }

    /// Empty the history; balance and stats are untouched.
    pub fn clear_history(&self) -> Result<Snapshot, GameError> {
        let snapshot = self.while_idle(|book| {
            book.history.clear();
            book.snapshot()
        })?;
        info!("History cleared");
        Ok(snapshot)
    }

    // -- Internals -------------------------------------------------------

    /// Claim the controller for a new session.
    fn enter(&self, next: SessionPhase) -> Result<PhaseGuard<'_>, GameError> {
        let mut phase = self.phase.lock();
        if let Some(active) = phase.mode() {
            warn!(%active, requested = ?next.mode(), "Rejected: session already running");
            return Err(GameError::ReentrancyRejected { active });
        }
        *phase = next;
        Ok(PhaseGuard { phase: &self.phase })
    }

    /// Mutate the book only while idle, persisting before the phase lock
    /// is released so no session can interleave with the save.
    fn while_idle(&self, f: impl FnOnce(&mut Book) -> Snapshot) -> Result<Snapshot, GameError> {
        let phase = self.phase.lock();
        if let Some(active) = phase.mode() {
            warn!(%active, "Rejected: session already running");
            return Err(GameError::ReentrancyRejected { active });
        }
        let snapshot = f(&mut self.book.lock());
        self.persist(&snapshot);
        drop(phase);
        Ok(snapshot)
    }

    /// Record a round and save the resulting snapshot.
    fn commit(&self, record: RoundRecord) {
        let snapshot = {
            let mut book = self.book.lock();
            book.record(record);
            book.snapshot()
        };
        self.persist(&snapshot);
    }

    /// Save; failures are warned about and otherwise ignored.
    fn persist(&self, snapshot: &Snapshot) {
        if let Err(e) = self.store.save(snapshot) {
            warn!(error = %e, "Failed to save state, keeping in-memory state");
            self.observer
                .on_warning(&GameError::PersistenceUnavailable(format!("{e:#}")));
        }
    }

    /// Apply `f` to the running batch and return its progress.
    fn update_batch(&self, f: impl FnOnce(&mut ContinuousSession)) -> Option<SessionProgress> {
        match &mut *self.phase.lock() {
            SessionPhase::RunningBatch(session) => {
                f(session);
                Some(session.progress())
            }
            _ => None,
        }
    }

    /// Inter-round delay. Returns early if `cancel` fires.
    async fn pace(&self, delay: Duration, cancel: Option<&CancellationToken>) {
        if delay.is_zero() {
            return;
        }
        debug!(delay_ms = delay.as_millis() as u64, "Pacing");
        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => {}
                }
            }
            None => tokio::time::sleep(delay).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
