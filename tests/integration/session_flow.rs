//! End-to-end session scenarios: wagers, batches, reentrancy,
//! cancellation and persistence across restarts.

use async_trait::async_trait;
use std::sync::{Arc, Mutex, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use coinflip::engine::events::{NoopObserver, SessionObserver};
use coinflip::engine::session::{ContinuousRequest, SessionController};
use coinflip::engine::stats::ModeStats;
use coinflip::storage::JsonFileStore;
use coinflip::types::{
    BatchClassification, BetSpec, CoinSide, GameError, PlayMode, SessionProgress, Snapshot,
};

use crate::mock_store::{config_with_balance, fast_config, MockStore, ScriptedCoin};

fn heads(amount: u64) -> BetSpec {
    BetSpec::new(amount, CoinSide::Heads)
}

fn open(
    balance: u64,
    outcomes: &[CoinSide],
    observer: Arc<dyn SessionObserver>,
) -> (Arc<SessionController>, Arc<MockStore>) {
    let store = Arc::new(MockStore::new());
    let ctl = SessionController::open(
        &config_with_balance(balance),
        ScriptedCoin::new(outcomes),
        store.clone(),
        observer,
    );
    (Arc::new(ctl), store)
}

// ---------------------------------------------------------------------------
// Observers
// ---------------------------------------------------------------------------

/// Reads the controller from inside the presentation hook.
#[derive(Default)]
struct HookProbe {
    controller: OnceLock<Weak<SessionController>>,
    balances_at_hook: Mutex<Vec<u64>>,
    rounds_seen: Mutex<Vec<u32>>,
}

#[async_trait]
impl SessionObserver for HookProbe {
    async fn present_outcome(&self, _mode: PlayMode, _outcome: CoinSide) {
        if let Some(ctl) = self.controller.get().and_then(Weak::upgrade) {
            self.balances_at_hook.lock().unwrap().push(ctl.balance());
        }
    }

    fn on_session_progress(&self, progress: &SessionProgress) {
        self.rounds_seen.lock().unwrap().push(progress.current_round);
    }
}

/// Holds every round at the hook until the test releases it.
#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl SessionObserver for Gate {
    async fn present_outcome(&self, _mode: PlayMode, _outcome: CoinSide) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

/// Cancels the batch once it reaches a given round.
struct CancelAt {
    round: u32,
    token: CancellationToken,
}

impl SessionObserver for CancelAt {
    fn on_session_progress(&self, progress: &SessionProgress) {
        if progress.current_round == self.round {
            self.token.cancel();
        }
    }
}

/// Signals after every settled round and collects warnings.
#[derive(Default)]
struct Recorder {
    settled: Notify,
    warnings: Mutex<Vec<GameError>>,
}

impl SessionObserver for Recorder {
    fn on_round_settled(&self, _record: &coinflip::types::RoundRecord) {
        self.settled.notify_one();
    }

    fn on_warning(&self, warning: &GameError) {
        self.warnings.lock().unwrap().push(warning.clone());
    }
}

// ---------------------------------------------------------------------------
// Single wagers
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_winning_wager_pays_double_minus_fee() {
    let (ctl, store) = open(10_000, &[CoinSide::Heads], Arc::new(NoopObserver));

    let record = assert_ok!(ctl.play_real(heads(100)).await);

    assert_eq!(record.profit(), Some(95));
    assert_eq!(record.is_win(), Some(true));
    assert_eq!(ctl.balance(), 10_095);
    assert_eq!(store.last_saved().map(|s| s.balance), Some(10_095));
}

#[tokio::test]
async fn test_losing_wager_costs_stake_and_fee() {
    let (ctl, _) = open(10_000, &[CoinSide::Tails], Arc::new(NoopObserver));

    let record = assert_ok!(ctl.play_real(heads(100)).await);

    assert_eq!(record.profit(), Some(-105));
    assert_eq!(ctl.balance(), 9_895);
    assert_eq!(ctl.stats(PlayMode::Real), ModeStats { rounds: 1, heads: 0, tails: 1 });
}

#[tokio::test]
async fn test_invalid_amounts_rejected_without_side_effects() {
    let (ctl, store) = open(10_000, &[CoinSide::Heads], Arc::new(NoopObserver));

    for amount in [0, 50, 150, 1_150] {
        let err = assert_err!(ctl.play_real(heads(amount)).await);
        assert_eq!(err, GameError::InvalidBetAmount { amount });
    }

    assert_eq!(ctl.balance(), 10_000);
    assert!(ctl.history(None, None).is_empty());
    assert_eq!(store.save_count(), 0);
}

// ---------------------------------------------------------------------------
// Continuous batches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_unaffordable_batch_rejected_as_a_whole() {
    let (ctl, store) = open(1_000, &[CoinSide::Heads], Arc::new(NoopObserver));
    assert_eq!(ctl.max_rounds(100), 9);

    let request = ContinuousRequest::new(heads(100), 20);
    let err = assert_err!(ctl.start_continuous(request, &CancellationToken::new()).await);

    assert_eq!(err, GameError::InsufficientFunds { needed: 2_100, available: 1_000 });
    assert_eq!(ctl.balance(), 1_000);
    assert!(ctl.history(None, None).is_empty());
    assert_eq!(store.save_count(), 0);
    assert!(!ctl.is_busy());
}

#[tokio::test]
async fn test_speed_batch_debits_before_each_draw_in_order() {
    let probe = Arc::new(HookProbe::default());
    let (ctl, store) = open(10_000, &[CoinSide::Heads], probe.clone());
    probe.controller.set(Arc::downgrade(&ctl)).unwrap();

    let request = ContinuousRequest::new(heads(100), 12).with_speed_mode(true);
    let summary = assert_ok!(ctl.start_continuous(request, &CancellationToken::new()).await);

    // At the hook, round i's stake is already gone: start + 95 * (i - 1) - 105.
    let expected: Vec<u64> = (0..12u64).map(|i| 10_000 + 95 * i - 105).collect();
    assert_eq!(*probe.balances_at_hook.lock().unwrap(), expected);
    assert_eq!(*probe.rounds_seen.lock().unwrap(), (1..=12).collect::<Vec<u32>>());

    assert_eq!(summary.rounds_played, 12);
    assert_eq!(summary.net_profit, 1_140);
    assert_eq!(summary.classification, BatchClassification::NetPositive);
    assert_eq!(summary.balance_after, 11_140);
    assert_eq!(store.save_count(), 12 + 1);
}

#[tokio::test]
async fn test_losing_batch_classified_negative() {
    let outcomes = [CoinSide::Tails, CoinSide::Tails, CoinSide::Heads];
    let (ctl, _) = open(10_000, &outcomes, Arc::new(NoopObserver));

    let request = ContinuousRequest::new(heads(200), 3);
    let summary = assert_ok!(ctl.start_continuous(request, &CancellationToken::new()).await);

    // Two losses of 205, one win of 195.
    assert_eq!(summary.net_profit, -215);
    assert_eq!(summary.classification, BatchClassification::NetNegative);
    assert_eq!(ctl.balance(), 9_785);

    let history = ctl.history(Some(PlayMode::Continuous), None);
    let profits: Vec<i64> = history.iter().filter_map(|r| r.profit()).collect();
    assert_eq!(profits, vec![195, -205, -205]);
}

#[tokio::test]
async fn test_batch_stops_when_cancelled_mid_run() {
    let token = CancellationToken::new();
    let observer = Arc::new(CancelAt { round: 3, token: token.clone() });
    let (ctl, store) = open(10_000, &[CoinSide::Heads], observer);

    let request = ContinuousRequest::new(heads(100), 10);
    let summary = assert_ok!(ctl.start_continuous(request, &token).await);

    assert!(summary.cancelled);
    assert_eq!(summary.rounds_played, 3);
    assert_eq!(summary.total_rounds, 10);
    assert_eq!(ctl.balance(), 10_000 + 3 * 95);
    assert_eq!(ctl.history(None, None).len(), 3);
    assert_eq!(store.save_count(), 3 + 1);
    assert!(!ctl.is_busy());
}

#[tokio::test]
async fn test_cancel_interrupts_pacing_delay() {
    let mut cfg = fast_config();
    cfg.pacing.normal_interval_ms = 60_000;

    let recorder = Arc::new(Recorder::default());
    let ctl = Arc::new(SessionController::open(
        &cfg,
        ScriptedCoin::always(CoinSide::Heads),
        Arc::new(MockStore::new()),
        recorder.clone(),
    ));
    let token = CancellationToken::new();

    let task = tokio::spawn({
        let ctl = ctl.clone();
        let token = token.clone();
        async move {
            ctl.start_continuous(ContinuousRequest::new(heads(100), 3), &token)
                .await
        }
    });

    recorder.settled.notified().await;
    token.cancel();

    let summary = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("batch did not stop after cancel")
        .unwrap()
        .unwrap();

    assert!(summary.cancelled);
    assert_eq!(summary.rounds_played, 1);
    assert_eq!(ctl.balance(), 10_095);
}

/// Lets rounds through the hook until `stall_at`, then parks for a minute.
struct StallAt {
    stall_at: u32,
    seen: Mutex<u32>,
}

#[async_trait]
impl SessionObserver for StallAt {
    async fn present_outcome(&self, _mode: PlayMode, _outcome: CoinSide) {
        let round = {
            let mut seen = self.seen.lock().unwrap();
            *seen += 1;
            *seen
        };
        if round == self.stall_at {
            tokio::time::sleep(Duration::from_secs(60)).await;
        }
    }
}

#[tokio::test]
async fn test_dropped_batch_keeps_settled_rounds_and_returns_open_stake() {
    let observer = Arc::new(StallAt { stall_at: 3, seen: Mutex::new(0) });
    let (ctl, store) = open(10_000, &[CoinSide::Heads], observer);

    let token = CancellationToken::new();
    let batch = ctl.start_continuous(ContinuousRequest::new(heads(100), 5), &token);
    let result = tokio::time::timeout(Duration::from_millis(100), batch).await;
    assert!(result.is_err());

    // Rounds 1 and 2 stand; round 3's stake is back.
    assert_eq!(ctl.balance(), 10_000 + 2 * 95);
    assert_eq!(ctl.history(None, None).len(), 2);
    assert_eq!(ctl.stats(PlayMode::Real).rounds, 2);
    assert!(!ctl.is_busy());
    assert!(ctl.continuous_session().is_none());
    assert_eq!(store.last_saved(), Some(ctl.snapshot()));
}

// ---------------------------------------------------------------------------
// Reentrancy
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_second_session_rejected_while_batch_runs() {
    let gate = Arc::new(Gate::default());
    let (ctl, _) = open(10_000, &[CoinSide::Heads], gate.clone());

    let task = tokio::spawn({
        let ctl = ctl.clone();
        async move {
            ctl.start_continuous(ContinuousRequest::new(heads(100), 2), &CancellationToken::new())
                .await
        }
    });

    // Round 1 is parked at the hook with its stake reserved.
    gate.entered.notified().await;
    assert!(ctl.is_busy());
    assert_eq!(ctl.continuous_session().map(|s| s.current_round), Some(1));
    assert_eq!(ctl.balance(), 10_000 - 105);

    let busy = GameError::ReentrancyRejected { active: PlayMode::Continuous };
    assert_eq!(ctl.play_real(heads(100)).await, Err(busy.clone()));
    assert_eq!(ctl.play_test(1).await, Err(busy.clone()));
    assert_eq!(
        ctl.start_continuous(ContinuousRequest::new(heads(100), 1), &CancellationToken::new())
            .await,
        Err(busy.clone())
    );
    assert_eq!(ctl.reset(), Err(busy.clone()));
    assert_eq!(ctl.clear_history(), Err(busy));

    gate.release.notify_one();
    gate.entered.notified().await;
    gate.release.notify_one();

    let summary = task.await.unwrap().unwrap();
    assert_eq!(summary.rounds_played, 2);
    assert_eq!(ctl.balance(), 10_190);
    assert!(!ctl.is_busy());

    // Idle again: new sessions are accepted.
    gate.release.notify_one();
    assert_ok!(ctl.play_real(heads(100)).await);
}

// ---------------------------------------------------------------------------
// Test mode, history and analytics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_history_keeps_newest_hundred() {
    let (ctl, _) = open(10_000, &[CoinSide::Tails], Arc::new(NoopObserver));

    assert_ok!(ctl.play_test(100).await);
    assert_eq!(ctl.history(None, None).len(), 100);

    // The 101st append evicts the oldest record.
    let record = assert_ok!(ctl.play_real(heads(100)).await);
    let history = ctl.history(None, None);
    assert_eq!(history.len(), 100);
    assert_eq!(history.first(), Some(&record));
    assert_eq!(history.iter().filter(|r| r.mode() == PlayMode::Test).count(), 99);

    // Counters are not bounded by the history.
    assert_eq!(ctl.stats(PlayMode::Test).rounds, 100);
    assert_eq!(ctl.stats(PlayMode::Real).rounds, 1);
}

#[tokio::test]
async fn test_history_filter_and_limit() {
    let (ctl, _) = open(10_000, &[CoinSide::Heads], Arc::new(NoopObserver));
    assert_ok!(ctl.play_test(3).await);
    assert_ok!(ctl.play_real(heads(100)).await);
    assert_ok!(ctl.play_real(heads(200)).await);

    assert_eq!(ctl.history(Some(PlayMode::Test), None).len(), 3);
    assert_eq!(ctl.history(Some(PlayMode::Real), None).len(), 2);
    assert!(ctl.history(Some(PlayMode::Continuous), None).is_empty());

    let latest = ctl.history(None, Some(1));
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].profit(), Some(195));
}

#[tokio::test]
async fn test_analytics_after_three_wagers() {
    let outcomes = [CoinSide::Heads, CoinSide::Tails, CoinSide::Heads];
    let (ctl, _) = open(10_000, &outcomes, Arc::new(NoopObserver));
    for _ in 0..3 {
        assert_ok!(ctl.play_real(heads(100)).await);
    }

    let report = ctl.analytics();
    assert_eq!(report.win_loss.wins, 2);
    assert_eq!(report.win_loss.losses, 1);
    assert_eq!(report.win_loss.win_rate_pct().to_string(), "66.7");
    assert_eq!(report.profit.total, 85);
    assert_eq!(report.trend.len(), 3);
    assert_eq!(report.real_stats, ModeStats { rounds: 3, heads: 2, tails: 1 });
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

fn temp_state_path() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("coinflip_it_{}.json", uuid::Uuid::new_v4()))
}

#[tokio::test]
async fn test_state_survives_restart() {
    let path = temp_state_path();

    let first = SessionController::open(
        &fast_config(),
        ScriptedCoin::new(&[CoinSide::Heads, CoinSide::Tails]),
        Arc::new(JsonFileStore::new(&path)),
        Arc::new(NoopObserver),
    );
    assert_ok!(first.play_real(heads(100)).await);
    assert_ok!(first.play_test(1).await);
    let saved = first.snapshot();
    drop(first);

    let second = SessionController::open(
        &fast_config(),
        ScriptedCoin::always(CoinSide::Heads),
        Arc::new(JsonFileStore::new(&path)),
        Arc::new(NoopObserver),
    );
    assert_eq!(second.snapshot(), saved);
    assert_eq!(second.balance(), 10_095);
    assert_eq!(second.history(None, None).len(), 2);

    JsonFileStore::new(&path).delete().unwrap();
}

#[tokio::test]
async fn test_corrupt_state_file_starts_fresh() {
    let path = temp_state_path();
    std::fs::write(&path, "{ not json").unwrap();

    let recorder = Arc::new(Recorder::default());
    let ctl = SessionController::open(
        &fast_config(),
        ScriptedCoin::always(CoinSide::Heads),
        Arc::new(JsonFileStore::new(&path)),
        recorder.clone(),
    );

    assert_eq!(ctl.snapshot(), Snapshot::fresh(10_000));
    let warnings = recorder.warnings.lock().unwrap().clone();
    assert!(matches!(warnings.as_slice(), [GameError::PersistenceUnavailable(_)]));

    // The next save overwrites the bad file.
    assert_ok!(ctl.play_real(heads(100)).await);
    let reloaded = JsonFileStore::new(&path);
    let restored = SessionController::open(
        &fast_config(),
        ScriptedCoin::always(CoinSide::Heads),
        Arc::new(reloaded),
        Arc::new(NoopObserver),
    );
    assert_eq!(restored.balance(), 10_095);

    JsonFileStore::new(&path).delete().unwrap();
}

#[tokio::test]
async fn test_failing_store_never_blocks_play() {
    let recorder = Arc::new(Recorder::default());
    let store = Arc::new(MockStore::new());
    store.set_error("disk full");

    let ctl = SessionController::open(
        &fast_config(),
        ScriptedCoin::always(CoinSide::Tails),
        store.clone(),
        recorder.clone(),
    );

    let summary = assert_ok!(
        ctl.start_continuous(ContinuousRequest::new(heads(100), 2), &CancellationToken::new())
            .await
    );
    assert_eq!(summary.balance_after, 10_000 - 2 * 105);

    // One failed load, two per-round saves and the final save.
    assert_eq!(recorder.warnings.lock().unwrap().len(), 1 + 2 + 1);
    assert_eq!(store.save_count(), 0);

    store.clear_error();
    assert_ok!(ctl.play_test(1).await);
    assert_eq!(store.last_saved().map(|s| s.balance), Some(9_790));
}

#[tokio::test]
async fn test_reset_restores_initial_state_and_saves() {
    let (ctl, store) = open(2_000, &[CoinSide::Tails], Arc::new(NoopObserver));
    assert_ok!(ctl.play_real(heads(500)).await);
    assert_eq!(ctl.balance(), 2_000 - 505);

    let snapshot = assert_ok!(ctl.reset());
    assert_eq!(snapshot, Snapshot::fresh(2_000));
    assert_eq!(store.saves().last(), Some(&snapshot));
}
