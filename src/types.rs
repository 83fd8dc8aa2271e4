//! Shared types for the COINFLIP engine.
//!
//! These types form the data model used across all modules: coin faces,
//! play modes, bet specifications, round records, the persisted snapshot,
//! session notifications and the domain error taxonomy.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::engine::history::bounded_capacity;
use crate::engine::stats::ModeStats;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Flat fee added to every wager, win or lose.
pub const BET_FEE: u64 = 5;

/// Bet amounts must be a positive multiple of this unit.
pub const BET_UNIT: u64 = 100;

/// A winning wager is paid `amount * PAYOUT_MULTIPLIER`.
pub const PAYOUT_MULTIPLIER: u64 = 2;

/// Balance on first run and after a reset.
pub const DEFAULT_INITIAL_BALANCE: u64 = 10_000;

/// Maximum number of round records kept in history.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Speed mode is only offered for batches strictly longer than this.
pub const SPEED_MODE_MIN_ROUNDS: u32 = 10;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// The face a coin lands on, or the face a player backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoinSide {
    Heads,
    Tails,
}

impl CoinSide {
    /// Map a uniformly random 32-bit draw onto a face: even is heads.
    pub fn from_draw(value: u32) -> Self {
        if value % 2 == 0 {
            CoinSide::Heads
        } else {
            CoinSide::Tails
        }
    }
}

impl fmt::Display for CoinSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoinSide::Heads => write!(f, "heads"),
            CoinSide::Tails => write!(f, "tails"),
        }
    }
}

/// Parse a face from user input (case-insensitive, single letters allowed).
impl std::str::FromStr for CoinSide {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "heads" | "head" | "h" => Ok(CoinSide::Heads),
            "tails" | "tail" | "t" => Ok(CoinSide::Tails),
            _ => Err(anyhow::anyhow!("Unknown coin side: {s}")),
        }
    }
}

/// Which kind of play produced a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayMode {
    /// Free flip, no money at stake.
    Test,
    /// A single wager.
    Real,
    /// One round of a sequential batch of wagers.
    Continuous,
}

impl PlayMode {
    /// Whether rounds of this mode move money.
    pub fn is_wager(&self) -> bool {
        !matches!(self, PlayMode::Test)
    }
}

impl fmt::Display for PlayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayMode::Test => write!(f, "test"),
            PlayMode::Real => write!(f, "real"),
            PlayMode::Continuous => write!(f, "continuous"),
        }
    }
}

impl std::str::FromStr for PlayMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "test" => Ok(PlayMode::Test),
            "real" => Ok(PlayMode::Real),
            "continuous" | "batch" => Ok(PlayMode::Continuous),
            _ => Err(anyhow::anyhow!("Unknown play mode: {s}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Bet specification
// ---------------------------------------------------------------------------

/// A wager request: how much to stake and which face to back.
///
/// Construction is unchecked; the ledger validates before reserving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BetSpec {
    pub amount: u64,
    pub choice: CoinSide,
}

impl fmt::Display for BetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} on {} (fee ${}, cost ${}, pays ${})",
            self.amount,
            self.choice,
            self.fee(),
            self.total_cost(),
            self.payout(),
        )
    }
}

impl BetSpec {
    pub fn new(amount: u64, choice: CoinSide) -> Self {
        Self { amount, choice }
    }

    pub fn fee(&self) -> u64 {
        BET_FEE
    }

    /// Amount debited up front: stake plus fee.
    pub fn total_cost(&self) -> u64 {
        self.amount.saturating_add(BET_FEE)
    }

    /// Amount credited when the backed face comes up.
    pub fn payout(&self) -> u64 {
        self.amount.saturating_mul(PAYOUT_MULTIPLIER)
    }

    /// Whether the amount is a positive multiple of the bet unit.
    pub fn is_valid_amount(&self) -> bool {
        self.amount > 0 && self.amount % BET_UNIT == 0
    }
}

// ---------------------------------------------------------------------------
// Round record
// ---------------------------------------------------------------------------

/// One settled (or, for test flips, observed) round. Immutable once built.
///
/// Test rounds carry neither a choice nor a profit; every wager round
/// carries both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundRecord {
    mode: PlayMode,
    #[serde(rename = "result")]
    outcome: CoinSide,
    #[serde(default)]
    choice: Option<CoinSide>,
    #[serde(default)]
    profit: Option<i64>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    timestamp: DateTime<Utc>,
}

impl fmt::Display for RoundRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let choice = self.choice.map(|c| c.to_string()).unwrap_or_else(|| "-".into());
        let profit = match self.profit {
            Some(p) if p > 0 => format!("+${p}"),
            Some(p) if p < 0 => format!("-${}", p.unsigned_abs()),
            Some(_) => "$0".to_string(),
            None => "-".to_string(),
        };
        write!(
            f,
            "{} [{:<10}] result={:<5} choice={:<5} profit={}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.mode.to_string(),
            self.outcome.to_string(),
            choice,
            profit,
        )
    }
}

/// Current time at the precision records are stored with.
fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

impl RoundRecord {
    /// A free test flip.
    pub fn test(outcome: CoinSide) -> Self {
        Self {
            mode: PlayMode::Test,
            outcome,
            choice: None,
            profit: None,
            timestamp: now_millis(),
        }
    }

    /// A single settled wager.
    pub fn real(outcome: CoinSide, choice: CoinSide, profit: i64) -> Self {
        Self::wager(PlayMode::Real, outcome, choice, profit)
    }

    /// One settled round of a continuous batch.
    pub fn continuous(outcome: CoinSide, choice: CoinSide, profit: i64) -> Self {
        Self::wager(PlayMode::Continuous, outcome, choice, profit)
    }

    fn wager(mode: PlayMode, outcome: CoinSide, choice: CoinSide, profit: i64) -> Self {
        Self {
            mode,
            outcome,
            choice: Some(choice),
            profit: Some(profit),
            timestamp: now_millis(),
        }
    }

    pub fn mode(&self) -> PlayMode {
        self.mode
    }

    pub fn outcome(&self) -> CoinSide {
        self.outcome
    }

    pub fn choice(&self) -> Option<CoinSide> {
        self.choice
    }

    pub fn profit(&self) -> Option<i64> {
        self.profit
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether this round moved money.
    pub fn is_wager(&self) -> bool {
        self.mode.is_wager()
    }

    /// `Some(true)` for a winning wager, `Some(false)` for a losing one,
    /// `None` for test flips.
    pub fn is_win(&self) -> Option<bool> {
        self.profit.map(|p| p > 0)
    }

    /// Test rounds have no choice/profit; wager rounds have both, and the
    /// profit is one a valid bet could have settled to.
    pub fn is_well_formed(&self) -> bool {
        if self.mode.is_wager() {
            self.settled_stake().is_some()
        } else {
            self.choice.is_none() && self.profit.is_none()
        }
    }

    /// The stake implied by a wager's profit: `amount - fee` on a win,
    /// `-(amount + fee)` on a loss. `None` when no valid bet fits.
    fn settled_stake(&self) -> Option<u64> {
        let (choice, profit) = (self.choice?, self.profit?);
        let fee = BET_FEE as i64;
        let stake = if choice == self.outcome {
            profit.checked_add(fee)?
        } else {
            profit.checked_neg()?.checked_sub(fee)?
        };
        let amount = u64::try_from(stake).ok()?;
        BetSpec::new(amount, choice).is_valid_amount().then_some(amount)
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Durable projection of the game, in the persisted JSON shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub balance: u64,
    #[serde(default)]
    pub test_stats: ModeStats,
    #[serde(default)]
    pub real_stats: ModeStats,
    /// Newest first.
    #[serde(default)]
    pub history: Vec<RoundRecord>,
}

impl Snapshot {
    /// A brand-new game.
    pub fn fresh(initial_balance: u64) -> Self {
        Self {
            balance: initial_balance,
            test_stats: ModeStats::default(),
            real_stats: ModeStats::default(),
            history: Vec::new(),
        }
    }

    /// Repair a loaded snapshot so the in-memory invariants hold: drop
    /// malformed records, cap history (keeping the newest) and recompute
    /// round counters that disagree with their face counts.
    ///
    /// Returns the number of repairs made.
    pub fn sanitize(&mut self, history_capacity: usize) -> usize {
        let mut repairs = 0;

        let before = self.history.len();
        self.history.retain(RoundRecord::is_well_formed);
        repairs += before - self.history.len();

        let history_capacity = bounded_capacity(history_capacity);
        if self.history.len() > history_capacity {
            repairs += self.history.len() - history_capacity;
            self.history.truncate(history_capacity);
        }

        for stats in [&mut self.test_stats, &mut self.real_stats] {
            if !stats.is_consistent() {
                stats.repair();
                repairs += 1;
            }
        }

        repairs
    }
}

// ---------------------------------------------------------------------------
// Session notifications
// ---------------------------------------------------------------------------

/// Progress of a running continuous batch, emitted after every round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProgress {
    pub session_id: Uuid,
    pub current_round: u32,
    pub total_rounds: u32,
    pub net_profit: i64,
}

impl fmt::Display for SessionProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "round {}/{} net={:+}",
            self.current_round, self.total_rounds, self.net_profit,
        )
    }
}

/// How a finished batch turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchClassification {
    NetPositive,
    NetNegative,
    Even,
}

impl BatchClassification {
    pub fn from_net_profit(net_profit: i64) -> Self {
        match net_profit {
            p if p > 0 => BatchClassification::NetPositive,
            p if p < 0 => BatchClassification::NetNegative,
            _ => BatchClassification::Even,
        }
    }
}

impl fmt::Display for BatchClassification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchClassification::NetPositive => write!(f, "net gain"),
            BatchClassification::NetNegative => write!(f, "net loss"),
            BatchClassification::Even => write!(f, "break-even"),
        }
    }
}

/// Final report of a continuous batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub session_id: Uuid,
    pub rounds_played: u32,
    pub total_rounds: u32,
    pub net_profit: i64,
    pub classification: BatchClassification,
    /// The batch stopped early on request.
    pub cancelled: bool,
    pub balance_after: u64,
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} rounds | net {:+} ({}) | balance ${}{}",
            self.rounds_played,
            self.total_rounds,
            self.net_profit,
            self.classification,
            self.balance_after,
            if self.cancelled { " | cancelled" } else { "" },
        )
    }
}

/// Result of a run of free test flips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestSummary {
    pub rounds: u32,
    pub heads: u32,
    pub tails: u32,
}

impl fmt::Display for TestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} flips: {} heads / {} tails", self.rounds, self.heads, self.tails)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain errors. All are local and recoverable: the requested action
/// does not proceed and prior state is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    #[error("Invalid bet amount {amount}: must be a positive multiple of {BET_UNIT}")]
    InvalidBetAmount { amount: u64 },

    #[error("Insufficient funds: need ${needed}, have ${available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("Another {active} session is already running")]
    ReentrancyRejected { active: PlayMode },

    #[error("Invalid round count {requested}: must be between 1 and {max}")]
    InvalidRoundCount { requested: u32, max: u32 },

    #[error("Speed mode needs more than {SPEED_MODE_MIN_ROUNDS} rounds, got {rounds}")]
    SpeedModeUnavailable { rounds: u32 },

    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
