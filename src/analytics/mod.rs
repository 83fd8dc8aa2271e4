//! Analytics over the round history.
//!
//! Nothing here is stored: every figure is recomputed from the bounded
//! history and the mode counters on demand.

pub mod trend;

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::engine::stats::ModeStats;
use crate::types::{CoinSide, RoundRecord};

pub use trend::{Trend, TrendBias};

// ---------------------------------------------------------------------------
// Win / loss
// ---------------------------------------------------------------------------

/// Wins and losses among wager rounds. The fee makes a zero-profit round
/// impossible, so every wager is one or the other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WinLoss {
    pub wins: u64,
    pub losses: u64,
}

impl WinLoss {
    pub fn from_history<'a, I>(history: I) -> Self
    where
        I: IntoIterator<Item = &'a RoundRecord>,
    {
        history
            .into_iter()
            .filter(|r| r.is_wager())
            .filter_map(RoundRecord::profit)
            .fold(Self::default(), |mut acc, profit| {
                if profit > 0 {
                    acc.wins += 1;
                } else if profit < 0 {
                    acc.losses += 1;
                }
                acc
            })
    }

    pub fn decided(&self) -> u64 {
        self.wins + self.losses
    }

    /// `wins / (wins + losses)`, zero when nothing has been decided.
    pub fn win_rate(&self) -> Decimal {
        match self.decided() {
            0 => Decimal::ZERO,
            n => Decimal::from(self.wins) / Decimal::from(n),
        }
    }

    /// Win rate as a percentage with one decimal place.
    pub fn win_rate_pct(&self) -> Decimal {
        (self.win_rate() * Decimal::ONE_HUNDRED).round_dp(1)
    }
}

// ---------------------------------------------------------------------------
// Profit
// ---------------------------------------------------------------------------

/// Profit figures over every round that carries a profit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProfitStats {
    pub rounds: u64,
    pub total: i64,
    /// Mean profit per round, two decimal places.
    pub average: Option<Decimal>,
    /// Largest positive profit.
    pub max_gain: Option<i64>,
    /// Most negative profit.
    pub max_loss: Option<i64>,
}

impl ProfitStats {
    pub fn from_history<'a, I>(history: I) -> Self
    where
        I: IntoIterator<Item = &'a RoundRecord>,
    {
        let mut stats = Self::default();
        for profit in history.into_iter().filter_map(RoundRecord::profit) {
            stats.rounds += 1;
            stats.total = stats.total.saturating_add(profit);
            if profit > 0 {
                stats.max_gain = Some(stats.max_gain.map_or(profit, |g| g.max(profit)));
            } else if profit < 0 {
                stats.max_loss = Some(stats.max_loss.map_or(profit, |l| l.min(profit)));
            }
        }
        if stats.rounds > 0 {
            let avg = Decimal::from(stats.total) / Decimal::from(stats.rounds);
            stats.average = Some(avg.round_dp(2));
        }
        stats
    }
}

// ---------------------------------------------------------------------------
// Observed odds
// ---------------------------------------------------------------------------

/// Which counters the observed odds were taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OddsBasis {
    /// Real and continuous wagers.
    Wagers,
    /// Test flips only (no wagers yet).
    TestFlips,
    /// No rounds at all; fair-coin prior.
    Prior,
}

impl fmt::Display for OddsBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OddsBasis::Wagers => write!(f, "wagers"),
            OddsBasis::TestFlips => write!(f, "test flips"),
            OddsBasis::Prior => write!(f, "prior"),
        }
    }
}

/// Observed heads/tails percentages, preferring wager data over test data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ObservedOdds {
    pub heads_pct: Decimal,
    pub tails_pct: Decimal,
    pub basis: OddsBasis,
}

impl ObservedOdds {
    pub fn from_stats(test: &ModeStats, real: &ModeStats) -> Self {
        let (stats, basis) = if real.rounds > 0 {
            (real, OddsBasis::Wagers)
        } else if test.rounds > 0 {
            (test, OddsBasis::TestFlips)
        } else {
            let half = Decimal::from(50);
            return Self {
                heads_pct: half,
                tails_pct: half,
                basis: OddsBasis::Prior,
            };
        };

        Self {
            heads_pct: stats.rate(CoinSide::Heads).unwrap_or_default(),
            tails_pct: stats.rate(CoinSide::Tails).unwrap_or_default(),
            basis,
        }
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Everything a front end shows in its statistics panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnalyticsReport {
    pub win_loss: WinLoss,
    pub profit: ProfitStats,
    pub trend: Trend,
    pub odds: ObservedOdds,
    pub test_stats: ModeStats,
    pub real_stats: ModeStats,
}

impl AnalyticsReport {
    /// Compute from a newest-first history and the two stats buckets.
    pub fn compute(history: &[RoundRecord], test: &ModeStats, real: &ModeStats) -> Self {
        Self {
            win_loss: WinLoss::from_history(history),
            profit: ProfitStats::from_history(history),
            trend: Trend::from_history(history),
            odds: ObservedOdds::from_stats(test, real),
            test_stats: *test,
            real_stats: *real,
        }
    }
}

fn or_dash<T: fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

impl fmt::Display for AnalyticsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Test flips : {}", self.test_stats)?;
        writeln!(f, "Wagers     : {}", self.real_stats)?;
        writeln!(
            f,
            "Odds       : heads {}% / tails {}% ({})",
            self.odds.heads_pct, self.odds.tails_pct, self.odds.basis,
        )?;
        writeln!(
            f,
            "Win/loss   : {}W / {}L ({}%)",
            self.win_loss.wins,
            self.win_loss.losses,
            self.win_loss.win_rate_pct(),
        )?;
        writeln!(
            f,
            "Profit     : total {:+} | avg {} | best {} | worst {}",
            self.profit.total,
            or_dash(self.profit.average),
            or_dash(self.profit.max_gain),
            or_dash(self.profit.max_loss),
        )?;
        write!(
            f,
            "Trend      : last {} wagers {}H / {}T, {}",
            self.trend.len(),
            self.trend.heads,
            self.trend.tails,
            self.trend.bias,
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
