//! Per-mode outcome counters.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::CoinSide;

/// Outcome counters for one bucket (test flips, or real + continuous
/// wagers). `rounds == heads + tails` after every update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeStats {
    pub rounds: u64,
    pub heads: u64,
    pub tails: u64,
}

impl fmt::Display for ModeStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rounds={} heads={} tails={}", self.rounds, self.heads, self.tails)?;
        if let Some(rate) = self.heads_rate() {
            write!(f, " ({:.1}% heads)", rate)?;
        }
        Ok(())
    }
}

impl ModeStats {
    /// Count one observed outcome.
    pub fn record(&mut self, outcome: CoinSide) {
        self.rounds += 1;
        match outcome {
            CoinSide::Heads => self.heads += 1,
            CoinSide::Tails => self.tails += 1,
        }
    }

    pub fn count(&self, side: CoinSide) -> u64 {
        match side {
            CoinSide::Heads => self.heads,
            CoinSide::Tails => self.tails,
        }
    }

    /// Share of heads as a percentage, or `None` before the first round.
    pub fn heads_rate(&self) -> Option<Decimal> {
        self.rate(CoinSide::Heads)
    }

    /// Share of `side` as a percentage rounded to one decimal place.
    pub fn rate(&self, side: CoinSide) -> Option<Decimal> {
        if self.rounds == 0 {
            return None;
        }
        let pct = Decimal::from(self.count(side)) * Decimal::ONE_HUNDRED / Decimal::from(self.rounds);
        Some(pct.round_dp(1))
    }

    pub fn is_consistent(&self) -> bool {
        self.heads.checked_add(self.tails) == Some(self.rounds)
    }

    /// Recompute `rounds` from the face counts.
    pub fn repair(&mut self) {
        self.rounds = self.heads.saturating_add(self.tails);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
