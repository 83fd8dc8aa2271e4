//! Recent-outcome trend over the latest wagers.

use serde::Serialize;
use std::fmt;

use crate::types::{CoinSide, RoundRecord};

/// Number of most recent wager rounds inspected.
pub const TREND_WINDOW: usize = 20;

/// A face must lead by more than this many rounds to count as a bias.
pub const TREND_BIAS_THRESHOLD: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendBias {
    Balanced,
    Heads,
    Tails,
}

impl fmt::Display for TrendBias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrendBias::Balanced => write!(f, "balanced"),
            TrendBias::Heads => write!(f, "leaning heads"),
            TrendBias::Tails => write!(f, "leaning tails"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trend {
    /// Outcomes in the window, oldest first.
    pub sample: Vec<CoinSide>,
    pub heads: u64,
    pub tails: u64,
    pub bias: TrendBias,
}

impl Trend {
    /// Build from a newest-first history; non-wager rounds are skipped.
    pub fn from_history<'a, I>(history: I) -> Self
    where
        I: IntoIterator<Item = &'a RoundRecord>,
    {
        let mut sample: Vec<CoinSide> = history
            .into_iter()
            .filter(|r| r.is_wager())
            .take(TREND_WINDOW)
            .map(RoundRecord::outcome)
            .collect();
        sample.reverse();

        let heads = sample.iter().filter(|s| **s == CoinSide::Heads).count() as u64;
        let tails = sample.len() as u64 - heads;

        let bias = if heads.abs_diff(tails) <= TREND_BIAS_THRESHOLD {
            TrendBias::Balanced
        } else if heads > tails {
            TrendBias::Heads
        } else {
            TrendBias::Tails
        };

        Self { sample, heads, tails, bias }
    }

    pub fn len(&self) -> usize {
        self.sample.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sample.is_empty()
    }
}
