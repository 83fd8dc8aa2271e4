//! Ledger: balance bookkeeping and bet settlement.
//!
//! A wager debits its full cost (stake + fee) before the outcome is drawn,
//! so the balance can never go negative whatever the outcome. Settlement
//! then credits the payout on a win and nothing on a loss.

use tracing::{debug, warn};

use crate::types::{BetSpec, CoinSide, GameError};

// ---------------------------------------------------------------------------
// Reservation & settlement
// ---------------------------------------------------------------------------

/// Funds already debited for one wager, awaiting its outcome.
///
/// Only `Ledger::reserve` creates one and only `Ledger::settle` consumes it.
#[derive(Debug)]
#[must_use = "a reservation holds debited funds until it is settled"]
pub struct Reservation {
    bet: BetSpec,
}

impl Reservation {
    /// Amount debited when this reservation was made.
    pub fn cost(&self) -> u64 {
        self.bet.total_cost()
    }
}

/// Result of settling one reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub outcome: CoinSide,
    pub won: bool,
    /// Amount credited back (payout on a win, zero on a loss).
    pub credited: u64,
    /// `credited - total_cost`.
    pub profit: i64,
    pub balance_after: u64,
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    balance: u64,
}

impl Ledger {
    pub fn new(balance: u64) -> Self {
        Self { balance }
    }

    pub fn balance(&self) -> u64 {
        self.balance
    }

    /// Reject amounts that are not a positive multiple of the bet unit.
    /// Never coerces.
    pub fn validate(&self, bet: &BetSpec) -> Result<(), GameError> {
        if bet.is_valid_amount() {
            Ok(())
        } else {
            warn!(amount = bet.amount, "Rejected invalid bet amount");
            Err(GameError::InvalidBetAmount { amount: bet.amount })
        }
    }

    /// Whole wagers of this size the current balance can cover.
    pub fn max_rounds(&self, bet: &BetSpec) -> u64 {
        self.balance / bet.total_cost().max(1)
    }

    /// Check that `rounds` consecutive wagers are affordable up front.
    pub fn ensure_covers(&self, bet: &BetSpec, rounds: u64) -> Result<(), GameError> {
        if rounds <= self.max_rounds(bet) {
            return Ok(());
        }
        Err(GameError::InsufficientFunds {
            needed: bet.total_cost().saturating_mul(rounds),
            available: self.balance,
        })
    }

    /// Validate and debit the full cost of a wager.
    pub fn reserve(&mut self, bet: &BetSpec) -> Result<Reservation, GameError> {
        self.validate(bet)?;

        let cost = bet.total_cost();
        if self.balance < cost {
            return Err(GameError::InsufficientFunds {
                needed: cost,
                available: self.balance,
            });
        }

        self.balance -= cost;
        debug!(cost, balance = self.balance, "Funds reserved");
        Ok(Reservation { bet: *bet })
    }

    /// Settle a reservation against the drawn outcome.
    pub fn settle(&mut self, reservation: Reservation, outcome: CoinSide) -> Settlement {
        let bet = reservation.bet;
        let won = outcome == bet.choice;
        let credited = if won { bet.payout() } else { 0 };

        self.balance = self.balance.saturating_add(credited);
        let cost = bet.total_cost();
        let profit = if won {
            to_signed(credited.saturating_sub(cost))
        } else {
            -to_signed(cost)
        };

        debug!(
            %outcome,
            choice = %bet.choice,
            profit,
            balance = self.balance,
            "Reservation settled"
        );

        Settlement {
            outcome,
            won,
            credited,
            profit,
            balance_after: self.balance,
        }
    }

    /// Give back the cost of a reservation whose round was abandoned
    /// before settlement.
    pub fn refund(&mut self, cost: u64) {
        self.balance = self.balance.saturating_add(cost);
        debug!(cost, balance = self.balance, "Reservation refunded");
    }

    /// Overwrite the balance (reset or restore).
    pub fn reset(&mut self, balance: u64) {
        self.balance = balance;
    }
}

/// Clamp an unsigned amount into the signed profit range.
fn to_signed(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
