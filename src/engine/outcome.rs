//! Coin outcome source.
//!
//! Every mode draws from the same source; modes differ only in whether
//! the ledger is touched and which stats bucket is updated.

use rand::rngs::OsRng;
use rand::RngCore;

use crate::types::CoinSide;

/// Produces one unbiased coin outcome per call.
pub trait OutcomeSource: Send + Sync {
    fn next_outcome(&self) -> CoinSide;
}

/// Outcome source backed by the operating system's CSPRNG.
///
/// Draws a uniformly random `u32` and maps it onto a face by parity.
/// There is deliberately no seed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SecureRandomSource;

impl SecureRandomSource {
    pub fn new() -> Self {
        Self
    }
}

impl OutcomeSource for SecureRandomSource {
    fn next_outcome(&self) -> CoinSide {
        CoinSide::from_draw(OsRng.next_u32())
    }
}
