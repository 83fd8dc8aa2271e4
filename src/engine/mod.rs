//! Core engine: ledger, outcome source, history, stats and the session
//! controller that sequences them.

pub mod events;
pub mod history;
pub mod ledger;
pub mod outcome;
pub mod session;
pub mod stats;
