//! Streambet Backend Library
//!
//! Betting round settlement and wallet ledger engine for stream-attached
//! pari-mutuel betting. Exposes all modules for the binary and tests.

pub mod api;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;
pub mod notifier;
pub mod payout;
pub mod presence;
pub mod rounds;
pub mod settlement;
