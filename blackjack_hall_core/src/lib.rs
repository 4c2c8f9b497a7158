//! # Blackjack hall core
//!
//! Multiplayer blackjack tables, one per venue. Each table runs its own round
//! engine (betting, dealing, turns with a timeout, dealer play, settlement)
//! on a tokio task, keeps a persistent balance ledger shared by all tables,
//! and tears itself down after sitting empty for a grace period.
//!
//! Rendering and persistence are left to the embedding application through
//! [`TableObserver`] and [`LedgerStore`].

mod card;
mod config;
mod error;
mod history;
mod ledger;
mod logic;
mod message;
mod registry;
mod state;
mod table;

pub use card::*;
pub use config::*;
pub use error::*;
pub use history::*;
pub use ledger::*;

pub use logic::{natural_payout, settle, settle_hand, JoinOutcome, Settlement};
pub use message::*;
pub use registry::*;

pub use state::*;
pub use table::*;
