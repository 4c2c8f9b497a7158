//! Table tuning knobs.
//!
//! Every field has a default, so a partial TOML/JSON document is enough to
//! override just the values you care about.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Balance given to a participant the first time they are seen.
    pub start_balance: i64,
    /// The only stakes `place_bet` accepts.
    pub bet_options: Vec<i64>,
    /// Stake used when a seated participant never chose one.
    pub default_bet: i64,
    pub buy_in_amount: i64,
    /// Buy-in is refused at or above this balance.
    pub buy_in_threshold: i64,

    pub betting_window_ms: u64,
    pub turn_timeout_ms: u64,
    pub dealer_reveal_delay_ms: u64,
    pub dealer_draw_delay_ms: u64,
    pub results_pause_ms: u64,
    pub round_cooldown_ms: u64,
    pub idle_close_ms: u64,
    pub idle_poll_ms: u64,

    pub history_capacity: usize,
    pub ledger_capacity: usize,
    pub mailbox_capacity: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            start_balance: 100,
            bet_options: vec![5, 10, 25, 50, 100, 500, 1000],
            default_bet: 5,
            buy_in_amount: 100,
            buy_in_threshold: 50,
            betting_window_ms: 20_000,
            turn_timeout_ms: 45_000,
            dealer_reveal_delay_ms: 800,
            dealer_draw_delay_ms: 700,
            results_pause_ms: 8_000,
            round_cooldown_ms: 800,
            idle_close_ms: 5_000,
            idle_poll_ms: 100,
            history_capacity: 20,
            ledger_capacity: 100,
            mailbox_capacity: 16,
        }
    }
}

impl TableConfig {
    pub fn is_stake(&self, amount: i64) -> bool {
        self.bet_options.contains(&amount)
    }

    pub fn betting_window(&self) -> Duration {
        Duration::from_millis(self.betting_window_ms)
    }

    pub fn turn_timeout(&self) -> Duration {
        Duration::from_millis(self.turn_timeout_ms)
    }

    pub fn dealer_reveal_delay(&self) -> Duration {
        Duration::from_millis(self.dealer_reveal_delay_ms)
    }

    pub fn dealer_draw_delay(&self) -> Duration {
        Duration::from_millis(self.dealer_draw_delay_ms)
    }

    pub fn results_pause(&self) -> Duration {
        Duration::from_millis(self.results_pause_ms)
    }

    pub fn round_cooldown(&self) -> Duration {
        Duration::from_millis(self.round_cooldown_ms)
    }

    pub fn idle_close(&self) -> Duration {
        Duration::from_millis(self.idle_close_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_document_keeps_defaults() {
        let cfg: TableConfig = serde_json::from_str(r#"{ "turn_timeout_ms": 1000, "default_bet": 10 }"#).unwrap();
        assert_eq!(cfg.turn_timeout(), Duration::from_secs(1));
        assert_eq!(cfg.default_bet, 10);
        assert_eq!(cfg.betting_window(), Duration::from_secs(20));
        assert_eq!(cfg.history_capacity, 20);
    }

    #[test]
    fn test_stakes() {
        let cfg = TableConfig::default();
        assert!(cfg.is_stake(25));
        assert!(!cfg.is_stake(7));
    }
}
