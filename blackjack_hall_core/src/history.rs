use crate::card::Card;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Outcome lines shown per paged round.
pub const HISTORY_LINES_SHOWN: usize = 10;

/// One settled round as it is remembered for the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundLog {
    pub timestamp_ms: u64,
    pub dealer: Vec<Card>,
    pub dealer_total: u32,
    pub lines: Vec<String>,
}

/// What the history panel displays: one round, its position, and how many
/// outcome lines were cut off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPage {
    /// 0 is the newest round.
    pub index: usize,
    pub total: usize,
    pub round: RoundLog,
    pub hidden_lines: usize,
}

/// Newest-first ring buffer of settled rounds with a clamped page cursor.
#[derive(Debug, Clone)]
pub struct RoundHistory {
    rounds: VecDeque<RoundLog>,
    capacity: usize,
    page: usize,
}

impl RoundHistory {
    pub fn new(capacity: usize) -> Self {
        RoundHistory {
            rounds: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            page: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    pub fn page(&self) -> usize {
        self.page
    }

    /// Records a round and jumps back to it.
    pub fn push(&mut self, log: RoundLog) {
        self.rounds.push_front(log);
        self.rounds.truncate(self.capacity);
        self.page = 0;
    }

    /// One round further into the past.
    pub fn older(&mut self) -> usize {
        if !self.rounds.is_empty() {
            self.page = (self.page + 1).min(self.rounds.len() - 1);
        }
        self.page
    }

    /// One round closer to the present.
    pub fn newer(&mut self) -> usize {
        self.page = self.page.saturating_sub(1);
        self.page
    }

    pub fn can_go_older(&self) -> bool {
        !self.rounds.is_empty() && self.page < self.rounds.len() - 1
    }

    pub fn can_go_newer(&self) -> bool {
        !self.rounds.is_empty() && self.page > 0
    }

    pub fn current(&self) -> Option<HistoryPage> {
        if self.rounds.is_empty() {
            return None;
        }
        let index = self.page.min(self.rounds.len() - 1);
        let mut round = self.rounds.get(index)?.clone();
        let hidden_lines = round.lines.len().saturating_sub(HISTORY_LINES_SHOWN);
        round.lines.truncate(HISTORY_LINES_SHOWN);
        Some(HistoryPage { index, total: self.rounds.len(), round, hidden_lines })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(ts: u64, lines: usize) -> RoundLog {
        RoundLog {
            timestamp_ms: ts,
            dealer: vec![],
            dealer_total: 17,
            lines: (0..lines).map(|i| format!("line {}", i)).collect(),
        }
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut history = RoundHistory::new(3);
        for ts in 0..5 {
            history.push(log(ts, 1));
        }
        assert_eq!(history.len(), 3);
        assert_eq!(history.current().unwrap().round.timestamp_ms, 4);
        history.older();
        history.older();
        assert_eq!(history.current().unwrap().round.timestamp_ms, 2);
    }

    #[test]
    fn test_paging_is_clamped() {
        let mut history = RoundHistory::new(20);
        assert_eq!(history.older(), 0);
        assert_eq!(history.newer(), 0);
        assert!(history.current().is_none());

        history.push(log(1, 1));
        history.push(log(2, 1));
        assert!(!history.can_go_newer());
        assert!(history.can_go_older());
        assert_eq!(history.older(), 1);
        assert_eq!(history.older(), 1);
        assert!(!history.can_go_older());
        assert_eq!(history.newer(), 0);
        assert_eq!(history.newer(), 0);
    }

    #[test]
    fn test_new_round_resets_page() {
        let mut history = RoundHistory::new(20);
        history.push(log(1, 1));
        history.push(log(2, 1));
        history.older();
        history.push(log(3, 1));
        assert_eq!(history.page(), 0);
        assert_eq!(history.current().unwrap().round.timestamp_ms, 3);
    }

    #[test]
    fn test_page_truncates_lines() {
        let mut history = RoundHistory::new(20);
        history.push(log(1, 13));
        let page = history.current().unwrap();
        assert_eq!(page.round.lines.len(), HISTORY_LINES_SHOWN);
        assert_eq!(page.hidden_lines, 3);
        assert_eq!(page.total, 1);
    }
}
