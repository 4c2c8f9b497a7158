use crate::card::{hand_value, Card};
use crate::history::{HistoryPage, RoundHistory};
use crate::ledger::BalanceRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

pub type VenueId = Uuid;
pub type ParticipantId = Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
}

impl Participant {
    pub fn new(id: ParticipantId, name: impl Into<String>) -> Self {
        Participant { id, name: name.into() }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Phase {
    Lobby,
    Betting,
    Playing,
    Results,
}

impl Phase {
    /// Betting may fall back to the lobby when nobody is left to deal to.
    pub fn valid_transitions(&self) -> &'static [Phase] {
        match self {
            Phase::Lobby => &[Phase::Betting],
            Phase::Betting => &[Phase::Playing, Phase::Lobby],
            Phase::Playing => &[Phase::Results],
            Phase::Results => &[Phase::Lobby],
        }
    }

    pub fn can_transition_to(&self, target: Phase) -> bool {
        self.valid_transitions().contains(&target)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Action {
    Hit,
    Stand,
    Double,
    Split,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hand {
    pub cards: Vec<Card>,
    /// Already debited from the owner's balance.
    pub bet: i64,
    pub resolved: bool,
    /// Produced by a split; such a hand is never a natural.
    pub split: bool,
    /// Paid out as a natural when dealt.
    pub natural: bool,
}

impl Hand {
    pub fn new(cards: Vec<Card>, bet: i64) -> Self {
        Hand { cards, bet, resolved: false, split: false, natural: false }
    }

    pub fn value(&self) -> u32 {
        hand_value(&self.cards)
    }

    pub fn is_bust(&self) -> bool {
        self.value() > 21
    }

    pub fn is_natural(&self) -> bool {
        !self.split && self.cards.len() == 2 && self.value() == 21
    }

    /// Two cards of equal rank. Funds are checked separately.
    pub fn can_split(&self) -> bool {
        self.cards.len() == 2 && self.cards[0].same_rank(&self.cards[1])
    }

    pub fn can_double(&self, balance: i64) -> bool {
        self.cards.len() == 2 && balance >= self.bet
    }
}

/// A stake chosen during betting. `locked` once confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingBet {
    pub amount: i64,
    pub locked: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub participant: ParticipantId,
    pub hand_index: usize,
}

/// Everything one venue's table knows.
///
/// Seating and pending bets are written by the entry points; phase, turn,
/// hands and the dealer are written only by the round engine.
#[derive(Debug)]
pub struct TableState {
    pub phase: Phase,
    pub seated: Vec<Participant>,
    pub waiting: Vec<Participant>,
    pub pending_bets: HashMap<ParticipantId, PendingBet>,
    pub hands: HashMap<ParticipantId, Vec<Hand>>,
    pub dealer: Vec<Card>,
    pub dealer_hidden: bool,
    pub current_turn: Option<Turn>,
    pub round_net: HashMap<ParticipantId, i64>,
    pub history: RoundHistory,
}

impl TableState {
    pub fn new(history_capacity: usize) -> Self {
        TableState {
            phase: Phase::Lobby,
            seated: Vec::new(),
            waiting: Vec::new(),
            pending_bets: HashMap::new(),
            hands: HashMap::new(),
            dealer: Vec::new(),
            dealer_hidden: true,
            current_turn: None,
            round_net: HashMap::new(),
            history: RoundHistory::new(history_capacity),
        }
    }

    pub fn is_seated(&self, id: &ParticipantId) -> bool {
        self.seated.iter().any(|p| p.id == *id)
    }

    pub fn is_waiting(&self, id: &ParticipantId) -> bool {
        self.waiting.iter().any(|p| p.id == *id)
    }

    pub fn is_empty(&self) -> bool {
        self.seated.is_empty() && self.waiting.is_empty()
    }

    /// Moves to `target` if the phase cycle allows it.
    pub fn transition(&mut self, target: Phase) -> bool {
        if self.phase.can_transition_to(target) {
            self.phase = target;
            true
        } else {
            tracing::error!(
                "Invalid phase transition: {:?} -> {:?} (valid: {:?})",
                self.phase,
                target,
                self.phase.valid_transitions()
            );
            false
        }
    }

    /// Drops everything a round produced. Seating and history survive.
    pub fn clear_round(&mut self) {
        self.pending_bets.clear();
        self.hands.clear();
        self.dealer.clear();
        self.dealer_hidden = true;
        self.current_turn = None;
        self.round_net.clear();
    }

    pub fn is_current_turn(&self, id: &ParticipantId) -> bool {
        self.phase == Phase::Playing && self.current_turn.is_some_and(|t| t.participant == *id)
    }

    pub fn active_hand(&self) -> Option<&Hand> {
        let turn = self.current_turn?;
        self.hands.get(&turn.participant)?.get(turn.hand_index)
    }

    pub fn all_bets_locked(&self) -> bool {
        self.seated
            .iter()
            .all(|p| self.pending_bets.get(&p.id).is_some_and(|b| b.locked))
    }
}

// --- Display-ready views ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DealerView {
    /// Face-up cards only.
    pub cards: Vec<Card>,
    pub hidden_cards: usize,
    /// Present once nothing is hidden.
    pub total: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatView {
    pub participant: Participant,
    pub pending_bet: Option<PendingBet>,
    pub hands: Vec<Hand>,
    pub record: BalanceRecord,
    pub round_net: Option<i64>,
}

/// What the render hook gets to draw. Hidden dealer cards never leave the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSnapshot {
    pub venue: VenueId,
    pub phase: Phase,
    pub dealer: DealerView,
    pub seats: Vec<SeatView>,
    pub waiting: Vec<Participant>,
    pub current_turn: Option<Turn>,
    /// Actions the current turn holder may take right now.
    pub valid_actions: Vec<Action>,
    pub bet_options: Vec<i64>,
    pub history: Option<HistoryPage>,
    pub can_page_older: bool,
    pub can_page_newer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Blackjack,
    Win,
    Push,
    Loss,
    Bust,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultLine {
    pub participant: Participant,
    pub hand_index: usize,
    pub hand_count: usize,
    pub cards: Vec<Card>,
    pub total: u32,
    pub bet: i64,
    pub outcome: Outcome,
    /// The participant's net over the whole round.
    pub round_net: i64,
}

/// The end-of-round summary shown during RESULTS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundResults {
    pub dealer: Vec<Card>,
    pub dealer_total: u32,
    pub winners: Vec<ResultLine>,
    pub pushes: Vec<ResultLine>,
    pub losers: Vec<ResultLine>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::card::Rank::*;
    use crate::card::Suit::*;

    fn hand(cards: &[(crate::card::Rank, crate::card::Suit)], bet: i64) -> Hand {
        Hand::new(cards.iter().map(|&(r, s)| Card::new(r, s)).collect(), bet)
    }

    #[test]
    fn test_phase_cycle_is_strict() {
        assert!(Phase::Lobby.can_transition_to(Phase::Betting));
        assert!(Phase::Betting.can_transition_to(Phase::Playing));
        assert!(Phase::Playing.can_transition_to(Phase::Results));
        assert!(Phase::Results.can_transition_to(Phase::Lobby));
        assert!(!Phase::Lobby.can_transition_to(Phase::Playing));
        assert!(!Phase::Playing.can_transition_to(Phase::Lobby));
        assert!(!Phase::Results.can_transition_to(Phase::Betting));
    }

    #[test]
    fn test_invalid_transition_is_refused() {
        let mut state = TableState::new(20);
        assert!(!state.transition(Phase::Results));
        assert_eq!(state.phase, Phase::Lobby);
        assert!(state.transition(Phase::Betting));
    }

    #[test]
    fn test_split_eligibility() {
        assert!(hand(&[(Eight, Club), (Eight, Diamond)], 10).can_split());
        assert!(!hand(&[(King, Club), (Queen, Club)], 10).can_split());
        assert!(!hand(&[(Eight, Club), (Eight, Diamond), (Two, Heart)], 10).can_split());
        assert!(!hand(&[(Eight, Club)], 10).can_split());
    }

    #[test]
    fn test_double_eligibility() {
        let two = hand(&[(Five, Club), (Six, Diamond)], 10);
        assert!(two.can_double(10));
        assert!(!two.can_double(9));
        assert!(!hand(&[(Five, Club), (Six, Diamond), (Two, Heart)], 10).can_double(100));
    }

    #[test]
    fn test_natural_needs_unsplit_two_cards() {
        let mut natural = hand(&[(Ace, Spade), (King, Heart)], 20);
        assert!(natural.is_natural());
        natural.split = true;
        assert!(!natural.is_natural());
        assert!(!hand(&[(Seven, Spade), (Seven, Heart), (Seven, Club)], 20).is_natural());
    }
}
