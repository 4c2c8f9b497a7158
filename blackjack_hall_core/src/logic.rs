use crate::card::{format_cards, hand_value, Card, CardSource};
use crate::config::TableConfig;
use crate::error::TableError;
use crate::history::RoundLog;
use crate::ledger::{current_timestamp_ms, EntryKind, Ledger};
use crate::state::*;
use std::collections::HashMap;

// --- Seating and betting (entry points) ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    AlreadyPresent,
    Seated,
    /// Joined during betting; a default stake was staged for them.
    SeatedWithDefaultBet,
    /// A round is under way; seated at the next betting phase.
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub was_present: bool,
    pub held_turn: bool,
}

/// Seats a participant or parks them in `waiting`.
///
/// Idempotent. The ledger account is created on first sight.
pub fn seat_participant(
    state: &mut TableState,
    ledger: &Ledger,
    config: &TableConfig,
    participant: Participant,
) -> JoinOutcome {
    ledger.ensure_account(participant.id);

    if state.is_seated(&participant.id) || state.is_waiting(&participant.id) {
        return JoinOutcome::AlreadyPresent;
    }

    match state.phase {
        Phase::Betting => {
            let staged = ledger.balance(&participant.id) >= config.default_bet;
            if staged {
                state
                    .pending_bets
                    .insert(participant.id, PendingBet { amount: config.default_bet, locked: false });
            }
            state.seated.push(participant);
            if staged { JoinOutcome::SeatedWithDefaultBet } else { JoinOutcome::Seated }
        }
        Phase::Playing | Phase::Results => {
            state.waiting.push(participant);
            JoinOutcome::Waiting
        }
        Phase::Lobby => {
            state.seated.push(participant);
            JoinOutcome::Seated
        }
    }
}

/// Removes a participant from both seating sets.
///
/// Their hands stay where they are until the engine notices the departure and
/// discards them; the engine alone touches hands.
pub fn unseat_participant(state: &mut TableState, id: &ParticipantId) -> LeaveOutcome {
    let before = state.seated.len() + state.waiting.len();
    state.seated.retain(|p| p.id != *id);
    state.waiting.retain(|p| p.id != *id);
    state.pending_bets.remove(id);
    LeaveOutcome {
        was_present: state.seated.len() + state.waiting.len() != before,
        held_turn: state.current_turn.is_some_and(|t| t.participant == *id),
    }
}

fn check_betting(state: &TableState, id: &ParticipantId) -> Result<(), TableError> {
    if state.phase != Phase::Betting {
        return Err(TableError::InvalidAction);
    }
    if !state.is_seated(id) {
        return Err(TableError::NotSeated);
    }
    Ok(())
}

/// Stages a stake. Only configured stakes the participant can cover are accepted.
pub fn place_bet(
    state: &mut TableState,
    ledger: &Ledger,
    config: &TableConfig,
    id: ParticipantId,
    amount: i64,
) -> Result<PendingBet, TableError> {
    check_betting(state, &id)?;
    if state.pending_bets.get(&id).is_some_and(|b| b.locked) {
        return Err(TableError::InvalidAction);
    }
    if !config.is_stake(amount) {
        return Err(TableError::InvalidBetAmount(amount));
    }
    let available = ledger.balance(&id);
    if available < amount {
        return Err(TableError::InsufficientFunds { required: amount, available });
    }
    let bet = PendingBet { amount, locked: false };
    state.pending_bets.insert(id, bet);
    Ok(bet)
}

pub fn clear_bet(state: &mut TableState, id: ParticipantId) -> Result<(), TableError> {
    check_betting(state, &id)?;
    match state.pending_bets.get(&id) {
        Some(bet) if bet.locked => Err(TableError::InvalidAction),
        _ => {
            state.pending_bets.remove(&id);
            Ok(())
        }
    }
}

/// Locks the staged stake, or the default stake when none was staged.
pub fn confirm_bet(
    state: &mut TableState,
    ledger: &Ledger,
    config: &TableConfig,
    id: ParticipantId,
) -> Result<PendingBet, TableError> {
    check_betting(state, &id)?;
    let amount = state.pending_bets.get(&id).map_or(config.default_bet, |b| b.amount);
    let available = ledger.balance(&id);
    if available < amount {
        return Err(TableError::InsufficientFunds { required: amount, available });
    }
    let bet = PendingBet { amount, locked: true };
    state.pending_bets.insert(id, bet);
    Ok(bet)
}

// --- Round progression (engine only) ---
//
// Ledger writes from here on are deferred. The engine calls `Ledger::persist`
// after releasing the table lock.

/// Starts a round: waiting participants take their seats and the previous
/// round's leftovers are cleared.
pub fn begin_betting(state: &mut TableState) -> bool {
    if !state.transition(Phase::Betting) {
        return false;
    }
    let waiting = std::mem::take(&mut state.waiting);
    for participant in waiting {
        if !state.is_seated(&participant.id) {
            state.seated.push(participant);
        }
    }
    state.clear_round();
    true
}

/// Back to the lobby without dealing, used when nobody is seated at deal time.
pub fn abandon_round(state: &mut TableState) {
    state.transition(Phase::Lobby);
    state.clear_round();
}

/// Deals the dealer and every seated participant, debiting their stakes.
///
/// Participants without a staged bet get the default stake. Anyone who cannot
/// cover their stake leaves the table and is returned.
pub fn deal_round(
    state: &mut TableState,
    ledger: &Ledger,
    config: &TableConfig,
    source: &mut dyn CardSource,
) -> Vec<Participant> {
    state.transition(Phase::Playing);
    state.current_turn = None;
    state.dealer = vec![source.draw(), source.draw()];
    state.dealer_hidden = true;

    let mut dropped = Vec::new();
    for participant in state.seated.clone() {
        let stake = state
            .pending_bets
            .get(&participant.id)
            .map_or(config.default_bet, |b| b.amount);

        match ledger.debit_deferred(participant.id, stake, EntryKind::Bet) {
            Ok(_) => {
                let cards = vec![source.draw(), source.draw()];
                state.hands.insert(participant.id, vec![Hand::new(cards, stake)]);
            }
            Err(_) => dropped.push(participant),
        }
    }

    state.seated.retain(|p| !dropped.iter().any(|d| d.id == p.id));
    state.pending_bets.clear();
    dropped
}

/// What a natural pays back, stake included: 2.5x rounded half-up.
pub fn natural_payout(bet: i64) -> i64 {
    (bet * 5 + 1) / 2
}

/// Pays a natural on the participant's only, unsplit hand the moment it is
/// dealt. Returns the amount credited.
pub fn pay_natural(state: &mut TableState, ledger: &Ledger, id: &ParticipantId) -> Option<i64> {
    let hands = state.hands.get_mut(id)?;
    if hands.len() != 1 {
        return None;
    }
    let hand = &mut hands[0];
    if hand.resolved || !hand.is_natural() {
        return None;
    }
    let payout = natural_payout(hand.bet);
    hand.natural = true;
    hand.resolved = true;
    ledger.apply_result_deferred(*id, EntryKind::WinBlackjack, payout);
    Some(payout)
}

/// Marks a busted hand resolved. Returns true when it was bust.
pub fn resolve_if_bust(state: &mut TableState, id: &ParticipantId, index: usize) -> bool {
    match state.hands.get_mut(id).and_then(|h| h.get_mut(index)) {
        Some(hand) if hand.is_bust() => {
            hand.resolved = true;
            true
        }
        _ => false,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The same hand keeps the turn.
    Continue,
    Resolved,
}

/// Applies one action to the hand holding the turn.
pub fn apply_action(
    state: &mut TableState,
    ledger: &Ledger,
    source: &mut dyn CardSource,
    id: ParticipantId,
    action: Action,
) -> Result<Step, TableError> {
    if !state.is_current_turn(&id) {
        return Err(TableError::InvalidAction);
    }
    let index = state.current_turn.map_or(0, |t| t.hand_index);
    let hands = state.hands.get_mut(&id).ok_or(TableError::InvalidAction)?;
    let hand = hands.get_mut(index).ok_or(TableError::InvalidAction)?;
    if hand.resolved {
        return Err(TableError::InvalidAction);
    }

    match action {
        Action::Hit => {
            hand.cards.push(source.draw());
            if hand.is_bust() {
                hand.resolved = true;
                Ok(Step::Resolved)
            } else {
                Ok(Step::Continue)
            }
        }
        Action::Stand => {
            hand.resolved = true;
            Ok(Step::Resolved)
        }
        Action::Double => {
            if hand.cards.len() != 2 {
                return Err(TableError::InvalidAction);
            }
            let available = ledger.balance(&id);
            if !hand.can_double(available) {
                return Err(TableError::InsufficientFunds { required: hand.bet, available });
            }
            ledger.debit_deferred(id, hand.bet, EntryKind::DoubleBet)?;
            hand.bet *= 2;
            hand.cards.push(source.draw());
            hand.resolved = true;
            Ok(Step::Resolved)
        }
        Action::Split => {
            if !hand.can_split() {
                return Err(TableError::InvalidAction);
            }
            ledger.debit_deferred(id, hand.bet, EntryKind::SplitBet)?;
            let second_card = hand.cards.pop().ok_or(TableError::InvalidAction)?;
            hand.cards.push(source.draw());
            hand.split = true;
            let mut second = Hand::new(vec![second_card, source.draw()], hand.bet);
            second.split = true;
            hands.insert(index + 1, second);
            Ok(Step::Continue)
        }
    }
}

/// Actions the turn holder could take on the active hand.
pub fn valid_actions(state: &TableState, ledger: &Ledger) -> Vec<Action> {
    let (Some(turn), Some(hand)) = (state.current_turn, state.active_hand()) else {
        return vec![];
    };
    if state.phase != Phase::Playing || hand.resolved {
        return vec![];
    }
    let balance = ledger.balance(&turn.participant);
    let mut actions = vec![Action::Hit, Action::Stand];
    if hand.can_double(balance) {
        actions.push(Action::Double);
    }
    if hand.can_split() && balance >= hand.bet {
        actions.push(Action::Split);
    }
    actions
}

pub fn dealer_should_hit(dealer: &[Card]) -> bool {
    hand_value(dealer) < 17
}

// --- Settlement ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub participant: ParticipantId,
    pub hand_index: usize,
    pub outcome: Outcome,
    /// Credited at settlement. Naturals were paid at deal time and credit 0 here.
    pub payout: i64,
    /// Display-only net of the hand, stake included.
    pub net: i64,
}

/// Outcome and settlement-time payout of one hand against a finished dealer.
pub fn settle_hand(hand: &Hand, dealer_total: u32) -> (Outcome, i64) {
    let total = hand.value();
    if hand.natural {
        (Outcome::Blackjack, 0)
    } else if total > 21 {
        (Outcome::Bust, 0)
    } else if dealer_total > 21 || total > dealer_total {
        (Outcome::Win, hand.bet * 2)
    } else if total == dealer_total {
        (Outcome::Push, hand.bet)
    } else {
        (Outcome::Loss, 0)
    }
}

/// Pure settlement of every listed hand. Running it twice on the same input
/// gives the same answer.
pub fn settle(hands: &[(ParticipantId, Vec<Hand>)], dealer: &[Card]) -> Vec<Settlement> {
    let dealer_total = hand_value(dealer);
    let mut settlements = Vec::new();
    for (participant, player_hands) in hands {
        for (hand_index, hand) in player_hands.iter().enumerate() {
            let (outcome, payout) = settle_hand(hand, dealer_total);
            let net = match outcome {
                Outcome::Blackjack => natural_payout(hand.bet) - hand.bet,
                Outcome::Win => hand.bet,
                Outcome::Push => 0,
                Outcome::Loss | Outcome::Bust => -hand.bet,
            };
            settlements.push(Settlement {
                participant: *participant,
                hand_index,
                outcome,
                payout,
                net,
            });
        }
    }
    settlements
}

/// Hands of everyone still seated, in seating order.
pub fn seated_hands(state: &TableState) -> Vec<(ParticipantId, Vec<Hand>)> {
    state
        .seated
        .iter()
        .filter_map(|p| state.hands.get(&p.id).map(|h| (p.id, h.clone())))
        .collect()
}

fn outcome_label(outcome: Outcome) -> &'static str {
    match outcome {
        Outcome::Blackjack => "BLACKJACK",
        Outcome::Win => "WIN",
        Outcome::Push => "PUSH",
        Outcome::Loss => "LOSS",
        Outcome::Bust => "LOSS (bust)",
    }
}

/// Credits the ledger, accumulates round nets, records the round in the
/// venue history and builds the results summary.
pub fn apply_settlement(
    state: &mut TableState,
    ledger: &Ledger,
    settlements: &[Settlement],
) -> RoundResults {
    for s in settlements {
        match s.outcome {
            Outcome::Blackjack => {}
            Outcome::Win => {
                ledger.apply_result_deferred(s.participant, EntryKind::Win, s.payout);
            }
            Outcome::Push => {
                ledger.apply_result_deferred(s.participant, EntryKind::Push, s.payout);
            }
            Outcome::Loss => {
                ledger.apply_result_deferred(s.participant, EntryKind::Loss, 0);
            }
            Outcome::Bust => {
                ledger.apply_result_deferred(s.participant, EntryKind::LossBust, 0);
            }
        }
        *state.round_net.entry(s.participant).or_insert(0) += s.net;
    }

    let names: HashMap<ParticipantId, &Participant> = state.seated.iter().map(|p| (p.id, p)).collect();
    let dealer_total = hand_value(&state.dealer);
    let mut results = RoundResults {
        dealer: state.dealer.clone(),
        dealer_total,
        winners: vec![],
        pushes: vec![],
        losers: vec![],
    };
    let mut lines = Vec::new();

    for s in settlements {
        let (Some(participant), Some(hands)) = (names.get(&s.participant), state.hands.get(&s.participant)) else {
            continue;
        };
        let Some(hand) = hands.get(s.hand_index) else { continue };
        let label = if hands.len() > 1 {
            format!("{} (H{})", participant.name, s.hand_index + 1)
        } else {
            participant.name.clone()
        };
        lines.push(format!(
            "{}: {} ({}), bet ${} -> {}",
            label,
            format_cards(&hand.cards),
            hand.value(),
            hand.bet,
            outcome_label(s.outcome)
        ));

        let line = ResultLine {
            participant: (*participant).clone(),
            hand_index: s.hand_index,
            hand_count: hands.len(),
            cards: hand.cards.clone(),
            total: hand.value(),
            bet: hand.bet,
            outcome: s.outcome,
            round_net: state.round_net.get(&s.participant).copied().unwrap_or(0),
        };
        match s.outcome {
            Outcome::Blackjack | Outcome::Win => results.winners.push(line),
            Outcome::Push => results.pushes.push(line),
            Outcome::Loss | Outcome::Bust => results.losers.push(line),
        }
    }

    state.history.push(RoundLog {
        timestamp_ms: current_timestamp_ms(),
        dealer: state.dealer.clone(),
        dealer_total,
        lines,
    });
    results
}

/// RESULTS -> LOBBY. Hands stay visible until the next round starts.
pub fn finish_round(state: &mut TableState) {
    state.transition(Phase::Lobby);
    state.current_turn = None;
}

// --- Rendering ---

pub fn build_snapshot(
    venue: VenueId,
    state: &TableState,
    ledger: &Ledger,
    config: &TableConfig,
) -> TableSnapshot {
    let dealer = if state.dealer_hidden && !state.dealer.is_empty() {
        DealerView {
            cards: state.dealer[..1].to_vec(),
            hidden_cards: state.dealer.len() - 1,
            total: None,
        }
    } else {
        DealerView {
            cards: state.dealer.clone(),
            hidden_cards: 0,
            total: (!state.dealer.is_empty()).then(|| hand_value(&state.dealer)),
        }
    };

    let seats = state
        .seated
        .iter()
        .map(|p| SeatView {
            participant: p.clone(),
            pending_bet: state.pending_bets.get(&p.id).copied(),
            hands: state.hands.get(&p.id).cloned().unwrap_or_default(),
            record: ledger.record(&p.id),
            round_net: state.round_net.get(&p.id).copied(),
        })
        .collect();

    TableSnapshot {
        venue,
        phase: state.phase,
        dealer,
        seats,
        waiting: state.waiting.clone(),
        current_turn: state.current_turn,
        valid_actions: valid_actions(state, ledger),
        bet_options: config.bet_options.clone(),
        history: state.history.current(),
        can_page_older: state.history.can_go_older(),
        can_page_newer: state.history.can_go_newer(),
    }
}

// --- Unit tests ---
