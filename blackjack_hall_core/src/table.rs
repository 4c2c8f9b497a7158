//! One venue's table and the worker that drives its rounds.
//!
//! Lock order, strictly: worker slot -> state -> card source -> ledger.
//! No lock is held across an `.await`, and the observer is never called while
//! `state` is locked.

use crate::card::CardSource;
use crate::config::TableConfig;
use crate::error::TableError;
use crate::ledger::{BalanceRecord, Ledger, LedgerEntry};
use crate::logic::*;
use crate::state::*;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

/// Something the external layer may want to show.
#[derive(Debug, Clone)]
pub enum TableEvent {
    Updated(TableSnapshot),
    /// `to: None` is for everyone at the venue.
    Notice { to: Option<ParticipantId>, message: String },
    RoundResults(RoundResults),
    /// The idle table was torn down; remove whatever was rendered for it.
    Closed,
}

/// Render/notify hook. Called from the engine, so implementations must not block.
pub trait TableObserver: Send + Sync {
    fn on_event(&self, venue: VenueId, event: TableEvent);
}

pub struct NoopObserver;

impl TableObserver for NoopObserver {
    fn on_event(&self, _venue: VenueId, _event: TableEvent) {}
}

// Producers write through `tx`; only the engine locks `rx`.
struct Mailbox {
    tx: mpsc::Sender<Action>,
    rx: Arc<AsyncMutex<mpsc::Receiver<Action>>>,
}

impl Mailbox {
    fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Mailbox { tx, rx: Arc::new(AsyncMutex::new(rx)) }
    }
}

enum HandStart {
    /// Participant gone or no hand at this index.
    Done,
    Skip,
    Natural(i64),
    Play,
}

pub struct Table {
    venue: VenueId,
    config: Arc<TableConfig>,
    ledger: Arc<Ledger>,
    observer: Arc<dyn TableObserver>,
    state: Mutex<TableState>,
    source: Mutex<Box<dyn CardSource>>,
    mailboxes: DashMap<ParticipantId, Mailbox>,
    wakeup: Notify,
    worker: Mutex<Option<JoinHandle<()>>>,
    idle_close: Mutex<Option<JoinHandle<()>>>,
}

impl Table {
    pub fn new(
        venue: VenueId,
        config: Arc<TableConfig>,
        ledger: Arc<Ledger>,
        observer: Arc<dyn TableObserver>,
        source: Box<dyn CardSource>,
    ) -> Arc<Self> {
        Arc::new(Table {
            venue,
            state: Mutex::new(TableState::new(config.history_capacity)),
            config,
            ledger,
            observer,
            source: Mutex::new(source),
            mailboxes: DashMap::new(),
            wakeup: Notify::new(),
            worker: Mutex::new(None),
            idle_close: Mutex::new(None),
        })
    }

    pub fn venue(&self) -> VenueId {
        self.venue
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn snapshot(&self) -> TableSnapshot {
        let state = self.state.lock();
        build_snapshot(self.venue, &state, &self.ledger, &self.config)
    }

    pub fn ledger(&self, id: &ParticipantId, limit: usize) -> (BalanceRecord, Vec<LedgerEntry>) {
        (self.ledger.record(id), self.ledger.entries(id, limit))
    }

    fn refresh(&self) {
        let snapshot = self.snapshot();
        self.observer.on_event(self.venue, TableEvent::Updated(snapshot));
    }

    fn notice(&self, to: Option<ParticipantId>, message: impl Into<String>) {
        self.observer.on_event(self.venue, TableEvent::Notice { to, message: message.into() });
    }

    // --- Entry points ---

    /// Seats the participant (or queues them for the next round) and makes
    /// sure the worker is running.
    pub fn join(self: &Arc<Self>, participant: Participant) -> JoinOutcome {
        self.cancel_idle_close();
        self.mailboxes
            .entry(participant.id)
            .or_insert_with(|| Mailbox::new(self.config.mailbox_capacity));

        let (id, name) = (participant.id, participant.name.clone());
        let outcome = {
            let mut state = self.state.lock();
            seat_participant(&mut state, &self.ledger, &self.config, participant)
        };
        match outcome {
            JoinOutcome::AlreadyPresent => self.notice(Some(id), format!("{} is already seated.", name)),
            JoinOutcome::Waiting => info!("{} will join {} at the next round", name, self.venue),
            _ => info!("{} sat down at {}", name, self.venue),
        }

        self.ensure_running();
        self.wakeup.notify_one();
        self.refresh();
        outcome
    }

    /// Removes the participant. If they hold the turn, a stand is queued so the
    /// worker moves on instead of waiting out the timeout.
    pub fn leave(self: &Arc<Self>, id: &ParticipantId) -> bool {
        let (outcome, empty) = {
            let mut state = self.state.lock();
            let outcome = unseat_participant(&mut state, id);
            (outcome, state.is_empty())
        };

        if let Some((_, mailbox)) = self.mailboxes.remove(id) {
            if outcome.held_turn {
                if let Err(e) = mailbox.tx.try_send(Action::Stand) {
                    debug!("Could not queue implicit stand for {}: {}", id, e);
                }
            }
            // Dropping the sender closes the channel, which also wakes the worker.
        }

        if outcome.was_present {
            info!("{} left {}", id, self.venue);
        }
        if empty {
            self.arm_idle_close();
        }
        self.wakeup.notify_one();
        self.refresh();
        outcome.was_present
    }

    pub fn place_bet(&self, id: ParticipantId, amount: i64) -> Result<PendingBet, TableError> {
        let bet = {
            let mut state = self.state.lock();
            place_bet(&mut state, &self.ledger, &self.config, id, amount)?
        };
        self.refresh();
        Ok(bet)
    }

    pub fn clear_bet(&self, id: ParticipantId) -> Result<(), TableError> {
        {
            let mut state = self.state.lock();
            clear_bet(&mut state, id)?;
        }
        self.refresh();
        Ok(())
    }

    pub fn confirm_bet(&self, id: ParticipantId) -> Result<PendingBet, TableError> {
        let bet = {
            let mut state = self.state.lock();
            confirm_bet(&mut state, &self.ledger, &self.config, id)?
        };
        self.wakeup.notify_one();
        self.refresh();
        Ok(bet)
    }

    /// Queues an action for the worker. Only the turn holder during PLAYING is heard.
    pub fn offer_action(&self, id: ParticipantId, action: Action) -> Result<(), TableError> {
        if !self.state.lock().is_current_turn(&id) {
            return Err(TableError::InvalidAction);
        }
        let mailbox = self.mailboxes.get(&id).ok_or(TableError::InvalidAction)?;
        mailbox.tx.try_send(action).map_err(|e| {
            debug!("Dropped {:?} from {}: {}", action, id, e);
            TableError::InvalidAction
        })
    }

    pub fn buy_in(&self, id: ParticipantId) -> Result<i64, TableError> {
        let balance = self
            .ledger
            .buy_in(id, self.config.buy_in_threshold, self.config.buy_in_amount)?;
        self.notice(Some(id), format!("Buy-in complete. Balance set to ${}.", balance));
        self.refresh();
        Ok(balance)
    }

    pub fn admin_add_balance(&self, id: ParticipantId, amount: i64) -> i64 {
        let balance = self.ledger.add_funds(id, amount);
        info!("Admin funds {:+} for {} -> ${}", amount, id, balance);
        self.refresh();
        balance
    }

    pub fn history_older(&self) -> usize {
        let page = self.state.lock().history.older();
        self.refresh();
        page
    }

    pub fn history_newer(&self) -> usize {
        let page = self.state.lock().history.newer();
        self.refresh();
        page
    }

    // --- Idle closure ---

    /// (Re)starts the grace timer, replacing any pending one.
    pub fn arm_idle_close(self: &Arc<Self>) {
        let mut slot = self.idle_close.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }
        let table = Arc::clone(self);
        let grace = self.config.idle_close();
        *slot = Some(tokio::spawn(async move {
            sleep(grace).await;
            table.close_if_idle();
        }));
    }

    pub fn cancel_idle_close(&self) {
        if let Some(pending) = self.idle_close.lock().take() {
            pending.abort();
        }
    }

    fn close_if_idle(&self) {
        // Holding the worker slot keeps a concurrent join from reusing the
        // worker we are about to stop.
        let mut worker = self.worker.lock();
        {
            let mut state = self.state.lock();
            if !state.is_empty() {
                return;
            }
            state.clear_round();
            state.phase = Phase::Lobby;
        }
        if let Some(handle) = worker.take() {
            handle.abort();
            drop(worker);
            info!("Closed idle table {}", self.venue);
            self.observer.on_event(self.venue, TableEvent::Closed);
        }
    }

    // --- Round engine ---

    fn ensure_running(self: &Arc<Self>) {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let table = Arc::clone(self);
        *worker = Some(tokio::spawn(async move { table.run().await }));
        info!("Started round engine for {}", self.venue);
    }

    async fn run(self: Arc<Self>) {
        {
            let mut state = self.state.lock();
            if state.phase != Phase::Lobby {
                warn!("Engine for {} found a stale {:?} phase, resetting", self.venue, state.phase);
                state.clear_round();
                state.phase = Phase::Lobby;
            }
        }

        loop {
            let empty = self.state.lock().is_empty();
            if empty {
                tokio::select! {
                    _ = self.wakeup.notified() => {}
                    _ = sleep(self.config.idle_poll()) => {}
                }
                continue;
            }
            self.play_round().await;
        }
    }

    async fn play_round(self: &Arc<Self>) {
        // BETTING
        let started = begin_betting(&mut self.state.lock());
        if !started {
            sleep(self.config.idle_poll()).await;
            return;
        }
        info!("Betting open at {}", self.venue);
        self.refresh();

        let deadline = Instant::now() + self.config.betting_window();
        loop {
            {
                let state = self.state.lock();
                if state.seated.is_empty() || state.all_bets_locked() {
                    break;
                }
            }
            tokio::select! {
                _ = sleep_until(deadline) => break,
                _ = self.wakeup.notified() => {}
            }
        }

        // PLAYING
        let dealt = {
            let mut state = self.state.lock();
            if state.seated.is_empty() {
                abandon_round(&mut state);
                None
            } else {
                let mut source = self.source.lock();
                let dropped = deal_round(&mut state, &self.ledger, &self.config, source.as_mut());
                let order: Vec<ParticipantId> = state.seated.iter().map(|p| p.id).collect();
                Some((dropped, order))
            }
        };
        let Some((dropped, order)) = dealt else {
            debug!("Nobody seated at deal time at {}, back to lobby", self.venue);
            self.refresh();
            if self.state.lock().is_empty() {
                self.arm_idle_close();
            }
            return;
        };
        self.ledger.persist();
        for participant in dropped {
            warn!("{} cannot cover their stake, removed from {}", participant.name, self.venue);
            self.notice(
                Some(participant.id),
                "Not enough funds for your stake; you have been removed from the table.",
            );
        }
        self.refresh();

        for id in order {
            self.take_turns(id).await;
        }

        // Dealer
        {
            let mut state = self.state.lock();
            state.current_turn = None;
            state.dealer_hidden = false;
        }
        self.refresh();
        sleep(self.config.dealer_reveal_delay()).await;

        loop {
            let drew = {
                let mut state = self.state.lock();
                if dealer_should_hit(&state.dealer) {
                    let card = self.source.lock().draw();
                    state.dealer.push(card);
                    true
                } else {
                    false
                }
            };
            if !drew {
                break;
            }
            self.refresh();
            sleep(self.config.dealer_draw_delay()).await;
        }

        // RESULTS
        let results = {
            let mut state = self.state.lock();
            let seated: Vec<ParticipantId> = state.seated.iter().map(|p| p.id).collect();
            state.hands.retain(|id, _| seated.contains(id));
            let settlements = settle(&seated_hands(&state), &state.dealer);
            let results = apply_settlement(&mut state, &self.ledger, &settlements);
            state.transition(Phase::Results);
            results
        };
        self.ledger.persist();
        info!(
            "Round settled at {}: dealer {}, {} won, {} pushed, {} lost",
            self.venue,
            results.dealer_total,
            results.winners.len(),
            results.pushes.len(),
            results.losers.len()
        );
        self.observer.on_event(self.venue, TableEvent::RoundResults(results));
        self.refresh();
        sleep(self.config.results_pause()).await;

        // LOBBY
        let empty = {
            let mut state = self.state.lock();
            finish_round(&mut state);
            state.is_empty()
        };
        self.refresh();
        if empty {
            self.arm_idle_close();
        }
        sleep(self.config.round_cooldown()).await;
    }

    /// Plays every hand of one participant, left to right. Split hands are
    /// inserted after their source, so they come up next.
    async fn take_turns(&self, id: ParticipantId) {
        let mut index = 0;
        loop {
            self.drain_mailbox(&id);
            match self.start_hand(&id, index) {
                HandStart::Done => break,
                HandStart::Skip => {}
                HandStart::Natural(payout) => {
                    self.ledger.persist();
                    info!("{} has a natural, paid ${}", id, payout);
                    self.refresh();
                }
                HandStart::Play => self.play_hand(id, index).await,
            }
            index += 1;
        }
        self.state.lock().current_turn = None;
    }

    fn start_hand(&self, id: &ParticipantId, index: usize) -> HandStart {
        let mut state = self.state.lock();
        if !state.is_seated(id) {
            state.hands.remove(id);
            return HandStart::Done;
        }
        let Some(hand) = state.hands.get(id).and_then(|h| h.get(index)) else {
            return HandStart::Done;
        };
        if hand.resolved {
            return HandStart::Skip;
        }
        if index == 0 {
            if let Some(payout) = pay_natural(&mut state, &self.ledger, id) {
                return HandStart::Natural(payout);
            }
        }
        state.current_turn = Some(Turn { participant: *id, hand_index: index });
        HandStart::Play
    }

    async fn play_hand(&self, id: ParticipantId, index: usize) {
        loop {
            {
                let mut state = self.state.lock();
                if !state.is_seated(&id) {
                    state.hands.remove(&id);
                    state.current_turn = None;
                    return;
                }
                if resolve_if_bust(&mut state, &id, index) {
                    break;
                }
            }
            self.refresh();

            let action = self.next_action(&id).await;
            let result = {
                let mut state = self.state.lock();
                let mut source = self.source.lock();
                apply_action(&mut state, &self.ledger, source.as_mut(), id, action)
            };
            if result.is_ok() && matches!(action, Action::Double | Action::Split) {
                self.ledger.persist();
            }
            match result {
                Ok(Step::Continue) => {}
                Ok(Step::Resolved) => break,
                Err(e) => {
                    debug!("{:?} from {} rejected: {}", action, id, e);
                    if e.is_visible() {
                        self.notice(Some(id), e.to_string());
                    } else if matches!(action, Action::Double | Action::Split) {
                        self.notice(Some(id), format!("{:?} is not available for this hand.", action));
                    }
                    if matches!(e, TableError::InvalidAction) && !self.state.lock().is_current_turn(&id) {
                        break;
                    }
                }
            }
        }
        self.refresh();
    }

    /// Next action from the participant's mailbox. Timeout, a closed mailbox
    /// or a missing one all mean stand.
    async fn next_action(&self, id: &ParticipantId) -> Action {
        let Some(rx) = self.mailboxes.get(id).map(|m| Arc::clone(&m.rx)) else {
            return Action::Stand;
        };
        let mut rx = rx.lock().await;
        match timeout(self.config.turn_timeout(), rx.recv()).await {
            Ok(Some(action)) => action,
            Ok(None) => Action::Stand,
            Err(_) => {
                debug!("{} timed out, standing", id);
                Action::Stand
            }
        }
    }

    fn drain_mailbox(&self, id: &ParticipantId) {
        let Some(rx) = self.mailboxes.get(id).map(|m| Arc::clone(&m.rx)) else {
            return;
        };
        if let Ok(mut rx) = rx.try_lock() {
            while rx.try_recv().is_ok() {}
        }
    }
}
