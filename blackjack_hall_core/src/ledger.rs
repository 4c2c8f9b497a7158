//! Balances, win/loss counters and the per-participant money trail.
//!
//! The ledger is shared by every venue in the process. It loads once from its
//! [`LedgerStore`] when opened and hands the store a full snapshot after every
//! balance-affecting call. Store failures are logged and the in-memory state
//! stays authoritative.

use crate::config::TableConfig;
use crate::error::{PersistenceError, TableError};
use crate::state::ParticipantId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

pub(crate) fn current_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_else(|e| {
            tracing::error!("System clock error: {}", e);
            0
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceRecord {
    pub balance: i64,
    pub wins: u32,
    pub losses: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryKind {
    Bet,
    DoubleBet,
    SplitBet,
    WinBlackjack,
    Win,
    Push,
    Loss,
    LossBust,
    BuyIn,
    AdminFunds,
}

impl EntryKind {
    fn counts_as_win(&self) -> bool {
        matches!(self, EntryKind::Win | EntryKind::WinBlackjack)
    }

    fn counts_as_loss(&self) -> bool {
        matches!(self, EntryKind::Loss | EntryKind::LossBust)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub timestamp_ms: u64,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub delta: i64,
    pub balance_after: i64,
}

/// The persisted shape handed to [`LedgerStore`].
///
/// Balances, wins and losses are the contract; `ledger` is best-effort and a
/// store may drop it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    #[serde(default)]
    pub balances: BTreeMap<ParticipantId, i64>,
    #[serde(default)]
    pub wins: BTreeMap<ParticipantId, u32>,
    #[serde(default)]
    pub losses: BTreeMap<ParticipantId, u32>,
    #[serde(default)]
    pub ledger: BTreeMap<ParticipantId, Vec<LedgerEntry>>,
}

/// Persistence hook. The on-disk format belongs to the implementor.
pub trait LedgerStore: Send + Sync {
    fn load(&self) -> Result<LedgerSnapshot, PersistenceError>;
    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), PersistenceError>;
}

/// Keeps the last saved snapshot in memory.
#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<Option<LedgerSnapshot>>,
    saves: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: LedgerSnapshot) -> Self {
        MemoryStore { saved: Mutex::new(Some(snapshot)), saves: Mutex::new(0) }
    }

    pub fn last_saved(&self) -> Option<LedgerSnapshot> {
        self.saved.lock().clone()
    }

    pub fn save_count(&self) -> usize {
        *self.saves.lock()
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<LedgerSnapshot, PersistenceError> {
        Ok(self.saved.lock().clone().unwrap_or_default())
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), PersistenceError> {
        *self.saved.lock() = Some(snapshot.clone());
        *self.saves.lock() += 1;
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Account {
    record: BalanceRecord,
    entries: VecDeque<LedgerEntry>,
}

pub struct Ledger {
    accounts: Mutex<HashMap<ParticipantId, Account>>,
    // Serializes snapshot+save so an older snapshot never overwrites a newer one.
    persist_lock: Mutex<()>,
    store: Arc<dyn LedgerStore>,
    start_balance: i64,
    capacity: usize,
}

impl Ledger {
    /// Builds the ledger and calls `store.load()` exactly once.
    pub fn open(store: Arc<dyn LedgerStore>, config: &TableConfig) -> Self {
        let mut accounts = HashMap::new();
        match store.load() {
            Ok(snapshot) => {
                for (id, balance) in &snapshot.balances {
                    let entries: VecDeque<LedgerEntry> = snapshot
                        .ledger
                        .get(id)
                        .map(|e| e.iter().take(config.ledger_capacity).cloned().collect())
                        .unwrap_or_default();
                    accounts.insert(*id, Account {
                        record: BalanceRecord {
                            balance: *balance,
                            wins: snapshot.wins.get(id).copied().unwrap_or(0),
                            losses: snapshot.losses.get(id).copied().unwrap_or(0),
                        },
                        entries,
                    });
                }
                info!("Loaded {} ledger accounts", accounts.len());
            }
            Err(e) => warn!("Ledger load failed, starting empty: {}", e),
        }

        Ledger {
            accounts: Mutex::new(accounts),
            persist_lock: Mutex::new(()),
            store,
            start_balance: config.start_balance,
            capacity: config.ledger_capacity.max(1),
        }
    }

    fn fresh_account(&self) -> Account {
        Account {
            record: BalanceRecord { balance: self.start_balance, wins: 0, losses: 0 },
            entries: VecDeque::new(),
        }
    }

    /// Creates the account with the starting balance on first sight.
    pub fn ensure_account(&self, id: ParticipantId) {
        let created = {
            let mut accounts = self.accounts.lock();
            if accounts.contains_key(&id) {
                false
            } else {
                accounts.insert(id, self.fresh_account());
                true
            }
        };
        if created {
            self.persist();
        }
    }

    pub fn record(&self, id: &ParticipantId) -> BalanceRecord {
        self.accounts
            .lock()
            .get(id)
            .map(|a| a.record)
            .unwrap_or(BalanceRecord { balance: self.start_balance, wins: 0, losses: 0 })
    }

    pub fn balance(&self, id: &ParticipantId) -> i64 {
        self.record(id).balance
    }

    /// Newest first, at most `limit`.
    pub fn entries(&self, id: &ParticipantId, limit: usize) -> Vec<LedgerEntry> {
        self.accounts
            .lock()
            .get(id)
            .map(|a| a.entries.iter().take(limit).cloned().collect())
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn entry_count(&self, id: &ParticipantId) -> usize {
        self.accounts.lock().get(id).map_or(0, |a| a.entries.len())
    }

    /// Takes a stake off the balance, refusing to go below zero.
    pub fn debit(&self, id: ParticipantId, amount: i64, kind: EntryKind) -> Result<i64, TableError> {
        let balance = self.debit_deferred(id, amount, kind)?;
        self.persist();
        Ok(balance)
    }

    /// Like [`Ledger::debit`], but the caller owes a [`Ledger::persist`] once
    /// its batch of writes is done.
    pub(crate) fn debit_deferred(&self, id: ParticipantId, amount: i64, kind: EntryKind) -> Result<i64, TableError> {
        let mut accounts = self.accounts.lock();
        let account = accounts.entry(id).or_insert_with(|| self.fresh_account());
        if account.record.balance < amount {
            return Err(TableError::InsufficientFunds {
                required: amount,
                available: account.record.balance,
            });
        }
        account.record.balance -= amount;
        let after = account.record.balance;
        Self::append(account, self.capacity, kind, -amount, after);
        Ok(after)
    }

    /// Credits a settlement payout (possibly zero) and bumps the matching counter.
    pub fn apply_result(&self, id: ParticipantId, kind: EntryKind, payout: i64) -> i64 {
        let balance = self.apply_result_deferred(id, kind, payout);
        self.persist();
        balance
    }

    pub(crate) fn apply_result_deferred(&self, id: ParticipantId, kind: EntryKind, payout: i64) -> i64 {
        let mut accounts = self.accounts.lock();
        let account = accounts.entry(id).or_insert_with(|| self.fresh_account());
        account.record.balance += payout;
        if kind.counts_as_win() {
            account.record.wins += 1;
        } else if kind.counts_as_loss() {
            account.record.losses += 1;
        }
        let after = account.record.balance;
        Self::append(account, self.capacity, kind, payout, after);
        after
    }

    /// Resets a low balance to `amount`.
    pub fn buy_in(&self, id: ParticipantId, threshold: i64, amount: i64) -> Result<i64, TableError> {
        {
            let mut accounts = self.accounts.lock();
            let account = accounts.entry(id).or_insert_with(|| self.fresh_account());
            let balance = account.record.balance;
            if balance >= threshold {
                return Err(TableError::BuyInNotAllowed { balance, threshold });
            }
            account.record.balance = amount;
            Self::append(account, self.capacity, EntryKind::BuyIn, amount - balance, amount);
        }
        self.persist();
        Ok(amount)
    }

    /// Admin top-up. Negative amounts are allowed and may take the balance below zero.
    pub fn add_funds(&self, id: ParticipantId, amount: i64) -> i64 {
        let balance = {
            let mut accounts = self.accounts.lock();
            let account = accounts.entry(id).or_insert_with(|| self.fresh_account());
            account.record.balance += amount;
            let after = account.record.balance;
            Self::append(account, self.capacity, EntryKind::AdminFunds, amount, after);
            after
        };
        self.persist();
        balance
    }

    fn append(account: &mut Account, capacity: usize, kind: EntryKind, delta: i64, balance_after: i64) {
        account.entries.push_front(LedgerEntry {
            timestamp_ms: current_timestamp_ms(),
            kind,
            delta,
            balance_after,
        });
        account.entries.truncate(capacity);
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let accounts = self.accounts.lock();
        let mut snapshot = LedgerSnapshot::default();
        for (id, account) in accounts.iter() {
            snapshot.balances.insert(*id, account.record.balance);
            snapshot.wins.insert(*id, account.record.wins);
            snapshot.losses.insert(*id, account.record.losses);
            snapshot.ledger.insert(*id, account.entries.iter().cloned().collect());
        }
        snapshot
    }

    /// Hands the current snapshot to the store. Failures are logged only.
    pub fn persist(&self) {
        let _guard = self.persist_lock.lock();
        let snapshot = self.snapshot();
        if let Err(e) = self.store.save(&snapshot) {
            warn!("Ledger save failed, keeping in-memory state: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    struct FailingStore;

    impl LedgerStore for FailingStore {
        fn load(&self) -> Result<LedgerSnapshot, PersistenceError> {
            Err(PersistenceError::Format("truncated".to_string()))
        }

        fn save(&self, _snapshot: &LedgerSnapshot) -> Result<(), PersistenceError> {
            Err(PersistenceError::Io(std::io::Error::other("disk full")))
        }
    }

    fn setup_ledger() -> (Ledger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::open(store.clone(), &TableConfig::default());
        (ledger, store)
    }

    #[test]
    fn test_first_sight_gets_start_balance() {
        let (ledger, store) = setup_ledger();
        let id = Uuid::new_v4();
        ledger.ensure_account(id);
        ledger.ensure_account(id);
        assert_eq!(ledger.record(&id), BalanceRecord { balance: 100, wins: 0, losses: 0 });
        assert_eq!(store.last_saved().unwrap().balances[&id], 100);
    }

    #[test]
    fn test_debit_refuses_overdraw() {
        let (ledger, _) = setup_ledger();
        let id = Uuid::new_v4();
        ledger.ensure_account(id);
        assert_eq!(ledger.debit(id, 30, EntryKind::Bet), Ok(70));
        assert_eq!(
            ledger.debit(id, 80, EntryKind::Bet),
            Err(TableError::InsufficientFunds { required: 80, available: 70 })
        );
        assert_eq!(ledger.balance(&id), 70);
    }

    #[test]
    fn test_results_move_counters() {
        let (ledger, _) = setup_ledger();
        let id = Uuid::new_v4();
        ledger.ensure_account(id);
        ledger.debit(id, 10, EntryKind::Bet).unwrap();
        ledger.apply_result(id, EntryKind::Win, 20);
        ledger.apply_result(id, EntryKind::Push, 10);
        ledger.apply_result(id, EntryKind::LossBust, 0);
        let record = ledger.record(&id);
        assert_eq!(record, BalanceRecord { balance: 120, wins: 1, losses: 1 });

        let entries = ledger.entries(&id, 15);
        assert_eq!(entries[0].kind, EntryKind::LossBust);
        assert_eq!(entries[3].kind, EntryKind::Bet);
        assert_eq!(entries[3].delta, -10);
        assert_eq!(entries[3].balance_after, 90);
    }

    #[test]
    fn test_entries_are_capped() {
        let store = Arc::new(MemoryStore::new());
        let config = TableConfig { ledger_capacity: 5, ..TableConfig::default() };
        let ledger = Ledger::open(store, &config);
        let id = Uuid::new_v4();
        for _ in 0..12 {
            ledger.add_funds(id, 1);
        }
        assert_eq!(ledger.entry_count(&id), 5);
        assert_eq!(ledger.entries(&id, 100)[0].balance_after, 112);
    }

    #[test]
    fn test_buy_in_only_below_threshold() {
        let (ledger, _) = setup_ledger();
        let id = Uuid::new_v4();
        ledger.ensure_account(id);
        assert_eq!(
            ledger.buy_in(id, 50, 100),
            Err(TableError::BuyInNotAllowed { balance: 100, threshold: 50 })
        );
        ledger.debit(id, 70, EntryKind::Bet).unwrap();
        assert_eq!(ledger.buy_in(id, 50, 100), Ok(100));
        assert_eq!(ledger.entries(&id, 1)[0].delta, 70);
    }

    #[test]
    fn test_reload_restores_records() {
        let (ledger, store) = setup_ledger();
        let id = Uuid::new_v4();
        ledger.ensure_account(id);
        ledger.debit(id, 25, EntryKind::Bet).unwrap();
        ledger.apply_result(id, EntryKind::Loss, 0);

        let reopened = Ledger::open(
            Arc::new(MemoryStore::with_snapshot(store.last_saved().unwrap())),
            &TableConfig::default(),
        );
        assert_eq!(reopened.record(&id), BalanceRecord { balance: 75, wins: 0, losses: 1 });
        assert_eq!(reopened.entry_count(&id), 2);
    }

    #[test]
    fn test_deferred_writes_save_once() {
        let (ledger, store) = setup_ledger();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        ledger.ensure_account(a);
        ledger.ensure_account(b);
        let saves = store.save_count();

        ledger.debit_deferred(a, 10, EntryKind::Bet).unwrap();
        ledger.debit_deferred(b, 10, EntryKind::Bet).unwrap();
        ledger.apply_result_deferred(a, EntryKind::Win, 20);
        assert_eq!(store.save_count(), saves);
        assert_eq!(store.last_saved().unwrap().balances[&a], 100);

        ledger.persist();
        assert_eq!(store.save_count(), saves + 1);
        let saved = store.last_saved().unwrap();
        assert_eq!(saved.balances[&a], 110);
        assert_eq!(saved.balances[&b], 90);
        assert_eq!(saved.wins[&a], 1);
    }

    #[test]
    fn test_every_public_mutation_saves() {
        let (ledger, store) = setup_ledger();
        let id = Uuid::new_v4();
        ledger.ensure_account(id);
        assert_eq!(store.save_count(), 1);
        ledger.debit(id, 60, EntryKind::Bet).unwrap();
        ledger.apply_result(id, EntryKind::Loss, 0);
        ledger.buy_in(id, 50, 100).unwrap();
        ledger.add_funds(id, 5);
        assert_eq!(store.save_count(), 5);
        // Refused operations write nothing.
        assert!(ledger.debit(id, 1_000, EntryKind::Bet).is_err());
        assert!(ledger.buy_in(id, 50, 100).is_err());
        assert_eq!(store.save_count(), 5);
    }

    #[test]
    fn test_store_failures_are_not_fatal() {
        let ledger = Ledger::open(Arc::new(FailingStore), &TableConfig::default());
        let id = Uuid::new_v4();
        ledger.ensure_account(id);
        assert_eq!(ledger.debit(id, 5, EntryKind::Bet), Ok(95));
    }

    #[test]
    fn test_snapshot_json_shape() {
        let (ledger, _) = setup_ledger();
        let id = Uuid::new_v4();
        ledger.debit(id, 5, EntryKind::DoubleBet).unwrap();
        let json = serde_json::to_value(ledger.snapshot()).unwrap();
        assert_eq!(json["balances"][id.to_string()], 95);
        assert_eq!(json["ledger"][id.to_string()][0]["type"], "DOUBLE_BET");
    }
}
