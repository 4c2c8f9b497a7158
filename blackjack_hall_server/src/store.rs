use blackjack_hall_core::{LedgerSnapshot, LedgerStore, PersistenceError};
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Ledger snapshot kept as one pretty-printed JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    // Serializes writers to the temp file.
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into(), write_lock: Mutex::new(()) }
    }
}

impl LedgerStore for JsonFileStore {
    /// A missing file is an empty ledger.
    fn load(&self) -> Result<LedgerSnapshot, PersistenceError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LedgerSnapshot::default()),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_str(&content).map_err(|e| PersistenceError::Format(e.to_string()))
    }

    fn save(&self, snapshot: &LedgerSnapshot) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(snapshot).map_err(|e| PersistenceError::Format(e.to_string()))?;
        let _guard = self.write_lock.lock();
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use blackjack_hall_core::{Ledger, TableConfig};
    use std::sync::Arc;
    use uuid::Uuid;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("ledger.json"));
        assert_eq!(store.load().unwrap(), LedgerSnapshot::default());
    }

    #[test]
    fn test_balances_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        let id = Uuid::new_v4();
        let config = TableConfig::default();

        let ledger = Ledger::open(Arc::new(JsonFileStore::new(&path)), &config);
        ledger.ensure_account(id);
        ledger.add_funds(id, 40);

        let reopened = Ledger::open(Arc::new(JsonFileStore::new(&path)), &config);
        assert_eq!(reopened.balance(&id), 140);
        assert_eq!(reopened.entries(&id, 100).len(), 1);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("ADMIN_FUNDS"));
        assert!(raw.contains('\n'));
    }

    #[test]
    fn test_malformed_file_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        fs::write(&path, "{ not json").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(matches!(store.load(), Err(PersistenceError::Format(_))));
    }
}
