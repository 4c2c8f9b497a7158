use blackjack_hall_core::{ParticipantId, PersistenceError, PlayerSecret};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

/// Participant ids and the secrets issued with them.
///
/// Ids are only ever minted here, so an id that has no secret on file cannot
/// be claimed by a client.
pub struct KeyStore {
    path: PathBuf,
    keys: Mutex<HashMap<ParticipantId, PlayerSecret>>,
}

impl KeyStore {
    /// A missing file starts an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let keys = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).map_err(|e| PersistenceError::Format(e.to_string()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(KeyStore { path, keys: Mutex::new(keys) })
    }

    /// Mints a fresh id with its secret.
    pub fn issue(&self) -> (ParticipantId, PlayerSecret) {
        let id = Uuid::new_v4();
        let secret = Uuid::new_v4();
        let mut keys = self.keys.lock();
        keys.insert(id, secret);
        if let Err(e) = self.save(&keys) {
            warn!("Could not save key for {}: {}", id, e);
        }
        (id, secret)
    }

    pub fn verify(&self, id: &ParticipantId, secret: &PlayerSecret) -> bool {
        self.keys.lock().get(id) == Some(secret)
    }

    /// Who a `Hello` speaks for: a new participant when no id is given,
    /// otherwise the given id if its secret matches.
    pub fn resolve(
        &self,
        id: Option<ParticipantId>,
        secret: Option<PlayerSecret>,
    ) -> Option<(ParticipantId, PlayerSecret)> {
        match (id, secret) {
            (None, _) => Some(self.issue()),
            (Some(id), Some(secret)) if self.verify(&id, &secret) => Some((id, secret)),
            _ => None,
        }
    }

    fn save(&self, keys: &HashMap<ParticipantId, PlayerSecret>) -> Result<(), PersistenceError> {
        let json = serde_json::to_string_pretty(keys).map_err(|e| PersistenceError::Format(e.to_string()))?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}
