use blackjack_hall_core::{ParticipantId, TableConfig};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::{env, fs};

pub const CONFIG_ENV: &str = "BLACKJACK_CONFIG";
pub const ADDR_ENV: &str = "BLACKJACK_ADDR";
pub const SAVE_PATH_ENV: &str = "BLACKJACK_SAVE_PATH";
pub const KEYS_PATH_ENV: &str = "BLACKJACK_KEYS_PATH";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Where the ledger snapshot is kept, as pretty JSON.
    pub save_path: String,
    /// Issued participant ids and their secrets, as pretty JSON.
    pub keys_path: String,
    /// Participants allowed to send `AddBalance`.
    pub admins: Vec<ParticipantId>,
    pub table: TableConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            bind_addr: "0.0.0.0:25917".to_string(),
            save_path: "blackjack_ledger.json".to_string(),
            keys_path: "blackjack_keys.json".to_string(),
            admins: Vec::new(),
            table: TableConfig::default(),
        }
    }
}

impl ServerConfig {
    /// File named by `BLACKJACK_CONFIG` if any, then environment overrides.
    pub fn load() -> Result<Self, Box<dyn Error>> {
        Self::load_with(|key| env::var(key).ok())
    }

    fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Box<dyn Error>> {
        let mut config = match lookup(CONFIG_ENV) {
            Some(path) => Self::from_file(&path)?,
            None => ServerConfig::default(),
        };
        if let Some(addr) = lookup(ADDR_ENV) {
            config.bind_addr = addr;
        }
        if let Some(path) = lookup(SAVE_PATH_ENV) {
            config.save_path = path;
        }
        if let Some(path) = lookup(KEYS_PATH_ENV) {
            config.keys_path = path;
        }
        Ok(config)
    }

    pub fn from_file(path: &str) -> Result<Self, Box<dyn Error>> {
        let content = fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path, e))?;
        let config = toml::from_str(&content).map_err(|e| format!("Failed to parse {}: {}", path, e))?;
        Ok(config)
    }

    pub fn is_admin(&self, id: &ParticipantId) -> bool {
        self.admins.contains(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = ServerConfig::load_with(|_| None).unwrap();
        assert_eq!(config, ServerConfig::default());
        assert_eq!(config.table.turn_timeout_ms, 45_000);
    }

    #[test]
    fn test_file_then_env_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
bind_addr = "127.0.0.1:9000"
admins = ["00000000-0000-0000-0000-000000000001"]

[table]
default_bet = 10
turn_timeout_ms = 1000
"#
        )
        .unwrap();

        let path = file.path().to_str().unwrap().to_string();
        let vars: HashMap<&str, String> =
            HashMap::from([(CONFIG_ENV, path), (SAVE_PATH_ENV, "/tmp/ledger.json".to_string())]);
        let config = ServerConfig::load_with(|key| vars.get(key).cloned()).unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.save_path, "/tmp/ledger.json");
        assert_eq!(config.keys_path, "blackjack_keys.json");
        assert_eq!(config.table.default_bet, 10);
        assert_eq!(config.table.turn_timeout_ms, 1000);
        assert_eq!(config.table.betting_window_ms, 20_000);
        assert!(config.is_admin(&"00000000-0000-0000-0000-000000000001".parse().unwrap()));
    }

    #[test]
    fn test_bad_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bind_addr = [").unwrap();
        assert!(ServerConfig::from_file(file.path().to_str().unwrap()).is_err());
        assert!(ServerConfig::from_file("/nonexistent/blackjack.toml").is_err());
    }
}
