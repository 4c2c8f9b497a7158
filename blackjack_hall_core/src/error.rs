use thiserror::Error;

/// Why a table entry point refused a request.
///
/// `InvalidAction` is the quiet one: out-of-turn and out-of-phase requests are
/// no-ops and front ends should not surface them. Turn timeouts are not errors
/// at all, they resolve as a stand.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    #[error("action not allowed right now")]
    InvalidAction,

    #[error("not enough funds: need ${required}, have ${available}")]
    InsufficientFunds { required: i64, available: i64 },

    #[error("${0} is not one of the table stakes")]
    InvalidBetAmount(i64),

    #[error("you are not seated at this table")]
    NotSeated,

    #[error("buy-in is only available below ${threshold} (you have ${balance})")]
    BuyInNotAllowed { balance: i64, threshold: i64 },
}

impl TableError {
    /// Errors the caller should be told about.
    pub fn is_visible(&self) -> bool {
        !matches!(self, TableError::InvalidAction)
    }
}

/// Failure of a ledger load/save hook. Logged, never fatal.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("ledger store i/o failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("ledger snapshot is malformed: {0}")]
    Format(String),
}
