use crate::ledger::{BalanceRecord, LedgerEntry};
use crate::state::{Action, ParticipantId, RoundResults, TableSnapshot, VenueId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Issued once per participant id; required to resume that id later.
pub type PlayerSecret = Uuid;

// --- Client -> server ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// First message on a connection. A previously issued id together with
    /// its secret resumes that participant's account.
    Hello {
        name: String,
        id: Option<ParticipantId>,
        secret: Option<PlayerSecret>,
    },

    JoinTable { venue: VenueId },
    LeaveTable,

    /// Stage (or replace) a stake during betting.
    PlaceBet(i64),
    ClearBet,
    ConfirmBet,
    /// Only heard from the current turn holder.
    Act(Action),

    BuyIn,
    /// Admins only.
    AddBalance { target: ParticipantId, amount: i64 },
    ShowLedger { limit: usize },

    HistoryOlder,
    HistoryNewer,
}

// --- Server -> client ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    Welcome {
        your_id: ParticipantId,
        your_secret: PlayerSecret,
        is_admin: bool,
        record: BalanceRecord,
    },

    /// Full redraw of the table the client sits at.
    TableUpdated(TableSnapshot),
    RoundResults(RoundResults),
    Notice { message: String },

    Ledger {
        record: BalanceRecord,
        entries: Vec<LedgerEntry>,
    },

    /// The venue's table was closed for inactivity.
    TableClosed { venue: VenueId },
    Error { message: String },
}

impl From<Action> for ClientMessage {
    fn from(action: Action) -> Self {
        ClientMessage::Act(action)
    }
}
