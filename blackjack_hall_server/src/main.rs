mod auth;
mod config;
mod hub;
mod store;

use std::error::Error;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use futures_util::{stream::StreamExt, SinkExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use blackjack_hall_core::{
    ClientMessage, Participant, ServerMessage, Table, TableError, TableRegistry, VenueId,
};

use crate::auth::KeyStore;
use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::store::JsonFileStore;

struct AppState {
    registry: TableRegistry,
    hub: Arc<Hub>,
    keys: KeyStore,
    config: ServerConfig,
}

type SharedState = Arc<AppState>;

/// What one connection has told us so far.
#[derive(Default)]
struct Session {
    participant: Option<Participant>,
    venue: Option<VenueId>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::load()?;
    let keys = KeyStore::open(&config.keys_path)?;
    let hub = Arc::new(Hub::default());
    let store = Arc::new(JsonFileStore::new(&config.save_path));
    let registry = TableRegistry::new(config.table.clone(), store, hub.clone());

    let state = SharedState::new(AppState { registry, hub, keys, config });
    let bind_addr = state.config.bind_addr.clone();

    let app = Router::new()
        .route("/ws", get(websocket_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Blackjack hall listening on {}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (mut sender, mut receiver) = socket.split();

    // Table events are pushed into this channel by the hub, replies by us.
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(64);

    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let payload = match serde_json::to_string(&msg) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Failed to encode {:?}: {}", msg, e);
                    continue;
                }
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    let mut session = Session::default();

    while let Some(Ok(msg)) = receiver.next().await {
        if let Message::Text(text) = msg {
            match serde_json::from_str::<ClientMessage>(&text) {
                Ok(client_msg) => handle_client_message(client_msg, &state, &tx, &mut session).await,
                Err(e) => {
                    warn!("Could not parse client message: {}", e);
                    let _ = tx.send(ServerMessage::Error { message: "Malformed message".to_string() }).await;
                }
            }
        }
    }

    if let Some(participant) = &session.participant {
        leave_current_table(&state, &mut session.venue, participant);
        info!("{} disconnected", participant.name);
    }
    debug!("Connection closed");
}

async fn handle_client_message(
    msg: ClientMessage,
    state: &SharedState,
    tx: &mpsc::Sender<ServerMessage>,
    session: &mut Session,
) {
    if let ClientMessage::Hello { name, id, secret } = msg {
        if session.participant.is_some() {
            let _ = tx.send(ServerMessage::Error { message: "Already greeted".to_string() }).await;
            return;
        }
        let Some((id, secret)) = state.keys.resolve(id, secret) else {
            warn!("{} presented an unknown id or wrong secret", name);
            let _ = tx.send(ServerMessage::Error { message: "Unknown id or wrong secret".to_string() }).await;
            return;
        };
        let ledger = state.registry.ledger();
        ledger.ensure_account(id);
        info!("{} connected as {}", name, id);
        session.participant = Some(Participant::new(id, name));
        let _ = tx
            .send(ServerMessage::Welcome {
                your_id: id,
                your_secret: secret,
                is_admin: state.config.is_admin(&id),
                record: ledger.record(&id),
            })
            .await;
        return;
    }

    let Some(participant) = session.participant.clone() else {
        let _ = tx.send(ServerMessage::Error { message: "Say Hello first".to_string() }).await;
        return;
    };
    let id = participant.id;
    let table = session.venue.and_then(|venue| state.registry.get(&venue));

    let result: Result<(), TableError> = match msg {
        ClientMessage::Hello { .. } => Ok(()),
        ClientMessage::JoinTable { venue } => {
            if session.venue != Some(venue) {
                leave_current_table(state, &mut session.venue, &participant);
            }
            let table = state.registry.table(venue);
            state.hub.attach(venue, id, tx.clone());
            session.venue = Some(venue);
            table.join(participant.clone());
            Ok(())
        }
        ClientMessage::LeaveTable => {
            leave_current_table(state, &mut session.venue, &participant);
            Ok(())
        }
        ClientMessage::PlaceBet(amount) => at_table(table, |t| t.place_bet(id, amount).map(|_| ())),
        ClientMessage::ClearBet => at_table(table, |t| t.clear_bet(id)),
        ClientMessage::ConfirmBet => at_table(table, |t| t.confirm_bet(id).map(|_| ())),
        ClientMessage::Act(action) => at_table(table, |t| t.offer_action(id, action)),
        ClientMessage::HistoryOlder => at_table(table, |t| {
            t.history_older();
            Ok(())
        }),
        ClientMessage::HistoryNewer => at_table(table, |t| {
            t.history_newer();
            Ok(())
        }),
        ClientMessage::BuyIn => match table {
            Some(table) => table.buy_in(id).map(|_| ()),
            None => {
                let config = state.registry.config();
                state
                    .registry
                    .ledger()
                    .buy_in(id, config.buy_in_threshold, config.buy_in_amount)
                    .map(|balance| {
                        let _ = tx.try_send(ServerMessage::Notice {
                            message: format!("Buy-in complete. Balance set to ${}.", balance),
                        });
                    })
            }
        },
        ClientMessage::AddBalance { target, amount } => {
            if !state.config.is_admin(&id) {
                let _ = tx.send(ServerMessage::Error { message: "Only admins can add balance".to_string() }).await;
                return;
            }
            let balance = match table {
                Some(table) => table.admin_add_balance(target, amount),
                None => state.registry.ledger().add_funds(target, amount),
            };
            let _ = tx
                .send(ServerMessage::Notice { message: format!("Balance of {} is now ${}.", target, balance) })
                .await;
            Ok(())
        }
        ClientMessage::ShowLedger { limit } => {
            let ledger = state.registry.ledger();
            let _ = tx
                .send(ServerMessage::Ledger { record: ledger.record(&id), entries: ledger.entries(&id, limit) })
                .await;
            Ok(())
        }
    };

    if let Err(e) = result {
        if e.is_visible() {
            let _ = tx.send(ServerMessage::Error { message: e.to_string() }).await;
        } else {
            debug!("Ignored request from {}: {}", participant.name, e);
        }
    }
}

/// Runs `f` on the session's table; without one the request is out of place.
fn at_table(
    table: Option<Arc<Table>>,
    f: impl FnOnce(&Arc<Table>) -> Result<(), TableError>,
) -> Result<(), TableError> {
    match table {
        Some(table) => f(&table),
        None => Err(TableError::NotSeated),
    }
}

fn leave_current_table(state: &SharedState, venue: &mut Option<VenueId>, participant: &Participant) {
    let Some(venue) = venue.take() else {
        return;
    };
    if let Some(table) = state.registry.get(&venue) {
        table.leave(&participant.id);
    }
    state.hub.detach(&venue, &participant.id);
}
