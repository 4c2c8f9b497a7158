use blackjack_hall_core::{ParticipantId, ServerMessage, TableEvent, TableObserver, VenueId};
use dashmap::DashMap;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Routes table events to the WebSocket connections seated at each venue.
#[derive(Default)]
pub struct Hub {
    venues: DashMap<VenueId, HashMap<ParticipantId, mpsc::Sender<ServerMessage>>>,
}

impl Hub {
    pub fn attach(&self, venue: VenueId, id: ParticipantId, sender: mpsc::Sender<ServerMessage>) {
        self.venues.entry(venue).or_default().insert(id, sender);
    }

    pub fn detach(&self, venue: &VenueId, id: &ParticipantId) {
        if let Some(mut connections) = self.venues.get_mut(venue) {
            connections.remove(id);
        }
        self.venues.remove_if(venue, |_, connections| connections.is_empty());
    }

    #[cfg(test)]
    fn connection_count(&self, venue: &VenueId) -> usize {
        self.venues.get(venue).map_or(0, |c| c.len())
    }

    fn send_to(&self, venue: &VenueId, id: &ParticipantId, message: ServerMessage) {
        let sender = self.venues.get(venue).and_then(|c| c.get(id).cloned());
        if let Some(sender) = sender {
            deliver(id, &sender, message);
        }
    }

    fn broadcast(&self, venue: &VenueId, message: &ServerMessage) {
        let Some(connections) = self.venues.get(venue) else {
            return;
        };
        for (id, sender) in connections.iter() {
            deliver(id, sender, message.clone());
        }
    }
}

// The engine calls in synchronously, so a slow client loses messages instead
// of stalling the table.
fn deliver(id: &ParticipantId, sender: &mpsc::Sender<ServerMessage>, message: ServerMessage) {
    if let Err(e) = sender.try_send(message) {
        warn!("Dropping message for {} (connection full or closed): {}", id, e);
    }
}

impl TableObserver for Hub {
    fn on_event(&self, venue: VenueId, event: TableEvent) {
        match event {
            TableEvent::Updated(snapshot) => self.broadcast(&venue, &ServerMessage::TableUpdated(snapshot)),
            TableEvent::RoundResults(results) => self.broadcast(&venue, &ServerMessage::RoundResults(results)),
            TableEvent::Notice { to: Some(id), message } => {
                self.send_to(&venue, &id, ServerMessage::Notice { message })
            }
            TableEvent::Notice { to: None, message } => self.broadcast(&venue, &ServerMessage::Notice { message }),
            TableEvent::Closed => {
                debug!("Venue {} closed, notifying connections", venue);
                self.broadcast(&venue, &ServerMessage::TableClosed { venue });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_notice_reaches_only_its_target() {
        let hub = Hub::default();
        let venue = Uuid::new_v4();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        hub.attach(venue, a, tx_a);
        hub.attach(venue, b, tx_b);

        hub.on_event(venue, TableEvent::Notice { to: Some(a), message: "hi".into() });
        assert_eq!(rx_a.try_recv().unwrap(), ServerMessage::Notice { message: "hi".into() });
        assert!(rx_b.try_recv().is_err());

        hub.on_event(venue, TableEvent::Closed);
        assert_eq!(rx_a.try_recv().unwrap(), ServerMessage::TableClosed { venue });
        assert_eq!(rx_b.try_recv().unwrap(), ServerMessage::TableClosed { venue });
    }

    #[test]
    fn test_full_connection_does_not_block() {
        let hub = Hub::default();
        let venue = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(1);
        hub.attach(venue, Uuid::new_v4(), tx);
        hub.on_event(venue, TableEvent::Notice { to: None, message: "one".into() });
        hub.on_event(venue, TableEvent::Notice { to: None, message: "two".into() });
        assert_eq!(rx.try_recv().unwrap(), ServerMessage::Notice { message: "one".into() });
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_detach_drops_empty_venues() {
        let hub = Hub::default();
        let venue = Uuid::new_v4();
        let id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(1);
        hub.attach(venue, id, tx);
        assert_eq!(hub.connection_count(&venue), 1);
        hub.detach(&venue, &id);
        assert_eq!(hub.connection_count(&venue), 0);
        assert!(hub.venues.is_empty());
    }
}
