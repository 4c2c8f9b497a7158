use crate::card::{CardSource, RandomSource};
use crate::config::TableConfig;
use crate::ledger::{Ledger, LedgerStore};
use crate::state::VenueId;
use crate::table::{Table, TableObserver};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;

/// Every venue's table, sharing one ledger, one config and one observer.
pub struct TableRegistry {
    tables: DashMap<VenueId, Arc<Table>>,
    config: Arc<TableConfig>,
    ledger: Arc<Ledger>,
    observer: Arc<dyn TableObserver>,
}

impl TableRegistry {
    /// Loads the ledger once from `store`.
    pub fn new(config: TableConfig, store: Arc<dyn LedgerStore>, observer: Arc<dyn TableObserver>) -> Self {
        let ledger = Arc::new(Ledger::open(store, &config));
        TableRegistry {
            tables: DashMap::new(),
            config: Arc::new(config),
            ledger,
            observer,
        }
    }

    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn get(&self, venue: &VenueId) -> Option<Arc<Table>> {
        self.tables.get(venue).map(|t| Arc::clone(&t))
    }

    /// The venue's table, created on first use with a random card source.
    pub fn table(&self, venue: VenueId) -> Arc<Table> {
        self.table_with_source(venue, || Box::new(RandomSource::new()))
    }

    pub fn table_with_source(
        &self,
        venue: VenueId,
        source: impl FnOnce() -> Box<dyn CardSource>,
    ) -> Arc<Table> {
        self.tables
            .entry(venue)
            .or_insert_with(|| {
                info!("Opening table for venue {}", venue);
                Table::new(
                    venue,
                    Arc::clone(&self.config),
                    Arc::clone(&self.ledger),
                    Arc::clone(&self.observer),
                    source(),
                )
            })
            .clone()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryStore;
    use crate::state::Participant;
    use crate::table::NoopObserver;
    use uuid::Uuid;

    fn registry() -> TableRegistry {
        TableRegistry::new(TableConfig::default(), Arc::new(MemoryStore::new()), Arc::new(NoopObserver))
    }

    #[test]
    fn test_table_is_created_once_per_venue() {
        let registry = registry();
        let venue = Uuid::new_v4();
        let first = registry.table(venue);
        let second = registry.table(venue);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(registry.len(), 1);

        registry.table(Uuid::new_v4());
        assert_eq!(registry.len(), 2);
        assert!(registry.get(&venue).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tables_share_the_ledger() {
        let registry = registry();
        let p = Participant::new(Uuid::new_v4(), "P");
        registry.table(Uuid::new_v4()).join(p.clone());
        registry.table(Uuid::new_v4()).join(p.clone());
        registry.ledger().add_funds(p.id, 25);
        assert_eq!(registry.ledger().balance(&p.id), 125);
        assert_eq!(registry.ledger().snapshot().balances.len(), 1);
    }
}
