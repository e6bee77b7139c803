//! Load deduplication for concurrent chunk requests.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use strata_common::{ChunkCoords, WorldResult};

use crate::chunk::ChunkColumn;

/// Callback invoked with the outcome of a load.
pub(crate) type LoadCallback = Box<dyn FnOnce(WorldResult<Arc<ChunkColumn>>) + Send>;

/// Record of an in-flight load: the waiters attached since the ticket
/// opened, in attachment order.
struct LoadTicket {
    waiters: Mutex<Vec<LoadCallback>>,
}

/// Ensures at most one load (store read or generation) runs per
/// coordinate regardless of concurrent demand. The first caller for a
/// coordinate opens a ticket and starts the load; everyone else attaches
/// to the ticket and shares the outcome.
pub(crate) struct LoadCoordinator {
    tickets: DashMap<ChunkCoords, LoadTicket, ahash::RandomState>,
}

impl LoadCoordinator {
    pub fn new() -> Self {
        Self {
            tickets: DashMap::with_hasher(ahash::RandomState::new()),
        }
    }

    /// Attaches a waiter to the coordinate's ticket, opening one if
    /// needed. Returns true iff this caller opened the ticket and must
    /// start the actual load.
    pub fn enlist(&self, coords: ChunkCoords, waiter: LoadCallback) -> bool {
        match self.tickets.entry(coords) {
            Entry::Occupied(occupied) => {
                let mut waiters = occupied.get().waiters.lock();
                waiters.push(waiter);
                debug!(
                    "Load for {coords} already in flight, {} waiters attached",
                    waiters.len()
                );
                false
            }
            Entry::Vacant(vacant) => {
                vacant.insert(LoadTicket {
                    waiters: Mutex::new(vec![waiter]),
                });
                true
            }
        }
    }

    /// Closes the coordinate's ticket and delivers the outcome to every
    /// waiter in attachment order. A no-op if no ticket is open.
    pub fn resolve(&self, coords: ChunkCoords, result: WorldResult<Arc<ChunkColumn>>) {
        let Some((_, ticket)) = self.tickets.remove(&coords) else {
            return;
        };
        let waiters = ticket.waiters.into_inner();
        debug!(
            "Load for {coords} resolved, delivering to {} waiters",
            waiters.len()
        );
        for waiter in waiters {
            waiter(result.clone());
        }
    }
}
