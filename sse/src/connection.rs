use crate::lifecycle::{CloseCause, ConnectionSummary, Lifecycle};
use dashmap::DashMap;
use events::StreamId;
use log::*;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Registry of open connections with dual indices for O(1) lookups
pub struct ConnectionRegistry {
    /// Primary storage: lookup by connection_id for registration/cleanup - O(1)
    connections: DashMap<ConnectionId, Arc<Lifecycle>>,

    /// Secondary index: connections per stream, for status and targeted close - O(1)
    stream_index: DashMap<StreamId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            stream_index: DashMap::new(),
        }
    }

    /// Register an open connection - O(1)
    ///
    /// A connection that closed concurrently is removed again, so the registry
    /// never keeps an entry whose `close` has already run.
    pub fn register(&self, connection: Arc<Lifecycle>) {
        let connection_id = connection.connection_id().clone();
        let stream_id = connection.stream_id().clone();

        self.connections
            .insert(connection_id.clone(), Arc::clone(&connection));
        self.stream_index
            .entry(stream_id.clone())
            .or_default()
            .insert(connection_id.clone());
        debug!("Registered SSE connection {connection_id} on {stream_id}");

        if !connection.is_active() {
            self.unregister(&connection_id);
        }
    }

    /// Unregister a connection - O(1). Unknown ids are ignored.
    pub fn unregister(&self, connection_id: &ConnectionId) {
        // Remove from primary storage
        if let Some((_, connection)) = self.connections.remove(connection_id) {
            let stream_id = connection.stream_id();

            // Update secondary index
            if let Some(mut entry) = self.stream_index.get_mut(stream_id) {
                entry.remove(connection_id);

                // Clean up empty stream entries
                if entry.is_empty() {
                    drop(entry); // Release lock before removal
                    self.stream_index
                        .remove_if(stream_id, |_, connections| connections.is_empty());
                }
            }
            trace!("Unregistered SSE connection {connection_id}");
        }
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<Arc<Lifecycle>> {
        self.connections
            .get(connection_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Number of open connections on one stream - O(1)
    pub fn count_for_stream(&self, stream_id: &StreamId) -> usize {
        self.stream_index
            .get(stream_id)
            .map(|entry| entry.len())
            .unwrap_or(0)
    }

    pub fn summaries(&self) -> Vec<ConnectionSummary> {
        self.connections
            .iter()
            .map(|entry| entry.value().summary())
            .collect()
    }

    /// Closes every connection on `stream_id`. Returns how many were closed.
    pub fn close_stream(&self, stream_id: &StreamId, cause: CloseCause) -> usize {
        let targets: Vec<Arc<Lifecycle>> = match self.stream_index.get(stream_id) {
            Some(entry) => entry.iter().filter_map(|id| self.get(id)).collect(),
            None => Vec::new(),
        };
        close_each(targets, cause)
    }

    /// Closes every open connection. Returns how many were closed.
    pub fn close_all(&self, cause: CloseCause) -> usize {
        // Collected first: `close` unregisters, which needs the shard locks.
        let targets: Vec<Arc<Lifecycle>> = self
            .connections
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        close_each(targets, cause)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn close_each(targets: Vec<Arc<Lifecycle>>, cause: CloseCause) -> usize {
    targets
        .into_iter()
        .filter(|connection| connection.close(cause.clone()))
        .count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::{EventLog, InMemoryLog};

    fn open(registry: &Arc<ConnectionRegistry>, stream_id: &StreamId) -> Arc<Lifecycle> {
        let log: Arc<dyn EventLog> = Arc::new(InMemoryLog::new());
        let connection = Lifecycle::new(stream_id.clone(), log, Arc::clone(registry));
        registry.register(Arc::clone(&connection));
        connection
    }

    #[test]
    fn test_register_indexes_by_stream() {
        let registry = Arc::new(ConnectionRegistry::new());
        let orders = StreamId::new("orders").unwrap();
        let billing = StreamId::new("billing").unwrap();

        let first = open(&registry, &orders);
        open(&registry, &orders);
        open(&registry, &billing);

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.count_for_stream(&orders), 2);
        assert_eq!(registry.count_for_stream(&billing), 1);
        assert!(registry.get(first.connection_id()).is_some());

        registry.unregister(first.connection_id());
        assert_eq!(registry.count_for_stream(&orders), 1);
        assert!(registry.get(first.connection_id()).is_none());
    }

    #[test]
    fn test_closing_a_connection_unregisters_it() {
        let registry = Arc::new(ConnectionRegistry::new());
        let orders = StreamId::new("orders").unwrap();
        let connection = open(&registry, &orders);

        connection.close(CloseCause::Disconnected);
        assert!(registry.is_empty());
        assert_eq!(registry.count_for_stream(&orders), 0);
    }

    #[test]
    fn test_closed_connection_is_not_kept() {
        let registry = Arc::new(ConnectionRegistry::new());
        let log: Arc<dyn EventLog> = Arc::new(InMemoryLog::new());
        let connection =
            Lifecycle::new(StreamId::new("orders").unwrap(), log, Arc::clone(&registry));
        connection.close(CloseCause::Lagged);

        registry.register(connection);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_close_stream_leaves_other_streams_open() {
        let registry = Arc::new(ConnectionRegistry::new());
        let orders = StreamId::new("orders").unwrap();
        let billing = StreamId::new("billing").unwrap();
        open(&registry, &orders);
        open(&registry, &orders);
        let other = open(&registry, &billing);

        assert_eq!(registry.close_stream(&orders, CloseCause::StreamDeleted), 2);
        assert_eq!(registry.len(), 1);
        assert!(other.is_active());
    }

    #[test]
    fn test_close_all_and_summaries() {
        let registry = Arc::new(ConnectionRegistry::new());
        let orders = StreamId::new("orders").unwrap();
        let connection = open(&registry, &orders);
        open(&registry, &orders);

        let summaries = registry.summaries();
        assert_eq!(summaries.len(), 2);
        assert!(summaries
            .iter()
            .any(|summary| summary.connection_id == connection.connection_id().as_str()));

        assert_eq!(registry.close_all(CloseCause::Shutdown), 2);
        assert!(registry.is_empty());
        assert_eq!(connection.close_cause(), Some(&CloseCause::Shutdown));
    }
}
