//! Registry of live client connections

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::task::AbortHandle;
use tracing::debug;

/// Live connection information
#[derive(Debug)]
pub struct ConnectionEntry {
    pub peer: SocketAddr,
    pub opened_at: Instant,
    abort: AbortHandle,
}

/// Connection registry.
///
/// Entries are only used to reach tasks at shutdown; each task owns its stream.
pub struct ConnectionRegistry {
    next_id: AtomicU32,
    connections: Mutex<HashMap<u32, ConnectionEntry>>,
}

/// Removes its connection from the registry when dropped
pub struct Registration {
    registry: Arc<ConnectionRegistry>,
    id: u32,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU32::new(1),
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, ConnectionEntry>> {
        self.connections.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate a connection id and spawn the connection task.
    ///
    /// The entry is inserted before the task can observe the registry, so the
    /// task's [`Registration`] always finds it on the way out.
    pub fn spawn<F, Fut>(self: &Arc<Self>, peer: SocketAddr, task: F) -> u32
    where
        F: FnOnce(u32, Registration) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let registration = Registration {
            registry: Arc::clone(self),
            id,
        };

        let mut connections = self.lock();
        let handle = tokio::spawn(task(id, registration));
        connections.insert(
            id,
            ConnectionEntry {
                peer,
                opened_at: Instant::now(),
                abort: handle.abort_handle(),
            },
        );
        id
    }

    /// Remove a connection, returning whether it was registered
    pub fn remove(&self, id: u32) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Abort every registered connection, closing their streams
    pub fn close_all(&self) -> usize {
        let entries: Vec<(u32, ConnectionEntry)> = self.lock().drain().collect();
        for (id, entry) in &entries {
            debug!(
                conn_id = id,
                peer = %entry.peer,
                age_ms = entry.opened_at.elapsed().as_millis() as u64,
                "Closing connection"
            );
            entry.abort.abort();
        }
        entries.len()
    }

    /// Get number of active connections
    pub fn active_connections(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn peer(&self, id: u32) -> Option<SocketAddr> {
        self.lock().get(&id).map(|entry| entry.peer)
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
