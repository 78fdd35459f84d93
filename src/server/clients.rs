//! Client registry: who is connected, and when they last spoke.

use std::collections::HashMap;
use std::time::Duration;
use tokio::task::AbortHandle;
use tokio::time::Instant;

pub type ClientId = u64;

#[derive(Debug)]
struct ClientEntry {
    peer: String,
    last_seen: Instant,
    task: Option<AbortHandle>,
}

/// Bounded table of connected clients.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, ClientEntry>,
    next_id: ClientId,
    max_clients: usize,
}

impl ClientRegistry {
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: HashMap::new(),
            next_id: 1,
            max_clients,
        }
    }

    /// Registers a new client, or returns `None` when the table is full.
    pub fn register(&mut self, peer: String, now: Instant) -> Option<ClientId> {
        if self.clients.len() >= self.max_clients {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;
        self.clients.insert(
            id,
            ClientEntry {
                peer,
                last_seen: now,
                task: None,
            },
        );
        Some(id)
    }

    /// Records the task serving `id` so it can be aborted.
    pub fn attach(&mut self, id: ClientId, task: AbortHandle) {
        if let Some(entry) = self.clients.get_mut(&id) {
            entry.task = Some(task);
        }
    }

    /// Marks `id` as active at `now`.
    pub fn touch(&mut self, id: ClientId, now: Instant) {
        if let Some(entry) = self.clients.get_mut(&id) {
            entry.last_seen = now;
        }
    }

    pub fn remove(&mut self, id: ClientId) -> bool {
        self.clients.remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Clients silent for longer than `max_idle`, with their peer and task
    /// handle.
    pub fn idle(&self, now: Instant, max_idle: Duration) -> Vec<(ClientId, String, AbortHandle)> {
        self.clients
            .iter()
            .filter(|(_, entry)| now.saturating_duration_since(entry.last_seen) > max_idle)
            .filter_map(|(&id, entry)| {
                let task = entry.task.clone()?;
                Some((id, entry.peer.clone(), task))
            })
            .collect()
    }

    /// Task handles of every client still registered.
    pub fn tasks(&self) -> Vec<AbortHandle> {
        self.clients
            .values()
            .filter_map(|entry| entry.task.clone())
            .collect()
    }
}
