//! Client registry and session notifications
//!
//! The registry is the only structure shared by the accept loop, the reader
//! tasks and the console. Its lock is a `std::sync::Mutex` that is never held
//! across an await; notifications run after the lock is released.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tether_net::ConnectionHandle;
use tracing::info;

/// Client identifier, allocated from 1 and never reused
pub type ClientId = u64;

/// A registered client
#[derive(Debug, Clone)]
pub struct Session {
    /// Client id
    pub id: ClientId,
    /// Remote address
    pub addr: SocketAddr,
    /// Send/close side of the client connection
    pub handle: ConnectionHandle,
}

impl Session {
    /// Address-only view of this session
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            addr: self.addr,
        }
    }
}

/// Snapshot of a session for listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    /// Client id
    pub id: ClientId,
    /// Remote address
    pub addr: SocketAddr,
}

impl fmt::Display for SessionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.id, self.addr)
    }
}

/// Session lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A client was registered
    Connected(SessionInfo),
    /// A client was removed
    Disconnected(SessionInfo),
}

impl fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connected(s) => write!(f, "Client #{} connected from {}", s.id, s.addr),
            Self::Disconnected(s) => write!(f, "Client #{} at {} disconnected", s.id, s.addr),
        }
    }
}

/// Receives session lifecycle events
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Called once per event, outside the registry lock
    async fn notify(&self, event: &SessionEvent);
}

/// Notifier that writes events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: &SessionEvent) {
        info!("{}", event);
    }
}

#[derive(Default)]
struct Inner {
    sessions: BTreeMap<ClientId, Session>,
    next_id: ClientId,
}

/// Thread-safe mapping of connected clients
pub struct ClientRegistry {
    inner: Mutex<Inner>,
    notifier: Arc<dyn Notifier>,
}

impl ClientRegistry {
    /// Create a registry that logs session events
    pub fn new() -> Self {
        Self::with_notifier(Arc::new(LogNotifier))
    }

    /// Create a registry with a custom notifier
    pub fn with_notifier(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                sessions: BTreeMap::new(),
                next_id: 1,
            }),
            notifier,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a client and return its new id
    pub async fn add(&self, handle: ConnectionHandle, addr: SocketAddr) -> ClientId {
        let info = {
            let mut inner = self.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            let session = Session { id, addr, handle };
            let info = session.info();
            inner.sessions.insert(id, session);
            info
        };

        self.notifier.notify(&SessionEvent::Connected(info)).await;
        info.id
    }

    /// Remove a client. A missing id is a no-op and sends no notification.
    pub async fn remove(&self, id: ClientId) -> Option<Session> {
        let removed = self.lock().sessions.remove(&id);

        if let Some(session) = &removed {
            self.notifier
                .notify(&SessionEvent::Disconnected(session.info()))
                .await;
        }
        removed
    }

    /// Look up a client
    pub fn get(&self, id: ClientId) -> Option<Session> {
        self.lock().sessions.get(&id).cloned()
    }

    /// Snapshot of all clients, ordered by id
    pub fn enumerate(&self) -> Vec<SessionInfo> {
        self.lock().sessions.values().map(Session::info).collect()
    }

    /// All client ids, ascending
    pub fn ids(&self) -> Vec<ClientId> {
        self.lock().sessions.keys().copied().collect()
    }

    /// Number of registered clients
    pub fn len(&self) -> usize {
        self.lock().sessions.len()
    }

    /// Check if no client is registered
    pub fn is_empty(&self) -> bool {
        self.lock().sessions.is_empty()
    }

    /// Take every session out of the registry without notifications
    pub fn drain(&self) -> Vec<Session> {
        let sessions = std::mem::take(&mut self.lock().sessions);
        sessions.into_values().collect()
    }

    /// Drain the registry and close every client connection
    pub async fn close_all(&self) {
        for session in self.drain() {
            session.handle.close().await;
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("sessions", &self.enumerate())
            .finish()
    }
}
