//! Instance id to session map.
//!
//! Shared by every host callback. Each entry sits behind its own async mutex so flushes for
//! different instances run in parallel while flushes for one instance are serialized.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::SessionOptions;
use crate::destination::DestinationCoordinates;
use crate::error::SessionError;
use crate::remote::ConnectionPool;
use crate::session::{SessionState, StreamSession};

type SessionSlot = Arc<Mutex<StreamSession>>;

pub struct SessionRegistry {
    sessions: DashMap<String, SessionSlot>,
    pool: Arc<ConnectionPool>,
}

impl SessionRegistry {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self {
            sessions: DashMap::new(),
            pool,
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Open a session for `id` and store it, closing any session already registered under
    /// that id first. The prior session is detached even if closing it fails. On failure
    /// nothing is stored.
    pub async fn register(
        &self,
        id: &str,
        coordinates: DestinationCoordinates,
        options: &SessionOptions,
    ) -> Result<(), SessionError> {
        match self.remove(id).await {
            Ok(true) => info!(instance = id, "closed existing session before re-init"),
            Ok(false) => {}
            Err(err) => warn!(instance = id, error = %err, "closing existing session before re-init"),
        }

        let session = StreamSession::open(&self.pool, coordinates, options).await?;
        let raced = self
            .sessions
            .insert(id.to_string(), Arc::new(Mutex::new(session)));
        if let Some(raced) = raced {
            warn!(instance = id, "concurrent init for the same instance; closing the older session");
            if let Err(err) = raced.lock().await.close().await {
                warn!(instance = id, error = %err, "closing raced session");
            }
        }
        Ok(())
    }

    /// Handle to the session for `id`, if any.
    pub fn get(&self, id: &str) -> Option<SessionSlot> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Run `f` with exclusive access to the session for `id`. Unknown ids, and sessions an
    /// exit closed while this call waited for the lock, yield `Ok(None)`.
    pub async fn with_session<F, T>(&self, id: &str, f: F) -> Result<Option<T>, SessionError>
    where
        F: for<'s> FnOnce(&'s mut StreamSession) -> BoxFuture<'s, Result<T, SessionError>>,
    {
        // Clone the slot out so the shard guard is released before awaiting.
        let Some(slot) = self.get(id) else {
            return Ok(None);
        };
        let mut session = slot.lock().await;
        if session.state() == SessionState::Closed {
            debug!(instance = id, "session closed while waiting; skipping");
            return Ok(None);
        }
        f(&mut *session).await.map(Some)
    }

    /// Detach and close the session for `id`. Waits for an in-flight flush on that session.
    /// Returns whether a session was registered.
    pub async fn remove(&self, id: &str) -> Result<bool, SessionError> {
        let Some((_, slot)) = self.sessions.remove(id) else {
            return Ok(false);
        };
        slot.lock().await.close().await?;
        Ok(true)
    }

    /// Close every session. Keeps going past failures and returns the first one.
    pub async fn close_all(&self) -> Result<usize, SessionError> {
        let ids: Vec<String> = self.sessions.iter().map(|entry| entry.key().clone()).collect();
        let mut closed = 0;
        let mut first_error = None;
        for id in ids {
            match self.remove(&id).await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(err) => {
                    warn!(instance = %id, error = %err, "closing session");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(closed),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }
}
