//! Session accounting and backend connection pooling
//!
//! Two independent admission layers:
//! - [`SessionRegistry`] caps concurrent sessions per username. The count
//!   is taken at login and released exactly once when the guard drops,
//!   however the session ends.
//! - [`ConnectionPool`] bounds concurrent backend connections, both
//!   globally across the process and per session, using semaphores so
//!   waiters queue fairly and cancelled waiters never leak permits.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tracing::{debug, info};

use skiff_core::{Error, LimitsConfig};

/// Per-username session counter with a hard cap.
pub struct SessionRegistry {
    max_per_user: u32,
    counts: Mutex<HashMap<String, u32>>,
}

impl SessionRegistry {
    /// `max_per_user == 0` means unlimited.
    pub fn new(max_per_user: u32) -> Arc<Self> {
        Arc::new(Self {
            max_per_user,
            counts: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_config(limits: &LimitsConfig) -> Arc<Self> {
        Self::new(limits.sessions_per_user)
    }

    /// Admit one session for `username`, or refuse when the cap is
    /// already met.
    pub fn register(self: &Arc<Self>, username: &str) -> Result<SessionGuard, Error> {
        {
            let mut counts = self.counts.lock();
            let count = counts.entry(username.to_string()).or_insert(0);
            if self.max_per_user > 0 && *count >= self.max_per_user {
                info!(username, cap = self.max_per_user, "session refused: per-user cap");
                return Err(Error::conflict("too many sessions for user"));
            }
            *count += 1;
            debug!(username, sessions = *count, "session admitted");
        }
        Ok(SessionGuard {
            registry: Arc::clone(self),
            username: username.to_string(),
        })
    }

    /// Current session count for a username.
    pub fn count(&self, username: &str) -> u32 {
        self.counts.lock().get(username).copied().unwrap_or(0)
    }

    fn release(&self, username: &str) {
        let mut counts = self.counts.lock();
        if let Some(count) = counts.get_mut(username) {
            *count -= 1;
            debug!(username, sessions = *count, "session released");
            // Keep the map from accumulating every username ever seen.
            if *count == 0 {
                counts.remove(username);
            }
        }
    }
}

/// Holds one slot in the registry for the life of a session.
pub struct SessionGuard {
    registry: Arc<SessionRegistry>,
    username: String,
}

impl SessionGuard {
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.release(&self.username);
    }
}

/// Shared global semaphore sized for the whole process.
pub fn global_semaphore(limit: usize) -> Arc<Semaphore> {
    Arc::new(Semaphore::new(limit))
}

/// Bounds concurrent backend connections.
///
/// A checkout holds one global permit and one per-session permit; both
/// return automatically when the checkout drops, so an operation that is
/// cancelled mid-wait or mid-flight releases cleanly. Acquisition hands
/// out an idle connection when one was returned earlier; a unit of work
/// that fails simply drops its connection, so the next acquisition dials
/// fresh instead of reusing a suspect socket.
pub struct ConnectionPool<C = ()> {
    global: Arc<Semaphore>,
    session: Arc<Semaphore>,
    idle: Mutex<Vec<C>>,
}

impl<C> ConnectionPool<C> {
    pub fn new(global: Arc<Semaphore>, per_session: usize) -> Self {
        Self {
            global,
            session: Arc::new(Semaphore::new(per_session)),
            idle: Mutex::new(Vec::new()),
        }
    }

    /// Per-session pool over the process-wide ceiling from config.
    pub fn from_config(global: Arc<Semaphore>, limits: &LimitsConfig) -> Self {
        Self::new(global, limits.connections_per_session)
    }

    /// Wait for a connection slot. Session permit first so one saturated
    /// session cannot starve the global pool while it queues.
    pub async fn acquire(&self) -> Result<Checkout<C>, Error> {
        let session = Arc::clone(&self.session)
            .acquire_owned()
            .await
            .map_err(|_| Error::transport("connection pool closed"))?;
        let global = Arc::clone(&self.global)
            .acquire_owned()
            .await
            .map_err(|_| Error::transport("connection pool closed"))?;
        Ok(Checkout {
            conn: self.idle.lock().pop(),
            _session: session,
            _global: global,
        })
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Result<Option<Checkout<C>>, Error> {
        let session = match Arc::clone(&self.session).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return Ok(None),
            Err(TryAcquireError::Closed) => {
                return Err(Error::transport("connection pool closed"))
            }
        };
        let global = match Arc::clone(&self.global).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::NoPermits) => return Ok(None),
            Err(TryAcquireError::Closed) => {
                return Err(Error::transport("connection pool closed"))
            }
        };
        Ok(Some(Checkout {
            conn: self.idle.lock().pop(),
            _session: session,
            _global: global,
        }))
    }

    /// Return a healthy connection for reuse after a successful unit of
    /// work.
    pub fn release(&self, conn: C) {
        self.idle.lock().push(conn);
    }

    /// Refuse all future acquisitions and drop idle connections; used at
    /// session teardown.
    pub fn close(&self) {
        self.session.close();
        self.idle.lock().clear();
    }
}

/// One live backend connection slot.
pub struct Checkout<C = ()> {
    conn: Option<C>,
    _session: OwnedSemaphorePermit,
    _global: OwnedSemaphorePermit,
}

impl<C> std::fmt::Debug for Checkout<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkout").finish_non_exhaustive()
    }
}

impl<C> Checkout<C> {
    /// The idle connection attached to this slot, if any. `None` means
    /// the caller opens a fresh one.
    pub fn take(&mut self) -> Option<C> {
        self.conn.take()
    }
}
