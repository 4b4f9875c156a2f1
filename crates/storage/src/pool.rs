//! Bounded, fail-fast connection pool.
//!
//! `acquire` never blocks: it hands out an idle connection, opens a new one
//! while under capacity, or fails with [`PoolError::Exhausted`]. Connections
//! are liveness-probed on the way back in and dropped if the probe fails.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::connection::{ConnectionFactory, DbConnection};
use crate::error::PoolError;

/// A connection checked out of (or idle in) the pool.
pub struct PooledConnection {
    id: u64,
    conn: Box<dyn DbConnection>,
}

impl PooledConnection {
    /// Stable identifier for the underlying session, assigned at creation.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Deref for PooledConnection {
    type Target = dyn DbConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut()
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection").field("id", &self.id).finish()
    }
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Connections that exist (checked out plus idle).
    pub active: usize,
    pub idle: usize,
    pub max: usize,
    pub closed: bool,
    /// Connections opened over the pool's lifetime.
    pub created: u64,
    /// Connections dropped after a failed liveness probe.
    pub discarded: u64,
}

struct PoolState {
    idle: VecDeque<PooledConnection>,
    active: usize,
    closed: bool,
    next_id: u64,
    created: u64,
    discarded: u64,
}

pub struct ConnectionPool {
    factory: Arc<dyn ConnectionFactory>,
    max_connections: usize,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    /// A pool of at most `max_connections` sessions (minimum 1). No connection
    /// is opened until the first `acquire`.
    pub fn new(factory: Arc<dyn ConnectionFactory>, max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        info!(
            target_db = %factory.describe(),
            max_connections,
            "connection pool created"
        );
        Self {
            factory,
            max_connections,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                active: 0,
                closed: false,
                next_id: 1,
                created: 0,
                discarded: 0,
            }),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().expect("pool state lock poisoned")
    }

    /// Check out a connection without blocking.
    pub fn acquire(&self) -> Result<PooledConnection, PoolError> {
        let id = {
            let mut state = self.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            if let Some(conn) = state.idle.pop_front() {
                debug!(conn_id = conn.id, "reusing idle connection");
                return Ok(conn);
            }
            if state.active >= self.max_connections {
                return Err(PoolError::Exhausted {
                    max: self.max_connections,
                });
            }
            // Reserve the slot before connecting so concurrent callers
            // cannot overshoot the bound.
            state.active += 1;
            let id = state.next_id;
            state.next_id += 1;
            id
        };

        match self.factory.connect() {
            Ok(conn) => {
                let mut state = self.lock();
                state.created += 1;
                debug!(conn_id = id, active = state.active, "opened new connection");
                Ok(PooledConnection { id, conn })
            }
            Err(e) => {
                let mut state = self.lock();
                state.active = state.active.saturating_sub(1);
                warn!(error = %e, "failed to open connection");
                Err(PoolError::Connect(e))
            }
        }
    }

    /// Return a connection. It is probed first; a dead connection is dropped
    /// and its slot freed. After `close_all` every returned connection is
    /// simply dropped.
    pub fn release(&self, mut conn: PooledConnection) {
        if self.lock().closed {
            debug!(conn_id = conn.id, "pool closed, dropping returned connection");
            return;
        }

        // Probe outside the lock; it is a database round-trip.
        let alive = conn.probe();

        let mut state = self.lock();
        if state.closed {
            return;
        }
        if alive {
            state.idle.push_back(conn);
        } else {
            state.active = state.active.saturating_sub(1);
            state.discarded += 1;
            warn!(conn_id = conn.id, "liveness probe failed, discarding connection");
        }
    }

    /// Check out a connection that is released when the guard drops.
    pub fn acquire_scoped(&self) -> Result<PoolGuard<'_>, PoolError> {
        let conn = self.acquire()?;
        Ok(PoolGuard {
            pool: self,
            conn: Some(conn),
        })
    }

    /// Close the pool: drop idle connections, reset counters, and refuse all
    /// further `acquire` calls. Checked-out connections are dropped when
    /// they are released.
    pub fn close_all(&self) {
        let mut state = self.lock();
        let drained = state.idle.len();
        state.idle.clear();
        state.active = 0;
        state.closed = true;
        info!(drained, "connection pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.lock();
        PoolStats {
            active: state.active,
            idle: state.idle.len(),
            max: self.max_connections,
            closed: state.closed,
            created: state.created,
            discarded: state.discarded,
        }
    }
}

/// Scoped checkout from [`ConnectionPool::acquire_scoped`].
pub struct PoolGuard<'a> {
    pool: &'a ConnectionPool,
    conn: Option<PooledConnection>,
}

impl PoolGuard<'_> {
    pub fn id(&self) -> u64 {
        self.conn.as_ref().map(|c| c.id).unwrap_or_default()
    }
}

impl Deref for PoolGuard<'_> {
    type Target = PooledConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("pool guard used after release")
    }
}

impl DerefMut for PoolGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("pool guard used after release")
    }
}

impl Drop for PoolGuard<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}
