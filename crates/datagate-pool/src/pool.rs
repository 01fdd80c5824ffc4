//! ConnectionPool — bounded pool with a FIFO waiter queue.
//!
//! Every live connection has a [`ConnectionInfo`] record in the pool. A
//! connection is either idle (in `available`, `in_use == false`) or checked
//! out (held by exactly one caller, `in_use == true`), so
//! `available + in_use == total` always holds. A connection the pool no
//! longer has a record for (reaped, or the pool shut down) is closed when
//! released instead of being returned.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use datagate_core::Credentials;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::client::{ConnectionFactory, DatabaseClient};
use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult};

/// Success rate a pool must exceed to report healthy.
const HEALTHY_SUCCESS_RATE: f64 = 0.95;

/// Average latency a pool must stay under to report healthy.
const HEALTHY_AVG_LATENCY: Duration = Duration::from_millis(1000);

/// A connection checked out of the pool.
///
/// Owned by exactly one caller until it is handed back with
/// [`ConnectionPool::release`].
#[derive(Debug)]
pub struct PooledConnection {
    id: u64,
    client: Box<dyn DatabaseClient>,
    created_at: Instant,
    last_used_at: Instant,
    query_count: u64,
}

impl PooledConnection {
    fn new(id: u64, client: Box<dyn DatabaseClient>) -> Self {
        let now = Instant::now();
        Self {
            id,
            client,
            created_at: now,
            last_used_at: now,
            query_count: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    pub fn query_count(&self) -> u64 {
        self.query_count
    }

    /// Run a statement on this connection.
    pub async fn execute(&mut self, sql: &str, params: &[Value]) -> Result<Value, String> {
        self.query_count += 1;
        self.last_used_at = Instant::now();
        self.client.execute(sql, params).await
    }

    fn close(mut self) {
        self.client.close();
    }
}

/// Pool-side record of a live connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: u64,
    pub created_at: Instant,
    pub last_used_at: Instant,
    pub in_use: bool,
    pub query_count: u64,
}

/// Pool health and usage snapshot.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PoolHealth {
    pub healthy: bool,
    pub initialized: bool,
    pub success_rate: f64,
    pub avg_query_ms: f64,
    pub max_query_ms: f64,
    pub total_queries: u64,
    pub failed_queries: u64,
    pub total_connections: usize,
    pub available_connections: usize,
    pub in_use_connections: usize,
    pub waiting_requests: usize,
    pub connections_created: u64,
    pub connections_destroyed: u64,
    pub connection_errors: u64,
    pub acquire_timeouts: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Uninitialized,
    Running,
    ShutDown,
}

/// A caller parked in `acquire` waiting for a release.
struct Waiter {
    ticket: u64,
    enqueued_at: Instant,
    reply: oneshot::Sender<PoolResult<PooledConnection>>,
}

struct PoolState {
    phase: Phase,
    credentials: Option<Credentials>,
    /// Every live connection, idle or checked out.
    connections: HashMap<u64, ConnectionInfo>,
    /// Idle connections; most recently used at the back.
    available: VecDeque<PooledConnection>,
    /// Connections being opened; they count against `max`.
    creating: usize,
    waiters: VecDeque<Waiter>,
    next_ticket: u64,
}

impl PoolState {
    fn new() -> Self {
        Self {
            phase: Phase::Uninitialized,
            credentials: None,
            connections: HashMap::new(),
            available: VecDeque::new(),
            creating: 0,
            waiters: VecDeque::new(),
            next_ticket: 1,
        }
    }

    fn in_use(&self) -> usize {
        self.connections.len() - self.available.len()
    }

    fn ensure_running(&self) -> PoolResult<()> {
        match self.phase {
            Phase::Running => Ok(()),
            Phase::Uninitialized => Err(PoolError::NotInitialized),
            Phase::ShutDown => Err(PoolError::ShutDown),
        }
    }
}

/// Rolling query statistics.
struct QueryStats {
    total: u64,
    failed: u64,
    window: VecDeque<Duration>,
}

impl QueryStats {
    fn record(&mut self, elapsed: Duration, ok: bool, capacity: usize) {
        self.total += 1;
        if !ok {
            self.failed += 1;
        }
        if self.window.len() == capacity {
            self.window.pop_front();
        }
        self.window.push_back(elapsed);
    }

    fn success_rate(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            1.0 - self.failed as f64 / self.total as f64
        }
    }

    fn average(&self) -> Duration {
        if self.window.is_empty() {
            return Duration::ZERO;
        }
        self.window.iter().sum::<Duration>() / self.window.len() as u32
    }

    fn max(&self) -> Duration {
        self.window.iter().copied().max().unwrap_or(Duration::ZERO)
    }
}

#[derive(Default)]
struct Counters {
    created: AtomicU64,
    destroyed: AtomicU64,
    connection_errors: AtomicU64,
    acquire_timeouts: AtomicU64,
}

struct ReaperTask {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    state: Mutex<PoolState>,
    stats: Mutex<QueryStats>,
    counters: Counters,
    next_id: AtomicU64,
    reaper: Mutex<Option<ReaperTask>>,
    /// Held for the whole of `initialize`.
    init: Mutex<()>,
}

/// Bounded pool of database connections.
///
/// Cheap to clone: clones share the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create an uninitialized pool. Call [`ConnectionPool::initialize`] before use.
    pub fn new(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        let window = config.latency_window;
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                state: Mutex::new(PoolState::new()),
                stats: Mutex::new(QueryStats {
                    total: 0,
                    failed: 0,
                    window: VecDeque::with_capacity(window),
                }),
                counters: Counters::default(),
                next_id: AtomicU64::new(1),
                reaper: Mutex::new(None),
                init: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub async fn is_initialized(&self) -> bool {
        self.inner.state.lock().await.phase == Phase::Running
    }

    /// Validate credentials, open `min` connections, and start the idle reaper.
    ///
    /// A second call on a running pool is a no-op; a call made while another
    /// is still opening connections waits for it to finish. Missing
    /// credentials and invalid pool bounds fail immediately with
    /// [`PoolError::Configuration`].
    pub async fn initialize(&self, credentials: Credentials) -> PoolResult<()> {
        let _init = self.inner.init.lock().await;
        {
            let state = self.inner.state.lock().await;
            match state.phase {
                Phase::Running => {
                    debug!("connection pool already initialized");
                    return Ok(());
                }
                Phase::ShutDown => return Err(PoolError::ShutDown),
                Phase::Uninitialized => {}
            }
        }
        credentials.validate()?;
        self.inner.config.validate()?;

        {
            let mut state = self.inner.state.lock().await;
            state.phase = Phase::Running;
            state.credentials = Some(credentials.clone());
        }

        for _ in 0..self.inner.config.min {
            self.inner.state.lock().await.creating += 1;
            match self.inner.open_connection(&credentials).await {
                Ok(conn) => self.inner.checkin(conn).await,
                Err(e) => {
                    self.inner.teardown(Phase::Uninitialized).await;
                    return Err(e);
                }
            }
        }

        self.start_reaper().await;
        info!(
            min = self.inner.config.min,
            max = self.inner.config.max,
            url = %credentials.url,
            "connection pool initialized"
        );
        Ok(())
    }

    /// Check out a connection, waiting up to `acquire_timeout` when the pool is exhausted.
    pub async fn acquire(&self) -> PoolResult<PooledConnection> {
        self.inner.acquire().await
    }

    /// Hand a connection back. Releasing a connection the pool no longer
    /// tracks closes it and is otherwise a no-op.
    pub async fn release(&self, connection: PooledConnection) {
        self.inner.checkin(connection).await;
    }

    /// Acquire, execute, and release on a pool-owned task.
    ///
    /// The connection is released on success, error, and timeout, and also
    /// when the caller drops the returned future before it completes.
    pub async fn query(&self, sql: impl Into<String>, params: Vec<Value>) -> PoolResult<Value> {
        let inner = Arc::clone(&self.inner);
        let sql = sql.into();
        tokio::spawn(async move { inner.run_query(sql, params).await })
            .await
            .map_err(|e| PoolError::TaskFailed(e.to_string()))?
    }

    /// Close connections idle longer than `idle_timeout`, never dropping below `min`.
    ///
    /// Returns the number of connections closed. Also run periodically by
    /// the background reaper.
    pub async fn reap_idle(&self) -> usize {
        self.inner.reap_idle().await
    }

    /// Current health, derived from query success rate and average latency.
    pub async fn health_status(&self) -> PoolHealth {
        let (initialized, total, available, in_use, waiting) = {
            let state = self.inner.state.lock().await;
            (
                state.phase == Phase::Running,
                state.connections.len(),
                state.available.len(),
                state.in_use(),
                state.waiters.iter().filter(|w| !w.reply.is_closed()).count(),
            )
        };
        let stats = self.inner.stats.lock().await;
        let success_rate = stats.success_rate();
        let avg = stats.average();
        let counters = &self.inner.counters;

        PoolHealth {
            healthy: initialized && success_rate > HEALTHY_SUCCESS_RATE && avg < HEALTHY_AVG_LATENCY,
            initialized,
            success_rate,
            avg_query_ms: avg.as_secs_f64() * 1000.0,
            max_query_ms: stats.max().as_secs_f64() * 1000.0,
            total_queries: stats.total,
            failed_queries: stats.failed,
            total_connections: total,
            available_connections: available,
            in_use_connections: in_use,
            waiting_requests: waiting,
            connections_created: counters.created.load(Ordering::Relaxed),
            connections_destroyed: counters.destroyed.load(Ordering::Relaxed),
            connection_errors: counters.connection_errors.load(Ordering::Relaxed),
            acquire_timeouts: counters.acquire_timeouts.load(Ordering::Relaxed),
        }
    }

    /// Per-connection usage records, ordered by connection id.
    pub async fn connection_stats(&self) -> Vec<ConnectionInfo> {
        let state = self.inner.state.lock().await;
        let mut infos: Vec<ConnectionInfo> = state.connections.values().cloned().collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// Stop the reaper, close idle connections, and reject pending waiters.
    ///
    /// Connections still checked out are forgotten; releasing them later
    /// closes them.
    pub async fn shutdown(&self) {
        if let Some(task) = self.inner.reaper.lock().await.take() {
            let _ = task.shutdown_tx.send(true);
            task.handle.abort();
        }
        self.inner.teardown(Phase::ShutDown).await;
        info!("connection pool shut down");
    }

    async fn start_reaper(&self) {
        let mut reaper = self.inner.reaper.lock().await;
        if reaper.is_some() {
            return;
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        // Weak so a pool dropped without shutdown() still frees its state;
        // dropping the sender then ends the loop.
        let inner = Arc::downgrade(&self.inner);
        let interval = self.inner.config.reap_interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let Some(inner) = inner.upgrade() else { break };
                        inner.reap_idle().await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("idle reaper shutting down");
                        break;
                    }
                }
            }
        });
        *reaper = Some(ReaperTask { handle, shutdown_tx });
    }
}

impl PoolInner {
    async fn acquire(self: &Arc<Self>) -> PoolResult<PooledConnection> {
        let (ticket, rx) = {
            let mut state = self.state.lock().await;
            state.ensure_running()?;
            state.waiters.retain(|w| !w.reply.is_closed());

            // Callers already queued go first.
            if state.waiters.is_empty() {
                if let Some(mut conn) = state.available.pop_back() {
                    let now = Instant::now();
                    conn.last_used_at = now;
                    if let Some(info) = state.connections.get_mut(&conn.id) {
                        info.in_use = true;
                        info.last_used_at = now;
                    }
                    debug!(id = conn.id, "reused idle connection");
                    return Ok(conn);
                }

                if state.connections.len() + state.creating < self.config.max {
                    let credentials = state.credentials.clone().ok_or(PoolError::NotInitialized)?;
                    state.creating += 1;
                    drop(state);
                    return self.create_for_caller(credentials).await;
                }
            }

            let ticket = state.next_ticket;
            state.next_ticket += 1;
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter {
                ticket,
                enqueued_at: Instant::now(),
                reply: tx,
            });
            debug!(ticket, waiting = state.waiters.len(), "pool exhausted, queued acquire");
            self.start_queued_creation(&mut state);
            (ticket, rx)
        };

        self.wait_for_release(ticket, rx).await
    }

    /// Race the waiter's reply against the acquire deadline.
    async fn wait_for_release(
        &self,
        ticket: u64,
        mut rx: oneshot::Receiver<PoolResult<PooledConnection>>,
    ) -> PoolResult<PooledConnection> {
        let timeout = self.config.acquire_timeout;
        let waited = tokio::time::timeout(timeout, &mut rx).await;
        if let Ok(reply) = waited {
            return reply.unwrap_or(Err(PoolError::ShutDown));
        }

        let mut state = self.state.lock().await;
        if let Some(pos) = state.waiters.iter().position(|w| w.ticket == ticket) {
            state.waiters.remove(pos);
            drop(state);
            self.counters.acquire_timeouts.fetch_add(1, Ordering::Relaxed);
            warn!(ticket, timeout = ?timeout, "timed out waiting for a pooled connection");
            return Err(PoolError::AcquireTimeout(timeout));
        }
        drop(state);
        // A release popped this ticket before the deadline was observed;
        // the reply was sent under the state lock and is already buffered.
        rx.await.unwrap_or(Err(PoolError::ShutDown))
    }

    /// Open a connection on a pool-owned task and deliver it to the caller.
    ///
    /// If the caller stops waiting, the task checks the new connection in.
    /// A failed create is reported to the caller only; the slot it frees
    /// goes to the head of the wait queue.
    async fn create_for_caller(self: &Arc<Self>, credentials: Credentials) -> PoolResult<PooledConnection> {
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let result = inner.open_connection(&credentials).await;
            let failed = result.is_err();
            if let Err(Ok(conn)) = tx.send(result) {
                inner.checkin(conn).await;
            }
            if failed {
                let mut state = inner.state.lock().await;
                inner.start_queued_creation(&mut state);
            }
        });
        rx.await
            .unwrap_or_else(|_| Err(PoolError::TaskFailed("connection task dropped".to_string())))
    }

    /// Open a connection on behalf of the wait queue when it has live
    /// waiters and `max` leaves room for one more.
    ///
    /// Success is checked in, which hands it to the oldest waiter. Failure
    /// is delivered to the oldest waiter and the next one gets a fresh try.
    fn start_queued_creation(self: &Arc<Self>, state: &mut PoolState) {
        state.waiters.retain(|w| !w.reply.is_closed());
        if state.phase != Phase::Running
            || state.waiters.is_empty()
            || state.connections.len() + state.creating >= self.config.max
        {
            return;
        }
        let Some(credentials) = state.credentials.clone() else {
            return;
        };
        state.creating += 1;
        debug!(waiting = state.waiters.len(), "opening connection for queued acquire");

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            match inner.open_connection(&credentials).await {
                Ok(conn) => inner.checkin(conn).await,
                Err(e) => {
                    let mut state = inner.state.lock().await;
                    while let Some(waiter) = state.waiters.pop_front() {
                        if waiter.reply.send(Err(e.clone())).is_ok() {
                            debug!(ticket = waiter.ticket, "reported failed create to waiter");
                            break;
                        }
                    }
                    inner.start_queued_creation(&mut state);
                }
            }
        });
    }

    /// Open a connection for a slot already reserved in `creating`.
    ///
    /// The new connection is registered as checked out.
    async fn open_connection(&self, credentials: &Credentials) -> PoolResult<PooledConnection> {
        let result = self.factory.connect(credentials).await;

        let mut state = self.state.lock().await;
        state.creating -= 1;
        match result {
            Ok(client) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let conn = PooledConnection::new(id, client);
                if state.phase != Phase::Running {
                    drop(state);
                    conn.close();
                    return Err(PoolError::ShutDown);
                }
                state.connections.insert(
                    id,
                    ConnectionInfo {
                        id,
                        created_at: conn.created_at,
                        last_used_at: conn.last_used_at,
                        in_use: true,
                        query_count: 0,
                    },
                );
                let total = state.connections.len();
                drop(state);
                self.counters.created.fetch_add(1, Ordering::Relaxed);
                debug!(id, total, "created new connection");
                Ok(conn)
            }
            Err(e) => {
                drop(state);
                self.counters.connection_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "failed to create connection");
                Err(PoolError::ConnectionCreate(e))
            }
        }
    }

    /// Return a connection: oldest live waiter first, otherwise the idle list.
    async fn checkin(&self, mut conn: PooledConnection) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        match state.connections.get_mut(&conn.id) {
            Some(info) => {
                info.last_used_at = now;
                info.query_count = conn.query_count;
            }
            None => {
                drop(state);
                debug!(id = conn.id, "released connection is no longer tracked, closing");
                conn.close();
                return;
            }
        }
        conn.last_used_at = now;

        while let Some(waiter) = state.waiters.pop_front() {
            let id = conn.id;
            match waiter.reply.send(Ok(conn)) {
                Ok(()) => {
                    debug!(
                        id,
                        ticket = waiter.ticket,
                        waited = ?now.duration_since(waiter.enqueued_at),
                        "handed connection to waiter"
                    );
                    return;
                }
                // The waiter gave up; try the next one.
                Err(Ok(returned)) => conn = returned,
                Err(Err(_)) => return,
            }
        }

        if let Some(info) = state.connections.get_mut(&conn.id) {
            info.in_use = false;
        }
        state.available.push_back(conn);
        debug!(idle = state.available.len(), "returned connection to pool");
    }

    async fn run_query(self: Arc<Self>, sql: String, params: Vec<Value>) -> PoolResult<Value> {
        let mut conn = self.acquire().await?;
        let started = Instant::now();
        let outcome = match self.config.query_timeout {
            Some(limit) => match tokio::time::timeout(limit, conn.execute(&sql, &params)).await {
                Ok(result) => result.map_err(PoolError::Query),
                Err(_) => Err(PoolError::QueryTimeout(limit)),
            },
            None => conn.execute(&sql, &params).await.map_err(PoolError::Query),
        };
        let elapsed = started.elapsed();
        let id = conn.id;
        self.checkin(conn).await;

        self.stats
            .lock()
            .await
            .record(elapsed, outcome.is_ok(), self.config.latency_window);
        match &outcome {
            Ok(_) => debug!(id, elapsed = ?elapsed, "query executed"),
            Err(e) => warn!(id, elapsed = ?elapsed, error = %e, "query failed"),
        }
        outcome
    }

    async fn reap_idle(&self) -> usize {
        let now = Instant::now();
        let idle_timeout = self.config.idle_timeout;
        let reaped: Vec<PooledConnection> = {
            let mut state = self.state.lock().await;
            let mut removable = state.connections.len().saturating_sub(self.config.min);
            if removable == 0 {
                return 0;
            }
            let mut kept = VecDeque::with_capacity(state.available.len());
            let mut reaped = Vec::new();
            // Front of the idle list holds the longest-idle connections.
            for conn in std::mem::take(&mut state.available) {
                if removable > 0 && now.duration_since(conn.last_used_at) > idle_timeout {
                    removable -= 1;
                    reaped.push(conn);
                } else {
                    kept.push_back(conn);
                }
            }
            state.available = kept;
            for conn in &reaped {
                state.connections.remove(&conn.id);
            }
            reaped
        };

        let count = reaped.len();
        for conn in reaped {
            conn.close();
        }
        if count > 0 {
            self.counters.destroyed.fetch_add(count as u64, Ordering::Relaxed);
            info!(reaped = count, "reaped idle connections");
        }
        count
    }

    /// Close idle connections, forget checked-out ones, and reject waiters.
    async fn teardown(&self, next: Phase) {
        let (available, waiters) = {
            let mut state = self.state.lock().await;
            state.phase = next;
            state.credentials = None;
            state.connections.clear();
            (
                std::mem::take(&mut state.available),
                std::mem::take(&mut state.waiters),
            )
        };

        let rejected = waiters.len();
        for waiter in waiters {
            let _ = waiter.reply.send(Err(PoolError::ShutDown));
        }
        let closed = available.len();
        for conn in available {
            conn.close();
        }
        self.counters.destroyed.fetch_add(closed as u64, Ordering::Relaxed);
        debug!(closed, rejected, "connection pool torn down");
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}
