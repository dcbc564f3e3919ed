//! Keyed pool of reusable SSH transports.
//!
//! Transports are grouped by the deterministic pool key derived from their
//! [`ConnectionCfg`](crate::config::ConnectionCfg). Each key holds an idle
//! queue plus a count of every connection belonging to that key, lent or
//! idle. A background scrubber expires idle and aged-out transports.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace, warn};

use crate::config::ConnectionCfg;
use crate::dial::{Dial, Dialed};
use crate::error::{Error, Result};
use crate::transport::Transport;

/// Tuning knobs for the connection pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Cap on connections per key, idle and lent combined.
    pub max_per_key: usize,
    /// Cap on idle connections kept per key; overflow on put is closed.
    pub max_idle_per_key: usize,
    /// Idle connections unused for this long are closed. Zero disables.
    #[serde(with = "humantime_serde")]
    pub idle_timeout: Duration,
    /// Connections older than this are closed regardless of use. Zero disables.
    #[serde(with = "humantime_serde")]
    pub max_connection_age: Duration,
    /// Scrubber tick interval. Zero disables the scrubber.
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
    /// Timeout for dials performed by the pool. Zero falls back to the
    /// configuration's own timeout.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_per_key: 10,
            max_idle_per_key: 5,
            idle_timeout: Duration::from_secs(600),
            max_connection_age: Duration::from_secs(3600),
            health_check_interval: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(15),
        }
    }
}

impl PoolConfig {
    /// Create a configuration with the defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the per-key connection cap.
    pub fn max_per_key(mut self, max: usize) -> Self {
        self.max_per_key = max;
        self
    }

    /// Set the per-key idle cap.
    pub fn max_idle_per_key(mut self, max: usize) -> Self {
        self.max_idle_per_key = max;
        self
    }

    /// Set the idle timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the maximum connection age.
    pub fn max_connection_age(mut self, age: Duration) -> Self {
        self.max_connection_age = age;
        self
    }

    /// Set the scrubber interval.
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set the dial timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// A pool-owned transport plus the bastion carrying it, if any.
///
/// Closing a managed connection closes both transports: the target first,
/// then the bastion under it.
pub struct ManagedConnection<T: Transport> {
    transport: Arc<T>,
    bastion: Option<Arc<T>>,
    key: String,
    created_at: Instant,
    last_used: Instant,
}

impl<T: Transport> std::fmt::Debug for ManagedConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedConnection")
            .field("key", &self.key)
            .field("created_at", &self.created_at)
            .field("last_used", &self.last_used)
            .field("has_bastion", &self.bastion.is_some())
            .finish()
    }
}

impl<T: Transport> ManagedConnection<T> {
    /// Wrap a freshly dialed transport pair under a pool key.
    pub fn from_dialed(key: impl Into<String>, dialed: Dialed<T>) -> Self {
        let now = Instant::now();
        Self {
            transport: Arc::new(dialed.target),
            bastion: dialed.bastion.map(Arc::new),
            key: key.into(),
            created_at: now,
            last_used: now,
        }
    }

    /// The target transport.
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// The bastion transport, when the connection is tunneled.
    pub fn bastion(&self) -> Option<&Arc<T>> {
        self.bastion.as_ref()
    }

    /// The pool key this connection belongs to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Age since the transport was dialed.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Close the target, then the bastion. The first error is returned,
    /// later ones are logged.
    pub async fn close(&self) -> std::result::Result<(), russh::Error> {
        let mut first_err = None;
        if let Err(e) = self.transport.close().await {
            first_err = Some(e);
        }
        if let Some(bastion) = &self.bastion {
            if let Err(e) = bastion.close().await {
                if first_err.is_none() {
                    first_err = Some(e);
                } else {
                    warn!(host = %bastion.host(), error = %e, "failed to close bastion transport");
                }
            }
        }
        match first_err {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

/// Counters accumulated over a pool's lifetime.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Fresh dials performed for `get`.
    pub dials: u64,
    /// Gets satisfied from the idle queue.
    pub reuses: u64,
    /// Connections closed for idle timeout or age.
    pub expired: u64,
    /// Connections closed for failed probes or unhealthy puts.
    pub discarded: u64,
}

/// One key's slice of the pool: its idle queue and total count.
struct HostPool<T: Transport> {
    idle: VecDeque<ManagedConnection<T>>,
    /// Idle plus lent connections for this key. Never negative; decrements
    /// are clamped.
    num_active: usize,
}

impl<T: Transport> HostPool<T> {
    fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            num_active: 0,
        }
    }
}

/// Keyed pool of SSH transports with health checks and a background scrubber.
pub struct ConnectionPool<D: Dial> {
    config: PoolConfig,
    dialer: D,
    pools: RwLock<HashMap<String, Arc<Mutex<HostPool<D::Transport>>>>>,
    dials: AtomicU64,
    reuses: AtomicU64,
    expired: AtomicU64,
    discarded: AtomicU64,
    stop_tx: watch::Sender<bool>,
    scrubber: Mutex<Option<JoinHandle<()>>>,
}

impl<D: Dial> ConnectionPool<D> {
    /// Create a pool around `dialer`. When the health-check interval is
    /// non-zero, a scrubber task starts immediately; call
    /// [`shutdown`](Self::shutdown) to stop it and close idle transports.
    pub fn new(dialer: D, config: PoolConfig) -> Arc<Self> {
        let (stop_tx, stop_rx) = watch::channel(false);
        let interval = config.health_check_interval;
        debug!(
            max_per_key = %config.max_per_key,
            max_idle_per_key = %config.max_idle_per_key,
            idle_timeout = ?config.idle_timeout,
            max_connection_age = ?config.max_connection_age,
            health_check_interval = ?interval,
            "creating connection pool"
        );

        let pool = Arc::new(Self {
            config,
            dialer,
            pools: RwLock::new(HashMap::new()),
            dials: AtomicU64::new(0),
            reuses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            stop_tx,
            scrubber: Mutex::new(None),
        });

        if !interval.is_zero() {
            let weak = Arc::downgrade(&pool);
            let handle = tokio::spawn(async move {
                scrub_loop(weak, stop_rx, interval).await;
            });
            if let Ok(mut slot) = pool.scrubber.try_lock() {
                *slot = Some(handle);
            }
        }

        pool
    }

    /// Borrow a healthy connection for `cfg`, reusing an idle one when
    /// possible, dialing otherwise. At the per-key cap this returns
    /// [`Error::PoolExhausted`] without blocking.
    pub async fn get(&self, cfg: &ConnectionCfg) -> Result<ManagedConnection<D::Transport>> {
        let key = cfg.pool_key();
        let host_pool = self.pool_for(&key).await;

        {
            let mut slot = host_pool.lock().await;
            let now = Instant::now();

            while let Some(mut conn) = slot.idle.pop_front() {
                if self.is_expired(&conn, now) {
                    debug!(key = %key, age = ?conn.age(), "closing expired idle connection");
                    self.expired.fetch_add(1, Ordering::Relaxed);
                    slot.num_active = slot.num_active.saturating_sub(1);
                    if let Err(e) = conn.close().await {
                        warn!(key = %key, error = %e, "failed to close expired connection");
                    }
                    continue;
                }
                match conn.transport.keepalive().await {
                    Ok(()) => {
                        conn.touch();
                        self.reuses.fetch_add(1, Ordering::Relaxed);
                        trace!(key = %key, "reusing idle connection");
                        return Ok(conn);
                    }
                    Err(e) => {
                        debug!(key = %key, error = %e, "idle connection failed keepalive, discarding");
                        self.discarded.fetch_add(1, Ordering::Relaxed);
                        slot.num_active = slot.num_active.saturating_sub(1);
                        if let Err(close_err) = conn.close().await {
                            warn!(key = %key, error = %close_err, "failed to close dead connection");
                        }
                    }
                }
            }

            if slot.num_active >= self.config.max_per_key {
                return Err(Error::PoolExhausted {
                    key,
                    limit: self.config.max_per_key,
                });
            }
            // Reserve the slot before dialing so concurrent gets cannot
            // overshoot the cap while the dial is in flight.
            slot.num_active += 1;
        }

        let timeout = if self.config.connect_timeout.is_zero() {
            cfg.effective_timeout()
        } else {
            self.config.connect_timeout
        };

        match self.dialer.dial(cfg, timeout).await {
            Ok(dialed) => {
                self.dials.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "dialed new pooled connection");
                Ok(ManagedConnection::from_dialed(key, dialed))
            }
            Err(e) => {
                let mut slot = host_pool.lock().await;
                slot.num_active = slot.num_active.saturating_sub(1);
                Err(e)
            }
        }
    }

    /// Return a borrowed connection. Healthy connections go back to the idle
    /// queue (up to the idle cap); everything else is closed and accounted.
    pub async fn put(&self, mut conn: ManagedConnection<D::Transport>, healthy: bool) {
        let key = conn.key.clone();
        let host_pool = self.pool_for(&key).await;
        let mut slot = host_pool.lock().await;

        if !healthy || slot.idle.len() >= self.config.max_idle_per_key {
            if !healthy {
                debug!(key = %key, "discarding unhealthy connection");
            } else {
                trace!(key = %key, "idle queue full, closing returned connection");
            }
            self.discarded.fetch_add(1, Ordering::Relaxed);
            slot.num_active = slot.num_active.saturating_sub(1);
            if let Err(e) = conn.close().await {
                warn!(key = %key, error = %e, "failed to close returned connection");
            }
            return;
        }

        conn.touch();
        slot.idle.push_back(conn);
    }

    /// Close a borrowed connection outright, releasing its slot.
    pub async fn close_connection(&self, conn: ManagedConnection<D::Transport>) {
        let key = conn.key.clone();
        let host_pool = self.pool_for(&key).await;
        {
            let mut slot = host_pool.lock().await;
            slot.num_active = slot.num_active.saturating_sub(1);
        }
        if let Err(e) = conn.close().await {
            warn!(key = %key, error = %e, "failed to close connection");
        }
    }

    /// Total connections (idle plus lent) currently counted for `key`.
    pub async fn num_active(&self, key: &str) -> usize {
        match self.pools.read().await.get(key) {
            Some(slot) => slot.lock().await.num_active,
            None => 0,
        }
    }

    /// Idle connections currently queued for `key`.
    pub async fn num_idle(&self, key: &str) -> usize {
        match self.pools.read().await.get(key) {
            Some(slot) => slot.lock().await.idle.len(),
            None => 0,
        }
    }

    /// Lifetime counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            dials: self.dials.load(Ordering::Relaxed),
            reuses: self.reuses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }

    /// One scrubber pass: close idle connections past the idle timeout or
    /// the age limit. Lent connections are untouched; they are not idle.
    pub async fn scrub(&self) {
        let pools: Vec<(String, Arc<Mutex<HostPool<D::Transport>>>)> = {
            let map = self.pools.read().await;
            map.iter().map(|(k, v)| (k.clone(), Arc::clone(v))).collect()
        };

        let now = Instant::now();
        for (key, host_pool) in pools {
            let mut slot = host_pool.lock().await;
            let mut kept = VecDeque::with_capacity(slot.idle.len());
            while let Some(conn) = slot.idle.pop_front() {
                if self.is_expired(&conn, now) {
                    debug!(key = %key, age = ?conn.age(), "scrubber closing stale connection");
                    self.expired.fetch_add(1, Ordering::Relaxed);
                    slot.num_active = slot.num_active.saturating_sub(1);
                    if let Err(e) = conn.close().await {
                        warn!(key = %key, error = %e, "scrubber failed to close connection");
                    }
                } else {
                    kept.push_back(conn);
                }
            }
            slot.idle = kept;
        }
    }

    /// Stop the scrubber and close every idle connection. Lent connections
    /// remain the borrower's responsibility.
    pub async fn shutdown(&self) {
        debug!("shutting down connection pool");
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.scrubber.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "scrubber task ended abnormally");
            }
        }

        let mut map = self.pools.write().await;
        for (key, host_pool) in map.drain() {
            let mut slot = host_pool.lock().await;
            while let Some(conn) = slot.idle.pop_front() {
                if let Err(e) = conn.close().await {
                    warn!(key = %key, error = %e, "failed to close connection during shutdown");
                }
            }
            slot.num_active = 0;
        }
    }

    async fn pool_for(&self, key: &str) -> Arc<Mutex<HostPool<D::Transport>>> {
        {
            let map = self.pools.read().await;
            if let Some(slot) = map.get(key) {
                return Arc::clone(slot);
            }
        }
        let mut map = self.pools.write().await;
        Arc::clone(
            map.entry(key.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(HostPool::new()))),
        )
    }

    fn is_expired(&self, conn: &ManagedConnection<D::Transport>, now: Instant) -> bool {
        if !self.config.idle_timeout.is_zero()
            && now.duration_since(conn.last_used) > self.config.idle_timeout
        {
            return true;
        }
        if !self.config.max_connection_age.is_zero()
            && now.duration_since(conn.created_at) > self.config.max_connection_age
        {
            return true;
        }
        false
    }
}

async fn scrub_loop<D: Dial>(
    pool: std::sync::Weak<ConnectionPool<D>>,
    mut stop_rx: watch::Receiver<bool>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick of a tokio interval fires immediately; skip it so the
    // scrubber waits a full interval before its first pass.
    ticker.tick().await;
    loop {
        tokio::select! {
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let Some(pool) = pool.upgrade() else { break };
                pool.scrub().await;
            }
        }
    }
    trace!("scrubber stopped");
}
