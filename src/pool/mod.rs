//! Connection pool with extension lifecycle.
//!
//! Every connection handed out by [`AgePool`] is guaranteed to have the
//! graph extension loaded, the search path set so the engine catalog
//! resolves, and the staging table plus staging functions in place. The
//! pool truncates the staging table on release, so no parameter leaks
//! across caller boundaries.
//!
//! Built on deadpool's managed pool (FIFO waiters, bounded size) with a
//! custom manager for session creation and recycling.

mod hooks;
mod manager;

pub use hooks::{LifecycleHooks, NoopHooks};
pub use manager::{AgeSession, ConnectionState};

pub(crate) use manager::PoolSettings;

use std::panic::Location;
use std::sync::Arc;
use std::time::Instant;

use deadpool::managed::{Object, Pool, PoolError, Timeouts};
use deadpool::Runtime;
use futures::future::BoxFuture;

use crate::config::ClientConfig;
use crate::error::Error;
use crate::staging::clear_params_sql;

use manager::AgeManager;

/// Snapshot of pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Sessions currently in existence (idle + active).
    pub total: usize,
    /// Sessions parked in the idle set.
    pub idle: usize,
    /// Sessions currently borrowed.
    pub active: usize,
    /// Callers blocked waiting for a free session.
    pub waiting: usize,
}

/// Caller-reported outcome of a borrow, used to route the session on
/// release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The session may rejoin the idle set after reset.
    Success,
    /// The session is suspect; drop it and create a fresh one on demand.
    Error,
}

/// Bounded pool of AGE-initialized sessions.
pub struct AgePool {
    inner: Pool<AgeManager>,
    settings: Arc<PoolSettings>,
}

impl AgePool {
    /// Builds a pool from configuration and a hook set. No sessions are
    /// dialed until first acquire; call [`warm_up`](AgePool::warm_up) to
    /// pre-create `min_idle` sessions.
    pub fn new(config: &ClientConfig, hooks: Arc<dyn LifecycleHooks>) -> Result<Self, Error> {
        config.validate()?;

        let settings = Arc::new(PoolSettings {
            pg_config: config.pg_config(),
            schema: config.schema.clone(),
            temp_schema: config.temp_schema.clone(),
            search_path: config.effective_search_path(),
            retry: config.retry.clone(),
            idle_timeout: config.pool.idle_timeout(),
            statement_timeout: config.statement_timeout(),
            transaction_timeout: config.transaction_timeout(),
            hooks,
        });

        let manager = AgeManager::new(settings.clone());
        let inner = Pool::builder(manager)
            .max_size(config.pool.max_size)
            .timeouts(Timeouts {
                wait: Some(config.pool.acquire_timeout()),
                create: None,
                recycle: None,
            })
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build pool: {}", e)))?;

        Ok(Self { inner, settings })
    }

    /// Dials `min_idle` sessions eagerly so the first callers do not pay
    /// connection latency.
    pub async fn warm_up(&self, min_idle: usize) -> Result<(), Error> {
        let mut held = Vec::with_capacity(min_idle);
        for _ in 0..min_idle {
            held.push(self.acquire().await?);
        }
        for conn in held {
            conn.finish(ReleaseOutcome::Success).await;
        }
        Ok(())
    }

    /// Borrows a session, blocking up to the configured acquire timeout.
    ///
    /// The returned connection has been through session init and the
    /// `on_acquire` hook. Waiters are served in FIFO order.
    #[track_caller]
    pub fn acquire(&self) -> impl std::future::Future<Output = Result<AgeConnection, Error>> + '_ {
        let site = Location::caller();
        async move {
            let started = Instant::now();
            let obj = self.inner.get().await.map_err(|e| match e {
                PoolError::Timeout(_) => Error::AcquireTimeout {
                    waited_ms: started.elapsed().as_millis() as u64,
                },
                PoolError::Backend(err) => err,
                PoolError::Closed => Error::Shutdown,
                other => Error::Internal(format!("pool failure: {}", other)),
            })?;

            if let Err(err) = self.settings.hooks.on_acquire(obj.client()).await {
                self.settings.hooks.on_error(&err).await;
                // Hook failure is fatal for this session
                drop(Object::take(obj));
                return Err(err);
            }

            Ok(AgeConnection {
                obj,
                settings: self.settings.clone(),
                acquired_at: Instant::now(),
                acquire_site: site,
            })
        }
    }

    /// Returns a connection to the pool, running the release path.
    pub async fn release(&self, conn: AgeConnection, outcome: ReleaseOutcome) {
        conn.finish(outcome).await;
    }

    /// Runs `f` with a borrowed connection, releasing it on every exit
    /// path. If the future is dropped mid-flight, the session is reset by
    /// the recycle backstop before any reuse.
    pub async fn with_connection<R, F>(&self, f: F) -> Result<R, Error>
    where
        F: for<'c> FnOnce(&'c mut AgeConnection) -> BoxFuture<'c, Result<R, Error>>,
    {
        let mut conn = self.acquire().await?;
        let result = f(&mut conn).await;
        let outcome = match &result {
            Err(e) if matches!(e.kind(), crate::error::ErrorKind::Connection) => {
                ReleaseOutcome::Error
            }
            _ => ReleaseOutcome::Success,
        };
        conn.finish(outcome).await;
        result
    }

    /// Cheap occupancy snapshot.
    pub fn stats(&self) -> PoolStats {
        let status = self.inner.status();
        PoolStats {
            total: status.size,
            idle: status.available,
            active: status.size.saturating_sub(status.available),
            waiting: status.waiting,
        }
    }

    /// Terminal shutdown: waiters are drained with a shutdown error and
    /// all sessions are closed as they come home.
    pub fn close(&self) {
        self.inner.close();
    }

    /// Whether [`close`](AgePool::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub(crate) fn settings(&self) -> &Arc<PoolSettings> {
        &self.settings
    }
}

impl std::fmt::Debug for AgePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = self.stats();
        f.debug_struct("AgePool")
            .field("total", &stats.total)
            .field("idle", &stats.idle)
            .field("active", &stats.active)
            .field("waiting", &stats.waiting)
            .finish()
    }
}

/// An exclusively-borrowed, fully-initialized session.
///
/// Not `Clone`: a connection has one owner between acquire and release.
/// Dropping it without an explicit release returns the session to the
/// pool uncleaned; the recycle backstop resets it before reuse, but the
/// release invariant (empty staging table immediately after release) only
/// holds on the explicit path.
pub struct AgeConnection {
    obj: Object<AgeManager>,
    settings: Arc<PoolSettings>,
    acquired_at: Instant,
    acquire_site: &'static Location<'static>,
}

impl AgeConnection {
    pub(crate) fn client(&self) -> &tokio_postgres::Client {
        self.obj.client()
    }

    pub(crate) fn session(&self) -> &AgeSession {
        &self.obj
    }

    pub(crate) fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// Current state of the underlying session.
    pub fn state(&self) -> ConnectionState {
        self.obj.state()
    }

    /// Statement currently or most recently executed on this session.
    pub fn last_statement(&self) -> Option<String> {
        self.obj.last_statement()
    }

    /// Where this connection was acquired, for leak diagnosis.
    pub fn acquire_site(&self) -> &'static Location<'static> {
        self.acquire_site
    }

    /// When this connection was acquired.
    pub fn acquired_at(&self) -> Instant {
        self.acquired_at
    }

    /// Release path: user hook, staging truncation, then hand the session
    /// back (or drop it on error outcomes).
    pub(crate) async fn finish(self, outcome: ReleaseOutcome) {
        let AgeConnection { obj, settings, .. } = self;

        let healthy = obj.is_healthy() && outcome == ReleaseOutcome::Success;
        if !healthy {
            tracing::debug!("discarding session on release (outcome or state unhealthy)");
            drop(Object::take(obj));
            return;
        }

        if let Err(err) = settings.hooks.on_release(obj.client()).await {
            tracing::warn!("release hook failed, discarding session: {}", err);
            settings.hooks.on_error(&err).await;
            drop(Object::take(obj));
            return;
        }

        match obj
            .client()
            .batch_execute(&clear_params_sql(&settings.schema))
            .await
        {
            Ok(()) => drop(obj), // back to the idle set
            Err(err) => {
                tracing::warn!("staging truncation failed on release, discarding session: {}", err);
                drop(Object::take(obj));
            }
        }
    }
}

impl std::fmt::Debug for AgeConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgeConnection")
            .field("state", &self.state())
            .field("acquired_at", &self.acquired_at)
            .field("acquire_site", &format_args!("{}", self.acquire_site))
            .finish()
    }
}
