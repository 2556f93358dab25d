//! Session type and the deadpool manager that creates and recycles it.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use deadpool::managed::{Metrics, RecycleError, RecycleResult};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};

use crate::config::RetryConfig;
use crate::error::Error;
use crate::pool::hooks::LifecycleHooks;
use crate::staging::{clear_params_sql, session_init_batch};

/// Observable state of a session, per the connection state machine:
/// `Idle ⇄ Active → (Idle | Error)`, `Closed` terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Active,
    Error,
    Closed,
}

/// Mutable statement-tracking metadata, guarded by a mutex inside the
/// session. Critical sections are a few field writes.
#[derive(Debug)]
pub(crate) struct SessionMeta {
    pub state: ConnectionState,
    /// An open transaction was dropped without commit or rollback; the
    /// session must be rolled back before reuse.
    pub needs_rollback: bool,
    /// Set while an explicit transaction owns the session; suppresses
    /// executor-level retries.
    pub in_transaction: bool,
    /// A statement failed inside the open transaction; the server has
    /// aborted it and only rollback can finish it.
    pub txn_aborted: bool,
    pub last_statement: Option<String>,
    pub statement_started_at: Option<Instant>,
}

/// A physical database session: the driver client plus the task driving
/// its connection, and statement-tracking state.
pub struct AgeSession {
    client: Client,
    meta: Mutex<SessionMeta>,
    conn_task: JoinHandle<()>,
    created_at: Instant,
}

impl AgeSession {
    fn new(client: Client, conn_task: JoinHandle<()>) -> Self {
        Self {
            client,
            meta: Mutex::new(SessionMeta {
                state: ConnectionState::Idle,
                needs_rollback: false,
                in_transaction: false,
                txn_aborted: false,
                last_statement: None,
                statement_started_at: None,
            }),
            conn_task,
            created_at: Instant::now(),
        }
    }

    pub(crate) fn client(&self) -> &Client {
        &self.client
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub(crate) fn meta(&self) -> MutexGuard<'_, SessionMeta> {
        // A poisoned lock means a panic mid-update; the session is
        // discarded by recycle either way.
        match self.meta.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.meta().state
    }

    /// Text of the statement currently or most recently executed.
    pub fn last_statement(&self) -> Option<String> {
        self.meta().last_statement.clone()
    }

    /// Start time of the currently executing statement, if any.
    pub fn statement_started_at(&self) -> Option<Instant> {
        self.meta().statement_started_at
    }

    /// Marks the start of a statement. Fails when the session is unusable.
    pub(crate) fn begin_statement(&self, text: &str) -> Result<(), Error> {
        let mut meta = self.meta();
        match meta.state {
            ConnectionState::Error => Err(Error::Connection {
                message: "connection is in error state".into(),
                source: None,
            }),
            ConnectionState::Closed => Err(Error::Connection {
                message: "connection is closed".into(),
                source: None,
            }),
            _ => {
                meta.state = ConnectionState::Active;
                meta.last_statement = Some(text.to_string());
                meta.statement_started_at = Some(Instant::now());
                Ok(())
            }
        }
    }

    /// Marks the end of a statement: back to idle on success, error
    /// otherwise.
    pub(crate) fn finish_statement(&self, success: bool) {
        let mut meta = self.meta();
        meta.statement_started_at = None;
        meta.state = if success {
            ConnectionState::Idle
        } else {
            ConnectionState::Error
        };
    }

    pub(crate) fn mark_error(&self) {
        self.meta().state = ConnectionState::Error;
    }

    pub(crate) fn set_in_transaction(&self, value: bool) {
        self.meta().in_transaction = value;
    }

    pub(crate) fn in_transaction(&self) -> bool {
        self.meta().in_transaction
    }

    pub(crate) fn set_needs_rollback(&self) {
        self.meta().needs_rollback = true;
    }

    pub(crate) fn set_txn_aborted(&self) {
        self.meta().txn_aborted = true;
    }

    pub(crate) fn clear_txn_aborted(&self) {
        self.meta().txn_aborted = false;
    }

    pub(crate) fn txn_aborted(&self) -> bool {
        self.meta().txn_aborted
    }

    /// Whether the session can be returned to the idle set without
    /// recovery.
    pub(crate) fn is_healthy(&self) -> bool {
        let meta = self.meta();
        meta.state != ConnectionState::Error
            && meta.state != ConnectionState::Closed
            && !meta.needs_rollback
    }
}

impl Drop for AgeSession {
    fn drop(&mut self) {
        self.meta().state = ConnectionState::Closed;
        // Dropping the client closes the socket; the connection task
        // finishes on its own, abort just hurries it along.
        self.conn_task.abort();
    }
}

impl std::fmt::Debug for AgeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let meta = self.meta();
        f.debug_struct("AgeSession")
            .field("state", &meta.state)
            .field("in_transaction", &meta.in_transaction)
            .field("last_statement", &meta.last_statement)
            .finish()
    }
}

/// Everything a session or connection needs to know about its pool:
/// dial config, schema names, retry policy, and the hook set.
pub struct PoolSettings {
    pub(crate) pg_config: tokio_postgres::Config,
    pub(crate) schema: String,
    pub(crate) temp_schema: String,
    pub(crate) search_path: String,
    pub(crate) retry: RetryConfig,
    pub(crate) idle_timeout: std::time::Duration,
    pub(crate) statement_timeout: Option<std::time::Duration>,
    pub(crate) transaction_timeout: Option<std::time::Duration>,
    pub(crate) hooks: Arc<dyn LifecycleHooks>,
}

impl std::fmt::Debug for PoolSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolSettings")
            .field("schema", &self.schema)
            .field("temp_schema", &self.temp_schema)
            .field("search_path", &self.search_path)
            .finish()
    }
}

/// deadpool manager for [`AgeSession`]s.
///
/// `create` dials with retry and runs the mandatory session init;
/// `recycle` enforces the state machine, rolls back abandoned
/// transactions, pings, and truncates the staging table as a backstop
/// for connections that were dropped instead of released.
pub(crate) struct AgeManager {
    settings: Arc<PoolSettings>,
}

impl AgeManager {
    pub(crate) fn new(settings: Arc<PoolSettings>) -> Self {
        Self { settings }
    }

    /// One dial attempt: connect, spawn the connection task.
    async fn dial(&self, pg_config: &tokio_postgres::Config) -> Result<AgeSession, Error> {
        let (client, connection) = pg_config.connect(NoTls).await.map_err(|e| Error::Connection {
            message: format!("failed to connect: {}", e),
            source: Some(e),
        })?;

        let conn_task = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::debug!("connection task terminated: {}", e);
            }
        });

        Ok(AgeSession::new(client, conn_task))
    }

    /// Dials with exponential backoff per the retry policy. Only dial
    /// failures are retried; session init failures are fatal.
    async fn dial_with_retry(&self, pg_config: &tokio_postgres::Config) -> Result<AgeSession, Error> {
        let retry = &self.settings.retry;
        let mut attempt = 1;
        loop {
            match self.dial(pg_config).await {
                Ok(session) => return Ok(session),
                Err(err) if attempt < retry.max_attempts => {
                    let delay = retry.jittered_delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "session dial failed, retrying: {}",
                        err
                    );
                    self.settings.hooks.on_error(&err).await;
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Runs the mandatory session init plus the user's `on_connect`.
    async fn init_session(&self, session: &AgeSession) -> Result<(), Error> {
        let batch = session_init_batch(
            &self.settings.search_path,
            &self.settings.schema,
            &self.settings.temp_schema,
        );
        session
            .client()
            .batch_execute(&batch)
            .await
            .map_err(|e| Error::Connection {
                message: format!("session init failed: {}", e),
                source: Some(e),
            })?;

        self.settings.hooks.on_connect(session.client()).await
    }
}

impl deadpool::managed::Manager for AgeManager {
    type Type = AgeSession;
    type Error = Error;

    async fn create(&self) -> Result<AgeSession, Error> {
        let mut pg_config = self.settings.pg_config.clone();
        self.settings.hooks.before_connect(&mut pg_config).await?;

        let session = self.dial_with_retry(&pg_config).await?;

        if let Err(err) = self.init_session(&session).await {
            self.settings.hooks.on_error(&err).await;
            // Session is dropped here; dial succeeded but init makes it
            // unusable, and init failures are not retried.
            return Err(err);
        }

        tracing::debug!("created session with staging objects initialized");
        Ok(session)
    }

    async fn recycle(&self, session: &mut AgeSession, metrics: &Metrics) -> RecycleResult<Error> {
        if metrics.last_used() > self.settings.idle_timeout {
            return Err(RecycleError::message("idle timeout expired"));
        }

        let (state, needs_rollback) = {
            let meta = session.meta();
            (meta.state, meta.needs_rollback)
        };

        match state {
            ConnectionState::Error | ConnectionState::Closed => {
                return Err(RecycleError::message("session is in error state"));
            }
            _ => {}
        }

        if needs_rollback {
            session
                .client()
                .batch_execute("ROLLBACK")
                .await
                .map_err(|e| RecycleError::message(format!("rollback failed: {}", e)))?;
            let mut meta = session.meta();
            meta.needs_rollback = false;
            meta.in_transaction = false;
            meta.txn_aborted = false;
        }

        // Light ping; failure drops the session and a fresh one is
        // created on demand.
        session
            .client()
            .batch_execute("SELECT 1")
            .await
            .map_err(|e| RecycleError::message(format!("ping failed: {}", e)))?;

        // Backstop for connections dropped without an explicit release.
        session
            .client()
            .batch_execute(&clear_params_sql(&self.settings.schema))
            .await
            .map_err(|e| RecycleError::message(format!("staging reset failed: {}", e)))?;

        Ok(())
    }
}

