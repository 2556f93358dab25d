//! Lifecycle hooks invoked by the pool around session creation and use.

use async_trait::async_trait;
use tokio_postgres::Client;

use crate::error::Error;

/// Callbacks run at fixed points of a session's life.
///
/// All methods default to no-ops. The pool performs its own mandatory
/// work (extension load, search path, staging DDL on connect; staging
/// truncation on release) regardless of what hooks do; these callbacks
/// are for application-level additions such as `SET` commands, metrics,
/// or audit logging.
///
/// Hook errors on connect/acquire are fatal for the session: it is
/// closed and the error is surfaced to the caller. Release hook errors
/// are best-effort: logged, with the session discarded.
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// Runs before dialing, with a mutable copy of the driver config.
    async fn before_connect(&self, config: &mut tokio_postgres::Config) -> Result<(), Error> {
        let _ = config;
        Ok(())
    }

    /// Runs once per physical session, after the pool's own session init.
    async fn on_connect(&self, client: &Client) -> Result<(), Error> {
        let _ = client;
        Ok(())
    }

    /// Runs every time a connection is handed to a caller.
    async fn on_acquire(&self, client: &Client) -> Result<(), Error> {
        let _ = client;
        Ok(())
    }

    /// Runs every time a connection is returned, before the pool
    /// truncates the staging table.
    async fn on_release(&self, client: &Client) -> Result<(), Error> {
        let _ = client;
        Ok(())
    }

    /// Observes errors raised by the pool's lifecycle machinery.
    async fn on_error(&self, error: &Error) {
        let _ = error;
    }
}

/// The empty hook set.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

#[async_trait]
impl LifecycleHooks for NoopHooks {}
