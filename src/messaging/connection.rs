//! # Broker Connection
//!
//! Owns the AMQP connection lifecycle (connect, channel creation, close) and
//! the process-wide shutdown hook that closes it on Ctrl+C.

use std::future::Future;
use std::sync::Arc;

use lapin::{Channel, Connection, ConnectionProperties};
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

use crate::constants::amqp::REPLY_SUCCESS;
use crate::error::{PipelineError, PipelineResult};

/// AMQP connection owned by exactly one consumer or publisher
pub struct BrokerConnection {
    url: String,
    connection_name: String,
    inner: tokio::sync::Mutex<Option<Connection>>,
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("connection_name", &self.connection_name)
            .finish()
    }
}

impl BrokerConnection {
    /// Create an unconnected handle
    pub fn new(url: impl Into<String>, connection_name: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection_name: connection_name.into(),
            inner: tokio::sync::Mutex::new(None),
        }
    }

    /// Create a handle and establish the transport session
    pub async fn connect(
        url: impl Into<String>,
        connection_name: impl Into<String>,
    ) -> PipelineResult<Self> {
        let connection = Self::new(url, connection_name);
        connection.open().await?;
        Ok(connection)
    }

    /// Establish the session if it is not already up
    pub async fn open(&self) -> PipelineResult<()> {
        let mut inner = self.inner.lock().await;
        if inner
            .as_ref()
            .map(|c| c.status().connected())
            .unwrap_or(false)
        {
            return Ok(());
        }

        let connection = Connection::connect(
            &self.url,
            ConnectionProperties::default().with_connection_name(self.connection_name.clone().into()),
        )
        .await
        .map_err(|e| PipelineError::connection(format!("RabbitMQ connection failed: {e}")))?;

        info!(connection_name = %self.connection_name, "🔌 Broker connection established");
        *inner = Some(connection);
        Ok(())
    }

    pub async fn create_channel(&self) -> PipelineResult<Channel> {
        let inner = self.inner.lock().await;
        let connection = inner
            .as_ref()
            .ok_or_else(|| PipelineError::connection("broker connection is not open"))?;

        connection
            .create_channel()
            .await
            .map_err(|e| PipelineError::connection(format!("RabbitMQ channel creation failed: {e}")))
    }

    pub async fn is_connected(&self) -> bool {
        self.inner
            .lock()
            .await
            .as_ref()
            .map(|c| c.status().connected())
            .unwrap_or(false)
    }

    /// Close the session. Safe to call when never connected or already closed.
    pub async fn close(&self) {
        let Some(connection) = self.inner.lock().await.take() else {
            debug!(connection_name = %self.connection_name, "Broker connection already closed");
            return;
        };

        if !connection.status().connected() {
            return;
        }

        match connection.close(REPLY_SUCCESS, "shutdown").await {
            Ok(()) => info!(connection_name = %self.connection_name, "🔌 Broker connection closed"),
            Err(e) => warn!(
                connection_name = %self.connection_name,
                error = %e,
                "Broker connection close reported an error"
            ),
        }
    }
}

static SHUTDOWN_SLOT: Mutex<Option<AbortHandle>> = parking_lot::const_mutex(None);

/// Process-wide shutdown handler slot
///
/// Holds at most one armed handler. Installing a handler aborts the one
/// previously installed, so re-creating a consumer never stacks a second
/// close on the same signal.
pub struct ShutdownHook;

impl ShutdownHook {
    /// Arm `action` to run once `signal` resolves, replacing any prior handler.
    /// Must be called from within a Tokio runtime.
    pub fn install<S, A>(signal: S, action: A)
    where
        S: Future<Output = ()> + Send + 'static,
        A: Future<Output = ()> + Send + 'static,
    {
        let mut slot = SHUTDOWN_SLOT.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
            debug!("Replaced previously installed shutdown handler");
        }

        let task = tokio::spawn(async move {
            signal.await;
            info!("🛑 Shutdown signal received");
            action.await;
        });
        *slot = Some(task.abort_handle());
    }

    /// Close `connection` on Ctrl+C (SIGINT)
    pub fn install_on_ctrl_c(connection: Arc<BrokerConnection>) {
        Self::install(
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "Failed to listen for Ctrl+C; shutdown hook disarmed");
                    std::future::pending::<()>().await;
                }
            },
            async move { connection.close().await },
        );
    }

    /// Disarm the current handler, if any
    pub fn clear() {
        if let Some(previous) = SHUTDOWN_SLOT.lock().take() {
            previous.abort();
        }
    }

    pub fn is_installed() -> bool {
        SHUTDOWN_SLOT
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }
}
