//! `TapdashServer` builder and server loop.
//!
//! This is the entry point for running a tapdash game server. It ties
//! together all the layers: transport → protocol → room.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tapdash_protocol::{Codec, JsonCodec};
use tapdash_room::{RoomConfig, RoomRegistry};
use tapdash_transport::{Transport, WebSocketTransport};
use tokio::sync::Mutex;

use crate::TapdashError;
use crate::config::ServerConfig;
use crate::handler::handle_connection;

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState<C: Codec> {
    pub(crate) rooms: Mutex<RoomRegistry>,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
    /// Origin of `server_time` in heartbeat acks and envelope timestamps.
    pub(crate) started: Instant,
}

impl<C: Codec> ServerState<C> {
    pub(crate) fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Builder for configuring and starting a tapdash server.
///
/// # Example
///
/// ```rust,no_run
/// use tapdash::prelude::*;
///
/// # async fn start() -> Result<(), TapdashError> {
/// let server = TapdashServer::builder()
///     .bind("0.0.0.0:3000")
///     .base_url("http://192.168.1.20:3000")
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct TapdashServerBuilder {
    config: ServerConfig,
}

impl TapdashServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Replaces the whole configuration, e.g. one read by
    /// [`ServerConfig::from_env`].
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Sets the prefix of join URLs handed to displays.
    pub fn base_url(mut self, url: &str) -> Self {
        self.config.base_url = url.trim_end_matches('/').to_string();
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    /// Sets the configuration every new room is created with.
    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.config.room = config;
        self
    }

    /// Binds the listener. Uses `JsonCodec` and `WebSocketTransport`.
    pub async fn build(self) -> Result<TapdashServer<JsonCodec>, TapdashError> {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;

        let state = Arc::new(ServerState {
            rooms: Mutex::new(RoomRegistry::new(self.config.room.clone())),
            codec: JsonCodec,
            config: self.config,
            started: Instant::now(),
        });

        Ok(TapdashServer { transport, state })
    }
}

impl Default for TapdashServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound tapdash server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct TapdashServer<C: Codec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<C>>,
}

impl TapdashServer<JsonCodec> {
    /// Creates a new builder.
    pub fn builder() -> TapdashServerBuilder {
        TapdashServerBuilder::new()
    }
}

impl<C: Codec> TapdashServer<C> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, TapdashError> {
        Ok(self.transport.local_addr()?)
    }

    /// Runs the accept loop until the process is terminated.
    pub async fn run(self) -> Result<(), TapdashError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` resolves, then closes every
    /// room.
    ///
    /// Each accepted connection gets its own handler task. A background
    /// task sweeps abandoned and idle rooms every `sweep_interval`.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), TapdashError> {
        tracing::info!(
            addr = %self.local_addr()?,
            base_url = %self.state.config.base_url,
            "tapdash server running"
        );

        let sweeper = tokio::spawn(sweep_loop(Arc::clone(&self.state)));
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(
                                    error = %e,
                                    "connection ended with error"
                                );
                            }
                        });
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                    }
                },
                () = &mut shutdown => break,
            }
        }

        tracing::info!("shutting down");
        sweeper.abort();
        self.state.rooms.lock().await.shutdown_all().await;
        Ok(())
    }
}

/// Periodically deletes rooms that are abandoned or idle.
async fn sweep_loop<C: Codec>(state: Arc<ServerState<C>>) {
    let period = state.config.sweep_interval;
    let mut interval =
        tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let swept =
            RoomRegistry::sweep(&state.rooms, tokio::time::Instant::now()).await;
        if !swept.is_empty() {
            tracing::debug!(count = swept.len(), "sweep pass deleted rooms");
        }
    }
}
