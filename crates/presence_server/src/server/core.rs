//! Core relay server implementation.
//!
//! This module contains the `RelayServer` struct: listener setup, the accept
//! loops, the idle reaper and coordinated shutdown.

use crate::{
    clock::{Clock, SystemClock},
    config::ServerConfig,
    connection::ConnectionManager,
    error::ServerError,
    server::{handlers::handle_connection, reaper::spawn_idle_reaper},
};
use futures::stream::{FuturesUnordered, StreamExt as FuturesStreamExt};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

#[cfg(any(
    target_os = "linux",
    target_os = "android",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd",
    target_os = "dragonfly",
    target_os = "macos"
))]
use std::os::fd::AsRawFd;

/// The presence relay server.
///
/// `RelayServer` owns the configuration and the connection registry, binds
/// the listening sockets and runs one accept loop per listener. Every
/// accepted connection is handled in its own task; a single background task
/// sweeps idle connections and rebroadcasts the roster.
///
/// # Multi-threading
///
/// With `use_reuse_port` enabled one listener per CPU core is bound to the
/// same address with `SO_REUSEPORT`, letting the kernel spread accepts.
pub struct RelayServer {
    /// Server configuration settings
    config: Arc<ServerConfig>,

    /// Registry of live connections
    connection_manager: Arc<ConnectionManager>,

    /// Channel for coordinating server shutdown
    shutdown_sender: broadcast::Sender<()>,
}

impl RelayServer {
    /// Creates a relay server reading wall-clock time.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Creates a relay server whose registry and heartbeats read time from
    /// `clock`.
    pub fn with_clock(config: ServerConfig, clock: Arc<dyn Clock>) -> Self {
        let connection_manager = Arc::new(ConnectionManager::new(&config, clock));
        let (shutdown_sender, _) = broadcast::channel(1);

        Self {
            config: Arc::new(config),
            connection_manager,
            shutdown_sender,
        }
    }

    /// Validates the configuration, binds and serves until shutdown.
    ///
    /// # Returns
    ///
    /// `Ok(())` after a clean shutdown, or a `ServerError` if the
    /// configuration is invalid or the listeners could not be bound.
    pub async fn start(&self) -> Result<(), ServerError> {
        info!("🚀 Starting presence relay on {}", self.config.bind_address);

        let listeners = self.bind()?;
        self.serve(listeners).await
    }

    /// Creates the TCP listeners, one per acceptor.
    pub fn bind(&self) -> Result<Vec<TcpListener>, ServerError> {
        self.config.validate()?;
        let core_count = num_cpus::get();
        let num_acceptors = if self.config.use_reuse_port {
            core_count
        } else {
            1
        };

        info!(
            "🧠 Detected {} CPU cores, using {} acceptor(s)",
            core_count, num_acceptors
        );

        let mut listeners = Vec::with_capacity(num_acceptors);
        for i in 0..num_acceptors {
            let listener = self.bind_listener()?;
            match listener.local_addr() {
                Ok(local) => info!("✅ Listener {} bound on {}", i, local),
                Err(_) => info!("✅ Listener {} bound on {}", i, self.config.bind_address),
            }
            listeners.push(listener);
        }
        Ok(listeners)
    }

    fn bind_listener(&self) -> Result<TcpListener, ServerError> {
        let address = self.config.bind_address;
        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ServerError::Network(format!("Socket creation failed: {e}")))?;
        socket.set_reuse_address(true).ok();

        if self.config.use_reuse_port {
            #[cfg(any(
                target_os = "linux",
                target_os = "android",
                target_os = "freebsd",
                target_os = "openbsd",
                target_os = "netbsd",
                target_os = "dragonfly",
                target_os = "macos"
            ))]
            {
                let sockfd = socket.as_raw_fd();
                let optval: libc::c_int = 1;
                let ret = unsafe {
                    libc::setsockopt(
                        sockfd,
                        libc::SOL_SOCKET,
                        libc::SO_REUSEPORT,
                        &optval as *const _ as *const libc::c_void,
                        std::mem::size_of_val(&optval) as libc::socklen_t,
                    )
                };
                if ret != 0 {
                    warn!("Failed to set SO_REUSEPORT: {}", std::io::Error::last_os_error());
                } else {
                    debug!("SO_REUSEPORT enabled");
                }
            }
            #[cfg(target_os = "windows")]
            {
                warn!("SO_REUSEPORT is not supported on Windows. Using SO_REUSEADDR only.");
            }
        }

        socket
            .bind(&address.into())
            .map_err(|e| ServerError::Network(format!("Bind failed: {e}")))?;
        socket
            .listen(65535)
            .map_err(|e| ServerError::Network(format!("Listen failed: {e}")))?;

        let std_listener: StdTcpListener = socket.into();
        std_listener.set_nonblocking(true).ok();

        TcpListener::from_std(std_listener)
            .map_err(|e| ServerError::Network(format!("Tokio listener creation failed: {e}")))
    }

    /// Runs the accept loops and the idle reaper on already-bound listeners
    /// until [`shutdown`](Self::shutdown) is called, then terminates every
    /// live connection.
    pub async fn serve(&self, listeners: Vec<TcpListener>) -> Result<(), ServerError> {
        // Timer periods and the observer sentinel come straight from the config
        self.config.validate()?;
        if listeners.is_empty() {
            return Err(ServerError::Internal("No listeners to serve".to_string()));
        }

        let mut shutdown_receiver = self.shutdown_sender.subscribe();
        let reaper = spawn_idle_reaper(
            self.connection_manager.clone(),
            Duration::from_millis(self.config.sweep_interval_ms),
            self.config.idle_timeout_ms,
            self.shutdown_sender.subscribe(),
        );

        let mut accept_futures = listeners
            .into_iter()
            .map(|listener| {
                let connection_manager = self.connection_manager.clone();
                let config = self.config.clone();

                async move {
                    loop {
                        match listener.accept().await {
                            Ok((stream, addr)) => {
                                let connection_manager = connection_manager.clone();
                                let config = config.clone();

                                tokio::spawn(async move {
                                    if let Err(e) =
                                        handle_connection(stream, addr, connection_manager, config).await
                                    {
                                        warn!("Connection error: {}", e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                                // EMFILE and friends repeat immediately
                                tokio::time::sleep(Duration::from_millis(100)).await;
                            }
                        }
                    }
                }
            })
            .collect::<FuturesUnordered<_>>();

        tokio::select! {
            _ = accept_futures.next() => {}
            _ = shutdown_receiver.recv() => {
                info!("Shutdown signal received");
            }
        }

        info!("🧹 Performing server cleanup...");
        reaper.abort();
        self.connection_manager.shutdown_all().await;
        info!("Server stopped");
        Ok(())
    }

    /// Initiates server shutdown.
    ///
    /// Stops the accept loops and the reaper and terminates active
    /// connections.
    pub async fn shutdown(&self) -> Result<(), ServerError> {
        info!("🛑 Shutting down server...");
        let _ = self.shutdown_sender.send(());
        Ok(())
    }

    /// Gets the connection registry.
    pub fn get_connection_manager(&self) -> Arc<ConnectionManager> {
        self.connection_manager.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}
