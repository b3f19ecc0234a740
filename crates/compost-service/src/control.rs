//! Web server toggle.
//!
//! The toggle request comes from an asynchronous context (a Unix signal on a
//! host, a button interrupt on the device). That context only sets a flag;
//! the scheduler loop polls the flag and does the actual work of starting or
//! stopping the HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api;
use crate::scheduler::SchedulerError;
use crate::state::AppState;

/// A single pending toggle request.
#[derive(Debug, Default)]
pub struct ToggleSignal {
    requested: AtomicBool,
}

impl ToggleSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a toggle request. Safe to call from any context; does no I/O.
    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    /// Consume a pending request, if any.
    pub fn take(&self) -> bool {
        self.requested.swap(false, Ordering::AcqRel)
    }
}

/// Forward `SIGUSR1` to `signal`.
#[cfg(unix)]
pub fn spawn_signal_listener(signal: Arc<ToggleSignal>) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{SignalKind, signal as unix_signal};

    let mut stream = unix_signal(SignalKind::user_defined1())?;
    Ok(tokio::spawn(async move {
        while stream.recv().await.is_some() {
            signal.request();
        }
    }))
}

struct RunningServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

/// The HTTP server, startable and stoppable at runtime.
pub struct WebServer {
    bind: String,
    state: Arc<AppState>,
    shutdown_grace: Duration,
    running: Option<RunningServer>,
}

impl WebServer {
    pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

    pub fn new(bind: impl Into<String>, state: Arc<AppState>) -> Self {
        Self {
            bind: bind.into(),
            state,
            shutdown_grace: Self::DEFAULT_SHUTDOWN_GRACE,
            running: None,
        }
    }

    /// Bound how long [`stop`](Self::stop) waits for open connections.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// The bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.addr)
    }

    /// Bind and serve in a background task. No-op if already running.
    pub async fn start(&mut self) -> Result<SocketAddr, SchedulerError> {
        if let Some(running) = &self.running {
            return Ok(running.addr);
        }

        let listener = tokio::net::TcpListener::bind(&self.bind)
            .await
            .map_err(|source| SchedulerError::Bind {
                addr: self.bind.clone(),
                source,
            })?;
        let addr = listener.local_addr().map_err(|source| SchedulerError::Bind {
            addr: self.bind.clone(),
            source,
        })?;

        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let app = api::app(Arc::clone(&self.state));
        let task = tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!("Web server failed: {}", e);
            }
        });

        info!("Web server listening on {}", addr);
        self.running = Some(RunningServer {
            addr,
            shutdown,
            task,
        });
        self.state.scheduler.stats.write().await.web_enabled = true;
        Ok(addr)
    }

    /// Stop accepting connections and wait for in-flight requests.
    ///
    /// Connections still open after the grace period are abandoned, so a
    /// stalled client cannot hold up the caller.
    pub async fn stop(&mut self) {
        let Some(mut running) = self.running.take() else {
            return;
        };
        running.shutdown.cancel();
        match tokio::time::timeout(self.shutdown_grace, &mut running.task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("Web server task ended abnormally: {}", e),
            Err(_) => {
                warn!(
                    "Web server on {} still busy after {:?}, aborting",
                    running.addr, self.shutdown_grace
                );
                running.task.abort();
            }
        }
        info!("Web server on {} stopped", running.addr);
        self.state.scheduler.stats.write().await.web_enabled = false;
    }
}

/// Debounced reaction to [`ToggleSignal`] requests.
pub struct ToggleControl {
    signal: Arc<ToggleSignal>,
    debounce: Duration,
    last_toggle: Option<Instant>,
    server: WebServer,
}

impl ToggleControl {
    pub fn new(signal: Arc<ToggleSignal>, debounce: Duration, server: WebServer) -> Self {
        Self {
            signal,
            debounce,
            last_toggle: None,
            server,
        }
    }

    pub fn server(&self) -> &WebServer {
        &self.server
    }

    /// Start the server if it should be up at boot.
    pub async fn start_if(&mut self, enabled: bool) -> Result<(), SchedulerError> {
        if enabled {
            self.server.start().await?;
        }
        Ok(())
    }

    /// Handle a pending request. Returns whether the server state changed.
    pub async fn poll(&mut self) -> bool {
        if !self.signal.take() {
            return false;
        }

        let now = Instant::now();
        if let Some(last) = self.last_toggle
            && now.duration_since(last) < self.debounce
        {
            debug!("Ignoring toggle request within debounce window");
            return false;
        }
        self.last_toggle = Some(now);

        if self.server.is_running() {
            info!("Toggle: stopping web server");
            self.server.stop().await;
            true
        } else {
            info!("Toggle: starting web server");
            match self.server.start().await {
                Ok(_) => true,
                Err(e) => {
                    error!("Failed to start web server: {}", e);
                    false
                }
            }
        }
    }

    /// Stop the server for process shutdown.
    pub async fn shutdown(&mut self) {
        self.server.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compost_store::{DurableLog, LogOptions};
    use tokio::io::AsyncWriteExt;

    use crate::config::Config;

    fn create_test_state() -> (Arc<AppState>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = DurableLog::open(dir.path(), LogOptions::default()).unwrap();
        (AppState::new(log, Config::default()), dir)
    }

    async fn health(addr: SocketAddr) -> reqwest::Result<reqwest::StatusCode> {
        reqwest::Client::new()
            .get(format!("http://{}/api/health", addr))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status())
    }

    #[test]
    fn test_toggle_signal_take_clears() {
        let signal = ToggleSignal::new();
        assert!(!signal.take());

        signal.request();
        signal.request();
        assert!(signal.take());
        assert!(!signal.take());
    }

    #[tokio::test]
    async fn test_web_server_start_stop() {
        let (state, _dir) = create_test_state();
        let mut server = WebServer::new("127.0.0.1:0", Arc::clone(&state));
        assert!(!server.is_running());

        let addr = server.start().await.unwrap();
        assert_eq!(server.local_addr(), Some(addr));
        assert!(state.scheduler.stats.read().await.web_enabled);
        assert_eq!(health(addr).await.unwrap(), reqwest::StatusCode::OK);

        server.stop().await;
        assert!(!server.is_running());
        assert!(!state.scheduler.stats.read().await.web_enabled);
        assert!(health(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_is_bounded_with_partial_request() {
        let (state, _dir) = create_test_state();
        let mut server = WebServer::new("127.0.0.1:0", Arc::clone(&state))
            .with_shutdown_grace(Duration::from_millis(200));
        let addr = server.start().await.unwrap();

        // Headers never finished.
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /csv HTTP/1.1\r\nHost: x\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let stopped = tokio::time::timeout(Duration::from_secs(5), server.stop()).await;
        assert!(stopped.is_ok());
        assert!(!server.is_running());
        assert!(!state.scheduler.stats.read().await.web_enabled);

        // The port can be served again.
        let mut server = WebServer::new(addr.to_string(), state);
        assert_eq!(server.start().await.unwrap(), addr);
        server.stop().await;
        drop(client);
    }

    #[tokio::test]
    async fn test_stop_is_bounded_with_unread_export() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = DurableLog::open(
            dir.path(),
            LogOptions {
                capacity_bytes: None,
                sync_writes: false,
            },
        )
        .unwrap();
        let sample = compost_types::Sample {
            timestamp: compost_types::Timestamp::Uptime(0),
            temperature_c: 55.0,
            humidity_pct: 50.0,
            methane_ppm: 300.0,
        };
        while log.len_bytes() < 12 * 1024 * 1024 {
            log.append(sample).unwrap();
        }
        let state = AppState::new(log, Config::default());
        let mut server = WebServer::new("127.0.0.1:0", state)
            .with_shutdown_grace(Duration::from_millis(200));
        let addr = server.start().await.unwrap();

        // Request the export and never read the body.
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();
        client
            .write_all(b"GET /csv HTTP/1.1\r\nHost: x\r\n\r\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let stopped = tokio::time::timeout(Duration::from_secs(5), server.stop()).await;
        assert!(stopped.is_ok());
        assert!(!server.is_running());
        drop(client);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (state, _dir) = create_test_state();
        let mut server = WebServer::new("127.0.0.1:0", state);
        let first = server.start().await.unwrap();
        let second = server.start().await.unwrap();
        assert_eq!(first, second);
        server.stop().await;
    }

    #[tokio::test]
    async fn test_bind_failure() {
        let (state, _dir) = create_test_state();
        let mut server = WebServer::new("not-an-address", state);
        let err = server.start().await.unwrap_err();
        assert!(matches!(err, SchedulerError::Bind { .. }));
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_toggle_control_debounce() {
        let (state, _dir) = create_test_state();
        let signal = Arc::new(ToggleSignal::new());
        let server = WebServer::new("127.0.0.1:0", state);
        let mut control =
            ToggleControl::new(Arc::clone(&signal), Duration::from_millis(100), server);

        assert!(!control.poll().await);

        signal.request();
        assert!(control.poll().await);
        assert!(control.server().is_running());

        // Bounce.
        signal.request();
        assert!(!control.poll().await);
        assert!(control.server().is_running());

        tokio::time::sleep(Duration::from_millis(150)).await;
        signal.request();
        assert!(control.poll().await);
        assert!(!control.server().is_running());
    }

    #[tokio::test]
    async fn test_start_if() {
        let (state, _dir) = create_test_state();
        let signal = Arc::new(ToggleSignal::new());
        let mut control = ToggleControl::new(
            signal,
            Duration::ZERO,
            WebServer::new("127.0.0.1:0", state),
        );

        control.start_if(false).await.unwrap();
        assert!(!control.server().is_running());
        control.start_if(true).await.unwrap();
        assert!(control.server().is_running());
        control.shutdown().await;
        assert!(!control.server().is_running());
    }
}
