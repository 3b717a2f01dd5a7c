//! Server facade
//!
//! [`AssetServer`] ties the pieces together: it builds the handler chain
//! and transport from a resolved [`ServerConfig`], binds the listener,
//! tracks open connections, owns the optional live-reload bridge and
//! installs the interrupt handler.

use axum::Router;
use futures_util::{Stream, StreamExt};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{ServerConfig, ServerOptions};
use crate::error::Result;
use crate::http::{build_chain, create_router, MiddlewareChain};
use crate::livereload::LiveReloadBridge;
use crate::signal::{self, SignalGuard};
use crate::tracker::ConnectionTracker;
use crate::transport::{self, Transport};

/// A changed file reported to [`AssetServer::reload`]
pub trait FileChange {
    fn path(&self) -> &Path;
}

/// A file change as produced by a watcher: the path plus whatever
/// metadata was available
#[derive(Debug, Clone)]
pub struct ChangedFile {
    pub path: PathBuf,
    pub metadata: Option<std::fs::Metadata>,
}

impl ChangedFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            metadata: None,
        }
    }

    /// Read the current metadata of `path`; a missing file has none
    pub fn stat(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let metadata = std::fs::metadata(&path).ok();
        Self { path, metadata }
    }
}

impl FileChange for ChangedFile {
    fn path(&self) -> &Path {
        &self.path
    }
}

impl FileChange for PathBuf {
    fn path(&self) -> &Path {
        self
    }
}

impl FileChange for &Path {
    fn path(&self) -> &Path {
        self
    }
}

fn display_path(file: &impl FileChange) -> Cow<'_, str> {
    file.path().to_string_lossy()
}

/// Development asset server
pub struct AssetServer {
    config: Arc<ServerConfig>,
    chain: MiddlewareChain,
    router: Router,
    transport: Transport,
    tracker: ConnectionTracker,
    listening: CancellationToken,
    live_reload: Option<LiveReloadBridge>,
    accept_task: Option<JoinHandle<()>>,
    signal: Option<SignalGuard>,
    local_addr: Option<SocketAddr>,
}

impl AssetServer {
    /// Build the chain and transport for `config`.
    ///
    /// A failing middleware factory or unusable TLS material is an error;
    /// nothing is bound until [`start`](Self::start).
    pub fn new(config: ServerConfig) -> Result<Self> {
        let chain = build_chain(&config)?;
        let router = create_router(chain.clone(), config.debug);
        let transport = Transport::new(config.https.as_ref(), &config.cert_dir)?;
        let live_reload = config
            .livereload
            .map(|livereload| LiveReloadBridge::new(livereload.port));

        Ok(Self {
            config: Arc::new(config),
            chain,
            router,
            transport,
            tracker: ConnectionTracker::new(),
            listening: CancellationToken::new(),
            live_reload,
            accept_task: None,
            signal: None,
            local_addr: None,
        })
    }

    pub fn from_options(options: ServerOptions) -> Result<Self> {
        Self::new(options.resolve()?)
    }

    /// Bind and start serving.
    ///
    /// A bind failure is logged and reported as `None`; it is never
    /// returned as an error. Calling `start` on a running server returns
    /// the address it is already bound to. A server stopped with
    /// [`close`](Self::close) binds again; one stopped with
    /// [`force_close_all`](Self::force_close_all) cannot be restarted.
    pub async fn start(&mut self) -> Option<SocketAddr> {
        if self.local_addr.is_some() {
            return self.local_addr;
        }
        if self.tracker.is_stopped() {
            error!("Error on starting server: server has been shut down");
            return None;
        }
        if self.listening.is_cancelled() {
            self.listening = CancellationToken::new();
        }

        let listener = match TcpListener::bind(self.config.socket_addr()).await {
            Ok(listener) => listener,
            Err(err) => {
                error!("Error on starting server: {}", err);
                return None;
            }
        };
        let local_addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(err) => {
                error!("Error on starting server: {}", err);
                return None;
            }
        };
        self.local_addr = Some(local_addr);
        info!("Server started {}", self.url());

        self.accept_task = Some(tokio::spawn(transport::serve(
            listener,
            self.transport.clone(),
            self.router.clone(),
            self.tracker.clone(),
            self.listening.clone(),
        )));
        self.signal = Some(self.register_signal_hook());

        if let Some(bridge) = self.live_reload.as_ref().filter(|b| !b.is_active()) {
            bridge
                .listen(
                    &self.config.host,
                    self.config.https.as_ref(),
                    &self.config.cert_dir,
                )
                .await;
        }

        Some(local_addr)
    }

    fn register_signal_hook(&self) -> SignalGuard {
        let listening = self.listening.clone();
        let tracker = self.tracker.clone();
        let live_reload = self.live_reload.clone();

        signal::register(
            move || close_connections(&listening, &tracker, live_reload.as_ref()),
            self.config.exit_on_signal,
        )
    }

    /// Stop accepting new connections. Open connections keep being served
    /// until they finish or [`force_close_all`](Self::force_close_all) is
    /// called. The interrupt hook is deregistered. The live-reload bridge
    /// keeps running.
    pub fn close(&mut self) {
        self.listening.cancel();
        self.local_addr = None;
        self.signal = None;
    }

    /// Stop accepting and abort every open connection, live-reload
    /// connections included. Returns the number of connections closed;
    /// repeated calls return 0.
    pub fn force_close_all(&self) -> usize {
        close_connections(&self.listening, &self.tracker, self.live_reload.as_ref())
    }

    /// Pass `files` through unchanged, notifying live-reload clients of
    /// each one as it goes by
    pub fn reload<S>(&self, files: S) -> impl Stream<Item = S::Item>
    where
        S: Stream,
        S::Item: FileChange,
    {
        let bridge = self.live_reload.clone();
        files.inspect(move |file| {
            if let Some(bridge) = &bridge {
                bridge.changed([display_path(file)]);
            }
        })
    }

    /// Iterator form of [`reload`](Self::reload)
    pub fn reload_iter<I>(&self, files: I) -> impl Iterator<Item = I::Item>
    where
        I: IntoIterator,
        I::Item: FileChange,
    {
        let bridge = self.live_reload.clone();
        files.into_iter().inspect(move |file| {
            if let Some(bridge) = &bridge {
                bridge.changed([display_path(file)]);
            }
        })
    }

    /// Wait until the server stops accepting connections
    pub async fn wait(&mut self) {
        if let Some(task) = self.accept_task.take() {
            if let Err(err) = task.await {
                if err.is_panic() {
                    error!("Accept loop panicked: {}", err);
                }
            }
        }
    }

    /// URL the server is reachable at; uses the bound port once started
    pub fn url(&self) -> String {
        match self.local_addr {
            Some(addr) => format!(
                "{}://{}:{}",
                self.transport.scheme(),
                self.config.host,
                addr.port()
            ),
            None => self.config.url(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of connections currently being served
    pub fn open_connections(&self) -> usize {
        self.tracker.len()
    }

    /// Address of the live-reload side server, if it is running
    pub fn live_reload_addr(&self) -> Option<SocketAddr> {
        self.live_reload.as_ref().and_then(LiveReloadBridge::local_addr)
    }

    pub fn live_reload(&self) -> Option<&LiveReloadBridge> {
        self.live_reload.as_ref()
    }

    pub fn chain(&self) -> &MiddlewareChain {
        &self.chain
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Id of the interrupt hook while the server is running
    pub fn signal_id(&self) -> Option<u64> {
        self.signal.as_ref().map(SignalGuard::id)
    }
}

fn close_connections(
    listening: &CancellationToken,
    tracker: &ConnectionTracker,
    live_reload: Option<&LiveReloadBridge>,
) -> usize {
    listening.cancel();
    let mut closed = tracker.force_close_all();
    if let Some(bridge) = live_reload {
        closed += bridge.force_close_all();
    }
    closed
}

impl Drop for AssetServer {
    fn drop(&mut self) {
        self.signal = None;
        self.force_close_all();
    }
}

impl std::fmt::Debug for AssetServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetServer")
            .field("url", &self.url())
            .field("chain", &self.chain)
            .field("open_connections", &self.open_connections())
            .field("live_reload", &self.live_reload)
            .finish()
    }
}
