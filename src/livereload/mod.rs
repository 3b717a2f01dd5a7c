//! Live-reload side channel
//!
//! A small LiveReload-protocol server on its own port. Browsers load
//! `/livereload.js`, open a WebSocket on `/livereload` and are told to
//! reload whenever [`LiveReloadBridge::changed`] is called or a build tool
//! hits `/changed`.
//!
//! Nothing in here is allowed to fail the host server: bind and TLS
//! problems are logged at debug level and the bridge simply stays
//! inactive.

pub mod protocol;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::TlsSettings;
use crate::tracker::ConnectionTracker;
use crate::transport::{self, Transport};

use protocol::{split_files, ChangedRequest, ClientMessage, ServerMessage};

/// Bundled browser client served at `/livereload.js`
pub const CLIENT_SCRIPT: &str = include_str!("../../assets/livereload.js");

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Pending reload events per client before older ones are dropped
const EVENT_BUFFER: usize = 64;

struct Inner {
    port: u16,
    events: broadcast::Sender<String>,
    active: AtomicBool,
    local_addr: Mutex<Option<SocketAddr>>,
    tracker: ConnectionTracker,
    listening: CancellationToken,
}

/// Handle to the live-reload side server
#[derive(Clone)]
pub struct LiveReloadBridge {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for LiveReloadBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveReloadBridge")
            .field("port", &self.inner.port)
            .field("active", &self.is_active())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

impl LiveReloadBridge {
    /// Bridge for `port`. It only stops accepting on
    /// [`force_close_all`](Self::force_close_all).
    pub fn new(port: u16) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            inner: Arc::new(Inner {
                port,
                events,
                active: AtomicBool::new(false),
                local_addr: Mutex::new(None),
                tracker: ConnectionTracker::new(),
                listening: CancellationToken::new(),
            }),
        }
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// Bind the side server and start accepting. Returns the bound address,
    /// or `None` if the bridge could not be started.
    pub async fn listen(
        &self,
        host: &str,
        https: Option<&TlsSettings>,
        cert_dir: &Path,
    ) -> Option<SocketAddr> {
        let transport = match Transport::new(https, cert_dir) {
            Ok(transport) => transport,
            Err(err) => {
                debug!("Live reload disabled: {}", err);
                return None;
            }
        };

        let addr = format!("{}:{}", host, self.inner.port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(listener) => listener,
            Err(err) => {
                debug!("Live reload cannot listen on {}: {}", addr, err);
                return None;
            }
        };
        let local_addr = listener.local_addr().ok();

        *self.inner.local_addr.lock() = local_addr;
        self.inner.active.store(true, Ordering::Release);
        debug!("Live reload listening on {:?}", local_addr);

        tokio::spawn(transport::serve(
            listener,
            transport,
            self.router(),
            self.inner.tracker.clone(),
            self.inner.listening.clone(),
        ));
        local_addr
    }

    /// Router of the side server
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(welcome))
            .route("/livereload", get(websocket))
            .route("/livereload.js", get(client_script))
            .route("/changed", get(changed_query).post(changed_body))
            .with_state(self.clone())
    }

    /// Tell every subscribed client that `paths` changed. Does nothing
    /// unless the bridge is listening. Returns the number of clients
    /// notified.
    pub fn changed<I, P>(&self, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        if !self.is_active() {
            return 0;
        }
        for path in paths {
            // No subscribers is not an error
            let _ = self.inner.events.send(path.as_ref().to_string());
        }
        self.clients()
    }

    /// Number of connected WebSocket clients
    pub fn clients(&self) -> usize {
        self.inner.events.receiver_count()
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.inner.local_addr.lock()
    }

    /// Stop listening and drop every bridge connection, WebSocket
    /// sessions included. Returns the number of connections closed.
    pub fn force_close_all(&self) -> usize {
        self.inner.active.store(false, Ordering::Release);
        self.inner.listening.cancel();
        self.inner.tracker.force_close_all()
    }
}

async fn welcome() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "livereload": "Welcome",
        "version": VERSION,
    }))
}

async fn client_script() -> Response {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        CLIENT_SCRIPT,
    )
        .into_response()
}

async fn websocket(State(bridge): State<LiveReloadBridge>, ws: WebSocketUpgrade) -> Response {
    // Subscribe before the upgrade so no change between the handshake and
    // the session start is lost.
    let events = bridge.inner.events.subscribe();
    let tracker = bridge.inner.tracker.clone();

    ws.on_upgrade(move |socket| async move {
        // The upgraded socket outlives the HTTP connection task, so the
        // session is tracked on its own.
        if !tracker.spawn(client_session(socket, events)) {
            debug!("Live reload session refused, bridge is closed");
        }
    })
}

async fn client_session(socket: WebSocket, mut events: broadcast::Receiver<String>) {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ClientMessage>(text.as_str()) {
                        Ok(ClientMessage::Hello { .. }) => {
                            if !send(&mut sink, &ServerMessage::hello()).await {
                                break;
                            }
                        }
                        Ok(ClientMessage::Other) => {}
                        Err(err) => debug!("Ignoring live reload message: {}", err),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    debug!("Live reload client error: {}", err);
                    break;
                }
            },
            event = events.recv() => match event {
                Ok(path) => {
                    if !send(&mut sink, &ServerMessage::reload(path)).await {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Live reload client skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
}

async fn send(sink: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    let text = match serde_json::to_string(msg) {
        Ok(text) => text,
        Err(err) => {
            debug!("Cannot encode live reload message: {}", err);
            return true;
        }
    };
    sink.send(Message::Text(text.into())).await.is_ok()
}

#[derive(Debug, Deserialize)]
struct ChangedQuery {
    files: Option<String>,
}

async fn changed_query(
    State(bridge): State<LiveReloadBridge>,
    Query(query): Query<ChangedQuery>,
) -> Json<serde_json::Value> {
    let files = query.files.as_deref().map(split_files).unwrap_or_default();
    notify(&bridge, files)
}

async fn changed_body(
    State(bridge): State<LiveReloadBridge>,
    Json(body): Json<ChangedRequest>,
) -> Json<serde_json::Value> {
    notify(&bridge, body.files.into_vec())
}

fn notify(bridge: &LiveReloadBridge, files: Vec<String>) -> Json<serde_json::Value> {
    bridge.changed(&files);
    Json(serde_json::json!({
        "clients": bridge.clients(),
        "files": files,
    }))
}
