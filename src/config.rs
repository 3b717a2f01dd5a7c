//! Server configuration
//!
//! [`ServerOptions`] is the partial configuration supplied by a caller.
//! [`ServerOptions::resolve`] merges it with the defaults and produces the
//! immutable [`ServerConfig`] the server is built from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, ServerError};
use crate::http::MiddlewareFactory;

/// Default listening port
pub const DEFAULT_PORT: u16 = 9000;

/// Default listening host
pub const DEFAULT_HOST: &str = "localhost";

/// Default index document, relative to the first root
pub const DEFAULT_INDEX: &str = "index.html";

/// Default port of the live-reload side channel
pub const DEFAULT_LIVERELOAD_PORT: u16 = 35729;

/// Passphrase used for the private key when none is configured
pub const DEFAULT_PASSPHRASE: &str = "asset-server";

/// Directory holding the bundled development certificates
pub fn default_cert_dir() -> PathBuf {
    PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/certs"))
}

/// One root directory or an ordered list of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Root {
    Single(PathBuf),
    List(Vec<PathBuf>),
}

impl Root {
    /// All root paths, in serving order
    pub fn paths(&self) -> &[PathBuf] {
        match self {
            Root::Single(path) => std::slice::from_ref(path),
            Root::List(paths) => paths,
        }
    }

    /// The first root; the index document and the final static stage use it
    pub fn first(&self) -> Option<&Path> {
        self.paths().first().map(PathBuf::as_path)
    }

    pub fn is_list(&self) -> bool {
        matches!(self, Root::List(_))
    }
}

impl From<&str> for Root {
    fn from(path: &str) -> Self {
        Root::Single(PathBuf::from(path))
    }
}

impl From<&Path> for Root {
    fn from(path: &Path) -> Self {
        Root::Single(path.to_path_buf())
    }
}

impl From<PathBuf> for Root {
    fn from(path: PathBuf) -> Self {
        Root::Single(path)
    }
}

impl From<Vec<PathBuf>> for Root {
    fn from(paths: Vec<PathBuf>) -> Self {
        Root::List(paths)
    }
}

/// Index document option: a path, or `false` to disable the SPA fallback
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndexOption {
    Enabled(bool),
    Path(PathBuf),
}

/// TLS material as opaque PEM blobs. Missing fields fall back to the
/// bundled certificates.
#[derive(Clone, Default)]
pub struct TlsSettings {
    pub key: Option<Vec<u8>>,
    pub cert: Option<Vec<u8>>,
    pub ca: Option<Vec<u8>>,
    pub passphrase: Option<String>,
}

impl fmt::Debug for TlsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn blob(value: &Option<Vec<u8>>) -> String {
            match value {
                Some(bytes) => format!("<{} bytes>", bytes.len()),
                None => "<bundled>".to_string(),
            }
        }
        f.debug_struct("TlsSettings")
            .field("key", &blob(&self.key))
            .field("cert", &blob(&self.cert))
            .field("ca", &blob(&self.ca))
            .field("passphrase", &self.passphrase.as_ref().map(|_| "<set>"))
            .finish()
    }
}

/// `https` option: `false`, `true` (bundled material) or explicit settings
#[derive(Debug, Clone)]
pub enum HttpsOption {
    Enabled(bool),
    Settings(TlsSettings),
}

/// Live-reload settings as supplied by the caller
#[derive(Debug, Clone, Default)]
pub struct LiveReloadSettings {
    pub port: Option<u16>,
}

/// `livereload` option: `false`, `true` (default port) or explicit settings
#[derive(Debug, Clone)]
pub enum LiveReloadOption {
    Enabled(bool),
    Settings(LiveReloadSettings),
}

/// Resolved live-reload configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveReloadConfig {
    /// Port of the live-reload side channel
    pub port: u16,
}

/// User-supplied, partially populated configuration
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub port: Option<u16>,
    pub host: Option<String>,
    pub root: Option<Root>,
    pub index: Option<IndexOption>,
    pub https: Option<HttpsOption>,
    pub livereload: Option<LiveReloadOption>,
    pub debug: Option<bool>,
    /// Produces extra handlers placed at the head of the chain
    pub middleware: Option<MiddlewareFactory>,
    pub cert_dir: Option<PathBuf>,
    /// Exit the process after force-closing connections on SIGINT
    pub exit_on_signal: Option<bool>,
}

impl ServerOptions {
    /// Options serving `root` with every other setting defaulted
    pub fn new(root: impl Into<Root>) -> Self {
        Self {
            root: Some(root.into()),
            ..Default::default()
        }
    }

    /// Fill in defaults and normalize paths.
    ///
    /// Root directories are not checked on disk; a missing index document
    /// only shows up when the fallback handler runs.
    pub fn resolve(self) -> Result<ServerConfig> {
        let root = self
            .root
            .ok_or_else(|| ServerError::Config("a root directory is required".to_string()))?;
        let first_root = root
            .first()
            .ok_or_else(|| ServerError::Config("root list must not be empty".to_string()))?;

        let index = match self.index.unwrap_or(IndexOption::Enabled(true)) {
            IndexOption::Enabled(false) => None,
            IndexOption::Enabled(true) => Some(resolve_index(first_root, Path::new(DEFAULT_INDEX))?),
            IndexOption::Path(path) => Some(resolve_index(first_root, &path)?),
        };

        let https = match self.https {
            None | Some(HttpsOption::Enabled(false)) => None,
            Some(HttpsOption::Enabled(true)) => Some(TlsSettings::default()),
            Some(HttpsOption::Settings(settings)) => Some(settings),
        };

        let livereload = match self.livereload {
            None | Some(LiveReloadOption::Enabled(false)) => None,
            Some(LiveReloadOption::Enabled(true)) => Some(LiveReloadConfig {
                port: DEFAULT_LIVERELOAD_PORT,
            }),
            Some(LiveReloadOption::Settings(settings)) => Some(LiveReloadConfig {
                port: settings.port.unwrap_or(DEFAULT_LIVERELOAD_PORT),
            }),
        };

        Ok(ServerConfig {
            host: self.host.unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: self.port.unwrap_or(DEFAULT_PORT),
            root,
            index,
            https,
            livereload,
            debug: self.debug.unwrap_or(false),
            middleware: self.middleware,
            cert_dir: self.cert_dir.unwrap_or_else(default_cert_dir),
            exit_on_signal: self.exit_on_signal.unwrap_or(true),
        })
    }
}

/// The index always lives under the first root; a leading `/` or drive
/// prefix on `index` is dropped rather than replacing the root.
fn resolve_index(first_root: &Path, index: &Path) -> Result<PathBuf> {
    let relative: PathBuf = index
        .components()
        .filter(|c| {
            matches!(
                c,
                Component::Normal(_) | Component::CurDir | Component::ParentDir
            )
        })
        .collect();
    Ok(std::path::absolute(first_root.join(relative))?)
}

/// Fully populated server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Root directories, kept in the shape they were supplied in
    pub root: Root,

    /// Absolute path of the SPA index document, `None` when disabled
    pub index: Option<PathBuf>,

    /// TLS settings; `None` serves plain HTTP
    pub https: Option<TlsSettings>,

    /// Live-reload side channel, `None` when disabled
    pub livereload: Option<LiveReloadConfig>,

    /// Enable request tracing
    pub debug: bool,

    pub middleware: Option<MiddlewareFactory>,

    /// Where the bundled key and certificates are read from
    pub cert_dir: PathBuf,

    pub exit_on_signal: bool,
}

impl ServerConfig {
    /// `https` when TLS is configured, `http` otherwise
    pub fn scheme(&self) -> &'static str {
        if self.https.is_some() {
            "https"
        } else {
            "http"
        }
    }

    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// URL the server is reachable at
    pub fn url(&self) -> String {
        format!("{}://{}", self.scheme(), self.socket_addr())
    }
}
