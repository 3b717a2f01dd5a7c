//! Configuration file support
//!
//! Loads server options from TOML files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::{
    HttpsOption, IndexOption, LiveReloadOption, LiveReloadSettings, Root, ServerOptions,
    TlsSettings,
};
use crate::error::{Result, ServerError};

/// Configuration file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Server settings
    pub server: ServerSettings,
    /// HTTPS settings; absent means plain HTTP
    pub https: Option<HttpsSettings>,
    /// Live-reload settings; absent means disabled
    pub livereload: Option<LiveReloadFileSettings>,
    /// Logging settings
    pub logging: Option<LoggingSettings>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    /// One directory or a list of directories
    pub root: Option<Root>,
    /// Index document relative to the first root, or `false`
    pub index: Option<IndexOption>,
    pub debug: Option<bool>,
    pub exit_on_signal: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpsSettings {
    /// Defaults to true when the section is present
    pub enabled: Option<bool>,
    /// PEM private key file
    pub key: Option<PathBuf>,
    /// PEM certificate file
    pub cert: Option<PathBuf>,
    /// PEM CA certificate file
    pub ca: Option<PathBuf>,
    pub passphrase: Option<String>,
    /// Directory with the bundled fallback material
    pub cert_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveReloadFileSettings {
    /// Defaults to true when the section is present
    pub enabled: Option<bool>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl ConfigFile {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn log_level(&self) -> Option<&str> {
        self.logging.as_ref().map(|l| l.level.as_str())
    }

    /// Convert to server options. Key and certificate files named in
    /// `[https]` are read here.
    pub fn into_options(self) -> Result<ServerOptions> {
        let mut options = ServerOptions {
            host: self.server.host,
            port: self.server.port,
            root: self.server.root,
            index: self.server.index,
            debug: self.server.debug,
            exit_on_signal: self.server.exit_on_signal,
            ..Default::default()
        };

        if let Some(https) = self.https {
            if https.enabled.unwrap_or(true) {
                options.https = Some(HttpsOption::Settings(TlsSettings {
                    key: read_pem(https.key.as_deref())?,
                    cert: read_pem(https.cert.as_deref())?,
                    ca: read_pem(https.ca.as_deref())?,
                    passphrase: https.passphrase,
                }));
                options.cert_dir = https.cert_dir;
            }
        }

        if let Some(livereload) = self.livereload {
            if livereload.enabled.unwrap_or(true) {
                options.livereload = Some(LiveReloadOption::Settings(LiveReloadSettings {
                    port: livereload.port,
                }));
            }
        }

        Ok(options)
    }
}

fn read_pem(path: Option<&Path>) -> Result<Option<Vec<u8>>> {
    match path {
        None => Ok(None),
        Some(path) => std::fs::read(path).map(Some).map_err(|e| {
            ServerError::Config(format!("cannot read {}: {}", path.display(), e))
        }),
    }
}
