//! LiveReload protocol messages

use serde::{Deserialize, Serialize};

/// Protocol version announced in the handshake
pub const PROTOCOL_OFFICIAL_7: &str = "http://livereload.com/protocols/official-7";

/// Name reported to clients in the handshake
pub const SERVER_NAME: &str = "asset-server";

/// Messages sent by browser clients
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ClientMessage {
    Hello {
        #[serde(default)]
        protocols: Vec<String>,
    },
    #[serde(other)]
    Other,
}

/// Messages pushed to browser clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "lowercase")]
pub enum ServerMessage {
    Hello {
        protocols: Vec<String>,
        #[serde(rename = "serverName")]
        server_name: String,
    },
    Reload {
        path: String,
        #[serde(rename = "liveCSS")]
        live_css: bool,
        #[serde(rename = "liveImg")]
        live_img: bool,
    },
}

impl ServerMessage {
    pub fn hello() -> Self {
        ServerMessage::Hello {
            protocols: vec![PROTOCOL_OFFICIAL_7.to_string()],
            server_name: SERVER_NAME.to_string(),
        }
    }

    pub fn reload(path: impl Into<String>) -> Self {
        ServerMessage::Reload {
            path: path.into(),
            live_css: true,
            live_img: true,
        }
    }
}

/// Body of `POST /changed`; `files` may be one path or a list
#[derive(Debug, Clone, Deserialize)]
pub struct ChangedRequest {
    #[serde(default)]
    pub files: ChangedFiles,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ChangedFiles {
    One(String),
    Many(Vec<String>),
}

impl Default for ChangedFiles {
    fn default() -> Self {
        ChangedFiles::Many(Vec::new())
    }
}

impl ChangedFiles {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            ChangedFiles::One(file) => split_files(&file),
            ChangedFiles::Many(files) => files,
        }
    }
}

/// Split a comma separated `files` value, dropping empty entries
pub fn split_files(files: &str) -> Vec<String> {
    files
        .split(',')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}
