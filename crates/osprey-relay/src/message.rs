//! JSON records exchanged on the relay channel.
//!
//! Text frames carry these; binary frames carry raw file bytes and appear
//! only while a transfer is streaming.

use chrono::DateTime;
use osprey_sftp::protocol::FileAttrs;
use serde::{Deserialize, Serialize};

/// Client request. Unknown fields are ignored; absent fields default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, rename = "new")]
    pub new_path: String,
    #[serde(default, rename = "old")]
    pub old_path: String,
    #[serde(default)]
    pub size: i64,
}

/// One directory entry in a `list` response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileEntry {
    pub name: String,
    pub size: i64,
    #[serde(rename = "isDir")]
    pub is_dir: bool,
    #[serde(rename = "modTime")]
    pub mod_time: String,
}

impl FileEntry {
    pub fn from_attrs(name: String, attrs: &FileAttrs) -> Self {
        let mtime = attrs.mtime.unwrap_or(0) as i64;
        let mod_time = DateTime::from_timestamp(mtime, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_default();
        Self {
            name,
            size: attrs.size.unwrap_or(0) as i64,
            is_dir: attrs.is_dir(),
            mod_time,
        }
    }
}

/// Server response; empty fields are omitted on the wire
#[derive(Debug, Clone, Default, Serialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileEntry>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(skip_serializing_if = "total_is_zero")]
    pub total: i64,
}

fn total_is_zero(total: &i64) -> bool {
    *total == 0
}

impl Response {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            kind: "success".into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: "error".into(),
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn pong() -> Self {
        Self {
            kind: "pong".into(),
            ..Default::default()
        }
    }

    pub fn list(files: Vec<FileEntry>) -> Self {
        Self {
            kind: "list".into(),
            files,
            ..Default::default()
        }
    }

    pub fn download_start(total: i64) -> Self {
        Self {
            kind: "download_start".into(),
            total,
            ..Default::default()
        }
    }

    pub fn download_end() -> Self {
        Self {
            kind: "download_end".into(),
            ..Default::default()
        }
    }
}
