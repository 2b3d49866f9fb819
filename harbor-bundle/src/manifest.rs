//! `bundle.toml` schema.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Served when a file has no declared content type.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn default_index() -> String {
    "index.html".into()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Document served for `/` and for paths that match no file.
    #[serde(default = "default_index")]
    pub index: String,

    /// Content-Security-Policy sent with every file of the bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csp: Option<String>,

    /// Relative path → MIME type.
    #[serde(default)]
    pub content_types: BTreeMap<String, String>,
}

impl Default for BundleManifest {
    fn default() -> Self {
        Self {
            index: default_index(),
            csp: None,
            content_types: BTreeMap::new(),
        }
    }
}

impl BundleManifest {
    /// Declared MIME type of `path`, or [`DEFAULT_CONTENT_TYPE`].
    pub fn content_type_for(&self, path: &str) -> &str {
        self.content_types
            .get(path.trim_start_matches('/'))
            .map_or(DEFAULT_CONTENT_TYPE, String::as_str)
    }
}

/// MIME type for common web asset extensions; used when building bundles.
pub fn guess_content_type(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    Some(match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "wasm" => "application/wasm",
        "txt" => "text/plain; charset=utf-8",
        _ => return None,
    })
}
