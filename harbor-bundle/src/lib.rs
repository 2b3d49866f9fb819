//! Harbor UI bundle format.
//!
//! A bundle is a zip archive containing:
//! - `bundle.toml`: entry document, optional Content-Security-Policy and
//!   a path → MIME type table
//! - any number of asset files (`index.html`, `assets/app.js`, ...)
//!
//! Entry names are relative paths made only of normal components; an
//! archive with `..`, absolute or empty entries is rejected on open.
//! The content hash covers every entry, sorted by name, and doubles as
//! the HTTP `ETag` of unpacked files.

mod error;
mod manifest;
mod package;
mod paths;

pub use error::BundleError;
pub use manifest::{BundleManifest, DEFAULT_CONTENT_TYPE, guess_content_type};
pub use package::{BundleBuilder, MANIFEST_ENTRY, UiBundle};
pub use paths::{safe_join, validate_entry_name};
