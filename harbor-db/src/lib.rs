//! Database proxy storage layer.
//!
//! Layout under the data directory:
//!
//! ```text
//! host.sqlite              host-only schema, holds the app_schemas registry
//! extensions.sqlite        shared tables, attached read-only as `extensions`
//! apps/app_<id>.sqlite     one database per application
//! ```
//!
//! Each application gets its own connection to its own file. That
//! connection never has the host file or another application's file
//! attached, and an authorizer refuses `ATTACH`/`DETACH`, writes to
//! `extensions`, and pragmas outside a read-only allowlist. Isolation
//! therefore holds even for arbitrary SQL sent by a worker.
//!
//! Connections from workers go through a [`DbSession`], which binds each
//! connection to the one app whose host-issued token it presented.

mod access;
mod authorizer;
mod dispatch;
mod error;
mod migrations;
mod proxy;
mod values;

pub use access::{DbAccessKeys, DbSession};
pub use error::{DbError, DbResult};
pub use migrations::Migration;
pub use proxy::{AppSchema, DbProxy, EXTENSIONS_ALIAS};
pub use values::{from_sql_ref, to_sql_value};
