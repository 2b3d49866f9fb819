//! Statement authorizer installed on every application connection.
//!
//! Application SQL may not begin, end or nest transactions; only the
//! proxy does, from inside [`transaction_control`].

use rusqlite::Connection;
use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use std::cell::Cell;

use crate::proxy::EXTENSIONS_ALIAS;

/// Pragmas that only inspect schema; any argument is a table or index name.
const INTROSPECTION_PRAGMAS: &[&str] = &[
    "table_info",
    "table_xinfo",
    "table_list",
    "index_list",
    "index_info",
    "index_xinfo",
    "foreign_key_list",
    "foreign_key_check",
    "integrity_check",
    "quick_check",
];

/// Pragmas allowed only in their read form (no assigned value).
const READ_ONLY_PRAGMAS: &[&str] = &["user_version", "data_version", "foreign_keys"];

thread_local! {
    // The authorizer runs on the thread that prepares the statement.
    static TRANSACTION_CONTROL: Cell<bool> = const { Cell::new(false) };
}

struct ControlGuard;

impl Drop for ControlGuard {
    fn drop(&mut self) {
        TRANSACTION_CONTROL.with(|allowed| allowed.set(false));
    }
}

/// Runs `f` with transaction statements permitted on this thread.
pub(crate) fn transaction_control<T>(f: impl FnOnce() -> T) -> T {
    TRANSACTION_CONTROL.with(|allowed| allowed.set(true));
    let _guard = ControlGuard;
    f()
}

pub(crate) fn install(conn: &Connection) {
    conn.authorizer(Some(authorize));
}

fn authorize(ctx: AuthContext<'_>) -> Authorization {
    match ctx.action {
        AuthAction::Transaction { .. } | AuthAction::Savepoint { .. } => {
            if TRANSACTION_CONTROL.with(Cell::get) {
                Authorization::Allow
            } else {
                Authorization::Deny
            }
        }
        AuthAction::Attach { .. } | AuthAction::Detach { .. } => Authorization::Deny,
        AuthAction::Pragma {
            pragma_name,
            pragma_value,
        } => {
            let name = pragma_name.to_ascii_lowercase();
            let allowed = INTROSPECTION_PRAGMAS.contains(&name.as_str())
                || (pragma_value.is_none() && READ_ONLY_PRAGMAS.contains(&name.as_str()));
            if allowed {
                Authorization::Allow
            } else {
                Authorization::Deny
            }
        }
        ref action if is_write(action) && ctx.database_name == Some(EXTENSIONS_ALIAS) => {
            Authorization::Deny
        }
        _ => Authorization::Allow,
    }
}

fn is_write(action: &AuthAction<'_>) -> bool {
    matches!(
        action,
        AuthAction::Insert { .. }
            | AuthAction::Update { .. }
            | AuthAction::Delete { .. }
            | AuthAction::CreateTable { .. }
            | AuthAction::CreateIndex { .. }
            | AuthAction::CreateView { .. }
            | AuthAction::CreateTrigger { .. }
            | AuthAction::DropTable { .. }
            | AuthAction::DropIndex { .. }
            | AuthAction::DropView { .. }
            | AuthAction::DropTrigger { .. }
            | AuthAction::AlterTable { .. }
    )
}
