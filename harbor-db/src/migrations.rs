//! Ordered SQL migrations for application schemas.

use std::path::Path;

use crate::error::{DbError, DbResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Unique name, recorded once applied.
    pub name: String,
    pub sql: String,
}

impl Migration {
    pub fn new(name: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
        }
    }

    /// Loads every `*.sql` file in `dir`, ordered by file name.
    pub fn load_dir(dir: &Path) -> DbResult<Vec<Self>> {
        let mut migrations = Vec::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("sql") {
                continue;
            }
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .ok_or_else(|| DbError::Migration {
                    name: path.display().to_string(),
                    message: "file name is not valid UTF-8".into(),
                })?
                .to_string();
            let sql = std::fs::read_to_string(&path)?;
            migrations.push(Self { name, sql });
        }
        migrations.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(migrations)
    }
}
