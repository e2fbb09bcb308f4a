//! Database connection management.
//!
//! The [`Database`] struct owns a [`rusqlite::Connection`] and guarantees that
//! migrations are run before any other operation. It also owns the
//! [`LiveHub`] that every write publishes to.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use directories::ProjectDirs;
use rusqlite::Connection;

use crate::error::{Result, StoreError};
use crate::live::LiveHub;
use crate::migrations;

/// Wrapper around a [`rusqlite::Connection`] plus its live-query hub.
pub struct Database {
    conn: Connection,
    pub(crate) hub: Arc<LiveHub>,
}

impl Database {
    /// Open (or create) the default application database.
    ///
    /// The database file is placed in the platform-appropriate data directory:
    /// - Linux:   `~/.local/share/deskline/deskline.db`
    /// - macOS:   `~/Library/Application Support/com.deskline.deskline/deskline.db`
    /// - Windows: `{FOLDERID_RoamingAppData}\deskline\deskline\data\deskline.db`
    pub fn new() -> Result<Self> {
        Self::open_at(&default_path()?)
    }

    /// Open (or create) a database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %path.display(), "opening database");

        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open a private in-memory database. Used by tests and demos.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        migrations::run_migrations(&conn)?;
        Ok(Self {
            conn,
            hub: Arc::new(LiveHub::new()),
        })
    }

    /// Return a reference to the underlying `rusqlite::Connection`.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Shared handle to the live-query hub.
    ///
    /// The hub is internally synchronised, so callers may open and kill live
    /// queries without holding whatever lock guards the connection.
    pub fn hub(&self) -> Arc<LiveHub> {
        Arc::clone(&self.hub)
    }

    /// Return the filesystem path of the open database (if any).
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }
}

/// Default on-disk location of the database.
pub fn default_path() -> Result<PathBuf> {
    let project_dirs =
        ProjectDirs::from("com", "deskline", "deskline").ok_or(StoreError::NoDataDir)?;
    Ok(project_dirs.data_dir().join("deskline.db"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");

        let db = Database::open_at(&path).expect("should open");
        assert!(db.path().is_some());
        assert!(path.exists());
    }

    #[test]
    fn in_memory_has_no_path() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.path().is_none());
        assert_eq!(db.hub().active(), 0);
    }
}
