//! Persistent storage for the current [`Session`].
//!
//! The controller keeps the store in sync with the live session: written on
//! every successful room create/join, cleared on logout, and read once at
//! startup to attempt a silent rejoin. During the window between an
//! unexpected disconnect and a successful reconnect the store is deliberately
//! left untouched so a process restart can still recover the room.
//!
//! Store failures are never fatal to the controller; they are logged and the
//! in-memory session stays authoritative.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::error::{ParlorError, Result};
use crate::protocol::Session;

/// Get/set/clear of the persisted session record.
///
/// Implementations must be `Send + Sync`: the store is owned by the
/// controller task, which may migrate between runtime worker threads.
pub trait SessionStore: Send + Sync + 'static {
    /// Read the persisted session, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ParlorError::SessionStore`] when the backing storage cannot
    /// be read or holds unparseable data.
    fn get(&self) -> Result<Option<Session>>;

    /// Persist the given session, replacing any previous record.
    ///
    /// # Errors
    ///
    /// Returns [`ParlorError::SessionStore`] when the record cannot be
    /// written.
    fn set(&self, session: &Session) -> Result<()>;

    /// Remove the persisted session. Clearing an empty store is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ParlorError::SessionStore`] when the record cannot be
    /// removed.
    fn clear(&self) -> Result<()>;
}

// ── In-memory store ─────────────────────────────────────────────────

/// A [`SessionStore`] held in memory. Nothing survives the process; intended
/// for tests and for callers that opt out of persistence.
///
/// Cloning yields a handle to the same underlying slot, so tests can inspect
/// what the controller wrote.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    slot: Arc<Mutex<Option<Session>>>,
}

impl MemorySessionStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with a session, as if a previous run had
    /// persisted it.
    pub fn with_session(session: Session) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(session))),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        // A poisoned lock only means a writer panicked mid-swap; the slot
        // itself is still a valid Option.
        self.slot.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self) -> Result<Option<Session>> {
        Ok(self.lock().clone())
    }

    fn set(&self, session: &Session) -> Result<()> {
        *self.lock() = Some(session.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.lock() = None;
        Ok(())
    }
}

// ── File-backed store ───────────────────────────────────────────────

/// A [`SessionStore`] backed by a single JSON file.
///
/// The file holds one serialized [`Session`]; a missing file means no
/// persisted session.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    /// Create a store backed by the given file path. The file (and its parent
    /// directory) is created lazily on the first `set`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The path of the backing file.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self) -> Result<Option<Session>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(ParlorError::SessionStore(e.to_string())),
        };
        let session = serde_json::from_str(&text)
            .map_err(|e| ParlorError::SessionStore(format!("corrupt session file: {e}")))?;
        Ok(Some(session))
    }

    fn set(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ParlorError::SessionStore(e.to_string()))?;
        }
        let text = serde_json::to_string(session)
            .map_err(|e| ParlorError::SessionStore(e.to_string()))?;
        std::fs::write(&self.path, text).map_err(|e| ParlorError::SessionStore(e.to_string()))
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ParlorError::SessionStore(e.to_string())),
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new("alice", "R1", Some("data:image/png;base64,AAAA".into()))
    }

    #[test]
    fn stores_are_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MemorySessionStore>();
        assert_send_sync::<FileSessionStore>();
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemorySessionStore::new();
        assert_eq!(store.get().unwrap(), None);

        store.set(&session()).unwrap();
        assert_eq!(store.get().unwrap(), Some(session()));

        store.clear().unwrap();
        assert_eq!(store.get().unwrap(), None);
    }

    #[test]
    fn memory_store_clones_share_the_slot() {
        let store = MemorySessionStore::new();
        let observer = store.clone();

        store.set(&session()).unwrap();
        assert_eq!(observer.get().unwrap(), Some(session()));
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));

        assert_eq!(store.get().unwrap(), None);

        store.set(&session()).unwrap();
        assert_eq!(store.get().unwrap(), Some(session()));

        store.clear().unwrap();
        assert_eq!(store.get().unwrap(), None);
    }

    #[test]
    fn file_store_set_replaces_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));

        store.set(&session()).unwrap();
        store.set(&Session::new("bob", "R2", None)).unwrap();

        assert_eq!(store.get().unwrap(), Some(Session::new("bob", "R2", None)));
    }

    #[test]
    fn file_store_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("session.json"));

        store.clear().unwrap();
        store.clear().unwrap();
    }

    #[test]
    fn file_store_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::new(dir.path().join("nested/deeper/session.json"));

        store.set(&session()).unwrap();
        assert_eq!(store.get().unwrap(), Some(session()));
    }

    #[test]
    fn file_store_reports_corrupt_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json at all").unwrap();

        let store = FileSessionStore::new(&path);
        let err = store.get().unwrap_err();
        assert!(matches!(err, ParlorError::SessionStore(_)));
    }

    #[test]
    fn session_file_uses_wire_casing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        let store = FileSessionStore::new(&path);

        store.set(&session()).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"roomId\""));
        assert!(raw.contains("\"userIcon\""));
    }
}
