//! Session manager: per-run metadata, persisted one subdirectory per
//! session with an atomically-written `metadata.json`.

use crate::error::{MoatError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Running,
    Stopped,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub workspace_path: String,
    pub run_id: String,
    pub grants: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub state: SessionState,
}

/// `[A-Za-z0-9][A-Za-z0-9-]*`, checked by hand rather than pulling in a
/// regex engine for a single anchored pattern.
fn valid_session_id(id: &str) -> bool {
    let mut chars = id.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
}

fn check_id(id: &str) -> Result<()> {
    if !valid_session_id(id) {
        return Err(MoatError::config(format!("invalid session id: {id:?}")));
    }
    Ok(())
}

/// Persists sessions under `<root>/<id>/metadata.json`. All mutations
/// serialize through a single reader-writer lock, matching the single
/// credential-store writer-path policy elsewhere in this crate.
pub struct SessionManager {
    root: PathBuf,
    lock: RwLock<()>,
}

impl SessionManager {
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), lock: RwLock::new(()) }
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("metadata.json")
    }

    fn write_atomic(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    fn save_locked(&self, session: &Session) -> Result<()> {
        check_id(&session.id)?;
        let dir = self.session_dir(&session.id);
        fs::create_dir_all(&dir)?;
        let json = serde_json::to_vec_pretty(session)?;
        self.write_atomic(&self.metadata_path(&session.id), &json)
    }

    pub fn create(&self, workspace: &str, run_id: &str, name: &str, id: &str) -> Result<Session> {
        check_id(id)?;
        let now = Utc::now();
        let session = Session {
            id: id.to_string(),
            name: name.to_string(),
            workspace_path: workspace.to_string(),
            run_id: run_id.to_string(),
            grants: Vec::new(),
            created_at: now,
            last_accessed_at: now,
            state: SessionState::Running,
        };
        let _guard = self.lock.write().unwrap();
        self.save_locked(&session)?;
        Ok(session)
    }

    fn load(&self, id: &str) -> Result<Session> {
        check_id(id)?;
        let path = self.metadata_path(id);
        if !path.exists() {
            return Err(MoatError::not_found(format!("no session {id}")));
        }
        let text = fs::read_to_string(&path)?;
        serde_json::from_str(&text).map_err(|e| MoatError::Corruption(format!("corrupt session {id}: {e}")))
    }

    /// Get by id or, failing that, by human name (scans all sessions).
    pub fn get(&self, id_or_name: &str) -> Result<Session> {
        let _guard = self.lock.read().unwrap();
        if valid_session_id(id_or_name) {
            if let Ok(session) = self.load(id_or_name) {
                return Ok(session);
            }
        }
        self.list_locked()?
            .into_iter()
            .find(|s| s.name == id_or_name)
            .ok_or_else(|| MoatError::not_found(format!("no session named {id_or_name}")))
    }

    /// Most recently accessed session for a workspace path.
    pub fn get_by_workspace(&self, workspace: &str) -> Result<Session> {
        let _guard = self.lock.read().unwrap();
        self.list_locked()?
            .into_iter()
            .filter(|s| s.workspace_path == workspace)
            .max_by_key(|s| s.last_accessed_at)
            .ok_or_else(|| MoatError::not_found(format!("no session for workspace {workspace}")))
    }

    fn list_locked(&self) -> Result<Vec<Session>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(|s| s.to_string()) else { continue };
            match self.load(&id) {
                Ok(session) => sessions.push(session),
                Err(_) => {
                    tracing::debug!(session = %id, "skipping unreadable/corrupt session in list");
                    continue;
                }
            }
        }
        sessions.sort_by(|a, b| b.last_accessed_at.cmp(&a.last_accessed_at));
        Ok(sessions)
    }

    /// Sorted by `last_accessed_at` descending. Corrupt entries are
    /// skipped, not deleted.
    pub fn list(&self) -> Result<Vec<Session>> {
        let _guard = self.lock.read().unwrap();
        self.list_locked()
    }

    pub fn update_state(&self, id: &str, state: SessionState) -> Result<Session> {
        let _guard = self.lock.write().unwrap();
        let mut session = self.load(id)?;
        session.state = state;
        session.last_accessed_at = Utc::now();
        self.save_locked(&session)?;
        Ok(session)
    }

    /// Bump `last_accessed_at` without changing state.
    pub fn touch(&self, id: &str) -> Result<Session> {
        let _guard = self.lock.write().unwrap();
        let mut session = self.load(id)?;
        session.last_accessed_at = Utc::now();
        self.save_locked(&session)?;
        Ok(session)
    }

    /// Delete sessions whose `last_accessed_at` is older than `max_age`.
    pub fn cleanup_old_sessions(&self, max_age: chrono::Duration) -> Result<usize> {
        let _guard = self.lock.write().unwrap();
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;
        for session in self.list_locked()? {
            if session.last_accessed_at < cutoff {
                check_id(&session.id)?;
                let dir = self.session_dir(&session.id);
                if dir.exists() {
                    fs::remove_dir_all(&dir)?;
                }
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (tempfile::TempDir, SessionManager) {
        let dir = tempfile::tempdir().unwrap();
        let manager = SessionManager::open(dir.path());
        (dir, manager)
    }

    #[test]
    fn invalid_session_id_rejected() {
        for bad in ["", "-abc", "../x", "a/b", "a b"] {
            assert!(!valid_session_id(bad), "expected {bad:?} rejected");
        }
        assert!(valid_session_id("r-1"));
    }

    #[test]
    fn e6_scenario_create_list_update_get_by_name() {
        let (_dir, manager) = manager();
        manager.create("/w", "r-1", "feat", "r-1").unwrap();

        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].state, SessionState::Running);
        assert_eq!(listed[0].last_accessed_at, listed[0].created_at);

        manager.update_state("r-1", SessionState::Completed).unwrap();
        let session = manager.get("feat").unwrap();
        assert_eq!(session.state, SessionState::Completed);
    }

    #[test]
    fn get_by_workspace_returns_most_recent() {
        let (_dir, manager) = manager();
        manager.create("/w", "r-1", "one", "r-1").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        manager.create("/w", "r-2", "two", "r-2").unwrap();
        let latest = manager.get_by_workspace("/w").unwrap();
        assert_eq!(latest.id, "r-2");
    }

    #[test]
    fn corrupt_session_file_is_skipped_not_deleted() {
        let (dir, manager) = manager();
        manager.create("/w", "r-1", "one", "r-1").unwrap();
        let bad_dir = dir.path().join("bad-id");
        fs::create_dir_all(&bad_dir).unwrap();
        fs::write(bad_dir.join("metadata.json"), b"not json").unwrap();

        let listed = manager.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert!(bad_dir.join("metadata.json").exists());
    }

    #[test]
    fn path_traversal_session_ids_rejected() {
        let (_dir, manager) = manager();
        for bad in ["../escape", "a/b", "-leading"] {
            assert!(manager.create("/w", "r", "name", bad).is_err());
        }
    }

    #[test]
    fn cleanup_removes_only_old_sessions() {
        let (_dir, manager) = manager();
        let old = manager.create("/w", "r-old", "old", "r-old").unwrap();
        manager.create("/w", "r-new", "new", "r-new").unwrap();
        // Backdate the old session's file directly (no fake clock available).
        let mut backdated = old.clone();
        backdated.last_accessed_at = Utc::now() - chrono::Duration::days(30);
        manager.save_locked(&backdated).unwrap();

        let removed = manager.cleanup_old_sessions(chrono::Duration::days(1)).unwrap();
        assert_eq!(removed, 1);
        assert!(manager.get("r-new").is_ok());
        assert!(manager.get("old").is_err());
    }
}
