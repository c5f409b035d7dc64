use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// Serialized session cookies for one account.
#[derive(Debug, Serialize, Deserialize)]
struct SavedSession {
    auth_token: String,
    ct0: String,
    saved_at: DateTime<Utc>,
}

/// Resolves the session persistence directory, defaulting to
/// `~/.corvid/sessions`.
pub fn session_dir(override_dir: Option<&Path>) -> PathBuf {
    if let Some(dir) = override_dir {
        return dir.to_path_buf();
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".corvid")
        .join("sessions")
}

pub fn session_path(dir: &Path, username: &str) -> PathBuf {
    dir.join(format!("{username}.json"))
}

/// Persists `(auth_token, ct0)` for the given username. The directory is
/// created 0700 and the file written 0600.
pub fn save_session(
    override_dir: Option<&Path>,
    username: &str,
    auth_token: &str,
    ct0: &str,
) -> Result<()> {
    let dir = session_dir(override_dir);
    std::fs::create_dir_all(&dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }

    let session = SavedSession {
        auth_token: auth_token.to_string(),
        ct0: ct0.to_string(),
        saved_at: Utc::now(),
    };
    let path = session_path(&dir, username);
    std::fs::write(&path, serde_json::to_vec_pretty(&session)?)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }

    debug!(user = username, "session saved");
    Ok(())
}

/// Loads a persisted session if one exists and is within `ttl`.
pub fn load_session(
    override_dir: Option<&Path>,
    username: &str,
    ttl: Duration,
) -> Result<Option<(String, String)>> {
    let path = session_path(&session_dir(override_dir), username);
    let data = match std::fs::read(&path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::Io(e)),
    };
    let session: SavedSession = serde_json::from_slice(&data)?;
    let age = Utc::now().signed_duration_since(session.saved_at);
    if age.num_seconds() < 0 || age.num_seconds() as u64 > ttl.as_secs() {
        debug!(user = username, "session expired");
        return Ok(None);
    }
    Ok(Some((session.auth_token, session.ct0)))
}

/// Removes a persisted session; missing files are fine.
pub fn delete_session(override_dir: Option<&Path>, username: &str) {
    let path = session_path(&session_dir(override_dir), username);
    let _ = std::fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips_within_ttl() {
        let dir = tempfile::tempdir().unwrap();
        save_session(Some(dir.path()), "alice", "tok-1", "ct0-1").unwrap();
        let loaded = load_session(Some(dir.path()), "alice", Duration::from_secs(3600))
            .unwrap()
            .unwrap();
        assert_eq!(loaded, ("tok-1".to_string(), "ct0-1".to_string()));
    }

    #[test]
    fn expired_session_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        save_session(Some(dir.path()), "alice", "tok", "ct0").unwrap();
        let loaded = load_session(Some(dir.path()), "alice", Duration::ZERO).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn missing_session_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = load_session(Some(dir.path()), "ghost", Duration::from_secs(60)).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn delete_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        save_session(Some(dir.path()), "alice", "tok", "ct0").unwrap();
        delete_session(Some(dir.path()), "alice");
        assert!(!session_path(dir.path(), "alice").exists());
        // second delete is a no-op
        delete_session(Some(dir.path()), "alice");
    }

    #[cfg(unix)]
    #[test]
    fn session_files_are_private() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        save_session(Some(dir.path()), "alice", "tok", "ct0").unwrap();
        let mode = std::fs::metadata(session_path(dir.path(), "alice"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
