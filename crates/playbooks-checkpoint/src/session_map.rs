//! Session resume mapping.
//!
//! `.sessions.json` under the checkpoint directory maps a stable key --
//! the hash of the program's sorted absolute playbook paths -- to the last
//! session id used for that program, so `--resume` needs no session name.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Maps playbook-path sets to their last session id.
pub struct SessionMap {
    session_file: PathBuf,
}

impl SessionMap {
    /// Create a map stored under `storage_path`.
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            session_file: storage_path.into().join(".sessions.json"),
        }
    }

    /// Stable key for a set of playbook paths: sha256 of the sorted
    /// absolute paths, truncated to 16 hex chars.
    pub fn execution_key(program_paths: &[String]) -> String {
        let mut absolute: Vec<String> = program_paths
            .iter()
            .map(|p| {
                std::path::absolute(Path::new(p))
                    .map(|abs| abs.to_string_lossy().into_owned())
                    .unwrap_or_else(|_| p.clone())
            })
            .collect();
        absolute.sort();

        let digest = Sha256::digest(absolute.join("|").as_bytes());
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        hex[..16].to_string()
    }

    /// Last session id recorded for these paths, if any.
    pub async fn get_last_session(&self, program_paths: &[String]) -> Result<Option<String>> {
        let sessions = self.read_sessions().await?;
        Ok(sessions.get(&Self::execution_key(program_paths)).cloned())
    }

    /// Record `session_id` as the last session for these paths.
    pub async fn save_session(&self, program_paths: &[String], session_id: &str) -> Result<()> {
        let mut sessions = self.read_sessions().await?;
        sessions.insert(Self::execution_key(program_paths), session_id.to_string());
        self.write_sessions(&sessions).await
    }

    /// Forget the recorded session for these paths.
    pub async fn clear_session(&self, program_paths: &[String]) -> Result<()> {
        let mut sessions = self.read_sessions().await?;
        if sessions.remove(&Self::execution_key(program_paths)).is_some() {
            self.write_sessions(&sessions).await?;
        }
        Ok(())
    }

    async fn read_sessions(&self) -> Result<BTreeMap<String, String>> {
        match tokio::fs::read(&self.session_file).await {
            Ok(bytes) => match serde_json::from_slice(&bytes) {
                Ok(sessions) => Ok(sessions),
                Err(error) => {
                    tracing::warn!(%error, "session file unreadable, starting fresh");
                    Ok(BTreeMap::new())
                }
            },
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(error) => Err(error.into()),
        }
    }

    async fn write_sessions(&self, sessions: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.session_file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(sessions)?;
        tokio::fs::write(&self.session_file, data).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_get_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let map = SessionMap::new(dir.path());
        let paths = vec!["order.pbasm".to_string()];

        assert!(map.get_last_session(&paths).await.expect("get").is_none());
        map.save_session(&paths, "sess-42").await.expect("save");
        assert_eq!(
            map.get_last_session(&paths).await.expect("get").as_deref(),
            Some("sess-42")
        );
    }

    #[tokio::test]
    async fn key_is_order_insensitive() {
        let a = SessionMap::execution_key(&["b.pbasm".to_string(), "a.pbasm".to_string()]);
        let b = SessionMap::execution_key(&["a.pbasm".to_string(), "b.pbasm".to_string()]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn clear_forgets_session() {
        let dir = tempfile::tempdir().expect("tempdir");
        let map = SessionMap::new(dir.path());
        let paths = vec!["x.pbasm".to_string()];

        map.save_session(&paths, "sess-1").await.expect("save");
        map.clear_session(&paths).await.expect("clear");
        assert!(map.get_last_session(&paths).await.expect("get").is_none());
    }

    #[tokio::test]
    async fn distinct_programs_do_not_collide() {
        let dir = tempfile::tempdir().expect("tempdir");
        let map = SessionMap::new(dir.path());

        map.save_session(&["one.pbasm".to_string()], "sess-one")
            .await
            .expect("save");
        map.save_session(&["two.pbasm".to_string()], "sess-two")
            .await
            .expect("save");

        assert_eq!(
            map.get_last_session(&["one.pbasm".to_string()])
                .await
                .expect("get")
                .as_deref(),
            Some("sess-one")
        );
    }
}
