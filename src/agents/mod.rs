//! JSON-file store for prompt pipeline ("agent") configurations.
//!
//! Each save writes `<dir>/<user_id>_<unix millis>.json`. Map fields keep
//! their insertion order, so a saved config reads back exactly as submitted.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, info, warn};

const MAX_USER_ID_LEN: usize = 128;
/// Attempts at finding a free file name when saves collide within a millisecond
const MAX_NAME_ATTEMPTS: i64 = 16;

#[derive(Debug, thiserror::Error)]
pub enum AgentStoreError {
    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    #[error("Agent store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Agent store JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type AgentStoreResult<T> = Result<T, AgentStoreError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptPath {
    #[serde(rename = "adminInputs", default)]
    pub admin_inputs: Map<String, Value>,

    #[serde(rename = "promptBlocks", default)]
    pub prompt_blocks: Map<String, Value>,
}

/// Body of a save request.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentPayload {
    pub content: String,
    pub path: PromptPath,
    pub model: String,
    pub temperature: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub content: String,
    pub path: PromptPath,
    pub model: String,
    pub temperature: f64,
    /// RFC 3339 save time
    pub timestamp: String,
}

#[derive(Debug, Clone)]
pub struct AgentStore {
    dir: PathBuf,
}

impl AgentStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn save(&self, user_id: &str, payload: AgentPayload) -> AgentStoreResult<AgentConfig> {
        validate_user_id(user_id)?;
        fs::create_dir_all(&self.dir).await?;

        let config = AgentConfig {
            content: payload.content,
            path: payload.path,
            model: payload.model,
            temperature: payload.temperature,
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        };
        let body = serde_json::to_vec_pretty(&config)?;

        let mut millis = Utc::now().timestamp_millis();
        for _ in 0..MAX_NAME_ATTEMPTS {
            let path = self.dir.join(format!("{}_{}.json", user_id, millis));
            match fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(mut file) => {
                    file.write_all(&body).await?;
                    file.flush().await?;
                    info!(user_id, path = %path.display(), "Agent config saved");
                    return Ok(config);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => millis += 1,
                Err(e) => return Err(e.into()),
            }
        }
        Err(AgentStoreError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            "no free file name for agent config",
        )))
    }

    /// Every saved config of a user, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> AgentStoreResult<Vec<AgentConfig>> {
        validate_user_id(user_id)?;

        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{}_", user_id);
        let mut found: Vec<(i64, PathBuf)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let millis = name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|stamp| stamp.parse::<i64>().ok());
            if let Some(millis) = millis {
                found.push((millis, entry.path()));
            }
        }
        found.sort_by(|a, b| b.0.cmp(&a.0));

        let mut configs = Vec::with_capacity(found.len());
        for (_, path) in found {
            let raw = fs::read(&path).await?;
            match serde_json::from_slice::<AgentConfig>(&raw) {
                Ok(config) => configs.push(config),
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable agent config"),
            }
        }
        debug!(user_id, count = configs.len(), "Listed agent configs");
        Ok(configs)
    }
}

/// User ids become part of a file name: ASCII letters, digits and `-` only.
fn validate_user_id(user_id: &str) -> AgentStoreResult<()> {
    let valid = !user_id.is_empty()
        && user_id.len() <= MAX_USER_ID_LEN
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(AgentStoreError::InvalidUserId(user_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn payload() -> AgentPayload {
        serde_json::from_value(json!({
            "content": "final prompt",
            "path": {
                "adminInputs": {"zeta": "1", "alpha": "2", "mid": "3"},
                "promptBlocks": {"b2": "second", "b1": "first"}
            },
            "model": "kimi",
            "temperature": 0.7
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::new(dir.path());

        let saved = store.save("user-1", payload()).await.unwrap();
        let listed = store.list_for_user("user-1").await.unwrap();
        assert_eq!(listed, vec![saved.clone()]);

        let keys: Vec<_> = listed[0].path.admin_inputs.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);

        let mut files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1);
        let path = files.pop().unwrap();
        let name = path.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with("user-1_") && name.ends_with(".json"));

        let on_disk = std::fs::read(&path).unwrap();
        assert_eq!(on_disk, serde_json::to_vec_pretty(&saved).unwrap());
    }

    #[tokio::test]
    async fn test_list_newest_first_and_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::new(dir.path());

        let mut first = payload();
        first.content = "first".to_string();
        let mut second = payload();
        second.content = "second".to_string();
        store.save("alice", first).await.unwrap();
        store.save("alice", second).await.unwrap();
        store.save("bob", payload()).await.unwrap();

        let alice = store.list_for_user("alice").await.unwrap();
        let contents: Vec<_> = alice.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["second", "first"]);
        assert_eq!(store.list_for_user("bob").await.unwrap().len(), 1);
        assert!(store.list_for_user("carol").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_dir_lists_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::new(dir.path().join("not-yet"));
        assert!(store.list_for_user("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_path_like_user_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = AgentStore::new(dir.path());
        for bad in ["", "../etc", "a/b", "a_b", "a.b"] {
            assert!(matches!(
                store.save(bad, payload()).await,
                Err(AgentStoreError::InvalidUserId(_))
            ));
        }
    }
}
