use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use uuid::Uuid;

use super::{is_speed_test_id, Session, SessionStatus};
use crate::protocols::chat::ChatMessage;

/// Upper bound on the sweep age, about a century.
const MAX_SESSION_AGE_HOURS: u64 = 24 * 365 * 100;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total: usize,
    pub active: usize,
    pub paused: usize,
    pub completed: usize,
    pub error: usize,
}

/// Session store keyed by id.
///
/// State transitions on a missing session, or out of a terminal state, are
/// no-ops reported through the `bool` return value.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, model: &str, temperature: f64, messages: Vec<ChatMessage>) -> Session {
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            model: model.to_string(),
            temperature,
            messages,
            stream_position: 0,
            status: SessionStatus::Active,
            error: None,
            created_at: now,
            updated_at: now,
        };
        self.sessions.insert(session.id.clone(), session.clone());
        debug!(session_id = %session.id, model, "Session created");
        session
    }

    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.get(session_id).map(|s| s.clone())
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.sessions.get(session_id).map(|s| s.status)
    }

    /// Speed-test ids are always valid; anything else must be registered.
    pub fn is_valid(&self, session_id: &str) -> bool {
        is_speed_test_id(session_id) || self.sessions.contains_key(session_id)
    }

    /// True once the session is completed or errored. Missing sessions count
    /// as terminal so that streams bound to deleted sessions stop.
    pub fn is_terminal(&self, session_id: &str) -> bool {
        if is_speed_test_id(session_id) {
            return false;
        }
        self.status(session_id).map_or(true, SessionStatus::is_terminal)
    }

    /// Move the stream cursor forward. Never decreases, frozen once terminal.
    pub fn update_stream_position(&self, session_id: &str, position: usize) -> bool {
        let Some(mut session) = self.sessions.get_mut(session_id) else {
            return false;
        };
        if session.status.is_terminal() || position <= session.stream_position {
            return false;
        }
        session.stream_position = position;
        session.updated_at = Utc::now();
        true
    }

    pub fn pause(&self, session_id: &str) -> bool {
        self.transition(session_id, SessionStatus::Paused, None)
    }

    pub fn resume(&self, session_id: &str) -> bool {
        self.transition(session_id, SessionStatus::Active, None)
    }

    pub fn complete(&self, session_id: &str) -> bool {
        self.transition(session_id, SessionStatus::Completed, None)
    }

    pub fn set_error(&self, session_id: &str, error: &str) -> bool {
        self.transition(session_id, SessionStatus::Error, Some(error))
    }

    fn transition(&self, session_id: &str, to: SessionStatus, error: Option<&str>) -> bool {
        let Some(mut session) = self.sessions.get_mut(session_id) else {
            return false;
        };
        let allowed = match (session.status, to) {
            (from, _) if from.is_terminal() => false,
            (SessionStatus::Active, SessionStatus::Paused)
            | (SessionStatus::Paused, SessionStatus::Active) => true,
            (_, SessionStatus::Completed) | (_, SessionStatus::Error) => true,
            _ => false,
        };
        if !allowed {
            return false;
        }
        debug!(session_id, from = ?session.status, ?to, "Session transition");
        session.status = to;
        if let Some(error) = error {
            session.error = Some(error.to_string());
        }
        session.updated_at = Utc::now();
        true
    }

    pub fn delete(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    /// Drop sessions not updated within `max_age_hours`. Returns how many were removed.
    pub fn sweep(&self, max_age_hours: u64) -> usize {
        let hours = max_age_hours.min(MAX_SESSION_AGE_HOURS) as i64;
        self.sweep_before(Utc::now() - chrono::Duration::hours(hours))
    }

    pub fn sweep_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.updated_at >= cutoff);
        before.saturating_sub(self.sessions.len())
    }

    pub fn stats(&self) -> SessionStats {
        let mut stats = SessionStats {
            total: self.sessions.len(),
            ..Default::default()
        };
        for entry in self.sessions.iter() {
            match entry.status {
                SessionStatus::Active => stats.active += 1,
                SessionStatus::Paused => stats.paused += 1,
                SessionStatus::Completed => stats.completed += 1,
                SessionStatus::Error => stats.error += 1,
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Spawn the periodic age-based sweeper.
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration, max_age_hours: u64) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick fires immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = registry.sweep(max_age_hours);
                if removed > 0 {
                    info!(removed, remaining = registry.len(), "Swept stale sessions");
                }
            }
        })
    }
}
