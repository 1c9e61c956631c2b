//! In-memory session store.
//!
//! A session holds at most one job handle. Handles issued under a different
//! orchestrator epoch are dropped when the session is next loaded.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use jclip_models::JobHandle;

pub const SESSION_COOKIE: &str = "jclip_session";

#[derive(Debug, Clone)]
pub struct SessionData {
    pub epoch: String,
    pub job: Option<JobHandle>,
    pub last_seen: Instant,
}

/// A loaded session.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub job: Option<JobHandle>,
}

impl Session {
    /// Cookie carrying this session's id.
    pub fn cookie(&self) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, self.id.clone()))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .build()
    }
}

pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionData>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Load the session named by the cookie jar, creating one if it is
    /// missing or expired.
    pub async fn load(&self, jar: &CookieJar, epoch: &str) -> Session {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;

        if let Some(id) = jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) {
            if let Some(data) = sessions.get_mut(&id) {
                if now.duration_since(data.last_seen) < self.ttl {
                    data.last_seen = now;
                    if data.epoch != epoch {
                        info!(session = %id, "Session predates restart, dropping job binding");
                        data.epoch = epoch.to_string();
                        data.job = None;
                    }
                    return Session {
                        id,
                        job: data.job.clone(),
                    };
                }
                debug!(session = %id, "Session expired");
                sessions.remove(&id);
            }
        }

        let id = Uuid::new_v4().simple().to_string();
        sessions.insert(
            id.clone(),
            SessionData {
                epoch: epoch.to_string(),
                job: None,
                last_seen: now,
            },
        );
        debug!(session = %id, "Session created");
        Session { id, job: None }
    }

    /// Make `handle` the session's current job, replacing any previous one.
    pub async fn bind_job(&self, id: &str, handle: JobHandle) {
        if let Some(data) = self.sessions.write().await.get_mut(id) {
            data.epoch = handle.epoch.clone();
            data.job = Some(handle);
        }
    }

    pub async fn clear_job(&self, id: &str) {
        if let Some(data) = self.sessions.write().await.get_mut(id) {
            data.job = None;
        }
    }

    /// Drop sessions idle for longer than the TTL.
    pub async fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, data| now.duration_since(data.last_seen) < self.ttl);
        before - sessions.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jclip_models::{JobId, OutputFormat};
    use std::path::PathBuf;

    fn handle(epoch: &str) -> JobHandle {
        JobHandle {
            job_id: JobId::new(),
            directory: PathBuf::from("/tmp/jclipper/x"),
            artifact_path: PathBuf::from("/output/x.mp4"),
            format: OutputFormat::Mp4,
            audio_index: 0,
            epoch: epoch.to_string(),
            created_at: Utc::now(),
        }
    }

    fn jar_for(session: &Session) -> CookieJar {
        CookieJar::new().add(session.cookie())
    }

    #[tokio::test]
    async fn test_new_session_without_cookie() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = store.load(&CookieJar::new(), "e1").await;
        assert!(session.job.is_none());
        assert_eq!(store.len().await, 1);

        let cookie = session.cookie();
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
    }

    #[tokio::test]
    async fn test_bound_job_survives_reload() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = store.load(&CookieJar::new(), "e1").await;
        store.bind_job(&session.id, handle("e1")).await;

        let reloaded = store.load(&jar_for(&session), "e1").await;
        assert_eq!(reloaded.id, session.id);
        assert!(reloaded.job.is_some());

        store.clear_job(&session.id).await;
        assert!(store.load(&jar_for(&session), "e1").await.job.is_none());
    }

    #[tokio::test]
    async fn test_epoch_change_drops_binding() {
        let store = SessionStore::new(Duration::from_secs(60));
        let session = store.load(&CookieJar::new(), "e1").await;
        store.bind_job(&session.id, handle("e1")).await;

        let reloaded = store.load(&jar_for(&session), "e2").await;
        assert_eq!(reloaded.id, session.id);
        assert!(reloaded.job.is_none());
    }

    #[tokio::test]
    async fn test_expired_sessions() {
        let store = SessionStore::new(Duration::from_millis(10));
        let session = store.load(&CookieJar::new(), "e1").await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let fresh = store.load(&jar_for(&session), "e1").await;
        assert_ne!(fresh.id, session.id);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.purge_expired().await, 1);
        assert_eq!(store.len().await, 0);
    }
}
