//! Session and profile collaborators
//!
//! The bootstrap coordinator only sees the traits. The HTTP implementations
//! talk to the hosted backend's REST interface.

use crate::connectivity::join_url;
use async_trait::async_trait;
use parlo_common::config::{BackendConfig, SessionConfig};
use parlo_common::{Error, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};

/// What is known about the user's profile
///
/// `Indeterminate` is a failed lookup, not a "no": it must never be read
/// as `Incomplete`, or a registered user gets sent back to onboarding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileCompletion {
    Complete,
    Incomplete,
    Indeterminate,
}

/// Session status as seen by the bootstrap coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Unauthenticated,
    Authenticated(ProfileCompletion),
}

/// Auth/session collaborator
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Local check only; no network
    fn is_authenticated(&self) -> bool;

    /// Whether the signed-in user's profile is complete
    async fn fetch_profile_completion(&self) -> Result<bool>;
}

/// Local profile cache collaborator
#[async_trait]
pub trait ProfileSync: Send + Sync {
    async fn sync_profile_locally(&self) -> Result<()>;
}

/// Query the session collaborator, folding every failure into
/// `Indeterminate`
pub async fn resolve_session_status(
    service: &dyn SessionService,
    timeout: Duration,
) -> SessionStatus {
    if !service.is_authenticated() {
        return SessionStatus::Unauthenticated;
    }

    let completion = match tokio::time::timeout(timeout, service.fetch_profile_completion()).await
    {
        Ok(Ok(true)) => ProfileCompletion::Complete,
        Ok(Ok(false)) => ProfileCompletion::Incomplete,
        Ok(Err(e)) => {
            info!(error = %e, "Profile completion lookup failed, status indeterminate");
            ProfileCompletion::Indeterminate
        }
        Err(_) => {
            info!(
                timeout_ms = timeout.as_millis() as u64,
                "Profile completion lookup timed out, status indeterminate"
            );
            ProfileCompletion::Indeterminate
        }
    };
    SessionStatus::Authenticated(completion)
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    #[serde(default)]
    profile_complete: Option<bool>,
}

/// Thin REST client for the user's profile row
struct ProfileEndpoint {
    client: reqwest::Client,
    table_url: String,
    api_key: Option<String>,
    access_token: Option<String>,
    user_id: Option<String>,
}

impl ProfileEndpoint {
    fn new(backend: &BackendConfig, session: &SessionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(backend.request_timeout())
            .build()
            .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))?;
        let table_path = format!("rest/v1/{}", session.profiles_table);

        Ok(Self {
            client,
            table_url: join_url(&backend.base_url, &table_path),
            api_key: backend.api_key.clone(),
            access_token: session.access_token.clone(),
            user_id: session.user_id.clone(),
        })
    }

    fn has_session(&self) -> bool {
        self.access_token.is_some() && self.user_id.is_some()
    }

    async fn fetch(&self, select: &str) -> Result<reqwest::Response> {
        let (Some(token), Some(user_id)) = (&self.access_token, &self.user_id) else {
            return Err(Error::InvalidState("no signed-in user".to_string()));
        };

        let mut request = self
            .client
            .get(&self.table_url)
            .query(&[("id", format!("eq.{}", user_id)), ("select", select.to_string())])
            .bearer_auth(token);
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Http(format!("Profile request failed: {}", e)))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Http(format!(
                "Profile request returned HTTP {}",
                status.as_u16()
            )));
        }
        Ok(response)
    }
}

/// Session backed by a stored access token and the profiles table
pub struct HttpSessionService {
    endpoint: ProfileEndpoint,
}

impl HttpSessionService {
    pub fn new(backend: &BackendConfig, session: &SessionConfig) -> Result<Self> {
        Ok(Self {
            endpoint: ProfileEndpoint::new(backend, session)?,
        })
    }
}

#[async_trait]
impl SessionService for HttpSessionService {
    fn is_authenticated(&self) -> bool {
        self.endpoint.has_session()
    }

    async fn fetch_profile_completion(&self) -> Result<bool> {
        let rows: Vec<ProfileRow> = self
            .endpoint
            .fetch("profile_complete")
            .await?
            .json()
            .await
            .map_err(|e| Error::Http(format!("Malformed profile response: {}", e)))?;

        // No row yet means the user never finished onboarding
        let complete = rows
            .first()
            .and_then(|row| row.profile_complete)
            .unwrap_or(false);
        debug!(rows = rows.len(), complete, "Profile completion fetched");
        Ok(complete)
    }
}

/// Copies the profile row into a local cache
///
/// The latest copy is kept in memory and, when a path is configured,
/// written to disk as JSON.
pub struct HttpProfileSync {
    endpoint: ProfileEndpoint,
    cache_path: Option<PathBuf>,
    cached: Mutex<Option<serde_json::Value>>,
}

impl HttpProfileSync {
    pub fn new(backend: &BackendConfig, session: &SessionConfig) -> Result<Self> {
        Ok(Self {
            endpoint: ProfileEndpoint::new(backend, session)?,
            cache_path: session.profile_cache_path.clone(),
            cached: Mutex::new(None),
        })
    }

    /// Last synced profile row
    pub fn cached_profile(&self) -> Option<serde_json::Value> {
        self.cached.lock().ok().and_then(|cached| cached.clone())
    }
}

#[async_trait]
impl ProfileSync for HttpProfileSync {
    async fn sync_profile_locally(&self) -> Result<()> {
        let rows: Vec<serde_json::Value> = self
            .endpoint
            .fetch("*")
            .await?
            .json()
            .await
            .map_err(|e| Error::Http(format!("Malformed profile response: {}", e)))?;
        let profile = rows
            .into_iter()
            .next()
            .ok_or_else(|| Error::NotFound("profile row".to_string()))?;

        if let Some(path) = &self.cache_path {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(path, serde_json::to_vec_pretty(&profile)?).await?;
            debug!(path = %path.display(), "Profile cache written");
        }

        if let Ok(mut cached) = self.cached.lock() {
            *cached = Some(profile);
        }
        info!("Profile synced locally");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSession {
        authenticated: bool,
        completion: fn() -> Result<bool>,
        delay: Duration,
    }

    #[async_trait]
    impl SessionService for FixedSession {
        fn is_authenticated(&self) -> bool {
            self.authenticated
        }

        async fn fetch_profile_completion(&self) -> Result<bool> {
            tokio::time::sleep(self.delay).await;
            (self.completion)()
        }
    }

    async fn resolve(session: FixedSession) -> SessionStatus {
        resolve_session_status(&session, Duration::from_secs(10)).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_unauthenticated_skips_fetch() {
        let status = resolve(FixedSession {
            authenticated: false,
            completion: || panic!("must not be called"),
            delay: Duration::ZERO,
        })
        .await;
        assert_eq!(status, SessionStatus::Unauthenticated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_confirmed_answers() {
        let complete = resolve(FixedSession {
            authenticated: true,
            completion: || Ok(true),
            delay: Duration::ZERO,
        })
        .await;
        assert_eq!(complete, SessionStatus::Authenticated(ProfileCompletion::Complete));

        let incomplete = resolve(FixedSession {
            authenticated: true,
            completion: || Ok(false),
            delay: Duration::ZERO,
        })
        .await;
        assert_eq!(
            incomplete,
            SessionStatus::Authenticated(ProfileCompletion::Incomplete)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_is_indeterminate_not_incomplete() {
        let status = resolve(FixedSession {
            authenticated: true,
            completion: || Err(Error::Http("connection reset".into())),
            delay: Duration::ZERO,
        })
        .await;
        assert_eq!(
            status,
            SessionStatus::Authenticated(ProfileCompletion::Indeterminate)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_indeterminate() {
        let status = resolve(FixedSession {
            authenticated: true,
            completion: || Ok(false),
            delay: Duration::from_secs(60),
        })
        .await;
        assert_eq!(
            status,
            SessionStatus::Authenticated(ProfileCompletion::Indeterminate)
        );
    }

    #[test]
    fn test_http_session_requires_token_and_user() {
        let backend = BackendConfig::default();
        let mut session = SessionConfig::default();
        session.access_token = Some("token".into());
        let service = HttpSessionService::new(&backend, &session).unwrap();
        assert!(!service.is_authenticated(), "token without user id is signed out");

        session.user_id = Some("u1".into());
        let service = HttpSessionService::new(&backend, &session).unwrap();
        assert!(service.is_authenticated());
    }
}
