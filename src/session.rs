//! Ephemeral per-user session state.
//!
//! Sessions live only in process memory and are keyed by a random id. They
//! hold the user's provider keys and LinkedIn token, the options picked in
//! the UI, and the last generated post.
//!
//! Every access first checks the session age against the configured timeout.
//! A session that has reached it is wiped on the spot, so secrets are never
//! handed out from an expired session. Publishing goes through a
//! [`PostPermit`], which enforces the cooldown between two posts and allows
//! only one publish per session at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::clock::{elapsed, Clock};
use crate::error::{AppError, Result};
use crate::linkedin::Visibility;
use crate::llm::Provider;
use crate::postgen::{FormattedPost, Style, Tone};

/// Provider keys and LinkedIn token for one session.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    api_keys: HashMap<Provider, String>,
    pub linkedin_token: Option<String>,
}

impl Credentials {
    /// Store a key, or forget it when the value is blank.
    pub fn set_api_key(&mut self, provider: Provider, key: impl Into<String>) {
        let key = key.into().trim().to_string();
        if key.is_empty() {
            self.api_keys.remove(&provider);
        } else {
            self.api_keys.insert(provider, key);
        }
    }

    pub fn api_key(&self, provider: Provider) -> Option<&str> {
        self.api_keys.get(&provider).map(String::as_str)
    }

    pub fn configured_providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.api_keys.contains_key(p))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.api_keys.is_empty() && self.linkedin_token.is_none()
    }

    fn wipe(&mut self) {
        self.api_keys.clear();
        self.linkedin_token = None;
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("providers", &self.configured_providers())
            .field("linkedin_token", &self.linkedin_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Secrets entered by the user. `None` leaves a value untouched, an empty
/// string removes it.
#[derive(Default, Deserialize)]
pub struct CredentialsUpdate {
    #[serde(default)]
    pub api_keys: HashMap<Provider, String>,
    #[serde(default)]
    pub linkedin_token: Option<String>,
}

impl CredentialsUpdate {
    pub fn is_empty(&self) -> bool {
        self.api_keys.is_empty() && self.linkedin_token.is_none()
    }
}

impl fmt::Debug for CredentialsUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsUpdate")
            .field("providers", &self.api_keys.keys().collect::<Vec<_>>())
            .field("linkedin_token", &self.linkedin_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Options last chosen in the UI.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    pub provider: Option<Provider>,
    pub model: Option<String>,
    #[serde(default)]
    pub style: Style,
    #[serde(default)]
    pub tone: Tone,
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Fresh,
    Configured,
    Active,
    Expired,
    Cleared,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionPolicy {
    pub timeout: Duration,
    pub post_cooldown: Duration,
    /// Upper bound on sessions held in memory.
    pub max_sessions: usize,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30 * 60),
            post_cooldown: Duration::from_secs(60),
            max_sessions: 10_000,
        }
    }
}

/// Public view of a session. Never carries secrets.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: Uuid,
    pub state: SessionState,
    pub providers: Vec<Provider>,
    pub linkedin_connected: bool,
    pub expires_in_secs: Option<u64>,
    pub post_allowed_in_secs: u64,
    pub preferences: Preferences,
    pub has_post: bool,
}

/// What a pipeline run gets out of the session.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub credentials: Credentials,
    pub preferences: Preferences,
    /// Wipe generation the snapshot was taken in.
    pub epoch: u64,
}

#[derive(Debug)]
struct Session {
    state: SessionState,
    credentials: Credentials,
    preferences: Preferences,
    started_at: DateTime<Utc>,
    expired_at: Option<DateTime<Utc>>,
    last_post_at: Option<DateTime<Utc>>,
    post_in_flight: bool,
    last_post: Option<FormattedPost>,
    /// Bumped every time the secrets are wiped.
    epoch: u64,
}

impl Session {
    fn new(now: DateTime<Utc>, seed: &Credentials) -> Self {
        let state = if seed.is_empty() {
            SessionState::Fresh
        } else {
            SessionState::Configured
        };
        Self {
            state,
            credentials: seed.clone(),
            preferences: Preferences::default(),
            started_at: now,
            expired_at: None,
            last_post_at: None,
            post_in_flight: false,
            last_post: None,
            epoch: 0,
        }
    }

    fn expire_if_due(&mut self, now: DateTime<Utc>, timeout: Duration) -> bool {
        if self.state == SessionState::Expired || elapsed(self.started_at, now) < timeout {
            return false;
        }
        self.wipe();
        self.state = SessionState::Expired;
        self.expired_at = Some(now);
        true
    }

    fn wipe(&mut self) {
        self.credentials.wipe();
        self.last_post = None;
        self.epoch += 1;
    }

    fn cooldown_remaining(&self, now: DateTime<Utc>, cooldown: Duration) -> Duration {
        match self.last_post_at {
            Some(last) => cooldown.saturating_sub(elapsed(last, now)),
            None => Duration::ZERO,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state == SessionState::Expired {
            Err(AppError::SessionExpired)
        } else {
            Ok(())
        }
    }

    /// Fail if the secrets were wiped after `epoch` was observed.
    fn ensure_epoch(&self, epoch: u64) -> Result<()> {
        self.ensure_live()?;
        if self.epoch != epoch {
            return Err(AppError::Auth(
                "Credentials were cleared while the request was running".to_string(),
            ));
        }
        Ok(())
    }
}

/// Thread-safe store of all live sessions.
#[derive(Clone)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<Uuid, Session>>>,
    clock: Arc<dyn Clock>,
    policy: SessionPolicy,
    seed: Credentials,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.lock().len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl SessionStore {
    pub fn new(clock: Arc<dyn Clock>, policy: SessionPolicy) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            clock,
            policy,
            seed: Credentials::default(),
        }
    }

    /// Pre-fill every new session with these credentials.
    pub fn with_seed(mut self, seed: Credentials) -> Self {
        self.seed = seed;
        self
    }

    pub fn policy(&self) -> SessionPolicy {
        self.policy
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_session<T>(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut Session, DateTime<Utc>) -> Result<T>,
    ) -> Result<T> {
        let now = self.clock.now();
        let mut sessions = self.lock();
        let session = sessions.get_mut(&id).ok_or(AppError::SessionNotFound)?;
        if session.expire_if_due(now, self.policy.timeout) {
            tracing::info!(session = %id, "session timed out, credentials wiped");
        }
        f(session, now)
    }

    /// Open a new session, refusing once `max_sessions` are live.
    pub fn create(&self) -> Result<Uuid> {
        let now = self.clock.now();
        let timeout = self.policy.timeout;
        let limit = self.policy.max_sessions;
        let mut sessions = self.lock();

        if sessions.len() >= limit {
            // Expired sessions hold no secrets, drop them early to make room
            sessions.retain(|_, s| {
                s.expire_if_due(now, timeout);
                s.state != SessionState::Expired || s.post_in_flight
            });
        }
        if sessions.len() >= limit {
            tracing::warn!(limit, "session limit reached");
            return Err(AppError::SessionLimit);
        }

        let id = Uuid::new_v4();
        sessions.insert(id, Session::new(now, &self.seed));
        tracing::info!(session = %id, "session created");
        Ok(id)
    }

    pub fn status(&self, id: Uuid) -> Result<SessionStatus> {
        let policy = self.policy;
        self.with_session(id, |s, now| {
            let expires_in_secs = (s.state != SessionState::Expired)
                .then(|| policy.timeout.saturating_sub(elapsed(s.started_at, now)).as_secs());
            Ok(SessionStatus {
                id,
                state: s.state,
                providers: s.credentials.configured_providers(),
                linkedin_connected: s.credentials.linkedin_token.is_some(),
                expires_in_secs,
                post_allowed_in_secs: s.cooldown_remaining(now, policy.post_cooldown).as_secs(),
                preferences: s.preferences.clone(),
                has_post: s.last_post.is_some(),
            })
        })
    }

    /// Enter keys or a LinkedIn token.
    pub fn configure(&self, id: Uuid, update: CredentialsUpdate) -> Result<SessionState> {
        if update.is_empty() {
            return Err(AppError::InvalidInput("No credentials provided".to_string()));
        }

        self.with_session(id, |s, now| {
            if s.state == SessionState::Expired {
                // Re-entering credentials starts a new session window
                s.started_at = now;
                s.expired_at = None;
            }
            for (provider, key) in update.api_keys {
                s.credentials.set_api_key(provider, key);
            }
            if let Some(token) = update.linkedin_token {
                let token = token.trim().to_string();
                s.credentials.linkedin_token = (!token.is_empty()).then_some(token);
            }
            if s.state != SessionState::Active {
                s.state = SessionState::Configured;
            }
            tracing::info!(session = %id, providers = ?s.credentials.configured_providers(), "credentials updated");
            Ok(s.state)
        })
    }

    /// The key stored for `provider`, absent once the session has expired.
    pub fn api_key(&self, id: Uuid, provider: Provider) -> Result<Option<String>> {
        self.with_session(id, |s, _| Ok(s.credentials.api_key(provider).map(str::to_string)))
    }

    pub fn linkedin_token(&self, id: Uuid) -> Result<Option<String>> {
        self.with_session(id, |s, _| Ok(s.credentials.linkedin_token.clone()))
    }

    /// Wipe all secrets and the stored post. Safe to call repeatedly.
    ///
    /// An expired session stays `Expired`: its secrets are already gone and
    /// only new credentials bring it back.
    pub fn clear(&self, id: Uuid) -> Result<()> {
        self.with_session(id, |s, _| {
            s.wipe();
            if s.state != SessionState::Expired {
                s.state = SessionState::Cleared;
            }
            tracing::info!(session = %id, "credentials cleared");
            Ok(())
        })
    }

    /// Restart the session window without touching its data.
    pub fn refresh(&self, id: Uuid) -> Result<()> {
        self.with_session(id, |s, now| {
            s.ensure_live()?;
            s.started_at = now;
            Ok(())
        })
    }

    /// Copy out what a pipeline run needs. Leaves the session as it is.
    pub fn snapshot(&self, id: Uuid) -> Result<RunContext> {
        self.with_session(id, |s, _| {
            s.ensure_live()?;
            Ok(RunContext {
                credentials: s.credentials.clone(),
                preferences: s.preferences.clone(),
                epoch: s.epoch,
            })
        })
    }

    /// Save the result of a finished run and mark the session active.
    ///
    /// Refused when the session was cleared or expired after `epoch`.
    pub fn record_run(
        &self,
        id: Uuid,
        epoch: u64,
        preferences: Preferences,
        post: FormattedPost,
    ) -> Result<()> {
        self.with_session(id, |s, _| {
            s.ensure_epoch(epoch)?;
            s.state = SessionState::Active;
            s.preferences = preferences;
            s.last_post = Some(post);
            Ok(())
        })
    }

    pub fn last_post(&self, id: Uuid) -> Result<Option<FormattedPost>> {
        self.with_session(id, |s, _| Ok(s.last_post.clone()))
    }

    /// Claim the right to publish one post.
    ///
    /// Fails without side effects if the session expired, no LinkedIn token
    /// is stored, the cooldown has not elapsed, or another publish is running.
    pub fn reserve_post(&self, id: Uuid) -> Result<PostPermit> {
        let cooldown = self.policy.post_cooldown;
        let epoch = self.with_session(id, |s, now| {
            s.ensure_live()?;
            let remaining = s.cooldown_remaining(now, cooldown);
            if !remaining.is_zero() {
                return Err(AppError::RateLimited { retry_after: remaining });
            }
            if s.post_in_flight {
                return Err(AppError::RateLimited { retry_after: cooldown });
            }
            if s.credentials.linkedin_token.is_none() {
                return Err(AppError::Auth("LinkedIn access token is required".to_string()));
            }
            s.post_in_flight = true;
            Ok(s.epoch)
        })?;

        Ok(PostPermit {
            store: self.clone(),
            id,
            epoch,
            committed: false,
        })
    }

    /// Drop sessions that have been expired for longer than one timeout.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let timeout = self.policy.timeout;
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, s| {
            s.expire_if_due(now, timeout);
            match s.expired_at {
                Some(at) => s.post_in_flight || elapsed(at, now) < timeout,
                None => true,
            }
        });
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

/// Exclusive right to publish from one session.
///
/// Dropping the permit without [`commit`](PostPermit::commit) releases the
/// reservation and leaves the cooldown untouched.
pub struct PostPermit {
    store: SessionStore,
    id: Uuid,
    epoch: u64,
    committed: bool,
}

impl fmt::Debug for PostPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostPermit")
            .field("id", &self.id)
            .field("epoch", &self.epoch)
            .field("committed", &self.committed)
            .finish()
    }
}

impl PostPermit {
    /// The LinkedIn token to publish with, read from the live session.
    ///
    /// Call right before publishing. Fails if the session expired or its
    /// secrets were wiped since the permit was issued.
    pub fn confirm(&self) -> Result<String> {
        self.store.with_session(self.id, |s, _| {
            s.ensure_epoch(self.epoch)?;
            s.credentials
                .linkedin_token
                .clone()
                .ok_or_else(|| AppError::Auth("LinkedIn access token is required".to_string()))
        })
    }

    /// Record a successful publish and start the cooldown.
    pub fn commit(mut self) {
        let now = self.store.clock.now();
        if let Some(s) = self.store.lock().get_mut(&self.id) {
            s.last_post_at = Some(now);
            s.post_in_flight = false;
        }
        self.committed = true;
    }
}

impl Drop for PostPermit {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        if let Some(s) = self.store.lock().get_mut(&self.id) {
            s.post_in_flight = false;
        }
    }
}
