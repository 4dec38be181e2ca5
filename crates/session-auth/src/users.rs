//! User records and refresh token bookkeeping
//!
//! `UserStore` is the seam to whatever persists identities. `LocalUserStore`
//! keeps records in memory behind a tokio Mutex and, when given a path,
//! mirrors them to a JSON file with atomic temp-file + rename writes. Every
//! mutation is persisted before it becomes visible; a failed write rolls the
//! in-memory record back.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use common::BoxFuture;
use provider::RemoteIdentity;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::constants::{
    ANONYMOUS_FIRST_NAME, ANONYMOUS_LAST_NAME, ANONYMOUS_LOGIN_PREFIX, DEFAULT_ROLE,
};
use crate::error::{Error, Result};

/// Persisted identity keyed by email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub email: String,
    pub login: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    /// Issued refresh tokens, oldest first
    #[serde(default)]
    pub refresh_tokens: Vec<String>,
    /// Unix milliseconds
    pub created_at: u64,
}

impl UserRecord {
    /// New record for a first-time identity, with the default role.
    pub fn from_identity(identity: &RemoteIdentity, now_millis: u64) -> Self {
        let login = identity
            .login
            .clone()
            .filter(|l| !l.trim().is_empty())
            .unwrap_or_else(|| {
                let id = uuid::Uuid::new_v4().simple().to_string();
                format!("{ANONYMOUS_LOGIN_PREFIX}{}", &id[..12])
            });
        Self {
            email: identity.email.clone(),
            login,
            first_name: identity
                .first_name
                .clone()
                .unwrap_or_else(|| ANONYMOUS_FIRST_NAME.to_owned()),
            last_name: identity
                .last_name
                .clone()
                .unwrap_or_else(|| ANONYMOUS_LAST_NAME.to_owned()),
            role: DEFAULT_ROLE.to_owned(),
            refresh_tokens: Vec::new(),
            created_at: now_millis,
        }
    }
}

/// Identity persistence used by the login flow and session service.
///
/// Uses `BoxFuture` return types for dyn-compatibility (`Arc<dyn UserStore>`).
pub trait UserStore: Send + Sync {
    fn find_by_email<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<Option<UserRecord>>>;

    /// Insert `record` unless its email is taken; returns the stored record.
    fn create<'a>(&'a self, record: UserRecord) -> BoxFuture<'a, Result<UserRecord>>;

    fn append_refresh_token<'a>(&'a self, email: &'a str, token: String)
    -> BoxFuture<'a, Result<()>>;
}

/// Look up the identity by email, creating it on first login.
///
/// Returns the record and whether this call created it.
pub async fn find_or_create(
    store: &dyn UserStore,
    identity: &RemoteIdentity,
    now_millis: u64,
) -> Result<(UserRecord, bool)> {
    if let Some(existing) = store.find_by_email(&identity.email).await? {
        return Ok((existing, false));
    }
    let record = store
        .create(UserRecord::from_identity(identity, now_millis))
        .await?;
    info!(email = %record.email, role = %record.role, "created user");
    Ok((record, true))
}

/// In-process user store, optionally file-backed.
pub struct LocalUserStore {
    path: Option<PathBuf>,
    max_refresh_tokens: usize,
    state: Mutex<HashMap<String, UserRecord>>,
}

impl LocalUserStore {
    pub fn in_memory(max_refresh_tokens: usize) -> Self {
        Self {
            path: None,
            max_refresh_tokens,
            state: Mutex::new(HashMap::new()),
        }
    }

    /// Load users from `path`, creating an empty file on cold start.
    pub async fn load(path: PathBuf, max_refresh_tokens: usize) -> Result<Self> {
        let state = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Storage(format!("reading user file: {e}")))?;
            let users: HashMap<String, UserRecord> = serde_json::from_str(&contents)
                .map_err(|e| Error::Storage(format!("parsing user file: {e}")))?;
            info!(path = %path.display(), users = users.len(), "loaded users");
            users
        } else {
            info!(path = %path.display(), "user file not found, starting with empty store");
            let users = HashMap::new();
            write_atomic(&path, &users).await?;
            users
        };

        Ok(Self {
            path: Some(path),
            max_refresh_tokens,
            state: Mutex::new(state),
        })
    }

    /// Change a user's role. Affects tokens issued from now on.
    pub async fn set_role(&self, email: &str, role: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state
            .get_mut(email)
            .ok_or_else(|| Error::Storage(format!("no user {email}")))?;
        let previous = std::mem::replace(&mut record.role, role.to_owned());
        if let Err(e) = self.persist(&state).await {
            if let Some(record) = state.get_mut(email) {
                record.role = previous;
            }
            return Err(e);
        }
        info!(email, role, "changed user role");
        Ok(())
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn persist(&self, state: &HashMap<String, UserRecord>) -> Result<()> {
        match &self.path {
            Some(path) => write_atomic(path, state).await,
            None => Ok(()),
        }
    }

    async fn find(&self, email: &str) -> Result<Option<UserRecord>> {
        Ok(self.state.lock().await.get(email).cloned())
    }

    async fn insert_if_absent(&self, record: UserRecord) -> Result<UserRecord> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.get(&record.email) {
            return Ok(existing.clone());
        }
        let email = record.email.clone();
        state.insert(email.clone(), record.clone());
        if let Err(e) = self.persist(&state).await {
            state.remove(&email);
            return Err(e);
        }
        Ok(record)
    }

    async fn append(&self, email: &str, token: String) -> Result<()> {
        let mut state = self.state.lock().await;
        let record = state
            .get_mut(email)
            .ok_or_else(|| Error::Storage(format!("no user {email}")))?;
        let previous = record.refresh_tokens.clone();
        record.refresh_tokens.push(token);
        let overflow = record
            .refresh_tokens
            .len()
            .saturating_sub(self.max_refresh_tokens);
        if overflow > 0 {
            record.refresh_tokens.drain(..overflow);
            debug!(email, dropped = overflow, "dropped oldest refresh tokens");
        }

        if let Err(e) = self.persist(&state).await {
            if let Some(record) = state.get_mut(email) {
                record.refresh_tokens = previous;
            }
            return Err(e);
        }
        Ok(())
    }
}

impl UserStore for LocalUserStore {
    fn find_by_email<'a>(&'a self, email: &'a str) -> BoxFuture<'a, Result<Option<UserRecord>>> {
        Box::pin(self.find(email))
    }

    fn create<'a>(&'a self, record: UserRecord) -> BoxFuture<'a, Result<UserRecord>> {
        Box::pin(self.insert_if_absent(record))
    }

    fn append_refresh_token<'a>(
        &'a self,
        email: &'a str,
        token: String,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(self.append(email, token))
    }
}

/// Write users to a file atomically (temp file + rename, mode 0600).
async fn write_atomic(path: &Path, data: &HashMap<String, UserRecord>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Storage(format!("serializing users: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Storage("user file path has no parent directory".into()))?;
    let tmp_path = dir.join(format!(".users.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Storage(format!("writing temp user file: {e}")))?;

    // Refresh tokens live in this file
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Storage(format!("setting user file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Storage(format!("renaming temp user file: {e}")))?;

    debug!(path = %path.display(), "persisted users");
    Ok(())
}
