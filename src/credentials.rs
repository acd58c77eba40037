use crate::agent::AuthApi;
use crate::errors::{AppError, AppResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;

pub const ACCESS_TOKEN_KEY: &str = "jwt";
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";
pub const DEFAULT_GUARD_WINDOW_MS: i64 = 5_000;

const KEYRING_SERVICE: &str = "activity-client-core";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoredTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

/// Persisted client credentials. Survives process restarts.
pub trait TokenStore: Send + Sync {
    fn load_tokens(&self) -> AppResult<StoredTokens>;
    fn save_access_token(&self, token: &str) -> AppResult<()>;
    fn save_refresh_token(&self, token: &str) -> AppResult<()>;
    fn clear_tokens(&self) -> AppResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn from_tokens(access_token: String, refresh_token: String) -> Self {
        let expires_at = decode_expiry(&access_token);
        Self {
            access_token,
            refresh_token,
            expires_at,
        }
    }

    /// True when the expiry is known and falls within `window` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at - window,
            None => false,
        }
    }
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<i64>,
}

/// Reads the `exp` claim of a JWT without verifying its signature.
pub fn decode_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claim.exp?, 0)
}

/// Hands out an access token that will not expire inside the guard window,
/// renewing it through the auth collaborator when needed.
#[derive(Clone)]
pub struct CredentialGuard {
    store: Arc<dyn TokenStore>,
    auth: Arc<dyn AuthApi>,
    window: Duration,
    refresh_lock: Arc<Mutex<()>>,
}

impl CredentialGuard {
    pub fn new(store: Arc<dyn TokenStore>, auth: Arc<dyn AuthApi>, window_ms: i64) -> Self {
        Self {
            store,
            auth,
            window: Duration::milliseconds(window_ms),
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn current_credential(&self) -> Option<Credential> {
        let tokens = match self.store.load_tokens() {
            Ok(tokens) => tokens,
            Err(error) => {
                tracing::warn!(error = %error, "failed to read stored credentials");
                return None;
            }
        };
        match (tokens.access_token, tokens.refresh_token) {
            (Some(access), Some(refresh)) => Some(Credential::from_tokens(access, refresh)),
            _ => None,
        }
    }

    pub async fn valid_token(&self) -> Option<String> {
        self.valid_token_at(Utc::now()).await
    }

    pub async fn valid_token_at(&self, now: DateTime<Utc>) -> Option<String> {
        let credential = self.current_credential()?;
        if !credential.expires_within(now, self.window) {
            return Some(credential.access_token);
        }

        let _guard = self.refresh_lock.lock().await;
        // Another caller may have renewed the token while we waited.
        let credential = self.current_credential()?;
        if !credential.expires_within(now, self.window) {
            return Some(credential.access_token);
        }

        tracing::info!(expires_at = ?credential.expires_at, "access token inside guard window, refreshing");
        match self
            .auth
            .refresh_token(&credential.access_token, &credential.refresh_token)
            .await
        {
            Ok(token) => {
                if let Err(error) = self.store.save_access_token(&token) {
                    tracing::warn!(error = %error, "failed to persist refreshed access token");
                }
                Some(token)
            }
            Err(error) => {
                tracing::warn!(error = %error, "access token refresh failed");
                None
            }
        }
    }

    /// Like [`valid_token`](Self::valid_token) but reports the missing token
    /// as `AuthExpired`.
    pub async fn require_token(&self) -> AppResult<String> {
        self.valid_token()
            .await
            .ok_or_else(|| AppError::AuthExpired("no usable access or refresh token".to_string()))
    }
}

/// Token store backed by the operating system keyring.
#[derive(Default)]
pub struct KeyringTokenStore {
    keyring_lock: StdMutex<()>,
}

impl KeyringTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(name: &str) -> AppResult<keyring::Entry> {
        keyring::Entry::new(KEYRING_SERVICE, name).map_err(|error| AppError::Io(error.to_string()))
    }

    fn read(name: &str) -> AppResult<Option<String>> {
        stored_value(Self::entry(name)?.get_password())
    }

    fn write(name: &str, value: &str) -> AppResult<()> {
        Self::entry(name)?
            .set_password(value)
            .map_err(|error| AppError::Io(error.to_string()))
    }

    fn delete(name: &str) -> AppResult<()> {
        removed(Self::entry(name)?.delete_credential())
    }

    fn lock(&self) -> AppResult<std::sync::MutexGuard<'_, ()>> {
        self.keyring_lock
            .lock()
            .map_err(|_| AppError::Internal("keyring mutex poisoned".to_string()))
    }
}

/// An empty keyring value counts as absent.
fn stored_value(result: keyring::Result<String>) -> AppResult<Option<String>> {
    match result {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(error) => Err(AppError::Io(error.to_string())),
    }
}

fn removed(result: keyring::Result<()>) -> AppResult<()> {
    match result {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(error) => Err(AppError::Io(error.to_string())),
    }
}

impl TokenStore for KeyringTokenStore {
    fn load_tokens(&self) -> AppResult<StoredTokens> {
        let _guard = self.lock()?;
        Ok(StoredTokens {
            access_token: Self::read(ACCESS_TOKEN_KEY)?,
            refresh_token: Self::read(REFRESH_TOKEN_KEY)?,
        })
    }

    fn save_access_token(&self, token: &str) -> AppResult<()> {
        let _guard = self.lock()?;
        Self::write(ACCESS_TOKEN_KEY, token)
    }

    fn save_refresh_token(&self, token: &str) -> AppResult<()> {
        let _guard = self.lock()?;
        Self::write(REFRESH_TOKEN_KEY, token)
    }

    fn clear_tokens(&self) -> AppResult<()> {
        let _guard = self.lock()?;
        Self::delete(ACCESS_TOKEN_KEY)?;
        Self::delete(REFRESH_TOKEN_KEY)
    }
}
