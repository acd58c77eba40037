pub mod agent;
pub mod credentials;
pub mod db;
pub mod errors;
pub mod live;
pub mod models;
mod mutations;
pub mod query;
pub mod redaction;
pub mod registry;
pub mod store;

use crate::agent::{ActivitiesApi, AuthApi, HttpAgent};
use crate::credentials::{CredentialGuard, KeyringTokenStore, TokenStore};
use crate::db::Database;
use crate::errors::AppResult;
use crate::live::{HubTransport, LiveChannelManager};
use crate::models::{ClientSettings, TokenStoreKind, Viewer};
use crate::store::ActivityStore;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

pub use crate::errors::AppError;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Wires the store, credential guard and live channel together. This is the
/// explicit context presentation code holds instead of a global store.
#[derive(Clone)]
pub struct ClientCore {
    db: Arc<Database>,
    tokens: Arc<dyn TokenStore>,
    settings: ClientSettings,
    credentials: CredentialGuard,
    store: ActivityStore,
    live: LiveChannelManager,
}

impl ClientCore {
    /// Opens the client database, installs file logging with the persisted
    /// `logFilter` and builds the core.
    pub fn start(app_data_dir: &Path, viewer: Viewer, transport: Arc<dyn HubTransport>) -> AppResult<Self> {
        let core = Self::new(app_data_dir, viewer, transport)?;
        init_tracing(app_data_dir, core.settings())?;
        tracing::info!(token_store = ?core.settings.token_store, "client core started");
        Ok(core)
    }

    pub fn new(app_data_dir: &Path, viewer: Viewer, transport: Arc<dyn HubTransport>) -> AppResult<Self> {
        let db = Arc::new(Database::new(&app_data_dir.join("client.sqlite"))?);
        let settings = db.get_settings()?;
        let tokens = token_store(settings.token_store, &db);
        let agent = Arc::new(HttpAgent::new(
            &settings.api_url,
            Duration::from_millis(settings.request_timeout_ms),
            tokens.clone(),
        )?);
        Ok(Self::with_collaborators(
            db,
            tokens,
            settings,
            agent.clone(),
            agent,
            transport,
            viewer,
        ))
    }

    pub fn with_collaborators(
        db: Arc<Database>,
        tokens: Arc<dyn TokenStore>,
        settings: ClientSettings,
        api: Arc<dyn ActivitiesApi>,
        auth: Arc<dyn AuthApi>,
        transport: Arc<dyn HubTransport>,
        viewer: Viewer,
    ) -> Self {
        let guard_window_ms = i64::try_from(settings.token_guard_window_ms).unwrap_or(i64::MAX);
        let credentials = CredentialGuard::new(tokens.clone(), auth, guard_window_ms);
        let store = ActivityStore::new(api, viewer, settings.page_size);
        let live = LiveChannelManager::new(
            store.clone(),
            transport,
            credentials.clone(),
            &settings.hub_url,
            settings.comment_routing,
        );

        Self {
            db,
            tokens,
            settings,
            credentials,
            store,
            live,
        }
    }

    pub fn store(&self) -> &ActivityStore {
        &self.store
    }

    pub fn live(&self) -> &LiveChannelManager {
        &self.live
    }

    pub fn credentials(&self) -> &CredentialGuard {
        &self.credentials
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Persists a patch; page size, URLs, routing and the token store apply
    /// on next start.
    pub fn update_settings(&self, patch: serde_json::Value) -> AppResult<ClientSettings> {
        self.db.update_settings(patch)
    }

    pub fn sign_in(&self, access_token: &str, refresh_token: &str) -> AppResult<()> {
        self.tokens.save_access_token(access_token)?;
        self.tokens.save_refresh_token(refresh_token)?;
        tracing::info!("stored credentials for signed-in user");
        Ok(())
    }

    pub async fn sign_out(&self) -> AppResult<()> {
        self.live.disconnect().await?;
        self.store.clear_selection().await;
        self.tokens.clear_tokens()?;
        tracing::info!("cleared stored credentials");
        Ok(())
    }
}

fn token_store(kind: TokenStoreKind, db: &Arc<Database>) -> Arc<dyn TokenStore> {
    match kind {
        TokenStoreKind::Database => db.clone(),
        TokenStoreKind::Keyring => Arc::new(KeyringTokenStore::new()),
    }
}

/// `RUST_LOG` wins; otherwise the persisted `logFilter`, then `info`.
fn env_filter(settings: &ClientSettings) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| settings_filter(&settings.log_filter))
}

fn settings_filter(log_filter: &str) -> EnvFilter {
    EnvFilter::try_new(log_filter).unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init_tracing(app_data_dir: &Path, settings: &ClientSettings) -> AppResult<()> {
    let log_dir = app_data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "client.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(settings))
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(format!("failed to install tracing subscriber: {}", error)))
}

#[cfg(test)]
mod tests {
    use super::{settings_filter, token_store, ClientCore};
    use crate::credentials::TokenStore;
    use crate::db::Database;
    use crate::live::{HubLink, HubTransport, TokenFactory};
    use crate::models::{ConnectionState, TokenStoreKind, Viewer};
    use async_trait::async_trait;
    use std::sync::Arc;
    use tracing_subscriber::filter::LevelFilter;

    struct OfflineHub;

    #[async_trait]
    impl HubTransport for OfflineHub {
        async fn connect(&self, _url: &str, _token_factory: TokenFactory) -> anyhow::Result<HubLink> {
            anyhow::bail!("hub offline")
        }
    }

    fn viewer() -> Viewer {
        Viewer {
            username: "bob".to_string(),
            display_name: "Bob".to_string(),
            image: None,
        }
    }

    #[test]
    fn bootstrap_creates_database_with_default_settings() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = ClientCore::new(dir.path(), viewer(), Arc::new(OfflineHub)).expect("core");

        assert!(dir.path().join("client.sqlite").exists());
        assert_eq!(core.settings().page_size, 2);
        assert_eq!(core.live().state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn transport_failure_leaves_channel_disconnected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = ClientCore::new(dir.path(), viewer(), Arc::new(OfflineHub)).expect("core");
        core.sign_in("opaque-access", "refresh").expect("sign in");

        let err = core.live().connect("a1").await.expect_err("offline");
        assert_eq!(err.code(), "TRANSPORT_FAILURE");
        assert_eq!(core.live().state(), ConnectionState::Disconnected);
    }

    #[test]
    fn settings_patch_is_persisted_for_next_start() {
        let dir = tempfile::tempdir().expect("tempdir");
        let core = ClientCore::new(dir.path(), viewer(), Arc::new(OfflineHub)).expect("core");
        core.update_settings(serde_json::json!({ "pageSize": 6 })).expect("update");

        let reopened = ClientCore::new(dir.path(), viewer(), Arc::new(OfflineHub)).expect("reopen");
        assert_eq!(reopened.settings().page_size, 6);
    }

    #[test]
    fn log_filter_setting_seeds_env_filter() {
        assert_eq!(settings_filter("warn").max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(
            settings_filter("activity_client_core=debug").max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
        assert_eq!(
            settings_filter("activity_client_core=loud").max_level_hint(),
            Some(LevelFilter::INFO)
        );
    }

    #[test]
    fn start_writes_logs_under_app_data_dir() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let db = Database::new(&dir.path().join("client.sqlite")).expect("db");
            db.update_settings(serde_json::json!({ "logFilter": "debug" })).expect("update");
        }

        let core = ClientCore::start(dir.path(), viewer(), Arc::new(OfflineHub)).expect("start");

        assert_eq!(core.settings().log_filter, "debug");
        assert!(dir.path().join("logs").is_dir());
    }

    #[test]
    fn token_store_setting_selects_backend() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db = Arc::new(Database::new(&dir.path().join("client.sqlite")).expect("db"));
        db.save_access_token("stored-in-sqlite").expect("save");

        let sqlite = token_store(TokenStoreKind::Database, &db);
        assert_eq!(
            sqlite.load_tokens().expect("tokens").access_token.as_deref(),
            Some("stored-in-sqlite")
        );

        let updated = db
            .update_settings(serde_json::json!({ "tokenStore": "keyring" }))
            .expect("update");
        assert_eq!(updated.token_store, TokenStoreKind::Keyring);
    }
}
