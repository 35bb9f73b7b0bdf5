//! QR-code login state machine.
//!
//! Login runs over the wire as `auth.exportLoginToken`: the first call
//! yields a token the operator scans from another device, a background
//! watcher re-polls until the server reports success, a password
//! challenge, or the token's lifetime runs out. All transitions funnel
//! through one mutex-guarded state so the HTTP handlers always see a
//! consistent snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use grammers_client::{Client, Config, InitParams, InvocationError};
use grammers_session::Session;
use grammers_tl_types as tl;
use rand::RngCore;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::TARGET_TG;

pub const QR_TTL_SECONDS: i64 = 120;
const QR_POLL_INTERVAL: Duration = Duration::from_secs(2);
const SESSION_LOCK_RETRIES: usize = 10;

/// Credentials and session location for the MTProto connection.
#[derive(Clone, Debug)]
pub struct TgConfig {
    pub api_id: i32,
    pub api_hash: String,
    pub session_file: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Unauthorized,
    Pending,
    PasswordRequired,
    Authorized,
    Expired,
    Error,
}

#[derive(Clone, Debug, Serialize)]
pub struct TgUser {
    pub id: i64,
    pub name: String,
    pub username: Option<String>,
}

/// Snapshot returned by every auth endpoint. Unset fields serialize as
/// nulls so clients always see the full shape.
#[derive(Clone, Debug, Serialize)]
pub struct AuthState {
    pub status: AuthStatus,
    pub qr_url: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub user: Option<TgUser>,
}

impl AuthState {
    fn with_status(status: AuthStatus) -> Self {
        AuthState {
            status,
            qr_url: None,
            expires_at: None,
            error: None,
            user: None,
        }
    }

    pub(crate) fn unauthorized() -> Self {
        Self::with_status(AuthStatus::Unauthorized)
    }

    pub(crate) fn expired() -> Self {
        Self::with_status(AuthStatus::Expired)
    }

    pub(crate) fn password_required() -> Self {
        Self::with_status(AuthStatus::PasswordRequired)
    }

    pub(crate) fn error(message: impl Into<String>) -> Self {
        AuthState {
            error: Some(message.into()),
            ..Self::with_status(AuthStatus::Error)
        }
    }
}

struct AuthInner {
    state: AuthState,
    client: Option<Client>,
    watcher: Option<JoinHandle<()>>,
}

/// Owns the Telegram client and the login state. Cheap to share: handlers
/// and fetchers hold it behind an `Arc`.
pub struct TelegramManager {
    config: Option<TgConfig>,
    inner: Arc<Mutex<AuthInner>>,
}

enum QrStep {
    Token { url: String, expires_at: DateTime<Utc> },
    Success,
    PasswordRequired,
    MigrateTo(i32),
}

enum PasswordOutcome {
    Accepted,
    Invalid,
}

impl TelegramManager {
    pub fn new(config: Option<TgConfig>) -> Self {
        TelegramManager {
            config,
            inner: Arc::new(Mutex::new(AuthInner {
                state: AuthState::unauthorized(),
                client: None,
                watcher: None,
            })),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    /// Current auth state. An expired QR is reported as such without
    /// touching the network; unauthorized/error states probe the saved
    /// session so a valid session flips straight to authorized.
    pub async fn status(&self) -> AuthState {
        let mut guard = self.inner.lock().await;

        if guard.state.status == AuthStatus::Pending {
            let lapsed = guard
                .state
                .expires_at
                .is_some_and(|expires_at| Utc::now() >= expires_at);
            if lapsed {
                guard.state = AuthState::expired();
            }
        }

        match guard.state.status {
            AuthStatus::Pending
            | AuthStatus::PasswordRequired
            | AuthStatus::Authorized
            | AuthStatus::Expired => return guard.state.clone(),
            AuthStatus::Unauthorized | AuthStatus::Error => {}
        }

        let Some(config) = self.config.clone() else {
            guard.state = AuthState::error("TG_API_ID / TG_API_HASH are not set");
            return guard.state.clone();
        };

        let client = match ensure_client(&mut guard, &config).await {
            Ok(client) => client,
            Err(err) => {
                guard.state = AuthState::error(format!("{err:#}"));
                return guard.state.clone();
            }
        };

        match client.is_authorized().await {
            Ok(true) => {
                guard.state = authorized_state(&client).await;
                persist_session(&client, &config.session_file);
            }
            Ok(false) => {
                // A failed probe never clears a recorded error.
                if guard.state.status != AuthStatus::Error {
                    guard.state = AuthState::unauthorized();
                }
            }
            Err(err) => {
                guard.state = AuthState::error(format!("authorization check failed: {err}"));
            }
        }
        guard.state.clone()
    }

    /// Starts (or with `force`, restarts) a QR login. No-op when already
    /// authorized or a QR is still pending, unless forced.
    pub async fn start_qr(&self, force: bool) -> AuthState {
        let mut guard = self.inner.lock().await;

        let Some(config) = self.config.clone() else {
            guard.state = AuthState::error("TG_API_ID / TG_API_HASH are not set");
            return guard.state.clone();
        };

        if !force {
            match guard.state.status {
                AuthStatus::Authorized => return guard.state.clone(),
                AuthStatus::Pending => {
                    let still_valid = guard
                        .state
                        .expires_at
                        .is_some_and(|expires_at| Utc::now() < expires_at);
                    if still_valid {
                        return guard.state.clone();
                    }
                }
                _ => {}
            }
        }

        if let Some(watcher) = guard.watcher.take() {
            watcher.abort();
        }

        let client = match ensure_client(&mut guard, &config).await {
            Ok(client) => client,
            Err(err) => {
                guard.state = AuthState::error(format!("{err:#}"));
                return guard.state.clone();
            }
        };

        match client.is_authorized().await {
            Ok(true) if !force => {
                guard.state = authorized_state(&client).await;
                persist_session(&client, &config.session_file);
                return guard.state.clone();
            }
            Ok(true) => {
                // Forced re-login drops the current authorization first.
                if let Err(err) = client.sign_out().await {
                    warn!(target: TARGET_TG, "Sign-out before re-login failed: {}", err);
                }
            }
            Ok(false) => {}
            Err(err) => {
                guard.state = AuthState::error(format!("authorization check failed: {err}"));
                return guard.state.clone();
            }
        }

        match export_login_token(&client, &config).await {
            Ok(QrStep::Token { url, expires_at }) => {
                info!(target: TARGET_TG, "QR login started, token valid until {}", expires_at);
                guard.state = AuthState {
                    status: AuthStatus::Pending,
                    qr_url: Some(url),
                    expires_at: Some(expires_at),
                    error: None,
                    user: None,
                };
                guard.watcher = Some(spawn_watcher(
                    config,
                    Arc::clone(&self.inner),
                    expires_at,
                ));
            }
            Ok(QrStep::Success) => {
                guard.state = authorized_state(&client).await;
                persist_session(&client, &config.session_file);
            }
            Ok(QrStep::PasswordRequired) => {
                guard.state = AuthState::password_required();
            }
            Ok(QrStep::MigrateTo(dc_id)) => {
                guard.state = AuthState::error(format!(
                    "login requires migration to DC {dc_id}; remove the session file and retry"
                ));
            }
            Err(err) => {
                guard.state = AuthState::error(format!("{err:#}"));
            }
        }
        guard.state.clone()
    }

    /// Answers a two-factor password challenge. A wrong password keeps the
    /// challenge open with `error` set to `bad_password`.
    pub async fn submit_password(&self, password: &str) -> AuthState {
        let mut guard = self.inner.lock().await;

        if guard.state.status != AuthStatus::PasswordRequired {
            return guard.state.clone();
        }
        let Some(config) = self.config.clone() else {
            guard.state = AuthState::error("TG_API_ID / TG_API_HASH are not set");
            return guard.state.clone();
        };
        let Some(client) = guard.client.clone() else {
            guard.state = AuthState::error("no active login attempt");
            return guard.state.clone();
        };

        match check_password(&client, password).await {
            Ok(PasswordOutcome::Accepted) => {
                guard.state = authorized_state(&client).await;
                persist_session(&client, &config.session_file);
            }
            Ok(PasswordOutcome::Invalid) => {
                guard.state.error = Some("bad_password".to_string());
            }
            Err(err) => {
                guard.state = AuthState::error(format!("{err:#}"));
            }
        }
        guard.state.clone()
    }

    /// Signs out, removes the saved session, and resets to unauthorized.
    pub async fn logout(&self) -> AuthState {
        let mut guard = self.inner.lock().await;

        if let Some(watcher) = guard.watcher.take() {
            watcher.abort();
        }
        if let Some(client) = guard.client.take() {
            if let Err(err) = client.sign_out().await {
                warn!(target: TARGET_TG, "Sign-out failed: {}", err);
            }
        }
        if let Some(config) = &self.config {
            match tokio::fs::remove_file(&config.session_file).await {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => {
                    warn!(target: TARGET_TG, "Failed to remove the session file: {}", err);
                }
            }
        }
        guard.state = AuthState::unauthorized();
        guard.state.clone()
    }

    /// The client, but only when authorized; fetchers treat `None` as "skip
    /// this cycle".
    pub async fn connected_client(&self) -> Result<Option<Client>> {
        let Some(config) = self.config.clone() else {
            return Ok(None);
        };
        let mut guard = self.inner.lock().await;

        let client = match &guard.client {
            Some(client) => client.clone(),
            None => {
                let client = connect_client(&config).await?;
                guard.client = Some(client.clone());
                client
            }
        };

        if client.is_authorized().await? {
            if guard.state.status != AuthStatus::Authorized {
                guard.state = authorized_state(&client).await;
            }
            Ok(Some(client))
        } else {
            Ok(None)
        }
    }

    #[cfg(test)]
    pub(crate) async fn set_state_for_tests(&self, state: AuthState) {
        self.inner.lock().await.state = state;
    }
}

async fn ensure_client(guard: &mut AuthInner, config: &TgConfig) -> Result<Client> {
    if let Some(client) = &guard.client {
        return Ok(client.clone());
    }
    let client = connect_client(config).await?;
    guard.client = Some(client.clone());
    Ok(client)
}

/// Opens the session file and connects. Another process holding the file
/// lock gets a linear-backoff retry window before we give up.
async fn connect_client(config: &TgConfig) -> Result<Client> {
    if let Some(parent) = config.session_file.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }

    let mut attempts = 0;
    let session = loop {
        attempts += 1;
        match Session::load_file_or_create(&config.session_file) {
            Ok(session) => break session,
            Err(err) if attempts < SESSION_LOCK_RETRIES && is_lock_error(&err) => {
                warn!(
                    target: TARGET_TG,
                    "Session file is locked (attempt {}/{}), retrying", attempts, SESSION_LOCK_RETRIES
                );
                sleep(Duration::from_millis(200 * attempts as u64)).await;
            }
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to open session file {}", config.session_file.display())
                });
            }
        }
    };

    Client::connect(Config {
        session,
        api_id: config.api_id,
        api_hash: config.api_hash.clone(),
        params: InitParams::default(),
    })
    .await
    .context("failed to connect to Telegram")
}

fn is_lock_error(err: &std::io::Error) -> bool {
    let message = err.to_string().to_ascii_lowercase();
    err.kind() == std::io::ErrorKind::WouldBlock
        || message.contains("locked")
        || message.contains("resource temporarily unavailable")
}

fn persist_session(client: &Client, path: &Path) {
    if let Err(err) = client.session().save_to_file(path) {
        warn!(target: TARGET_TG, "Failed to persist the Telegram session: {}", err);
    }
}

async fn authorized_state(client: &Client) -> AuthState {
    let user = match client.get_me().await {
        Ok(me) => Some(TgUser {
            id: me.id(),
            name: me.full_name(),
            username: me.username().map(str::to_string),
        }),
        Err(err) => {
            warn!(target: TARGET_TG, "Failed to fetch the account profile: {}", err);
            None
        }
    };
    AuthState {
        user,
        ..AuthState::with_status(AuthStatus::Authorized)
    }
}

async fn export_login_token(client: &Client, config: &TgConfig) -> Result<QrStep> {
    let request = tl::functions::auth::ExportLoginToken {
        api_id: config.api_id,
        api_hash: config.api_hash.clone(),
        except_ids: Vec::new(),
    };
    match client.invoke(&request).await {
        Ok(tl::enums::auth::LoginToken::Token(token)) => Ok(QrStep::Token {
            url: format!("tg://login?token={}", URL_SAFE_NO_PAD.encode(&token.token)),
            expires_at: Utc::now() + ChronoDuration::seconds(QR_TTL_SECONDS),
        }),
        Ok(tl::enums::auth::LoginToken::Success(_)) => Ok(QrStep::Success),
        Ok(tl::enums::auth::LoginToken::MigrateTo(migrate)) => {
            Ok(QrStep::MigrateTo(migrate.dc_id))
        }
        Err(InvocationError::Rpc(rpc)) if rpc.name == "SESSION_PASSWORD_NEEDED" => {
            Ok(QrStep::PasswordRequired)
        }
        Err(err) => Err(err).context("auth.exportLoginToken failed"),
    }
}

/// Re-polls the login token until the QR is scanned or its lifetime ends.
fn spawn_watcher(
    config: TgConfig,
    inner: Arc<Mutex<AuthInner>>,
    deadline: DateTime<Utc>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            sleep(QR_POLL_INTERVAL).await;

            if Utc::now() >= deadline {
                let mut guard = inner.lock().await;
                if guard.state.status == AuthStatus::Pending {
                    info!(target: TARGET_TG, "QR login token expired");
                    guard.state = AuthState::expired();
                }
                return;
            }

            let client = {
                let guard = inner.lock().await;
                if guard.state.status != AuthStatus::Pending {
                    return;
                }
                match &guard.client {
                    Some(client) => client.clone(),
                    None => return,
                }
            };

            match export_login_token(&client, &config).await {
                Ok(QrStep::Success) => {
                    let state = authorized_state(&client).await;
                    persist_session(&client, &config.session_file);
                    let mut guard = inner.lock().await;
                    info!(target: TARGET_TG, "QR login confirmed");
                    guard.state = state;
                    return;
                }
                Ok(QrStep::PasswordRequired) => {
                    let mut guard = inner.lock().await;
                    guard.state = AuthState::password_required();
                    return;
                }
                Ok(QrStep::Token { url, .. }) => {
                    // The server may rotate the token; surface the fresh
                    // URL but keep the original deadline.
                    let mut guard = inner.lock().await;
                    if guard.state.status == AuthStatus::Pending {
                        guard.state.qr_url = Some(url);
                    }
                }
                Ok(QrStep::MigrateTo(dc_id)) => {
                    let mut guard = inner.lock().await;
                    guard.state = AuthState::error(format!(
                        "login requires migration to DC {dc_id}; remove the session file and retry"
                    ));
                    return;
                }
                Err(err) => {
                    warn!(target: TARGET_TG, "QR poll failed: {:#}", err);
                }
            }
        }
    })
}

/// SRP password check (RFC 2945 as profiled by Telegram).
async fn check_password(client: &Client, password: &str) -> Result<PasswordOutcome> {
    let tl::enums::account::Password::Password(parameters) = client
        .invoke(&tl::functions::account::GetPassword {})
        .await
        .context("account.getPassword failed")?;

    let algo = match parameters.current_algo {
        Some(tl::enums::PasswordKdfAlgo::Sha256Sha256Pbkdf2Hmacsha512iter100000Sha256ModPow(
            algo,
        )) => algo,
        _ => return Err(anyhow!("unsupported password algorithm")),
    };
    let srp_b = parameters
        .srp_b
        .ok_or_else(|| anyhow!("server sent no SRP challenge"))?;
    let srp_id = parameters
        .srp_id
        .ok_or_else(|| anyhow!("server sent no SRP id"))?;

    let mut a = vec![0u8; 256];
    rand::rng().fill_bytes(&mut a);
    let (m1, g_a) = grammers_crypto::two_factor_auth::calculate_2fa(
        &algo.salt1,
        &algo.salt2,
        &algo.p,
        &algo.g,
        srp_b,
        a,
        password.as_bytes(),
    );

    let check = tl::functions::auth::CheckPassword {
        password: tl::enums::InputCheckPasswordSrp::Srp(tl::types::InputCheckPasswordSrp {
            srp_id,
            a: g_a.to_vec(),
            m1: m1.to_vec(),
        }),
    };
    match client.invoke(&check).await {
        Ok(_) => Ok(PasswordOutcome::Accepted),
        Err(InvocationError::Rpc(rpc)) if rpc.name == "PASSWORD_HASH_INVALID" => {
            Ok(PasswordOutcome::Invalid)
        }
        Err(err) => Err(err).context("auth.checkPassword failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured_manager() -> TelegramManager {
        TelegramManager::new(Some(TgConfig {
            api_id: 1,
            api_hash: "hash".to_string(),
            session_file: PathBuf::from("/nonexistent/telegram.session"),
        }))
    }

    #[tokio::test]
    async fn pending_qr_past_its_deadline_reports_expired() {
        let manager = configured_manager();
        manager
            .set_state_for_tests(AuthState {
                status: AuthStatus::Pending,
                qr_url: Some("tg://login?token=abc".to_string()),
                expires_at: Some(Utc::now() - ChronoDuration::seconds(1)),
                error: None,
                user: None,
            })
            .await;

        let state = manager.status().await;
        assert_eq!(state.status, AuthStatus::Expired);
        assert!(state.qr_url.is_none());
        assert!(state.expires_at.is_none());
    }

    #[tokio::test]
    async fn pending_qr_within_its_deadline_is_returned_as_is() {
        let manager = configured_manager();
        manager
            .set_state_for_tests(AuthState {
                status: AuthStatus::Pending,
                qr_url: Some("tg://login?token=abc".to_string()),
                expires_at: Some(Utc::now() + ChronoDuration::seconds(60)),
                error: None,
                user: None,
            })
            .await;

        let state = manager.status().await;
        assert_eq!(state.status, AuthStatus::Pending);
        assert_eq!(state.qr_url.as_deref(), Some("tg://login?token=abc"));
    }

    #[tokio::test]
    async fn start_qr_reuses_a_live_pending_token() {
        let manager = configured_manager();
        manager
            .set_state_for_tests(AuthState {
                status: AuthStatus::Pending,
                qr_url: Some("tg://login?token=abc".to_string()),
                expires_at: Some(Utc::now() + ChronoDuration::seconds(60)),
                error: None,
                user: None,
            })
            .await;

        let state = manager.start_qr(false).await;
        assert_eq!(state.status, AuthStatus::Pending);
        assert_eq!(state.qr_url.as_deref(), Some("tg://login?token=abc"));
    }

    #[tokio::test]
    async fn start_qr_never_reissues_a_lapsed_token() {
        // The session path sits under a regular file, so the connect step
        // fails deterministically instead of reaching the network.
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let manager = TelegramManager::new(Some(TgConfig {
            api_id: 1,
            api_hash: "hash".to_string(),
            session_file: blocker.path().join("sessions").join("telegram.session"),
        }));
        manager
            .set_state_for_tests(AuthState {
                status: AuthStatus::Pending,
                qr_url: Some("tg://login?token=stale".to_string()),
                expires_at: Some(Utc::now() - ChronoDuration::seconds(1)),
                error: None,
                user: None,
            })
            .await;

        // A lapsed token falls through to a fresh export attempt; whatever
        // the outcome, the stale QR must be gone.
        let state = manager.start_qr(false).await;
        assert_ne!(state.status, AuthStatus::Pending);
        assert_ne!(state.qr_url.as_deref(), Some("tg://login?token=stale"));
        assert_eq!(state.status, AuthStatus::Error);
        assert!(state.qr_url.is_none());
    }

    #[tokio::test]
    async fn missing_credentials_surface_as_an_error_state() {
        let manager = TelegramManager::new(None);
        assert!(!manager.is_configured());

        let state = manager.status().await;
        assert_eq!(state.status, AuthStatus::Error);
        assert!(state.error.as_deref().is_some_and(|err| err.contains("not set")));

        let state = manager.start_qr(false).await;
        assert_eq!(state.status, AuthStatus::Error);

        assert!(manager.connected_client().await.unwrap().is_none());
    }

    #[test]
    fn state_serializes_every_field() {
        let value = serde_json::to_value(AuthState::unauthorized()).unwrap();
        let object = value.as_object().unwrap();
        for key in ["status", "qr_url", "expires_at", "error", "user"] {
            assert!(object.contains_key(key), "missing {key}");
        }
        assert_eq!(object["status"], "unauthorized");
        assert!(object["qr_url"].is_null());
    }

    #[test]
    fn statuses_use_snake_case_wire_names() {
        let encoded = serde_json::to_string(&AuthStatus::PasswordRequired).unwrap();
        assert_eq!(encoded, "\"password_required\"");
    }
}
