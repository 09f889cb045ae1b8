//! OAuth2 client-credentials token lifecycle and request authorization.
//!
//! A fetched token is cached until `expires_in - 60s` after acquisition.
//! Refreshes hold an async lock, so concurrent callers share one in-flight
//! grant request instead of racing duplicate ones.

use crate::client::{ApiClient, Authorization};
use crate::clock::Clock;
use crate::config::{AuthSettings, BasicCredentials, ClientCredentials};
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Subtracted from the advertised lifetime when a token is acquired.
pub const TOKEN_SAFETY_MARGIN_SECS: i64 = 60;

/// A cached bearer token.
#[derive(Debug, Clone)]
pub struct TokenState {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl TokenState {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

#[derive(Default)]
struct TokenSlot {
    credentials: Option<ClientCredentials>,
    cached: Option<TokenState>,
}

/// Acquires and caches bearer tokens for one credential set.
pub struct TokenManager {
    api: ApiClient,
    clock: Arc<dyn Clock>,
    slot: Mutex<TokenSlot>,
}

impl TokenManager {
    pub fn new(api: ApiClient, clock: Arc<dyn Clock>, credentials: Option<ClientCredentials>) -> Self {
        Self {
            api,
            clock,
            slot: Mutex::new(TokenSlot {
                credentials,
                cached: None,
            }),
        }
    }

    /// Replace the credential set, dropping any cached token.
    pub async fn set_credentials(&self, credentials: Option<ClientCredentials>) {
        let mut slot = self.slot.lock().await;
        slot.credentials = credentials;
        slot.cached = None;
    }

    /// A usable bearer token, or `None` in anonymous mode or when the grant fails.
    pub async fn token(&self) -> Option<String> {
        let mut slot = self.slot.lock().await;
        let credentials = slot.credentials.clone()?;

        let now = self.clock.now();
        if let Some(ref cached) = slot.cached {
            if cached.is_usable(now) {
                return Some(cached.token.clone());
            }
        }

        match self
            .api
            .request_token(&credentials.client_id, &credentials.client_secret)
            .await
        {
            Ok(grant) => {
                let Some(expires_at) = token_expiry(self.clock.now(), grant.expires_in) else {
                    tracing::warn!("Token response has unusable expires_in {}", grant.expires_in);
                    slot.cached = None;
                    return None;
                };

                tracing::debug!("Acquired bearer token valid until {}", expires_at);
                slot.cached = Some(TokenState {
                    token: grant.access_token.clone(),
                    expires_at,
                });
                Some(grant.access_token)
            }
            Err(e) => {
                tracing::warn!("Token request failed: {}", e);
                slot.cached = None;
                None
            }
        }
    }
}

/// Expiry for a grant acquired at `now`, or `None` if `expires_in` is unusable.
fn token_expiry(now: DateTime<Utc>, expires_in: f64) -> Option<DateTime<Utc>> {
    if !expires_in.is_finite() || expires_in < 0.0 {
        return None;
    }
    let lifetime = TimeDelta::try_milliseconds((expires_in * 1000.0) as i64)?;
    let margin = TimeDelta::try_seconds(TOKEN_SAFETY_MARGIN_SECS)?;
    now.checked_add_signed(lifetime)?.checked_sub_signed(margin)
}

/// Chooses the `Authorization` header for API requests.
///
/// Bearer when a token can be obtained, Basic when username/password are
/// configured, anonymous otherwise.
pub struct Authenticator {
    tokens: TokenManager,
    basic: RwLock<Option<BasicCredentials>>,
}

impl Authenticator {
    pub fn new(api: ApiClient, clock: Arc<dyn Clock>, settings: &AuthSettings) -> Self {
        Self {
            tokens: TokenManager::new(api, clock, settings.client.clone()),
            basic: RwLock::new(settings.basic.clone()),
        }
    }

    pub async fn apply(&self, settings: &AuthSettings) {
        *self.basic.write() = settings.basic.clone();
        self.tokens.set_credentials(settings.client.clone()).await;
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub async fn authorization(&self) -> Option<Authorization> {
        if let Some(token) = self.tokens.token().await {
            return Some(Authorization::Bearer(token));
        }

        self.basic
            .read()
            .as_ref()
            .map(|basic| Authorization::Basic {
                username: basic.username.clone(),
                password: basic.password.clone(),
            })
    }
}
