//! Poller tunables and authentication settings.

use crate::geo::Coordinates;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Reference point used when the location provider has no fix (Madrid).
pub const DEFAULT_LOCATION: Coordinates = Coordinates::new(40.417, -3.704);

/// Username/password for HTTP Basic authentication.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// OAuth2 client-credentials pair.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

// Secrets stay out of logs.
impl fmt::Debug for BasicCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicCredentials")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// Persisted authentication configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub basic: Option<BasicCredentials>,
    #[serde(default)]
    pub client: Option<ClientCredentials>,
}

impl AuthSettings {
    /// True when either Basic or bearer authentication is configured.
    pub fn is_configured(&self) -> bool {
        self.basic.is_some() || self.client.is_some()
    }

    /// Build settings from optional CLI/env values, ignoring blank entries.
    pub fn from_parts(
        username: Option<String>,
        password: Option<String>,
        client_id: Option<String>,
        client_secret: Option<String>,
    ) -> Self {
        let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());

        let basic = match (non_blank(username), non_blank(password)) {
            (Some(username), Some(password)) => Some(BasicCredentials { username, password }),
            _ => None,
        };
        let client = match (non_blank(client_id), non_blank(client_secret)) {
            (Some(client_id), Some(client_secret)) => Some(ClientCredentials {
                client_id,
                client_secret,
            }),
            _ => None,
        };

        Self { basic, client }
    }

    /// Non-empty fields of `other` override the ones in `self`.
    pub fn merged_with(&self, other: &AuthSettings) -> AuthSettings {
        AuthSettings {
            basic: other.basic.clone().or_else(|| self.basic.clone()),
            client: other.client.clone().or_else(|| self.client.clone()),
        }
    }
}

/// Configuration for the poller.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Search radius around the reference point
    pub radius_km: f64,
    /// Poll interval when any authentication is configured
    pub authenticated_interval: Duration,
    /// Poll interval in anonymous mode
    pub anonymous_interval: Duration,
    /// Number of first sightings kept in the history
    pub history_limit: usize,
    /// Fallback reference point
    pub default_location: Coordinates,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            radius_km: 3.0,
            authenticated_interval: Duration::from_secs(10),
            anonymous_interval: Duration::from_secs(60),
            history_limit: 20,
            default_location: DEFAULT_LOCATION,
        }
    }
}

impl PollerConfig {
    pub fn interval_for(&self, settings: &AuthSettings) -> Duration {
        if settings.is_configured() {
            self.authenticated_interval
        } else {
            self.anonymous_interval
        }
    }
}
