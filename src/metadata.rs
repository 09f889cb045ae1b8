//! Lazily fetched per-aircraft metadata.
//!
//! Entries are inserted once and kept for the life of the process. A lookup
//! that fails leaves no trace, so the next sighting of the same aircraft tries
//! again. A per-key in-flight marker keeps rapid repeat sightings from issuing
//! duplicate requests.

use crate::auth::Authenticator;
use crate::client::ApiClient;
use crate::types::{describe_type, AircraftMetadata};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Shared icao24 → metadata map.
pub struct MetadataCache {
    entries: RwLock<HashMap<String, AircraftMetadata>>,
    in_flight: Mutex<HashSet<String>>,
    changed: broadcast::Sender<String>,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataCache {
    pub fn new() -> Self {
        let (changed, _) = broadcast::channel(64);
        Self {
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            changed,
        }
    }

    pub fn get(&self, icao24: &str) -> Option<AircraftMetadata> {
        self.entries.read().get(icao24).cloned()
    }

    pub fn contains(&self, icao24: &str) -> bool {
        self.entries.read().contains_key(icao24)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Display type for `icao24`, if its metadata is known.
    pub fn aircraft_type(&self, icao24: &str) -> Option<String> {
        self.entries.read().get(icao24).and_then(describe_type)
    }

    /// Receives the icao24 of every newly cached entry.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.changed.subscribe()
    }

    /// Insert unless already present. Returns whether the entry was new.
    pub fn insert(&self, icao24: &str, metadata: AircraftMetadata) -> bool {
        let inserted = {
            let mut entries = self.entries.write();
            if entries.contains_key(icao24) {
                false
            } else {
                entries.insert(icao24.to_string(), metadata);
                true
            }
        };

        if inserted {
            // No subscribers is fine
            let _ = self.changed.send(icao24.to_string());
        }
        inserted
    }

    /// Claim the right to fetch `icao24`. False if cached or already claimed.
    fn begin_fetch(&self, icao24: &str) -> bool {
        if self.contains(icao24) {
            return false;
        }
        self.in_flight.lock().insert(icao24.to_string())
    }

    fn end_fetch(&self, icao24: &str) {
        self.in_flight.lock().remove(icao24);
    }
}

/// Issues metadata lookups into a [`MetadataCache`].
#[derive(Clone)]
pub struct MetadataResolver {
    cache: Arc<MetadataCache>,
    api: ApiClient,
    auth: Arc<Authenticator>,
}

impl MetadataResolver {
    pub fn new(cache: Arc<MetadataCache>, api: ApiClient, auth: Arc<Authenticator>) -> Self {
        Self { cache, api, auth }
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    /// Start a background lookup for `icao24` unless it is cached or pending.
    ///
    /// Failures are logged at debug level and otherwise ignored.
    pub fn resolve(&self, icao24: &str) -> Option<JoinHandle<()>> {
        if !self.cache.begin_fetch(icao24) {
            return None;
        }

        let icao24 = icao24.to_string();
        let cache = Arc::clone(&self.cache);
        let api = self.api.clone();
        let auth = Arc::clone(&self.auth);

        Some(tokio::spawn(async move {
            let authorization = auth.authorization().await;
            match api.fetch_metadata(&icao24, authorization.as_ref()).await {
                Ok(metadata) => {
                    tracing::debug!("Resolved metadata for {}", icao24);
                    cache.insert(&icao24, metadata);
                }
                Err(e) => {
                    tracing::debug!("Metadata lookup for {} failed: {}", icao24, e);
                }
            }
            cache.end_fetch(&icao24);
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::HttpResponse;
    use crate::config::AuthSettings;
    use crate::testing::{ManualClock, MockTransport};
    use reqwest::StatusCode;
    use std::time::Duration;

    const METADATA: &str = r#"{"registration":"EC-MXV","manufacturerName":"Airbus","model":"A320","operator":"Iberia","built":"2019-03-01","typecode":"A320"}"#;

    fn resolver(transport: &Arc<MockTransport>) -> MetadataResolver {
        let api = ApiClient::new(transport.clone());
        let clock = Arc::new(ManualClock::new("2024-01-01"));
        let auth = Arc::new(Authenticator::new(api.clone(), clock, &AuthSettings::default()));
        MetadataResolver::new(Arc::new(MetadataCache::new()), api, auth)
    }

    #[tokio::test]
    async fn test_resolve_populates_cache_and_notifies() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("/metadata/aircraft/icao/34520d", MockTransport::json(METADATA));
        let resolver = resolver(&transport);
        let mut changed = resolver.cache().subscribe();

        resolver.resolve("34520d").unwrap().await.unwrap();

        assert_eq!(changed.recv().await.unwrap(), "34520d");
        assert_eq!(
            resolver.cache().aircraft_type("34520d").as_deref(),
            Some("2019 AIRBUS A320 IBERIA")
        );

        // Cached entries are never fetched again
        assert!(resolver.resolve("34520d").is_none());
        assert_eq!(transport.count("/metadata/"), 1);
    }

    #[tokio::test]
    async fn test_in_flight_lookup_not_duplicated() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("/metadata/", MockTransport::json(METADATA));
        transport.set_delay(Duration::from_millis(50));
        let resolver = resolver(&transport);

        let first = resolver.resolve("34520d");
        let second = resolver.resolve("34520d");
        assert!(first.is_some());
        assert!(second.is_none());

        first.unwrap().await.unwrap();
        assert_eq!(transport.count("/metadata/"), 1);
        assert!(resolver.cache().contains("34520d"));
    }

    #[tokio::test]
    async fn test_failure_retried_on_next_sighting() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("/metadata/", HttpResponse::new(StatusCode::NOT_FOUND, ""));
        transport.respond("/metadata/", MockTransport::json(METADATA));
        let resolver = resolver(&transport);

        resolver.resolve("34520d").unwrap().await.unwrap();
        assert!(!resolver.cache().contains("34520d"));

        resolver.resolve("34520d").unwrap().await.unwrap();
        assert!(resolver.cache().contains("34520d"));
        assert_eq!(transport.count("/metadata/"), 2);
    }

    #[tokio::test]
    async fn test_transport_error_retried_on_next_sighting() {
        let transport = Arc::new(MockTransport::new());
        transport.fail("/metadata/", "connection refused");
        transport.respond("/metadata/", MockTransport::json(METADATA));
        let resolver = resolver(&transport);

        resolver.resolve("34520d").unwrap().await.unwrap();
        assert!(resolver.cache().is_empty());
        assert_eq!(resolver.cache().aircraft_type("34520d"), None);

        resolver.resolve("34520d").unwrap().await.unwrap();
        assert!(resolver.cache().contains("34520d"));
        assert_eq!(transport.count("/metadata/"), 2);
    }

    #[test]
    fn test_insert_once() {
        let cache = MetadataCache::new();
        let first = AircraftMetadata {
            model: Some("A320".to_string()),
            ..Default::default()
        };
        assert!(cache.insert("abc", first.clone()));
        assert!(!cache.insert("abc", AircraftMetadata::default()));
        assert_eq!(cache.get("abc"), Some(first));
        assert_eq!(cache.len(), 1);
    }
}
