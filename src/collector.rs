//! Polling coordinator.
//!
//! A [`Poller`] owns the whole fetch cycle: it resolves the reference point,
//! authenticates, fetches the state vectors inside the bounding box, ranks
//! them by exact distance, kicks off metadata lookups, folds the result into
//! the statistics and publishes a fresh [`Snapshot`].
//!
//! ```text
//!   Idle ──tick/refresh──▶ Fetching ──▶ Success ─────┐
//!    ▲                        │ ├────▶ RateLimited ──┤
//!    │                        │ └────▶ Failed ───────┤
//!    └────────────────────────┴──────────────────────┘
//! ```
//!
//! Only one cycle runs at a time; a tick that arrives while a cycle is still
//! in flight is skipped.

use crate::auth::Authenticator;
use crate::client::{ApiClient, ClientError, ReqwestTransport, Transport};
use crate::clock::{Clock, SystemClock};
use crate::config::{AuthSettings, PollerConfig};
use crate::geo::{BoundingBox, Coordinates};
use crate::location::{reference_point, FixedLocation, LocationProvider};
use crate::metadata::{MetadataCache, MetadataResolver};
use crate::stats::StatsTracker;
use crate::storage::{KeyValueStore, MemoryStore, StateStore, StorageError, KEY_SETTINGS};
use crate::types::{Aircraft, AircraftState, SightingHistoryEntry};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Client error: {0}")]
    Client(#[from] ClientError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("Poller stopped")]
    Stopped,
}

/// Whether a cycle is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollState {
    #[default]
    Idle,
    Fetching,
}

/// How a cycle ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Success { aircraft: usize, new_today: usize },
    RateLimited { retry_after: Duration },
    Failed,
    /// Another cycle was still in flight
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollStatus {
    pub state: PollState,
    pub last_outcome: Option<CycleOutcome>,
}

/// Everything a display needs, published whole after each successful cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    /// Aircraft within the radius, closest first
    pub aircraft: Vec<Aircraft>,
    pub reference: Option<Coordinates>,
    pub place_name: Option<String>,
    pub daily_count: usize,
    /// First sightings, newest first
    pub history: Vec<SightingHistoryEntry>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Pending back-off after an HTTP 429.
#[derive(Debug, Clone, Copy, Default)]
pub struct RateLimitState {
    next_delay: Option<Duration>,
}

impl RateLimitState {
    pub fn delay(&self) -> Option<Duration> {
        self.next_delay
    }
}

/// Counters for the poller.
#[derive(Debug, Default)]
pub struct PollerStats {
    pub cycles: AtomicU64,
    pub successes: AtomicU64,
    pub failures: AtomicU64,
    pub rate_limited: AtomicU64,
    pub skipped: AtomicU64,
    pub last_fetch_ms: AtomicU64,
}

impl PollerStats {
    pub fn snapshot(&self) -> PollerStatsSnapshot {
        PollerStatsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            rate_limited: self.rate_limited.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            last_fetch_ms: self.last_fetch_ms.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &CycleOutcome) {
        let counter = match outcome {
            CycleOutcome::Success { .. } => &self.successes,
            CycleOutcome::RateLimited { .. } => &self.rate_limited,
            CycleOutcome::Failed => &self.failures,
            CycleOutcome::Skipped => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone)]
pub struct PollerStatsSnapshot {
    pub cycles: u64,
    pub successes: u64,
    pub failures: u64,
    pub rate_limited: u64,
    pub skipped: u64,
    pub last_fetch_ms: u64,
}

/// Marks a cycle as running for as long as it lives.
struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keep the states inside the box and the radius, closest first.
pub fn select_nearby(states: Vec<AircraftState>, reference: Coordinates, radius_km: f64) -> Vec<Aircraft> {
    let bbox = BoundingBox::around(reference, radius_km);

    let mut nearby: Vec<Aircraft> = states
        .into_iter()
        .filter(|s| bbox.contains(s.position()))
        .map(|s| Aircraft::from_state(s, reference))
        .filter(|a| a.distance_km <= radius_km)
        .collect();

    nearby.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    nearby
}

enum Command {
    Refresh,
    SetAuth(AuthSettings),
    Stop,
}

/// The polling coordinator.
pub struct Poller {
    api: ApiClient,
    auth: Arc<Authenticator>,
    metadata: MetadataResolver,
    location: Arc<dyn LocationProvider>,
    clock: Arc<dyn Clock>,
    store: StateStore,
    config: PollerConfig,
    settings: RwLock<AuthSettings>,
    tracker: Mutex<StatsTracker>,
    rate_limit: Mutex<RateLimitState>,
    cycle_running: AtomicBool,
    stats: PollerStats,
    snapshot_tx: watch::Sender<Snapshot>,
    status_tx: watch::Sender<PollStatus>,
    countdown_tx: watch::Sender<u64>,
}

impl Poller {
    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    pub fn stats(&self) -> &PollerStats {
        &self.stats
    }

    pub fn metadata_cache(&self) -> &Arc<MetadataCache> {
        self.metadata.cache()
    }

    /// Type description for a listed aircraft, once its metadata is known.
    pub fn aircraft_type(&self, icao24: &str) -> Option<String> {
        self.metadata.cache().aircraft_type(icao24)
    }

    pub fn auth_settings(&self) -> AuthSettings {
        self.settings.read().clone()
    }

    /// Poll interval for the current auth configuration.
    pub fn interval(&self) -> Duration {
        self.config.interval_for(&self.settings.read())
    }

    pub fn rate_limit(&self) -> RateLimitState {
        *self.rate_limit.lock()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<PollStatus> {
        self.status_tx.subscribe()
    }

    /// Seconds until the next scheduled poll.
    pub fn subscribe_countdown(&self) -> watch::Receiver<u64> {
        self.countdown_tx.subscribe()
    }

    /// Replace and persist the auth settings.
    pub async fn set_auth_settings(&self, settings: AuthSettings) {
        self.auth.apply(&settings).await;
        if let Err(e) = self.store.save(KEY_SETTINGS, &settings) {
            tracing::error!("Failed to persist settings: {}", e);
        }
        *self.settings.write() = settings;
        tracing::info!("Auth settings changed, poll interval now {:?}", self.interval());
    }

    /// Run one cycle now, unless one is already in flight.
    pub async fn poll_once(&self) -> CycleOutcome {
        let Some(guard) = CycleGuard::acquire(&self.cycle_running) else {
            tracing::debug!("Previous cycle still running, skipping");
            self.stats.record(&CycleOutcome::Skipped);
            return CycleOutcome::Skipped;
        };

        self.status_tx.send_modify(|s| s.state = PollState::Fetching);
        let start = std::time::Instant::now();

        let outcome = self.run_cycle().await;
        // Released before Idle is published
        drop(guard);

        self.stats
            .last_fetch_ms
            .store(start.elapsed().as_millis() as u64, Ordering::Relaxed);
        self.stats.record(&outcome);
        self.status_tx.send_replace(PollStatus {
            state: PollState::Idle,
            last_outcome: Some(outcome.clone()),
        });
        outcome
    }

    async fn run_cycle(&self) -> CycleOutcome {
        let reference = reference_point(self.location.as_ref(), self.config.default_location);
        let bbox = BoundingBox::around(reference, self.config.radius_km);
        let authorization = self.auth.authorization().await;

        let states = match self.api.fetch_states(&bbox, authorization.as_ref()).await {
            Ok(states) => states,
            Err(ClientError::RateLimited { retry_after }) => {
                tracing::warn!("Rate limited, next poll in {:?}", retry_after);
                self.rate_limit.lock().next_delay = Some(retry_after);
                return CycleOutcome::RateLimited { retry_after };
            }
            Err(e) => {
                tracing::warn!("Fetch error: {}", e);
                return CycleOutcome::Failed;
            }
        };

        let received = states.len();
        let aircraft = select_nearby(states, reference, self.config.radius_km);

        tracing::debug!(
            "{} of {} aircraft within {} km of {}",
            aircraft.len(),
            received,
            self.config.radius_km,
            reference
        );

        for a in &aircraft {
            self.metadata.resolve(&a.icao24);
        }

        let now = self.clock.now();
        let today = self.clock.today();
        let cache = self.metadata.cache();

        let (snapshot, new_today) = {
            let mut tracker = self.tracker.lock();
            if let Err(e) = tracker.check_day(&today, &self.store) {
                tracing::error!("Failed to persist daily reset: {}", e);
            }
            let cycle = tracker.record_cycle(&aircraft, |icao| cache.aircraft_type(icao), now);
            if let Err(e) = tracker.persist(&self.store) {
                tracing::error!("Failed to persist statistics: {}", e);
            }

            tracing::debug!("{} aircraft entered range", cycle.newly_seen);
            if cycle.new_today > 0 {
                tracing::info!(
                    "{} new aircraft today ({} total)",
                    cycle.new_today,
                    tracker.daily_count()
                );
            }

            let snapshot = Snapshot {
                aircraft,
                reference: Some(reference),
                place_name: self.location.current_place_name(),
                daily_count: tracker.daily_count(),
                history: tracker.history().cloned().collect(),
                updated_at: Some(now),
            };
            (snapshot, cycle.new_today)
        };

        let outcome = CycleOutcome::Success {
            aircraft: snapshot.aircraft.len(),
            new_today,
        };
        self.snapshot_tx.send_replace(snapshot);
        outcome
    }

    /// Start the timer-driven loop on the current runtime.
    pub fn spawn(self: Arc<Self>) -> PollerHandle {
        let (commands, rx) = mpsc::channel(16);
        let snapshot = self.subscribe();
        let status = self.subscribe_status();
        let countdown = self.subscribe_countdown();
        let task = tokio::spawn(Arc::clone(&self).run(rx));

        PollerHandle {
            poller: self,
            commands,
            snapshot,
            status,
            countdown,
            task,
        }
    }

    async fn run(self: Arc<Self>, mut commands: mpsc::Receiver<Command>) {
        let (done_tx, mut done_rx) = mpsc::channel::<()>(4);

        let mut interval = self.interval();
        let mut next_poll = Instant::now();
        let mut countdown = tokio::time::interval(Duration::from_secs(1));
        countdown.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!("Poller started, interval {:?}", interval);

        loop {
            tokio::select! {
                _ = tokio::time::sleep_until(next_poll) => {
                    self.start_cycle(&done_tx);
                    next_poll = Instant::now() + interval;
                    self.publish_countdown(next_poll);
                }
                Some(()) = done_rx.recv() => {
                    let backoff = self.rate_limit.lock().next_delay.take();
                    if let Some(backoff) = backoff {
                        next_poll = Instant::now() + backoff;
                        self.publish_countdown(next_poll);
                    }
                }
                _ = countdown.tick() => {
                    self.publish_countdown(next_poll);
                }
                command = commands.recv() => match command {
                    Some(Command::Refresh) => {
                        tracing::debug!("Manual refresh");
                        self.start_cycle(&done_tx);
                        next_poll = Instant::now() + interval;
                        countdown.reset();
                        self.publish_countdown(next_poll);
                    }
                    Some(Command::SetAuth(settings)) => {
                        self.set_auth_settings(settings).await;
                        interval = self.interval();
                        next_poll = Instant::now() + interval;
                        countdown.reset();
                        self.publish_countdown(next_poll);
                    }
                    Some(Command::Stop) | None => break,
                }
            }
        }

        tracing::info!("Poller stopped");
    }

    fn start_cycle(self: &Arc<Self>, done_tx: &mpsc::Sender<()>) {
        if self.cycle_running.load(Ordering::Acquire) {
            tracing::debug!("Previous cycle still running, skipping tick");
            self.stats.record(&CycleOutcome::Skipped);
            return;
        }

        let poller = Arc::clone(self);
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            if poller.poll_once().await != CycleOutcome::Skipped {
                let _ = done_tx.send(()).await;
            }
        });
    }

    fn publish_countdown(&self, next_poll: Instant) {
        let remaining = next_poll.saturating_duration_since(Instant::now());
        let secs = (remaining.as_millis() as u64).div_ceil(1000);
        self.countdown_tx.send_replace(secs);
    }
}

/// Control surface of a running poller.
pub struct PollerHandle {
    poller: Arc<Poller>,
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
    status: watch::Receiver<PollStatus>,
    countdown: watch::Receiver<u64>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub fn poller(&self) -> &Arc<Poller> {
        &self.poller
    }

    pub fn snapshot(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    pub fn status(&self) -> watch::Receiver<PollStatus> {
        self.status.clone()
    }

    pub fn countdown(&self) -> watch::Receiver<u64> {
        self.countdown.clone()
    }

    /// Poll immediately and restart the countdown.
    pub async fn refresh(&self) -> Result<(), CollectorError> {
        self.send(Command::Refresh).await
    }

    /// Switch credentials; both timers restart with the new interval.
    pub async fn set_auth(&self, settings: AuthSettings) -> Result<(), CollectorError> {
        self.send(Command::SetAuth(settings)).await
    }

    /// Stop the loop and wait for it to exit.
    pub async fn stop(self) {
        let _ = self.commands.send(Command::Stop).await;
        let _ = self.task.await;
    }

    async fn send(&self, command: Command) -> Result<(), CollectorError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| CollectorError::Stopped)
    }
}

/// Builder for wiring a [`Poller`] to its collaborators.
pub struct PollerBuilder {
    transport: Option<Arc<dyn Transport>>,
    store: Option<Arc<dyn KeyValueStore>>,
    location: Option<Arc<dyn LocationProvider>>,
    clock: Option<Arc<dyn Clock>>,
    auth: Option<AuthSettings>,
    timeout: Duration,
    config: PollerConfig,
}

impl PollerBuilder {
    pub fn new() -> Self {
        Self {
            transport: None,
            store: None,
            location: None,
            clock: None,
            auth: None,
            timeout: Duration::from_secs(30),
            config: PollerConfig::default(),
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn location(mut self, location: Arc<dyn LocationProvider>) -> Self {
        self.location = Some(location);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Credentials that override (and replace) the stored ones.
    pub fn auth(mut self, settings: AuthSettings) -> Self {
        self.auth = Some(settings);
        self
    }

    /// Request timeout for the default HTTP transport.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn config(mut self, config: PollerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Poller, CollectorError> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(ReqwestTransport::new(self.timeout)?),
        };
        let store = StateStore::new(self.store.unwrap_or_else(|| Arc::new(MemoryStore::new())));
        let location = self
            .location
            .unwrap_or_else(|| Arc::new(FixedLocation::default()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let stored: AuthSettings = store.load(KEY_SETTINGS).unwrap_or_default();
        let settings = match self.auth {
            Some(ref overrides) => {
                let merged = stored.merged_with(overrides);
                if merged != stored {
                    store.save(KEY_SETTINGS, &merged)?;
                }
                merged
            }
            None => stored,
        };

        let api = ApiClient::new(transport);
        let auth = Arc::new(Authenticator::new(api.clone(), Arc::clone(&clock), &settings));
        let metadata = MetadataResolver::new(Arc::new(MetadataCache::new()), api.clone(), Arc::clone(&auth));
        let tracker = StatsTracker::load(&store, &clock.today(), self.config.history_limit);

        let initial = Snapshot {
            daily_count: tracker.daily_count(),
            history: tracker.history().cloned().collect(),
            place_name: location.current_place_name(),
            ..Default::default()
        };
        let interval = self.config.interval_for(&settings);

        Ok(Poller {
            api,
            auth,
            metadata,
            location,
            clock,
            store,
            config: self.config,
            settings: RwLock::new(settings),
            tracker: Mutex::new(tracker),
            rate_limit: Mutex::new(RateLimitState::default()),
            cycle_running: AtomicBool::new(false),
            stats: PollerStats::default(),
            snapshot_tx: watch::Sender::new(initial),
            status_tx: watch::Sender::new(PollStatus::default()),
            countdown_tx: watch::Sender::new(interval.as_secs()),
        })
    }
}

impl Default for PollerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
