//! Order synchronizer.
//!
//! Keeps the displayed order collection eventually consistent with the
//! backend. One background task per session either polls `GET /api/orders`
//! on a fixed interval or holds a STOMP push subscription seeded from the
//! same endpoint; both feed full snapshots through the same diff step, and
//! every detected transition is turned into exactly one toast.
//!
//! The retained snapshot lives in [`SyncState`] and is written only by the
//! session task. Callbacks go through a [`DispatchGate`] that `stop()` closes
//! under the same lock, so nothing reaches the observer after `stop()`
//! returns even if a fetch was in flight.

pub mod diff;
pub mod polling;
pub mod push;
pub mod stomp;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::api::ApiClient;
use crate::config::{AppConfig, TransportKind};
use crate::notifications::Notification;
use crate::orders::{OrderId, OrderUpdate, Snapshot};

pub use diff::{diff, ChangeEvent};
pub use polling::OrderSource;
pub use push::{PushChannel, PushConnector, PushError, PushMessage, StompConnector, Topic};

/// How long a stopped session task may take to close its channel before it
/// is aborted.
const STOP_GRACE: Duration = Duration::from_secs(2);

// ---------------------------------------------------------------------------
// Observer
// ---------------------------------------------------------------------------

/// Receives synchronizer output. Both callbacks run on the synchronizer task
/// and must not call [`Synchronizer::stop`].
pub trait SyncObserver: Send + Sync {
    /// The full current collection, after any notifications for it.
    fn on_snapshot(&self, snapshot: Snapshot);
    fn on_notify(&self, notification: Notification);
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Connection state of the push strategy. Polling reports `Connected` while
/// its last fetch succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Retained snapshot plus run bookkeeping, shared between the synchronizer
/// handle and its task.
pub struct SyncState {
    snapshot: RwLock<Snapshot>,
    connection: Mutex<ConnectionState>,
    last_sync: Mutex<Option<DateTime<Utc>>>,
    last_error: Mutex<Option<String>>,
    is_running: AtomicBool,
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncState {
    pub fn new() -> Self {
        Self {
            snapshot: RwLock::new(Snapshot::default()),
            connection: Mutex::new(ConnectionState::Disconnected),
            last_sync: Mutex::new(None),
            last_error: Mutex::new(None),
            is_running: AtomicBool::new(false),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.with_snapshot(Snapshot::clone)
    }

    fn with_snapshot<R>(&self, f: impl FnOnce(&Snapshot) -> R) -> R {
        let guard = self.snapshot.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn replace_snapshot(&self, next: Snapshot) {
        *self.snapshot.write().unwrap_or_else(PoisonError::into_inner) = next;
    }

    pub fn connection(&self) -> ConnectionState {
        *self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_connection(&self, state: ConnectionState) {
        *self.connection.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn mark_synced(&self) {
        *self.last_sync.lock().unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn record_failure(&self, error: String) {
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.replace_snapshot(Snapshot::default());
        self.set_connection(ConnectionState::Disconnected);
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Point-in-time view of the synchronizer for status displays.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_running: bool,
    pub transport: &'static str,
    pub connection: ConnectionState,
    pub last_sync: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub order_count: usize,
}

// ---------------------------------------------------------------------------
// Dispatch gate
// ---------------------------------------------------------------------------

/// "Still active" flag for one session. Dispatch runs while holding the lock,
/// so closing the gate waits for an in-progress dispatch and blocks the rest.
pub(crate) struct DispatchGate {
    open: Mutex<bool>,
}

impl DispatchGate {
    fn new() -> Self {
        Self {
            open: Mutex::new(true),
        }
    }

    /// Run `f` if the session is still active. Returns whether it ran.
    pub(crate) fn dispatch<F: FnOnce()>(&self, f: F) -> bool {
        let open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if !*open {
            return false;
        }
        f();
        true
    }

    fn close(&self) {
        *self.open.lock().unwrap_or_else(PoisonError::into_inner) = false;
    }
}

// ---------------------------------------------------------------------------
// Engine (one per session, owned by the session task)
// ---------------------------------------------------------------------------

/// Requests sent from the handle to the session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SyncCommand {
    Refresh,
    Forget(OrderId),
}

pub(crate) struct SyncEngine {
    state: Arc<SyncState>,
    gate: Arc<DispatchGate>,
    observer: Arc<dyn SyncObserver>,
    seeded: bool,
}

impl SyncEngine {
    fn new(state: Arc<SyncState>, gate: Arc<DispatchGate>, observer: Arc<dyn SyncObserver>) -> Self {
        Self {
            state,
            gate,
            observer,
            seeded: false,
        }
    }

    /// Diff `next` against the retained snapshot, swap it in, and deliver
    /// the resulting toasts followed by the snapshot itself. The first
    /// snapshot of a session only seeds the baseline.
    pub(crate) fn apply_snapshot(&mut self, next: Snapshot) {
        let events = if self.seeded {
            self.state.with_snapshot(|previous| diff(previous, &next))
        } else {
            Vec::new()
        };
        let notifications: Vec<Notification> =
            events.iter().map(Notification::from_change).collect();
        let order_count = next.len();
        let seeding = !self.seeded;

        let state = &self.state;
        let observer = &self.observer;
        let delivered = self.gate.dispatch(|| {
            state.replace_snapshot(next.clone());
            state.mark_synced();
            for notification in notifications {
                observer.on_notify(notification);
            }
            observer.on_snapshot(next);
        });
        if !delivered {
            debug!("session stopped, discarding snapshot");
            return;
        }
        self.seeded = true;

        if seeding {
            info!(orders = order_count, "order baseline seeded");
        } else if !events.is_empty() {
            let added = events
                .iter()
                .filter(|e| matches!(e, ChangeEvent::Added { .. }))
                .count();
            let order_ids: Vec<&str> = events.iter().map(|e| e.order().id.as_str()).collect();
            info!(
                added,
                status_changes = events.len() - added,
                orders = order_count,
                ?order_ids,
                "order changes detected"
            );
        } else {
            debug!(orders = order_count, "order snapshot unchanged");
        }
    }

    /// Merge a single-order push update into the retained snapshot. Updates
    /// before the initial state are dropped; the seeding fetch reflects them.
    pub(crate) fn apply_update(&mut self, update: OrderUpdate) {
        if !self.seeded {
            debug!(order_id = %update.id, "order update before initial state, ignoring");
            return;
        }
        let next = self.state.with_snapshot(|current| {
            debug!(
                order_id = %update.id,
                action = update.action.as_deref().unwrap_or("-"),
                tracked = current.get(&update.id).is_some(),
                "applying order update"
            );
            current.with_update(&update)
        });
        self.apply_snapshot(next);
    }

    /// Forward a ready-made notification without diffing.
    pub(crate) fn forward(&self, notification: Notification) {
        let observer = &self.observer;
        self.gate.dispatch(|| observer.on_notify(notification));
    }

    fn forget(&mut self, id: &OrderId) {
        let Some(reduced) = self.state.with_snapshot(|current| current.without(id)) else {
            debug!(order_id = %id, "forget: order not tracked");
            return;
        };
        let state = &self.state;
        let observer = &self.observer;
        self.gate.dispatch(|| {
            state.replace_snapshot(reduced.clone());
            observer.on_snapshot(reduced);
        });
    }

    pub(crate) fn set_connection(&self, connection: ConnectionState) {
        let state = &self.state;
        self.gate.dispatch(|| state.set_connection(connection));
    }

    pub(crate) fn record_failure(&self, error: String) {
        let state = &self.state;
        self.gate.dispatch(|| state.record_failure(error));
    }
}

// ---------------------------------------------------------------------------
// Synchronizer handle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub poll_interval: Duration,
    /// Upper bound for one fetch; a hung request costs one cycle.
    pub fetch_timeout: Duration,
    /// Fixed delay before reconnecting the push channel.
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(10),
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl SyncSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            fetch_timeout: config.request_timeout.min(config.poll_interval),
            reconnect_delay: config.reconnect_delay,
            connect_timeout: config.request_timeout,
        }
    }
}

enum Strategy {
    Polling(Arc<dyn OrderSource>),
    /// The source seeds the full state after every (re)connect.
    Push(Arc<dyn PushConnector>, Arc<dyn OrderSource>),
}

impl Strategy {
    fn name(&self) -> &'static str {
        match self {
            Self::Polling(_) => TransportKind::Polling.as_str(),
            Self::Push(..) => TransportKind::Push.as_str(),
        }
    }
}

struct ActiveSession {
    gate: Arc<DispatchGate>,
    cancel: CancellationToken,
    commands: mpsc::UnboundedSender<SyncCommand>,
    task: JoinHandle<()>,
}

pub struct Synchronizer {
    strategy: Strategy,
    settings: SyncSettings,
    state: Arc<SyncState>,
    session: Mutex<Option<ActiveSession>>,
}

impl Synchronizer {
    pub fn polling(source: Arc<dyn OrderSource>, settings: SyncSettings) -> Self {
        Self::with_strategy(Strategy::Polling(source), settings)
    }

    /// Push subscription whose initial state (and the state after each
    /// reconnect) is fetched from `source`.
    pub fn push(
        connector: Arc<dyn PushConnector>,
        source: Arc<dyn OrderSource>,
        settings: SyncSettings,
    ) -> Self {
        Self::with_strategy(Strategy::Push(connector, source), settings)
    }

    /// Pick the transport named by the configuration.
    pub fn from_config(config: &AppConfig, api: ApiClient) -> Self {
        let settings = SyncSettings::from_config(config);
        match config.transport {
            TransportKind::Polling => Self::polling(Arc::new(api), settings),
            TransportKind::Push => {
                let connector = StompConnector::new(api.base_url(), api.admin_id());
                Self::push(Arc::new(connector), Arc::new(api), settings)
            }
        }
    }

    fn with_strategy(strategy: Strategy, settings: SyncSettings) -> Self {
        Self {
            strategy,
            settings,
            state: Arc::new(SyncState::new()),
            session: Mutex::new(None),
        }
    }

    /// Begin synchronising into `observer`. Returns `false` (and does
    /// nothing) while a session is already running. Must be called from
    /// within a Tokio runtime.
    pub fn start(&self, observer: Arc<dyn SyncObserver>) -> bool {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = session.as_ref() {
            if !active.task.is_finished() {
                debug!("order synchronizer already running");
                return false;
            }
        }

        self.state.reset();
        let gate = Arc::new(DispatchGate::new());
        let cancel = CancellationToken::new();
        let (commands, command_rx) = mpsc::unbounded_channel();
        let engine = SyncEngine::new(self.state.clone(), gate.clone(), observer);
        let settings = self.settings.clone();

        let task = match &self.strategy {
            Strategy::Polling(source) => tokio::spawn(polling::run(
                engine,
                source.clone(),
                settings,
                cancel.clone(),
                command_rx,
            )),
            Strategy::Push(connector, source) => tokio::spawn(push::run(
                engine,
                connector.clone(),
                source.clone(),
                settings,
                cancel.clone(),
                command_rx,
            )),
        };

        self.state.is_running.store(true, Ordering::SeqCst);
        *session = Some(ActiveSession {
            gate,
            cancel,
            commands,
            task,
        });
        info!(transport = self.strategy.name(), "order synchronizer started");
        true
    }

    /// End the current session. No observer callback runs after this
    /// returns. The task gets a short grace period to close its channel and is
    /// aborted after that. Returns `false` if nothing was running.
    pub fn stop(&self) -> bool {
        let Some(active) = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };

        active.gate.close();
        active.cancel.cancel();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let task = active.task;
                let abort = task.abort_handle();
                runtime.spawn(async move {
                    if tokio::time::timeout(STOP_GRACE, task).await.is_err() {
                        debug!("session task still busy after stop, aborting");
                        abort.abort();
                    }
                });
            }
            Err(_) => active.task.abort(),
        }

        self.state.is_running.store(false, Ordering::SeqCst);
        self.state.set_connection(ConnectionState::Disconnected);
        info!(transport = self.strategy.name(), "order synchronizer stopped");
        true
    }

    fn send(&self, command: SyncCommand) -> bool {
        let session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        match session.as_ref() {
            Some(active) => active.commands.send(command).is_ok(),
            None => false,
        }
    }

    /// Ask for an immediate poll cycle. Queued behind any running cycle.
    pub fn refresh(&self) -> bool {
        self.send(SyncCommand::Refresh)
    }

    /// Drop an order from the retained snapshot after an explicit delete.
    pub fn forget(&self, id: OrderId) -> bool {
        self.send(SyncCommand::Forget(id))
    }

    pub fn current_snapshot(&self) -> Snapshot {
        self.state.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.state.is_running()
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            is_running: self.state.is_running(),
            transport: self.strategy.name(),
            connection: self.state.connection(),
            last_sync: self.state.last_sync(),
            last_error: self.state.last_error(),
            order_count: self.state.with_snapshot(Snapshot::len),
        }
    }
}

impl Drop for Synchronizer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::api::ApiError;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::sleep;

    pub(crate) enum Step {
        Reply(Value),
        Fail,
        Hang,
        Slow(Duration, Value),
    }

    /// Order source that plays back a fixed list of replies, then fails.
    #[derive(Default)]
    pub(crate) struct ScriptedSource {
        steps: Mutex<VecDeque<Step>>,
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        pub(crate) max_in_flight: AtomicUsize,
    }

    impl ScriptedSource {
        pub(crate) fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                steps: Mutex::new(steps.into()),
                ..Default::default()
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl OrderSource for ScriptedSource {
        async fn fetch_orders(&self) -> Result<Value, ApiError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = InFlight(&self.in_flight);

            let step = self.steps.lock().unwrap().pop_front();
            match step {
                Some(Step::Reply(v)) => Ok(v),
                Some(Step::Slow(delay, v)) => {
                    sleep(delay).await;
                    Ok(v)
                }
                Some(Step::Hang) => std::future::pending().await,
                Some(Step::Fail) | None => Err(ApiError::Connect {
                    url: "http://test".to_string(),
                }),
            }
        }
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum Seen {
        Snapshot(Vec<(String, String)>),
        Notify(String, String),
    }

    /// Observer that records every callback in order.
    #[derive(Default)]
    pub(crate) struct RecordingObserver {
        pub(crate) seen: Mutex<Vec<Seen>>,
    }

    impl RecordingObserver {
        pub(crate) fn seen(&self) -> Vec<Seen> {
            self.seen.lock().unwrap().clone()
        }

        pub(crate) fn notifications(&self) -> Vec<(String, String)> {
            self.seen()
                .into_iter()
                .filter_map(|s| match s {
                    Seen::Notify(title, message) => Some((title, message)),
                    Seen::Snapshot(_) => None,
                })
                .collect()
        }

        pub(crate) fn snapshots(&self) -> Vec<Vec<(String, String)>> {
            self.seen()
                .into_iter()
                .filter_map(|s| match s {
                    Seen::Snapshot(orders) => Some(orders),
                    Seen::Notify(..) => None,
                })
                .collect()
        }
    }

    impl SyncObserver for RecordingObserver {
        fn on_snapshot(&self, snapshot: Snapshot) {
            let orders = snapshot
                .orders()
                .iter()
                .map(|o| (o.id.to_string(), o.status.to_string()))
                .collect();
            self.seen.lock().unwrap().push(Seen::Snapshot(orders));
        }

        fn on_notify(&self, notification: Notification) {
            self.seen
                .lock()
                .unwrap()
                .push(Seen::Notify(notification.title, notification.message));
        }
    }

    pub(crate) fn orders(pairs: &[(u64, &str)]) -> Value {
        Value::Array(
            pairs
                .iter()
                .map(|(id, status)| {
                    serde_json::json!({
                        "id": id,
                        "status": status,
                        "totalAmount": 10,
                        "customer": { "name": "Test" }
                    })
                })
                .collect(),
        )
    }

    pub(crate) fn pairs(list: &[(u64, &str)]) -> Vec<(String, String)> {
        list.iter()
            .map(|(id, status)| (id.to_string(), status.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{orders, pairs, RecordingObserver};
    use super::*;
    use crate::orders::parse_snapshot;

    fn engine() -> (SyncEngine, Arc<SyncState>, Arc<DispatchGate>, Arc<RecordingObserver>) {
        let state = Arc::new(SyncState::new());
        let gate = Arc::new(DispatchGate::new());
        let observer = Arc::new(RecordingObserver::default());
        let engine = SyncEngine::new(state.clone(), gate.clone(), observer.clone());
        (engine, state, gate, observer)
    }

    fn snapshot(list: &[(u64, &str)]) -> Snapshot {
        parse_snapshot(&orders(list)).unwrap()
    }

    #[test]
    fn test_closed_gate_blocks_every_callback() {
        let (mut engine, state, gate, observer) = engine();
        engine.apply_snapshot(snapshot(&[(1, "PENDING")]));
        assert_eq!(observer.seen().len(), 1);

        gate.close();
        assert!(!gate.dispatch(|| panic!("closed gate ran its callback")));

        engine.apply_snapshot(snapshot(&[(1, "COMPLETED"), (2, "PENDING")]));
        engine.forward(Notification::new(
            crate::notifications::Severity::Info,
            "Notification",
            "late",
        ));
        engine.forget(&OrderId::new("1"));
        engine.set_connection(ConnectionState::Connected);
        engine.record_failure("late failure".to_string());

        assert_eq!(observer.seen().len(), 1);
        assert_eq!(
            state
                .snapshot()
                .orders()
                .iter()
                .map(|o| (o.id.to_string(), o.status.to_string()))
                .collect::<Vec<_>>(),
            pairs(&[(1, "PENDING")])
        );
        assert_eq!(state.connection(), ConnectionState::Disconnected);
        assert!(state.last_error().is_none());
    }

    #[test]
    fn test_snapshot_rejected_by_closed_gate_does_not_seed() {
        let (mut engine, state, gate, observer) = engine();
        gate.close();
        engine.apply_snapshot(snapshot(&[(1, "PENDING")]));
        assert!(!engine.seeded);
        assert!(state.snapshot().is_empty());
        assert!(observer.seen().is_empty());
    }
}
