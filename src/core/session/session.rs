use super::emergency::EmergencyStopRecord;
use super::link::{LinkWriter, Outbound};
use super::notify::apply_notification;
use super::pending::RequestTracker;
use super::reconnect::{Backoff, Clock, TokioClock};
use super::state::{ConnectionState, LinkEvent, SessionEvent, SessionStatistics};
use crate::core::communication::{
    codec::{self, Frame, RequestId},
    transport::{parse_endpoint, Connector, FrameSource, Link},
};
use crate::core::printer::{subscription_objects, PrinterStateStore};
use crate::domain::config::{GlobalConfig, PrinterConfig, ReconnectConfig};
use crate::domain::error::{ConnectError, RpcError, TransportError};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const METHOD_OBJECTS_LIST: &str = "printer.objects.list";
pub const METHOD_OBJECTS_SUBSCRIBE: &str = "printer.objects.subscribe";
pub const METHOD_GCODE_HELP: &str = "printer.gcode.help";

const EVENT_CAPACITY: usize = 256;
const WRITE_QUEUE_CAPACITY: usize = 64;

/// Everything a session needs to know about its controller
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Printer name
    pub name: String,
    pub endpoint: url::Url,
    pub api_key: Option<String>,
    /// Default timeout for queries and the handshake
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Capacity of the notification channel feeding the state store
    pub notification_buffer: usize,
    pub reconnect: ReconnectConfig,
}

impl SessionOptions {
    pub fn from_config(printer: &PrinterConfig, global: &GlobalConfig) -> Result<Self, ConnectError> {
        Ok(Self {
            name: printer.name.clone(),
            endpoint: parse_endpoint(&printer.url)?,
            api_key: printer.api_key.clone(),
            request_timeout: printer.request_timeout(global),
            connect_timeout: global.connect_timeout(),
            notification_buffer: global.notification_buffer,
            reconnect: global.reconnect.clone(),
        })
    }
}

/// What the handshake learned about the controller
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Capabilities {
    /// Objects reported by `printer.objects.list`
    pub objects: Vec<String>,
    /// Objects the current subscription covers; empty when subscribing failed
    pub subscribed: Vec<String>,
    /// Macro and command names reported by `printer.gcode.help`
    pub macros: Vec<String>,
}

/// Messages for the dispatcher, in arrival order
enum Inbound {
    /// A new link is attached; everything cached came from the old one
    Reset,
    Notification { method: String, params: Value },
    Snapshot { status: Map<String, Value>, eventtime: f64 },
}

/// One live connection to one controller.
///
/// Cheap to clone; all clones share the same connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    options: SessionOptions,
    connector: Arc<dyn Connector>,
    clock: Arc<dyn Clock>,
    tracker: RequestTracker,
    writer: Mutex<Option<LinkWriter>>,
    state: watch::Sender<ConnectionState>,
    store: PrinterStateStore,
    events: broadcast::Sender<SessionEvent>,
    inbound: mpsc::Sender<Inbound>,
    capabilities: RwLock<Capabilities>,
    statistics: Mutex<SessionStatistics>,
    last_emergency_stop: Mutex<Option<EmergencyStopRecord>>,
    closing: AtomicBool,
    shutdown: CancellationToken,
}

impl Session {
    /// Connect to a controller and run the handshake.
    pub async fn connect(options: SessionOptions, connector: Arc<dyn Connector>) -> Result<Session, ConnectError> {
        Self::connect_with_clock(options, connector, Arc::new(TokioClock)).await
    }

    /// Like [`Session::connect`], with the clock used for reconnect delays
    pub async fn connect_with_clock(
        options: SessionOptions,
        connector: Arc<dyn Connector>,
        clock: Arc<dyn Clock>,
    ) -> Result<Session, ConnectError> {
        let (inbound_tx, inbound_rx) = mpsc::channel(options.notification_buffer.max(1));
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let session = Session {
            inner: Arc::new(SessionInner {
                options,
                connector,
                clock,
                tracker: RequestTracker::new(),
                writer: Mutex::new(None),
                state,
                store: PrinterStateStore::new(),
                events,
                inbound: inbound_tx,
                capabilities: RwLock::new(Capabilities::default()),
                statistics: Mutex::new(SessionStatistics::default()),
                last_emergency_stop: Mutex::new(None),
                closing: AtomicBool::new(false),
                shutdown: CancellationToken::new(),
            }),
        };

        tokio::spawn(dispatch_loop(Arc::clone(&session.inner), inbound_rx));

        info!(
            "Session '{}' connecting to {} via {}",
            session.name(),
            session.endpoint(),
            session.inner.connector.name()
        );
        session.transition(LinkEvent::Dial);

        match session.establish().await {
            Ok(link) => {
                session.transition(LinkEvent::Established);
                info!("Session '{}' connected", session.name());
                tokio::spawn(supervise(session.clone(), link));
                Ok(session)
            }
            Err(e) => {
                error!("Session '{}' failed to connect: {}", session.name(), e);
                session.transition(LinkEvent::DialFailed);
                session.inner.shutdown.cancel();
                Err(e)
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    pub fn endpoint(&self) -> &url::Url {
        &self.inner.options.endpoint
    }

    pub fn request_timeout(&self) -> Duration {
        self.inner.options.request_timeout
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Receiver that changes on every state transition
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn store(&self) -> &PrinterStateStore {
        &self.inner.store
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    pub fn capabilities(&self) -> Capabilities {
        self.inner
            .capabilities
            .read()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn statistics(&self) -> SessionStatistics {
        lock(&self.inner.statistics).clone()
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.tracker.pending_count().await
    }

    pub fn last_emergency_stop(&self) -> Option<EmergencyStopRecord> {
        lock(&self.inner.last_emergency_stop).clone()
    }

    /// Send a request and wait for its response.
    ///
    /// Fails fast with `ConnectionLost` unless the session is connected; a
    /// reconnecting session never queues requests.
    pub async fn send(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, RpcError> {
        if !self.state().is_connected() {
            return Err(RpcError::ConnectionLost);
        }
        self.request(method, params, timeout).await
    }

    /// Write a request without waiting for a response.
    ///
    /// The id is never registered, so the response is dropped as untracked.
    pub async fn send_fire_and_forget(&self, method: &str, params: Value) -> Result<(), RpcError> {
        if !self.state().is_connected() {
            return Err(RpcError::ConnectionLost);
        }
        let writer = self.writer().ok_or(RpcError::ConnectionLost)?;
        let id = self.inner.tracker.allocate_id();
        writer
            .send(Outbound::new(codec::encode(method, &params, id)))
            .await
            .map_err(|_| RpcError::ConnectionLost)?;
        self.count(|s| s.requests_sent += 1);
        debug!("Session '{}' sent {} (id {}, no reply expected)", self.name(), method, id);
        Ok(())
    }

    /// Close the session for good.
    ///
    /// Every pending request resolves with `ConnectionLost` before this
    /// returns, and no reconnect is attempted afterwards.
    pub async fn disconnect(&self) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        self.transition(LinkEvent::OperatorClosed);
        let failed = self.inner.tracker.close(RpcError::ConnectionLost).await;
        lock(&self.inner.writer).take();
        self.inner.shutdown.cancel();
        info!(
            "Session '{}' disconnected ({} pending requests cancelled)",
            self.name(),
            failed
        );
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// True if both handles refer to the same connection
    pub fn same_session(&self, other: &Session) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Allocate an id that is never registered
    pub(crate) fn allocate_untracked_id(&self) -> RequestId {
        self.inner.tracker.allocate_id()
    }

    /// Queue a frame ahead of ordinary traffic on the current link
    pub(crate) fn submit_priority(
        &self,
        text: String,
    ) -> Result<oneshot::Receiver<Result<(), TransportError>>, TransportError> {
        let writer = self.writer().ok_or(TransportError::Closed)?;
        let (outbound, ack) = Outbound::acked(text);
        writer.send_priority(outbound)?;
        self.count(|s| s.requests_sent += 1);
        Ok(ack)
    }

    pub(crate) fn record_emergency_stop(&self, record: EmergencyStopRecord) {
        *lock(&self.inner.last_emergency_stop) = Some(record);
    }

    /// Write a request and wait for its outcome, whatever the session state.
    /// The handshake uses this before the session counts as connected.
    async fn request(&self, method: &str, params: Value, timeout: Duration) -> Result<Value, RpcError> {
        let deadline = Instant::now() + timeout;
        let (id, mut rx) = self.inner.tracker.register(method, timeout).await?;

        let Some(writer) = self.writer() else {
            return self.settle(id, rx, RpcError::ConnectionLost).await;
        };

        let text = codec::encode(method, &params, id);
        match tokio::time::timeout_at(deadline, writer.send(Outbound::new(text))).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return self.settle(id, rx, RpcError::ConnectionLost).await,
            Err(_) => return self.settle(id, rx, RpcError::Timeout).await,
        }
        self.count(|s| s.requests_sent += 1);
        debug!("Session '{}' sent {} (id {})", self.name(), method, id);

        match tokio::time::timeout_at(deadline, &mut rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(RpcError::ConnectionLost),
            Err(_) => {
                let outcome = self.settle(id, rx, RpcError::Timeout).await;
                if outcome == Err(RpcError::Timeout) {
                    warn!("Session '{}' request {} (id {}) timed out", self.name(), method, id);
                    self.count(|s| s.timeouts += 1);
                }
                outcome
            }
        }
    }

    /// Retire `id` with `error`, unless someone else already retired it, in
    /// which case their outcome wins.
    async fn settle(
        &self,
        id: RequestId,
        rx: oneshot::Receiver<Result<Value, RpcError>>,
        error: RpcError,
    ) -> Result<Value, RpcError> {
        if self.inner.tracker.retire(id).await.is_some() {
            return Err(error);
        }
        rx.await.unwrap_or(Err(error))
    }

    /// Dial, attach the link and run the handshake
    async fn establish(&self) -> Result<CancellationToken, ConnectError> {
        let endpoint = self.endpoint().clone();
        let connect = self
            .inner
            .connector
            .connect(&endpoint, self.inner.options.api_key.as_deref());
        let link = tokio::time::timeout(self.inner.options.connect_timeout, connect)
            .await
            .map_err(|_| ConnectError::Timeout {
                endpoint: endpoint.to_string(),
            })??;

        let token = self.attach(link).await?;
        if let Err(e) = self.handshake().await {
            self.detach(&token).await;
            return Err(e);
        }
        Ok(token)
    }

    /// Start the writer and reader for a fresh link
    async fn attach(&self, link: Link) -> Result<CancellationToken, ConnectError> {
        let token = self.inner.shutdown.child_token();
        // Queued ahead of the first frame the new reader can forward
        let _ = self.inner.inbound.send(Inbound::Reset).await;
        let (writer, _) = LinkWriter::spawn(link.sink, WRITE_QUEUE_CAPACITY, token.clone());
        *lock(&self.inner.writer) = Some(writer);
        tokio::spawn(read_loop(Arc::clone(&self.inner), link.source, token.clone()));

        self.inner.tracker.open().await;
        if self.inner.closing.load(Ordering::SeqCst) {
            self.detach(&token).await;
            return Err(ConnectError::Closed);
        }
        Ok(token)
    }

    /// Tear down the current link and fail everything waiting on it
    async fn detach(&self, token: &CancellationToken) -> usize {
        token.cancel();
        let failed = self.inner.tracker.close(RpcError::ConnectionLost).await;
        lock(&self.inner.writer).take();
        failed
    }

    async fn handshake(&self) -> Result<(), ConnectError> {
        let timeout = self.inner.options.request_timeout;
        let name = self.name().to_string();
        let fatal = |method: &str| ConnectError::Handshake {
            endpoint: self.endpoint().to_string(),
            message: format!("connection lost during {}", method),
        };

        let objects = match self.request(METHOD_OBJECTS_LIST, json!({}), timeout).await {
            Ok(result) => string_list(result.get("objects")),
            Err(RpcError::ConnectionLost) => return Err(fatal(METHOD_OBJECTS_LIST)),
            Err(e) => {
                warn!("Session '{}' could not list printer objects: {}", name, e);
                Vec::new()
            }
        };

        let wanted = subscription_objects(&objects);
        let params = json!({
            "objects": wanted
                .iter()
                .map(|name| (name.clone(), Value::Null))
                .collect::<Map<String, Value>>()
        });
        let subscribed = match self.request(METHOD_OBJECTS_SUBSCRIBE, params, timeout).await {
            Ok(result) => {
                let status = result
                    .get("status")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                let eventtime = result
                    .get("eventtime")
                    .and_then(Value::as_f64)
                    .unwrap_or_default();
                let _ = self
                    .inner
                    .inbound
                    .send(Inbound::Snapshot { status, eventtime })
                    .await;
                info!("Session '{}' subscribed to {} objects", name, wanted.len());
                wanted
            }
            Err(RpcError::ConnectionLost) => return Err(fatal(METHOD_OBJECTS_SUBSCRIBE)),
            Err(e) => {
                warn!("Session '{}' subscription failed, status unavailable: {}", name, e);
                Vec::new()
            }
        };

        let macros = match self.request(METHOD_GCODE_HELP, json!({}), timeout).await {
            Ok(Value::Object(commands)) => {
                let mut macros: Vec<String> = commands.keys().cloned().collect();
                macros.sort();
                macros
            }
            Ok(_) => Vec::new(),
            Err(RpcError::ConnectionLost) => return Err(fatal(METHOD_GCODE_HELP)),
            Err(e) => {
                debug!("Session '{}' has no command help: {}", name, e);
                Vec::new()
            }
        };

        if let Ok(mut capabilities) = self.inner.capabilities.write() {
            *capabilities = Capabilities {
                objects,
                subscribed,
                macros,
            };
        }
        let _ = self.inner.events.send(SessionEvent::Resubscribed);
        Ok(())
    }

    fn writer(&self) -> Option<LinkWriter> {
        lock(&self.inner.writer).clone()
    }

    fn transition(&self, event: LinkEvent) -> ConnectionState {
        let mut changed = None;
        self.inner.state.send_if_modified(|state| {
            let next = state.next(event);
            if next == *state {
                return false;
            }
            *state = next;
            changed = Some(next);
            true
        });
        if let Some(next) = changed {
            debug!("Session '{}' is now {}", self.name(), next);
            let _ = self.inner.events.send(SessionEvent::StateChanged(next));
        }
        self.state()
    }

    fn count(&self, update: impl FnOnce(&mut SessionStatistics)) {
        update(&mut lock(&self.inner.statistics));
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

async fn read_loop(inner: Arc<SessionInner>, mut source: Box<dyn FrameSource>, token: CancellationToken) {
    let name = inner.options.name.clone();
    loop {
        let next = tokio::select! {
            _ = token.cancelled() => break,
            next = source.next_text() => next,
        };

        match next {
            Some(Ok(text)) => handle_frame(&inner, &text).await,
            Some(Err(e)) => {
                warn!("Session '{}' read failed: {}", name, e);
                break;
            }
            None => {
                info!("Session '{}' closed by controller", name);
                break;
            }
        }
    }
    token.cancel();
}

async fn handle_frame(inner: &SessionInner, text: &str) {
    let name = &inner.options.name;
    lock(&inner.statistics).last_activity = Some(SystemTime::now());

    match codec::decode(text) {
        Frame::Response { id, outcome } => match inner.tracker.complete(id, outcome).await {
            Some((method, age)) => {
                let mut stats = lock(&inner.statistics);
                stats.responses_matched += 1;
                stats.last_round_trip = Some(age);
                drop(stats);
                debug!("Session '{}' {} (id {}) answered in {:?}", name, method, id, age);
            }
            None => {
                lock(&inner.statistics).responses_untracked += 1;
                debug!("Session '{}' dropped untracked response id {}", name, id);
            }
        },
        Frame::Notification { method, params } => {
            lock(&inner.statistics).notifications += 1;
            // Awaiting capacity keeps arrival order under load
            if inner
                .inbound
                .send(Inbound::Notification { method, params })
                .await
                .is_err()
            {
                debug!("Session '{}' dispatcher stopped", name);
            }
        }
        Frame::Malformed { reason, raw } => {
            lock(&inner.statistics).malformed_frames += 1;
            warn!("Session '{}' skipped malformed frame ({}): {}", name, reason, raw);
        }
    }
}

async fn dispatch_loop(inner: Arc<SessionInner>, mut rx: mpsc::Receiver<Inbound>) {
    loop {
        let inbound = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            inbound = rx.recv() => match inbound {
                Some(inbound) => inbound,
                None => break,
            },
        };

        match inbound {
            Inbound::Notification { method, params } => {
                if let Some(event) = apply_notification(&inner.store, &method, &params) {
                    let _ = inner.events.send(event);
                }
            }
            Inbound::Reset => inner.store.clear(),
            Inbound::Snapshot { status, eventtime } => {
                let applied = inner.store.apply_snapshot(status, eventtime);
                debug!("Session '{}' snapshot applied to {} objects", inner.options.name, applied);
            }
        }
    }
    debug!("Session '{}' dispatcher stopped", inner.options.name);
}

/// Watch the current link and reconnect with backoff when it fails
async fn supervise(session: Session, mut link: CancellationToken) {
    let inner = Arc::clone(&session.inner);
    let mut backoff = Backoff::new(inner.options.reconnect.clone());

    loop {
        tokio::select! {
            _ = inner.shutdown.cancelled() => return,
            _ = link.cancelled() => {}
        }
        if session.is_closed() {
            return;
        }

        let failed = session.detach(&link).await;
        session.transition(LinkEvent::Lost);
        warn!(
            "Session '{}' lost its connection ({} pending requests failed)",
            session.name(),
            failed
        );

        loop {
            let delay = backoff.next_delay();
            info!(
                "Session '{}' reconnecting in {:?} (attempt {})",
                session.name(),
                delay,
                backoff.attempt()
            );
            tokio::select! {
                _ = inner.shutdown.cancelled() => return,
                _ = inner.clock.sleep(delay) => {}
            }

            session.transition(LinkEvent::Dial);
            match session.establish().await {
                Ok(token) => {
                    if session.is_closed() {
                        token.cancel();
                        return;
                    }
                    session.count(|s| s.reconnects += 1);
                    session.transition(LinkEvent::Established);
                    backoff.reset();
                    info!("Session '{}' reconnected", session.name());
                    link = token;
                    break;
                }
                Err(e) => {
                    warn!("Session '{}' reconnect failed: {}", session.name(), e);
                    session.transition(LinkEvent::DialFailed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::communication::transport::memory::{klipper_reply, MemoryConnector, Reply};
    use crate::core::session::reconnect::RecordingClock;

    fn options() -> SessionOptions {
        SessionOptions {
            name: "voron".to_string(),
            endpoint: url::Url::parse("memory://voron").unwrap(),
            api_key: None,
            request_timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
            notification_buffer: 16,
            reconnect: ReconnectConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_connect_runs_handshake() {
        let (connector, peers) = MemoryConnector::new();
        peers.serve(klipper_reply);

        let session = Session::connect(options(), Arc::new(connector)).await.unwrap();
        assert_eq!(session.state(), ConnectionState::Connected);

        let capabilities = session.capabilities();
        assert!(capabilities.objects.contains(&"extruder".to_string()));
        assert!(capabilities
            .subscribed
            .contains(&"temperature_sensor chamber".to_string()));
        assert!(capabilities.macros.contains(&"PRINT_START".to_string()));

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_subscription_snapshot_seeds_store() {
        let (connector, peers) = MemoryConnector::new();
        peers.serve(klipper_reply);
        let session = Session::connect(options(), Arc::new(connector)).await.unwrap();

        let mut changes = session.store().subscribe();
        if session.store().read("extruder").is_none() {
            changes.changed().await.unwrap();
        }
        let entry = session.store().entry("extruder").unwrap();
        assert_eq!(entry.timestamp, 100.0);
        assert_eq!(entry.value["temperature"], 24.5);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_snapshot_does_not_overwrite_newer_notification() {
        let (connector, mut peers) = MemoryConnector::new();
        let controller = tokio::spawn(async move {
            let mut peer = peers.accept().await.unwrap();
            for _ in 0..3 {
                let request = peer.recv_request().await.unwrap();
                peer.reply(request.id, klipper_reply(&request));
                if request.method == METHOD_OBJECTS_SUBSCRIBE {
                    peer.notify(
                        "notify_status_update",
                        json!([{"extruder": {"temperature": 250.0}}, 101.0]),
                    );
                }
            }
            peer
        });

        let session = Session::connect(options(), Arc::new(connector)).await.unwrap();
        let _peer = controller.await.unwrap();

        let store = session.store();
        let mut changes = store.subscribe();
        let settled = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let extruder = store.entry("extruder").map(|entry| entry.timestamp);
                if extruder == Some(101.0) && store.read("toolhead").is_some() {
                    break;
                }
                changes.changed().await.unwrap();
            }
        })
        .await;
        assert!(settled.is_ok());

        let extruder = store.entry("extruder").unwrap();
        assert_eq!(extruder.timestamp, 101.0);
        assert_eq!(extruder.value["temperature"], 250.0);
        assert_eq!(store.entry("toolhead").unwrap().timestamp, 100.0);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_not_fatal() {
        let (connector, peers) = MemoryConnector::new();
        peers.serve(|request| match request.method.as_str() {
            METHOD_OBJECTS_SUBSCRIBE => Reply::Error {
                code: 503,
                message: "Klippy not ready".to_string(),
            },
            _ => klipper_reply(request),
        });

        let session = Session::connect(options(), Arc::new(connector)).await.unwrap();
        assert!(session.state().is_connected());
        assert!(session.capabilities().subscribed.is_empty());
        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let (connector, _peers) = MemoryConnector::new();
        connector.refuse_connections(true);

        let err = Session::connect(options(), Arc::new(connector))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ConnectError::Transport(_)));
    }

    #[tokio::test]
    async fn test_controller_error_is_returned() {
        let (connector, peers) = MemoryConnector::new();
        peers.serve(|request| match request.method.as_str() {
            "printer.gcode.script" => Reply::Error {
                code: 400,
                message: "Unknown command:\"FOO\"".to_string(),
            },
            _ => klipper_reply(request),
        });
        let session = Session::connect(options(), Arc::new(connector)).await.unwrap();

        let err = session
            .send("printer.gcode.script", json!({"script": "FOO"}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, RpcError::ControllerError { code: 400, .. }));
        assert_eq!(session.pending_count().await, 0);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_timeout_retires_request() {
        let (connector, peers) = MemoryConnector::new();
        peers.serve(|request| match request.method.as_str() {
            "printer.gcode.script" => Reply::Ignore,
            _ => klipper_reply(request),
        });
        let session = Session::connect(options(), Arc::new(connector)).await.unwrap();

        let err = session
            .send("printer.gcode.script", json!({"script": "G4 P99999"}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::Timeout);
        assert_eq!(session.pending_count().await, 0);
        assert_eq!(session.statistics().timeouts, 1);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_send_after_disconnect_fails_fast() {
        let (connector, peers) = MemoryConnector::new();
        peers.serve(klipper_reply);
        let session = Session::connect(options(), Arc::new(connector)).await.unwrap();

        session.disconnect().await;
        assert_eq!(session.state(), ConnectionState::Closed);
        let err = session
            .send("printer.info", json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err, RpcError::ConnectionLost);
    }

    #[tokio::test]
    async fn test_reconnects_after_link_loss() {
        let (connector, mut peers) = MemoryConnector::new();
        let clock = Arc::new(RecordingClock::new());
        let handle = connector.clone();

        let controller = tokio::spawn(async move {
            let mut first = peers.accept().await.unwrap();
            first.complete_handshake().await.unwrap();
            first.close();
            drop(first);
            peers.serve(klipper_reply);
        });

        let session = Session::connect_with_clock(options(), Arc::new(connector), clock.clone())
            .await
            .unwrap();
        controller.await.unwrap();

        let mut state = session.watch_state();
        let reconnected = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if session.statistics().reconnects == 1 && session.state().is_connected() {
                    break;
                }
                state.changed().await.unwrap();
            }
        })
        .await;
        assert!(reconnected.is_ok());
        assert_eq!(handle.attempts(), 2);
        assert_eq!(clock.sleeps().len(), 1);

        session.disconnect().await;
    }

    /// Clock whose sleeps never finish, holding a session in Reconnecting
    struct StalledClock;

    #[async_trait::async_trait]
    impl Clock for StalledClock {
        async fn sleep(&self, _duration: Duration) {
            std::future::pending::<()>().await;
        }
    }

    #[tokio::test]
    async fn test_reconnecting_session_fails_fast() {
        let (connector, mut peers) = MemoryConnector::new();
        let controller = tokio::spawn(async move {
            let mut peer = peers.accept().await.unwrap();
            peer.complete_handshake().await.unwrap();
            peer.close();
            peers
        });

        let session = Session::connect_with_clock(options(), Arc::new(connector), Arc::new(StalledClock))
            .await
            .unwrap();
        let _peers = controller.await.unwrap();

        let mut state = session.watch_state();
        tokio::time::timeout(Duration::from_secs(5), async {
            while !matches!(session.state(), ConnectionState::Reconnecting { .. }) {
                state.changed().await.unwrap();
            }
        })
        .await
        .unwrap();

        let sent = tokio::time::timeout(
            Duration::from_millis(100),
            session.send("printer.gcode.script", json!({"script": "G28"}), Duration::from_secs(30)),
        )
        .await
        .unwrap();
        assert_eq!(sent, Err(RpcError::ConnectionLost));

        let stopped = tokio::time::timeout(Duration::from_millis(100), session.emergency_stop())
            .await
            .unwrap();
        assert_eq!(
            stopped,
            Err(crate::domain::error::EmergencyStopError::NotConnected("voron".to_string()))
        );
        assert_eq!(session.pending_count().await, 0);
        assert!(matches!(session.state(), ConnectionState::Reconnecting { attempt: 1 }));

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_fire_and_forget_response_is_untracked() {
        let (connector, mut peers) = MemoryConnector::new();
        let controller = tokio::spawn(async move {
            let mut peer = peers.accept().await.unwrap();
            peer.complete_handshake().await.unwrap();
            let request = peer.recv_request().await.unwrap();
            peer.respond(request.id, json!("ok"));
            (request, peer)
        });

        let session = Session::connect(options(), Arc::new(connector)).await.unwrap();
        session
            .send_fire_and_forget("printer.gcode.script", json!({"script": "M117 hi"}))
            .await
            .unwrap();

        let (request, _peer) = controller.await.unwrap();
        assert_eq!(request.params["script"], "M117 hi");

        tokio::time::timeout(Duration::from_secs(2), async {
            while session.statistics().responses_untracked == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        session.disconnect().await;
    }
}
