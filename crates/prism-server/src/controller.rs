//! The per-connection session controller.
//!
//! One controller is created per client connection and runs as a single
//! task draining one mailbox, so state transitions and buffering need no
//! locks: the controller handles exactly one message at a time, in arrival
//! order. Lifecycle is an explicit state-tagged enum holding per-state
//! data; messages that cannot be processed yet are buffered and replayed,
//! in order, once the blocking condition clears.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use prism_core::backend::{RuntimeOp, Services};
use prism_core::errors::ProtocolError;
use prism_core::events::{DomainEvent, SessionEvent};
use prism_core::ids::{ClientId, ConnectionId};

use crate::bridge;
use crate::config::{ControllerConfig, ProjectConfig, UnknownMethodPolicy};
use crate::protocol::{ClientSink, RpcRequest, RpcResponse};
use crate::router::{methods, Route, RouteTarget, RoutingTable};
use crate::session::{InitError, ResourceInitializer, Session};
use crate::worker;

/// Everything the controller's mailbox accepts.
#[derive(Debug)]
pub enum ControllerInput {
    /// Transport attached; carries the outbound delivery handle.
    Connected(ClientSink),
    /// Transport gone. Always explicit, never inferred from idle time.
    Disconnected,
    /// One decoded inbound frame.
    Request(RpcRequest),
    /// Outcome of the resource initializer (internal).
    InitOutcome(Result<(), InitError>),
    /// Unsolicited event from a backend subsystem.
    Event(DomainEvent),
}

/// Lifecycle state, with the data each state needs.
enum Lifecycle {
    /// No transport handle yet: buffer frames blind.
    Unestablished { buffered: VecDeque<RpcRequest> },
    /// Transport known, no session yet.
    Connected { sink: ClientSink },
    /// Waiting for the resource initializer's outcome.
    Initializing {
        sink: ClientSink,
        request_id: Option<serde_json::Value>,
        client_id: ClientId,
        buffered: VecDeque<RpcRequest>,
    },
    /// Terminal operating state: session and routing table are fixed.
    Initialised {
        session: Session,
        routes: Arc<RoutingTable>,
    },
    /// Placeholder during transitions; a controller never rests here.
    Moving,
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// The session controller actor. Construct with [`Controller::spawn`].
pub struct Controller {
    connection_id: ConnectionId,
    config: ControllerConfig,
    project: Arc<ProjectConfig>,
    services: Services,
    initializer: Arc<dyn ResourceInitializer>,
    lifecycle_tx: broadcast::Sender<SessionEvent>,
    self_tx: mpsc::Sender<ControllerInput>,
    state: Lifecycle,
}

impl Controller {
    /// Create and spawn one controller for a new client connection.
    pub fn spawn(
        config: ControllerConfig,
        project: Arc<ProjectConfig>,
        services: Services,
        initializer: Arc<dyn ResourceInitializer>,
        lifecycle_tx: broadcast::Sender<SessionEvent>,
    ) -> ControllerHandle {
        let connection_id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(config.mailbox_capacity);
        let cancel = CancellationToken::new();

        let controller = Controller {
            connection_id: connection_id.clone(),
            config,
            project,
            services,
            initializer,
            lifecycle_tx,
            self_tx: tx.clone(),
            state: Lifecycle::Unestablished {
                buffered: VecDeque::new(),
            },
        };
        tokio::spawn(controller.run(rx, cancel.clone()));

        ControllerHandle {
            connection_id,
            tx,
            cancel,
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<ControllerInput>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                input = rx.recv() => match input {
                    None => break,
                    Some(input) => {
                        if self.handle(input) == Flow::Stop {
                            break;
                        }
                    }
                }
            }
        }
        // Mark the handle so embedders can observe termination.
        cancel.cancel();
        tracing::debug!(connection_id = %self.connection_id, "controller stopped");
    }

    /// Single dispatch point: behavior is chosen by the current state tag.
    fn handle(&mut self, input: ControllerInput) -> Flow {
        match &self.state {
            Lifecycle::Unestablished { .. } => self.on_unestablished(input),
            Lifecycle::Connected { .. } => self.on_connected(input),
            Lifecycle::Initializing { .. } => self.on_initializing(input),
            Lifecycle::Initialised { .. } => self.on_initialised(input),
            Lifecycle::Moving => Flow::Stop,
        }
    }

    // ── Unestablished ──────────────────────────────────────────────────

    fn on_unestablished(&mut self, input: ControllerInput) -> Flow {
        match input {
            ControllerInput::Connected(sink) => {
                let previous = std::mem::replace(&mut self.state, Lifecycle::Connected { sink });
                let Lifecycle::Unestablished { buffered } = previous else {
                    return Flow::Continue;
                };
                tracing::debug!(
                    connection_id = %self.connection_id,
                    replayed = buffered.len(),
                    "transport attached"
                );
                self.replay(buffered);
                Flow::Continue
            }
            ControllerInput::Request(request) => {
                if let Lifecycle::Unestablished { buffered } = &mut self.state {
                    buffered.push_back(request);
                }
                Flow::Continue
            }
            ControllerInput::Disconnected => Flow::Stop,
            ControllerInput::InitOutcome(_) => Flow::Continue,
            ControllerInput::Event(event) => {
                self.drop_event(event);
                Flow::Continue
            }
        }
    }

    // ── Connected ──────────────────────────────────────────────────────

    fn on_connected(&mut self, input: ControllerInput) -> Flow {
        match input {
            ControllerInput::Request(request) => {
                self.connected_request(request);
                Flow::Continue
            }
            ControllerInput::Disconnected => Flow::Stop,
            ControllerInput::Connected(_) => {
                tracing::debug!(connection_id = %self.connection_id, "transport already attached");
                Flow::Continue
            }
            ControllerInput::InitOutcome(_) => Flow::Continue,
            ControllerInput::Event(event) => {
                self.drop_event(event);
                Flow::Continue
            }
        }
    }

    fn connected_request(&mut self, request: RpcRequest) {
        let Lifecycle::Connected { sink } = &self.state else {
            return;
        };
        let sink = sink.clone();

        match request.method.as_str() {
            methods::PING => {
                let route =
                    Route::pre_session(RouteTarget::Liveness, self.config.request_timeout);
                worker::spawn(
                    self.services.clone(),
                    Arc::clone(&self.project),
                    sink,
                    route,
                    request,
                );
            }
            // Renaming needs no session: it goes straight to the runtime.
            methods::PROJECT_RENAME => {
                let route = Route::pre_session(
                    RouteTarget::Runtime(RuntimeOp::RenameProject),
                    self.config.request_timeout,
                );
                worker::spawn(
                    self.services.clone(),
                    Arc::clone(&self.project),
                    sink,
                    route,
                    request,
                );
            }
            methods::INIT => self.begin_initialization(sink, request),
            _ => {
                sink.respond(RpcResponse::failure(
                    request.id,
                    &ProtocolError::SessionNotInitialised,
                ));
            }
        }
    }

    fn begin_initialization(&mut self, sink: ClientSink, request: RpcRequest) {
        let client_id = request
            .params
            .as_ref()
            .and_then(|p| p.get("clientId"))
            .and_then(|v| v.as_str())
            .map(ClientId::from_raw);
        let Some(client_id) = client_id else {
            sink.respond(RpcResponse::failure(
                request.id,
                &ProtocolError::InvalidParams("clientId is required".into()),
            ));
            return;
        };

        // Resource setup runs off the mailbox; its outcome comes back as a
        // message so the controller never blocks.
        let initializer = Arc::clone(&self.initializer);
        let outcome_tx = self.self_tx.clone();
        let init_client = client_id.clone();
        tokio::spawn(async move {
            let outcome = initializer.initialize(&init_client).await;
            let _ = outcome_tx.send(ControllerInput::InitOutcome(outcome)).await;
        });

        tracing::info!(
            connection_id = %self.connection_id,
            client_id = %client_id,
            "session initialization started"
        );
        self.state = Lifecycle::Initializing {
            sink,
            request_id: request.id,
            client_id,
            buffered: VecDeque::new(),
        };
    }

    // ── Initializing ───────────────────────────────────────────────────

    fn on_initializing(&mut self, input: ControllerInput) -> Flow {
        match input {
            ControllerInput::InitOutcome(Ok(())) => {
                self.complete_initialization();
                Flow::Continue
            }
            ControllerInput::InitOutcome(Err(error)) => {
                self.abort_initialization(error);
                Flow::Continue
            }
            ControllerInput::Request(request) => {
                if let Lifecycle::Initializing { buffered, .. } = &mut self.state {
                    buffered.push_back(request);
                }
                Flow::Continue
            }
            ControllerInput::Disconnected => Flow::Stop,
            ControllerInput::Connected(_) => Flow::Continue,
            ControllerInput::Event(event) => {
                self.drop_event(event);
                Flow::Continue
            }
        }
    }

    fn complete_initialization(&mut self) {
        let previous = std::mem::replace(&mut self.state, Lifecycle::Moving);
        let Lifecycle::Initializing {
            sink,
            request_id,
            client_id,
            buffered,
        } = previous
        else {
            return;
        };

        let session = Session::new(client_id, self.connection_id.clone(), sink);
        let _ = self.lifecycle_tx.send(session.initialized_event());

        let routes = Arc::new(RoutingTable::build(&session, self.config.request_timeout));

        // Finalize the original request: the reply carries the workspace
        // metadata held by the file manager.
        let finalize = Route {
            target: RouteTarget::File(prism_core::backend::FileOp::ContentRoots),
            timeout: self.config.request_timeout,
            context: Some(session.context()),
        };
        worker::spawn(
            self.services.clone(),
            Arc::clone(&self.project),
            session.sink().clone(),
            finalize,
            RpcRequest {
                method: methods::INIT.into(),
                params: None,
                id: request_id,
            },
        );

        tracing::info!(
            connection_id = %self.connection_id,
            client_id = %session.client_id(),
            "session initialised"
        );
        self.state = Lifecycle::Initialised { session, routes };
        self.replay(buffered);
    }

    fn abort_initialization(&mut self, error: InitError) {
        let previous = std::mem::replace(&mut self.state, Lifecycle::Moving);
        let Lifecycle::Initializing {
            sink,
            request_id,
            client_id,
            buffered,
        } = previous
        else {
            return;
        };

        tracing::warn!(
            connection_id = %self.connection_id,
            client_id = %client_id,
            error = %error,
            "session initialization failed"
        );
        sink.respond(RpcResponse::failure(
            request_id,
            &ProtocolError::ResourcesInitialization(error.to_string()),
        ));

        // No session was created; the client may retry initialization.
        self.state = Lifecycle::Connected { sink };
        self.replay(buffered);
    }

    // ── Initialised ────────────────────────────────────────────────────

    fn on_initialised(&mut self, input: ControllerInput) -> Flow {
        match input {
            ControllerInput::Request(request) => {
                self.dispatch(request);
                Flow::Continue
            }
            ControllerInput::Event(event) => {
                if let Lifecycle::Initialised { session, .. } = &self.state {
                    bridge::forward(session.sink(), &event);
                }
                Flow::Continue
            }
            ControllerInput::Disconnected => {
                if let Lifecycle::Initialised { session, .. } = &self.state {
                    let _ = self.lifecycle_tx.send(session.terminated_event());
                    tracing::info!(
                        connection_id = %self.connection_id,
                        client_id = %session.client_id(),
                        "session terminated"
                    );
                }
                Flow::Stop
            }
            ControllerInput::Connected(_) => Flow::Continue,
            ControllerInput::InitOutcome(_) => Flow::Continue,
        }
    }

    fn dispatch(&self, request: RpcRequest) {
        let Lifecycle::Initialised { session, routes } = &self.state else {
            return;
        };

        if request.method == methods::INIT {
            session.sink().respond(RpcResponse::failure(
                request.id,
                &ProtocolError::SessionAlreadyInitialised,
            ));
            return;
        }

        match routes.get(&request.method) {
            Some(route) => {
                worker::spawn(
                    self.services.clone(),
                    Arc::clone(&self.project),
                    session.sink().clone(),
                    route.clone(),
                    request,
                );
            }
            None => match self.config.unknown_method {
                UnknownMethodPolicy::Ignore => {
                    tracing::debug!(method = %request.method, "no route for method, ignoring");
                }
                UnknownMethodPolicy::Reject => {
                    session.sink().respond(RpcResponse::failure(
                        request.id,
                        &ProtocolError::MethodNotFound(request.method),
                    ));
                }
            },
        }
    }

    // ── Shared ─────────────────────────────────────────────────────────

    /// Replay buffered frames in arrival order. Buffered frames are plain
    /// requests; none of them can stop the controller.
    fn replay(&mut self, buffered: VecDeque<RpcRequest>) {
        for request in buffered {
            self.handle(ControllerInput::Request(request));
        }
    }

    fn drop_event(&self, event: DomainEvent) {
        tracing::debug!(
            connection_id = %self.connection_id,
            event = event.event_type(),
            "dropping domain event: session not initialised"
        );
    }
}

/// Handle to a running controller, held by the transport layer and the
/// embedding server.
#[derive(Clone, Debug)]
pub struct ControllerHandle {
    connection_id: ConnectionId,
    tx: mpsc::Sender<ControllerInput>,
    cancel: CancellationToken,
}

impl ControllerHandle {
    pub fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Attach the transport, delivering the outbound handle.
    pub async fn connect(&self, sink: ClientSink) {
        let _ = self.tx.send(ControllerInput::Connected(sink)).await;
    }

    /// Signal that the client connection is gone.
    pub async fn disconnect(&self) {
        let _ = self.tx.send(ControllerInput::Disconnected).await;
    }

    /// Deliver one decoded inbound frame.
    pub async fn request(&self, request: RpcRequest) {
        let _ = self.tx.send(ControllerInput::Request(request)).await;
    }

    /// Sender the backend subsystems use to push domain events.
    pub fn events(&self) -> EventSink {
        EventSink {
            tx: self.tx.clone(),
        }
    }

    /// Tear the controller down without waiting for a disconnect signal.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// True once the controller task has terminated (disposal, disconnect,
    /// or mailbox closure).
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Clonable sender backends use to push domain events into one controller.
#[derive(Clone, Debug)]
pub struct EventSink {
    tx: mpsc::Sender<ControllerInput>,
}

impl EventSink {
    pub async fn push(&self, event: DomainEvent) {
        let _ = self.tx.send(ControllerInput::Event(event)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::OutboundMessage;
    use async_trait::async_trait;
    use prism_core::backend::{
        BufferOp, CapabilityOp, Command, FileOp, ServiceHandle, StdioOp, SuggestionsOp,
    };
    use prism_core::events::CapabilityRegistration;
    use std::collections::VecDeque as Queue;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::sleep;

    /// Opt-in log output for debugging: RUST_LOG=debug cargo test -p prism-server
    fn trace_init() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    // ── Test doubles ───────────────────────────────────────────────────

    struct OkInit;

    #[async_trait]
    impl ResourceInitializer for OkInit {
        async fn initialize(&self, _client_id: &ClientId) -> Result<(), InitError> {
            Ok(())
        }
    }

    /// Returns scripted outcomes in order, then succeeds.
    struct ScriptedInit {
        outcomes: Mutex<Queue<Result<(), InitError>>>,
    }

    impl ScriptedInit {
        fn new(outcomes: impl IntoIterator<Item = Result<(), InitError>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into_iter().collect()),
            }
        }
    }

    #[async_trait]
    impl ResourceInitializer for ScriptedInit {
        async fn initialize(&self, _client_id: &ClientId) -> Result<(), InitError> {
            let next = self.outcomes.lock().unwrap().pop_front();
            next.unwrap_or(Ok(()))
        }
    }

    /// Blocks until the test releases the gate with an outcome.
    struct GatedInit {
        gates: Mutex<Queue<oneshot::Receiver<Result<(), InitError>>>>,
    }

    impl GatedInit {
        fn new(count: usize) -> (Self, Vec<oneshot::Sender<Result<(), InitError>>>) {
            let mut senders = Vec::new();
            let mut receivers = Queue::new();
            for _ in 0..count {
                let (tx, rx) = oneshot::channel();
                senders.push(tx);
                receivers.push_back(rx);
            }
            (
                Self {
                    gates: Mutex::new(receivers),
                },
                senders,
            )
        }
    }

    #[async_trait]
    impl ResourceInitializer for GatedInit {
        async fn initialize(&self, _client_id: &ClientId) -> Result<(), InitError> {
            let gate = self.gates.lock().unwrap().pop_front();
            match gate {
                Some(rx) => rx.await.unwrap_or_else(|_| Err(InitError::new("gate dropped"))),
                None => Ok(()),
            }
        }
    }

    fn stub_handle<O: Send + std::fmt::Debug + 'static>(
        result: serde_json::Value,
    ) -> ServiceHandle<O> {
        let (handle, mut rx) = ServiceHandle::channel(16);
        tokio::spawn(async move {
            while let Some(command) = rx.recv().await {
                match command {
                    Command::Invoke { reply, .. } => {
                        let _ = reply.send(Ok(result.clone()));
                    }
                    Command::Ping { reply } => {
                        let _ = reply.send(());
                    }
                }
            }
        });
        handle
    }

    fn stub_services() -> Services {
        Services {
            files: stub_handle::<FileOp>(serde_json::json!({
                "contentRoots": [{"type": "Project", "path": "/work/orders"}]
            })),
            buffers: stub_handle::<BufferOp>(serde_json::json!({})),
            runtime: stub_handle::<RuntimeOp>(serde_json::json!({})),
            capabilities: stub_handle::<CapabilityOp>(serde_json::json!({})),
            suggestions: stub_handle::<SuggestionsOp>(serde_json::json!({})),
            stdout: stub_handle::<StdioOp>(serde_json::json!({})),
            stderr: stub_handle::<StdioOp>(serde_json::json!({})),
            stdin: stub_handle::<StdioOp>(serde_json::json!({})),
        }
    }

    fn project() -> Arc<ProjectConfig> {
        Arc::new(ProjectConfig {
            name: "orders".into(),
            root_path: "/work/orders".into(),
            engine_version: "0.9.2".into(),
        })
    }

    fn request(method: &str, id: u64) -> RpcRequest {
        RpcRequest {
            method: method.into(),
            params: Some(serde_json::json!({"path": "src/main.ps"})),
            id: Some(serde_json::json!(id)),
        }
    }

    fn init_request(client: &str, id: u64) -> RpcRequest {
        RpcRequest {
            method: methods::INIT.into(),
            params: Some(serde_json::json!({"clientId": client})),
            id: Some(serde_json::json!(id)),
        }
    }

    fn spawn_controller(
        initializer: Arc<dyn ResourceInitializer>,
        services: Services,
    ) -> (ControllerHandle, broadcast::Receiver<SessionEvent>) {
        spawn_with_config(ControllerConfig::default(), initializer, services)
    }

    fn spawn_with_config(
        config: ControllerConfig,
        initializer: Arc<dyn ResourceInitializer>,
        services: Services,
    ) -> (ControllerHandle, broadcast::Receiver<SessionEvent>) {
        let (lifecycle_tx, lifecycle_rx) = broadcast::channel(16);
        let handle = Controller::spawn(config, project(), services, initializer, lifecycle_tx);
        (handle, lifecycle_rx)
    }

    async fn recv_response(
        rx: &mut mpsc::Receiver<OutboundMessage>,
    ) -> crate::protocol::RpcResponse {
        match rx.recv().await.expect("outbound closed") {
            OutboundMessage::Response(resp) => resp,
            OutboundMessage::Notification(n) => panic!("unexpected notification: {}", n.method),
        }
    }

    fn error_code(resp: &crate::protocol::RpcResponse) -> &str {
        resp.error.as_ref().map(|e| e.code.as_str()).unwrap_or("")
    }

    // ── Lifecycle ──────────────────────────────────────────────────────

    #[tokio::test]
    async fn frames_before_connect_replay_in_order() {
        let (handle, _lifecycle) = spawn_controller(Arc::new(OkInit), stub_services());

        // Delivered while no transport is attached: buffered blind.
        handle.request(request("text/openFile", 1)).await;
        handle.request(request("file/read", 2)).await;

        let (sink, mut out) = ClientSink::channel(32);
        handle.connect(sink).await;

        // Replayed against the connected handler, in arrival order; neither
        // is a pre-session method, so both collect the sequencing error.
        let first = recv_response(&mut out).await;
        assert_eq!(first.id, Some(serde_json::json!(1)));
        assert_eq!(error_code(&first), "SESSION_NOT_INITIALISED");

        let second = recv_response(&mut out).await;
        assert_eq!(second.id, Some(serde_json::json!(2)));
        assert_eq!(error_code(&second), "SESSION_NOT_INITIALISED");
    }

    #[tokio::test]
    async fn ping_and_rename_work_before_initialization() {
        let (handle, _lifecycle) = spawn_controller(Arc::new(OkInit), stub_services());
        let (sink, mut out) = ClientSink::channel(32);
        handle.connect(sink).await;

        handle.request(request(methods::PING, 1)).await;
        let resp = recv_response(&mut out).await;
        assert_eq!(resp.id, Some(serde_json::json!(1)));
        assert!(resp.error.is_none());

        handle.request(request(methods::PROJECT_RENAME, 2)).await;
        let resp = recv_response(&mut out).await;
        assert_eq!(resp.id, Some(serde_json::json!(2)));
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn rename_before_session_reaches_runtime_untagged() {
        let mut services = stub_services();
        let (runtime, mut runtime_rx) = ServiceHandle::<RuntimeOp>::channel(8);
        services.runtime = runtime;
        let (handle, _lifecycle) = spawn_controller(Arc::new(OkInit), services);
        let (sink, _out) = ClientSink::channel(32);
        handle.connect(sink).await;

        handle.request(request(methods::PROJECT_RENAME, 7)).await;

        match runtime_rx.recv().await.unwrap() {
            Command::Invoke { op, origin, reply, .. } => {
                assert_eq!(op, RuntimeOp::RenameProject);
                assert!(origin.is_none());
                let _ = reply.send(Ok(serde_json::json!({})));
            }
            Command::Ping { .. } => panic!("expected invoke"),
        }
    }

    #[tokio::test]
    async fn initialization_creates_session_and_returns_content_roots() {
        trace_init();
        let (handle, mut lifecycle) = spawn_controller(Arc::new(OkInit), stub_services());
        let (sink, mut out) = ClientSink::channel(32);
        handle.connect(sink).await;

        handle.request(init_request("client-x", 1)).await;

        let event = lifecycle.recv().await.unwrap();
        match event {
            SessionEvent::Initialized { client_id, .. } => {
                assert_eq!(client_id.as_str(), "client-x");
            }
            other => panic!("unexpected lifecycle event: {other:?}"),
        }

        let resp = recv_response(&mut out).await;
        assert_eq!(resp.id, Some(serde_json::json!(1)));
        let result = resp.result.unwrap();
        assert_eq!(result["contentRoots"][0]["type"], "Project");
    }

    #[tokio::test]
    async fn second_initialization_is_rejected() {
        let (handle, mut lifecycle) = spawn_controller(Arc::new(OkInit), stub_services());
        let (sink, mut out) = ClientSink::channel(32);
        handle.connect(sink).await;

        // Pipelined: the second arrives before the first outcome resolves.
        handle.request(init_request("client-x", 1)).await;
        handle.request(init_request("client-y", 2)).await;

        let mut by_id = std::collections::HashMap::new();
        for _ in 0..2 {
            let resp = recv_response(&mut out).await;
            by_id.insert(resp.id.clone().unwrap().to_string(), resp);
        }
        assert!(by_id["1"].error.is_none());
        assert_eq!(error_code(&by_id["2"]), "SESSION_ALREADY_INITIALISED");

        // Exactly one session was created.
        assert!(matches!(
            lifecycle.recv().await.unwrap(),
            SessionEvent::Initialized { .. }
        ));
        assert!(lifecycle.try_recv().is_err());
    }

    #[tokio::test]
    async fn initialization_failure_recovers_to_connected() {
        let initializer = Arc::new(ScriptedInit::new([
            Err(InitError::new("project root unavailable")),
            Ok(()),
        ]));
        let (handle, mut lifecycle) = spawn_controller(initializer, stub_services());
        let (sink, mut out) = ClientSink::channel(32);
        handle.connect(sink).await;

        handle.request(init_request("client-x", 1)).await;
        let resp = recv_response(&mut out).await;
        assert_eq!(resp.id, Some(serde_json::json!(1)));
        assert_eq!(error_code(&resp), "RESOURCES_INITIALIZATION_ERROR");
        assert!(lifecycle.try_recv().is_err());

        // The client retries and the controller accepts the fresh attempt.
        handle.request(init_request("client-x", 2)).await;
        let resp = recv_response(&mut out).await;
        assert_eq!(resp.id, Some(serde_json::json!(2)));
        assert!(resp.error.is_none());
        assert!(matches!(
            lifecycle.recv().await.unwrap(),
            SessionEvent::Initialized { .. }
        ));
    }

    #[tokio::test]
    async fn invalid_init_params_do_not_change_state() {
        let (handle, mut lifecycle) = spawn_controller(Arc::new(OkInit), stub_services());
        let (sink, mut out) = ClientSink::channel(32);
        handle.connect(sink).await;

        handle
            .request(RpcRequest {
                method: methods::INIT.into(),
                params: Some(serde_json::json!({})),
                id: Some(serde_json::json!(1)),
            })
            .await;
        let resp = recv_response(&mut out).await;
        assert_eq!(error_code(&resp), "INVALID_PARAMS");
        assert!(lifecycle.try_recv().is_err());

        // Still connected: a well-formed attempt succeeds.
        handle.request(init_request("client-x", 2)).await;
        let resp = recv_response(&mut out).await;
        assert!(resp.error.is_none());
    }

    // ── Dispatch ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn routed_request_reaches_backend_with_session_tag() {
        let mut services = stub_services();
        let (buffers, mut buffers_rx) = ServiceHandle::<BufferOp>::channel(8);
        services.buffers = buffers;
        let (handle, _lifecycle) = spawn_controller(Arc::new(OkInit), services);
        let (sink, mut out) = ClientSink::channel(32);
        handle.connect(sink).await;
        handle.request(init_request("client-x", 1)).await;
        let init_resp = recv_response(&mut out).await;
        assert!(init_resp.error.is_none());

        handle.request(request("text/openFile", 5)).await;

        match buffers_rx.recv().await.unwrap() {
            Command::Invoke { op, origin, reply, .. } => {
                assert_eq!(op, BufferOp::Open);
                assert_eq!(origin.unwrap().client_id.as_str(), "client-x");
                let _ = reply.send(Ok(serde_json::json!({"writeCapability": null})));
            }
            Command::Ping { .. } => panic!("expected invoke"),
        }

        let resp = recv_response(&mut out).await;
        assert_eq!(resp.id, Some(serde_json::json!(5)));
        assert!(resp.error.is_none());
    }

    #[tokio::test]
    async fn requests_during_initialization_are_buffered_then_dispatched() {
        trace_init();
        let (gated, mut gates) = GatedInit::new(1);
        let mut services = stub_services();
        let (buffers, mut buffers_rx) = ServiceHandle::<BufferOp>::channel(8);
        services.buffers = buffers;
        let (handle, _lifecycle) = spawn_controller(Arc::new(gated), services);
        let (sink, mut out) = ClientSink::channel(32);
        handle.connect(sink).await;

        handle.request(init_request("client-x", 1)).await;
        handle.request(request("text/openFile", 2)).await;

        // Initialization has not resolved: nothing reaches the buffer
        // registry yet.
        sleep(Duration::from_millis(20)).await;
        assert!(buffers_rx.try_recv().is_err());

        gates.remove(0).send(Ok(())).unwrap();

        // Replayed after the session exists, and dispatched to its backend.
        match buffers_rx.recv().await.unwrap() {
            Command::Invoke { op, reply, .. } => {
                assert_eq!(op, BufferOp::Open);
                let _ = reply.send(Ok(serde_json::json!({})));
            }
            Command::Ping { .. } => panic!("expected invoke"),
        }

        let mut ids = Vec::new();
        for _ in 0..2 {
            let resp = recv_response(&mut out).await;
            assert!(resp.error.is_none());
            ids.push(resp.id.unwrap());
        }
        ids.sort_by_key(|id| id.to_string());
        assert_eq!(ids, vec![serde_json::json!(1), serde_json::json!(2)]);
    }

    #[tokio::test]
    async fn unknown_method_is_ignored_by_default() {
        let (handle, _lifecycle) = spawn_controller(Arc::new(OkInit), stub_services());
        let (sink, mut out) = ClientSink::channel(32);
        handle.connect(sink).await;
        handle.request(init_request("client-x", 1)).await;
        let _ = recv_response(&mut out).await;

        handle.request(request("refactoring/extract", 2)).await;
        // A routable request sent afterwards is the only thing answered.
        handle.request(request("file/exists", 3)).await;

        let resp = recv_response(&mut out).await;
        assert_eq!(resp.id, Some(serde_json::json!(3)));
        assert!(out.try_recv().is_err());
    }

    #[tokio::test]
    async fn unknown_method_rejected_under_reject_policy() {
        let config = ControllerConfig {
            unknown_method: UnknownMethodPolicy::Reject,
            ..Default::default()
        };
        let (handle, _lifecycle) =
            spawn_with_config(config, Arc::new(OkInit), stub_services());
        let (sink, mut out) = ClientSink::channel(32);
        handle.connect(sink).await;
        handle.request(init_request("client-x", 1)).await;
        let _ = recv_response(&mut out).await;

        handle.request(request("refactoring/extract", 2)).await;
        let resp = recv_response(&mut out).await;
        assert_eq!(resp.id, Some(serde_json::json!(2)));
        assert_eq!(error_code(&resp), "METHOD_NOT_FOUND");
    }

    // ── Fan-in ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn domain_events_forward_in_order_while_initialised() {
        let (handle, _lifecycle) = spawn_controller(Arc::new(OkInit), stub_services());
        let (sink, mut out) = ClientSink::channel(32);
        handle.connect(sink).await;
        handle.request(init_request("client-x", 1)).await;
        let _ = recv_response(&mut out).await;

        let events = handle.events();
        events
            .push(DomainEvent::CapabilityGranted {
                registration: CapabilityRegistration {
                    method: "text/canEdit".into(),
                    register_options: serde_json::json!({"path": "src/main.ps"}),
                },
            })
            .await;
        events
            .push(DomainEvent::StdoutAppended {
                output: "compiling\n".into(),
            })
            .await;

        match out.recv().await.unwrap() {
            OutboundMessage::Notification(n) => {
                assert_eq!(n.method, "capability/granted");
                assert_eq!(n.params["registration"]["method"], "text/canEdit");
            }
            other => panic!("unexpected outbound: {other:?}"),
        }
        match out.recv().await.unwrap() {
            OutboundMessage::Notification(n) => {
                assert_eq!(n.method, "io/standardOutputAppended");
            }
            other => panic!("unexpected outbound: {other:?}"),
        }
    }

    #[tokio::test]
    async fn events_before_initialisation_are_dropped() {
        let (handle, _lifecycle) = spawn_controller(Arc::new(OkInit), stub_services());
        let (sink, mut out) = ClientSink::channel(32);
        handle.connect(sink).await;

        handle
            .events()
            .push(DomainEvent::StdoutAppended { output: "x".into() })
            .await;
        sleep(Duration::from_millis(20)).await;
        assert!(out.try_recv().is_err());
    }

    // ── Teardown ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn disconnect_publishes_terminated_once_and_stops() {
        let (handle, mut lifecycle) = spawn_controller(Arc::new(OkInit), stub_services());
        let (sink, mut out) = ClientSink::channel(32);
        handle.connect(sink).await;
        handle.request(init_request("client-x", 1)).await;
        let _ = recv_response(&mut out).await;
        assert!(matches!(
            lifecycle.recv().await.unwrap(),
            SessionEvent::Initialized { .. }
        ));

        handle.disconnect().await;

        match lifecycle.recv().await.unwrap() {
            SessionEvent::Terminated { client_id, .. } => {
                assert_eq!(client_id.as_str(), "client-x");
            }
            other => panic!("unexpected lifecycle event: {other:?}"),
        }

        // The controller is gone: later input is inert.
        sleep(Duration::from_millis(20)).await;
        assert!(handle.is_stopped());
        handle.request(request("file/read", 9)).await;
        sleep(Duration::from_millis(20)).await;
        assert!(out.try_recv().is_err());
        assert!(lifecycle.try_recv().is_err());
    }

    #[tokio::test]
    async fn disconnect_before_session_emits_no_lifecycle_event() {
        let (handle, mut lifecycle) = spawn_controller(Arc::new(OkInit), stub_services());
        let (sink, _out) = ClientSink::channel(32);
        handle.connect(sink).await;

        handle.disconnect().await;
        sleep(Duration::from_millis(20)).await;
        assert!(handle.is_stopped());
        assert!(lifecycle.try_recv().is_err());
    }
}
