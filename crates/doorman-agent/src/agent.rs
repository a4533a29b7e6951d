//! The client agent supervisor.
//!
//! Owns the shared registries (schema, uberdogs, visibility, allocator) and
//! the session map, accepts TCP connections, and runs one task per client.
//! Each inbound socket datagram and each bus delivery locks the shared
//! state, runs the pure session handler to completion, then executes the
//! returned actions. That serialization discipline keeps sessions from
//! ever observing each other's partial updates.

use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use bytes::Bytes;
use doorman_core::{
    ChannelAllocator, ClientSession, LogLevel, SchemaRegistry, SessionAction, SessionContext,
    UberdogRegistry, VisibilityTable,
};
use doorman_proto::{ClientMessage, Datagram, DisconnectReason, MdDatagram};
use tokio::{
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
    sync::{mpsc, Mutex},
};

use crate::{
    bus::{InProcessBus, PubSubBus},
    codec,
    config::AgentConfig,
    error::AgentError,
};

/// Mutable agent state behind the supervisor's lock.
struct AgentShared {
    schema: SchemaRegistry,
    uberdogs: UberdogRegistry,
    visibility: VisibilityTable,
    allocator: ChannelAllocator,
    sessions: HashMap<u64, ClientSession>,
    version: String,
}

impl AgentShared {
    fn context(&mut self) -> (&mut HashMap<u64, ClientSession>, SessionContext<'_>) {
        (
            &mut self.sessions,
            SessionContext {
                schema: &self.schema,
                uberdogs: &self.uberdogs,
                visibility: &mut self.visibility,
                allocator: &mut self.allocator,
                expected_version: &self.version,
            },
        )
    }

    fn handle_client(&mut self, session_id: u64, bytes: Bytes) -> Vec<SessionAction> {
        let (sessions, mut ctx) = self.context();
        match sessions.get_mut(&session_id) {
            Some(session) => session.handle_client_datagram(&mut ctx, bytes),
            None => Vec::new(),
        }
    }

    fn handle_bus(&mut self, session_id: u64, dg: &MdDatagram) -> Vec<SessionAction> {
        let (sessions, mut ctx) = self.context();
        match sessions.get_mut(&session_id) {
            Some(session) => session.handle_bus_datagram(&mut ctx, dg),
            None => Vec::new(),
        }
    }

    fn teardown_session(&mut self, session_id: u64) -> Vec<SessionAction> {
        let (sessions, mut ctx) = self.context();
        match sessions.remove(&session_id) {
            Some(mut session) => session.teardown(&mut ctx),
            None => Vec::new(),
        }
    }
}

/// Production client agent.
pub struct ClientAgent {
    listener: TcpListener,
    shared: Arc<Mutex<AgentShared>>,
    bus: Arc<InProcessBus>,
}

impl ClientAgent {
    /// Build the registries and bind the listener.
    ///
    /// # Errors
    ///
    /// - `AgentError::Config` for invalid configuration.
    /// - `AgentError::Transport` if the listen address cannot be bound.
    pub async fn bind(config: AgentConfig) -> Result<Self, AgentError> {
        let (schema, uberdogs) = config.build_registries()?;
        let listener = TcpListener::bind(&config.bind)
            .await
            .map_err(|e| AgentError::Transport(format!("cannot bind {}: {e}", config.bind)))?;

        let shared = AgentShared {
            schema,
            uberdogs,
            visibility: VisibilityTable::new(),
            allocator: ChannelAllocator::new(config.channels.min, config.channels.max),
            sessions: HashMap::new(),
            version: config.version,
        };

        Ok(Self {
            listener,
            shared: Arc::new(Mutex::new(shared)),
            bus: Arc::new(InProcessBus::new()),
        })
    }

    /// Local address the agent is listening on.
    ///
    /// # Errors
    ///
    /// - `AgentError::Transport` if the socket is gone.
    pub fn local_addr(&self) -> Result<SocketAddr, AgentError> {
        Ok(self.listener.local_addr()?)
    }

    /// The agent's bus. Other in-process roles attach here.
    #[must_use]
    pub fn bus(&self) -> Arc<InProcessBus> {
        Arc::clone(&self.bus)
    }

    /// Accept and serve connections until the process is shut down.
    pub async fn run(self) -> Result<(), AgentError> {
        tracing::info!("client agent listening on {}", self.listener.local_addr()?);

        let mut next_session_id: u64 = 0;
        loop {
            match self.listener.accept().await {
                Ok((socket, peer)) => {
                    next_session_id += 1;
                    let session_id = next_session_id;
                    let shared = Arc::clone(&self.shared);
                    let bus = Arc::clone(&self.bus);

                    tracing::info!(%peer, session_id, "incoming connection");
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(socket, peer, session_id, shared, bus).await
                        {
                            tracing::debug!(%peer, session_id, "connection error: {e}");
                        }
                    });
                },
                Err(e) => {
                    tracing::error!("accept error: {e}");
                },
            }
        }
    }
}

/// Serve one client socket for its whole lifetime.
async fn handle_connection(
    socket: TcpStream,
    peer: SocketAddr,
    session_id: u64,
    shared: Arc<Mutex<AgentShared>>,
    bus: Arc<InProcessBus>,
) -> Result<(), AgentError> {
    socket.set_nodelay(true).ok();
    let (reader, writer) = socket.into_split();

    let (out_tx, out_rx) = mpsc::unbounded_channel::<Bytes>();
    let writer_task = tokio::spawn(write_loop(writer, out_rx));

    // Allocate the identity channel before anything else; exhaustion means
    // the client never enters the state machine.
    let channel = {
        let mut guard = shared.lock().await;
        guard.allocator.alloc()
    };
    let Some(channel) = channel else {
        tracing::warn!(%peer, "rejecting connection: channel range exhausted");
        let _ = out_tx.send(capacity_notice());
        drop(out_tx);
        let _ = writer_task.await;
        return Ok(());
    };

    // Socket reads run in their own task: mpsc::recv is cancellation-safe
    // under select!, a partial read_exact is not.
    let (client_tx, mut client_rx) = mpsc::unbounded_channel::<Bytes>();
    let reader_task = tokio::spawn(read_loop(reader, client_tx));

    let (bus_tx, mut bus_rx) = mpsc::unbounded_channel::<MdDatagram>();
    bus.attach(session_id, bus_tx);

    {
        let mut guard = shared.lock().await;
        let mut session = ClientSession::new(channel);
        let actions = session.start();
        guard.sessions.insert(session_id, session);
        execute_actions(session_id, actions, &bus, &out_tx);
    }

    loop {
        tokio::select! {
            read = client_rx.recv() => {
                let Some(bytes) = read else {
                    tracing::debug!(%peer, session_id, "client connection ended");
                    break;
                };
                let actions = {
                    let mut guard = shared.lock().await;
                    guard.handle_client(session_id, bytes)
                };
                if execute_actions(session_id, actions, &bus, &out_tx) {
                    break;
                }
            },
            delivered = bus_rx.recv() => {
                let Some(md) = delivered else { break };
                let actions = {
                    let mut guard = shared.lock().await;
                    guard.handle_bus(session_id, &md)
                };
                if execute_actions(session_id, actions, &bus, &out_tx) {
                    break;
                }
            },
        }
    }

    let teardown_actions = {
        let mut guard = shared.lock().await;
        guard.teardown_session(session_id)
    };
    execute_actions(session_id, teardown_actions, &bus, &out_tx);
    bus.detach(session_id);
    reader_task.abort();

    // Let the writer flush the GO_GET_LOST notice (if any) before the
    // socket drops.
    drop(out_tx);
    let _ = writer_task.await;

    tracing::info!(%peer, session_id, "session closed");
    Ok(())
}

/// Feed inbound datagrams into the session loop.
async fn read_loop(mut reader: OwnedReadHalf, tx: mpsc::UnboundedSender<Bytes>) {
    loop {
        match codec::read_datagram(&mut reader).await {
            Ok(Some(bytes)) => {
                if tx.send(bytes).is_err() {
                    break;
                }
            },
            Ok(None) => break,
            Err(e) => {
                tracing::debug!("read error: {e}");
                break;
            },
        }
    }
}

/// Drain the outbound queue onto the socket.
async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Bytes>) {
    while let Some(payload) = rx.recv().await {
        if let Err(e) = codec::write_datagram(&mut writer, &payload).await {
            tracing::debug!("write error: {e}");
            break;
        }
    }
}

/// Execute session actions. Returns `true` if the session asked to close.
fn execute_actions(
    session_id: u64,
    actions: Vec<SessionAction>,
    bus: &Arc<InProcessBus>,
    out_tx: &mpsc::UnboundedSender<Bytes>,
) -> bool {
    let mut close = false;
    for action in actions {
        match action {
            SessionAction::SendToClient(dg) => {
                let _ = out_tx.send(dg.into_bytes());
            },
            SessionAction::Publish(md) => bus.publish(md),
            SessionAction::Subscribe(ch) => bus.subscribe(ch, session_id),
            SessionAction::Unsubscribe(ch) => bus.unsubscribe(ch, session_id),
            SessionAction::Close { reason } => {
                tracing::debug!(session_id, "closing session: {reason}");
                close = true;
            },
            SessionAction::Log { level, message } => match level {
                LogLevel::Debug => tracing::debug!(session_id, "{message}"),
                LogLevel::Info => tracing::info!(session_id, "{message}"),
                LogLevel::Warn => tracing::warn!(session_id, "{message}"),
                LogLevel::Error => tracing::error!(session_id, "{message}"),
            },
        }
    }
    close
}

/// The rejection notice for a client that found the agent full.
fn capacity_notice() -> Bytes {
    let mut dg = Datagram::client(ClientMessage::GoGetLost);
    dg.add_u16(DisconnectReason::Generic.to_u16());
    // INVARIANT: the literal fits a u16 length prefix.
    #[allow(clippy::expect_used)]
    dg.add_string("Client capacity reached").expect("invariant: literal fits length prefix");
    dg.into_bytes()
}
