//! Channel-free simulation of several matchmakers and one server.
//!
//! `SimDriver` owns a [`MatchServer`] and a set of [`SimClient`]s and moves
//! events between them by hand: outbound events become frames for the
//! server, server frames go through each client's own
//! [`SignalingConnection`] and land in [`Matchmaker::handle_signal`]. The
//! spawned session opens and transport callbacks are drained by
//! [`settle`]. Nothing runs unless the test pumps, so every interleaving
//! is reproducible.
//!
//! Outbound events raised while a client is detached wait in its backlog
//! and go out once the next hello is answered, as on a real channel.

use std::collections::VecDeque;

use tandem_client::Matchmaker;
use tandem_core::{
    ClientIdentity, Environment, LinkStatus, MediaSource, OutboundEvent, PeerConnector,
    SignalingAction, SignalingConfig, SignalingConnection,
};
use tandem_proto::Frame;

use crate::{
    invariants::{ClientSnapshot, InvariantRegistry, MatchSnapshot, Violation},
    match_server::{ConnId, MatchServer, ServerAction},
    media::ScriptedMediaSource,
    mock_peer::MockConnector,
    sim_env::{SimEnv, SimInstant},
};

/// Consecutive empty polls before [`settle`] calls it quiet.
const QUIET_ROUNDS: usize = 4;

/// Upper bound on routing rounds in one [`SimDriver::run_until_quiet`].
const MAX_ROUNDS: usize = 10_000;

/// Matchmaker type every simulated client runs.
pub type SimMatchmaker = Matchmaker<MockConnector, ScriptedMediaSource, SimEnv>;

/// Drain session opens and transport callbacks until none arrive.
///
/// Yields between polls so spawned opens get to run. Returns how many
/// inputs were applied.
pub async fn settle<C, S, E>(
    matchmaker: &mut Matchmaker<C, S, E>,
    inputs: &mut tandem_client::MatchmakerInputs,
) -> usize
where
    C: PeerConnector,
    S: MediaSource,
    E: Environment,
{
    let mut applied = 0;
    let mut quiet = 0;

    while quiet < QUIET_ROUNDS {
        tokio::task::yield_now().await;

        let mut progressed = false;
        while let Ok(opened) = inputs.opened.try_recv() {
            matchmaker.handle_opened(opened).await;
            progressed = true;
            applied += 1;
        }
        while let Ok(event) = inputs.peer_events.try_recv() {
            matchmaker.handle_peer_event(event).await;
            progressed = true;
            applied += 1;
        }

        quiet = if progressed { 0 } else { quiet + 1 };
    }
    applied
}

/// One simulated client and the mocks behind it.
pub struct SimClient {
    /// The matchmaker under test
    pub matchmaker: SimMatchmaker,
    /// Its session-open and transport-callback receivers
    pub inputs: tandem_client::MatchmakerInputs,
    /// Its peer transport factory
    pub connector: MockConnector,
    /// Its media source
    pub media: ScriptedMediaSource,
    /// Identity announced on every hello
    pub identity: ClientIdentity,
    link: Option<(ConnId, SignalingConnection<SimInstant>)>,
    backlog: Vec<OutboundEvent>,
}

impl SimClient {
    /// Whether the client has a link to the server.
    pub fn is_attached(&self) -> bool {
        self.link.is_some()
    }

    /// Outbound events waiting for the link.
    pub fn backlog(&self) -> &[OutboundEvent] {
        &self.backlog
    }

    fn snapshot(&self, id: usize) -> ClientSnapshot {
        ClientSnapshot::capture(id, &self.matchmaker, &self.connector)
    }
}

/// Several matchmakers around one [`MatchServer`].
pub struct SimDriver {
    env: SimEnv,
    server: MatchServer,
    clients: Vec<SimClient>,
    pending: VecDeque<ServerAction>,
    invariants: Option<InvariantRegistry>,
}

impl SimDriver {
    /// Empty simulation on `env`.
    pub fn new(env: SimEnv) -> Self {
        Self {
            env,
            server: MatchServer::new(),
            clients: Vec::new(),
            pending: VecDeque::new(),
            invariants: None,
        }
    }

    /// Assert `registry` after every [`Self::run_until_quiet`].
    #[must_use]
    pub fn with_invariants(mut self, registry: InvariantRegistry) -> Self {
        self.invariants = Some(registry);
        self
    }

    /// The shared environment.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// The model server.
    pub fn server(&self) -> &MatchServer {
        &self.server
    }

    /// Client by index.
    pub fn client(&self, index: usize) -> &SimClient {
        &self.clients[index]
    }

    /// Client by index, mutably.
    pub fn client_mut(&mut self, index: usize) -> &mut SimClient {
        &mut self.clients[index]
    }

    /// Number of clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether there are no clients.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Add a client with auto-connecting transports and granted media,
    /// connected and greeted.
    pub async fn add_client(&mut self) -> usize {
        self.add_client_with(MockConnector::new(), ScriptedMediaSource::granting()).await
    }

    /// Add a client with the given mocks, connected and greeted.
    pub async fn add_client_with(&mut self, connector: MockConnector, media: ScriptedMediaSource) -> usize {
        let identity = ClientIdentity::generate(&self.env);
        let (matchmaker, inputs) =
            Matchmaker::new(self.env.clone(), connector.clone(), media.clone());

        self.clients.push(SimClient {
            matchmaker,
            inputs,
            connector,
            media,
            identity,
            link: None,
            backlog: Vec::new(),
        });
        let index = self.clients.len() - 1;
        self.attach(index).await;
        index
    }

    /// Open a fresh link for a detached client and say hello.
    pub async fn attach(&mut self, index: usize) {
        let conn = self.server.connect();
        let now = self.env.now();
        let mut link = SignalingConnection::new(now, SignalingConfig::default());

        match link.send_hello(now, &self.clients[index].identity) {
            Ok(actions) => {
                self.clients[index].link = Some((conn, link));
                self.apply_link_actions(index, actions).await;
            },
            Err(e) => tracing::warn!(client = index, error = %e, "hello failed"),
        }
        self.run_until_quiet().await;
    }

    /// Drop a client's link, as if the network went away.
    pub async fn detach(&mut self, index: usize) {
        if let Some((conn, _)) = self.clients[index].link.take() {
            let actions = self.server.disconnect(conn);
            self.pending.extend(actions);
            self.clients[index].matchmaker.handle_link_status(LinkStatus::Reconnecting { attempt: 1 });
        }
        self.run_until_quiet().await;
    }

    /// Server tells everyone to start over.
    pub async fn reset_all(&mut self) {
        let actions = self.server.reset_all();
        self.pending.extend(actions);
        self.run_until_quiet().await;
    }

    /// Snapshot of every client.
    pub fn snapshot(&self) -> MatchSnapshot {
        MatchSnapshot::from_clients(
            self.clients.iter().enumerate().map(|(i, c)| c.snapshot(i)).collect(),
        )
    }

    /// Check the registered invariants, if any.
    pub fn check_invariants(&self) -> Result<(), Vec<Violation>> {
        match &self.invariants {
            Some(registry) => registry.check_all(&self.snapshot()),
            None => Ok(()),
        }
    }

    /// Move events until no client, transport or server has anything left.
    ///
    /// Returns the number of routing rounds that did work.
    pub async fn run_until_quiet(&mut self) -> usize {
        let mut rounds = 0;

        while rounds < MAX_ROUNDS {
            let mut progressed = false;

            for index in 0..self.clients.len() {
                let client = &mut self.clients[index];
                if settle(&mut client.matchmaker, &mut client.inputs).await > 0 {
                    progressed = true;
                }
                progressed |= self.flush_outgoing(index);
            }

            while let Some(action) = self.pending.pop_front() {
                progressed = true;
                self.route(action).await;
            }

            if !progressed {
                break;
            }
            rounds += 1;
        }

        if let Some(registry) = &self.invariants {
            registry.assert_all(&self.snapshot(), &format!("after {rounds} rounds"));
        }
        rounds
    }

    /// Send a client's queued outbound events to the server, or hold them
    /// until the link is ready.
    fn flush_outgoing(&mut self, index: usize) -> bool {
        let client = &mut self.clients[index];
        let fresh = client.matchmaker.take_outgoing();
        let raised = !fresh.is_empty();
        client.backlog.extend(fresh);

        let conn = match client.link.as_ref() {
            Some((conn, link)) if link.is_ready() => *conn,
            _ => {
                if raised {
                    tracing::debug!(client = index, held = client.backlog.len(), "link down, outbound held");
                }
                return raised;
            },
        };
        if client.backlog.is_empty() {
            return false;
        }

        for event in std::mem::take(&mut client.backlog) {
            let name = event.name();
            match event.into_frame() {
                Ok(frame) => self.pending.extend(self.server.handle_frame(conn, &frame)),
                Err(e) => tracing::warn!(client = index, event = name, error = %e, "encode failed"),
            }
        }
        true
    }

    async fn route(&mut self, action: ServerAction) {
        match action {
            ServerAction::Send { conn, frame } => {
                if let Some(index) = self.index_of(conn) {
                    self.deliver(index, &frame).await;
                }
            },
            ServerAction::Close { conn } => {
                if let Some(index) = self.index_of(conn) {
                    self.clients[index].link = None;
                    self.clients[index]
                        .matchmaker
                        .handle_link_status(LinkStatus::Reconnecting { attempt: 1 });
                }
            },
        }
    }

    async fn deliver(&mut self, index: usize, frame: &Frame) {
        let now = self.env.now();
        let Some((_, link)) = self.clients[index].link.as_mut() else {
            return;
        };

        match link.handle_frame(frame, now) {
            Ok(actions) => self.apply_link_actions(index, actions).await,
            Err(e) => tracing::debug!(client = index, error = %e, "frame dropped"),
        }
    }

    async fn apply_link_actions(&mut self, index: usize, actions: Vec<SignalingAction>) {
        for action in actions {
            match action {
                SignalingAction::SendFrame(frame) => {
                    if let Some((conn, _)) = self.clients[index].link.as_ref() {
                        let conn = *conn;
                        self.pending.extend(self.server.handle_frame(conn, &frame));
                    }
                },
                SignalingAction::Deliver(event) => {
                    self.clients[index].matchmaker.handle_signal(event).await;
                },
                SignalingAction::Status(status) => {
                    self.clients[index].matchmaker.handle_link_status(status);
                },
                SignalingAction::Close { reason } => {
                    tracing::debug!(client = index, %reason, "link closed");
                    if let Some((conn, _)) = self.clients[index].link.take() {
                        self.pending.extend(self.server.disconnect(conn));
                    }
                },
            }
        }
    }

    fn index_of(&self, conn: ConnId) -> Option<usize> {
        self.clients.iter().position(|c| c.link.as_ref().is_some_and(|(id, _)| *id == conn))
    }
}

#[cfg(test)]
mod tests {
    use tandem_client::MatchState;
    use tandem_proto::Role;

    use super::*;

    #[tokio::test]
    async fn add_client_greets() {
        let mut driver = SimDriver::new(SimEnv::with_seed(1));
        let a = driver.add_client().await;

        assert!(driver.client(a).is_attached());
        assert_eq!(driver.client(a).matchmaker.link_status(), LinkStatus::Connected);
        assert_eq!(driver.server().connections(), 1);
    }

    #[tokio::test]
    async fn outbound_held_while_detached() {
        let mut driver = SimDriver::new(SimEnv::with_seed(3));
        let a = driver.add_client().await;
        driver.detach(a).await;

        driver.client_mut(a).matchmaker.start().await.unwrap();
        driver.run_until_quiet().await;
        assert_eq!(driver.client(a).backlog().len(), 1);
        assert_eq!(driver.server().queue_len(), 0);

        driver.attach(a).await;
        assert!(driver.client(a).backlog().is_empty());
        assert_eq!(driver.server().queue_len(), 1);
        assert_eq!(driver.client(a).matchmaker.state(), MatchState::Searching);
    }

    #[tokio::test]
    async fn two_clients_reach_a_call() {
        let mut driver =
            SimDriver::new(SimEnv::with_seed(2)).with_invariants(InvariantRegistry::standard());
        let a = driver.add_client().await;
        let b = driver.add_client().await;

        driver.client_mut(a).matchmaker.start().await.unwrap();
        driver.run_until_quiet().await;
        assert_eq!(driver.client(a).matchmaker.state(), MatchState::Searching);

        driver.client_mut(b).matchmaker.start().await.unwrap();
        driver.run_until_quiet().await;

        assert_eq!(driver.client(a).matchmaker.role(), Some(Role::Caller));
        assert_eq!(driver.client(b).matchmaker.role(), Some(Role::Callee));
        assert_eq!(driver.client(a).matchmaker.state(), MatchState::InCall);
        assert_eq!(driver.client(b).matchmaker.state(), MatchState::InCall);
        assert!(driver.check_invariants().is_ok());
    }
}
