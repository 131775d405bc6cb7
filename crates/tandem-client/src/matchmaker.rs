//! Matchmaking state machine.
//!
//! # State Machine
//!
//! ```text
//!                start            matched(role)          connected
//!  ┌──────┐ ──────────────> ┌───────────┐ ─────────> ┌─────────┐ ───────> ┌────────┐
//!  │ Idle │                 │ Searching │            │ Matched │          │ InCall │
//!  └──────┘ <────────────── └───────────┘ <───────── └─────────┘ <─────── └────────┘
//!             stop / reset      ↑    next / partner-left / negotiation failure
//!                               └──────────────────────────────────────────┘
//! ```
//!
//! The matchmaker never performs signaling I/O. Outbound events collect in
//! an outbox drained by [`Matchmaker::take_outgoing`]. Peer sessions are
//! opened on a spawned task held by the session; an [`OpenedSession`]
//! notice says that task has finished. Transport callbacks arrive as
//! [`PeerEvent`]s. Both are routed back in through [`MatchmakerInputs`] and
//! matched against the live session id, so anything from a superseded match
//! is dropped. Teardown joins an open still in flight and closes what it
//! produced.
//!
//! # Invariants
//!
//! - At most one session, and at most one live peer transport
//! - Queue status only while searching
//! - Chat log empty without a session
//! - Every exit from a match closes the transport before the next match
//!   starts

use std::sync::Arc;

use tandem_core::{
    ChatError, ChatMessage, ChatRelay, Environment, InboundEvent, LinkStatus, LocalStream,
    MediaError, MediaGateway, MediaSource, NegotiationError, NegotiationState, OutboundEvent,
    PeerConnectionState, PeerConnector, PeerEvent, PeerEventKind, PeerSession, RemoteTrack,
    SessionId, TransportError,
};
use tandem_proto::{IceCandidate, QueueStatus, Role, SessionDescription};
use tokio::{
    sync::{mpsc, watch},
    task::JoinHandle,
};

use crate::state::{MatchState, MatchView};

/// A spawned [`PeerSession::open`].
type OpenTask<T> = JoinHandle<Result<PeerSession<T>, NegotiationError>>;

/// Notice that the open started for `session` has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenedSession {
    /// Session the open was started for
    pub session: SessionId,
}

/// Receivers the owner must drain into the matchmaker.
#[derive(Debug)]
pub struct MatchmakerInputs {
    /// Transport callbacks
    pub peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    /// Finished session opens
    pub opened: mpsc::UnboundedReceiver<OpenedSession>,
}

/// The current match. Exists from `matched` until teardown; the peer session
/// is installed once its open completes.
struct Session<T> {
    id: SessionId,
    role: Role,
    opening: Option<OpenTask<T>>,
    peer: Option<PeerSession<T>>,
    early_offer: Option<SessionDescription>,
    early_candidates: Vec<IceCandidate>,
    early_tracks: Vec<RemoteTrack>,
    connection: PeerConnectionState,
}

impl<T> Session<T> {
    fn new(id: SessionId, role: Role) -> Self {
        Self {
            id,
            role,
            opening: None,
            peer: None,
            early_offer: None,
            early_candidates: Vec::new(),
            early_tracks: Vec::new(),
            connection: PeerConnectionState::New,
        }
    }
}

/// Single owner of the matchmaking flow.
pub struct Matchmaker<C: PeerConnector, S, E> {
    env: E,
    connector: Arc<C>,
    media: MediaGateway<S>,
    chat: ChatRelay,
    state: MatchState,
    queue: Option<QueueStatus>,
    session: Option<Session<C::Transport>>,
    last_session: SessionId,
    outgoing: Vec<OutboundEvent>,
    peer_events: mpsc::UnboundedSender<PeerEvent>,
    opened: mpsc::UnboundedSender<OpenedSession>,
    link: LinkStatus,
    status: Option<String>,
    view: watch::Sender<MatchView>,
}

impl<C, S, E> Matchmaker<C, S, E>
where
    C: PeerConnector,
    S: MediaSource,
    E: Environment,
{
    /// Create an idle matchmaker.
    ///
    /// The returned inputs must be drained back into
    /// [`Self::handle_peer_event`] and [`Self::handle_opened`].
    pub fn new(env: E, connector: C, media: S) -> (Self, MatchmakerInputs) {
        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let (opened_tx, opened_rx) = mpsc::unbounded_channel();
        let (view, _) = watch::channel(MatchView::default());

        let matchmaker = Self {
            env,
            connector: Arc::new(connector),
            media: MediaGateway::new(media),
            chat: ChatRelay::new(),
            state: MatchState::Idle,
            queue: None,
            session: None,
            last_session: SessionId::new(0),
            outgoing: Vec::new(),
            peer_events: peer_tx,
            opened: opened_tx,
            link: LinkStatus::default(),
            status: None,
            view,
        };

        (matchmaker, MatchmakerInputs { peer_events: peer_rx, opened: opened_rx })
    }

    /// Acquire local media and enter the queue.
    ///
    /// No-op outside Idle. On failure the client stays Idle with a status.
    pub async fn start(&mut self) -> Result<(), MediaError> {
        if self.state != MatchState::Idle {
            tracing::debug!(state = %self.state, "start ignored");
            return Ok(());
        }

        if let Err(e) = self.media.local_stream().await {
            tracing::warn!(error = %e, "cannot start without local media");
            self.status = Some(format!("media unavailable: {e}"));
            self.publish();
            return Err(e);
        }

        self.status = None;
        self.enter(MatchState::Searching);
        self.outgoing.push(OutboundEvent::Find);
        self.publish();
        Ok(())
    }

    /// Skip the current partner, or re-request a match while searching.
    ///
    /// While Idle this does nothing, not even a find: entering the queue
    /// needs local media, which only [`Self::start`] acquires.
    pub async fn next(&mut self) {
        match self.state {
            MatchState::Idle => tracing::debug!("next ignored while idle"),
            MatchState::Searching => self.outgoing.push(OutboundEvent::Find),
            MatchState::Matched | MatchState::InCall => self.leave_match().await,
        }
        self.publish();
    }

    /// Leave the queue and any match. Idempotent.
    pub async fn stop(&mut self) {
        if self.state == MatchState::Idle && self.session.is_none() {
            return;
        }

        self.end_match().await;
        self.enter(MatchState::Idle);
        self.outgoing.push(OutboundEvent::Stop);
        self.publish();
    }

    /// Apply one inbound signaling event.
    pub async fn handle_signal(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::Waiting => {
                if self.state == MatchState::Searching {
                    self.status = Some("waiting for a partner".to_string());
                }
            },
            InboundEvent::QueueStatus(status) => {
                if self.state == MatchState::Searching {
                    self.queue = Some(status);
                } else {
                    tracing::debug!(state = %self.state, "queue status ignored");
                }
            },
            InboundEvent::Matched(role) => self.on_matched(role).await,
            InboundEvent::Offer(offer) => self.on_offer(offer).await,
            InboundEvent::Answer(answer) => self.on_answer(answer).await,
            InboundEvent::Candidate(candidate) => self.on_remote_candidate(candidate).await,
            InboundEvent::PartnerLeft => self.on_partner_left().await,
            InboundEvent::Reset => {
                tracing::info!("server reset");
                self.end_match().await;
                self.enter(MatchState::Idle);
                self.status = Some("reset by server".to_string());
            },
            InboundEvent::ChatReceive(payload) => {
                if self.session.is_some() {
                    self.chat.on_receive(payload);
                } else {
                    tracing::debug!("chat without a session dropped");
                }
            },
            InboundEvent::ServerError(err) => {
                tracing::warn!(code = err.code, message = %err.message, "server error");
                self.status = Some(format!("server error {:#06x}: {}", err.code, err.message));
            },
        }
        self.publish();
    }

    /// Apply a transport callback. Events from other sessions are dropped.
    pub async fn handle_peer_event(&mut self, event: PeerEvent) {
        let Some(session) = self.session.as_mut().filter(|s| s.id == event.session) else {
            tracing::debug!(session = %event.session, "stale peer event dropped");
            return;
        };

        let mut failed = false;
        match event.kind {
            PeerEventKind::LocalCandidate(candidate) => {
                self.outgoing.push(OutboundEvent::Candidate(candidate));
            },
            PeerEventKind::RemoteTrack(track) => match session.peer.as_mut() {
                Some(peer) => peer.on_remote_track(track),
                None => session.early_tracks.push(track),
            },
            PeerEventKind::ConnectionState(connection) => {
                tracing::debug!(session = %session.id, ?connection, "transport state");
                session.connection = connection;
                if let Some(peer) = session.peer.as_mut() {
                    peer.on_connection_state(connection);
                }

                match connection {
                    PeerConnectionState::Connected if self.state == MatchState::Matched => {
                        self.status = None;
                        self.enter(MatchState::InCall);
                    },
                    PeerConnectionState::Disconnected => {
                        self.status = Some("partner connection unstable".to_string());
                    },
                    PeerConnectionState::Failed => failed = true,
                    _ => {},
                }
            },
        }

        if failed {
            self.fail_match("transport failed").await;
        }
        self.publish();
    }

    /// Install the finished open of the current session.
    ///
    /// Notices for a session already torn down are dropped; teardown joined
    /// and closed that open itself.
    pub async fn handle_opened(&mut self, opened: OpenedSession) {
        let id = opened.session;
        let task = self.session.as_mut().filter(|s| s.id == id).and_then(|s| s.opening.take());
        let Some(task) = task else {
            tracing::debug!(session = %id, "stale open notice dropped");
            return;
        };

        match join_open(task).await {
            Ok(peer) => self.install(peer).await,
            Err(e) => {
                tracing::warn!(session = %id, error = %e, "peer session failed to open");
                if e.is_media_rejected() {
                    self.media.invalidate();
                }
                self.fail_match(&e.to_string()).await;
            },
        }
        self.publish();
    }

    /// Record a signaling link status change.
    pub fn handle_link_status(&mut self, status: LinkStatus) {
        if self.link != status {
            tracing::info!(?status, "signaling link");
        }
        self.link = status;
        self.publish();
    }

    /// Send a chat message to the current partner.
    pub fn send_chat(&mut self, text: &str) -> Result<(), ChatError> {
        if self.session.is_none() {
            return Err(ChatError::NoActiveMatch);
        }

        let payload = self.chat.send(text, &self.env)?;
        self.outgoing.push(OutboundEvent::ChatSend(payload));
        self.publish();
        Ok(())
    }

    /// Mute or unmute the microphone. Applies to the live stream.
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.media.set_audio_enabled(enabled);
        self.publish();
    }

    /// Mute or unmute the camera. Applies to the live stream.
    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.media.set_video_enabled(enabled);
        self.publish();
    }

    /// Drain queued outbound events in emission order.
    pub fn take_outgoing(&mut self) -> Vec<OutboundEvent> {
        std::mem::take(&mut self.outgoing)
    }

    /// Current matchmaking state.
    #[must_use]
    pub fn state(&self) -> MatchState {
        self.state
    }

    /// Queue position while searching.
    #[must_use]
    pub fn queue_status(&self) -> Option<QueueStatus> {
        self.queue
    }

    /// Role in the current session.
    #[must_use]
    pub fn role(&self) -> Option<Role> {
        self.session.as_ref().map(|s| s.role)
    }

    /// Current session id.
    #[must_use]
    pub fn session_id(&self) -> Option<SessionId> {
        self.session.as_ref().map(|s| s.id)
    }

    /// Whether a session exists (opening or open).
    #[must_use]
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    /// Negotiation progress of the installed peer session.
    #[must_use]
    pub fn negotiation_state(&self) -> Option<NegotiationState> {
        self.peer().map(PeerSession::state)
    }

    /// Last transport connectivity of the current session.
    #[must_use]
    pub fn connection_state(&self) -> Option<PeerConnectionState> {
        self.session.as_ref().map(|s| s.connection)
    }

    /// Installed peer session.
    #[must_use]
    pub fn peer(&self) -> Option<&PeerSession<C::Transport>> {
        self.session.as_ref().and_then(|s| s.peer.as_ref())
    }

    /// Inbound tracks of the current session.
    #[must_use]
    pub fn remote_tracks(&self) -> &[RemoteTrack] {
        match &self.session {
            Some(Session { peer: Some(peer), .. }) => peer.remote_tracks(),
            Some(session) => &session.early_tracks,
            None => &[],
        }
    }

    /// Chat log of the current match.
    #[must_use]
    pub fn chat(&self) -> &[ChatMessage] {
        self.chat.messages()
    }

    /// Cached local stream, once acquired.
    #[must_use]
    pub fn local_stream(&self) -> Option<&LocalStream> {
        self.media.cached()
    }

    /// Signaling link status.
    #[must_use]
    pub fn link_status(&self) -> LinkStatus {
        self.link
    }

    /// Last user-visible status message.
    #[must_use]
    pub fn status_message(&self) -> Option<&str> {
        self.status.as_deref()
    }

    /// Snapshot of everything observable.
    #[must_use]
    pub fn view(&self) -> MatchView {
        MatchView {
            state: self.state,
            queue: self.queue,
            role: self.role(),
            session: self.session_id(),
            connection: self.connection_state(),
            negotiation: self.negotiation_state(),
            link: self.link,
            media: self.media.state(),
            chat: self.chat.messages().to_vec(),
            remote_tracks: self.remote_tracks().len(),
            status: self.status.clone(),
        }
    }

    /// Observe snapshots published after every step.
    pub fn subscribe(&self) -> watch::Receiver<MatchView> {
        self.view.subscribe()
    }

    async fn on_matched(&mut self, role: Role) {
        if self.state == MatchState::Idle {
            tracing::warn!(%role, "matched while idle, ignoring");
            return;
        }

        self.end_match().await;

        let stream = match self.media.local_stream().await {
            Ok(stream) => stream,
            Err(e) => {
                tracing::warn!(error = %e, "local media lost, leaving match");
                self.status = Some(format!("media unavailable: {e}"));
                self.enter(MatchState::Idle);
                self.outgoing.push(OutboundEvent::Stop);
                return;
            },
        };

        let id = self.last_session.next();
        self.last_session = id;

        let mut session = Session::new(id, role);
        session.opening = Some(self.spawn_open(id, role, stream));
        self.session = Some(session);
        self.status = None;
        self.enter(MatchState::Matched);

        tracing::info!(session = %id, %role, "matched");
    }

    fn spawn_open(&self, id: SessionId, role: Role, stream: LocalStream) -> OpenTask<C::Transport> {
        let connector = Arc::clone(&self.connector);
        let events = self.peer_events.clone();
        let opened = self.opened.clone();

        tokio::spawn(async move {
            let result = PeerSession::open(connector.as_ref(), id, role, &stream, events).await;

            // Matchmaker gone: nobody else will close it
            if opened.send(OpenedSession { session: id }).is_err() {
                if let Ok(mut peer) = result {
                    peer.close().await;
                }
                return Err(TransportError::Closed.into());
            }
            result
        })
    }

    async fn install(&mut self, peer: PeerSession<C::Transport>) {
        let Some(session) = self.session.as_mut() else {
            return;
        };

        let id = session.id;
        let early_offer = session.early_offer.take();
        let early_candidates = std::mem::take(&mut session.early_candidates);
        let early_tracks = std::mem::take(&mut session.early_tracks);
        let connection = session.connection;
        let peer = session.peer.insert(peer);

        for track in early_tracks {
            peer.on_remote_track(track);
        }
        if connection != PeerConnectionState::New {
            peer.on_connection_state(connection);
        }
        // Arrival order; the peer session buffers until its remote description
        for candidate in early_candidates {
            peer.add_remote_candidate(candidate).await;
        }

        let step = match (peer.role(), early_offer) {
            (Role::Caller, _) => {
                peer.create_offer().await.map(|offer| Some(OutboundEvent::Offer(offer)))
            },
            (Role::Callee, Some(offer)) => {
                peer.accept_offer(offer).await.map(|answer| Some(OutboundEvent::Answer(answer)))
            },
            (Role::Callee, None) => Ok(None),
        };

        tracing::debug!(session = %id, "peer session installed");
        self.finish_step(step).await;
    }

    async fn on_offer(&mut self, offer: SessionDescription) {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!("offer without a session dropped");
            return;
        };

        let step = match session.peer.as_mut() {
            Some(peer) => {
                peer.accept_offer(offer).await.map(|answer| Some(OutboundEvent::Answer(answer)))
            },
            None if session.role == Role::Callee => {
                if session.early_offer.replace(offer).is_some() {
                    tracing::warn!(session = %session.id, "replacing unapplied offer");
                }
                Ok(None)
            },
            None => {
                tracing::warn!(session = %session.id, "offer ignored as caller");
                Ok(None)
            },
        };
        self.finish_step(step).await;
    }

    async fn on_answer(&mut self, answer: SessionDescription) {
        let Some(peer) = self.session.as_mut().and_then(|s| s.peer.as_mut()) else {
            tracing::debug!("answer without an open session dropped");
            return;
        };

        let step = peer.accept_answer(answer).await.map(|()| None);
        self.finish_step(step).await;
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(session) = self.session.as_mut() else {
            tracing::debug!("candidate without a session dropped");
            return;
        };

        match session.peer.as_mut() {
            Some(peer) => {
                let outcome = peer.add_remote_candidate(candidate).await;
                tracing::trace!(session = %session.id, ?outcome, "remote candidate");
            },
            None => session.early_candidates.push(candidate),
        }
    }

    async fn on_partner_left(&mut self) {
        if self.session.is_none() {
            tracing::debug!(state = %self.state, "partner-left without a session ignored");
            return;
        }

        tracing::info!("partner left");
        self.end_match().await;
        self.enter(MatchState::Searching);
        self.status = Some("partner left".to_string());
        self.outgoing.push(OutboundEvent::Find);
    }

    /// Queue the produced description, or fail the match.
    async fn finish_step(&mut self, step: Result<Option<OutboundEvent>, NegotiationError>) {
        match step {
            Ok(Some(event)) => self.outgoing.push(event),
            Ok(None) => {},
            Err(e) if e.is_role_violation() => {
                tracing::warn!(error = %e, "negotiation message ignored");
            },
            Err(e) => {
                tracing::warn!(error = %e, "negotiation failed");
                self.fail_match(&e.to_string()).await;
            },
        }
    }

    async fn fail_match(&mut self, reason: &str) {
        self.status = Some(format!("negotiation failed: {reason}"));
        self.leave_match().await;
    }

    async fn leave_match(&mut self) {
        self.end_match().await;
        self.enter(MatchState::Searching);
        self.outgoing.push(OutboundEvent::Next);
        self.outgoing.push(OutboundEvent::Find);
    }

    /// Close the session if any and clear everything scoped to a match.
    async fn end_match(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Some(task) = session.opening.take()
                && let Ok(mut peer) = join_open(task).await
            {
                tracing::debug!(session = %session.id, "closing session opened during teardown");
                peer.close().await;
            }
            if let Some(mut peer) = session.peer.take() {
                peer.close().await;
            }
            tracing::debug!(session = %session.id, "session torn down");
        }
        self.chat.clear();
        self.queue = None;
    }

    fn enter(&mut self, state: MatchState) {
        if self.state != state {
            tracing::debug!(from = %self.state, to = %state, "match state");
            self.state = state;
        }
        if state != MatchState::Searching {
            self.queue = None;
        }
    }

    fn publish(&self) {
        self.view.send_replace(self.view());
    }
}

/// Wait for a spawned open. A panicked or aborted task counts as a
/// transport failure.
async fn join_open<T>(task: OpenTask<T>) -> Result<PeerSession<T>, NegotiationError> {
    match task.await {
        Ok(result) => result,
        Err(e) => Err(TransportError::Backend(format!("session open task: {e}")).into()),
    }
}
