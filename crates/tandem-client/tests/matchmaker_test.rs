//! Matchmaker driven directly with inbound events, no server.

use tandem_client::{MatchState, Matchmaker, MatchmakerInputs};
use tandem_core::{
    ChatError, InboundEvent, NegotiationState, OutboundEvent, PeerConnectionState, PeerEvent,
    PeerEventKind, SessionId,
};
use tandem_harness::{MockConnector, MockTransport, ScriptedMediaSource, SimEnv, SimMatchmaker, settle};
use tandem_proto::{ChatPayload, IceCandidate, QueueStatus, Role, SdpKind, SessionDescription};

struct Fixture {
    matchmaker: SimMatchmaker,
    inputs: MatchmakerInputs,
    connector: MockConnector,
}

impl Fixture {
    fn new(connector: MockConnector) -> Self {
        let (matchmaker, inputs) =
            Matchmaker::new(SimEnv::with_seed(1), connector.clone(), ScriptedMediaSource::granting());
        Self { matchmaker, inputs, connector }
    }

    async fn searching(connector: MockConnector) -> Self {
        let mut fixture = Self::new(connector);
        fixture.matchmaker.start().await.unwrap();
        fixture.matchmaker.take_outgoing();
        fixture
    }

    async fn matched(connector: MockConnector, role: Role) -> Self {
        let mut fixture = Self::searching(connector).await;
        fixture.signal(InboundEvent::Matched(role)).await;
        fixture.settle().await;
        fixture
    }

    async fn signal(&mut self, event: InboundEvent) {
        self.matchmaker.handle_signal(event).await;
    }

    async fn settle(&mut self) {
        settle(&mut self.matchmaker, &mut self.inputs).await;
    }

    fn outgoing_names(&mut self) -> Vec<&'static str> {
        self.matchmaker.take_outgoing().iter().map(OutboundEvent::name).collect()
    }

    fn transport(&self) -> MockTransport {
        self.connector.last().unwrap()
    }
}

fn candidate(n: u32) -> IceCandidate {
    IceCandidate::new(format!("candidate:{n} 1 udp 2122260223 198.51.100.{n} 4000{n} typ host"))
}

#[tokio::test]
async fn start_enters_queue_once() {
    let mut f = Fixture::new(MockConnector::new());

    f.matchmaker.start().await.unwrap();
    f.matchmaker.start().await.unwrap();

    assert_eq!(f.matchmaker.state(), MatchState::Searching);
    assert_eq!(f.outgoing_names(), vec!["find"]);
}

#[tokio::test]
async fn view_is_published() {
    let mut f = Fixture::new(MockConnector::new());
    let view = f.matchmaker.subscribe();

    f.matchmaker.start().await.unwrap();
    assert_eq!(view.borrow().state, MatchState::Searching);

    f.matchmaker.set_video_enabled(false);
    assert!(!view.borrow().media.video_enabled);
}

#[tokio::test]
async fn queue_status_only_while_searching() {
    let mut f = Fixture::new(MockConnector::new());
    let status = QueueStatus { position: 2, eta_seconds: 10, waited_seconds: 0 };

    f.signal(InboundEvent::QueueStatus(status)).await;
    assert_eq!(f.matchmaker.queue_status(), None);

    f.matchmaker.start().await.unwrap();
    f.signal(InboundEvent::QueueStatus(status)).await;
    assert_eq!(f.matchmaker.queue_status(), Some(status));

    f.signal(InboundEvent::Matched(Role::Callee)).await;
    assert_eq!(f.matchmaker.queue_status(), None);
}

#[tokio::test]
async fn matched_while_idle_ignored() {
    let mut f = Fixture::new(MockConnector::new());

    f.signal(InboundEvent::Matched(Role::Caller)).await;
    f.settle().await;

    assert_eq!(f.matchmaker.state(), MatchState::Idle);
    assert!(!f.matchmaker.has_session());
    assert_eq!(f.connector.stats().created(), 0);
}

#[tokio::test]
async fn caller_sends_offer_then_candidate() {
    let mut f = Fixture::matched(MockConnector::manual(), Role::Caller).await;

    assert_eq!(f.matchmaker.state(), MatchState::Matched);
    assert_eq!(f.matchmaker.role(), Some(Role::Caller));
    assert_eq!(f.matchmaker.negotiation_state(), Some(NegotiationState::LocalOfferSent));

    let outgoing = f.matchmaker.take_outgoing();
    assert!(matches!(&outgoing[0], OutboundEvent::Offer(offer) if offer.kind == SdpKind::Offer));
    assert!(matches!(&outgoing[1], OutboundEvent::Candidate(_)));
    assert_eq!(outgoing.len(), 2);
}

#[tokio::test]
async fn callee_applies_early_offer_and_candidates_in_order() {
    let mut f = Fixture::searching(MockConnector::new()).await;

    // Everything arrives before the spawned open completes
    f.signal(InboundEvent::Matched(Role::Callee)).await;
    f.signal(InboundEvent::Candidate(candidate(1))).await;
    f.signal(InboundEvent::Offer(SessionDescription::offer("v=0\r\n"))).await;
    f.signal(InboundEvent::Candidate(candidate(2))).await;
    assert!(f.matchmaker.peer().is_none());

    f.settle().await;

    let transport = f.transport();
    assert_eq!(transport.applied_candidates(), vec![candidate(1), candidate(2)]);
    assert_eq!(transport.remote_description().map(|d| d.kind), Some(SdpKind::Offer));

    let outgoing = f.matchmaker.take_outgoing();
    assert!(matches!(&outgoing[0], OutboundEvent::Answer(_)));

    // The mock connects once both descriptions are in
    assert_eq!(f.matchmaker.state(), MatchState::InCall);
    assert_eq!(f.matchmaker.negotiation_state(), Some(NegotiationState::Connected));
    assert_eq!(f.matchmaker.remote_tracks().len(), 2);
}

#[tokio::test]
async fn offer_ignored_as_caller() {
    let mut f = Fixture::matched(MockConnector::manual(), Role::Caller).await;
    f.matchmaker.take_outgoing();

    f.signal(InboundEvent::Offer(SessionDescription::offer("v=0\r\n"))).await;

    assert_eq!(f.matchmaker.state(), MatchState::Matched);
    assert_eq!(f.matchmaker.negotiation_state(), Some(NegotiationState::LocalOfferSent));
    assert!(f.matchmaker.take_outgoing().is_empty());
    assert!(!f.transport().is_closed());
}

#[tokio::test]
async fn malformed_answer_fails_match_and_requeues() {
    let mut f = Fixture::matched(MockConnector::manual(), Role::Caller).await;
    f.matchmaker.take_outgoing();

    f.signal(InboundEvent::Answer(SessionDescription::answer("malformed"))).await;

    assert_eq!(f.matchmaker.state(), MatchState::Searching);
    assert!(!f.matchmaker.has_session());
    assert!(f.matchmaker.status_message().unwrap().starts_with("negotiation failed"));
    assert_eq!(f.outgoing_names(), vec!["next", "find"]);
    assert!(f.transport().is_closed());
}

#[tokio::test]
async fn transport_failure_requeues() {
    let mut f = Fixture::matched(MockConnector::manual(), Role::Caller).await;
    f.signal(InboundEvent::Answer(SessionDescription::answer("v=0\r\n"))).await;
    f.matchmaker.take_outgoing();

    assert!(f.transport().emit(PeerEventKind::ConnectionState(PeerConnectionState::Failed)));
    f.settle().await;

    assert_eq!(f.matchmaker.state(), MatchState::Searching);
    assert!(f.matchmaker.status_message().unwrap().contains("transport failed"));
    assert_eq!(f.outgoing_names(), vec!["next", "find"]);
    assert_eq!(f.connector.stats().live(), 0);
}

#[tokio::test]
async fn unstable_connection_keeps_the_call() {
    let mut f = Fixture::matched(MockConnector::manual(), Role::Caller).await;
    f.signal(InboundEvent::Answer(SessionDescription::answer("v=0\r\n"))).await;

    let transport = f.transport();
    transport.emit(PeerEventKind::ConnectionState(PeerConnectionState::Connected));
    f.settle().await;
    assert_eq!(f.matchmaker.state(), MatchState::InCall);

    transport.emit(PeerEventKind::ConnectionState(PeerConnectionState::Disconnected));
    f.settle().await;
    assert_eq!(f.matchmaker.state(), MatchState::InCall);
    assert_eq!(f.matchmaker.status_message(), Some("partner connection unstable"));
    assert_eq!(f.matchmaker.connection_state(), Some(PeerConnectionState::Disconnected));
}

#[tokio::test]
async fn events_from_old_sessions_dropped() {
    let mut f = Fixture::matched(MockConnector::manual(), Role::Caller).await;
    let current = f.matchmaker.session_id().unwrap();

    let stale = PeerEvent {
        session: SessionId::new(current.get() + 40),
        kind: PeerEventKind::ConnectionState(PeerConnectionState::Failed),
    };
    f.matchmaker.handle_peer_event(stale).await;

    assert_eq!(f.matchmaker.state(), MatchState::Matched);
    assert_eq!(f.matchmaker.session_id(), Some(current));
}

#[tokio::test]
async fn open_finishing_after_next_is_closed() {
    let mut f = Fixture::searching(MockConnector::new()).await;

    f.signal(InboundEvent::Matched(Role::Caller)).await;
    f.matchmaker.next().await;
    f.settle().await;

    assert_eq!(f.matchmaker.state(), MatchState::Searching);
    assert!(!f.matchmaker.has_session());
    assert_eq!(f.connector.stats().created(), 1);
    assert_eq!(f.connector.stats().live(), 0);
    assert_eq!(f.outgoing_names(), vec!["next", "find"]);
}

#[tokio::test]
async fn rematch_replaces_session() {
    let mut f = Fixture::matched(MockConnector::manual(), Role::Caller).await;
    let first = f.matchmaker.session_id().unwrap();

    f.signal(InboundEvent::Matched(Role::Callee)).await;
    f.settle().await;

    assert_ne!(f.matchmaker.session_id(), Some(first));
    assert_eq!(f.matchmaker.role(), Some(Role::Callee));
    assert_eq!(f.connector.stats().live(), 1);
    assert!(f.connector.transports()[0].is_closed());
}

#[tokio::test]
async fn rematch_before_open_settles_keeps_one_transport() {
    let mut f = Fixture::searching(MockConnector::new()).await;

    f.signal(InboundEvent::Matched(Role::Callee)).await;
    f.matchmaker.next().await;
    f.signal(InboundEvent::Matched(Role::Callee)).await;
    f.settle().await;

    let stats = f.connector.stats();
    assert_eq!(stats.max_live(), 1);
    assert_eq!(stats.created(), 2);
    assert_eq!(stats.closed(), 1);
    assert_eq!(stats.live(), 1);
    assert!(f.connector.transports()[0].is_closed());
    assert_eq!(f.matchmaker.state(), MatchState::Matched);
    assert!(f.matchmaker.peer().is_some());
}

#[tokio::test]
async fn connect_failure_keeps_local_media() {
    let connector = MockConnector::new();
    connector.set_fail_connect(true);
    let mut f = Fixture::searching(connector).await;

    f.signal(InboundEvent::Matched(Role::Caller)).await;
    f.settle().await;

    assert_eq!(f.matchmaker.state(), MatchState::Searching);
    assert!(f.matchmaker.status_message().unwrap().starts_with("negotiation failed"));
    assert_eq!(f.outgoing_names(), vec!["next", "find"]);
    assert!(f.matchmaker.local_stream().is_some());
}

#[tokio::test]
async fn refused_stream_drops_local_media() {
    let connector = MockConnector::new();
    connector.set_fail_attach(true);
    let mut f = Fixture::searching(connector).await;

    f.signal(InboundEvent::Matched(Role::Caller)).await;
    f.settle().await;

    assert_eq!(f.matchmaker.state(), MatchState::Searching);
    assert!(f.matchmaker.status_message().unwrap().contains("local media rejected"));
    assert_eq!(f.outgoing_names(), vec!["next", "find"]);
    assert!(f.matchmaker.local_stream().is_none());
    assert_eq!(f.connector.stats().live(), 0);
}

#[tokio::test]
async fn next_while_idle_sends_nothing() {
    let mut f = Fixture::new(MockConnector::new());

    f.matchmaker.next().await;

    assert_eq!(f.matchmaker.state(), MatchState::Idle);
    assert!(f.matchmaker.take_outgoing().is_empty());
    assert!(f.matchmaker.local_stream().is_none());
}

#[tokio::test]
async fn partner_left_without_session_ignored() {
    let mut f = Fixture::searching(MockConnector::new()).await;

    f.signal(InboundEvent::PartnerLeft).await;

    assert_eq!(f.matchmaker.state(), MatchState::Searching);
    assert!(f.matchmaker.take_outgoing().is_empty());
}

#[tokio::test]
async fn partner_left_tears_down_and_searches() {
    let mut f = Fixture::matched(MockConnector::new(), Role::Callee).await;
    f.signal(InboundEvent::ChatReceive(ChatPayload {
        id: "m1".into(),
        text: "hey".into(),
        timestamp: 1,
    }))
    .await;
    assert_eq!(f.matchmaker.chat().len(), 1);

    f.signal(InboundEvent::PartnerLeft).await;

    assert_eq!(f.matchmaker.state(), MatchState::Searching);
    assert!(f.matchmaker.chat().is_empty());
    assert_eq!(f.matchmaker.status_message(), Some("partner left"));
    assert_eq!(f.outgoing_names(), vec!["find"]);
    assert_eq!(f.connector.stats().live(), 0);
}

#[tokio::test]
async fn chat_needs_a_session() {
    let mut f = Fixture::searching(MockConnector::new()).await;

    assert!(matches!(f.matchmaker.send_chat("hi"), Err(ChatError::NoActiveMatch)));

    f.signal(InboundEvent::ChatReceive(ChatPayload {
        id: "m1".into(),
        text: "stray".into(),
        timestamp: 1,
    }))
    .await;
    assert!(f.matchmaker.chat().is_empty());
}

#[tokio::test]
async fn stop_from_call_closes_and_goes_idle() {
    let mut f = Fixture::matched(MockConnector::new(), Role::Caller).await;
    f.matchmaker.take_outgoing();

    f.matchmaker.stop().await;

    assert_eq!(f.matchmaker.state(), MatchState::Idle);
    assert!(!f.matchmaker.has_session());
    assert_eq!(f.outgoing_names(), vec!["stop"]);
    assert_eq!(f.connector.stats().live(), 0);
}

#[tokio::test]
async fn reset_goes_idle_without_stop() {
    let mut f = Fixture::matched(MockConnector::new(), Role::Caller).await;
    f.matchmaker.take_outgoing();

    f.signal(InboundEvent::Reset).await;

    assert_eq!(f.matchmaker.state(), MatchState::Idle);
    assert_eq!(f.matchmaker.status_message(), Some("reset by server"));
    assert!(f.matchmaker.take_outgoing().is_empty());
    assert_eq!(f.connector.stats().live(), 0);
}
