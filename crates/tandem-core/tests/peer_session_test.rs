//! Peer session negotiation against the in-memory transport.

use tandem_core::{
    CandidateOutcome, LocalStream, LocalTrack, NegotiationError, NegotiationState,
    PeerConnectionState, PeerEvent, PeerEventKind, PeerSession, SessionId, TrackKind,
    TransportError,
};
use tandem_harness::{MockConnector, MockTransport};
use tandem_proto::{IceCandidate, Role, SessionDescription};
use tokio::sync::mpsc;

fn stream() -> LocalStream {
    LocalStream::new(
        "local",
        vec![LocalTrack::new("mic", TrackKind::Audio), LocalTrack::new("cam", TrackKind::Video)],
    )
}

async fn open(
    connector: &MockConnector,
    role: Role,
) -> (PeerSession<MockTransport>, mpsc::UnboundedReceiver<PeerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = PeerSession::open(connector, SessionId::new(7), role, &stream(), tx).await.unwrap();
    (session, rx)
}

fn candidate(n: u32) -> IceCandidate {
    IceCandidate::new(format!("candidate:{n} 1 udp 2122260223 192.0.2.{n} 5000{n} typ host"))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<PeerEvent>) -> Vec<PeerEventKind> {
    std::iter::from_fn(|| rx.try_recv().ok()).map(|e| e.kind).collect()
}

#[tokio::test]
async fn open_attaches_tracks_and_observer() {
    let connector = MockConnector::new();
    let (session, _rx) = open(&connector, Role::Callee).await;

    let transport = session.transport();
    assert!(transport.has_observer());
    assert_eq!(transport.attached_tracks(), vec!["mic".to_string(), "cam".to_string()]);
    assert_eq!(session.state(), NegotiationState::AwaitingRemoteOffer);
    assert_eq!(session.role(), Role::Callee);
    assert_eq!(connector.stats().created(), 1);
}

#[tokio::test]
async fn open_failure_creates_nothing() {
    let connector = MockConnector::new();
    connector.set_fail_connect(true);
    let (tx, _rx) = mpsc::unbounded_channel();

    let result =
        PeerSession::open(&connector, SessionId::new(1), Role::Caller, &stream(), tx).await;
    assert!(matches!(result, Err(NegotiationError::Transport(TransportError::Backend(_)))));
    assert_eq!(connector.stats().live(), 0);
}

#[tokio::test]
async fn refused_stream_closes_transport() {
    let connector = MockConnector::new();
    connector.set_fail_attach(true);
    let (tx, _rx) = mpsc::unbounded_channel();

    let result =
        PeerSession::open(&connector, SessionId::new(1), Role::Callee, &stream(), tx).await;
    assert!(result.err().unwrap().is_media_rejected());

    let transport = connector.last().unwrap();
    assert!(transport.is_closed());
    assert!(!transport.has_observer());
    assert_eq!(connector.stats().created(), 1);
    assert_eq!(connector.stats().live(), 0);
}

#[tokio::test]
async fn caller_offer_then_answer_connects() {
    let connector = MockConnector::new();
    let (mut caller, mut rx) = open(&connector, Role::Caller).await;
    assert_eq!(caller.state(), NegotiationState::New);

    let offer = caller.create_offer().await.unwrap();
    assert_eq!(caller.state(), NegotiationState::LocalOfferSent);
    assert_eq!(caller.transport().local_description(), Some(offer));

    caller.accept_answer(SessionDescription::answer("v=0\r\n")).await.unwrap();
    assert_eq!(caller.state(), NegotiationState::Negotiating);

    for kind in drain(&mut rx) {
        match kind {
            PeerEventKind::ConnectionState(state) => caller.on_connection_state(state),
            PeerEventKind::RemoteTrack(track) => caller.on_remote_track(track),
            PeerEventKind::LocalCandidate(_) => {},
        }
    }

    assert_eq!(caller.state(), NegotiationState::Connected);
    assert_eq!(caller.connection_state(), PeerConnectionState::Connected);
    assert_eq!(caller.remote_tracks().len(), 2);
}

#[tokio::test]
async fn candidates_buffer_until_offer_then_flush_in_order() {
    let connector = MockConnector::new();
    let (mut callee, _rx) = open(&connector, Role::Callee).await;

    for n in 1..=3 {
        assert_eq!(callee.add_remote_candidate(candidate(n)).await, CandidateOutcome::Buffered);
    }
    assert_eq!(callee.pending_candidates(), 3);
    assert!(callee.transport().applied_candidates().is_empty());

    let answer = callee.accept_offer(SessionDescription::offer("v=0\r\n")).await.unwrap();
    assert_eq!(answer.kind, tandem_proto::SdpKind::Answer);

    assert_eq!(callee.pending_candidates(), 0);
    assert_eq!(callee.transport().applied_candidates(), vec![candidate(1), candidate(2), candidate(3)]);

    // After the commit candidates go straight through
    assert_eq!(callee.add_remote_candidate(candidate(4)).await, CandidateOutcome::Applied);
    assert_eq!(callee.transport().applied_candidates().len(), 4);
}

#[tokio::test]
async fn caller_buffers_until_answer() {
    let connector = MockConnector::new();
    let (mut caller, _rx) = open(&connector, Role::Caller).await;
    caller.create_offer().await.unwrap();

    assert_eq!(caller.add_remote_candidate(candidate(1)).await, CandidateOutcome::Buffered);
    caller.accept_answer(SessionDescription::answer("v=0\r\n")).await.unwrap();
    assert_eq!(caller.transport().applied_candidates(), vec![candidate(1)]);
}

#[tokio::test]
async fn bad_candidate_is_discarded_not_fatal() {
    let connector = MockConnector::new();
    let (mut callee, _rx) = open(&connector, Role::Callee).await;
    callee.accept_offer(SessionDescription::offer("v=0\r\n")).await.unwrap();

    let outcome = callee.add_remote_candidate(IceCandidate::new("candidate:malformed")).await;
    assert_eq!(outcome, CandidateOutcome::Discarded);
    assert_eq!(callee.state(), NegotiationState::Negotiating);
    assert_eq!(callee.add_remote_candidate(candidate(2)).await, CandidateOutcome::Applied);
}

#[tokio::test]
async fn roles_are_enforced() {
    let connector = MockConnector::new();
    let (mut callee, _rx) = open(&connector, Role::Callee).await;
    let (mut caller, _rx2) = open(&connector, Role::Caller).await;

    let err = callee.create_offer().await.unwrap_err();
    assert!(matches!(err, NegotiationError::RoleViolation { role: Role::Callee, .. }));

    let err = caller.accept_offer(SessionDescription::offer("v=0\r\n")).await.unwrap_err();
    assert!(matches!(err, NegotiationError::RoleViolation { role: Role::Caller, .. }));

    let err = callee.accept_answer(SessionDescription::answer("v=0\r\n")).await.unwrap_err();
    assert!(matches!(err, NegotiationError::RoleViolation { .. }));

    // Nothing changed on either side
    assert_eq!(callee.state(), NegotiationState::AwaitingRemoteOffer);
    assert_eq!(caller.state(), NegotiationState::New);
}

#[tokio::test]
async fn offer_created_once() {
    let connector = MockConnector::new();
    let (mut caller, _rx) = open(&connector, Role::Caller).await;

    caller.create_offer().await.unwrap();
    let err = caller.create_offer().await.unwrap_err();
    assert!(matches!(
        err,
        NegotiationError::InvalidState { state: NegotiationState::LocalOfferSent, .. }
    ));
}

#[tokio::test]
async fn answer_without_offer_rejected() {
    let connector = MockConnector::new();
    let (mut caller, _rx) = open(&connector, Role::Caller).await;

    let err = caller.accept_answer(SessionDescription::answer("v=0\r\n")).await.unwrap_err();
    assert!(matches!(err, NegotiationError::InvalidState { state: NegotiationState::New, .. }));
}

#[tokio::test]
async fn second_offer_rejected() {
    let connector = MockConnector::new();
    let (mut callee, _rx) = open(&connector, Role::Callee).await;

    callee.accept_offer(SessionDescription::offer("v=0\r\n")).await.unwrap();
    let err = callee.accept_offer(SessionDescription::offer("v=0\r\n")).await.unwrap_err();
    assert!(matches!(err, NegotiationError::InvalidState { .. }));
}

#[tokio::test]
async fn malformed_offer_is_a_transport_error() {
    let connector = MockConnector::new();
    let (mut callee, _rx) = open(&connector, Role::Callee).await;
    callee.add_remote_candidate(candidate(1)).await;

    let err = callee.accept_offer(SessionDescription::offer("malformed")).await.unwrap_err();
    assert!(matches!(err, NegotiationError::Transport(TransportError::InvalidDescription(_))));

    // Still waiting, buffer intact
    assert_eq!(callee.state(), NegotiationState::AwaitingRemoteOffer);
    assert_eq!(callee.pending_candidates(), 1);
}

#[tokio::test]
async fn answer_in_offer_slot_rejected() {
    let connector = MockConnector::new();
    let (mut callee, _rx) = open(&connector, Role::Callee).await;

    let err = callee.accept_offer(SessionDescription::answer("v=0\r\n")).await.unwrap_err();
    assert!(matches!(err, NegotiationError::Transport(TransportError::InvalidDescription(_))));
}

#[tokio::test]
async fn close_detaches_observer_and_drops_buffer() {
    let connector = MockConnector::new();
    let (mut callee, mut rx) = open(&connector, Role::Callee).await;
    callee.add_remote_candidate(candidate(1)).await;
    let transport = callee.transport().clone();

    callee.close().await;

    assert_eq!(callee.state(), NegotiationState::Closed);
    assert_eq!(callee.connection_state(), PeerConnectionState::Closed);
    assert_eq!(callee.pending_candidates(), 0);
    assert!(transport.is_closed());
    assert!(!transport.has_observer());

    // Late callbacks go nowhere
    assert!(!transport.emit(PeerEventKind::ConnectionState(PeerConnectionState::Failed)));
    assert!(drain(&mut rx).is_empty());

    // Late remote input is ignored
    assert_eq!(callee.add_remote_candidate(candidate(2)).await, CandidateOutcome::Discarded);
    callee.on_connection_state(PeerConnectionState::Connected);
    assert_eq!(callee.state(), NegotiationState::Closed);

    // Idempotent
    callee.close().await;
    assert_eq!(connector.stats().closed(), 1);
}
