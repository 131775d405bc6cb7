//! Deterministic in-memory peer transport.
//!
//! [`MockTransport`] behaves like a well-mannered peer connection:
//!
//! - committing a local description gathers one host candidate
//! - once both descriptions are committed it reports `connecting`, then
//!   `connected`, then one audio and one video remote track
//! - any description whose SDP contains `malformed` is rejected
//! - a candidate before the remote description fails with
//!   [`TransportError::NoRemoteDescription`]
//!
//! [`MockConnector`] records every transport it hands out so tests can
//! assert that nothing leaks.

use std::sync::{
    Arc, Mutex, PoisonError,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use tandem_core::{
    LocalStream, PeerConnectionState, PeerConnector, PeerEventKind, PeerObserver, PeerTransport,
    RemoteTrack, TrackKind, TransportError,
};
use tandem_proto::{IceCandidate, SessionDescription};

/// Marker that makes a description or candidate invalid.
pub const MALFORMED: &str = "malformed";

/// Transport lifetime counters.
#[derive(Debug, Default)]
pub struct MockStats {
    created: AtomicUsize,
    closed: AtomicUsize,
    max_live: AtomicUsize,
}

impl MockStats {
    /// Transports handed out.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    /// Transports closed.
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }

    /// Transports created and not yet closed.
    pub fn live(&self) -> usize {
        self.created().saturating_sub(self.closed())
    }

    /// Highest number live at once.
    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    fn on_create(&self) {
        self.created.fetch_add(1, Ordering::SeqCst);
        self.max_live.fetch_max(self.live(), Ordering::SeqCst);
    }

    fn on_close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct Inner {
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    applied: Vec<IceCandidate>,
    attached: Vec<String>,
    observer: Option<PeerObserver>,
    connected: bool,
    closed: bool,
}

/// Handle to one mock peer connection. Clones share state.
#[derive(Debug, Clone)]
pub struct MockTransport {
    id: usize,
    auto_connect: bool,
    reject_media: bool,
    inner: Arc<Mutex<Inner>>,
    stats: Arc<MockStats>,
}

impl MockTransport {
    fn new(id: usize, auto_connect: bool, reject_media: bool, stats: Arc<MockStats>) -> Self {
        stats.on_create();
        Self {
            id,
            auto_connect,
            reject_media,
            inner: Arc::new(Mutex::new(Inner::default())),
            stats,
        }
    }

    /// Creation index, starting at 1.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Candidates accepted by [`PeerTransport::add_ice_candidate`], in order.
    pub fn applied_candidates(&self) -> Vec<IceCandidate> {
        self.lock().applied.clone()
    }

    /// Committed local description.
    pub fn local_description(&self) -> Option<SessionDescription> {
        self.lock().local.clone()
    }

    /// Committed remote description.
    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.lock().remote.clone()
    }

    /// Ids of attached local tracks.
    pub fn attached_tracks(&self) -> Vec<String> {
        self.lock().attached.clone()
    }

    /// Whether an observer is installed.
    pub fn has_observer(&self) -> bool {
        self.lock().observer.is_some()
    }

    /// Whether `close` was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Report an event as if the connection produced it.
    ///
    /// Returns false if no observer is installed.
    pub fn emit(&self, kind: PeerEventKind) -> bool {
        let observer = self.lock().observer.clone();
        observer.is_some_and(|o| o.notify(kind))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.lock().closed { Err(TransportError::Closed) } else { Ok(()) }
    }

    fn sdp(&self, version: u32) -> String {
        format!("v=0\r\no=mock {id} {version} IN IP4 10.0.0.{id}\r\ns=-\r\n", id = self.id)
    }

    fn host_candidate(&self) -> IceCandidate {
        let mut candidate = IceCandidate::new(format!(
            "candidate:{id} 1 udp 2122260223 10.0.0.{id} {port} typ host",
            id = self.id,
            port = 50_000 + self.id,
        ));
        candidate.sdp_mid = Some("0".to_string());
        candidate.sdp_mline_index = Some(0);
        candidate
    }

    /// Report connectivity once both sides are committed.
    fn maybe_connect(&self) {
        let observer = {
            let mut inner = self.lock();
            let ready = inner.local.is_some() && inner.remote.is_some();
            if !self.auto_connect || inner.connected || !ready {
                return;
            }
            inner.connected = true;
            inner.observer.clone()
        };

        let Some(observer) = observer else {
            return;
        };

        observer.notify(PeerEventKind::ConnectionState(PeerConnectionState::Connecting));
        observer.notify(PeerEventKind::ConnectionState(PeerConnectionState::Connected));
        for (kind, name) in [(TrackKind::Audio, "audio"), (TrackKind::Video, "video")] {
            observer.notify(PeerEventKind::RemoteTrack(RemoteTrack {
                stream_id: format!("remote-{}", self.id),
                track_id: format!("remote-{name}-{}", self.id),
                kind,
            }));
        }
    }
}

fn check_sdp(desc: &SessionDescription) -> Result<(), TransportError> {
    if desc.sdp.contains(MALFORMED) {
        Err(TransportError::InvalidDescription(format!("unparseable {:?} sdp", desc.kind)))
    } else {
        Ok(())
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn attach_local_stream(&self, stream: &LocalStream) -> Result<(), TransportError> {
        self.ensure_open()?;
        if self.reject_media {
            return Err(TransportError::Backend("capture device busy".to_string()));
        }
        let mut inner = self.lock();
        inner.attached.extend(stream.tracks().iter().map(|t| t.id().to_string()));
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        Ok(SessionDescription::offer(self.sdp(1)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        self.ensure_open()?;
        if self.lock().remote.is_none() {
            return Err(TransportError::InvalidState("answer without remote offer".to_string()));
        }
        Ok(SessionDescription::answer(self.sdp(2)))
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.ensure_open()?;
        check_sdp(&desc)?;

        let observer = {
            let mut inner = self.lock();
            inner.local = Some(desc);
            inner.observer.clone()
        };
        if let Some(observer) = observer {
            observer.notify(PeerEventKind::LocalCandidate(self.host_candidate()));
        }

        self.maybe_connect();
        Ok(())
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.ensure_open()?;
        check_sdp(&desc)?;

        self.lock().remote = Some(desc);
        self.maybe_connect();
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        self.ensure_open()?;
        let mut inner = self.lock();
        if inner.remote.is_none() {
            return Err(TransportError::NoRemoteDescription);
        }
        if candidate.candidate.contains(MALFORMED) {
            return Err(TransportError::Backend("unparseable candidate".to_string()));
        }
        inner.applied.push(candidate);
        Ok(())
    }

    fn set_observer(&self, observer: Option<PeerObserver>) {
        self.lock().observer = observer;
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut inner = self.lock();
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        inner.observer = None;
        drop(inner);

        self.stats.on_close();
        Ok(())
    }
}

/// Hands out [`MockTransport`]s and remembers them. Clones share state.
#[derive(Debug, Clone)]
pub struct MockConnector {
    stats: Arc<MockStats>,
    transports: Arc<Mutex<Vec<MockTransport>>>,
    auto_connect: Arc<AtomicBool>,
    fail_connect: Arc<AtomicBool>,
    fail_attach: Arc<AtomicBool>,
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MockConnector {
    /// Connector whose transports connect on their own.
    pub fn new() -> Self {
        Self {
            stats: Arc::new(MockStats::default()),
            transports: Arc::new(Mutex::new(Vec::new())),
            auto_connect: Arc::new(AtomicBool::new(true)),
            fail_connect: Arc::new(AtomicBool::new(false)),
            fail_attach: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Connector whose transports never report connectivity by themselves.
    pub fn manual() -> Self {
        let connector = Self::new();
        connector.auto_connect.store(false, Ordering::SeqCst);
        connector
    }

    /// Make every following `connect` fail (or succeed again).
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Make transports created from now on refuse the local stream.
    pub fn set_fail_attach(&self, fail: bool) {
        self.fail_attach.store(fail, Ordering::SeqCst);
    }

    /// Lifetime counters.
    pub fn stats(&self) -> &MockStats {
        &self.stats
    }

    /// Every transport handed out, in creation order.
    pub fn transports(&self) -> Vec<MockTransport> {
        self.transports.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Most recently created transport.
    pub fn last(&self) -> Option<MockTransport> {
        self.transports.lock().unwrap_or_else(PoisonError::into_inner).last().cloned()
    }
}

#[async_trait]
impl PeerConnector for MockConnector {
    type Transport = MockTransport;

    async fn connect(&self) -> Result<MockTransport, TransportError> {
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(TransportError::Backend("no network interfaces".to_string()));
        }

        let mut transports = self.transports.lock().unwrap_or_else(PoisonError::into_inner);
        let transport = MockTransport::new(
            transports.len() + 1,
            self.auto_connect.load(Ordering::SeqCst),
            self.fail_attach.load(Ordering::SeqCst),
            Arc::clone(&self.stats),
        );
        transports.push(transport.clone());
        Ok(transport)
    }
}
