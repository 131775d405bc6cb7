//! Peer transport on the `webrtc` crate.
//!
//! One [`RTCPeerConnection`] per match, built with the default codecs and
//! interceptors. Callbacks are registered once at creation and report
//! through whatever [`PeerObserver`] is installed at the time, so clearing
//! the observer silences a connection that is still shutting down.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tandem_core::{
    LocalStream, LocalTrack, PeerConnectionState, PeerConnector, PeerEventKind, PeerObserver,
    PeerTransport, RemoteTrack, TrackKind, TransportError,
};
use tandem_proto::{IceCandidate, SdpKind, SessionDescription};
use webrtc::{
    api::{
        API, APIBuilder,
        interceptor_registry::register_default_interceptors,
        media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8, MediaEngine},
    },
    ice_transport::{ice_candidate::RTCIceCandidateInit, ice_server::RTCIceServer},
    interceptor::registry::Registry,
    media::Sample,
    peer_connection::{
        RTCPeerConnection, configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        sdp::{sdp_type::RTCSdpType, session_description::RTCSessionDescription},
    },
    rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType},
    track::track_local::{TrackLocal, track_local_static_sample::TrackLocalStaticSample},
};

type ObserverSlot = Arc<Mutex<Option<PeerObserver>>>;

fn backend(e: impl std::fmt::Display) -> TransportError {
    TransportError::Backend(e.to_string())
}

/// Creates [`WebRtcTransport`]s sharing one API instance.
pub struct WebRtcConnector {
    api: Arc<API>,
    ice_servers: Vec<String>,
}

impl WebRtcConnector {
    /// Connector using the given STUN/TURN URLs.
    pub fn new(ice_servers: Vec<String>) -> Result<Self, TransportError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(backend)?;

        let registry =
            register_default_interceptors(Registry::new(), &mut media_engine).map_err(backend)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        Ok(Self { api: Arc::new(api), ice_servers })
    }

    fn rtc_config(&self) -> RTCConfiguration {
        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer { urls: self.ice_servers.clone(), ..Default::default() }]
        };
        RTCConfiguration { ice_servers, ..Default::default() }
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    type Transport = WebRtcTransport;

    async fn connect(&self) -> Result<WebRtcTransport, TransportError> {
        let pc = Arc::new(self.api.new_peer_connection(self.rtc_config()).await.map_err(backend)?);
        Ok(WebRtcTransport::wire(pc))
    }
}

/// A local track bound to its outgoing sample track.
struct OutgoingTrack {
    local: LocalTrack,
    track: Arc<TrackLocalStaticSample>,
}

/// One WebRTC peer connection.
pub struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    observer: ObserverSlot,
    outgoing: tokio::sync::Mutex<Vec<OutgoingTrack>>,
}

impl WebRtcTransport {
    fn wire(pc: Arc<RTCPeerConnection>) -> Self {
        let observer: ObserverSlot = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&observer);
        pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(candidate) = candidate {
                match candidate.to_json() {
                    Ok(init) => notify(&slot, PeerEventKind::LocalCandidate(from_init(init))),
                    Err(e) => tracing::debug!(error = %e, "unserializable local candidate"),
                }
            }
            Box::pin(async {})
        }));

        let slot = Arc::clone(&observer);
        pc.on_peer_connection_state_change(Box::new(move |state| {
            if let Some(state) = connection_state(state) {
                notify(&slot, PeerEventKind::ConnectionState(state));
            }
            Box::pin(async {})
        }));

        let slot = Arc::clone(&observer);
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let kind = match track.kind() {
                RTPCodecType::Audio => Some(TrackKind::Audio),
                RTPCodecType::Video => Some(TrackKind::Video),
                RTPCodecType::Unspecified => None,
            };
            if let Some(kind) = kind {
                notify(
                    &slot,
                    PeerEventKind::RemoteTrack(RemoteTrack {
                        stream_id: track.stream_id(),
                        track_id: track.id(),
                        kind,
                    }),
                );
            }
            Box::pin(async {})
        }));

        Self { pc, observer, outgoing: tokio::sync::Mutex::new(Vec::new()) }
    }

    /// Write one encoded media sample for `kind`.
    ///
    /// Samples for a muted track are dropped. Returns whether it was sent.
    pub async fn write_sample(&self, kind: TrackKind, sample: &Sample) -> Result<bool, TransportError> {
        let outgoing = self.outgoing.lock().await;
        let Some(out) = outgoing.iter().find(|t| t.local.kind() == kind) else {
            return Ok(false);
        };
        if !out.local.is_enabled() {
            return Ok(false);
        }

        out.track.write_sample(sample).await.map_err(backend)?;
        Ok(true)
    }
}

fn notify(slot: &ObserverSlot, kind: PeerEventKind) {
    let observer = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
    if let Some(observer) = observer {
        observer.notify(kind);
    }
}

fn connection_state(state: RTCPeerConnectionState) -> Option<PeerConnectionState> {
    let state = match state {
        RTCPeerConnectionState::New => PeerConnectionState::New,
        RTCPeerConnectionState::Connecting => PeerConnectionState::Connecting,
        RTCPeerConnectionState::Connected => PeerConnectionState::Connected,
        RTCPeerConnectionState::Disconnected => PeerConnectionState::Disconnected,
        RTCPeerConnectionState::Failed => PeerConnectionState::Failed,
        RTCPeerConnectionState::Closed => PeerConnectionState::Closed,
        RTCPeerConnectionState::Unspecified => return None,
    };
    Some(state)
}

fn from_init(init: RTCIceCandidateInit) -> IceCandidate {
    IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_mline_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    }
}

fn to_rtc(desc: SessionDescription) -> Result<RTCSessionDescription, TransportError> {
    let rtc = match desc.kind {
        SdpKind::Offer => RTCSessionDescription::offer(desc.sdp),
        SdpKind::Answer => RTCSessionDescription::answer(desc.sdp),
    };
    rtc.map_err(|e| TransportError::InvalidDescription(e.to_string()))
}

fn from_rtc(desc: RTCSessionDescription) -> Result<SessionDescription, TransportError> {
    match desc.sdp_type {
        RTCSdpType::Offer => Ok(SessionDescription::offer(desc.sdp)),
        RTCSdpType::Answer => Ok(SessionDescription::answer(desc.sdp)),
        other => Err(TransportError::InvalidDescription(format!("unsupported sdp type {other:?}"))),
    }
}

fn codec(kind: TrackKind) -> RTCRtpCodecCapability {
    match kind {
        TrackKind::Audio => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_OPUS.to_owned(),
            clock_rate: 48_000,
            channels: 2,
            ..Default::default()
        },
        TrackKind::Video => RTCRtpCodecCapability {
            mime_type: MIME_TYPE_VP8.to_owned(),
            clock_rate: 90_000,
            ..Default::default()
        },
    }
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn attach_local_stream(&self, stream: &LocalStream) -> Result<(), TransportError> {
        let mut outgoing = self.outgoing.lock().await;
        for local in stream.tracks() {
            let track = Arc::new(TrackLocalStaticSample::new(
                codec(local.kind()),
                local.id().to_owned(),
                stream.id().to_owned(),
            ));
            let sender_track: Arc<dyn TrackLocal + Send + Sync> = track.clone();
            self.pc.add_track(sender_track).await.map_err(backend)?;
            outgoing.push(OutgoingTrack { local: local.clone(), track });
        }
        Ok(())
    }

    async fn create_offer(&self) -> Result<SessionDescription, TransportError> {
        from_rtc(self.pc.create_offer(None).await.map_err(backend)?)
    }

    async fn create_answer(&self) -> Result<SessionDescription, TransportError> {
        from_rtc(self.pc.create_answer(None).await.map_err(backend)?)
    }

    async fn set_local_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.pc
            .set_local_description(to_rtc(desc)?)
            .await
            .map_err(|e| TransportError::InvalidDescription(e.to_string()))
    }

    async fn set_remote_description(&self, desc: SessionDescription) -> Result<(), TransportError> {
        self.pc
            .set_remote_description(to_rtc(desc)?)
            .await
            .map_err(|e| TransportError::InvalidDescription(e.to_string()))
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), TransportError> {
        if self.pc.remote_description().await.is_none() {
            return Err(TransportError::NoRemoteDescription);
        }

        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc.add_ice_candidate(init).await.map_err(backend)
    }

    fn set_observer(&self, observer: Option<PeerObserver>) {
        *self.observer.lock().unwrap_or_else(PoisonError::into_inner) = observer;
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.outgoing.lock().await.clear();
        self.pc.close().await.map_err(backend)
    }
}
