//! Local media acquisition and mute control.
//!
//! [`MediaGateway`] acquires the local audio+video stream lazily, once, and
//! hands the same [`LocalStream`] to every peer session. Track enablement is
//! a shared atomic flag per track: transports read it live, so muting never
//! renegotiates a session.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
};

use async_trait::async_trait;

use crate::error::MediaError;

/// Kind of media track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    /// Microphone
    Audio,
    /// Camera
    Video,
}

/// One local capture track.
///
/// Clones share the enablement flag.
#[derive(Debug, Clone)]
pub struct LocalTrack {
    id: String,
    kind: TrackKind,
    enabled: Arc<AtomicBool>,
}

impl LocalTrack {
    /// New enabled track.
    pub fn new(id: impl Into<String>, kind: TrackKind) -> Self {
        Self { id: id.into(), kind, enabled: Arc::new(AtomicBool::new(true)) }
    }

    /// Track identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Audio or video.
    #[must_use]
    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    /// Whether the track currently carries media.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

/// The local capture stream shared by every peer session.
#[derive(Debug, Clone)]
pub struct LocalStream {
    id: String,
    tracks: Vec<LocalTrack>,
}

impl LocalStream {
    /// Stream made of the given tracks.
    pub fn new(id: impl Into<String>, tracks: Vec<LocalTrack>) -> Self {
        Self { id: id.into(), tracks }
    }

    /// Stream identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// All tracks.
    #[must_use]
    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Tracks of one kind.
    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &LocalTrack> {
        self.tracks.iter().filter(move |t| t.kind == kind)
    }

    fn apply(&self, state: LocalMediaState) {
        for track in &self.tracks {
            match track.kind {
                TrackKind::Audio => track.set_enabled(state.audio_enabled),
                TrackKind::Video => track.set_enabled(state.video_enabled),
            }
        }
    }
}

/// User mute preference. Survives across matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalMediaState {
    /// Microphone enabled
    pub audio_enabled: bool,
    /// Camera enabled
    pub video_enabled: bool,
}

impl Default for LocalMediaState {
    fn default() -> Self {
        Self { audio_enabled: true, video_enabled: true }
    }
}

/// Platform capture capability.
#[async_trait]
pub trait MediaSource: Send + Sync + 'static {
    /// Acquire a fresh audio+video stream.
    async fn acquire(&self) -> Result<LocalStream, MediaError>;
}

/// Caches the local stream and owns mute state.
pub struct MediaGateway<S> {
    source: S,
    stream: Option<LocalStream>,
    state: LocalMediaState,
}

impl<S: MediaSource> MediaGateway<S> {
    /// Gateway over `source`. Nothing is acquired until first use.
    pub fn new(source: S) -> Self {
        Self { source, stream: None, state: LocalMediaState::default() }
    }

    /// The cached stream, acquiring it on first call.
    ///
    /// A failed acquisition is not cached, so the next call retries.
    pub async fn local_stream(&mut self) -> Result<LocalStream, MediaError> {
        if let Some(stream) = &self.stream {
            return Ok(stream.clone());
        }

        let stream = self.source.acquire().await?;
        stream.apply(self.state);
        tracing::debug!(stream = stream.id(), tracks = stream.tracks().len(), "local media acquired");

        self.stream = Some(stream.clone());
        Ok(stream)
    }

    /// Cached stream without acquiring.
    #[must_use]
    pub fn cached(&self) -> Option<&LocalStream> {
        self.stream.as_ref()
    }

    /// Drop the cached stream after a hard failure. The next
    /// [`Self::local_stream`] re-acquires.
    pub fn invalidate(&mut self) {
        if let Some(stream) = self.stream.take() {
            tracing::warn!(stream = stream.id(), "local media invalidated");
        }
    }

    /// Enable or disable outgoing audio.
    pub fn set_audio_enabled(&mut self, enabled: bool) {
        self.state.audio_enabled = enabled;
        if let Some(stream) = &self.stream {
            stream.apply(self.state);
        }
    }

    /// Enable or disable outgoing video.
    pub fn set_video_enabled(&mut self, enabled: bool) {
        self.state.video_enabled = enabled;
        if let Some(stream) = &self.stream {
            stream.apply(self.state);
        }
    }

    /// Current mute preference.
    #[must_use]
    pub fn state(&self) -> LocalMediaState {
        self.state
    }
}

/// Media source producing silent audio and black video.
///
/// Always grants. Each acquisition yields a stream with fresh ids.
#[derive(Debug, Default)]
pub struct SyntheticMediaSource {
    acquired: AtomicU64,
}

impl SyntheticMediaSource {
    /// New source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MediaSource for SyntheticMediaSource {
    async fn acquire(&self) -> Result<LocalStream, MediaError> {
        let n = self.acquired.fetch_add(1, Ordering::Relaxed);
        Ok(LocalStream::new(format!("synthetic-{n}"), vec![
            LocalTrack::new(format!("synthetic-{n}-audio"), TrackKind::Audio),
            LocalTrack::new(format!("synthetic-{n}-video"), TrackKind::Video),
        ]))
    }
}
