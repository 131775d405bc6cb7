//! Scripted media source.

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicU32, Ordering},
};

use async_trait::async_trait;
use tandem_core::{LocalStream, LocalTrack, MediaError, MediaSource, TrackKind};

/// Media source that grants or denies on command and counts acquisitions.
///
/// Clones share state, so a test can keep one and hand the other to a
/// matchmaker.
#[derive(Debug, Clone)]
pub struct ScriptedMediaSource {
    grant: Arc<AtomicBool>,
    acquisitions: Arc<AtomicU32>,
}

impl ScriptedMediaSource {
    /// Source that grants access.
    pub fn granting() -> Self {
        Self { grant: Arc::new(AtomicBool::new(true)), acquisitions: Arc::new(AtomicU32::new(0)) }
    }

    /// Source that denies access.
    pub fn denying() -> Self {
        let source = Self::granting();
        source.set_grant(false);
        source
    }

    /// Grant or deny subsequent acquisitions.
    pub fn set_grant(&self, grant: bool) {
        self.grant.store(grant, Ordering::SeqCst);
    }

    /// Acquisition attempts so far, granted or not.
    pub fn acquisitions(&self) -> u32 {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaSource for ScriptedMediaSource {
    async fn acquire(&self) -> Result<LocalStream, MediaError> {
        let n = self.acquisitions.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.grant.load(Ordering::SeqCst) {
            return Err(MediaError::PermissionDenied);
        }

        Ok(LocalStream::new(
            format!("scripted-{n}"),
            vec![
                LocalTrack::new(format!("scripted-audio-{n}"), TrackKind::Audio),
                LocalTrack::new(format!("scripted-video-{n}"), TrackKind::Video),
            ],
        ))
    }
}
