//! Async runtime
//!
//! Event loop that feeds the [`Matchmaker`] from three sources: user
//! intents, the signaling channel, and its own peer and session-open
//! events. After every step the outbox is flushed into the channel, so
//! outbound events leave in emission order.

use tandem_core::{ClientIdentity, Environment, LinkStatus, MediaSource, PeerConnector};
use tokio::sync::{mpsc, watch};

use crate::{
    channel::{ChannelEvent, Dialer, SignalingChannel, SignalingHandle},
    config::ClientConfig,
    error::{ChannelError, RuntimeError},
    matchmaker::{Matchmaker, MatchmakerInputs},
    state::MatchView,
};

/// Capacity of the intent queue.
const INTENT_CAPACITY: usize = 32;

/// User requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// Acquire media and enter the queue
    Start,
    /// Skip the current partner
    Next,
    /// Leave queue and match
    Stop,
    /// Send a chat message
    Chat(String),
    /// Mute or unmute the microphone
    SetAudio(bool),
    /// Mute or unmute the camera
    SetVideo(bool),
    /// Stop, then exit the loop
    Shutdown,
}

/// Cloneable handle for driving a running [`Runtime`].
#[derive(Debug, Clone)]
pub struct RuntimeHandle {
    intents: mpsc::Sender<Intent>,
    view: watch::Receiver<MatchView>,
}

impl RuntimeHandle {
    /// Submit an intent.
    pub async fn send(&self, intent: Intent) -> Result<(), RuntimeError> {
        self.intents.send(intent).await.map_err(|_| RuntimeError::Stopped)
    }

    /// Latest published snapshot.
    #[must_use]
    pub fn current(&self) -> MatchView {
        self.view.borrow().clone()
    }

    /// Subscribe to snapshots.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<MatchView> {
        self.view.clone()
    }

    /// Wait until a snapshot satisfies `predicate` and return it.
    pub async fn wait_for(
        &self,
        mut predicate: impl FnMut(&MatchView) -> bool,
    ) -> Result<MatchView, RuntimeError> {
        let mut view = self.view.clone();
        let found = view.wait_for(|v| predicate(v)).await.map_err(|_| RuntimeError::Stopped)?;
        Ok(found.clone())
    }
}

/// Runs one client.
pub struct Runtime<C: PeerConnector, S, E> {
    matchmaker: Matchmaker<C, S, E>,
    inputs: MatchmakerInputs,
    signaling: SignalingHandle,
    intents: mpsc::Receiver<Intent>,
}

impl<C, S, E> Runtime<C, S, E>
where
    C: PeerConnector,
    S: MediaSource,
    E: Environment,
{
    /// Runtime over an existing matchmaker and signaling channel.
    pub fn new(
        matchmaker: Matchmaker<C, S, E>,
        inputs: MatchmakerInputs,
        signaling: SignalingHandle,
    ) -> (Self, RuntimeHandle) {
        let (intent_tx, intent_rx) = mpsc::channel(INTENT_CAPACITY);
        let handle = RuntimeHandle { intents: intent_tx, view: matchmaker.subscribe() };

        (Self { matchmaker, inputs, signaling, intents: intent_rx }, handle)
    }

    /// Spawn a signaling channel over `dialer` and build the runtime.
    ///
    /// Must be called inside a tokio runtime.
    pub fn connect<D: Dialer>(
        config: &ClientConfig,
        env: E,
        identity: ClientIdentity,
        dialer: D,
        connector: C,
        media: S,
    ) -> (Self, RuntimeHandle) {
        let signaling =
            SignalingChannel::new(dialer, env.clone(), identity, config.signaling.clone())
                .with_capacity(config.channel_capacity)
                .spawn();
        let (matchmaker, inputs) = Matchmaker::new(env, connector, media);

        Self::new(matchmaker, inputs, signaling)
    }

    /// Read-only access to the matchmaker.
    #[must_use]
    pub fn matchmaker(&self) -> &Matchmaker<C, S, E> {
        &self.matchmaker
    }

    /// Run until shutdown is requested, every handle is dropped, or the
    /// signaling channel stops.
    pub async fn run(mut self) -> Result<(), RuntimeError> {
        let result = loop {
            let keep_running = tokio::select! {
                intent = self.intents.recv() => match intent {
                    None | Some(Intent::Shutdown) => false,
                    Some(intent) => {
                        self.apply(intent).await;
                        true
                    },
                },

                event = self.signaling.recv() => match event {
                    Some(ChannelEvent::Inbound(event)) => {
                        self.matchmaker.handle_signal(event).await;
                        true
                    },
                    Some(ChannelEvent::Status(status)) => {
                        self.matchmaker.handle_link_status(status);
                        true
                    },
                    None => {
                        tracing::warn!("signaling channel stopped");
                        break Err(RuntimeError::Channel(ChannelError::Closed));
                    },
                },

                // The matchmaker keeps both senders alive, so these never yield None
                Some(opened) = self.inputs.opened.recv() => {
                    self.matchmaker.handle_opened(opened).await;
                    true
                },

                Some(event) = self.inputs.peer_events.recv() => {
                    self.matchmaker.handle_peer_event(event).await;
                    true
                },
            };

            if let Err(e) = self.flush() {
                break Err(e);
            }
            if !keep_running {
                break Ok(());
            }
        };

        self.matchmaker.stop().await;
        if let Err(e) = self.flush() {
            tracing::debug!(error = %e, "stop not delivered");
        }
        self.signaling.close().await;
        self.matchmaker.handle_link_status(LinkStatus::Closed);

        tracing::info!("runtime stopped");
        result
    }

    async fn apply(&mut self, intent: Intent) {
        match intent {
            Intent::Start => {
                if let Err(e) = self.matchmaker.start().await {
                    tracing::info!(error = %e, "start failed");
                }
            },
            Intent::Next => self.matchmaker.next().await,
            Intent::Stop => self.matchmaker.stop().await,
            Intent::Chat(text) => {
                if let Err(e) = self.matchmaker.send_chat(&text) {
                    tracing::info!(error = %e, "chat rejected");
                }
            },
            Intent::SetAudio(enabled) => self.matchmaker.set_audio_enabled(enabled),
            Intent::SetVideo(enabled) => self.matchmaker.set_video_enabled(enabled),
            Intent::Shutdown => {},
        }
    }

    fn flush(&mut self) -> Result<(), RuntimeError> {
        for event in self.matchmaker.take_outgoing() {
            tracing::debug!(event = event.name(), "outbound");
            self.signaling.send(event)?;
        }
        Ok(())
    }
}
