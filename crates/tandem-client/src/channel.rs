//! Signaling channel task.
//!
//! Owns the framed link to the matchmaking service. Each dial runs a fresh
//! [`SignalingConnection`]: hello with the persisted identity first, then
//! queued outbound events in order. When the link drops or times out the
//! task reports [`LinkStatus::Reconnecting`] and redials with exponential
//! backoff. The orchestrator sees only [`ChannelEvent`]s.
//!
//! ```text
//!  Matchmaker ──OutboundEvent──> [unbounded] ──> channel task ──Frame──> link
//!  Matchmaker <──ChannelEvent─── [mpsc 64]   <── channel task <──Frame── link
//! ```
//!
//! Sending never waits. Outbound events pile up in the unbounded queue for
//! as long as the link is down, so the owner can keep reading channel
//! events while the task sits in a redial loop.

use std::{fmt, future::Future, time::Duration};

use tandem_core::{
    ClientIdentity, Environment, InboundEvent, LinkStatus, OutboundEvent, ReconnectBackoff,
    SignalingAction, SignalingConfig, SignalingConnection,
};
use tandem_proto::Frame;
use tokio::{
    sync::mpsc,
    task::{AbortHandle, JoinHandle},
};

use crate::{config::DEFAULT_CHANNEL_CAPACITY, error::ChannelError};

/// How often the connection state machine is ticked.
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// How long `close` waits for queued events to drain.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// One established framed link.
///
/// Dropping the link aborts its I/O task.
pub struct FrameLink {
    /// Frames toward the service
    pub to_server: mpsc::Sender<Frame>,
    /// Frames from the service. `None` means the link is gone.
    pub from_server: mpsc::Receiver<Frame>,
    abort_handle: Option<AbortHandle>,
}

impl FrameLink {
    /// Wrap a channel pair, optionally owning the task that pumps it.
    #[must_use]
    pub fn new(
        to_server: mpsc::Sender<Frame>,
        from_server: mpsc::Receiver<Frame>,
        abort_handle: Option<AbortHandle>,
    ) -> Self {
        Self { to_server, from_server, abort_handle }
    }

    /// Stop the I/O task.
    pub fn stop(&self) {
        if let Some(handle) = &self.abort_handle {
            handle.abort();
        }
    }
}

impl Drop for FrameLink {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for FrameLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameLink").field("closed", &self.to_server.is_closed()).finish()
    }
}

/// Opens framed links to the matchmaking service.
pub trait Dialer: Send + Sync + 'static {
    /// Dial failure.
    type Error: fmt::Display + Send;

    /// Establish a new link.
    fn dial(&self) -> impl Future<Output = Result<FrameLink, Self::Error>> + Send;
}

/// What the channel hands to the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Service event, in arrival order
    Inbound(InboundEvent),
    /// Link status changed
    Status(LinkStatus),
}

/// Owner side of a running channel task.
#[derive(Debug)]
pub struct SignalingHandle {
    outbound: Option<mpsc::UnboundedSender<OutboundEvent>>,
    events: mpsc::Receiver<ChannelEvent>,
    task: JoinHandle<()>,
}

impl SignalingHandle {
    /// Queue an event for the service. Fire-and-forget: held while the
    /// link is down and sent in order after the next hello.
    pub fn send(&self, event: OutboundEvent) -> Result<(), ChannelError> {
        let outbound = self.outbound.as_ref().ok_or(ChannelError::Closed)?;
        outbound.send(event).map_err(|_| ChannelError::Closed)
    }

    /// Next channel event. `None` once the task has stopped.
    pub async fn recv(&mut self) -> Option<ChannelEvent> {
        self.events.recv().await
    }

    /// Stop accepting events, let queued ones drain, then stop the task.
    pub async fn close(&mut self) {
        // Dropping the sender lets the task drain and exit on its own.
        self.outbound = None;
        if tokio::time::timeout(CLOSE_GRACE, &mut self.task).await.is_err() {
            tracing::debug!("signaling channel did not drain in time");
            self.task.abort();
        }
    }

    /// Stop the task immediately.
    pub fn abort(&self) {
        self.task.abort();
    }
}

enum LinkOutcome {
    /// Owner went away, stop for good
    Shutdown,
    /// Link failed, redial
    Lost(String),
}

/// Reconnecting signaling channel.
pub struct SignalingChannel<D, E> {
    dialer: D,
    env: E,
    identity: ClientIdentity,
    config: SignalingConfig,
    capacity: usize,
}

impl<D: Dialer, E: Environment> SignalingChannel<D, E> {
    /// Channel dialing through `dialer` and announcing `identity`.
    pub fn new(dialer: D, env: E, identity: ClientIdentity, config: SignalingConfig) -> Self {
        Self { dialer, env, identity, config, capacity: DEFAULT_CHANNEL_CAPACITY }
    }

    /// Override the channel event queue capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Spawn the channel task on the current runtime.
    pub fn spawn(self) -> SignalingHandle {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(self.capacity);
        let task = tokio::spawn(self.run(outbound_rx, events_tx));

        SignalingHandle { outbound: Some(outbound_tx), events: events_rx, task }
    }

    async fn run(
        self,
        mut outbound: mpsc::UnboundedReceiver<OutboundEvent>,
        events: mpsc::Sender<ChannelEvent>,
    ) {
        let mut backoff = ReconnectBackoff::new(self.config.reconnect_base, self.config.reconnect_max);

        loop {
            let reason = match self.dialer.dial().await {
                Ok(mut link) => match self.drive(&mut link, &mut outbound, &events, &mut backoff).await {
                    LinkOutcome::Shutdown => {
                        tracing::debug!("signaling channel shutting down");
                        return;
                    },
                    LinkOutcome::Lost(reason) => reason,
                },
                Err(e) => format!("dial failed: {e}"),
            };

            let delay = backoff.next_delay(&self.env);
            let attempt = backoff.attempt();
            tracing::warn!(%reason, attempt, ?delay, "signaling link down");

            let status = ChannelEvent::Status(LinkStatus::Reconnecting { attempt });
            if events.send(status).await.is_err() {
                return;
            }

            tokio::select! {
                () = self.env.sleep(delay) => {},
                () = events.closed() => return,
            }
        }
    }

    /// Run one link until it fails or the owner goes away.
    async fn drive(
        &self,
        link: &mut FrameLink,
        outbound: &mut mpsc::UnboundedReceiver<OutboundEvent>,
        events: &mpsc::Sender<ChannelEvent>,
        backoff: &mut ReconnectBackoff,
    ) -> LinkOutcome {
        let mut connection = SignalingConnection::new(self.env.now(), self.config.clone());

        let hello = match connection.send_hello(self.env.now(), &self.identity) {
            Ok(actions) => actions,
            Err(e) => return LinkOutcome::Lost(e.to_string()),
        };
        if let Some(outcome) = execute(hello, link, events, backoff).await {
            return outcome;
        }

        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            let actions = tokio::select! {
                frame = link.from_server.recv() => {
                    let Some(frame) = frame else {
                        return LinkOutcome::Lost("link closed by peer".to_string());
                    };

                    match connection.handle_frame(&frame, self.env.now()) {
                        Ok(actions) => actions,
                        Err(e) => {
                            tracing::warn!(error = %e, "dropping signaling frame");
                            continue;
                        },
                    }
                },

                // Held back until the handshake completes, then sent in order
                event = outbound.recv(), if connection.is_ready() => {
                    let Some(event) = event else {
                        return LinkOutcome::Shutdown;
                    };

                    let name = event.name();
                    match event.into_frame() {
                        Ok(frame) => {
                            tracing::trace!(event = name, "sending");
                            vec![SignalingAction::SendFrame(frame)]
                        },
                        Err(e) => {
                            tracing::warn!(event = name, error = %e, "dropping unencodable event");
                            continue;
                        },
                    }
                },

                _ = tick.tick() => connection.tick(self.env.now()),

                () = events.closed() => return LinkOutcome::Shutdown,
            };

            if let Some(outcome) = execute(actions, link, events, backoff).await {
                return outcome;
            }
        }
    }
}

/// Carry out connection actions. `Some` ends the link.
async fn execute(
    actions: Vec<SignalingAction>,
    link: &FrameLink,
    events: &mpsc::Sender<ChannelEvent>,
    backoff: &mut ReconnectBackoff,
) -> Option<LinkOutcome> {
    for action in actions {
        match action {
            SignalingAction::SendFrame(frame) => {
                if link.to_server.send(frame).await.is_err() {
                    return Some(LinkOutcome::Lost("link closed while sending".to_string()));
                }
            },
            SignalingAction::Deliver(event) => {
                if events.send(ChannelEvent::Inbound(event)).await.is_err() {
                    return Some(LinkOutcome::Shutdown);
                }
            },
            SignalingAction::Status(status) => {
                backoff.reset();
                tracing::info!(?status, "signaling link established");
                if events.send(ChannelEvent::Status(status)).await.is_err() {
                    return Some(LinkOutcome::Shutdown);
                }
            },
            SignalingAction::Close { reason } => return Some(LinkOutcome::Lost(reason)),
        }
    }
    None
}
