//! In-process network around [`MatchServer`].
//!
//! The server runs in its own task and owns every connection. Each
//! [`SimDialer::dial`] opens a pair of bounded mpsc channels shaped like a
//! real [`FrameLink`], so a [`tandem_client::SignalingChannel`] cannot tell
//! it from QUIC. Links can be severed from the test side to exercise
//! reconnect, and a dialer can be taken offline so redials fail.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use tandem_client::{Dialer, FrameLink};
use tandem_proto::Frame;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use crate::match_server::{ConnId, MatchServer, ServerAction};

/// Frames buffered per direction on a simulated link.
const LINK_CAPACITY: usize = 64;

/// Dial failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimNetError {
    /// Dialer is offline or the server task is gone
    #[error("server unreachable")]
    Unreachable,
}

/// Server counters at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NetStats {
    /// Open connections
    pub connections: usize,
    /// Queued clients
    pub queued: usize,
    /// Live pairings
    pub active_pairs: usize,
    /// Pairings formed since start
    pub total_pairings: u64,
}

enum Command {
    Connect { to_client: mpsc::Sender<Frame>, reply: oneshot::Sender<ConnId> },
    Frame { conn: ConnId, frame: Frame },
    Disconnect { conn: ConnId },
    Sever { conn: ConnId },
    ExpireDetached,
    ResetAll,
    Stats { reply: oneshot::Sender<NetStats> },
}

/// Running model server.
///
/// Dropping it stops the server task, which closes every link.
#[derive(Debug)]
pub struct SimNetwork {
    commands: mpsc::UnboundedSender<Command>,
    task: JoinHandle<()>,
}

impl SimNetwork {
    /// Spawn the server task on the current runtime.
    pub fn start() -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(serve(MatchServer::new(), rx));
        Self { commands, task }
    }

    /// New dialer with its own link and offline switch.
    pub fn dialer(&self) -> SimDialer {
        SimDialer {
            commands: self.commands.clone(),
            offline: Arc::new(AtomicBool::new(false)),
            current: Arc::new(Mutex::new(None)),
            dials: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Send reset to every attached client.
    pub fn reset_all(&self) {
        let _ = self.commands.send(Command::ResetAll);
    }

    /// Free queue slots held by clients whose link is down.
    pub fn expire_detached(&self) {
        let _ = self.commands.send(Command::ExpireDetached);
    }

    /// Current server counters.
    pub async fn stats(&self) -> NetStats {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Stats { reply }).is_err() {
            return NetStats::default();
        }
        rx.await.unwrap_or_default()
    }
}

impl Drop for SimNetwork {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(mut server: MatchServer, mut commands: mpsc::UnboundedReceiver<Command>) {
    let mut links: HashMap<ConnId, mpsc::Sender<Frame>> = HashMap::new();

    while let Some(command) = commands.recv().await {
        let actions = match command {
            Command::Connect { to_client, reply } => {
                let conn = server.connect();
                links.insert(conn, to_client);
                if reply.send(conn).is_err() {
                    links.remove(&conn);
                    server.disconnect(conn)
                } else {
                    Vec::new()
                }
            },
            Command::Frame { conn, frame } => server.handle_frame(conn, &frame),
            Command::Disconnect { conn } => {
                links.remove(&conn);
                server.disconnect(conn)
            },
            Command::Sever { conn } => {
                tracing::debug!(?conn, "link severed");
                links.remove(&conn);
                server.disconnect(conn)
            },
            Command::ExpireDetached => server.expire_detached(),
            Command::ResetAll => server.reset_all(),
            Command::Stats { reply } => {
                let _ = reply.send(NetStats {
                    connections: server.connections(),
                    queued: server.queue_len(),
                    active_pairs: server.active_pairs(),
                    total_pairings: server.total_pairings(),
                });
                Vec::new()
            },
        };

        for action in actions {
            match action {
                ServerAction::Send { conn, frame } => {
                    let Some(link) = links.get(&conn) else {
                        continue;
                    };
                    if link.try_send(frame).is_err() {
                        tracing::warn!(?conn, "client link full or gone, dropping it");
                        links.remove(&conn);
                        let _ = server.disconnect(conn);
                    }
                },
                ServerAction::Close { conn } => {
                    links.remove(&conn);
                },
            }
        }
    }
}

/// Dialer onto a [`SimNetwork`].
///
/// Clones share the offline switch and the current link, so a test can
/// keep one while a signaling channel owns the other.
#[derive(Debug, Clone)]
pub struct SimDialer {
    commands: mpsc::UnboundedSender<Command>,
    offline: Arc<AtomicBool>,
    current: Arc<Mutex<Option<ConnId>>>,
    dials: Arc<AtomicU32>,
}

impl SimDialer {
    /// Make subsequent dials fail, or succeed again.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Cut the current link from the server side.
    pub fn sever(&self) {
        let conn = self.current.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(conn) = conn {
            let _ = self.commands.send(Command::Sever { conn });
        }
    }

    /// Dial attempts so far, including failed ones.
    pub fn dials(&self) -> u32 {
        self.dials.load(Ordering::SeqCst)
    }
}

/// Client half of a link's pump. However the pump task ends, frames the
/// client already wrote are delivered before the server hears the link is
/// gone, like a socket flushing on close.
struct Pump {
    conn: ConnId,
    outbound: mpsc::Receiver<Frame>,
    commands: mpsc::UnboundedSender<Command>,
}

impl Pump {
    async fn run(&mut self) {
        while let Some(frame) = self.outbound.recv().await {
            if self.commands.send(Command::Frame { conn: self.conn, frame }).is_err() {
                break;
            }
        }
    }
}

impl Drop for Pump {
    fn drop(&mut self) {
        while let Ok(frame) = self.outbound.try_recv() {
            let _ = self.commands.send(Command::Frame { conn: self.conn, frame });
        }
        let _ = self.commands.send(Command::Disconnect { conn: self.conn });
    }
}

impl Dialer for SimDialer {
    type Error = SimNetError;

    async fn dial(&self) -> Result<FrameLink, SimNetError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(SimNetError::Unreachable);
        }

        let (to_client, from_server) = mpsc::channel(LINK_CAPACITY);
        let (reply, conn) = oneshot::channel();
        self.commands
            .send(Command::Connect { to_client, reply })
            .map_err(|_| SimNetError::Unreachable)?;
        let conn = conn.await.map_err(|_| SimNetError::Unreachable)?;
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = Some(conn);

        let (to_server, outbound) = mpsc::channel::<Frame>(LINK_CAPACITY);
        let mut pump = Pump { conn, outbound, commands: self.commands.clone() };
        let pump = tokio::spawn(async move { pump.run().await });

        Ok(FrameLink::new(to_server, from_server, Some(pump.abort_handle())))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tandem_proto::{Hello, Payload};

    use super::*;

    fn hello(client: &str) -> Frame {
        Payload::Hello(Hello { version: 1, client_id: client.into() }).into_frame().unwrap()
    }

    async fn recv(link: &mut FrameLink) -> Payload {
        let frame = tokio::time::timeout(Duration::from_secs(1), link.from_server.recv())
            .await
            .unwrap()
            .unwrap();
        Payload::from_frame(&frame).unwrap()
    }

    #[tokio::test]
    async fn hello_over_link() {
        let network = SimNetwork::start();
        let dialer = network.dialer();

        let mut link = dialer.dial().await.unwrap();
        link.to_server.send(hello("a")).await.unwrap();

        assert_eq!(recv(&mut link).await, Payload::Welcome);
        assert_eq!(network.stats().await.connections, 1);
    }

    #[tokio::test]
    async fn offline_dialer_fails() {
        let network = SimNetwork::start();
        let dialer = network.dialer();
        dialer.set_offline(true);

        assert_eq!(dialer.dial().await.unwrap_err(), SimNetError::Unreachable);
        assert_eq!(dialer.dials(), 1);
    }

    #[tokio::test]
    async fn sever_closes_link() {
        let network = SimNetwork::start();
        let dialer = network.dialer();

        let mut link = dialer.dial().await.unwrap();
        link.to_server.send(hello("a")).await.unwrap();
        assert_eq!(recv(&mut link).await, Payload::Welcome);

        dialer.sever();
        let closed = tokio::time::timeout(Duration::from_secs(1), link.from_server.recv()).await;
        assert_eq!(closed.unwrap(), None);
    }

    #[tokio::test]
    async fn frames_written_before_drop_are_delivered() {
        let network = SimNetwork::start();
        let dialer = network.dialer();

        let link = dialer.dial().await.unwrap();
        link.to_server.send(hello("a")).await.unwrap();
        link.to_server.send(Payload::Find.into_frame().unwrap()).await.unwrap();
        drop(link);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        let stats = network.stats().await;
        assert_eq!(stats.queued, 1);
        assert_eq!(stats.connections, 0);
    }

    #[tokio::test]
    async fn dropping_link_disconnects() {
        let network = SimNetwork::start();
        let dialer = network.dialer();

        let link = dialer.dial().await.unwrap();
        assert_eq!(network.stats().await.connections, 1);

        drop(link);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(network.stats().await.connections, 0);
    }
}
