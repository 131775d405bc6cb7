//! Sans-IO model of the matchmaking service.
//!
//! Accepts frames per connection and returns [`ServerAction`]s. The owner
//! routes them: [`crate::SimDriver`] hands them straight to matchmakers,
//! [`crate::SimNetwork`] writes them to in-memory links.
//!
//! # Behavior
//!
//! - hello → welcome for a new identity, reconnected for a known one; any
//!   other frame before hello → error `HANDSHAKE_REQUIRED`
//! - find → queue; the two longest-waiting attached clients are paired,
//!   the older one as caller; a client left waiting gets waiting +
//!   queue-status
//! - offer, answer, candidate and chat are relayed to the partner
//! - next, stop or disconnect → partner-left to the partner
//!
//! State is keyed by client id, not by connection. A client whose link
//! drops while queued keeps its place and is skipped for pairing until it
//! says hello again, at which point pairing is retried. A client whose
//! link drops while paired loses the pairing, and is told partner-left
//! right after its reconnected. A reset missed while detached is delivered
//! the same way.

use std::collections::{HashMap, VecDeque};

use tandem_proto::{
    ChatPayload, ErrorPayload, Frame, Matched, Opcode, Payload, QueueStatus, Role,
};

/// Seconds of expected wait per queue position.
const ETA_PER_POSITION: u32 = 5;

/// Server-side connection id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u64);

/// Action for the owner to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAction {
    /// Deliver a frame to a connection
    Send {
        /// Target connection
        conn: ConnId,
        /// Frame to deliver
        frame: Frame,
    },
    /// Drop a connection
    Close {
        /// Connection to drop
        conn: ConnId,
    },
}

#[derive(Debug, Default)]
struct Client {
    /// Attached connection, `None` while the link is down
    conn: Option<ConnId>,
    /// Missed while detached: partner-left or reset, sent after the next hello
    owed: Option<Payload>,
}

/// Matchmaking service state.
#[derive(Debug, Default)]
pub struct MatchServer {
    /// Open connections and the client each one said hello as
    conns: HashMap<ConnId, Option<String>>,
    clients: HashMap<String, Client>,
    queue: VecDeque<String>,
    partners: HashMap<String, String>,
    next_conn: u64,
    pairings: u64,
}

impl MatchServer {
    /// Empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a new connection.
    pub fn connect(&mut self) -> ConnId {
        self.next_conn += 1;
        let conn = ConnId(self.next_conn);
        self.conns.insert(conn, None);
        conn
    }

    /// Process one frame from `conn`.
    pub fn handle_frame(&mut self, conn: ConnId, frame: &Frame) -> Vec<ServerAction> {
        let mut actions = Vec::new();
        let Some(greeted) = self.conns.get(&conn).cloned() else {
            tracing::debug!(?conn, "frame from unknown connection");
            return actions;
        };

        let payload = match Payload::from_frame(frame) {
            Ok(payload) => payload,
            Err(e) => {
                let error = ErrorPayload::frame_rejected(e.to_string());
                push(&mut actions, conn, Payload::Error(error));
                return actions;
            },
        };

        let client_id = match (payload, greeted) {
            (Payload::Hello(hello), None) => {
                self.on_hello(&mut actions, conn, hello.client_id);
                return actions;
            },
            (Payload::Hello(_), Some(_)) => {
                let error = ErrorPayload::invalid_state("duplicate hello");
                push(&mut actions, conn, Payload::Error(error));
                return actions;
            },
            (_, None) => {
                push(&mut actions, conn, Payload::Error(ErrorPayload::handshake_required()));
                return actions;
            },
            (payload, Some(client_id)) => {
                self.on_request(&mut actions, conn, &client_id, payload);
                client_id
            },
        };

        tracing::trace!(client = %client_id, actions = actions.len(), "frame handled");
        actions
    }

    /// Connection went away.
    pub fn disconnect(&mut self, conn: ConnId) -> Vec<ServerAction> {
        let mut actions = Vec::new();
        let Some(Some(client_id)) = self.conns.remove(&conn) else {
            return actions;
        };

        // A newer connection may already have replaced this one
        let Some(client) = self.clients.get_mut(&client_id).filter(|c| c.conn == Some(conn))
        else {
            return actions;
        };
        client.conn = None;

        if let Some(partner) = self.partners.remove(&client_id) {
            self.partners.remove(&partner);
            if let Some(client) = self.clients.get_mut(&client_id) {
                client.owed = Some(Payload::PartnerLeft);
            }
            self.send_to(&mut actions, &partner, Payload::PartnerLeft);
        }
        tracing::debug!(client = %client_id, "client detached");
        actions
    }

    /// Drop queue slots held by clients whose link is down.
    pub fn expire_detached(&mut self) -> Vec<ServerAction> {
        let mut actions = Vec::new();
        let clients = &self.clients;
        let before = self.queue.len();
        self.queue.retain(|id| clients.get(id).is_some_and(|c| c.conn.is_some()));

        if self.queue.len() != before {
            self.broadcast_queue(&mut actions);
        }
        actions
    }

    /// Tell every client to start over. Detached ones hear it on return.
    pub fn reset_all(&mut self) -> Vec<ServerAction> {
        let mut actions = Vec::new();
        self.queue.clear();
        self.partners.clear();

        let mut conns = Vec::new();
        for client in self.clients.values_mut() {
            match client.conn {
                Some(conn) => {
                    client.owed = None;
                    conns.push(conn);
                },
                None => client.owed = Some(Payload::Reset),
            }
        }
        conns.sort();
        for conn in conns {
            push(&mut actions, conn, Payload::Reset);
        }
        actions
    }

    /// Clients currently queued, attached or not.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Live pairings.
    pub fn active_pairs(&self) -> usize {
        self.partners.len() / 2
    }

    /// Pairings formed since start.
    pub fn total_pairings(&self) -> u64 {
        self.pairings
    }

    /// Open connections.
    pub fn connections(&self) -> usize {
        self.conns.len()
    }

    /// Partner of a client, if paired.
    pub fn partner_of(&self, client_id: &str) -> Option<&str> {
        self.partners.get(client_id).map(String::as_str)
    }

    fn on_hello(&mut self, actions: &mut Vec<ServerAction>, conn: ConnId, client_id: String) {
        self.conns.insert(conn, Some(client_id.clone()));

        let known = self.clients.contains_key(&client_id);
        let client = self.clients.entry(client_id.clone()).or_default();
        if let Some(old) = client.conn.replace(conn) {
            // The client redialed before its old link was noticed as gone
            self.conns.remove(&old);
            actions.push(ServerAction::Close { conn: old });
        }
        let owed = client.owed.take();

        push(actions, conn, if known { Payload::Reconnected } else { Payload::Welcome });
        if let Some(notice) = owed {
            push(actions, conn, notice);
        }

        // A returning queued client may now pair with someone who waited
        if self.queue.contains(&client_id) {
            self.match_queue(actions);
            self.send_queue_status(actions, &client_id);
        }
    }

    fn on_request(
        &mut self,
        actions: &mut Vec<ServerAction>,
        conn: ConnId,
        client_id: &str,
        payload: Payload,
    ) {
        match payload {
            Payload::Ping => push(actions, conn, Payload::Pong),
            Payload::Pong => {},
            Payload::Find => self.on_find(actions, client_id),
            Payload::Next | Payload::Stop => self.leave(actions, client_id),
            Payload::Offer(_) | Payload::Answer(_) | Payload::Candidate(_) => {
                self.relay(actions, conn, client_id, payload);
            },
            Payload::ChatSend(ChatPayload { id, text, timestamp }) => {
                let chat = Payload::ChatReceive(ChatPayload { id, text, timestamp });
                self.relay(actions, conn, client_id, chat);
            },
            other => {
                let reason = format!("{:?} is not client-originated", other.opcode());
                push(actions, conn, Payload::Error(ErrorPayload::frame_rejected(reason)));
            },
        }
    }

    fn on_find(&mut self, actions: &mut Vec<ServerAction>, client_id: &str) {
        if self.queue.iter().any(|id| id == client_id) {
            self.send_queue_status(actions, client_id);
            return;
        }
        // Find while paired means the client moved on
        self.leave(actions, client_id);

        self.queue.push_back(client_id.to_string());
        self.match_queue(actions);

        if self.queue.iter().any(|id| id == client_id) {
            self.send_to(actions, client_id, Payload::Waiting);
            self.send_queue_status(actions, client_id);
        }
    }

    /// Pair attached queued clients two at a time, oldest first.
    fn match_queue(&mut self, actions: &mut Vec<ServerAction>) {
        let mut paired = false;
        loop {
            let clients = &self.clients;
            let mut attached = self
                .queue
                .iter()
                .enumerate()
                .filter(|(_, id)| clients.get(*id).is_some_and(|c| c.conn.is_some()))
                .map(|(index, _)| index);
            let (Some(first), Some(second)) = (attached.next(), attached.next()) else {
                break;
            };

            // Remove the later index first so the earlier one stays valid
            let (Some(callee), Some(caller)) = (self.queue.remove(second), self.queue.remove(first))
            else {
                break;
            };
            self.pair(actions, caller, callee);
            paired = true;
        }

        if paired {
            self.broadcast_queue(actions);
        }
    }

    fn pair(&mut self, actions: &mut Vec<ServerAction>, caller: String, callee: String) {
        self.partners.insert(caller.clone(), callee.clone());
        self.partners.insert(callee.clone(), caller.clone());
        self.pairings += 1;
        tracing::debug!(%caller, %callee, "paired");

        self.send_to(actions, &caller, Payload::Matched(Matched { role: Role::Caller }));
        self.send_to(actions, &callee, Payload::Matched(Matched { role: Role::Callee }));
    }

    /// Drop a client from the queue and from its pairing.
    fn leave(&mut self, actions: &mut Vec<ServerAction>, client_id: &str) {
        if let Some(index) = self.queue.iter().position(|id| id == client_id) {
            self.queue.remove(index);
            self.broadcast_queue(actions);
        }

        if let Some(partner) = self.partners.remove(client_id) {
            self.partners.remove(&partner);
            self.send_to(actions, &partner, Payload::PartnerLeft);
        }
    }

    fn relay(&self, actions: &mut Vec<ServerAction>, conn: ConnId, client_id: &str, payload: Payload) {
        match self.partners.get(client_id) {
            Some(partner) => self.send_to(actions, partner, payload),
            None => push(actions, conn, Payload::Error(ErrorPayload::no_partner())),
        }
    }

    fn broadcast_queue(&self, actions: &mut Vec<ServerAction>) {
        for client_id in &self.queue {
            self.send_queue_status(actions, client_id);
        }
    }

    fn send_queue_status(&self, actions: &mut Vec<ServerAction>, client_id: &str) {
        let Some(index) = self.queue.iter().position(|id| id == client_id) else {
            return;
        };
        let position = u32::try_from(index + 1).unwrap_or(u32::MAX);
        let status = QueueStatus {
            position,
            eta_seconds: position.saturating_mul(ETA_PER_POSITION),
            waited_seconds: 0,
        };
        self.send_to(actions, client_id, Payload::QueueStatus(status));
    }

    /// Send to a client's attached connection. Dropped while detached.
    fn send_to(&self, actions: &mut Vec<ServerAction>, client_id: &str, payload: Payload) {
        match self.clients.get(client_id).and_then(|c| c.conn) {
            Some(conn) => push(actions, conn, payload),
            None => {
                tracing::trace!(client = %client_id, opcode = ?payload.opcode(), "detached, dropped");
            },
        }
    }
}

fn push(actions: &mut Vec<ServerAction>, conn: ConnId, payload: Payload) {
    let opcode = payload.opcode();
    match payload.into_frame() {
        Ok(frame) => actions.push(ServerAction::Send { conn, frame }),
        Err(e) => tracing::warn!(?opcode, error = %e, "server frame not encodable"),
    }
}

/// Opcodes of the frames sent to `conn`, in order.
pub fn sent_opcodes(actions: &[ServerAction], conn: ConnId) -> Vec<Opcode> {
    actions
        .iter()
        .filter_map(|a| match a {
            ServerAction::Send { conn: c, frame } if *c == conn => frame.header.opcode_enum(),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use tandem_proto::{Hello, IceCandidate};

    use super::*;

    fn frame(payload: Payload) -> Frame {
        payload.into_frame().unwrap()
    }

    fn hello_frame(client: &str) -> Frame {
        frame(Payload::Hello(Hello { version: 1, client_id: client.into() }))
    }

    fn hello(server: &mut MatchServer, client: &str) -> ConnId {
        let conn = server.connect();
        server.handle_frame(conn, &hello_frame(client));
        conn
    }

    fn pair(server: &mut MatchServer) -> (ConnId, ConnId) {
        let a = hello(server, "a");
        let b = hello(server, "b");
        server.handle_frame(a, &frame(Payload::Find));
        server.handle_frame(b, &frame(Payload::Find));
        (a, b)
    }

    fn first_to(actions: &[ServerAction], target: ConnId) -> Option<Payload> {
        actions.iter().find_map(|x| match x {
            ServerAction::Send { conn, frame } if *conn == target => Payload::from_frame(frame).ok(),
            _ => None,
        })
    }

    #[test]
    fn welcome_then_reconnected() {
        let mut server = MatchServer::new();
        let first = server.connect();
        let actions = server.handle_frame(first, &hello_frame("a"));
        assert_eq!(sent_opcodes(&actions, first), vec![Opcode::Welcome]);

        let second = server.connect();
        let actions = server.handle_frame(second, &hello_frame("a"));
        assert_eq!(sent_opcodes(&actions, second), vec![Opcode::Reconnected]);
        assert!(actions.contains(&ServerAction::Close { conn: first }));
        assert_eq!(server.connections(), 1);
    }

    #[test]
    fn frames_before_hello_rejected() {
        let mut server = MatchServer::new();
        let conn = server.connect();
        let actions = server.handle_frame(conn, &frame(Payload::Find));
        assert_eq!(first_to(&actions, conn), Some(Payload::Error(ErrorPayload::handshake_required())));
        assert_eq!(server.queue_len(), 0);
    }

    #[test]
    fn duplicate_hello_rejected() {
        let mut server = MatchServer::new();
        let conn = hello(&mut server, "a");
        let actions = server.handle_frame(conn, &hello_frame("a"));
        assert_eq!(sent_opcodes(&actions, conn), vec![Opcode::Error]);
    }

    #[test]
    fn first_queued_becomes_caller() {
        let mut server = MatchServer::new();
        let a = hello(&mut server, "a");
        let b = hello(&mut server, "b");

        let actions = server.handle_frame(a, &frame(Payload::Find));
        assert_eq!(sent_opcodes(&actions, a), vec![Opcode::Waiting, Opcode::QueueStatus]);

        let actions = server.handle_frame(b, &frame(Payload::Find));
        assert_eq!(first_to(&actions, a), Some(Payload::Matched(Matched { role: Role::Caller })));
        assert_eq!(first_to(&actions, b), Some(Payload::Matched(Matched { role: Role::Callee })));
        assert_eq!(server.partner_of("b"), Some("a"));
        assert_eq!(server.queue_len(), 0);
        assert_eq!(server.total_pairings(), 1);
    }

    #[test]
    fn repeated_find_keeps_queue_slot() {
        let mut server = MatchServer::new();
        let a = hello(&mut server, "a");
        server.handle_frame(a, &frame(Payload::Find));

        let actions = server.handle_frame(a, &frame(Payload::Find));
        assert_eq!(sent_opcodes(&actions, a), vec![Opcode::QueueStatus]);
        assert_eq!(server.queue_len(), 1);
    }

    #[test]
    fn relays_to_partner_only() {
        let mut server = MatchServer::new();
        let (a, b) = pair(&mut server);

        let actions = server.handle_frame(a, &frame(Payload::Candidate(IceCandidate::new("c1"))));
        assert_eq!(sent_opcodes(&actions, b), vec![Opcode::Candidate]);
        assert!(sent_opcodes(&actions, a).is_empty());
    }

    #[test]
    fn chat_send_arrives_as_chat_receive() {
        let mut server = MatchServer::new();
        let (a, b) = pair(&mut server);

        let chat = ChatPayload { id: "m1".into(), text: "hi".into(), timestamp: 1 };
        let actions = server.handle_frame(a, &frame(Payload::ChatSend(chat.clone())));
        assert_eq!(first_to(&actions, b), Some(Payload::ChatReceive(chat)));
    }

    #[test]
    fn relay_without_partner_is_error() {
        let mut server = MatchServer::new();
        let a = hello(&mut server, "a");
        let actions = server.handle_frame(a, &frame(Payload::Candidate(IceCandidate::new("c1"))));
        assert_eq!(first_to(&actions, a), Some(Payload::Error(ErrorPayload::no_partner())));
    }

    #[test]
    fn server_only_opcodes_rejected() {
        let mut server = MatchServer::new();
        let a = hello(&mut server, "a");
        let actions = server.handle_frame(a, &frame(Payload::Waiting));
        assert_eq!(sent_opcodes(&actions, a), vec![Opcode::Error]);
    }

    #[test]
    fn next_notifies_partner() {
        let mut server = MatchServer::new();
        let (a, b) = pair(&mut server);

        let actions = server.handle_frame(b, &frame(Payload::Next));
        assert_eq!(sent_opcodes(&actions, a), vec![Opcode::PartnerLeft]);
        assert_eq!(server.active_pairs(), 0);
    }

    #[test]
    fn disconnect_notifies_partner_and_orphan_on_return() {
        let mut server = MatchServer::new();
        let (a, b) = pair(&mut server);

        let actions = server.disconnect(a);
        assert_eq!(sent_opcodes(&actions, b), vec![Opcode::PartnerLeft]);

        let back = server.connect();
        let actions = server.handle_frame(back, &hello_frame("a"));
        assert_eq!(sent_opcodes(&actions, back), vec![Opcode::Reconnected, Opcode::PartnerLeft]);
    }

    #[test]
    fn detached_client_keeps_queue_slot_but_is_skipped() {
        let mut server = MatchServer::new();
        let a = hello(&mut server, "a");
        server.handle_frame(a, &frame(Payload::Find));
        server.disconnect(a);
        assert_eq!(server.queue_len(), 1);

        let b = hello(&mut server, "b");
        let actions = server.handle_frame(b, &frame(Payload::Find));
        assert_eq!(sent_opcodes(&actions, b), vec![Opcode::Waiting, Opcode::QueueStatus]);
        assert_eq!(server.queue_len(), 2);

        // a comes back still first in line and calls b
        let back = server.connect();
        let actions = server.handle_frame(back, &hello_frame("a"));
        assert_eq!(sent_opcodes(&actions, back), vec![Opcode::Reconnected, Opcode::Matched]);
        assert_eq!(first_to(&actions, b), Some(Payload::Matched(Matched { role: Role::Callee })));
        assert_eq!(server.queue_len(), 0);
    }

    #[test]
    fn returning_client_without_partner_gets_position() {
        let mut server = MatchServer::new();
        let a = hello(&mut server, "a");
        server.handle_frame(a, &frame(Payload::Find));
        server.disconnect(a);

        let back = server.connect();
        let actions = server.handle_frame(back, &hello_frame("a"));
        assert_eq!(sent_opcodes(&actions, back), vec![Opcode::Reconnected, Opcode::QueueStatus]);
    }

    #[test]
    fn expire_detached_frees_queue() {
        let mut server = MatchServer::new();
        let a = hello(&mut server, "a");
        let b = hello(&mut server, "b");
        server.handle_frame(a, &frame(Payload::Find));
        server.disconnect(a);
        server.handle_frame(b, &frame(Payload::Find));

        let actions = server.expire_detached();
        assert_eq!(server.queue_len(), 1);
        assert!(matches!(
            first_to(&actions, b),
            Some(Payload::QueueStatus(QueueStatus { position: 1, .. }))
        ));
    }

    #[test]
    fn reset_reaches_detached_client_on_return() {
        let mut server = MatchServer::new();
        let a = hello(&mut server, "a");
        server.handle_frame(a, &frame(Payload::Find));
        server.disconnect(a);

        assert!(server.reset_all().is_empty());

        let back = server.connect();
        let actions = server.handle_frame(back, &hello_frame("a"));
        assert_eq!(sent_opcodes(&actions, back), vec![Opcode::Reconnected, Opcode::Reset]);
    }

    #[test]
    fn reset_reaches_everyone() {
        let mut server = MatchServer::new();
        let a = hello(&mut server, "a");
        let b = hello(&mut server, "b");
        server.handle_frame(a, &frame(Payload::Find));

        let actions = server.reset_all();
        assert_eq!(sent_opcodes(&actions, a), vec![Opcode::Reset]);
        assert_eq!(sent_opcodes(&actions, b), vec![Opcode::Reset]);
        assert_eq!(server.queue_len(), 0);
    }
}
