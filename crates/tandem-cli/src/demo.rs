//! Offline demo: an in-process matchmaking service and one echoing partner.
//!
//! The partner is a full client runtime with mock transports and synthetic
//! media. It joins the queue at once, echoes every chat message it
//! receives, and goes back to the queue whenever its partner leaves.

use tandem_client::{ClientConfig, Intent, MatchView, Runtime, RuntimeHandle, SystemEnv};
use tandem_core::{ClientIdentity, Origin, SyntheticMediaSource};
use tandem_harness::{MockConnector, SimDialer, SimNetwork};
use tokio::task::JoinHandle;

/// Running demo service with its echo partner.
pub struct Demo {
    network: SimNetwork,
    tasks: Vec<JoinHandle<()>>,
}

impl Demo {
    /// Start the service and the partner on the current runtime.
    pub fn start(config: &ClientConfig) -> Self {
        let network = SimNetwork::start();
        let env = SystemEnv::new();

        let (runtime, handle) = Runtime::connect(
            config,
            env.clone(),
            ClientIdentity::generate(&env),
            network.dialer(),
            MockConnector::new(),
            SyntheticMediaSource::new(),
        );

        let runner = tokio::spawn(async move {
            if let Err(e) = runtime.run().await {
                tracing::warn!(error = %e, "echo partner stopped");
            }
        });
        let echo = tokio::spawn(echo(handle));

        tracing::info!("demo mode: in-process service with one echo partner");
        Self { network, tasks: vec![runner, echo] }
    }

    /// Dialer for the local user's client.
    pub fn dialer(&self) -> SimDialer {
        self.network.dialer()
    }

    /// Stop the partner and the service.
    pub fn stop(self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn echo(handle: RuntimeHandle) {
    if handle.send(Intent::Start).await.is_err() {
        return;
    }

    let mut view = handle.watch();
    let mut seen = 0;
    while view.changed().await.is_ok() {
        let snapshot = view.borrow_and_update().clone();
        for reply in replies(&snapshot, &mut seen) {
            if handle.send(Intent::Chat(reply)).await.is_err() {
                return;
            }
        }
    }
}

/// Echo lines owed for remote messages past `seen`; advances `seen`.
fn replies(view: &MatchView, seen: &mut usize) -> Vec<String> {
    if view.chat.len() < *seen {
        *seen = 0;
    }
    let replies = view.chat[*seen..]
        .iter()
        .filter(|m| m.origin == Origin::Remote)
        .map(|m| format!("echo: {}", m.text))
        .collect();
    *seen = view.chat.len();
    replies
}

#[cfg(test)]
mod tests {
    use tandem_core::ChatMessage;

    use super::*;

    fn view(messages: &[(&str, Origin)]) -> MatchView {
        let chat = messages
            .iter()
            .map(|(text, origin)| ChatMessage {
                id: (*text).to_string(),
                text: (*text).to_string(),
                timestamp: 0,
                origin: *origin,
            })
            .collect();
        MatchView { chat, ..MatchView::default() }
    }

    #[test]
    fn echoes_only_new_remote_messages() {
        let mut seen = 0;

        let replies_1 = replies(&view(&[("hi", Origin::Remote)]), &mut seen);
        assert_eq!(replies_1, vec!["echo: hi".to_string()]);

        let replies_2 = replies(
            &view(&[("hi", Origin::Remote), ("echo: hi", Origin::Local), ("more", Origin::Remote)]),
            &mut seen,
        );
        assert_eq!(replies_2, vec!["echo: more".to_string()]);
        assert_eq!(seen, 3);
    }

    #[test]
    fn new_match_resets() {
        let mut seen = 5;
        let replies = replies(&view(&[("new", Origin::Remote)]), &mut seen);
        assert_eq!(replies, vec!["echo: new".to_string()]);
    }
}
