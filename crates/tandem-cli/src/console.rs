//! Console loop.
//!
//! Runs the runtime in the same task as the stdin reader so the runtime
//! future needs no `Send`. Each published [`MatchView`] is compared with the
//! previous one and the differences are logged.

use tandem_client::{Intent, MatchView, Runtime, RuntimeHandle};
use tandem_core::{Environment, MediaSource, Origin, PeerConnector};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::{
    command::{self, Command},
    error::CliError,
};

/// Drive `runtime` from stdin until `/quit`, end of input, or a runtime
/// error.
pub async fn run<C, S, E>(runtime: Runtime<C, S, E>, handle: RuntimeHandle) -> Result<(), CliError>
where
    C: PeerConnector,
    S: MediaSource,
    E: Environment,
{
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut view = handle.watch();
    let mut last = view.borrow_and_update().clone();

    tracing::info!("{}", command::HELP);

    let driver = runtime.run();
    tokio::pin!(driver);

    loop {
        tokio::select! {
            result = &mut driver => return Ok(result?),

            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => submit(&handle, &line).await,
                None => {
                    tracing::info!("end of input, leaving");
                    stdin_open = false;
                    // Runtime may already be gone; the driver arm reports it
                    let _ = handle.send(Intent::Shutdown).await;
                },
            },

            Ok(()) = view.changed() => {
                let next = view.borrow_and_update().clone();
                for line in summarize(&last, &next) {
                    tracing::info!(target: "tandem", "{line}");
                }
                last = next;
            },
        }
    }
}

async fn submit(handle: &RuntimeHandle, line: &str) {
    match command::parse(line) {
        Ok(Some(Command::Intent(intent))) => {
            if let Err(e) = handle.send(intent).await {
                tracing::warn!(error = %e, "intent not delivered");
            }
        },
        Ok(Some(Command::Help)) => tracing::info!("{}", command::HELP),
        Ok(None) => {},
        Err(e) => tracing::warn!("{e}"),
    }
}

/// Human-readable lines for what changed between two snapshots.
pub fn summarize(prev: &MatchView, next: &MatchView) -> Vec<String> {
    let mut out = Vec::new();

    if prev.link != next.link {
        out.push(format!("link: {:?}", next.link));
    }
    if prev.state != next.state {
        match next.role.filter(|_| next.has_session()) {
            Some(role) => out.push(format!("{} ({role})", next.state)),
            None => out.push(next.state.to_string()),
        }
    }
    if let Some(queue) = next.queue
        && prev.queue.map(|q| q.position) != Some(queue.position)
    {
        out.push(format!("queue position {} (about {}s)", queue.position, queue.eta_seconds));
    }
    if prev.status != next.status
        && let Some(status) = &next.status
    {
        out.push(status.clone());
    }
    if prev.media != next.media {
        let on_off = |on: bool| if on { "on" } else { "off" };
        out.push(format!(
            "mic {}, camera {}",
            on_off(next.media.audio_enabled),
            on_off(next.media.video_enabled)
        ));
    }
    if next.remote_tracks > prev.remote_tracks {
        out.push(format!("receiving {} remote track(s)", next.remote_tracks));
    }

    // A shorter log means a new match; everything in it is new
    let seen = if next.chat.len() >= prev.chat.len() { prev.chat.len() } else { 0 };
    for message in &next.chat[seen..] {
        match message.origin {
            Origin::Remote => out.push(format!("partner: {}", message.text)),
            Origin::Local => out.push(format!("you: {}", message.text)),
        }
    }

    out
}
