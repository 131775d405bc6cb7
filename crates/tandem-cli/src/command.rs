//! Input line parsing.
//!
//! | Line                        | Meaning                      |
//! |-----------------------------|------------------------------|
//! | `/start`                    | acquire media, join queue    |
//! | `/next`                     | skip the current partner     |
//! | `/stop`                     | leave queue and match        |
//! | `/mute audio` `/mute video` | mute a device                |
//! | `/unmute audio`, ...        | unmute a device              |
//! | `/quit`                     | stop and exit                |
//! | `/help`                     | list commands                |
//! | anything else               | chat message                 |

use tandem_client::Intent;

use crate::error::CommandError;

/// Text shown for `/help`.
pub const HELP: &str =
    "/start  /next  /stop  /mute audio|video  /unmute audio|video  /quit  (other text is chat)";

/// What a line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Forward to the runtime
    Intent(Intent),
    /// Show the command list
    Help,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<Command>, CommandError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Intent(Intent::Chat(line.to_string()))));
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default().to_ascii_lowercase();
    let arg = words.next();

    let intent = match name.as_str() {
        "start" => Intent::Start,
        "next" | "skip" => Intent::Next,
        "stop" => Intent::Stop,
        "quit" | "exit" => Intent::Shutdown,
        "mute" => device(arg, false)?,
        "unmute" => device(arg, true)?,
        "help" | "?" => return Ok(Some(Command::Help)),
        _ => return Err(CommandError::Unknown(name)),
    };
    Ok(Some(Command::Intent(intent)))
}

fn device(arg: Option<&str>, enabled: bool) -> Result<Intent, CommandError> {
    match arg.map(str::to_ascii_lowercase).as_deref() {
        Some("audio" | "mic") => Ok(Intent::SetAudio(enabled)),
        Some("video" | "cam") => Ok(Intent::SetVideo(enabled)),
        other => Err(CommandError::Device(other.unwrap_or_default().to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(line: &str) -> Option<Intent> {
        match parse(line) {
            Ok(Some(Command::Intent(intent))) => Some(intent),
            _ => None,
        }
    }

    #[test]
    fn slash_commands() {
        assert_eq!(intent("/start"), Some(Intent::Start));
        assert_eq!(intent("  /NEXT "), Some(Intent::Next));
        assert_eq!(intent("/stop"), Some(Intent::Stop));
        assert_eq!(intent("/quit"), Some(Intent::Shutdown));
        assert_eq!(intent("/mute audio"), Some(Intent::SetAudio(false)));
        assert_eq!(intent("/unmute Video"), Some(Intent::SetVideo(true)));
        assert_eq!(parse("/help").unwrap(), Some(Command::Help));
    }

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(intent("  hi there  "), Some(Intent::Chat("hi there".to_string())));
    }

    #[test]
    fn blank_is_nothing() {
        assert_eq!(parse("   ").unwrap(), None);
    }

    #[test]
    fn bad_commands_rejected() {
        assert_eq!(parse("/dance").unwrap_err(), CommandError::Unknown("dance".to_string()));
        assert_eq!(parse("/mute").unwrap_err(), CommandError::Device(String::new()));
        assert_eq!(parse("/mute speaker").unwrap_err(), CommandError::Device("speaker".to_string()));
    }
}
