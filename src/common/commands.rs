use thiserror::Error;

use super::types::{Channel, Position};

/// A line typed into the interactive console.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Join { name: String },
    Leave { name: String },
    /// Post on a broadcast-style channel (global, team, custom).
    Say {
        name: String,
        channel: Channel,
        text: String,
    },
    Whisper {
        from: String,
        to: String,
        text: String,
    },
    Near { name: String, text: String },
    /// Push a position into the authority's presence table.
    Position { name: String, position: Position },
    Mute { name: String, target: String },
    Unmute { name: String, target: String },
    System { text: String },
    /// `None` means the whole buffer.
    History { count: Option<usize> },
    Settings,
    Cooldown { secs: f64 },
    Help,
    Quit,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("unknown command `{0}` (try /help)")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("not a number: `{0}`")]
    Number(String),
}

pub const HELP: &str = "\
/join <name>                 register a participant
/leave <name>                unregister a participant
/say <name> <text>           global message
/team <name> <text>          team message
/custom <name> <text>        custom-channel message
/whisper <from> <to> <text>  private message
/near <name> <text>          proximity message
/pos <name> <x> <y> <z>      move a participant
/mute <name> <target>        mute locally
/unmute <name> <target>      unmute locally
/system <text>               system broadcast
/history [n]                 show recent history
/settings                    show current settings
/cooldown <secs>             change the message cooldown
/quit                        exit";

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        let (head, rest) = split_word(line);

        match head {
            "/join" => one_word(rest, "/join <name>").map(|name| ConsoleCommand::Join { name }),
            "/leave" => one_word(rest, "/leave <name>").map(|name| ConsoleCommand::Leave { name }),
            "/say" => say(rest, Channel::Global, "/say <name> <text>"),
            "/team" => say(rest, Channel::Team, "/team <name> <text>"),
            "/custom" => say(rest, Channel::Custom, "/custom <name> <text>"),
            "/whisper" => {
                const USAGE: &str = "/whisper <from> <to> <text>";
                let (from, rest) = split_word(rest);
                let (to, text) = split_word(rest);
                if from.is_empty() || to.is_empty() {
                    return Err(ParseError::Usage(USAGE));
                }
                Ok(ConsoleCommand::Whisper {
                    from: from.to_string(),
                    to: to.to_string(),
                    text: text.to_string(),
                })
            }
            "/near" => {
                let (name, text) = name_and_text(rest, "/near <name> <text>")?;
                Ok(ConsoleCommand::Near { name, text })
            }
            "/pos" => {
                const USAGE: &str = "/pos <name> <x> <y> <z>";
                let parts: Vec<&str> = rest.split_whitespace().collect();
                let [name, x, y, z] = parts.as_slice() else {
                    return Err(ParseError::Usage(USAGE));
                };
                Ok(ConsoleCommand::Position {
                    name: name.to_string(),
                    position: Position::new(number(x)?, number(y)?, number(z)?),
                })
            }
            "/mute" | "/unmute" => {
                let parts: Vec<&str> = rest.split_whitespace().collect();
                let [name, target] = parts.as_slice() else {
                    return Err(ParseError::Usage("/mute <name> <target>"));
                };
                let (name, target) = (name.to_string(), target.to_string());
                Ok(if head == "/mute" {
                    ConsoleCommand::Mute { name, target }
                } else {
                    ConsoleCommand::Unmute { name, target }
                })
            }
            "/system" => {
                if rest.is_empty() {
                    return Err(ParseError::Usage("/system <text>"));
                }
                Ok(ConsoleCommand::System {
                    text: rest.to_string(),
                })
            }
            "/history" => {
                let count = match rest {
                    "" => None,
                    n => Some(
                        n.parse::<usize>()
                            .map_err(|_| ParseError::Number(n.to_string()))?,
                    ),
                };
                Ok(ConsoleCommand::History { count })
            }
            "/settings" => Ok(ConsoleCommand::Settings),
            "/cooldown" => {
                let secs = one_word(rest, "/cooldown <secs>")?;
                Ok(ConsoleCommand::Cooldown {
                    secs: number(&secs)?,
                })
            }
            "/help" => Ok(ConsoleCommand::Help),
            "/quit" | "/exit" => Ok(ConsoleCommand::Quit),
            other => Err(ParseError::Unknown(other.to_string())),
        }
    }
}

fn split_word(input: &str) -> (&str, &str) {
    let input = input.trim_start();
    match input.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim_start()),
        None => (input, ""),
    }
}

fn one_word(rest: &str, usage: &'static str) -> Result<String, ParseError> {
    let (word, tail) = split_word(rest);
    if word.is_empty() || !tail.is_empty() {
        return Err(ParseError::Usage(usage));
    }
    Ok(word.to_string())
}

fn name_and_text(rest: &str, usage: &'static str) -> Result<(String, String), ParseError> {
    let (name, text) = split_word(rest);
    if name.is_empty() {
        return Err(ParseError::Usage(usage));
    }
    Ok((name.to_string(), text.to_string()))
}

fn say(rest: &str, channel: Channel, usage: &'static str) -> Result<ConsoleCommand, ParseError> {
    let (name, text) = name_and_text(rest, usage)?;
    Ok(ConsoleCommand::Say {
        name,
        channel,
        text,
    })
}

fn number(raw: &str) -> Result<f64, ParseError> {
    raw.parse::<f64>()
        .map_err(|_| ParseError::Number(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_whisper_with_spaces_in_text() {
        let cmd = ConsoleCommand::parse("/whisper alice bob  hello there ").unwrap();
        assert_eq!(
            cmd,
            ConsoleCommand::Whisper {
                from: "alice".into(),
                to: "bob".into(),
                text: "hello there".into(),
            }
        );
    }

    #[test]
    fn say_allows_empty_text() {
        // The empty-content rejection belongs to the client precheck, not the parser.
        let cmd = ConsoleCommand::parse("/say alice").unwrap();
        assert_eq!(
            cmd,
            ConsoleCommand::Say {
                name: "alice".into(),
                channel: Channel::Global,
                text: String::new(),
            }
        );
    }

    #[test]
    fn parses_position_and_history() {
        assert_eq!(
            ConsoleCommand::parse("/pos bob 1 2.5 -3").unwrap(),
            ConsoleCommand::Position {
                name: "bob".into(),
                position: Position::new(1.0, 2.5, -3.0),
            }
        );
        assert_eq!(
            ConsoleCommand::parse("/history 5").unwrap(),
            ConsoleCommand::History { count: Some(5) }
        );
        assert_eq!(
            ConsoleCommand::parse("/history").unwrap(),
            ConsoleCommand::History { count: None }
        );
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(
            ConsoleCommand::parse("/dance"),
            Err(ParseError::Unknown("/dance".into()))
        );
        assert!(matches!(
            ConsoleCommand::parse("/pos bob 1 2"),
            Err(ParseError::Usage(_))
        ));
        assert_eq!(
            ConsoleCommand::parse("/cooldown soon"),
            Err(ParseError::Number("soon".into()))
        );
    }
}
