//! The operator command grammar: one trimmed line in, a typed command or a
//! validation error out. Matching is case-sensitive and argument validation
//! happens here, before anything touches the channel.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    /// `open`/`unlock` with an optional cycle length; defaults to 3 seconds.
    Unlock { seconds: u8 },
    Lock,
    SystemUnlock,
    SystemLock,
    Connect,
    Disconnect,
    Ping,
    Broadcast(String),
    /// `msg`/`message`: the text is sent to the peer unmodified.
    Message(String),
    Clear,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("The number of seconds must be a positive, whole integer below 10.")]
    InvalidSeconds,
    #[error("Invalid or missing command argument(s).")]
    InvalidArgument,
    #[error("Invalid syntax. You must include a message!")]
    MissingMessage,
    #[error("The specified command was not recognized or contains invalid syntax.")]
    Unrecognized,
}

pub fn parse(line: &str) -> Result<Command, CommandError> {
    let line = line.trim();
    let (head, rest) = split_head(line);
    match head {
        "help" if rest.is_empty() => Ok(Command::Help),
        "open" | "unlock" => parse_unlock(rest),
        "lock" if rest.is_empty() => Ok(Command::Lock),
        "system" => match rest {
            "unlock" => Ok(Command::SystemUnlock),
            "lock" => Ok(Command::SystemLock),
            _ => Err(CommandError::InvalidArgument),
        },
        "connect" if rest.is_empty() => Ok(Command::Connect),
        "disconnect" if rest.is_empty() => Ok(Command::Disconnect),
        "ping" if rest.is_empty() => Ok(Command::Ping),
        "broadcast" => {
            if rest.is_empty() {
                Err(CommandError::MissingMessage)
            } else {
                Ok(Command::Broadcast(rest.to_string()))
            }
        }
        "msg" | "message" => {
            if rest.is_empty() {
                Err(CommandError::MissingMessage)
            } else {
                Ok(Command::Message(rest.to_string()))
            }
        }
        "cls" | "clear" if rest.is_empty() => Ok(Command::Clear),
        _ => Err(CommandError::Unrecognized),
    }
}

// First word plus everything after the first space, verbatim.
fn split_head(line: &str) -> (&str, &str) {
    match line.find(' ') {
        Some(i) => (&line[..i], &line[i + 1..]),
        None => (line, ""),
    }
}

fn parse_unlock(rest: &str) -> Result<Command, CommandError> {
    if rest.is_empty() {
        return Ok(Command::Unlock { seconds: 3 });
    }
    let seconds: i64 = rest
        .trim()
        .parse()
        .map_err(|_| CommandError::InvalidSeconds)?;
    if !(1..=9).contains(&seconds) {
        return Err(CommandError::InvalidSeconds);
    }
    Ok(Command::Unlock {
        seconds: seconds as u8,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlock_accepts_one_through_nine_only() {
        for s in 1..=9u8 {
            assert_eq!(
                parse(&format!("open {s}")),
                Ok(Command::Unlock { seconds: s })
            );
            assert_eq!(
                parse(&format!("unlock {s}")),
                Ok(Command::Unlock { seconds: s })
            );
        }
        for bad in ["open 0", "open 10", "open -1", "open abc", "open 15", "open 3 4"] {
            assert_eq!(parse(bad), Err(CommandError::InvalidSeconds), "{bad}");
        }
    }

    #[test]
    fn unlock_defaults_to_three_seconds() {
        assert_eq!(parse("open"), Ok(Command::Unlock { seconds: 3 }));
        assert_eq!(parse("unlock"), Ok(Command::Unlock { seconds: 3 }));
    }

    #[test]
    fn exact_word_commands() {
        assert_eq!(parse("help"), Ok(Command::Help));
        assert_eq!(parse("lock"), Ok(Command::Lock));
        assert_eq!(parse("connect"), Ok(Command::Connect));
        assert_eq!(parse("disconnect"), Ok(Command::Disconnect));
        assert_eq!(parse("ping"), Ok(Command::Ping));
        assert_eq!(parse("cls"), Ok(Command::Clear));
        assert_eq!(parse("clear"), Ok(Command::Clear));
    }

    #[test]
    fn exact_word_commands_reject_trailing_arguments() {
        for bad in ["lock now", "ping 1", "connect x", "help me"] {
            assert_eq!(parse(bad), Err(CommandError::Unrecognized), "{bad}");
        }
    }

    #[test]
    fn system_requires_a_known_argument() {
        assert_eq!(parse("system unlock"), Ok(Command::SystemUnlock));
        assert_eq!(parse("system lock"), Ok(Command::SystemLock));
        assert_eq!(parse("system"), Err(CommandError::InvalidArgument));
        assert_eq!(parse("system reboot"), Err(CommandError::InvalidArgument));
    }

    #[test]
    fn broadcast_and_message_need_text() {
        assert_eq!(
            parse("broadcast hello there"),
            Ok(Command::Broadcast("hello there".to_string()))
        );
        assert_eq!(parse("msg hi"), Ok(Command::Message("hi".to_string())));
        assert_eq!(parse("message hi"), Ok(Command::Message("hi".to_string())));
        assert_eq!(parse("broadcast"), Err(CommandError::MissingMessage));
        assert_eq!(parse("msg"), Err(CommandError::MissingMessage));
        assert_eq!(parse("message"), Err(CommandError::MissingMessage));
    }

    #[test]
    fn input_is_trimmed_before_matching() {
        assert_eq!(parse("  ping  "), Ok(Command::Ping));
    }

    #[test]
    fn unknown_lines_are_unrecognized() {
        for bad in ["frobnicate", "OPEN", "Lock", "#ping"] {
            assert_eq!(parse(bad), Err(CommandError::Unrecognized), "{bad}");
        }
    }
}
