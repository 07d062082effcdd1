// Console command grammar.
//
// A line starting with `/` is an administrative command; anything else is a
// message submission of the form `<user_id> <text>`.

use crate::core::rules::Severity;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("unknown command '/{0}', try /help")]
    Unknown(String),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("invalid user id '{0}'")]
    InvalidUserId(String),

    #[error("{0}")]
    InvalidArgument(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Message { user_id: u64, text: String },
    /// `minutes == 0` bans until an explicit unban
    Ban {
        user_id: u64,
        minutes: u32,
        reason: String,
    },
    Unban { user_id: u64 },
    Violations { user_id: u64 },
    Clear { user_id: u64 },
    Report,
    AddWord {
        category: String,
        word: String,
        severity: Severity,
    },
    AddCombo {
        word_a: String,
        word_b: String,
        category: String,
        severity: Severity,
    },
    Reload,
    Status,
    ResetClassifiers,
    Help,
    Quit,
}

pub const HELP: &str = "\
<user_id> <text>                           submit a message
/ban <user_id> <minutes> <reason>          ban a user (0 minutes = until unbanned)
/unban <user_id>                           lift a ban
/violations <user_id>                      show a user's moderation state
/clear <user_id>                           delete a user's violation history
/report                                    violations of the last 24 hours
/addword <category> <word> [severity]      add a stop word
/addcombo <a> <b> <category> [severity]    add a forbidden word pair
/reload                                    reload the rule document
/status                                    rules and classifier health
/reset-classifiers                         put skipped classifiers back in rotation
/quit                                      exit";

fn parse_user_id(raw: &str) -> Result<u64, ParseError> {
    raw.parse::<u64>()
        .map_err(|_| ParseError::InvalidUserId(raw.to_string()))
}

fn parse_severity(raw: Option<&str>) -> Result<Severity, ParseError> {
    match raw {
        Some(value) => value
            .parse::<Severity>()
            .map_err(|e| ParseError::InvalidArgument(e.to_string())),
        None => Ok(Severity::default()),
    }
}

impl Command {
    /// Parse one input line. Returns `Ok(None)` for blank lines.
    pub fn parse(line: &str) -> Result<Option<Command>, ParseError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }

        let Some(rest) = line.strip_prefix('/') else {
            let (user, text) = line
                .split_once(char::is_whitespace)
                .ok_or(ParseError::Usage("<user_id> <text>"))?;
            return Ok(Some(Command::Message {
                user_id: parse_user_id(user)?,
                text: text.trim().to_string(),
            }));
        };

        let mut args = rest.split_whitespace();
        let name = args.next().unwrap_or_default().to_lowercase();
        let args: Vec<&str> = args.collect();

        let command = match (name.as_str(), args.as_slice()) {
            ("ban", [user, minutes, reason @ ..]) if !reason.is_empty() => Command::Ban {
                user_id: parse_user_id(user)?,
                minutes: minutes.parse().map_err(|_| {
                    ParseError::InvalidArgument(format!("invalid minutes '{}'", minutes))
                })?,
                reason: reason.join(" "),
            },
            ("ban", _) => return Err(ParseError::Usage("/ban <user_id> <minutes> <reason>")),
            ("unban", [user]) => Command::Unban {
                user_id: parse_user_id(user)?,
            },
            ("unban", _) => return Err(ParseError::Usage("/unban <user_id>")),
            ("violations", [user]) => Command::Violations {
                user_id: parse_user_id(user)?,
            },
            ("violations", _) => return Err(ParseError::Usage("/violations <user_id>")),
            ("clear", [user]) => Command::Clear {
                user_id: parse_user_id(user)?,
            },
            ("clear", _) => return Err(ParseError::Usage("/clear <user_id>")),
            ("report", []) => Command::Report,
            ("addword", [category, word, severity @ ..]) if severity.len() <= 1 => {
                Command::AddWord {
                    category: category.to_string(),
                    word: word.to_string(),
                    severity: parse_severity(severity.first().copied())?,
                }
            }
            ("addword", _) => {
                return Err(ParseError::Usage("/addword <category> <word> [severity]"))
            }
            ("addcombo", [word_a, word_b, category, severity @ ..]) if severity.len() <= 1 => {
                Command::AddCombo {
                    word_a: word_a.to_string(),
                    word_b: word_b.to_string(),
                    category: category.to_string(),
                    severity: parse_severity(severity.first().copied())?,
                }
            }
            ("addcombo", _) => {
                return Err(ParseError::Usage(
                    "/addcombo <word_a> <word_b> <category> [severity]",
                ))
            }
            ("reload", []) => Command::Reload,
            ("status", []) => Command::Status,
            ("reset-classifiers", []) => Command::ResetClassifiers,
            ("help", _) => Command::Help,
            ("quit" | "exit", _) => Command::Quit,
            (other, _) => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Command {
        Command::parse(line).unwrap().unwrap()
    }

    #[test]
    fn test_message_submission() {
        assert_eq!(
            parse("42 hello   there"),
            Command::Message {
                user_id: 42,
                text: "hello   there".to_string(),
            }
        );
        assert_eq!(Command::parse("   ").unwrap(), None);
        assert_eq!(
            Command::parse("bob hi").unwrap_err(),
            ParseError::InvalidUserId("bob".to_string())
        );
        assert!(matches!(Command::parse("42"), Err(ParseError::Usage(_))));
    }

    #[test]
    fn test_ban_joins_reason() {
        assert_eq!(
            parse("/ban 7 30 repeated scam links"),
            Command::Ban {
                user_id: 7,
                minutes: 30,
                reason: "repeated scam links".to_string(),
            }
        );
        assert!(matches!(Command::parse("/ban 7 30"), Err(ParseError::Usage(_))));
        assert!(matches!(
            Command::parse("/ban 7 soon spam"),
            Err(ParseError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_rule_commands_default_severity() {
        assert_eq!(
            parse("/addword gambling casino"),
            Command::AddWord {
                category: "gambling".to_string(),
                word: "casino".to_string(),
                severity: Severity::Medium,
            }
        );
        assert_eq!(
            parse("/addcombo free money scam critical"),
            Command::AddCombo {
                word_a: "free".to_string(),
                word_b: "money".to_string(),
                category: "scam".to_string(),
                severity: Severity::Critical,
            }
        );
        assert!(matches!(
            Command::parse("/addword gambling casino extreme"),
            Err(ParseError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse("/REPORT"), Command::Report);
        assert_eq!(parse("/status"), Command::Status);
        assert_eq!(parse("/reset-classifiers"), Command::ResetClassifiers);
        assert_eq!(parse("/quit"), Command::Quit);
        assert_eq!(
            Command::parse("/frobnicate").unwrap_err(),
            ParseError::Unknown("frobnicate".to_string())
        );
    }
}
