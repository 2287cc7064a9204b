//! Slash-command model, independent of the Discord client library.
//!
//! Each interaction is answered twice: an immediate acknowledgment, then an
//! edit appending the outcome once the (possibly minutes long) work is done.

use crate::Outcome;

pub const PING: &str = "ping";
pub const SERVER: &str = "server";
pub const SERVER_UP: &str = "up";
pub const SERVER_DOWN: &str = "down";
pub const WHITELIST: &str = "whitelist";
pub const WHITELIST_USER: &str = "user";

pub const PONG: &str = "pong :ping_pong:";
pub const UNKNOWN_SUBCOMMAND: &str =
    "something has gone wrong, and you executed a command that doesn't exist. Congrats! :tada:";
/// Ephemeral follow-up when the acknowledgment could not be edited.
pub const SOMETHING_WENT_WRONG: &str = "something went wrong";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Ping,
    ServerUp,
    ServerDown,
    Whitelist(String),
    /// `server` with a sub-command we never registered
    UnknownSubcommand(String),
}

impl BotCommand {
    /// Map an invoked command to a [`BotCommand`]. Unregistered top-level
    /// names yield `None` and are ignored.
    pub fn parse(name: &str, subcommand: Option<&str>, user: Option<&str>) -> Option<Self> {
        match name {
            PING => Some(Self::Ping),
            SERVER => Some(match subcommand {
                Some(SERVER_UP) => Self::ServerUp,
                Some(SERVER_DOWN) => Self::ServerDown,
                other => Self::UnknownSubcommand(other.unwrap_or_default().to_string()),
            }),
            WHITELIST => Some(Self::Whitelist(user.unwrap_or_default().trim().to_string())),
            _ => None,
        }
    }

    pub fn acknowledgment(&self) -> String {
        match self {
            Self::Ping => PONG.to_string(),
            Self::ServerUp => "bringing up the server... ".to_string(),
            Self::ServerDown => {
                "bringing down the server (this might take a minute or two)... ".to_string()
            }
            Self::Whitelist(player) => format!("whitelisting player {player}..."),
            Self::UnknownSubcommand(_) => UNKNOWN_SUBCOMMAND.to_string(),
        }
    }

    /// Whether the acknowledgment is followed by work and an edit.
    pub fn has_followup(&self) -> bool {
        !matches!(self, Self::Ping | Self::UnknownSubcommand(_))
    }

    /// Acknowledgment with the outcome message appended.
    pub fn final_text(&self, outcome: &Outcome) -> String {
        format!("{}{}", self.acknowledgment(), outcome.message)
    }
}

/// Bot activity reflecting the last known server state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Up { address: String },
    Down,
}

impl Presence {
    pub fn text(&self) -> String {
        match self {
            Self::Up { address } => format!("server up @ {address}"),
            Self::Down => "server down".to_string(),
        }
    }

    /// Presence implied by a finished lifecycle command. Failed commands
    /// leave the presence alone.
    pub fn after(command: &BotCommand, outcome: &Outcome, address: &str) -> Option<Self> {
        if !outcome.success {
            return None;
        }
        match command {
            BotCommand::ServerUp => Some(Self::Up {
                address: address.to_string(),
            }),
            BotCommand::ServerDown => Some(Self::Down),
            _ => None,
        }
    }

    /// Presence implied by an up-check.
    pub fn observed(up: bool, address: &str) -> Self {
        if up {
            Self::Up {
                address: address.to_string(),
            }
        } else {
            Self::Down
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(BotCommand::parse("ping", None, None), Some(BotCommand::Ping));
        assert_eq!(
            BotCommand::parse("server", Some("up"), None),
            Some(BotCommand::ServerUp)
        );
        assert_eq!(
            BotCommand::parse("server", Some("down"), None),
            Some(BotCommand::ServerDown)
        );
        assert_eq!(
            BotCommand::parse("whitelist", None, Some("Notch")),
            Some(BotCommand::Whitelist("Notch".to_string()))
        );
        assert_eq!(
            BotCommand::parse("server", Some("restart"), None),
            Some(BotCommand::UnknownSubcommand("restart".to_string()))
        );
        assert_eq!(BotCommand::parse("teleport", None, None), None);
    }

    #[test]
    fn test_whitelist_name_is_trimmed_once() {
        let command = BotCommand::parse("whitelist", None, Some("  Notch \t")).unwrap();

        assert_eq!(command, BotCommand::Whitelist("Notch".to_string()));
        assert_eq!(command.acknowledgment(), "whitelisting player Notch...");
        assert_eq!(
            command.final_text(&Outcome::ok("done!")),
            "whitelisting player Notch...done!"
        );
    }

    #[test]
    fn test_acknowledgments() {
        assert_eq!(BotCommand::Ping.acknowledgment(), "pong :ping_pong:");
        assert_eq!(
            BotCommand::ServerUp.acknowledgment(),
            "bringing up the server... "
        );
        assert_eq!(
            BotCommand::Whitelist("Notch".to_string()).acknowledgment(),
            "whitelisting player Notch..."
        );
        assert!(
            BotCommand::UnknownSubcommand(String::new())
                .acknowledgment()
                .contains("doesn't exist")
        );
    }

    #[test]
    fn test_final_text_appends_outcome() {
        let text = BotCommand::ServerDown.final_text(&Outcome::ok("it was already stopped!"));
        assert_eq!(
            text,
            "bringing down the server (this might take a minute or two)... it was already stopped!"
        );
    }

    #[test]
    fn test_only_work_commands_follow_up() {
        assert!(!BotCommand::Ping.has_followup());
        assert!(!BotCommand::UnknownSubcommand("x".to_string()).has_followup());
        assert!(BotCommand::ServerUp.has_followup());
        assert!(BotCommand::Whitelist("Notch".to_string()).has_followup());
    }

    #[test]
    fn test_presence_after_commands() {
        let address = "garage.prototypical.pro";

        let up = Presence::after(&BotCommand::ServerUp, &Outcome::ok("done!"), address);
        assert_eq!(up.unwrap().text(), "server up @ garage.prototypical.pro");

        let down = Presence::after(&BotCommand::ServerDown, &Outcome::ok("done!"), address);
        assert_eq!(down, Some(Presence::Down));

        assert_eq!(
            Presence::after(&BotCommand::ServerUp, &Outcome::failed("failed"), address),
            None
        );
        assert_eq!(Presence::observed(false, address).text(), "server down");
    }
}
