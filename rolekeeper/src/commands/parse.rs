//! Textual command grammar.
//!
//! ```text
//! grant <member> <role> [days]        (alias: assign)
//! revoke <member> <role>              (alias: remove)
//! prolong <member> <role> <days>
//! list-mine                           (alias: myroles)
//! list-role <role>                    (alias: list)
//! list-expiring                       (alias: expires)
//! set-log-channel <channel>           (alias: logchannel)
//! disable-log-channel                 (alias: disablelog)
//! random-role <role> <days> <count>   (alias: randomrole)
//! help
//! ```
//!
//! Members, roles and channels may be mentions or raw ids. A leading `!` or
//! `/` is ignored.

use std::str::FromStr;

use super::Command;
use crate::ids::{ChannelId, ParseIdError, RoleId, UserId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`, try `help`")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error(transparent)]
    BadId(#[from] ParseIdError),
    #[error("`{0}` is not a whole number")]
    BadNumber(String),
}

pub const GRANT_USAGE: &str = "grant <member> <role> [days]";
pub const REVOKE_USAGE: &str = "revoke <member> <role>";
pub const PROLONG_USAGE: &str = "prolong <member> <role> <days>";
pub const LIST_ROLE_USAGE: &str = "list-role <role>";
pub const SET_LOG_USAGE: &str = "set-log-channel <channel>";
pub const RANDOM_ROLE_USAGE: &str = "random-role <role> <days> <count>";

fn number<T: FromStr>(s: &str) -> Result<T, ParseError> {
    s.parse::<T>().map_err(|_| ParseError::BadNumber(s.to_string()))
}

fn arity(args: &[&str], min: usize, max: usize, usage: &'static str) -> Result<(), ParseError> {
    if args.len() < min || args.len() > max {
        return Err(ParseError::Usage(usage));
    }
    Ok(())
}

impl FromStr for Command {
    type Err = ParseError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        let text = text
            .strip_prefix('!')
            .or_else(|| text.strip_prefix('/'))
            .unwrap_or(text);
        let mut words = text.split_whitespace();
        let name = words.next().ok_or(ParseError::Empty)?.to_lowercase();
        let args: Vec<&str> = words.collect();

        let cmd = match name.as_str() {
            "grant" | "assign" => {
                arity(&args, 2, 3, GRANT_USAGE)?;
                Command::Grant {
                    subject: UserId::parse(args[0])?,
                    role: RoleId::parse(args[1])?,
                    days: args.get(2).map(|d| number(d)).transpose()?,
                }
            }
            "revoke" | "remove" => {
                arity(&args, 2, 2, REVOKE_USAGE)?;
                Command::Revoke {
                    subject: UserId::parse(args[0])?,
                    role: RoleId::parse(args[1])?,
                }
            }
            "prolong" => {
                arity(&args, 3, 3, PROLONG_USAGE)?;
                Command::Prolong {
                    subject: UserId::parse(args[0])?,
                    role: RoleId::parse(args[1])?,
                    days: number(args[2])?,
                }
            }
            "list-mine" | "myroles" => Command::ListMine,
            "list-role" | "list" => {
                arity(&args, 1, 1, LIST_ROLE_USAGE)?;
                Command::ListRole {
                    role: RoleId::parse(args[0])?,
                }
            }
            "list-expiring" | "expires" => Command::ListExpiring,
            "set-log-channel" | "logchannel" => {
                arity(&args, 1, 1, SET_LOG_USAGE)?;
                Command::SetLogChannel {
                    channel: ChannelId::parse(args[0])?,
                }
            }
            "disable-log-channel" | "disablelog" => Command::DisableLogChannel,
            "random-role" | "randomrole" => {
                arity(&args, 3, 3, RANDOM_ROLE_USAGE)?;
                Command::RandomRole {
                    role: RoleId::parse(args[0])?,
                    days: number(args[1])?,
                    count: number(args[2])?,
                }
            }
            "help" | "h" => Command::Help,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(cmd)
    }
}
