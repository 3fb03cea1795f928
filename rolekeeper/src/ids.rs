//! Snowflake identifiers for Discord entities.
//!
//! Discord ids are 64-bit snowflakes. They travel as decimal strings in JSON
//! and as INTEGER columns in SQLite (reinterpreted as `i64`).

use std::fmt;
use std::str::FromStr;

use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error returned when a mention or raw id cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("not a valid {kind} id: {input:?}")]
pub struct ParseIdError {
    pub kind: &'static str,
    pub input: String,
}

macro_rules! snowflake {
    ($(#[$meta:meta])* $name:ident, $kind:literal, [$($prefix:literal),*]) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u64);

        impl $name {
            pub fn get(self) -> u64 {
                self.0
            }

            /// Parse either a raw id or one of the mention forms for this kind.
            pub fn parse(input: &str) -> Result<Self, ParseIdError> {
                let s = input.trim();
                let prefixes: &[&str] = &[$($prefix),*];
                let digits = prefixes
                    .iter()
                    .find_map(|p| s.strip_prefix(p).and_then(|r| r.strip_suffix('>')))
                    .unwrap_or(s);
                digits
                    .parse::<u64>()
                    .ok()
                    .filter(|id| *id != 0)
                    .map($name)
                    .ok_or_else(|| ParseIdError { kind: $kind, input: input.to_string() })
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl ToSql for $name {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.0 as i64))
            }
        }

        impl FromSql for $name {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                i64::column_result(value).map(|v| $name(v as u64))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse::<u64>().map($name).map_err(serde::de::Error::custom)
            }
        }
    };
}

snowflake!(
    /// A member (subject or grantor).
    UserId, "user", ["<@!", "<@"]
);
snowflake!(RoleId, "role", ["<@&"]);
snowflake!(GuildId, "guild", []);
snowflake!(ChannelId, "channel", ["<#"]);

impl UserId {
    pub fn mention(self) -> String {
        format!("<@{}>", self.0)
    }
}

impl RoleId {
    pub fn mention(self) -> String {
        format!("<@&{}>", self.0)
    }
}

impl ChannelId {
    pub fn mention(self) -> String {
        format!("<#{}>", self.0)
    }
}
