//! Stable identifier newtypes shared across the bridge.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use ulid::Ulid;

#[derive(Debug, Error)]
pub enum IdError {
    #[error("invalid stream DID: {0:?}")]
    InvalidDid(String),
    #[error("invalid guild/space key: {0:?}")]
    InvalidGuildSpaceKey(String),
}

/// Opaque `did:<method>:<id>` identifying a Roomy space's event stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamDid(String);

impl StreamDid {
    pub fn parse(raw: impl Into<String>) -> Result<Self, IdError> {
        let raw = raw.into();
        let mut parts = raw.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("did"), Some(method), Some(id)) if !method.is_empty() && !id.is_empty() => {
                Ok(Self(raw))
            }
            _ => Err(IdError::InvalidDid(raw)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamDid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for StreamDid {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Discord's 64-bit snowflake, carried as a decimal string at boundaries.
pub type Snowflake = String;

/// Composite key for a bridged guild/space pair: `"<guild>:<space>"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GuildSpaceKey {
    pub guild_id: Snowflake,
    pub space_id: StreamDid,
}

impl GuildSpaceKey {
    pub fn new(guild_id: impl Into<String>, space_id: StreamDid) -> Self {
        Self {
            guild_id: guild_id.into(),
            space_id,
        }
    }
}

impl fmt::Display for GuildSpaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.guild_id, self.space_id)
    }
}

impl FromStr for GuildSpaceKey {
    type Err = IdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (guild_id, space_id) = s
            .split_once(':')
            .ok_or_else(|| IdError::InvalidGuildSpaceKey(s.to_string()))?;
        let space_id = StreamDid::parse(space_id)
            .map_err(|_| IdError::InvalidGuildSpaceKey(s.to_string()))?;
        Ok(Self {
            guild_id: guild_id.to_string(),
            space_id,
        })
    }
}

/// Monotonically non-decreasing per-space resume cursor.
pub type StreamIndex = u64;

/// The synthetic DID under which a Discord user's profile is mirrored.
pub fn discord_user_did(discord_user_id: &str) -> String {
    format!("did:discord:{discord_user_id}")
}
