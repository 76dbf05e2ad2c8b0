//! Blockd Wire Protocol
//!
//! Commands, responses and status codes exchanged with a lock server,
//! plus newline framing shared by every codec.

mod codec;
mod frame;

pub use codec::{Codec, CodecKind, JsonCodec, TextCodec};
pub use frame::{line_reader, read_line, try_read_line, write_line, LineReader};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Token the server sends as soon as a client connects
pub const GREETING: &str = "IMUSTBLOCKYOU";

/// Largest inbound message accepted, excluding the line terminator
pub const MAX_MESSAGE_BYTES: usize = 1024;

/// Lock contention mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LockMode {
    #[serde(rename = "R")]
    Read,
    #[default]
    #[serde(rename = "W")]
    Write,
}

impl LockMode {
    /// Single-letter wire form
    pub fn as_char(&self) -> char {
        match self {
            LockMode::Read => 'R',
            LockMode::Write => 'W',
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

impl FromStr for LockMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "r" | "read" => Ok(LockMode::Read),
            "w" | "write" => Ok(LockMode::Write),
            other => Err(Error::Config(format!("unknown lock mode {:?}", other))),
        }
    }
}

/// Server status codes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Status {
    /// Lock granted
    Locked,
    /// Lock is held elsewhere; the resolution follows later
    LockPending,
    /// A pending acquire ran out of time
    AcquireTimeout,
    /// Lock released
    Released,
    /// RELEASE for a lock this client does not hold
    NoLockToRelease,
    /// RELEASEALL with nothing held
    NoLocksToReleaseAll,
    /// QUIT acknowledged
    Bye,
    /// Anything else the server sends, kept verbatim
    Other(String),
}

impl Status {
    pub fn as_str(&self) -> &str {
        match self {
            Status::Locked => "LOCKED",
            Status::LockPending => "LOCKPENDING",
            Status::AcquireTimeout => "ACQUIRETIMEOUT",
            Status::Released => "RELEASED",
            Status::NoLockToRelease => "NOLOCKTORELEASE",
            Status::NoLocksToReleaseAll => "NOLOCKSTORELEASEALL",
            Status::Bye => "BYE",
            Status::Other(token) => token,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Status::Locked)
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Status::LockPending)
    }
}

impl From<&str> for Status {
    fn from(token: &str) -> Self {
        match token {
            "LOCKED" => Status::Locked,
            "LOCKPENDING" => Status::LockPending,
            "ACQUIRETIMEOUT" => Status::AcquireTimeout,
            "RELEASED" => Status::Released,
            "NOLOCKTORELEASE" => Status::NoLockToRelease,
            "NOLOCKSTORELEASEALL" => Status::NoLocksToReleaseAll,
            "BYE" => Status::Bye,
            other => Status::Other(other.to_string()),
        }
    }
}

impl From<String> for Status {
    fn from(token: String) -> Self {
        Status::from(token.as_str())
    }
}

impl From<Status> for String {
    fn from(status: Status) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requests a client can send
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Wisdom,
    Show,
    Acquire {
        lock_id: String,
        timeout: Option<Duration>,
        mode: Option<LockMode>,
    },
    Release {
        lock_id: String,
    },
    ReleaseAll,
    Quit,
}

/// Shape of a command, used to interpret the matching response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Wisdom,
    Show,
    Acquire,
    Release,
    ReleaseAll,
    Quit,
}

impl Command {
    pub fn kind(&self) -> CommandKind {
        match self {
            Command::Wisdom => CommandKind::Wisdom,
            Command::Show => CommandKind::Show,
            Command::Acquire { .. } => CommandKind::Acquire,
            Command::Release { .. } => CommandKind::Release,
            Command::ReleaseAll => CommandKind::ReleaseAll,
            Command::Quit => CommandKind::Quit,
        }
    }

    /// Wire verb
    pub fn verb(&self) -> &'static str {
        match self {
            Command::Wisdom => "WISDOM",
            Command::Show => "SHOW",
            Command::Acquire { .. } => "ACQUIRE",
            Command::Release { .. } => "RELEASE",
            Command::ReleaseAll => "RELEASEALL",
            Command::Quit => "QUIT",
        }
    }

    pub fn lock_id(&self) -> Option<&str> {
        match self {
            Command::Acquire { lock_id, .. } | Command::Release { lock_id } => Some(lock_id),
            _ => None,
        }
    }

    /// Reject commands that would break framing on the wire
    pub fn validate(&self) -> Result<()> {
        match self.lock_id() {
            Some(lock_id) => validate_lock_id(lock_id),
            None => Ok(()),
        }
    }
}

impl CommandKind {
    /// Whether a response to this command must carry a status code
    pub fn expects_status(&self) -> bool {
        matches!(
            self,
            CommandKind::Acquire | CommandKind::Release | CommandKind::ReleaseAll
        )
    }
}

/// Lock identifiers are single wire tokens
pub fn validate_lock_id(lock_id: &str) -> Result<()> {
    if lock_id.is_empty()
        || lock_id
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
    {
        return Err(Error::InvalidLockId(lock_id.to_string()));
    }
    Ok(())
}

/// Decoded server response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locks: Vec<String>,
}

impl Response {
    pub fn with_status(status: Status, lock_id: Option<String>) -> Self {
        Self {
            status: Some(status),
            lock_id,
            ..Default::default()
        }
    }

    /// Status of a response that must carry one
    pub fn require_status(&self) -> Result<&Status> {
        self.status
            .as_ref()
            .ok_or_else(|| Error::Protocol("response is missing a status".into()))
    }
}
