//! Pluggable wire encodings
//!
//! The lock server has spoken both plain text lines and one-JSON-object-per-line
//! over its lifetime. A `Codec` turns commands into a single line and lines back
//! into `Response`s; framing is handled separately.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::{Command, CommandKind, LockMode, Response, Status};
use crate::error::{Error, Result};

/// Encoding strategy for one connection
pub trait Codec: Send + Sync + fmt::Debug {
    /// Short name for logging
    fn name(&self) -> &'static str;

    /// Encode a command as one line, without the terminator
    fn encode(&self, command: &Command) -> Result<String>;

    /// Decode one line received in answer to a command of `kind`
    fn decode(&self, kind: CommandKind, line: &str) -> Result<Response>;
}

/// Which codec a connection uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    #[default]
    Text,
    Json,
}

impl CodecKind {
    pub fn build(&self) -> Arc<dyn Codec> {
        match self {
            CodecKind::Text => Arc::new(TextCodec),
            CodecKind::Json => Arc::new(JsonCodec),
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecKind::Text => write!(f, "text"),
            CodecKind::Json => write!(f, "json"),
        }
    }
}

impl FromStr for CodecKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(CodecKind::Text),
            "json" => Ok(CodecKind::Json),
            other => Err(Error::Config(format!("unknown codec {:?}", other))),
        }
    }
}

/// Space-separated plain text
///
/// Commands look like `ACQUIRE <id> <timeout-ms> <W|R>`. Status replies are
/// `<STATUS> [<id>]`, SHOW replies list lock ids on one line and WISDOM
/// replies are the quote itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextCodec;

impl Codec for TextCodec {
    fn name(&self) -> &'static str {
        "text"
    }

    fn encode(&self, command: &Command) -> Result<String> {
        let line = match command {
            Command::Acquire { lock_id, timeout: None, mode: None } => {
                format!("ACQUIRE {}", lock_id)
            }
            Command::Acquire { lock_id, timeout: Some(timeout), mode } => format!(
                "ACQUIRE {} {} {}",
                lock_id,
                timeout.as_millis(),
                mode.unwrap_or_default()
            ),
            Command::Acquire { timeout: None, mode: Some(_), .. } => {
                return Err(Error::Protocol(
                    "text encoding needs a timeout to carry a lock mode".into(),
                ));
            }
            Command::Release { lock_id } => format!("RELEASE {}", lock_id),
            other => other.verb().to_string(),
        };
        Ok(line)
    }

    fn decode(&self, kind: CommandKind, line: &str) -> Result<Response> {
        match kind {
            CommandKind::Wisdom => Ok(Response {
                quote: Some(line.to_string()),
                ..Default::default()
            }),
            CommandKind::Show => Ok(Response {
                locks: line.split_whitespace().map(str::to_string).collect(),
                ..Default::default()
            }),
            CommandKind::Quit if line.trim().is_empty() => Ok(Response::default()),
            _ => {
                let mut tokens = line.split_whitespace();
                let status = tokens
                    .next()
                    .ok_or_else(|| Error::Protocol(format!("empty reply to {:?}", kind)))?;
                let lock_id = tokens.next().map(str::to_string);
                Ok(Response::with_status(Status::from(status), lock_id))
            }
        }
    }
}

/// One JSON object per line
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireCommand<'a> {
    command: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    lock_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    mode: Option<LockMode>,
}

impl Codec for JsonCodec {
    fn name(&self) -> &'static str {
        "json"
    }

    fn encode(&self, command: &Command) -> Result<String> {
        let (timeout, mode) = match command {
            Command::Acquire { timeout, mode, .. } => (
                timeout.map(|t| t.as_millis() as u64),
                mode.or(timeout.map(|_| LockMode::Write)),
            ),
            _ => (None, None),
        };

        let wire = WireCommand {
            command: command.verb(),
            lock_id: command.lock_id(),
            timeout,
            mode,
        };
        Ok(serde_json::to_string(&wire)?)
    }

    fn decode(&self, kind: CommandKind, line: &str) -> Result<Response> {
        let response: Response = serde_json::from_str(line)?;
        if kind.expects_status() {
            response.require_status()?;
        }
        Ok(response)
    }
}
