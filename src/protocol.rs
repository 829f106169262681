//! Line protocol between the daemon and its client
//!
//! One record per `\n`-terminated ASCII line. The first character is the
//! record kind, the rest are space separated decimal key-ids:
//!
//! | Record | Direction | Line |
//! |---|---|---|
//! | suppress | client -> daemon | `s<id> <id> ...` |
//! | key-down | both | `d<id>` |
//! | key-up | both | `u<id>` |

use crate::keyboard::{keymap, CatalogError, KeyAction, KeyId};
use std::fmt;
use std::io::{self, BufRead};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("Unrecognized record kind {0:?}")]
    UnknownKind(char),
    #[error("Malformed record {line:?}: {reason}")]
    MalformedRecord { line: String, reason: String },
    #[error(transparent)]
    UnknownKey(#[from] CatalogError),
}

impl ProtocolError {
    fn malformed(line: &str, reason: impl Into<String>) -> Self {
        ProtocolError::MalformedRecord {
            line: line.to_string(),
            reason: reason.into(),
        }
    }
}

/// Client -> daemon record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Replace the suppression set
    Suppress(Vec<KeyId>),
    /// Synthetic press
    KeyDown(KeyId),
    /// Synthetic release
    KeyUp(KeyId),
}

/// Daemon -> client record for a diverted physical key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notification {
    KeyDown(KeyId),
    KeyUp(KeyId),
}

impl Notification {
    /// Autorepeat is reported as another key-down
    pub fn from_action(id: KeyId, action: KeyAction) -> Self {
        if action.is_down() {
            Notification::KeyDown(id)
        } else {
            Notification::KeyUp(id)
        }
    }

    pub fn key(&self) -> KeyId {
        match self {
            Notification::KeyDown(id) | Notification::KeyUp(id) => *id,
        }
    }

    /// The record as written on the wire, newline included
    pub fn encode(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::KeyDown(id) => write!(f, "d{}", id),
            Notification::KeyUp(id) => write!(f, "u{}", id),
        }
    }
}

impl FromStr for Notification {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        match Command::from_str(line)? {
            Command::KeyDown(id) => Ok(Notification::KeyDown(id)),
            Command::KeyUp(id) => Ok(Notification::KeyUp(id)),
            Command::Suppress(_) => Err(ProtocolError::UnknownKind('s')),
        }
    }
}

impl Command {
    /// The record as written on the wire, newline included
    pub fn encode(&self) -> String {
        format!("{}\n", self)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Suppress(ids) => {
                write!(f, "s")?;
                for (i, id) in ids.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{}", id)?;
                }
                Ok(())
            }
            Command::KeyDown(id) => write!(f, "d{}", id),
            Command::KeyUp(id) => write!(f, "u{}", id),
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    /// Parse one record with its line terminator already stripped
    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut chars = line.chars();
        let kind = chars
            .next()
            .ok_or_else(|| ProtocolError::malformed(line, "empty record"))?;
        let args = chars.as_str();

        match kind {
            's' => {
                let ids = args
                    .split_whitespace()
                    .map(|arg| parse_key_id(line, arg))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Command::Suppress(ids))
            }
            'd' => single_key_id(line, args).map(Command::KeyDown),
            'u' => single_key_id(line, args).map(Command::KeyUp),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

fn single_key_id(line: &str, args: &str) -> Result<KeyId, ProtocolError> {
    let mut parts = args.split_whitespace();
    let arg = parts
        .next()
        .ok_or_else(|| ProtocolError::malformed(line, "missing key-id"))?;
    if parts.next().is_some() {
        return Err(ProtocolError::malformed(line, "expected exactly one key-id"));
    }
    parse_key_id(line, arg)
}

fn parse_key_id(line: &str, arg: &str) -> Result<KeyId, ProtocolError> {
    let id: u16 = arg
        .parse()
        .map_err(|_| ProtocolError::malformed(line, format!("{:?} is not a key-id", arg)))?;
    let id = KeyId(id);
    keymap::info(id)?;
    Ok(id)
}

/// Read the next record into `buf`.
///
/// Returns `Ok(None)` when the peer closed the stream or sent a blank line,
/// both of which end the session. A line that is not UTF-8 comes back as
/// `Some(Err(..))` so the caller can report it and keep reading.
pub fn read_record<'a, R: BufRead>(
    reader: &mut R,
    buf: &'a mut Vec<u8>,
) -> io::Result<Option<Result<&'a str, ProtocolError>>> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Ok(None);
    }
    let mut bytes = buf.as_slice();
    while let [rest @ .., b'\n' | b'\r'] = bytes {
        bytes = rest;
    }
    if bytes.is_empty() {
        return Ok(None);
    }
    match std::str::from_utf8(bytes) {
        Ok(line) => Ok(Some(Ok(line))),
        Err(_) => Ok(Some(Err(ProtocolError::malformed(
            &String::from_utf8_lossy(bytes),
            "not valid UTF-8",
        )))),
    }
}
