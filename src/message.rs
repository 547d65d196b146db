//! Messages exchanged between processes.
//!
//! A [`Message`] is an immutable value made of a [`MediaType`] and an arbitrary
//! byte content. Two messages are equal when both their media type and content
//! are equal, nothing else identifies them.
//!
//! # Control messages
//!
//! The protocol reserves a handful of well-known messages used to negotiate the
//! start and end of a connection, acknowledge application messages and keep idle
//! connections alive. They are plain [`Message`] values sharing the reserved
//! [`CONTROL_MEDIA_TYPE`] and differing only by their content; [`Control::of`]
//! recognises them by value equality, so a message decoded from the wire is a
//! control message exactly when it is equal to one of them.
//!
//! # Example
//! ```rust
//! use namedipc::{Control, Message};
//!
//! let hello = Message::generic("text/plain", "hello world").unwrap();
//! assert!(!hello.is_control());
//!
//! let start = Control::ConnectionStart.message();
//! assert_eq!(Control::of(&start), Some(Control::ConnectionStart));
//! ```
use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::process::ProcessName;

/// Media type shared by every protocol control message.
pub const CONTROL_MEDIA_TYPE: &str = "application/vnd.namedipc.control";

/// Media type of the greeting a connecting process sends after the handshake.
pub const GREETING_MEDIA_TYPE: &str = "application/vnd.namedipc.greeting";

const MAX_NAME_LENGTH: usize = 127;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("invalid media type '{0}'")]
    InvalidMediaType(String),

    #[error("media type is {0} bytes long, at most {max} are allowed", max = u16::MAX)]
    MediaTypeTooLong(usize),
}

/// Structurally validated MIME type, `type/subtype` followed by optional
/// `; key=value` parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaType {
    top_level: String,
    sub_type: String,
    parameters: Vec<(String, String)>,
}

impl MediaType {
    pub fn top_level(&self) -> &str {
        &self.top_level
    }

    pub fn sub_type(&self) -> &str {
        &self.sub_type
    }

    pub fn parameters(&self) -> &[(String, String)] {
        &self.parameters
    }
}

/// `restricted-name` from RFC 6838.
fn restricted_name(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }

    s.len() <= MAX_NAME_LENGTH
        && chars.all(|c| c.is_ascii_alphanumeric() || "!#$&-^_.+".contains(c))
}

impl FromStr for MediaType {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > u16::MAX as usize {
            return Err(MessageError::MediaTypeTooLong(s.len()));
        }

        let invalid = || MessageError::InvalidMediaType(s.to_string());
        let mut parts = s.split(';');
        let essence = parts.next().unwrap_or_default().trim();
        let (top_level, sub_type) = essence.split_once('/').ok_or_else(invalid)?;

        if !restricted_name(top_level) || !restricted_name(sub_type) {
            return Err(invalid());
        }

        let parameters = parts
            .map(|parameter| {
                let (key, value) = parameter.trim().split_once('=').ok_or_else(invalid)?;
                if restricted_name(key) && restricted_name(value) {
                    Ok((key.to_string(), value.to_string()))
                } else {
                    Err(invalid())
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            top_level: top_level.to_string(),
            sub_type: sub_type.to_string(),
            parameters,
        })
    }
}

impl TryFrom<&str> for MediaType {
    type Error = MessageError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.top_level, self.sub_type)?;
        for (key, value) in &self.parameters {
            write!(f, "; {key}={value}")?;
        }
        Ok(())
    }
}

/// Typed payload carried by a single frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    media_type: MediaType,
    content: Vec<u8>,
}

impl Message {
    pub fn new(media_type: MediaType, content: impl Into<Vec<u8>>) -> Self {
        Self {
            media_type,
            content: content.into(),
        }
    }

    /// Build a message from a media type string, failing if it is malformed.
    pub fn generic(media_type: &str, content: impl Into<Vec<u8>>) -> Result<Self, MessageError> {
        Ok(Self::new(media_type.parse()?, content))
    }

    /// Greeting sent by a connecting process, its content is the sender's name.
    pub fn greeting(name: &ProcessName) -> Self {
        Self {
            media_type: reserved(GREETING_MEDIA_TYPE),
            content: name.as_str().as_bytes().to_vec(),
        }
    }

    pub fn media_type(&self) -> &MediaType {
        &self.media_type
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Content as text, if it is valid UTF-8.
    pub fn text(&self) -> Option<&str> {
        std::str::from_utf8(&self.content).ok()
    }

    pub fn into_content(self) -> Vec<u8> {
        self.content
    }

    pub fn is_control(&self) -> bool {
        Control::of(self).is_some()
    }

    pub fn is_greeting(&self) -> bool {
        self.media_type.to_string() == GREETING_MEDIA_TYPE
    }

    /// Name carried by a greeting, `None` for any other message.
    pub fn greeting_name(&self) -> Option<ProcessName> {
        if !self.is_greeting() {
            return None;
        }

        self.text()?.parse().ok()
    }
}

fn reserved(media_type: &str) -> MediaType {
    let (top_level, sub_type) = media_type.split_once('/').unwrap_or((media_type, ""));
    MediaType {
        top_level: top_level.to_string(),
        sub_type: sub_type.to_string(),
        parameters: Vec::new(),
    }
}

/// Protocol messages driving the connection handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    ConnectionStart,
    ConnectionStartOk,
    ConnectionClose,
    ConnectionCloseOk,
    MessageReceived,
    Heartbeat,
}

impl Control {
    pub const ALL: [Control; 6] = [
        Control::ConnectionStart,
        Control::ConnectionStartOk,
        Control::ConnectionClose,
        Control::ConnectionCloseOk,
        Control::MessageReceived,
        Control::Heartbeat,
    ];

    pub fn content(self) -> &'static str {
        match self {
            Control::ConnectionStart => "connection.start",
            Control::ConnectionStartOk => "connection.start-ok",
            Control::ConnectionClose => "connection.close",
            Control::ConnectionCloseOk => "connection.close-ok",
            Control::MessageReceived => "message.received",
            Control::Heartbeat => "heartbeat",
        }
    }

    pub fn message(self) -> Message {
        Message {
            media_type: reserved(CONTROL_MEDIA_TYPE),
            content: self.content().as_bytes().to_vec(),
        }
    }

    /// Control message equal to `message`, if any.
    pub fn of(message: &Message) -> Option<Control> {
        Control::ALL.into_iter().find(|c| c.matches(message))
    }

    pub fn matches(self, message: &Message) -> bool {
        *message == self.message()
    }
}

impl From<Control> for Message {
    fn from(value: Control) -> Self {
        value.message()
    }
}
