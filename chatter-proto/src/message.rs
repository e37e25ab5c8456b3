//! Message types for the Game On room protocol.
//!
//! An [`Envelope`] is the unit carried on the WebSocket and inside room
//! service replies. Its payload stays as raw JSON bytes until whoever consumes
//! it decodes the specific message type it expects (see [`Inbound`]).

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::codec::CodecError;

/// Direction of the first identifying message a client sends to a room.
pub const ROOM_HELLO: &str = "roomHello";

/// Direction of the terminal message a client sends when leaving a room.
pub const ROOM_GOODBYE: &str = "roomGoodbye";

/// Direction of a generic chat or slash command sent to a room.
pub const ROOM_COMMAND: &str = "room";

/// Direction of the greeting the mediator sends on every new connection.
pub const ACK: &str = "ack";

/// Recipient value addressing every connected client.
pub const BROADCAST: &str = "*";

/// Protocol versions this mediator speaks, advertised in the [`Ack`].
pub const SUPPORTED_VERSIONS: &[i32] = &[1];

/// HTTP header carrying the caller identity on room service requests.
pub const USER_ID_HEADER: &str = "X-Game-On-UserID";

/// Generic protocol message: a direction tag, an optional recipient, and an
/// opaque payload.
///
/// On the wire it is rendered by [`crate::codec::encode`]; inside JSON it
/// appears as `{"direction": .., "recipient": .., "payload": {..}}` with the
/// payload kept byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message kind (`roomHello`, `player`, `ack`, ...). Never empty.
    pub direction: String,
    /// Routing target: a user id, a room id, or [`BROADCAST`].
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "empty_as_none"
    )]
    pub recipient: Option<String>,
    /// Raw JSON payload bytes.
    #[serde(default, skip_serializing_if = "Vec::is_empty", with = "raw_payload")]
    pub payload: Vec<u8>,
}

impl Envelope {
    /// Creates an envelope without a recipient.
    pub fn new(direction: impl Into<String>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            direction: direction.into(),
            recipient: None,
            payload: payload.into(),
        }
    }

    /// Creates an envelope addressed to `recipient`.
    ///
    /// An empty recipient is normalized to "no recipient".
    pub fn addressed(
        direction: impl Into<String>,
        recipient: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        let recipient: String = recipient.into();
        Self {
            direction: direction.into(),
            recipient: (!recipient.is_empty()).then_some(recipient),
            payload: payload.into(),
        }
    }

    /// Creates an envelope whose payload is the JSON serialization of `body`.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if `body` cannot be serialized.
    pub fn json<T: Serialize>(
        direction: impl Into<String>,
        recipient: Option<&str>,
        body: &T,
    ) -> Result<Self, serde_json::Error> {
        let payload = serde_json::to_vec(body)?;
        Ok(Self::addressed(
            direction,
            recipient.unwrap_or_default(),
            payload,
        ))
    }

    /// Builds the `ack` greeting advertising the given protocol versions.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the payload cannot be serialized.
    pub fn ack(versions: &[i32]) -> Result<Self, serde_json::Error> {
        Self::json(
            ACK,
            None,
            &Ack {
                version: versions.to_vec(),
            },
        )
    }

    /// Returns the recipient, if any.
    #[must_use]
    pub fn recipient(&self) -> Option<&str> {
        self.recipient.as_deref()
    }

    /// Returns `true` if the envelope is addressed to every client.
    #[must_use]
    pub fn is_broadcast(&self) -> bool {
        self.recipient() == Some(BROADCAST)
    }

    /// Decodes the payload as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Payload`] if the payload is not valid JSON for `T`.
    pub fn payload_as<'a, T: Deserialize<'a>>(&'a self) -> Result<T, CodecError> {
        serde_json::from_slice(&self.payload).map_err(|source| CodecError::Payload {
            direction: self.direction.clone(),
            source,
        })
    }
}

/// Ordered collection of reply envelopes returned by the room service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageCollection {
    /// Replies, dispatched in order.
    #[serde(default)]
    pub messages: Vec<Envelope>,
}

impl MessageCollection {
    /// Creates a collection from a list of envelopes.
    #[must_use]
    pub const fn new(messages: Vec<Envelope>) -> Self {
        Self { messages }
    }

    /// Number of replies in the collection.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Returns `true` if the collection holds no replies.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl IntoIterator for MessageCollection {
    type Item = Envelope;
    type IntoIter = std::vec::IntoIter<Envelope>;

    fn into_iter(self) -> Self::IntoIter {
        self.messages.into_iter()
    }
}

/// Identity of a Game On client, embedded in every client-originated payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    /// Display name.
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub username: String,
    /// Opaque user id; used as the session identity.
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub user_id: String,
}

/// Payload of a `roomHello` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    #[serde(flatten)]
    pub user: UserInfo,
    /// Protocol version the client intends to speak.
    #[serde(
        default,
        skip_serializing_if = "is_zero",
        deserialize_with = "null_as_default"
    )]
    pub version: i32,
    /// Set when the client is re-establishing a dropped connection.
    #[serde(
        default,
        skip_serializing_if = "is_false",
        deserialize_with = "null_as_default"
    )]
    pub recovery: bool,
}

/// Payload of a `roomGoodbye` message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goodbye {
    #[serde(flatten)]
    pub user: UserInfo,
}

/// Payload of a `room` chat or command message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomCommand {
    #[serde(flatten)]
    pub user: UserInfo,
    /// Chat text or slash command.
    #[serde(
        default,
        skip_serializing_if = "String::is_empty",
        deserialize_with = "null_as_default"
    )]
    pub content: String,
}

/// Payload of the `ack` greeting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub version: Vec<i32>,
}

/// A client message the mediator knows how to forward.
///
/// The set is closed: any other direction is a protocol violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// `roomHello`: identifies the client.
    Hello(Hello),
    /// `roomGoodbye`: client is leaving; terminal.
    Goodbye(Goodbye),
    /// `room`: chat or command, repeatable.
    Command(RoomCommand),
}

impl Inbound {
    /// Decodes the payload of `envelope` according to its direction.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownDirection`] for directions outside the
    /// closed set, or [`CodecError::Payload`] if the payload does not match.
    pub fn from_envelope(envelope: &Envelope) -> Result<Self, CodecError> {
        match envelope.direction.as_str() {
            ROOM_HELLO => envelope.payload_as().map(Self::Hello),
            ROOM_GOODBYE => envelope.payload_as().map(Self::Goodbye),
            ROOM_COMMAND => envelope.payload_as().map(Self::Command),
            other => Err(CodecError::UnknownDirection(other.to_string())),
        }
    }

    /// The direction tag this message travels under.
    #[must_use]
    pub const fn direction(&self) -> &'static str {
        match self {
            Self::Hello(_) => ROOM_HELLO,
            Self::Goodbye(_) => ROOM_GOODBYE,
            Self::Command(_) => ROOM_COMMAND,
        }
    }

    /// The user the message was sent on behalf of.
    #[must_use]
    pub const fn user(&self) -> &UserInfo {
        match self {
            Self::Hello(hello) => &hello.user,
            Self::Goodbye(goodbye) => &goodbye.user,
            Self::Command(command) => &command.user,
        }
    }
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_zero(v: &i32) -> bool {
    *v == 0
}

#[allow(clippy::trivially_copy_pass_by_ref)]
const fn is_false(v: &bool) -> bool {
    !*v
}

/// Reads an explicit JSON `null` as the field's zero value.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|s| !s.is_empty()))
}

/// Keeps a JSON payload as its exact raw bytes.
mod raw_payload {
    use serde::de::Error as _;
    use serde::ser::Error as _;
    use serde_json::value::RawValue;

    use super::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        let raw: &RawValue = serde_json::from_slice(bytes).map_err(S::Error::custom)?;
        raw.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer).map_err(D::Error::custom)?;
        Ok(raw.get().as_bytes().to_vec())
    }
}
