//! Line codec for the Game On WebSocket protocol.
//!
//! Wire format: `<direction>,[<recipient>,]<payload>`. The payload is appended
//! verbatim and never escaped, so a line is told apart as two-part or
//! three-part solely by whether the token after the first comma opens a JSON
//! object.

use crate::message::Envelope;

/// Longest slice of offending input quoted in error messages.
const ERROR_PREVIEW_LEN: usize = 64;

/// Error type for envelope and payload decoding.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The line does not have the `direction,[recipient,]payload` shape.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
    /// The direction is not one this side of the protocol accepts.
    #[error("unrecognized message direction: {0}")]
    UnknownDirection(String),
    /// The payload is not valid JSON for the message type.
    #[error("invalid {direction} payload: {source}")]
    Payload {
        /// Direction whose payload failed to decode.
        direction: String,
        /// Underlying JSON error.
        source: serde_json::Error,
    },
}

/// Encodes an [`Envelope`] into a single wire line.
///
/// An absent or empty recipient produces the two-part form.
#[must_use]
pub fn encode(envelope: &Envelope) -> Vec<u8> {
    let recipient = envelope.recipient().filter(|r| !r.is_empty());
    let mut line = Vec::with_capacity(
        envelope.direction.len() + recipient.map_or(0, |r| r.len() + 1) + 1 + envelope.payload.len(),
    );
    line.extend_from_slice(envelope.direction.as_bytes());
    line.push(b',');
    if let Some(recipient) = recipient {
        line.extend_from_slice(recipient.as_bytes());
        line.push(b',');
    }
    line.extend_from_slice(&envelope.payload);
    line
}

/// Decodes a wire line into an [`Envelope`].
///
/// The returned payload is the exact byte range of the input that follows the
/// routing prefix, embedded commas included.
///
/// # Errors
///
/// Returns [`CodecError::MalformedEnvelope`] if the line has no comma, an
/// empty direction, a recipient with nothing after it, or a non UTF-8
/// direction or recipient.
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    let mut parts = bytes.splitn(3, |b| *b == b',');
    let (Some(direction), Some(second)) = (parts.next(), parts.next()) else {
        return Err(malformed("expected at least two comma-separated parts", bytes));
    };

    if direction.is_empty() {
        return Err(malformed("empty direction", bytes));
    }
    let direction = std::str::from_utf8(direction)
        .map_err(|_| malformed("direction is not valid UTF-8", bytes))?;

    if second.first() == Some(&b'{') {
        // <direction>,{...}
        let payload = &bytes[direction.len() + 1..];
        return Ok(Envelope::new(direction, payload));
    }

    // <direction>,<recipient>,{...}
    let Some(payload) = parts.next() else {
        return Err(malformed("recipient is not followed by a payload", bytes));
    };
    let recipient = std::str::from_utf8(second)
        .map_err(|_| malformed("recipient is not valid UTF-8", bytes))?;

    Ok(Envelope::addressed(direction, recipient, payload))
}

fn malformed(reason: &str, bytes: &[u8]) -> CodecError {
    let preview = &bytes[..bytes.len().min(ERROR_PREVIEW_LEN)];
    CodecError::MalformedEnvelope(format!(
        "{reason}: {:?}",
        String::from_utf8_lossy(preview)
    ))
}
