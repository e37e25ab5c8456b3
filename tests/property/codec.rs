//! Property-based tests for the envelope line codec.
//!
//! Uses proptest to verify:
//! 1. Any envelope with a recipient survives encode → decode.
//! 2. Any envelope without a recipient whose payload opens a JSON object
//!    survives encode → decode.
//! 3. Payload bytes are reproduced exactly, embedded commas included.
//! 4. Random bytes never cause a panic in `decode`.

use chatter_proto::codec;
use chatter_proto::message::Envelope;
use proptest::prelude::*;

// --- Strategies ---

/// Direction tags: non-empty, comma free.
fn arb_direction() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z0-9]{0,15}"
}

/// Recipients: non-empty, comma free, never starting with `{`.
fn arb_recipient() -> impl Strategy<Value = String> {
    prop_oneof![Just("*".to_string()), "[A-Za-z0-9_:.-]{1,32}"]
}

/// JSON-object-looking payloads that may contain commas and braces.
fn arb_object_payload() -> impl Strategy<Value = Vec<u8>> {
    "[^\x00]{0,256}".prop_map(|body| format!("{{{body}}}").into_bytes())
}

/// Arbitrary payload bytes, including ones that do not look like JSON.
fn arb_raw_payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

// --- Property tests ---

proptest! {
    /// Three-part lines round-trip for any payload bytes.
    #[test]
    fn addressed_envelope_round_trip(
        direction in arb_direction(),
        recipient in arb_recipient(),
        payload in arb_raw_payload(),
    ) {
        let envelope = Envelope::addressed(direction, recipient, payload);
        let decoded = codec::decode(&codec::encode(&envelope)).expect("decode should succeed");
        prop_assert_eq!(envelope, decoded);
    }

    /// Two-part lines round-trip when the payload opens a JSON object.
    #[test]
    fn unaddressed_envelope_round_trip(
        direction in arb_direction(),
        payload in arb_object_payload(),
    ) {
        let envelope = Envelope::new(direction, payload);
        let decoded = codec::decode(&codec::encode(&envelope)).expect("decode should succeed");
        prop_assert_eq!(envelope, decoded);
    }

    /// The decoded payload is exactly the bytes after the routing prefix.
    #[test]
    fn payload_offsets_are_exact(
        direction in arb_direction(),
        recipient in arb_recipient(),
        payload in arb_object_payload(),
    ) {
        let line = format!(
            "{direction},{recipient},{}",
            String::from_utf8_lossy(&payload)
        );
        let decoded = codec::decode(line.as_bytes()).expect("decode should succeed");
        prop_assert_eq!(decoded.payload.len() + direction.len() + recipient.len() + 2, line.len());
        prop_assert_eq!(decoded.recipient.as_deref(), Some(recipient.as_str()));
    }

    /// Random bytes never cause a panic when decoded.
    #[test]
    fn random_bytes_decode_no_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode(&bytes);
    }
}
