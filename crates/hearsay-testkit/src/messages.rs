//! A stand-in message format.
//!
//! Real messages are signed and parsed outside the sync core. Tests only
//! need raw bytes that carry the metadata the engine stores, so a test
//! message is a CBOR record of group, author, timestamp and body.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use hearsay_core::{AuthorId, GroupId, Message};
use hearsay_sync::{MessageParser, SyncError};

#[derive(Serialize, Deserialize)]
struct TestWireMessage {
    group: GroupId,
    author: Option<AuthorId>,
    timestamp: i64,
    body: Vec<u8>,
}

/// Build a message whose raw bytes [`TestMessageParser`] understands.
pub fn test_message(
    group: GroupId,
    author: Option<AuthorId>,
    timestamp: i64,
    body: &[u8],
) -> Message {
    let wire = TestWireMessage {
        group,
        author,
        timestamp,
        body: body.to_vec(),
    };
    let mut raw = Vec::new();
    ciborium::into_writer(&wire, &mut raw).expect("encoding into a Vec cannot fail");
    Message::new(group, author, timestamp, raw)
}

/// Parses raw bytes built by [`test_message`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TestMessageParser;

impl MessageParser for TestMessageParser {
    fn parse(&self, raw: Bytes) -> hearsay_sync::Result<Message> {
        let wire: TestWireMessage = ciborium::from_reader(&raw[..])
            .map_err(|e| SyncError::ProtocolViolation(format!("bad test message: {e}")))?;
        Ok(Message::new(wire.group, wire.author, wire.timestamp, raw))
    }
}
