// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pub/sub wire header.
//!
//! ```text
//! | type u8 | flags u8 | topic_len u16 LE | ext_type u8 | ext_version u8 | topic | data |
//! ```

use super::PubSubError;

/// Longest accepted topic, in bytes.
pub const BM_TOPIC_MAX_LEN: usize = 255;

/// Fixed header length before the topic bytes.
pub const PUBSUB_HEADER_LEN: usize = 6;

/// Message type of an ordinary publish.
pub const BM_PUBSUB_MSG_PUBLISH: u8 = 0;

/// Decoded view over a wire message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    pub topic: &'a str,
    pub data: &'a [u8],
    pub ty: u8,
    pub version: u8,
}

/// Validate a topic against the length limit.
pub fn check_topic(topic: &str) -> Result<(), PubSubError> {
    if topic.is_empty() {
        return Err(PubSubError::InvalidTopic);
    }
    if topic.len() > BM_TOPIC_MAX_LEN {
        return Err(PubSubError::TopicTooLong(topic.len()));
    }
    Ok(())
}

pub fn encode(topic: &str, data: &[u8], ty: u8, version: u8) -> Result<Vec<u8>, PubSubError> {
    check_topic(topic)?;

    let mut buf = Vec::with_capacity(PUBSUB_HEADER_LEN + topic.len() + data.len());
    buf.push(BM_PUBSUB_MSG_PUBLISH);
    buf.push(0); // flags
    buf.extend_from_slice(&(topic.len() as u16).to_le_bytes());
    buf.push(ty);
    buf.push(version);
    buf.extend_from_slice(topic.as_bytes());
    buf.extend_from_slice(data);
    Ok(buf)
}

pub fn decode(wire: &[u8]) -> Result<Message<'_>, PubSubError> {
    if wire.len() < PUBSUB_HEADER_LEN || wire[0] != BM_PUBSUB_MSG_PUBLISH {
        return Err(PubSubError::Malformed);
    }

    let topic_len = u16::from_le_bytes([wire[2], wire[3]]) as usize;
    let body = &wire[PUBSUB_HEADER_LEN..];
    if topic_len == 0 || topic_len > BM_TOPIC_MAX_LEN || body.len() < topic_len {
        return Err(PubSubError::Malformed);
    }

    let (topic, data) = body.split_at(topic_len);
    let topic = std::str::from_utf8(topic).map_err(|_| PubSubError::Malformed)?;

    Ok(Message {
        topic,
        data,
        ty: wire[4],
        version: wire[5],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let wire = encode("abc", &[9, 8], 7, 2).expect("encode");
        assert_eq!(wire, vec![0, 0, 3, 0, 7, 2, b'a', b'b', b'c', 9, 8]);

        let msg = decode(&wire).expect("decode");
        assert_eq!(msg.topic, "abc");
        assert_eq!(msg.data, &[9, 8]);
        assert_eq!((msg.ty, msg.version), (7, 2));
    }

    #[test]
    fn test_topic_limits() {
        assert_eq!(encode("", b"", 0, 0), Err(PubSubError::InvalidTopic));
        let long = "t".repeat(BM_TOPIC_MAX_LEN + 1);
        assert_eq!(
            encode(&long, b"", 0, 0),
            Err(PubSubError::TopicTooLong(BM_TOPIC_MAX_LEN + 1))
        );
        assert!(encode(&long[..BM_TOPIC_MAX_LEN], b"", 0, 0).is_ok());
    }

    #[test]
    fn test_truncated_messages_rejected() {
        let wire = encode("topic", b"data", 0, 0).expect("encode");
        assert_eq!(decode(&wire[..4]), Err(PubSubError::Malformed));
        assert_eq!(decode(&wire[..8]), Err(PubSubError::Malformed));

        let mut bad_type = wire.clone();
        bad_type[0] = 0x42;
        assert_eq!(decode(&bad_type), Err(PubSubError::Malformed));
    }
}
