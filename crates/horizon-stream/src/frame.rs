//! Inbound frame classification.
//!
//! Every frame pulled by the receive loop is classified before dispatch:
//!
//! - binary frames are decoded as the specialization's structured response;
//! - text frames are checked for protocol sentinels first (consumed
//!   silently), then decoded as a structured response, and otherwise treated
//!   as a literal streaming chunk.
//!
//! Classification is pure, so it happens outside the controller's state lock.

use serde::de::DeserializeOwned;

use horizon_core::prelude::*;

use crate::transport::Frame;

/// The server's acknowledgment of the initialization frame.
pub const INIT_ACK: &str = "|INIT|";

/// Application-level liveness reply.
pub const PONG: &str = "pong";

/// Text frames consumed by the receive loop without dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    InitAck,
    Pong,
}

impl Sentinel {
    pub fn parse(text: &str) -> Option<Self> {
        match text {
            INIT_ACK => Some(Sentinel::InitAck),
            PONG => Some(Sentinel::Pong),
            _ => None,
        }
    }
}

/// A classified inbound frame.
#[derive(Debug)]
pub enum Inbound<R> {
    /// A protocol sentinel; consumed silently.
    Sentinel(Sentinel),
    /// A structured response object.
    Structured(R),
    /// Raw text that is not a structured response.
    Chunk(String),
    /// A binary payload that failed to decode. Dropped, never fatal.
    Malformed(Error),
}

/// Classify one frame for a specialization whose responses decode as `R`.
pub fn classify<R: DeserializeOwned>(frame: Frame) -> Inbound<R> {
    match frame {
        Frame::Binary(bytes) => match serde_json::from_slice::<R>(&bytes) {
            Ok(response) => Inbound::Structured(response),
            Err(err) => Inbound::Malformed(Error::decode(format!(
                "binary frame ({} bytes): {err}",
                bytes.len()
            ))),
        },
        Frame::Text(text) => {
            if let Some(sentinel) = Sentinel::parse(&text) {
                return Inbound::Sentinel(sentinel);
            }
            match serde_json::from_str::<R>(&text) {
                Ok(response) => Inbound::Structured(response),
                Err(_) => Inbound::Chunk(text),
            }
        }
    }
}

/// Truncate a payload for log output without splitting a character.
pub(crate) fn preview(text: &str) -> &str {
    const LIMIT: usize = 120;
    if text.len() <= LIMIT {
        return text;
    }
    let mut end = LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    #[serde(rename_all = "camelCase")]
    struct Reply {
        content: String,
        is_complete: bool,
    }

    #[test]
    fn test_sentinels_are_consumed() {
        assert!(matches!(
            classify::<Reply>(Frame::text("|INIT|")),
            Inbound::Sentinel(Sentinel::InitAck)
        ));
        assert!(matches!(
            classify::<Reply>(Frame::text("pong")),
            Inbound::Sentinel(Sentinel::Pong)
        ));
    }

    #[test]
    fn test_sentinel_match_is_exact() {
        assert!(Sentinel::parse(" pong").is_none());
        assert!(Sentinel::parse("PONG").is_none());
    }

    #[test]
    fn test_text_structured_decode() {
        let inbound = classify::<Reply>(Frame::text(r#"{"content":"Hi","isComplete":false}"#));
        match inbound {
            Inbound::Structured(reply) => {
                assert_eq!(reply.content, "Hi");
                assert!(!reply.is_complete);
            }
            other => panic!("expected structured, got {other:?}"),
        }
    }

    #[test]
    fn test_text_falls_back_to_chunk() {
        match classify::<Reply>(Frame::text(" world")) {
            Inbound::Chunk(text) => assert_eq!(text, " world"),
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn test_json_of_wrong_shape_is_a_chunk() {
        match classify::<Reply>(Frame::text("42")) {
            Inbound::Chunk(text) => assert_eq!(text, "42"),
            other => panic!("expected chunk, got {other:?}"),
        }
    }

    #[test]
    fn test_binary_structured_decode() {
        let bytes = br#"{"content":"done","isComplete":true}"#.to_vec();
        match classify::<Reply>(Frame::Binary(bytes)) {
            Inbound::Structured(reply) => assert!(reply.is_complete),
            other => panic!("expected structured, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_binary_is_decode_error() {
        match classify::<Reply>(Frame::Binary(vec![0xff, 0x00])) {
            Inbound::Malformed(err) => {
                assert!(matches!(err, Error::Decode { .. }));
                assert!(!err.triggers_reconnect());
            }
            other => panic!("expected malformed, got {other:?}"),
        }
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let text = "é".repeat(100);
        let cut = preview(&text);
        assert!(cut.len() <= 120);
        assert!(text.starts_with(cut));
        assert_eq!(preview("short"), "short");
    }
}
