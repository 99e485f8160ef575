//! `Content-Length` framing codec.
//!
//! Frames look like the language-server protocol's:
//!
//! ```text
//! Content-Length: 123\r\n
//! \r\n
//! {"jsonrpc":"2.0",...}
//! ```
//!
//! Additional headers are tolerated and ignored. Frame bodies larger
//! than [`MAX_FRAME_BYTES`] are rejected rather than buffered.

use bytes::{BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::errors::RpcError;
use crate::types::Message;

/// Upper bound on a single frame body.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Codec for `Content-Length`-framed JSON-RPC messages.
#[derive(Debug, Default)]
pub struct JsonRpcCodec {
    /// Body length parsed from the current frame's headers, if the
    /// header block has been consumed.
    pending_body: Option<usize>,
}

impl JsonRpcCodec {
    /// Create a new codec.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_headers(block: &[u8]) -> Result<usize, RpcError> {
        let text = std::str::from_utf8(block)
            .map_err(|_| RpcError::Frame("non-UTF8 header block".into()))?;
        for line in text.split("\r\n") {
            let Some((name, value)) = line.split_once(':') else {
                continue;
            };
            if name.trim().eq_ignore_ascii_case("content-length") {
                let len: usize = value
                    .trim()
                    .parse()
                    .map_err(|_| RpcError::Frame(format!("bad Content-Length: {}", value.trim())))?;
                if len > MAX_FRAME_BYTES {
                    return Err(RpcError::Frame(format!("frame too large: {len} bytes")));
                }
                return Ok(len);
            }
        }
        Err(RpcError::Frame("missing Content-Length header".into()))
    }
}

impl Decoder for JsonRpcCodec {
    type Item = Message;
    type Error = RpcError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, RpcError> {
        loop {
            match self.pending_body {
                None => {
                    // Look for the end of the header block.
                    let Some(pos) = src
                        .windows(4)
                        .position(|window| window == b"\r\n\r\n")
                    else {
                        if src.len() > 8 * 1024 {
                            return Err(RpcError::Frame("header block too large".into()));
                        }
                        return Ok(None);
                    };
                    let header_block = src.split_to(pos + 4);
                    let len = Self::parse_headers(&header_block[..pos])?;
                    self.pending_body = Some(len);
                }
                Some(len) => {
                    if src.len() < len {
                        src.reserve(len - src.len());
                        return Ok(None);
                    }
                    let body = src.split_to(len);
                    self.pending_body = None;
                    let message: Message = serde_json::from_slice(&body)?;
                    return Ok(Some(message));
                }
            }
        }
    }
}

impl Encoder<Message> for JsonRpcCodec {
    type Error = RpcError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), RpcError> {
        let body = serde_json::to_vec(&item)?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());
        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JsonRpcNotification, JsonRpcRequest};
    use assert_matches::assert_matches;
    use serde_json::json;

    fn encode_one(message: Message) -> BytesMut {
        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(message, &mut buf).unwrap();
        buf
    }

    #[test]
    fn roundtrip_single_frame() {
        let request = JsonRpcRequest::new(1, "conversation/create", Some(json!({"owner": "lead"})));
        let mut buf = encode_one(Message::Request(request));

        let mut codec = JsonRpcCodec::new();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_matches!(decoded, Message::Request(r) if r.method == "conversation/create");
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_across_split_buffers() {
        let notification = JsonRpcNotification::new("$/progress", Some(json!({"token": "wdt-1"})));
        let full = encode_one(Message::Notification(notification));

        let mut codec = JsonRpcCodec::new();
        let mut buf = BytesMut::new();

        // Feed one byte at a time; only the final byte yields a frame.
        for (i, byte) in full.iter().enumerate() {
            buf.put_u8(*byte);
            let result = codec.decode(&mut buf).unwrap();
            if i + 1 < full.len() {
                assert!(result.is_none(), "frame completed early at byte {i}");
            } else {
                assert_matches!(result, Some(Message::Notification(_)));
            }
        }
    }

    #[test]
    fn decode_back_to_back_frames() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encode_one(Message::Notification(JsonRpcNotification::new(
            "$/progress",
            Some(json!({"token": "a"})),
        ))));
        buf.extend_from_slice(&encode_one(Message::Notification(JsonRpcNotification::new(
            "$/progress",
            Some(json!({"token": "b"})),
        ))));

        let mut codec = JsonRpcCodec::new();
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(codec.decode(&mut buf).unwrap().is_some());
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn extra_headers_ignored() {
        let body = serde_json::to_vec(&json!({
            "jsonrpc": "2.0", "method": "$/progress"
        }))
        .unwrap();
        let mut buf = BytesMut::new();
        buf.put_slice(
            format!(
                "Content-Type: application/vscode-jsonrpc\r\nContent-Length: {}\r\n\r\n",
                body.len()
            )
            .as_bytes(),
        );
        buf.put_slice(&body);

        let mut codec = JsonRpcCodec::new();
        assert_matches!(codec.decode(&mut buf).unwrap(), Some(Message::Notification(_)));
    }

    #[test]
    fn missing_content_length_is_an_error() {
        let mut buf = BytesMut::from(&b"Content-Type: text\r\n\r\n{}"[..]);
        let mut codec = JsonRpcCodec::new();
        assert_matches!(codec.decode(&mut buf), Err(RpcError::Frame(_)));
    }

    #[test]
    fn oversized_frame_rejected() {
        let mut buf = BytesMut::from(
            format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1).as_bytes(),
        );
        let mut codec = JsonRpcCodec::new();
        assert_matches!(codec.decode(&mut buf), Err(RpcError::Frame(_)));
    }

    #[test]
    fn invalid_body_json_is_an_error() {
        let mut buf = BytesMut::from(&b"Content-Length: 5\r\n\r\n{bad}"[..]);
        let mut codec = JsonRpcCodec::new();
        assert_matches!(codec.decode(&mut buf), Err(RpcError::Json(_)));
    }
}
