//! Newline-delimited JSON framing for the agent pipe.
//!
//! Each frame is one compact JSON object followed by `\n`. Inbound bytes are
//! buffered until a newline arrives, so partial reads are fine, and a line
//! that fails to parse is reported on its own without desynchronizing the
//! stream: the next newline starts a fresh frame.

use crate::error::MessageDecodeError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Frames larger than this are discarded up to the next newline.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

const READ_CHUNK_BYTES: usize = 8 * 1024;

/// Request id. Local requests use integers; the agent may use either form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Integer(i64),
    String(String),
}

impl RequestId {
    /// Integer view, accepting numeric strings from lenient peers.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(id) => Some(*id),
            Self::String(id) => id.parse().ok(),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Integer(id) => write!(f, "{id}"),
            Self::String(id) => f.write_str(id),
        }
    }
}

/// Error object carried by an error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: Option<i64>, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

/// One classified frame.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcMessage {
    Request {
        id: RequestId,
        method: String,
        params: Value,
    },
    Notification {
        method: String,
        params: Value,
    },
    Response {
        id: RequestId,
        result: Value,
    },
    Error {
        id: RequestId,
        error: ErrorObject,
    },
}

impl RpcMessage {
    /// Classify a parsed JSON value.
    ///
    /// `method` + `id` is a request, `method` alone a notification, and `id`
    /// with `result` or `error` a response.
    pub fn from_value(value: Value) -> Result<Self, String> {
        let Value::Object(mut object) = value else {
            return Err("frame is not a JSON object".to_string());
        };
        let id = match object.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(
                serde_json::from_value::<RequestId>(raw)
                    .map_err(|_| "id must be a string or integer".to_string())?,
            ),
        };
        let params = object.remove("params").unwrap_or(Value::Null);

        if let Some(method) = object.remove("method") {
            let Value::String(method) = method else {
                return Err("method must be a string".to_string());
            };
            return Ok(match id {
                Some(id) => Self::Request { id, method, params },
                None => Self::Notification { method, params },
            });
        }

        let Some(id) = id else {
            return Err("frame has neither method nor id".to_string());
        };
        if let Some(error) = object.remove("error") {
            let error = match error {
                Value::String(message) => ErrorObject::new(None, message),
                other => serde_json::from_value::<ErrorObject>(other)
                    .map_err(|err| format!("invalid error object: {err}"))?,
            };
            return Ok(Self::Error { id, error });
        }
        match object.remove("result") {
            Some(result) => Ok(Self::Response { id, result }),
            None => Err("response has neither result nor error".to_string()),
        }
    }

    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        match self {
            Self::Request { id, method, params } => {
                object.insert("id".to_string(), id_value(id));
                object.insert("method".to_string(), Value::String(method.clone()));
                if !params.is_null() {
                    object.insert("params".to_string(), params.clone());
                }
            }
            Self::Notification { method, params } => {
                object.insert("method".to_string(), Value::String(method.clone()));
                if !params.is_null() {
                    object.insert("params".to_string(), params.clone());
                }
            }
            Self::Response { id, result } => {
                object.insert("id".to_string(), id_value(id));
                object.insert("result".to_string(), result.clone());
            }
            Self::Error { id, error } => {
                object.insert("id".to_string(), id_value(id));
                let mut error_object = Map::new();
                if let Some(code) = error.code {
                    error_object.insert("code".to_string(), Value::from(code));
                }
                error_object.insert("message".to_string(), Value::String(error.message.clone()));
                if let Some(data) = &error.data {
                    error_object.insert("data".to_string(), data.clone());
                }
                object.insert("error".to_string(), Value::Object(error_object));
            }
        }
        Value::Object(object)
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Self::Request { method, .. } | Self::Notification { method, .. } => Some(method),
            _ => None,
        }
    }
}

fn id_value(id: &RequestId) -> Value {
    match id {
        RequestId::Integer(id) => Value::from(*id),
        RequestId::String(id) => Value::String(id.clone()),
    }
}

/// Encode one frame: compact JSON plus exactly one trailing newline.
///
/// serde_json escapes control characters inside strings, so the only raw
/// newline in the output is the terminator.
pub fn encode(message: &RpcMessage) -> serde_json::Result<Vec<u8>> {
    let mut frame = serde_json::to_vec(&message.to_value())?;
    frame.push(b'\n');
    Ok(frame)
}

/// Parse a single line (without its newline).
pub fn decode_line(line: &[u8]) -> Result<RpcMessage, MessageDecodeError> {
    let text = std::str::from_utf8(line).map_err(|_| MessageDecodeError {
        reason: "invalid UTF-8".to_string(),
        line: String::from_utf8_lossy(line).into_owned(),
    })?;
    let value: Value = serde_json::from_str(text).map_err(|err| MessageDecodeError {
        reason: err.to_string(),
        line: text.to_string(),
    })?;
    RpcMessage::from_value(value).map_err(|reason| MessageDecodeError {
        reason,
        line: text.to_string(),
    })
}

/// Incremental splitter: push bytes in, pull frames out.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    discarding: bool,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes held back waiting for a newline.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete frame, skipping blank lines. `None` means more bytes are needed.
    pub fn next_frame(&mut self) -> Option<Result<RpcMessage, MessageDecodeError>> {
        loop {
            let Some(newline) = self.buffer.iter().position(|byte| *byte == b'\n') else {
                if self.buffer.len() > MAX_FRAME_BYTES && !self.discarding {
                    self.buffer.clear();
                    self.discarding = true;
                    return Some(Err(MessageDecodeError {
                        reason: format!("frame exceeds {MAX_FRAME_BYTES} bytes"),
                        line: String::new(),
                    }));
                }
                if self.discarding {
                    self.buffer.clear();
                }
                return None;
            };
            let mut line: Vec<u8> = self.buffer.drain(..=newline).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if self.discarding {
                self.discarding = false;
                continue;
            }
            if line.iter().all(|byte| byte.is_ascii_whitespace()) {
                continue;
            }
            return Some(decode_line(&line));
        }
    }

    /// Flush a trailing unterminated frame at end of stream.
    pub fn finish(&mut self) -> Option<Result<RpcMessage, MessageDecodeError>> {
        let line = std::mem::take(&mut self.buffer);
        if self.discarding || line.iter().all(|byte| byte.is_ascii_whitespace()) {
            self.discarding = false;
            return None;
        }
        Some(decode_line(&line))
    }
}

/// Async frame source over any byte stream (the child's stdout in production).
pub struct FrameReader<R> {
    reader: R,
    decoder: LineDecoder,
    chunk: Vec<u8>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: LineDecoder::new(),
            chunk: vec![0; READ_CHUNK_BYTES],
            eof: false,
        }
    }

    /// Next frame, or `Ok(None)` once the stream hits a zero-length read.
    pub async fn next_message(
        &mut self,
    ) -> io::Result<Option<Result<RpcMessage, MessageDecodeError>>> {
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return Ok(Some(frame));
            }
            if self.eof {
                return Ok(self.decoder.finish());
            }
            let read = self.reader.read(&mut self.chunk).await?;
            if read == 0 {
                self.eof = true;
                continue;
            }
            self.decoder.push(&self.chunk[..read]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_all_frame_shapes() {
        let request = decode_line(br#"{"id":7,"method":"item/fileChange/requestApproval","params":{}}"#)
            .unwrap();
        assert!(matches!(request, RpcMessage::Request { id: RequestId::Integer(7), .. }));

        let string_id = decode_line(br#"{"id":"srv-1","method":"execCommandApproval"}"#).unwrap();
        assert!(matches!(string_id, RpcMessage::Request { id: RequestId::String(ref id), .. } if id == "srv-1"));

        let notification =
            decode_line(br#"{"method":"turn/started","params":{"turn":{"id":"t1"}}}"#).unwrap();
        assert_eq!(notification.method(), Some("turn/started"));
        assert!(matches!(notification, RpcMessage::Notification { .. }));

        let response = decode_line(br#"{"id":1,"result":{"ok":true}}"#).unwrap();
        assert_eq!(
            response,
            RpcMessage::Response {
                id: RequestId::Integer(1),
                result: json!({"ok": true})
            }
        );

        let error = decode_line(br#"{"id":2,"error":{"message":"nope"}}"#).unwrap();
        assert_eq!(
            error,
            RpcMessage::Error {
                id: RequestId::Integer(2),
                error: ErrorObject::new(None, "nope")
            }
        );
    }

    #[test]
    fn rejects_frames_without_method_or_id() {
        let err = decode_line(br#"{"result":{}}"#).unwrap_err();
        assert!(err.reason.contains("neither method nor id"));
        let err = decode_line(br#"[1,2]"#).unwrap_err();
        assert!(err.reason.contains("not a JSON object"));
    }

    #[test]
    fn partial_lines_are_buffered_across_pushes() {
        let mut decoder = LineDecoder::new();
        decoder.push(br#"{"method":"item/agentMessage/delta","par"#);
        assert!(decoder.next_frame().is_none());
        assert!(decoder.pending_bytes() > 0);
        decoder.push(br#"ams":{"delta":"Hel"}}"#);
        assert!(decoder.next_frame().is_none());
        decoder.push(b"\n");
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.method(), Some("item/agentMessage/delta"));
        assert_eq!(decoder.pending_bytes(), 0);
    }

    #[test]
    fn malformed_line_does_not_lose_sync() {
        let mut decoder = LineDecoder::new();
        decoder.push(b"{not json}\n\n  \r\n{\"id\":3,\"result\":null}\r\n");
        assert!(decoder.next_frame().unwrap().is_err());
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(
            frame,
            RpcMessage::Response {
                id: RequestId::Integer(3),
                result: Value::Null
            }
        );
        assert!(decoder.next_frame().is_none());
    }

    #[test]
    fn encode_appends_exactly_one_newline() {
        let frame = encode(&RpcMessage::Request {
            id: RequestId::Integer(1),
            method: "turn/start".to_string(),
            params: json!({"input": [{"type": "text", "text": "line one\nline two"}]}),
        })
        .unwrap();
        assert_eq!(frame.iter().filter(|byte| **byte == b'\n').count(), 1);
        assert_eq!(frame.last(), Some(&b'\n'));
        let decoded = decode_line(&frame[..frame.len() - 1]).unwrap();
        assert_eq!(decoded.method(), Some("turn/start"));
    }

    #[test]
    fn string_ids_are_echoed_verbatim() {
        let frame = encode(&RpcMessage::Response {
            id: RequestId::String("abc".to_string()),
            result: json!({"decision": "acceptForSession"}),
        })
        .unwrap();
        let text = String::from_utf8(frame).unwrap();
        assert!(text.starts_with(r#"{"id":"abc""#) || text.contains(r#""id":"abc""#));
    }

    #[test]
    fn notifications_omit_null_params() {
        let value = RpcMessage::Notification {
            method: "initialized".to_string(),
            params: Value::Null,
        }
        .to_value();
        assert_eq!(value, json!({"method": "initialized"}));
    }

    #[test]
    fn oversized_frame_is_dropped_until_next_newline() {
        let mut decoder = LineDecoder::new();
        decoder.push(&vec![b'x'; MAX_FRAME_BYTES + 1]);
        assert!(decoder.next_frame().unwrap().is_err());
        decoder.push(b"yyy\n{\"method\":\"initialized\"}\n");
        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.method(), Some("initialized"));
    }

    #[tokio::test]
    async fn frame_reader_flushes_unterminated_tail_at_eof() {
        let input: &[u8] = b"{\"method\":\"a\"}\n{\"method\":\"b\"}";
        let mut reader = FrameReader::new(input);
        let first = reader.next_message().await.unwrap().unwrap().unwrap();
        assert_eq!(first.method(), Some("a"));
        let second = reader.next_message().await.unwrap().unwrap().unwrap();
        assert_eq!(second.method(), Some("b"));
        assert!(reader.next_message().await.unwrap().is_none());
    }
}
