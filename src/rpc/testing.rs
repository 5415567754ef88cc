//! Scripted agent on the far side of an in-memory pipe.

use super::codec::{encode, ErrorObject, FrameReader, RequestId, RpcMessage};
use super::session::RpcSession;
use crate::app::logging::Logger;
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, DuplexStream, ReadHalf, WriteHalf};

pub(crate) struct FakeAgent {
    frames: FrameReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

pub(crate) fn connected_pair() -> (RpcSession, FakeAgent) {
    let (client_io, agent_io) = tokio::io::duplex(256 * 1024);
    let (client_read, client_write) = tokio::io::split(client_io);
    let (agent_read, agent_write) = tokio::io::split(agent_io);
    let session = RpcSession::from_io(client_read, client_write, Logger::new("test-rpc"));
    let agent = FakeAgent {
        frames: FrameReader::new(agent_read),
        writer: agent_write,
    };
    (session, agent)
}

impl FakeAgent {
    pub(crate) async fn next(&mut self) -> RpcMessage {
        tokio::time::timeout(Duration::from_secs(30), self.frames.next_message())
            .await
            .expect("agent timed out waiting for a frame")
            .expect("agent read failed")
            .expect("client closed the pipe")
            .expect("client sent an undecodable frame")
    }

    pub(crate) async fn expect_request(&mut self, expected: &str) -> (RequestId, Value) {
        match self.next().await {
            RpcMessage::Request { id, method, params } => {
                assert_eq!(method, expected, "unexpected request");
                (id, params)
            }
            other => panic!("expected request {expected}, got {other:?}"),
        }
    }

    pub(crate) async fn expect_notification(&mut self, expected: &str) -> Value {
        match self.next().await {
            RpcMessage::Notification { method, params } => {
                assert_eq!(method, expected, "unexpected notification");
                params
            }
            other => panic!("expected notification {expected}, got {other:?}"),
        }
    }

    pub(crate) async fn respond(&mut self, id: RequestId, result: Value) {
        self.send(RpcMessage::Response { id, result }).await;
    }

    pub(crate) async fn respond_error(&mut self, id: RequestId, code: i64, message: &str) {
        self.send(RpcMessage::Error {
            id,
            error: ErrorObject::new(Some(code), message),
        })
        .await;
    }

    pub(crate) async fn notify(&mut self, method: &str, params: Value) {
        self.send(RpcMessage::Notification {
            method: method.to_string(),
            params,
        })
        .await;
    }

    pub(crate) async fn request(&mut self, id: RequestId, method: &str, params: Value) {
        self.send(RpcMessage::Request {
            id,
            method: method.to_string(),
            params,
        })
        .await;
    }

    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("agent write");
        self.writer.flush().await.expect("agent flush");
    }

    async fn send(&mut self, message: RpcMessage) {
        let frame = encode(&message).expect("encode");
        self.send_raw(&frame).await;
    }
}
